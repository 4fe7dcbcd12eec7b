// peerworld configuration types
// Every section and field falls back to its default when absent

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub map: MapConfig,
    #[serde(default)]
    pub faults: FaultConfig,
}

impl Config {
    /// Reject values the runtimes cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sim = &self.simulation;
        if sim.tick_rate_hz == 0 {
            return Err(ConfigError::Invalid("simulation.tick_rate_hz must be > 0"));
        }
        if sim.send_rate_hz == 0 {
            return Err(ConfigError::Invalid("simulation.send_rate_hz must be > 0"));
        }
        if !sim.speed.is_finite() || sim.speed < 0.0 {
            return Err(ConfigError::Invalid("simulation.speed must be finite and >= 0"));
        }
        if sim.appearance_types == 0 {
            return Err(ConfigError::Invalid("simulation.appearance_types must be > 0"));
        }
        if sim.sequence_ceiling < 2 {
            return Err(ConfigError::Invalid("simulation.sequence_ceiling must be >= 2"));
        }
        if sim.spawn_attempts == 0 {
            return Err(ConfigError::Invalid("simulation.spawn_attempts must be > 0"));
        }
        if self.map.tile_size == 0 {
            return Err(ConfigError::Invalid("map.tile_size must be > 0"));
        }
        if self.map.path.is_none() && (self.map.width_tiles < 3 || self.map.height_tiles < 3) {
            return Err(ConfigError::Invalid(
                "map.width_tiles and map.height_tiles must be >= 3",
            ));
        }
        if !(0.0..=1.0).contains(&self.faults.drop_probability) {
            return Err(ConfigError::Invalid("faults.drop_probability must be within [0, 1]"));
        }
        if self.network.unreliable_max_retention_ms == 0 {
            return Err(ConfigError::Invalid(
                "network.unreliable_max_retention_ms must be > 0",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    // Relay websocket base URL; the local name is appended as the path
    pub relay_url: String,

    // STUN server used to discover the public address (host:port)
    pub stun_server: String,

    // Lifetime of a message on the unreliable channel before it is given up
    pub unreliable_max_retention_ms: u16,

    // How long a joiner waits for both channels to open
    pub connection_timeout_secs: u64,
}

impl NetworkConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_millis(u64::from(self.unreliable_max_retention_ms))
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://127.0.0.1:8080".to_string(),
            stun_server: "stun.cloudflare.com:3478".to_string(),
            unreliable_max_retention_ms: 250,
            connection_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SimulationConfig {
    // Simulation steps per second (both sides)
    pub tick_rate_hz: u32,

    // Client state reports per second
    pub send_rate_hz: u32,

    // Pixels moved per step per active direction
    pub speed: f32,

    // Number of appearance types handed out at spawn
    pub appearance_types: u8,

    // Sequence counter wraps to 0 after this value
    pub sequence_ceiling: u16,

    // Optional upper bound on steps replayed after a snapshot; unset replays the full gap
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_catch_up_steps: Option<u32>,

    // Random placements tried before giving up on a spawn
    pub spawn_attempts: u32,
}

impl SimulationConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_rate_hz.max(1)))
    }

    pub fn send_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.send_rate_hz.max(1)))
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 30,
            send_rate_hz: 15,
            speed: 3.0,
            appearance_types: 4,
            sequence_ceiling: 50_000,
            max_catch_up_steps: None,
            spawn_attempts: 64,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MapConfig {
    // ASCII map file ('#' blocked, '.' open); a bordered room is used when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    pub width_tiles: u32,
    pub height_tiles: u32,
    pub tile_size: u32,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            path: None,
            width_tiles: 40,
            height_tiles: 30,
            tile_size: 16,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FaultConfig {
    // Host only: randomly drop and delay snapshot broadcasts
    pub enabled: bool,

    // Chance of dropping an entire broadcast
    pub drop_probability: f64,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            drop_probability: 0.2,
        }
    }
}
