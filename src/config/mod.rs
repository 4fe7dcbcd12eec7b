// Configuration module for peerworld
// Handles loading the TOML file and turning it into world settings

pub mod loader;
pub mod types;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::world::client::ClientSettings;
use crate::world::map::{CollisionMap, MapError, TileMap};
use crate::world::server::{FaultInjection, ServerSettings};

pub use loader::{create_default_config, get_config_path, load_config};
pub use types::{Config, FaultConfig, MapConfig, NetworkConfig, SimulationConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("failed to write default config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid configuration: {0}")]
    Invalid(&'static str),

    #[error("invalid map: {0}")]
    Map(#[from] MapError),
}

impl Config {
    /// The collision map described by the `[map]` section
    pub fn build_map(&self) -> Result<Arc<dyn CollisionMap>, ConfigError> {
        let map = match &self.map.path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.clone(),
                    source,
                })?;
                TileMap::from_ascii(&text, self.map.tile_size)?
            }
            None => TileMap::bordered(
                self.map.width_tiles,
                self.map.height_tiles,
                self.map.tile_size,
            )?,
        };
        Ok(Arc::new(map))
    }

    pub fn server_settings(&self) -> ServerSettings {
        let faults = self.faults.enabled.then(|| FaultInjection {
            drop_probability: self.faults.drop_probability,
            max_delay: self.network.retention() / 2,
        });
        ServerSettings {
            speed: self.simulation.speed,
            appearance_types: self.simulation.appearance_types,
            sequence_ceiling: self.simulation.sequence_ceiling,
            spawn_attempts: self.simulation.spawn_attempts,
            faults,
        }
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            speed: self.simulation.speed,
            sequence_ceiling: self.simulation.sequence_ceiling,
            max_catch_up_steps: self.simulation.max_catch_up_steps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_fault_delay_is_half_retention() {
        let mut config = Config::default();
        assert!(config.server_settings().faults.is_none());

        config.faults.enabled = true;
        config.network.unreliable_max_retention_ms = 300;
        let faults = config.server_settings().faults.unwrap();
        assert_eq!(faults.max_delay, Duration::from_millis(150));
        assert_eq!(faults.drop_probability, 0.2);
    }

    #[test]
    fn test_default_map_is_bordered_room() {
        let map = Config::default().build_map().unwrap();
        assert_eq!(map.width_tiles(), 40);
        assert_eq!(map.height_tiles(), 30);
        assert!(map.is_blocked(1.0, 1.0));
        assert!(!map.is_blocked(16.0 * 5.0, 16.0 * 5.0));
    }

    #[test]
    fn test_missing_map_file_reported() {
        let mut config = Config::default();
        config.map.path = Some(PathBuf::from("/nonexistent/peerworld/map.txt"));
        assert!(matches!(config.build_map(), Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_validation() {
        assert!(Config::default().validate().is_ok());

        let mut config = Config::default();
        config.simulation.tick_rate_hz = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.map.tile_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.faults.drop_probability = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.simulation.sequence_ceiling = 1;
        assert!(config.validate().is_err());
    }
}
