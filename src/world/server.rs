// Authoritative simulation
// Owns entity identity, broadcasts full snapshots every tick and applies client state reports

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use super::entity::{Entity, EntityId};
use super::map::CollisionMap;
use super::messages::AppMessage;
use super::sequence::Sequence;
use super::wire::{EntityRecord, Snapshot, StateReport};
use super::{World, WorldError};
use crate::transport::PeerId;

/// Artificial loss/latency applied to snapshot broadcasts, for local rehearsal only
#[derive(Debug, Clone, Copy)]
pub struct FaultInjection {
    /// Chance that a whole broadcast is dropped
    pub drop_probability: f64,
    /// Upper bound of the independent per-peer delay
    pub max_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub speed: f32,
    pub appearance_types: u8,
    pub sequence_ceiling: u16,
    pub spawn_attempts: u32,
    pub faults: Option<FaultInjection>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    Peer(PeerId),
    All,
}

/// Something the runtime must put on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerOutput {
    /// JSON message on the reliable channel
    Reliable { to: Recipient, message: AppMessage },
    /// Encoded snapshot on the unreliable channel, sent after `delay`
    Snapshot {
        to: PeerId,
        payload: Vec<u8>,
        delay: Duration,
    },
}

/// What happened to a client state report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    Applied,
    Unbound,
    Blocked,
    Malformed,
}

pub struct ServerWorld {
    world: World,
    settings: ServerSettings,
    sequence: Sequence,
    bindings: HashMap<PeerId, EntityId>,
    names: HashMap<EntityId, String>,
    next_entity: Option<EntityId>,
    rng: StdRng,
}

impl ServerWorld {
    pub fn new(map: Arc<dyn CollisionMap>, settings: ServerSettings) -> Self {
        Self::with_rng(map, settings, StdRng::from_entropy())
    }

    pub fn with_rng(map: Arc<dyn CollisionMap>, settings: ServerSettings, rng: StdRng) -> Self {
        Self {
            world: World::new(map, settings.speed),
            sequence: Sequence::zero(settings.sequence_ceiling),
            settings,
            bindings: HashMap::new(),
            names: HashMap::new(),
            next_entity: Some(1),
            rng,
        }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn sequence(&self) -> Sequence {
        self.sequence
    }

    pub fn entity_of(&self, peer: PeerId) -> Option<EntityId> {
        self.bindings.get(&peer).copied()
    }

    pub fn peer_count(&self) -> usize {
        self.bindings.len()
    }

    /// One server tick: advance the sequence, broadcast the snapshot, then step
    pub fn tick(&mut self) -> Vec<ServerOutput> {
        self.sequence = self.sequence.next();
        let payload = self.snapshot().encode();

        let mut outputs = Vec::with_capacity(self.bindings.len());
        match self.settings.faults {
            None => {
                for &peer in self.bindings.keys() {
                    outputs.push(ServerOutput::Snapshot {
                        to: peer,
                        payload: payload.clone(),
                        delay: Duration::ZERO,
                    });
                }
            }
            Some(faults) => {
                if self.rng.gen_bool(faults.drop_probability) {
                    debug!("Fault injection dropped snapshot seq={}", self.sequence);
                } else {
                    let max_ms = faults.max_delay.as_millis() as u64;
                    for &peer in self.bindings.keys() {
                        let delay = Duration::from_millis(self.rng.gen_range(0..=max_ms));
                        outputs.push(ServerOutput::Snapshot {
                            to: peer,
                            payload: payload.clone(),
                            delay,
                        });
                    }
                }
            }
        }

        self.world.step(None);
        outputs
    }

    /// Serialize the full entity set under the current sequence number
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            sequence: self.sequence.value() as u32,
            records: self.world.entities().map(EntityRecord::from_entity).collect(),
        }
    }

    /// Spawn and bind an entity for a newly connected peer
    pub fn on_peer_connected(
        &mut self,
        peer: PeerId,
        name: &str,
    ) -> Result<Vec<ServerOutput>, WorldError> {
        if let Some(existing) = self.entity_of(peer) {
            warn!("Peer {} already bound to entity {}", peer, existing);
            return Ok(Vec::new());
        }

        let id = self.allocate_id()?;
        let (x, y) = self.spawn_position()?;
        let kind = self.rng.gen_range(0..self.settings.appearance_types.max(1));
        self.world.insert(Entity::new(id, x, y, kind));
        info!("Peer {} ({}) joined as entity {} at ({}, {})", peer, name, id, x, y);

        let mut outputs = vec![
            ServerOutput::Reliable {
                to: Recipient::Peer(peer),
                message: AppMessage::Identify { entity_id: id },
            },
            ServerOutput::Reliable {
                to: Recipient::Peer(peer),
                message: AppMessage::Time {
                    seq: self.sequence.value(),
                },
            },
            ServerOutput::Reliable {
                to: Recipient::All,
                message: AppMessage::Name {
                    entity_id: id,
                    name: name.to_string(),
                },
            },
        ];
        for (&entity_id, other) in &self.names {
            outputs.push(ServerOutput::Reliable {
                to: Recipient::Peer(peer),
                message: AppMessage::Name {
                    entity_id,
                    name: other.clone(),
                },
            });
        }

        self.bindings.insert(peer, id);
        self.names.insert(id, name.to_string());
        Ok(outputs)
    }

    /// Release the peer's entity; later snapshots omit it
    pub fn on_peer_disconnected(&mut self, peer: PeerId) -> Option<EntityId> {
        let id = self.bindings.remove(&peer)?;
        self.world.remove(id);
        self.names.remove(&id);
        info!("Peer {} left, removed entity {}", peer, id);
        Some(id)
    }

    /// Apply a client's state report if its position is not blocked
    pub fn on_state_report(&mut self, peer: PeerId, bytes: &[u8]) -> ReportOutcome {
        let report = match StateReport::decode(bytes) {
            Ok(report) => report,
            Err(e) => {
                debug!("Discarding state report from peer {}: {}", peer, e);
                return ReportOutcome::Malformed;
            }
        };
        let Some(id) = self.entity_of(peer) else {
            debug!("Discarding state report from unbound peer {}", peer);
            return ReportOutcome::Unbound;
        };

        let (x, y) = (report.x as f32, report.y as f32);
        if self.world.map().is_blocked(x, y) {
            debug!("Rejected blocked position ({}, {}) from peer {}", x, y, peer);
            return ReportOutcome::Blocked;
        }

        match self.world.get_mut(id) {
            Some(entity) => {
                entity.x = x;
                entity.y = y;
                entity.controls = report.controls;
                ReportOutcome::Applied
            }
            None => ReportOutcome::Unbound,
        }
    }

    fn allocate_id(&mut self) -> Result<EntityId, WorldError> {
        let id = self.next_entity.ok_or(WorldError::IdsExhausted)?;
        self.next_entity = id.checked_add(1);
        Ok(id)
    }

    fn spawn_position(&mut self) -> Result<(f32, f32), WorldError> {
        let map = self.world.map();
        let (width, height) = (map.width_px(), map.height_px());
        for _ in 0..self.settings.spawn_attempts {
            let x = self.rng.gen_range(0.0..width).floor();
            let y = self.rng.gen_range(0.0..height).floor();
            if !self.world.map().is_blocked(x, y) {
                return Ok((x, y));
            }
        }
        Err(WorldError::NoSpawnPosition(self.settings.spawn_attempts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::entity::Controls;
    use crate::world::map::TileMap;

    fn settings() -> ServerSettings {
        ServerSettings {
            speed: 2.0,
            appearance_types: 4,
            sequence_ceiling: 50_000,
            spawn_attempts: 256,
            faults: None,
        }
    }

    fn server_with(settings: ServerSettings) -> ServerWorld {
        let map = Arc::new(TileMap::bordered(20, 20, 10).unwrap());
        ServerWorld::with_rng(map, settings, StdRng::seed_from_u64(7))
    }

    fn server() -> ServerWorld {
        server_with(settings())
    }

    #[test]
    fn test_connect_spawns_open_and_announces() {
        let mut server = server();
        let outputs = server.on_peer_connected(1, "ada").unwrap();
        let id = server.entity_of(1).unwrap();

        let entity = server.world().get(id).unwrap();
        assert!(!server.world().map().is_blocked(entity.x, entity.y));
        assert!(entity.kind < 4);

        assert_eq!(
            outputs,
            vec![
                ServerOutput::Reliable {
                    to: Recipient::Peer(1),
                    message: AppMessage::Identify { entity_id: id },
                },
                ServerOutput::Reliable {
                    to: Recipient::Peer(1),
                    message: AppMessage::Time { seq: 0 },
                },
                ServerOutput::Reliable {
                    to: Recipient::All,
                    message: AppMessage::Name { entity_id: id, name: "ada".into() },
                },
            ]
        );
    }

    #[test]
    fn test_second_peer_learns_existing_names() {
        let mut server = server();
        server.on_peer_connected(1, "ada").unwrap();
        let first = server.entity_of(1).unwrap();
        server.tick();

        let outputs = server.on_peer_connected(2, "bob").unwrap();
        assert!(outputs.contains(&ServerOutput::Reliable {
            to: Recipient::Peer(2),
            message: AppMessage::Name { entity_id: first, name: "ada".into() },
        }));
        assert!(outputs.contains(&ServerOutput::Reliable {
            to: Recipient::Peer(2),
            message: AppMessage::Time { seq: 1 },
        }));
    }

    #[test]
    fn test_entity_ids_never_reused() {
        let mut server = server();
        server.on_peer_connected(1, "a").unwrap();
        let first = server.entity_of(1).unwrap();
        server.on_peer_disconnected(1);
        server.on_peer_connected(2, "b").unwrap();
        assert_ne!(server.entity_of(2).unwrap(), first);
    }

    #[test]
    fn test_duplicate_connect_is_ignored() {
        let mut server = server();
        server.on_peer_connected(1, "a").unwrap();
        assert!(server.on_peer_connected(1, "a").unwrap().is_empty());
        assert_eq!(server.world().len(), 1);
    }

    #[test]
    fn test_tick_broadcasts_then_steps() {
        let mut server = server();
        server.on_peer_connected(1, "a").unwrap();
        server.on_peer_connected(2, "b").unwrap();
        let id = server.entity_of(1).unwrap();
        {
            let entity = server.world_mut().get_mut(id).unwrap();
            entity.x = 100.0;
            entity.y = 100.0;
            entity.controls.right = true;
        }

        let outputs = server.tick();
        assert_eq!(outputs.len(), 2);
        let ServerOutput::Snapshot { payload, delay, .. } = &outputs[0] else {
            panic!("expected snapshot, got {:?}", outputs[0]);
        };
        assert_eq!(*delay, Duration::ZERO);

        let snapshot = Snapshot::decode(payload).unwrap();
        assert_eq!(snapshot.sequence, 1);
        let record = snapshot.records.iter().find(|r| r.id == id).unwrap();
        // serialized before the step
        assert_eq!(record.x, 100);
        assert_eq!(server.world().get(id).unwrap().x, 102.0);
    }

    #[test]
    fn test_disconnect_removes_entity_from_snapshots() {
        let mut server = server();
        server.on_peer_connected(1, "a").unwrap();
        server.on_peer_connected(2, "b").unwrap();
        let gone = server.entity_of(2).unwrap();
        assert_eq!(server.on_peer_disconnected(2), Some(gone));
        assert_eq!(server.on_peer_disconnected(2), None);

        let outputs = server.tick();
        assert_eq!(outputs.len(), 1);
        assert!(server.snapshot().records.iter().all(|r| r.id != gone));
    }

    #[test]
    fn test_state_report_applies_open_position() {
        let mut server = server();
        server.on_peer_connected(1, "a").unwrap();
        let id = server.entity_of(1).unwrap();

        let report = StateReport {
            x: 55,
            y: 66,
            controls: Controls { up: true, ..Default::default() },
        };
        assert_eq!(server.on_state_report(1, &report.encode()), ReportOutcome::Applied);

        let entity = server.world().get(id).unwrap();
        assert_eq!((entity.x, entity.y), (55.0, 66.0));
        assert!(entity.controls.up);
    }

    #[test]
    fn test_blocked_state_report_leaves_entity_unchanged() {
        let mut server = server();
        server.on_peer_connected(1, "a").unwrap();
        let id = server.entity_of(1).unwrap();
        let before = server.world().get(id).unwrap().clone();

        // (3, 3) is inside the border wall tile
        let report = StateReport {
            x: 3,
            y: 3,
            controls: Controls { left: true, ..Default::default() },
        };
        assert_eq!(server.on_state_report(1, &report.encode()), ReportOutcome::Blocked);
        assert_eq!(server.world().get(id).unwrap(), &before);

        // beyond the map edge
        let report = StateReport { x: 5000, y: 50, controls: Controls::default() };
        assert_eq!(server.on_state_report(1, &report.encode()), ReportOutcome::Blocked);
        assert_eq!(server.world().get(id).unwrap(), &before);
    }

    #[test]
    fn test_reports_from_unbound_or_malformed_are_discarded() {
        let mut server = server();
        let report = StateReport { x: 50, y: 50, controls: Controls::default() };
        assert_eq!(server.on_state_report(9, &report.encode()), ReportOutcome::Unbound);
        server.on_peer_connected(1, "a").unwrap();
        assert_eq!(server.on_state_report(1, &[1, 2, 3]), ReportOutcome::Malformed);
    }

    #[test]
    fn test_sequence_wraps_at_ceiling() {
        let mut server = server_with(ServerSettings {
            sequence_ceiling: 3,
            ..settings()
        });
        let seen: Vec<u16> = (0..5)
            .map(|_| {
                server.tick();
                server.sequence().value()
            })
            .collect();
        assert_eq!(seen, vec![1, 2, 3, 0, 1]);
    }

    #[test]
    fn test_fault_injection_always_drop() {
        let mut server = server_with(ServerSettings {
            faults: Some(FaultInjection {
                drop_probability: 1.0,
                max_delay: Duration::from_millis(125),
            }),
            ..settings()
        });
        server.on_peer_connected(1, "a").unwrap();
        assert!(server.tick().is_empty());
        // the sequence still advanced
        assert_eq!(server.sequence().value(), 1);
    }

    #[test]
    fn test_fault_injection_delays_are_bounded_and_capture_payload() {
        let max_delay = Duration::from_millis(125);
        let mut server = server_with(ServerSettings {
            faults: Some(FaultInjection { drop_probability: 0.0, max_delay }),
            ..settings()
        });
        server.on_peer_connected(1, "a").unwrap();
        server.on_peer_connected(2, "b").unwrap();

        let outputs = server.tick();
        server.tick();
        assert_eq!(outputs.len(), 2);
        for output in outputs {
            let ServerOutput::Snapshot { payload, delay, .. } = output else {
                panic!("expected snapshot");
            };
            assert!(delay <= max_delay);
            // payload reflects schedule time, not the later tick
            assert_eq!(Snapshot::decode(&payload).unwrap().sequence, 1);
        }
    }
}
