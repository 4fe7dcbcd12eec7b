// Predictive replica of the server world
// Applies authoritative snapshots while preserving local prediction for the controlled entity

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};

use super::entity::{Controls, Entity, EntityId};
use super::map::CollisionMap;
use super::messages::AppMessage;
use super::sequence::Sequence;
use super::wire::{Snapshot, StateReport};
use super::World;

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub speed: f32,
    pub sequence_ceiling: u16,
    /// Upper bound on steps replayed to catch remote entities up to the local time base
    pub max_catch_up_steps: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotOutcome {
    Applied {
        created: Vec<EntityId>,
        removed: Vec<EntityId>,
        replayed: u32,
    },
    /// Not newer than the last accepted snapshot; nothing was applied
    Stale,
    Malformed,
}

pub struct ClientWorld {
    world: World,
    settings: ClientSettings,
    last_accepted: Option<Sequence>,
    local_id: Option<EntityId>,
    names: HashMap<EntityId, String>,
    time_base: Option<Sequence>,
}

impl ClientWorld {
    pub fn new(map: Arc<dyn CollisionMap>, settings: ClientSettings) -> Self {
        Self {
            world: World::new(map, settings.speed),
            settings,
            last_accepted: None,
            local_id: None,
            names: HashMap::new(),
            time_base: None,
        }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn local_id(&self) -> Option<EntityId> {
        self.local_id
    }

    pub fn last_accepted(&self) -> Option<Sequence> {
        self.last_accepted
    }

    pub fn time_base(&self) -> Option<Sequence> {
        self.time_base
    }

    pub fn name_of(&self, id: EntityId) -> Option<&str> {
        self.names.get(&id).map(String::as_str)
    }

    /// Dispatch a JSON message received on the reliable channel
    pub fn handle_reliable_text(&mut self, text: &str) {
        let message = match AppMessage::from_json(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Ignoring malformed reliable message: {}", e);
                return;
            }
        };

        match message {
            AppMessage::Identify { entity_id } => {
                debug!("Controlling entity {}", entity_id);
                self.local_id = Some(entity_id);
            }
            AppMessage::Name { entity_id, name } => {
                debug!("Entity {} is {}", entity_id, name);
                self.names.insert(entity_id, name);
            }
            AppMessage::Time { seq } => {
                let ceiling = self.settings.sequence_ceiling;
                if seq > ceiling {
                    warn!("Ignoring time base {} above ceiling {}", seq, ceiling);
                    return;
                }
                debug!("Time base initialized at {}", seq);
                self.time_base = Some(Sequence::new(seq, ceiling));
            }
            AppMessage::Unknown => {
                warn!("Ignoring reliable message with unknown type: {}", text);
            }
        }
    }

    /// Merge an authoritative snapshot received on the unreliable channel
    pub fn handle_snapshot(&mut self, bytes: &[u8]) -> SnapshotOutcome {
        let snapshot = match Snapshot::decode(bytes) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Dropping malformed snapshot: {}", e);
                return SnapshotOutcome::Malformed;
            }
        };
        let ceiling = self.settings.sequence_ceiling;
        if snapshot.sequence > ceiling as u32 {
            warn!("Dropping snapshot with sequence {} above ceiling {}", snapshot.sequence, ceiling);
            return SnapshotOutcome::Malformed;
        }
        if let Some(record) = snapshot.records.iter().find(|r| r.kind > u16::from(u8::MAX)) {
            warn!("Dropping snapshot with entity {} kind {} out of range", record.id, record.kind);
            return SnapshotOutcome::Malformed;
        }

        let seq = Sequence::new(snapshot.sequence as u16, ceiling);
        if let Some(last) = self.last_accepted {
            if !seq.is_newer_than(last) {
                debug!("Dropping stale snapshot seq={} (last={})", seq, last);
                return SnapshotOutcome::Stale;
            }
        }
        self.last_accepted = Some(seq);

        let mut created = Vec::new();
        let mut mentioned = HashSet::with_capacity(snapshot.records.len());
        for record in &snapshot.records {
            mentioned.insert(record.id);
            let existed = self.world.contains(record.id);
            if !existed {
                self.world.insert(Entity::new(record.id, 0.0, 0.0, 0));
                created.push(record.id);
            }
            if existed && Some(record.id) == self.local_id {
                // keep local prediction for our own entity
                continue;
            }
            if let Some(entity) = self.world.get_mut(record.id) {
                entity.x = record.x as f32;
                entity.y = record.y as f32;
                entity.kind = u8::try_from(record.kind).unwrap_or(u8::MAX);
                entity.controls = record.controls;
            }
        }

        let removed: Vec<EntityId> = self
            .world
            .ids()
            .into_iter()
            .filter(|id| !mentioned.contains(id))
            .collect();
        for id in &removed {
            self.world.remove(*id);
            self.names.remove(id);
        }

        let replayed = self.catch_up(seq);
        SnapshotOutcome::Applied {
            created,
            removed,
            replayed,
        }
    }

    /// Replay remote entities forward to the local time base, or pull the time base back
    fn catch_up(&mut self, confirmed: Sequence) -> u32 {
        let Some(time_base) = self.time_base else {
            return 0;
        };
        let ahead = time_base.signed_distance(confirmed);
        if ahead <= 0 {
            self.time_base = Some(confirmed);
            return 0;
        }

        let mut steps = ahead as u32;
        if let Some(limit) = self.settings.max_catch_up_steps {
            if steps > limit {
                warn!("Time base {} steps ahead, replaying only {}", steps, limit);
                steps = limit;
            }
        }
        for _ in 0..steps {
            self.world.step(self.local_id);
        }
        steps
    }

    /// One local fixed step: apply input to our entity, move everyone, advance the time base
    pub fn tick(&mut self, input: Controls) {
        if let Some(entity) = self.local_id.and_then(|id| self.world.get_mut(id)) {
            entity.controls = input;
        }
        self.world.step(None);
        if let Some(time_base) = self.time_base {
            self.time_base = Some(time_base.next());
        }
    }

    /// Encoded `[x, y, controlBits]` for the locally-controlled entity, if it exists yet
    pub fn state_report(&self) -> Option<Vec<u8>> {
        let entity = self.world.get(self.local_id?)?;
        Some(StateReport::from_entity(entity).encode())
    }
}
