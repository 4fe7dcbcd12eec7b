// Simulated worlds: the shared model plus the authoritative and predictive variants

pub mod client;
pub mod entity;
pub mod map;
pub mod messages;
pub mod movement;
pub mod sequence;
pub mod server;
pub mod wire;

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

pub use client::{ClientWorld, SnapshotOutcome};
pub use entity::{Controls, Entity, EntityId, Facing};
pub use map::{CollisionMap, TileMap};
pub use messages::AppMessage;
pub use sequence::Sequence;
pub use server::{Recipient, ServerOutput, ServerWorld};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorldError {
    #[error("entity id space exhausted")]
    IdsExhausted,
    #[error("no open spawn position found after {0} attempts")]
    NoSpawnPosition(u32),
}

/// Entity set plus the static map they move on
pub struct World {
    entities: HashMap<EntityId, Entity>,
    map: Arc<dyn CollisionMap>,
    speed: f32,
}

impl World {
    pub fn new(map: Arc<dyn CollisionMap>, speed: f32) -> Self {
        Self {
            entities: HashMap::new(),
            map,
            speed,
        }
    }

    pub fn map(&self) -> &dyn CollisionMap {
        self.map.as_ref()
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn insert(&mut self, entity: Entity) {
        self.entities.insert(entity.id, entity);
    }

    pub fn remove(&mut self, id: EntityId) -> Option<Entity> {
        self.entities.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.entities.keys().copied().collect()
    }

    /// Run the movement integrator once for every entity except `exclude`
    pub fn step(&mut self, exclude: Option<EntityId>) {
        movement::step_all(
            self.entities.values_mut(),
            self.map.as_ref(),
            self.speed,
            exclude,
        );
    }
}
