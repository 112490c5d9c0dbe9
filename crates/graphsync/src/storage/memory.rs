//! In-memory storage implementation
//!
//! Used by tests and by callers that do not need persistence.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use anyhow::Result;

use super::{ChangeSet, EntityStore};
use crate::models::{ApiServer, Entity, EntityKind, ServerId};

/// In-memory implementation of EntityStore
///
/// Uses HashMaps protected by RwLocks for thread-safe access.
#[derive(Default)]
pub struct InMemoryEntityStore {
    entities: RwLock<HashMap<String, Entity>>,
    servers: RwLock<HashMap<ServerId, ApiServer>>,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn collect_sorted(&self, filter: impl Fn(&Entity) -> bool) -> Vec<Entity> {
        let entities = self.entities.read().unwrap_or_else(PoisonError::into_inner);
        let mut matching: Vec<Entity> = entities.values().filter(|e| filter(e)).cloned().collect();
        matching.sort_by(|a, b| a.id.cmp(&b.id));
        matching
    }
}

impl EntityStore for InMemoryEntityStore {
    fn get_entity(&self, id: &str) -> Result<Option<Entity>> {
        let entities = self.entities.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entities.get(id).cloned())
    }

    fn list_entities(&self, server: &ServerId, kind: EntityKind) -> Result<Vec<Entity>> {
        Ok(self.collect_sorted(|e| e.kind == kind && &e.server_id == server))
    }

    fn children_of(&self, parent_id: &str) -> Result<Vec<Entity>> {
        Ok(self.collect_sorted(|e| e.parent_ids.contains(parent_id)))
    }

    fn apply(&self, changes: ChangeSet) -> Result<()> {
        // One write guard for the whole set keeps readers from seeing half of it
        let mut entities = self.entities.write().unwrap_or_else(PoisonError::into_inner);
        for id in &changes.deletions {
            entities.remove(id);
        }
        for entity in changes.upserts {
            entities.insert(entity.id.clone(), entity);
        }
        Ok(())
    }

    fn count_entities(&self, server: &ServerId, kind: EntityKind) -> Result<usize> {
        let entities = self.entities.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entities
            .values()
            .filter(|e| e.kind == kind && &e.server_id == server)
            .count())
    }

    fn get_server(&self, id: &ServerId) -> Result<Option<ApiServer>> {
        let servers = self.servers.read().unwrap_or_else(PoisonError::into_inner);
        Ok(servers.get(id).cloned())
    }

    fn list_servers(&self) -> Result<Vec<ApiServer>> {
        let servers = self.servers.read().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<ApiServer> = servers.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    fn save_server(&self, server: ApiServer) -> Result<()> {
        let mut servers = self.servers.write().unwrap_or_else(PoisonError::into_inner);
        servers.insert(server.id.clone(), server);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.entities.write().unwrap_or_else(PoisonError::into_inner).clear();
        self.servers.write().unwrap_or_else(PoisonError::into_inner).clear();
        Ok(())
    }
}
