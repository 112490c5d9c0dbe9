//! Per-pass parent lookup cache

use std::collections::HashMap;

use anyhow::Result;

use super::context::SyncContext;
use crate::models::EntityKind;

/// Kinds of parent ids already looked up this pass, misses included
#[derive(Debug, Default)]
pub struct ParentCache {
    kinds: HashMap<String, Option<EntityKind>>,
}

impl ParentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kind of the entity `id`, or `None` if there is none
    pub fn resolve(&mut self, ctx: &mut SyncContext, id: &str) -> Result<Option<EntityKind>> {
        if let Some(kind) = self.kinds.get(id) {
            return Ok(*kind);
        }
        let kind = ctx.existing_object(id)?.map(|e| e.kind);
        self.kinds.insert(id.to_string(), kind);
        Ok(kind)
    }

    /// Record an entity created this pass
    pub fn remember(&mut self, id: &str, kind: EntityKind) {
        self.kinds.insert(id.to_string(), Some(kind));
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Entity, ServerId};
    use crate::storage::{ChangeSet, EntityStore, InMemoryEntityStore};
    use std::sync::Arc;

    #[test]
    fn test_misses_are_cached_until_remembered() {
        let store = InMemoryEntityStore::new();
        store
            .apply(ChangeSet {
                upserts: vec![Entity::new("R1", EntityKind::Repository, ServerId::from("GitHub"))],
                deletions: vec![],
            })
            .unwrap();
        let mut ctx = SyncContext::new(Arc::new(store), ServerId::from("GitHub"));
        let mut cache = ParentCache::new();

        assert_eq!(cache.resolve(&mut ctx, "R1").unwrap(), Some(EntityKind::Repository));
        assert_eq!(cache.resolve(&mut ctx, "PR1").unwrap(), None);

        cache.remember("PR1", EntityKind::PullRequest);
        assert_eq!(cache.resolve(&mut ctx, "PR1").unwrap(), Some(EntityKind::PullRequest));
        assert_eq!(cache.len(), 2);
    }
}
