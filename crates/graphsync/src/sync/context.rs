//! Working copy of one server's entities for a sync generation
//!
//! Reconciliation reads stored entities into the context and tags them.
//! Nothing reaches the store until [`SyncContext::save`]; dropping the
//! context through [`SyncContext::discard`] leaves the store untouched.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use anyhow::Result;
use log::{debug, info};

use super::hook::PostSyncHook;
use crate::models::{ApiServer, Entity, EntityKind, PostSyncAction, ServerId};
use crate::storage::{ChangeSet, EntityStore};

/// What a committed pass wrote
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveSummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
}

/// What a discarded pass would have written
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RollbackSummary {
    /// Stored entities that were tagged for deletion and are kept
    pub kept: usize,
    /// Entities created this pass and dropped
    pub dropped: usize,
    /// Stored entities whose updates were thrown away
    pub reverted: usize,
}

pub struct SyncContext {
    store: Arc<dyn EntityStore>,
    server_id: ServerId,
    working: HashMap<String, Entity>,
    /// Stored ids replaced by an id migration; their rows go on save
    renamed: BTreeSet<String>,
}

impl SyncContext {
    pub fn new(store: Arc<dyn EntityStore>, server_id: ServerId) -> Self {
        Self {
            store,
            server_id,
            working: HashMap::new(),
            renamed: BTreeSet::new(),
        }
    }

    pub fn server_id(&self) -> &ServerId {
        &self.server_id
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    /// The entity with `id`, loading it from the store on first use
    ///
    /// Entities stored for another server are not visible.
    pub fn existing_object(&mut self, id: &str) -> Result<Option<&mut Entity>> {
        if !self.working.contains_key(id)
            && let Some(entity) = self.store.get_entity(id)?
            && entity.server_id == self.server_id
        {
            self.working.insert(id.to_string(), entity);
        }
        Ok(self.working.get_mut(id))
    }

    /// An entity already in the working copy
    pub fn get(&self, id: &str) -> Option<&Entity> {
        self.working.get(id)
    }

    /// Add a freshly created entity, tagged new
    pub fn insert(&mut self, mut entity: Entity) -> &mut Entity {
        entity.post_sync_action = PostSyncAction::IsNew;
        self.working
            .entry(entity.id.clone())
            .insert_entry(entity)
            .into_mut()
    }

    fn load_all(&mut self, entities: Vec<Entity>) -> Vec<String> {
        let mut ids = Vec::with_capacity(entities.len());
        for entity in entities {
            if entity.server_id != self.server_id {
                continue;
            }
            ids.push(entity.id.clone());
            self.working.entry(entity.id.clone()).or_insert(entity);
        }
        ids
    }

    /// Tag every stored entity of `kind` for deletion; re-seen ones are restored
    pub fn mark_for_deletion(&mut self, kind: EntityKind) -> Result<usize> {
        let stored = self.store.list_entities(&self.server_id, kind)?;
        let ids = self.load_all(stored);
        for id in &ids {
            if let Some(entity) = self.working.get_mut(id) {
                entity.post_sync_action = PostSyncAction::Delete;
            }
        }
        Ok(ids.len())
    }

    /// Tag stored descendants of `parents` whose kind is in `kinds`
    ///
    /// Descends through tagged entities only, so a comment's reactions are
    /// tagged along with the comment.
    pub fn mark_children_for_deletion(&mut self, parents: &[String], kinds: &[EntityKind]) -> Result<usize> {
        let mut frontier: Vec<String> = parents.to_vec();
        let mut marked = 0;
        while let Some(parent) = frontier.pop() {
            let children = self.store.children_of(&parent)?;
            for id in self.load_all(children) {
                let Some(entity) = self.working.get_mut(&id) else {
                    continue;
                };
                if !kinds.contains(&entity.kind) || entity.is_marked_for_deletion() {
                    continue;
                }
                entity.post_sync_action = PostSyncAction::Delete;
                marked += 1;
                frontier.push(id);
            }
        }
        Ok(marked)
    }

    /// Drop `parents` from the parent sets of their stored children of `kind`
    ///
    /// A child left without parents is tagged for deletion until a node
    /// links it again.
    pub fn unlink_children(&mut self, parents: &[String], kind: EntityKind) -> Result<usize> {
        let mut unlinked = 0;
        for parent in parents {
            let children = self.store.children_of(parent)?;
            for id in self.load_all(children) {
                let Some(entity) = self.working.get_mut(&id) else {
                    continue;
                };
                if entity.kind != kind || !entity.parent_ids.remove(parent) {
                    continue;
                }
                unlinked += 1;
                if entity.parent_ids.is_empty() {
                    entity.post_sync_action = PostSyncAction::Delete;
                }
            }
        }
        Ok(unlinked)
    }

    /// Apply legacy to next id pairs announced by the server
    ///
    /// A stored entity is renamed and its children re-pointed. When the next
    /// id already exists, the legacy entity is a duplicate and is tagged for
    /// deletion instead.
    pub fn remap_ids(&mut self, migrations: &BTreeMap<String, String>) -> Result<usize> {
        let mut applied = 0;
        for (legacy, next) in migrations {
            if self.existing_object(legacy)?.is_none() {
                continue;
            }
            if self.existing_object(next)?.is_some() {
                if let Some(duplicate) = self.working.get_mut(legacy) {
                    debug!("Legacy id {legacy} duplicates {next}, tagging for deletion");
                    duplicate.post_sync_action = PostSyncAction::Delete;
                }
                applied += 1;
                continue;
            }

            let children = self.store.children_of(legacy)?;
            self.load_all(children);
            if let Some(mut entity) = self.working.remove(legacy) {
                entity.id = next.clone();
                self.working.insert(next.clone(), entity);
                self.renamed.insert(legacy.clone());
            }
            for entity in self.working.values_mut() {
                if entity.parent_ids.remove(legacy) {
                    entity.parent_ids.insert(next.clone());
                }
            }
            applied += 1;
        }
        if applied > 0 {
            info!("Applied {applied} id migrations");
        }
        Ok(applied)
    }

    /// Ids of kind `kind` carrying any of `actions`, sorted
    pub fn ids_tagged(&self, kind: EntityKind, actions: &[PostSyncAction]) -> Vec<String> {
        let mut ids: Vec<String> = self
            .working
            .values()
            .filter(|e| e.kind == kind && actions.contains(&e.post_sync_action))
            .map(|e| e.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Ids of kind `kind` that survive this pass so far, sorted
    pub fn live_ids(&self, kind: EntityKind) -> Vec<String> {
        let mut ids: Vec<String> = self
            .working
            .values()
            .filter(|e| e.kind == kind && !e.is_marked_for_deletion())
            .map(|e| e.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Deletion set: tagged entities plus their stored descendants
    fn collect_deletions(&mut self) -> Result<BTreeSet<String>> {
        let mut deletions: BTreeSet<String> = self
            .working
            .values()
            .filter(|e| e.is_marked_for_deletion())
            .map(|e| e.id.clone())
            .collect();

        let mut frontier: Vec<String> = deletions.iter().cloned().collect();
        while let Some(parent) = frontier.pop() {
            for child in self.store.children_of(&parent)? {
                let entity = self.working.entry(child.id.clone()).or_insert(child);
                if !entity.parent_ids.contains(&parent) {
                    // Re-parented during this pass
                    continue;
                }
                if entity.kind.allows_multiple_parents() {
                    entity.parent_ids.remove(&parent);
                    if !entity.parent_ids.is_empty() {
                        continue;
                    }
                }
                if deletions.insert(entity.id.clone()) {
                    frontier.push(entity.id.clone());
                }
            }
        }
        Ok(deletions)
    }

    /// Persist the pass, notify the hook, then clear the new/updated tags
    pub fn save(mut self, server: &ApiServer, hook: &dyn PostSyncHook) -> Result<SaveSummary> {
        let deletions = self.collect_deletions()?;
        let mut stored_deletions: Vec<String> = deletions.iter().cloned().collect();
        stored_deletions.extend(self.renamed.iter().cloned());

        let mut upserts: Vec<Entity> = self
            .working
            .into_values()
            .filter(|e| !deletions.contains(&e.id))
            .collect();
        upserts.sort_by(|a, b| a.id.cmp(&b.id));

        let created: Vec<Entity> = upserts
            .iter()
            .filter(|e| e.post_sync_action == PostSyncAction::IsNew)
            .cloned()
            .collect();
        let updated: Vec<Entity> = upserts
            .iter()
            .filter(|e| e.post_sync_action == PostSyncAction::IsUpdated)
            .cloned()
            .collect();
        let summary = SaveSummary {
            created: created.len(),
            updated: updated.len(),
            deleted: deletions.len(),
        };

        self.store.apply(ChangeSet {
            upserts,
            deletions: stored_deletions,
        })?;

        hook.entities_synced(server, &created, &updated);

        let cleared: Vec<Entity> = created
            .into_iter()
            .chain(updated)
            .map(|mut e| {
                e.post_sync_action = PostSyncAction::DoNothing;
                e
            })
            .collect();
        self.store.apply(ChangeSet {
            upserts: cleared,
            deletions: Vec::new(),
        })?;

        info!(
            "[{}] Saved pass: {} new, {} updated, {} deleted",
            server.label, summary.created, summary.updated, summary.deleted
        );
        Ok(summary)
    }

    /// Throw the pass away without touching the store
    pub fn discard(self) -> RollbackSummary {
        let mut summary = RollbackSummary::default();
        for entity in self.working.values() {
            match entity.post_sync_action {
                PostSyncAction::Delete => summary.kept += 1,
                PostSyncAction::IsNew => summary.dropped += 1,
                PostSyncAction::IsUpdated => summary.reverted += 1,
                PostSyncAction::DoNothing => {}
            }
        }
        debug!(
            "[{}] Discarded pass: kept {}, dropped {}, reverted {}",
            self.server_id.as_str(),
            summary.kept,
            summary.dropped,
            summary.reverted
        );
        summary
    }
}
