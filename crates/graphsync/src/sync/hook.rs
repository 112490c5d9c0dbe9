//! Post-sync notification seam

use log::info;

use crate::models::{ApiServer, Entity, EntityKind, SYNC_ORDER};

/// Receives the entities a committed pass created or changed
///
/// Called after the pass is persisted and before the new/updated tags are
/// cleared, so the entities still carry their tags.
pub trait PostSyncHook: Send + Sync {
    fn entities_synced(&self, server: &ApiServer, created: &[Entity], updated: &[Entity]);
}

/// Ignores every pass
pub struct NoopHook;

impl PostSyncHook for NoopHook {
    fn entities_synced(&self, _server: &ApiServer, _created: &[Entity], _updated: &[Entity]) {}
}

/// Logs per-kind counts of created and updated entities
pub struct LogHook;

fn count(entities: &[Entity], kind: EntityKind) -> usize {
    entities.iter().filter(|e| e.kind == kind).count()
}

impl PostSyncHook for LogHook {
    fn entities_synced(&self, server: &ApiServer, created: &[Entity], updated: &[Entity]) {
        for kind in SYNC_ORDER {
            let (new, changed) = (count(created, kind), count(updated, kind));
            if new + changed > 0 {
                info!("[{}] {kind}: {new} new, {changed} updated", server.label);
            }
        }
    }
}
