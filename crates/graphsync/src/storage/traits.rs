//! Storage trait definitions

use anyhow::Result;

use crate::models::{ApiServer, Entity, EntityKind, ServerId};

/// Writes produced by one committed sync pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    /// Entities to insert or replace, parent links included
    pub upserts: Vec<Entity>,
    /// Ids of entities to remove along with their own parent links
    pub deletions: Vec<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletions.is_empty()
    }
}

/// Trait for entity storage operations
///
/// Implementations must apply a [`ChangeSet`] atomically: either every
/// upsert and deletion lands or none do.
pub trait EntityStore: Send + Sync {
    /// Get an entity by its remote id
    fn get_entity(&self, id: &str) -> Result<Option<Entity>>;

    /// All entities of a kind belonging to a server, ordered by id
    fn list_entities(&self, server: &ServerId, kind: EntityKind) -> Result<Vec<Entity>>;

    /// Entities listing `parent_id` among their parents, ordered by id
    fn children_of(&self, parent_id: &str) -> Result<Vec<Entity>>;

    /// Apply upserts and deletions in one transaction
    fn apply(&self, changes: ChangeSet) -> Result<()>;

    fn count_entities(&self, server: &ServerId, kind: EntityKind) -> Result<usize>;

    fn get_server(&self, id: &ServerId) -> Result<Option<ApiServer>>;

    /// All known servers, ordered by id
    fn list_servers(&self) -> Result<Vec<ApiServer>>;

    /// Insert or update a server record
    fn save_server(&self, server: ApiServer) -> Result<()>;

    /// Clear all data (for testing)
    fn clear(&self) -> Result<()>;
}
