//! Storage traits and implementations
//!
//! The sync engine reads through [`EntityStore`] while reconciling and
//! writes only when a pass commits.

mod memory;
mod sqlite;
mod traits;

pub use memory::InMemoryEntityStore;
pub use sqlite::SqliteEntityStore;
pub use traits::{ChangeSet, EntityStore};
