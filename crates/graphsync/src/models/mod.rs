//! Local entity and server models

mod entity;
mod server;

pub use entity::{Entity, EntityDetails, EntityKind, PostSyncAction, SYNC_ORDER};
pub use server::{ApiServer, ServerId};
