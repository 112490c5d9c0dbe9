//! Graphsync - incremental synchronization against GitHub-style GraphQL APIs
//!
//! This crate provides:
//! - Declarative query trees with fragments, paging and cost-bounded batches
//! - A retrying executor that chases pagination with follow-up queries
//! - A deduplicated node graph built from each response
//! - Reconciliation of that graph into locally stored entities
//! - Storage trait abstractions with SQLite and in-memory stores
//!
//! The network layer is pluggable through [`Transport`], so tests run
//! against scripted responses.

pub mod client;
pub mod config;
pub mod error;
pub mod gate;
pub mod graph;
pub mod models;
pub mod query;
pub mod storage;
pub mod sync;

pub use client::{
    ApiStats, CancelHandle, CancelToken, Executor, ExecutorSettings, GraphRequest, HttpResponse,
    Query, RunOutput, Transport, UreqTransport,
};
pub use crate::config::{ServerSettings, SyncProfile, SyncSettings};
pub use error::{Result, SyncError, TransportError};
pub use gate::Gate;
pub use graph::{AlreadyParsed, Node, NodeGraph, NodeKey};
pub use models::{ApiServer, Entity, EntityDetails, EntityKind, PostSyncAction, SYNC_ORDER, ServerId};
pub use storage::{ChangeSet, EntityStore, InMemoryEntityStore, SqliteEntityStore};
pub use sync::{
    // Engine
    ServerReport, SyncEngine, SyncOutcome, SyncReport,
    // Reconciliation building blocks
    ParentCache, ReconcileReport, SyncContext, reconcile,
    // Commit hooks
    LogHook, NoopHook, PostSyncHook,
};
