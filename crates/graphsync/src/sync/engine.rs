//! One sync generation across every configured server
//!
//! Each server runs as its own task through three waves: watched
//! repositories, then their items, then details of the items that are new
//! or changed. Network output is reconciled into the server's
//! [`SyncContext`] after each wave. Commits are serialized so only one
//! server writes to the store at a time.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::Mutex;

use super::cache::ParentCache;
use super::context::{SaveSummary, SyncContext};
use super::hook::{LogHook, PostSyncHook};
use super::reconcile::{OPEN, reconcile};
use crate::client::{ApiStats, CancelToken, Executor, ExecutorSettings, RunOutput, Transport};
use crate::config::{ServerSettings, SyncSettings};
use crate::error::{Result, SyncError};
use crate::gate::Gate;
use crate::graph::NodeGraph;
use crate::models::{ApiServer, EntityKind, PostSyncAction, ServerId};
use crate::query::catalog::{self, DetailSteps};
use crate::storage::EntityStore;

/// Item kinds fetched per repository
const ITEM_KINDS: [EntityKind; 2] = [EntityKind::Issue, EntityKind::PullRequest];

/// Kinds refreshed by a detail fetch
const DETAIL_KINDS: [EntityKind; 5] = [
    EntityKind::Comment,
    EntityKind::Review,
    EntityKind::ReviewRequest,
    EntityKind::Status,
    EntityKind::Reaction,
];

/// Shared kinds linked straight from an item's own payload
const ITEM_LINKS: [EntityKind; 2] = [EntityKind::Label, EntityKind::Assignee];

/// How a server's pass ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum SyncOutcome {
    Succeeded,
    Failed(String),
    /// Interrupted; the server is not flagged as failed
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerReport {
    pub label: String,
    pub outcome: SyncOutcome,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub requests: usize,
    pub stats: Option<ApiStats>,
}

impl ServerReport {
    fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            outcome: SyncOutcome::Succeeded,
            created: 0,
            updated: 0,
            deleted: 0,
            requests: 0,
            stats: None,
        }
    }

    fn failed(label: &str, reason: impl Into<String>) -> Self {
        Self {
            outcome: SyncOutcome::Failed(reason.into()),
            ..Self::new(label)
        }
    }

    fn take_summary(&mut self, summary: SaveSummary) {
        self.created = summary.created;
        self.updated = summary.updated;
        self.deleted = summary.deleted;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    pub servers: Vec<ServerReport>,
}

impl SyncReport {
    pub fn all_succeeded(&self) -> bool {
        self.servers
            .iter()
            .all(|s| s.outcome == SyncOutcome::Succeeded)
    }

    pub fn was_cancelled(&self) -> bool {
        self.servers
            .iter()
            .any(|s| s.outcome == SyncOutcome::Cancelled)
    }
}

/// Network bookkeeping accumulated across waves
#[derive(Debug, Default)]
struct Progress {
    requests: usize,
    stats: Option<ApiStats>,
}

struct Shared<T> {
    store: Arc<dyn EntityStore>,
    transport: Arc<T>,
    settings: SyncSettings,
    gate: Arc<Gate>,
    hook: Arc<dyn PostSyncHook>,
    commit_lock: Mutex<()>,
}

/// Runs sync generations against the configured servers
pub struct SyncEngine<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for SyncEngine<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Transport> SyncEngine<T> {
    pub fn new(store: Arc<dyn EntityStore>, transport: T, settings: SyncSettings) -> Self {
        Self::with_hook(store, transport, settings, Arc::new(LogHook))
    }

    pub fn with_hook(
        store: Arc<dyn EntityStore>,
        transport: T,
        settings: SyncSettings,
        hook: Arc<dyn PostSyncHook>,
    ) -> Self {
        let gate = Arc::new(Gate::for_mode(settings.parallel));
        Self {
            shared: Arc::new(Shared {
                store,
                transport: Arc::new(transport),
                settings,
                gate,
                hook,
                commit_lock: Mutex::new(()),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.shared.store
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.shared.settings
    }

    /// Sync every configured server concurrently
    pub async fn sync(&self, cancel: CancelToken) -> SyncReport {
        let handles: Vec<_> = self
            .shared
            .settings
            .servers
            .iter()
            .map(|server| {
                let engine = self.clone();
                let server = server.clone();
                let cancel = cancel.clone();
                let label = server.label.clone();
                let handle = tokio::spawn(async move { engine.sync_server(&server, cancel).await });
                (label, handle)
            })
            .collect();

        let mut report = SyncReport::default();
        for (label, handle) in handles {
            let server_report = match handle.await {
                Ok(server_report) => server_report,
                Err(e) => {
                    warn!("[{label}] Sync task failed: {e}");
                    ServerReport::failed(&label, SyncError::TaskFailed(e.to_string()).to_string())
                }
            };
            report.servers.push(server_report);
        }
        report
    }

    /// Run one pass for a single server, committing or rolling back
    pub async fn sync_server(&self, settings: &ServerSettings, cancel: CancelToken) -> ServerReport {
        let label = settings.label.as_str();
        let store = &self.shared.store;

        let mut server = match store.get_server(&ServerId::new(label)) {
            Ok(Some(mut server)) => {
                server.label = settings.label.clone();
                server.graphql_path = settings.graphql_path.clone();
                server
            }
            Ok(None) => ApiServer::from_settings(settings),
            Err(e) => return ServerReport::failed(label, format!("{e:#}")),
        };
        let token = match settings.token() {
            Ok(token) => token,
            Err(e) => {
                warn!("[{label}] Skipping server: {e:#}");
                return ServerReport::failed(label, format!("{e:#}"));
            }
        };

        let executor = Executor::new(
            self.shared.transport.clone(),
            self.shared.gate.clone(),
            cancel,
            ExecutorSettings {
                endpoint: settings.graphql_path.clone(),
                token,
                attempts: self.shared.settings.attempts,
                retry_delay: self.shared.settings.retry_delay(),
            },
        );

        info!("[{label}] Starting sync");
        let mut ctx = SyncContext::new(store.clone(), server.id.clone());
        let mut progress = Progress::default();
        let result = self.run_waves(&executor, &mut ctx, &mut progress).await;

        let mut report = ServerReport::new(label);
        report.requests = progress.requests;
        report.stats = progress.stats.clone();
        if let Some(stats) = &progress.stats {
            server.record_stats(stats);
        }

        match result {
            Ok(()) => {
                let _guard = self.shared.commit_lock.lock().await;
                match ctx.save(&server, self.shared.hook.as_ref()) {
                    Ok(summary) => {
                        report.take_summary(summary);
                        server.last_sync_succeeded = true;
                        server.last_synced_at = Some(Utc::now());
                    }
                    Err(e) => {
                        warn!("[{label}] Saving the pass failed: {e:#}");
                        server.last_sync_succeeded = false;
                        report.outcome = SyncOutcome::Failed(format!("{e:#}"));
                    }
                }
                if let Err(e) = store.save_server(server) {
                    warn!("[{label}] Could not record server state: {e:#}");
                }
            }
            Err(e) if e.is_cancellation() => {
                let rollback = ctx.discard();
                info!(
                    "[{label}] Sync cancelled, discarded {} new and {} updated entities",
                    rollback.dropped, rollback.reverted
                );
                report.outcome = SyncOutcome::Cancelled;
            }
            Err(e) => {
                let rollback = ctx.discard();
                warn!(
                    "[{label}] Sync failed ({e}), rolled back: {} deletions kept, {} new dropped, {} updates reverted",
                    rollback.kept, rollback.dropped, rollback.reverted
                );
                server.last_sync_succeeded = false;
                let _guard = self.shared.commit_lock.lock().await;
                if let Err(e) = store.save_server(server) {
                    warn!("[{label}] Could not record server state: {e:#}");
                }
                report.outcome = SyncOutcome::Failed(e.to_string());
            }
        }
        report
    }

    async fn run_waves(
        &self,
        executor: &Executor<Arc<T>>,
        ctx: &mut SyncContext,
        progress: &mut Progress,
    ) -> Result<()> {
        let profile = self.shared.settings.profile;
        let parallel = self.shared.settings.parallel;
        let mut cache = ParentCache::new();

        // Repositories no longer watched are the ones not seen again
        ctx.mark_for_deletion(EntityKind::Repository)?;
        let output = executor
            .run_all(vec![catalog::watched_repositories(profile)])
            .await?;
        let mut graph = take_output(ctx, progress, output)?;
        reconcile(&mut graph, ctx, &mut cache)?;

        let repo_ids = ctx.live_ids(EntityKind::Repository);
        if repo_ids.is_empty() {
            info!("[{}] No watched repositories", ctx.server_id().as_str());
            return Ok(());
        }

        let mut queries = Vec::new();
        let mut listed = Vec::new();
        for kind in ITEM_KINDS {
            let mut latest = latest_updates(ctx.store().as_ref(), &repo_ids, kind)?;
            if self.shared.settings.full_refresh {
                latest.clear();
            }
            let fresh: Vec<String> = repo_ids
                .iter()
                .filter(|id| !latest.contains_key(*id))
                .cloned()
                .collect();
            if !fresh.is_empty() {
                queries.extend(catalog::open_items(fresh.clone(), kind, profile).queries(parallel));
                listed.push((kind, fresh));
            }
            if !latest.is_empty() {
                queries.extend(catalog::latest_items(latest, kind, profile).queries(parallel));
            }
        }
        let output = executor.run_all(queries).await?;
        let mut graph = take_output(ctx, progress, output)?;
        let seen = item_ids(&graph);
        relink_items(ctx, &seen)?;
        reconcile(&mut graph, ctx, &mut cache)?;

        self.check_closures(executor, ctx, progress, &mut cache, &listed, &seen)
            .await?;

        let mut queries = Vec::new();
        for kind in ITEM_KINDS {
            let ids = ctx.ids_tagged(kind, &[PostSyncAction::IsNew, PostSyncAction::IsUpdated]);
            if ids.is_empty() {
                continue;
            }
            ctx.mark_children_for_deletion(&ids, &DETAIL_KINDS)?;
            queries.extend(catalog::item_details(ids, kind, DetailSteps::all(), profile).queries(parallel));
        }
        if queries.is_empty() {
            return Ok(());
        }
        let output = executor.run_all(queries).await?;
        let mut graph = take_output(ctx, progress, output)?;
        reconcile(&mut graph, ctx, &mut cache)?;
        Ok(())
    }

    /// Re-fetch stored open items that an open listing no longer returned
    ///
    /// Returned items are forced through as updated so closures are applied
    /// and reopened details refreshed. Items the server no longer resolves
    /// are deleted.
    async fn check_closures(
        &self,
        executor: &Executor<Arc<T>>,
        ctx: &mut SyncContext,
        progress: &mut Progress,
        cache: &mut ParentCache,
        listed: &[(EntityKind, Vec<String>)],
        seen: &[String],
    ) -> Result<()> {
        let profile = self.shared.settings.profile;
        let mut queries = Vec::new();
        let mut checked = Vec::new();
        for (kind, repo_ids) in listed {
            let missing = unlisted_open_items(ctx, repo_ids, *kind, seen)?;
            if missing.is_empty() {
                continue;
            }
            info!(
                "[{}] {} open {kind} items missing from the listing, checking them",
                ctx.server_id().as_str(),
                missing.len()
            );
            checked.extend(missing.iter().cloned());
            queries.extend(catalog::item_states(missing, *kind, profile).queries(self.shared.settings.parallel));
        }
        if queries.is_empty() {
            return Ok(());
        }

        let output = executor.run_all(queries).await?;
        let mut graph = take_output(ctx, progress, output)?;
        let returned = item_ids(&graph);
        for key in ITEM_KINDS
            .iter()
            .flat_map(|kind| kind.element_types())
            .flat_map(|element_type| graph.keys_of_type(element_type))
            .collect::<Vec<_>>()
        {
            if let Some(node) = graph.get_mut(&key) {
                node.flags.forced_update = true;
            }
        }
        relink_items(ctx, &returned)?;
        reconcile(&mut graph, ctx, cache)?;

        for id in checked.iter().filter(|id| returned.binary_search(id).is_err()) {
            if let Some(entity) = ctx.existing_object(id)? {
                debug!("{} {id} no longer resolves, deleting it", entity.kind);
                entity.post_sync_action = PostSyncAction::Delete;
            }
        }
        Ok(())
    }
}

/// Labels and assignees of re-fetched items are relinked from the response
fn relink_items(ctx: &mut SyncContext, item_ids: &[String]) -> Result<()> {
    for kind in ITEM_LINKS {
        ctx.unlink_children(item_ids, kind)?;
    }
    Ok(())
}

/// Stored items of `kind` still open locally but absent from `seen`
fn unlisted_open_items(
    ctx: &mut SyncContext,
    repo_ids: &[String],
    kind: EntityKind,
    seen: &[String],
) -> Result<Vec<String>> {
    let mut missing = Vec::new();
    for repo_id in repo_ids {
        let children = ctx.store().children_of(repo_id)?;
        for stored in children {
            if stored.kind != kind || seen.binary_search(&stored.id).is_ok() {
                continue;
            }
            let Some(entity) = ctx.existing_object(&stored.id)? else {
                continue;
            };
            if entity.item_state() == Some(OPEN) && !entity.is_marked_for_deletion() {
                missing.push(stored.id);
            }
        }
    }
    missing.sort();
    Ok(missing)
}

/// Record bookkeeping and apply id migrations, handing back the graph
fn take_output(ctx: &mut SyncContext, progress: &mut Progress, output: RunOutput) -> Result<NodeGraph> {
    progress.requests += output.requests;
    if output.stats.is_some() {
        progress.stats = output.stats;
    }
    if !output.migrations.is_empty() {
        ctx.remap_ids(&output.migrations)?;
    }
    Ok(output.graph)
}

fn item_ids(graph: &NodeGraph) -> Vec<String> {
    let mut ids: Vec<String> = ITEM_KINDS
        .iter()
        .flat_map(|kind| kind.element_types())
        .flat_map(|element_type| graph.of_type(element_type))
        .map(|node| node.id.clone())
        .collect();
    ids.sort();
    ids.dedup();
    ids
}

/// Newest stored update of `kind` per repository, for repositories that have any
pub fn latest_updates(
    store: &dyn EntityStore,
    repo_ids: &[String],
    kind: EntityKind,
) -> Result<HashMap<String, DateTime<Utc>>> {
    let mut latest = HashMap::new();
    for repo_id in repo_ids {
        let newest = store
            .children_of(repo_id)?
            .into_iter()
            .filter(|e| e.kind == kind)
            .filter_map(|e| e.updated_at)
            .max();
        if let Some(newest) = newest {
            latest.insert(repo_id.clone(), newest);
        }
    }
    Ok(latest)
}
