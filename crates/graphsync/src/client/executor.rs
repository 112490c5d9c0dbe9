//! Runs queries: render, POST with retry, scan, then chase follow-ups

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, trace, warn};
use serde_json::Value;
use tokio::task::JoinSet;

use super::cancel::CancelToken;
use super::query::Query;
use super::stats::{ApiStats, migrated_ids};
use super::transport::{GraphRequest, Transport};
use crate::error::{Result, SyncError, TransportError};
use crate::gate::Gate;
use crate::graph::{NodeGraph, scan::scan_response};

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Where and how hard to try
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub endpoint: String,
    pub token: String,
    /// Total tries per request, including the first
    pub attempts: u32,
    pub retry_delay: Duration,
}

/// Everything a query and its follow-ups produced
#[derive(Debug, Default)]
pub struct RunOutput {
    /// Stats from the last response that carried any
    pub stats: Option<ApiStats>,
    pub graph: NodeGraph,
    /// Legacy to next id pairs announced by the server
    pub migrations: BTreeMap<String, String>,
    /// Number of round trips made
    pub requests: usize,
}

impl RunOutput {
    /// Fold in the output of a query that completed later
    pub fn absorb(&mut self, other: RunOutput) {
        let dropped = self.graph.absorb(other.graph);
        if dropped > 0 {
            debug!("Dropped {dropped} nodes already seen by a sibling query");
        }
        self.migrations.extend(other.migrations);
        if other.stats.is_some() {
            self.stats = other.stats;
        }
        self.requests += other.requests;
    }
}

struct Inner<T> {
    transport: T,
    gate: Arc<Gate>,
    cancel: CancelToken,
    settings: ExecutorSettings,
}

/// Executes queries for one server
///
/// Cheap to clone; follow-up queries run as child tasks sharing the same
/// transport, gate and cancellation token.
pub struct Executor<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Executor<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Transport> Executor<T> {
    pub fn new(transport: T, gate: Arc<Gate>, cancel: CancelToken, settings: ExecutorSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                gate,
                cancel,
                settings,
            }),
        }
    }

    /// Run one query and, recursively, every follow-up it spawns
    pub fn run(&self, query: Query) -> BoxFuture<Result<RunOutput>> {
        let executor = self.clone();
        Box::pin(async move { executor.run_query(query).await })
    }

    /// Run queries as concurrent child tasks and merge their output
    ///
    /// The first failure aborts the remaining tasks.
    pub async fn run_all(&self, queries: Vec<Query>) -> Result<RunOutput> {
        let mut tasks = JoinSet::new();
        for query in queries {
            tasks.spawn(self.run(query));
        }

        let mut output = RunOutput::default();
        while let Some(joined) = tasks.join_next().await {
            let result = joined.map_err(|e| SyncError::TaskFailed(e.to_string()))?;
            output.absorb(result?);
        }
        Ok(output)
    }

    async fn run_query(&self, query: Query) -> Result<RunOutput> {
        let prefix = query.log_prefix();
        if self.inner.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let text = query.query_text();
        trace!("{prefix}Fetching: {text}");

        let response = self.fetch(&query, &text).await?;

        let stats = ApiStats::from_response(&response);
        let expected = query.expected_node_cost();
        match &stats {
            Some(stats) => {
                debug!(
                    "{prefix}Received page (Cost: {}, Remaining: {}/{} - Expected Count: {} - Returned Count: {})",
                    stats.cost, stats.remaining, stats.limit, expected, stats.node_count
                );
                if expected != stats.node_count {
                    debug!("{prefix}Mismatched expected and received node count");
                }
            }
            None => debug!("{prefix}Received page (No stats) - Expected Count: {expected}"),
        }

        let mut output = RunOutput {
            migrations: migrated_ids(&response),
            stats,
            requests: 1,
            ..RunOutput::default()
        };

        let Some(data) = query.locate_root_data(&response)? else {
            debug!("{prefix}No root data, accepted as empty");
            return Ok(output);
        };

        debug!("{prefix}Scanning result");
        let follow_ups = scan_response(&query, data, &mut output.graph);
        if follow_ups.is_empty() {
            debug!("{prefix}Parsed all pages");
            return Ok(output);
        }

        debug!("{prefix}Needs more page data ({} queries)", follow_ups.len());
        output.absorb(self.run_all(follow_ups).await?);
        Ok(output)
    }

    /// POST with a bounded retry loop
    async fn fetch(&self, query: &Query, text: &str) -> Result<Value> {
        let prefix = query.log_prefix();
        let settings = &self.inner.settings;
        let attempts = settings.attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.attempt(query, text).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() && attempt < attempts => {
                    warn!(
                        "{prefix}Attempt {attempt}/{attempts} failed ({e}), pausing {}ms before retrying",
                        settings.retry_delay.as_millis()
                    );
                    tokio::select! {
                        _ = self.inner.cancel.cancelled() => return Err(SyncError::Cancelled),
                        _ = tokio::time::sleep(settings.retry_delay) => {}
                    }
                    attempt += 1;
                }
                Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
                Err(e) => {
                    error!("{prefix}Error: {e}");
                    return Err(e);
                }
            }
        }
    }

    /// One try: gate, POST, status check, JSON decode, data/errors check
    async fn attempt(&self, query: &Query, text: &str) -> Result<Value> {
        let inner = &self.inner;
        let request = GraphRequest {
            url: inner.settings.endpoint.clone(),
            token: inner.settings.token.clone(),
            query: text.to_string(),
        };

        let response = {
            let _ticket = tokio::select! {
                _ = inner.cancel.cancelled() => return Err(SyncError::Cancelled),
                ticket = inner.gate.take_ticket() => ticket?,
            };
            tokio::select! {
                _ = inner.cancel.cancelled() => return Err(SyncError::Cancelled),
                response = inner.transport.post(request) => response?,
            }
        };

        if !response.is_success() {
            return Err(TransportError::Status(response.status).into());
        }

        let json: Value = serde_json::from_str(&response.body).map_err(|_| {
            SyncError::MalformedResponse(format!("{}Returned data is not JSON", query.log_prefix()))
        })?;
        if !json.is_object() {
            return Err(SyncError::MalformedResponse(format!(
                "{}Returned data is not a JSON object",
                query.log_prefix()
            )));
        }

        query.locate_root_data(&json)?;
        Ok(json)
    }
}
