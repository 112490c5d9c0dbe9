//! Remote GraphQL server records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::client::ApiStats;
use crate::config::ServerSettings;

/// Stable identifier for a server (its configured label)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServerId(pub String);

impl ServerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ServerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ServerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Sync state kept per server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiServer {
    pub id: ServerId,
    pub label: String,
    pub graphql_path: String,
    /// False after a pass that failed and was rolled back
    pub last_sync_succeeded: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Rate-limit state from the most recent response
    #[serde(default)]
    pub last_stats: Option<ApiStats>,
}

impl ApiServer {
    pub fn new(label: impl Into<String>, graphql_path: impl Into<String>) -> Self {
        let label = label.into();
        Self {
            id: ServerId::new(label.clone()),
            label,
            graphql_path: graphql_path.into(),
            last_sync_succeeded: true,
            last_synced_at: None,
            last_stats: None,
        }
    }

    pub fn from_settings(settings: &ServerSettings) -> Self {
        Self::new(settings.label.clone(), settings.graphql_path.clone())
    }

    /// Keep the latest rate-limit numbers; migrations are not persisted
    pub fn record_stats(&mut self, stats: &ApiStats) {
        self.last_stats = Some(ApiStats {
            migrated_ids: Default::default(),
            ..stats.clone()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_server_starts_healthy() {
        let server = ApiServer::new("GitHub", "https://api.github.com/graphql");
        assert_eq!(server.id, ServerId::from("GitHub"));
        assert!(server.last_sync_succeeded);
        assert!(server.last_stats.is_none());
    }

    #[test]
    fn test_record_stats_drops_migrations() {
        let mut server = ApiServer::new("GitHub", "https://api.github.com/graphql");
        let mut stats = ApiStats {
            remaining: 4000,
            limit: 5000,
            ..ApiStats::default()
        };
        stats.migrated_ids.insert("old".into(), "new".into());
        server.record_stats(&stats);

        let kept = server.last_stats.unwrap();
        assert_eq!(kept.remaining, 4000);
        assert!(kept.migrated_ids.is_empty());
    }
}
