//! Sync settings and API cost profiles
//!
//! Settings are loaded from (in order of priority):
//! 1. `sync.json` in the graphsync config directory
//! 2. Environment variables (`GRAPHSYNC_ENDPOINT`, `GRAPHSYNC_TOKEN`, `GRAPHSYNC_LABEL`)
//! 3. Defaults, with no servers configured

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Settings filename in the graphsync config directory
pub const SETTINGS_FILE: &str = "sync.json";

/// Default database filename in the graphsync config directory
const DATABASE_FILE: &str = "graphsync.db";

/// How much of the API budget a sync pass may spend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncProfile {
    Light,
    Cautious,
    #[default]
    Moderate,
    High,
}

impl SyncProfile {
    /// Cost budget for batches fetching everything open in a repository
    pub fn initial_batch_cost(self) -> u64 {
        match self {
            SyncProfile::High => 40_000,
            SyncProfile::Moderate => 10_000,
            SyncProfile::Cautious => 2_000,
            SyncProfile::Light => 1_000,
        }
    }

    /// Cost budget for batches fetching recently updated items
    pub fn incremental_batch_cost(self) -> u64 {
        match self {
            SyncProfile::High => 20_000,
            SyncProfile::Moderate => 6_000,
            SyncProfile::Cautious => 2_000,
            SyncProfile::Light => 1_000,
        }
    }

    /// Cost budget for batches fetching comments, reviews and statuses
    pub fn accompanying_batch_cost(self) -> u64 {
        match self {
            SyncProfile::High => 10_000,
            SyncProfile::Moderate => 6_000,
            SyncProfile::Cautious => 2_000,
            SyncProfile::Light => 1_000,
        }
    }

    pub fn large_page(self) -> u32 {
        match self {
            SyncProfile::High => 80,
            SyncProfile::Moderate => 50,
            SyncProfile::Cautious => 20,
            SyncProfile::Light => 10,
        }
    }

    pub fn medium_page(self) -> u32 {
        match self {
            SyncProfile::High => 40,
            SyncProfile::Moderate => 20,
            SyncProfile::Cautious => 10,
            SyncProfile::Light => 8,
        }
    }

    pub fn small_page(self) -> u32 {
        match self {
            SyncProfile::High => 20,
            SyncProfile::Moderate => 10,
            SyncProfile::Cautious => 5,
            SyncProfile::Light => 5,
        }
    }
}

impl FromStr for SyncProfile {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "light" => Ok(SyncProfile::Light),
            "cautious" => Ok(SyncProfile::Cautious),
            "moderate" => Ok(SyncProfile::Moderate),
            "high" => Ok(SyncProfile::High),
            other => bail!("Unknown sync profile '{other}' (expected light, cautious, moderate or high)"),
        }
    }
}

/// One GraphQL server to sync against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Display label, also used as the server's stable id
    pub label: String,
    /// Full GraphQL endpoint URL
    pub graphql_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    /// Environment variable holding the token, used when `auth_token` is unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token_env: Option<String>,
}

impl ServerSettings {
    pub fn token(&self) -> Result<String> {
        if let Some(token) = &self.auth_token {
            return Ok(token.clone());
        }
        let var = self
            .auth_token_env
            .as_deref()
            .with_context(|| format!("Server '{}' has no auth_token or auth_token_env", self.label))?;
        std::env::var(var).with_context(|| format!("{var} environment variable not set"))
    }
}

/// Settings for a sync run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub profile: SyncProfile,
    /// Allow two requests in flight instead of one
    pub parallel: bool,
    /// List every open item again instead of only the recently updated ones
    pub full_refresh: bool,
    /// Total tries per request
    pub attempts: u32,
    pub retry_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub servers: Vec<ServerSettings>,
    /// SQLite database path; defaults to the config directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            profile: SyncProfile::default(),
            parallel: false,
            full_refresh: false,
            attempts: 5,
            retry_delay_ms: 2_000,
            request_timeout_secs: 60,
            servers: Vec::new(),
            database: None,
        }
    }
}

impl SyncSettings {
    /// Load settings from the config file, then the environment, then defaults
    pub fn load() -> Result<Self> {
        let dir = config::ConfigDir::locate()?;
        if dir.contains(SETTINGS_FILE) {
            return dir.load(SETTINGS_FILE);
        }
        Ok(Self::from_env().unwrap_or_default())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        config::read_json(path)
    }

    /// A single server from `GRAPHSYNC_ENDPOINT` and `GRAPHSYNC_TOKEN`
    pub fn from_env() -> Option<Self> {
        let endpoint = std::env::var("GRAPHSYNC_ENDPOINT").ok()?;
        let token = std::env::var("GRAPHSYNC_TOKEN").ok()?;
        let label = std::env::var("GRAPHSYNC_LABEL").unwrap_or_else(|_| "default".to_string());
        Some(Self {
            servers: vec![ServerSettings {
                label,
                graphql_path: endpoint,
                auth_token: Some(token),
                auth_token_env: None,
            }],
            ..Self::default()
        })
    }

    pub fn save(&self) -> Result<()> {
        config::ConfigDir::locate()?.save(SETTINGS_FILE, self)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// The configured database path, or the default in the config directory
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database {
            Some(path) => Ok(path.clone()),
            None => Ok(config::ConfigDir::locate()?.ensure()?.join(DATABASE_FILE)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_tables() {
        assert_eq!(SyncProfile::High.initial_batch_cost(), 40_000);
        assert_eq!(SyncProfile::Light.incremental_batch_cost(), 1_000);
        assert_eq!(SyncProfile::Moderate.accompanying_batch_cost(), 6_000);
        assert_eq!(SyncProfile::Cautious.large_page(), 20);
        assert_eq!(SyncProfile::Light.medium_page(), 8);
        assert_eq!(SyncProfile::High.small_page(), 20);
    }

    #[test]
    fn test_profile_from_str() {
        assert_eq!("HIGH".parse::<SyncProfile>().unwrap(), SyncProfile::High);
        assert!("extreme".parse::<SyncProfile>().is_err());
    }

    #[test]
    fn test_partial_settings_use_defaults() {
        let json = r#"{
            "profile": "cautious",
            "servers": [{"label": "GitHub", "graphql_path": "https://api.github.com/graphql", "auth_token": "abc"}]
        }"#;
        let settings: SyncSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.profile, SyncProfile::Cautious);
        assert_eq!(settings.attempts, 5);
        assert_eq!(settings.retry_delay(), Duration::from_secs(2));
        assert_eq!(settings.request_timeout(), Duration::from_secs(60));
        assert_eq!(settings.servers[0].token().unwrap(), "abc");
    }

    #[test]
    fn test_token_requires_a_source() {
        let server = ServerSettings {
            label: "GitHub".into(),
            graphql_path: "https://api.github.com/graphql".into(),
            auth_token: None,
            auth_token_env: None,
        };
        assert!(server.token().is_err());
    }

    #[test]
    fn test_settings_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        let settings = SyncSettings {
            parallel: true,
            database: Some(dir.path().join("test.db")),
            ..SyncSettings::default()
        };
        config::write_json(&path, &settings).unwrap();
        assert_eq!(SyncSettings::from_file(&path).unwrap(), settings);
    }
}
