//! Rate-limit accounting read from every response

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The server's `rateLimit` block plus any id migrations it announced
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiStats {
    pub node_count: u64,
    pub cost: u64,
    pub remaining: u64,
    pub limit: u64,
    pub reset_at: Option<DateTime<Utc>>,
    /// Legacy id to next id
    #[serde(default)]
    pub migrated_ids: BTreeMap<String, String>,
}

impl ApiStats {
    /// Stats from `data.rateLimit`, or `None` when the response has none
    pub fn from_response(response: &Value) -> Option<ApiStats> {
        let rate_limit = response.get("data")?.get("rateLimit")?.as_object()?;
        let number = |key: &str| rate_limit.get(key).and_then(Value::as_u64).unwrap_or(0);
        let reset_at = rate_limit
            .get("resetAt")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.with_timezone(&Utc));
        Some(ApiStats {
            node_count: number("nodeCount"),
            cost: number("cost"),
            remaining: number("remaining"),
            limit: number("limit"),
            reset_at,
            migrated_ids: migrated_ids(response),
        })
    }
}

/// Legacy to next id pairs from `extensions.warnings`
///
/// Pairs where both ids are equal are skipped.
pub fn migrated_ids(response: &Value) -> BTreeMap<String, String> {
    let Some(warnings) = response
        .get("extensions")
        .and_then(|e| e.get("warnings"))
        .and_then(Value::as_array)
    else {
        return BTreeMap::new();
    };

    warnings
        .iter()
        .filter_map(|w| {
            let data = w.get("data")?;
            let legacy = data.get("legacy_global_id")?.as_str()?;
            let next = data.get("next_global_id")?.as_str()?;
            (legacy != next).then(|| (legacy.to_string(), next.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stats_from_rate_limit() {
        let response = json!({"data": {"rateLimit": {
            "limit": 5000, "cost": 3, "remaining": 4990,
            "resetAt": "2024-05-01T12:00:00Z", "nodeCount": 120
        }}});
        let stats = ApiStats::from_response(&response).unwrap();
        assert_eq!(stats.limit, 5000);
        assert_eq!(stats.cost, 3);
        assert_eq!(stats.remaining, 4990);
        assert_eq!(stats.node_count, 120);
        assert!(stats.reset_at.is_some());
        assert!(stats.migrated_ids.is_empty());
    }

    #[test]
    fn test_no_rate_limit_means_no_stats() {
        assert!(ApiStats::from_response(&json!({"data": {}})).is_none());
        assert!(ApiStats::from_response(&json!({"errors": []})).is_none());
    }

    #[test]
    fn test_migrations_skip_unchanged_ids() {
        let response = json!({
            "data": {},
            "extensions": {"warnings": [
                {"type": "DEPRECATION", "data": {"legacy_global_id": "MDQ6VXNlcjE=", "next_global_id": "U_kgAB"}},
                {"type": "DEPRECATION", "data": {"legacy_global_id": "same", "next_global_id": "same"}},
                {"type": "OTHER", "message": "ignored"}
            ]}
        });
        let migrated = migrated_ids(&response);
        assert_eq!(migrated.len(), 1);
        assert_eq!(migrated.get("MDQ6VXNlcjE="), Some(&"U_kgAB".to_string()));
    }
}
