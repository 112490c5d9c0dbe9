//! SQLite-based entity storage

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use rusqlite_migration::{M, Migrations};

use super::{ChangeSet, EntityStore};
use crate::client::ApiStats;
use crate::models::{ApiServer, Entity, EntityKind, ServerId};

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            -- Sync state per remote server
            CREATE TABLE servers (
                id TEXT PRIMARY KEY,
                label TEXT NOT NULL,
                graphql_path TEXT NOT NULL,
                last_sync_succeeded INTEGER NOT NULL DEFAULT 1,
                last_synced_at TEXT,
                last_stats TEXT
            );

            -- One row per remote object; kind-specific fields live in details as JSON
            CREATE TABLE entities (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                server_id TEXT NOT NULL,
                created_at TEXT,
                updated_at TEXT,
                post_sync_action TEXT NOT NULL DEFAULT 'do_nothing',
                details TEXT NOT NULL
            );

            CREATE INDEX idx_entities_server_kind ON entities(server_id, kind);

            -- Parent links (labels may have several)
            CREATE TABLE entity_parents (
                entity_id TEXT NOT NULL,
                parent_id TEXT NOT NULL,
                PRIMARY KEY (entity_id, parent_id),
                FOREIGN KEY (entity_id) REFERENCES entities(id) ON DELETE CASCADE
            );

            CREATE INDEX idx_entity_parents_parent ON entity_parents(parent_id);
            "#,
        ),
    ])
}

const ENTITY_COLUMNS: &str =
    "id, kind, server_id, created_at, updated_at, post_sync_action, details";

/// Columns of an entity row before parents are attached
struct EntityRow {
    id: String,
    kind: String,
    server_id: String,
    created_at: Option<String>,
    updated_at: Option<String>,
    post_sync_action: String,
    details: String,
}

impl EntityRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            server_id: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
            post_sync_action: row.get(5)?,
            details: row.get(6)?,
        })
    }
}

fn parse_timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// SQLite-based entity storage
pub struct SqliteEntityStore {
    conn: Mutex<Connection>,
}

impl SqliteEntityStore {
    /// Open (or create) the database at `db_path` and run migrations
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        // WAL lets readers continue while a pass commits; foreign_keys is
        // required for the parent-link cascade.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -16000;
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            "#,
        )?;

        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Database connection lock poisoned"))
    }

    fn load_parents(conn: &Connection, entity_id: &str) -> Result<std::collections::BTreeSet<String>> {
        let mut stmt = conn.prepare_cached(
            "SELECT parent_id FROM entity_parents WHERE entity_id = ? ORDER BY parent_id",
        )?;
        let parents = stmt
            .query_map([entity_id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<_>>()?;
        Ok(parents)
    }

    fn into_entity(conn: &Connection, row: EntityRow) -> Result<Entity> {
        let kind: EntityKind = row.kind.parse()?;
        let details = serde_json::from_str(&row.details)
            .with_context(|| format!("Corrupt details for entity {}", row.id))?;
        let parent_ids = Self::load_parents(conn, &row.id)?;
        Ok(Entity {
            kind,
            server_id: ServerId::new(row.server_id),
            parent_ids,
            created_at: parse_timestamp(row.created_at.as_deref()),
            updated_at: parse_timestamp(row.updated_at.as_deref()),
            post_sync_action: row.post_sync_action.parse()?,
            details,
            id: row.id,
        })
    }

    fn query_entities(conn: &Connection, sql: &str, args: &[&str]) -> Result<Vec<Entity>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(args), EntityRow::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|row| Self::into_entity(conn, row))
            .collect()
    }

    fn write_entity(tx: &rusqlite::Transaction<'_>, entity: &Entity) -> Result<()> {
        let details = serde_json::to_string(&entity.details)?;
        tx.execute(
            "INSERT INTO entities
             (id, kind, server_id, created_at, updated_at, post_sync_action, details)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind,
                server_id = excluded.server_id,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                post_sync_action = excluded.post_sync_action,
                details = excluded.details",
            params![
                entity.id,
                entity.kind.as_str(),
                entity.server_id.as_str(),
                entity.created_at.map(|t| t.to_rfc3339()),
                entity.updated_at.map(|t| t.to_rfc3339()),
                entity.post_sync_action.as_str(),
                details,
            ],
        )?;

        tx.execute("DELETE FROM entity_parents WHERE entity_id = ?", [&entity.id])?;
        let mut stmt = tx.prepare_cached(
            "INSERT INTO entity_parents (entity_id, parent_id) VALUES (?, ?)",
        )?;
        for parent in &entity.parent_ids {
            stmt.execute(params![entity.id, parent])?;
        }
        Ok(())
    }

    fn read_server(row: &Row<'_>) -> rusqlite::Result<(String, String, String, bool, Option<String>, Option<String>)> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
        ))
    }

    fn into_server(
        (id, label, graphql_path, last_sync_succeeded, last_synced_at, last_stats): (
            String,
            String,
            String,
            bool,
            Option<String>,
            Option<String>,
        ),
    ) -> ApiServer {
        // Stats are advisory; a row written by an older build just loses them
        let last_stats = last_stats.and_then(|json| serde_json::from_str::<ApiStats>(&json).ok());
        ApiServer {
            id: ServerId::new(id),
            label,
            graphql_path,
            last_sync_succeeded,
            last_synced_at: parse_timestamp(last_synced_at.as_deref()),
            last_stats,
        }
    }
}

impl EntityStore for SqliteEntityStore {
    fn get_entity(&self, id: &str) -> Result<Option<Entity>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE id = ?"),
                [id],
                EntityRow::read,
            )
            .optional()?;
        row.map(|row| Self::into_entity(&conn, row)).transpose()
    }

    fn list_entities(&self, server: &ServerId, kind: EntityKind) -> Result<Vec<Entity>> {
        let conn = self.conn()?;
        Self::query_entities(
            &conn,
            &format!(
                "SELECT {ENTITY_COLUMNS} FROM entities
                 WHERE server_id = ? AND kind = ? ORDER BY id"
            ),
            &[server.as_str(), kind.as_str()],
        )
    }

    fn children_of(&self, parent_id: &str) -> Result<Vec<Entity>> {
        let conn = self.conn()?;
        Self::query_entities(
            &conn,
            &format!(
                "SELECT {ENTITY_COLUMNS} FROM entities
                 WHERE id IN (SELECT entity_id FROM entity_parents WHERE parent_id = ?)
                 ORDER BY id"
            ),
            &[parent_id],
        )
    }

    fn apply(&self, changes: ChangeSet) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        for id in &changes.deletions {
            // entity_parents rows go with the entity via ON DELETE CASCADE
            tx.execute("DELETE FROM entities WHERE id = ?", [id])?;
        }
        for entity in &changes.upserts {
            Self::write_entity(&tx, entity)?;
        }

        tx.commit()?;
        Ok(())
    }

    fn count_entities(&self, server: &ServerId, kind: EntityKind) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM entities WHERE server_id = ? AND kind = ?",
            [server.as_str(), kind.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn get_server(&self, id: &ServerId) -> Result<Option<ApiServer>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, label, graphql_path, last_sync_succeeded, last_synced_at, last_stats
                 FROM servers WHERE id = ?",
                [id.as_str()],
                Self::read_server,
            )
            .optional()?;
        Ok(row.map(Self::into_server))
    }

    fn list_servers(&self) -> Result<Vec<ApiServer>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, label, graphql_path, last_sync_succeeded, last_synced_at, last_stats
             FROM servers ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], Self::read_server)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows.into_iter().map(Self::into_server).collect())
    }

    fn save_server(&self, server: ApiServer) -> Result<()> {
        let conn = self.conn()?;
        let last_stats = server
            .last_stats
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        conn.execute(
            "INSERT INTO servers
             (id, label, graphql_path, last_sync_succeeded, last_synced_at, last_stats)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                label = excluded.label,
                graphql_path = excluded.graphql_path,
                last_sync_succeeded = excluded.last_sync_succeeded,
                last_synced_at = excluded.last_synced_at,
                last_stats = excluded.last_stats",
            params![
                server.id.as_str(),
                server.label,
                server.graphql_path,
                server.last_sync_succeeded,
                server.last_synced_at.map(|t| t.to_rfc3339()),
                last_stats,
            ],
        )?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "DELETE FROM entity_parents;
             DELETE FROM entities;
             DELETE FROM servers;",
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityDetails, PostSyncAction};
    use tempfile::tempdir;

    fn create_test_store() -> (SqliteEntityStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = SqliteEntityStore::new(dir.path().join("graphsync.test.sqlite")).unwrap();
        (store, dir)
    }

    fn server() -> ServerId {
        ServerId::from("GitHub")
    }

    fn make_label(id: &str, parents: &[&str]) -> Entity {
        let mut label = Entity::new(id, EntityKind::Label, server());
        for parent in parents {
            label.parent_ids.insert(parent.to_string());
        }
        label.details = EntityDetails::Label {
            name: "bug".into(),
            color: "d73a4a".into(),
        };
        label
    }

    #[test]
    fn test_entity_crud() {
        let (store, _dir) = create_test_store();
        let mut pr = Entity::new("PR1", EntityKind::PullRequest, server()).with_parent("R1");
        pr.updated_at = Some("2024-03-01T10:00:00Z".parse().unwrap());
        pr.post_sync_action = PostSyncAction::IsNew;

        store
            .apply(ChangeSet {
                upserts: vec![Entity::new("R1", EntityKind::Repository, server()), pr.clone()],
                deletions: vec![],
            })
            .unwrap();

        let loaded = store.get_entity("PR1").unwrap().unwrap();
        assert_eq!(loaded, pr);
        assert!(store.get_entity("PR2").unwrap().is_none());
    }

    #[test]
    fn test_label_with_multiple_parents() {
        let (store, _dir) = create_test_store();
        store
            .apply(ChangeSet {
                upserts: vec![make_label("L1", &["PR1", "I1"])],
                deletions: vec![],
            })
            .unwrap();

        assert_eq!(store.children_of("PR1").unwrap().len(), 1);
        assert_eq!(store.children_of("I1").unwrap().len(), 1);

        // Re-upserting replaces the link set
        store
            .apply(ChangeSet {
                upserts: vec![make_label("L1", &["I1"])],
                deletions: vec![],
            })
            .unwrap();
        assert!(store.children_of("PR1").unwrap().is_empty());
        assert_eq!(store.get_entity("L1").unwrap().unwrap().parent_ids.len(), 1);
    }

    #[test]
    fn test_delete_removes_links() {
        let (store, _dir) = create_test_store();
        store
            .apply(ChangeSet {
                upserts: vec![make_label("L1", &["PR1"])],
                deletions: vec![],
            })
            .unwrap();
        store
            .apply(ChangeSet {
                upserts: vec![],
                deletions: vec!["L1".into()],
            })
            .unwrap();

        assert!(store.children_of("PR1").unwrap().is_empty());
        assert_eq!(store.count_entities(&server(), EntityKind::Label).unwrap(), 0);
    }

    #[test]
    fn test_server_round_trip() {
        let (store, _dir) = create_test_store();
        let mut api_server = ApiServer::new("GitHub", "https://api.github.com/graphql");
        api_server.last_sync_succeeded = false;
        api_server.record_stats(&ApiStats {
            remaining: 4990,
            limit: 5000,
            cost: 1,
            ..ApiStats::default()
        });
        store.save_server(api_server.clone()).unwrap();

        assert_eq!(store.get_server(&server()).unwrap(), Some(api_server));
        assert_eq!(store.list_servers().unwrap().len(), 1);
    }

    #[test]
    fn test_clear() {
        let (store, _dir) = create_test_store();
        store
            .apply(ChangeSet {
                upserts: vec![make_label("L1", &["PR1"])],
                deletions: vec![],
            })
            .unwrap();
        store.clear().unwrap();
        assert!(store.get_entity("L1").unwrap().is_none());
    }
}
