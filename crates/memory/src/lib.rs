//! Durable state for Athena.
//!
//! One SQLite file holds everything: the host inventory (versioned, with a
//! deletion audit), inventory sources, host relations, the TTL'd scan cache,
//! local machine context, snapshots, the session audit trail, and
//! conversations.  A small embedded `redb` file acts as the secondary store
//! for learned triage patterns, incidents, and skills.

mod conversation;
mod error;
mod host;
mod knowledge;
mod local_context;
mod pattern_store;
mod relation;
mod scan_cache;
mod schema;
mod session;
mod snapshot;
mod source;
mod types;

pub use conversation::{
    Conversation, ConversationManager, ConversationSummary, Message, estimate_tokens,
    simple_summary,
};
pub use error::{StoreError, StoreResult};
pub use knowledge::{Incident, SecondaryStore, Skill};
pub use local_context::LocalContext;
pub use pattern_store::{PatternStore, TriagePattern};
pub use session::SessionSummary;
pub use types::*;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, warn};

/// Repository over the single relational file.
///
/// All components share one instance; see [`init`]/[`get`] for the
/// process-wide accessor.  Every method opens a short-lived connection from
/// the pool, and every multi-row mutation runs inside one transaction.
pub struct InventoryStore {
    pool: SqlitePool,
    path: PathBuf,
}

impl InventoryStore {
    /// Open (creating if missing) the store at `path` and initialize the
    /// schema.  Foreign-key enforcement is always on.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::persistence("open", format!("create {}: {e}", parent.display()))
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        schema::init(&pool).await?;
        debug!(path = %path.display(), "inventory store opened");
        Ok(Self { pool, path })
    }

    /// In-memory store for tests.
    pub async fn open_in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .foreign_keys(true);
        // A pool with one connection, else each connection sees its own
        // empty in-memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        schema::init(&pool).await?;
        Ok(Self {
            pool,
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Inventory statistics across hosts, relations, and the scan cache.
    pub async fn get_stats(&self) -> StoreResult<StoreStats> {
        let mut stats = StoreStats::default();

        stats.total_hosts = sqlx::query("SELECT COUNT(*) AS n FROM hosts_v2")
            .fetch_one(&self.pool)
            .await?
            .get("n");

        let rows = sqlx::query(
            "SELECT environment, COUNT(*) AS n FROM hosts_v2 GROUP BY environment",
        )
        .fetch_all(&self.pool)
        .await?;
        for row in rows {
            let env: Option<String> = row.get("environment");
            stats
                .by_environment
                .insert(env.unwrap_or_else(|| "unknown".to_string()), row.get("n"));
        }

        let rows = sqlx::query(
            "SELECT s.name AS name, COUNT(h.id) AS n
             FROM inventory_sources s
             LEFT JOIN hosts_v2 h ON h.source_id = s.id
             GROUP BY s.id",
        )
        .fetch_all(&self.pool)
        .await?;
        for row in rows {
            stats.by_source.insert(row.get("name"), row.get("n"));
        }

        stats.total_relations = sqlx::query("SELECT COUNT(*) AS n FROM host_relations")
            .fetch_one(&self.pool)
            .await?
            .get("n");
        stats.validated_relations =
            sqlx::query("SELECT COUNT(*) AS n FROM host_relations WHERE validated_by_user = 1")
                .fetch_one(&self.pool)
                .await?
                .get("n");

        stats.cached_scans =
            sqlx::query("SELECT COUNT(*) AS n FROM scan_cache WHERE expires_at > ?")
                .bind(now())
                .fetch_one(&self.pool)
                .await?
                .get("n");

        Ok(stats)
    }
}

/// Current timestamp in the canonical column format.
pub(crate) fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

pub(crate) fn object_to_json(map: &Option<BTreeMap<String, serde_json::Value>>) -> Option<String> {
    map.as_ref().map(|m| to_json(m))
}

// ── Process-wide instance ────────────────────────────────────────────────────

static INSTANCE: Mutex<Option<Arc<InventoryStore>>> = Mutex::new(None);

/// Initialize the process-wide store.  Re-initialization with a different
/// path is ignored with a warning; the original instance is returned.
pub async fn init(path: impl AsRef<Path>) -> StoreResult<Arc<InventoryStore>> {
    let path = path.as_ref().to_path_buf();
    if let Some(existing) = INSTANCE.lock().expect("store lock").clone() {
        if existing.path() != path {
            warn!(
                current = %existing.path().display(),
                requested = %path.display(),
                "inventory store already initialized, ignoring requested path"
            );
        }
        return Ok(existing);
    }

    let store = Arc::new(InventoryStore::open(&path).await?);
    let mut guard = INSTANCE.lock().expect("store lock");
    // Another task may have won the race while we were opening.
    if let Some(existing) = guard.clone() {
        return Ok(existing);
    }
    *guard = Some(Arc::clone(&store));
    Ok(store)
}

/// The process-wide store, if initialized.
pub fn get() -> Option<Arc<InventoryStore>> {
    INSTANCE.lock().expect("store lock").clone()
}

/// Drop the process-wide instance so tests can start fresh.
pub fn reset_instance() {
    *INSTANCE.lock().expect("store lock") = None;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stats_on_empty_store() {
        let store = InventoryStore::open_in_memory().await.unwrap();
        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.total_hosts, 0);
        assert_eq!(stats.total_relations, 0);
        assert_eq!(stats.cached_scans, 0);
    }

    #[tokio::test]
    async fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("inventory.db");
        let store = InventoryStore::open(&path).await.unwrap();
        assert!(path.exists());
        drop(store);
    }

    #[tokio::test]
    async fn process_wide_instance_ignores_reinit_path() {
        reset_instance();
        let dir = tempfile::tempdir().unwrap();
        let first = init(dir.path().join("a.db")).await.unwrap();
        // A second init with a different path keeps the original store.
        let second = init(dir.path().join("b.db")).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(get().is_some());

        reset_instance();
        assert!(get().is_none());
    }
}
