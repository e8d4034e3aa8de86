//! Host operations: atomic upsert with versioning, search, and the
//! deletion audit.

use std::collections::BTreeMap;

use serde_json::{Value, json};
use sqlx::{Row, Sqlite, Transaction};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::types::{Host, HostDeletion, HostInput, HostVersion};
use crate::{InventoryStore, now, to_json};

impl InventoryStore {
    /// Insert or merge a host keyed by its lowercased hostname.
    ///
    /// On insert a `{"action": "created"}` version row is emitted; on update
    /// a diff of the fields that actually changed.  `None` inputs preserve
    /// the current value (and take column defaults on insert).  Insert vs
    /// update is decided by the upsert itself via `RETURNING`, never by a
    /// separate existence check.
    pub async fn add_host(
        &self,
        input: &HostInput,
        source_id: Option<i64>,
        changed_by: &str,
    ) -> StoreResult<i64> {
        let mut tx = self.pool().begin().await?;
        let id = add_host_in_tx(&mut tx, input, source_id, changed_by).await?;
        tx.commit().await?;
        Ok(id)
    }

    /// Add a batch of hosts in a single transaction.  Any failure rolls the
    /// whole batch back and reports how far it got.
    pub async fn bulk_add_hosts(
        &self,
        hosts: &[HostInput],
        source_id: Option<i64>,
        changed_by: &str,
    ) -> StoreResult<usize> {
        if hosts.is_empty() {
            return Ok(0);
        }

        let mut added = 0usize;
        let mut tx = self.pool().begin().await?;
        for host in hosts {
            if let Err(err) = add_host_in_tx(&mut tx, host, source_id, changed_by).await {
                // Dropping the transaction rolls everything back.
                drop(tx);
                let mut details = BTreeMap::new();
                details.insert("hosts_attempted".to_string(), json!(hosts.len()));
                details.insert("hosts_before_failure".to_string(), json!(added));
                return Err(StoreError::persistence_with(
                    "bulk_add_hosts",
                    err.to_string(),
                    details,
                ));
            }
            added += 1;
        }
        tx.commit().await?;

        debug!(count = added, "bulk inserted hosts in single transaction");
        Ok(added)
    }

    pub async fn get_host_by_id(&self, host_id: i64) -> StoreResult<Option<Host>> {
        let row = sqlx::query("SELECT * FROM hosts_v2 WHERE id = ?")
            .bind(host_id)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(|r| Host::from_row(&r)))
    }

    /// Case-insensitive lookup: exact hostname first, then an exact element
    /// of the JSON `aliases` array (never a substring of the serialized
    /// text).
    pub async fn get_host_by_name(&self, hostname: &str) -> StoreResult<Option<Host>> {
        let name = hostname.to_lowercase();

        let row = sqlx::query("SELECT * FROM hosts_v2 WHERE hostname = ?")
            .bind(&name)
            .fetch_optional(self.pool())
            .await?;
        if let Some(row) = row {
            return Ok(Some(Host::from_row(&row)));
        }

        let row = sqlx::query(
            "SELECT h.* FROM hosts_v2 h, json_each(h.aliases) AS alias
             WHERE alias.value = ? LIMIT 1",
        )
        .bind(&name)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(|r| Host::from_row(&r)))
    }

    /// Search hosts.  `pattern` matches hostname/aliases/ip case
    /// insensitively with LIKE wildcards escaped; `group` matches an exact
    /// JSON-array element; `limit = None` means unlimited.
    pub async fn search_hosts(
        &self,
        pattern: Option<&str>,
        environment: Option<&str>,
        group: Option<&str>,
        source_id: Option<i64>,
        status: Option<&str>,
        limit: Option<u32>,
    ) -> StoreResult<Vec<Host>> {
        let mut qb =
            sqlx::QueryBuilder::<Sqlite>::new("SELECT * FROM hosts_v2 WHERE 1=1");

        if let Some(pattern) = pattern {
            let like = format!("%{}%", escape_like(&pattern.to_lowercase()));
            qb.push(" AND (hostname LIKE ");
            qb.push_bind(like.clone());
            qb.push(" ESCAPE '\\' OR LOWER(aliases) LIKE ");
            qb.push_bind(like.clone());
            qb.push(" ESCAPE '\\' OR ip_address LIKE ");
            qb.push_bind(like);
            qb.push(" ESCAPE '\\')");
        }
        if let Some(environment) = environment {
            qb.push(" AND environment = ");
            qb.push_bind(environment.to_string());
        }
        if let Some(group) = group {
            qb.push(
                " AND EXISTS (SELECT 1 FROM json_each(hosts_v2.groups) AS g WHERE g.value = ",
            );
            qb.push_bind(group.to_string());
            qb.push(")");
        }
        if let Some(source_id) = source_id {
            qb.push(" AND source_id = ");
            qb.push_bind(source_id);
        }
        if let Some(status) = status {
            qb.push(" AND status = ");
            qb.push_bind(status.to_string());
        }
        qb.push(" ORDER BY hostname");
        if let Some(limit) = limit {
            qb.push(" LIMIT ");
            qb.push_bind(limit as i64);
        }

        let rows = qb.build().fetch_all(self.pool()).await?;
        Ok(rows.iter().map(Host::from_row).collect())
    }

    pub async fn get_all_hosts(&self) -> StoreResult<Vec<Host>> {
        self.search_hosts(None, None, None, None, None, None).await
    }

    pub async fn update_host_status(&self, host_id: i64, status: &str) -> StoreResult<()> {
        sqlx::query("UPDATE hosts_v2 SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status)
            .bind(now())
            .bind(host_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Delete a host, writing the full pre-deletion snapshot into the audit
    /// table in the same transaction.  Versions, relations, and scan-cache
    /// rows cascade; the audit row is not FK-bound and survives.
    pub async fn delete_host(
        &self,
        hostname: &str,
        deleted_by: &str,
        reason: Option<&str>,
    ) -> StoreResult<bool> {
        let name = hostname.to_lowercase();
        let mut tx = self.pool().begin().await?;

        let row = sqlx::query("SELECT * FROM hosts_v2 WHERE hostname = ?")
            .bind(&name)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Ok(false);
        };
        let host = Host::from_row(&row);

        sqlx::query(
            "INSERT INTO host_deletions
             (host_id, hostname, ip_address, aliases, environment, groups,
              role, service, ssh_port, status, metadata, deleted_by,
              deletion_reason, deleted_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(host.id)
        .bind(&host.hostname)
        .bind(&host.ip_address)
        .bind(to_json(&host.aliases))
        .bind(&host.environment)
        .bind(to_json(&host.groups))
        .bind(&host.role)
        .bind(&host.service)
        .bind(host.ssh_port as i64)
        .bind(&host.status)
        .bind(to_json(&host.metadata))
        .bind(deleted_by)
        .bind(reason)
        .bind(now())
        .execute(&mut *tx)
        .await?;

        let deleted = sqlx::query("DELETE FROM hosts_v2 WHERE hostname = ?")
            .bind(&name)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(deleted > 0)
    }

    /// Version history for a host, newest first.
    pub async fn get_host_versions(&self, host_id: i64) -> StoreResult<Vec<HostVersion>> {
        let rows = sqlx::query(
            "SELECT * FROM host_versions WHERE host_id = ? ORDER BY version DESC",
        )
        .bind(host_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.iter().map(HostVersion::from_row).collect())
    }

    /// Deletion audit rows for a hostname, newest first.
    pub async fn get_host_deletions(&self, hostname: &str) -> StoreResult<Vec<HostDeletion>> {
        let rows = sqlx::query(
            "SELECT * FROM host_deletions WHERE hostname = ? ORDER BY deleted_at DESC",
        )
        .bind(hostname.to_lowercase())
        .fetch_all(self.pool())
        .await?;
        Ok(rows.iter().map(HostDeletion::from_row).collect())
    }
}

/// Core upsert shared by `add_host` and `bulk_add_hosts`.  Runs inside the
/// caller's transaction and does not commit.
pub(crate) async fn add_host_in_tx(
    tx: &mut Transaction<'_, Sqlite>,
    input: &HostInput,
    source_id: Option<i64>,
    changed_by: &str,
) -> StoreResult<i64> {
    let hostname = input.hostname.trim().to_lowercase();
    if hostname.is_empty() {
        return Err(StoreError::InvalidInput("hostname must not be empty".into()));
    }

    let ts = now();
    let aliases_json = input.aliases.as_ref().map(|a| to_json(a));
    let groups_json = input.groups.as_ref().map(|g| to_json(g));
    let metadata_json = input.metadata.as_ref().map(|m| to_json(m));

    // Pre-image for the version diff.  The upsert below stays the single
    // source of truth for insert-vs-update detection; this read only feeds
    // the old/new values of the change record.
    let before = sqlx::query("SELECT * FROM hosts_v2 WHERE hostname = ?")
        .bind(&hostname)
        .fetch_optional(&mut **tx)
        .await?
        .map(|row| Host::from_row(&row));

    let row = sqlx::query(
        "INSERT INTO hosts_v2
         (hostname, ip_address, aliases, environment, groups, role, service,
          ssh_port, status, source_id, metadata, created_at, updated_at)
         VALUES (?1, ?2, COALESCE(?3, '[]'), ?4, COALESCE(?5, '[]'), ?6, ?7,
                 COALESCE(?8, 22), 'unknown', ?9, COALESCE(?10, '{}'), ?11, ?11)
         ON CONFLICT(hostname) DO UPDATE SET
             ip_address = COALESCE(excluded.ip_address, hosts_v2.ip_address),
             aliases = COALESCE(?3, hosts_v2.aliases),
             environment = COALESCE(excluded.environment, hosts_v2.environment),
             groups = COALESCE(?5, hosts_v2.groups),
             role = COALESCE(excluded.role, hosts_v2.role),
             service = COALESCE(excluded.service, hosts_v2.service),
             ssh_port = COALESCE(?8, hosts_v2.ssh_port),
             source_id = COALESCE(excluded.source_id, hosts_v2.source_id),
             metadata = COALESCE(?10, hosts_v2.metadata),
             updated_at = excluded.updated_at
         RETURNING id, (created_at < ?11) AS existed_before",
    )
    .bind(&hostname)
    .bind(&input.ip_address)
    .bind(&aliases_json)
    .bind(&input.environment)
    .bind(&groups_json)
    .bind(&input.role)
    .bind(&input.service)
    .bind(input.ssh_port.map(|p| p as i64))
    .bind(source_id)
    .bind(&metadata_json)
    .bind(&ts)
    .fetch_one(&mut **tx)
    .await?;

    let host_id: i64 = row.get("id");
    let existed_before: i64 = row.get("existed_before");

    if existed_before == 0 {
        add_version(tx, host_id, json!({"action": "created"}), changed_by).await?;
    } else {
        let changes = compute_changes(before.as_ref(), input, source_id);
        if let Some(changes) = changes {
            add_version(tx, host_id, changes, changed_by).await?;
        }
    }

    Ok(host_id)
}

async fn add_version(
    tx: &mut Transaction<'_, Sqlite>,
    host_id: i64,
    changes: Value,
    changed_by: &str,
) -> StoreResult<()> {
    let current: i64 = sqlx::query(
        "SELECT COALESCE(MAX(version), 0) AS v FROM host_versions WHERE host_id = ?",
    )
    .bind(host_id)
    .fetch_one(&mut **tx)
    .await?
    .get("v");

    sqlx::query(
        "INSERT INTO host_versions (host_id, version, changes, changed_by, created_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(host_id)
    .bind(current + 1)
    .bind(changes.to_string())
    .bind(changed_by)
    .bind(now())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Diff of the fields the caller actually supplied.  `None` when nothing
/// changed (in which case no version row is written).
fn compute_changes(before: Option<&Host>, input: &HostInput, source_id: Option<i64>) -> Option<Value> {
    let mut changes = serde_json::Map::new();

    let mut record = |field: &str, old: Value, new: Value| {
        if old != new {
            changes.insert(field.to_string(), json!({"old": old, "new": new}));
        }
    };

    if let Some(ip) = &input.ip_address {
        record(
            "ip_address",
            before.and_then(|h| h.ip_address.clone()).map_or(Value::Null, Value::String),
            json!(ip),
        );
    }
    if let Some(aliases) = &input.aliases {
        record(
            "aliases",
            before.map_or(Value::Null, |h| json!(h.aliases)),
            json!(aliases),
        );
    }
    if let Some(env) = &input.environment {
        record(
            "environment",
            before.and_then(|h| h.environment.clone()).map_or(Value::Null, Value::String),
            json!(env),
        );
    }
    if let Some(groups) = &input.groups {
        record(
            "groups",
            before.map_or(Value::Null, |h| json!(h.groups)),
            json!(groups),
        );
    }
    if let Some(role) = &input.role {
        record(
            "role",
            before.and_then(|h| h.role.clone()).map_or(Value::Null, Value::String),
            json!(role),
        );
    }
    if let Some(service) = &input.service {
        record(
            "service",
            before.and_then(|h| h.service.clone()).map_or(Value::Null, Value::String),
            json!(service),
        );
    }
    if let Some(port) = input.ssh_port {
        record(
            "ssh_port",
            before.map_or(Value::Null, |h| json!(h.ssh_port)),
            json!(port),
        );
    }
    if let Some(metadata) = &input.metadata {
        record(
            "metadata",
            before.map_or(Value::Null, |h| json!(h.metadata)),
            json!(metadata),
        );
    }
    if let Some(source_id) = source_id {
        record(
            "source_id",
            before.and_then(|h| h.source_id).map_or(Value::Null, |v| json!(v)),
            json!(source_id),
        );
    }

    if changes.is_empty() {
        None
    } else {
        Some(Value::Object(changes))
    }
}

fn escape_like(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InventoryStore;

    #[tokio::test]
    async fn upsert_merges_and_versions() {
        let store = InventoryStore::open_in_memory().await.unwrap();

        let mut input = HostInput::named("Web-01");
        input.ip_address = Some("10.0.0.1".to_string());
        let id1 = store.add_host(&input, None, "test").await.unwrap();

        let mut update = HostInput::named("WEB-01");
        update.environment = Some("prod".to_string());
        let id2 = store.add_host(&update, None, "test").await.unwrap();
        assert_eq!(id1, id2);

        let host = store.get_host_by_name("web-01").await.unwrap().unwrap();
        assert_eq!(host.hostname, "web-01");
        assert_eq!(host.ip_address.as_deref(), Some("10.0.0.1"));
        assert_eq!(host.environment.as_deref(), Some("prod"));
        assert_eq!(host.ssh_port, 22);

        let versions = store.get_host_versions(id1).await.unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].version, 2);
        assert_eq!(versions[1].version, 1);
        assert_eq!(versions[1].changes["action"], "created");
        assert_eq!(
            versions[0].changes["environment"],
            json!({"old": null, "new": "prod"})
        );
    }

    #[tokio::test]
    async fn version_count_matches_mutations() {
        let store = InventoryStore::open_in_memory().await.unwrap();

        let id = store
            .add_host(&HostInput::named("db-01"), None, "test")
            .await
            .unwrap();
        // No-op update: same hostname, no new fields.
        store
            .add_host(&HostInput::named("db-01"), None, "test")
            .await
            .unwrap();
        let mut with_role = HostInput::named("db-01");
        with_role.role = Some("database".to_string());
        store.add_host(&with_role, None, "test").await.unwrap();

        let versions = store.get_host_versions(id).await.unwrap();
        // created + one real change; the no-op produced nothing.
        assert_eq!(versions.len(), 2);
        assert_eq!(versions.iter().map(|v| v.version).max(), Some(2));
    }

    #[tokio::test]
    async fn alias_lookup_is_exact_element() {
        let store = InventoryStore::open_in_memory().await.unwrap();

        let mut input = HostInput::named("app-01");
        input.aliases = Some(vec!["app".to_string(), "app-primary".to_string()]);
        store.add_host(&input, None, "test").await.unwrap();

        assert!(store.get_host_by_name("app").await.unwrap().is_some());
        assert!(store.get_host_by_name("APP-PRIMARY").await.unwrap().is_some());
        // A prefix of a stored alias must not match.
        assert!(store.get_host_by_name("app-prim").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn bulk_rolls_back_on_failure() {
        let store = InventoryStore::open_in_memory().await.unwrap();

        let hosts = vec![
            HostInput::named("a"),
            HostInput::named("b"),
            HostInput::named(""), // violates the hostname constraint
        ];
        let err = store.bulk_add_hosts(&hosts, None, "import").await.unwrap_err();
        match err {
            StoreError::Persistence { details, .. } => {
                assert_eq!(details["hosts_attempted"], json!(3));
                assert_eq!(details["hosts_before_failure"], json!(2));
            }
            other => panic!("expected persistence error, got {other:?}"),
        }

        assert!(store.get_host_by_name("a").await.unwrap().is_none());
        assert!(store.get_host_by_name("b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_writes_audit_row() {
        let store = InventoryStore::open_in_memory().await.unwrap();

        let mut input = HostInput::named("old-01");
        input.ip_address = Some("10.1.1.1".to_string());
        store.add_host(&input, None, "test").await.unwrap();

        let deleted = store
            .delete_host("OLD-01", "operator", Some("decommissioned"))
            .await
            .unwrap();
        assert!(deleted);
        assert!(store.get_host_by_name("old-01").await.unwrap().is_none());

        let audits = store.get_host_deletions("old-01").await.unwrap();
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].ip_address.as_deref(), Some("10.1.1.1"));
        assert_eq!(audits[0].deleted_by, "operator");
        assert_eq!(audits[0].deletion_reason.as_deref(), Some("decommissioned"));
    }

    #[tokio::test]
    async fn search_filters_compose() {
        let store = InventoryStore::open_in_memory().await.unwrap();

        let mut a = HostInput::named("web-01");
        a.environment = Some("prod".to_string());
        a.groups = Some(vec!["frontend".to_string()]);
        store.add_host(&a, None, "t").await.unwrap();

        let mut b = HostInput::named("web-02");
        b.environment = Some("staging".to_string());
        b.groups = Some(vec!["frontend-canary".to_string()]);
        store.add_host(&b, None, "t").await.unwrap();

        let hits = store
            .search_hosts(Some("web"), Some("prod"), None, None, None, None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].hostname, "web-01");

        // Group match is exact, not substring.
        let hits = store
            .search_hosts(None, None, Some("frontend"), None, None, None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].hostname, "web-01");

        // LIKE wildcards in the pattern are literal.
        let hits = store
            .search_hosts(Some("%"), None, None, None, None, None)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }
}
