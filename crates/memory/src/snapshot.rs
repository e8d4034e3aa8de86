//! Point-in-time inventory snapshots.  Immutable once written.

use serde_json::json;
use sqlx::Row;

use crate::error::StoreResult;
use crate::types::{Snapshot, SnapshotInfo};
use crate::{InventoryStore, now};

impl InventoryStore {
    /// Serialize the full host + relation set into a new snapshot row.
    pub async fn create_snapshot(
        &self,
        name: Option<&str>,
        description: Option<&str>,
    ) -> StoreResult<i64> {
        let hosts = self.get_all_hosts().await?;
        let relations = self.get_relations(None, None, false).await?;
        let ts = now();

        let data = json!({
            "hosts": hosts,
            "relations": relations,
            "created_at": ts,
        });
        let default_name = format!(
            "snapshot_{}",
            chrono::Utc::now().format("%Y%m%d_%H%M%S")
        );

        let row = sqlx::query(
            "INSERT INTO inventory_snapshots
             (name, description, host_count, snapshot_data, created_at)
             VALUES (?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(name.unwrap_or(&default_name))
        .bind(description)
        .bind(hosts.len() as i64)
        .bind(data.to_string())
        .bind(&ts)
        .fetch_one(self.pool())
        .await?;
        Ok(row.get("id"))
    }

    /// Snapshot metadata, newest first, without payloads.
    pub async fn list_snapshots(&self, limit: u32) -> StoreResult<Vec<SnapshotInfo>> {
        let rows = sqlx::query(
            "SELECT id, name, description, host_count, created_at
             FROM inventory_snapshots
             ORDER BY created_at DESC
             LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .iter()
            .map(|row| SnapshotInfo {
                id: row.get("id"),
                name: row.get("name"),
                description: row.get("description"),
                host_count: row.get("host_count"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    pub async fn get_snapshot(&self, snapshot_id: i64) -> StoreResult<Option<Snapshot>> {
        let row = sqlx::query("SELECT * FROM inventory_snapshots WHERE id = ?")
            .bind(snapshot_id)
            .fetch_optional(self.pool())
            .await?;

        Ok(row.map(|row| Snapshot {
            info: SnapshotInfo {
                id: row.get("id"),
                name: row.get("name"),
                description: row.get("description"),
                host_count: row.get("host_count"),
                created_at: row.get("created_at"),
            },
            data: serde_json::from_str(&row.get::<String, _>("snapshot_data"))
                .unwrap_or(serde_json::Value::Null),
        }))
    }

    pub async fn delete_snapshot(&self, snapshot_id: i64) -> StoreResult<bool> {
        let deleted = sqlx::query("DELETE FROM inventory_snapshots WHERE id = ?")
            .bind(snapshot_id)
            .execute(self.pool())
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use crate::types::HostInput;
    use crate::InventoryStore;

    #[tokio::test]
    async fn snapshot_captures_hosts() {
        let store = InventoryStore::open_in_memory().await.unwrap();
        store.add_host(&HostInput::named("snap-01"), None, "t").await.unwrap();
        store.add_host(&HostInput::named("snap-02"), None, "t").await.unwrap();

        let id = store
            .create_snapshot(Some("before-migration"), Some("pre-change state"))
            .await
            .unwrap();

        let listed = store.list_snapshots(10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "before-migration");
        assert_eq!(listed[0].host_count, 2);

        let snapshot = store.get_snapshot(id).await.unwrap().unwrap();
        assert_eq!(snapshot.data["hosts"].as_array().unwrap().len(), 2);

        assert!(store.delete_snapshot(id).await.unwrap());
        assert!(store.get_snapshot(id).await.unwrap().is_none());
    }
}
