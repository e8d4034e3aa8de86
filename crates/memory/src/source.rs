//! Inventory source operations.  Deleting a source cascades to its hosts.

use std::collections::BTreeMap;

use sqlx::Row;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::types::InventorySource;
use crate::{InventoryStore, now, object_to_json};

impl InventoryStore {
    /// Add a source or return the existing one with the same name.
    pub async fn add_source(
        &self,
        name: &str,
        source_type: &str,
        file_path: Option<&str>,
        import_method: &str,
        metadata: Option<BTreeMap<String, serde_json::Value>>,
    ) -> StoreResult<i64> {
        let ts = now();
        let row = sqlx::query(
            "INSERT INTO inventory_sources
             (name, source_type, file_path, import_method, host_count, created_at, updated_at, metadata)
             VALUES (?, ?, ?, ?, 0, ?, ?, COALESCE(?, '{}'))
             ON CONFLICT(name) DO UPDATE SET updated_at = excluded.updated_at
             RETURNING id",
        )
        .bind(name)
        .bind(source_type)
        .bind(file_path)
        .bind(import_method)
        .bind(&ts)
        .bind(&ts)
        .bind(object_to_json(&metadata))
        .fetch_one(self.pool())
        .await?;
        Ok(row.get("id"))
    }

    pub async fn get_source(&self, name: &str) -> StoreResult<Option<InventorySource>> {
        let row = sqlx::query("SELECT * FROM inventory_sources WHERE name = ?")
            .bind(name)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(|r| InventorySource::from_row(&r)))
    }

    pub async fn get_source_by_id(&self, source_id: i64) -> StoreResult<Option<InventorySource>> {
        let row = sqlx::query("SELECT * FROM inventory_sources WHERE id = ?")
            .bind(source_id)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(|r| InventorySource::from_row(&r)))
    }

    /// All sources, newest first.
    pub async fn list_sources(&self) -> StoreResult<Vec<InventorySource>> {
        let rows = sqlx::query("SELECT * FROM inventory_sources ORDER BY created_at DESC")
            .fetch_all(self.pool())
            .await?;
        Ok(rows.iter().map(InventorySource::from_row).collect())
    }

    pub async fn update_source_host_count(&self, source_id: i64, count: i64) -> StoreResult<()> {
        if count < 0 {
            return Err(StoreError::InvalidInput("host count must be non-negative".into()));
        }
        let affected = sqlx::query(
            "UPDATE inventory_sources SET host_count = ?, updated_at = ? WHERE id = ?",
        )
        .bind(count)
        .bind(now())
        .bind(source_id)
        .execute(self.pool())
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(StoreError::not_found("source", source_id.to_string()));
        }
        Ok(())
    }

    /// Delete a source; its hosts go with it via `ON DELETE CASCADE`.
    pub async fn delete_source(&self, name: &str) -> StoreResult<bool> {
        let deleted = sqlx::query("DELETE FROM inventory_sources WHERE name = ?")
            .bind(name)
            .execute(self.pool())
            .await?
            .rows_affected();
        if deleted > 0 {
            info!(source = name, "deleted inventory source");
        } else {
            debug!(source = name, "source not found for deletion");
        }
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use crate::types::HostInput;
    use crate::InventoryStore;

    #[tokio::test]
    async fn add_source_is_idempotent_by_name() {
        let store = InventoryStore::open_in_memory().await.unwrap();
        let id1 = store
            .add_source("prod-inventory", "file", Some("/tmp/hosts.csv"), "import", None)
            .await
            .unwrap();
        let id2 = store
            .add_source("prod-inventory", "file", None, "import", None)
            .await
            .unwrap();
        assert_eq!(id1, id2);
        assert_eq!(store.list_sources().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn deleting_source_cascades_to_hosts() {
        let store = InventoryStore::open_in_memory().await.unwrap();
        let source_id = store
            .add_source("batch", "file", None, "import", None)
            .await
            .unwrap();
        store
            .bulk_add_hosts(
                &[HostInput::named("h1"), HostInput::named("h2")],
                Some(source_id),
                "import",
            )
            .await
            .unwrap();
        assert_eq!(store.get_all_hosts().await.unwrap().len(), 2);

        assert!(store.delete_source("batch").await.unwrap());
        assert!(store.get_all_hosts().await.unwrap().is_empty());
    }
}
