//! TTL'd cache of per-host scan results, keyed by `(host, scan_type)`.

use chrono::{Duration, Utc};
use serde_json::Value;

use crate::error::StoreResult;
use crate::types::ScanCacheEntry;
use crate::{InventoryStore, now};

impl InventoryStore {
    pub async fn save_scan_cache(
        &self,
        host_id: i64,
        scan_type: &str,
        data: &Value,
        ttl_seconds: i64,
    ) -> StoreResult<()> {
        let created = Utc::now();
        let expires = created + Duration::seconds(ttl_seconds);
        sqlx::query(
            "INSERT OR REPLACE INTO scan_cache
             (host_id, scan_type, data, ttl_seconds, created_at, expires_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(host_id)
        .bind(scan_type)
        .bind(data.to_string())
        .bind(ttl_seconds)
        .bind(created.to_rfc3339())
        .bind(expires.to_rfc3339())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Cached scan data, or `None` once `expires_at` has passed.
    pub async fn get_scan_cache(
        &self,
        host_id: i64,
        scan_type: &str,
    ) -> StoreResult<Option<ScanCacheEntry>> {
        let row = sqlx::query(
            "SELECT * FROM scan_cache
             WHERE host_id = ? AND scan_type = ? AND expires_at > ?",
        )
        .bind(host_id)
        .bind(scan_type)
        .bind(now())
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(|r| ScanCacheEntry::from_row(&r)))
    }

    /// Hostname convenience: only hosts present in the inventory are cached.
    pub async fn set_scan_cache_by_hostname(
        &self,
        hostname: &str,
        scan_type: &str,
        data: &Value,
        ttl_seconds: i64,
    ) -> StoreResult<bool> {
        match self.get_host_by_name(hostname).await? {
            Some(host) => {
                self.save_scan_cache(host.id, scan_type, data, ttl_seconds).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn get_scan_cache_by_hostname(
        &self,
        hostname: &str,
        scan_type: &str,
    ) -> StoreResult<Option<ScanCacheEntry>> {
        match self.get_host_by_name(hostname).await? {
            Some(host) => self.get_scan_cache(host.id, scan_type).await,
            None => Ok(None),
        }
    }

    /// Drop all cached scans for a host.
    pub async fn clear_host_cache(&self, hostname: &str) -> StoreResult<()> {
        if let Some(host) = self.get_host_by_name(hostname).await? {
            sqlx::query("DELETE FROM scan_cache WHERE host_id = ?")
                .bind(host.id)
                .execute(self.pool())
                .await?;
        }
        Ok(())
    }

    /// Remove expired entries; returns how many were deleted.
    pub async fn cleanup_expired_cache(&self) -> StoreResult<u64> {
        let deleted = sqlx::query("DELETE FROM scan_cache WHERE expires_at < ?")
            .bind(now())
            .execute(self.pool())
            .await?
            .rows_affected();
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::types::HostInput;
    use crate::InventoryStore;

    #[tokio::test]
    async fn fresh_entries_hit_expired_entries_miss() {
        let store = InventoryStore::open_in_memory().await.unwrap();
        let id = store
            .add_host(&HostInput::named("scan-01"), None, "t")
            .await
            .unwrap();

        let data = json!({"ports": [22, 443]});
        store.save_scan_cache(id, "ports", &data, 3600).await.unwrap();
        let hit = store.get_scan_cache(id, "ports").await.unwrap().unwrap();
        assert_eq!(hit.data, data);

        // Already-expired entry must read back as a miss.
        store.save_scan_cache(id, "nmap", &data, -1).await.unwrap();
        assert!(store.get_scan_cache(id, "nmap").await.unwrap().is_none());

        let removed = store.cleanup_expired_cache().await.unwrap();
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn hostname_helpers_skip_unknown_hosts() {
        let store = InventoryStore::open_in_memory().await.unwrap();
        let stored = store
            .set_scan_cache_by_hostname("ghost", "ports", &serde_json::json!({}), 60)
            .await
            .unwrap();
        assert!(!stored);
        assert!(store
            .get_scan_cache_by_hostname("ghost", "ports")
            .await
            .unwrap()
            .is_none());
    }
}
