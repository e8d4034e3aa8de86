//! Local machine context: key/value rows grouped by category, replaced
//! atomically on every save.

use std::collections::BTreeMap;

use serde_json::Value;
use sqlx::Row;

use crate::error::StoreResult;
use crate::{InventoryStore, now};

/// Reconstructed local context: `category -> key -> value`, plus the newest
/// `updated_at` across rows as `scanned_at`.
#[derive(Debug, Clone, Default)]
pub struct LocalContext {
    pub categories: BTreeMap<String, BTreeMap<String, Value>>,
    pub scanned_at: Option<String>,
}

impl LocalContext {
    /// Whether the last scan is older than `ttl_hours`.
    pub fn is_stale(&self, ttl_hours: u64) -> bool {
        let Some(scanned_at) = &self.scanned_at else {
            return true;
        };
        match chrono::DateTime::parse_from_rfc3339(scanned_at) {
            Ok(ts) => {
                let age = chrono::Utc::now().signed_duration_since(ts);
                age.num_hours() >= ttl_hours as i64
            }
            Err(_) => true,
        }
    }
}

impl InventoryStore {
    /// Replace the entire local context in one transaction.  A concurrent
    /// reader sees either the complete old set or the complete new set.
    pub async fn save_local_context(
        &self,
        context: &BTreeMap<String, BTreeMap<String, Value>>,
    ) -> StoreResult<()> {
        let ts = now();
        let mut tx = self.pool().begin().await?;

        sqlx::query("DELETE FROM local_context").execute(&mut *tx).await?;
        for (category, entries) in context {
            for (key, value) in entries {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                sqlx::query(
                    "INSERT INTO local_context (category, key, value, created_at, updated_at)
                     VALUES (?, ?, ?, ?, ?)",
                )
                .bind(category)
                .bind(key)
                .bind(rendered)
                .bind(&ts)
                .bind(&ts)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_local_context(&self) -> StoreResult<Option<LocalContext>> {
        let rows = sqlx::query("SELECT * FROM local_context ORDER BY category, key")
            .fetch_all(self.pool())
            .await?;
        if rows.is_empty() {
            return Ok(None);
        }

        let mut context = LocalContext::default();
        for row in rows {
            let category: String = row.get("category");
            let key: String = row.get("key");
            let raw: String = row.get("value");
            let updated_at: String = row.get("updated_at");

            // Values round-trip as JSON when they were structured, plain
            // strings otherwise.
            let value = serde_json::from_str(&raw).unwrap_or(Value::String(raw));
            context
                .categories
                .entry(category)
                .or_default()
                .insert(key, value);

            if context
                .scanned_at
                .as_ref()
                .is_none_or(|current| updated_at > *current)
            {
                context.scanned_at = Some(updated_at);
            }
        }
        Ok(Some(context))
    }

    pub async fn has_local_context(&self) -> StoreResult<bool> {
        let count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM local_context")
            .fetch_one(self.pool())
            .await?
            .get("n");
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn save_is_full_replace() {
        let store = crate::InventoryStore::open_in_memory().await.unwrap();

        let mut first = BTreeMap::new();
        let mut os = BTreeMap::new();
        os.insert("name".to_string(), json!("debian"));
        os.insert("version".to_string(), json!("12"));
        first.insert("os".to_string(), os);
        store.save_local_context(&first).await.unwrap();

        let mut second = BTreeMap::new();
        let mut services = BTreeMap::new();
        services.insert("nginx".to_string(), json!({"active": true}));
        second.insert("services".to_string(), services);
        store.save_local_context(&second).await.unwrap();

        let ctx = store.get_local_context().await.unwrap().unwrap();
        assert!(!ctx.categories.contains_key("os"));
        assert_eq!(ctx.categories["services"]["nginx"], json!({"active": true}));
        assert!(ctx.scanned_at.is_some());
    }

    #[tokio::test]
    async fn empty_store_has_no_context() {
        let store = crate::InventoryStore::open_in_memory().await.unwrap();
        assert!(!store.has_local_context().await.unwrap());
        assert!(store.get_local_context().await.unwrap().is_none());
    }

    #[test]
    fn staleness_follows_ttl() {
        let mut ctx = LocalContext::default();
        assert!(ctx.is_stale(12));

        ctx.scanned_at = Some(chrono::Utc::now().to_rfc3339());
        assert!(!ctx.is_stale(12));

        let old = chrono::Utc::now() - chrono::Duration::hours(13);
        ctx.scanned_at = Some(old.to_rfc3339());
        assert!(ctx.is_stale(12));
    }
}
