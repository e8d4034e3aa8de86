//! Session audit trail: sessions group queries, queries group executed
//! actions.  Used for `/session` export; the orchestration loop itself does
//! not read it back.

use serde_json::Value;
use sqlx::Row;

use crate::error::StoreResult;
use crate::{InventoryStore, now};

/// Output length cap for stored action streams.
const ACTION_OUTPUT_LIMIT: usize = 1000;

#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub id: String,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub status: String,
    pub total_queries: i64,
    pub total_actions: i64,
}

impl InventoryStore {
    pub async fn start_session(&self, session_id: &str, metadata: Option<&Value>) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO sessions (id, started_at, status, metadata) VALUES (?, ?, 'active', ?)",
        )
        .bind(session_id)
        .bind(now())
        .bind(metadata.map(|m| m.to_string()))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn end_session(&self, session_id: &str) -> StoreResult<()> {
        sqlx::query("UPDATE sessions SET ended_at = ?, status = 'ended' WHERE id = ?")
            .bind(now())
            .bind(session_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Record one query/response exchange; bumps the session counter in the
    /// same transaction.  Returns the query id for action logging.
    pub async fn log_query(
        &self,
        session_id: &str,
        query: &str,
        response: &str,
        response_type: &str,
        actions_count: i64,
        execution_time_ms: i64,
    ) -> StoreResult<i64> {
        let mut tx = self.pool().begin().await?;
        let row = sqlx::query(
            "INSERT INTO queries
             (session_id, timestamp, query, response, response_type, actions_count, execution_time_ms)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(session_id)
        .bind(now())
        .bind(query)
        .bind(response)
        .bind(response_type)
        .bind(actions_count)
        .bind(execution_time_ms)
        .fetch_one(&mut *tx)
        .await?;
        let query_id: i64 = row.get("id");

        sqlx::query("UPDATE sessions SET total_queries = total_queries + 1 WHERE id = ?")
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(query_id)
    }

    /// Record one executed action under a query.  Stdout/stderr are truncated
    /// before storage.
    #[allow(clippy::too_many_arguments)]
    pub async fn log_action(
        &self,
        query_id: i64,
        session_id: &str,
        target: &str,
        command: &str,
        exit_code: Option<i64>,
        stdout: &str,
        stderr: &str,
        risk_level: &str,
        duration_ms: i64,
    ) -> StoreResult<()> {
        let mut tx = self.pool().begin().await?;
        sqlx::query(
            "INSERT INTO actions
             (query_id, session_id, timestamp, target, command, exit_code,
              stdout, stderr, risk_level, duration_ms)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(query_id)
        .bind(session_id)
        .bind(now())
        .bind(target)
        .bind(command)
        .bind(exit_code)
        .bind(truncate(stdout))
        .bind(truncate(stderr))
        .bind(risk_level)
        .bind(duration_ms)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE sessions SET total_actions = total_actions + 1 WHERE id = ?")
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn save_context_snapshot(
        &self,
        session_id: &str,
        context: &Value,
        snapshot_type: &str,
    ) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO context_snapshots (session_id, timestamp, context_data, snapshot_type)
             VALUES (?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(now())
        .bind(context.to_string())
        .bind(snapshot_type)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_session(&self, session_id: &str) -> StoreResult<Option<SessionSummary>> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = ?")
            .bind(session_id)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(|row| SessionSummary {
            id: row.get("id"),
            started_at: row.get("started_at"),
            ended_at: row.get("ended_at"),
            status: row.get("status"),
            total_queries: row.get("total_queries"),
            total_actions: row.get("total_actions"),
        }))
    }
}

fn truncate(text: &str) -> String {
    if text.len() <= ACTION_OUTPUT_LIMIT {
        return text.to_string();
    }
    let mut end = ACTION_OUTPUT_LIMIT;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[cfg(test)]
mod tests {
    use crate::InventoryStore;

    #[tokio::test]
    async fn session_counters_track_activity() {
        let store = InventoryStore::open_in_memory().await.unwrap();
        store.start_session("sess-1", None).await.unwrap();

        let query_id = store
            .log_query("sess-1", "restart nginx", "done", "action", 1, 420)
            .await
            .unwrap();
        store
            .log_action(
                query_id,
                "sess-1",
                "web-01",
                "systemctl restart nginx",
                Some(0),
                "",
                "",
                "critical",
                380,
            )
            .await
            .unwrap();
        store.end_session("sess-1").await.unwrap();

        let session = store.get_session("sess-1").await.unwrap().unwrap();
        assert_eq!(session.total_queries, 1);
        assert_eq!(session.total_actions, 1);
        assert_eq!(session.status, "ended");
        assert!(session.ended_at.is_some());
    }

    #[tokio::test]
    async fn long_output_is_truncated() {
        let store = InventoryStore::open_in_memory().await.unwrap();
        store.start_session("sess-2", None).await.unwrap();
        let query_id = store
            .log_query("sess-2", "q", "r", "query", 0, 1)
            .await
            .unwrap();

        let huge = "x".repeat(5000);
        store
            .log_action(query_id, "sess-2", "local", "cat big", Some(0), &huge, "", "low", 5)
            .await
            .unwrap();
        // Stored row must be capped; verified via direct query.
        let row: (String,) = sqlx::query_as("SELECT stdout FROM actions WHERE query_id = ?")
            .bind(query_id)
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(row.0.len(), 1000);
    }
}
