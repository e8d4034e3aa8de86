//! Token-budgeted rolling conversations with automatic compaction.
//!
//! At most one conversation carries `is_current = 1`; every transition that
//! moves the flag runs in a single transaction so no reader ever observes
//! two current conversations.

use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use tracing::{info, warn};

use crate::error::StoreResult;
use crate::{InventoryStore, now};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
    pub timestamp: String,
    pub tokens: i64,
}

#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
    pub created_at: String,
    pub updated_at: String,
    pub token_count: i64,
    pub compacted: bool,
}

/// Metadata row for `list_conversations`.
#[derive(Debug, Clone)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
    pub token_count: i64,
    pub current: bool,
    pub message_count: i64,
}

/// A token is approximated as ⌈len/4⌉ characters.
pub fn estimate_tokens(content: &str) -> i64 {
    content.len().div_ceil(4) as i64
}

fn conversation_from_row(row: &SqliteRow) -> Conversation {
    Conversation {
        id: row.get("id"),
        title: row.get("title"),
        messages: vec![],
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        token_count: row.get("token_count"),
        compacted: row.get::<i64, _>("compacted") != 0,
    }
}

/// Manages the current conversation over the shared relational store.
pub struct ConversationManager {
    store: std::sync::Arc<InventoryStore>,
    token_limit: i64,
    compact_threshold: f64,
    current: Conversation,
}

impl ConversationManager {
    /// Load the current conversation or start a fresh one.
    pub async fn new(
        store: std::sync::Arc<InventoryStore>,
        token_limit: u64,
        compact_threshold: f64,
    ) -> StoreResult<Self> {
        let mut manager = Self {
            store,
            token_limit: token_limit as i64,
            compact_threshold,
            current: Conversation {
                id: String::new(),
                title: String::new(),
                messages: vec![],
                created_at: now(),
                updated_at: now(),
                token_count: 0,
                compacted: false,
            },
        };

        match manager.load_current().await? {
            Some(conversation) => {
                info!(id = %conversation.id, "loaded current conversation");
                manager.current = conversation;
            }
            None => {
                manager.start_new_conversation(None).await?;
            }
        }
        Ok(manager)
    }

    pub fn current(&self) -> &Conversation {
        &self.current
    }

    pub fn current_tokens(&self) -> i64 {
        self.current.token_count
    }

    pub fn token_usage_percent(&self) -> f64 {
        if self.token_limit == 0 {
            return 0.0;
        }
        (self.current.token_count as f64 / self.token_limit as f64) * 100.0
    }

    async fn load_current(&self) -> StoreResult<Option<Conversation>> {
        let row = sqlx::query("SELECT * FROM conversations WHERE is_current = 1 LIMIT 1")
            .fetch_optional(self.store.pool())
            .await?;
        let Some(row) = row else { return Ok(None) };
        let mut conversation = conversation_from_row(&row);
        conversation.messages = self.load_messages(&conversation.id).await?;
        Ok(Some(conversation))
    }

    async fn load_messages(&self, conversation_id: &str) -> StoreResult<Vec<Message>> {
        let rows = sqlx::query(
            "SELECT role, content, timestamp, tokens FROM messages
             WHERE conversation_id = ? ORDER BY timestamp ASC, id ASC",
        )
        .bind(conversation_id)
        .fetch_all(self.store.pool())
        .await?;
        Ok(rows
            .iter()
            .map(|row| Message {
                role: row.get("role"),
                content: row.get("content"),
                timestamp: row.get("timestamp"),
                tokens: row.get("tokens"),
            })
            .collect())
    }

    /// Archive the current conversation and create a new current one, in a
    /// single transaction.
    pub async fn start_new_conversation(&mut self, title: Option<&str>) -> StoreResult<String> {
        let id = format!("conv_{}", uuid::Uuid::new_v4().simple());
        let title = title.map(ToOwned::to_owned).unwrap_or_else(|| {
            format!("Conversation {}", chrono::Utc::now().format("%Y-%m-%d %H:%M"))
        });
        let ts = now();

        let mut tx = self.store.pool().begin().await?;
        sqlx::query("UPDATE conversations SET is_current = 0 WHERE is_current = 1")
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO conversations
             (id, title, created_at, updated_at, token_count, compacted, is_current)
             VALUES (?, ?, ?, ?, 0, 0, 1)",
        )
        .bind(&id)
        .bind(&title)
        .bind(&ts)
        .bind(&ts)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        self.current = Conversation {
            id: id.clone(),
            title,
            messages: vec![],
            created_at: ts.clone(),
            updated_at: ts,
            token_count: 0,
            compacted: false,
        };
        info!(id = %id, "started new conversation");
        Ok(id)
    }

    pub async fn add_user_message(&mut self, content: &str) -> StoreResult<()> {
        self.append_message("user", content).await?;
        if self.should_compact() {
            warn!(
                tokens = self.current.token_count,
                limit = self.token_limit,
                "conversation approaching token limit"
            );
        }
        Ok(())
    }

    pub async fn add_assistant_message(&mut self, content: &str) -> StoreResult<()> {
        self.append_message("assistant", content).await
    }

    async fn append_message(&mut self, role: &str, content: &str) -> StoreResult<()> {
        let tokens = estimate_tokens(content);
        let ts = now();

        let mut tx = self.store.pool().begin().await?;
        sqlx::query(
            "INSERT INTO messages (conversation_id, role, content, timestamp, tokens)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&self.current.id)
        .bind(role)
        .bind(content)
        .bind(&ts)
        .bind(tokens)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "UPDATE conversations SET token_count = token_count + ?, updated_at = ? WHERE id = ?",
        )
        .bind(tokens)
        .bind(&ts)
        .bind(&self.current.id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        self.current.messages.push(Message {
            role: role.to_string(),
            content: content.to_string(),
            timestamp: ts.clone(),
            tokens,
        });
        self.current.token_count += tokens;
        self.current.updated_at = ts;
        Ok(())
    }

    pub fn should_compact(&self) -> bool {
        self.current.token_count as f64 >= self.token_limit as f64 * self.compact_threshold
    }

    pub fn must_compact(&self) -> bool {
        self.current.token_count >= self.token_limit
    }

    /// Replace the current conversation with a fresh one seeded by a
    /// summary.  The old conversation is archived and marked compacted; the
    /// summary lands as the new conversation's first assistant message.
    pub async fn compact_conversation<F>(&mut self, summarizer: Option<F>) -> StoreResult<String>
    where
        F: FnOnce(&Conversation) -> String,
    {
        let old_id = self.current.id.clone();
        let summary = match summarizer {
            Some(f) => f(&self.current),
            None => simple_summary(&self.current),
        };

        sqlx::query("UPDATE conversations SET compacted = 1 WHERE id = ?")
            .bind(&old_id)
            .execute(self.store.pool())
            .await?;

        let new_id = self
            .start_new_conversation(Some(&format!("Continuation of {old_id}")))
            .await?;
        self.add_assistant_message(&format!(
            "[SUMMARY OF PREVIOUS CONVERSATION]\n\n{summary}\n\n[END SUMMARY]"
        ))
        .await?;

        info!(old = %old_id, new = %new_id, "conversation compacted");
        Ok(new_id)
    }

    pub async fn list_conversations(&self, limit: u32) -> StoreResult<Vec<ConversationSummary>> {
        let rows = sqlx::query(
            "SELECT c.id, c.title, c.created_at, c.updated_at, c.token_count,
                    c.is_current, COUNT(m.id) AS message_count
             FROM conversations c
             LEFT JOIN messages m ON c.id = m.conversation_id
             GROUP BY c.id
             ORDER BY c.updated_at DESC
             LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(self.store.pool())
        .await?;

        Ok(rows
            .iter()
            .map(|row| ConversationSummary {
                id: row.get("id"),
                title: row.get("title"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
                token_count: row.get("token_count"),
                current: row.get::<i64, _>("is_current") != 0,
                message_count: row.get("message_count"),
            })
            .collect())
    }

    pub async fn load_conversation(&self, conversation_id: &str) -> StoreResult<Option<Conversation>> {
        let row = sqlx::query("SELECT * FROM conversations WHERE id = ?")
            .bind(conversation_id)
            .fetch_optional(self.store.pool())
            .await?;
        let Some(row) = row else { return Ok(None) };
        let mut conversation = conversation_from_row(&row);
        conversation.messages = self.load_messages(conversation_id).await?;
        Ok(Some(conversation))
    }

    /// Make another conversation current.  The flag moves in one statement
    /// pair inside one transaction.
    pub async fn switch_to_conversation(&mut self, conversation_id: &str) -> StoreResult<bool> {
        let Some(conversation) = self.load_conversation(conversation_id).await? else {
            return Ok(false);
        };

        let mut tx = self.store.pool().begin().await?;
        sqlx::query("UPDATE conversations SET is_current = 0 WHERE is_current = 1")
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE conversations SET is_current = 1 WHERE id = ?")
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        self.current = conversation;
        info!(id = %conversation_id, "switched conversation");
        Ok(true)
    }

    /// Delete a non-current conversation; its messages cascade.
    pub async fn delete_conversation(&self, conversation_id: &str) -> StoreResult<bool> {
        if conversation_id == self.current.id {
            warn!("refusing to delete the current conversation");
            return Ok(false);
        }
        let deleted = sqlx::query("DELETE FROM conversations WHERE id = ?")
            .bind(conversation_id)
            .execute(self.store.pool())
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }
}

/// Deterministic summary used when no LLM summarizer is supplied: message
/// counts, token totals, duration, top infrastructure keywords, and the last
/// three interactions truncated to 100 chars.
pub fn simple_summary(conversation: &Conversation) -> String {
    const INFRA_KEYWORDS: &[&str] = &[
        "server", "nginx", "docker", "kubernetes", "terraform", "ansible", "deploy",
        "restart", "install", "configure", "host", "database", "mongodb", "postgresql",
        "mysql",
    ];

    let user_count = conversation.messages.iter().filter(|m| m.role == "user").count();
    let assistant_count = conversation
        .messages
        .iter()
        .filter(|m| m.role == "assistant")
        .count();

    let mut summary = format!(
        "Previous conversation summary:\n\
         - Total interactions: {} user requests, {} responses\n\
         - Total tokens: {}\n\
         - Started: {}\n",
        user_count, assistant_count, conversation.token_count, conversation.created_at
    );
    if let (Ok(start), Ok(end)) = (
        chrono::DateTime::parse_from_rfc3339(&conversation.created_at),
        chrono::DateTime::parse_from_rfc3339(&conversation.updated_at),
    ) {
        let minutes = end.signed_duration_since(start).num_minutes();
        summary.push_str(&format!("- Duration: {minutes} minutes\n"));
    }

    let all_content = conversation
        .messages
        .iter()
        .map(|m| m.content.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");
    let words: Vec<&str> = all_content.split_whitespace().collect();
    let mut keyword_counts: Vec<(&str, usize)> = INFRA_KEYWORDS
        .iter()
        .map(|kw| (*kw, words.iter().filter(|w| **w == *kw).count()))
        .filter(|(_, count)| *count > 0)
        .collect();
    keyword_counts.sort_by(|a, b| b.1.cmp(&a.1));
    if !keyword_counts.is_empty() {
        summary.push_str("\nMain topics discussed:\n");
        for (kw, count) in keyword_counts.iter().take(5) {
            summary.push_str(&format!("  - {kw} (mentioned {count} times)\n"));
        }
    }

    let last = conversation.messages.iter().rev().take(6).collect::<Vec<_>>();
    if !last.is_empty() {
        summary.push_str("\nLast interactions:\n");
        for message in last.into_iter().rev() {
            let label = if message.role == "user" { "User" } else { "Assistant" };
            let preview: String = if message.content.len() > 100 {
                let mut end = 100;
                while end > 0 && !message.content.is_char_boundary(end) {
                    end -= 1;
                }
                format!("{}...", &message.content[..end])
            } else {
                message.content.clone()
            };
            summary.push_str(&format!("  {label}: {preview}\n"));
        }
    }

    summary
}
