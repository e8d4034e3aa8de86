//! Learned triage patterns in the secondary store.
//!
//! Confidence ladder (part of the contract, not an implementation detail):
//! 0.5 on first capture, +0.1 per implicit validation up to 0.8, and 1.0
//! only on explicit user feedback.  An automatically collected pattern can
//! therefore never silently override a user-confirmed one.

use std::sync::Arc;

use redb::{ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::knowledge::SecondaryStore;

pub(crate) const PATTERNS_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("triage_patterns");

/// Key separator between user id and normalized query.
const KEY_SEP: char = '\u{1f}';

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriagePattern {
    pub query: String,
    pub intent: String,
    pub priority: String,
    pub embedding: Option<Vec<f32>>,
    pub confidence: f64,
    pub use_count: u64,
    pub created_at: String,
}

/// Per-user view over the shared secondary store.
#[derive(Clone)]
pub struct PatternStore {
    store: Arc<SecondaryStore>,
    user_id: String,
}

impl PatternStore {
    pub fn new(store: Arc<SecondaryStore>, user_id: impl Into<String>) -> Self {
        Self {
            store,
            user_id: user_id.into(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    fn key(&self, normalized: &str) -> String {
        format!("{}{}{}", self.user_id, KEY_SEP, normalized)
    }

    fn normalize(query: &str) -> String {
        query.to_lowercase().trim().to_string()
    }

    /// Upsert: the first insertion sets every field; subsequent captures of
    /// the same query only bump `use_count`.
    pub fn store_pattern(
        &self,
        query: &str,
        intent: &str,
        priority: &str,
        embedding: Option<Vec<f32>>,
        confidence: f64,
    ) -> bool {
        let normalized = Self::normalize(query);
        let key = self.key(&normalized);

        let result = self.store.with_write(PATTERNS_TABLE, |table| {
            let existing = table
                .get(key.as_str())?
                .map(|guard| serde_json::from_slice::<TriagePattern>(guard.value()));

            let pattern = match existing {
                Some(Ok(mut pattern)) => {
                    pattern.use_count += 1;
                    pattern
                }
                _ => TriagePattern {
                    query: normalized.clone(),
                    intent: intent.to_string(),
                    priority: priority.to_string(),
                    embedding,
                    confidence,
                    use_count: 1,
                    created_at: chrono::Utc::now().to_rfc3339(),
                },
            };

            let bytes = serde_json::to_vec(&pattern)
                .map_err(|e| redb::StorageError::Corrupted(e.to_string()))?;
            table.insert(key.as_str(), bytes.as_slice())?;
            Ok(())
        });

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "failed to store triage pattern");
                false
            }
        }
    }

    /// Exact lookup by normalized query.
    pub fn find(&self, query: &str) -> Option<TriagePattern> {
        let key = self.key(&Self::normalize(query));
        self.store
            .with_read(PATTERNS_TABLE, |table| {
                Ok(table
                    .get(key.as_str())?
                    .and_then(|guard| serde_json::from_slice(guard.value()).ok()))
            })
            .unwrap_or_else(|e| {
                warn!(error = %e, "pattern lookup failed");
                None
            })
    }

    /// Implicit positive feedback: +0.1 up to 0.8, never reaching the
    /// user-confirmed 1.0.
    pub fn confirm(&self, query: &str) -> bool {
        let key = self.key(&Self::normalize(query));
        let result = self.store.with_write(PATTERNS_TABLE, |table| {
            let Some(mut pattern) = table
                .get(key.as_str())?
                .and_then(|guard| serde_json::from_slice::<TriagePattern>(guard.value()).ok())
            else {
                return Ok(false);
            };
            if pattern.confidence >= 0.8 {
                return Ok(false);
            }
            pattern.confidence = (pattern.confidence + 0.1).min(0.8);
            pattern.use_count += 1;
            let bytes = serde_json::to_vec(&pattern)
                .map_err(|e| redb::StorageError::Corrupted(e.to_string()))?;
            table.insert(key.as_str(), bytes.as_slice())?;
            Ok(true)
        });

        result.unwrap_or_else(|e| {
            warn!(error = %e, "pattern confirmation failed");
            false
        })
    }

    /// Explicit user feedback.  A matching classification gains confidence
    /// (capped at 1.0); a mismatch is overwritten with the corrected values
    /// at confidence 1.0; a missing pattern is created at 1.0.
    pub fn provide_feedback(&self, query: &str, intent: &str, priority: &str) -> bool {
        let normalized = Self::normalize(query);
        let key = self.key(&normalized);
        let result = self.store.with_write(PATTERNS_TABLE, |table| {
            let existing = table
                .get(key.as_str())?
                .and_then(|guard| serde_json::from_slice::<TriagePattern>(guard.value()).ok());

            let pattern = match existing {
                Some(mut pattern) if pattern.intent == intent && pattern.priority == priority => {
                    pattern.confidence = (pattern.confidence + 0.1).min(1.0);
                    pattern.use_count += 1;
                    pattern
                }
                Some(mut pattern) => {
                    pattern.intent = intent.to_string();
                    pattern.priority = priority.to_string();
                    pattern.confidence = 1.0;
                    pattern
                }
                None => TriagePattern {
                    query: normalized.clone(),
                    intent: intent.to_string(),
                    priority: priority.to_string(),
                    embedding: None,
                    confidence: 1.0,
                    use_count: 1,
                    created_at: chrono::Utc::now().to_rfc3339(),
                },
            };

            let bytes = serde_json::to_vec(&pattern)
                .map_err(|e| redb::StorageError::Corrupted(e.to_string()))?;
            table.insert(key.as_str(), bytes.as_slice())?;
            Ok(())
        });

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "pattern feedback failed");
                false
            }
        }
    }

    /// Pattern counts for this user, total and per intent.
    pub fn stats(&self) -> (u64, std::collections::BTreeMap<String, u64>) {
        let prefix = format!("{}{}", self.user_id, KEY_SEP);
        self.store
            .with_read(PATTERNS_TABLE, |table| {
                let mut total = 0u64;
                let mut by_intent = std::collections::BTreeMap::new();
                for entry in table.iter()? {
                    let (key, value) = entry?;
                    if !key.value().starts_with(&prefix) {
                        continue;
                    }
                    if let Ok(pattern) = serde_json::from_slice::<TriagePattern>(value.value()) {
                        total += 1;
                        *by_intent.entry(pattern.intent).or_insert(0) += 1;
                    }
                }
                Ok((total, by_intent))
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::SecondaryStore;

    fn store() -> PatternStore {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patterns.redb");
        // Leak the tempdir so the file outlives the test body.
        std::mem::forget(dir);
        PatternStore::new(Arc::new(SecondaryStore::open(path).unwrap()), "alice")
    }

    #[test]
    fn first_capture_sets_all_later_captures_bump_use_count() {
        let patterns = store();
        assert!(patterns.store_pattern("List Hosts", "query", "P3", None, 0.5));
        assert!(patterns.store_pattern("list hosts  ", "action", "P0", None, 0.9));

        let found = patterns.find("LIST HOSTS").unwrap();
        // Second capture must not have overwritten the classification.
        assert_eq!(found.intent, "query");
        assert_eq!(found.priority, "P3");
        assert!((found.confidence - 0.5).abs() < 1e-9);
        assert_eq!(found.use_count, 2);
    }

    #[test]
    fn implicit_validation_caps_at_point_eight() {
        let patterns = store();
        patterns.store_pattern("restart nginx", "action", "P2", None, 0.5);
        for _ in 0..6 {
            patterns.confirm("restart nginx");
        }
        let found = patterns.find("restart nginx").unwrap();
        assert!((found.confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn explicit_feedback_reaches_one() {
        let patterns = store();
        patterns.store_pattern("deploy app", "query", "P3", None, 0.5);
        patterns.provide_feedback("deploy app", "action", "P2");

        let found = patterns.find("deploy app").unwrap();
        assert_eq!(found.intent, "action");
        assert_eq!(found.priority, "P2");
        assert!((found.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn users_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patterns.redb");
        let secondary = Arc::new(SecondaryStore::open(&path).unwrap());
        let alice = PatternStore::new(Arc::clone(&secondary), "alice");
        let bob = PatternStore::new(secondary, "bob");

        alice.store_pattern("list hosts", "query", "P3", None, 0.5);
        assert!(alice.find("list hosts").is_some());
        assert!(bob.find("list hosts").is_none());

        let (total, by_intent) = alice.stats();
        assert_eq!(total, 1);
        assert_eq!(by_intent["query"], 1);
    }
}
