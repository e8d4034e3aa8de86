//! Store error taxonomy.

use std::collections::BTreeMap;

use thiserror::Error;

/// Errors surfaced by the persistence layer.
///
/// Every multi-row mutation either commits fully or rolls back; a
/// `Persistence` error never leaves partial state behind.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("persistence error during {operation}: {reason}")]
    Persistence {
        operation: String,
        reason: String,
        details: BTreeMap<String, serde_json::Value>,
    },

    #[error("{entity} not found: {name}")]
    NotFound { entity: &'static str, name: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl StoreError {
    pub fn persistence(
        operation: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Persistence {
            operation: operation.into(),
            reason: reason.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn persistence_with(
        operation: impl Into<String>,
        reason: impl Into<String>,
        details: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        Self::Persistence {
            operation: operation.into(),
            reason: reason.into(),
            details,
        }
    }

    pub fn not_found(entity: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            name: name.into(),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::persistence("query", err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
