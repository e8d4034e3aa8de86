//! Configuration for Athena.
//!
//! Loaded from `~/.athena/config.toml` with environment-variable overrides.
//! Every section has serde defaults so a partial (or missing) file is valid.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    /// Fast model used for command corrections and extraction tasks.
    pub correction_model: String,
    pub base_url: String,
    /// Caller-side deadline for a single LLM call, in seconds.  The call
    /// itself is not aborted on expiry; the router returns a timeout error
    /// and logs the orphaned completion.
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            model: "llama3.1:8b".to_string(),
            correction_model: "llama3.2:3b".to_string(),
            base_url: "http://localhost:11434".to_string(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    pub token_limit: u64,
    /// Fraction of `token_limit` at which a compaction warning is raised.
    pub compact_threshold: f64,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            token_limit: 100_000,
            compact_threshold: 0.8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectorConfig {
    pub max_retries: u32,
}

impl Default for CorrectorConfig {
    fn default() -> Self {
        Self { max_retries: 2 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Age after which persisted local context is considered stale.
    pub ttl_hours: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self { ttl_hours: 12 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationConfig {
    pub min_confidence: f64,
    pub use_llm: bool,
}

impl Default for RelationConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            use_llm: true,
        }
    }
}

/// Gate flags and limits for the inventory LLM fallback parser.
///
/// Both flags default to `false`: the fallback never runs unless the operator
/// has explicitly enabled it *and* acknowledged that their LLM provider meets
/// their compliance requirements.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InventoryLlmConfig {
    pub enable_llm_fallback: bool,
    pub llm_compliance_acknowledged: bool,
    /// Characters of sanitized content sent to the LLM.  `0` disables
    /// truncation.
    pub content_limit: usize,
}

impl Default for InventoryLlmConfig {
    fn default() -> Self {
        Self {
            enable_llm_fallback: false,
            llm_compliance_acknowledged: false,
            content_limit: 8000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path of the single relational store.  Empty = `~/.athena/inventory.db`.
    pub db_path: String,
    /// Path of the secondary (pattern/knowledge) store.  Empty =
    /// `~/.athena/knowledge.redb`.
    pub secondary_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: String::new(),
            secondary_path: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Upper bound on tool-loop rounds before a text answer is forced.
    pub max_consecutive_auto_reply: u32,
    /// Response language for user-facing rendering ("en" or "fr").
    pub language: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_consecutive_auto_reply: 30,
            language: "en".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub conversation: ConversationConfig,
    pub corrector: CorrectorConfig,
    pub scanner: ScannerConfig,
    pub relations: RelationConfig,
    pub inventory: InventoryLlmConfig,
    pub storage: StorageConfig,
    pub runtime: RuntimeConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    /// Directory holding all Athena state (`~/.athena`).
    pub fn data_dir() -> PathBuf {
        dirs_home().join(".athena")
    }

    pub fn default_config_path() -> PathBuf {
        Self::data_dir().join("config.toml")
    }

    pub fn load() -> Result<Self> {
        Self::load_from(Self::default_config_path())
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    /// Environment variables take precedence over the config file.
    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_bool("ATHENA_ENABLE_LLM_FALLBACK") {
            self.inventory.enable_llm_fallback = v;
        }
        if let Some(v) = env_bool("ATHENA_LLM_COMPLIANCE_ACKNOWLEDGED") {
            self.inventory.llm_compliance_acknowledged = v;
        }
        if let Ok(raw) = env::var("ATHENA_LLM_TIMEOUT") {
            match raw.parse::<u64>() {
                Ok(secs) => self.llm.timeout_secs = secs,
                Err(_) => warn!(
                    value = %raw,
                    "invalid ATHENA_LLM_TIMEOUT, keeping {}s",
                    self.llm.timeout_secs
                ),
            }
        }
        if let Ok(raw) = env::var("ATHENA_LLM_CONTENT_LIMIT") {
            match raw.parse::<usize>() {
                Ok(limit) => self.inventory.content_limit = limit,
                Err(_) => warn!(value = %raw, "invalid ATHENA_LLM_CONTENT_LIMIT, ignoring"),
            }
        }
        if let Ok(url) = env::var("OLLAMA_BASE_URL") {
            if !url.is_empty() {
                self.llm.base_url = url;
            }
        }
        if let Ok(model) = env::var("OLLAMA_MODEL") {
            if !model.is_empty() {
                self.llm.model = model;
            }
        }
        if let Ok(db) = env::var("ATHENA_DB_PATH") {
            if !db.is_empty() {
                self.storage.db_path = db;
            }
        }
    }

    /// Resolved path of the relational store.
    pub fn db_path(&self) -> PathBuf {
        if self.storage.db_path.is_empty() {
            Self::data_dir().join("inventory.db")
        } else {
            PathBuf::from(&self.storage.db_path)
        }
    }

    /// Resolved path of the secondary (redb) store.
    pub fn secondary_path(&self) -> PathBuf {
        if self.storage.secondary_path.is_empty() {
            Self::data_dir().join("knowledge.redb")
        } else {
            PathBuf::from(&self.storage.secondary_path)
        }
    }
}

fn dirs_home() -> PathBuf {
    env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn env_bool(key: &str) -> Option<bool> {
    env::var(key).ok().map(|v| v.eq_ignore_ascii_case("true"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_safe() {
        let cfg = AppConfig::default();
        assert!(!cfg.inventory.enable_llm_fallback);
        assert!(!cfg.inventory.llm_compliance_acknowledged);
        assert_eq!(cfg.inventory.content_limit, 8000);
        assert_eq!(cfg.llm.timeout_secs, 60);
        assert_eq!(cfg.conversation.token_limit, 100_000);
        assert!((cfg.conversation.compact_threshold - 0.8).abs() < f64::EPSILON);
        assert_eq!(cfg.corrector.max_retries, 2);
        assert_eq!(cfg.scanner.ttl_hours, 12);
        assert!((cfg.relations.min_confidence - 0.5).abs() < f64::EPSILON);
        assert!(cfg.relations.use_llm);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[conversation]\ntoken_limit = 5000\n").unwrap();

        let cfg = AppConfig::load_from(&path).unwrap();
        assert_eq!(cfg.conversation.token_limit, 5000);
        // Untouched sections keep their defaults.
        assert_eq!(cfg.corrector.max_retries, 2);
    }

    #[test]
    fn round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut cfg = AppConfig::default();
        cfg.runtime.language = "fr".to_string();
        cfg.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.runtime.language, "fr");
    }
}
