//! Error classification for the execution retry loop.
//!
//! Two tiers: an optional semantic tier that compares the error against
//! reference phrases through a pluggable [`Embedder`], and a keyword tier
//! used as the fallback (and the default, since no embedder ships in the
//! box).  Both feed the same [`ErrorAnalysis`] shape.

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::sync::Mutex;

use lru::LruCache;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Classified error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Credential,
    Connection,
    Permission,
    NotFound,
    Timeout,
    Resource,
    Configuration,
    Unknown,
}

impl ErrorKind {
    pub const CLASSIFIABLE: [ErrorKind; 7] = [
        ErrorKind::Credential,
        ErrorKind::Connection,
        ErrorKind::Permission,
        ErrorKind::NotFound,
        ErrorKind::Timeout,
        ErrorKind::Resource,
        ErrorKind::Configuration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Credential => "credential",
            ErrorKind::Connection => "connection",
            ErrorKind::Permission => "permission",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Resource => "resource",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Unknown => "unknown",
        }
    }

    pub fn suggested_action(&self) -> &'static str {
        match self {
            ErrorKind::Credential => "Verify credentials or provide authentication",
            ErrorKind::Connection => "Check network connectivity and host availability",
            ErrorKind::Permission => "Check user permissions or run with elevated privileges",
            ErrorKind::NotFound => "Verify the resource path or name exists",
            ErrorKind::Timeout => "Increase timeout or check service responsiveness",
            ErrorKind::Resource => "Free up system resources (disk, memory)",
            ErrorKind::Configuration => "Review configuration syntax and values",
            ErrorKind::Unknown => "Review the error message for more details",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "credential" => Ok(ErrorKind::Credential),
            "connection" => Ok(ErrorKind::Connection),
            "permission" => Ok(ErrorKind::Permission),
            "not_found" => Ok(ErrorKind::NotFound),
            "timeout" => Ok(ErrorKind::Timeout),
            "resource" => Ok(ErrorKind::Resource),
            "configuration" => Ok(ErrorKind::Configuration),
            "unknown" => Ok(ErrorKind::Unknown),
            other => Err(format!("unknown error kind: {other}")),
        }
    }
}

/// Result of error analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorAnalysis {
    pub kind: ErrorKind,
    pub confidence: f64,
    pub needs_credentials: bool,
    pub suggested_action: String,
    pub matched_pattern: Option<String>,
}

/// Classification threshold shared by both tiers.
pub const CLASSIFICATION_THRESHOLD: f64 = 0.6;

fn keyword_patterns() -> &'static [(ErrorKind, &'static [&'static str])] {
    &[
        (
            ErrorKind::Credential,
            &[
                "authentication failed",
                "access denied",
                "invalid password",
                "login failed",
                "unauthorized",
                "permission denied (publickey",
                "password authentication failed",
                "invalid credentials",
                "invalid api key",
                "token expired",
            ],
        ),
        (
            ErrorKind::Connection,
            &[
                "connection refused",
                "connection timed out",
                "no route to host",
                "network is unreachable",
                "could not resolve",
                "unable to connect",
                "econnrefused",
                "ehostunreach",
            ],
        ),
        (
            ErrorKind::Permission,
            &[
                "permission denied",
                "operation not permitted",
                "insufficient privileges",
                "403 forbidden",
                "read-only file system",
                "eacces",
                "eperm",
            ],
        ),
        (
            ErrorKind::NotFound,
            &[
                "no such file",
                "file not found",
                "command not found",
                "404 not found",
                "enoent",
                "does not exist",
            ],
        ),
        (
            ErrorKind::Timeout,
            &["timed out", "timeout", "deadline exceeded"],
        ),
        (
            ErrorKind::Resource,
            &[
                "no space left",
                "out of memory",
                "cannot allocate",
                "too many open files",
                "disk full",
            ],
        ),
        (
            ErrorKind::Configuration,
            &[
                "syntax error",
                "invalid configuration",
                "parse error",
                "invalid value",
                "unknown option",
            ],
        ),
    ]
}

fn reference_phrases() -> &'static [(ErrorKind, &'static [&'static str])] {
    &[
        (
            ErrorKind::Credential,
            &[
                "Permission denied (publickey,password)",
                "Authentication failed",
                "Invalid password",
                "Login incorrect",
                "Incorrect username or password",
                "Credentials are invalid",
                "FATAL: password authentication failed",
                "Access denied for user",
                "Token expired",
                "401 Unauthorized",
            ],
        ),
        (
            ErrorKind::Connection,
            &[
                "Connection refused",
                "No route to host",
                "Network is unreachable",
                "Connection reset by peer",
                "Could not resolve hostname",
                "Name or service not known",
                "Failed to establish connection",
                "Remote host closed connection",
                "SSH connection failed",
            ],
        ),
        (
            ErrorKind::Permission,
            &[
                "Permission denied",
                "Operation not permitted",
                "Insufficient privileges",
                "sudo required",
                "must be root",
                "read-only file system",
                "403 Forbidden",
            ],
        ),
        (
            ErrorKind::NotFound,
            &[
                "No such file or directory",
                "Command not found",
                "Module not found",
                "Package not found",
                "404 Not Found",
                "Unknown host",
            ],
        ),
        (
            ErrorKind::Timeout,
            &[
                "Operation timed out",
                "Read timed out",
                "504 Gateway Timeout",
                "Deadline exceeded",
                "Execution expired",
            ],
        ),
        (
            ErrorKind::Resource,
            &[
                "No space left on device",
                "Out of memory",
                "Cannot allocate memory",
                "Too many open files",
                "Quota exceeded",
            ],
        ),
        (
            ErrorKind::Configuration,
            &[
                "Syntax error",
                "Invalid configuration",
                "Parse error",
                "Unexpected token",
                "Missing required",
            ],
        ),
    ]
}

/// Text → dense vector.  Implementations are expected to be deterministic;
/// the analyzer caches aggressively.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Vec<f32>;
}

/// LRU cache in front of an [`Embedder`], capped to keep memory bounded.
pub struct EmbeddingCache {
    embedder: Box<dyn Embedder>,
    cache: Mutex<LruCache<String, Vec<f32>>>,
}

const EMBEDDING_CACHE_CAPACITY: usize = 1000;

impl EmbeddingCache {
    pub fn new(embedder: Box<dyn Embedder>) -> Self {
        Self {
            embedder,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(EMBEDDING_CACHE_CAPACITY).expect("non-zero capacity"),
            )),
        }
    }

    pub fn get(&self, text: &str) -> Vec<f32> {
        let key = text.trim().to_lowercase();
        if let Some(hit) = self.cache.lock().expect("embedding cache lock").get(&key) {
            return hit.clone();
        }
        let embedding = self.embedder.embed(text);
        self.cache
            .lock()
            .expect("embedding cache lock")
            .put(key, embedding.clone());
        embedding
    }
}

/// Cosine similarity with zero-norm protection: a zero vector on either
/// side scores 0 rather than dividing by zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

pub struct ErrorAnalyzer {
    embeddings: Option<EmbeddingCache>,
    /// Reference embeddings per kind, computed lazily on first use.
    reference_cache: Mutex<HashMap<ErrorKind, Vec<(String, Vec<f32>)>>>,
}

impl Default for ErrorAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorAnalyzer {
    /// Keyword-only analyzer.
    pub fn new() -> Self {
        Self {
            embeddings: None,
            reference_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Analyzer with a semantic tier.
    pub fn with_embedder(embedder: Box<dyn Embedder>) -> Self {
        Self {
            embeddings: Some(EmbeddingCache::new(embedder)),
            reference_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn analyze(&self, error_text: &str) -> ErrorAnalysis {
        if error_text.trim().is_empty() {
            return unknown_analysis(0.0);
        }

        let semantic = self.semantic_scores(error_text);
        if let Some(scores) = semantic {
            let best = scores
                .into_iter()
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
            if let Some((kind, score, pattern)) = best {
                if score >= CLASSIFICATION_THRESHOLD {
                    return ErrorAnalysis {
                        kind,
                        confidence: score,
                        needs_credentials: kind == ErrorKind::Credential,
                        suggested_action: kind.suggested_action().to_string(),
                        matched_pattern: Some(pattern),
                    };
                }
                return unknown_analysis(score);
            }
        }

        // Keyword tier.
        let (kind, confidence, matched) = keyword_match(error_text);
        if confidence >= CLASSIFICATION_THRESHOLD {
            return ErrorAnalysis {
                kind,
                confidence,
                needs_credentials: kind == ErrorKind::Credential,
                suggested_action: kind.suggested_action().to_string(),
                matched_pattern: matched,
            };
        }
        unknown_analysis(0.0)
    }

    /// Quick credential check used by the executor's auth prompt path.
    pub fn needs_credentials(&self, error_text: &str) -> bool {
        let analysis = self.analyze(error_text);
        analysis.needs_credentials && analysis.confidence >= CLASSIFICATION_THRESHOLD
    }

    /// Per-kind (score, best pattern) from the semantic tier; `None` when
    /// no embedder is wired.
    fn semantic_scores(&self, error_text: &str) -> Option<Vec<(ErrorKind, f64, String)>> {
        let embeddings = self.embeddings.as_ref()?;
        let query = embeddings.get(error_text);
        if query.iter().all(|v| *v == 0.0) {
            warn!("query embedding has zero norm, falling back to keyword tier");
            return None;
        }

        let mut scores = Vec::new();
        for kind in ErrorKind::CLASSIFIABLE {
            let references = self.reference_embeddings(kind, embeddings);
            let mut best: Option<(f64, &str)> = None;
            for (phrase, embedding) in &references {
                let score = cosine_similarity(&query, embedding);
                if best.is_none_or(|(current, _)| score > current) {
                    best = Some((score, phrase));
                }
            }
            if let Some((score, phrase)) = best {
                scores.push((kind, score, phrase.to_string()));
            }
        }
        Some(scores)
    }

    fn reference_embeddings(
        &self,
        kind: ErrorKind,
        embeddings: &EmbeddingCache,
    ) -> Vec<(String, Vec<f32>)> {
        let mut cache = self.reference_cache.lock().expect("reference cache lock");
        cache
            .entry(kind)
            .or_insert_with(|| {
                reference_phrases()
                    .iter()
                    .find(|(k, _)| *k == kind)
                    .map(|(_, phrases)| {
                        phrases
                            .iter()
                            .map(|p| ((*p).to_string(), embeddings.get(p)))
                            .filter(|(_, e)| e.iter().any(|v| *v != 0.0))
                            .collect()
                    })
                    .unwrap_or_default()
            })
            .clone()
    }
}

fn keyword_match(error_text: &str) -> (ErrorKind, f64, Option<String>) {
    let lowered = error_text.to_lowercase();
    let mut best = (ErrorKind::Unknown, 0.0f64, None);

    for (kind, keywords) in keyword_patterns() {
        for keyword in *keywords {
            if lowered.contains(keyword) {
                // Longer matches carry more signal.
                let confidence = (0.7 + keyword.len() as f64 / 100.0).min(0.9);
                if confidence > best.1 {
                    best = (*kind, confidence, Some((*keyword).to_string()));
                }
            }
        }
    }
    best
}

fn unknown_analysis(confidence: f64) -> ErrorAnalysis {
    ErrorAnalysis {
        kind: ErrorKind::Unknown,
        confidence,
        needs_credentials: false,
        suggested_action: ErrorKind::Unknown.suggested_action().to_string(),
        matched_pattern: None,
    }
}

/// Whether a failed command is worth retrying with a rewritten command.
///
/// Connection/timeout/credential/resource failures are never retried (no
/// command rewrite can fix them); permission/not-found/configuration are.
/// Low-confidence classifications fall back to the exit code.
pub fn should_retry(kind: ErrorKind, confidence: f64, exit_code: Option<i32>) -> bool {
    if confidence < CLASSIFICATION_THRESHOLD {
        return matches!(exit_code, Some(1) | Some(126) | Some(127));
    }
    match kind {
        ErrorKind::Connection | ErrorKind::Timeout | ErrorKind::Credential | ErrorKind::Resource => {
            false
        }
        ErrorKind::Permission | ErrorKind::NotFound | ErrorKind::Configuration => true,
        ErrorKind::Unknown => matches!(exit_code, Some(1) | Some(126) | Some(127)),
    }
}
