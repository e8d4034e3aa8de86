//! Smart triage classifier with pattern learning.
//!
//! Layers, in order: a stored pattern with confidence ≥ 0.7 short-circuits
//! classification entirely; otherwise keyword detection, optionally combined
//! with a semantic vote (0.4 keyword / 0.6 semantic); fresh outcomes are
//! captured back into the pattern store at confidence 0.5.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use tracing::{debug, warn};

use athena_memory::{PatternStore, SecondaryStore};

use crate::classifier::{PriorityClassifier, SystemState};
use crate::error_analyzer::{Embedder, EmbeddingCache, cosine_similarity};
use crate::priority::{Intent, Priority, PriorityResult};
use crate::signals::SignalDetector;

/// Stored patterns at or above this confidence short-circuit classification.
const PATTERN_TRUST_THRESHOLD: f64 = 0.7;

fn intent_reference_phrases() -> &'static [(Intent, &'static [&'static str])] {
    &[
        (
            Intent::Query,
            &[
                "what are my servers",
                "list hosts",
                "show me the services",
                "where is the database",
                "quels sont mes serveurs",
                "combien de serveurs",
            ],
        ),
        (
            Intent::Action,
            &[
                "restart the nginx service",
                "check the disk",
                "execute the command",
                "deploy the application",
                "start the container",
                "redémarre le service nginx",
            ],
        ),
        (
            Intent::Analysis,
            &[
                "analyze the performance",
                "why is the service slow",
                "diagnose the problem",
                "investigate the error",
                "troubleshoot the issue",
                "pourquoi le service est lent",
            ],
        ),
    ]
}

pub struct SmartClassifier {
    detector: SignalDetector,
    classifier: PriorityClassifier,
    patterns: Option<PatternStore>,
    embeddings: Option<EmbeddingCache>,
    reference_cache: Mutex<HashMap<Intent, Vec<Vec<f32>>>>,
}

impl SmartClassifier {
    pub fn new(patterns: Option<PatternStore>, embedder: Option<Box<dyn Embedder>>) -> Self {
        Self {
            detector: SignalDetector::new(),
            classifier: PriorityClassifier::new(),
            patterns,
            embeddings: embedder.map(EmbeddingCache::new),
            reference_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Classify intent and priority for a query.
    pub fn classify(
        &self,
        query: &str,
        system_state: Option<&SystemState>,
    ) -> (Intent, PriorityResult) {
        // Layer 1: trusted stored pattern.
        let stored = self.patterns.as_ref().and_then(|p| p.find(query));
        if let Some(pattern) = &stored {
            if pattern.confidence >= PATTERN_TRUST_THRESHOLD {
                match (
                    pattern.intent.parse::<Intent>(),
                    pattern.priority.parse::<Priority>(),
                ) {
                    (Ok(intent), Ok(priority)) => {
                        debug!(query, %intent, %priority, "stored pattern short-circuit");
                        // Still run priority classification for the signals,
                        // then pin the learned priority.
                        let mut result = self.classifier.classify(query, system_state);
                        result.priority = priority;
                        result.escalation_required = priority == Priority::P0;
                        return (intent, result);
                    }
                    _ => {
                        warn!(query, "stored pattern has invalid enum values, reclassifying");
                    }
                }
            }
        }

        // Layer 2: keywords.
        let (keyword_intent, keyword_confidence, _signals) = self.detector.detect_intent(query);

        // Layer 3: semantic vote.
        let semantic = self.semantic_intent_scores(query);
        let intent = combine_intent_scores(keyword_intent, keyword_confidence, &semantic);

        let result = self.classifier.classify(query, system_state);

        // Capture the outcome for learning, at low confidence, once.
        if stored.is_none() {
            if let Some(patterns) = &self.patterns {
                let embedding = self.embeddings.as_ref().map(|cache| cache.get(query));
                patterns.store_pattern(
                    query,
                    intent.as_str(),
                    result.priority.name(),
                    embedding,
                    0.5,
                );
            }
        }

        (intent, result)
    }

    /// Explicit user feedback: sets the pattern to confidence 1.0.
    pub fn provide_feedback(&self, query: &str, intent: Intent, priority: Priority) -> bool {
        self.patterns
            .as_ref()
            .map(|p| p.provide_feedback(query, intent.as_str(), priority.name()))
            .unwrap_or(false)
    }

    /// Implicit validation: the classification was used without correction.
    pub fn confirm_classification(&self, query: &str) -> bool {
        self.patterns
            .as_ref()
            .map(|p| p.confirm(query))
            .unwrap_or(false)
    }

    pub fn pattern_stats(&self) -> Option<(u64, std::collections::BTreeMap<String, u64>)> {
        self.patterns.as_ref().map(|p| p.stats())
    }

    fn semantic_intent_scores(&self, query: &str) -> HashMap<Intent, f64> {
        let Some(embeddings) = &self.embeddings else {
            return HashMap::new();
        };
        let query_embedding = embeddings.get(query);
        if query_embedding.iter().all(|v| *v == 0.0) {
            return HashMap::new();
        }

        let mut scores = HashMap::new();
        for intent in Intent::ALL {
            let references = self.intent_references(intent, embeddings);
            let best = references
                .iter()
                .map(|r| cosine_similarity(&query_embedding, r))
                .fold(0.0f64, f64::max);
            if best > 0.0 {
                scores.insert(intent, best);
            }
        }
        scores
    }

    fn intent_references(&self, intent: Intent, embeddings: &EmbeddingCache) -> Vec<Vec<f32>> {
        let mut cache = self.reference_cache.lock().expect("intent reference lock");
        cache
            .entry(intent)
            .or_insert_with(|| {
                intent_reference_phrases()
                    .iter()
                    .find(|(i, _)| *i == intent)
                    .map(|(_, phrases)| {
                        phrases
                            .iter()
                            .map(|p| embeddings.get(p))
                            .filter(|e| e.iter().any(|v| *v != 0.0))
                            .collect()
                    })
                    .unwrap_or_default()
            })
            .clone()
    }
}

fn combine_intent_scores(
    keyword_intent: Intent,
    keyword_confidence: f64,
    semantic: &HashMap<Intent, f64>,
) -> Intent {
    if semantic.is_empty() {
        return keyword_intent;
    }

    Intent::ALL
        .into_iter()
        .map(|intent| {
            let kw = if intent == keyword_intent {
                keyword_confidence
            } else {
                0.0
            };
            let sem = semantic.get(&intent).copied().unwrap_or(0.0);
            (intent, 0.4 * kw + 0.6 * sem)
        })
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(intent, _)| intent)
        .unwrap_or(keyword_intent)
}

// ── Per-(store, user) instance registry ──────────────────────────────────────

type RegistryKey = (usize, String);

fn registry() -> &'static Mutex<HashMap<RegistryKey, Arc<SmartClassifier>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<RegistryKey, Arc<SmartClassifier>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Get or create the classifier for a `(secondary store, user)` pair.
pub fn get_smart_classifier(
    store: Option<Arc<SecondaryStore>>,
    user_id: &str,
    force_new: bool,
) -> Arc<SmartClassifier> {
    let key = (
        store.as_ref().map(|s| Arc::as_ptr(s) as usize).unwrap_or(0),
        user_id.to_string(),
    );
    let mut registry = registry().lock().expect("classifier registry lock");
    if !force_new {
        if let Some(existing) = registry.get(&key) {
            return Arc::clone(existing);
        }
    }
    let patterns = store.map(|s| PatternStore::new(s, user_id));
    let classifier = Arc::new(SmartClassifier::new(patterns, None));
    registry.insert(key, Arc::clone(&classifier));
    classifier
}

/// Reset cached classifier instances: all of them, or one user's.
pub fn reset_smart_classifier(user_id: Option<&str>) {
    let mut registry = registry().lock().expect("classifier registry lock");
    match user_id {
        None => registry.clear(),
        Some(user) => registry.retain(|(_, u), _| u != user),
    }
}
