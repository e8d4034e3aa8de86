//! Triage pipeline: priority/intent classification, behavior profiles, and
//! error analysis for the execution retry loop.

mod behavior;
mod classifier;
mod error_analyzer;
mod priority;
mod signals;
mod smart;

pub use behavior::{
    BehaviorProfile, ConfirmationMode, ResponseFormat, describe_behavior, get_behavior,
};
pub use classifier::{PriorityClassifier, SystemState};
pub use error_analyzer::{
    CLASSIFICATION_THRESHOLD, Embedder, EmbeddingCache, ErrorAnalysis, ErrorAnalyzer, ErrorKind,
    cosine_similarity, should_retry,
};
pub use priority::{Intent, Priority, PriorityResult, TriageResult};
pub use signals::{SignalDetector, SignalReport};
pub use smart::{SmartClassifier, get_smart_classifier, reset_smart_classifier};
