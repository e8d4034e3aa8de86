//! Inventory intake: the multi-format parser and the host-relation
//! classifier.

mod model;
pub mod parser;
mod relations;

pub use model::{ParseResult, ParsedHost};
pub use parser::{InventoryParser, LlmFallbackOptions, SourceFormat, detect_format};
pub use relations::{
    ExistingRelation, HostFacts, RELATION_TYPES, RelationClassifier, RelationSuggestion,
    SYMMETRIC_TYPES, extract_json_array,
};
