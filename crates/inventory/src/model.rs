//! Parser output types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One host extracted from an inventory source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParsedHost {
    pub hostname: String,
    pub ip_address: Option<String>,
    pub aliases: Vec<String>,
    pub environment: Option<String>,
    pub groups: Vec<String>,
    pub role: Option<String>,
    pub service: Option<String>,
    pub ssh_port: u16,
    pub metadata: BTreeMap<String, Value>,
}

impl ParsedHost {
    pub fn named(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into().to_lowercase(),
            ip_address: None,
            aliases: vec![],
            environment: None,
            groups: vec![],
            role: None,
            service: None,
            ssh_port: 22,
            metadata: BTreeMap::new(),
        }
    }
}

/// Result of parsing one inventory source.
#[derive(Debug, Clone, Default)]
pub struct ParseResult {
    pub hosts: Vec<ParsedHost>,
    pub source_type: String,
    pub file_path: Option<String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ParseResult {
    pub fn success(&self) -> bool {
        !self.hosts.is_empty() && self.errors.is_empty()
    }
}
