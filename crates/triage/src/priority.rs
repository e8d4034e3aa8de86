//! Priority and intent definitions for incident triage.
//!
//! P0 = CRITICAL: production down, data loss, security breach.
//! P1 = URGENT: service degraded, vulnerability, imminent failure.
//! P2 = IMPORTANT: performance issues, non-critical failures.
//! P3 = NORMAL: maintenance, improvements, monitoring checks.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Request intent: what kind of operation the user wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    /// Information request, read-only ("list hosts", "show me").
    Query,
    /// Execute commands or make changes ("restart nginx").
    Action,
    /// Deep investigation requiring multiple steps ("why is mongo slow").
    Analysis,
}

impl Intent {
    pub const ALL: [Intent; 3] = [Intent::Query, Intent::Action, Intent::Analysis];

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Query => "query",
            Intent::Action => "action",
            Intent::Analysis => "analysis",
        }
    }

    /// Tools allowed for this intent.  `None` means all tools.
    pub fn allowed_tools(&self) -> Option<&'static [&'static str]> {
        match self {
            Intent::Query => Some(&["list_hosts", "get_infrastructure_context", "recall_skill"]),
            Intent::Action | Intent::Analysis => None,
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Intent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "query" => Ok(Intent::Query),
            "action" => Ok(Intent::Action),
            "analysis" => Ok(Intent::Analysis),
            other => Err(format!("unknown intent: {other}")),
        }
    }
}

/// Incident priority.  Declaration order gives `P0 < P3`, so "more urgent"
/// compares as smaller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    P0,
    P1,
    P2,
    P3,
}

impl Priority {
    pub const ALL: [Priority; 4] = [Priority::P0, Priority::P1, Priority::P2, Priority::P3];

    pub fn label(&self) -> &'static str {
        match self {
            Priority::P0 => "CRITICAL",
            Priority::P1 => "URGENT",
            Priority::P2 => "IMPORTANT",
            Priority::P3 => "NORMAL",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Priority::P0 => "P0",
            Priority::P1 => "P1",
            Priority::P2 => "P2",
            Priority::P3 => "P3",
        }
    }

    /// Suggested response time in seconds.
    pub fn response_time_secs(&self) -> u64 {
        match self {
            Priority::P0 => 60,
            Priority::P1 => 300,
            Priority::P2 => 3600,
            Priority::P3 => 86_400,
        }
    }

    /// One level more urgent, saturating at P0.
    pub fn escalated(&self) -> Priority {
        match self {
            Priority::P0 | Priority::P1 => Priority::P0,
            Priority::P2 => Priority::P1,
            Priority::P3 => Priority::P2,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "P0" => Ok(Priority::P0),
            "P1" => Ok(Priority::P1),
            "P2" => Ok(Priority::P2),
            "P3" => Ok(Priority::P3),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// Result of priority classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorityResult {
    pub priority: Priority,
    /// 0.0 to 1.0.
    pub confidence: f64,
    pub signals: Vec<String>,
    pub reasoning: String,
    pub escalation_required: bool,
    pub environment_detected: Option<String>,
    pub service_detected: Option<String>,
    pub host_detected: Option<String>,
}

impl PriorityResult {
    pub fn suggested_response_time(&self) -> u64 {
        self.priority.response_time_secs()
    }
}

/// Combined triage outcome: intent + priority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageResult {
    pub intent: Intent,
    #[serde(flatten)]
    pub priority: PriorityResult,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_puts_critical_first() {
        assert!(Priority::P0 < Priority::P1);
        assert!(Priority::P2 < Priority::P3);
        assert_eq!(Priority::P3.escalated(), Priority::P2);
        assert_eq!(Priority::P0.escalated(), Priority::P0);
    }

    #[test]
    fn round_trip_from_str() {
        for p in Priority::ALL {
            assert_eq!(p.name().parse::<Priority>().unwrap(), p);
        }
        for i in Intent::ALL {
            assert_eq!(i.as_str().parse::<Intent>().unwrap(), i);
        }
    }

    #[test]
    fn query_intent_restricts_tools() {
        assert!(Intent::Query.allowed_tools().unwrap().contains(&"list_hosts"));
        assert!(Intent::Action.allowed_tools().is_none());
    }
}
