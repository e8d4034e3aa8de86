//! Priority classifier: keyword signals + environment amplifier + impact
//! multiplier + optional system-state escalation.  No LLM involved; the
//! whole pass is pattern matching.

use serde::{Deserialize, Serialize};

use crate::priority::{Priority, PriorityResult};
use crate::signals::SignalDetector;

/// Optional live metrics passed alongside the query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemState {
    pub host_accessible: Option<bool>,
    pub critical_service_down: Option<bool>,
    pub disk_usage_percent: Option<f64>,
    pub memory_usage_percent: Option<f64>,
    pub load_per_cpu: Option<f64>,
}

#[derive(Debug, Default)]
pub struct PriorityClassifier {
    detector: SignalDetector,
}

impl PriorityClassifier {
    pub fn new() -> Self {
        Self {
            detector: SignalDetector::new(),
        }
    }

    pub fn classify(&self, query: &str, system_state: Option<&SystemState>) -> PriorityResult {
        let report = self.detector.detect_all(query);

        let mut priority = report.keyword_priority;
        let mut confidence = report.keyword_confidence;
        let mut signals = report.keyword_signals.clone();

        // Environment amplifier: production floors priority at P1.
        if let Some(env) = &report.environment {
            signals.push(format!("env:{env}"));
            if let Some(min) = report.env_min_priority {
                if priority > min {
                    priority = min;
                    signals.push("prod_escalation".to_string());
                    confidence = (confidence + 0.1).min(0.95);
                }
            }
        }

        // Impact multiplier can escalate one level.
        if report.impact_multiplier > 1.0 {
            signals.push(format!("impact:{:.1}x", report.impact_multiplier));
            if report.impact_multiplier >= 1.5 && priority > Priority::P0 {
                priority = priority.escalated();
                confidence = (confidence + 0.1).min(0.95);
            }
        }

        // System state overrides when it indicates something more urgent.
        if let Some(state) = system_state {
            if let Some(state_priority) = check_system_state(state) {
                if state_priority < priority {
                    priority = state_priority;
                    signals.push(format!("system_state:{}", state_priority.name()));
                    confidence = confidence.max(0.85);
                }
            }
        }

        let reasoning = build_reasoning(priority, &signals, report.environment.as_deref(), report.impact_multiplier);

        PriorityResult {
            priority,
            confidence,
            signals,
            reasoning,
            escalation_required: priority == Priority::P0,
            environment_detected: report.environment,
            service_detected: report.service,
            host_detected: report.host,
        }
    }
}

fn check_system_state(state: &SystemState) -> Option<Priority> {
    if state.host_accessible == Some(false) {
        return Some(Priority::P0);
    }
    if state.critical_service_down == Some(true) {
        return Some(Priority::P0);
    }
    if let Some(disk) = state.disk_usage_percent {
        if disk > 95.0 {
            return Some(Priority::P1);
        }
        if disk > 90.0 {
            return Some(Priority::P2);
        }
    }
    if let Some(memory) = state.memory_usage_percent {
        if memory > 95.0 {
            return Some(Priority::P1);
        }
        if memory > 90.0 {
            return Some(Priority::P2);
        }
    }
    if let Some(load) = state.load_per_cpu {
        if load > 2.0 {
            return Some(Priority::P1);
        }
        if load > 1.0 {
            return Some(Priority::P2);
        }
    }
    None
}

fn build_reasoning(
    priority: Priority,
    signals: &[String],
    environment: Option<&str>,
    impact_multiplier: f64,
) -> String {
    let mut parts = vec![match priority {
        Priority::P0 => "Critical indicators detected".to_string(),
        Priority::P1 => "Urgent indicators detected".to_string(),
        Priority::P2 => "Performance/non-critical indicators".to_string(),
        Priority::P3 => "Standard priority request".to_string(),
    }];

    match environment {
        Some("prod") => parts.push("production environment".to_string()),
        Some("staging") | Some("preprod") => parts.push("staging environment".to_string()),
        _ => {}
    }
    if impact_multiplier > 1.0 {
        parts.push("high impact detected".to_string());
    }

    let keywords: Vec<&str> = signals
        .iter()
        .filter_map(|s| {
            let (tag, kw) = s.split_once(':')?;
            matches!(tag, "P0" | "P1" | "P2").then_some(kw)
        })
        .take(2)
        .collect();
    if !keywords.is_empty() {
        parts.push(format!("keywords: {}", keywords.join(", ")));
    }

    parts.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mongodb_down_on_prod_is_p0() {
        let classifier = PriorityClassifier::new();
        let result = classifier.classify("MongoDB is down on prod-db-01", None);

        assert_eq!(result.priority, Priority::P0);
        assert!(result.escalation_required);
        assert_eq!(result.environment_detected.as_deref(), Some("prod"));
        assert_eq!(result.service_detected.as_deref(), Some("mongodb"));
        assert_eq!(result.host_detected.as_deref(), Some("prod-db-01"));
        assert!(result.confidence >= 0.9);
    }

    #[test]
    fn prod_floors_priority_to_p1() {
        let classifier = PriorityClassifier::new();
        let result = classifier.classify("rotate logs on production web servers", None);
        assert_eq!(result.priority, Priority::P1);
        assert!(result.signals.iter().any(|s| s == "prod_escalation"));
    }

    #[test]
    fn impact_escalates_one_level() {
        let classifier = PriorityClassifier::new();
        let result = classifier.classify("api is slow for all users", None);
        // slow → P2, impact ≥ 1.5 → P1.
        assert_eq!(result.priority, Priority::P1);
    }

    #[test]
    fn unreachable_host_state_forces_p0() {
        let classifier = PriorityClassifier::new();
        let state = SystemState {
            host_accessible: Some(false),
            ..SystemState::default()
        };
        let result = classifier.classify("check web-01", Some(&state));
        assert_eq!(result.priority, Priority::P0);
        assert!(result.signals.iter().any(|s| s.starts_with("system_state:")));
    }

    #[test]
    fn disk_thresholds_escalate() {
        let classifier = PriorityClassifier::new();
        let warm = SystemState {
            disk_usage_percent: Some(92.0),
            ..SystemState::default()
        };
        assert_eq!(
            classifier.classify("check disk", Some(&warm)).priority,
            Priority::P2
        );
        let hot = SystemState {
            disk_usage_percent: Some(97.0),
            ..SystemState::default()
        };
        assert_eq!(
            classifier.classify("check disk", Some(&hot)).priority,
            Priority::P1
        );
    }

    #[test]
    fn plain_request_is_p3() {
        let classifier = PriorityClassifier::new();
        let result = classifier.classify("tidy up the dev sandbox tomorrow", None);
        assert_eq!(result.priority, Priority::P3);
        assert!(!result.escalation_required);
    }
}
