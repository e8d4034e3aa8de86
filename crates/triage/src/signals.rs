//! Signal detection for triage classification.
//!
//! Multi-layer detection, all regex/keyword based so the whole pass stays
//! well under 10ms: severity keywords, intent keywords, environment and
//! service/host detection, and impact amplifiers.

use std::sync::OnceLock;

use regex::Regex;

use crate::priority::{Intent, Priority};

const P0_KEYWORDS: &[&str] = &[
    "down",
    "outage",
    "data loss",
    "breach",
    "crashed",
    "unreachable",
    "not responding",
    "corrupted",
    "ransomware",
    "cannot access",
    "emergency",
    "production down",
];

const P1_KEYWORDS: &[&str] = &[
    "degraded",
    "vulnerability",
    "imminent",
    "failing",
    "errors increasing",
    "disk almost full",
    "certificate expiring",
    "security alert",
    "critical warning",
    "about to fail",
];

const P2_KEYWORDS: &[&str] = &[
    "slow",
    "high latency",
    "warning",
    "intermittent",
    "flaky",
    "memory leak",
    "high load",
    "queue growing",
    "performance",
];

const QUERY_KEYWORDS: &[&str] = &[
    "list", "show", "display", "what", "which", "where", "how many", "status of",
    "quels", "combien", "montre", "liste", "affiche",
];

const ACTION_KEYWORDS: &[&str] = &[
    "restart", "stop", "start", "reload", "deploy", "execute", "run", "install",
    "update", "upgrade", "delete", "create", "fix", "check", "rotate", "kill",
    "redémarre", "exécute", "vérifie", "installe",
];

const ANALYSIS_KEYWORDS: &[&str] = &[
    "analyze", "analyse", "why", "diagnose", "investigate", "troubleshoot",
    "debug", "root cause", "pourquoi", "diagnostique",
];

/// (phrase, impact multiplier).  The highest matching multiplier wins.
const IMPACT_PHRASES: &[(&str, f64)] = &[
    ("all users", 1.5),
    ("all servers", 1.5),
    ("everyone", 1.5),
    ("entire", 1.5),
    ("company-wide", 1.5),
    ("widespread", 1.5),
    ("customers", 1.5),
    ("revenue", 1.5),
    ("sla", 1.5),
    ("multiple services", 1.3),
    ("many users", 1.2),
    ("several", 1.2),
];

const KNOWN_SERVICES: &[&str] = &[
    "nginx", "apache", "haproxy", "mysql", "mariadb", "postgresql", "postgres",
    "mongodb", "redis", "memcached", "elasticsearch", "kafka", "rabbitmq",
    "docker", "kubernetes", "jenkins", "prometheus", "grafana", "vault",
];

/// Aliases folded into canonical service names.
const SERVICE_ALIASES: &[(&str, &str)] = &[("mongo", "mongodb"), ("k8s", "kubernetes"), ("pg", "postgresql")];

fn env_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(preprod|production|prod|staging|stage|development|dev)\b")
            .expect("environment regex")
    })
}

fn host_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Hyphenated names whose last segment is numeric: prod-db-01, web-2.
    RE.get_or_init(|| {
        Regex::new(r"\b([a-z][a-z0-9]*(?:-[a-z0-9]+)*-\d+[a-z0-9]*)\b").expect("host regex")
    })
}

/// Boundary-aware substring check: `needle` must not be embedded in a
/// larger alphanumeric token ("down" must not match "shutdown").
fn contains_keyword(text: &str, needle: &str) -> bool {
    let mut start = 0;
    while let Some(pos) = text[start..].find(needle) {
        let at = start + pos;
        let end = at + needle.len();
        let before_ok = at == 0
            || !text[..at]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric());
        let after_ok = end == text.len()
            || !text[end..].chars().next().is_some_and(|c| c.is_alphanumeric());
        if before_ok && after_ok {
            return true;
        }
        start = at + 1;
        if start >= text.len() {
            break;
        }
    }
    false
}

/// Everything the keyword layers found in one pass.
#[derive(Debug, Clone)]
pub struct SignalReport {
    pub keyword_priority: Priority,
    pub keyword_confidence: f64,
    pub keyword_signals: Vec<String>,
    pub environment: Option<String>,
    /// Floor applied when the environment escalates urgency (prod → P1).
    pub env_min_priority: Option<Priority>,
    pub impact_multiplier: f64,
    pub service: Option<String>,
    pub host: Option<String>,
}

#[derive(Debug, Default)]
pub struct SignalDetector;

impl SignalDetector {
    pub fn new() -> Self {
        Self
    }

    pub fn detect_all(&self, query: &str) -> SignalReport {
        let text = query.to_lowercase();

        let mut signals = Vec::new();
        let mut priority = Priority::P3;
        let mut confidence = 0.6;

        for kw in P0_KEYWORDS {
            if contains_keyword(&text, kw) {
                signals.push(format!("P0:{kw}"));
            }
        }
        for kw in P1_KEYWORDS {
            if contains_keyword(&text, kw) {
                signals.push(format!("P1:{kw}"));
            }
        }
        for kw in P2_KEYWORDS {
            if contains_keyword(&text, kw) {
                signals.push(format!("P2:{kw}"));
            }
        }

        if signals.iter().any(|s| s.starts_with("P0:")) {
            priority = Priority::P0;
            confidence = 0.9;
        } else if signals.iter().any(|s| s.starts_with("P1:")) {
            priority = Priority::P1;
            confidence = 0.85;
        } else if signals.iter().any(|s| s.starts_with("P2:")) {
            priority = Priority::P2;
            confidence = 0.8;
        }

        let environment = self.detect_environment(&text);
        let env_min_priority = match environment.as_deref() {
            Some("prod") => Some(Priority::P1),
            _ => None,
        };

        SignalReport {
            keyword_priority: priority,
            keyword_confidence: confidence,
            keyword_signals: signals,
            environment,
            env_min_priority,
            impact_multiplier: self.detect_impact(&text),
            service: self.detect_service(&text),
            host: self.detect_host(&text),
        }
    }

    /// Intent from keyword votes.  Defaults to `Action` when nothing
    /// matches: an unclassified request is assumed to want something done.
    pub fn detect_intent(&self, query: &str) -> (Intent, f64, Vec<String>) {
        let text = query.to_lowercase();
        let mut signals = Vec::new();

        let count = |keywords: &[&str], tag: &str, signals: &mut Vec<String>| {
            let mut hits = 0usize;
            for kw in keywords {
                if contains_keyword(&text, kw) {
                    signals.push(format!("{tag}:{kw}"));
                    hits += 1;
                }
            }
            hits
        };

        let query_hits = count(QUERY_KEYWORDS, "query", &mut signals);
        let action_hits = count(ACTION_KEYWORDS, "action", &mut signals);
        let analysis_hits = count(ANALYSIS_KEYWORDS, "analysis", &mut signals);

        // Analysis cues dominate: "why is the service slow" also contains
        // no action verb, but "diagnose and restart" should still analyze
        // first.
        let (intent, hits) = if analysis_hits > 0 && analysis_hits >= action_hits {
            (Intent::Analysis, analysis_hits)
        } else if action_hits > 0 {
            (Intent::Action, action_hits)
        } else if query_hits > 0 {
            (Intent::Query, query_hits)
        } else {
            (Intent::Action, 0)
        };

        let confidence = if hits == 0 {
            0.5
        } else {
            (0.6 + 0.1 * hits as f64).min(0.9)
        };
        (intent, confidence, signals)
    }

    fn detect_environment(&self, text: &str) -> Option<String> {
        env_regex().find(text).map(|m| {
            match m.as_str() {
                "production" | "prod" => "prod",
                "staging" | "stage" => "staging",
                "preprod" => "preprod",
                _ => "dev",
            }
            .to_string()
        })
    }

    fn detect_impact(&self, text: &str) -> f64 {
        IMPACT_PHRASES
            .iter()
            .filter(|(phrase, _)| contains_keyword(text, phrase))
            .map(|(_, mult)| *mult)
            .fold(1.0, f64::max)
    }

    fn detect_service(&self, text: &str) -> Option<String> {
        for service in KNOWN_SERVICES {
            if contains_keyword(text, service) {
                return Some((*service).to_string());
            }
        }
        for (alias, canonical) in SERVICE_ALIASES {
            if contains_keyword(text, alias) {
                return Some((*canonical).to_string());
            }
        }
        None
    }

    fn detect_host(&self, text: &str) -> Option<String> {
        host_regex().find(text).map(|m| m.as_str().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_boundaries_respected() {
        assert!(contains_keyword("mongodb is down", "down"));
        assert!(!contains_keyword("shutdown scheduled", "down"));
        assert!(contains_keyword("data loss detected", "data loss"));
    }

    #[test]
    fn detects_environment_service_host() {
        let report = SignalDetector::new().detect_all("MongoDB is down on prod-db-01");
        assert_eq!(report.keyword_priority, Priority::P0);
        assert_eq!(report.environment.as_deref(), Some("prod"));
        assert_eq!(report.env_min_priority, Some(Priority::P1));
        assert_eq!(report.service.as_deref(), Some("mongodb"));
        assert_eq!(report.host.as_deref(), Some("prod-db-01"));
    }

    #[test]
    fn impact_phrases_raise_multiplier() {
        let detector = SignalDetector::new();
        let report = detector.detect_all("all users report errors");
        assert!(report.impact_multiplier >= 1.5);
        let calm = detector.detect_all("rotate the logs tonight");
        assert!((calm.impact_multiplier - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn intent_detection_votes() {
        let detector = SignalDetector::new();
        assert_eq!(detector.detect_intent("list hosts").0, Intent::Query);
        assert_eq!(detector.detect_intent("restart nginx on web-01").0, Intent::Action);
        assert_eq!(detector.detect_intent("why is the api slow").0, Intent::Analysis);
        // No keywords at all defaults to action.
        let (intent, confidence, _) = detector.detect_intent("nginx web-01");
        assert_eq!(intent, Intent::Action);
        assert!((confidence - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn mongo_alias_folds_to_mongodb() {
        let report = SignalDetector::new().detect_all("mongo acting weird");
        assert_eq!(report.service.as_deref(), Some("mongodb"));
    }
}
