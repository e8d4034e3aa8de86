//! Host relation classifier: heuristics first, LLM suggestions only when
//! the heuristics come up short.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use athena_llm::{LlmRouter, TaskKind};

pub const RELATION_TYPES: &[&str] = &[
    "cluster_member",
    "database_replica",
    "depends_on",
    "backup_of",
    "load_balanced",
    "related_service",
];

/// Relation types where `(a, b)` and `(b, a)` mean the same thing.
pub const SYMMETRIC_TYPES: &[&str] = &["cluster_member", "load_balanced"];

/// The facts the classifier needs about a host.
#[derive(Debug, Clone, Default)]
pub struct HostFacts {
    pub hostname: String,
    pub environment: Option<String>,
    pub groups: Vec<String>,
    pub service: Option<String>,
}

impl HostFacts {
    pub fn named(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            ..Self::default()
        }
    }
}

/// A known relation to exclude from suggestions.
#[derive(Debug, Clone)]
pub struct ExistingRelation {
    pub source_hostname: String,
    pub target_hostname: String,
    pub relation_type: String,
}

/// A suggested relation between two hosts.
#[derive(Debug, Clone)]
pub struct RelationSuggestion {
    pub source_hostname: String,
    pub target_hostname: String,
    pub relation_type: String,
    pub confidence: f64,
    pub reason: String,
    pub metadata: BTreeMap<String, Value>,
}

impl RelationSuggestion {
    fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        relation_type: &str,
        confidence: f64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            source_hostname: source.into(),
            target_hostname: target.into(),
            relation_type: relation_type.to_string(),
            confidence,
            reason: reason.into(),
            metadata: BTreeMap::new(),
        }
    }
}

/// Above this group size, pairwise expansion switches to a star topology.
const MAX_PAIRWISE: usize = 20;
/// Ceiling on relations emitted per service-dependency pattern pair.
const MAX_RELATIONS_PER_PAIR: usize = 5;
/// Either side larger than this drops service-dependency confidence.
const SERVICE_CROWD_THRESHOLD: usize = 10;
/// LLM assistance kicks in below this many heuristic suggestions.
const LLM_TRIGGER_THRESHOLD: usize = 5;
/// Cap on hostnames included in the LLM prompt.
const LLM_HOST_LIMIT: usize = 50;

const REPLICA_PATTERNS: &[(&str, &str)] = &[
    ("master", "slave"),
    ("master", "replica"),
    ("primary", "secondary"),
    ("primary", "replica"),
    ("leader", "follower"),
    ("main", "backup"),
];

fn cluster_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"^(.+)-(\d+)$",
            r"^(.+?)(\d+)$",
            r"^(.+)-node(\d+)$",
            r"^(.+)-server(\d+)$",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("cluster pattern"))
        .collect()
    })
}

pub struct RelationClassifier {
    llm: Option<LlmRouter>,
}

impl RelationClassifier {
    pub fn new(llm: Option<LlmRouter>) -> Self {
        Self { llm }
    }

    /// Suggest relations between hosts, deduplicated, filtered against
    /// `existing`, sorted by confidence descending.
    pub async fn suggest_relations(
        &self,
        hosts: &[HostFacts],
        existing: &[ExistingRelation],
        use_llm: bool,
        min_confidence: f64,
    ) -> Vec<RelationSuggestion> {
        let mut suggestions = Vec::new();
        suggestions.extend(cluster_relations(hosts));
        suggestions.extend(replica_relations(hosts));
        suggestions.extend(group_relations(hosts));
        suggestions.extend(service_relations(hosts));

        if use_llm && suggestions.len() < LLM_TRIGGER_THRESHOLD && hosts.len() > 2 {
            suggestions.extend(self.llm_relations(hosts).await);
        }

        suggestions.retain(|s| s.confidence >= min_confidence);
        let mut suggestions = deduplicate(suggestions);
        suggestions = filter_existing(suggestions, existing);
        suggestions.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        suggestions
    }

    async fn llm_relations(&self, hosts: &[HostFacts]) -> Vec<RelationSuggestion> {
        let Some(llm) = &self.llm else { return vec![] };

        // Lowercase → original casing, also the hallucination guard.
        let known: HashMap<String, String> = hosts
            .iter()
            .filter(|h| !h.hostname.is_empty())
            .map(|h| (h.hostname.to_lowercase(), h.hostname.clone()))
            .collect();

        let mut summary = Vec::new();
        for host in hosts.iter().take(LLM_HOST_LIMIT) {
            let mut entry = host.hostname.clone();
            if let Some(env) = &host.environment {
                entry.push_str(&format!(" (env: {env})"));
            }
            if !host.groups.is_empty() {
                let groups: Vec<&str> =
                    host.groups.iter().take(3).map(String::as_str).collect();
                entry.push_str(&format!(" (groups: {})", groups.join(", ")));
            }
            if let Some(service) = &host.service {
                entry.push_str(&format!(" (service: {service})"));
            }
            summary.push(entry);
        }

        let prompt = format!(
            r#"Analyze these server hostnames and suggest relationships between them.

Hostnames:
{}

For each relationship, identify:
1. Source hostname
2. Target hostname
3. Relationship type: cluster_member, database_replica, depends_on, backup_of, load_balanced, related_service
4. Confidence (0.5-1.0)
5. Reason

Return ONLY a JSON array with objects containing: source, target, type, confidence, reason

Example:
[{{"source": "web-01", "target": "web-02", "type": "cluster_member", "confidence": 0.8, "reason": "Same naming pattern"}}]

Return ONLY valid JSON, no explanations. Return empty array [] if no clear relationships found."#,
            summary.join("\n")
        );

        let response = match llm
            .generate(&prompt, "Infrastructure topology analyst.", TaskKind::Synthesis)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                debug!(error = %e, "LLM relation discovery failed");
                return vec![];
            }
        };

        let Some(items) = extract_json_array(&response) else {
            debug!("failed to extract a JSON array from the LLM response");
            return vec![];
        };

        let mut suggestions = Vec::new();
        for item in items {
            let Value::Object(item) = item else { continue };
            let (Some(source), Some(target)) = (
                item.get("source").and_then(Value::as_str),
                item.get("target").and_then(Value::as_str),
            ) else {
                continue;
            };

            // Suggestions naming hosts outside the input are hallucinations.
            let (Some(source), Some(target)) = (
                known.get(&source.to_lowercase()),
                known.get(&target.to_lowercase()),
            ) else {
                debug!("skipping LLM suggestion with unknown host");
                continue;
            };

            let relation_type = item
                .get("type")
                .and_then(Value::as_str)
                .filter(|t| RELATION_TYPES.contains(t))
                .unwrap_or("related_service");

            // LLM confidences never outrank strong heuristics.
            let confidence = item
                .get("confidence")
                .and_then(Value::as_f64)
                .unwrap_or(0.5)
                .clamp(0.0, 0.75);

            let mut suggestion = RelationSuggestion::new(
                source,
                target,
                relation_type,
                confidence,
                item.get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or("LLM suggestion"),
            );
            suggestion
                .metadata
                .insert("source".to_string(), Value::String("llm".to_string()));
            suggestions.push(suggestion);
        }
        suggestions
    }
}

fn cluster_relations(hosts: &[HostFacts]) -> Vec<RelationSuggestion> {
    let mut by_base: HashMap<String, Vec<&str>> = HashMap::new();
    for host in hosts {
        for pattern in cluster_patterns() {
            if let Some(captures) = pattern.captures(&host.hostname) {
                if let Some(base) = captures.get(1) {
                    by_base
                        .entry(base.as_str().to_string())
                        .or_default()
                        .push(&host.hostname);
                }
                break;
            }
        }
    }

    let mut suggestions = Vec::new();
    for (base, members) in by_base {
        if members.len() < 2 {
            continue;
        }
        if members.len() <= MAX_PAIRWISE {
            for (i, first) in members.iter().enumerate() {
                for second in &members[i + 1..] {
                    suggestions.push(RelationSuggestion::new(
                        *first,
                        *second,
                        "cluster_member",
                        0.85,
                        format!("Same naming pattern: {base}-*"),
                    ));
                }
            }
        } else {
            // Star topology keeps large clusters out of O(n²) territory.
            let hub = members[0];
            for member in &members[1..] {
                suggestions.push(RelationSuggestion::new(
                    hub,
                    *member,
                    "cluster_member",
                    0.8,
                    format!("Same naming pattern: {base}-* (star topology, {} members)", members.len()),
                ));
            }
        }
    }
    suggestions
}

fn replica_relations(hosts: &[HostFacts]) -> Vec<RelationSuggestion> {
    let hostnames: HashSet<String> =
        hosts.iter().map(|h| h.hostname.to_lowercase()).collect();

    let mut suggestions = Vec::new();
    for (primary_term, secondary_term) in REPLICA_PATTERNS {
        for host in hosts {
            let lowered = host.hostname.to_lowercase();
            if !lowered.contains(primary_term) {
                continue;
            }
            let candidate = lowered.replacen(primary_term, secondary_term, 1);
            if hostnames.contains(&candidate) {
                suggestions.push(RelationSuggestion::new(
                    candidate,
                    lowered,
                    "database_replica",
                    0.9,
                    format!("Naming pattern: {primary_term}/{secondary_term}"),
                ));
            }
        }
    }
    suggestions
}

fn group_relations(hosts: &[HostFacts]) -> Vec<RelationSuggestion> {
    const GENERIC_GROUPS: &[&str] = &["all", "ungrouped", "servers", "hosts"];

    let mut by_group: HashMap<&str, Vec<&str>> = HashMap::new();
    for host in hosts {
        for group in &host.groups {
            by_group.entry(group.as_str()).or_default().push(&host.hostname);
        }
    }

    let mut suggestions = Vec::new();
    for (group, members) in by_group {
        if members.len() < 2 || GENERIC_GROUPS.contains(&group.to_lowercase().as_str()) {
            continue;
        }

        let make = |source: &str, target: &str, confidence: f64, reason: String| {
            let mut s =
                RelationSuggestion::new(source, target, "related_service", confidence, reason);
            s.metadata
                .insert("group".to_string(), Value::String(group.to_string()));
            s
        };

        if members.len() <= MAX_PAIRWISE {
            for (i, first) in members.iter().enumerate() {
                for second in &members[i + 1..] {
                    suggestions.push(make(first, second, 0.6, format!("Same group: {group}")));
                }
            }
        } else {
            let hub = members[0];
            for member in &members[1..] {
                suggestions.push(make(
                    hub,
                    member,
                    0.55,
                    format!("Same group: {group} (star topology, {} members)", members.len()),
                ));
            }
        }
    }
    suggestions
}

fn service_relations(hosts: &[HostFacts]) -> Vec<RelationSuggestion> {
    const DEPENDENCY_PATTERNS: &[(&[&str], &[&str])] = &[
        (&["web", "frontend", "ui"], &["api", "backend", "app"]),
        (&["api", "backend", "app"], &["db", "database", "mysql", "postgres", "mongo"]),
        (&["app", "backend"], &["cache", "redis", "memcached"]),
        (&["app", "backend"], &["queue", "rabbitmq", "kafka"]),
    ];

    let hostnames: Vec<&str> = hosts.iter().map(|h| h.hostname.as_str()).collect();
    let mut suggestions = Vec::new();

    for (dependent_terms, dependency_terms) in DEPENDENCY_PATTERNS {
        let dependents: Vec<&str> = hostnames
            .iter()
            .copied()
            .filter(|h| {
                let lowered = h.to_lowercase();
                dependent_terms.iter().any(|t| lowered.contains(t))
            })
            .collect();
        let dependencies: Vec<&str> = hostnames
            .iter()
            .copied()
            .filter(|h| {
                let lowered = h.to_lowercase();
                dependency_terms.iter().any(|t| lowered.contains(t))
            })
            .collect();

        if dependents.is_empty() || dependencies.is_empty() {
            continue;
        }

        let crowded = dependents.len() > SERVICE_CROWD_THRESHOLD
            || dependencies.len() > SERVICE_CROWD_THRESHOLD;
        let base_confidence = if crowded { 0.3 } else { 0.5 };

        if dependents.len() * dependencies.len() <= MAX_RELATIONS_PER_PAIR {
            for dependent in &dependents {
                for dependency in &dependencies {
                    if dependent != dependency {
                        suggestions.push(RelationSuggestion::new(
                            *dependent,
                            *dependency,
                            "depends_on",
                            base_confidence,
                            "Service dependency pattern",
                        ));
                    }
                }
            }
        } else {
            // Star fallback bounds the cartesian product.
            let hub = dependents[0];
            let mut created = 0usize;
            for dependency in &dependencies {
                if hub != *dependency && created < MAX_RELATIONS_PER_PAIR {
                    let mut s = RelationSuggestion::new(
                        hub,
                        *dependency,
                        "depends_on",
                        base_confidence * 0.9,
                        format!("Service dependency pattern (star topology, {} dependents)", dependents.len()),
                    );
                    s.metadata
                        .insert("topology".to_string(), Value::String("star".to_string()));
                    suggestions.push(s);
                    created += 1;
                }
            }
        }
    }
    suggestions
}

/// Caps on the regex-free fallback scan, so adversarial input cannot drive
/// the extraction into O(n²).
const MAX_ARRAY_STARTS: usize = 8;
const MAX_ENDS_PER_START: usize = 64;

/// Extract a JSON array from free-form LLM output: whole-string parse, then
/// bracket matching from the first `[`, then a bounded candidate scan.
pub fn extract_json_array(response: &str) -> Option<Vec<Value>> {
    let trimmed = response.trim();
    if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(trimmed) {
        return Some(items);
    }

    // Bracket matching from the first '[', string-aware.
    if let Some(start) = trimmed.find('[') {
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escape_next = false;
        for (offset, ch) in trimmed[start..].char_indices() {
            if escape_next {
                escape_next = false;
                continue;
            }
            match ch {
                '\\' if in_string => escape_next = true,
                '"' => in_string = !in_string,
                '[' if !in_string => depth += 1,
                ']' if !in_string => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        let candidate = &trimmed[start..start + offset + 1];
                        if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(candidate) {
                            return Some(items);
                        }
                        break;
                    }
                }
                _ => {}
            }
        }
    }

    // Bounded fallback over candidate start/end positions.
    let starts: Vec<usize> = trimmed
        .char_indices()
        .filter(|(_, c)| *c == '[')
        .map(|(i, _)| i)
        .take(MAX_ARRAY_STARTS)
        .collect();
    for start in starts {
        let ends = trimmed[start..]
            .char_indices()
            .filter(|(_, c)| *c == ']')
            .map(|(i, _)| start + i)
            .take(MAX_ENDS_PER_START);
        for end in ends {
            if let Ok(Value::Array(items)) =
                serde_json::from_str::<Value>(&trimmed[start..=end])
            {
                return Some(items);
            }
        }
    }

    warn!("no valid JSON array found in LLM response");
    None
}

fn suggestion_key(s: &RelationSuggestion) -> (String, String, String) {
    let source = s.source_hostname.to_lowercase();
    let target = s.target_hostname.to_lowercase();
    if SYMMETRIC_TYPES.contains(&s.relation_type.as_str()) && target < source {
        (target, source, s.relation_type.clone())
    } else {
        (source, target, s.relation_type.clone())
    }
}

/// Symmetric types normalize to the sorted pair; the highest-confidence
/// duplicate survives.
fn deduplicate(suggestions: Vec<RelationSuggestion>) -> Vec<RelationSuggestion> {
    let mut best: HashMap<(String, String, String), RelationSuggestion> = HashMap::new();
    for suggestion in suggestions {
        let key = suggestion_key(&suggestion);
        match best.get(&key) {
            Some(current) if current.confidence >= suggestion.confidence => {}
            _ => {
                best.insert(key, suggestion);
            }
        }
    }
    best.into_values().collect()
}

fn filter_existing(
    suggestions: Vec<RelationSuggestion>,
    existing: &[ExistingRelation],
) -> Vec<RelationSuggestion> {
    let mut known: HashSet<(String, String, String)> = HashSet::new();
    for relation in existing {
        let source = relation.source_hostname.to_lowercase();
        let target = relation.target_hostname.to_lowercase();
        known.insert((source.clone(), target.clone(), relation.relation_type.clone()));
        if SYMMETRIC_TYPES.contains(&relation.relation_type.as_str()) {
            known.insert((target, source, relation.relation_type.clone()));
        }
    }

    suggestions
        .into_iter()
        .filter(|s| {
            !known.contains(&(
                s.source_hostname.to_lowercase(),
                s.target_hostname.to_lowercase(),
                s.relation_type.clone(),
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts(names: &[&str]) -> Vec<HostFacts> {
        names.iter().map(|n| HostFacts::named(*n)).collect()
    }

    #[tokio::test]
    async fn cluster_naming_pairs_members() {
        let classifier = RelationClassifier::new(None);
        let suggestions = classifier
            .suggest_relations(&facts(&["web-01", "web-02", "web-03"]), &[], false, 0.5)
            .await;

        let clusters: Vec<_> = suggestions
            .iter()
            .filter(|s| s.relation_type == "cluster_member")
            .collect();
        assert_eq!(clusters.len(), 3);
        assert!(clusters.iter().all(|s| (s.confidence - 0.85).abs() < 1e-9));
    }

    #[tokio::test]
    async fn large_clusters_use_star_topology() {
        let names: Vec<String> = (0..25).map(|i| format!("node-{i:02}")).collect();
        let hosts: Vec<HostFacts> =
            names.iter().map(|n| HostFacts::named(n.clone())).collect();

        let classifier = RelationClassifier::new(None);
        let suggestions = classifier.suggest_relations(&hosts, &[], false, 0.5).await;
        let clusters: Vec<_> = suggestions
            .iter()
            .filter(|s| s.relation_type == "cluster_member")
            .collect();
        // Star topology: n-1 edges instead of n*(n-1)/2.
        assert_eq!(clusters.len(), 24);
        assert!(clusters.iter().all(|s| (s.confidence - 0.8).abs() < 1e-9));
    }

    #[tokio::test]
    async fn replica_naming_detected() {
        let classifier = RelationClassifier::new(None);
        let suggestions = classifier
            .suggest_relations(&facts(&["db-master", "db-slave", "unrelated"]), &[], false, 0.5)
            .await;
        let replica = suggestions
            .iter()
            .find(|s| s.relation_type == "database_replica")
            .unwrap();
        assert_eq!(replica.source_hostname, "db-slave");
        assert_eq!(replica.target_hostname, "db-master");
        assert!((replica.confidence - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn shared_groups_relate_but_generic_groups_do_not() {
        let mut a = HostFacts::named("alpha");
        a.groups = vec!["payments".to_string(), "all".to_string()];
        let mut b = HostFacts::named("beta");
        b.groups = vec!["payments".to_string(), "all".to_string()];

        let classifier = RelationClassifier::new(None);
        let suggestions = classifier.suggest_relations(&[a, b], &[], false, 0.5).await;
        let related: Vec<_> = suggestions
            .iter()
            .filter(|s| s.relation_type == "related_service")
            .collect();
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].metadata["group"], "payments");
    }

    #[tokio::test]
    async fn no_symmetric_duplicates_in_output() {
        let classifier = RelationClassifier::new(None);
        let suggestions = classifier
            .suggest_relations(&facts(&["cache-1", "cache-2"]), &[], false, 0.5)
            .await;

        let mut seen = HashSet::new();
        for s in &suggestions {
            if s.relation_type == "cluster_member" {
                let mut pair = [s.source_hostname.clone(), s.target_hostname.clone()];
                pair.sort();
                assert!(seen.insert(pair), "symmetric duplicate in suggestions");
            }
        }
    }

    #[tokio::test]
    async fn existing_relations_filtered_including_reverse() {
        let classifier = RelationClassifier::new(None);
        let existing = vec![ExistingRelation {
            // Stored in the opposite order from what the heuristic emits.
            source_hostname: "web-02".to_string(),
            target_hostname: "web-01".to_string(),
            relation_type: "cluster_member".to_string(),
        }];
        let suggestions = classifier
            .suggest_relations(&facts(&["web-01", "web-02"]), &existing, false, 0.5)
            .await;
        assert!(suggestions
            .iter()
            .all(|s| s.relation_type != "cluster_member"));
    }

    #[tokio::test]
    async fn min_confidence_filters_service_guesses() {
        let classifier = RelationClassifier::new(None);
        let hosts = facts(&["web-box", "api-box"]);
        let all = classifier.suggest_relations(&hosts, &[], false, 0.0).await;
        assert!(all.iter().any(|s| s.relation_type == "depends_on"));

        let strict = classifier.suggest_relations(&hosts, &[], false, 0.6).await;
        assert!(strict.iter().all(|s| s.relation_type != "depends_on"));
    }

    #[test]
    fn json_array_extraction_strategies() {
        assert_eq!(extract_json_array(r#"[1, 2]"#).unwrap().len(), 2);
        assert_eq!(
            extract_json_array(r#"Here you go: [{"source": "a"}] hope it helps"#)
                .unwrap()
                .len(),
            1
        );
        // Bracket inside a string must not end the array.
        assert_eq!(
            extract_json_array(r#"noise ["a]b", "c"] trailing"#).unwrap().len(),
            2
        );
        assert!(extract_json_array("no array here").is_none());
        assert!(extract_json_array(&"[".repeat(10_000)).is_none());
    }

    #[test]
    fn dedupe_keeps_highest_confidence() {
        let suggestions = vec![
            RelationSuggestion::new("a", "b", "cluster_member", 0.6, "one"),
            RelationSuggestion::new("b", "a", "cluster_member", 0.9, "two"),
            RelationSuggestion::new("a", "b", "depends_on", 0.5, "directional"),
            RelationSuggestion::new("b", "a", "depends_on", 0.5, "other direction"),
        ];
        let deduped = deduplicate(suggestions);
        let cluster: Vec<_> = deduped
            .iter()
            .filter(|s| s.relation_type == "cluster_member")
            .collect();
        assert_eq!(cluster.len(), 1);
        assert!((cluster[0].confidence - 0.9).abs() < 1e-9);
        // Asymmetric types keep both directions.
        assert_eq!(
            deduped.iter().filter(|s| s.relation_type == "depends_on").count(),
            2
        );
    }
}
