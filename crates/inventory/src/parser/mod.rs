//! Multi-format inventory parser.
//!
//! Structured formats (CSV/JSON/YAML), text formats (INI, /etc/hosts,
//! ssh_config, plain TXT), and a gated LLM fallback for everything else.

pub mod llm;
mod structured;
mod text;

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use athena_llm::LlmRouter;

use crate::model::ParseResult;
pub use llm::LlmFallbackOptions;

/// Formats the parser understands natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Csv,
    Json,
    Yaml,
    Ini,
    EtcHosts,
    SshConfig,
    Txt,
    Unknown,
}

impl SourceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::Csv => "csv",
            SourceFormat::Json => "json",
            SourceFormat::Yaml => "yaml",
            SourceFormat::Ini => "ini",
            SourceFormat::EtcHosts => "etc_hosts",
            SourceFormat::SshConfig => "ssh_config",
            SourceFormat::Txt => "txt",
            SourceFormat::Unknown => "unknown",
        }
    }

    pub fn from_hint(hint: &str) -> Self {
        match hint.to_lowercase().as_str() {
            "csv" => SourceFormat::Csv,
            "json" => SourceFormat::Json,
            "yaml" | "yml" => SourceFormat::Yaml,
            "ini" => SourceFormat::Ini,
            "etc_hosts" | "hosts" => SourceFormat::EtcHosts,
            "ssh_config" => SourceFormat::SshConfig,
            "txt" | "text" => SourceFormat::Txt,
            _ => SourceFormat::Unknown,
        }
    }
}

pub struct InventoryParser {
    llm: Option<LlmRouter>,
    options: LlmFallbackOptions,
}

impl InventoryParser {
    pub fn new(llm: Option<LlmRouter>, options: LlmFallbackOptions) -> Self {
        Self { llm, options }
    }

    /// Parse a file path or raw content.  `format_hint` skips detection.
    pub async fn parse(&self, source: &str, format_hint: Option<&str>) -> ParseResult {
        let mut file_path = None;
        let mut content = source.to_string();

        // Only short, single-line sources can plausibly be paths; this also
        // sidesteps OS errors on embedded NUL bytes and absurd lengths.
        let may_be_path =
            source.len() < 4096 && !source.contains('\n') && !source.contains('\0');
        if may_be_path {
            let path = Path::new(source);
            if path.is_file() {
                match std::fs::read_to_string(path) {
                    Ok(read) => {
                        file_path = Some(source.to_string());
                        content = read;
                    }
                    Err(e) => {
                        return ParseResult {
                            source_type: "unknown".to_string(),
                            file_path: Some(source.to_string()),
                            errors: vec![format!("Could not read file: {e}")],
                            ..ParseResult::default()
                        };
                    }
                }
            }
        }

        let format = match format_hint {
            Some(hint) => SourceFormat::from_hint(hint),
            None => detect_format(&content, file_path.as_deref()),
        };
        debug!(format = format.as_str(), "detected inventory format");

        let (hosts, errors, warnings) = match format {
            SourceFormat::Csv => with_empty_warnings(structured::parse_csv(&content)),
            SourceFormat::Json => with_empty_warnings(structured::parse_json(&content)),
            SourceFormat::Yaml => with_empty_warnings(structured::parse_yaml(&content)),
            SourceFormat::Ini => with_empty_warnings(text::parse_ini(&content)),
            SourceFormat::EtcHosts => with_empty_warnings(text::parse_etc_hosts(&content)),
            SourceFormat::SshConfig => with_empty_warnings(text::parse_ssh_config(&content)),
            SourceFormat::Txt => with_empty_warnings(text::parse_txt(&content)),
            SourceFormat::Unknown => {
                let (hosts, errors, warnings) =
                    llm::parse_with_llm(&content, self.llm.as_ref(), &self.options).await;
                return ParseResult {
                    hosts,
                    source_type: "llm_parsed".to_string(),
                    file_path,
                    errors,
                    warnings,
                };
            }
        };

        ParseResult {
            hosts,
            source_type: format.as_str().to_string(),
            file_path,
            errors,
            warnings,
        }
    }
}

fn with_empty_warnings(
    parsed: (Vec<crate::model::ParsedHost>, Vec<String>),
) -> (Vec<crate::model::ParsedHost>, Vec<String>, Vec<String>) {
    (parsed.0, parsed.1, vec![])
}

fn yaml_doc_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^---\s*$").expect("yaml doc regex"))
}

fn yaml_key_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\w+:\s*$").expect("yaml key regex"))
}

fn ini_section_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\[[\w\-]+\]").expect("ini section regex"))
}

fn etc_hosts_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\s+\S+").expect("etc hosts regex")
    })
}

fn ssh_config_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?mi)^Host\s+\S+").expect("ssh config regex"))
}

/// Detection ladder: extension, then content shape.
pub fn detect_format(content: &str, file_path: Option<&str>) -> SourceFormat {
    if let Some(path) = file_path {
        let lowered = path.to_lowercase();
        if let Some(ext) = Path::new(&lowered).extension().and_then(|e| e.to_str()) {
            match ext {
                "csv" => return SourceFormat::Csv,
                "json" => return SourceFormat::Json,
                "yaml" | "yml" => return SourceFormat::Yaml,
                "ini" => return SourceFormat::Ini,
                _ => {}
            }
        }
        if lowered.contains("hosts") && !lowered.contains("ssh") {
            return SourceFormat::EtcHosts;
        }
        if lowered.contains("ssh") && lowered.contains("config") {
            return SourceFormat::SshConfig;
        }
    }

    let trimmed = content.trim();

    if (trimmed.starts_with('{') || trimmed.starts_with('['))
        && serde_json::from_str::<serde_json::Value>(trimmed).is_ok()
    {
        return SourceFormat::Json;
    }

    if trimmed.contains(':')
        && !trimmed.starts_with('{')
        && (yaml_doc_regex().is_match(trimmed) || yaml_key_regex().is_match(trimmed))
    {
        return SourceFormat::Yaml;
    }

    // CSV: the first few lines share an identical, non-zero comma count.
    let lines: Vec<&str> = trimmed.lines().collect();
    if lines.len() > 1 {
        let counts: Vec<usize> = lines.iter().take(5).map(|l| l.matches(',').count()).collect();
        if counts.iter().all(|c| *c == counts[0]) && counts[0] > 0 {
            return SourceFormat::Csv;
        }
    }

    if ini_section_regex().is_match(trimmed) {
        return SourceFormat::Ini;
    }
    if etc_hosts_regex().is_match(trimmed) {
        return SourceFormat::EtcHosts;
    }
    if ssh_config_regex().is_match(trimmed) {
        return SourceFormat::SshConfig;
    }

    SourceFormat::Txt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_json_yaml_csv() {
        assert_eq!(
            detect_format(r#"[{"hostname": "a"}]"#, None),
            SourceFormat::Json
        );
        assert_eq!(detect_format("hosts:\n  - web-01\n", None), SourceFormat::Yaml);
        assert_eq!(
            detect_format("hostname,ip\nweb-01,10.0.0.1\n", None),
            SourceFormat::Csv
        );
    }

    #[test]
    fn detects_text_formats() {
        assert_eq!(detect_format("[web]\nweb-01\n", None), SourceFormat::Ini);
        assert_eq!(
            detect_format("10.0.0.1 web-01 web\n", None),
            SourceFormat::EtcHosts
        );
        assert_eq!(
            detect_format("Host bastion\n  HostName 10.0.0.2\n", None),
            SourceFormat::SshConfig
        );
        assert_eq!(detect_format("web-01\nweb-02\n", None), SourceFormat::Txt);
    }

    #[test]
    fn extension_beats_content() {
        assert_eq!(
            detect_format("anything", Some("/tmp/inventory.csv")),
            SourceFormat::Csv
        );
        assert_eq!(
            detect_format("anything", Some("/etc/hosts")),
            SourceFormat::EtcHosts
        );
        assert_eq!(
            detect_format("anything", Some("/home/op/.ssh/config")),
            SourceFormat::SshConfig
        );
    }

    #[tokio::test]
    async fn parse_reads_files_and_raw_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inventory.csv");
        std::fs::write(&path, "hostname,ip\nweb-01,10.0.0.1\n").unwrap();

        let parser = InventoryParser::new(None, LlmFallbackOptions::default());
        let from_file = parser.parse(path.to_str().unwrap(), None).await;
        assert!(from_file.success());
        assert_eq!(from_file.source_type, "csv");
        assert!(from_file.file_path.is_some());

        let from_raw = parser.parse("hostname,ip\napi-01,10.0.0.2\n", None).await;
        assert!(from_raw.success());
        assert!(from_raw.file_path.is_none());
    }
}
