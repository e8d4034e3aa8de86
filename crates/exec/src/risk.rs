//! Advisory risk assessment for shell commands.
//!
//! Purely syntactic: the command's leading tokens are matched against three
//! prefix lists.  Unknown commands default to moderate.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Moderate,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Moderate => "moderate",
            RiskLevel::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Risk {
    pub level: RiskLevel,
    pub reason: String,
}

const LOW_PREFIXES: &[&str] = &[
    "systemctl status",
    "ps",
    "df",
    "cat",
    "ls",
    "grep",
    "uname",
    "hostname",
    "uptime",
    "free",
];

const MODERATE_PREFIXES: &[&str] = &["systemctl reload", "chmod", "chown", "touch", "mkdir"];

const CRITICAL_PREFIXES: &[&str] = &[
    "systemctl restart",
    "systemctl stop",
    "rm",
    "iptables",
    "shutdown",
    "reboot",
    "dd",
    "mkfs",
];

#[derive(Debug, Default, Clone, Copy)]
pub struct RiskAssessor;

impl RiskAssessor {
    pub fn new() -> Self {
        Self
    }

    pub fn assess(&self, command: &str) -> Risk {
        let trimmed = command.trim_start();
        for (level, prefixes) in [
            (RiskLevel::Low, LOW_PREFIXES),
            (RiskLevel::Moderate, MODERATE_PREFIXES),
            (RiskLevel::Critical, CRITICAL_PREFIXES),
        ] {
            for prefix in prefixes {
                if matches_prefix(trimmed, prefix) {
                    return Risk {
                        level,
                        reason: format!("Matches pattern: {prefix}"),
                    };
                }
            }
        }
        Risk {
            level: RiskLevel::Moderate,
            reason: "Unknown command pattern".to_string(),
        }
    }

    pub fn requires_confirmation(&self, level: RiskLevel) -> bool {
        matches!(level, RiskLevel::Moderate | RiskLevel::Critical)
    }
}

/// Prefix match on whole tokens: `rm` matches `rm -rf /tmp/x` but not
/// `rmdir`.
fn matches_prefix(command: &str, prefix: &str) -> bool {
    match command.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with(char::is_whitespace),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_prefix_lists() {
        let assessor = RiskAssessor::new();
        assert_eq!(assessor.assess("systemctl status nginx").level, RiskLevel::Low);
        assert_eq!(assessor.assess("df -h").level, RiskLevel::Low);
        assert_eq!(assessor.assess("chmod 644 /etc/app.conf").level, RiskLevel::Moderate);
        assert_eq!(assessor.assess("systemctl restart nginx").level, RiskLevel::Critical);
        assert_eq!(assessor.assess("rm -rf /var/tmp/junk").level, RiskLevel::Critical);
    }

    #[test]
    fn longest_systemctl_form_wins() {
        let assessor = RiskAssessor::new();
        // "systemctl status" is low even though "systemctl stop" is critical.
        assert_eq!(assessor.assess("systemctl status mysql").level, RiskLevel::Low);
        assert_eq!(assessor.assess("systemctl stop mysql").level, RiskLevel::Critical);
        assert_eq!(assessor.assess("systemctl reload mysql").level, RiskLevel::Moderate);
    }

    #[test]
    fn token_boundaries_respected() {
        let assessor = RiskAssessor::new();
        // "rmdir" must not hit the "rm" critical prefix.
        assert_eq!(assessor.assess("rmdir /tmp/empty").level, RiskLevel::Moderate);
        assert_eq!(assessor.assess("pstree").level, RiskLevel::Moderate);
    }

    #[test]
    fn unknown_defaults_to_moderate() {
        let assessor = RiskAssessor::new();
        let risk = assessor.assess("weird-custom-binary --flag");
        assert_eq!(risk.level, RiskLevel::Moderate);
        assert_eq!(risk.reason, "Unknown command pattern");
    }

    #[test]
    fn confirmation_rules() {
        let assessor = RiskAssessor::new();
        assert!(!assessor.requires_confirmation(RiskLevel::Low));
        assert!(assessor.requires_confirmation(RiskLevel::Moderate));
        assert!(assessor.requires_confirmation(RiskLevel::Critical));
    }
}
