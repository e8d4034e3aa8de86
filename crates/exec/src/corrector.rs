//! Auto-correction of failed commands.
//!
//! Bounded retry loop: quick heuristic fixes first, then a single LLM
//! rewrite per attempt.  Privilege elevation is out of bounds — sudo-style
//! prompts are never corrected and sudo-style suggestions are rejected.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use athena_llm::{LlmRouter, TaskKind};

use crate::executor::{ActionExecutor, ExecOptions, ExecutionResult};
use crate::redact::redact_sensitive_info;

/// Prefixes the corrector refuses to emit.
const ELEVATION_PREFIXES: &[&str] = &["sudo ", "su ", "doas ", "su-"];

/// Command substitutions for exit 127 (binary missing or renamed).
const COMMAND_ALTERNATIVES: &[(&str, &str)] = &[
    ("service", "systemctl"),
    ("ifconfig", "ip addr"),
    ("netstat", "ss"),
    ("iptables-save", "nft list ruleset"),
    ("mongo", "mongosh"),
];

/// Path substitutions across distro families.
const PATH_ALTERNATIVES: &[(&str, &str)] = &[
    ("/var/log/syslog", "/var/log/messages"),
    ("/var/log/auth.log", "/var/log/secure"),
];

/// One applied correction.
#[derive(Debug, Clone, Serialize)]
pub struct Correction {
    pub attempt: u32,
    pub failed: String,
    pub error: String,
    pub fix: String,
}

/// History of a retried execution.
#[derive(Debug, Clone, Serialize)]
pub struct RetryInfo {
    pub attempts: u32,
    pub corrections: Vec<Correction>,
}

/// Context the corrector passes to the LLM.
#[derive(Debug, Clone, Default)]
pub struct ActionContext {
    /// What the command was trying to achieve.
    pub reason: String,
    /// Target operating system, when known.
    pub os: Option<String>,
}

pub struct AutoCorrector {
    llm: LlmRouter,
    executor: Arc<ActionExecutor>,
    max_retries: u32,
}

impl AutoCorrector {
    pub fn new(llm: LlmRouter, executor: Arc<ActionExecutor>, max_retries: u32) -> Self {
        Self {
            llm,
            executor,
            max_retries,
        }
    }

    /// Execute with auto-correction.  Returns the final result and, when any
    /// retry happened, the correction history.
    pub async fn execute_with_retry(
        &self,
        target: &str,
        command: &str,
        context: &ActionContext,
        timeout_secs: u64,
    ) -> (ExecutionResult, Option<RetryInfo>) {
        let mut current = command.to_string();
        let mut corrections: Vec<Correction> = Vec::new();
        let opts = ExecOptions {
            confirm: true,
            timeout_secs,
            show_spinner: false,
        };

        let mut attempt = 1u32;
        loop {
            let result = self.executor.execute(target, &current, &opts).await;

            if result.success {
                let info = (attempt > 1).then(|| RetryInfo {
                    attempts: attempt,
                    corrections: corrections.clone(),
                });
                return (result, info);
            }

            if attempt > self.max_retries {
                return (
                    result,
                    Some(RetryInfo {
                        attempts: attempt,
                        corrections,
                    }),
                );
            }

            let error_text = result
                .stderr
                .is_empty()
                .then(|| result.error.clone().unwrap_or_else(|| "Unknown".to_string()))
                .unwrap_or_else(|| result.stderr.clone());

            // Elevation carve-out: a sudo password prompt is a permissions
            // problem, not a command problem.
            if is_elevation_prompt(&error_text, &current) {
                info!("skipping auto-correction for sudo password prompt");
                return (
                    result,
                    Some(RetryInfo {
                        attempts: attempt,
                        corrections,
                    }),
                );
            }

            info!(attempt, max = self.max_retries, "auto-correcting failed command");
            let suggestion = match self.quick_fix(&current, result.exit_code) {
                Some(fix) => Some(fix),
                None => {
                    self.llm_correction(command, &current, &error_text, target, context)
                        .await
                }
            };

            let Some(fix) = suggestion.filter(|fix| *fix != current) else {
                warn!("no different fix available");
                return (
                    result,
                    Some(RetryInfo {
                        attempts: attempt,
                        corrections,
                    }),
                );
            };

            info!(fix = %redact_sensitive_info(&fix), "retrying with corrected command");
            corrections.push(Correction {
                attempt,
                failed: current.clone(),
                error: truncate(&error_text, 200),
                fix: fix.clone(),
            });
            current = fix;
            attempt += 1;
        }
    }

    /// Heuristic substitutions that need no LLM round trip.  Never adds a
    /// privilege-elevation prefix.
    fn quick_fix(&self, command: &str, exit_code: i32) -> Option<String> {
        if exit_code == 127 {
            let first_token = command.split_whitespace().next()?;
            for (old, new) in COMMAND_ALTERNATIVES {
                if first_token == *old {
                    return Some(command.replacen(old, new, 1));
                }
            }
        }
        for (old, new) in PATH_ALTERNATIVES {
            if command.contains(old) {
                return Some(command.replace(old, new));
            }
        }
        None
    }

    async fn llm_correction(
        &self,
        original: &str,
        failed: &str,
        error: &str,
        target: &str,
        context: &ActionContext,
    ) -> Option<String> {
        let os = context.os.as_deref().unwrap_or("unknown");
        let goal = if context.reason.is_empty() {
            "Execute command"
        } else {
            &context.reason
        };
        let prompt = format!(
            r#"FIX THIS COMMAND

Goal: {goal}
Original: {original}
Failed: {failed}
Error: {error}
Host: {target} ({os})

Common fixes:
- mongo -> mongosh (MongoDB 6+)
- systemctl -> service (non-systemd)
- apt-get -> dnf/yum (on RHEL/Fedora)
- not found -> check path/installation

CRITICAL RULES:
1. NEVER add sudo, su, doas, or any privilege elevation prefix
2. Privilege elevation is handled automatically by the system
3. If error is "permission denied", return the EXACT original command unchanged
4. Only fix actual command syntax errors (typos, wrong binary names, wrong flags)

Return ONLY the corrected command. No explanation. No sudo/su/doas.
If permission error or unfixable, return original command exactly."#,
            error = truncate(error, 200),
        );

        match self
            .llm
            .generate(
                &prompt,
                "Expert DevOps engineer. Return only the corrected command.",
                TaskKind::Correction,
            )
            .await
        {
            Ok(response) => extract_command(&response),
            Err(e) => {
                warn!(error = %e, "correction request failed");
                None
            }
        }
    }
}

fn is_elevation_prompt(error: &str, command: &str) -> bool {
    let error_lower = error.to_lowercase();
    error_lower.contains("password")
        && (error_lower.contains("sudo") || command.contains("sudo"))
}

/// First usable line of the LLM response.  Markdown, comments, and
/// privilege-elevation suggestions are skipped.
fn extract_command(response: &str) -> Option<String> {
    for line in response.lines() {
        let line = line.trim();
        if line.is_empty()
            || line.starts_with('#')
            || line.starts_with("//")
            || line.starts_with("```")
        {
            continue;
        }
        if ELEVATION_PREFIXES.iter().any(|p| line.starts_with(p)) {
            warn!(
                suggestion = &line[..line.len().min(50)],
                "rejecting privilege-elevation suggestion"
            );
            continue;
        }
        return Some(line.to_string());
    }
    None
}

fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use athena_llm::{ChatMessage, ChatResponse, LlmClient, LlmError};
    use athena_triage::ErrorAnalyzer;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedClient {
        replies: Vec<String>,
        cursor: AtomicUsize,
    }

    #[async_trait]
    impl LlmClient for ScriptedClient {
        async fn generate(
            &self,
            _prompt: &str,
            _system: &str,
            _task: TaskKind,
        ) -> Result<String, LlmError> {
            let i = self.cursor.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .replies
                .get(i)
                .cloned()
                .unwrap_or_else(|| self.replies.last().cloned().unwrap_or_default()))
        }

        async fn chat(
            &self,
            _messages: &[ChatMessage],
            _tools: Option<&serde_json::Value>,
            _task: TaskKind,
        ) -> Result<ChatResponse, LlmError> {
            unimplemented!("not used by the corrector")
        }
    }

    fn corrector(replies: &[&str]) -> AutoCorrector {
        let llm = LlmRouter::new(
            Arc::new(ScriptedClient {
                replies: replies.iter().map(|r| r.to_string()).collect(),
                cursor: AtomicUsize::new(0),
            }),
            5,
        );
        let executor = Arc::new(ActionExecutor::new(Arc::new(ErrorAnalyzer::new())));
        AutoCorrector::new(llm, executor, 2)
    }

    #[test]
    fn extract_skips_markdown_and_elevation() {
        let response = "```bash\nsudo systemctl restart nginx\nsystemctl restart nginx\n```";
        assert_eq!(
            extract_command(response).as_deref(),
            Some("systemctl restart nginx")
        );
        assert!(extract_command("sudo reboot").is_none());
        assert!(extract_command("su - admin").is_none());
        assert!(extract_command("doas rm -rf /").is_none());
    }

    #[test]
    fn elevation_prompt_detection() {
        assert!(is_elevation_prompt("[sudo] password for ops:", "systemctl restart x"));
        assert!(is_elevation_prompt("password required", "sudo apt update"));
        assert!(!is_elevation_prompt("permission denied", "cat /etc/shadow"));
    }

    #[tokio::test]
    async fn success_on_first_try_has_no_retry_info() {
        let corrector = corrector(&[]);
        let (result, info) = corrector
            .execute_with_retry("local", "uname", &ActionContext::default(), 10)
            .await;
        assert!(result.success);
        assert!(info.is_none());
    }

    #[tokio::test]
    async fn llm_fix_is_applied_and_recorded() {
        // First command fails (exit 1); the scripted LLM proposes `uname`.
        let corrector = corrector(&["uname"]);
        let (result, info) = corrector
            .execute_with_retry(
                "local",
                "ls /definitely/not/here",
                &ActionContext::default(),
                10,
            )
            .await;
        assert!(result.success);
        let info = info.expect("retry history");
        assert_eq!(info.attempts, 2);
        assert_eq!(info.corrections.len(), 1);
        assert_eq!(info.corrections[0].fix, "uname");
    }

    #[tokio::test]
    async fn sudo_suggestions_never_execute() {
        // The scripted LLM keeps insisting on sudo; every suggestion must be
        // rejected and the loop must end without executing it.
        let corrector = corrector(&["sudo ls /root"]);
        let (result, info) = corrector
            .execute_with_retry("local", "ls /definitely/not/here", &ActionContext::default(), 10)
            .await;
        assert!(!result.success);
        let info = info.expect("retry history");
        assert!(info.corrections.is_empty());
    }

    #[tokio::test]
    async fn identical_suggestion_stops_the_loop() {
        let corrector = corrector(&["ls /definitely/not/here"]);
        let (result, info) = corrector
            .execute_with_retry("local", "ls /definitely/not/here", &ActionContext::default(), 10)
            .await;
        assert!(!result.success);
        assert_eq!(info.expect("retry history").attempts, 1);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        // Suggestions alternate but never fix anything.
        let corrector = corrector(&["ls /nope-one", "ls /nope-two", "ls /nope-three"]);
        let (result, info) = corrector
            .execute_with_retry("local", "ls /definitely/not/here", &ActionContext::default(), 10)
            .await;
        assert!(!result.success);
        let info = info.expect("retry history");
        // max_retries = 2 → at most 3 attempts.
        assert_eq!(info.attempts, 3);
        assert_eq!(info.corrections.len(), 2);
    }

    #[tokio::test]
    async fn quick_fix_replaces_missing_binaries() {
        let corrector = corrector(&[]);
        assert_eq!(
            corrector.quick_fix("mongo --eval 'db.stats()'", 127),
            Some("mongosh --eval 'db.stats()'".to_string())
        );
        assert_eq!(
            corrector.quick_fix("cat /var/log/syslog", 1),
            Some("cat /var/log/messages".to_string())
        );
        assert_eq!(corrector.quick_fix("uname", 0), None);
    }
}
