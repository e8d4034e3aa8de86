//! Action executor: local subprocesses and SSH fan-out with risk gating,
//! timeouts, spinner/progress reporting, and error-analysis attachment.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tracing::{debug, info, warn};

use athena_triage::{CLASSIFICATION_THRESHOLD, ErrorAnalysis, ErrorAnalyzer};

use crate::redact::redact_sensitive_info;
use crate::risk::{Risk, RiskAssessor};
use crate::ssh::{SshConnection, SshTarget};

/// Synthetic exit code for timeouts and internal failures.
pub const EXIT_INTERNAL: i32 = -1;

#[derive(Debug, Clone)]
pub struct ExecOptions {
    pub confirm: bool,
    pub timeout_secs: u64,
    pub show_spinner: bool,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            confirm: false,
            timeout_secs: 60,
            show_spinner: true,
        }
    }
}

/// One entry of a batch.
#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub target: String,
    pub command: String,
    pub confirm: bool,
    pub timeout_secs: u64,
}

impl ActionRequest {
    pub fn new(target: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            command: command.into(),
            confirm: false,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub target: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub error: Option<String>,
    pub error_analysis: Option<ErrorAnalysis>,
    pub risk: Option<Risk>,
    pub action_index: Option<usize>,
    pub duration_ms: u64,
}

impl ExecutionResult {
    fn empty(target: &str) -> Self {
        Self {
            target: target.to_string(),
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            success: false,
            error: None,
            error_analysis: None,
            risk: None,
            action_index: None,
            duration_ms: 0,
        }
    }

    fn failure(target: &str, error: String) -> Self {
        Self {
            exit_code: EXIT_INTERNAL,
            error: Some(error),
            ..Self::empty(target)
        }
    }
}

fn is_local(target: &str) -> bool {
    matches!(target, "local" | "localhost")
}

pub struct ActionExecutor {
    risk: RiskAssessor,
    analyzer: Arc<ErrorAnalyzer>,
    targets: RwLock<HashMap<String, SshTarget>>,
    connections: RwLock<HashMap<String, Arc<Mutex<SshConnection>>>>,
    semaphores: std::sync::Mutex<HashMap<String, Arc<Semaphore>>>,
    connect_timeout_secs: u64,
}

impl ActionExecutor {
    pub fn new(analyzer: Arc<ErrorAnalyzer>) -> Self {
        Self {
            risk: RiskAssessor::new(),
            analyzer,
            targets: RwLock::new(HashMap::new()),
            connections: RwLock::new(HashMap::new()),
            semaphores: std::sync::Mutex::new(HashMap::new()),
            connect_timeout_secs: 15,
        }
    }

    pub fn risk_assessor(&self) -> &RiskAssessor {
        &self.risk
    }

    /// Register resolved SSH parameters for a host (from the inventory).
    pub async fn register_target(&self, target: SshTarget) {
        self.targets
            .write()
            .await
            .insert(target.host.clone(), target);
    }

    pub fn analyze_error(&self, error_text: &str) -> Option<ErrorAnalysis> {
        if error_text.is_empty() {
            return None;
        }
        Some(self.analyzer.analyze(error_text))
    }

    /// Whether a result indicates the caller should prompt for credentials.
    pub fn needs_credentials(&self, result: &ExecutionResult) -> bool {
        result
            .error_analysis
            .as_ref()
            .map(|a| a.needs_credentials)
            .unwrap_or(false)
    }

    /// Execute one command on one target.  Risk-gated commands return
    /// without spawning anything unless `confirm` is set.
    pub async fn execute(
        &self,
        target: &str,
        command: &str,
        opts: &ExecOptions,
    ) -> ExecutionResult {
        let risk = self.risk.assess(command);
        info!(
            target,
            command = %redact_sensitive_info(command),
            risk = risk.level.as_str(),
            "executing action"
        );

        if self.risk.requires_confirmation(risk.level) && !opts.confirm {
            let mut result = ExecutionResult::failure(
                target,
                format!(
                    "Action requires confirmation (risk: {}). Re-run with confirmation.",
                    risk.level.as_str()
                ),
            );
            result.risk = Some(risk);
            return result;
        }

        let started = Instant::now();
        let mut result = if is_local(target) {
            self.execute_local(target, command, opts.timeout_secs).await
        } else {
            self.execute_remote(target, command, opts).await
        };
        result.duration_ms = started.elapsed().as_millis() as u64;
        result.risk = Some(risk);

        if result.exit_code != 0 && !result.stderr.is_empty() {
            if let Some(analysis) = self.analyze_error(&result.stderr) {
                if analysis.confidence >= CLASSIFICATION_THRESHOLD {
                    debug!(
                        kind = %analysis.kind,
                        confidence = analysis.confidence,
                        "error classified"
                    );
                    result.error_analysis = Some(analysis);
                }
            }
        }

        result
    }

    async fn execute_local(&self, target: &str, command: &str, timeout_secs: u64) -> ExecutionResult {
        let output = tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            tokio::process::Command::new("sh").arg("-c").arg(command).output(),
        )
        .await;

        match output {
            Ok(Ok(output)) => {
                let exit_code = output.status.code().unwrap_or(EXIT_INTERNAL);
                ExecutionResult {
                    exit_code,
                    stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                    success: output.status.success(),
                    ..ExecutionResult::empty(target)
                }
            }
            Ok(Err(e)) => ExecutionResult::failure(target, format!("Failed to spawn command: {e}")),
            Err(_) => {
                warn!(timeout_secs, "local command timed out");
                ExecutionResult::failure(
                    target,
                    format!("Command timed out after {timeout_secs} seconds"),
                )
            }
        }
    }

    async fn execute_remote(
        &self,
        host: &str,
        command: &str,
        opts: &ExecOptions,
    ) -> ExecutionResult {
        let spinner = if opts.show_spinner {
            let spinner = ProgressBar::new_spinner();
            spinner.set_message(format!("running on {host}"));
            spinner.enable_steady_tick(Duration::from_millis(100));
            Some(spinner)
        } else {
            None
        };

        let result = self.execute_remote_inner(host, command, opts.timeout_secs).await;

        if let Some(spinner) = spinner {
            spinner.finish_and_clear();
        }
        result
    }

    async fn execute_remote_inner(
        &self,
        host: &str,
        command: &str,
        timeout_secs: u64,
    ) -> ExecutionResult {
        let target = {
            let targets = self.targets.read().await;
            targets.get(host).cloned().unwrap_or_else(|| SshTarget::new(host))
        };

        // Per-host bound on concurrent commands.
        let semaphore = {
            let mut semaphores = self.semaphores.lock().expect("semaphore registry lock");
            Arc::clone(
                semaphores
                    .entry(host.to_string())
                    .or_insert_with(|| Arc::new(Semaphore::new(target.max_concurrent))),
            )
        };
        let _permit = match semaphore.acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                return ExecutionResult::failure(host, "executor is shutting down".to_string());
            }
        };

        let connection = match self.connection_for(host, &target).await {
            Ok(connection) => connection,
            Err(e) => {
                // Surface the failure through stderr too so error analysis
                // can classify it (connection vs credential).
                let mut result = ExecutionResult::failure(host, e.to_string());
                result.stderr = e.to_string();
                return result;
            }
        };

        let run = async {
            let connection = connection.lock().await;
            connection.execute(command).await
        };
        match tokio::time::timeout(Duration::from_secs(timeout_secs), run).await {
            Ok(Ok(output)) => ExecutionResult {
                exit_code: output.exit_code,
                stdout: output.stdout.trim().to_string(),
                stderr: output.stderr.trim().to_string(),
                success: output.exit_code == 0,
                ..ExecutionResult::empty(host)
            },
            Ok(Err(e)) => {
                // Transport failure: drop the cached connection so the next
                // attempt reconnects.
                self.connections.write().await.remove(host);
                let mut result = ExecutionResult::failure(host, e.to_string());
                result.stderr = e.to_string();
                result
            }
            Err(_) => {
                warn!(host, timeout_secs, "remote command timed out");
                self.connections.write().await.remove(host);
                ExecutionResult::failure(
                    host,
                    format!("Command timed out after {timeout_secs} seconds"),
                )
            }
        }
    }

    async fn connection_for(
        &self,
        host: &str,
        target: &SshTarget,
    ) -> anyhow::Result<Arc<Mutex<SshConnection>>> {
        if let Some(existing) = self.connections.read().await.get(host) {
            return Ok(Arc::clone(existing));
        }
        let connection = SshConnection::connect(target, self.connect_timeout_secs).await?;
        let connection = Arc::new(Mutex::new(connection));
        self.connections
            .write()
            .await
            .insert(host.to_string(), Arc::clone(&connection));
        Ok(connection)
    }

    /// Execute a batch sequentially.  More than one action gets a progress
    /// bar and suppressed inner spinners; `stop_on_failure` halts at the
    /// first failed action.
    pub async fn execute_batch(
        &self,
        actions: &[ActionRequest],
        stop_on_failure: bool,
        show_progress: bool,
    ) -> Vec<ExecutionResult> {
        let mut results = Vec::with_capacity(actions.len());
        if actions.is_empty() {
            return results;
        }

        let bar = if show_progress && actions.len() > 1 {
            let bar = ProgressBar::new(actions.len() as u64);
            bar.set_style(
                ProgressStyle::with_template("{msg} [{bar:30}] {pos}/{len}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            bar.set_message(format!("Executing {} actions", actions.len()));
            Some(bar)
        } else {
            None
        };

        for (index, action) in actions.iter().enumerate() {
            if let Some(bar) = &bar {
                bar.set_message(format!("Executing on {}", action.target));
            }

            let opts = ExecOptions {
                confirm: action.confirm,
                timeout_secs: action.timeout_secs,
                show_spinner: bar.is_none(),
            };
            let mut result = self.execute(&action.target, &action.command, &opts).await;
            result.action_index = Some(index);
            let failed = !result.success;
            results.push(result);

            if let Some(bar) = &bar {
                bar.inc(1);
            }
            if stop_on_failure && failed {
                break;
            }
        }

        if let Some(bar) = bar {
            bar.finish_and_clear();
        }
        results
    }

    /// Parallel fan-out for behavior profiles that allow it.  Concurrency is
    /// bounded, each worker owns its own connection handle, and results come
    /// back in submission order.
    pub async fn execute_parallel(
        self: &Arc<Self>,
        actions: &[ActionRequest],
        max_concurrency: usize,
    ) -> Vec<ExecutionResult> {
        if actions.is_empty() {
            return vec![];
        }
        let limit = Arc::new(Semaphore::new(max_concurrency.max(1)));

        let futures: Vec<_> = actions
            .iter()
            .cloned()
            .enumerate()
            .map(|(index, action)| {
                let executor = Arc::clone(self);
                let limit = Arc::clone(&limit);
                async move {
                    let _permit = limit.acquire_owned().await;
                    let opts = ExecOptions {
                        confirm: action.confirm,
                        timeout_secs: action.timeout_secs,
                        show_spinner: false,
                    };
                    let mut result = executor
                        .execute(&action.target, &action.command, &opts)
                        .await;
                    result.action_index = Some(index);
                    result
                }
            })
            .collect();

        futures::future::join_all(futures).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> Arc<ActionExecutor> {
        Arc::new(ActionExecutor::new(Arc::new(ErrorAnalyzer::new())))
    }

    fn read_opts() -> ExecOptions {
        ExecOptions {
            confirm: false,
            timeout_secs: 10,
            show_spinner: false,
        }
    }

    #[tokio::test]
    async fn local_command_captures_output() {
        let exec = executor();
        let result = exec.execute("local", "echo hello", &read_opts()).await;
        // `echo` is not on the low-risk list, so it needs confirmation.
        assert!(!result.success);

        let confirmed = ExecOptions { confirm: true, ..read_opts() };
        let result = exec.execute("localhost", "echo hello", &confirmed).await;
        assert!(result.success);
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "hello");
    }

    #[tokio::test]
    async fn low_risk_commands_run_without_confirmation() {
        let exec = executor();
        let result = exec.execute("local", "uname", &read_opts()).await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn risk_gate_blocks_without_executing() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("should-not-exist");
        let command = format!("touch {}", marker.display());

        let exec = executor();
        let result = exec.execute("local", &command, &read_opts()).await;

        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("requires confirmation"));
        assert_eq!(result.risk.as_ref().unwrap().level.as_str(), "moderate");
        // The gate must fire before any process spawns.
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn nonzero_exit_attaches_error_analysis() {
        let exec = executor();
        let opts = ExecOptions { confirm: true, ..read_opts() };
        let result = exec
            .execute("local", "cat /definitely/not/a/real/path", &opts)
            .await;
        assert!(!result.success);
        let analysis = result.error_analysis.expect("analysis attached");
        assert_eq!(analysis.kind.as_str(), "not_found");
        assert!(exec.analyze_error("").is_none());
    }

    #[tokio::test]
    async fn timeout_produces_synthetic_exit() {
        let exec = executor();
        let opts = ExecOptions { confirm: true, timeout_secs: 1, show_spinner: false };
        let result = exec.execute("local", "sleep 5", &opts).await;
        assert!(!result.success);
        assert_eq!(result.exit_code, EXIT_INTERNAL);
        assert!(result.error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn batch_tags_indices_and_stops_on_failure() {
        let exec = executor();
        let actions = vec![
            ActionRequest { confirm: true, ..ActionRequest::new("local", "uname") },
            ActionRequest { confirm: true, ..ActionRequest::new("local", "false") },
            ActionRequest { confirm: true, ..ActionRequest::new("local", "uname") },
        ];

        let results = exec.execute_batch(&actions, true, false).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].action_index, Some(0));
        assert_eq!(results[1].action_index, Some(1));
        assert!(!results[1].success);

        let results = exec.execute_batch(&actions, false, false).await;
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn parallel_results_keep_submission_order() {
        let exec = executor();
        let actions: Vec<ActionRequest> = (0..4)
            .map(|i| ActionRequest {
                confirm: true,
                ..ActionRequest::new("local", format!("echo {i}"))
            })
            .collect();

        let results = exec.execute_parallel(&actions, 2).await;
        assert_eq!(results.len(), 4);
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.action_index, Some(i));
            assert_eq!(result.stdout, i.to_string());
        }
    }

    #[tokio::test]
    async fn credential_detection_from_analysis() {
        let exec = executor();
        let mut result = ExecutionResult::empty("db-01");
        assert!(!exec.needs_credentials(&result));

        result.error_analysis = exec.analyze_error("FATAL: password authentication failed");
        assert!(exec.needs_credentials(&result));
    }
}
