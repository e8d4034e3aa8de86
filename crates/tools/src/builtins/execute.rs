//! Execution tools: raw commands, service control, container exec.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::builtins::{arg, require, run_gated, shell_quote};
use crate::context::ToolContext;
use crate::{Tool, ToolOutput, ToolParam, ToolSpec};

pub struct ExecuteCommandTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl Tool for ExecuteCommandTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "execute_command".to_string(),
            description: "Execute a shell command on a target host ('local' for this machine)."
                .to_string(),
            params: vec![
                ToolParam::required("target", "Target host, or 'local'"),
                ToolParam::required("command", "Shell command to run"),
                ToolParam::required("reason", "Why this command is needed"),
            ],
        }
    }

    async fn run(&self, args: &HashMap<String, String>) -> Result<ToolOutput> {
        let target = match require(args, "target") {
            Ok(v) => v,
            Err(out) => return Ok(out),
        };
        let command = match require(args, "command") {
            Ok(v) => v,
            Err(out) => return Ok(out),
        };
        if let Some(reason) = arg(args, "reason") {
            info!(target, reason, "execute_command");
        }
        Ok(run_gated(&self.ctx, target, command, 60).await)
    }
}

const SERVICE_ACTIONS: &[&str] = &["status", "start", "stop", "restart", "reload", "enable", "disable"];

pub struct ServiceControlTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl Tool for ServiceControlTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "service_control".to_string(),
            description: "Manage a systemd service: status/start/stop/restart/reload/enable/disable."
                .to_string(),
            params: vec![
                ToolParam::required("host", "Target host"),
                ToolParam::required("service", "Service name, e.g. nginx"),
                ToolParam::required("action", "One of status, start, stop, restart, reload, enable, disable"),
            ],
        }
    }

    async fn run(&self, args: &HashMap<String, String>) -> Result<ToolOutput> {
        let host = match require(args, "host") {
            Ok(v) => v,
            Err(out) => return Ok(out),
        };
        let service = match require(args, "service") {
            Ok(v) => v,
            Err(out) => return Ok(out),
        };
        let action = match require(args, "action") {
            Ok(v) => v,
            Err(out) => return Ok(out),
        };
        if !SERVICE_ACTIONS.contains(&action) {
            return Ok(ToolOutput::fail(format!(
                "unsupported action '{action}', expected one of {SERVICE_ACTIONS:?}"
            )));
        }
        if service.contains(|c: char| c.is_whitespace() || c == ';' || c == '&' || c == '|') {
            return Ok(ToolOutput::fail("invalid service name"));
        }

        let command = format!("systemctl {action} {service}");
        Ok(run_gated(&self.ctx, host, &command, 60).await)
    }
}

pub struct DockerExecTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl Tool for DockerExecTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "docker_exec".to_string(),
            description: "Run a command inside a Docker container.".to_string(),
            params: vec![
                ToolParam::required("container", "Container name or id"),
                ToolParam::required("command", "Command to run inside the container"),
                ToolParam::optional("host", "Docker host (default: local)"),
            ],
        }
    }

    async fn run(&self, args: &HashMap<String, String>) -> Result<ToolOutput> {
        let container = match require(args, "container") {
            Ok(v) => v,
            Err(out) => return Ok(out),
        };
        let command = match require(args, "command") {
            Ok(v) => v,
            Err(out) => return Ok(out),
        };
        let host = arg(args, "host").unwrap_or("local");

        let full = format!(
            "docker exec {} sh -c {}",
            shell_quote(container),
            shell_quote(command)
        );
        Ok(run_gated(&self.ctx, host, &full, 60).await)
    }
}

pub struct KubectlExecTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl Tool for KubectlExecTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "kubectl_exec".to_string(),
            description: "Run a command inside a Kubernetes pod.".to_string(),
            params: vec![
                ToolParam::required("namespace", "Pod namespace"),
                ToolParam::required("pod", "Pod name"),
                ToolParam::required("command", "Command to run inside the pod"),
            ],
        }
    }

    async fn run(&self, args: &HashMap<String, String>) -> Result<ToolOutput> {
        let namespace = match require(args, "namespace") {
            Ok(v) => v,
            Err(out) => return Ok(out),
        };
        let pod = match require(args, "pod") {
            Ok(v) => v,
            Err(out) => return Ok(out),
        };
        let command = match require(args, "command") {
            Ok(v) => v,
            Err(out) => return Ok(out),
        };

        let full = format!(
            "kubectl exec -n {} {} -- sh -c {}",
            shell_quote(namespace),
            shell_quote(pod),
            shell_quote(command)
        );
        Ok(run_gated(&self.ctx, "local", &full, 60).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use athena_exec::ActionExecutor;
    use athena_memory::InventoryStore;
    use athena_triage::{ErrorAnalyzer, Priority, get_behavior};

    async fn ctx(priority: Priority) -> Arc<ToolContext> {
        let store = Arc::new(InventoryStore::open_in_memory().await.unwrap());
        let executor = Arc::new(ActionExecutor::new(Arc::new(ErrorAnalyzer::new())));
        let ctx = ToolContext::new(store, executor, None);
        ctx.reset_gate(get_behavior(priority), false);
        Arc::new(ctx)
    }

    fn args(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn execute_command_runs_reads_locally() {
        let tool = ExecuteCommandTool { ctx: ctx(Priority::P1).await };
        let output = tool
            .run(&args(&[("target", "local"), ("command", "uname"), ("reason", "test")]))
            .await
            .unwrap();
        assert!(output.success);
        assert!(output.output.contains("exit_code=0"));
    }

    #[tokio::test]
    async fn critical_commands_need_confirmation_in_p1() {
        let tool = ExecuteCommandTool { ctx: ctx(Priority::P1).await };
        let output = tool
            .run(&args(&[
                ("target", "local"),
                ("command", "systemctl restart nginx"),
                ("reason", "test"),
            ]))
            .await
            .unwrap();
        assert!(!output.success);
        assert!(output.output.contains("requires confirmation"));
    }

    #[tokio::test]
    async fn service_control_validates_action() {
        let tool = ServiceControlTool { ctx: ctx(Priority::P1).await };
        let output = tool
            .run(&args(&[("host", "web-01"), ("service", "nginx"), ("action", "explode")]))
            .await
            .unwrap();
        assert!(!output.success);
        assert!(output.output.contains("unsupported action"));

        let output = tool
            .run(&args(&[("host", "web-01"), ("service", "a;b"), ("action", "status")]))
            .await
            .unwrap();
        assert!(!output.success);
    }
}
