//! System information tools: disk, memory, processes, network.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::builtins::{arg, require, run_gated, shell_quote};
use crate::context::ToolContext;
use crate::{Tool, ToolOutput, ToolParam, ToolSpec};

pub struct DiskInfoTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl Tool for DiskInfoTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "disk_info".to_string(),
            description: "Disk usage on a host, optionally for one mount point.".to_string(),
            params: vec![
                ToolParam::required("host", "Target host"),
                ToolParam::optional("path", "Mount point or path (default: all)"),
            ],
        }
    }

    async fn run(&self, args: &HashMap<String, String>) -> Result<ToolOutput> {
        let host = match require(args, "host") {
            Ok(v) => v,
            Err(out) => return Ok(out),
        };
        let command = match arg(args, "path") {
            Some(path) => format!("df -h {}", shell_quote(path)),
            None => "df -h".to_string(),
        };
        Ok(run_gated(&self.ctx, host, &command, 20).await)
    }
}

pub struct MemoryInfoTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl Tool for MemoryInfoTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "memory_info".to_string(),
            description: "Memory and swap usage on a host.".to_string(),
            params: vec![ToolParam::required("host", "Target host")],
        }
    }

    async fn run(&self, args: &HashMap<String, String>) -> Result<ToolOutput> {
        let host = match require(args, "host") {
            Ok(v) => v,
            Err(out) => return Ok(out),
        };
        Ok(run_gated(&self.ctx, host, "free -m", 20).await)
    }
}

pub struct ProcessListTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl Tool for ProcessListTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "process_list".to_string(),
            description: "List processes on a host, optionally filtered and sorted.".to_string(),
            params: vec![
                ToolParam::required("host", "Target host"),
                ToolParam::optional("filter", "Only processes whose line contains this string"),
                ToolParam::optional("sort_by", "cpu or memory (default cpu)"),
            ],
        }
    }

    async fn run(&self, args: &HashMap<String, String>) -> Result<ToolOutput> {
        let host = match require(args, "host") {
            Ok(v) => v,
            Err(out) => return Ok(out),
        };
        let sort = match arg(args, "sort_by") {
            Some("memory") | Some("mem") => "-%mem",
            _ => "-%cpu",
        };
        let mut command = format!("(ps aux --sort={sort} 2>/dev/null || ps aux)");
        if let Some(filter) = arg(args, "filter") {
            command.push_str(&format!(" | grep -F {} | grep -v grep", shell_quote(filter)));
        }
        command.push_str(" | head -30");
        Ok(run_gated(&self.ctx, host, &command, 20).await)
    }
}

pub struct NetworkConnectionsTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl Tool for NetworkConnectionsTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "network_connections".to_string(),
            description: "List network connections on a host, optionally filtered by port or \
                          state."
                .to_string(),
            params: vec![
                ToolParam::required("host", "Target host"),
                ToolParam::optional("port", "Filter by port number"),
                ToolParam::optional("state", "Filter by state, e.g. listening, established"),
            ],
        }
    }

    async fn run(&self, args: &HashMap<String, String>) -> Result<ToolOutput> {
        let host = match require(args, "host") {
            Ok(v) => v,
            Err(out) => return Ok(out),
        };
        let mut command = "ss -tunap 2>/dev/null".to_string();
        if let Some(state) = arg(args, "state") {
            let normalized = match state.to_lowercase().as_str() {
                "listening" | "listen" => "listening",
                "established" => "established",
                other => {
                    return Ok(ToolOutput::fail(format!("unsupported state filter: {other}")))
                }
            };
            command = format!("ss -tunap state {normalized} 2>/dev/null");
        }
        if let Some(port) = arg(args, "port").and_then(|p| p.parse::<u16>().ok()) {
            command.push_str(&format!(" | grep -F ':{port}'"));
        }
        command.push_str(" | head -40");
        Ok(run_gated(&self.ctx, host, &command, 20).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use athena_exec::ActionExecutor;
    use athena_memory::InventoryStore;
    use athena_triage::{ErrorAnalyzer, Priority, get_behavior};

    async fn ctx() -> Arc<ToolContext> {
        let store = Arc::new(InventoryStore::open_in_memory().await.unwrap());
        let executor = Arc::new(ActionExecutor::new(Arc::new(ErrorAnalyzer::new())));
        let ctx = ToolContext::new(store, executor, None);
        ctx.reset_gate(get_behavior(Priority::P0), false);
        Arc::new(ctx)
    }

    fn args(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn disk_info_runs_df() {
        let tool = DiskInfoTool { ctx: ctx().await };
        let output = tool.run(&args(&[("host", "local")])).await.unwrap();
        assert!(output.success);
        assert!(output.output.contains("exit_code=0"));
    }

    #[tokio::test]
    async fn network_connections_rejects_bad_state() {
        let tool = NetworkConnectionsTool { ctx: ctx().await };
        let output = tool
            .run(&args(&[("host", "local"), ("state", "weird")]))
            .await
            .unwrap();
        assert!(!output.success);
    }
}
