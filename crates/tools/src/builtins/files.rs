//! File tools: remote reads/writes, log tailing, glob/grep/find.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::builtins::{arg, require, run_gated, shell_quote};
use crate::context::ToolContext;
use crate::{Tool, ToolOutput, ToolParam, ToolSpec};

pub struct ReadRemoteFileTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl Tool for ReadRemoteFileTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "read_remote_file".to_string(),
            description: "Read a file from a host, optionally only the first N lines.".to_string(),
            params: vec![
                ToolParam::required("host", "Target host"),
                ToolParam::required("path", "File path"),
                ToolParam::optional("lines", "Read only the first N lines"),
            ],
        }
    }

    async fn run(&self, args: &HashMap<String, String>) -> Result<ToolOutput> {
        let host = match require(args, "host") {
            Ok(v) => v,
            Err(out) => return Ok(out),
        };
        let path = match require(args, "path") {
            Ok(v) => v,
            Err(out) => return Ok(out),
        };
        let command = match arg(args, "lines").and_then(|l| l.parse::<u32>().ok()) {
            Some(lines) => format!("head -n {lines} {}", shell_quote(path)),
            None => format!("cat {}", shell_quote(path)),
        };
        Ok(run_gated(&self.ctx, host, &command, 30).await)
    }
}

pub struct WriteRemoteFileTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl Tool for WriteRemoteFileTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "write_remote_file".to_string(),
            description: "Write content to a file on a host. Makes a timestamped backup first \
                          unless backup=false."
                .to_string(),
            params: vec![
                ToolParam::required("host", "Target host"),
                ToolParam::required("path", "File path"),
                ToolParam::required("content", "Content to write"),
                ToolParam::optional("backup", "Set to 'false' to skip the backup copy"),
            ],
        }
    }

    async fn run(&self, args: &HashMap<String, String>) -> Result<ToolOutput> {
        let host = match require(args, "host") {
            Ok(v) => v,
            Err(out) => return Ok(out),
        };
        let path = match require(args, "path") {
            Ok(v) => v,
            Err(out) => return Ok(out),
        };
        let content = args.get("content").map(String::as_str).unwrap_or("");
        let backup = arg(args, "backup") != Some("false");

        let quoted_path = shell_quote(path);
        let mut command = String::new();
        if backup {
            let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S");
            command.push_str(&format!(
                "[ -f {quoted_path} ] && cp {quoted_path} {quoted_path}.bak.{stamp}; "
            ));
        }
        command.push_str(&format!("printf '%s' {} > {quoted_path}", shell_quote(content)));
        Ok(run_gated(&self.ctx, host, &command, 30).await)
    }
}

pub struct TailLogsTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl Tool for TailLogsTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "tail_logs".to_string(),
            description: "Tail a log file on a host, optionally filtering lines.".to_string(),
            params: vec![
                ToolParam::required("host", "Target host"),
                ToolParam::required("path", "Log file path"),
                ToolParam::optional("lines", "Number of lines (default 50)"),
                ToolParam::optional("grep", "Only lines containing this string"),
            ],
        }
    }

    async fn run(&self, args: &HashMap<String, String>) -> Result<ToolOutput> {
        let host = match require(args, "host") {
            Ok(v) => v,
            Err(out) => return Ok(out),
        };
        let path = match require(args, "path") {
            Ok(v) => v,
            Err(out) => return Ok(out),
        };
        let lines = arg(args, "lines")
            .and_then(|l| l.parse::<u32>().ok())
            .unwrap_or(50);

        let mut command = format!("tail -n {lines} {}", shell_quote(path));
        if let Some(filter) = arg(args, "grep") {
            command.push_str(&format!(" | grep -F {}", shell_quote(filter)));
        }
        Ok(run_gated(&self.ctx, host, &command, 30).await)
    }
}

pub struct GlobFilesTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl Tool for GlobFilesTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "glob_files".to_string(),
            description: "List files matching a shell glob pattern on a host.".to_string(),
            params: vec![
                ToolParam::required("host", "Target host"),
                ToolParam::required("pattern", "Glob pattern, e.g. /etc/nginx/*.conf"),
            ],
        }
    }

    async fn run(&self, args: &HashMap<String, String>) -> Result<ToolOutput> {
        let host = match require(args, "host") {
            Ok(v) => v,
            Err(out) => return Ok(out),
        };
        let pattern = match require(args, "pattern") {
            Ok(v) => v,
            Err(out) => return Ok(out),
        };
        // The pattern must stay unquoted for the shell to expand it.
        let command = format!("ls -1d {} 2>/dev/null | head -100", pattern);
        Ok(run_gated(&self.ctx, host, &command, 30).await)
    }
}

pub struct GrepFilesTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl Tool for GrepFilesTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "grep_files".to_string(),
            description: "Search file contents recursively under a path on a host.".to_string(),
            params: vec![
                ToolParam::required("host", "Target host"),
                ToolParam::required("pattern", "Text to search for"),
                ToolParam::required("path", "Directory or file to search"),
            ],
        }
    }

    async fn run(&self, args: &HashMap<String, String>) -> Result<ToolOutput> {
        let host = match require(args, "host") {
            Ok(v) => v,
            Err(out) => return Ok(out),
        };
        let pattern = match require(args, "pattern") {
            Ok(v) => v,
            Err(out) => return Ok(out),
        };
        let path = match require(args, "path") {
            Ok(v) => v,
            Err(out) => return Ok(out),
        };
        let command = format!(
            "grep -rn -F {} {} 2>/dev/null | head -50",
            shell_quote(pattern),
            shell_quote(path)
        );
        Ok(run_gated(&self.ctx, host, &command, 60).await)
    }
}

pub struct FindFileTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl Tool for FindFileTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "find_file".to_string(),
            description: "Find files by name under a path on a host.".to_string(),
            params: vec![
                ToolParam::required("host", "Target host"),
                ToolParam::required("name", "File name or pattern, e.g. nginx.conf"),
                ToolParam::optional("path", "Search root (default /)"),
            ],
        }
    }

    async fn run(&self, args: &HashMap<String, String>) -> Result<ToolOutput> {
        let host = match require(args, "host") {
            Ok(v) => v,
            Err(out) => return Ok(out),
        };
        let name = match require(args, "name") {
            Ok(v) => v,
            Err(out) => return Ok(out),
        };
        let path = arg(args, "path").unwrap_or("/");
        let command = format!(
            "find {} -name {} 2>/dev/null | head -20",
            shell_quote(path),
            shell_quote(name)
        );
        Ok(run_gated(&self.ctx, host, &command, 60).await)
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
        ctx.reset_gate(get_behavior(Priority::P1), false);
        Arc::new(ctx)
    }

    fn args(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn read_file_locally() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "line1\nline2\nline3\n").unwrap();

        let tool = ReadRemoteFileTool { ctx: ctx().await };
        let output = tool
            .run(&args(&[
                ("host", "local"),
                ("path", path.to_str().unwrap()),
                ("lines", "2"),
            ]))
            .await
            .unwrap();
        assert!(output.success);
        assert!(output.output.contains("line1"));
        assert!(output.output.contains("line2"));
        assert!(!output.output.contains("line3"));
    }

    #[tokio::test]
    async fn tail_with_grep_filter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svc.log");
        std::fs::write(&path, "ok\nerror: boom\nok\n").unwrap();

        let tool = TailLogsTool { ctx: ctx().await };
        let output = tool
            .run(&args(&[
                ("host", "localhost"),
                ("path", path.to_str().unwrap()),
                ("grep", "error"),
            ]))
            .await
            .unwrap();
        assert!(output.success);
        assert!(output.output.contains("boom"));
        assert!(!output.output.contains("\nok"));
    }

    #[tokio::test]
    async fn write_is_gated_as_a_write() {
        // P3 confirms everything; the write must be blocked.
        let store = Arc::new(InventoryStore::open_in_memory().await.unwrap());
        let executor = Arc::new(ActionExecutor::new(Arc::new(ErrorAnalyzer::new())));
        let ctx = ToolContext::new(store, executor, None);
        ctx.reset_gate(get_behavior(Priority::P3), false);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf");
        let tool = WriteRemoteFileTool { ctx: Arc::new(ctx) };
        let output = tool
            .run(&args(&[
                ("host", "local"),
                ("path", path.to_str().unwrap()),
                ("content", "x"),
            ]))
            .await
            .unwrap();
        assert!(!output.success);
        assert!(!path.exists());
    }
}
