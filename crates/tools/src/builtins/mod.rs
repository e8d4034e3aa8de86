//! Built-in tools: the surface the orchestrator exposes to the LLM.

mod execute;
mod files;
mod interact;
mod inventory;
mod knowledge;
mod net;
mod sysinfo;
mod web;

pub use execute::{DockerExecTool, ExecuteCommandTool, KubectlExecTool, ServiceControlTool};
pub use files::{
    FindFileTool, GlobFilesTool, GrepFilesTool, ReadRemoteFileTool, TailLogsTool,
    WriteRemoteFileTool,
};
pub use interact::AskUserTool;
pub use inventory::{
    AuditHostTool, CheckPermissionsTool, GetInfrastructureContextTool, ListHostsTool,
    ScanHostTool,
};
pub use knowledge::{
    GetSolutionSuggestionTool, GraphStatsTool, RecallSkillTool, RecordIncidentTool,
    RememberSkillTool, SearchKnowledgeTool,
};
pub use net::{AddRouteTool, AnalyzeSecurityLogsTool};
pub use sysinfo::{DiskInfoTool, MemoryInfoTool, NetworkConnectionsTool, ProcessListTool};
pub use web::{WebFetchTool, WebSearchTool};

use std::collections::HashMap;
use std::sync::Arc;

use athena_exec::ExecOptions;

use crate::context::{GateDecision, ToolContext};
use crate::{ToolOutput, ToolRegistry};

/// Registry with every built-in registered.
pub fn default_registry(ctx: Arc<ToolContext>) -> ToolRegistry {
    let mut registry = ToolRegistry::default();

    // Inventory.
    registry.register(Box::new(ListHostsTool { ctx: Arc::clone(&ctx) }));
    registry.register(Box::new(ScanHostTool { ctx: Arc::clone(&ctx) }));
    registry.register(Box::new(GetInfrastructureContextTool { ctx: Arc::clone(&ctx) }));
    registry.register(Box::new(AuditHostTool { ctx: Arc::clone(&ctx) }));
    registry.register(Box::new(CheckPermissionsTool { ctx: Arc::clone(&ctx) }));

    // Execution.
    registry.register(Box::new(ExecuteCommandTool { ctx: Arc::clone(&ctx) }));
    registry.register(Box::new(ServiceControlTool { ctx: Arc::clone(&ctx) }));
    registry.register(Box::new(DockerExecTool { ctx: Arc::clone(&ctx) }));
    registry.register(Box::new(KubectlExecTool { ctx: Arc::clone(&ctx) }));

    // Files.
    registry.register(Box::new(ReadRemoteFileTool { ctx: Arc::clone(&ctx) }));
    registry.register(Box::new(WriteRemoteFileTool { ctx: Arc::clone(&ctx) }));
    registry.register(Box::new(TailLogsTool { ctx: Arc::clone(&ctx) }));
    registry.register(Box::new(GlobFilesTool { ctx: Arc::clone(&ctx) }));
    registry.register(Box::new(GrepFilesTool { ctx: Arc::clone(&ctx) }));
    registry.register(Box::new(FindFileTool { ctx: Arc::clone(&ctx) }));

    // System info.
    registry.register(Box::new(DiskInfoTool { ctx: Arc::clone(&ctx) }));
    registry.register(Box::new(MemoryInfoTool { ctx: Arc::clone(&ctx) }));
    registry.register(Box::new(ProcessListTool { ctx: Arc::clone(&ctx) }));
    registry.register(Box::new(NetworkConnectionsTool { ctx: Arc::clone(&ctx) }));

    // Knowledge & learning.
    registry.register(Box::new(RecordIncidentTool { ctx: Arc::clone(&ctx) }));
    registry.register(Box::new(SearchKnowledgeTool { ctx: Arc::clone(&ctx) }));
    registry.register(Box::new(GetSolutionSuggestionTool { ctx: Arc::clone(&ctx) }));
    registry.register(Box::new(GraphStatsTool { ctx: Arc::clone(&ctx) }));
    registry.register(Box::new(RememberSkillTool { ctx: Arc::clone(&ctx) }));
    registry.register(Box::new(RecallSkillTool { ctx: Arc::clone(&ctx) }));

    // Web & interaction.
    registry.register(Box::new(WebSearchTool { ctx: Arc::clone(&ctx) }));
    registry.register(Box::new(WebFetchTool { ctx: Arc::clone(&ctx) }));
    registry.register(Box::new(AskUserTool::default()));

    // Network maintenance.
    registry.register(Box::new(AddRouteTool { ctx: Arc::clone(&ctx) }));
    registry.register(Box::new(AnalyzeSecurityLogsTool { ctx }));

    registry
}

pub(crate) fn arg<'a>(args: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    args.get(key).map(String::as_str).filter(|v| !v.is_empty())
}

pub(crate) fn require<'a>(
    args: &'a HashMap<String, String>,
    key: &str,
) -> Result<&'a str, ToolOutput> {
    arg(args, key).ok_or_else(|| ToolOutput::fail(format!("missing required param: {key}")))
}

/// Quote a string for safe inclusion in a `sh -c` command line.
pub(crate) fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Run a command through the gate, then the executor, and render the result
/// for the LLM.
pub(crate) async fn run_gated(
    ctx: &ToolContext,
    target: &str,
    command: &str,
    timeout_secs: u64,
) -> ToolOutput {
    match ctx.clearance(command) {
        GateDecision::Approved => {}
        GateDecision::NeedsConfirmation { reason } => return ToolOutput::fail(reason),
        GateDecision::Paused { executed } => {
            return ToolOutput::fail(format!(
                "Command budget reached for this request ({executed} executed). \
                 Summarize progress and ask the user before continuing."
            ));
        }
    }

    let opts = ExecOptions {
        confirm: true,
        timeout_secs,
        show_spinner: false,
    };
    let result = ctx.executor.execute(target, command, &opts).await;
    render_result(&result)
}

/// Render an execution result into the string fed back to the LLM.
pub fn render_result(result: &athena_exec::ExecutionResult) -> ToolOutput {
    let mut output = String::new();
    output.push_str(&format!("exit_code={}\n", result.exit_code));
    if !result.stdout.is_empty() {
        output.push_str(&result.stdout);
        output.push('\n');
    }
    if !result.stderr.is_empty() {
        output.push_str("[stderr] ");
        output.push_str(&result.stderr);
        output.push('\n');
    }
    if let Some(error) = &result.error {
        output.push_str("[error] ");
        output.push_str(error);
        output.push('\n');
    }
    if let Some(analysis) = &result.error_analysis {
        output.push_str(&format!(
            "[analysis] kind={} confidence={:.2} suggestion={}\n",
            analysis.kind, analysis.confidence, analysis.suggested_action
        ));
    }

    const MAX_OUTPUT: usize = 16_384;
    if output.len() > MAX_OUTPUT {
        let mut end = MAX_OUTPUT;
        while end > 0 && !output.is_char_boundary(end) {
            end -= 1;
        }
        output.truncate(end);
        output.push_str("…[truncated]");
    }

    ToolOutput {
        success: result.success,
        output,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
