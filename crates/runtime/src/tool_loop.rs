//! The LLM tool-dispatch loop.
//!
//! Each round sends the conversation plus the tool schema to the model.
//! Tool calls are dispatched one at a time (a conversation is strictly
//! ordered) and their results fed back as tool-role messages; plain text
//! ends the loop.  The final round withholds the schema to force a text
//! answer, and cancellation is honored between tool calls only — a call in
//! flight runs to its own timeout.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use athena_llm::{ChatMessage, LlmError, LlmRouter, TaskKind, ToolCall};

/// Completion phrases (English and French) that, together with an explicit
/// `terminate`, end the loop.
const COMPLETION_PHRASES: &[&str] = &[
    "task completed",
    "task is complete",
    "successfully completed",
    "all done",
    "request fulfilled",
    "here is the summary",
    "the task has been completed",
    "i have completed",
    "tâche terminée",
    "tâche complétée",
    "voici le résumé",
    "mission accomplie",
    "travail terminé",
];

/// Whether an assistant message signals completion.
pub fn is_termination_message(content: &str) -> bool {
    let lowered = content.to_lowercase();
    if lowered.trim_end().ends_with("terminate") {
        return true;
    }
    lowered.contains("terminate") && COMPLETION_PHRASES.iter().any(|p| lowered.contains(p))
}

/// Remove the trailing termination marker from the final answer.
pub fn strip_termination(content: &str) -> String {
    let trimmed = content.trim_end();
    let marker = "terminate".len();
    if trimmed.len() >= marker
        && trimmed.is_char_boundary(trimmed.len() - marker)
        && trimmed[trimmed.len() - marker..].eq_ignore_ascii_case("terminate")
    {
        return trimmed[..trimmed.len() - marker]
            .trim_end_matches(['\n', ' ', '.', ':'])
            .to_string();
    }
    trimmed.to_string()
}

/// Record of one tool execution inside the loop.
#[derive(Debug, Clone)]
pub struct ToolExecutionRecord {
    pub tool_name: String,
    pub args: serde_json::Value,
    pub success: bool,
    pub output: String,
}

/// Outcome of a full loop run.
#[derive(Debug, Clone)]
pub struct ToolLoopOutcome {
    pub content: String,
    pub rounds: u32,
    pub executions: Vec<ToolExecutionRecord>,
    pub cancelled: bool,
}

/// Executes one tool call.  Implemented by the orchestrator so the loop
/// itself stays free of executor/store plumbing.
#[async_trait]
pub trait ToolDispatcher: Send {
    async fn dispatch(&mut self, call: &ToolCall) -> ToolExecutionRecord;
}

/// Run the tool loop until the model produces a terminal text answer, the
/// round budget runs out, or the request is cancelled.
pub async fn run_tool_loop(
    llm: &LlmRouter,
    mut messages: Vec<ChatMessage>,
    tools_json: Option<serde_json::Value>,
    max_rounds: u32,
    cancel: &CancellationToken,
    dispatcher: &mut dyn ToolDispatcher,
) -> Result<ToolLoopOutcome, LlmError> {
    let mut executions: Vec<ToolExecutionRecord> = Vec::new();
    let mut final_content = String::new();
    let mut cancelled = false;
    let mut rounds = 0u32;

    for round in 0..max_rounds {
        rounds = round + 1;
        if cancel.is_cancelled() {
            cancelled = true;
            break;
        }
        debug!(round, messages = messages.len(), "tool loop iteration");

        // Withhold the schema on the final round to force a text answer.
        let effective_tools = if round + 1 < max_rounds {
            tools_json.clone()
        } else {
            warn!(max_rounds, "tool loop hit round budget, forcing text response");
            None
        };

        let response = llm
            .chat(messages.clone(), effective_tools, TaskKind::Chat)
            .await?;

        if response.tool_calls.is_empty() {
            final_content = response.content;
            break;
        }

        info!(round, count = response.tool_calls.len(), "LLM requested tool calls");
        messages.push(ChatMessage::assistant_tool_calls(response.tool_calls.clone()));

        // One call at a time: the conversation is strictly ordered.
        for call in &response.tool_calls {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let record = dispatcher.dispatch(call).await;
            messages.push(ChatMessage::tool_result(&call.id, &record.output));
            executions.push(record);
        }
        if cancelled {
            break;
        }
    }

    // A loop that exhausted without text still owes the user something.
    if final_content.is_empty() && !executions.is_empty() && !cancelled {
        final_content = executions
            .iter()
            .map(|e| {
                let preview_len = e.output.len().min(500);
                let mut end = preview_len;
                while end > 0 && !e.output.is_char_boundary(end) {
                    end -= 1;
                }
                format!("[{}]: {}", e.tool_name, &e.output[..end])
            })
            .collect::<Vec<_>>()
            .join("\n\n");
    }

    Ok(ToolLoopOutcome {
        content: final_content,
        rounds,
        executions,
        cancelled,
    })
}

/// Flatten a JSON arguments object into the string map the tools consume.
pub fn json_args_to_map(args: &serde_json::Value) -> HashMap<String, String> {
    args.as_object()
        .map(|object| {
            object
                .iter()
                .map(|(key, value)| {
                    let rendered = match value {
                        serde_json::Value::String(s) => s.clone(),
                        serde_json::Value::Number(n) => n.to_string(),
                        serde_json::Value::Bool(b) => b.to_string(),
                        serde_json::Value::Null => String::new(),
                        other => other.to_string(),
                    };
                    (key.clone(), rendered)
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use athena_llm::{ChatResponse, LlmClient, ToolCallFunction};
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn termination_detection() {
        assert!(is_termination_message("All hosts healthy.\nTERMINATE"));
        assert!(is_termination_message("task completed, terminate now"));
        assert!(!is_termination_message("I will terminate the process with kill"));
        assert!(!is_termination_message("task completed"));
    }

    #[test]
    fn strips_trailing_marker() {
        assert_eq!(strip_termination("done.\nTERMINATE"), "done");
        assert_eq!(strip_termination("no marker here"), "no marker here");
    }

    #[test]
    fn args_map_handles_types() {
        let map = json_args_to_map(&json!({
            "target": "web-01",
            "count": 5,
            "verbose": true,
            "empty": null,
        }));
        assert_eq!(map["target"], "web-01");
        assert_eq!(map["count"], "5");
        assert_eq!(map["verbose"], "true");
        assert_eq!(map["empty"], "");
    }

    struct ScriptedChat {
        responses: Vec<ChatResponse>,
        cursor: AtomicUsize,
    }

    #[async_trait]
    impl LlmClient for ScriptedChat {
        async fn generate(
            &self,
            _prompt: &str,
            _system: &str,
            _task: TaskKind,
        ) -> Result<String, LlmError> {
            Ok(String::new())
        }

        async fn chat(
            &self,
            _messages: &[ChatMessage],
            _tools: Option<&serde_json::Value>,
            _task: TaskKind,
        ) -> Result<ChatResponse, LlmError> {
            let i = self.cursor.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .responses
                .get(i)
                .cloned()
                .unwrap_or_else(|| ChatResponse {
                    content: "fallback TERMINATE".to_string(),
                    tool_calls: vec![],
                }))
        }
    }

    fn tool_call(name: &str) -> ToolCall {
        ToolCall {
            id: format!("call-{name}"),
            r#type: "function".to_string(),
            function: ToolCallFunction {
                name: name.to_string(),
                arguments: json!({}),
            },
        }
    }

    struct EchoDispatcher {
        calls: Vec<String>,
    }

    #[async_trait]
    impl ToolDispatcher for EchoDispatcher {
        async fn dispatch(&mut self, call: &ToolCall) -> ToolExecutionRecord {
            self.calls.push(call.function.name.clone());
            ToolExecutionRecord {
                tool_name: call.function.name.clone(),
                args: call.function.arguments.clone(),
                success: true,
                output: format!("{} ok", call.function.name),
            }
        }
    }

    #[tokio::test]
    async fn loop_dispatches_then_returns_text() {
        let client = ScriptedChat {
            responses: vec![
                ChatResponse {
                    content: String::new(),
                    tool_calls: vec![tool_call("list_hosts"), tool_call("disk_info")],
                },
                ChatResponse {
                    content: "2 hosts, disks fine. TERMINATE".to_string(),
                    tool_calls: vec![],
                },
            ],
            cursor: AtomicUsize::new(0),
        };
        let llm = LlmRouter::new(Arc::new(client), 5);
        let mut dispatcher = EchoDispatcher { calls: vec![] };

        let outcome = run_tool_loop(
            &llm,
            vec![ChatMessage::user("check the fleet")],
            Some(json!([])),
            10,
            &CancellationToken::new(),
            &mut dispatcher,
        )
        .await
        .unwrap();

        assert_eq!(dispatcher.calls, vec!["list_hosts", "disk_info"]);
        assert_eq!(outcome.executions.len(), 2);
        assert!(outcome.content.contains("2 hosts"));
        assert!(!outcome.cancelled);
    }

    #[tokio::test]
    async fn round_budget_forces_text() {
        // The model keeps calling tools forever; the loop must cut it off.
        let endless: Vec<ChatResponse> = (0..20)
            .map(|_| ChatResponse {
                content: String::new(),
                tool_calls: vec![tool_call("uptime_check")],
            })
            .collect();
        let client = ScriptedChat {
            responses: endless,
            cursor: AtomicUsize::new(0),
        };
        let llm = LlmRouter::new(Arc::new(client), 5);
        let mut dispatcher = EchoDispatcher { calls: vec![] };

        let outcome = run_tool_loop(
            &llm,
            vec![ChatMessage::user("loop forever")],
            Some(json!([])),
            3,
            &CancellationToken::new(),
            &mut dispatcher,
        )
        .await
        .unwrap();

        assert_eq!(outcome.rounds, 3);
        // Round 3 was sent without tools, so the scripted client still
        // requested calls; they were executed and summarized.
        assert!(!outcome.executions.is_empty());
    }

    #[tokio::test]
    async fn cancellation_stops_between_calls() {
        let client = ScriptedChat {
            responses: vec![ChatResponse {
                content: String::new(),
                tool_calls: vec![tool_call("first"), tool_call("second")],
            }],
            cursor: AtomicUsize::new(0),
        };
        let llm = LlmRouter::new(Arc::new(client), 5);

        struct CancellingDispatcher {
            token: CancellationToken,
            ran: Vec<String>,
        }

        #[async_trait]
        impl ToolDispatcher for CancellingDispatcher {
            async fn dispatch(&mut self, call: &ToolCall) -> ToolExecutionRecord {
                self.ran.push(call.function.name.clone());
                // The user hits ctrl-c while the first call runs.
                self.token.cancel();
                ToolExecutionRecord {
                    tool_name: call.function.name.clone(),
                    args: serde_json::Value::Null,
                    success: true,
                    output: "done".to_string(),
                }
            }
        }

        let token = CancellationToken::new();
        let mut dispatcher = CancellingDispatcher {
            token: token.clone(),
            ran: vec![],
        };

        let outcome = run_tool_loop(
            &llm,
            vec![ChatMessage::user("cancel me")],
            Some(json!([])),
            10,
            &token,
            &mut dispatcher,
        )
        .await
        .unwrap();

        // The in-flight call finished; the second never started.
        assert_eq!(dispatcher.ran, vec!["first"]);
        assert!(outcome.cancelled);
    }
}
