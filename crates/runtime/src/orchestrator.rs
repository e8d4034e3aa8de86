//! Per-request orchestration: conversation upkeep, triage, the tool loop,
//! failure recovery, and the session audit trail.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use athena_config::AppConfig;
use athena_exec::{
    ActionContext, ActionExecutor, AutoCorrector, ExecOptions, ExecutionResult,
};
use athena_llm::{ChatMessage, LlmError, LlmRouter, ToolCall};
use athena_memory::{ConversationManager, InventoryStore, SecondaryStore};
use athena_tools::builtins::{default_registry, render_result};
use athena_tools::{GateDecision, ToolContext, ToolRegistry, specs_to_openai_tools};
use athena_triage::{
    BehaviorProfile, Intent, PriorityResult, ResponseFormat, SmartClassifier, SystemState,
    get_behavior, get_smart_classifier, should_retry,
};

use crate::presenter::{Language, Presenter};
use crate::tool_loop::{
    ToolDispatcher, ToolExecutionRecord, json_args_to_map, run_tool_loop, strip_termination,
};

/// Options for one request.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Confirmation pre-granted (e.g. `--confirm` on the CLI).
    pub auto_confirm: bool,
    /// Classify and plan but do not execute.
    pub dry_run: bool,
    pub system_state: Option<SystemState>,
}

/// An action executed during a request, kept for the session audit trail.
#[derive(Debug, Clone)]
struct ExecutedAction {
    target: String,
    command: String,
    exit_code: i32,
    stdout: String,
    stderr: String,
    risk_level: String,
    duration_ms: u64,
}

pub struct Orchestrator {
    config: AppConfig,
    llm: LlmRouter,
    store: Arc<InventoryStore>,
    classifier: Arc<SmartClassifier>,
    executor: Arc<ActionExecutor>,
    corrector: Arc<AutoCorrector>,
    registry: Arc<ToolRegistry>,
    tool_ctx: Arc<ToolContext>,
    conversation: ConversationManager,
    presenter: Presenter,
    cancel: CancellationToken,
    session_id: String,
    pub current_priority: Option<PriorityResult>,
    pub current_behavior: Option<BehaviorProfile>,
}

impl Orchestrator {
    /// Wire the full stack from configuration and shared stores.
    pub async fn build(
        config: AppConfig,
        llm: LlmRouter,
        store: Arc<InventoryStore>,
        secondary: Option<Arc<SecondaryStore>>,
        executor: Arc<ActionExecutor>,
    ) -> Result<Self> {
        let language = config
            .runtime
            .language
            .parse::<Language>()
            .unwrap_or(Language::En);
        let presenter = Presenter::new(language);

        let classifier = get_smart_classifier(secondary.clone(), "default", false);
        let corrector = Arc::new(AutoCorrector::new(
            llm.clone(),
            Arc::clone(&executor),
            config.corrector.max_retries,
        ));

        let tool_ctx = Arc::new(
            ToolContext::new(Arc::clone(&store), Arc::clone(&executor), secondary)
                .with_web_search_key(std::env::var("BRAVE_API_KEY").ok()),
        );
        let registry = Arc::new(default_registry(Arc::clone(&tool_ctx)));

        let conversation = ConversationManager::new(
            Arc::clone(&store),
            config.conversation.token_limit,
            config.conversation.compact_threshold,
        )
        .await?;

        let session_id = format!("sess_{}", uuid::Uuid::new_v4().simple());
        store.start_session(&session_id, None).await?;

        Ok(Self {
            config,
            llm,
            store,
            classifier,
            executor,
            corrector,
            registry,
            tool_ctx,
            conversation,
            presenter,
            cancel: CancellationToken::new(),
            session_id,
            current_priority: None,
            current_behavior: None,
        })
    }

    /// Token the caller can cancel on ctrl-c; honored between tool calls.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn conversation(&self) -> &ConversationManager {
        &self.conversation
    }

    pub fn conversation_mut(&mut self) -> &mut ConversationManager {
        &mut self.conversation
    }

    /// Process one user request end to end.
    pub async fn process_request(&mut self, query: &str, opts: &RequestOptions) -> Result<String> {
        let started = std::time::Instant::now();

        // 1. Conversation upkeep.
        self.conversation.add_user_message(query).await?;
        if self.conversation.must_compact() {
            self.conversation
                .compact_conversation(None::<fn(&athena_memory::Conversation) -> String>)
                .await?;
        } else if self.conversation.should_compact() {
            self.presenter.show_compaction_warning(
                self.conversation.current_tokens(),
                self.config.conversation.token_limit,
            );
        }

        // 2. Triage.
        let (intent, priority_result) = self
            .classifier
            .classify(query, opts.system_state.as_ref());
        let behavior = get_behavior(priority_result.priority);
        info!(
            priority = priority_result.priority.name(),
            %intent,
            confidence = priority_result.confidence,
            "request classified"
        );

        // 3. Display.
        self.presenter.show_triage(&priority_result, intent);

        self.current_priority = Some(priority_result.clone());
        self.current_behavior = Some(behavior);
        self.tool_ctx.reset_gate(behavior, opts.auto_confirm);

        if opts.dry_run {
            let response = format!(
                "Dry run: would handle this as {} / {} with up to {} commands.",
                priority_result.priority.name(),
                intent,
                behavior.max_commands_before_pause
            );
            self.conversation.add_assistant_message(&response).await?;
            return Ok(response);
        }

        // 4. Tool-dispatch loop.
        let messages = self.build_messages(&behavior, intent);
        let tools_json = specs_to_openai_tools(
            &self.registry.list_specs(),
            intent.allowed_tools(),
        );

        let mut dispatcher = RequestDispatcher {
            registry: Arc::clone(&self.registry),
            tool_ctx: Arc::clone(&self.tool_ctx),
            executor: Arc::clone(&self.executor),
            corrector: Arc::clone(&self.corrector),
            presenter: self.presenter.clone(),
            actions: Vec::new(),
        };

        let outcome = run_tool_loop(
            &self.llm,
            messages,
            Some(tools_json),
            self.config.runtime.max_consecutive_auto_reply,
            &self.cancel,
            &mut dispatcher,
        )
        .await;

        let (response, response_type) = match outcome {
            Ok(outcome) if outcome.cancelled => {
                ("Request cancelled.".to_string(), "cancelled")
            }
            Ok(outcome) => {
                let text = strip_termination(&outcome.content);
                let text = if text.is_empty() {
                    "Done.".to_string()
                } else {
                    text
                };
                // The classification was used without correction: implicit
                // positive feedback.
                self.classifier.confirm_classification(query);
                (text, "answer")
            }
            Err(LlmError::Timeout(secs)) => (
                format!(
                    "The assistant did not answer within {secs}s. The request was not completed; \
                     try again or increase ATHENA_LLM_TIMEOUT."
                ),
                "error",
            ),
            Err(e) => {
                warn!(error = %e, "tool loop failed");
                (format!("LLM error: {e}"), "error")
            }
        };

        // 5. Persist the exchange and the audit trail.
        self.conversation.add_assistant_message(&response).await?;
        let query_id = self
            .store
            .log_query(
                &self.session_id,
                query,
                &response,
                response_type,
                dispatcher.actions.len() as i64,
                started.elapsed().as_millis() as i64,
            )
            .await?;
        for action in &dispatcher.actions {
            self.store
                .log_action(
                    query_id,
                    &self.session_id,
                    &action.target,
                    &action.command,
                    Some(action.exit_code as i64),
                    &action.stdout,
                    &action.stderr,
                    &action.risk_level,
                    action.duration_ms as i64,
                )
                .await?;
        }

        Ok(response)
    }

    /// Record explicit user feedback about a misclassification.
    pub fn provide_triage_feedback(
        &self,
        query: &str,
        intent: Intent,
        priority: athena_triage::Priority,
    ) -> bool {
        self.classifier.provide_feedback(query, intent, priority)
    }

    pub async fn end_session(&self) -> Result<()> {
        self.store.end_session(&self.session_id).await?;
        Ok(())
    }

    fn build_messages(&self, behavior: &BehaviorProfile, intent: Intent) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(build_system_prompt(behavior, intent))];

        // Rolling window over the conversation, which already contains the
        // current user message.
        const HISTORY_WINDOW: usize = 40;
        let history = self.conversation.current().messages.as_slice();
        let skip = history.len().saturating_sub(HISTORY_WINDOW);
        for message in &history[skip..] {
            let chat = match message.role.as_str() {
                "user" => ChatMessage::user(&message.content),
                _ => ChatMessage::assistant(&message.content),
            };
            messages.push(chat);
        }
        messages
    }
}

fn build_system_prompt(behavior: &BehaviorProfile, intent: Intent) -> String {
    let style = match behavior.response_format {
        ResponseFormat::Terse => "Keep answers terse and actionable.",
        ResponseFormat::Standard => "Keep answers concise.",
        ResponseFormat::Detailed => "Explain findings in detail.",
    };
    let scope = match intent.allowed_tools() {
        Some(tools) => format!(
            "This is a read-only information request; only these tools are available: {}.",
            tools.join(", ")
        ),
        None => "All tools are available.".to_string(),
    };
    let next_steps = if behavior.include_next_steps {
        "End with suggested next steps."
    } else {
        "Do not suggest next steps unless asked."
    };

    format!(
        r#"You are an expert DevSecOps engineer operating a host inventory.
Your goal is to FULLY COMPLETE infrastructure tasks using the provided tools.

Rules:
1. Use list_hosts() FIRST to verify hosts exist
2. ALWAYS scan a host before acting on it
3. If a command fails, read the analysis attached to the result and try an alternative
4. If a result says a command requires confirmation, use ask_user to get it
5. CONTINUE until the task is fully complete
6. {style} {next_steps}
7. {scope}

Say "TERMINATE" alone on the last line only when ALL steps are complete."#
    )
}

/// Dispatches tool calls for one request.  `execute_command` gets the
/// recovery path: error classification, bounded auto-correction, and a
/// user-facing explanation when retrying is pointless.
struct RequestDispatcher {
    registry: Arc<ToolRegistry>,
    tool_ctx: Arc<ToolContext>,
    executor: Arc<ActionExecutor>,
    corrector: Arc<AutoCorrector>,
    presenter: Presenter,
    actions: Vec<ExecutedAction>,
}

impl RequestDispatcher {
    fn record_action(&mut self, command: &str, result: &ExecutionResult) {
        self.actions.push(ExecutedAction {
            target: result.target.clone(),
            command: command.to_string(),
            exit_code: result.exit_code,
            stdout: result.stdout.clone(),
            stderr: result.stderr.clone(),
            risk_level: result
                .risk
                .as_ref()
                .map(|r| r.level.as_str().to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            duration_ms: result.duration_ms,
        });
    }

    async fn dispatch_execute(&mut self, args: &serde_json::Value) -> ToolExecutionRecord {
        let map = json_args_to_map(args);
        let fail = |output: String| ToolExecutionRecord {
            tool_name: "execute_command".to_string(),
            args: args.clone(),
            success: false,
            output,
        };

        let Some(target) = map.get("target").filter(|t| !t.is_empty()).cloned() else {
            return fail("missing required param: target".to_string());
        };
        let Some(command) = map.get("command").filter(|c| !c.is_empty()).cloned() else {
            return fail("missing required param: command".to_string());
        };
        let reason = map.get("reason").cloned().unwrap_or_default();

        match self.tool_ctx.clearance(&command) {
            GateDecision::Approved => {}
            GateDecision::NeedsConfirmation { reason } => return fail(reason),
            GateDecision::Paused { executed } => {
                return fail(format!(
                    "Command budget reached ({executed} executed). Summarize and ask the user."
                ));
            }
        }

        let opts = ExecOptions {
            confirm: true,
            timeout_secs: 60,
            show_spinner: false,
        };
        let result = self.executor.execute(&target, &command, &opts).await;
        self.record_action(&command, &result);

        if result.success {
            let rendered = render_result(&result);
            return ToolExecutionRecord {
                tool_name: "execute_command".to_string(),
                args: args.clone(),
                success: true,
                output: rendered.output,
            };
        }

        // Failure: decide between auto-correction and explanation.
        let analysis = result.error_analysis.clone().or_else(|| {
            let text = if result.stderr.is_empty() {
                result.error.clone().unwrap_or_default()
            } else {
                result.stderr.clone()
            };
            self.executor.analyze_error(&text)
        });

        let retryable = analysis
            .as_ref()
            .map(|a| should_retry(a.kind, a.confidence, Some(result.exit_code)))
            .unwrap_or(false);

        if retryable {
            let context = ActionContext {
                reason,
                os: None,
            };
            let (retried, retry_info) = self
                .corrector
                .execute_with_retry(&target, &command, &context, 60)
                .await;
            if let Some(info) = &retry_info {
                for correction in &info.corrections {
                    self.actions.push(ExecutedAction {
                        target: target.clone(),
                        command: correction.fix.clone(),
                        exit_code: if retried.success { retried.exit_code } else { -1 },
                        stdout: String::new(),
                        stderr: String::new(),
                        risk_level: "corrected".to_string(),
                        duration_ms: 0,
                    });
                }
            }

            let mut rendered = render_result(&retried);
            if let Some(info) = retry_info {
                rendered.output.push_str(&format!(
                    "\n[auto-correction] attempts={} corrections={}",
                    info.attempts,
                    info.corrections.len()
                ));
            }
            return ToolExecutionRecord {
                tool_name: "execute_command".to_string(),
                args: args.clone(),
                success: rendered.success,
                output: rendered.output,
            };
        }

        // Not retryable: explain to the user, tell the model why.
        let mut rendered = render_result(&result);
        if let Some(analysis) = analysis {
            let block = self.presenter.render_error(
                analysis.kind,
                &command,
                &target,
                result.exit_code,
                &result.stderr,
            );
            println!("{block}");
            rendered.output.push_str(&format!(
                "\n[no-retry] {} error: {}. Do not retry the same command.",
                analysis.kind, analysis.suggested_action
            ));
        }
        ToolExecutionRecord {
            tool_name: "execute_command".to_string(),
            args: args.clone(),
            success: false,
            output: rendered.output,
        }
    }
}

#[async_trait]
impl ToolDispatcher for RequestDispatcher {
    async fn dispatch(&mut self, call: &ToolCall) -> ToolExecutionRecord {
        let name = call.function.name.as_str();
        if name == "execute_command" {
            return self.dispatch_execute(&call.function.arguments).await;
        }

        let Some(tool) = self.registry.get(name) else {
            return ToolExecutionRecord {
                tool_name: name.to_string(),
                args: call.function.arguments.clone(),
                success: false,
                output: format!("unknown tool: {name}"),
            };
        };

        let args = json_args_to_map(&call.function.arguments);
        match tool.run(&args).await {
            Ok(output) => ToolExecutionRecord {
                tool_name: name.to_string(),
                args: call.function.arguments.clone(),
                success: output.success,
                output: output.output,
            },
            Err(e) => ToolExecutionRecord {
                tool_name: name.to_string(),
                args: call.function.arguments.clone(),
                success: false,
                output: format!("tool error: {e}"),
            },
        }
    }
}
