//! LLM client layer.
//!
//! Defines the chat/tool-call message types shared by the tool loop, the
//! [`LlmClient`] trait the rest of the system programs against, and the
//! default Ollama-backed implementation.  [`LlmRouter`] adds the deadline
//! contract: every call runs under a caller-side timeout; an expired call is
//! *not* aborted — the router returns immediately and the orphaned
//! completion is logged when it eventually lands.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

// ── Chat message types ───────────────────────────────────────────────────────

/// Role in a chat conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A single message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: Option<String>,
    /// Tool calls requested by the assistant (assistant messages only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// When role == Tool, identifies which tool call this result is for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: Some(content.into()), tool_calls: vec![], tool_call_id: None }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: Some(content.into()), tool_calls: vec![], tool_call_id: None }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: Some(content.into()), tool_calls: vec![], tool_call_id: None }
    }
    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self { role: ChatRole::Assistant, content: None, tool_calls, tool_call_id: None }
    }
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { role: ChatRole::Tool, content: Some(content.into()), tool_calls: vec![], tool_call_id: Some(tool_call_id.into()) }
    }
}

/// A tool call requested by the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique ID for this call.  Ollama does not always provide one, in
    /// which case we generate one so results can be correlated.
    #[serde(default)]
    pub id: String,
    #[serde(default = "default_tool_call_type")]
    pub r#type: String,
    pub function: ToolCallFunction,
}

fn default_tool_call_type() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallFunction {
    pub name: String,
    /// Arguments as a parsed JSON object.
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// Response from a chat call.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Text content of the assistant's response (may be empty when
    /// `tool_calls` is non-empty).
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

/// What the call is for.  Routers may pick a smaller/faster model for
/// correction and extraction tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Chat,
    Correction,
    Synthesis,
    Summary,
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM transport error: {0}")]
    Transport(String),
    #[error("LLM returned invalid response: {0}")]
    InvalidResponse(String),
    #[error("LLM call timed out after {0} seconds")]
    Timeout(u64),
}

// ── Client trait ─────────────────────────────────────────────────────────────

/// The minimal surface the rest of the system consumes: a prompt/system pair
/// in, text out, plus a structured chat call for the tool loop.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Free-form generation.
    async fn generate(
        &self,
        prompt: &str,
        system: &str,
        task: TaskKind,
    ) -> Result<String, LlmError>;

    /// Structured chat with optional tool schema.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: Option<&serde_json::Value>,
        task: TaskKind,
    ) -> Result<ChatResponse, LlmError>;
}

// ── Ollama client ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    correction_model: String,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            correction_model: model.clone(),
            model,
        }
    }

    pub fn with_correction_model(mut self, model: impl Into<String>) -> Self {
        self.correction_model = model.into();
        self
    }

    fn model_for(&self, task: TaskKind) -> &str {
        match task {
            TaskKind::Correction | TaskKind::Summary => &self.correction_model,
            TaskKind::Chat | TaskKind::Synthesis => &self.model,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaChatMessage,
}

#[derive(Debug, Deserialize)]
struct OllamaChatMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn generate(
        &self,
        prompt: &str,
        system: &str,
        task: TaskKind,
    ) -> Result<String, LlmError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = json!({
            "model": self.model_for(task),
            "prompt": prompt,
            "system": system,
            "stream": false,
        });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(LlmError::Transport(format!("HTTP {}", resp.status())));
        }
        let parsed: OllamaGenerateResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        Ok(parsed.response)
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: Option<&serde_json::Value>,
        task: TaskKind,
    ) -> Result<ChatResponse, LlmError> {
        let url = format!("{}/api/chat", self.base_url);
        let mut body = json!({
            "model": self.model_for(task),
            "messages": messages,
            "stream": false,
        });
        if let Some(tools) = tools {
            body["tools"] = tools.clone();
        }

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(LlmError::Transport(format!("HTTP {}", resp.status())));
        }
        let parsed: OllamaChatResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        // Ollama omits tool-call IDs; assign them so results can be matched.
        let mut tool_calls = parsed.message.tool_calls;
        for call in &mut tool_calls {
            if call.id.is_empty() {
                call.id = uuid::Uuid::new_v4().to_string();
            }
        }

        Ok(ChatResponse {
            content: parsed.message.content,
            tool_calls,
        })
    }
}

// ── Router with deadline contract ────────────────────────────────────────────

/// Wraps a client with the caller-side timeout contract.
///
/// The underlying HTTP call cannot be truly cancelled: on deadline expiry the
/// router returns [`LlmError::Timeout`] at once while the spawned call keeps
/// running until its own completion, which is logged and discarded.
#[derive(Clone)]
pub struct LlmRouter {
    client: Arc<dyn LlmClient>,
    timeout_secs: u64,
}

impl LlmRouter {
    pub fn new(client: Arc<dyn LlmClient>, timeout_secs: u64) -> Self {
        Self {
            client,
            timeout_secs,
        }
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    pub async fn generate(
        &self,
        prompt: &str,
        system: &str,
        task: TaskKind,
    ) -> Result<String, LlmError> {
        let client = Arc::clone(&self.client);
        let prompt = prompt.to_string();
        let system = system.to_string();
        let handle =
            tokio::spawn(async move { client.generate(&prompt, &system, task).await });
        self.await_with_deadline(handle).await
    }

    pub async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        tools: Option<serde_json::Value>,
        task: TaskKind,
    ) -> Result<ChatResponse, LlmError> {
        let client = Arc::clone(&self.client);
        let handle = tokio::spawn(async move {
            client.chat(&messages, tools.as_ref(), task).await
        });
        self.await_with_deadline(handle).await
    }

    async fn await_with_deadline<T: Send + std::fmt::Debug + 'static>(
        &self,
        handle: tokio::task::JoinHandle<Result<T, LlmError>>,
    ) -> Result<T, LlmError> {
        let secs = self.timeout_secs;
        if secs == 0 {
            return handle
                .await
                .map_err(|e| LlmError::Transport(format!("LLM task failed: {e}")))?;
        }

        let mut handle = handle;
        match tokio::time::timeout(Duration::from_secs(secs), &mut handle).await {
            Ok(joined) => {
                joined.map_err(|e| LlmError::Transport(format!("LLM task failed: {e}")))?
            }
            Err(_) => {
                // The in-flight HTTP request keeps running on its socket;
                // watch it from a detached task instead of aborting.
                warn!(timeout_secs = secs, "LLM call exceeded deadline; returning timeout");
                log_orphaned_completion(handle, secs);
                Err(LlmError::Timeout(secs))
            }
        }
    }
}

/// Log the eventual outcome of a call that already timed out.
pub fn log_orphaned_completion<T: Send + std::fmt::Debug + 'static>(
    handle: tokio::task::JoinHandle<Result<T, LlmError>>,
    timeout_secs: u64,
) {
    tokio::spawn(async move {
        match handle.await {
            Ok(Ok(_)) => info!(
                timeout_secs,
                "orphaned LLM call completed successfully after deadline"
            ),
            Ok(Err(e)) => warn!(timeout_secs, error = %e, "orphaned LLM call failed after deadline"),
            Err(e) => debug!(timeout_secs, error = %e, "orphaned LLM task join error"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowClient;

    #[async_trait]
    impl LlmClient for SlowClient {
        async fn generate(
            &self,
            _prompt: &str,
            _system: &str,
            _task: TaskKind,
        ) -> Result<String, LlmError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("late".to_string())
        }

        async fn chat(
            &self,
            _messages: &[ChatMessage],
            _tools: Option<&serde_json::Value>,
            _task: TaskKind,
        ) -> Result<ChatResponse, LlmError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(ChatResponse { content: "late".to_string(), tool_calls: vec![] })
        }
    }

    struct EchoClient;

    #[async_trait]
    impl LlmClient for EchoClient {
        async fn generate(
            &self,
            prompt: &str,
            _system: &str,
            _task: TaskKind,
        ) -> Result<String, LlmError> {
            Ok(prompt.to_string())
        }

        async fn chat(
            &self,
            messages: &[ChatMessage],
            _tools: Option<&serde_json::Value>,
            _task: TaskKind,
        ) -> Result<ChatResponse, LlmError> {
            let content = messages
                .last()
                .and_then(|m| m.content.clone())
                .unwrap_or_default();
            Ok(ChatResponse { content, tool_calls: vec![] })
        }
    }

    #[test]
    fn message_constructors_set_roles() {
        assert_eq!(ChatMessage::system("s").role, ChatRole::System);
        assert_eq!(ChatMessage::user("u").role, ChatRole::User);
        assert_eq!(ChatMessage::assistant("a").role, ChatRole::Assistant);
        let tool = ChatMessage::tool_result("id-1", "out");
        assert_eq!(tool.role, ChatRole::Tool);
        assert_eq!(tool.tool_call_id.as_deref(), Some("id-1"));
    }

    #[test]
    fn tool_call_deserializes_without_id() {
        let raw = r#"{"function": {"name": "list_hosts", "arguments": {}}}"#;
        let call: ToolCall = serde_json::from_str(raw).unwrap();
        assert!(call.id.is_empty());
        assert_eq!(call.r#type, "function");
        assert_eq!(call.function.name, "list_hosts");
    }

    #[tokio::test]
    async fn router_returns_timeout_on_slow_call() {
        let router = LlmRouter::new(Arc::new(SlowClient), 1);
        let err = router
            .generate("hi", "sys", TaskKind::Chat)
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Timeout(1)));
    }

    #[tokio::test]
    async fn router_passes_through_fast_call() {
        let router = LlmRouter::new(Arc::new(EchoClient), 5);
        let out = router
            .generate("hello", "sys", TaskKind::Chat)
            .await
            .unwrap();
        assert_eq!(out, "hello");
    }
}
