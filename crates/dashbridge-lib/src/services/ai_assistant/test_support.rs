// Test doubles for the orchestrator and dispatcher

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use crate::models::ai::{ChatMessage, ChatOptions, ChatResponse, FinishReason, ToolCall};
use crate::models::guardrail::ValidationContext;
use crate::models::tool::ToolResult;
use crate::services::ai::{AIError, AIProvider, AIResult};

use super::tools::ToolExecutor;

pub type Transcripts = Arc<Mutex<Vec<Vec<ChatMessage>>>>;

/// Replays canned responses and records every transcript it receives
pub struct ScriptedProvider {
    script: Mutex<VecDeque<AIResult<ChatResponse>>>,
    calls: Transcripts,
}

impl ScriptedProvider {
    pub fn new(script: Vec<AIResult<ChatResponse>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn calls(&self) -> Transcripts {
        self.calls.clone()
    }

    pub fn text(content: &str) -> AIResult<ChatResponse> {
        Ok(ChatResponse {
            content: content.to_string(),
            tokens_used: None,
            model: "scripted".to_string(),
            finish_reason: Some(FinishReason::Stop),
            tool_calls: Vec::new(),
        })
    }

    pub fn tools(tool_calls: Vec<ToolCall>) -> AIResult<ChatResponse> {
        Ok(ChatResponse {
            content: String::new(),
            tokens_used: None,
            model: "scripted".to_string(),
            finish_reason: Some(FinishReason::ToolCalls),
            tool_calls,
        })
    }
}

#[async_trait]
impl AIProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "Scripted"
    }

    async fn chat_completion(
        &self,
        messages: Vec<ChatMessage>,
        _options: ChatOptions,
    ) -> AIResult<ChatResponse> {
        self.calls.lock().unwrap().push(messages);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AIError::ApiError("script exhausted".to_string())))
    }
}

/// Records executed call ids; context and failures are configurable
pub struct MockExecutor {
    context: Mutex<ValidationContext>,
    executed: Arc<Mutex<Vec<String>>>,
    failure: Option<String>,
    drop_after: Option<usize>,
}

impl MockExecutor {
    pub fn new(context: ValidationContext) -> Self {
        Self {
            context: Mutex::new(context),
            executed: Arc::new(Mutex::new(Vec::new())),
            failure: None,
            drop_after: None,
        }
    }

    pub fn connected() -> Self {
        Self::new(ValidationContext {
            has_image: true,
            has_dashboard_context: true,
            connection_verified: true,
        })
    }

    pub fn failing(mut self, error: &str) -> Self {
        self.failure = Some(error.to_string());
        self
    }

    /// Report the connection as lost once `n` calls have run
    pub fn drop_connection_after(mut self, n: usize) -> Self {
        self.drop_after = Some(n);
        self
    }

    pub fn executed(&self) -> Arc<Mutex<Vec<String>>> {
        self.executed.clone()
    }
}

#[async_trait]
impl ToolExecutor for MockExecutor {
    async fn validation_context(&self) -> ValidationContext {
        *self.context.lock().unwrap()
    }

    async fn execute(&self, call: &ToolCall) -> ToolResult {
        let count = {
            let mut executed = self.executed.lock().unwrap();
            executed.push(call.id.clone());
            executed.len()
        };
        if self.drop_after == Some(count) {
            self.context.lock().unwrap().connection_verified = false;
        }
        match &self.failure {
            Some(error) => ToolResult::failure(&call.id, &call.name, error),
            None => ToolResult::success(&call.id, &call.name, json!({ "ok": true })),
        }
    }
}
