// Conversation Orchestrator
//
// Runs one chat turn: sanitize, then model -> tools -> model until the model
// answers without tool calls or the round cap is reached. The transcript is
// local to the call; nothing here is shared between conversations.

use thiserror::Error;

use crate::models::ai::{ChatMessage, ChatOptions};
use crate::models::tool::ToolResult;
use crate::services::ai::{AIError, BoxedAIProvider};
use crate::utils::config::DEFAULT_MAX_TOOL_ROUNDS;

use super::permissions::ToolPermissionValidator;
use super::prompt_builder::{build_messages, SystemPromptBuilder};
use super::sanitizer::InputSanitizer;
use super::tools::{catalog, ToolExecutor};

/// Errors that end a chat turn without an answer
#[derive(Error, Debug)]
pub enum ChatError {
    #[error(transparent)]
    Provider(#[from] AIError),

    #[error("Tool call limit exceeded ({limit} rounds) without a final answer")]
    ToolRoundLimit { limit: usize },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ChatError {
    /// Text for the `error` field of a `chat-response`
    pub fn to_user_message(&self) -> String {
        match self {
            ChatError::Provider(e) => e.to_user_message(),
            other => other.to_string(),
        }
    }
}

/// Input of one chat turn
#[derive(Debug, Clone, Default)]
pub struct ConversationRequest {
    pub message: String,
    pub history: Vec<ChatMessage>,
    pub system_prompt: Option<String>,
    pub dashboard_name: Option<String>,
}

/// Result of one chat turn
#[derive(Debug, Clone)]
pub struct ConversationOutcome {
    pub response: String,
    /// Tools that ran and succeeded, in call order
    pub tools_called: Vec<String>,
    /// The sanitizer refused the message; no model was contacted
    pub blocked: bool,
    pub transcript: Vec<ChatMessage>,
}

pub struct ConversationOrchestrator {
    provider: BoxedAIProvider,
    executor: Box<dyn ToolExecutor>,
    validator: ToolPermissionValidator,
    sanitizer: InputSanitizer,
    max_tool_rounds: usize,
}

impl ConversationOrchestrator {
    pub fn new(provider: BoxedAIProvider, executor: Box<dyn ToolExecutor>) -> Self {
        Self {
            provider,
            executor,
            validator: ToolPermissionValidator::from_catalog(),
            sanitizer: InputSanitizer::new(),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }

    pub fn with_max_tool_rounds(mut self, max_tool_rounds: usize) -> Self {
        self.max_tool_rounds = max_tool_rounds.max(1);
        self
    }

    pub async fn run(&self, request: ConversationRequest) -> Result<ConversationOutcome, ChatError> {
        let input = self
            .sanitizer
            .sanitize_user_input(&request.message)
            .map_err(|e| ChatError::InvalidRequest(e.to_string()))?;

        if input.report.is_blocked() {
            return Ok(ConversationOutcome {
                response: input.report.refusal_message(),
                tools_called: Vec::new(),
                blocked: true,
                transcript: Vec::new(),
            });
        }

        let system_prompt = SystemPromptBuilder::new()
            .with_custom_prompt(request.system_prompt.as_deref())
            .with_dashboard_name(request.dashboard_name.as_deref())
            .with_tools(catalog())
            .build();
        let mut transcript = build_messages(system_prompt, &request.history, input.text, &self.sanitizer);

        let options = ChatOptions {
            tools: Some(self.executor.definitions()),
            ..Default::default()
        };

        let mut tools_called = Vec::new();
        let mut rounds = 0usize;

        loop {
            log::debug!(
                "[orchestrator] Calling {} with {} message(s)",
                self.provider.name(),
                transcript.len()
            );
            let response = self
                .provider
                .chat_completion(transcript.clone(), options.clone())
                .await?;

            if !response.has_tool_calls() {
                transcript.push(ChatMessage::assistant(response.content.clone()));
                return Ok(ConversationOutcome {
                    response: response.content,
                    tools_called,
                    blocked: false,
                    transcript,
                });
            }

            rounds += 1;
            if rounds > self.max_tool_rounds {
                log::warn!(
                    "[orchestrator] Giving up after {} tool round(s)",
                    self.max_tool_rounds
                );
                return Err(ChatError::ToolRoundLimit {
                    limit: self.max_tool_rounds,
                });
            }

            let calls = response.tool_calls;
            transcript.push(ChatMessage::assistant_with_tool_calls(response.content, calls.clone()));

            // One at a time so results land in call order
            for call in &calls {
                let context = self.executor.validation_context().await;
                let verdict = self.validator.validate(&call.name, &context);

                let result = if verdict.valid {
                    let result = self.executor.execute(call).await;
                    if result.success {
                        tools_called.push(call.name.clone());
                    }
                    result
                } else {
                    let reason = verdict
                        .reason
                        .unwrap_or_else(|| format!("Tool '{}' is not permitted", call.name));
                    log::info!("[orchestrator] Rejected tool {}: {}", call.name, reason);
                    ToolResult::failure(&call.id, &call.name, reason)
                };

                transcript.push(ChatMessage::tool_result(&call.id, result.to_content()));
            }
        }
    }
}
