// Anthropic Provider Implementation
//
// Messages API with tool use.
// Requires API key.
// Default endpoint: https://api.anthropic.com/v1

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, header::{HeaderMap, HeaderValue, CONTENT_TYPE}};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::retry_after_secs;
use super::{http_client, AIError, AIProvider, AIResult};
use crate::models::ai::{
    ChatMessage, ChatOptions, ChatResponse, ChatRole, FinishReason, ModelConfig, ToolCall,
};

/// Anthropic API version header value
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// max_tokens is mandatory on this API
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic Provider
pub struct AnthropicProvider {
    endpoint: String,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    client: Client,
    api_key: String,
}

impl AnthropicProvider {
    pub fn new(config: &ModelConfig, api_key: String, timeout: Duration) -> AIResult<Self> {
        Ok(Self {
            endpoint: config.resolved_endpoint(),
            model: config.resolved_model(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            client: http_client(timeout)?,
            api_key,
        })
    }

    fn api_url(&self, path: &str) -> String {
        let base = self.endpoint.trim_end_matches('/');
        format!("{}{}", base, path)
    }

    fn auth_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key)
                .unwrap_or_else(|_| HeaderValue::from_static("")),
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers
    }

    fn build_request(&self, messages: Vec<ChatMessage>, options: ChatOptions) -> AnthropicMessagesRequest {
        // Anthropic uses a separate `system` field; several system turns are joined
        let mut system_parts: Vec<String> = Vec::new();
        let mut anthropic_messages: Vec<AnthropicMessage> = Vec::new();

        for msg in messages {
            match msg.role {
                ChatRole::System => {
                    if let Some(content) = msg.content.filter(|c| !c.is_empty()) {
                        system_parts.push(content);
                    }
                }
                ChatRole::User => {
                    push_blocks(&mut anthropic_messages, "user", vec![ContentBlock::Text {
                        text: msg.content.unwrap_or_default(),
                    }]);
                }
                ChatRole::Assistant => {
                    let mut blocks = Vec::new();
                    if let Some(text) = msg.content.filter(|c| !c.is_empty()) {
                        blocks.push(ContentBlock::Text { text });
                    }
                    for tc in msg.tool_calls.unwrap_or_default() {
                        let input = match tc.arguments {
                            Value::Object(_) => tc.arguments,
                            _ => Value::Object(Default::default()),
                        };
                        blocks.push(ContentBlock::ToolUse {
                            id: tc.id,
                            name: tc.name,
                            input,
                        });
                    }
                    if blocks.is_empty() {
                        blocks.push(ContentBlock::Text { text: String::new() });
                    }
                    push_blocks(&mut anthropic_messages, "assistant", blocks);
                }
                ChatRole::Tool => {
                    // Tool results travel inside a user turn; consecutive
                    // results are merged into the same turn.
                    push_blocks(&mut anthropic_messages, "user", vec![ContentBlock::ToolResult {
                        tool_use_id: msg.tool_call_id.unwrap_or_default(),
                        content: msg.content.unwrap_or_default(),
                    }]);
                }
            }
        }

        let tools = options.tools.filter(|t| !t.is_empty()).map(|tools| {
            tools
                .into_iter()
                .map(|t| AnthropicTool {
                    name: t.name,
                    description: t.description,
                    input_schema: t.parameters,
                })
                .collect()
        });

        AnthropicMessagesRequest {
            model: self.model.clone(),
            messages: anthropic_messages,
            max_tokens: options
                .max_tokens
                .or(self.max_tokens)
                .unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: options.temperature.or(self.temperature),
            system: if system_parts.is_empty() {
                None
            } else {
                Some(system_parts.join("\n\n"))
            },
            tools,
        }
    }
}

/// Appends blocks, merging into the previous message when the role repeats
fn push_blocks(messages: &mut Vec<AnthropicMessage>, role: &'static str, blocks: Vec<ContentBlock>) {
    match messages.last_mut() {
        Some(last) if last.role == role => last.content.extend(blocks),
        _ => messages.push(AnthropicMessage { role, content: blocks }),
    }
}

// Anthropic API types
#[derive(Debug, Serialize)]
struct AnthropicMessagesRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<AnthropicTool>>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicMessagesResponse {
    content: Vec<AnthropicContent>,
    usage: Option<AnthropicUsage>,
    model: String,
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
    id: Option<String>,
    name: Option<String>,
    input: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorDetail,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorDetail {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

fn classify_error(
    status: reqwest::StatusCode,
    body: &str,
    model: &str,
    retry_after: Option<u64>,
) -> AIError {
    if let Ok(error) = serde_json::from_str::<AnthropicError>(body) {
        let error_type = error.error.error_type.as_str();

        if status.as_u16() == 401 || error_type == "authentication_error" {
            return AIError::AuthFailed(error.error.message);
        }
        if status.as_u16() == 429 || error_type == "rate_limit_error" {
            return AIError::RateLimited {
                retry_after_secs: retry_after,
            };
        }
        if error_type == "not_found_error" {
            return AIError::ModelNotFound(model.to_string());
        }
        if error_type == "invalid_request_error" && error.error.message.contains("prompt is too long") {
            return AIError::TokenLimitExceeded(error.error.message);
        }
        return AIError::ApiError(error.error.message);
    }

    AIError::ApiError(format!("Anthropic API error ({}): {}", status, body))
}

fn parse_response(response: AnthropicMessagesResponse) -> ChatResponse {
    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    for block in response.content {
        match block.content_type.as_str() {
            "text" => {
                if let Some(text) = block.text {
                    text_parts.push(text);
                }
            }
            "tool_use" => tool_calls.push(ToolCall {
                id: block.id.unwrap_or_default(),
                name: block.name.unwrap_or_default(),
                arguments: block.input.unwrap_or_else(|| Value::Object(Default::default())),
            }),
            other => log::debug!("[ai] Ignoring Anthropic content block of type {}", other),
        }
    }

    let finish_reason = response.stop_reason.as_deref().map(|r| match r {
        "end_turn" | "stop_sequence" => FinishReason::Stop,
        "max_tokens" => FinishReason::Length,
        "tool_use" => FinishReason::ToolCalls,
        _ => FinishReason::Unknown,
    });

    ChatResponse {
        content: text_parts.join(""),
        tokens_used: response
            .usage
            .map(|u| u.input_tokens.unwrap_or(0) + u.output_tokens.unwrap_or(0)),
        model: response.model,
        finish_reason,
        tool_calls,
    }
}

#[async_trait]
impl AIProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "Anthropic"
    }

    async fn chat_completion(
        &self,
        messages: Vec<ChatMessage>,
        options: ChatOptions,
    ) -> AIResult<ChatResponse> {
        let url = self.api_url("/messages");
        let request = self.build_request(messages, options);

        let response = self.client
            .post(&url)
            .headers(self.auth_headers())
            .json(&request)
            .send()
            .await
            .map_err(|e| AIError::transport(self.name(), e))?;

        let status = response.status();

        if !status.is_success() {
            let retry_after = retry_after_secs(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(classify_error(status, &body, &self.model, retry_after));
        }

        let anthropic_response: AnthropicMessagesResponse = response
            .json()
            .await
            .map_err(|e| AIError::transport(self.name(), e))?;
        Ok(parse_response(anthropic_response))
    }
}
