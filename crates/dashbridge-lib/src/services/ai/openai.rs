// OpenAI Provider Implementation
//
// Chat completions API with function tools.
// Requires API key.
// Default endpoint: https://api.openai.com/v1

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE}};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::retry_after_secs;
use super::{http_client, AIError, AIProvider, AIResult};
use crate::models::ai::{
    ChatMessage, ChatOptions, ChatResponse, ChatRole, FinishReason, ModelConfig, ToolCall,
};

/// OpenAI Provider
pub struct OpenAIProvider {
    endpoint: String,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    client: Client,
    api_key: String,
}

impl OpenAIProvider {
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
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .unwrap_or_else(|_| HeaderValue::from_static("")),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers
    }

    fn build_request(&self, messages: Vec<ChatMessage>, options: ChatOptions) -> OpenAIChatRequest {
        let openai_messages = messages.into_iter().map(to_openai_message).collect();

        let openai_tools = options.tools.filter(|t| !t.is_empty()).map(|tools| {
            tools
                .into_iter()
                .map(|t| OpenAITool {
                    tool_type: "function".to_string(),
                    function: OpenAIFunction {
                        name: t.name,
                        description: t.description,
                        parameters: t.parameters,
                    },
                })
                .collect()
        });

        OpenAIChatRequest {
            model: self.model.clone(),
            messages: openai_messages,
            temperature: options.temperature.or(self.temperature),
            max_tokens: options.max_tokens.or(self.max_tokens),
            tools: openai_tools,
            stream: false,
        }
    }
}

// OpenAI API types
#[derive(Debug, Serialize)]
struct OpenAIChatRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAITool>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAIToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct OpenAITool {
    #[serde(rename = "type")]
    tool_type: String,
    function: OpenAIFunction,
}

#[derive(Debug, Serialize)]
struct OpenAIFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct OpenAIToolCall {
    id: String,
    #[serde(rename = "type")]
    tool_type: String,
    function: OpenAIFunctionCall,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct OpenAIFunctionCall {
    name: String,
    /// JSON-encoded argument object
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIChatResponse {
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
    model: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAIToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    total_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OpenAIError {
    error: OpenAIErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
    code: Option<String>,
}

fn to_openai_message(m: ChatMessage) -> OpenAIMessage {
    let role = match m.role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
        ChatRole::Tool => "tool",
    };
    OpenAIMessage {
        role,
        content: m.content,
        tool_calls: m.tool_calls.map(|calls| {
            calls
                .into_iter()
                .map(|tc| OpenAIToolCall {
                    id: tc.id,
                    tool_type: "function".to_string(),
                    function: OpenAIFunctionCall {
                        name: tc.name,
                        arguments: tc.arguments.to_string(),
                    },
                })
                .collect()
        }),
        tool_call_id: m.tool_call_id,
    }
}

fn from_openai_tool_call(tc: OpenAIToolCall) -> ToolCall {
    // Malformed argument JSON is passed through as a string so parameter
    // validation reports it to the model instead of failing the turn.
    let arguments = if tc.function.arguments.trim().is_empty() {
        Value::Object(Default::default())
    } else {
        serde_json::from_str(&tc.function.arguments)
            .unwrap_or(Value::String(tc.function.arguments))
    };
    ToolCall {
        id: tc.id,
        name: tc.function.name,
        arguments,
    }
}

fn parse_response(response: OpenAIChatResponse) -> AIResult<ChatResponse> {
    let Some(choice) = response.choices.into_iter().next() else {
        return Err(AIError::ParseError("Response contained no choices".to_string()));
    };

    let finish_reason = choice.finish_reason.as_deref().map(|r| match r {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::Length,
        "content_filter" => FinishReason::ContentFilter,
        "tool_calls" | "function_call" => FinishReason::ToolCalls,
        _ => FinishReason::Unknown,
    });

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(from_openai_tool_call)
        .collect();

    Ok(ChatResponse {
        content: choice.message.content.unwrap_or_default(),
        tokens_used: response.usage.and_then(|u| u.total_tokens),
        model: response.model,
        finish_reason,
        tool_calls,
    })
}

fn classify_error(
    status: reqwest::StatusCode,
    body: &str,
    model: &str,
    retry_after: Option<u64>,
) -> AIError {
    if let Ok(error) = serde_json::from_str::<OpenAIError>(body) {
        let error_type = error.error.error_type.as_deref().unwrap_or("");
        let code = error.error.code.as_deref().unwrap_or("");

        if status.as_u16() == 401 || error_type == "invalid_api_key" || code == "invalid_api_key" {
            return AIError::AuthFailed(error.error.message);
        }
        if status.as_u16() == 429 || error_type == "rate_limit_exceeded" {
            return AIError::RateLimited {
                retry_after_secs: retry_after,
            };
        }
        if code == "model_not_found" || error.error.message.contains("does not exist") {
            return AIError::ModelNotFound(model.to_string());
        }
        if code == "context_length_exceeded" || error.error.message.contains("maximum context length") {
            return AIError::TokenLimitExceeded(error.error.message);
        }
        return AIError::ApiError(error.error.message);
    }

    if status.as_u16() == 401 {
        return AIError::AuthFailed("Invalid API key".to_string());
    }
    if status.as_u16() == 429 {
        return AIError::RateLimited {
            retry_after_secs: retry_after,
        };
    }
    AIError::ApiError(format!("OpenAI API error ({}): {}", status, body))
}

#[async_trait]
impl AIProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "OpenAI"
    }

    async fn chat_completion(
        &self,
        messages: Vec<ChatMessage>,
        options: ChatOptions,
    ) -> AIResult<ChatResponse> {
        let url = self.api_url("/chat/completions");
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

        let openai_response: OpenAIChatResponse = response
            .json()
            .await
            .map_err(|e| AIError::transport(self.name(), e))?;
        parse_response(openai_response)
    }
}
