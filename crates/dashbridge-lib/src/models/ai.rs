// AI Integration data models
// Provider selection, chat transcript and tool-call types shared by the
// provider bindings and the conversation orchestrator.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Supported AI service providers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AIProvider {
    #[serde(rename = "openai", alias = "open_ai", alias = "gpt")]
    OpenAI,
    #[serde(rename = "anthropic", alias = "claude")]
    Anthropic,
}

impl std::fmt::Display for AIProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AIProvider::OpenAI => write!(f, "openai"),
            AIProvider::Anthropic => write!(f, "anthropic"),
        }
    }
}

impl AIProvider {
    /// Returns whether this provider requires an API key
    pub fn requires_api_key(&self) -> bool {
        matches!(self, AIProvider::OpenAI | AIProvider::Anthropic)
    }

    /// Returns the default endpoint for this provider
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            AIProvider::OpenAI => "https://api.openai.com/v1",
            AIProvider::Anthropic => "https://api.anthropic.com/v1",
        }
    }

    /// Returns the default model for this provider
    pub fn default_model(&self) -> &'static str {
        match self {
            AIProvider::OpenAI => "gpt-4o-mini",
            AIProvider::Anthropic => "claude-3-5-sonnet-20241022",
        }
    }
}

/// Per-request model selection sent by the UI with every chat message.
///
/// Keys travel with the request that uses them; nothing is cached between
/// conversations.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    pub provider: AIProvider,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Override for self-hosted or proxied endpoints
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl ModelConfig {
    pub fn new(provider: AIProvider, api_key: impl Into<String>) -> Self {
        Self {
            provider,
            model: None,
            api_key: Some(api_key.into()),
            endpoint: None,
            temperature: None,
            max_tokens: None,
        }
    }

    /// Model name, falling back to the provider default when blank
    pub fn resolved_model(&self) -> String {
        self.model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| self.provider.default_model())
            .to_string()
    }

    pub fn resolved_endpoint(&self) -> String {
        self.endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| self.provider.default_endpoint())
            .to_string()
    }
}

// API keys must never end up in logs.
impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("endpoint", &self.endpoint)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

/// Role of a transcript entry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    #[serde(alias = "tool-result", alias = "tool_result")]
    Tool,
}

/// One turn of a conversation.
///
/// The transcript is an ordered `Vec<ChatMessage>`; its order is the model's
/// context and is never rearranged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub role: ChatRole,
    #[serde(default)]
    pub content: Option<String>,
    /// Tool calls proposed by the assistant in this turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// For tool turns: the call this result answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Assistant turn that proposed tool calls (text may be empty)
    pub fn assistant_with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        let content = content.into();
        Self {
            role: ChatRole::Assistant,
            content: if content.is_empty() { None } else { Some(content) },
            tool_calls: Some(tool_calls),
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }
}

/// A tool invocation proposed by the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    /// Provider-assigned call id, echoed back in the result turn
    pub id: String,
    pub name: String,
    /// Argument bag; an object for well-formed calls
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(|v| v.as_str())
    }
}

/// Function tool definition handed to providers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object
    pub parameters: Value,
}

/// Options for chat completion requests
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    /// Temperature (0.0 - 2.0)
    pub temperature: Option<f32>,
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
    pub tools: Option<Vec<ChatToolDefinition>>,
}

/// Why the model stopped generating
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
    Unknown,
}

/// Response from chat completion
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    /// Generated text (may be empty when only tool calls were produced)
    pub content: String,
    /// Tokens used (if available)
    pub tokens_used: Option<u32>,
    pub model: String,
    pub finish_reason: Option<FinishReason>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

impl ChatResponse {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_provider_wire_names() {
        let p: AIProvider = serde_json::from_value(json!("openai")).unwrap();
        assert_eq!(p, AIProvider::OpenAI);
        let p: AIProvider = serde_json::from_value(json!("claude")).unwrap();
        assert_eq!(p, AIProvider::Anthropic);
        assert_eq!(serde_json::to_value(AIProvider::Anthropic).unwrap(), json!("anthropic"));
        assert!(serde_json::from_value::<AIProvider>(json!("ollama")).is_err());
    }

    #[test]
    fn test_model_config_defaults() {
        let config: ModelConfig = serde_json::from_value(json!({
            "provider": "openai",
            "model": "  ",
            "apiKey": "sk-test"
        }))
        .unwrap();
        assert_eq!(config.resolved_model(), "gpt-4o-mini");
        assert_eq!(config.resolved_endpoint(), "https://api.openai.com/v1");
    }

    #[test]
    fn test_model_config_debug_hides_key() {
        let config = ModelConfig::new(AIProvider::Anthropic, "sk-ant-secret-value");
        let debug = format!("{:?}", config);
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_history_roles_parse() {
        let turns: Vec<ChatMessage> = serde_json::from_value(json!([
            {"role": "user", "content": "hi"},
            {"role": "assistant", "content": "hello"},
            {"role": "tool-result", "content": "{}", "toolCallId": "c1"}
        ]))
        .unwrap();
        assert_eq!(turns[0].role, ChatRole::User);
        assert_eq!(turns[2].role, ChatRole::Tool);
        assert_eq!(turns[2].tool_call_id.as_deref(), Some("c1"));
    }

    #[test]
    fn test_assistant_with_tool_calls_drops_empty_text() {
        let msg = ChatMessage::assistant_with_tool_calls(
            "",
            vec![ToolCall::new("c1", "clear_canvas", json!({}))],
        );
        assert!(msg.content.is_none());
        assert_eq!(msg.tool_calls.as_ref().map(Vec::len), Some(1));
    }
}
