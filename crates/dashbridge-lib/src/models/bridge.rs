// Bridge data models
// Connection metadata and the JSON frames exchanged with UI clients over the
// duplex socket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::ai::{ChatMessage, ModelConfig};

/// Unique identifier of a live connection (UUID v4)
pub type ClientId = String;

/// Identifier of a backend-initiated call
pub type RequestId = u64;

/// Close code sent when the shared secret is rejected. Clients must not
/// reconnect after receiving it.
pub const AUTH_REJECTED_CLOSE_CODE: u16 = 4001;

/// Normal closure
pub const NORMAL_CLOSE_CODE: u16 = 1000;

// ============================================================================
// Connections
// ============================================================================

/// Role of a connection. Every connection starts `Unassigned` and becomes a
/// `UiClient` once its handshake succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionRole {
    Unassigned,
    UiClient,
}

impl ConnectionRole {
    /// Lower ranks are preferred when picking a call target
    pub fn preference_rank(&self) -> u8 {
        match self {
            ConnectionRole::UiClient => 0,
            ConnectionRole::Unassigned => 1,
        }
    }
}

/// Diagnostic view of a connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSummary {
    pub client_id: ClientId,
    pub role: ConnectionRole,
    pub authenticated: bool,
    pub display_name: Option<String>,
    pub connected_at: DateTime<Utc>,
}

/// UI-side conditions reported by a connection through `context-update`
/// frames. Owned by the registry entry of that connection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub has_image: bool,
    pub has_dashboard_context: bool,
    pub dashboard_name: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl SessionState {
    pub fn apply(&mut self, update: &ContextUpdate) {
        if let Some(has_image) = update.has_image {
            self.has_image = has_image;
        }
        if let Some(has_dashboard_context) = update.has_dashboard_context {
            self.has_dashboard_context = has_dashboard_context;
        }
        if update.dashboard_name.is_some() {
            self.dashboard_name = update.dashboard_name.clone();
        }
        self.updated_at = Some(Utc::now());
    }
}

/// What the server's socket writer should put on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    Text(String),
    Close { code: u16, reason: String },
}

// ============================================================================
// Inbound frames
// ============================================================================

/// `type` tags accepted from clients
pub const INBOUND_FRAME_TYPES: &[&str] = &["register", "chat", "context-update", "ping"];

/// Every frame a client may send. Untyped frames carrying a `requestId` are
/// answers to backend-initiated calls.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum InboundFrame {
    Register(RegisterRequest),
    Chat(ChatRequest),
    ContextUpdate(ContextUpdate),
    Ping,
    #[serde(skip_deserializing)]
    Response(ResponseFrame),
}

impl InboundFrame {
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| FrameError::InvalidJson(e.to_string()))?;

        let kind = match value.as_object() {
            Some(obj) => obj.get("type").cloned(),
            None => return Err(FrameError::NotAnObject),
        };

        let request_id = value.get("requestId").filter(|id| !id.is_null()).cloned();
        let has_request_id = request_id.is_some();

        match kind {
            None | Some(Value::Null) => {
                if !has_request_id {
                    return Err(FrameError::MissingField("type"));
                }
                Self::parse_response(value)
            }
            Some(Value::String(kind)) => {
                if !INBOUND_FRAME_TYPES.contains(&kind.as_str()) {
                    // Replies may echo the call's own type
                    if has_request_id {
                        return Self::parse_response(value);
                    }
                    return Err(FrameError::UnknownType(kind));
                }
                serde_json::from_value(value).map_err(|e| FrameError::Invalid {
                    kind,
                    reason: e.to_string(),
                    request_id,
                })
            }
            Some(_) => Err(FrameError::MissingField("type")),
        }
    }

    fn parse_response(value: Value) -> Result<Self, FrameError> {
        let request_id = value.get("requestId").cloned();
        serde_json::from_value(value)
            .map(InboundFrame::Response)
            .map_err(|e| FrameError::Invalid {
                kind: "response".to_string(),
                reason: e.to_string(),
                request_id,
            })
    }

    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            InboundFrame::Register(_) => "register",
            InboundFrame::Chat(_) => "chat",
            InboundFrame::ContextUpdate(_) => "context-update",
            InboundFrame::Ping => "ping",
            InboundFrame::Response(_) => "response",
        }
    }
}

/// Errors raised while decoding an inbound frame
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FrameError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Frame must be a JSON object")]
    NotAnObject,

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Unknown frame type: {0}")]
    UnknownType(String),

    /// Known type with a bad body; `request_id` is whatever the raw frame carried
    #[error("Invalid {kind} frame: {reason}")]
    Invalid {
        kind: String,
        reason: String,
        request_id: Option<Value>,
    },
}

impl FrameError {
    /// Client-chosen id of the frame that failed, when it had one
    pub fn request_id(&self) -> Option<&Value> {
        match self {
            FrameError::Invalid { request_id, .. } => request_id.as_ref(),
            _ => None,
        }
    }
}

/// First frame of every connection
#[derive(Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[serde(default, alias = "token")]
    pub auth_token: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl std::fmt::Debug for RegisterRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterRequest")
            .field("auth_token", &"[REDACTED]")
            .field("display_name", &self.display_name)
            .finish()
    }
}

/// A user message plus everything needed to run one conversation turn
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    /// Opaque client-chosen id, echoed in the `chat-response`
    #[serde(default)]
    pub request_id: Value,
    pub chat_message: String,
    #[serde(default)]
    pub conversation_history: Vec<ChatMessage>,
    pub model_config: ModelConfig,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub has_image: bool,
}

/// Unsolicited UI state push
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContextUpdate {
    #[serde(default)]
    pub has_image: Option<bool>,
    #[serde(default)]
    pub has_dashboard_context: Option<bool>,
    #[serde(default)]
    pub dashboard_name: Option<String>,
}

/// Answer to a backend-initiated call
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResponseFrame {
    pub request_id: Value,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

impl ResponseFrame {
    /// Numeric request id; numeric strings are accepted as well
    pub fn request_id(&self) -> Option<RequestId> {
        match &self.request_id {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Converts the frame into the outcome of the call it answers
    pub fn into_result(self) -> Result<Value, String> {
        if let Some(error) = self.error.filter(|e| !e.is_null()) {
            let message = match error {
                Value::String(s) => s,
                Value::Object(ref obj) => obj
                    .get("message")
                    .and_then(|m| m.as_str())
                    .map(String::from)
                    .unwrap_or_else(|| error.to_string()),
                other => other.to_string(),
            };
            return Err(message);
        }
        if self.success == Some(false) {
            return Err("Remote call reported failure".to_string());
        }
        Ok(self.data.unwrap_or(Value::Null))
    }
}

// ============================================================================
// Outbound frames
// ============================================================================

/// Frames the backend originates. Backend-initiated calls and pushes are
/// free-form JSON and do not go through this enum.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OutboundFrame {
    Connected {
        #[serde(rename = "clientId")]
        client_id: ClientId,
    },
    AuthError {
        error: String,
    },
    ChatResponse(ChatResponseFrame),
    Error {
        error: String,
        #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
        request_id: Option<Value>,
    },
    Pong,
}

impl OutboundFrame {
    pub fn error(error: impl Into<String>) -> Self {
        OutboundFrame::Error {
            error: error.into(),
            request_id: None,
        }
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Final answer (or error) for one chat request
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponseFrame {
    pub request_id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools_called: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChatResponseFrame {
    pub fn success(request_id: Value, response: String, tools_called: Vec<String>) -> Self {
        Self {
            request_id,
            response: Some(response),
            tools_called: if tools_called.is_empty() { None } else { Some(tools_called) },
            blocked: None,
            error: None,
        }
    }

    pub fn blocked(request_id: Value, refusal: String) -> Self {
        Self {
            request_id,
            response: Some(refusal),
            tools_called: None,
            blocked: Some(true),
            error: None,
        }
    }

    pub fn failure(request_id: Value, error: impl Into<String>) -> Self {
        Self {
            request_id,
            response: None,
            tools_called: None,
            blocked: None,
            error: Some(error.into()),
        }
    }
}
