// AI Assistant Service Module
//
// Guardrails and the conversation loop:
// - Input sanitization against a declarative rule table
// - Tool catalog and per-call permission checks
// - System prompt building with a fixed safety preamble
// - Multi-turn model/tool orchestration

pub mod orchestrator;
pub mod permissions;
pub mod prompt_builder;
pub mod sanitizer;
pub mod tools;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export main types
pub use orchestrator::{ChatError, ConversationOrchestrator, ConversationOutcome, ConversationRequest};
pub use permissions::ToolPermissionValidator;
pub use prompt_builder::{SystemPromptBuilder, SAFETY_PREAMBLE};
pub use sanitizer::{InputSanitizer, RuleSeverity, SanitizeError, ScanReport, ThreatCategory};
pub use tools::{BridgeToolExecutor, ToolExecutor, ToolSpec};
