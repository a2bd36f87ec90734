// Services module
// Business logic for the bridge, the AI providers and the guardrails

pub mod ai;
pub mod ai_assistant;
pub mod bridge;
