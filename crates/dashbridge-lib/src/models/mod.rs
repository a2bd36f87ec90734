// Models module
// Data structures shared by the bridge, guardrails and AI services

pub mod ai;
pub mod bridge;
pub mod guardrail;
pub mod tool;

pub use ai::*;
pub use bridge::*;
pub use guardrail::*;
pub use tool::*;
