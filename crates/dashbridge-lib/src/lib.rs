// dashbridge shared library
//
// Everything the server binary needs, independent of the socket layer:
// - models: wire frames, chat and guardrail types
// - services: connection bridge, AI providers, orchestration
// - utils: configuration

pub mod models;
pub mod services;
pub mod utils;

pub use services::bridge::{Bridge, ChatSettings, Dispatcher};
pub use utils::config::BridgeConfig;
