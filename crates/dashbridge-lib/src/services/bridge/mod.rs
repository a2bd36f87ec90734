// Bridge Service Module
//
// Pairs UI connections with backend tool execution:
// - registry: connection lifecycle and shared-secret handshake
// - correlator: request ids, pending calls, deadlines
// - dispatcher: routes inbound frames to the above and to chat turns

pub mod correlator;
pub mod dispatcher;
pub mod error;
pub mod registry;

use std::time::Duration;

use serde_json::Value;

pub use correlator::RequestCorrelator;
pub use dispatcher::{ChatSettings, Dispatcher, ProviderFactory};
pub use error::{BridgeError, BridgeResult};
pub use registry::{ConnectionRegistry, OutboundSender};

use crate::models::bridge::{ClientId, ConnectionRole};
use crate::models::guardrail::ValidationContext;

/// Registry and correlator behind one handle, shared by every connection task
pub struct Bridge {
    registry: ConnectionRegistry,
    correlator: RequestCorrelator,
    request_timeout: Duration,
}

impl Bridge {
    pub fn new(auth_token: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            registry: ConnectionRegistry::new(auth_token),
            correlator: RequestCorrelator::new(),
            request_timeout,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn correlator(&self) -> &RequestCorrelator {
        &self.correlator
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Round-trip call to an authenticated connection, default deadline
    pub async fn call(&self, client_id: &str, payload: Value) -> BridgeResult<Value> {
        self.call_with_timeout(client_id, payload, self.request_timeout).await
    }

    pub async fn call_with_timeout(
        &self,
        client_id: &str,
        payload: Value,
        timeout: Duration,
    ) -> BridgeResult<Value> {
        // The entry is registered under the registry lock so a concurrent
        // disconnect either refuses the call or finds the entry to reject.
        let pending = self
            .registry
            .with_authenticated_sender(client_id, |tx| self.correlator.begin(client_id, tx, payload))
            .await??;
        pending.wait(timeout).await
    }

    /// Round-trip call to the preferred authenticated connection
    pub async fn call_any(
        &self,
        role_filter: Option<ConnectionRole>,
        payload: Value,
    ) -> BridgeResult<(ClientId, Value)> {
        let (client_id, _) = self
            .registry
            .pick_target(role_filter)
            .await
            .ok_or(BridgeError::NoTarget)?;
        let value = self.call(&client_id, payload).await?;
        Ok((client_id, value))
    }

    /// Fire-and-forget push to an authenticated connection
    pub async fn push(&self, client_id: &str, payload: &Value) -> BridgeResult<()> {
        let tx = self.registry.authenticated_sender(client_id).await?;
        self.correlator.send(client_id, &tx, payload)
    }

    /// Fresh snapshot of what tools may rely on for `client_id`
    pub async fn validation_context(&self, client_id: &str, request_has_image: bool) -> ValidationContext {
        let session = self.registry.session_snapshot(client_id).await.unwrap_or_default();
        ValidationContext {
            has_image: session.has_image || request_has_image,
            has_dashboard_context: session.has_dashboard_context,
            connection_verified: self.registry.is_authenticated(client_id).await,
        }
    }

    /// Drop a connection and reject everything still waiting on it
    pub async fn disconnect(&self, client_id: &str) -> usize {
        let summary = self.registry.close(client_id).await;
        let failed = self.correlator.fail_connection(client_id);
        if let Some(summary) = summary {
            log::info!(
                "[bridge] Connection {} closed ({} pending request(s) rejected)",
                summary.client_id,
                failed
            );
        }
        failed
    }
}
