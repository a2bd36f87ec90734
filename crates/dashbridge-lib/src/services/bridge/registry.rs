// Connection Registry
//
// Single owner of connection lifecycle:
// - Opens an entry per socket with role `unassigned`
// - Runs the shared-secret handshake and flips the authenticated flag
// - Holds each connection's outbound channel and session state
// - Selects a target connection for backend-initiated calls

use std::collections::HashMap;

use chrono::Utc;
use constant_time_eq::constant_time_eq;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use super::error::{BridgeError, BridgeResult};
use crate::models::bridge::{
    ClientId, ConnectionRole, ConnectionSummary, ContextUpdate, OutboundFrame, OutboundMessage,
    RegisterRequest, SessionState, AUTH_REJECTED_CLOSE_CODE,
};

/// Channel a connection's writer drains onto the socket
pub type OutboundSender = mpsc::UnboundedSender<OutboundMessage>;

struct ConnectionEntry {
    summary: ConnectionSummary,
    tx: OutboundSender,
    session: SessionState,
}

/// Registry of live connections keyed by client id
pub struct ConnectionRegistry {
    auth_token: String,
    connections: RwLock<HashMap<ClientId, ConnectionEntry>>,
}

impl ConnectionRegistry {
    pub fn new(auth_token: impl Into<String>) -> Self {
        Self {
            auth_token: auth_token.into(),
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Track a freshly accepted socket. The connection stays unauthenticated
    /// until a successful `register`.
    pub async fn open(&self, tx: OutboundSender) -> ClientId {
        let client_id = Uuid::new_v4().to_string();
        let entry = ConnectionEntry {
            summary: ConnectionSummary {
                client_id: client_id.clone(),
                role: ConnectionRole::Unassigned,
                authenticated: false,
                display_name: None,
                connected_at: Utc::now(),
            },
            tx,
            session: SessionState::default(),
        };
        self.connections.write().await.insert(client_id.clone(), entry);
        log::debug!("[registry] Opened connection {}", client_id);
        client_id
    }

    /// Shared-secret handshake.
    ///
    /// On success the connection becomes an authenticated `ui-client` and
    /// receives `connected`. On failure it receives `auth-error`, is closed
    /// with code 4001 and is removed from the registry.
    pub async fn register(&self, client_id: &str, request: &RegisterRequest) -> BridgeResult<()> {
        let mut connections = self.connections.write().await;

        let accepted = constant_time_eq(request.auth_token.as_bytes(), self.auth_token.as_bytes());

        if !accepted {
            let entry = connections
                .remove(client_id)
                .ok_or_else(|| BridgeError::ClientNotFound(client_id.to_string()))?;
            drop(connections);

            log::warn!("[registry] Rejected connection {}: invalid auth token", client_id);
            let error = BridgeError::AuthenticationFailed;
            let _ = send_frame(&entry.tx, client_id, &OutboundFrame::AuthError { error: error.to_string() });
            let _ = entry.tx.send(OutboundMessage::Close {
                code: AUTH_REJECTED_CLOSE_CODE,
                reason: "Authentication failed".to_string(),
            });
            return Err(error);
        }

        let entry = connections
            .get_mut(client_id)
            .ok_or_else(|| BridgeError::ClientNotFound(client_id.to_string()))?;

        entry.summary.authenticated = true;
        entry.summary.role = ConnectionRole::UiClient;
        entry.summary.display_name = request
            .display_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(String::from);

        log::info!(
            "[registry] Connection {} authenticated{}",
            client_id,
            entry
                .summary
                .display_name
                .as_deref()
                .map(|n| format!(" as '{}'", n))
                .unwrap_or_default()
        );

        send_frame(
            &entry.tx,
            client_id,
            &OutboundFrame::Connected {
                client_id: client_id.to_string(),
            },
        )
    }

    pub async fn is_authenticated(&self, client_id: &str) -> bool {
        self.connections
            .read()
            .await
            .get(client_id)
            .is_some_and(|e| e.summary.authenticated)
    }

    /// Outbound channel of a connection, authenticated or not
    pub async fn sender(&self, client_id: &str) -> BridgeResult<OutboundSender> {
        self.connections
            .read()
            .await
            .get(client_id)
            .map(|e| e.tx.clone())
            .ok_or_else(|| BridgeError::ClientNotFound(client_id.to_string()))
    }

    /// Outbound channel of an authenticated connection
    pub async fn authenticated_sender(&self, client_id: &str) -> BridgeResult<OutboundSender> {
        self.with_authenticated_sender(client_id, |tx| tx.clone()).await
    }

    /// Run `f` against an authenticated connection's channel with the registry
    /// read lock held. A concurrent `close` lands either before the check or
    /// after `f` returns.
    pub async fn with_authenticated_sender<R>(
        &self,
        client_id: &str,
        f: impl FnOnce(&OutboundSender) -> R,
    ) -> BridgeResult<R> {
        let connections = self.connections.read().await;
        let entry = connections
            .get(client_id)
            .ok_or_else(|| BridgeError::ClientNotFound(client_id.to_string()))?;
        if !entry.summary.authenticated {
            return Err(BridgeError::NotAuthenticated);
        }
        Ok(f(&entry.tx))
    }

    /// Send a backend frame to one connection
    pub async fn send_to(&self, client_id: &str, frame: &OutboundFrame) -> BridgeResult<()> {
        let tx = self.sender(client_id).await?;
        send_frame(&tx, client_id, frame)
    }

    /// Authenticated connections, optionally restricted to one role
    pub async fn list_active(&self, role_filter: Option<ConnectionRole>) -> Vec<ConnectionSummary> {
        let mut active: Vec<ConnectionSummary> = self
            .connections
            .read()
            .await
            .values()
            .filter(|e| e.summary.authenticated)
            .filter(|e| role_filter.map_or(true, |role| e.summary.role == role))
            .map(|e| e.summary.clone())
            .collect();
        active.sort_by(|a, b| a.connected_at.cmp(&b.connected_at));
        active
    }

    /// Preferred authenticated connection: lowest role rank, then oldest
    pub async fn pick_target(
        &self,
        role_filter: Option<ConnectionRole>,
    ) -> Option<(ClientId, OutboundSender)> {
        let connections = self.connections.read().await;
        connections
            .values()
            .filter(|e| e.summary.authenticated)
            .filter(|e| role_filter.map_or(true, |role| e.summary.role == role))
            .min_by(|a, b| {
                a.summary
                    .role
                    .preference_rank()
                    .cmp(&b.summary.role.preference_rank())
                    .then(a.summary.connected_at.cmp(&b.summary.connected_at))
            })
            .map(|e| (e.summary.client_id.clone(), e.tx.clone()))
    }

    pub async fn update_session(&self, client_id: &str, update: &ContextUpdate) -> BridgeResult<()> {
        let mut connections = self.connections.write().await;
        let entry = connections
            .get_mut(client_id)
            .ok_or_else(|| BridgeError::ClientNotFound(client_id.to_string()))?;
        entry.session.apply(update);
        log::debug!(
            "[registry] Session of {} updated: image={} dashboard={}",
            client_id,
            entry.session.has_image,
            entry.session.has_dashboard_context
        );
        Ok(())
    }

    pub async fn session_snapshot(&self, client_id: &str) -> Option<SessionState> {
        self.connections
            .read()
            .await
            .get(client_id)
            .map(|e| e.session.clone())
    }

    /// Forget a connection; returns its last summary if it was known
    pub async fn close(&self, client_id: &str) -> Option<ConnectionSummary> {
        let removed = self.connections.write().await.remove(client_id);
        if removed.is_some() {
            log::debug!("[registry] Closed connection {}", client_id);
        }
        removed.map(|e| e.summary)
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}

/// Serialize and queue a backend frame
pub(crate) fn send_frame(
    tx: &OutboundSender,
    client_id: &str,
    frame: &OutboundFrame,
) -> BridgeResult<()> {
    let text = frame.to_text()?;
    tx.send(OutboundMessage::Text(text))
        .map_err(|_| BridgeError::SendFailed(client_id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::bridge::NORMAL_CLOSE_CODE;
    use serde_json::Value;

    fn register_request(token: &str) -> RegisterRequest {
        RegisterRequest {
            auth_token: token.to_string(),
            display_name: Some("Sales dashboard".to_string()),
        }
    }

    fn next_json(rx: &mut mpsc::UnboundedReceiver<OutboundMessage>) -> Value {
        match rx.try_recv() {
            Ok(OutboundMessage::Text(text)) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected text frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_register_accepts_matching_secret() {
        let registry = ConnectionRegistry::new("s3cret");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = registry.open(tx).await;

        assert!(!registry.is_authenticated(&id).await);
        assert!(registry.list_active(None).await.is_empty());

        registry.register(&id, &register_request("s3cret")).await.unwrap();

        let frame = next_json(&mut rx);
        assert_eq!(frame["type"], "connected");
        assert_eq!(frame["clientId"], id.as_str());

        let active = registry.list_active(Some(ConnectionRole::UiClient)).await;
        assert_eq!(active.len(), 1);
        assert!(active[0].authenticated);
        assert_eq!(active[0].display_name.as_deref(), Some("Sales dashboard"));
    }

    #[tokio::test]
    async fn test_register_rejects_bad_secret_and_closes() {
        let registry = ConnectionRegistry::new("s3cret");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = registry.open(tx).await;

        let err = registry.register(&id, &register_request("wrong")).await.unwrap_err();
        assert_eq!(err, BridgeError::AuthenticationFailed);

        let frame = next_json(&mut rx);
        assert_eq!(frame["type"], "auth-error");
        assert_eq!(frame["error"], "Invalid auth token");

        match rx.try_recv() {
            Ok(OutboundMessage::Close { code, .. }) => {
                assert_eq!(code, AUTH_REJECTED_CLOSE_CODE);
                assert_ne!(code, NORMAL_CLOSE_CODE);
            }
            other => panic!("expected close, got {:?}", other),
        }

        assert!(registry.list_active(None).await.is_empty());
        assert_eq!(registry.connection_count().await, 0);
        assert!(matches!(registry.sender(&id).await, Err(BridgeError::ClientNotFound(_))));
    }

    #[tokio::test]
    async fn test_authenticated_sender_requires_handshake() {
        let registry = ConnectionRegistry::new("s3cret");
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = registry.open(tx).await;

        assert!(matches!(
            registry.authenticated_sender(&id).await,
            Err(BridgeError::NotAuthenticated)
        ));
        registry.register(&id, &register_request("s3cret")).await.unwrap();
        assert!(registry.authenticated_sender(&id).await.is_ok());
    }

    #[tokio::test]
    async fn test_pick_target_prefers_oldest_authenticated() {
        let registry = ConnectionRegistry::new("s3cret");
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        let (tx3, _rx3) = mpsc::unbounded_channel();

        let pending = registry.open(tx1).await;
        let first = registry.open(tx2).await;
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let second = registry.open(tx3).await;

        assert!(registry.pick_target(None).await.is_none());

        registry.register(&second, &register_request("s3cret")).await.unwrap();
        registry.register(&first, &register_request("s3cret")).await.unwrap();

        let (target, _) = registry.pick_target(Some(ConnectionRole::UiClient)).await.unwrap();
        assert_eq!(target, first);
        assert_ne!(target, pending);
        assert!(registry.pick_target(Some(ConnectionRole::Unassigned)).await.is_none());
    }

    #[tokio::test]
    async fn test_session_update_and_close() {
        let registry = ConnectionRegistry::new("s3cret");
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = registry.open(tx).await;

        registry
            .update_session(
                &id,
                &ContextUpdate {
                    has_image: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(registry.session_snapshot(&id).await.unwrap().has_image);

        let summary = registry.close(&id).await.unwrap();
        assert_eq!(summary.client_id, id);
        assert!(registry.session_snapshot(&id).await.is_none());
        assert!(registry.close(&id).await.is_none());
    }
}
