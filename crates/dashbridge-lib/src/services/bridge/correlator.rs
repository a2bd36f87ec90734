// Request Correlator
//
// Owns the map of backend-initiated calls awaiting an answer. Each pending
// call resolves exactly once: by a matching response, by its deadline, or by
// the loss of the connection it was sent to.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;

use super::error::{BridgeError, BridgeResult};
use super::registry::OutboundSender;
use crate::models::bridge::{ClientId, OutboundMessage, RequestId};

struct PendingRequest {
    client_id: ClientId,
    responder: oneshot::Sender<BridgeResult<Value>>,
}

/// Correlates outbound calls with inbound responses
pub struct RequestCorrelator {
    next_id: AtomicU64,
    pending: Mutex<HashMap<RequestId, PendingRequest>>,
}

impl Default for RequestCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

/// A call that has been registered and sent but not yet answered.
///
/// Dropping it removes the pending entry, so a cancelled caller leaves
/// nothing behind.
pub struct PendingCall<'a> {
    correlator: &'a RequestCorrelator,
    client_id: ClientId,
    request_id: RequestId,
    rx: oneshot::Receiver<BridgeResult<Value>>,
}

impl PendingCall<'_> {
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Wait for the response, the deadline, or the loss of the connection
    pub async fn wait(mut self, timeout: Duration) -> BridgeResult<Value> {
        let connection_lost = |client_id: &str| BridgeError::ConnectionLost {
            client_id: client_id.to_string(),
        };

        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(connection_lost(&self.client_id)),
            Err(_) => {
                if self.correlator.take(self.request_id).is_some() {
                    log::warn!(
                        "[correlator] Request {} to {} timed out after {}ms",
                        self.request_id,
                        self.client_id,
                        timeout.as_millis()
                    );
                    return Err(BridgeError::Timeout {
                        request_id: self.request_id,
                        timeout_ms: timeout.as_millis() as u64,
                    });
                }
                // Resolved concurrently with the deadline; the value is already queued
                (&mut self.rx)
                    .await
                    .unwrap_or_else(|_| Err(connection_lost(&self.client_id)))
            }
        }
    }
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) {
        self.correlator.take(self.request_id);
    }
}

impl RequestCorrelator {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<RequestId, PendingRequest>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take(&self, request_id: RequestId) -> Option<PendingRequest> {
        self.lock().remove(&request_id)
    }

    /// Send `payload` with a fresh `requestId` and wait for the answer.
    ///
    /// `payload` must be a JSON object. Any `requestId` it already carries is
    /// overwritten.
    pub async fn call(
        &self,
        client_id: &str,
        tx: &OutboundSender,
        payload: Value,
        timeout: Duration,
    ) -> BridgeResult<Value> {
        self.begin(client_id, tx, payload)?.wait(timeout).await
    }

    /// Register a pending entry for `payload` and send it; the entry exists
    /// before the frame leaves, so the answer can never beat it.
    pub fn begin(
        &self,
        client_id: &str,
        tx: &OutboundSender,
        payload: Value,
    ) -> BridgeResult<PendingCall<'_>> {
        let Value::Object(mut frame) = payload else {
            return Err(BridgeError::InvalidPayload(
                "call payload must be a JSON object".to_string(),
            ));
        };

        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        frame.insert("requestId".to_string(), Value::from(request_id));
        let text = serde_json::to_string(&frame)?;

        let (responder, rx) = oneshot::channel();
        self.lock().insert(
            request_id,
            PendingRequest {
                client_id: client_id.to_string(),
                responder,
            },
        );
        let pending = PendingCall {
            correlator: self,
            client_id: client_id.to_string(),
            request_id,
            rx,
        };

        if tx.send(OutboundMessage::Text(text)).is_err() {
            return Err(BridgeError::SendFailed(client_id.to_string()));
        }

        log::debug!("[correlator] Sent request {} to {}", request_id, client_id);
        Ok(pending)
    }

    /// Fire-and-forget: `payload` goes out verbatim, nothing is awaited
    pub fn send(&self, client_id: &str, tx: &OutboundSender, payload: &Value) -> BridgeResult<()> {
        let text = serde_json::to_string(payload)?;
        tx.send(OutboundMessage::Text(text))
            .map_err(|_| BridgeError::SendFailed(client_id.to_string()))
    }

    /// Deliver a response from `client_id`.
    ///
    /// Returns false when no call is waiting on `request_id`: already timed
    /// out, already answered, or owned by another connection.
    pub fn resolve(
        &self,
        client_id: &str,
        request_id: RequestId,
        result: Result<Value, String>,
    ) -> bool {
        let pending = {
            let mut map = self.lock();
            match map.get(&request_id) {
                Some(p) if p.client_id == client_id => map.remove(&request_id),
                Some(_) => {
                    log::warn!(
                        "[correlator] Ignoring response {} from {}: owned by another connection",
                        request_id,
                        client_id
                    );
                    return false;
                }
                None => None,
            }
        };

        match pending {
            Some(p) => {
                let _ = p.responder.send(result.map_err(BridgeError::Remote));
                true
            }
            None => {
                log::debug!("[correlator] Dropping late or unknown response {}", request_id);
                false
            }
        }
    }

    /// Reject every call owned by `client_id`; returns how many were rejected
    pub fn fail_connection(&self, client_id: &str) -> usize {
        let failed: Vec<PendingRequest> = {
            let mut map = self.lock();
            let ids: Vec<RequestId> = map
                .iter()
                .filter(|(_, p)| p.client_id == client_id)
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| map.remove(id)).collect()
        };

        let count = failed.len();
        for pending in failed {
            let _ = pending.responder.send(Err(BridgeError::ConnectionLost {
                client_id: client_id.to_string(),
            }));
        }
        if count > 0 {
            log::info!("[correlator] Rejected {} pending request(s) of {}", count, client_id);
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    async fn next_request_id(rx: &mut mpsc::UnboundedReceiver<OutboundMessage>) -> RequestId {
        match rx.recv().await {
            Some(OutboundMessage::Text(text)) => {
                let value: Value = serde_json::from_str(&text).unwrap();
                value["requestId"].as_u64().unwrap()
            }
            other => panic!("expected text frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_call_resolves_with_response() {
        let correlator = Arc::new(RequestCorrelator::new());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let caller = {
            let correlator = correlator.clone();
            tokio::spawn(async move {
                correlator
                    .call("c1", &tx, json!({"type": "get-filters"}), Duration::from_secs(5))
                    .await
            })
        };

        let id = next_request_id(&mut rx).await;
        assert_eq!(id, 1);
        assert!(correlator.resolve("c1", id, Ok(json!({"filters": []}))));

        assert_eq!(caller.await.unwrap().unwrap(), json!({"filters": []}));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_remote_error_rejects_call() {
        let correlator = Arc::new(RequestCorrelator::new());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let caller = {
            let correlator = correlator.clone();
            tokio::spawn(async move {
                correlator
                    .call("c1", &tx, json!({"type": "get-worksheet-data"}), Duration::from_secs(5))
                    .await
            })
        };

        let id = next_request_id(&mut rx).await;
        correlator.resolve("c1", id, Err("Worksheet not found".to_string()));
        assert_eq!(
            caller.await.unwrap().unwrap_err(),
            BridgeError::Remote("Worksheet not found".to_string())
        );
    }

    #[tokio::test]
    async fn test_timeout_then_late_response_is_noop() {
        let correlator = RequestCorrelator::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let err = correlator
            .call("c1", &tx, json!({"type": "get-screenshot"}), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Timeout { request_id: 1, timeout_ms: 20 }));
        assert_eq!(correlator.pending_count(), 0);

        let id = next_request_id(&mut rx).await;
        assert!(!correlator.resolve("c1", id, Ok(json!("late"))));
        assert!(!correlator.resolve("c1", id, Ok(json!("later"))));
    }

    #[tokio::test]
    async fn test_connection_loss_rejects_each_pending_once() {
        let correlator = Arc::new(RequestCorrelator::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (other_tx, _other_rx) = mpsc::unbounded_channel();

        let mut callers = Vec::new();
        for _ in 0..3 {
            let correlator = correlator.clone();
            let tx = tx.clone();
            callers.push(tokio::spawn(async move {
                correlator
                    .call("c1", &tx, json!({"type": "get-dashboard-summary"}), Duration::from_secs(30))
                    .await
            }));
        }
        let survivor = {
            let correlator = correlator.clone();
            tokio::spawn(async move {
                correlator
                    .call("c2", &other_tx, json!({"type": "get-filters"}), Duration::from_millis(200))
                    .await
            })
        };

        for _ in 0..3 {
            next_request_id(&mut rx).await;
        }
        while correlator.pending_count() < 4 {
            tokio::task::yield_now().await;
        }

        assert_eq!(correlator.fail_connection("c1"), 3);
        assert_eq!(correlator.fail_connection("c1"), 0);

        for caller in callers {
            assert_eq!(
                caller.await.unwrap().unwrap_err(),
                BridgeError::ConnectionLost { client_id: "c1".to_string() }
            );
        }
        assert!(matches!(survivor.await.unwrap(), Err(BridgeError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_response_from_other_connection_is_ignored() {
        let correlator = Arc::new(RequestCorrelator::new());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let caller = {
            let correlator = correlator.clone();
            tokio::spawn(async move {
                correlator
                    .call("c1", &tx, json!({"type": "get-filters"}), Duration::from_secs(5))
                    .await
            })
        };

        let id = next_request_id(&mut rx).await;
        assert!(!correlator.resolve("intruder", id, Ok(json!("spoofed"))));
        assert!(correlator.resolve("c1", id, Ok(json!("real"))));
        assert_eq!(caller.await.unwrap().unwrap(), json!("real"));
    }

    #[tokio::test]
    async fn test_request_ids_are_unique() {
        let correlator = Arc::new(RequestCorrelator::new());
        let (tx, mut rx) = mpsc::unbounded_channel();

        for _ in 0..50 {
            let correlator = correlator.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let _ = correlator
                    .call("c1", &tx, json!({"type": "get-filters"}), Duration::from_millis(50))
                    .await;
            });
        }

        let mut seen = HashSet::new();
        for _ in 0..50 {
            assert!(seen.insert(next_request_id(&mut rx).await));
        }
    }

    #[tokio::test]
    async fn test_send_is_verbatim_and_uncorrelated() {
        let correlator = RequestCorrelator::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let payload = json!({"type": "toggle-tooltips", "enabled": false});

        correlator.send("c1", &tx, &payload).unwrap();

        assert_eq!(
            rx.recv().await,
            Some(OutboundMessage::Text(serde_json::to_string(&payload).unwrap()))
        );
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_begin_registers_before_send_and_drop_cleans_up() {
        let correlator = RequestCorrelator::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let pending = correlator.begin("c1", &tx, json!({"type": "get-filters"})).unwrap();
        assert_eq!(correlator.pending_count(), 1);
        assert_eq!(next_request_id(&mut rx).await, pending.request_id());

        // Connection loss before anyone waits is still delivered
        assert_eq!(correlator.fail_connection("c1"), 1);
        assert!(matches!(
            pending.wait(Duration::from_secs(5)).await,
            Err(BridgeError::ConnectionLost { .. })
        ));

        let abandoned = correlator.begin("c1", &tx, json!({"type": "get-filters"})).unwrap();
        drop(abandoned);
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_channel_fails_fast() {
        let correlator = RequestCorrelator::new();
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);

        let err = correlator
            .call("c1", &tx, json!({"type": "get-filters"}), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err, BridgeError::SendFailed("c1".to_string()));
        assert_eq!(correlator.pending_count(), 0);

        assert!(matches!(
            correlator.call("c1", &tx, json!("not an object"), Duration::from_secs(1)).await,
            Err(BridgeError::InvalidPayload(_))
        ));
    }
}
