//! User-interaction gate.
//!
//! A tool that needs a human decision parks the turn on a pending
//! request; `POST …/interact-response` resolves it out-of-band.
//! Cancelling the turn resolves the wait with a synthetic denial so
//! nothing blocks forever.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractResponse {
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// True when the response was synthesized by cancellation or
    /// timeout rather than a real user decision.
    #[serde(default)]
    pub synthetic: bool,
}

impl InteractResponse {
    fn denied() -> Self {
        Self {
            approved: false,
            data: None,
            synthetic: true,
        }
    }
}

pub struct InteractGate {
    pending: Mutex<HashMap<String, oneshot::Sender<InteractResponse>>>,
}

impl Default for InteractGate {
    fn default() -> Self {
        Self::new()
    }
}

impl InteractGate {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Park until the matching `respond` arrives or the turn is
    /// cancelled (synthetic denial).
    pub async fn wait(&self, request_id: &str, cancel: &CancellationToken) -> InteractResponse {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request_id.to_owned(), tx);

        tokio::select! {
            response = rx => response.unwrap_or_else(|_| InteractResponse::denied()),
            _ = cancel.cancelled() => {
                self.pending.lock().remove(request_id);
                InteractResponse::denied()
            }
        }
    }

    /// Resolve a pending request. Returns false for unknown ids.
    pub fn respond(&self, request_id: &str, response: InteractResponse) -> bool {
        if let Some(tx) = self.pending.lock().remove(request_id) {
            let _ = tx.send(response);
            true
        } else {
            false
        }
    }

    pub fn pending_ids(&self) -> Vec<String> {
        self.pending.lock().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn respond_unblocks_waiter() {
        let gate = Arc::new(InteractGate::new());
        let cancel = CancellationToken::new();

        let waiter = tokio::spawn({
            let gate = gate.clone();
            let cancel = cancel.clone();
            async move { gate.wait("req-1", &cancel).await }
        });

        // Let the waiter park.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(gate.pending_ids(), vec!["req-1".to_string()]);

        assert!(gate.respond(
            "req-1",
            InteractResponse {
                approved: true,
                data: Some(serde_json::json!({"note": "go ahead"})),
                synthetic: false,
            },
        ));

        let response = waiter.await.unwrap();
        assert!(response.approved);
        assert!(!response.synthetic);
        assert!(gate.pending_ids().is_empty());
    }

    #[tokio::test]
    async fn cancellation_synthesizes_denial() {
        let gate = Arc::new(InteractGate::new());
        let cancel = CancellationToken::new();

        let waiter = tokio::spawn({
            let gate = gate.clone();
            let cancel = cancel.clone();
            async move { gate.wait("req-1", &cancel).await }
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        cancel.cancel();

        let response = waiter.await.unwrap();
        assert!(!response.approved);
        assert!(response.synthetic);
        assert!(gate.pending_ids().is_empty());
    }

    #[test]
    fn respond_unknown_id_is_false() {
        let gate = InteractGate::new();
        assert!(!gate.respond(
            "ghost",
            InteractResponse {
                approved: true,
                data: None,
                synthetic: false,
            },
        ));
    }
}
