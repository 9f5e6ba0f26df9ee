//! Typed publish/subscribe with per-handler failure isolation.
//!
//! For a single `emit` call, handlers run sequentially in subscription
//! order and `emit` resolves only after the last one finished. A handler
//! error is logged with its label and swallowed - it never reaches the
//! publisher or the remaining handlers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use prizm_domain::Result;

use crate::event::DomainEvent;

/// Wildcard key for handlers that observe every event.
const ALL_EVENTS: &str = "*";

#[async_trait::async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: DomainEvent) -> Result<()>;
}

/// Blanket impl so plain async closures can subscribe without a newtype.
#[async_trait::async_trait]
impl<F, Fut> EventHandler for F
where
    F: Fn(DomainEvent) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<()>> + Send,
{
    async fn handle(&self, event: DomainEvent) -> Result<()> {
        self(event).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    label: String,
    once: bool,
    handler: Arc<dyn EventHandler>,
}

/// The in-process event bus. Cheap to clone via `Arc`.
pub struct EventBus {
    subs: Mutex<HashMap<String, Vec<Subscription>>>,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subs: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe to one event name. Returns a token for `unsubscribe`.
    pub fn subscribe(
        &self,
        event_name: &str,
        label: &str,
        handler: Arc<dyn EventHandler>,
    ) -> SubscriptionId {
        self.insert(event_name, label, handler, false)
    }

    /// Subscribe to one event name; the subscription is removed after the
    /// first delivery.
    pub fn subscribe_once(
        &self,
        event_name: &str,
        label: &str,
        handler: Arc<dyn EventHandler>,
    ) -> SubscriptionId {
        self.insert(event_name, label, handler, true)
    }

    /// Subscribe to every event (used by the WebSocket bridge and audit).
    /// Wildcard handlers run after the name-specific ones.
    pub fn subscribe_all(&self, label: &str, handler: Arc<dyn EventHandler>) -> SubscriptionId {
        self.insert(ALL_EVENTS, label, handler, false)
    }

    fn insert(
        &self,
        event_name: &str,
        label: &str,
        handler: Arc<dyn EventHandler>,
        once: bool,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subs
            .lock()
            .entry(event_name.to_owned())
            .or_default()
            .push(Subscription {
                id,
                label: label.to_owned(),
                once,
                handler,
            });
        id
    }

    /// Remove a subscription. Unknown ids are a no-op.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut subs = self.subs.lock();
        for list in subs.values_mut() {
            list.retain(|s| s.id != id);
        }
        subs.retain(|_, list| !list.is_empty());
    }

    /// Drop every subscription. Used at shutdown.
    pub fn clear_all(&self) {
        self.subs.lock().clear();
    }

    /// Number of live subscriptions (monitoring).
    pub fn subscription_count(&self) -> usize {
        self.subs.lock().values().map(Vec::len).sum()
    }

    /// Deliver an event to every subscriber of its name, then to the
    /// wildcard subscribers. Resolves once all handlers ran.
    pub async fn emit(&self, event: DomainEvent) {
        let name = event.name();
        let batch = {
            let mut subs = self.subs.lock();
            let mut batch: Vec<(SubscriptionId, String, Arc<dyn EventHandler>)> = Vec::new();
            let mut spent: Vec<SubscriptionId> = Vec::new();
            for key in [name, ALL_EVENTS] {
                if let Some(list) = subs.get(key) {
                    for sub in list {
                        batch.push((sub.id, sub.label.clone(), sub.handler.clone()));
                        if sub.once {
                            spent.push(sub.id);
                        }
                    }
                }
            }
            // Remove one-shot subscriptions before delivery so a reentrant
            // emit from a handler cannot double-fire them.
            if !spent.is_empty() {
                for list in subs.values_mut() {
                    list.retain(|s| !spent.contains(&s.id));
                }
                subs.retain(|_, list| !list.is_empty());
            }
            batch
        };

        for (_, label, handler) in batch {
            if let Err(e) = handler.handle(event.clone()).await {
                tracing::warn!(
                    event = name,
                    handler = %label,
                    error = %e,
                    "event handler failed"
                );
            }
        }
    }
}
