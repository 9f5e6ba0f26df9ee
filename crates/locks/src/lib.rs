//! Cooperative resource locks.
//!
//! Locks let an agent session claim a document or todo list so concurrent
//! edits from other sessions bounce with a 423-style response. Ownership
//! is advisory: holders heartbeat to stay alive, and expired entries are
//! replaced silently on the next acquire.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use prizm_events::{DomainEvent, EventBus, LockAction};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockKey {
    pub scope: String,
    pub resource_type: String,
    pub resource_id: String,
}

impl LockKey {
    pub fn new(scope: &str, resource_type: &str, resource_id: &str) -> Self {
        Self {
            scope: scope.to_owned(),
            resource_type: resource_type.to_owned(),
            resource_id: resource_id.to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockEntry {
    session_id: String,
    acquired_at: DateTime<Utc>,
    last_heartbeat: DateTime<Utc>,
    ttl_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

impl LockEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.last_heartbeat > Duration::milliseconds(self.ttl_ms as i64)
    }

    fn descriptor(&self, key: &LockKey) -> LockDescriptor {
        LockDescriptor {
            scope: key.scope.clone(),
            resource_type: key.resource_type.clone(),
            resource_id: key.resource_id.clone(),
            session_id: self.session_id.clone(),
            acquired_at: self.acquired_at,
            reason: self.reason.clone(),
            expires_at: self.last_heartbeat + Duration::milliseconds(self.ttl_ms as i64),
        }
    }
}

/// Public view of a held lock, serialized into 423 responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockDescriptor {
    pub scope: String,
    pub resource_type: String,
    pub resource_id: String,
    pub session_id: String,
    pub acquired_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum AcquireOutcome {
    Acquired(LockDescriptor),
    /// Another live session holds the lock.
    Held(LockDescriptor),
}

impl AcquireOutcome {
    pub fn is_acquired(&self) -> bool {
        matches!(self, AcquireOutcome::Acquired(_))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Authoritative in-memory lock state. A reaper sweeps expired entries;
/// `get`/`acquire` also lazily collect them.
pub struct ResourceLockManager {
    locks: Mutex<HashMap<LockKey, LockEntry>>,
    bus: Arc<EventBus>,
}

impl ResourceLockManager {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            bus,
        }
    }

    /// Try to claim `(scope, type, id)` for `session_id`.
    ///
    /// - Free or expired entry → acquired (expired is replaced silently).
    /// - Held by the same session → heartbeat advances, still acquired.
    /// - Held by a live other session → `Held` with the holder descriptor.
    pub async fn acquire(
        &self,
        key: LockKey,
        session_id: &str,
        reason: Option<String>,
        ttl_ms: u64,
    ) -> AcquireOutcome {
        let now = Utc::now();
        let outcome = {
            let mut locks = self.locks.lock();
            match locks.get_mut(&key) {
                Some(entry) if !entry.is_expired(now) => {
                    if entry.session_id == session_id {
                        // Re-acquire by the owner refreshes the heartbeat.
                        entry.last_heartbeat = now;
                        if reason.is_some() {
                            entry.reason = reason;
                        }
                        AcquireOutcome::Acquired(entry.descriptor(&key))
                    } else {
                        AcquireOutcome::Held(entry.descriptor(&key))
                    }
                }
                _ => {
                    let entry = LockEntry {
                        session_id: session_id.to_owned(),
                        acquired_at: now,
                        last_heartbeat: now,
                        ttl_ms,
                        reason,
                    };
                    let desc = entry.descriptor(&key);
                    locks.insert(key.clone(), entry);
                    AcquireOutcome::Acquired(desc)
                }
            }
        };

        if outcome.is_acquired() {
            self.publish(&key, session_id, LockAction::Locked).await;
        }
        outcome
    }

    /// Force-claim regardless of the current holder. The previous holder
    /// (if any, and alive) is released in the same critical section.
    /// Returns the descriptor of the new lock plus the evicted session id.
    pub async fn force_acquire(
        &self,
        key: LockKey,
        session_id: &str,
        reason: Option<String>,
        ttl_ms: u64,
    ) -> (LockDescriptor, Option<String>) {
        let now = Utc::now();
        let (desc, evicted) = {
            let mut locks = self.locks.lock();
            let evicted = locks
                .get(&key)
                .filter(|e| !e.is_expired(now) && e.session_id != session_id)
                .map(|e| e.session_id.clone());
            let entry = LockEntry {
                session_id: session_id.to_owned(),
                acquired_at: now,
                last_heartbeat: now,
                ttl_ms,
                reason,
            };
            let desc = entry.descriptor(&key);
            locks.insert(key.clone(), entry);
            (desc, evicted)
        };

        if let Some(prev) = &evicted {
            self.publish(&key, prev, LockAction::Unlocked).await;
        }
        self.publish(&key, session_id, LockAction::Locked).await;
        (desc, evicted)
    }

    /// Refresh the heartbeat if `session_id` is the owner; no-op otherwise.
    pub fn heartbeat(&self, key: &LockKey, session_id: &str) {
        let mut locks = self.locks.lock();
        if let Some(entry) = locks.get_mut(key) {
            if entry.session_id == session_id {
                entry.last_heartbeat = Utc::now();
            }
        }
    }

    /// Release if `session_id` is the owner. Idempotent - releasing a lock
    /// you don't hold (or that doesn't exist) does nothing.
    pub async fn release(&self, key: &LockKey, session_id: &str) -> bool {
        let removed = {
            let mut locks = self.locks.lock();
            match locks.get(key) {
                Some(entry) if entry.session_id == session_id => {
                    locks.remove(key);
                    true
                }
                _ => false,
            }
        };
        if removed {
            self.publish(key, session_id, LockAction::Unlocked).await;
        }
        removed
    }

    /// Current holder descriptor, or None. Expired entries are collected.
    pub fn get(&self, key: &LockKey) -> Option<LockDescriptor> {
        let now = Utc::now();
        let mut locks = self.locks.lock();
        match locks.get(key) {
            Some(entry) if entry.is_expired(now) => {
                locks.remove(key);
                None
            }
            Some(entry) => Some(entry.descriptor(key)),
            None => None,
        }
    }

    /// All live locks held by one session in a scope.
    pub fn list_session_locks(&self, scope: &str, session_id: &str) -> Vec<LockDescriptor> {
        let now = Utc::now();
        self.locks
            .lock()
            .iter()
            .filter(|(k, e)| {
                k.scope == scope && e.session_id == session_id && !e.is_expired(now)
            })
            .map(|(k, e)| e.descriptor(k))
            .collect()
    }

    /// Release every lock a session holds in a scope. One `unlocked` event
    /// is published per previously-held lock.
    pub async fn release_session_locks(&self, scope: &str, session_id: &str) -> usize {
        let released: Vec<LockKey> = {
            let mut locks = self.locks.lock();
            let keys: Vec<LockKey> = locks
                .iter()
                .filter(|(k, e)| k.scope == scope && e.session_id == session_id)
                .map(|(k, _)| k.clone())
                .collect();
            for k in &keys {
                locks.remove(k);
            }
            keys
        };
        for key in &released {
            self.publish(key, session_id, LockAction::Unlocked).await;
        }
        released.len()
    }

    /// Drop expired entries, publishing an `expired` transition for each.
    pub async fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let expired: Vec<(LockKey, String)> = {
            let mut locks = self.locks.lock();
            let keys: Vec<(LockKey, String)> = locks
                .iter()
                .filter(|(_, e)| e.is_expired(now))
                .map(|(k, e)| (k.clone(), e.session_id.clone()))
                .collect();
            for (k, _) in &keys {
                locks.remove(k);
            }
            keys
        };
        for (key, session_id) in &expired {
            self.publish(key, session_id, LockAction::Expired).await;
        }
        expired.len()
    }

    /// Number of tracked locks, live or not (monitoring).
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }

    async fn publish(&self, key: &LockKey, session_id: &str, action: LockAction) {
        self.bus
            .emit(DomainEvent::LockChanged {
                scope: key.scope.clone(),
                resource_type: key.resource_type.clone(),
                resource_id: key.resource_id.clone(),
                action,
                session_id: session_id.to_owned(),
            })
            .await;
    }
}

/// Wire the session-deletion sweep: when a session is deleted, every lock
/// it held is released (one `unlocked` event each).
pub fn register_session_sweep(bus: &EventBus, manager: Arc<ResourceLockManager>) {
    bus.subscribe(
        "agent:session.deleted",
        "lock-session-sweep",
        Arc::new(move |event: DomainEvent| {
            let manager = manager.clone();
            async move {
                if let DomainEvent::SessionDeleted { scope, session_id } = event {
                    let n = manager.release_session_locks(&scope, &session_id).await;
                    if n > 0 {
                        tracing::debug!(scope, session_id, released = n, "swept session locks");
                    }
                }
                Ok(())
            }
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;

    fn bus_with_probe() -> (Arc<EventBus>, Arc<PlMutex<Vec<(String, String)>>>) {
        let bus = Arc::new(EventBus::new());
        let seen: Arc<PlMutex<Vec<(String, String)>>> = Arc::new(PlMutex::new(Vec::new()));
        let probe = seen.clone();
        bus.subscribe(
            "resource:lock.changed",
            "probe",
            Arc::new(move |event: DomainEvent| {
                let probe = probe.clone();
                async move {
                    if let DomainEvent::LockChanged {
                        action, session_id, ..
                    } = event
                    {
                        probe
                            .lock()
                            .push((format!("{action:?}").to_lowercase(), session_id));
                    }
                    Ok(())
                }
            }),
        );
        (bus, seen)
    }

    fn key(id: &str) -> LockKey {
        LockKey::new("online", "document", id)
    }

    #[tokio::test]
    async fn acquire_then_conflict() {
        let (bus, _) = bus_with_probe();
        let mgr = ResourceLockManager::new(bus);

        let first = mgr.acquire(key("d1"), "sess-a", None, 60_000).await;
        assert!(first.is_acquired());

        let second = mgr
            .acquire(key("d1"), "sess-b", Some("editing".into()), 60_000)
            .await;
        match second {
            AcquireOutcome::Held(desc) => {
                assert_eq!(desc.session_id, "sess-a");
                assert!(desc.expires_at > desc.acquired_at);
            }
            _ => panic!("expected Held"),
        }
    }

    #[tokio::test]
    async fn reacquire_by_owner_is_not_an_error() {
        let (bus, _) = bus_with_probe();
        let mgr = ResourceLockManager::new(bus);

        assert!(mgr.acquire(key("d1"), "sess-a", None, 60_000).await.is_acquired());
        assert!(mgr.acquire(key("d1"), "sess-a", None, 60_000).await.is_acquired());
    }

    #[tokio::test]
    async fn expired_lock_is_replaced_silently() {
        let (bus, _) = bus_with_probe();
        let mgr = ResourceLockManager::new(bus);

        // ttl 0 ⇒ expired as soon as any time passes
        mgr.acquire(key("d1"), "sess-a", None, 0).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let second = mgr.acquire(key("d1"), "sess-b", None, 60_000).await;
        assert!(second.is_acquired());
        assert_eq!(mgr.get(&key("d1")).unwrap().session_id, "sess-b");
    }

    #[tokio::test]
    async fn release_is_owner_checked_and_idempotent() {
        let (bus, _) = bus_with_probe();
        let mgr = ResourceLockManager::new(bus);

        mgr.acquire(key("d1"), "sess-a", None, 60_000).await;
        assert!(!mgr.release(&key("d1"), "sess-b").await);
        assert!(mgr.get(&key("d1")).is_some());

        assert!(mgr.release(&key("d1"), "sess-a").await);
        assert!(!mgr.release(&key("d1"), "sess-a").await);
        assert!(mgr.get(&key("d1")).is_none());
    }

    #[tokio::test]
    async fn get_collects_expired() {
        let (bus, _) = bus_with_probe();
        let mgr = ResourceLockManager::new(bus);

        mgr.acquire(key("d1"), "sess-a", None, 0).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert!(mgr.get(&key("d1")).is_none());
        assert!(mgr.is_empty());
    }

    #[tokio::test]
    async fn release_session_locks_publishes_per_lock() {
        let (bus, seen) = bus_with_probe();
        let mgr = ResourceLockManager::new(bus);

        mgr.acquire(key("d1"), "sess-del", None, 60_000).await;
        mgr.acquire(key("d2"), "sess-del", None, 60_000).await;
        seen.lock().clear();

        let n = mgr.release_session_locks("online", "sess-del").await;
        assert_eq!(n, 2);
        assert!(mgr.list_session_locks("online", "sess-del").is_empty());

        let events = seen.lock();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|(a, s)| a == "unlocked" && s == "sess-del"));
    }

    #[tokio::test]
    async fn session_deleted_event_sweeps_locks() {
        let (bus, seen) = bus_with_probe();
        let mgr = Arc::new(ResourceLockManager::new(bus.clone()));
        register_session_sweep(&bus, mgr.clone());

        mgr.acquire(key("d1"), "sess-del", None, 60_000).await;
        mgr.acquire(key("d2"), "sess-del", None, 60_000).await;
        seen.lock().clear();

        bus.emit(DomainEvent::SessionDeleted {
            scope: "online".into(),
            session_id: "sess-del".into(),
        })
        .await;

        assert!(mgr.list_session_locks("online", "sess-del").is_empty());
        assert_eq!(seen.lock().len(), 2);
    }

    #[tokio::test]
    async fn force_acquire_evicts_holder() {
        let (bus, seen) = bus_with_probe();
        let mgr = ResourceLockManager::new(bus);

        mgr.acquire(key("d1"), "sess-a", None, 60_000).await;
        seen.lock().clear();

        let (desc, evicted) = mgr
            .force_acquire(key("d1"), "sess-b", Some("takeover".into()), 60_000)
            .await;
        assert_eq!(desc.session_id, "sess-b");
        assert_eq!(evicted.as_deref(), Some("sess-a"));

        // unlocked for the evicted holder, then locked for the new one
        let events = seen.lock();
        assert_eq!(events[0], ("unlocked".to_string(), "sess-a".to_string()));
        assert_eq!(events[1], ("locked".to_string(), "sess-b".to_string()));
    }

    #[tokio::test]
    async fn sweep_expired_publishes_expired() {
        let (bus, seen) = bus_with_probe();
        let mgr = ResourceLockManager::new(bus);

        mgr.acquire(key("d1"), "sess-a", None, 0).await;
        mgr.acquire(key("d2"), "sess-b", None, 60_000).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        seen.lock().clear();

        let n = mgr.sweep_expired().await;
        assert_eq!(n, 1);
        assert_eq!(mgr.len(), 1);
        assert_eq!(seen.lock()[0].0, "expired");
    }
}
