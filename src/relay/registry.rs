//! Multi-subscriber message registry.
//!
//! Lets independent components react to message types without knowing
//! about each other: the turn clock, the recall display and the submission
//! control can all subscribe to `change_of_turn`.
//!
//! # Semantics
//!
//! - Subscribers for one type run in subscription order, each exactly once
//!   per message, synchronously on the dispatching task.
//! - No deduplication: subscribing twice means being called twice.
//! - A subscriber that panics is logged and skipped; the rest still run.
//! - Context-bound subscriptions ([`Registry::subscribe_with`]) hold their
//!   context weakly and are pruned once the context has been dropped.
//!
//! # Deadlock Prevention
//!
//! Callbacks are collected under the lock and fired after it is released,
//! so a callback may subscribe or unsubscribe without deadlocking.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use super::dispatch::{Dispatch, DispatchOutcome};
use super::message::Message;

/// Identifies one subscription for [`Registry::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub_{}", self.0)
    }
}

/// Whether a subscriber is still interested after a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Liveness {
    Alive,
    Gone,
}

type Callback = Arc<dyn Fn(&Message) -> Liveness + Send + Sync>;

#[derive(Default)]
struct Subscriptions {
    /// Message type -> subscribers in insertion order.
    by_kind: HashMap<String, Vec<(SubscriptionId, Callback)>>,
    next_id: u64,
}

impl Subscriptions {
    fn insert(&mut self, kind: &str, callback: Callback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.by_kind
            .entry(kind.to_string())
            .or_default()
            .push((id, callback));
        id
    }

    fn remove(&mut self, id: SubscriptionId) -> bool {
        let mut removed = false;
        for subscribers in self.by_kind.values_mut() {
            if let Some(idx) = subscribers.iter().position(|(sid, _)| *sid == id) {
                subscribers.remove(idx);
                removed = true;
                break;
            }
        }
        self.by_kind.retain(|_, v| !v.is_empty());
        removed
    }
}

/// Shared subscription table. Cheap to clone; clones see the same table.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<Mutex<Subscriptions>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.lock();
        f.debug_struct("Registry")
            .field("kinds", &table.by_kind.len())
            .field(
                "subscriptions",
                &table.by_kind.values().map(Vec::len).sum::<usize>(),
            )
            .field("next_id", &table.next_id)
            .finish()
    }
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Subscriptions> {
        // Subscriber panics are caught outside the lock, but recover anyway.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Call `callback` for every message of type `kind`, for the lifetime
    /// of the registry or until [`Self::unsubscribe`].
    pub fn subscribe<F>(&self, kind: &str, callback: F) -> SubscriptionId
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        let id = self.lock().insert(
            kind,
            Arc::new(move |message: &Message| {
                callback(message);
                Liveness::Alive
            }),
        );
        log::debug!("[Registry] Subscribed {} to '{}'", id, kind);
        id
    }

    /// Call `callback` with `context` for every message of type `kind`.
    ///
    /// The registry keeps only a weak reference to `context`. Once every
    /// strong reference is dropped the subscription is removed on the next
    /// delivery.
    pub fn subscribe_with<C, F>(&self, kind: &str, context: &Arc<C>, callback: F) -> SubscriptionId
    where
        C: Send + Sync + 'static,
        F: Fn(&C, &Message) + Send + Sync + 'static,
    {
        let weak: Weak<C> = Arc::downgrade(context);
        let id = self.lock().insert(
            kind,
            Arc::new(move |message: &Message| match weak.upgrade() {
                Some(ctx) => {
                    callback(&ctx, message);
                    Liveness::Alive
                }
                None => Liveness::Gone,
            }),
        );
        log::debug!("[Registry] Subscribed {} to '{}' (context-bound)", id, kind);
        id
    }

    /// Remove a subscription. Returns `false` if it was not found.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.lock().remove(id);
        if removed {
            log::debug!("[Registry] Unsubscribed {}", id);
        }
        removed
    }

    /// Number of live subscriptions for `kind`.
    pub fn subscriber_count(&self, kind: &str) -> usize {
        self.lock().by_kind.get(kind).map_or(0, Vec::len)
    }

    /// Total number of subscriptions.
    pub fn len(&self) -> usize {
        self.lock().by_kind.values().map(Vec::len).sum()
    }

    /// Whether there are no subscriptions at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `message` to every subscriber of its type.
    ///
    /// Returns the number of subscribers that ran to completion.
    pub fn publish(&self, message: &Message) -> usize {
        // Phase 1: snapshot subscribers under the lock.
        let subscribers: Vec<(SubscriptionId, Callback)> = {
            let table = self.lock();
            match table.by_kind.get(&message.kind) {
                Some(subs) => subs
                    .iter()
                    .map(|(id, cb)| (*id, Arc::clone(cb)))
                    .collect(),
                None => return 0,
            }
        };

        // Phase 2: fire without the lock, isolating panics.
        let mut delivered = 0;
        let mut gone = Vec::new();
        for (id, callback) in subscribers {
            match catch_unwind(AssertUnwindSafe(|| callback(message))) {
                Ok(Liveness::Alive) => delivered += 1,
                Ok(Liveness::Gone) => gone.push(id),
                Err(_) => {
                    log::error!(
                        "[Registry] Subscriber {} panicked handling '{}'",
                        id,
                        message.kind
                    );
                }
            }
        }

        // Phase 3: prune subscriptions whose context is gone.
        if !gone.is_empty() {
            let mut table = self.lock();
            for id in gone {
                if table.remove(id) {
                    log::debug!("[Registry] Pruned {} (context dropped)", id);
                }
            }
        }

        delivered
    }
}

impl Dispatch for Registry {
    fn dispatch(&mut self, message: &Message) -> DispatchOutcome {
        if self.subscriber_count(&message.kind) == 0 {
            log::debug!(
                "[Relay] Unrecognized message type {} from backend",
                message.kind
            );
            return DispatchOutcome::Unhandled;
        }
        DispatchOutcome::Delivered(self.publish(message))
    }
}
