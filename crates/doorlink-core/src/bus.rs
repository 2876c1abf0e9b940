//! Event bus: named multicast notification channels.
//!
//! Every component publishes normalized events here and external
//! collaborators (UI, call log, alerting) subscribe. Each event kind gets
//! its own typed [`Channel`].
//!
//! Delivery contract:
//! - `publish` runs every current subscriber synchronously, in
//!   registration order, on the publishing thread.
//! - Publishing with zero subscribers is a no-op.
//! - Delivery iterates a snapshot, so subscribing or unsubscribing from
//!   inside a handler never disturbs the delivery in progress.
//! - A panicking subscriber is logged and skipped; the remaining
//!   subscribers still run and the publisher never sees the panic.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use arc_swap::ArcSwap;
use tracing::{error, warn};

use crate::error::CoreError;
use crate::model::{CallElement, GpioEvent};

type Handler<T> = dyn Fn(&T) + Send + Sync;

struct Subscriber<T> {
    id: u64,
    handler: Box<Handler<T>>,
}

/// Handle returned by [`Channel::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

// ── Channel ──────────────────────────────────────────────────────────

/// A typed multicast channel carrying `T`.
pub struct Channel<T> {
    name: &'static str,
    subscribers: ArcSwap<Vec<Arc<Subscriber<T>>>>,
    next_id: AtomicU64,
}

impl<T> Channel<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            subscribers: ArcSwap::from_pointee(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.load().len()
    }

    /// Register a handler. Handlers run in registration order.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let subscriber = Arc::new(Subscriber {
            id,
            handler: Box::new(handler),
        });
        self.subscribers.rcu(|current| {
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().cloned());
            next.push(Arc::clone(&subscriber));
            next
        });
        SubscriptionId(id)
    }

    /// Remove a handler. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let previous = self.subscribers.rcu(|current| {
            current
                .iter()
                .filter(|s| s.id != id.0)
                .cloned()
                .collect::<Vec<_>>()
        });
        previous.iter().any(|s| s.id == id.0)
    }

    /// Deliver `value` to every current subscriber.
    ///
    /// Returns how many handlers completed without panicking.
    pub fn publish(&self, value: &T) -> usize {
        let snapshot = self.subscribers.load_full();
        let mut delivered = 0;
        for subscriber in snapshot.iter() {
            let outcome = catch_unwind(AssertUnwindSafe(|| (subscriber.handler)(value)));
            if outcome.is_ok() {
                delivered += 1;
            } else {
                error!(
                    channel = self.name,
                    subscriber = subscriber.id,
                    "event subscriber panicked; continuing delivery"
                );
            }
        }
        delivered
    }
}

impl Channel<()> {
    /// Publish a payload-less notification.
    pub fn notify(&self) -> usize {
        self.publish(&())
    }
}

// ── EventBus ─────────────────────────────────────────────────────────

/// The full set of channels shared by every component.
pub struct EventBus {
    connection_changed: Channel<bool>,
    device_list_changed: Channel<()>,
    groups_list_changed: Channel<()>,
    queues_and_calls_sync: Channel<()>,
    call_event: Channel<CallElement>,
    gpio_event: Channel<GpioEvent>,
    exception_raised: Channel<Arc<CoreError>>,
    diagnostic: Channel<String>,
    retrieval_start: Channel<()>,
    retrieval_end: Channel<()>,
}

static GLOBAL: OnceLock<Arc<EventBus>> = OnceLock::new();

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            connection_changed: Channel::new("connection_changed"),
            device_list_changed: Channel::new("device_list_changed"),
            groups_list_changed: Channel::new("groups_list_changed"),
            queues_and_calls_sync: Channel::new("queues_and_calls_sync"),
            call_event: Channel::new("call_event"),
            gpio_event: Channel::new("gpio_event"),
            exception_raised: Channel::new("exception_raised"),
            diagnostic: Channel::new("diagnostic"),
            retrieval_start: Channel::new("retrieval_start"),
            retrieval_end: Channel::new("retrieval_end"),
        }
    }

    /// Process-wide bus, created on first use.
    pub fn global() -> Arc<EventBus> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(EventBus::new())))
    }

    /// Connection to the controller came up (`true`) or went away.
    pub fn connection_changed(&self) -> &Channel<bool> {
        &self.connection_changed
    }

    pub fn device_list_changed(&self) -> &Channel<()> {
        &self.device_list_changed
    }

    pub fn groups_list_changed(&self) -> &Channel<()> {
        &self.groups_list_changed
    }

    /// Active-call list and call queue were re-synchronized.
    pub fn queues_and_calls_sync(&self) -> &Channel<()> {
        &self.queues_and_calls_sync
    }

    pub fn call_event(&self) -> &Channel<CallElement> {
        &self.call_event
    }

    pub fn gpio_event(&self) -> &Channel<GpioEvent> {
        &self.gpio_event
    }

    pub fn exception_raised(&self) -> &Channel<Arc<CoreError>> {
        &self.exception_raised
    }

    /// Free-text diagnostics: transport log lines and refresh failures.
    pub fn diagnostic(&self) -> &Channel<String> {
        &self.diagnostic
    }

    /// A bulk device refresh should start.
    pub fn retrieval_start(&self) -> &Channel<()> {
        &self.retrieval_start
    }

    /// A bulk device refresh finished, successfully or not.
    pub fn retrieval_end(&self) -> &Channel<()> {
        &self.retrieval_end
    }

    /// Log and publish a failure from a fire-and-forget path.
    pub fn raise(&self, err: CoreError) {
        warn!(error = %err, "raising exception");
        self.exception_raised.publish(&Arc::new(err));
    }
}
