//! Topic-based publish/subscribe bus
//!
//! Handlers run on the publisher's thread, outside of the subscriber lock,
//! so a publisher only ever waits for the handlers themselves. Handlers that
//! feed a slow consumer should forward into a queue
//! ([`MessageBus::subscribe_channel`]) instead of doing the work inline.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, trace};

use super::{Event, TopicPattern};

/// Callback invoked for every matching event
pub type Handler = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

/// Receives handler failures instead of the publisher
pub type ErrorSink = Arc<dyn Fn(&HandlerFailure) + Send + Sync>;

/// Opaque handle returned by `subscribe`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A handler returned an error or panicked
#[derive(Debug, Clone)]
pub struct HandlerFailure {
    pub subscription: SubscriptionId,
    pub topic: String,
    pub reason: String,
}

struct Subscriber {
    id: SubscriptionId,
    pattern: TopicPattern,
    handler: Handler,
}

struct BusInner {
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
    error_sink: RwLock<ErrorSink>,
}

/// Cloneable handle to the shared bus
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl MessageBus {
    /// Create a bus whose handler failures are logged
    pub fn new() -> Self {
        let sink: ErrorSink = Arc::new(|failure: &HandlerFailure| {
            error!(
                subscription = %failure.subscription,
                topic = %failure.topic,
                reason = %failure.reason,
                "bus handler failed"
            );
        });

        Self {
            inner: Arc::new(BusInner {
                subscribers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
                error_sink: RwLock::new(sink),
            }),
        }
    }

    /// Replace the sink that receives handler failures
    #[cfg(test)]
    pub fn set_error_sink(&self, sink: ErrorSink) {
        *self.inner.error_sink.write() = sink;
    }

    /// Register `handler` for every topic matching `pattern`
    pub fn subscribe<F>(&self, pattern: impl Into<TopicPattern>, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let pattern = pattern.into();
        debug!(subscription = %id, %pattern, "subscribed");

        self.inner.subscribers.write().push(Subscriber {
            id,
            pattern,
            handler: Arc::new(handler),
        });
        id
    }

    /// Subscribe with a handler that forwards into an unbounded queue
    pub fn subscribe_channel(
        &self,
        pattern: impl Into<TopicPattern>,
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(pattern, move |event: &Event| {
            tx.send(event.clone())
                .map_err(|_| anyhow::anyhow!("subscriber queue closed"))
        });
        (id, rx)
    }

    /// Remove a subscription; returns false if it was already gone
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.inner.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        let removed = subscribers.len() != before;
        if removed {
            debug!(subscription = %id, "unsubscribed");
        }
        removed
    }

    /// Deliver an event to every matching subscriber
    ///
    /// Returns the number of handlers that completed successfully.
    pub fn publish(&self, topic: &str, payload: Value) -> usize {
        self.publish_event(Event::new(topic, payload))
    }

    pub fn publish_event(&self, event: Event) -> usize {
        let targets: Vec<(SubscriptionId, Handler)> = self
            .inner
            .subscribers
            .read()
            .iter()
            .filter(|s| s.pattern.matches(&event.topic))
            .map(|s| (s.id, Arc::clone(&s.handler)))
            .collect();

        trace!(topic = %event.topic, subscribers = targets.len(), "publishing");

        let mut delivered = 0;
        for (id, handler) in targets {
            let reason = match catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(Ok(())) => {
                    delivered += 1;
                    continue;
                }
                Ok(Err(e)) => format!("{:#}", e),
                Err(panic) => format!("panicked: {}", panic_message(panic.as_ref())),
            };

            let sink = Arc::clone(&*self.inner.error_sink.read());
            sink(&HandlerFailure {
                subscription: id,
                topic: event.topic.clone(),
                reason,
            });
        }
        delivered
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
