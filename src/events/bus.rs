//! Typed Event Bus
//!
//! Publish/subscribe channel keyed by event type. Handlers subscribe to a
//! single type or to every type through the wildcard topic. Delivery runs
//! type-specific handlers in registration order, then wildcard handlers in
//! registration order. A failing or panicking handler is logged and
//! skipped; it never stops delivery to the handlers after it.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use log::{debug, error, warn};
use parking_lot::Mutex;

/// Topic name that matches every event type
pub const WILDCARD: &str = "*";

/// Base trait for events carried by an [`EventBus`]
pub trait BusEvent: Send + Sync + Clone + fmt::Debug + 'static {
    /// Type tag used for topic routing
    fn event_type(&self) -> &str;
}

/// Subscription topic
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Events whose `event_type()` equals the name
    Type(String),
    /// Every event
    All,
}

impl From<&str> for Topic {
    fn from(name: &str) -> Self {
        if name == WILDCARD {
            Topic::All
        } else {
            Topic::Type(name.to_string())
        }
    }
}

impl From<String> for Topic {
    fn from(name: String) -> Self {
        Topic::from(name.as_str())
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Type(name) => write!(f, "{}", name),
            Topic::All => write!(f, "{}", WILDCARD),
        }
    }
}

type Handler<E> = Arc<dyn Fn(&E) -> anyhow::Result<()> + Send + Sync>;

struct HandlerEntry<E> {
    id: u64,
    handler: Handler<E>,
}

impl<E> Clone for HandlerEntry<E> {
    fn clone(&self) -> Self {
        Self { id: self.id, handler: Arc::clone(&self.handler) }
    }
}

struct Handlers<E> {
    typed: HashMap<String, Vec<HandlerEntry<E>>>,
    wildcard: Vec<HandlerEntry<E>>,
}

impl<E> Handlers<E> {
    fn remove(&mut self, topic: &Topic, id: u64) -> bool {
        let list = match topic {
            Topic::All => Some(&mut self.wildcard),
            Topic::Type(name) => self.typed.get_mut(name),
        };
        let Some(list) = list else { return false };
        let before = list.len();
        list.retain(|entry| entry.id != id);
        let removed = list.len() != before;
        if let Topic::Type(name) = topic {
            if self.typed.get(name).is_some_and(|l| l.is_empty()) {
                self.typed.remove(name);
            }
        }
        removed
    }

    fn count(&self) -> usize {
        self.wildcard.len() + self.typed.values().map(Vec::len).sum::<usize>()
    }
}

/// Delivery statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Events published
    pub events_published: u64,
    /// Handler invocations that returned Ok
    pub handler_invocations: u64,
    /// Handler invocations that failed or panicked
    pub handler_failures: u64,
}

/// Handle returned by [`EventBus::on`]; call [`Subscription::unsubscribe`]
/// to stop delivery. Dropping the handle leaves the handler registered.
#[must_use = "dropping a Subscription keeps the handler registered; call unsubscribe() to remove it"]
pub struct Subscription {
    id: u64,
    topic: Topic,
    cancel: Option<Box<dyn FnOnce() -> bool + Send>>,
}

impl Subscription {
    /// Subscription identifier, unique per bus
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Subscribed topic
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Remove the handler; returns false if it was already gone
    pub fn unsubscribe(mut self) -> bool {
        self.cancel.take().map(|cancel| cancel()).unwrap_or(false)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .finish()
    }
}

/// Typed publish/subscribe bus. Clones share the same subscriber set.
pub struct EventBus<E: BusEvent> {
    name: Arc<str>,
    handlers: Arc<Mutex<Handlers<E>>>,
    next_id: Arc<AtomicU64>,
    stats: Arc<Mutex<DeliveryStats>>,
}

impl<E: BusEvent> EventBus<E> {
    /// Create a new bus; `name` only appears in log output
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            handlers: Arc::new(Mutex::new(Handlers {
                typed: HashMap::new(),
                wildcard: Vec::new(),
            })),
            next_id: Arc::new(AtomicU64::new(1)),
            stats: Arc::new(Mutex::new(DeliveryStats::default())),
        }
    }

    /// Bus name
    pub fn name(&self) -> &str {
        &self.name
    }

    fn insert(&self, topic: &Topic, id: u64, handler: Handler<E>) {
        let entry = HandlerEntry { id, handler };
        let mut handlers = self.handlers.lock();
        match topic {
            Topic::All => handlers.wildcard.push(entry),
            Topic::Type(name) => handlers.typed.entry(name.clone()).or_default().push(entry),
        }
    }

    fn canceller(&self, topic: Topic, id: u64) -> Box<dyn FnOnce() -> bool + Send> {
        let weak: Weak<Mutex<Handlers<E>>> = Arc::downgrade(&self.handlers);
        Box::new(move || match weak.upgrade() {
            Some(handlers) => handlers.lock().remove(&topic, id),
            None => false,
        })
    }

    /// Subscribe a handler to a topic (`"*"` for every event)
    pub fn on<T, F>(&self, topic: T, handler: F) -> Subscription
    where
        T: Into<Topic>,
        F: Fn(&E) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let topic = topic.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.insert(&topic, id, Arc::new(handler));
        debug!("[{}] subscription {} added for topic '{}'", self.name, id, topic);

        Subscription {
            id,
            cancel: Some(self.canceller(topic.clone(), id)),
            topic,
        }
    }

    /// Subscribe a handler that runs for the first matching event only
    pub fn once<T, F>(&self, topic: T, handler: F) -> Subscription
    where
        T: Into<Topic>,
        F: Fn(&E) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let topic = topic.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let fired = AtomicBool::new(false);
        let remove_self = Mutex::new(Some(self.canceller(topic.clone(), id)));

        self.insert(&topic, id, Arc::new(move |event: &E| {
            if fired.swap(true, Ordering::SeqCst) {
                return Ok(());
            }
            if let Some(remove) = remove_self.lock().take() {
                remove();
            }
            handler(event)
        }));

        Subscription {
            id,
            cancel: Some(self.canceller(topic.clone(), id)),
            topic,
        }
    }

    /// Publish an event. Returns the number of handlers that completed
    /// successfully.
    pub fn emit(&self, event: &E) -> usize {
        // Snapshot so handlers may subscribe, unsubscribe or publish.
        let targets: Vec<HandlerEntry<E>> = {
            let handlers = self.handlers.lock();
            let mut targets: Vec<HandlerEntry<E>> = handlers
                .typed
                .get(event.event_type())
                .map(|list| list.to_vec())
                .unwrap_or_default();
            targets.extend(handlers.wildcard.iter().cloned());
            targets
        };

        let mut delivered = 0usize;
        let mut failures = 0u64;
        for entry in &targets {
            match catch_unwind(AssertUnwindSafe(|| (entry.handler)(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    failures += 1;
                    warn!("[{}] handler {} failed on '{}': {:#}", self.name, entry.id, event.event_type(), e);
                }
                Err(_) => {
                    failures += 1;
                    error!("[{}] handler {} panicked on '{}'", self.name, entry.id, event.event_type());
                }
            }
        }

        let mut stats = self.stats.lock();
        stats.events_published += 1;
        stats.handler_invocations += delivered as u64;
        stats.handler_failures += failures;

        debug!("[{}] published '{}' to {} handlers ({} failed)",
               self.name, event.event_type(), targets.len(), failures);
        delivered
    }

    /// Number of registered handlers
    pub fn subscriber_count(&self) -> usize {
        self.handlers.lock().count()
    }

    /// Number of handlers that would receive an event of this type
    pub fn listener_count(&self, event_type: &str) -> usize {
        let handlers = self.handlers.lock();
        handlers.typed.get(event_type).map(Vec::len).unwrap_or(0) + handlers.wildcard.len()
    }

    /// Delivery statistics
    pub fn stats(&self) -> DeliveryStats {
        self.stats.lock().clone()
    }

    /// Remove every handler
    pub fn clear(&self) {
        let mut handlers = self.handlers.lock();
        handlers.typed.clear();
        handlers.wildcard.clear();
    }
}

impl<E: BusEvent> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            handlers: Arc::clone(&self.handlers),
            next_id: Arc::clone(&self.next_id),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<E: BusEvent> Default for EventBus<E> {
    fn default() -> Self {
        Self::new("events")
    }
}
