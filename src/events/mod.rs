//! Typed Pub/Sub Event System
//!
//! Decouples event producers (the plugin manager, the host's agent
//! integration) from consumers (plugins, UI layers) through typed buses.
//!
//! # Example Usage
//!
//! ```no_run
//! use gitdock::events::{AgentEvent, EventBus, WILDCARD};
//!
//! let bus = EventBus::<AgentEvent>::new("agents");
//! let subscription = bus.on(AgentEvent::COMPLETED, |event: &AgentEvent| {
//!     println!("agent finished: {}", event.session_id());
//!     Ok(())
//! });
//! let _all = bus.on(WILDCARD, |_event: &AgentEvent| Ok(()));
//!
//! bus.emit(&AgentEvent::completed("session-1"));
//! subscription.unsubscribe();
//! ```

pub mod bus;
pub mod history;
pub mod types;

pub use bus::{BusEvent, DeliveryStats, EventBus, Subscription, Topic, WILDCARD};
pub use history::{EventHistory, StoredEvent, DEFAULT_HISTORY_LIMIT};
pub use types::{AgentEvent, LifecycleEvent};
