//! Bounded, persisted event history.
//!
//! Keeps the most recent events of a consumer in a FIFO ring buffer. New
//! entries are unread; once the bound is exceeded the oldest entries are
//! dropped silently.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use chrono::{DateTime, Utc};
use log::warn;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::events::bus::{BusEvent, EventBus, Subscription, WILDCARD};
use crate::plugin::error::PluginResult;
use crate::plugin::storage::StorageBackend;

/// Default number of events kept per history
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

const EVENTS_KEY: &str = "events";

/// Event stored in a history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent<E> {
    pub id: String,
    pub event: E,
    pub read: bool,
    pub received_at: DateTime<Utc>,
}

/// Ring buffer of events persisted in one storage namespace
pub struct EventHistory<E> {
    storage: Arc<dyn StorageBackend>,
    namespace: String,
    limit: usize,
    entries: Mutex<VecDeque<StoredEvent<E>>>,
}

impl<E> EventHistory<E>
where
    E: BusEvent + Serialize + DeserializeOwned,
{
    /// Open a history, loading previously persisted entries
    pub fn open(storage: Arc<dyn StorageBackend>, namespace: &str, limit: usize) -> PluginResult<Self> {
        let namespace = format!("events/{}", namespace);
        let mut entries: VecDeque<StoredEvent<E>> = match storage.get(&namespace, EVENTS_KEY)? {
            Some(value) => serde_json::from_value(value).unwrap_or_else(|e| {
                warn!("Discarding unreadable event history '{}': {}", namespace, e);
                VecDeque::new()
            }),
            None => VecDeque::new(),
        };
        let limit = limit.max(1);
        while entries.len() > limit {
            entries.pop_front();
        }

        Ok(Self {
            storage,
            namespace,
            limit,
            entries: Mutex::new(entries),
        })
    }

    /// Maximum number of entries kept
    pub fn limit(&self) -> usize {
        self.limit
    }

    fn persist(&self, entries: &VecDeque<StoredEvent<E>>) -> PluginResult<()> {
        let value = serde_json::to_value(entries)?;
        self.storage.set(&self.namespace, EVENTS_KEY, value)
    }

    /// Append an event, evicting the oldest entries beyond the limit.
    /// Returns the id of the stored entry.
    pub fn push(&self, event: E) -> PluginResult<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let mut entries = self.entries.lock();
        let mut updated = entries.clone();
        updated.push_back(StoredEvent {
            id: id.clone(),
            event,
            read: false,
            received_at: Utc::now(),
        });
        while updated.len() > self.limit {
            updated.pop_front();
        }
        self.persist(&updated)?;
        *entries = updated;
        Ok(id)
    }

    /// Entries, oldest first
    pub fn list(&self) -> Vec<StoredEvent<E>> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the history is empty
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Number of unread entries
    pub fn unread_count(&self) -> usize {
        self.entries.lock().iter().filter(|entry| !entry.read).count()
    }

    /// Mark one entry read; returns false when the id is unknown
    pub fn mark_read(&self, id: &str) -> PluginResult<bool> {
        let mut entries = self.entries.lock();
        let Some(index) = entries.iter().position(|entry| entry.id == id) else {
            return Ok(false);
        };
        if !entries[index].read {
            let mut updated = entries.clone();
            updated[index].read = true;
            self.persist(&updated)?;
            *entries = updated;
        }
        Ok(true)
    }

    /// Mark every entry read
    pub fn mark_all_read(&self) -> PluginResult<()> {
        let mut entries = self.entries.lock();
        let mut updated = entries.clone();
        updated.iter_mut().for_each(|entry| entry.read = true);
        self.persist(&updated)?;
        *entries = updated;
        Ok(())
    }

    /// Drop every entry
    pub fn clear(&self) -> PluginResult<()> {
        let mut entries = self.entries.lock();
        self.storage.remove(&self.namespace, EVENTS_KEY)?;
        entries.clear();
        Ok(())
    }

    /// Record every event published on `bus` until the returned
    /// subscription is cancelled.
    pub fn record_from(self: &Arc<Self>, bus: &EventBus<E>) -> Subscription {
        let weak: Weak<Self> = Arc::downgrade(self);
        bus.on(WILDCARD, move |event: &E| {
            if let Some(history) = weak.upgrade() {
                history.push(event.clone())?;
            }
            Ok(())
        })
    }
}
