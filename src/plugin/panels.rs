//! Open panel tracking.

use std::sync::atomic::{AtomicU64, Ordering};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A panel instance the host is showing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenPanel {
    pub plugin_id: String,
    pub instance_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub opened_at: DateTime<Utc>,
}

/// Open panels in the order they were opened
#[derive(Debug)]
pub struct PanelTracker {
    next_instance: AtomicU64,
    open: Mutex<Vec<OpenPanel>>,
}

impl Default for PanelTracker {
    fn default() -> Self {
        Self {
            next_instance: AtomicU64::new(1),
            open: Mutex::new(Vec::new()),
        }
    }
}

impl PanelTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new instance; instance ids are never reused
    pub fn open(&self, plugin_id: &str, data: Option<Value>) -> OpenPanel {
        let panel = OpenPanel {
            plugin_id: plugin_id.to_string(),
            instance_id: self.next_instance.fetch_add(1, Ordering::Relaxed),
            data,
            opened_at: Utc::now(),
        };
        self.open.lock().push(panel.clone());
        panel
    }

    pub fn close(&self, instance_id: u64) -> bool {
        let mut open = self.open.lock();
        let before = open.len();
        open.retain(|panel| panel.instance_id != instance_id);
        open.len() != before
    }

    /// Close every instance of one plugin; returns how many were closed
    pub fn close_for(&self, plugin_id: &str) -> usize {
        let mut open = self.open.lock();
        let before = open.len();
        open.retain(|panel| panel.plugin_id != plugin_id);
        before - open.len()
    }

    pub fn close_all(&self) -> usize {
        let mut open = self.open.lock();
        let count = open.len();
        open.clear();
        count
    }

    pub fn list(&self) -> Vec<OpenPanel> {
        self.open.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.open.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.lock().is_empty()
    }
}
