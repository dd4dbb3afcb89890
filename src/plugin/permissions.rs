//! Plugin Permissions
//!
//! The closed capability enumeration, the persisted per-plugin grant sets,
//! and the approval flow used when a plugin asks for capabilities it does
//! not hold yet.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Notify};

use crate::plugin::error::{PluginError, PluginResult};
use crate::plugin::storage::StorageBackend;

const PERMISSIONS_NAMESPACE: &str = "permissions";

/// Default wait for a user decision before a request counts as denied
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Privilege a plugin must hold before its context performs an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    ReadRepositoryData,
    WriteRepositoryData,
    ReadFiles,
    WriteFiles,
    Network,
    Shell,
    Clipboard,
    Notifications,
}

/// Advisory risk tier shown by approval UIs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
        }
    }
}

impl Capability {
    /// Every known capability
    pub const ALL: [Capability; 8] = [
        Capability::ReadRepositoryData,
        Capability::WriteRepositoryData,
        Capability::ReadFiles,
        Capability::WriteFiles,
        Capability::Network,
        Capability::Shell,
        Capability::Clipboard,
        Capability::Notifications,
    ];

    /// Manifest tag
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::ReadRepositoryData => "read-repository-data",
            Capability::WriteRepositoryData => "write-repository-data",
            Capability::ReadFiles => "read-files",
            Capability::WriteFiles => "write-files",
            Capability::Network => "network",
            Capability::Shell => "shell",
            Capability::Clipboard => "clipboard",
            Capability::Notifications => "notifications",
        }
    }

    /// Static risk tier
    pub fn risk(&self) -> RiskLevel {
        match self {
            Capability::ReadRepositoryData |
            Capability::Clipboard |
            Capability::Notifications => RiskLevel::Low,
            Capability::WriteRepositoryData |
            Capability::ReadFiles |
            Capability::Network => RiskLevel::Medium,
            Capability::WriteFiles |
            Capability::Shell => RiskLevel::High,
        }
    }

    /// Human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            Capability::ReadRepositoryData => "Read branches, commits, pull requests, worktrees and working status",
            Capability::WriteRepositoryData => "Modify repository state such as switching branches",
            Capability::ReadFiles => "Read files inside the repository",
            Capability::WriteFiles => "Create and overwrite files inside the repository",
            Capability::Network => "Make network requests",
            Capability::Shell => "Run shell commands",
            Capability::Clipboard => "Write to the clipboard",
            Capability::Notifications => "Show desktop notifications",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Capability::ALL
            .iter()
            .copied()
            .find(|capability| capability.as_str() == s)
            .ok_or_else(|| format!("Unknown capability: {}", s))
    }
}

/// Highest risk tier among a set of capabilities
pub fn highest_risk(capabilities: &[Capability]) -> Option<RiskLevel> {
    capabilities.iter().map(Capability::risk).max()
}

/// Persisted per-plugin grant sets
pub struct PermissionStore {
    storage: Arc<dyn StorageBackend>,
    granted: RwLock<HashMap<String, BTreeSet<Capability>>>,
}

impl PermissionStore {
    /// Load grant sets from storage
    pub fn load(storage: Arc<dyn StorageBackend>) -> PluginResult<Self> {
        let mut granted = HashMap::new();
        for (plugin_id, value) in storage.entries(PERMISSIONS_NAMESPACE)? {
            match serde_json::from_value::<BTreeSet<Capability>>(value) {
                Ok(set) => {
                    granted.insert(plugin_id, set);
                }
                Err(e) => warn!("Ignoring unreadable grants for plugin '{}': {}", plugin_id, e),
            }
        }
        debug!("Loaded permission grants for {} plugins", granted.len());

        Ok(Self {
            storage,
            granted: RwLock::new(granted),
        })
    }

    fn persist(&self, plugin_id: &str, set: &BTreeSet<Capability>) -> PluginResult<()> {
        if set.is_empty() {
            self.storage.remove(PERMISSIONS_NAMESPACE, plugin_id)
        } else {
            self.storage.set(PERMISSIONS_NAMESPACE, plugin_id, serde_json::to_value(set)?)
        }
    }

    /// Currently granted capabilities, sorted
    pub fn get_permissions(&self, plugin_id: &str) -> Vec<Capability> {
        self.granted
            .read()
            .get(plugin_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Whether a capability is granted
    pub fn has_permission(&self, plugin_id: &str, capability: Capability) -> bool {
        self.granted
            .read()
            .get(plugin_id)
            .is_some_and(|set| set.contains(&capability))
    }

    /// Add capabilities to a plugin's grant set; already granted ones are ignored
    pub fn grant_permissions(&self, plugin_id: &str, permissions: &[Capability]) -> PluginResult<()> {
        let mut granted = self.granted.write();
        let mut set = granted.get(plugin_id).cloned().unwrap_or_default();
        let before = set.len();
        set.extend(permissions.iter().copied());
        if set.len() != before {
            self.commit(&mut granted, plugin_id, set)?;
            info!("Granted {:?} to plugin '{}'", permissions, plugin_id);
        }
        Ok(())
    }

    /// Remove one capability
    pub fn revoke_permission(&self, plugin_id: &str, permission: Capability) -> PluginResult<()> {
        let mut granted = self.granted.write();
        let Some(mut set) = granted.get(plugin_id).cloned() else {
            return Ok(());
        };
        if set.remove(&permission) {
            self.commit(&mut granted, plugin_id, set)?;
            info!("Revoked '{}' from plugin '{}'", permission, plugin_id);
        }
        Ok(())
    }

    /// Remove every capability
    pub fn revoke_permissions(&self, plugin_id: &str) -> PluginResult<()> {
        let mut granted = self.granted.write();
        if granted.contains_key(plugin_id) {
            self.storage.remove(PERMISSIONS_NAMESPACE, plugin_id)?;
            granted.remove(plugin_id);
            info!("Revoked all permissions from plugin '{}'", plugin_id);
        }
        Ok(())
    }

    /// Drop every grant not in `declared`. Returns the capabilities removed.
    pub fn retain(&self, plugin_id: &str, declared: &[Capability]) -> PluginResult<Vec<Capability>> {
        let mut granted = self.granted.write();
        let Some(current) = granted.get(plugin_id) else {
            return Ok(Vec::new());
        };
        let (kept, dropped): (BTreeSet<Capability>, BTreeSet<Capability>) =
            current.iter().partition(|capability| declared.contains(capability));
        if dropped.is_empty() {
            return Ok(Vec::new());
        }
        self.commit(&mut granted, plugin_id, kept)?;
        info!("Revoked undeclared {:?} from plugin '{}'", dropped, plugin_id);
        Ok(dropped.into_iter().collect())
    }

    /// Persist a new grant set, then make it visible in memory
    fn commit(
        &self,
        granted: &mut HashMap<String, BTreeSet<Capability>>,
        plugin_id: &str,
        set: BTreeSet<Capability>,
    ) -> PluginResult<()> {
        self.persist(plugin_id, &set)?;
        if set.is_empty() {
            granted.remove(plugin_id);
        } else {
            granted.insert(plugin_id.to_string(), set);
        }
        Ok(())
    }

    /// Declared capabilities that are not granted
    pub fn missing_permissions(&self, plugin_id: &str, declared: &[Capability]) -> Vec<Capability> {
        let granted = self.granted.read();
        let set = granted.get(plugin_id);
        declared
            .iter()
            .copied()
            .filter(|capability| !set.is_some_and(|s| s.contains(capability)))
            .collect()
    }
}

/// Pending approval shown to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionRequest {
    pub request_id: u64,
    pub plugin_id: String,
    pub plugin_name: String,
    pub requested_permissions: Vec<Capability>,
    pub created_at: DateTime<Utc>,
}

impl PermissionRequest {
    /// Highest risk tier among requested capabilities
    pub fn highest_risk(&self) -> Option<RiskLevel> {
        highest_risk(&self.requested_permissions)
    }
}

/// Outcome of a permission request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionDecision {
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub granted_permissions: Option<Vec<Capability>>,
}

impl PermissionDecision {
    /// Approve everything requested
    pub fn approve_all() -> Self {
        Self { approved: true, granted_permissions: None }
    }

    /// Approve a subset of the request
    pub fn approve(permissions: Vec<Capability>) -> Self {
        Self { approved: true, granted_permissions: Some(permissions) }
    }

    /// Deny the request
    pub fn deny() -> Self {
        Self { approved: false, granted_permissions: None }
    }
}

struct PendingRequest {
    request: PermissionRequest,
    responder: oneshot::Sender<PermissionDecision>,
}

/// Approval channel between install/activation flows and the UI.
///
/// Requests queue in FIFO order; the UI answers the oldest one first.
/// Every request resolves exactly once: by an answer, by cancellation, or
/// by timing out, where the last two count as denial.
pub struct PermissionRequestFlow {
    store: Arc<PermissionStore>,
    queue: Mutex<VecDeque<PendingRequest>>,
    changed: Notify,
    next_id: AtomicU64,
    timeout: Duration,
}

impl PermissionRequestFlow {
    pub fn new(store: Arc<PermissionStore>) -> Self {
        Self::with_timeout(store, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(store: Arc<PermissionStore>, timeout: Duration) -> Self {
        Self {
            store,
            queue: Mutex::new(VecDeque::new()),
            changed: Notify::new(),
            next_id: AtomicU64::new(1),
            timeout,
        }
    }

    /// Grant store the flow writes approvals into
    pub fn store(&self) -> &Arc<PermissionStore> {
        &self.store
    }

    /// Ask the user to approve `permissions` for a plugin. Resolves with the
    /// capabilities actually granted. Capabilities already held never
    /// trigger a prompt.
    pub async fn request_permissions(
        &self,
        plugin_id: &str,
        plugin_name: &str,
        permissions: &[Capability],
    ) -> PermissionDecision {
        let missing = self.store.missing_permissions(plugin_id, permissions);
        if missing.is_empty() {
            return PermissionDecision::approve(self.store.get_permissions(plugin_id));
        }

        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (responder, receiver) = oneshot::channel();
        self.queue.lock().push_back(PendingRequest {
            request: PermissionRequest {
                request_id,
                plugin_id: plugin_id.to_string(),
                plugin_name: plugin_name.to_string(),
                requested_permissions: missing,
                created_at: Utc::now(),
            },
            responder,
        });
        self.changed.notify_waiters();
        debug!("Queued permission request {} for plugin '{}'", request_id, plugin_id);
        let _withdraw = QueuedRequest { flow: self, request_id };

        match tokio::time::timeout(self.timeout, receiver).await {
            Ok(Ok(decision)) => decision,
            Ok(Err(_)) => PermissionDecision::deny(),
            Err(_) => {
                warn!("Permission request {} for plugin '{}' timed out after {:?}; treating as denied",
                      request_id, plugin_id, self.timeout);
                self.take(request_id);
                self.changed.notify_waiters();
                PermissionDecision::deny()
            }
        }
    }

    fn take(&self, request_id: u64) -> Option<PendingRequest> {
        let mut queue = self.queue.lock();
        let index = queue.iter().position(|pending| pending.request.request_id == request_id)?;
        queue.remove(index)
    }

    /// Request the UI should show now
    pub fn current(&self) -> Option<PermissionRequest> {
        self.queue.lock().front().map(|pending| pending.request.clone())
    }

    /// Number of unanswered requests
    pub fn pending_count(&self) -> usize {
        self.queue.lock().len()
    }

    /// Wait until a request is pending and return the oldest one
    pub async fn next_request(&self) -> PermissionRequest {
        loop {
            let notified = self.changed.notified();
            if let Some(request) = self.current() {
                return request;
            }
            notified.await;
        }
    }

    /// Answer a pending request. Approved capabilities are limited to what
    /// was requested and written to the grant store before the requester
    /// resumes.
    pub fn respond(&self, request_id: u64, decision: PermissionDecision) -> PluginResult<()> {
        let pending = self.take(request_id).ok_or_else(|| {
            PluginError::invalid_state(format!("No pending permission request with id {}", request_id))
        })?;
        let request = &pending.request;
        if pending.responder.is_closed() {
            debug!("Requester of permission request {} is gone; nothing granted", request_id);
            self.changed.notify_waiters();
            return Ok(());
        }

        let resolved = if decision.approved {
            let granted: Vec<Capability> = match decision.granted_permissions {
                Some(chosen) => request
                    .requested_permissions
                    .iter()
                    .copied()
                    .filter(|capability| chosen.contains(capability))
                    .collect(),
                None => request.requested_permissions.clone(),
            };
            self.store.grant_permissions(&request.plugin_id, &granted)?;
            PermissionDecision::approve(self.store.get_permissions(&request.plugin_id))
        } else {
            info!("User denied permissions for plugin '{}'", request.plugin_id);
            PermissionDecision::deny()
        };

        let _ = pending.responder.send(resolved);
        self.changed.notify_waiters();
        Ok(())
    }

    /// Withdraw a pending request; the requester sees a denial
    pub fn cancel(&self, request_id: u64) -> bool {
        match self.take(request_id) {
            Some(pending) => {
                let _ = pending.responder.send(PermissionDecision::deny());
                self.changed.notify_waiters();
                true
            }
            None => false,
        }
    }
}

/// Removes a request from the queue when its requester stops waiting
struct QueuedRequest<'a> {
    flow: &'a PermissionRequestFlow,
    request_id: u64,
}

impl Drop for QueuedRequest<'_> {
    fn drop(&mut self) {
        if self.flow.take(self.request_id).is_some() {
            debug!("Permission request {} withdrawn by its requester", self.request_id);
            self.flow.changed.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use crate::plugin::storage::MemoryStorage;
    use crate::plugin::tests::mocks::ReadOnlyStorage;

    fn store() -> Arc<PermissionStore> {
        Arc::new(PermissionStore::load(Arc::new(MemoryStorage::new())).unwrap())
    }

    #[test]
    fn test_capability_tags_round_trip() {
        for capability in Capability::ALL {
            assert_eq!(capability.as_str().parse::<Capability>().unwrap(), capability);
            let json = serde_json::to_value(capability).unwrap();
            assert_eq!(json, serde_json::Value::String(capability.as_str().to_string()));
        }
        assert!("telepathy".parse::<Capability>().is_err());
    }

    #[test]
    fn test_risk_levels() {
        assert_eq!(Capability::ReadRepositoryData.risk(), RiskLevel::Low);
        assert_eq!(Capability::Shell.risk(), RiskLevel::High);
        assert_eq!(highest_risk(&[Capability::Clipboard, Capability::Network]), Some(RiskLevel::Medium));
        assert_eq!(highest_risk(&[]), None);
    }

    #[test]
    fn test_grant_revoke_round_trip() {
        let store = store();
        store.grant_permissions("p", &[Capability::Shell]).unwrap();
        assert!(store.has_permission("p", Capability::Shell));

        store.revoke_permission("p", Capability::Shell).unwrap();
        assert!(!store.get_permissions("p").contains(&Capability::Shell));

        store.grant_permissions("p", &[Capability::Shell]).unwrap();
        assert_eq!(store.get_permissions("p"), vec![Capability::Shell]);
    }

    #[test]
    fn test_grant_is_idempotent() {
        let store = store();
        store.grant_permissions("p", &[Capability::Network, Capability::Network]).unwrap();
        store.grant_permissions("p", &[Capability::Network]).unwrap();
        assert_eq!(store.get_permissions("p"), vec![Capability::Network]);
    }

    #[test]
    fn test_revoke_all_and_persistence() {
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
        {
            let store = PermissionStore::load(Arc::clone(&storage)).unwrap();
            store.grant_permissions("a", &[Capability::ReadFiles, Capability::WriteFiles]).unwrap();
            store.grant_permissions("b", &[Capability::Clipboard]).unwrap();
            store.revoke_permissions("b").unwrap();
        }

        let reloaded = PermissionStore::load(storage).unwrap();
        assert_eq!(reloaded.get_permissions("a"), vec![Capability::ReadFiles, Capability::WriteFiles]);
        assert!(reloaded.get_permissions("b").is_empty());
    }

    #[test]
    fn test_missing_permissions() {
        let store = store();
        store.grant_permissions("p", &[Capability::ReadRepositoryData]).unwrap();
        let missing = store.missing_permissions("p", &[Capability::ReadRepositoryData, Capability::Shell]);
        assert_eq!(missing, vec![Capability::Shell]);
    }

    #[tokio::test]
    async fn test_partial_approval_grants_subset() {
        let flow = Arc::new(PermissionRequestFlow::new(store()));

        let ui = Arc::clone(&flow);
        let answer = tokio::spawn(async move {
            let request = ui.next_request().await;
            assert_eq!(request.plugin_name, "Branch Badges");
            assert_eq!(request.highest_risk(), Some(RiskLevel::High));
            ui.respond(request.request_id, PermissionDecision::approve(vec![
                Capability::ReadRepositoryData,
                Capability::Network, // not requested, must be ignored
            ])).unwrap();
        });

        let decision = flow
            .request_permissions("p", "Branch Badges", &[Capability::ReadRepositoryData, Capability::Shell])
            .await;
        answer.await.unwrap();

        assert!(decision.approved);
        assert_eq!(decision.granted_permissions, Some(vec![Capability::ReadRepositoryData]));
        assert!(flow.store().has_permission("p", Capability::ReadRepositoryData));
        assert!(!flow.store().has_permission("p", Capability::Shell));
        assert!(!flow.store().has_permission("p", Capability::Network));
        assert_eq!(flow.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_already_granted_does_not_prompt() {
        let store = store();
        store.grant_permissions("p", &[Capability::Clipboard]).unwrap();
        let flow = PermissionRequestFlow::new(store);

        let decision = flow.request_permissions("p", "P", &[Capability::Clipboard]).await;
        assert!(decision.approved);
        assert_eq!(flow.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_request_times_out_as_denial() {
        let flow = PermissionRequestFlow::with_timeout(store(), Duration::from_secs(5));

        let decision = flow.request_permissions("p", "P", &[Capability::Shell]).await;

        assert_eq!(decision, PermissionDecision::deny());
        assert_eq!(flow.pending_count(), 0);
        assert!(!flow.store().has_permission("p", Capability::Shell));
    }

    #[tokio::test]
    async fn test_requests_are_answered_in_fifo_order() {
        let flow = Arc::new(PermissionRequestFlow::new(store()));

        let first = {
            let flow = Arc::clone(&flow);
            tokio::spawn(async move { flow.request_permissions("a", "A", &[Capability::Network]).await })
        };
        let second = {
            let flow = Arc::clone(&flow);
            tokio::spawn(async move { flow.request_permissions("b", "B", &[Capability::Network]).await })
        };

        let request = flow.next_request().await;
        assert_eq!(request.plugin_id, "a");
        flow.respond(request.request_id, PermissionDecision::deny()).unwrap();

        let request = flow.next_request().await;
        assert_eq!(request.plugin_id, "b");
        flow.respond(request.request_id, PermissionDecision::approve_all()).unwrap();

        assert!(!first.await.unwrap().approved);
        assert!(second.await.unwrap().approved);
        assert!(flow.respond(request.request_id, PermissionDecision::deny()).is_err());
    }

    #[tokio::test]
    async fn test_cancel_resolves_as_denial() {
        let flow = Arc::new(PermissionRequestFlow::new(store()));
        let waiter = {
            let flow = Arc::clone(&flow);
            tokio::spawn(async move { flow.request_permissions("a", "A", &[Capability::Shell]).await })
        };

        let request = flow.next_request().await;
        assert!(flow.cancel(request.request_id));
        assert!(!flow.cancel(request.request_id));
        assert!(!waiter.await.unwrap().approved);
    }

    #[tokio::test]
    async fn test_abandoned_request_leaves_the_queue() {
        let flow = Arc::new(PermissionRequestFlow::new(store()));
        let requester = {
            let flow = Arc::clone(&flow);
            tokio::spawn(async move { flow.request_permissions("p", "P", &[Capability::Shell]).await })
        };

        let request = flow.next_request().await;
        requester.abort();
        assert!(requester.await.unwrap_err().is_cancelled());

        assert_eq!(flow.pending_count(), 0);
        assert!(flow.current().is_none());
        assert!(flow.respond(request.request_id, PermissionDecision::approve_all()).is_err());
        assert!(!flow.store().has_permission("p", Capability::Shell));
    }

    #[test]
    fn test_retain_drops_undeclared_grants() {
        let storage = Arc::new(MemoryStorage::new());
        let store = PermissionStore::load(storage.clone()).unwrap();
        store.grant_permissions("p", &[Capability::ReadRepositoryData, Capability::Shell]).unwrap();

        let dropped = store.retain("p", &[Capability::ReadRepositoryData, Capability::Network]).unwrap();
        assert_eq!(dropped, vec![Capability::Shell]);
        assert_eq!(store.get_permissions("p"), vec![Capability::ReadRepositoryData]);
        assert!(store.retain("p", &[Capability::ReadRepositoryData]).unwrap().is_empty());

        let reloaded = PermissionStore::load(storage).unwrap();
        assert_eq!(reloaded.get_permissions("p"), vec![Capability::ReadRepositoryData]);

        assert_eq!(store.retain("p", &[]).unwrap(), vec![Capability::ReadRepositoryData]);
        assert!(store.get_permissions("p").is_empty());
    }

    #[test]
    fn test_failed_write_leaves_grants_unchanged() {
        let inner = Arc::new(MemoryStorage::new());
        inner.set(PERMISSIONS_NAMESPACE, "p", json!(["clipboard"])).unwrap();
        let store = PermissionStore::load(Arc::new(ReadOnlyStorage(inner))).unwrap();
        assert_eq!(store.get_permissions("p"), vec![Capability::Clipboard]);

        assert!(store.grant_permissions("p", &[Capability::Shell]).is_err());
        assert!(store.revoke_permission("p", Capability::Clipboard).is_err());
        assert!(store.retain("p", &[]).is_err());
        assert!(store.revoke_permissions("p").is_err());

        assert_eq!(store.get_permissions("p"), vec![Capability::Clipboard]);
        assert!(!store.has_permission("p", Capability::Shell));
    }
}
