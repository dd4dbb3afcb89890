//! Host Accessors
//!
//! What the runtime needs from its environment: repository-domain reads and
//! their refresh triggers, optional host services, and a logger sink. These
//! are plain injections; the runtime is transport-agnostic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::plugin::error::{PluginError, PluginResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Branch {
    pub name: String,
    pub is_head: bool,
    pub is_remote: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    pub id: String,
    pub summary: String,
    pub author: String,
    pub email: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub head_branch: String,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Worktree {
    pub name: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub is_main: bool,
}

/// Kind of change to a path in the working tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed,
    Untracked,
    Conflicted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChange {
    pub path: String,
    pub kind: ChangeKind,
    pub staged: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkingStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub changes: Vec<FileChange>,
}

impl WorkingStatus {
    pub fn is_clean(&self) -> bool {
        self.changes.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Host-side accessors injected into every plugin context.
///
/// Getters read the host's current store; `refresh_*` re-fetch, update the
/// store and return the refreshed collection. Optional services default to
/// `Unsupported` so a host only implements what it can offer.
#[async_trait]
pub trait HostAccessors: Send + Sync {
    fn branches(&self) -> Vec<Branch>;
    fn commits(&self) -> Vec<Commit>;
    fn pull_requests(&self) -> Vec<PullRequest>;
    fn worktrees(&self) -> Vec<Worktree>;
    fn working_status(&self) -> Option<WorkingStatus>;

    async fn refresh_branches(&self) -> PluginResult<Vec<Branch>>;
    async fn refresh_commits(&self) -> PluginResult<Vec<Commit>>;
    async fn refresh_pull_requests(&self) -> PluginResult<Vec<PullRequest>>;
    async fn refresh_worktrees(&self) -> PluginResult<Vec<Worktree>>;
    async fn refresh_working_status(&self) -> PluginResult<Option<WorkingStatus>>;

    async fn checkout_branch(&self, _name: &str) -> PluginResult<()> {
        Err(PluginError::unsupported("checkout_branch"))
    }

    async fn read_file(&self, _path: &str) -> PluginResult<String> {
        Err(PluginError::unsupported("read_file"))
    }

    async fn write_file(&self, _path: &str, _contents: &str) -> PluginResult<()> {
        Err(PluginError::unsupported("write_file"))
    }

    async fn run_command(&self, _program: &str, _args: &[String]) -> PluginResult<CommandOutput> {
        Err(PluginError::unsupported("run_command"))
    }

    async fn fetch_url(&self, _url: &str) -> PluginResult<String> {
        Err(PluginError::unsupported("fetch_url"))
    }

    async fn write_clipboard(&self, _text: &str) -> PluginResult<()> {
        Err(PluginError::unsupported("write_clipboard"))
    }

    async fn notify(&self, _title: &str, _body: &str) -> PluginResult<()> {
        Err(PluginError::unsupported("notify"))
    }
}

/// Host without a repository; reads are empty and refreshes fail
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableHost;

#[async_trait]
impl HostAccessors for UnavailableHost {
    fn branches(&self) -> Vec<Branch> {
        Vec::new()
    }

    fn commits(&self) -> Vec<Commit> {
        Vec::new()
    }

    fn pull_requests(&self) -> Vec<PullRequest> {
        Vec::new()
    }

    fn worktrees(&self) -> Vec<Worktree> {
        Vec::new()
    }

    fn working_status(&self) -> Option<WorkingStatus> {
        None
    }

    async fn refresh_branches(&self) -> PluginResult<Vec<Branch>> {
        Err(PluginError::host("no repository is open"))
    }

    async fn refresh_commits(&self) -> PluginResult<Vec<Commit>> {
        Err(PluginError::host("no repository is open"))
    }

    async fn refresh_pull_requests(&self) -> PluginResult<Vec<PullRequest>> {
        Err(PluginError::host("no repository is open"))
    }

    async fn refresh_worktrees(&self) -> PluginResult<Vec<Worktree>> {
        Err(PluginError::host("no repository is open"))
    }

    async fn refresh_working_status(&self) -> PluginResult<Option<WorkingStatus>> {
        Err(PluginError::host("no repository is open"))
    }
}

/// `log` target prefix for records written by plugins
pub const PLUGIN_LOG_TARGET_PREFIX: &str = "plugin::";

/// Destination of plugin log lines
pub trait LogSink: Send + Sync {
    fn log(&self, plugin_id: &str, level: log::Level, message: &str);
}

/// Forwards plugin log lines to the `log` facade under `plugin::<id>`
#[derive(Debug, Default, Clone, Copy)]
pub struct LogCrateSink;

impl LogSink for LogCrateSink {
    fn log(&self, plugin_id: &str, level: log::Level, message: &str) {
        let target = format!("{}{}", PLUGIN_LOG_TARGET_PREFIX, plugin_id);
        log::log!(target: target.as_str(), level, "{}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_optional_services_default_to_unsupported() {
        let host = UnavailableHost;
        assert_eq!(host.read_file("README.md").await, Err(PluginError::unsupported("read_file")));
        assert_eq!(host.notify("t", "b").await, Err(PluginError::unsupported("notify")));
        assert!(host.refresh_branches().await.is_err());
        assert!(host.branches().is_empty());
    }

    #[test]
    fn test_working_status_wire_format() {
        let status = WorkingStatus {
            branch: Some("main".to_string()),
            changes: vec![FileChange { path: "src/lib.rs".to_string(), kind: ChangeKind::Modified, staged: false }],
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["changes"][0]["kind"], "modified");
        assert!(!status.is_clean());
    }
}
