//! Git Repository Host
//!
//! [`HostAccessors`] over a local repository. Reads are served from a
//! snapshot taken on open and replaced by the `refresh_*` calls; git2
//! work runs on the blocking pool since `Repository` is not `Sync`.

use std::path::{Component, Path, PathBuf};
use async_trait::async_trait;
use chrono::DateTime;
use git2::{BranchType, ErrorCode, Repository, Status, StatusOptions};
use log::{debug, info};
use parking_lot::RwLock;

use crate::plugin::error::{PluginError, PluginResult};
use crate::plugin::host::{
    Branch, ChangeKind, CommandOutput, Commit, FileChange, HostAccessors, PullRequest, Worktree, WorkingStatus,
};

/// Commits kept in the snapshot
pub const DEFAULT_COMMIT_LIMIT: usize = 200;

#[derive(Debug, Clone, Default)]
struct Snapshot {
    branches: Vec<Branch>,
    commits: Vec<Commit>,
    worktrees: Vec<Worktree>,
    status: Option<WorkingStatus>,
}

pub struct GitRepositoryHost {
    workdir: PathBuf,
    commit_limit: usize,
    snapshot: RwLock<Snapshot>,
    http: reqwest::Client,
}

impl GitRepositoryHost {
    /// Discover the repository containing `path` and take an initial snapshot
    pub fn open<P: AsRef<Path>>(path: P) -> PluginResult<Self> {
        Self::with_commit_limit(path, DEFAULT_COMMIT_LIMIT)
    }

    pub fn with_commit_limit<P: AsRef<Path>>(path: P, commit_limit: usize) -> PluginResult<Self> {
        let repo = Repository::discover(path.as_ref())?;
        let workdir = repo
            .workdir()
            .ok_or_else(|| PluginError::host("bare repositories are not supported"))?
            .to_path_buf();

        let snapshot = Snapshot {
            branches: read_branches(&repo)?,
            commits: read_commits(&repo, commit_limit)?,
            worktrees: read_worktrees(&repo, &workdir)?,
            status: Some(read_status(&repo)?),
        };
        info!("Opened repository {} ({} branches)", workdir.display(), snapshot.branches.len());

        Ok(Self {
            workdir,
            commit_limit,
            snapshot: RwLock::new(snapshot),
            http: reqwest::Client::new(),
        })
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    async fn with_repo<T, F>(&self, read: F) -> PluginResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Repository, &Path) -> PluginResult<T> + Send + 'static,
    {
        let workdir = self.workdir.clone();
        tokio::task::spawn_blocking(move || {
            let repo = Repository::open(&workdir)?;
            read(&repo, workdir.as_path())
        })
        .await?
    }

    /// Resolve a plugin-supplied path inside the working directory
    fn resolve(&self, relative: &str) -> PluginResult<PathBuf> {
        let path = Path::new(relative);
        let contained = path
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));
        if relative.is_empty() || !contained {
            return Err(PluginError::host(format!("path '{}' escapes the repository", relative)));
        }
        Ok(self.workdir.join(path))
    }
}

#[async_trait]
impl HostAccessors for GitRepositoryHost {
    fn branches(&self) -> Vec<Branch> {
        self.snapshot.read().branches.clone()
    }

    fn commits(&self) -> Vec<Commit> {
        self.snapshot.read().commits.clone()
    }

    fn pull_requests(&self) -> Vec<PullRequest> {
        Vec::new()
    }

    fn worktrees(&self) -> Vec<Worktree> {
        self.snapshot.read().worktrees.clone()
    }

    fn working_status(&self) -> Option<WorkingStatus> {
        self.snapshot.read().status.clone()
    }

    async fn refresh_branches(&self) -> PluginResult<Vec<Branch>> {
        let branches = self.with_repo(|repo, _| read_branches(repo)).await?;
        self.snapshot.write().branches = branches.clone();
        Ok(branches)
    }

    async fn refresh_commits(&self) -> PluginResult<Vec<Commit>> {
        let limit = self.commit_limit;
        let commits = self.with_repo(move |repo, _| read_commits(repo, limit)).await?;
        self.snapshot.write().commits = commits.clone();
        Ok(commits)
    }

    async fn refresh_pull_requests(&self) -> PluginResult<Vec<PullRequest>> {
        Ok(Vec::new())
    }

    async fn refresh_worktrees(&self) -> PluginResult<Vec<Worktree>> {
        let worktrees = self.with_repo(read_worktrees).await?;
        self.snapshot.write().worktrees = worktrees.clone();
        Ok(worktrees)
    }

    async fn refresh_working_status(&self) -> PluginResult<Option<WorkingStatus>> {
        let status = self.with_repo(|repo, _| read_status(repo)).await?;
        self.snapshot.write().status = Some(status.clone());
        Ok(Some(status))
    }

    async fn checkout_branch(&self, name: &str) -> PluginResult<()> {
        let name = name.to_string();
        self.with_repo(move |repo, _| {
            let branch = repo.find_branch(&name, BranchType::Local)?;
            let reference = branch.into_reference();
            let tree = reference.peel_to_tree()?;
            repo.checkout_tree(tree.as_object(), Some(git2::build::CheckoutBuilder::new().safe()))?;
            let refname = reference
                .name()
                .ok_or_else(|| PluginError::host(format!("branch '{}' has a non-UTF-8 name", name)))?;
            repo.set_head(refname)?;
            debug!("Checked out {}", refname);
            Ok(())
        })
        .await?;

        self.refresh_branches().await?;
        self.refresh_working_status().await?;
        Ok(())
    }

    async fn read_file(&self, path: &str) -> PluginResult<String> {
        let full = self.resolve(path)?;
        tokio::fs::read_to_string(&full)
            .await
            .map_err(|e| PluginError::host(format!("Failed to read {}: {}", path, e)))
    }

    async fn write_file(&self, path: &str, contents: &str) -> PluginResult<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PluginError::host(format!("Failed to create {}: {}", parent.display(), e)))?;
        }
        tokio::fs::write(&full, contents)
            .await
            .map_err(|e| PluginError::host(format!("Failed to write {}: {}", path, e)))
    }

    async fn run_command(&self, program: &str, args: &[String]) -> PluginResult<CommandOutput> {
        let output = tokio::process::Command::new(program)
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .await
            .map_err(|e| PluginError::host(format!("Failed to run {}: {}", program, e)))?;

        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn fetch_url(&self, url: &str) -> PluginResult<String> {
        let fetch = async {
            self.http.get(url).send().await?.error_for_status()?.text().await
        };
        fetch
            .await
            .map_err(|e| PluginError::host(format!("Fetch of {} failed: {}", url, e)))
    }

    async fn notify(&self, title: &str, body: &str) -> PluginResult<()> {
        info!(target: "gitdock::notify", "{}: {}", title, body);
        Ok(())
    }
}

fn read_branches(repo: &Repository) -> PluginResult<Vec<Branch>> {
    let mut branches = Vec::new();
    for entry in repo.branches(None)? {
        let (branch, kind) = entry?;
        let Some(name) = branch.name()?.map(str::to_string) else {
            continue;
        };
        // Symbolic remote HEADs such as origin/HEAD
        if kind == BranchType::Remote && name.ends_with("/HEAD") {
            continue;
        }
        let upstream = branch
            .upstream()
            .ok()
            .and_then(|upstream| upstream.name().ok().flatten().map(str::to_string));

        branches.push(Branch {
            is_head: branch.is_head(),
            is_remote: kind == BranchType::Remote,
            upstream,
            target: branch.get().target().map(|oid| oid.to_string()),
            name,
        });
    }
    branches.sort_by(|a, b| a.is_remote.cmp(&b.is_remote).then_with(|| a.name.cmp(&b.name)));
    Ok(branches)
}

fn read_commits(repo: &Repository, limit: usize) -> PluginResult<Vec<Commit>> {
    match repo.head() {
        Ok(_) => {}
        Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    }

    let mut walk = repo.revwalk()?;
    walk.push_head()?;
    walk.set_sorting(git2::Sort::TIME)?;

    let mut commits = Vec::new();
    for oid in walk.take(limit) {
        let commit = repo.find_commit(oid?)?;
        let author = commit.author();
        commits.push(Commit {
            id: commit.id().to_string(),
            summary: commit.summary().unwrap_or_default().to_string(),
            author: author.name().unwrap_or_default().to_string(),
            email: author.email().unwrap_or_default().to_string(),
            timestamp: DateTime::from_timestamp(commit.time().seconds(), 0).unwrap_or_default(),
        });
    }
    Ok(commits)
}

fn head_branch(repo: &Repository) -> Option<String> {
    repo.head().ok().and_then(|head| head.shorthand().map(str::to_string))
}

fn read_worktrees(repo: &Repository, workdir: &Path) -> PluginResult<Vec<Worktree>> {
    let main_name = workdir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut worktrees = vec![Worktree {
        name: main_name,
        path: workdir.to_string_lossy().into_owned(),
        branch: head_branch(repo),
        is_main: true,
    }];

    for name in repo.worktrees()?.iter().flatten() {
        let worktree = repo.find_worktree(name)?;
        let branch = Repository::open_from_worktree(&worktree)
            .ok()
            .and_then(|linked| head_branch(&linked));
        worktrees.push(Worktree {
            name: name.to_string(),
            path: worktree.path().to_string_lossy().into_owned(),
            branch,
            is_main: false,
        });
    }
    Ok(worktrees)
}

const STATUS_KINDS: [(Status, ChangeKind, bool); 8] = [
    (Status::INDEX_NEW, ChangeKind::Added, true),
    (Status::INDEX_MODIFIED, ChangeKind::Modified, true),
    (Status::INDEX_DELETED, ChangeKind::Deleted, true),
    (Status::INDEX_RENAMED, ChangeKind::Renamed, true),
    (Status::WT_NEW, ChangeKind::Untracked, false),
    (Status::WT_MODIFIED, ChangeKind::Modified, false),
    (Status::WT_DELETED, ChangeKind::Deleted, false),
    (Status::WT_RENAMED, ChangeKind::Renamed, false),
];

fn read_status(repo: &Repository) -> PluginResult<WorkingStatus> {
    let mut options = StatusOptions::new();
    options.include_untracked(true).recurse_untracked_dirs(true);

    let mut changes = Vec::new();
    for entry in repo.statuses(Some(&mut options))?.iter() {
        let path = entry.path().unwrap_or_default().to_string();
        let status = entry.status();
        if status.contains(Status::CONFLICTED) {
            changes.push(FileChange { path, kind: ChangeKind::Conflicted, staged: false });
            continue;
        }
        for (flag, kind, staged) in STATUS_KINDS {
            if status.contains(flag) {
                changes.push(FileChange { path: path.clone(), kind, staged });
            }
        }
    }

    Ok(WorkingStatus {
        branch: head_branch(repo),
        changes,
    })
}
