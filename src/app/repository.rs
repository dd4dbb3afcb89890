//! Repository path resolution and the host plugins see

use std::path::{Path, PathBuf};
use std::sync::Arc;
use anyhow::{Context, Result};
use log::{debug, info, warn};

use crate::git::GitRepositoryHost;
use crate::plugin::host::{HostAccessors, UnavailableHost};

/// Resolve `--repo` (with `~/` expanded) or the current directory
pub fn resolve_repository_path(repository_arg: Option<PathBuf>) -> Result<PathBuf> {
    let path = match repository_arg {
        Some(path) => {
            debug!("Repository path provided: {}", path.display());
            expand_tilde(path)
        }
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    if !path.exists() {
        anyhow::bail!("Directory does not exist: {}", path.display());
    }
    path.canonicalize()
        .with_context(|| format!("Failed to resolve canonical path for: {}", path.display()))
}

fn expand_tilde(path: PathBuf) -> PathBuf {
    if let (Ok(rest), Some(home)) = (path.strip_prefix("~"), dirs::home_dir()) {
        return home.join(rest);
    }
    path
}

/// Host over the repository at `path`. Plugin management works outside a
/// repository too, so a path that is not a git work tree falls back to a
/// host with no repository data.
pub fn open_host(path: &Path) -> Arc<dyn HostAccessors> {
    match GitRepositoryHost::open(path) {
        Ok(host) => {
            info!("Plugins will see repository {}", host.workdir().display());
            Arc::new(host)
        }
        Err(e) => {
            warn!("No repository available at {}: {}", path.display(), e);
            Arc::new(UnavailableHost)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_directory_is_rejected() {
        let dir = TempDir::new().unwrap();
        assert!(resolve_repository_path(Some(dir.path().join("absent"))).is_err());
    }

    #[test]
    fn test_tilde_expansion() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde(PathBuf::from("~/src")), home.join("src"));
        }
        assert_eq!(expand_tilde(PathBuf::from("/srv/repo")), PathBuf::from("/srv/repo"));
    }

    #[test]
    fn test_plain_directory_gets_unavailable_host() {
        let dir = TempDir::new().unwrap();
        let path = resolve_repository_path(Some(dir.path().to_path_buf())).unwrap();
        let host = open_host(&path);
        assert!(host.branches().is_empty());
        assert!(host.working_status().is_none());
    }
}
