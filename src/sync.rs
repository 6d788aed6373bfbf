//! Git synchronization transport.
//!
//! Global-mode vaults live in a shared Git repository. The engine brackets
//! every mutation with a pull before and a commit-and-push after, but it
//! treats Git itself as an opaque service behind [`GitTransport`]; conflict
//! detection and retry policy belong to the caller.
//!
//! [`ProcessGit`] is the stock implementation and shells out to the `git`
//! binary. It takes no locks and enforces no timeouts.

use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, info};

use crate::error::{VaultError, VaultResult};

/// The synchronization service a global vault depends on.
///
/// `safe_pull` must behave as a linearizable snapshot as of its return; a
/// subsequent `commit_and_push` wholly succeeds or wholly fails, and on
/// failure the caller re-pulls and retries.
pub trait GitTransport {
    /// Bring the repository up to date with its remote.
    fn safe_pull(&self, repo_root: &Path) -> VaultResult<()>;

    /// Stage the given paths, commit, and push.
    fn commit_and_push(&self, repo_root: &Path, message: &str, paths: &[PathBuf])
        -> VaultResult<()>;

    /// Whether `path` is inside a Git work tree.
    fn is_git_repo(&self, path: &Path) -> bool;

    /// Whether the work tree has uncommitted changes.
    fn has_uncommitted_changes(&self, path: &Path) -> VaultResult<bool>;

    /// Clone a repository to `path`.
    fn clone_repo(&self, url: &str, path: &Path) -> VaultResult<()>;
}

/// [`GitTransport`] backed by the system `git` binary.
#[derive(Debug, Default, Clone)]
pub struct ProcessGit;

impl ProcessGit {
    /// Build a transport using `git` from `PATH`.
    pub fn new() -> Self {
        Self
    }

    fn run(&self, cwd: &Path, args: &[&str]) -> VaultResult<String> {
        debug!("git {} (in {})", args.join(" "), cwd.display());
        let output = Command::new("git")
            .args(args)
            .current_dir(cwd)
            .output()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    VaultError::GitNotAvailable("git binary not found on PATH".to_string())
                } else {
                    VaultError::GitNotAvailable(e.to_string())
                }
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            return Ok(stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        Err(classify_failure(args, &stderr))
    }
}

/// Map a failed git invocation onto the error taxonomy by sniffing stderr.
fn classify_failure(args: &[&str], stderr: &str) -> VaultError {
    let summary = stderr.lines().last().unwrap_or("").trim().to_string();
    let context = format!("git {}: {}", args.first().unwrap_or(&"?"), summary);

    if stderr.contains("CONFLICT")
        || stderr.contains("Automatic merge failed")
        || stderr.contains("[rejected]")
        || stderr.contains("non-fast-forward")
        || stderr.contains("Not possible to fast-forward")
    {
        VaultError::MergeConflict(context)
    } else if stderr.contains("Could not resolve host")
        || stderr.contains("unable to access")
        || stderr.contains("Connection refused")
        || stderr.contains("Network is unreachable")
        || stderr.contains("Connection timed out")
    {
        VaultError::RemoteUnreachable(context)
    } else {
        VaultError::GitOperationFailed(context)
    }
}

impl GitTransport for ProcessGit {
    fn safe_pull(&self, repo_root: &Path) -> VaultResult<()> {
        match self.run(repo_root, &["pull", "--ff-only"]) {
            Ok(_) => Ok(()),
            // A repository with no remote yet has nothing to pull from.
            Err(VaultError::GitOperationFailed(msg))
                if msg.contains("no tracking information")
                    || msg.contains("does not appear to be a git repository")
                    || msg.contains("No remote") =>
            {
                debug!("skipping pull, no remote configured");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn commit_and_push(
        &self,
        repo_root: &Path,
        message: &str,
        paths: &[PathBuf],
    ) -> VaultResult<()> {
        let mut add_args = vec!["add", "--"];
        let rendered: Vec<String> = paths
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        add_args.extend(rendered.iter().map(String::as_str));
        self.run(repo_root, &add_args)?;

        match self.run(repo_root, &["commit", "-m", message]) {
            Ok(_) => {}
            Err(VaultError::GitOperationFailed(msg))
                if msg.contains("nothing to commit") || msg.contains("nothing added") =>
            {
                debug!("nothing to commit, skipping push");
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        match self.run(repo_root, &["push"]) {
            Ok(_) => {
                info!("pushed vault changes: {message}");
                Ok(())
            }
            Err(VaultError::GitOperationFailed(msg))
                if msg.contains("No configured push destination")
                    || msg.contains("no upstream") =>
            {
                debug!("skipping push, no remote configured");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn is_git_repo(&self, path: &Path) -> bool {
        self.run(path, &["rev-parse", "--is-inside-work-tree"])
            .map(|out| out.trim() == "true")
            .unwrap_or(false)
    }

    fn has_uncommitted_changes(&self, path: &Path) -> VaultResult<bool> {
        let out = self.run(path, &["status", "--porcelain"])?;
        Ok(!out.trim().is_empty())
    }

    fn clone_repo(&self, url: &str, path: &Path) -> VaultResult<()> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        crate::store::ensure_dir(parent)?;
        let target = path.to_string_lossy().into_owned();
        self.run(parent, &["clone", url, target.as_str()])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_merge_conflict() {
        let err = classify_failure(&["pull"], "CONFLICT (content): Merge conflict in a.json");
        assert!(matches!(err, VaultError::MergeConflict(_)));
    }

    #[test]
    fn test_classify_rejected_push() {
        let err = classify_failure(
            &["push"],
            "! [rejected] main -> main (fetch first)\nerror: failed to push some refs",
        );
        assert!(matches!(err, VaultError::MergeConflict(_)));
    }

    #[test]
    fn test_classify_unreachable_remote() {
        let err = classify_failure(
            &["push"],
            "fatal: unable to access 'https://example.com/v.git/': Could not resolve host",
        );
        assert!(matches!(err, VaultError::RemoteUnreachable(_)));
    }

    #[test]
    fn test_classify_other_failure() {
        let err = classify_failure(&["commit"], "fatal: bad revision 'HEAD~1'");
        assert!(matches!(err, VaultError::GitOperationFailed(_)));
    }
}
