//! Workflow Engine (C9): publish / sync / pull over the Repository Adapter,
//! atop the two-branch model (`gm.workspace` / `gm.workspace-<username>`).

use anyhow::{Context, Result, bail};
use labbook_git::Repository;
use labbook_types::ErrorKind;

use crate::labbook::{integration_branch, user_branch};

/// Orchestrates publish/sync/pull for one LabBook's repository. Does not own
/// the LabBook lock itself; callers acquire it before calling in, matching
/// spec.md §5's "every operation that mutates a LabBook acquires the
/// LabBook lock" rule.
pub struct WorkflowEngine<'a> {
    repo: &'a Repository,
}

impl<'a> WorkflowEngine<'a> {
    pub fn new(repo: &'a Repository) -> Self {
        Self { repo }
    }

    fn sweep_uncommitted_changes(&self) -> Result<()> {
        if !self.repo.is_clean()? {
            self.repo.add_all()?;
            self.repo
                .commit("Auto-commit on branch change", None, None)?;
        }
        Ok(())
    }

    /// Merge `username`'s working branch into `gm.workspace` and push it.
    pub fn publish(&self, username: &str, remote: &str) -> Result<()> {
        let user_branch = user_branch(username);
        let integration_branch = integration_branch();

        let current = self.repo.current_branch_name()?;
        if current != user_branch {
            bail!(ErrorKind::conflict(format!(
                "publish must be run from {user_branch}, not {current}"
            )));
        }
        if !self
            .repo
            .list_branches()?
            .local
            .iter()
            .any(|b| b == &integration_branch)
        {
            bail!(ErrorKind::not_found(format!(
                "{integration_branch} does not exist locally"
            )));
        }

        // Best-effort; a failed gc must never fail the publish.
        if let Err(e) = self.repo.gc_auto() {
            tracing::warn!(error = %e, "garbage collection failed during publish, continuing");
        }

        self.repo
            .fetch(remote)
            .with_context(|| format!("fetching {remote} before publish"))?;

        let remote_branch = format!("{remote}/{user_branch}");
        if self.branch_exists_on_remote(&remote_branch)?
            && self.repo.commits_behind(&user_branch, &remote_branch)? > 0
        {
            bail!(ErrorKind::conflict(format!(
                "{user_branch} is behind {remote_branch}; sync before publishing"
            )));
        }

        self.repo.checkout(&integration_branch)?;
        let result = self.publish_merge_and_push(&integration_branch, &user_branch, remote);
        // Always return to the user's working branch, even on failure.
        self.repo.checkout(&user_branch)?;
        result
    }

    fn publish_merge_and_push(&self, integration_branch: &str, user_branch: &str, remote: &str) -> Result<()> {
        self.repo
            .merge(user_branch)
            .map_err(|e| anyhow::anyhow!(ErrorKind::merge(format!("merging {user_branch}: {e}"))))?;
        self.repo
            .push_set_upstream(remote, integration_branch)
            .map_err(|e| anyhow::anyhow!(ErrorKind::remote(format!("pushing {integration_branch}: {e}"))))?;
        Ok(())
    }

    fn branch_exists_on_remote(&self, remote_branch: &str) -> Result<bool> {
        Ok(self
            .repo
            .list_branches()?
            .remote
            .iter()
            .any(|b| b == remote_branch))
    }

    /// Bring `username`'s working branch in sync with `gm.workspace`,
    /// optionally resolving conflicts in favor of the remote (`force`).
    pub fn sync(&self, username: &str, remote: Option<&str>, force: bool) -> Result<()> {
        let user_branch = user_branch(username);
        let integration_branch = integration_branch();

        let current = self.repo.current_branch_name()?;
        if current != user_branch {
            bail!(ErrorKind::conflict(format!(
                "sync must be run from {user_branch}, not {current}"
            )));
        }

        self.sweep_uncommitted_changes()?;

        let Some(remote) = remote else {
            // No remote configured: purely local sync, just keep
            // gm.workspace fast-forwardable from the user branch.
            return Ok(());
        };

        if let Err(e) = self.repo.gc_auto() {
            tracing::warn!(error = %e, "garbage collection failed during sync, continuing");
        }

        let pre_sync_commit = self.repo.head_commit_hash()?;

        let pull_result = self
            .repo
            .pull_with_strategy(remote, &integration_branch, force);

        if let Err(e) = pull_result {
            self.repo.abort_merge().ok();
            self.repo
                .reset_head(&pre_sync_commit, true, false)
                .context("resetting to pre-sync commit after failed pull")?;
            bail!(ErrorKind::merge(format!(
                "pull from {remote}/{integration_branch} could not be resolved: {e}"
            )));
        }

        self.repo.checkout(&integration_branch)?;
        let merge_result = self.repo.merge(&user_branch);
        if let Err(e) = merge_result {
            self.repo.abort_merge().ok();
            self.repo.checkout(&user_branch)?;
            self.repo
                .reset_head(&pre_sync_commit, true, false)
                .context("resetting to pre-sync commit after failed merge")?;
            bail!(ErrorKind::merge(format!(
                "merging {user_branch} into {integration_branch}: {e}"
            )));
        }

        self.repo
            .push(remote, &integration_branch, false)
            .map_err(|e| anyhow::anyhow!(ErrorKind::remote(format!("pushing {integration_branch}: {e}"))))?;
        self.repo.checkout(&user_branch)?;
        Ok(())
    }

    /// Clone `url` and check out the standard two-branch layout for `user`.
    pub fn from_remote(url: &str, into: &std::path::Path, user: &str) -> Result<Repository> {
        if into.exists() {
            bail!(ErrorKind::conflict(format!(
                "{} already exists",
                into.display()
            )));
        }
        let repo = Repository::clone(url, into)?;
        repo.checkout(&integration_branch())?;

        let user_branch = user_branch(user);
        let has_user_branch = repo.list_branches()?.local.iter().any(|b| b == &user_branch);
        if has_user_branch {
            repo.checkout(&user_branch)?;
        } else {
            repo.create_and_checkout_branch(&user_branch)?;
        }
        Ok(repo)
    }
}
