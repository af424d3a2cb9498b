//! Branch operations, grounded in `GitRepoInterface`'s branch method group
//! (`create_branch`, `list_branches`, `delete_branch`, `rename_branch`,
//! `checkout`).

use anyhow::{Context, Result};

use crate::Repository;

/// Local and remote-tracking branches, as returned by [`Repository::list_branches`].
#[derive(Debug, Clone, Default)]
pub struct BranchList {
    pub local: Vec<String>,
    pub remote: Vec<String>,
}

impl Repository {
    /// `git branch <name>` from the current `HEAD`.
    pub fn create_branch(&self, name: &str) -> Result<()> {
        self.run_ok(&["branch", name])?;
        Ok(())
    }

    /// `git checkout <branch>`.
    pub fn checkout(&self, branch: &str) -> Result<()> {
        self.run_ok(&["checkout", branch])?;
        Ok(())
    }

    /// `git checkout -b <branch>`.
    pub fn create_and_checkout_branch(&self, branch: &str) -> Result<()> {
        self.run_ok(&["checkout", "-b", branch])?;
        Ok(())
    }

    /// The branch `HEAD` currently points to, or a detached-HEAD short hash.
    pub fn current_branch_name(&self) -> Result<String> {
        self.run_ok(&["rev-parse", "--abbrev-ref", "HEAD"])
    }

    /// Local branches and remote-tracking branches (`refs/heads` and
    /// `refs/remotes`).
    pub fn list_branches(&self) -> Result<BranchList> {
        let local = self
            .run_ok(&["for-each-ref", "--format=%(refname:short)", "refs/heads"])?
            .lines()
            .map(str::to_string)
            .collect();
        let remote = self
            .run_ok(&["for-each-ref", "--format=%(refname:short)", "refs/remotes"])?
            .lines()
            .map(str::to_string)
            .collect();
        Ok(BranchList { local, remote })
    }

    /// `git branch [-D|-d] <name>`, or `git push <remote> --delete <name>`
    /// when `remote` is true.
    pub fn delete_branch(&self, name: &str, remote: bool, force: bool) -> Result<()> {
        if remote {
            self.run_ok(&["push", "origin", "--delete", name])?;
        } else {
            let flag = if force { "-D" } else { "-d" };
            self.run_ok(&["branch", flag, name])?;
        }
        Ok(())
    }

    /// `git branch -m <old_name> <new_name>`.
    pub fn rename_branch(&self, old_name: &str, new_name: &str) -> Result<()> {
        self.run_ok(&["branch", "-m", old_name, new_name])?;
        Ok(())
    }

    /// `git rev-parse <refname>`, resolving any ref (branch, tag, `HEAD`).
    pub fn rev_parse(&self, refname: &str) -> Result<String> {
        self.run_ok(&["rev-parse", refname])
    }

    /// Count of commits reachable from `other` but not `base`
    /// (`git rev-list --count <base>..<other>`). Used by the workflow engine
    /// to tell whether a branch is behind its remote counterpart.
    pub fn commits_behind(&self, base: &str, other: &str) -> Result<u32> {
        let range = format!("{base}..{other}");
        self.run_ok(&["rev-list", "--count", &range])?
            .parse()
            .context("parsing rev-list --count output")
    }
}

#[cfg(test)]
mod tests {
    use std::process::Command;

    use tempfile::tempdir;

    use super::*;
    use crate::Repository;

    fn init_repo_with_commit() -> (tempfile::TempDir, Repository) {
        let td = tempdir().expect("tempdir");
        let repo = Repository::at(td.path());
        repo.initialize().expect("git init");
        Command::new("git")
            .args(["config", "user.name", "Test User"])
            .current_dir(td.path())
            .output()
            .expect("config user.name");
        Command::new("git")
            .args(["config", "user.email", "test@example.com"])
            .current_dir(td.path())
            .output()
            .expect("config user.email");
        std::fs::write(td.path().join("a.txt"), "hello").expect("write");
        repo.add_all().expect("add");
        repo.commit("initial commit", None, None).expect("commit");
        (td, repo)
    }

    #[test]
    fn create_and_checkout_switches_branches() {
        let (_td, repo) = init_repo_with_commit();
        repo.create_and_checkout_branch("feature").unwrap();
        assert_eq!(repo.current_branch_name().unwrap(), "feature");
    }

    #[test]
    fn list_branches_contains_created_branch() {
        let (_td, repo) = init_repo_with_commit();
        repo.create_branch("gm.workspace").unwrap();
        let branches = repo.list_branches().unwrap();
        assert!(branches.local.iter().any(|b| b == "gm.workspace"));
    }

    #[test]
    fn rename_branch_updates_current_branch_name() {
        let (_td, repo) = init_repo_with_commit();
        repo.create_and_checkout_branch("old-name").unwrap();
        repo.rename_branch("old-name", "new-name").unwrap();
        assert_eq!(repo.current_branch_name().unwrap(), "new-name");
    }

    #[test]
    fn delete_branch_removes_it_from_local_list() {
        let (_td, repo) = init_repo_with_commit();
        repo.create_branch("throwaway").unwrap();
        repo.delete_branch("throwaway", false, false).unwrap();
        let branches = repo.list_branches().unwrap();
        assert!(!branches.local.iter().any(|b| b == "throwaway"));
    }
}
