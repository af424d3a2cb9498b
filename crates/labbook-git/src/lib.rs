//! Repository Adapter: a thin, testable wrapper over the `git` binary.
//!
//! Every operation shells out via `std::process::Command`, the way the
//! teacher's `git.rs` collects commit/branch/dirty context by invoking
//! `git` directly rather than linking libgit2. The environment variable
//! override (`LABBOOK_GIT_BIN`) and the pattern of writing a fake `git`
//! script in tests both follow that file.

mod branch;
mod log;
mod remote;
mod status;

pub use branch::BranchList;
pub use log::LogEntry;
pub use remote::RemoteRef;
pub use status::{FileStatus, RepoStatus};

use std::env;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{bail, Context, Result};
use labbook_types::GitAuthor;

fn git_program() -> String {
    env::var("LABBOOK_GIT_BIN").unwrap_or_else(|_| "git".to_string())
}

/// A git repository rooted at a fixed path on disk.
#[derive(Debug, Clone)]
pub struct Repository {
    root: PathBuf,
}

impl Repository {
    /// Wrap an existing repository without validating it; use
    /// [`Repository::is_repo`] or [`Repository::initialize`] as needed.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new(git_program())
            .args(args)
            .current_dir(&self.root)
            .output()
            .with_context(|| format!("failed to run git {}; is git installed?", args.join(" ")))
    }

    fn run_ok(&self, args: &[&str]) -> Result<String> {
        let out = self.run(args)?;
        if !out.status.success() {
            bail!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&out.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
    }

    /// True if `root` is inside a git working tree.
    pub fn is_repo(&self) -> bool {
        self.run(&["rev-parse", "--git-dir"])
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    /// `git init` at `root`.
    pub fn initialize(&self) -> Result<()> {
        self.run_ok(&["init"])?;
        Ok(())
    }

    /// `git clone <source> <root>`, run from `root`'s parent.
    pub fn clone(source: &str, into: impl Into<PathBuf>) -> Result<Self> {
        let into = into.into();
        let parent = into
            .parent()
            .context("clone destination must have a parent directory")?;
        let dest_name = into
            .file_name()
            .context("clone destination must have a final path component")?;
        let out = Command::new(git_program())
            .arg("clone")
            .arg(source)
            .arg(dest_name)
            .current_dir(parent)
            .output()
            .context("failed to run git clone; is git installed?")?;
        if !out.status.success() {
            bail!(
                "git clone failed: {}",
                String::from_utf8_lossy(&out.stderr).trim()
            );
        }
        Ok(Self::at(into))
    }

    /// `git add <path>`.
    pub fn add(&self, path: &str) -> Result<()> {
        self.run_ok(&["add", path])?;
        Ok(())
    }

    /// `git add -A`.
    pub fn add_all(&self) -> Result<()> {
        self.run_ok(&["add", "-A"])?;
        Ok(())
    }

    /// `git rm [--cached] [-f] <path>`.
    pub fn remove(&self, path: &str, force: bool, keep_file: bool) -> Result<()> {
        let mut args = vec!["rm"];
        if force {
            args.push("-f");
        }
        if keep_file {
            args.push("--cached");
        }
        args.push(path);
        self.run_ok(&args)?;
        Ok(())
    }

    /// Commit staged changes. `author`/`committer` override `git config
    /// user.*` for this commit only, per spec.md's Repository Adapter
    /// contract; when omitted the ambient git identity is used.
    pub fn commit(
        &self,
        message: &str,
        author: Option<&GitAuthor>,
        committer: Option<&GitAuthor>,
    ) -> Result<String> {
        let mut cmd = Command::new(git_program());
        cmd.arg("commit").arg("-m").arg(message);

        if let Some(author) = author {
            cmd.arg("--author").arg(author.as_git_format());
        }
        if let Some(committer) = committer {
            cmd.env("GIT_COMMITTER_NAME", &committer.name);
            cmd.env("GIT_COMMITTER_EMAIL", &committer.email);
        }

        let out = cmd
            .current_dir(&self.root)
            .output()
            .context("failed to run git commit; is git installed?")?;
        if !out.status.success() {
            bail!(
                "git commit failed: {}",
                String::from_utf8_lossy(&out.stderr).trim()
            );
        }

        self.head_commit_hash()
    }

    /// The current `HEAD` commit hash.
    pub fn head_commit_hash(&self) -> Result<String> {
        self.run_ok(&["rev-parse", "HEAD"])
    }

    /// `git diff <path>` against the working tree (unstaged changes).
    pub fn diff_unstaged(&self, path: Option<&str>) -> Result<String> {
        let mut args = vec!["diff"];
        if let Some(path) = path {
            args.push(path);
        }
        self.run_ok(&args)
    }

    /// `git diff --cached <path>` (staged changes).
    pub fn diff_staged(&self, path: Option<&str>) -> Result<String> {
        let mut args = vec!["diff", "--cached"];
        if let Some(path) = path {
            args.push(path);
        }
        self.run_ok(&args)
    }

    /// `git diff <src>..<target> [-- <path>]`.
    pub fn diff_commits(&self, src: &str, target: &str, path: Option<&str>) -> Result<String> {
        let range = format!("{src}..{target}");
        let mut args = vec!["diff", range.as_str()];
        if let Some(path) = path {
            args.push("--");
            args.push(path);
        }
        self.run_ok(&args)
    }

    /// `git reset [--hard|--keep] <commit>`.
    pub fn reset_head(&self, commit: &str, hard: bool, keep: bool) -> Result<()> {
        let mut args = vec!["reset"];
        if hard {
            args.push("--hard");
        } else if keep {
            args.push("--keep");
        }
        args.push(commit);
        self.run_ok(&args)?;
        Ok(())
    }

    /// `git checkout -- <path>` / `git checkout -- .` when `path` is `None`.
    pub fn discard_changes(&self, path: Option<&str>) -> Result<()> {
        let target = path.unwrap_or(".");
        self.run_ok(&["checkout", "--", target])?;
        Ok(())
    }

    /// `git revert --no-edit <commit>`.
    pub fn revert(&self, commit: &str) -> Result<()> {
        self.run_ok(&["revert", "--no-edit", commit])?;
        Ok(())
    }

    /// `git merge <branch_name>`. Returns an error carrying git's own
    /// conflict output on failure; the main crate classifies this into
    /// `ErrorKind::Merge`.
    pub fn merge(&self, branch_name: &str) -> Result<()> {
        self.run_ok(&["merge", branch_name])?;
        Ok(())
    }

    /// `git merge --abort`.
    pub fn abort_merge(&self) -> Result<()> {
        self.run_ok(&["merge", "--abort"])?;
        Ok(())
    }

    /// `git gc --auto`. Callers treat failure as non-fatal (spec.md §4.9
    /// treats garbage-collection as best-effort).
    pub fn gc_auto(&self) -> Result<()> {
        self.run_ok(&["gc", "--auto"])?;
        Ok(())
    }

    /// True iff `git status --porcelain` has no output.
    pub fn is_clean(&self) -> Result<bool> {
        Ok(self.run_ok(&["status", "--porcelain"])?.is_empty())
    }
}
