//! Working tree status, parsed from `git status --porcelain=v1`.
//!
//! Grounded in `GitRepoInterface.status`'s documented return shape
//! (`original_source/lmcommon/gitlib/git.py`): staged/unstaged file lists
//! paired with a change type, plus a flat untracked list.

use anyhow::Result;

use crate::Repository;

/// The kind of change a status line represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    New,
    Modified,
    Deleted,
    Renamed,
}

impl FileStatus {
    fn from_porcelain_code(code: char) -> Option<Self> {
        match code {
            'A' => Some(Self::New),
            'M' => Some(Self::Modified),
            'D' => Some(Self::Deleted),
            'R' => Some(Self::Renamed),
            _ => None,
        }
    }
}

/// The parsed result of `git status`.
#[derive(Debug, Clone, Default)]
pub struct RepoStatus {
    pub staged: Vec<(String, FileStatus)>,
    pub unstaged: Vec<(String, FileStatus)>,
    pub untracked: Vec<String>,
}

impl Repository {
    /// `git status --porcelain=v1`, parsed into staged/unstaged/untracked.
    pub fn status(&self) -> Result<RepoStatus> {
        let raw = self.run_ok(&["status", "--porcelain=v1"])?;
        Ok(parse_porcelain_status(&raw))
    }
}

fn parse_porcelain_status(raw: &str) -> RepoStatus {
    let mut status = RepoStatus::default();

    for line in raw.lines() {
        if line.len() < 3 {
            continue;
        }
        let mut chars = line.chars();
        let index_code = chars.next().unwrap_or(' ');
        let worktree_code = chars.next().unwrap_or(' ');
        let path = line[3..].to_string();

        if index_code == '?' && worktree_code == '?' {
            status.untracked.push(path);
            continue;
        }

        if let Some(kind) = FileStatus::from_porcelain_code(index_code) {
            status.staged.push((path.clone(), kind));
        }
        if let Some(kind) = FileStatus::from_porcelain_code(worktree_code) {
            status.unstaged.push((path, kind));
        }
    }

    status
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_staged_new_file() {
        let status = parse_porcelain_status("A  new.txt\n");
        assert_eq!(status.staged, vec![("new.txt".to_string(), FileStatus::New)]);
        assert!(status.unstaged.is_empty());
    }

    #[test]
    fn parses_unstaged_modification() {
        let status = parse_porcelain_status(" M changed.txt\n");
        assert_eq!(
            status.unstaged,
            vec![("changed.txt".to_string(), FileStatus::Modified)]
        );
    }

    #[test]
    fn parses_untracked_file() {
        let status = parse_porcelain_status("?? scratch.txt\n");
        assert_eq!(status.untracked, vec!["scratch.txt".to_string()]);
    }

    #[test]
    fn parses_mixed_status_lines() {
        let raw = "A  added.txt\n M modified.txt\nD  deleted.txt\n?? untracked.txt\n";
        let status = parse_porcelain_status(raw);
        assert_eq!(status.staged.len(), 2);
        assert_eq!(status.unstaged.len(), 1);
        assert_eq!(status.untracked, vec!["untracked.txt".to_string()]);
    }
}
