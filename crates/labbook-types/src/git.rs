//! Shared git-adjacent value types, used by `labbook-git` and by the main
//! crate's activity/workflow modules without pulling in the full adapter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Commit author or committer identity, passed through to the Repository
/// Adapter's `commit` so activity commits can be attributed to the user who
/// triggered them rather than whatever `git config user.*` says.
///
/// Grounded in `original_source/lmcommon/gitlib/git.py`, which threads an
/// author/committer pair through every commit call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitAuthor {
    pub name: String,
    pub email: String,
}

impl GitAuthor {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// `git commit`'s `--author`/committer-env value: `Name <email>`.
    pub fn as_git_format(&self) -> String {
        format!("{} <{}>", self.name, self.email)
    }
}

/// One entry in a LabBook's commit history, as returned by `log`/`log_entry`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub hash: String,
    pub author: GitAuthor,
    pub committer: GitAuthor,
    pub committed_on: DateTime<Utc>,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn git_author_formats_like_git_expects() {
        let a = GitAuthor::new("Ada Lovelace", "ada@example.com");
        assert_eq!(a.as_git_format(), "Ada Lovelace <ada@example.com>");
    }
}
