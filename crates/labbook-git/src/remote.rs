//! Remote operations, grounded in `GitRepoInterface`'s remote method group
//! (`list_remotes`, `add_remote`, `fetch`, `pull`, `push`).

use anyhow::Result;

use crate::Repository;

/// One configured remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRef {
    pub name: String,
    pub url: String,
}

impl Repository {
    /// `git remote add <name> <url>`.
    pub fn add_remote(&self, name: &str, url: &str) -> Result<()> {
        self.run_ok(&["remote", "add", name, url])?;
        Ok(())
    }

    /// `git remote -v`, deduplicated to one entry per remote name.
    pub fn list_remotes(&self) -> Result<Vec<RemoteRef>> {
        let raw = self.run_ok(&["remote", "-v"])?;
        let mut remotes = Vec::new();
        for line in raw.lines() {
            let mut parts = line.split_whitespace();
            let (Some(name), Some(url)) = (parts.next(), parts.next()) else {
                continue;
            };
            if !remotes.iter().any(|r: &RemoteRef| r.name == name) {
                remotes.push(RemoteRef {
                    name: name.to_string(),
                    url: url.to_string(),
                });
            }
        }
        Ok(remotes)
    }

    /// `git fetch <remote>`.
    pub fn fetch(&self, remote: &str) -> Result<()> {
        self.run_ok(&["fetch", remote])?;
        Ok(())
    }

    /// `git pull <remote> <branch>`.
    pub fn pull(&self, remote: &str, branch: &str) -> Result<()> {
        self.run_ok(&["pull", remote, branch])?;
        Ok(())
    }

    /// `git pull --commit [-s recursive -X theirs] <remote> <branch>`, the
    /// form the workflow engine's forced sync uses to resolve in favor of
    /// the remote side.
    pub fn pull_with_strategy(&self, remote: &str, branch: &str, force_theirs: bool) -> Result<()> {
        let mut args = vec!["pull", "--commit"];
        if force_theirs {
            args.extend(["-s", "recursive", "-X", "theirs"]);
        }
        args.push(remote);
        args.push(branch);
        self.run_ok(&args)?;
        Ok(())
    }

    /// `git push [--tags] <remote> <branch>`.
    pub fn push(&self, remote: &str, branch: &str, tags: bool) -> Result<()> {
        let mut args = vec!["push"];
        if tags {
            args.push("--tags");
        }
        args.push(remote);
        args.push(branch);
        self.run_ok(&args)?;
        Ok(())
    }

    /// `git push -u <remote> <branch>`, setting the upstream tracking branch.
    pub fn push_set_upstream(&self, remote: &str, branch: &str) -> Result<()> {
        self.run_ok(&["push", "-u", remote, branch])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::Repository;

    #[test]
    fn add_remote_then_list_remotes_round_trips() {
        let td = tempdir().expect("tempdir");
        let repo = Repository::at(td.path());
        repo.initialize().unwrap();
        repo.add_remote("origin", "https://example.com/repo.git")
            .unwrap();
        let remotes = repo.list_remotes().unwrap();
        assert_eq!(remotes.len(), 1);
        assert_eq!(remotes[0].name, "origin");
        assert_eq!(remotes[0].url, "https://example.com/repo.git");
    }
}
