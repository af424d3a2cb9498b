//! Commit history, grounded in `GitRepoInterface.log`'s documented return
//! shape: an ordered list of commit/author/datetime/message dictionaries.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use labbook_types::{CommitInfo, GitAuthor};

use crate::Repository;

const FIELD_SEP: &str = "\x1f";
const RECORD_SEP: &str = "\x1e";

/// One entry returned by [`Repository::log`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub hash: String,
    pub author_name: String,
    pub author_email: String,
    pub committer_name: String,
    pub committer_email: String,
    pub committed_on: DateTime<Utc>,
    pub message: String,
}

impl Repository {
    /// Commit history, most recent first, optionally filtered to one file
    /// and capped at `max_count` entries (the activity store requests
    /// `(first * 2) + 5` to account for non-activity commits that get
    /// filtered out downstream).
    pub fn log(&self, filename: Option<&str>, max_count: Option<usize>) -> Result<Vec<LogEntry>> {
        let format = format!(
            "--format=%H{FIELD_SEP}%an{FIELD_SEP}%ae{FIELD_SEP}%cn{FIELD_SEP}%ce{FIELD_SEP}%cI{FIELD_SEP}%B{RECORD_SEP}"
        );
        let mut args = vec!["log", format.as_str()];
        let max_count_arg;
        if let Some(max_count) = max_count {
            max_count_arg = format!("-n{max_count}");
            args.push(&max_count_arg);
        }
        if let Some(filename) = filename {
            args.push("--");
            args.push(filename);
        }

        let raw = self.run_ok(&args)?;
        parse_log(&raw)
    }

    /// A single commit's log entry.
    pub fn log_entry(&self, commit: &str) -> Result<LogEntry> {
        self.log(None, None)?
            .into_iter()
            .find(|entry| entry.hash == commit)
            .with_context(|| format!("commit {commit} not found in log"))
    }
}

fn parse_log(raw: &str) -> Result<Vec<LogEntry>> {
    raw.split(RECORD_SEP)
        .map(str::trim)
        .filter(|record| !record.is_empty())
        .map(parse_record)
        .collect()
}

fn parse_record(record: &str) -> Result<LogEntry> {
    let mut fields = record.splitn(7, FIELD_SEP);
    let hash = fields.next().context("missing commit hash")?.to_string();
    let author_name = fields.next().context("missing author name")?.to_string();
    let author_email = fields.next().context("missing author email")?.to_string();
    let committer_name = fields.next().context("missing committer name")?.to_string();
    let committer_email = fields.next().context("missing committer email")?.to_string();
    let committed_on_raw = fields.next().context("missing commit date")?;
    let message = fields.next().unwrap_or("").trim().to_string();

    let committed_on = DateTime::parse_from_rfc3339(committed_on_raw)
        .with_context(|| format!("invalid commit date {committed_on_raw:?}"))?
        .with_timezone(&Utc);

    Ok(LogEntry {
        hash,
        author_name,
        author_email,
        committer_name,
        committer_email,
        committed_on,
        message,
    })
}

impl From<LogEntry> for CommitInfo {
    fn from(entry: LogEntry) -> Self {
        CommitInfo {
            hash: entry.hash,
            author: GitAuthor::new(entry.author_name, entry.author_email),
            committer: GitAuthor::new(entry.committer_name, entry.committer_email),
            committed_on: entry.committed_on,
            message: entry.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_single_record() {
        let raw = format!(
            "abc123{FIELD_SEP}Ada{FIELD_SEP}ada@example.com{FIELD_SEP}Ada{FIELD_SEP}ada@example.com{FIELD_SEP}2024-01-02T03:04:05+00:00{FIELD_SEP}Initial commit\n{RECORD_SEP}"
        );
        let entries = parse_log(&raw).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].hash, "abc123");
        assert_eq!(entries[0].message, "Initial commit");
    }

    #[test]
    fn parses_multiple_records_in_order() {
        let record = |hash: &str| {
            format!(
                "{hash}{FIELD_SEP}Ada{FIELD_SEP}ada@example.com{FIELD_SEP}Ada{FIELD_SEP}ada@example.com{FIELD_SEP}2024-01-02T03:04:05+00:00{FIELD_SEP}msg\n{RECORD_SEP}"
            )
        };
        let raw = format!("{}{}", record("first"), record("second"));
        let entries = parse_log(&raw).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].hash, "first");
        assert_eq!(entries[1].hash, "second");
    }
}
