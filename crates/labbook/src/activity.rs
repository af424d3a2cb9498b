//! Activity Store (C2): activity records live as specially-formatted commit
//! messages in the git log; the arbitrary payload each detail carries lives
//! in the rotating [`labbook_detail_store::DetailStore`].
//!
//! The commit-message grammar is bit-exact with
//! `original_source/lmcommon/activity/records.py`: a `_GTM_ACTIVITY_START_`
//! sentinel, `**\n`-delimited `msg:`/`metadata:`/`tags:`/`details:`
//! sections, one `type,show,importance,key` line per detail, closed by
//! `_GTM_ACTIVITY_END_`.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::OnceLock;

use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use labbook_detail_store::DetailStore;
use labbook_git::Repository;
use labbook_types::{ActivityDetailType, ActivityType, ErrorKind, GitAuthor};
use regex::Regex;
use serde_json::{json, Value};

const START_SENTINEL: &str = "_GTM_ACTIVITY_START_";
const END_SENTINEL: &str = "_GTM_ACTIVITY_END_";
const SECTION_SEP: &str = "**\n";

const MAX_NUM_TAGS: usize = 100;
const MAX_TAG_LENGTH: usize = 256;

fn note_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)_GTM_ACTIVITY_START_.*?_GTM_ACTIVITY_END_").expect("static regex is valid")
    })
}

/// One arbitrary-payload detail attached to an [`ActivityRecord`].
#[derive(Debug, Clone, Default)]
pub struct ActivityDetailRecord {
    pub detail_type: Option<ActivityDetailType>,
    pub key: Option<String>,
    pub show: bool,
    pub importance: Option<u8>,
    pub data: HashMap<String, Value>,
}

impl ActivityDetailRecord {
    pub fn new(detail_type: ActivityDetailType, show: bool, importance: Option<u8>) -> Self {
        Self {
            detail_type: Some(detail_type),
            key: None,
            show,
            importance,
            data: HashMap::new(),
        }
    }

    pub fn add_value(&mut self, mime_type: impl Into<String>, value: Value) -> Result<()> {
        let mime_type = mime_type.into();
        if self.data.contains_key(&mime_type) {
            bail!("attempted to duplicate mime type {mime_type:?} while adding detail data");
        }
        self.data.insert(mime_type, value);
        Ok(())
    }

    /// `{type},{show},{importance},{key}` - the line stored in the commit
    /// message's `details:` section.
    fn log_str(&self) -> Result<String> {
        let detail_type = self
            .detail_type
            .context("detail type must be set before accessing the log string")?;
        let key = self
            .key
            .as_deref()
            .context("detail key must be set before accessing the log string")?;
        let importance = self
            .importance
            .map(|v| v.to_string())
            .unwrap_or_else(|| "None".to_string());
        Ok(format!(
            "{},{},{},{}",
            detail_type.as_u8(),
            self.show as u8,
            importance,
            key
        ))
    }

    fn from_log_str(line: &str) -> Result<Self> {
        let mut parts = line.splitn(4, ',');
        let type_int: u8 = parts
            .next()
            .context("missing detail type")?
            .parse()
            .context("invalid detail type")?;
        let show_int: u8 = parts
            .next()
            .context("missing detail show flag")?
            .parse()
            .context("invalid detail show flag")?;
        let importance_raw = parts.next().context("missing detail importance")?;
        let key = parts.next().context("missing detail key")?.to_string();

        let detail_type = ActivityDetailType::from_u8(type_int)
            .with_context(|| format!("unknown activity detail type {type_int}"))?;
        let importance = if importance_raw == "None" {
            None
        } else {
            Some(importance_raw.parse().context("invalid detail importance")?)
        };

        Ok(Self {
            detail_type: Some(detail_type),
            key: Some(key),
            show: show_int != 0,
            importance,
            data: HashMap::new(),
        })
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.data).context("serializing detail record payload")
    }

    fn from_bytes(bytes: &[u8]) -> Result<HashMap<String, Value>> {
        serde_json::from_slice(bytes).context("deserializing detail record payload")
    }
}

/// A single journaled event: a user-facing message, a category, and zero or
/// more [`ActivityDetailRecord`]s.
#[derive(Debug, Clone)]
pub struct ActivityRecord {
    pub activity_type: ActivityType,
    pub show: bool,
    pub message: String,
    pub importance: Option<u8>,
    pub tags: Vec<String>,
    pub detail_objects: Vec<ActivityDetailRecord>,
    pub linked_commit: Option<String>,
    pub committed_on: Option<chrono::DateTime<chrono::Utc>>,
}

impl ActivityRecord {
    pub fn new(activity_type: ActivityType, message: impl Into<String>) -> Self {
        Self {
            activity_type,
            show: true,
            message: message.into(),
            importance: None,
            tags: Vec::new(),
            detail_objects: Vec::new(),
            linked_commit: None,
            committed_on: None,
        }
    }

    pub fn add_detail_object(&mut self, detail: ActivityDetailRecord) {
        self.detail_objects.push(detail);
    }

    /// Render the commit message grammar. Every detail must already have a
    /// `key` (i.e. have been persisted via [`ActivityStore::put_detail_record`]).
    pub fn log_str(&self) -> Result<String> {
        let metadata = json!({
            "show": self.show,
            "importance": self.importance.unwrap_or(0),
            "type_name": format!("{:?}", self.activity_type).to_uppercase(),
            "type_id": self.activity_type.as_u8(),
        });

        let mut s = String::new();
        s.push_str(START_SENTINEL);
        s.push_str(SECTION_SEP);
        s.push_str(&format!("msg:{}", self.message));
        s.push_str(SECTION_SEP);
        s.push_str(&format!("metadata:{metadata}"));
        s.push_str(SECTION_SEP);
        s.push_str(&format!("tags:{}", serde_json::to_string(&self.tags)?));
        s.push_str(SECTION_SEP);
        s.push_str("details:");
        s.push_str(SECTION_SEP);
        for detail in &self.detail_objects {
            s.push_str(&detail.log_str()?);
            s.push_str(SECTION_SEP);
        }
        s.push_str(END_SENTINEL);

        Ok(s)
    }

    fn from_log_str(log_str: &str) -> Result<Self> {
        if !log_str.starts_with(START_SENTINEL) || !log_str.ends_with(END_SENTINEL) {
            bail!("malformed activity log record; cannot parse");
        }

        let lines: Vec<&str> = log_str.split(SECTION_SEP).collect();
        if lines.len() < 5 {
            bail!("malformed activity log record; too few sections");
        }

        let message = lines[1]
            .strip_prefix("msg:")
            .context("missing msg: section")?
            .to_string();
        let metadata: Value = serde_json::from_str(
            lines[2].strip_prefix("metadata:").context("missing metadata: section")?,
        )
        .context("invalid metadata json")?;
        let tags: Vec<String> = serde_json::from_str(
            lines[3].strip_prefix("tags:").context("missing tags: section")?,
        )
        .context("invalid tags json")?;

        let type_id = metadata
            .get("type_id")
            .and_then(Value::as_u64)
            .context("metadata missing type_id")? as u8;
        let activity_type =
            ActivityType::from_u8(type_id).with_context(|| format!("unknown activity type {type_id}"))?;
        let show = metadata
            .get("show")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        let importance = metadata
            .get("importance")
            .and_then(Value::as_u64)
            .map(|v| v as u8);

        let mut record = ActivityRecord::new(activity_type, message);
        record.show = show;
        record.importance = importance;
        record.tags = tags;

        for line in &lines[5..] {
            if *line == END_SENTINEL {
                break;
            }
            record.add_detail_object(ActivityDetailRecord::from_log_str(line)?);
        }

        Ok(record)
    }
}

/// Centralized interface to activity data stored in both the git log (high
/// level `ActivityRecord`s) and the detail store (arbitrary per-detail
/// payloads), grounded in `original_source/lmcommon/activity/store.py`.
pub struct ActivityStore<'a> {
    repo: &'a Repository,
    detail_store: &'a DetailStore,
    compress_details: bool,
    compress_min_bytes: u64,
}

impl<'a> ActivityStore<'a> {
    pub fn new(
        repo: &'a Repository,
        detail_store: &'a DetailStore,
        compress_details: bool,
        compress_min_bytes: u64,
    ) -> Self {
        Self {
            repo,
            detail_store,
            compress_details,
            compress_min_bytes,
        }
    }

    /// Dedup, cap, and sanitize tags the way `_validate_tags` does.
    pub fn validate_tags(tags: &[String]) -> Result<Vec<String>, ErrorKind> {
        if tags.is_empty() {
            return Ok(Vec::new());
        }

        let mut unique: Vec<String> = Vec::new();
        for tag in tags {
            if !unique.contains(tag) {
                unique.push(tag.clone());
            }
        }

        if unique.len() > MAX_NUM_TAGS {
            return Err(ErrorKind::validation(format!(
                "{} tags provided, but a single activity record can only have {MAX_NUM_TAGS} tags",
                unique.len()
            )));
        }
        for tag in &unique {
            if tag.len() > MAX_TAG_LENGTH {
                return Err(ErrorKind::validation(format!(
                    "tag {tag:?} has {} characters, but a tag is limited to {MAX_TAG_LENGTH} characters",
                    tag.len()
                )));
            }
        }

        Ok(unique
            .into_iter()
            .map(|tag| tag.trim().chars().filter(|c| !matches!(c, '`' | '\\' | ';')).collect())
            .collect())
    }

    /// Encode compression bit 0 into a single options byte.
    fn encode_write_options(compress: bool) -> [u8; 1] {
        [compress as u8]
    }

    fn decode_write_options(byte: u8) -> bool {
        byte != 0
    }

    /// Persist a detail's arbitrary payload and fill in its key.
    pub fn put_detail_record(&self, mut detail: ActivityDetailRecord) -> Result<ActivityDetailRecord> {
        let payload = detail.to_bytes()?;
        let compress = self.compress_details && payload.len() as u64 >= self.compress_min_bytes;

        let body = if compress {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&payload)?;
            encoder.finish()?
        } else {
            payload
        };

        let mut record = Self::encode_write_options(compress).to_vec();
        record.extend(body);

        detail.key = Some(self.detail_store.put(&record)?);
        Ok(detail)
    }

    /// Fetch a detail record's payload back from the detail store.
    pub fn get_detail_record(&self, detail_key: &str) -> Result<ActivityDetailRecord> {
        let framed = self.detail_store.get(detail_key)?;
        let bytes = framed
            .get(labbook_detail_store::HEADER_LEN..)
            .context("detail record shorter than its own header")?;
        if bytes.is_empty() {
            bail!("empty detail record for key {detail_key}");
        }
        let compress = Self::decode_write_options(bytes[0]);
        let body = &bytes[1..];

        let data = if compress {
            let mut decoder = GzDecoder::new(body);
            let mut decompressed = Vec::new();
            decoder.read_to_end(&mut decompressed)?;
            ActivityDetailRecord::from_bytes(&decompressed)?
        } else {
            ActivityDetailRecord::from_bytes(body)?
        };

        Ok(ActivityDetailRecord {
            detail_type: None,
            key: Some(detail_key.to_string()),
            show: true,
            importance: None,
            data,
        })
    }

    /// Persist every detail, stage the detail store directory, and commit
    /// the record's rendered log string.
    pub fn create_activity_record(
        &self,
        mut record: ActivityRecord,
        author: Option<&GitAuthor>,
    ) -> Result<ActivityRecord> {
        if record.linked_commit.is_none() {
            record.linked_commit = Some(generate_linked_commit_id());
        }

        let mut persisted = Vec::with_capacity(record.detail_objects.len());
        for detail in record.detail_objects.drain(..) {
            persisted.push(self.put_detail_record(detail)?);
        }
        record.detail_objects = persisted;

        self.repo.add_all()?;
        let log_str = record.log_str()?;
        let commit_hash = self.repo.commit(&log_str, author, None)?;
        record.linked_commit = Some(commit_hash);

        Ok(record)
    }

    /// Fetch a single activity record by the commit hash it is linked to.
    pub fn get_activity_record(&self, commit: &str) -> Result<ActivityRecord> {
        let entry = self.repo.log_entry(commit)?;
        let note = note_regex()
            .find(&entry.message)
            .with_context(|| format!("activity data not found in commit {commit}"))?;
        let mut record = ActivityRecord::from_log_str(note.as_str())?;
        record.linked_commit = Some(entry.hash);
        record.committed_on = Some(entry.committed_on);
        Ok(record)
    }

    /// Page through activity records, most recent first. `after` pages
    /// past (but excludes) the named commit; `first` caps the page size.
    pub fn get_activity_records(&self, after: Option<&str>, first: Option<usize>) -> Result<Vec<ActivityRecord>> {
        // Roughly 2 commits per user activity (user change + our bookkeeping
        // commit); over-fetch to (first*2)+5 and trim after filtering.
        let max_count = first.map(|first| (first * 2) + 5);

        let log = self.repo.log(None, max_count)?;
        let mut matching = Vec::new();
        for entry in log {
            if let Some(note) = note_regex().find(&entry.message) {
                let mut record = ActivityRecord::from_log_str(note.as_str())?;
                record.linked_commit = Some(entry.hash.clone());
                record.committed_on = Some(entry.committed_on);
                matching.push((entry.hash, record));
            }
        }

        if let Some(after) = after {
            if let Some(pos) = matching.iter().position(|(hash, _)| hash == after) {
                matching.drain(0..=pos);
            }
        }

        if let Some(first) = first {
            matching.truncate(first);
        }

        Ok(matching.into_iter().map(|(_, record)| record).collect())
    }
}

fn generate_linked_commit_id() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> ActivityRecord {
        let mut record = ActivityRecord::new(ActivityType::Code, "Executed 3 cells");
        record.tags = vec!["python".to_string()];
        let mut detail = ActivityDetailRecord::new(ActivityDetailType::CodeExecuted, true, Some(128));
        detail.key = Some("detail_log-abcdef012AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA==".to_string());
        record.add_detail_object(detail);
        record
    }

    #[test]
    fn log_str_round_trips_through_from_log_str() {
        let record = sample_record();
        let rendered = record.log_str().unwrap();
        assert!(rendered.starts_with(START_SENTINEL));
        assert!(rendered.ends_with(END_SENTINEL));

        let parsed = ActivityRecord::from_log_str(&rendered).unwrap();
        assert_eq!(parsed.message, record.message);
        assert_eq!(parsed.activity_type.as_u8(), record.activity_type.as_u8());
        assert_eq!(parsed.tags, record.tags);
        assert_eq!(parsed.detail_objects.len(), 1);
        assert_eq!(
            parsed.detail_objects[0].key,
            record.detail_objects[0].key
        );
    }

    #[test]
    fn log_str_with_no_details_still_parses() {
        let record = ActivityRecord::new(ActivityType::Note, "just a note");
        let rendered = record.log_str().unwrap();
        let parsed = ActivityRecord::from_log_str(&rendered).unwrap();
        assert!(parsed.detail_objects.is_empty());
    }

    #[test]
    fn detail_log_str_round_trips_with_no_importance() {
        let mut detail = ActivityDetailRecord::new(ActivityDetailType::Result, false, None);
        detail.key = Some("key123".to_string());
        let line = detail.log_str().unwrap();
        assert_eq!(line, "1,0,None,key123");

        let parsed = ActivityDetailRecord::from_log_str(&line).unwrap();
        assert_eq!(parsed.importance, None);
        assert!(!parsed.show);
    }

    #[test]
    fn validate_tags_dedups_and_strips_disallowed_characters() {
        let tags = vec!["a".to_string(), "a".to_string(), "b`;\\".to_string()];
        let mut validated = ActivityStore::validate_tags(&tags).unwrap();
        validated.sort();
        assert_eq!(validated, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn validate_tags_rejects_too_many_tags() {
        let tags: Vec<String> = (0..MAX_NUM_TAGS + 1).map(|i| format!("tag{i}")).collect();
        assert!(ActivityStore::validate_tags(&tags).is_err());
    }

    #[test]
    fn validate_tags_rejects_overlong_tag() {
        let tags = vec!["x".repeat(MAX_TAG_LENGTH + 1)];
        assert!(ActivityStore::validate_tags(&tags).is_err());
    }

    #[test]
    fn note_regex_extracts_embedded_activity_record_from_commit_message() {
        let record = sample_record();
        let rendered = record.log_str().unwrap();
        let wrapped = format!("Creating new empty LabBook: foo\n\n{rendered}");
        let found = note_regex().find(&wrapped).unwrap();
        assert_eq!(found.as_str(), rendered);
    }
}
