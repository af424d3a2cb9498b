//! Activity Monitor Pipeline (C5): turns a stream of raw kernel events into
//! an [`ActivityRecord`] every `busy → idle` cycle.
//!
//! Grounded in `original_source/lmcommon/activity/monitors/monitor_jupyterlab.py`
//! (`JupyterLabNotebookMonitor::handle_message`'s busy/idle state machine)
//! and `original_source/lmcommon/activity/processors/*.py`. The original
//! stops a processing cycle by raising `StopProcessingException`; here a
//! processor returns a tagged [`ProcessorSignal`] instead, matching spec.md
//! §9's guidance to prefer an explicit control-flow value over exceptions.

use std::collections::HashMap;

use anyhow::Result;
use labbook_git::{RepoStatus, Repository};
use labbook_types::{ActivityAction, ActivityDetailType, ActivityType};
use serde_json::Value;

use crate::activity::{ActivityDetailRecord, ActivityRecord, ActivityStore};

const PLAINTEXT_RESULT_LIMIT: usize = 64_000;
const TRUNCATION_MARKER: &str = "\n... [truncated]";
const SHOW_LENGTH_THRESHOLD: usize = 280;

const IMAGE_MIME_TYPES: &[&str] = &["image/png", "image/jpeg", "image/jpg", "image/gif", "image/bmp"];

/// Execution state the pipeline tracks between kernel events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Busy,
    Idle,
}

/// One raw event read from the kernel's IOPub-style channel.
#[derive(Debug, Clone)]
pub enum KernelEvent {
    Status {
        execution_state: ExecutionState,
    },
    ExecuteInput {
        code: String,
        execution_count: u64,
    },
    ExecuteResult {
        data: HashMap<String, Value>,
        metadata: HashMap<String, Value>,
        execution_count: u64,
    },
    Stream {
        text: String,
    },
    /// A kernel execution error (IOPub `error` message: `ename`/`evalue`).
    /// Marks the in-progress cycle so it finalizes into no record at all.
    Error {
        ename: String,
        evalue: String,
    },
    /// Any IOPub message type the pipeline does not act on.
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResultKind {
    ExecuteResult,
    Stream,
}

#[derive(Debug, Clone)]
struct ResultEntry {
    kind: ResultKind,
    data: HashMap<String, Value>,
    metadata: HashMap<String, Value>,
    execution_count: Option<u64>,
}

/// Accumulates events for one `busy` cycle.
#[derive(Debug, Clone, Default)]
struct AggregationBuffer {
    code: Option<(String, u64)>,
    results: Vec<ResultEntry>,
    errored: bool,
}

impl AggregationBuffer {
    fn is_empty(&self) -> bool {
        self.code.is_none() && self.results.is_empty() && !self.errored
    }
}

/// Context a processor chain shares across one cycle.
pub struct ProcessingContext<'a> {
    pub buffer_code: Option<&'a str>,
    pub execution_count: Option<u64>,
    pub results: &'a [ResultEntryView<'a>],
    pub status: &'a RepoStatus,
    /// Set when the cycle saw a kernel execution error; the cycle must
    /// finalize into no record at all (spec's `STOP_PROCESSING`).
    pub errored: bool,
}

/// Borrowed view of one accumulated result, handed to processors.
pub struct ResultEntryView<'a> {
    pub kind: ResultKind,
    pub data: &'a HashMap<String, Value>,
    pub metadata: &'a HashMap<String, Value>,
}

/// What a processor wants to happen to the cycle after it runs.
pub enum ProcessorSignal {
    Continue(ActivityRecord),
    Stop,
}

trait Processor {
    fn process(&self, record: ActivityRecord, ctx: &ProcessingContext) -> ProcessorSignal;
}

struct CodeExecutedProcessor;

impl Processor for CodeExecutedProcessor {
    fn process(&self, mut record: ActivityRecord, ctx: &ProcessingContext) -> ProcessorSignal {
        let Some(code) = ctx.buffer_code else {
            return ProcessorSignal::Continue(record);
        };
        if code.trim().is_empty() {
            return ProcessorSignal::Continue(record);
        }

        let cnt = ctx.execution_count.unwrap_or(0) as i32;
        let importance = (255 - cnt).max(0) as u8;
        let mut detail = ActivityDetailRecord::new(ActivityDetailType::CodeExecuted, false, Some(importance));
        if detail
            .add_value("text/markdown", Value::String(format!("```python\n{code}\n```")))
            .is_err()
        {
            return ProcessorSignal::Stop;
        }
        record.add_detail_object(detail);
        record.message = format!(
            "Executed {} in notebook",
            if ctx.execution_count.map(|c| c > 1).unwrap_or(false) {
                "cells".to_string()
            } else {
                "cell".to_string()
            }
        );
        ProcessorSignal::Continue(record)
    }
}

struct FileChangeProcessor;

impl FileChangeProcessor {
    fn classify(path: &str) -> (&'static str, ActivityDetailType) {
        if path.starts_with("code/") {
            ("code", ActivityDetailType::Code)
        } else if path.starts_with("input/") {
            ("input", ActivityDetailType::InputData)
        } else if path.starts_with("output/") {
            ("output", ActivityDetailType::OutputData)
        } else {
            ("LabBook Root", ActivityDetailType::Environment)
        }
    }

    fn action_for(kind: labbook_git::FileStatus) -> ActivityAction {
        match kind {
            labbook_git::FileStatus::Deleted => ActivityAction::Delete,
            labbook_git::FileStatus::New => ActivityAction::Create,
            labbook_git::FileStatus::Modified | labbook_git::FileStatus::Renamed => ActivityAction::Edit,
        }
    }
}

impl Processor for FileChangeProcessor {
    fn process(&self, mut record: ActivityRecord, ctx: &ProcessingContext) -> ProcessorSignal {
        let mut changes: Vec<(String, ActivityAction)> = Vec::new();
        for path in &ctx.status.untracked {
            if path.contains(".git") || path.contains(".gigantum") {
                continue;
            }
            changes.push((path.clone(), ActivityAction::Create));
        }
        for (path, kind) in &ctx.status.unstaged {
            if path.contains(".git") || path.contains(".gigantum") {
                continue;
            }
            changes.push((path.clone(), Self::action_for(*kind)));
        }

        for (path, action) in changes {
            let (label, detail_type) = Self::classify(&path);
            let mut detail = ActivityDetailRecord::new(detail_type, false, None);
            let markdown = format!("**{label}**: `{path}` was {action:?}");
            if detail.add_value("text/markdown", Value::String(markdown)).is_err() {
                continue;
            }
            record.add_detail_object(detail);
        }
        ProcessorSignal::Continue(record)
    }
}

struct PlaintextResultProcessor;

impl Processor for PlaintextResultProcessor {
    fn process(&self, mut record: ActivityRecord, ctx: &ProcessingContext) -> ProcessorSignal {
        for result in ctx.results {
            if result
                .metadata
                .get("source")
                .and_then(Value::as_str)
                .map(|s| s == "display_data")
                .unwrap_or(false)
            {
                continue;
            }
            let Some(text) = result.data.get("text/plain").and_then(Value::as_str) else {
                continue;
            };

            let (body, truncated) = if text.len() > PLAINTEXT_RESULT_LIMIT {
                (&text[..PLAINTEXT_RESULT_LIMIT], true)
            } else {
                (text, false)
            };
            let mut rendered = body.to_string();
            if truncated {
                rendered.push_str(TRUNCATION_MARKER);
            }

            let show = rendered.len() < SHOW_LENGTH_THRESHOLD;
            let mut detail = ActivityDetailRecord::new(ActivityDetailType::Result, show, None);
            if detail
                .add_value("text/plain", Value::String(rendered))
                .is_err()
            {
                continue;
            }
            record.add_detail_object(detail);
        }
        ProcessorSignal::Continue(record)
    }
}

struct ImageExtractorProcessor;

impl Processor for ImageExtractorProcessor {
    fn process(&self, mut record: ActivityRecord, ctx: &ProcessingContext) -> ProcessorSignal {
        for result in ctx.results {
            for mime in IMAGE_MIME_TYPES {
                let Some(value) = result.data.get(*mime) else {
                    continue;
                };
                let mut detail = ActivityDetailRecord::new(ActivityDetailType::Result, true, None);
                if detail.add_value(*mime, value.clone()).is_err() {
                    continue;
                }
                record.add_detail_object(detail);
                record.message = "A result was generated".to_string();
            }
        }
        ProcessorSignal::Continue(record)
    }
}

struct ShowBasicProcessor;

impl Processor for ShowBasicProcessor {
    fn process(&self, mut record: ActivityRecord, _ctx: &ProcessingContext) -> ProcessorSignal {
        record.show = record
            .detail_objects
            .iter()
            .any(|d| d.detail_type != Some(ActivityDetailType::CodeExecuted) && d.show);
        ProcessorSignal::Continue(record)
    }
}

fn ordered_processors() -> Vec<Box<dyn Processor>> {
    vec![
        Box::new(CodeExecutedProcessor),
        Box::new(FileChangeProcessor),
        Box::new(PlaintextResultProcessor),
        Box::new(ImageExtractorProcessor),
        Box::new(ShowBasicProcessor),
    ]
}

/// Consumes a kernel event stream, accumulating a per-cycle buffer and
/// finalizing into an activity record on `busy → idle`.
pub struct ActivityMonitor {
    state: ExecutionState,
    buffer: AggregationBuffer,
}

impl Default for ActivityMonitor {
    fn default() -> Self {
        Self {
            state: ExecutionState::Idle,
            buffer: AggregationBuffer::default(),
        }
    }
}

impl ActivityMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ExecutionState {
        self.state
    }

    /// Feed one kernel event. Returns `Some(record)` on a cycle that
    /// finalized into a commit, `None` otherwise (still busy, processors
    /// stopped the cycle, or the buffer was empty).
    pub fn handle_event(
        &mut self,
        event: KernelEvent,
        repo: &Repository,
        activity_store: &ActivityStore,
    ) -> Result<Option<ActivityRecord>> {
        match event {
            KernelEvent::Status { execution_state: ExecutionState::Busy } => {
                self.state = ExecutionState::Busy;
                self.buffer = AggregationBuffer::default();
                Ok(None)
            }
            KernelEvent::Status { execution_state: ExecutionState::Idle } => {
                if self.state != ExecutionState::Busy {
                    return Ok(None);
                }
                self.state = ExecutionState::Idle;
                let result = self.finalize(repo, activity_store)?;
                self.buffer = AggregationBuffer::default();
                Ok(result)
            }
            KernelEvent::ExecuteInput { code, execution_count } => {
                if let Some((_, prev_count)) = &self.buffer.code {
                    if *prev_count != execution_count {
                        tracing::warn!(
                            prev_count,
                            execution_count,
                            "execute_input count mismatch within one busy cycle"
                        );
                    }
                }
                self.buffer.code = Some((code, execution_count));
                Ok(None)
            }
            KernelEvent::ExecuteResult { data, metadata, execution_count } => {
                self.buffer.results.push(ResultEntry {
                    kind: ResultKind::ExecuteResult,
                    data,
                    metadata,
                    execution_count: Some(execution_count),
                });
                Ok(None)
            }
            KernelEvent::Stream { text } => {
                let mut data = HashMap::new();
                data.insert("text/plain".to_string(), Value::String(text));
                self.buffer.results.push(ResultEntry {
                    kind: ResultKind::Stream,
                    data,
                    metadata: HashMap::new(),
                    execution_count: None,
                });
                Ok(None)
            }
            KernelEvent::Error { ename, evalue } => {
                tracing::debug!(ename, evalue, "kernel execution error, cycle will produce no record");
                self.buffer.errored = true;
                Ok(None)
            }
            KernelEvent::Other => Ok(None),
        }
    }

    /// Run the ordered processor chain, sweep-commit, and persist via C2.
    /// Idempotent if the buffer is empty or a processor stops the cycle.
    fn finalize(&self, repo: &Repository, activity_store: &ActivityStore) -> Result<Option<ActivityRecord>> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        if self.buffer.errored {
            // STOP_PROCESSING equivalent: an errored cell commits nothing.
            return Ok(None);
        }

        let status = repo.status()?;
        let result_views: Vec<ResultEntryView> = self
            .buffer
            .results
            .iter()
            .map(|r| ResultEntryView {
                kind: r.kind,
                data: &r.data,
                metadata: &r.metadata,
            })
            .collect();
        let ctx = ProcessingContext {
            buffer_code: self.buffer.code.as_ref().map(|(code, _)| code.as_str()),
            execution_count: self.buffer.code.as_ref().map(|(_, count)| *count),
            results: &result_views,
            status: &status,
            errored: self.buffer.errored,
        };

        let mut record = ActivityRecord::new(ActivityType::Code, "Notebook cell executed");
        for processor in ordered_processors() {
            match processor.process(record, &ctx) {
                ProcessorSignal::Continue(updated) => record = updated,
                ProcessorSignal::Stop => return Ok(None),
            }
        }

        if !status.staged.is_empty() || !status.unstaged.is_empty() || !status.untracked.is_empty() {
            repo.add_all()?;
            repo.commit("Auto-commit on activity monitor cycle", None, None)?;
        }

        let persisted = activity_store.create_activity_record(record, None)?;
        Ok(Some(persisted))
    }
}

#[cfg(test)]
mod tests {
    use labbook_detail_store::DetailStore;
    use tempfile::tempdir;

    use super::*;

    fn repo_with_store(root: &std::path::Path) -> (Repository, DetailStore) {
        let repo = Repository::at(root);
        repo.initialize().unwrap();
        std::fs::write(root.join("README.md"), "hi").unwrap();
        repo.add_all().unwrap();
        repo.commit("initial", None, None).unwrap();
        let store = DetailStore::new(root.join(".gigantum"), "abcdef012").unwrap();
        (repo, store)
    }

    #[test]
    fn busy_then_idle_with_code_produces_a_record() {
        let td = tempdir().unwrap();
        let (repo, store) = repo_with_store(td.path());
        let activity_store = ActivityStore::new(&repo, &store, false, 0);
        let mut monitor = ActivityMonitor::new();

        monitor
            .handle_event(
                KernelEvent::Status { execution_state: ExecutionState::Busy },
                &repo,
                &activity_store,
            )
            .unwrap();
        assert_eq!(monitor.state(), ExecutionState::Busy);

        monitor
            .handle_event(
                KernelEvent::ExecuteInput { code: "print(1)".to_string(), execution_count: 1 },
                &repo,
                &activity_store,
            )
            .unwrap();

        std::fs::write(td.path().join("note.txt"), "new file").unwrap();

        let record = monitor
            .handle_event(
                KernelEvent::Status { execution_state: ExecutionState::Idle },
                &repo,
                &activity_store,
            )
            .unwrap();

        let record = record.expect("cycle should finalize into a record");
        assert!(!record.detail_objects.is_empty());
        assert_eq!(monitor.state(), ExecutionState::Idle);
    }

    #[test]
    fn errored_cell_produces_no_record() {
        let td = tempdir().unwrap();
        let (repo, store) = repo_with_store(td.path());
        let activity_store = ActivityStore::new(&repo, &store, false, 0);
        let mut monitor = ActivityMonitor::new();

        monitor
            .handle_event(
                KernelEvent::Status { execution_state: ExecutionState::Busy },
                &repo,
                &activity_store,
            )
            .unwrap();

        monitor
            .handle_event(
                KernelEvent::ExecuteInput { code: "1/0".to_string(), execution_count: 1 },
                &repo,
                &activity_store,
            )
            .unwrap();

        monitor
            .handle_event(
                KernelEvent::Error { ename: "ZeroDivisionError".to_string(), evalue: "division by zero".to_string() },
                &repo,
                &activity_store,
            )
            .unwrap();

        let record = monitor
            .handle_event(
                KernelEvent::Status { execution_state: ExecutionState::Idle },
                &repo,
                &activity_store,
            )
            .unwrap();

        assert!(record.is_none());
    }

    #[test]
    fn idle_to_idle_with_empty_buffer_is_idempotent() {
        let td = tempdir().unwrap();
        let (repo, store) = repo_with_store(td.path());
        let activity_store = ActivityStore::new(&repo, &store, false, 0);
        let mut monitor = ActivityMonitor::new();

        let record = monitor
            .handle_event(
                KernelEvent::Status { execution_state: ExecutionState::Idle },
                &repo,
                &activity_store,
            )
            .unwrap();
        assert!(record.is_none());
    }

    #[test]
    fn plaintext_result_over_threshold_is_not_shown() {
        let mut data = HashMap::new();
        data.insert("text/plain".to_string(), Value::String("x".repeat(300)));
        let result = ResultEntryView { kind: ResultKind::ExecuteResult, data: &data, metadata: &HashMap::new() };
        let status = RepoStatus::default();
        let ctx = ProcessingContext { buffer_code: None, execution_count: None, results: &[result], status: &status, errored: false };

        let record = ActivityRecord::new(ActivityType::Code, "placeholder");
        let ProcessorSignal::Continue(record) = PlaintextResultProcessor.process(record, &ctx) else {
            panic!("plaintext processor never stops a cycle");
        };
        assert_eq!(record.detail_objects.len(), 1);
        assert!(!record.detail_objects[0].show);
    }

    #[test]
    fn plaintext_result_truncates_past_the_byte_limit() {
        let mut data = HashMap::new();
        data.insert(
            "text/plain".to_string(),
            Value::String("a".repeat(PLAINTEXT_RESULT_LIMIT + 10)),
        );
        let result = ResultEntryView { kind: ResultKind::Stream, data: &data, metadata: &HashMap::new() };
        let status = RepoStatus::default();
        let ctx = ProcessingContext { buffer_code: None, execution_count: None, results: &[result], status: &status, errored: false };

        let record = ActivityRecord::new(ActivityType::Code, "placeholder");
        let ProcessorSignal::Continue(record) = PlaintextResultProcessor.process(record, &ctx) else {
            panic!("plaintext processor never stops a cycle");
        };
        let detail = &record.detail_objects[0];
        let rendered = detail.data.get("text/plain").unwrap().as_str().unwrap();
        assert!(rendered.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn image_result_overrides_the_record_message() {
        let mut data = HashMap::new();
        data.insert("image/png".to_string(), Value::String("base64...".to_string()));
        let result = ResultEntryView { kind: ResultKind::ExecuteResult, data: &data, metadata: &HashMap::new() };
        let status = RepoStatus::default();
        let ctx = ProcessingContext { buffer_code: None, execution_count: None, results: &[result], status: &status, errored: false };

        let record = ActivityRecord::new(ActivityType::Code, "placeholder");
        let ProcessorSignal::Continue(record) = ImageExtractorProcessor.process(record, &ctx) else {
            panic!("image processor never stops a cycle");
        };
        assert_eq!(record.message, "A result was generated");
        assert!(record.detail_objects[0].show);
    }

    #[test]
    fn show_basic_processor_sets_show_from_non_code_details() {
        let status = RepoStatus::default();
        let ctx = ProcessingContext { buffer_code: None, execution_count: None, results: &[], status: &status, errored: false };
        let mut record = ActivityRecord::new(ActivityType::Code, "placeholder");
        record.show = false;
        record.add_detail_object(ActivityDetailRecord::new(ActivityDetailType::Result, true, None));

        let ProcessorSignal::Continue(record) = ShowBasicProcessor.process(record, &ctx) else {
            panic!("show-basic processor never stops a cycle");
        };
        assert!(record.show);
    }
}
