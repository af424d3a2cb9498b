//! Dispatcher (C7): an allow-listed background task registry and queue.
//!
//! Grounded in `original_source/lmcommon/dispatcher/dispatcher.py`. Tasks are
//! executed by worker processes elsewhere; this module only owns the
//! coordinator-backed queue/status state, per spec.md §4.7's "the core must
//! not assume in-process execution".

use std::collections::HashSet;
use std::sync::Arc;

use labbook_coordinator::Coordinator;
use labbook_types::ErrorKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const JOB_PREFIX: &str = "job:";

fn job_key_for(id: &str) -> String {
    format!("{JOB_PREFIX}{id}")
}

/// Where a dispatched job currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Started,
    Finished,
    Failed,
    /// Waiting on a `dependent_job`; stays deferred forever if that job fails.
    Deferred,
}

/// A recurring or one-shot schedule (`repeat=0` means fire once).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Schedule {
    pub scheduled_time: Option<chrono::DateTime<chrono::Utc>>,
    pub interval: Option<std::time::Duration>,
    pub repeat: u32,
}

/// Persisted state for one dispatched task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub fn_name: String,
    pub args: Vec<Value>,
    pub kwargs: serde_json::Map<String, Value>,
    pub meta: serde_json::Map<String, Value>,
    pub status: JobStatus,
    pub result: Option<Value>,
    pub failure_message: Option<String>,
    pub dependent_job: Option<String>,
    pub schedule: Option<Schedule>,
}

/// Task registry and coordinator-backed job queue.
pub struct Dispatcher<C: Coordinator> {
    coordinator: Arc<C>,
    allowed_tasks: HashSet<String>,
}

impl<C: Coordinator> Dispatcher<C> {
    pub fn new(coordinator: Arc<C>, allowed_tasks: impl IntoIterator<Item = String>) -> Self {
        Self {
            coordinator,
            allowed_tasks: allowed_tasks.into_iter().collect(),
        }
    }

    fn require_allowed(&self, fn_name: &str) -> Result<(), ErrorKind> {
        if !self.allowed_tasks.contains(fn_name) {
            return Err(ErrorKind::validation(format!(
                "'{fn_name}' is not registered as a dispatchable task"
            )));
        }
        Ok(())
    }

    fn save(&self, job_key: &str, record: &JobRecord) -> Result<(), ErrorKind> {
        let value = serde_json::to_string(record)
            .map_err(|e| ErrorKind::internal(format!("serializing job record: {e}")))?;
        self.coordinator
            .set(job_key, &value)
            .map_err(|e| ErrorKind::internal(format!("writing job record: {e}")))
    }

    fn load(&self, job_key: &str) -> Result<JobRecord, ErrorKind> {
        let raw = self
            .coordinator
            .get(job_key)
            .map_err(|e| ErrorKind::internal(format!("reading job record: {e}")))?
            .ok_or_else(|| ErrorKind::not_found(format!("no job at {job_key}")))?;
        serde_json::from_str(&raw).map_err(|e| ErrorKind::internal(format!("parsing job record: {e}")))
    }

    /// Queue `fn_name` to run. Rejects tasks not in the allow-list. If a
    /// `dependent_job` is set and not yet `Finished`, the new job starts
    /// life as `Deferred` rather than `Queued`.
    pub fn dispatch_task(
        &self,
        fn_name: &str,
        args: Vec<Value>,
        kwargs: serde_json::Map<String, Value>,
        meta: Option<serde_json::Map<String, Value>>,
        dependent_job: Option<&str>,
    ) -> Result<String, ErrorKind> {
        self.require_allowed(fn_name)?;

        let status = match dependent_job {
            Some(dep) => {
                let dep_key = job_key_for(dep);
                match self.load(&dep_key) {
                    Ok(record) if record.status == JobStatus::Finished => JobStatus::Queued,
                    _ => JobStatus::Deferred,
                }
            }
            None => JobStatus::Queued,
        };

        let id = random_id();
        let job_key = job_key_for(&id);
        let record = JobRecord {
            fn_name: fn_name.to_string(),
            args,
            kwargs,
            meta: meta.unwrap_or_default(),
            status,
            result: None,
            failure_message: None,
            dependent_job: dependent_job.map(str::to_string),
            schedule: None,
        };
        self.save(&job_key, &record)?;
        Ok(id)
    }

    /// Queue a recurring or one-shot task, per `schedule`.
    pub fn schedule_task(&self, fn_name: &str, schedule: Schedule) -> Result<String, ErrorKind> {
        self.require_allowed(fn_name)?;

        let id = random_id();
        let job_key = job_key_for(&id);
        let record = JobRecord {
            fn_name: fn_name.to_string(),
            args: Vec::new(),
            kwargs: serde_json::Map::new(),
            meta: serde_json::Map::new(),
            status: JobStatus::Queued,
            result: None,
            failure_message: None,
            dependent_job: None,
            schedule: Some(schedule),
        };
        self.save(&job_key, &record)?;
        Ok(id)
    }

    /// Remove a scheduled job. Idempotent: returns whether it was found.
    pub fn unschedule(&self, job_id: &str) -> Result<bool, ErrorKind> {
        let job_key = job_key_for(job_id);
        let existed = self
            .coordinator
            .get(&job_key)
            .map_err(|e| ErrorKind::internal(format!("checking job before unschedule: {e}")))?
            .is_some();
        if existed {
            self.coordinator
                .delete(&job_key)
                .map_err(|e| ErrorKind::internal(format!("deleting scheduled job: {e}")))?;
        }
        Ok(existed)
    }

    pub fn query_task(&self, job_id: &str) -> Result<JobRecord, ErrorKind> {
        self.load(&job_key_for(job_id))
    }

    pub fn mark_started(&self, job_id: &str) -> Result<(), ErrorKind> {
        let job_key = job_key_for(job_id);
        let mut record = self.load(&job_key)?;
        record.status = JobStatus::Started;
        self.save(&job_key, &record)
    }

    pub fn mark_finished(&self, job_id: &str, result: Value) -> Result<(), ErrorKind> {
        let job_key = job_key_for(job_id);
        let mut record = self.load(&job_key)?;
        record.status = JobStatus::Finished;
        record.result = Some(result);
        self.save(&job_key, &record)?;
        self.promote_dependents_on(job_id)
    }

    /// Failure never auto-cancels dependents; they simply stay `Deferred`
    /// forever, per spec.md §4.7.
    pub fn mark_failed(&self, job_id: &str, failure_message: impl Into<String>) -> Result<(), ErrorKind> {
        let job_key = job_key_for(job_id);
        let mut record = self.load(&job_key)?;
        record.status = JobStatus::Failed;
        record.failure_message = Some(failure_message.into());
        self.save(&job_key, &record)
    }

    fn promote_dependents_on(&self, finished_job_id: &str) -> Result<(), ErrorKind> {
        for (job_key, record) in self.all_records()? {
            if record.status == JobStatus::Deferred && record.dependent_job.as_deref() == Some(finished_job_id) {
                let mut promoted = record;
                promoted.status = JobStatus::Queued;
                self.save(&job_key, &promoted)?;
            }
        }
        Ok(())
    }

    fn all_records(&self) -> Result<Vec<(String, JobRecord)>, ErrorKind> {
        let keys = self
            .coordinator
            .scan_prefix(JOB_PREFIX)
            .map_err(|e| ErrorKind::internal(format!("scanning jobs: {e}")))?;
        keys.into_iter()
            .map(|key| {
                let record = self.load(&key)?;
                Ok((key, record))
            })
            .collect()
    }

    pub fn all_jobs(&self) -> Result<Vec<JobRecord>, ErrorKind> {
        Ok(self.all_records()?.into_iter().map(|(_, r)| r).collect())
    }

    pub fn failed_jobs(&self) -> Result<Vec<JobRecord>, ErrorKind> {
        Ok(self
            .all_jobs()?
            .into_iter()
            .filter(|r| r.status == JobStatus::Failed)
            .collect())
    }

    pub fn finished_jobs(&self) -> Result<Vec<JobRecord>, ErrorKind> {
        Ok(self
            .all_jobs()?
            .into_iter()
            .filter(|r| r.status == JobStatus::Finished)
            .collect())
    }
}

fn random_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..16)
        .map(|_| {
            const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
            CHARS[rng.r#gen::<usize>() % CHARS.len()] as char
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use labbook_coordinator::InMemoryCoordinator;

    use super::*;

    fn dispatcher() -> Dispatcher<InMemoryCoordinator> {
        Dispatcher::new(
            Arc::new(InMemoryCoordinator::new()),
            vec!["run_build".to_string(), "cleanup".to_string()],
        )
    }

    #[test]
    fn dispatch_rejects_unregistered_tasks() {
        let d = dispatcher();
        let err = d
            .dispatch_task("not_registered", vec![], serde_json::Map::new(), None, None)
            .unwrap_err();
        assert!(matches!(err, ErrorKind::Validation(_)));
    }

    #[test]
    fn dispatch_then_query_round_trips() {
        let d = dispatcher();
        let id = d
            .dispatch_task("run_build", vec![], serde_json::Map::new(), None, None)
            .unwrap();
        let record = d.query_task(&id).unwrap();
        assert_eq!(record.status, JobStatus::Queued);
    }

    #[test]
    fn dependent_job_starts_deferred_and_promotes_on_finish() {
        let d = dispatcher();
        let dep = d
            .dispatch_task("run_build", vec![], serde_json::Map::new(), None, None)
            .unwrap();
        let dependent = d
            .dispatch_task("cleanup", vec![], serde_json::Map::new(), None, Some(&dep))
            .unwrap();

        assert_eq!(d.query_task(&dependent).unwrap().status, JobStatus::Deferred);

        d.mark_finished(&dep, Value::Null).unwrap();
        assert_eq!(d.query_task(&dependent).unwrap().status, JobStatus::Queued);
    }

    #[test]
    fn dependent_job_stays_deferred_forever_if_dependency_fails() {
        let d = dispatcher();
        let dep = d
            .dispatch_task("run_build", vec![], serde_json::Map::new(), None, None)
            .unwrap();
        let dependent = d
            .dispatch_task("cleanup", vec![], serde_json::Map::new(), None, Some(&dep))
            .unwrap();

        d.mark_failed(&dep, "boom").unwrap();
        assert_eq!(d.query_task(&dependent).unwrap().status, JobStatus::Deferred);
    }

    #[test]
    fn unschedule_is_idempotent() {
        let d = dispatcher();
        let id = d.schedule_task("run_build", Schedule::default()).unwrap();
        assert!(d.unschedule(&id).unwrap());
        assert!(!d.unschedule(&id).unwrap());
    }

    #[test]
    fn failed_and_finished_jobs_are_filtered_correctly() {
        let d = dispatcher();
        let a = d
            .dispatch_task("run_build", vec![], serde_json::Map::new(), None, None)
            .unwrap();
        let b = d
            .dispatch_task("cleanup", vec![], serde_json::Map::new(), None, None)
            .unwrap();
        d.mark_finished(&a, Value::Null).unwrap();
        d.mark_failed(&b, "oops").unwrap();

        assert_eq!(d.finished_jobs().unwrap().len(), 1);
        assert_eq!(d.failed_jobs().unwrap().len(), 1);
        assert_eq!(d.all_jobs().unwrap().len(), 2);
    }
}
