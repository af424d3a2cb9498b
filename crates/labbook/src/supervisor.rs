//! Monitor Supervisor (C6): reconciles live kernel sessions against the
//! coordinator's activity-monitor keys, dispatching new monitors and
//! cooperatively stopping stale ones.
//!
//! Grounded in `original_source/lmcommon/activity/monitors/
//! monitor_jupyterlab.py`'s `JupyterLabMonitor.get_sessions`/`run`
//! session-reconcile loop; the dispatch/shutdown half follows spec.md
//! §4.6's own description directly.

use std::sync::Arc;

use labbook_coordinator::Coordinator;
use labbook_types::{ErrorKind, activity_monitor_key, dev_env_monitor_key, LabBookKey};
use serde::{Deserialize, Serialize};

use crate::dispatcher::Dispatcher;

/// One kernel session as reported by a dev-env's own API (e.g. JupyterLab's
/// kernel listing). Supplied by the caller; C6 does not talk to dev-envs
/// directly.
#[derive(Debug, Clone)]
pub struct KernelSession {
    pub kernel_id: String,
    pub process_id: Option<u32>,
}

/// State persisted at `<devenv-key>:activity_monitor:<kernel-id>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorRecord {
    pub kernel_id: String,
    pub process_id: Option<u32>,
    pub run: bool,
    pub monitor_job: Option<String>,
}

/// Reconciles coordinator-tracked monitors against a live kernel session
/// list for one LabBook/dev-env pair.
pub struct MonitorSupervisor<C: Coordinator> {
    coordinator: Arc<C>,
}

impl<C: Coordinator> MonitorSupervisor<C> {
    pub fn new(coordinator: Arc<C>) -> Self {
        Self { coordinator }
    }

    fn load(&self, key: &str) -> Result<Option<MonitorRecord>, ErrorKind> {
        let raw = self
            .coordinator
            .get(key)
            .map_err(|e| ErrorKind::internal(format!("reading monitor record: {e}")))?;
        raw.map(|raw| {
            serde_json::from_str(&raw).map_err(|e| ErrorKind::internal(format!("parsing monitor record: {e}")))
        })
        .transpose()
    }

    fn save(&self, key: &str, record: &MonitorRecord) -> Result<(), ErrorKind> {
        let value = serde_json::to_string(record)
            .map_err(|e| ErrorKind::internal(format!("serializing monitor record: {e}")))?;
        self.coordinator
            .set(key, &value)
            .map_err(|e| ErrorKind::internal(format!("writing monitor record: {e}")))
    }

    /// One reconciliation pass. Returns the number of monitors started and
    /// stopped, for callers to log.
    pub fn reconcile(
        &self,
        labbook: &LabBookKey,
        devenv: &str,
        live_kernels: &[KernelSession],
        dispatcher: &Dispatcher<C>,
        monitor_task: &str,
    ) -> Result<(usize, usize), ErrorKind> {
        let devenv_key = dev_env_monitor_key(labbook, devenv);

        let mut started = 0;
        let mut stopped = 0;

        let known_keys = self
            .coordinator
            .scan_prefix(&format!("{devenv_key}:activity_monitor:"))
            .map_err(|e| ErrorKind::internal(format!("scanning monitor keys: {e}")))?;

        for key in &known_keys {
            let Some(mut record) = self.load(key)? else {
                continue;
            };
            let still_live = live_kernels.iter().any(|k| k.kernel_id == record.kernel_id);
            if !still_live && record.run {
                record.run = false;
                self.save(key, &record)?;
                stopped += 1;
            }
        }

        for kernel in live_kernels {
            let key = activity_monitor_key(&devenv_key, &kernel.kernel_id);
            if self.load(&key)?.is_some() {
                continue;
            }

            let job_id = dispatcher.dispatch_task(
                monitor_task,
                vec![serde_json::json!(kernel.kernel_id)],
                serde_json::Map::new(),
                None,
                None,
            )?;

            self.save(
                &key,
                &MonitorRecord {
                    kernel_id: kernel.kernel_id.clone(),
                    process_id: kernel.process_id,
                    run: true,
                    monitor_job: Some(job_id),
                },
            )?;
            started += 1;
        }

        Ok((started, stopped))
    }

    /// Stop every monitor for this LabBook/dev-env pair and forget them.
    /// Called on LabBook shutdown; does not unschedule the supervisor's own
    /// recurring job, which is the caller's responsibility via
    /// [`Dispatcher::unschedule`].
    pub fn shutdown(&self, labbook: &LabBookKey, devenv: &str) -> Result<usize, ErrorKind> {
        let devenv_key = dev_env_monitor_key(labbook, devenv);
        let keys = self
            .coordinator
            .scan_prefix(&format!("{devenv_key}:activity_monitor:"))
            .map_err(|e| ErrorKind::internal(format!("scanning monitor keys: {e}")))?;

        let mut stopped = 0;
        for key in &keys {
            if let Some(mut record) = self.load(key)? {
                if record.run {
                    record.run = false;
                    self.save(key, &record)?;
                    stopped += 1;
                }
            }
        }
        Ok(stopped)
    }
}
