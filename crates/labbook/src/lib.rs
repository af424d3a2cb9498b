//! LabBook: a version-controlled project container capturing the lineage of
//! interactive computational work.
//!
//! The crate mirrors the module split of spec.md §4's component design: a
//! git-backed [`labbook::LabBook`] (C4) orchestrates a rotating
//! [`labbook_detail_store::DetailStore`] (C1) and the [`activity`] journal
//! (C2) atop a [`labbook_git::Repository`] (C3), while [`lock`] and
//! [`portmap`] (C8), [`monitor`] (C5), [`supervisor`] (C6), and
//! [`dispatcher`] (C7) provide the surrounding concurrency and scheduling
//! machinery. [`workflow`] (C9) sits on top of all of it.

pub mod activity;
pub mod config;
pub mod dispatcher;
pub mod labbook;
pub mod lock;
pub mod monitor;
pub mod portmap;
pub mod supervisor;
pub mod workflow;

pub use activity::{ActivityDetailRecord, ActivityRecord, ActivityStore};
pub use config::LabBookConfig;
pub use dispatcher::{Dispatcher, JobRecord, JobStatus, Schedule};
pub use labbook::{FileEntry, Favorite, LabBook, Section, integration_branch, user_branch};
pub use lock::{LockGuard, LockManager, LockOptions};
pub use monitor::{ActivityMonitor, ExecutionState, KernelEvent};
pub use portmap::PortMap;
pub use supervisor::{KernelSession, MonitorSupervisor};
pub use workflow::WorkflowEngine;
