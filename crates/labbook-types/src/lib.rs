//! Shared domain types for the LabBook workspace: the closed error kind set,
//! activity record vocabulary, identity/coordinator key formatting, and
//! git-adjacent value types. No filesystem or process I/O lives here so that
//! every other crate in the workspace can depend on it without pulling in
//! side effects.

mod activity;
mod error;
mod git;
mod keys;

pub use activity::{ActivityAction, ActivityDetailType, ActivityType};
pub use error::ErrorKind;
pub use git::{CommitInfo, GitAuthor};
pub use keys::{
    activity_monitor_key, dev_env_monitor_key, hostport_interface_key, hostport_labbook_key,
    lock_key, sanitize_input, validate_name, LabBookKey, HOSTPORT_PREFIX,
};
