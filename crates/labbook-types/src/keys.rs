//! Identity and coordinator key formatting (spec.md §6).
//!
//! All coordinator keys are plain strings so that any `Coordinator`
//! implementation (in-memory, Redis, etcd) can use them as-is without a
//! serialization layer of its own.

use std::fmt;

use regex::Regex;
use std::sync::OnceLock;

use crate::error::ErrorKind;

/// `<username>|<owner>|<name>` — the triple that identifies a LabBook on
/// disk and in every coordinator key that scopes state to one LabBook.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabBookKey {
    pub username: String,
    pub owner: String,
    pub name: String,
}

impl LabBookKey {
    pub fn new(
        username: impl Into<String>,
        owner: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for LabBookKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.username, self.owner, self.name)
    }
}

fn name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?!-)(?!.*--)[A-Za-z0-9-]{1,100}$").expect("static regex is valid")
    })
}

/// Validate a LabBook (or section/owner) name: alphanumeric and hyphens,
/// 1-100 chars, no leading hyphen, no trailing hyphen, no double hyphen.
///
/// Matches `original_source/lmcommon/labbook/labbook.py::_validate_labbook_data`.
pub fn validate_name(name: &str) -> Result<(), ErrorKind> {
    if !name_regex().is_match(name) || name.ends_with('-') {
        return Err(ErrorKind::validation(format!(
            "'{name}' is not a valid name: must be 1-100 characters, alphanumeric or hyphens, \
             no leading/trailing/double hyphen"
        )));
    }
    Ok(())
}

/// Strip characters the original disallows in free-text description fields.
///
/// Matches `labbook.py::_santize_input`.
pub fn sanitize_input(input: &str) -> String {
    input
        .chars()
        .filter(|c| !matches!(c, '\\' | '<' | '>' | '?' | '/' | ';' | '"' | '\''))
        .collect()
}

/// `hostport:<interface>:<port>` — marks a port claimed on an interface.
pub fn hostport_interface_key(interface: &str, port: u16) -> String {
    format!("hostport:{interface}:{port}")
}

/// `hostport:labbook:<key>` — records which (interface, port) a LabBook owns.
pub fn hostport_labbook_key(labbook: &LabBookKey) -> String {
    format!("hostport:labbook:{labbook}")
}

/// Prefix that scopes every port-assignment key, for `reset_all_ports()`.
pub const HOSTPORT_PREFIX: &str = "hostport:";

/// `dev_env_monitor:<username>:<owner>:<name>:<devenv>` — the monitor
/// namespace root the supervisor reconciles against live kernel sessions.
pub fn dev_env_monitor_key(labbook: &LabBookKey, devenv: &str) -> String {
    format!(
        "dev_env_monitor:{}:{}:{}:{devenv}",
        labbook.username, labbook.owner, labbook.name
    )
}

/// `<dev_env_monitor key>:activity_monitor:<kernel_id>` — one tracked kernel.
pub fn activity_monitor_key(dev_env_monitor_key: &str, kernel_id: &str) -> String {
    format!("{dev_env_monitor_key}:activity_monitor:{kernel_id}")
}

/// Lock key scoping a LabBook-wide mutating operation.
pub fn lock_key(labbook: &LabBookKey) -> String {
    format!("lock:labbook:{labbook}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_names_pass() {
        for name in ["a", "my-project", "proj123", &"a".repeat(100)] {
            validate_name(name).unwrap();
        }
    }

    #[test]
    fn invalid_names_are_rejected() {
        for name in ["-leading", "trailing-", "double--hyphen", "", &"a".repeat(101)] {
            assert!(validate_name(name).is_err(), "expected rejection for {name:?}");
        }
    }

    #[test]
    fn sanitize_strips_disallowed_characters() {
        assert_eq!(sanitize_input(r#"a\b<c>d?e/f;g"h'i"#), "abcdefghi");
    }

    #[test]
    fn labbook_key_formats_as_pipe_separated_triple() {
        let key = LabBookKey::new("alice", "alice", "my-project");
        assert_eq!(key.to_string(), "alice|alice|my-project");
    }

    #[test]
    fn hostport_keys_share_prefix() {
        let labbook = LabBookKey::new("alice", "alice", "proj");
        assert!(hostport_interface_key("0.0.0.0", 8888).starts_with(HOSTPORT_PREFIX));
        assert!(hostport_labbook_key(&labbook).starts_with(HOSTPORT_PREFIX));
    }

    #[test]
    fn activity_monitor_key_nests_under_dev_env_monitor_key() {
        let labbook = LabBookKey::new("alice", "alice", "proj");
        let devenv = dev_env_monitor_key(&labbook, "jupyterlab");
        let monitor = activity_monitor_key(&devenv, "kernel-123");
        assert!(monitor.starts_with(&devenv));
        assert!(monitor.ends_with(":activity_monitor:kernel-123"));
    }
}
