//! The `Coordinator` trait: the shared, process-wide key-value store that
//! backs locks, port assignments, and monitor state (spec.md §5).
//!
//! Production deployments back this with Redis or etcd; that wiring is out
//! of scope here. What matters to every other crate in the workspace is the
//! contract, the same way the teacher splits its `StateStore` trait
//! (`shipper/src/store.rs`) from its filesystem-backed `FileStore`: callers
//! depend on the trait, tests run against an in-memory implementation, and a
//! networked backend can be swapped in without touching call sites.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;

/// A shared, process-wide (or cluster-wide, in a networked backend) key
/// value store. Keys are opaque strings; the LabBook crate is responsible
/// for formatting them consistently (see `labbook_types::keys`).
pub trait Coordinator: Send + Sync {
    /// Fetch the value for `key`, or `None` if absent.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Unconditionally set `key` to `value`.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Set `key` to `value` only if it was absent. Returns `true` if the
    /// write happened. This is the primitive the lock manager and port map
    /// build atomic claims on top of.
    fn set_if_absent(&self, key: &str, value: &str) -> Result<bool>;

    /// Remove `key`. A missing key is not an error.
    fn delete(&self, key: &str) -> Result<()>;

    /// List every key currently starting with `prefix`, for sweeps like
    /// `reset_all_ports()`.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Remove every key starting with `prefix`. Returns the number removed.
    fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let keys = self.scan_prefix(prefix)?;
        for key in &keys {
            self.delete(key)?;
        }
        Ok(keys.len())
    }
}

/// In-memory reference implementation, used in tests and single-process
/// deployments. Not durable across restarts.
#[derive(Debug, Default)]
pub struct InMemoryCoordinator {
    entries: Mutex<HashMap<String, String>>,
}

impl InMemoryCoordinator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Coordinator for InMemoryCoordinator {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().expect("coordinator mutex poisoned");
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().expect("coordinator mutex poisoned");
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn set_if_absent(&self, key: &str, value: &str) -> Result<bool> {
        let mut entries = self.entries.lock().expect("coordinator mutex poisoned");
        if entries.contains_key(key) {
            Ok(false)
        } else {
            entries.insert(key.to_string(), value.to_string());
            Ok(true)
        }
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().expect("coordinator mutex poisoned");
        entries.remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let entries = self.entries.lock().expect("coordinator mutex poisoned");
        Ok(entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
