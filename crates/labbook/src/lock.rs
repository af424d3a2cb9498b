//! Lock Manager (C8, first half): a distributed, coordinator-backed mutex
//! scoping exclusive access to a LabBook or the port map.
//!
//! Grounded in the teacher's file-based `shipper/src/lock.rs`, generalized
//! from a PID-in-a-file to a holder id stored as a coordinator value so it
//! works across processes sharing one coordinator backend.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use labbook_coordinator::Coordinator;
use labbook_retry::{RetryPolicy, calculate_delay};
use labbook_types::ErrorKind;
use serde::{Deserialize, Serialize};

/// Holder metadata stored as the coordinator value at the lock key, mirroring
/// the teacher's `LockInfo` (pid, hostname, timestamp).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub holder_id: String,
    pub acquired_at: DateTime<Utc>,
}

/// Behavior knobs for one lock acquisition (spec.md §4.8): maximum wait for
/// acquisition, maximum hold before the lock is considered silently
/// expired, whether to renew in the background while held, and whether
/// losing the lock under `strict` should be observable to the holder.
#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    pub timeout: Duration,
    pub expire: Duration,
    pub auto_renewal: bool,
    pub strict: bool,
}

impl From<&crate::config::LockConfig> for LockOptions {
    fn from(config: &crate::config::LockConfig) -> Self {
        Self {
            timeout: config.timeout,
            expire: config.expire,
            auto_renewal: config.auto_renewal,
            strict: config.strict,
        }
    }
}

/// Acquires and releases coordinator-backed locks.
pub struct LockManager<C: Coordinator> {
    coordinator: Arc<C>,
}

impl<C: Coordinator + 'static> LockManager<C> {
    pub fn new(coordinator: Arc<C>) -> Self {
        Self { coordinator }
    }

    /// If the lock at `key` was acquired longer than `expire` ago, its
    /// holder is presumed dead (crashed before `Drop`, or never enabled
    /// `auto_renewal`) and the key is deleted so the next `set_if_absent`
    /// can claim it. The `Coordinator` trait has no compare-and-swap, so
    /// this delete races other expired-reclaim attempts; that race only
    /// ever resolves in favor of one of several callers all legitimately
    /// entitled to the lock, the same guarantee `set_if_absent` itself
    /// gives a single claimant.
    fn reclaim_if_expired(&self, key: &str, expire: Duration) -> Result<bool, ErrorKind> {
        let Some(raw) = self
            .coordinator
            .get(key)
            .map_err(|e| ErrorKind::lock(format!("coordinator error reading {key}: {e}")))?
        else {
            // Already gone; the next set_if_absent will claim it.
            return Ok(true);
        };

        let Ok(info) = serde_json::from_str::<LockInfo>(&raw) else {
            return Ok(false);
        };

        let held_for = Utc::now().signed_duration_since(info.acquired_at);
        let expire_chrono = chrono::Duration::from_std(expire).unwrap_or(chrono::Duration::zero());
        if held_for <= expire_chrono {
            return Ok(false);
        }

        tracing::warn!(key = %key, holder_id = %info.holder_id, ?held_for, "reclaiming lock past its expire duration");
        self.coordinator
            .delete(key)
            .map_err(|e| ErrorKind::lock(format!("coordinator error reclaiming {key}: {e}")))?;
        Ok(true)
    }

    /// Block until `key` is claimed or `options.timeout` elapses.
    ///
    /// Polls with the same backoff shape as the port scanner's bind retries
    /// (`RetryPolicy::Conservative`), but against a wall-clock deadline
    /// rather than a fixed attempt count, since `timeout` is a duration.
    pub fn acquire(&self, key: &str, options: LockOptions) -> Result<LockGuard<C>, ErrorKind> {
        let holder_id = format!("{}-{:x}", std::process::id(), rand_suffix());
        let info = LockInfo {
            holder_id: holder_id.clone(),
            acquired_at: Utc::now(),
        };
        let value = serde_json::to_string(&info)
            .map_err(|e| ErrorKind::internal(format!("serializing lock info: {e}")))?;

        let deadline = Instant::now() + options.timeout;
        let retry_config = RetryPolicy::Conservative.to_config();
        let mut attempt = 1;

        loop {
            let claimed = self
                .coordinator
                .set_if_absent(key, &value)
                .map_err(|e| ErrorKind::lock(format!("coordinator error acquiring {key}: {e}")))?;

            if claimed {
                break;
            }

            if self.reclaim_if_expired(key, options.expire)? {
                continue;
            }

            if Instant::now() >= deadline {
                return Err(ErrorKind::lock(format!(
                    "timed out after {:?} acquiring lock {key}",
                    options.timeout
                )));
            }

            std::thread::sleep(calculate_delay(&retry_config, attempt));
            attempt += 1;
        }

        let stop = Arc::new(AtomicBool::new(false));
        let lost = Arc::new(AtomicBool::new(false));
        let renewer = if options.auto_renewal {
            Some(spawn_renewer(
                Arc::clone(&self.coordinator),
                key.to_string(),
                holder_id.clone(),
                options.expire,
                Arc::clone(&stop),
                Arc::clone(&lost),
                options.strict,
            ))
        } else {
            None
        };

        Ok(LockGuard {
            coordinator: Arc::clone(&self.coordinator),
            key: key.to_string(),
            holder_id,
            acquired_at: Instant::now(),
            expire: options.expire,
            stop,
            lost,
            renewer,
        })
    }
}

fn rand_suffix() -> u64 {
    use rand::Rng;
    rand::thread_rng().r#gen()
}

/// Periodically refreshes the lock's `acquired_at` timestamp while held.
/// Mirrors the cooperative-shutdown pattern used by the Activity Monitor's
/// `run` flag (spec.md §4.5, §9): a shared `AtomicBool` both signals the
/// background thread to stop and records whether the lock was lost under
/// `strict` mode.
fn spawn_renewer<C: Coordinator + 'static>(
    coordinator: Arc<C>,
    key: String,
    holder_id: String,
    expire: Duration,
    stop: Arc<AtomicBool>,
    lost: Arc<AtomicBool>,
    strict: bool,
) -> JoinHandle<()> {
    let interval = expire / 2;
    std::thread::spawn(move || {
        while !stop.load(Ordering::Relaxed) {
            std::thread::sleep(interval);
            if stop.load(Ordering::Relaxed) {
                break;
            }

            let still_ours = coordinator
                .get(&key)
                .ok()
                .flatten()
                .and_then(|raw| serde_json::from_str::<LockInfo>(&raw).ok())
                .map(|info| info.holder_id == holder_id)
                .unwrap_or(false);

            if !still_ours {
                if strict {
                    lost.store(true, Ordering::Relaxed);
                    tracing::warn!(key = %key, "lock lost under strict mode, renewal stopping");
                }
                break;
            }

            let info = LockInfo {
                holder_id: holder_id.clone(),
                acquired_at: Utc::now(),
            };
            if let Ok(value) = serde_json::to_string(&info) {
                let _ = coordinator.set(&key, &value);
            }
        }
    })
}

/// Held lock; releases on `Drop`. A holder's own over-held lock is only
/// logged (see `warn_if_overheld`) — enforcement happens on the *other*
/// side, in `LockManager::acquire`'s `reclaim_if_expired`, which is what
/// lets a second caller claim a lock whose holder died without dropping it.
pub struct LockGuard<C: Coordinator> {
    coordinator: Arc<C>,
    key: String,
    holder_id: String,
    acquired_at: Instant,
    expire: Duration,
    stop: Arc<AtomicBool>,
    lost: Arc<AtomicBool>,
    renewer: Option<JoinHandle<()>>,
}

impl<C: Coordinator> LockGuard<C> {
    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// True once a `strict`-mode renewer has observed the lock was stolen.
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Relaxed)
    }

    fn warn_if_overheld(&self) {
        if self.acquired_at.elapsed() > self.expire {
            tracing::warn!(
                key = %self.key,
                held_for = ?self.acquired_at.elapsed(),
                expire = ?self.expire,
                "lock held past its expire duration; it may have silently expired"
            );
        }
    }
}

impl<C: Coordinator> Drop for LockGuard<C> {
    fn drop(&mut self) {
        self.warn_if_overheld();
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.renewer.take() {
            let _ = handle.join();
        }
        let _ = self.coordinator.delete(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use labbook_coordinator::InMemoryCoordinator;

    use super::*;

    fn options(timeout_ms: u64) -> LockOptions {
        LockOptions {
            timeout: Duration::from_millis(timeout_ms),
            expire: Duration::from_secs(60),
            auto_renewal: false,
            strict: false,
        }
    }

    #[test]
    fn acquire_then_release_frees_the_key() {
        let coordinator = Arc::new(InMemoryCoordinator::new());
        let manager = LockManager::new(Arc::clone(&coordinator));
        {
            let _guard = manager.acquire("lock:labbook:a", options(100)).unwrap();
            assert!(coordinator.get("lock:labbook:a").unwrap().is_some());
        }
        assert!(coordinator.get("lock:labbook:a").unwrap().is_none());
    }

    #[test]
    fn second_acquire_times_out_while_first_holds_it() {
        let coordinator = Arc::new(InMemoryCoordinator::new());
        let manager = LockManager::new(Arc::clone(&coordinator));
        let _first = manager.acquire("lock:labbook:a", options(50)).unwrap();

        let err = manager.acquire("lock:labbook:a", options(50)).unwrap_err();
        assert!(matches!(err, ErrorKind::Lock(_)));
    }

    #[test]
    fn second_acquire_succeeds_after_first_is_dropped() {
        let coordinator = Arc::new(InMemoryCoordinator::new());
        let manager = LockManager::new(Arc::clone(&coordinator));
        {
            let _first = manager.acquire("lock:labbook:a", options(50)).unwrap();
        }
        let second = manager.acquire("lock:labbook:a", options(50));
        assert!(second.is_ok());
    }

    #[test]
    fn acquire_reclaims_a_lock_left_behind_by_a_dead_holder() {
        let coordinator = Arc::new(InMemoryCoordinator::new());
        let manager = LockManager::new(Arc::clone(&coordinator));

        // Simulate a holder that crashed without running its `Drop`: a
        // stale `LockInfo` whose `acquired_at` is well past `expire`.
        let stale = LockInfo {
            holder_id: "dead-holder".to_string(),
            acquired_at: Utc::now() - chrono::Duration::seconds(120),
        };
        coordinator
            .set("lock:labbook:a", &serde_json::to_string(&stale).unwrap())
            .unwrap();

        let guard = manager
            .acquire(
                "lock:labbook:a",
                LockOptions {
                    timeout: Duration::from_millis(200),
                    expire: Duration::from_secs(60),
                    auto_renewal: false,
                    strict: false,
                },
            )
            .unwrap();
        assert_ne!(guard.holder_id(), "dead-holder");
    }

    #[test]
    fn auto_renewal_keeps_the_lock_alive_across_the_expire_window() {
        let coordinator = Arc::new(InMemoryCoordinator::new());
        let manager = LockManager::new(Arc::clone(&coordinator));
        let guard = manager
            .acquire(
                "lock:labbook:a",
                LockOptions {
                    timeout: Duration::from_millis(100),
                    expire: Duration::from_millis(40),
                    auto_renewal: true,
                    strict: false,
                },
            )
            .unwrap();

        std::thread::sleep(Duration::from_millis(120));
        assert!(coordinator.get("lock:labbook:a").unwrap().is_some());
        assert!(!guard.is_lost());
    }
}
