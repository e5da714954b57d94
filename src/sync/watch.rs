//! Watch loop: run sync cycles on an interval and on change triggers.
//!
//! The loop runs one cycle immediately, then waits up to `interval` for a
//! [`Trigger`]. A trigger opens a debounce window; every trigger received in
//! that window is folded into the same cycle. Triggers that arrive while a
//! cycle is running cause exactly one immediate re-run.
//!
//! Cancellation is cooperative. The token is checked while waiting and
//! before each cycle; the engine checks it again between its own states.

use crate::error::{Result, SyncError};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, UNIX_EPOCH};
use tracing::{debug, info, trace, warn};
use walkdir::WalkDir;

const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Shared flag for cooperative cancellation. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// A change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Files changed on one of the watched trees.
    FileChange,
    /// Someone asked for a cycle.
    Requested,
}

/// Loop timing.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub interval: Duration,
    pub debounce: Duration,
    /// Stop after this many cycles. `None` runs until cancelled.
    pub max_cycles: Option<usize>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            debounce: Duration::from_millis(500),
            max_cycles: None,
        }
    }
}

/// What a watch run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WatchSummary {
    pub cycles: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Triggers received, including ones folded into a debounce window.
    pub triggers: usize,
    /// Cycles started because triggers arrived during the previous cycle.
    pub reruns: usize,
}

enum Wait {
    Elapsed,
    Triggered,
    Cancelled,
}

/// Wait up to `timeout` for a trigger.
fn wait_for_trigger(
    timeout: Duration,
    cancel: &CancellationToken,
    triggers: &Receiver<Trigger>,
) -> Wait {
    let deadline = Instant::now() + timeout;
    loop {
        if cancel.is_cancelled() {
            return Wait::Cancelled;
        }
        let now = Instant::now();
        if now >= deadline {
            return Wait::Elapsed;
        }
        let slice = WAIT_SLICE.min(deadline - now);
        match triggers.recv_timeout(slice) {
            Ok(trigger) => {
                trace!(?trigger, "Trigger received");
                return Wait::Triggered;
            }
            Err(RecvTimeoutError::Timeout) => {}
            // No senders left: fall back to pure interval timing.
            Err(RecvTimeoutError::Disconnected) => thread::sleep(slice),
        }
    }
}

/// Fold every trigger arriving within `window` into one. Returns the count.
fn debounce(window: Duration, cancel: &CancellationToken, triggers: &Receiver<Trigger>) -> usize {
    let deadline = Instant::now() + window;
    let mut folded = 0;
    while !cancel.is_cancelled() {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        match triggers.recv_timeout(WAIT_SLICE.min(deadline - now)) {
            Ok(_) => folded += 1,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    folded
}

fn drain(triggers: &Receiver<Trigger>) -> usize {
    triggers.try_iter().count()
}

/// Run cycles until cancelled or `max_cycles` is reached.
///
/// `cycle` receives the 1-based cycle number. A failing cycle is logged and
/// the loop keeps going; the next cycle is the retry. A `Cancelled` error
/// stops the loop.
pub fn run_watch<F>(
    config: &WatchConfig,
    cancel: &CancellationToken,
    triggers: &Receiver<Trigger>,
    mut cycle: F,
) -> WatchSummary
where
    F: FnMut(usize) -> Result<()>,
{
    let mut summary = WatchSummary::default();
    let mut run_now = true;

    loop {
        if cancel.is_cancelled() {
            break;
        }
        if config.max_cycles.is_some_and(|max| summary.cycles >= max) {
            break;
        }

        if !run_now {
            match wait_for_trigger(config.interval, cancel, triggers) {
                Wait::Cancelled => break,
                Wait::Elapsed => trace!("Interval elapsed"),
                Wait::Triggered => {
                    summary.triggers += 1 + debounce(config.debounce, cancel, triggers);
                    if cancel.is_cancelled() {
                        break;
                    }
                }
            }
        }

        summary.cycles += 1;
        debug!(cycle = summary.cycles, "Starting sync cycle");
        match cycle(summary.cycles) {
            Ok(()) => summary.succeeded += 1,
            Err(SyncError::Cancelled { state }) => {
                info!(%state, "Watch cancelled during cycle");
                break;
            }
            Err(err) => {
                summary.failed += 1;
                warn!(cycle = summary.cycles, error = %err, "Sync cycle failed");
            }
        }

        let pending = drain(triggers);
        run_now = pending > 0;
        if run_now {
            summary.triggers += pending;
            summary.reruns += 1;
        }
    }

    info!(
        cycles = summary.cycles,
        failed = summary.failed,
        triggers = summary.triggers,
        "Watch stopped"
    );
    summary
}

/// Polls directory trees and reports when their shape changes.
///
/// The fingerprint covers path, size and modification time of every
/// non-hidden file; content is not read.
#[derive(Debug)]
pub struct PollingWatcher {
    roots: Vec<PathBuf>,
    last: Option<String>,
}

impl PollingWatcher {
    #[must_use]
    pub const fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots, last: None }
    }

    /// Fingerprint of all watched trees. Missing roots contribute nothing.
    #[must_use]
    pub fn snapshot(&self) -> String {
        let mut entries = Vec::new();
        for root in &self.roots {
            let walker = WalkDir::new(root)
                .into_iter()
                .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));
            for entry in walker.filter_map(std::result::Result::ok) {
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(meta) = entry.metadata() else {
                    continue;
                };
                let mtime = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map_or(0, |d| d.as_nanos());
                entries.push(format!("{}|{}|{mtime}", entry.path().display(), meta.len()));
            }
        }
        entries.sort();

        let mut hasher = Sha256::new();
        for entry in &entries {
            hasher.update(entry.as_bytes());
            hasher.update(b"\n");
        }
        format!("{:x}", hasher.finalize())
    }

    /// True if the trees changed since the previous poll. The first poll
    /// only records a baseline.
    pub fn poll(&mut self) -> bool {
        let current = self.snapshot();
        let changed = self.last.as_ref().is_some_and(|last| *last != current);
        self.last = Some(current);
        changed
    }

    /// Poll every `period` on a background thread until cancelled or the
    /// receiver is dropped.
    #[must_use]
    pub fn spawn(
        mut self,
        period: Duration,
        sender: Sender<Trigger>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        thread::spawn(move || {
            self.poll();
            while !cancel.is_cancelled() {
                let deadline = Instant::now() + period;
                while !cancel.is_cancelled() && Instant::now() < deadline {
                    thread::sleep(WAIT_SLICE);
                }
                if cancel.is_cancelled() {
                    break;
                }
                if self.poll() && sender.send(Trigger::FileChange).is_err() {
                    break;
                }
            }
            debug!("Polling watcher stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::mpsc;
    use tempfile::TempDir;

    fn fast_config(max_cycles: usize) -> WatchConfig {
        WatchConfig {
            interval: Duration::from_millis(100),
            debounce: Duration::from_millis(20),
            max_cycles: Some(max_cycles),
        }
    }

    #[test]
    fn first_cycle_runs_immediately() {
        let (_tx, rx) = mpsc::channel();
        let cancel = CancellationToken::new();
        let started = Instant::now();
        let summary = run_watch(&fast_config(1), &cancel, &rx, |_| Ok(()));
        assert_eq!(summary.cycles, 1);
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn burst_collapses_into_one_cycle() {
        let (tx, rx) = mpsc::channel();
        let cancel = CancellationToken::new();
        let config = WatchConfig {
            interval: Duration::from_secs(10),
            debounce: Duration::from_millis(50),
            max_cycles: Some(2),
        };
        let summary = run_watch(&config, &cancel, &rx, |n| {
            if n == 1 {
                // Burst lands after this cycle has returned.
                let tx = tx.clone();
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(20));
                    for _ in 0..5 {
                        let _ = tx.send(Trigger::FileChange);
                    }
                });
            }
            Ok(())
        });
        assert_eq!(summary.cycles, 2);
        assert_eq!(summary.triggers, 5);
        assert_eq!(summary.reruns, 0);
    }

    #[test]
    fn triggers_during_cycle_cause_one_rerun() {
        let (tx, rx) = mpsc::channel();
        let cancel = CancellationToken::new();
        let config = WatchConfig {
            interval: Duration::from_secs(10),
            debounce: Duration::from_millis(10),
            max_cycles: Some(2),
        };
        let started = Instant::now();
        let summary = run_watch(&config, &cancel, &rx, |n| {
            if n == 1 {
                for _ in 0..3 {
                    tx.send(Trigger::Requested).expect("send");
                }
            }
            Ok(())
        });
        assert_eq!(summary.cycles, 2);
        assert_eq!(summary.reruns, 1);
        assert_eq!(summary.triggers, 3);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn failures_do_not_stop_the_loop() {
        let (_tx, rx) = mpsc::channel();
        let cancel = CancellationToken::new();
        let summary = run_watch(&fast_config(3), &cancel, &rx, |n| {
            if n == 2 {
                Err(SyncError::Config("boom".to_string()))
            } else {
                Ok(())
            }
        });
        assert_eq!(summary.cycles, 3);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.succeeded, 2);
    }

    #[test]
    fn cancellation_stops_the_loop() {
        let (_tx, rx) = mpsc::channel::<Trigger>();
        let cancel = CancellationToken::new();
        let inner = cancel.clone();
        let summary = run_watch(&fast_config(100), &cancel, &rx, |n| {
            if n == 2 {
                inner.cancel();
            }
            Ok(())
        });
        assert_eq!(summary.cycles, 2);
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn cancelled_cycle_breaks() {
        let (_tx, rx) = mpsc::channel::<Trigger>();
        let cancel = CancellationToken::new();
        let summary = run_watch(&fast_config(5), &cancel, &rx, |_| {
            Err(SyncError::Cancelled {
                state: "merging".to_string(),
            })
        });
        assert_eq!(summary.cycles, 1);
        assert_eq!(summary.failed, 0);
    }

    #[test]
    fn polling_watcher_sees_new_files() {
        let temp = TempDir::new().expect("tempdir");
        let specs = temp.path().join("specs");
        fs::create_dir_all(&specs).expect("mkdir");

        let mut watcher = PollingWatcher::new(vec![specs.clone(), temp.path().join("missing")]);
        assert!(!watcher.poll());
        assert!(!watcher.poll());

        fs::write(specs.join("001_auth.md"), "# Auth\n").expect("write");
        assert!(watcher.poll());
        assert!(!watcher.poll());

        fs::write(specs.join(".001_auth.md.tmp"), "partial").expect("write");
        assert!(!watcher.poll());
    }
}
