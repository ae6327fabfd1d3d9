//! Deferred resource cleanup with bounded retry.
//!
//! Folder deletions can fail transiently (locked files, handles held by
//! not-yet-released loaded code). Instead of failing the undeploy, the
//! deployer enqueues a cleanup task here; the scheduler retries on its own
//! periodic timer, separate from the directory watcher, so a stuck cleanup
//! cannot stall reconciliation.
//!
//! Retry contract:
//! - success cancels future runs and releases the scheduling slot
//! - each failure below the bound logs a retry diagnostic
//! - a reclaim hint fires once, before the second attempt, because the
//!   dominant transient failure is a handle held by a not-yet-released
//!   artifact instance
//! - exhausting the bound logs a terminal diagnostic and abandons the
//!   target folder; this outcome is reported, never fatal
//! - the scheduling slot is released exactly once on every exit path

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

/// A retryable unit of deferred resource deletion.
pub trait CleanupAction: Send + Sync {
    /// Attempt the cleanup. `true` means the resource is gone.
    fn try_run(&self) -> bool;

    /// Human-readable target description for diagnostics.
    fn describe(&self) -> String;
}

/// Deletes a directory tree. Succeeds if the tree is already gone.
#[derive(Debug)]
pub struct FolderCleanupAction {
    path: PathBuf,
}

impl FolderCleanupAction {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CleanupAction for FolderCleanupAction {
    fn try_run(&self) -> bool {
        if !self.path.exists() {
            return true;
        }
        std::fs::remove_dir_all(&self.path).is_ok() && !self.path.exists()
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Hook nudging the host to release deferred resources (dropped caches,
/// pooled handles) before a retry. The runtime has no collector to force;
/// the hook is the observable analog of the original GC hint.
pub trait ReclaimHint: Send + Sync {
    fn nudge(&self);
}

/// Default hint: diagnostic only.
#[derive(Debug, Default)]
pub struct NoopReclaimHint;

impl ReclaimHint for NoopReclaimHint {
    fn nudge(&self) {}
}

/// A cleanup task: target action plus retry bookkeeping.
pub struct CleanupTask {
    action: Box<dyn CleanupAction>,
    attempts: u32,
    max_attempts: u32,
}

impl std::fmt::Debug for CleanupTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupTask")
            .field("target", &self.action.describe())
            .field("attempts", &self.attempts)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

impl CleanupTask {
    pub fn new(action: Box<dyn CleanupAction>, max_attempts: u32) -> Self {
        Self {
            action,
            attempts: 0,
            max_attempts,
        }
    }

    /// Folder-deletion task, the common case.
    pub fn folder(path: impl Into<PathBuf>, max_attempts: u32) -> Self {
        Self::new(Box::new(FolderCleanupAction::new(path)), max_attempts)
    }
}

/// Releases the scheduling slot exactly once, whichever way the retry loop
/// terminates (success, exhaustion, or external cancellation).
struct SchedulingSlot {
    active: Arc<AtomicUsize>,
}

impl Drop for SchedulingSlot {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Periodic retry scheduler for cleanup tasks.
pub struct CleanupScheduler {
    active: Arc<AtomicUsize>,
    hint: Arc<dyn ReclaimHint>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for CleanupScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupScheduler")
            .field("active", &self.active_tasks())
            .finish()
    }
}

impl Default for CleanupScheduler {
    fn default() -> Self {
        Self::new(Arc::new(NoopReclaimHint))
    }
}

impl CleanupScheduler {
    pub fn new(hint: Arc<dyn ReclaimHint>) -> Self {
        Self {
            active: Arc::new(AtomicUsize::new(0)),
            hint,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Schedule a task for periodic retry. Returns a handle tests can await;
    /// callers normally fire and forget.
    pub fn schedule(
        &self,
        mut task: CleanupTask,
        initial_delay: Duration,
        period: Duration,
    ) -> tokio::task::AbortHandle {
        self.active.fetch_add(1, Ordering::SeqCst);
        let slot = SchedulingSlot {
            active: Arc::clone(&self.active),
        };
        let hint = Arc::clone(&self.hint);

        let handle = tokio::spawn(async move {
            // Moved into the future so cancellation still releases the slot.
            let _slot = slot;

            tokio::time::sleep(initial_delay).await;
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;

                if task.attempts == 1 {
                    tracing::info!("cleanup_reclaim_hint: target={}", task.action.describe());
                    hint.nudge();
                }

                if task.action.try_run() {
                    break;
                }

                task.attempts += 1;
                if task.attempts >= task.max_attempts {
                    tracing::error!(
                        "cleanup_abandoned: target={}, attempts={}",
                        task.action.describe(),
                        task.attempts
                    );
                    break;
                }
                tracing::warn!(
                    "cleanup_retry_scheduled: target={}, attempt={}, max={}",
                    task.action.describe(),
                    task.attempts,
                    task.max_attempts
                );
            }
        });

        let abort = handle.abort_handle();
        self.handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(handle);
        abort
    }

    /// Number of tasks still holding a scheduling slot.
    pub fn active_tasks(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Cancel every pending task. Slots are released by the drop guards.
    pub fn cancel_all(&self) {
        let handles = std::mem::take(
            &mut *self
                .handles
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for handle in handles {
            handle.abort();
        }
    }

    /// Wait for every scheduled task to finish. Test helper.
    pub async fn drain(&self) {
        let handles = std::mem::take(
            &mut *self
                .handles
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for handle in handles {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    /// Fails a fixed number of times, then succeeds.
    struct FlakyAction {
        failures_left: AtomicUsize,
        runs: Arc<AtomicUsize>,
    }

    impl FlakyAction {
        fn new(failures: usize, runs: &Arc<AtomicUsize>) -> Self {
            Self {
                failures_left: AtomicUsize::new(failures),
                runs: Arc::clone(runs),
            }
        }
    }

    impl CleanupAction for FlakyAction {
        fn try_run(&self) -> bool {
            self.runs.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return false;
            }
            true
        }

        fn describe(&self) -> String {
            "flaky-target".to_string()
        }
    }

    /// Records reclaim hint invocations.
    struct RecordingHint {
        nudges: AtomicUsize,
    }

    impl ReclaimHint for RecordingHint {
        fn nudge(&self) {
            self.nudges.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn folder_deleted_on_first_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("native-x");
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join("lib.so"), b"x").unwrap();

        let scheduler = CleanupScheduler::default();
        scheduler.schedule(
            CleanupTask::folder(&target, 5),
            Duration::from_millis(1),
            Duration::from_millis(5),
        );
        scheduler.drain().await;

        assert!(!target.exists());
        assert_eq!(scheduler.active_tasks(), 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn retry_sequence_fails_twice_succeeds_third() {
        let runs = Arc::new(AtomicUsize::new(0));
        let hint = Arc::new(RecordingHint {
            nudges: AtomicUsize::new(0),
        });
        let scheduler = CleanupScheduler::new(Arc::clone(&hint) as Arc<dyn ReclaimHint>);

        scheduler.schedule(
            CleanupTask::new(Box::new(FlakyAction::new(2, &runs)), 5),
            Duration::from_millis(1),
            Duration::from_millis(5),
        );
        scheduler.drain().await;

        // Attempts 1 and 2 failed, attempt 3 succeeded, no fourth attempt.
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        // The hint fired exactly once, before the second attempt.
        assert_eq!(hint.nudges.load(Ordering::SeqCst), 1);
        // Scheduling slot released.
        assert_eq!(scheduler.active_tasks(), 0);

        // Diagnostic sequence: retry after 1, hint before 2, retry after 2,
        // silence on success, no terminal diagnostic.
        logs_assert(|lines: &[&str]| {
            let retries = lines
                .iter()
                .filter(|l| l.contains("cleanup_retry_scheduled"))
                .count();
            let hints = lines
                .iter()
                .filter(|l| l.contains("cleanup_reclaim_hint"))
                .count();
            let abandoned = lines
                .iter()
                .filter(|l| l.contains("cleanup_abandoned"))
                .count();
            if retries == 2 && hints == 1 && abandoned == 0 {
                Ok(())
            } else {
                Err(format!(
                    "unexpected diagnostics: retries={retries}, hints={hints}, abandoned={abandoned}"
                ))
            }
        });
    }

    #[tokio::test]
    #[traced_test]
    async fn exhaustion_abandons_target_and_releases_slot() {
        let runs = Arc::new(AtomicUsize::new(0));
        let scheduler = CleanupScheduler::default();

        scheduler.schedule(
            CleanupTask::new(Box::new(FlakyAction::new(usize::MAX, &runs)), 3),
            Duration::from_millis(1),
            Duration::from_millis(5),
        );
        scheduler.drain().await;

        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert_eq!(scheduler.active_tasks(), 0);
        assert!(logs_contain("cleanup_abandoned"));
    }

    #[tokio::test]
    async fn abandoned_folder_is_left_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("stubborn");
        std::fs::create_dir_all(&target).unwrap();

        // Action that reports failure without touching the folder.
        struct NeverSucceeds;
        impl CleanupAction for NeverSucceeds {
            fn try_run(&self) -> bool {
                false
            }
            fn describe(&self) -> String {
                "stubborn".into()
            }
        }

        let scheduler = CleanupScheduler::default();
        scheduler.schedule(
            CleanupTask::new(Box::new(NeverSucceeds), 2),
            Duration::from_millis(1),
            Duration::from_millis(5),
        );
        scheduler.drain().await;

        assert!(target.exists());
        assert_eq!(scheduler.active_tasks(), 0);
    }

    #[tokio::test]
    async fn cancellation_releases_slot_exactly_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let scheduler = CleanupScheduler::default();

        let abort = scheduler.schedule(
            CleanupTask::new(Box::new(FlakyAction::new(usize::MAX, &runs)), 100),
            Duration::from_secs(3600),
            Duration::from_secs(3600),
        );
        assert_eq!(scheduler.active_tasks(), 1);

        abort.abort();
        scheduler.drain().await;

        assert_eq!(scheduler.active_tasks(), 0);
    }

    #[tokio::test]
    async fn cancel_all_clears_every_pending_task() {
        let runs = Arc::new(AtomicUsize::new(0));
        let scheduler = CleanupScheduler::default();

        for _ in 0..3 {
            scheduler.schedule(
                CleanupTask::new(Box::new(FlakyAction::new(usize::MAX, &runs)), 100),
                Duration::from_secs(3600),
                Duration::from_secs(3600),
            );
        }
        assert_eq!(scheduler.active_tasks(), 3);

        scheduler.cancel_all();
        // Abort completion is asynchronous; poll briefly.
        for _ in 0..100 {
            if scheduler.active_tasks() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(scheduler.active_tasks(), 0);
    }
}
