//! Debounced per-key write scheduling.
//!
//! Scheduling a key that already has a pending timer aborts that timer and
//! starts a new one, so a burst of mutations collapses into one write. Jobs
//! read the latest in-memory value when they run, not a queued payload.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::debug;
use tokio::task::JoinHandle;

struct PendingWrite {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct SchedulerInner {
    pending: Mutex<HashMap<String, PendingWrite>>,
    write_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    next_generation: AtomicU64,
}

impl SchedulerInner {
    /// Removes the pending entry for `key` only if it still belongs to
    /// `generation`. Returns `false` when a newer schedule superseded it.
    fn take_if_current(&self, key: &str, generation: u64) -> bool {
        let mut pending = self.pending.lock().expect("write scheduler lock poisoned");
        match pending.get(key) {
            Some(entry) if entry.generation == generation => {
                pending.remove(key);
                true
            }
            _ => false,
        }
    }

    fn write_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .write_locks
            .lock()
            .expect("write scheduler lock poisoned");
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    async fn acquire(self: &Arc<Self>, key: &str) -> WriteGuard {
        let guard = self.write_lock(key).lock_owned().await;
        WriteGuard {
            guard: Some(guard),
            inner: Arc::clone(self),
            key: key.to_string(),
        }
    }

    /// Drops the lock entry for `key` once nobody holds or awaits it.
    fn prune_write_lock(&self, key: &str) {
        let mut locks = self
            .write_locks
            .lock()
            .expect("write scheduler lock poisoned");
        if locks
            .get(key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(key);
        }
    }
}

/// Exclusive write access to one key. No write for the key runs while the
/// guard is alive.
pub struct WriteGuard {
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
    inner: Arc<SchedulerInner>,
    key: String,
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        self.guard.take();
        self.inner.prune_write_lock(&self.key);
    }
}

/// Coalesces repeated writes per key into one write after a quiet period.
#[derive(Clone, Default)]
pub struct WriteScheduler {
    inner: Arc<SchedulerInner>,
}

impl WriteScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `job` to run for `key` once `delay` passes without another
    /// schedule for the same key. A zero delay runs on the next runtime turn.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule<F, Fut>(&self, key: &str, delay: Duration, job: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);
        let task_key = key.to_string();

        let mut pending = self
            .inner
            .pending
            .lock()
            .expect("write scheduler lock poisoned");
        let handle = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if !inner.take_if_current(&task_key, generation) {
                return;
            }
            let _guard = inner.acquire(&task_key).await;
            job().await;
        });
        if let Some(previous) = pending.insert(key.to_string(), PendingWrite { generation, handle })
        {
            previous.handle.abort();
            debug!(
                "WriteScheduler: reset pending write. key={} delay_ms={}",
                key,
                delay.as_millis()
            );
        }
    }

    /// Cancels the pending timer for `key`. Writes already running are not
    /// interrupted. Returns `true` if a timer was cancelled.
    pub fn cancel(&self, key: &str) -> bool {
        let removed = self
            .inner
            .pending
            .lock()
            .expect("write scheduler lock poisoned")
            .remove(key);
        match removed {
            Some(entry) => {
                entry.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Runs the pending write for `key` immediately instead of waiting for its
    /// timer, and waits for any write already in progress. Returns `true` if
    /// a pending write was run.
    pub async fn flush<F, Fut>(&self, key: &str, job: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()>,
    {
        let was_pending = self.cancel(key);
        let _guard = self.inner.acquire(key).await;
        if was_pending {
            job().await;
        }
        was_pending
    }

    /// Cancels the pending timer for `key` and waits for any write already
    /// running. Until the returned guard is dropped no write for `key` can
    /// start, so the caller may change or remove the key's file safely.
    pub async fn cancel_and_wait(&self, key: &str) -> WriteGuard {
        self.cancel(key);
        self.inner.acquire(key).await
    }

    pub fn has_pending(&self, key: &str) -> bool {
        self.inner
            .pending
            .lock()
            .expect("write scheduler lock poisoned")
            .contains_key(key)
    }

    pub fn pending_keys(&self) -> Vec<String> {
        self.inner
            .pending
            .lock()
            .expect("write scheduler lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Keys with a pending timer or a write in progress. Flushing all of them
    /// also waits out writes already running.
    pub fn tracked_keys(&self) -> Vec<String> {
        let mut keys = self.pending_keys();
        keys.extend(
            self.inner
                .write_locks
                .lock()
                .expect("write scheduler lock poisoned")
                .keys()
                .cloned(),
        );
        keys.sort();
        keys.dedup();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::WriteScheduler;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn recording_job(
        runs: &Arc<AtomicUsize>,
        seen: &Arc<Mutex<Vec<u32>>>,
        value: u32,
    ) -> impl FnOnce() -> std::future::Ready<()> + Send + 'static {
        let runs = Arc::clone(runs);
        let seen = Arc::clone(seen);
        move || {
            runs.fetch_add(1, Ordering::SeqCst);
            seen.lock().expect("seen lock").push(value);
            std::future::ready(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_schedules_collapse_into_latest_job() {
        let scheduler = WriteScheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let delay = Duration::from_millis(100);

        scheduler.schedule("settings", delay, recording_job(&runs, &seen, 1));
        tokio::time::sleep(Duration::from_millis(40)).await;
        scheduler.schedule("settings", delay, recording_job(&runs, &seen, 2));
        tokio::time::sleep(Duration::from_millis(40)).await;
        scheduler.schedule("settings", delay, recording_job(&runs, &seen, 3));
        assert!(scheduler.has_pending("settings"));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(60)).await;
        tokio::task::yield_now().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock().expect("seen lock"), vec![3]);
        assert!(!scheduler.has_pending("settings"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_keys_are_independent() {
        let scheduler = WriteScheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));

        scheduler.schedule("a", Duration::from_millis(50), recording_job(&runs, &seen, 1));
        scheduler.schedule("b", Duration::from_millis(50), recording_job(&runs, &seen, 2));
        let mut keys = scheduler.pending_keys();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);

        tokio::time::sleep(Duration::from_millis(80)).await;
        tokio::task::yield_now().await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert!(scheduler.pending_keys().is_empty());
        assert!(scheduler.tracked_keys().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_writes_release_their_lock_entries() {
        let scheduler = WriteScheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));

        for index in 0..50u32 {
            let key = format!("playlist_{index}");
            scheduler.schedule(&key, Duration::ZERO, recording_job(&runs, &seen, index));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        tokio::task::yield_now().await;

        assert_eq!(runs.load(Ordering::SeqCst), 50);
        assert!(scheduler.tracked_keys().is_empty());
        assert!(scheduler
            .inner
            .write_locks
            .lock()
            .expect("locks")
            .is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_and_wait_blocks_until_running_write_finishes() {
        let scheduler = WriteScheduler::new();
        let finished = Arc::new(AtomicUsize::new(0));
        let job_finished = Arc::clone(&finished);

        scheduler.schedule("library", Duration::ZERO, move || async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            job_finished.fetch_add(1, Ordering::SeqCst);
        });
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert!(!scheduler.has_pending("library"));
        assert_eq!(scheduler.tracked_keys(), vec!["library".to_string()]);
        assert_eq!(finished.load(Ordering::SeqCst), 0);

        let guard = scheduler.cancel_and_wait("library").await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.tracked_keys(), vec!["library".to_string()]);
        drop(guard);
        assert!(scheduler.tracked_keys().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_delay_runs_without_waiting() {
        let scheduler = WriteScheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));

        scheduler.schedule("library", Duration::ZERO, recording_job(&runs, &seen, 7));
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_suppresses_pending_write() {
        let scheduler = WriteScheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));

        scheduler.schedule("queue", Duration::from_millis(100), recording_job(&runs, &seen, 1));
        assert!(scheduler.cancel("queue"));
        assert!(!scheduler.cancel("queue"));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_runs_pending_job_immediately() {
        let scheduler = WriteScheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));

        scheduler.schedule("queue", Duration::from_secs(10), recording_job(&runs, &seen, 1));
        let flushed = scheduler
            .flush("queue", recording_job(&runs, &seen, 2))
            .await;
        assert!(flushed);
        assert_eq!(*seen.lock().expect("seen lock"), vec![2]);

        let flushed_again = scheduler
            .flush("queue", recording_job(&runs, &seen, 3))
            .await;
        assert!(!flushed_again);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
