//! Cooperative task scheduler.
//!
//! Provides one-shot and repeating tasks driven by a single polling loop.
//! The loop is a tokio task that wakes every [`SCHEDULER_TICK`], fires every
//! due task, and exits as soon as the registry is empty. Registering a task
//! while the loop is dead starts it again, so an idle scheduler costs nothing.
//!
//! # Usage
//!
//! ```ignore
//! let scheduler = TaskScheduler::new();
//!
//! // One-shot: fires once after 1 second
//! let id = scheduler.set_timeout("greet", Duration::from_secs(1), || async {
//!     log::info!("hello");
//!     Ok(())
//! });
//!
//! // Repeating: fires every 500ms until cancelled
//! let tick = scheduler.set_interval("poll", Duration::from_millis(500), || async { Ok(()) });
//! scheduler.cancel(tick);
//! ```
//!
//! # Error Handling
//!
//! A task whose callback returns an error (or panics) is logged with its
//! label and cancelled. Other tasks and the loop itself keep running.
//!
//! The scheduler is an explicitly constructed value; clones share one
//! registry and one loop.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::time::Instant;

use crate::constants::SCHEDULER_TICK;

/// Boxed future returned by task callbacks.
pub type TaskFuture = BoxFuture<'static, anyhow::Result<()>>;

/// Shared task callback. Called once per firing.
type Callback = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

/// Identifier of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task_{}", self.0)
    }
}

/// A single task entry in the registry.
struct TaskEntry {
    id: TaskId,
    /// Human-readable callback identity, used in logs.
    label: String,
    callback: Callback,
    /// When this task should next fire.
    fire_at: Instant,
    /// If `Some`, the task repeats with this period.
    period: Option<Duration>,
}

/// Registry of active tasks plus loop liveness.
#[derive(Default)]
struct Registry {
    entries: Vec<TaskEntry>,
    next_id: u64,
    /// Whether a polling loop is currently alive.
    running: bool,
}

/// A task that was due on this tick, cloned out of the registry.
struct DueTask {
    id: TaskId,
    label: String,
    callback: Callback,
}

/// Handle to a shared task registry and its polling loop.
#[derive(Clone, Default)]
pub struct TaskScheduler {
    registry: Arc<Mutex<Registry>>,
}

impl std::fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.lock();
        f.debug_struct("TaskScheduler")
            .field("active_count", &registry.entries.len())
            .field("running", &registry.running)
            .finish()
    }
}

impl TaskScheduler {
    /// Create an empty scheduler. No loop runs until a task is registered.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `callback` once after `delay`.
    ///
    /// Must be called from within a tokio runtime for the polling loop to
    /// start; outside one the task only fires through [`Self::tick`].
    pub fn set_timeout<F, Fut>(&self, label: impl Into<String>, delay: Duration, callback: F) -> TaskId
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register(label.into(), delay, None, box_callback(callback))
    }

    /// Run `callback` every `period` until cancelled.
    pub fn set_interval<F, Fut>(&self, label: impl Into<String>, period: Duration, callback: F) -> TaskId
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register(label.into(), period, Some(period), box_callback(callback))
    }

    /// Remove a task. Returns `true` if it was still registered.
    pub fn cancel(&self, id: TaskId) -> bool {
        let mut registry = self.lock();
        let before = registry.entries.len();
        registry.entries.retain(|e| e.id != id);
        registry.entries.len() != before
    }

    /// Remove every task. The loop exits on its next tick.
    pub fn cancel_all(&self) {
        self.lock().entries.clear();
    }

    /// Number of registered tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// True if no task is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// True if `id` is still registered.
    #[must_use]
    pub fn contains(&self, id: TaskId) -> bool {
        self.lock().entries.iter().any(|e| e.id == id)
    }

    /// True while the polling loop is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    /// Run one evaluation pass: fire every due task.
    ///
    /// Due tasks are collected under the lock and the lock is released
    /// before any callback runs, so callbacks may register or cancel tasks.
    ///
    /// Returns the number of callbacks fired.
    pub async fn tick(&self) -> usize {
        let now = Instant::now();

        // Phase 1: collect due tasks, reschedule or remove them.
        let due: Vec<DueTask> = {
            let mut registry = self.lock();
            let mut due = Vec::new();
            registry.entries.retain_mut(|entry| {
                if now < entry.fire_at {
                    return true;
                }
                due.push(DueTask {
                    id: entry.id,
                    label: entry.label.clone(),
                    callback: Arc::clone(&entry.callback),
                });
                match entry.period {
                    Some(period) => {
                        entry.fire_at = now + period;
                        true
                    }
                    None => false,
                }
            });
            due
        };
        // Lock released here.

        // Phase 2: fire callbacks, cancelling the ones that fail.
        let count = due.len();
        for task in due {
            let callback = task.callback;
            let result = AssertUnwindSafe(async move { callback().await })
                .catch_unwind()
                .await;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    log::warn!("[Scheduler] Task {} ({}) failed: {e:#}", task.label, task.id);
                    self.cancel(task.id);
                }
                Err(_) => {
                    log::error!("[Scheduler] Task {} ({}) panicked", task.label, task.id);
                    self.cancel(task.id);
                }
            }
        }

        count
    }

    fn register(&self, label: String, delay: Duration, period: Option<Duration>, callback: Callback) -> TaskId {
        let mut registry = self.lock();
        let id = TaskId(registry.next_id);
        registry.next_id += 1;

        log::trace!("[Scheduler] Registered {label} ({id}) in {delay:?}");
        registry.entries.push(TaskEntry {
            id,
            label,
            callback,
            fire_at: Instant::now() + delay,
            period,
        });

        if !registry.running {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                registry.running = true;
                handle.spawn(run_loop(self.clone()));
            } else {
                log::debug!("[Scheduler] No runtime, {id} will only fire on manual ticks");
            }
        }

        id
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        // A poisoned registry still holds consistent entries; keep going.
        self.registry
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn box_callback<F, Fut>(callback: F) -> Callback
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move || callback().boxed())
}

/// Polling loop. Exits once the registry is empty.
async fn run_loop(scheduler: TaskScheduler) {
    log::debug!("[Scheduler] Loop started");
    loop {
        tokio::time::sleep(SCHEDULER_TICK).await;
        scheduler.tick().await;

        let mut registry = scheduler.lock();
        if registry.entries.is_empty() {
            registry.running = false;
            break;
        }
    }
    log::debug!("[Scheduler] Loop stopped, registry empty");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_once_not_early() {
        let scheduler = TaskScheduler::new();
        let fired = counter();
        let f = Arc::clone(&fired);
        let id = scheduler.set_timeout("once", Duration::from_millis(50), move || {
            let f = Arc::clone(&f);
            async move {
                f.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(scheduler.contains(id));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!scheduler.contains(id));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_repeats_until_cancelled() {
        let scheduler = TaskScheduler::new();
        let fired = counter();
        let f = Arc::clone(&fired);
        let id = scheduler.set_interval("repeat", Duration::from_millis(20), move || {
            let f = Arc::clone(&f);
            async move {
                f.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        tokio::time::sleep(Duration::from_millis(105)).await;
        let count = fired.load(Ordering::SeqCst);
        assert!((4..=5).contains(&count), "fired {count} times");
        assert!(scheduler.contains(id));

        assert!(scheduler.cancel(id));
        assert!(!scheduler.cancel(id));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), count);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_task_is_cancelled_alone() {
        let scheduler = TaskScheduler::new();
        let healthy = counter();
        let h = Arc::clone(&healthy);

        let bad = scheduler.set_interval("bad", Duration::from_millis(10), || async {
            Err::<(), _>(anyhow::anyhow!("boom"))
        });
        let good = scheduler.set_interval("good", Duration::from_millis(10), move || {
            let h = Arc::clone(&h);
            async move {
                h.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        tokio::time::sleep(Duration::from_millis(55)).await;
        assert!(!scheduler.contains(bad));
        assert!(scheduler.contains(good));
        assert!(healthy.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_task_is_cancelled() {
        let scheduler = TaskScheduler::new();
        let id = scheduler.set_interval("panics", Duration::from_millis(10), || async {
            let payload: Option<()> = None;
            payload.expect("callback panic");
            Ok(())
        });

        tokio::time::sleep(Duration::from_millis(35)).await;
        assert!(!scheduler.contains(id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_stops_when_empty_and_restarts_lazily() {
        let scheduler = TaskScheduler::new();
        assert!(!scheduler.is_running());

        scheduler.set_timeout("first", Duration::from_millis(10), || async { Ok(()) });
        assert!(scheduler.is_running());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(scheduler.is_empty());
        assert!(!scheduler.is_running());

        let fired = counter();
        let f = Arc::clone(&fired);
        scheduler.set_timeout("second", Duration::from_millis(10), move || {
            let f = Arc::clone(&f);
            async move {
                f.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        assert!(scheduler.is_running());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_can_register_tasks() {
        let scheduler = TaskScheduler::new();
        let fired = counter();
        let inner_scheduler = scheduler.clone();
        let f = Arc::clone(&fired);
        scheduler.set_timeout("outer", Duration::from_millis(10), move || {
            let s = inner_scheduler.clone();
            let f = Arc::clone(&f);
            async move {
                s.set_timeout("inner", Duration::from_millis(10), move || {
                    let f = Arc::clone(&f);
                    async move {
                        f.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                });
                Ok(())
            }
        });

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_tick_fires_due_tasks() {
        let scheduler = TaskScheduler::new();
        scheduler.set_timeout("due", Duration::ZERO, || async { Ok(()) });
        assert_eq!(scheduler.tick().await, 1);
        assert!(scheduler.is_empty());
        scheduler.cancel_all();
        assert_eq!(scheduler.tick().await, 0);
    }
}
