//! Timed task scheduler
//!
//! A min-heap of `(due, id, callback)` entries serviced by one scheduler
//! thread. When the top entry comes due it is popped and its callback is
//! posted to a shared [`ThreadPool`]; the scheduler therefore guarantees
//! *submission* in non-decreasing due order (ties by insertion id), not
//! execution order inside the pool.
//!
//! # Cancellation
//!
//! Lazy: `cancel(id)` records the id in a set and the entry is discarded at
//! the moment the scheduler would otherwise pop it. O(1) cancel, no heap
//! surgery. A callback already handed to the pool can no longer be canceled.
//! The set is cleared whenever the heap empties, so stale ids do not
//! accumulate.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::thread_pool::{Task, ThreadPool};

struct TimerTask {
    due: Instant,
    id: u64,
    task: Task,
}

// Reverse ordering turns std's max-heap into a min-heap: earliest due wins,
// equal instants fall back to insertion order.
impl PartialEq for TimerTask {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.id == other.id
    }
}

impl Eq for TimerTask {}

impl PartialOrd for TimerTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerTask {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.id.cmp(&self.id))
    }
}

struct SchedState {
    heap: BinaryHeap<TimerTask>,
    canceled: HashSet<u64>,
    running: bool,
    total_scheduled: u64,
    total_fired: u64,
    total_canceled: u64,
}

struct SchedShared {
    state: Mutex<SchedState>,
    wakeup: Condvar,
}

/// Priority scheduler dispatching due callbacks onto a worker pool.
pub struct TimerScheduler {
    shared: Arc<SchedShared>,
    pool: Arc<ThreadPool>,
    next_id: AtomicU64,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl TimerScheduler {
    /// Build a scheduler dispatching into `pool`. Call
    /// [`start`](Self::start) before expecting anything to fire.
    pub fn new(pool: Arc<ThreadPool>) -> Self {
        Self {
            shared: Arc::new(SchedShared {
                state: Mutex::new(SchedState {
                    heap: BinaryHeap::new(),
                    canceled: HashSet::new(),
                    running: false,
                    total_scheduled: 0,
                    total_fired: 0,
                    total_canceled: 0,
                }),
                wakeup: Condvar::new(),
            }),
            pool,
            next_id: AtomicU64::new(0),
            thread: Mutex::new(None),
        }
    }

    /// Schedule `task` to be posted to the pool after `delay`. Returns the
    /// task id for [`cancel`](Self::cancel).
    pub fn schedule_once(&self, delay: Duration, task: impl FnOnce() + Send + 'static) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = TimerTask {
            due: Instant::now() + delay,
            id,
            task: Box::new(task),
        };
        {
            let mut state = lock(&self.shared.state);
            state.heap.push(entry);
            state.total_scheduled += 1;
        }
        // The new entry may be earlier than what the scheduler sleeps on.
        self.shared.wakeup.notify_all();
        id
    }

    /// Mark `id` canceled. Idempotent; takes effect when the scheduler next
    /// reaches that entry. Unknown ids are recorded and forgotten on the
    /// next heap drain.
    pub fn cancel(&self, id: u64) {
        let mut state = lock(&self.shared.state);
        if state.canceled.insert(id) {
            state.total_canceled += 1;
        }
    }

    /// Spawn the scheduler thread. Idempotent while already running.
    pub fn start(&self) {
        let mut state = lock(&self.shared.state);
        if state.running {
            return;
        }
        state.running = true;
        drop(state);

        let shared = Arc::clone(&self.shared);
        let pool = Arc::clone(&self.pool);
        let handle = thread::Builder::new()
            .name("bytewire-timer".into())
            .spawn(move || scheduler_loop(shared, pool))
            .expect("failed to spawn timer thread");
        *lock(&self.thread) = Some(handle);
    }

    /// Stop the scheduler thread and join it. Entries still in the heap are
    /// kept and fire after a future [`start`](Self::start).
    pub fn stop(&self) {
        {
            let mut state = lock(&self.shared.state);
            if !state.running {
                return;
            }
            state.running = false;
        }
        self.shared.wakeup.notify_all();
        if let Some(handle) = lock(&self.thread).take() {
            let _ = handle.join();
        }
    }

    /// Entries neither fired nor canceled yet.
    pub fn pending(&self) -> usize {
        let state = lock(&self.shared.state);
        state.heap.len().saturating_sub(state.canceled.len())
    }

    /// Lifetime counters snapshot.
    pub fn stats(&self) -> SchedulerStats {
        let state = lock(&self.shared.state);
        SchedulerStats {
            active: state.heap.len().saturating_sub(state.canceled.len()),
            pending_cancellations: state.canceled.len(),
            total_scheduled: state.total_scheduled,
            total_fired: state.total_fired,
            total_canceled: state.total_canceled,
        }
    }

    pub fn pool(&self) -> &Arc<ThreadPool> {
        &self.pool
    }
}

/// Counters for observing scheduler behavior.
#[derive(Debug, Clone)]
pub struct SchedulerStats {
    /// Entries waiting in the heap, net of pending cancellations.
    pub active: usize,
    /// Canceled ids not yet discarded by the scheduler.
    pub pending_cancellations: usize,
    pub total_scheduled: u64,
    pub total_fired: u64,
    pub total_canceled: u64,
}

impl Drop for TimerScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn scheduler_loop(shared: Arc<SchedShared>, pool: Arc<ThreadPool>) {
    let mut state = lock(&shared.state);
    loop {
        if !state.running {
            return;
        }

        // Discard canceled entries sitting on top.
        while let Some(top) = state.heap.peek() {
            if !state.canceled.contains(&top.id) {
                break;
            }
            let entry = state.heap.pop().unwrap();
            state.canceled.remove(&entry.id);
        }

        let Some(top) = state.heap.peek() else {
            state.canceled.clear();
            state = shared
                .wakeup
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
            continue;
        };

        let now = Instant::now();
        if top.due <= now {
            let entry = state.heap.pop().unwrap();
            state.total_fired += 1;
            // Post outside the lock; the pool takes its own.
            drop(state);
            pool.post_boxed(entry.task);
            state = lock(&shared.state);
        } else {
            let timeout = top.due - now;
            state = shared
                .wakeup
                .wait_timeout(state, timeout)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    fn scheduler() -> TimerScheduler {
        let sched = TimerScheduler::new(Arc::new(ThreadPool::new(2)));
        sched.start();
        sched
    }

    fn wait_for<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    #[test]
    fn test_fires_in_due_order_with_cancel() {
        let sched = scheduler();
        let fired = Arc::new(StdMutex::new(Vec::new()));

        let push = |tag: u32, delay_ms: u64| {
            let fired = Arc::clone(&fired);
            sched.schedule_once(Duration::from_millis(delay_ms), move || {
                fired.lock().unwrap().push(tag);
            })
        };
        let _first = push(10, 10);
        let middle = push(20, 20);
        let _last = push(30, 30);
        sched.cancel(middle);

        assert!(wait_for(
            || fired.lock().unwrap().len() == 2,
            Duration::from_secs(2)
        ));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(*fired.lock().unwrap(), vec![10, 30]);
    }

    #[test]
    fn test_submission_order_breaks_ties_by_id() {
        // Single pool worker: execution order mirrors submission order.
        let sched = TimerScheduler::new(Arc::new(ThreadPool::new(1)));
        sched.start();
        let fired = Arc::new(StdMutex::new(Vec::new()));
        for tag in 0..8u32 {
            let fired = Arc::clone(&fired);
            sched.schedule_once(Duration::from_millis(5), move || {
                fired.lock().unwrap().push(tag);
            });
        }
        assert!(wait_for(
            || fired.lock().unwrap().len() == 8,
            Duration::from_secs(2)
        ));
        assert_eq!(*fired.lock().unwrap(), (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_earlier_task_preempts_sleep() {
        let sched = scheduler();
        let fired = Arc::new(StdMutex::new(Vec::new()));
        {
            let fired = Arc::clone(&fired);
            sched.schedule_once(Duration::from_secs(5), move || {
                fired.lock().unwrap().push("slow");
            });
        }
        {
            let fired = Arc::clone(&fired);
            sched.schedule_once(Duration::from_millis(10), move || {
                fired.lock().unwrap().push("fast");
            });
        }
        assert!(wait_for(
            || fired.lock().unwrap().first() == Some(&"fast"),
            Duration::from_secs(2)
        ));
        sched.stop();
    }

    #[test]
    fn test_cancel_is_idempotent_and_lazy() {
        let sched = scheduler();
        let id = sched.schedule_once(Duration::from_secs(60), || {});
        assert_eq!(sched.pending(), 1);
        sched.cancel(id);
        sched.cancel(id);
        assert_eq!(sched.pending(), 0);
    }

    #[test]
    fn test_stats_track_lifecycle() {
        let sched = scheduler();
        let id_kept = sched.schedule_once(Duration::ZERO, || {});
        let id_gone = sched.schedule_once(Duration::from_secs(60), || {});
        sched.cancel(id_gone);
        let _ = id_kept;

        assert!(wait_for(
            || sched.stats().total_fired == 1,
            Duration::from_secs(2)
        ));
        let stats = sched.stats();
        assert_eq!(stats.total_scheduled, 2);
        assert_eq!(stats.total_canceled, 1);
        assert_eq!(stats.active, 0);
    }

    #[test]
    fn test_start_idempotent_stop_joins() {
        let sched = scheduler();
        sched.start();
        sched.start();
        let fired = Arc::new(StdMutex::new(Vec::new()));
        {
            let fired = Arc::clone(&fired);
            sched.schedule_once(Duration::from_millis(5), move || {
                fired.lock().unwrap().push(1);
            });
        }
        assert!(wait_for(
            || !fired.lock().unwrap().is_empty(),
            Duration::from_secs(2)
        ));
        sched.stop();
        sched.stop();
    }
}
