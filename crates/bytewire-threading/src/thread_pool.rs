//! Fixed-size worker pool
//!
//! A FIFO queue of boxed callbacks drained by N named OS threads. Producers
//! enqueue under a mutex and wake one worker (`post`) or all of them
//! (`post_many`). Dropping the pool flips `running`, wakes everyone, and
//! joins; tasks already queued are executed before the workers exit.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

/// A unit of work for the pool.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

struct PoolState {
    queue: VecDeque<Task>,
    running: bool,
}

struct PoolShared {
    state: Mutex<PoolState>,
    available: Condvar,
}

/// FIFO task queue drained by a fixed set of worker threads.
pub struct ThreadPool {
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Spawn a pool with `thread_count` workers (at least one).
    pub fn new(thread_count: usize) -> Self {
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                queue: VecDeque::new(),
                running: true,
            }),
            available: Condvar::new(),
        });

        let thread_count = thread_count.max(1);
        let mut workers = Vec::with_capacity(thread_count);
        for i in 0..thread_count {
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("bytewire-worker-{i}"))
                .spawn(move || worker_loop(shared))
                .expect("failed to spawn worker thread");
            workers.push(handle);
        }

        Self { shared, workers }
    }

    /// Enqueue one task and wake one worker.
    pub fn post(&self, task: impl FnOnce() + Send + 'static) {
        self.post_boxed(Box::new(task));
    }

    /// Boxed-form [`post`](Self::post), for callers that already own a
    /// [`Task`].
    pub fn post_boxed(&self, task: Task) {
        {
            let mut state = self.lock_state();
            state.queue.push_back(task);
        }
        self.shared.available.notify_one();
    }

    /// Enqueue a batch and wake every worker. Meant for bursts of small
    /// tasks where one wakeup per task would thrash the condvar.
    pub fn post_many(&self, tasks: Vec<Task>) {
        if tasks.is_empty() {
            return;
        }
        {
            let mut state = self.lock_state();
            state.queue.extend(tasks);
        }
        self.shared.available.notify_all();
    }

    /// Tasks waiting in the queue (not counting ones mid-execution).
    pub fn pending(&self) -> usize {
        self.lock_state().queue.len()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.shared.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ThreadPool {
    /// One worker per hardware thread.
    fn default() -> Self {
        let n = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self::new(n)
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        {
            let mut state = self.lock_state();
            state.running = false;
        }
        self.shared.available.notify_all();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(shared: Arc<PoolShared>) {
    loop {
        let task = {
            let mut state = shared.state.lock().unwrap_or_else(|e| e.into_inner());
            loop {
                if let Some(task) = state.queue.pop_front() {
                    break task;
                }
                if !state.running {
                    return;
                }
                state = shared
                    .available
                    .wait(state)
                    .unwrap_or_else(|e| e.into_inner());
            }
        };
        task();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_post_executes() {
        let pool = ThreadPool::new(2);
        let (tx, rx) = mpsc::channel();
        pool.post(move || tx.send(41 + 1).unwrap());
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 42);
    }

    #[test]
    fn test_post_many_executes_all() {
        let pool = ThreadPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        let tasks: Vec<Task> = (0..64)
            .map(|_| {
                let counter = Arc::clone(&counter);
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }) as Task
            })
            .collect();
        pool.post_many(tasks);
        drop(pool); // join implies every queued task ran
        assert_eq!(counter.load(Ordering::SeqCst), 64);
    }

    #[test]
    fn test_drop_drains_queue() {
        let pool = ThreadPool::new(1);
        let counter = Arc::new(AtomicUsize::new(0));
        // One slow task to hold the single worker, then a backlog.
        let held = Arc::clone(&counter);
        pool.post(move || {
            thread::sleep(Duration::from_millis(50));
            held.fetch_add(1, Ordering::SeqCst);
        });
        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            pool.post(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        drop(pool);
        assert_eq!(counter.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn test_fifo_order_single_worker() {
        let pool = ThreadPool::new(1);
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..8 {
            let order = Arc::clone(&order);
            pool.post(move || order.lock().unwrap().push(i));
        }
        drop(pool);
        assert_eq!(*order.lock().unwrap(), (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_zero_threads_clamped() {
        let pool = ThreadPool::new(0);
        assert_eq!(pool.worker_count(), 1);
    }
}
