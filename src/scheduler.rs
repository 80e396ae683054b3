//! Timer scheduler (C8): deferred invocation of callables at absolute or
//! relative times, run on a single dedicated worker thread. Mirrors
//! `scheduler.hpp`'s `multimap<time_point, task>` plus condvar wakeup.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

type Task = Box<dyn FnOnce() + Send>;

struct Shared {
    tasks: Mutex<BTreeMap<(Instant, u64), Task>>,
    cv: Condvar,
    done: AtomicBool,
    next_tiebreak: AtomicU64,
}

/// A single-worker-thread timer scheduler. Tasks scheduled at the same
/// deadline may fire in any order relative to each other. No public
/// operation may be called re-entrantly from within a running task — doing
/// so would deadlock on `tasks`.
pub struct Scheduler {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new() -> Self {
        let shared = Arc::new(Shared {
            tasks: Mutex::new(BTreeMap::new()),
            cv: Condvar::new(),
            done: AtomicBool::new(false),
            next_tiebreak: AtomicU64::new(0),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("scheduler".into())
            .spawn(move || Self::timer_loop(worker_shared))
            .expect("failed to spawn scheduler worker thread");

        Self {
            shared,
            worker: Some(worker),
        }
    }

    fn timer_loop(shared: Arc<Shared>) {
        loop {
            Self::manage_tasks(&shared);

            if shared.done.load(Ordering::Acquire) {
                return;
            }

            let mut guard = shared.tasks.lock();
            if shared.done.load(Ordering::Acquire) {
                return;
            }

            match guard.keys().next().copied() {
                None => {
                    shared.cv.wait(&mut guard);
                }
                Some((deadline, _)) => {
                    let now = Instant::now();
                    if deadline > now {
                        shared.cv.wait_for(&mut guard, deadline - now);
                    }
                }
            }
        }
    }

    fn manage_tasks(shared: &Arc<Shared>) {
        let due_tasks: Vec<Task> = {
            let mut guard = shared.tasks.lock();
            let now = Instant::now();
            let due_keys: Vec<(Instant, u64)> = guard
                .range(..=(now, u64::MAX))
                .map(|(k, _)| *k)
                .collect();
            due_keys
                .into_iter()
                .filter_map(|k| guard.remove(&k))
                .collect()
        };

        for task in due_tasks {
            task();
        }
    }

    pub fn schedule_at<F>(&self, deadline: Instant, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let tiebreak = self.shared.next_tiebreak.fetch_add(1, Ordering::Relaxed);
        self.shared.tasks.lock().insert((deadline, tiebreak), Box::new(f));
        self.shared.cv.notify_all();
    }

    pub fn schedule_in<F>(&self, delay: Duration, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule_at(Instant::now() + delay, f);
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shared.done.store(true, Ordering::Release);
        self.shared.cv.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn task_fires_no_earlier_than_deadline() {
        let scheduler = Scheduler::new();
        let (tx, rx) = mpsc::channel();
        let deadline = Instant::now() + Duration::from_millis(50);
        scheduler.schedule_at(deadline, move || {
            tx.send(Instant::now()).unwrap();
        });

        let fired_at = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(fired_at >= deadline);
    }

    #[test]
    fn no_task_runs_after_drop_join_returns() {
        let scheduler = Scheduler::new();
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = Arc::clone(&fired);
        scheduler.schedule_in(Duration::from_millis(10), move || {
            fired_clone.store(true, Ordering::SeqCst);
        });
        std::thread::sleep(Duration::from_millis(50));
        drop(scheduler);
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn multiple_tasks_at_distinct_deadlines_fire_in_order() {
        let scheduler = Scheduler::new();
        let (tx, rx) = mpsc::channel();
        let now = Instant::now();
        for (i, delay_ms) in [30u64, 10, 20].into_iter().enumerate() {
            let tx = tx.clone();
            scheduler.schedule_at(now + Duration::from_millis(delay_ms), move || {
                tx.send(i).unwrap();
            });
        }
        let order: Vec<usize> = (0..3).map(|_| rx.recv_timeout(Duration::from_secs(1)).unwrap()).collect();
        assert_eq!(order, vec![1, 2, 0]);
    }
}
