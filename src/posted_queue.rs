//! FIFO of deferred closures plus a work-guard counter.
//!
//! Ported directly from `detail/posted_queue.hpp` / `detail/work_guard_counter.hpp`:
//! `post` enqueues under a mutex; `drain` swaps the queue into a local
//! `VecDeque` and runs it outside the lock, and if the loop is stopped
//! midway it pushes whatever's left back in order so `restart()` picks up
//! exactly where it left off.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

type Task = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct WorkGuardCounter(AtomicUsize);

impl WorkGuardCounter {
    fn add(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }

    fn remove(&self) {
        let old = self.0.fetch_sub(1, Ordering::AcqRel);
        assert!(old > 0, "work guard counter: remove() without add()");
    }

    fn has_work(&self) -> bool {
        self.0.load(Ordering::Acquire) > 0
    }
}

pub struct PostedQueue {
    queue: Mutex<VecDeque<Task>>,
    work_guard: WorkGuardCounter,
}

impl Default for PostedQueue {
    fn default() -> PostedQueue {
        PostedQueue {
            queue: Mutex::new(VecDeque::new()),
            work_guard: WorkGuardCounter::default(),
        }
    }
}

impl PostedQueue {
    pub fn new() -> PostedQueue {
        PostedQueue::default()
    }

    pub fn post(&self, f: Task) {
        self.queue.lock().unwrap().push_back(f);
    }

    /// Swap the queue into a local buffer and run it outside the lock. If
    /// `stopped` is true (checked once, at entry), unrun items are requeued
    /// in their original order instead of being run.
    pub fn drain(&self, stopped: bool) -> usize {
        let mut local = {
            let mut guard = self.queue.lock().unwrap();
            std::mem::take(&mut *guard)
        };

        if local.is_empty() {
            return 0;
        }

        if stopped {
            let mut guard = self.queue.lock().unwrap();
            local.extend(std::mem::take(&mut *guard));
            // Preserve order: locally-pending items precede anything that
            // was concurrently posted while we held the lock above... but
            // since nothing ran yet, order is simply `local` first.
            *guard = local;
            return 0;
        }

        let n = local.len();
        for task in local {
            task();
        }
        n
    }

    pub fn add_work_guard(&self) {
        self.work_guard.add();
    }

    pub fn remove_work_guard(&self) {
        self.work_guard.remove();
    }

    pub fn has_work(&self) -> bool {
        self.work_guard.has_work() || !self.queue.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn drain_preserves_fifo_order() {
        let q = PostedQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let order = order.clone();
            q.post(Box::new(move || order.lock().unwrap().push(i)));
        }
        assert_eq!(q.drain(false), 5);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn drain_while_stopped_requeues_without_running() {
        let q = PostedQueue::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        q.post(Box::new(move || {
            ran2.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(q.drain(true), 0);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert!(q.has_work());
        assert_eq!(q.drain(false), 1);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn work_guard_keeps_has_work_true() {
        let q = PostedQueue::new();
        assert!(!q.has_work());
        q.add_work_guard();
        assert!(q.has_work());
        q.remove_work_guard();
        assert!(!q.has_work());
    }
}
