//! Serialized-execution wrapper executor: guarantees tasks posted to it
//! never run concurrently with one another, regardless of how many threads
//! drive the underlying executor.
//!
//! Implementation: atomic running flag and a mutex-protected FIFO; first
//! poster flips the flag and schedules a drain on the underlying executor;
//! the drain runs one task at a time, looping until the queue goes empty,
//! then clears the flag.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::{AnyExecutor, Executor, RunningOnGuard};

type Task = Box<dyn FnOnce() + Send>;

struct StrandInner {
    executor: AnyExecutor,
    queue: Mutex<VecDeque<Task>>,
    running: AtomicBool,
}

/// A FIFO executor adapter. Cloning a `Strand` shares the same underlying
/// queue and flag; all clones serialize against each other.
#[derive(Clone)]
pub struct Strand {
    inner: Arc<StrandInner>,
}

impl Strand {
    pub fn new(executor: AnyExecutor) -> Strand {
        Strand {
            inner: Arc::new(StrandInner {
                executor,
                queue: Mutex::new(VecDeque::new()),
                running: AtomicBool::new(false),
            }),
        }
    }

    fn try_schedule(&self) {
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let strand = self.clone();
            self.inner.executor.post(Box::new(move || strand.drain()));
        }
    }

    fn drain(&self) {
        let _guard = RunningOnGuard::enter(self.identity());
        loop {
            let task = self.inner.queue.lock().unwrap().pop_front();
            match task {
                Some(task) => task(),
                None => {
                    self.inner.running.store(false, Ordering::Release);
                    // A task may have been posted between the pop returning
                    // `None` and clearing the flag; re-check and re-arm if
                    // so, otherwise another poster's `try_schedule` would
                    // have observed `running == true` and done nothing.
                    if !self.inner.queue.lock().unwrap().is_empty() {
                        self.try_schedule();
                    }
                    break;
                }
            }
        }
    }
}

impl Executor for Strand {
    fn post(&self, f: Task) {
        self.inner.queue.lock().unwrap().push_back(f);
        self.try_schedule();
    }

    fn identity(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }
}
