//! Fixed-size worker-thread pool executor.
//!
//! Shape borrowed from `futures-cpupool`'s `Builder`/`CpuPool` (a handle
//! type cheap to clone, backed by a shared queue guarded by a `Mutex` plus
//! `Condvar`), generalized from futures-specific `CpuFuture` plumbing down
//! to plain `FnOnce` tasks so it composes with this crate's `Executor`
//! trait instead of being float-specific infrastructure.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use super::{Executor, RunningOnGuard};

type Task = Box<dyn FnOnce() + Send>;
type PanicHandler = Arc<dyn Fn(Box<dyn Any + Send>) + Send + Sync>;

struct Shared {
    queue: Mutex<VecDeque<Task>>,
    cond: Condvar,
    shutdown: Mutex<bool>,
    on_panic: Option<PanicHandler>,
}

/// Builds a [`ThreadPool`] with non-default worker count, thread name
/// prefix, or panic handler, mirroring `futures-cpupool::Builder`'s knobs.
pub struct Builder {
    pool_size: usize,
    name_prefix: String,
    on_panic: Option<PanicHandler>,
}

impl Default for Builder {
    fn default() -> Builder {
        Builder {
            pool_size: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            name_prefix: "iocoro-pool".to_string(),
            on_panic: None,
        }
    }
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    pub fn pool_size(mut self, n: usize) -> Builder {
        self.pool_size = n;
        self
    }

    pub fn name_prefix(mut self, prefix: impl Into<String>) -> Builder {
        self.name_prefix = prefix.into();
        self
    }

    /// Install a handler invoked (on the worker thread) whenever a task
    /// panics, instead of the default `log::error!`.
    pub fn after_panic<F>(mut self, handler: F) -> Builder
    where
        F: Fn(Box<dyn Any + Send>) + Send + Sync + 'static,
    {
        self.on_panic = Some(Arc::new(handler));
        self
    }

    pub fn build(self) -> ThreadPool {
        ThreadPool::with_builder(self)
    }
}

/// Owns the worker threads. Dropping or calling [`ThreadPool::join`] stops
/// accepting new work and waits for in-flight tasks to finish; panicking
/// tasks are caught and logged rather than poisoning a worker.
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    pub fn new(num_threads: usize) -> ThreadPool {
        Builder::new().pool_size(num_threads).build()
    }

    pub fn builder() -> Builder {
        Builder::new()
    }

    fn with_builder(builder: Builder) -> ThreadPool {
        assert!(builder.pool_size > 0, "thread pool needs at least one worker");
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            cond: Condvar::new(),
            shutdown: Mutex::new(false),
            on_panic: builder.on_panic,
        });
        let id = Arc::as_ptr(&shared) as usize;
        let workers = (0..builder.pool_size)
            .map(|i| {
                let shared = shared.clone();
                let name = format!("{}-{i}", builder.name_prefix);
                std::thread::Builder::new()
                    .name(name)
                    .spawn(move || worker_loop(shared, id))
                    .expect("failed to spawn thread pool worker")
            })
            .collect();
        ThreadPool { shared, workers }
    }

    pub fn executor(&self) -> ThreadPoolExecutor {
        ThreadPoolExecutor {
            shared: self.shared.clone(),
        }
    }

    /// Stop accepting work and wait for all workers to drain their queue
    /// and exit.
    pub fn join(mut self) {
        *self.shared.shutdown.lock().unwrap() = true;
        self.shared.cond.notify_all();
        for w in self.workers.drain(..) {
            let _ = w.join();
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        *self.shared.shutdown.lock().unwrap() = true;
        self.shared.cond.notify_all();
        for w in self.workers.drain(..) {
            let _ = w.join();
        }
    }
}

fn worker_loop(shared: Arc<Shared>, id: usize) {
    let _guard = RunningOnGuard::enter(id);
    loop {
        let task = {
            let mut queue = shared.queue.lock().unwrap();
            loop {
                if let Some(task) = queue.pop_front() {
                    break Some(task);
                }
                if *shared.shutdown.lock().unwrap() {
                    break None;
                }
                queue = shared.cond.wait(queue).unwrap();
            }
        };
        match task {
            Some(task) => {
                if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(task)) {
                    match &shared.on_panic {
                        Some(handler) => handler(panic),
                        None => log_panic(panic),
                    }
                }
            }
            None => break,
        }
    }
}

#[cfg(feature = "os-poll")]
fn log_panic(panic: Box<dyn Any + Send>) {
    let msg = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    log::error!("thread pool worker task panicked: {msg}");
}

#[cfg(not(feature = "os-poll"))]
fn log_panic(_panic: Box<dyn Any + Send>) {}

/// Cheap-to-clone handle posting work into a [`ThreadPool`]'s shared queue.
#[derive(Clone)]
pub struct ThreadPoolExecutor {
    shared: Arc<Shared>,
}

impl Executor for ThreadPoolExecutor {
    fn post(&self, f: Task) {
        assert!(
            !*self.shared.shutdown.lock().unwrap(),
            "posted to a thread pool after join()"
        );
        self.shared.queue.lock().unwrap().push_back(f);
        self.shared.cond.notify_one();
    }

    fn identity(&self) -> usize {
        Arc::as_ptr(&self.shared) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn tasks_run_across_workers() {
        let pool = ThreadPool::new(4);
        let ex = pool.executor();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..20 {
            let hits = hits.clone();
            ex.post(Box::new(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            }));
        }
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(hits.load(Ordering::SeqCst), 20);
        pool.join();
    }

    #[test]
    fn panicking_task_does_not_kill_worker() {
        let pool = ThreadPool::new(1);
        let ex = pool.executor();
        ex.post(Box::new(|| panic!("boom")));
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        ex.post(Box::new(move || {
            hits2.fetch_add(1, Ordering::SeqCst);
        }));
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        pool.join();
    }

    #[test]
    fn custom_panic_handler_receives_the_payload() {
        let caught = Arc::new(AtomicUsize::new(0));
        let caught2 = caught.clone();
        let pool = Builder::new()
            .pool_size(1)
            .name_prefix("custom")
            .after_panic(move |_payload| {
                caught2.fetch_add(1, Ordering::SeqCst);
            })
            .build();
        let ex = pool.executor();
        ex.post(Box::new(|| panic!("boom")));
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(caught.load(Ordering::SeqCst), 1);
        pool.join();
    }
}
