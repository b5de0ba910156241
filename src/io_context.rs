//! The event loop: composes the reactor, timer registry and posted queue
//! into `run`/`run_one`/`run_for`/`stop`/`restart`.
//!
//! The reactor and timer registry are mutated only by the thread currently
//! inside `run*`; we still wrap them in a
//! `Mutex` rather than reaching for raw pointers or `unsafe`; the locks are
//! never contended in practice, since every other thread only ever touches
//! the thread-safe [`PostedQueue`] and `Waker`; the C++ original instead
//! hands an `io_executor` a raw, non-owning `io_context_impl*` (see
//! `detail/socket_handle_base.hpp`) — the `Mutex` is the safe-Rust
//! realization of that same sharing trick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use crate::reactor::epoll::EpollBackend;
use crate::reactor::{Backend, Completion, Direction, Reactor, ReactorToken};
use crate::timer::{TimerRegistry, TimerToken};
use crate::waker::{EventFdWaker, Wake};
use crate::posted_queue::PostedQueue;

/// State shared between the owning [`IoContext`] and every
/// [`IoContextExecutor`](crate::executor::IoContextExecutor) cloned from it.
pub(crate) struct Inner {
    pub(crate) reactor: Mutex<Reactor<EpollBackend>>,
    pub(crate) timers: Mutex<TimerRegistry>,
    pub(crate) posted: PostedQueue,
    pub(crate) waker: EventFdWaker,
    pub(crate) stopped: AtomicBool,
    running_thread: Mutex<Option<ThreadId>>,
}

impl Inner {
    fn has_work(&self) -> bool {
        self.posted.has_work() || !self.timers.lock().unwrap().is_empty() || self.active_fds()
    }

    fn active_fds(&self) -> bool {
        self.reactor.lock().unwrap().active_registrations() > 0
    }

    pub(crate) fn register(
        &self,
        fd: std::os::unix::io::RawFd,
        direction: Direction,
        completion: Box<dyn Completion>,
    ) -> crate::error::IoResult<ReactorToken> {
        self.reactor.lock().unwrap().register(fd, direction, completion)
    }

    pub(crate) fn cancel_registration(&self, token: ReactorToken) -> Option<Box<dyn Completion>> {
        self.reactor.lock().unwrap().cancel(token)
    }

    pub(crate) fn remove_fd_interest(&self, fd: std::os::unix::io::RawFd) -> Vec<Box<dyn Completion>> {
        self.reactor.lock().unwrap().remove_fd_interest(fd)
    }

    pub(crate) fn add_timer(&self, deadline: Instant, completion: Box<dyn Completion>) -> TimerToken {
        self.timers.lock().unwrap().add(deadline, completion)
    }

    pub(crate) fn cancel_timer(&self, token: TimerToken) -> Option<Box<dyn Completion>> {
        self.timers.lock().unwrap().cancel(token)
    }

    pub(crate) fn post(&self, f: Box<dyn FnOnce() + Send>) {
        self.posted.post(f);
        let _ = self.waker.wake();
    }
}

/// The I/O context: the root of the runtime. Owns the reactor backend,
/// timer registry, and posted-work queue; drives them from whichever thread
/// calls one of the `run*` methods.
pub struct IoContext {
    pub(crate) inner: Arc<Inner>,
}

impl IoContext {
    /// Construct a new, unstarted I/O context using the default (epoll)
    /// reactor backend.
    pub fn new() -> std::io::Result<IoContext> {
        let backend = EpollBackend::new()?;
        let waker = backend.waker();
        let reactor = Reactor::with_backend(backend);
        Ok(IoContext {
            inner: Arc::new(Inner {
                reactor: Mutex::new(reactor),
                timers: Mutex::new(TimerRegistry::new()),
                posted: PostedQueue::new(),
                waker,
                stopped: AtomicBool::new(false),
                running_thread: Mutex::new(None),
            }),
        })
    }

    /// Obtain an IO-capable executor for this context. Cheap to clone;
    /// safe to hand to other threads (`post`/`dispatch` are thread-safe),
    /// but reactor/timer registration performed through it must happen
    /// while actually executing on the `run*` thread.
    pub fn get_executor(&self) -> crate::executor::IoContextExecutor {
        crate::executor::IoContextExecutor::new(self.inner.clone())
    }

    /// Run until `stop()` is called and there's no more work, or until the
    /// loop naturally runs dry. Returns the number of handlers invoked
    /// (posted tasks + expired timers + delivered readiness events).
    pub fn run(&mut self) -> std::io::Result<usize> {
        self.run_for_impl(None)
    }

    /// Run at most one iteration that makes progress.
    pub fn run_one(&mut self) -> std::io::Result<usize> {
        self.enter();
        let n = self.turn(None)?;
        self.exit();
        Ok(n)
    }

    /// Run, bounding total wall-clock time spent to approximately `d`.
    pub fn run_for(&mut self, d: Duration) -> std::io::Result<usize> {
        self.run_for_impl(Some(d))
    }

    fn run_for_impl(&mut self, budget: Option<Duration>) -> std::io::Result<usize> {
        self.enter();
        let start = Instant::now();
        let mut total = 0;
        loop {
            if self.inner.stopped.load(Ordering::Acquire) {
                break;
            }
            if !self.inner.has_work() {
                break;
            }
            let remaining = budget.map(|b| b.saturating_sub(start.elapsed()));
            if let Some(r) = remaining {
                if r.is_zero() {
                    break;
                }
            }
            let n = self.turn(remaining)?;
            total += n;
            if budget.is_some() && start.elapsed() >= budget.unwrap() {
                break;
            }
        }
        self.exit();
        Ok(total)
    }

    /// One pass: drain posted work, fire expired timers, then block for
    /// readiness up to `cap` (clamped by the next timer deadline).
    fn turn(&mut self, cap: Option<Duration>) -> std::io::Result<usize> {
        let _guard = crate::executor::RunningOnGuard::enter(Arc::as_ptr(&self.inner) as usize);
        let stopped = self.inner.stopped.load(Ordering::Acquire);
        let mut n = self.inner.posted.drain(stopped);
        n += self.inner.timers.lock().unwrap().process_expired(Instant::now());

        if stopped {
            return Ok(n);
        }

        // A non-empty posted queue means we shouldn't block at all; the
        // timeout is therefore omitted (zero) whenever posting raced with
        // our drain above.
        let has_more_posted = self.inner.posted.has_work() && n == 0;
        let mut timeout = if has_more_posted {
            Some(Duration::ZERO)
        } else {
            let next = self.inner.timers.lock().unwrap().next_deadline();
            next.map(|t| t.saturating_duration_since(Instant::now()))
        };
        if let Some(cap) = cap {
            timeout = Some(match timeout {
                Some(t) => t.min(cap),
                None => cap,
            });
        }

        let delivered = self.inner.reactor.lock().unwrap().wait(timeout)?;
        n += delivered;
        Ok(n)
    }

    /// Idempotent, thread-safe: marks the loop stopped and wakes it.
    /// Posted work afterwards still queues, but won't run until `restart()`
    /// and a fresh `run*`.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::Release);
        let _ = self.inner.waker.wake();
    }

    /// Clear the stopped flag. The posted queue is preserved untouched.
    pub fn restart(&self) {
        self.inner.stopped.store(false, Ordering::Release);
    }

    pub fn stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    fn enter(&self) {
        let mut running = self.inner.running_thread.lock().unwrap();
        let me = std::thread::current().id();
        assert!(
            running.is_none() || *running == Some(me),
            "io_context: re-entered run* from a second thread while already running"
        );
        *running = Some(me);
    }

    fn exit(&self) {
        *self.inner.running_thread.lock().unwrap() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn run_drains_posted_work() {
        let mut ctx = IoContext::new().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let ex = ctx.get_executor();
        for _ in 0..10 {
            let hits = hits.clone();
            crate::executor::Executor::post(
                &ex,
                Box::new(move || {
                    hits.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }
        let n = ctx.run().unwrap();
        assert_eq!(n, 10);
        assert_eq!(hits.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn stop_then_restart_preserves_posted_work() {
        let mut ctx = IoContext::new().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let ex = ctx.get_executor();
        ctx.stop();
        {
            let hits = hits.clone();
            crate::executor::Executor::post(
                &ex,
                Box::new(move || {
                    hits.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }
        let n = ctx.run().unwrap();
        assert_eq!(n, 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        ctx.restart();
        let n = ctx.run().unwrap();
        assert_eq!(n, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn run_for_bounds_wall_time() {
        let mut ctx = IoContext::new().unwrap();
        ctx.get_executor();
        let _guard = crate::executor::WorkGuard::new(ctx.get_executor());
        let start = Instant::now();
        ctx.run_for(Duration::from_millis(20)).unwrap();
        assert!(start.elapsed() < Duration::from_millis(200));
    }
}
