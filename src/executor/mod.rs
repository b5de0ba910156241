//! Executor abstractions: a uniform post/dispatch contract, a type-erased
//! [`AnyExecutor`], and its IO-capable refinement [`AnyIoExecutor`]. Adapted
//! from `include/iocoro/executor.hpp` and `include/iocoro/io_executor.hpp`.
//!
//! The original uses a `concept executor` plus a hand-rolled vtable
//! (`any_executor::concept_base`/`model<Ex>`) to erase the concrete
//! executor type. Rust's trait objects already are that vtable, so
//! [`AnyExecutor`] is just `Arc<dyn ExecutorObj>` — a `dyn Trait` in an `Arc`
//! is the idiomatic Rust rendition of the same "small dispatch table" idea,
//! without reaching for deep inheritance the way a C++ concept hierarchy
//! would.

use std::cell::RefCell;
use std::sync::Arc;

pub mod strand;
pub mod thread_pool;

pub use strand::Strand;
pub use thread_pool::{Builder as ThreadPoolBuilder, ThreadPool, ThreadPoolExecutor};

type Task = Box<dyn FnOnce() + Send>;

/// The contract every executor must satisfy.
///
/// `post`/`dispatch` are infallible from the caller's perspective: a
/// scheduling failure (e.g. posting after the owning context was dropped)
/// is a programmer error and terminates, rather than surfacing as an `Err`
/// the caller is expected to handle.
pub trait Executor: Clone {
    /// Enqueue `f`. Never runs inline, even if called from a thread already
    /// driving this executor.
    fn post(&self, f: Task);

    /// Enqueue `f`, unless the calling thread is already executing work on
    /// behalf of this exact executor, in which case run it inline.
    fn dispatch(&self, f: Task) {
        if self.is_running_here() {
            f();
        } else {
            self.post(f);
        }
    }

    /// An opaque identity used for the `==` contract and for the
    /// "am I already running on this executor" check `dispatch` needs.
    fn identity(&self) -> usize;

    fn is_running_here(&self) -> bool {
        CURRENT_EXECUTOR.with(|cur| *cur.borrow() == Some(self.identity()))
    }
}

thread_local! {
    static CURRENT_EXECUTOR: RefCell<Option<usize>> = const { RefCell::new(None) };
}

/// RAII marker installed by an executor around every closure it actually
/// invokes (post-processing loop, worker loop, strand drain), so nested
/// `dispatch` calls on the *same* executor can run inline.
pub(crate) struct RunningOnGuard {
    previous: Option<usize>,
}

impl RunningOnGuard {
    pub(crate) fn enter(id: usize) -> RunningOnGuard {
        let previous = CURRENT_EXECUTOR.with(|cur| cur.replace(Some(id)));
        RunningOnGuard { previous }
    }
}

impl Drop for RunningOnGuard {
    fn drop(&mut self) {
        CURRENT_EXECUTOR.with(|cur| *cur.borrow_mut() = self.previous);
    }
}

trait ExecutorObj: Send + Sync {
    fn post(&self, f: Task);
    fn dispatch(&self, f: Task);
    fn identity(&self) -> usize;
}

struct Model<E>(E);

impl<E: Executor + Send + Sync + 'static> ExecutorObj for Model<E> {
    fn post(&self, f: Task) {
        self.0.post(f);
    }
    fn dispatch(&self, f: Task) {
        self.0.dispatch(f);
    }
    fn identity(&self) -> usize {
        self.0.identity()
    }
}

/// A type-erased executor handle: post/dispatch only, equality by identity.
#[derive(Clone)]
pub struct AnyExecutor {
    inner: Option<Arc<dyn ExecutorObj>>,
}

impl AnyExecutor {
    pub fn new<E: Executor + Send + Sync + 'static>(ex: E) -> AnyExecutor {
        AnyExecutor {
            inner: Some(Arc::new(Model(ex))),
        }
    }

    /// An empty handle. Using it panics, mirroring the `IOCORO_ENSURE`
    /// contract checks the original throws on an empty `any_executor`.
    pub fn empty() -> AnyExecutor {
        AnyExecutor { inner: None }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_none()
    }

    fn require(&self) -> &Arc<dyn ExecutorObj> {
        self.inner
            .as_ref()
            .expect("any_executor: used while empty")
    }
}

impl Executor for AnyExecutor {
    fn post(&self, f: Task) {
        self.require().post(f);
    }
    fn dispatch(&self, f: Task) {
        self.require().dispatch(f);
    }
    fn identity(&self) -> usize {
        self.require().identity()
    }
}

impl PartialEq for AnyExecutor {
    fn eq(&self, other: &Self) -> bool {
        // Two handles wrapping the same underlying executor (e.g. two
        // `as_io_executor()` calls on the same `IoContext`) each box a fresh
        // `Model`, so comparing the `Arc<dyn ExecutorObj>` pointers would
        // report them as different executors; compare by the identity the
        // `Executor` trait itself defines instead.
        match (&self.inner, &other.inner) {
            (Some(a), Some(b)) => a.identity() == b.identity(),
            (None, None) => true,
            _ => false,
        }
    }
}
impl Eq for AnyExecutor {}

/// IO-capable refinement of [`AnyExecutor`]: additionally exposes the
/// owning [`IoContext`](crate::io_context::IoContext)'s shared state so
/// reactor/timer-registering awaiters (C8) can reach it without an extra
/// virtual call.
#[derive(Clone)]
pub struct AnyIoExecutor {
    any: AnyExecutor,
    io: Arc<crate::io_context::Inner>,
}

impl AnyIoExecutor {
    pub(crate) fn new(io: Arc<crate::io_context::Inner>) -> AnyIoExecutor {
        AnyIoExecutor {
            any: AnyExecutor::new(IoContextExecutor { inner: io.clone() }),
            io,
        }
    }

    pub fn as_any(&self) -> AnyExecutor {
        self.any.clone()
    }

    pub(crate) fn io_inner(&self) -> &Arc<crate::io_context::Inner> {
        &self.io
    }
}

impl Executor for AnyIoExecutor {
    fn post(&self, f: Task) {
        self.any.post(f);
    }
    fn dispatch(&self, f: Task) {
        self.any.dispatch(f);
    }
    fn identity(&self) -> usize {
        self.any.identity()
    }
}

impl PartialEq for AnyIoExecutor {
    fn eq(&self, other: &Self) -> bool {
        self.any == other.any
    }
}
impl Eq for AnyIoExecutor {}

/// The concrete executor owned by an [`IoContext`](crate::io_context::IoContext).
#[derive(Clone)]
pub struct IoContextExecutor {
    inner: Arc<crate::io_context::Inner>,
}

impl IoContextExecutor {
    pub(crate) fn new(inner: Arc<crate::io_context::Inner>) -> IoContextExecutor {
        IoContextExecutor { inner }
    }

    pub fn as_io_executor(&self) -> AnyIoExecutor {
        AnyIoExecutor::new(self.inner.clone())
    }
}

impl Executor for IoContextExecutor {
    fn post(&self, f: Task) {
        self.inner.post(f);
    }
    fn identity(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }
}

impl PartialEq for IoContextExecutor {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
impl Eq for IoContextExecutor {}

/// An executor that runs everything inline on whichever thread calls
/// `post`/`dispatch`. Useful as a default/test executor, alongside
/// io-context, thread-pool and strand as the fourth kind of executor this
/// crate ships.
#[derive(Clone, Copy, Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn post(&self, f: Task) {
        f();
    }
    fn dispatch(&self, f: Task) {
        f();
    }
    fn identity(&self) -> usize {
        // All inline executors are interchangeable.
        0
    }
}

/// An executor capable of backing a [`WorkGuard`]: anything that can keep
/// its owning loop alive purely by counting.
pub trait SupportsWorkGuard: Executor {
    fn add_work_guard(&self);
    fn remove_work_guard(&self);
}

impl SupportsWorkGuard for IoContextExecutor {
    fn add_work_guard(&self) {
        self.inner.posted.add_work_guard();
    }
    fn remove_work_guard(&self) {
        self.inner.posted.remove_work_guard();
    }
}

impl SupportsWorkGuard for AnyIoExecutor {
    fn add_work_guard(&self) {
        self.io.posted.add_work_guard();
    }
    fn remove_work_guard(&self) {
        self.io.posted.remove_work_guard();
    }
}

/// RAII guard that keeps an executor's context alive even with no pending
/// work, ported from `include/iocoro/work_guard.hpp`.
pub struct WorkGuard<E: SupportsWorkGuard> {
    executor: E,
    owns: bool,
}

impl<E: SupportsWorkGuard> WorkGuard<E> {
    pub fn new(executor: E) -> WorkGuard<E> {
        executor.add_work_guard();
        WorkGuard {
            executor,
            owns: true,
        }
    }

    pub fn get_executor(&self) -> &E {
        &self.executor
    }

    pub fn reset(&mut self) {
        if self.owns {
            self.executor.remove_work_guard();
            self.owns = false;
        }
    }
}

impl<E: SupportsWorkGuard> Drop for WorkGuard<E> {
    fn drop(&mut self) {
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_executor_equality_is_identity() {
        let ctx = crate::io_context::IoContext::new().unwrap();
        let a = ctx.get_executor().as_io_executor().as_any();
        let b = ctx.get_executor().as_io_executor().as_any();
        assert_eq!(a, b);
        assert_ne!(a, AnyExecutor::new(InlineExecutor));
    }

    #[test]
    fn inline_executor_runs_synchronously() {
        let ex = InlineExecutor;
        let mut ran = false;
        ex.post(Box::new(|| {}));
        ex.dispatch(Box::new(|| {
            ran = true;
        }));
        assert!(ran);
    }
}
