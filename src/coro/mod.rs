//! Coroutine core, built on `std::future::Future` rather than a hand-rolled
//! generator transform, since Rust already has a native task/future
//! primitive to build on.
//!
//! What's still hand-rolled, because Rust's `Future` has no equivalent, is
//! the promise-shaped state a `co_spawn`ed task carries around: its bound
//! executor, an optional IO-capable executor, and a [`stop_token::StopToken`]
//! — bundled as [`TaskContext`] and installed in a thread-local for the
//! duration of each poll, which is what [`this_coro`] reads from.
//!
//! Grounded on `include/iocoro/detail/promise_state.hpp` (the fields that
//! live in a coroutine promise) and `this_coro.hpp` (the tag-invocable
//! accessors), translated from "fields readable mid-coroutine-body" to
//! "thread-local readable mid-poll".

pub mod stop_token;

pub use stop_token::{StopCallback, StopSource, StopToken};

use std::cell::RefCell;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Wake, Waker};

use crate::executor::{AnyExecutor, AnyIoExecutor, Executor};

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type PanicPayload = Box<dyn std::any::Any + Send + 'static>;

/// Per-task state readable through [`this_coro`] while that task is being
/// polled.
#[derive(Clone)]
pub struct TaskContext {
    executor: AnyExecutor,
    io_executor: Option<AnyIoExecutor>,
    stop_token: StopToken,
}

thread_local! {
    static CURRENT: RefCell<Option<TaskContext>> = const { RefCell::new(None) };
}

struct ContextGuard(Option<TaskContext>);

impl ContextGuard {
    fn enter(ctx: TaskContext) -> ContextGuard {
        let prev = CURRENT.with(|c| c.borrow_mut().replace(ctx));
        ContextGuard(prev)
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        CURRENT.with(|c| *c.borrow_mut() = self.0.take());
    }
}

/// Accessors for the currently-polling task's bound state. Each panics if
/// called outside a task spawned with [`co_spawn`]/[`co_spawn_io`]/[`detached`],
/// matching the original's "ill-formed outside a coroutine" contract.
pub mod this_coro {
    use super::*;

    pub fn executor() -> AnyExecutor {
        with_current(|c| c.executor.clone())
    }

    /// The IO-capable executor this task was spawned with. Distinct from
    /// [`executor`] because a task can be bound to a plain [`AnyExecutor`]
    /// (e.g. a strand or thread pool) that has no reactor/timer access at
    /// all; operations that need to register with a reactor call this
    /// instead.
    pub fn io_executor() -> AnyIoExecutor {
        with_current(|c| {
            c.io_executor
                .clone()
                .expect("this_coro::io_executor: task was not spawned with IO access")
        })
    }

    pub fn stop_token() -> StopToken {
        with_current(|c| c.stop_token.clone())
    }

    fn with_current<R>(f: impl FnOnce(&TaskContext) -> R) -> R {
        CURRENT.with(|c| {
            let borrow = c.borrow();
            let ctx = borrow
                .as_ref()
                .expect("this_coro: called outside a spawned task");
            f(ctx)
        })
    }
}

struct JoinSlot<T> {
    result: Mutex<Option<std::thread::Result<T>>>,
    waker: Mutex<Option<Waker>>,
}

impl<T> JoinSlot<T> {
    fn new() -> Arc<JoinSlot<T>> {
        Arc::new(JoinSlot {
            result: Mutex::new(None),
            waker: Mutex::new(None),
        })
    }

    fn complete(&self, result: std::thread::Result<T>) {
        *self.result.lock().unwrap() = Some(result);
        if let Some(w) = self.waker.lock().unwrap().take() {
            w.wake();
        }
    }
}

struct TaskState<T> {
    future: Mutex<Option<BoxFuture<T>>>,
    current_executor: Mutex<AnyExecutor>,
    io_executor: Option<AnyIoExecutor>,
    stop_source: StopSource,
    on_complete: Mutex<Option<Box<dyn FnOnce(std::thread::Result<T>) + Send>>>,
    // Keeps the parent-stop-propagation callback (see `spawn_with`)
    // registered for as long as this task exists; dropping it early would
    // unregister the callback before the parent ever gets a chance to fire.
    _parent_link: Option<StopCallback>,
}

impl<T: Send + 'static> Wake for TaskState<T> {
    fn wake(self: Arc<Self>) {
        TaskState::wake_by_ref(&self)
    }

    fn wake_by_ref(self: &Arc<Self>) {
        let executor = self.current_executor.lock().unwrap().clone();
        let state = self.clone();
        executor.post(Box::new(move || poll_task(state)));
    }
}

fn poll_task<T: Send + 'static>(state: Arc<TaskState<T>>) {
    let mut slot = state.future.lock().unwrap();
    let Some(mut fut) = slot.take() else {
        // Either already completed, or another poll is in flight (the
        // repost-on-wake scheme never issues two concurrent polls of the
        // same future in practice, since a fresh wake only fires after the
        // prior poll stored the future back or consumed it on completion).
        return;
    };
    drop(slot);

    let waker = Waker::from(state.clone());
    let ctx = TaskContext {
        executor: state.current_executor.lock().unwrap().clone(),
        io_executor: state.io_executor.clone(),
        stop_token: state.stop_source.token(),
    };
    let _guard = ContextGuard::enter(ctx);
    let mut cx = Context::from_waker(&waker);

    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| fut.as_mut().poll(&mut cx)));

    // `switch_to` mutates the thread-local context's executor directly
    // (rather than going through `state`, which it has no access to); carry
    // that change back into `state.current_executor` here, while the guard
    // still has it installed, so the next `wake_by_ref` posts to the new
    // executor instead of looping back to the old one.
    let new_executor = CURRENT.with(|c| c.borrow().as_ref().map(|ctx| ctx.executor.clone()));
    if let Some(new_executor) = new_executor {
        *state.current_executor.lock().unwrap() = new_executor;
    }

    match outcome {
        Ok(Poll::Pending) => {
            *state.future.lock().unwrap() = Some(fut);
        }
        Ok(Poll::Ready(value)) => {
            finish(&state, Ok(value));
        }
        Err(panic) => {
            finish(&state, Err(panic));
        }
    }
}

fn finish<T: Send + 'static>(state: &Arc<TaskState<T>>, result: std::thread::Result<T>) {
    if let Some(on_complete) = state.on_complete.lock().unwrap().take() {
        on_complete(result);
    }
}

fn spawn_with<F>(
    executor: AnyExecutor,
    io_executor: Option<AnyIoExecutor>,
    parent_stop_token: Option<&StopToken>,
    fut: F,
    on_complete: Box<dyn FnOnce(std::thread::Result<F::Output>) + Send>,
) -> StopSource
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let stop_source = StopSource::new();
    // A child task is cancelled whenever its parent scope is, but cancelling
    // the child does not propagate back up (the original's documented
    // "stop composes downward only").
    let child_for_link = stop_source.clone();
    let parent_link = parent_stop_token.map(|parent| {
        StopCallback::new(parent, move || {
            child_for_link.request_stop();
        })
    });

    let state = Arc::new(TaskState {
        future: Mutex::new(Some(Box::pin(fut))),
        current_executor: Mutex::new(executor),
        io_executor,
        stop_source: stop_source.clone(),
        on_complete: Mutex::new(Some(on_complete)),
        _parent_link: parent_link,
    });
    poll_task(state);
    stop_source
}

/// A join handle for a [`co_spawn`]ed task: a future that resolves to the
/// task's output once it completes, or resumes the task's panic if it
/// panicked (mirroring an unjoined `std::thread::JoinHandle`).
pub struct Task<T> {
    slot: Arc<JoinSlot<T>>,
    stop_source: StopSource,
}

impl<T> Task<T> {
    /// A token that, when stopped, requests cancellation of this task (and
    /// transitively, any task it spawned with this one as parent).
    pub fn stop_source(&self) -> &StopSource {
        &self.stop_source
    }
}

impl<T: Send + 'static> Future for Task<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        *self.slot.waker.lock().unwrap() = Some(cx.waker().clone());
        match self.slot.result.lock().unwrap().take() {
            Some(Ok(value)) => Poll::Ready(value),
            Some(Err(panic)) => std::panic::resume_unwind(panic),
            None => Poll::Pending,
        }
    }
}

/// Spawn `fut` onto `executor`, plain (no reactor/timer access).
pub fn co_spawn<F>(executor: AnyExecutor, fut: F) -> Task<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    spawn_inner(executor, None, None, fut)
}

/// Spawn `fut` as a child of whichever task calls this: its stop source is
/// linked to `parent`, so stopping `parent` (including the ambient stop of
/// the calling task itself, via `this_coro::stop_token()`) requests stop on
/// the child too. Used by [`crate::timers_compose`]'s race/join combinators.
pub fn co_spawn_linked<F>(executor: AnyExecutor, parent: &StopToken, fut: F) -> Task<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    spawn_inner(executor, None, Some(parent), fut)
}

/// Spawn `fut` onto an IO-capable executor, giving the task access to
/// `this_coro::io_executor()`.
pub fn co_spawn_io<F>(executor: AnyIoExecutor, fut: F) -> Task<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    spawn_inner(executor.as_any(), Some(executor), None, fut)
}

fn spawn_inner<F>(
    executor: AnyExecutor,
    io_executor: Option<AnyIoExecutor>,
    parent_stop_token: Option<&StopToken>,
    fut: F,
) -> Task<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let slot = JoinSlot::new();
    let slot_for_complete = slot.clone();
    let stop_source = spawn_with(
        executor,
        io_executor,
        parent_stop_token,
        fut,
        Box::new(move |r| slot_for_complete.complete(r)),
    );
    Task { slot, stop_source }
}

/// A type whose spawned-and-forgotten outcome is worth logging.
/// Implemented for the two shapes [`detached`] is expected to see; anything
/// that needs richer handling should `co_spawn` and inspect the
/// [`Task`] instead.
pub trait LogOutcome {
    fn log_if_failed(&self);
}

impl LogOutcome for () {
    fn log_if_failed(&self) {}
}

impl LogOutcome for crate::error::VoidResult {
    fn log_if_failed(&self) {
        if let Err(e) = self {
            log::warn!("detached task failed: {e}");
        }
    }
}

/// Fire-and-forget spawn (spec's `detached_t` completion token). Unlike
/// silently dropping a [`Task`], a panic inside `fut` is logged rather than
/// discarded, and an `Err` result (for tasks returning
/// [`VoidResult`](crate::error::VoidResult)) is logged too.
pub fn detached<F>(executor: AnyExecutor, fut: F)
where
    F: Future + Send + 'static,
    F::Output: LogOutcome + Send + 'static,
{
    spawn_with(
        executor,
        None,
        None,
        fut,
        Box::new(|r: std::thread::Result<F::Output>| match r {
            Ok(value) => value.log_if_failed(),
            Err(panic) => log::error!("detached task panicked: {}", panic_message(&panic)),
        }),
    );
}

fn panic_message(panic: &PanicPayload) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Run `fut` with `this_coro::executor()` reporting `executor` for the
/// duration of each poll, without changing which executor actually drives
/// the polls (unlike [`stop_token::StopSource::request_stop`]-style
/// migration, this is a reporting-only override used to compose sub-awaiters
/// that must appear bound to a specific executor).
pub fn bind_executor<F: Future>(executor: AnyExecutor, fut: F) -> BindExecutor<F> {
    BindExecutor { inner: fut, executor }
}

pub struct BindExecutor<F> {
    inner: F,
    executor: AnyExecutor,
}

impl<F: Future> Future for BindExecutor<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = unsafe { self.get_unchecked_mut() };
        let swapped = CURRENT.with(|c| {
            let mut borrow = c.borrow_mut();
            let mut ctx = borrow
                .clone()
                .expect("bind_executor: used outside a spawned task");
            ctx.executor = this.executor.clone();
            borrow.replace(ctx)
        });
        let inner = unsafe { Pin::new_unchecked(&mut this.inner) };
        let res = inner.poll(cx);
        CURRENT.with(|c| *c.borrow_mut() = swapped);
        res
    }
}

/// Run `fut` with `this_coro::stop_token()` reporting `token` for the
/// duration of each poll.
pub fn bind_stop_token<F: Future>(token: StopToken, fut: F) -> BindStopToken<F> {
    BindStopToken { inner: fut, token }
}

pub struct BindStopToken<F> {
    inner: F,
    token: StopToken,
}

impl<F: Future> Future for BindStopToken<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = unsafe { self.get_unchecked_mut() };
        let swapped = CURRENT.with(|c| {
            let mut borrow = c.borrow_mut();
            let mut ctx = borrow
                .clone()
                .expect("bind_stop_token: used outside a spawned task");
            ctx.stop_token = this.token.clone();
            borrow.replace(ctx)
        });
        let inner = unsafe { Pin::new_unchecked(&mut this.inner) };
        let res = inner.poll(cx);
        CURRENT.with(|c| *c.borrow_mut() = swapped);
        res
    }
}

/// Move the currently-running task onto a different executor: awaiting this
/// suspends on the current executor and resumes on `target`, after which
/// `this_coro::executor()` reports `target`. Registrations already made
/// against the old executor's reactor (e.g. a socket read in flight) are
/// not migrated — only where the task's *own* future resumes, matching the
/// Open Question resolution that `switch_to` is a scheduling hint, not a
/// registration migration.
pub fn switch_to(target: AnyExecutor) -> SwitchTo {
    SwitchTo {
        target: Some(target),
    }
}

pub struct SwitchTo {
    target: Option<AnyExecutor>,
}

impl Future for SwitchTo {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        match self.target.take() {
            Some(target) => {
                CURRENT.with(|c| {
                    let mut borrow = c.borrow_mut();
                    if let Some(ctx) = borrow.as_mut() {
                        ctx.executor = target.clone();
                    }
                });
                let waker = cx.waker().clone();
                target.post(Box::new(move || waker.wake()));
                Poll::Pending
            }
            None => Poll::Ready(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::InlineExecutor;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn co_spawn_runs_to_completion_inline() {
        let ex = AnyExecutor::new(InlineExecutor);
        let task = co_spawn(ex, async { 1 + 1 });
        // InlineExecutor drives every wake synchronously, so a task with no
        // pending awaits completes during `spawn_inner`'s first poll.
        let slot = task.slot.result.lock().unwrap().take().unwrap();
        assert_eq!(slot.unwrap(), 2);
    }

    #[test]
    fn this_coro_executor_visible_inside_task() {
        let ex = AnyExecutor::new(InlineExecutor);
        let seen = Arc::new(std::sync::Mutex::new(false));
        let seen2 = seen.clone();
        let ex_id = ex.identity();
        let _task = co_spawn(ex, async move {
            *seen2.lock().unwrap() = this_coro::executor().identity() == ex_id;
        });
        assert!(*seen.lock().unwrap());
    }

    #[test]
    fn detached_logs_panic_without_propagating() {
        let ex = AnyExecutor::new(InlineExecutor);
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        detached(ex, async move {
            ran2.store(true, Ordering::SeqCst);
            panic!("boom");
        });
        assert!(ran.load(Ordering::SeqCst));
    }
}
