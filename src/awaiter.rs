//! Generic operation awaiter: the one bridge every reactor- or timer-backed
//! async operation goes through to become a pollable [`Future`].
//!
//! Ported from `include/iocoro/detail/operation_awaiter.hpp`. The original
//! captures the coroutine promise's executor and stop token in
//! `await_suspend`, installs a `stop_callback` that calls back into the
//! operation's cancel handle, then invokes a factory to actually register
//! with the reactor or timer registry. This is the same shape, with the
//! promise's fields read via [`crate::coro::this_coro`] instead of `h.promise()`.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use crate::coro::stop_token::StopCallback;

/// Something that undoes a registration (reactor `cancel`, timer `cancel`)
/// and ensures the operation's result eventually arrives via
/// [`complete`], with an aborted value.
pub struct CancelHandle(Box<dyn FnOnce() + Send>);

impl CancelHandle {
    pub fn new(f: impl FnOnce() + Send + 'static) -> CancelHandle {
        CancelHandle(Box::new(f))
    }

    fn invoke(self) {
        (self.0)()
    }
}

pub(crate) struct Shared<T> {
    result: Option<T>,
    waker: Option<Waker>,
    cancel: Option<CancelHandle>,
}

/// Deliver `value` as the operation's outcome and wake whoever's polling.
/// Called from the `Completion` adapter a given call site builds around its
/// reactor/timer registration, on both the success and the abort path.
pub(crate) fn complete<T>(shared: &Arc<Mutex<Shared<T>>>, value: T) {
    let mut s = shared.lock().unwrap();
    // The operation resolved on its own; any cancel handle still installed
    // would now be acting on an already-removed registration.
    s.cancel = None;
    s.result = Some(value);
    if let Some(w) = s.waker.take() {
        w.wake();
    }
}

type RegisterFn<T> = Box<dyn FnOnce(Arc<Mutex<Shared<T>>>) -> CancelHandle + Send>;

/// A one-shot awaitable around a single reactor/timer registration.
/// `register` runs exactly once, on first poll: it performs the actual
/// `reactor.register`/`timers.add` call and returns a [`CancelHandle`] that
/// a stop request will invoke.
pub struct OperationAwaiter<T> {
    shared: Arc<Mutex<Shared<T>>>,
    register: Option<RegisterFn<T>>,
    // Kept alive for the awaiter's lifetime; dropping it early would
    // deregister the stop callback before the operation can observe a stop
    // request raised after the first poll.
    stop_cb: Option<StopCallback>,
}

impl<T: Send + 'static> OperationAwaiter<T> {
    pub fn new<F>(register: F) -> OperationAwaiter<T>
    where
        F: FnOnce(Arc<Mutex<Shared<T>>>) -> CancelHandle + Send + 'static,
    {
        OperationAwaiter {
            shared: Arc::new(Mutex::new(Shared {
                result: None,
                waker: None,
                cancel: None,
            })),
            register: Some(Box::new(register)),
            stop_cb: None,
        }
    }
}

impl<T> Drop for OperationAwaiter<T> {
    fn drop(&mut self) {
        // A losing side of a race (`with_timeout`, `when_any`) is simply
        // dropped rather than polled to cancellation; make that the same
        // thing, so nothing is left registered with the reactor/timer
        // registry once nobody can observe its result anymore.
        let cancel = self.shared.lock().unwrap().cancel.take();
        if let Some(cancel) = cancel {
            cancel.invoke();
        }
    }
}

impl<T: Send + 'static> Future for OperationAwaiter<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let this = unsafe { self.get_unchecked_mut() };

        if let Some(register) = this.register.take() {
            let cancel = register(this.shared.clone());
            this.shared.lock().unwrap().cancel = Some(cancel);

            let stop_token = crate::coro::this_coro::stop_token();
            let shared_for_stop = this.shared.clone();
            this.stop_cb = Some(StopCallback::new(&stop_token, move || {
                if let Some(cancel) = shared_for_stop.lock().unwrap().cancel.take() {
                    cancel.invoke();
                }
            }));
        }

        let mut shared = this.shared.lock().unwrap();
        if let Some(value) = shared.result.take() {
            return Poll::Ready(value);
        }
        shared.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}
