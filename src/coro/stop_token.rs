//! Cooperative cancellation primitives.
//!
//! Rust's standard library has no `std::stop_token` equivalent, so this is
//! a direct hand-rolled port of `include/iocoro/stop_token.hpp`: a shared,
//! atomically-flagged cell plus an intrusive callback list. `StopSource`
//! owns the cell; `StopToken` is a cheap clone of a read-only view;
//! `StopCallback` registers a closure that fires exactly once, either
//! immediately (if stop was already requested) or when `request_stop()`
//! runs it.
//!
//! Unlike C++'s `std::stop_callback`, callbacks here are boxed and run
//! under the state's mutex; a callback must not call back into the same
//! `StopSource`/`StopToken` synchronously, mirroring the original's
//! documented re-entrancy restriction.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

type Callback = Box<dyn FnOnce() + Send>;

struct State {
    stopped: AtomicBool,
    next_id: AtomicU64,
    callbacks: Mutex<Option<Vec<(u64, Callback)>>>,
}

impl State {
    fn new() -> Arc<State> {
        Arc::new(State {
            stopped: AtomicBool::new(false),
            next_id: AtomicU64::new(0),
            callbacks: Mutex::new(Some(Vec::new())),
        })
    }

    fn request_stop(&self) -> bool {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return false;
        }
        let pending = self.callbacks.lock().unwrap().take().unwrap_or_default();
        for (_, cb) in pending {
            cb();
        }
        true
    }

    /// Register `cb`. Runs it inline if stop has already been requested;
    /// otherwise stores it and returns an id for later removal.
    fn register(self: &Arc<State>, cb: Callback) -> Option<u64> {
        if self.stopped.load(Ordering::Acquire) {
            cb();
            return None;
        }
        let mut guard = self.callbacks.lock().unwrap();
        match guard.as_mut() {
            Some(list) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                list.push((id, cb));
                Some(id)
            }
            None => {
                drop(guard);
                cb();
                None
            }
        }
    }

    fn unregister(&self, id: u64) {
        if let Some(list) = self.callbacks.lock().unwrap().as_mut() {
            list.retain(|(cid, _)| *cid != id);
        }
    }
}

/// Owns the stop state. Dropping it does not itself request stop (matching
/// `std::stop_source`'s semantics) — call [`StopSource::request_stop`]
/// explicitly, typically from a parent task's teardown path.
#[derive(Clone)]
pub struct StopSource {
    state: Arc<State>,
}

impl StopSource {
    pub fn new() -> StopSource {
        StopSource {
            state: State::new(),
        }
    }

    pub fn token(&self) -> StopToken {
        StopToken {
            state: self.state.clone(),
        }
    }

    /// Request stop. Idempotent: returns `true` the first time, `false` on
    /// any subsequent call. Runs every registered callback synchronously,
    /// on the calling thread, before returning.
    pub fn request_stop(&self) -> bool {
        self.state.request_stop()
    }

    pub fn stop_requested(&self) -> bool {
        self.state.stopped.load(Ordering::Acquire)
    }
}

impl Default for StopSource {
    fn default() -> StopSource {
        StopSource::new()
    }
}

/// A read-only, cheaply-cloned view onto a [`StopSource`]'s state. A
/// "never stops" token (no associated source) is available via
/// [`StopToken::never`] for tasks that aren't bound to any cancellation
/// scope, matching `this_coro::stop_token`'s default when a task has no
/// ancestor stop source.
#[derive(Clone)]
pub struct StopToken {
    state: Arc<State>,
}

impl StopToken {
    pub fn never() -> StopToken {
        StopToken {
            state: State::new(),
        }
    }

    pub fn stop_requested(&self) -> bool {
        self.state.stopped.load(Ordering::Acquire)
    }

    pub fn stop_possible(&self) -> bool {
        // A token backed by a dropped source whose callback list has been
        // emptied by `request_stop` already fired; "possible" here tracks
        // whether a *future* stop could still occur, which for this
        // registry-free design is simply "not yet stopped".
        !self.stop_requested()
    }
}

/// RAII registration of a callback to run when stop is requested. Dropping
/// it deregisters the callback if it hasn't fired yet.
pub struct StopCallback {
    state: Arc<State>,
    id: Option<u64>,
}

impl StopCallback {
    pub fn new<F: FnOnce() + Send + 'static>(token: &StopToken, cb: F) -> StopCallback {
        let state = token.state.clone();
        let id = state.register(Box::new(cb));
        StopCallback { state, id }
    }
}

impl Drop for StopCallback {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.state.unregister(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn callback_fires_once_on_request_stop() {
        let source = StopSource::new();
        let token = source.token();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let _cb = StopCallback::new(&token, move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert!(source.request_stop());
        assert!(!source.request_stop());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn callback_registered_after_stop_runs_immediately() {
        let source = StopSource::new();
        source.request_stop();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let _cb = StopCallback::new(&source.token(), move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_callback_does_not_fire() {
        let source = StopSource::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        drop(StopCallback::new(&source.token(), move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        source.request_stop();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn never_token_never_stops() {
        let token = StopToken::never();
        assert!(!token.stop_requested());
        assert!(token.stop_possible());
    }
}
