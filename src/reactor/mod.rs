//! The reactor backend: translates "interested in read/write on this fd"
//! into OS readiness notifications, and exposes a thread-safe
//! [`Waker`](crate::waker::Waker) used by producers on other threads to
//! unblock a pending [`Reactor::wait`].
//!
//! Registration bookkeeping (the fd → slot table, generations) lives here
//! rather than in the OS-facing backend, so that epoll and io_uring present
//! byte-identical externally visible behaviour. The backend trait only has
//! to answer "arm this fd for these directions" and "give me the next batch
//! of ready fds".

use std::collections::HashMap;
use std::os::unix::io::RawFd;

use crate::error::{Error, IoResult, Kind};
use crate::interest::Interest;

pub mod epoll;

cfg_io_uring! {
    pub mod io_uring;
}

/// Which half of a full-duplex fd a registration is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Read,
    Write,
}

/// A completion object: the dispatch-table contract every reactor- or
/// timer-backed operation registers.
///
/// Exactly one of `on_complete`/`on_abort` is invoked, exactly once, on the
/// reactor thread; consuming `self: Box<Self>` means the object's `Drop`
/// impl plays the role of a separate `destroy()` step, run immediately
/// afterwards by the same call.
pub trait Completion {
    /// The readiness condition this completion was waiting for occurred.
    fn on_complete(self: Box<Self>);
    /// The operation was cancelled, or the reactor observed an OS-level
    /// error on this fd.
    fn on_abort(self: Box<Self>, err: Error);
}

/// A (fd, direction, generation) handle returned by [`Reactor::register`].
///
/// The generation is bumped every time a slot is cancelled or fires, so a
/// [`Reactor::cancel`] call racing with a fresh registration that happens to
/// reuse the same fd+direction can never collide with the wrong completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReactorToken {
    fd: RawFd,
    direction: Direction,
    generation: u64,
}

struct Slot {
    generation: u64,
    completion: Option<Box<dyn Completion>>,
}

impl Slot {
    fn new() -> Slot {
        Slot {
            generation: 0,
            completion: None,
        }
    }
}

#[derive(Default)]
struct FdState {
    read: Slot,
    write: Slot,
}

impl Default for Slot {
    fn default() -> Slot {
        Slot::new()
    }
}

/// Batch of readiness notifications returned by one [`Reactor::wait`] call.
pub struct ReadyEvent {
    pub fd: RawFd,
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
}

/// Backend-agnostic readiness multiplexer.
///
/// Owns the per-fd interest table (generations, pending completions) and
/// delegates the actual kernel syscalls to a [`Backend`](self::Backend): the
/// public surface is `update_fd_interest` / `remove_fd_interest` / `wait` /
/// `wakeup`, plus `register`/`cancel` which bridge a completion object to
/// those interest updates.
pub struct Reactor<B: Backend> {
    backend: B,
    fds: HashMap<RawFd, FdState>,
}

impl<B: Backend> Reactor<B> {
    pub fn with_backend(backend: B) -> Reactor<B> {
        Reactor {
            backend,
            fds: HashMap::new(),
        }
    }

    pub fn waker(&self) -> B::Waker {
        self.backend.waker()
    }

    /// Number of fds with at least one completion currently registered.
    /// A non-zero count means [`Reactor::wait`] has something to deliver
    /// eventually, even with no posted work or pending timers.
    pub fn active_registrations(&self) -> usize {
        self.fds.len()
    }

    /// Register a completion for `fd`'s `direction`, arming the
    /// corresponding kernel interest. Returns a token used to later
    /// [`Reactor::cancel`] the registration.
    ///
    /// A slot already holding a completion (a second concurrent operation on
    /// the same fd+direction, e.g. two overlapping `accept()`s on one
    /// listener) is a collision, not a bug: it returns [`Kind::Busy`] rather
    /// than overwriting the first completion, which would silently abandon
    /// it mid-flight.
    pub fn register(
        &mut self,
        fd: RawFd,
        direction: Direction,
        completion: Box<dyn Completion>,
    ) -> IoResult<ReactorToken> {
        let had_entry = self.fds.contains_key(&fd);
        let state = self.fds.entry(fd).or_default();
        let slot = match direction {
            Direction::Read => &mut state.read,
            Direction::Write => &mut state.write,
        };
        if slot.completion.is_some() {
            log::trace!("reactor: busy fd={fd} direction={direction:?}");
            return Err(Error::new(Kind::Busy));
        }
        slot.completion = Some(completion);
        let generation = slot.generation;

        let want_read = state.read.completion.is_some();
        let want_write = state.write.completion.is_some();
        if had_entry {
            self.backend.reregister(fd, want_read, want_write)?;
        } else {
            self.backend.register(fd, want_read, want_write)?;
        }
        log::trace!("reactor: registered fd={fd} direction={direction:?} gen={generation}");
        Ok(ReactorToken {
            fd,
            direction,
            generation,
        })
    }

    /// Idempotently cancel a registration. Returns the completion so the
    /// caller can invoke `on_abort` on it (always on the reactor thread, per
    /// the `iocoro::*` cancellation rule); returns `None` for a stale token
    /// whose completion already fired or was already cancelled.
    pub fn cancel(&mut self, token: ReactorToken) -> Option<Box<dyn Completion>> {
        let state = self.fds.get_mut(&token.fd)?;
        let slot = match token.direction {
            Direction::Read => &mut state.read,
            Direction::Write => &mut state.write,
        };
        if slot.generation != token.generation {
            return None;
        }
        let completion = slot.completion.take();
        slot.generation = slot.generation.wrapping_add(1);
        self.sync_interest(token.fd);
        completion
    }

    /// Idempotently remove all interest in `fd` (called on fd close). Any
    /// pending completions are returned so the caller can abort them.
    pub fn remove_fd_interest(&mut self, fd: RawFd) -> Vec<Box<dyn Completion>> {
        let Some(mut state) = self.fds.remove(&fd) else {
            return Vec::new();
        };
        let _ = self.backend.deregister(fd);
        log::trace!("reactor: removed all interest on fd={fd}");
        state
            .read
            .completion
            .take()
            .into_iter()
            .chain(state.write.completion.take())
            .collect()
    }

    fn sync_interest(&mut self, fd: RawFd) {
        let Some(state) = self.fds.get(&fd) else {
            return;
        };
        let want_read = state.read.completion.is_some();
        let want_write = state.write.completion.is_some();
        if !want_read && !want_write {
            let _ = self.backend.deregister(fd);
            self.fds.remove(&fd);
        } else {
            let _ = self.backend.reregister(fd, want_read, want_write);
        }
    }

    /// Block up to `timeout` (or indefinitely) for readiness, and deliver
    /// every completion whose direction became ready. Returns the number of
    /// completions invoked.
    pub fn wait(&mut self, timeout: Option<std::time::Duration>) -> std::io::Result<usize> {
        let events = self.backend.wait(timeout)?;
        let mut delivered = 0;
        for ev in events {
            delivered += self.deliver(ev);
        }
        Ok(delivered)
    }

    fn deliver(&mut self, ev: ReadyEvent) -> usize {
        let mut delivered = 0;
        let Some(state) = self.fds.get_mut(&ev.fd) else {
            return 0;
        };

        if (ev.readable || ev.error) && state.read.completion.is_some() {
            let completion = state.read.completion.take().unwrap();
            state.read.generation = state.read.generation.wrapping_add(1);
            if ev.error {
                completion.on_abort(Error::new(Kind::InternalError));
            } else {
                completion.on_complete();
            }
            delivered += 1;
        }
        if (ev.writable || ev.error) && state.write.completion.is_some() {
            let completion = state.write.completion.take().unwrap();
            state.write.generation = state.write.generation.wrapping_add(1);
            if ev.error {
                completion.on_abort(Error::new(Kind::InternalError));
            } else {
                completion.on_complete();
            }
            delivered += 1;
        }
        self.sync_interest(ev.fd);
        delivered
    }
}

/// What an OS-specific reactor backend must provide. Kept intentionally
/// narrow, for backend portability, so epoll and io_uring can share the
/// [`Reactor`] bookkeeping above.
pub trait Backend {
    type Waker: crate::waker::Wake + Clone + Send + Sync + 'static;

    fn register(&self, fd: RawFd, want_read: bool, want_write: bool) -> std::io::Result<()>;
    fn reregister(&self, fd: RawFd, want_read: bool, want_write: bool) -> std::io::Result<()>;
    fn deregister(&self, fd: RawFd) -> std::io::Result<()>;
    fn wait(&mut self, timeout: Option<std::time::Duration>) -> std::io::Result<Vec<ReadyEvent>>;
    fn waker(&self) -> Self::Waker;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::epoll::EpollBackend;

    struct Recorder(std::sync::Arc<std::sync::atomic::AtomicUsize>);
    impl Completion for Recorder {
        fn on_complete(self: Box<Self>) {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
        fn on_abort(self: Box<Self>, _err: Error) {
            self.0.fetch_add(100, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[test]
    fn second_registration_on_same_fd_direction_is_busy() {
        let backend = EpollBackend::new().unwrap();
        let mut reactor = Reactor::with_backend(backend);
        let hit = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let (r, _w) = std::os::unix::net::UnixStream::pair().unwrap();
        let fd = std::os::unix::io::AsRawFd::as_raw_fd(&r);
        let _token = reactor
            .register(fd, Direction::Read, Box::new(Recorder(hit.clone())))
            .unwrap();

        let err = reactor
            .register(fd, Direction::Read, Box::new(Recorder(hit.clone())))
            .unwrap_err();
        assert_eq!(err.kind(), Kind::Busy);
        std::mem::drop(r);
    }

    #[test]
    fn cancel_stale_token_is_noop() {
        let backend = EpollBackend::new().unwrap();
        let mut reactor = Reactor::with_backend(backend);
        let hit = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let (r, _w) = std::os::unix::net::UnixStream::pair().unwrap();
        let fd = std::os::unix::io::AsRawFd::as_raw_fd(&r);
        let token = reactor
            .register(fd, Direction::Read, Box::new(Recorder(hit.clone())))
            .unwrap();

        let completion = reactor.cancel(token);
        assert!(completion.is_some());
        // Second cancel on the same (now stale) token must be a no-op.
        assert!(reactor.cancel(token).is_none());
        std::mem::drop(r);
    }
}
