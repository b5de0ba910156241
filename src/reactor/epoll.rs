//! epoll [`Backend`](super::Backend), adapted from mio's
//! `sys/unix/selector/epoll.rs`.
//!
//! Unlike mio we don't need a slab-indexed `Token`: the fd itself is used as
//! the epoll user-data word, since [`super::Reactor`] already keys its
//! interest table by `RawFd`. We also register level-triggered rather than
//! edge-triggered (mio always asks for `EPOLLET`): this runtime's
//! readiness-driven operations already retry the syscall once before
//! suspending, so level-triggered loses nothing and avoids the "perform one
//! opportunistic syscall before suspending" duty edge-triggered backends
//! would otherwise carry.

use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use libc::{EPOLLERR, EPOLLHUP, EPOLLIN, EPOLLOUT};

use super::{Backend, ReadyEvent};
use crate::waker::EventFdWaker;

macro_rules! syscall {
    ($fn:ident ( $($arg:expr),* $(,)* ) ) => {{
        let res = unsafe { libc::$fn($($arg, )*) };
        if res == -1 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(res)
        }
    }};
}

pub struct EpollBackend {
    ep: OwnedFd,
    waker: EventFdWaker,
    events: Vec<libc::epoll_event>,
}

impl EpollBackend {
    pub fn new() -> io::Result<EpollBackend> {
        let ep = unsafe { OwnedFd::from_raw_fd(syscall!(epoll_create1(libc::EPOLL_CLOEXEC))?) };
        let waker = EventFdWaker::new()?;
        let backend = EpollBackend {
            ep,
            waker,
            events: Vec::with_capacity(1024),
        };
        backend.raw_register(backend.waker.as_raw_fd(), true, false)?;
        Ok(backend)
    }

    fn raw_register(&self, fd: RawFd, want_read: bool, want_write: bool) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: interests_to_epoll(want_read, want_write),
            u64: fd as u64,
        };
        syscall!(epoll_ctl(self.ep.as_raw_fd(), libc::EPOLL_CTL_ADD, fd, &mut event)).map(|_| ())
    }
}

impl Backend for EpollBackend {
    type Waker = EventFdWaker;

    fn register(&self, fd: RawFd, want_read: bool, want_write: bool) -> io::Result<()> {
        self.raw_register(fd, want_read, want_write)
    }

    fn reregister(&self, fd: RawFd, want_read: bool, want_write: bool) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: interests_to_epoll(want_read, want_write),
            u64: fd as u64,
        };
        syscall!(epoll_ctl(self.ep.as_raw_fd(), libc::EPOLL_CTL_MOD, fd, &mut event)).map(|_| ())
    }

    fn deregister(&self, fd: RawFd) -> io::Result<()> {
        syscall!(epoll_ctl(
            self.ep.as_raw_fd(),
            libc::EPOLL_CTL_DEL,
            fd,
            std::ptr::null_mut()
        ))
        .map(|_| ())
    }

    fn wait(&mut self, timeout: Option<Duration>) -> io::Result<Vec<ReadyEvent>> {
        let timeout_ms = timeout
            .map(|to| {
                // Round up so sub-millisecond timeouts don't collapse to 0
                // (which would mean "return immediately").
                to.checked_add(Duration::from_nanos(999_999))
                    .unwrap_or(to)
                    .as_millis() as libc::c_int
            })
            .unwrap_or(-1);

        self.events.clear();
        self.events.resize(
            self.events.capacity().max(1024),
            libc::epoll_event { events: 0, u64: 0 },
        );
        let n = loop {
            match syscall!(epoll_wait(
                self.ep.as_raw_fd(),
                self.events.as_mut_ptr(),
                self.events.len() as i32,
                timeout_ms,
            )) {
                Ok(n) => break n,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        };
        self.events.truncate(n as usize);

        let mut ready = Vec::with_capacity(n as usize);
        for ev in &self.events {
            let fd = ev.u64 as RawFd;
            if fd == self.waker.as_raw_fd() {
                self.waker.ack();
                continue;
            }
            let flags = ev.events as libc::c_int;
            ready.push(ReadyEvent {
                fd,
                readable: flags & EPOLLIN != 0,
                writable: flags & EPOLLOUT != 0,
                error: flags & (EPOLLERR | EPOLLHUP) != 0,
            });
        }
        Ok(ready)
    }

    fn waker(&self) -> EventFdWaker {
        self.waker.clone()
    }
}

fn interests_to_epoll(want_read: bool, want_write: bool) -> u32 {
    let mut kind = 0;
    if want_read {
        kind |= EPOLLIN;
    }
    if want_write {
        kind |= EPOLLOUT;
    }
    kind as u32
}

impl AsRawFd for EpollBackend {
    fn as_raw_fd(&self) -> RawFd {
        self.ep.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_wakes_on_waker() {
        let mut backend = EpollBackend::new().unwrap();
        let waker = backend.waker();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            waker.wake().unwrap();
        });
        let events = backend.wait(Some(Duration::from_secs(5))).unwrap();
        assert!(events.is_empty());
        handle.join().unwrap();
    }
}
