//! Thread-safe wake primitive used to break a pending
//! [`Reactor::wait`](crate::reactor::Reactor::wait) from any thread.
//!
//! Adapted from mio's `sys/unix/waker/eventfd.rs`: an `eventfd` counter,
//! registered for read-readiness with the selector at backend construction
//! time, `write`n to from `wake()` and drained by the backend once its
//! fd comes back as part of a `wait()` batch.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::sync::Arc;

/// What every reactor backend's wake handle must support.
pub trait Wake {
    fn wake(&self) -> io::Result<()>;
}

#[derive(Clone)]
pub struct EventFdWaker {
    fd: Arc<File>,
}

impl EventFdWaker {
    pub(crate) fn new() -> io::Result<EventFdWaker> {
        let raw = syscall(unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) })?;
        let fd = unsafe { File::from_raw_fd(raw) };
        Ok(EventFdWaker { fd: Arc::new(fd) })
    }

    /// Drain the counter. Only needs calling from the reactor thread after
    /// observing the waker's fd as readable.
    pub(crate) fn ack(&self) {
        let mut buf = [0u8; 8];
        let _ = (&*self.fd).read(&mut buf);
    }
}

impl Wake for EventFdWaker {
    fn wake(&self) -> io::Result<()> {
        let buf = 1u64.to_ne_bytes();
        match (&*self.fd).write(&buf) {
            Ok(_) => Ok(()),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                // The counter is close to overflow; draining it and retrying
                // is always safe since `wake()` only needs "at least one".
                self.ack();
                self.wake()
            }
            Err(e) => Err(e),
        }
    }
}

impl AsRawFd for EventFdWaker {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

fn syscall(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}
