//! A single-threaded, coroutine-based asynchronous I/O runtime for Linux.
//!
//! `iocoro` composes a readiness reactor (epoll, optionally io_uring), a
//! timer registry, a posted-work queue, and a cooperative thread pool,
//! behind a coroutine/awaitable model built on `std::future::Future`. A thin
//! networking façade (TCP, UDP, Unix-domain sockets) sits on top of the
//! non-blocking socket core.
//!
//! ```no_run
//! use iocoro::io_context::IoContext;
//! use iocoro::coro::co_spawn_io;
//! use iocoro::socket::tcp::TcpStream;
//!
//! let mut ctx = IoContext::new().unwrap();
//! let io = ctx.get_executor().as_io_executor();
//! co_spawn_io(io.clone(), async move {
//!     let stream = TcpStream::connect(io, "127.0.0.1:9000".parse().unwrap()).await.unwrap();
//!     stream.async_write_all(b"ping").await.unwrap();
//! });
//! ctx.run().unwrap();
//! ```
//!
//! See the [`features`] module for this crate's Cargo feature flags.

#![warn(rust_2018_idioms)]

#[macro_use]
mod macros;

pub mod error;
pub mod interest;
pub mod token;

cfg_os_poll! {
    pub mod waker;
    pub mod reactor;
    pub mod timer;
    pub mod posted_queue;
    pub mod io_context;
}

pub mod executor;
pub mod coro;
pub mod awaiter;
pub mod timers_compose;
pub mod endpoint;

cfg_net! {
    pub mod socket;
    pub mod algorithms;
}

pub use error::{Error, IoResult, VoidResult};
pub use endpoint::Endpoint;

/// Documentation-only module describing this crate's Cargo feature flags,
/// in the style of mio's own `features` doc module.
///
/// - `os-poll` (default): the reactor, timer registry, posted queue and
///   [`IoContext`](crate::io_context::IoContext) itself. Disabling it leaves
///   only the executor/coroutine primitives that don't need a live reactor
///   (`InlineExecutor`, `ThreadPool`, `Strand`, `co_spawn` onto either).
/// - `net` (default): [`socket`](crate::socket) (TCP/UDP/Unix-domain
///   facades) and [`algorithms`](crate::algorithms). Depends on `os-poll`
///   being enabled at the call site, since every facade registers with a
///   reactor-backed [`AnyIoExecutor`](crate::executor::AnyIoExecutor).
/// - `io-uring`: selects the io_uring reactor backend instead of epoll.
///   Reserved — see `reactor::io_uring` for the current state.
pub mod features {}
