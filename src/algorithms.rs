//! Composed stream algorithms: full reads/writes and delimiter search,
//! built purely on top of each facade's partial `async_read`/`async_write`
//! primitive via the [`AsyncReadWrite`] seam, so they work identically over
//! TCP and Unix-domain streams without duplicating the loop.

use std::future::Future;
use std::pin::Pin;

use crate::error::{Error, IoResult, Kind};
use crate::socket::tcp::TcpStream;
use crate::socket::uds::UnixStream;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A stream that can perform one partial read or write. Implemented for
/// every byte-stream facade (C11); [`async_read`]/[`async_write`]/
/// [`async_read_until`] are generic over it so they need writing once.
pub trait AsyncReadWrite: Send + Sync {
    fn read_some<'a>(&'a self, buf: &'a mut [u8]) -> BoxFuture<'a, IoResult<usize>>;
    fn write_some<'a>(&'a self, buf: &'a [u8]) -> BoxFuture<'a, IoResult<usize>>;
}

impl AsyncReadWrite for TcpStream {
    fn read_some<'a>(&'a self, buf: &'a mut [u8]) -> BoxFuture<'a, IoResult<usize>> {
        Box::pin(self.async_read(buf))
    }
    fn write_some<'a>(&'a self, buf: &'a [u8]) -> BoxFuture<'a, IoResult<usize>> {
        Box::pin(self.async_write(buf))
    }
}

impl AsyncReadWrite for UnixStream {
    fn read_some<'a>(&'a self, buf: &'a mut [u8]) -> BoxFuture<'a, IoResult<usize>> {
        Box::pin(self.async_read(buf))
    }
    fn write_some<'a>(&'a self, buf: &'a [u8]) -> BoxFuture<'a, IoResult<usize>> {
        Box::pin(self.async_write(buf))
    }
}

/// Read until `buf` is entirely filled. EOF before then surfaces as the
/// `eof` error the underlying partial read already raises on a short read.
pub async fn async_read<S: AsyncReadWrite + ?Sized>(stream: &S, mut buf: &mut [u8]) -> IoResult<()> {
    while !buf.is_empty() {
        let n = stream.read_some(buf).await?;
        buf = &mut buf[n..];
    }
    Ok(())
}

/// Write all of `buf`. A partial write that makes zero progress on a retry
/// is treated as a dead peer.
pub async fn async_write<S: AsyncReadWrite + ?Sized>(stream: &S, mut buf: &[u8]) -> IoResult<()> {
    while !buf.is_empty() {
        let n = stream.write_some(buf).await?;
        if n == 0 {
            return Err(Error::new(Kind::BrokenPipe));
        }
        buf = &buf[n..];
    }
    Ok(())
}

/// Append into `out` until `delim` is found, returning its index within
/// `out`. Only the suffix appended since the last search is re-scanned —
/// correct and cheap for a single-byte delimiter, which can never straddle
/// a chunk boundary the way a multi-byte one could.
///
/// EOF before `delim` propagates as `eof` (from the underlying partial
/// read); exceeding `max` bytes without finding `delim` is `message_size`.
pub async fn async_read_until<S: AsyncReadWrite + ?Sized>(
    stream: &S,
    out: &mut Vec<u8>,
    delim: u8,
    max: usize,
) -> IoResult<usize> {
    let mut searched = 0;
    loop {
        if let Some(pos) = out[searched..].iter().position(|&b| b == delim) {
            return Ok(searched + pos);
        }
        searched = out.len();
        if out.len() >= max {
            return Err(Error::new(Kind::MessageSize));
        }
        let mut chunk = [0u8; 512];
        let n = stream.read_some(&mut chunk).await?;
        out.extend_from_slice(&chunk[..n]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coro::co_spawn_io;
    use crate::io_context::IoContext;
    use crate::socket::tcp::{TcpListener, TcpStream};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn async_read_fills_exact_buffer_across_partial_writes() {
        let mut ctx = IoContext::new().unwrap();
        let io = ctx.get_executor().as_io_executor();
        let listener = TcpListener::bind(io.clone(), "127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_endpoint().unwrap().as_socket_addr().unwrap();
        let ok = Arc::new(AtomicBool::new(false));
        let ok2 = ok.clone();

        let io2 = io.clone();
        co_spawn_io(io.clone(), async move {
            let (stream, _peer) = listener.accept().await.unwrap();
            // Two small writes, so the reader must loop to fill its buffer.
            async_write(&stream, b"ab").await.unwrap();
            async_write(&stream, b"cde").await.unwrap();
        });

        co_spawn_io(io2, async move {
            let client = TcpStream::connect(io, addr).await.unwrap();
            let mut buf = [0u8; 5];
            async_read(&client, &mut buf).await.unwrap();
            ok2.store(&buf == b"abcde", Ordering::SeqCst);
        });

        ctx.run_for(Duration::from_millis(500)).unwrap();
        assert!(ok.load(Ordering::SeqCst));
    }

    #[test]
    fn async_read_until_finds_delimiter_across_reads() {
        let mut ctx = IoContext::new().unwrap();
        let io = ctx.get_executor().as_io_executor();
        let listener = TcpListener::bind(io.clone(), "127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_endpoint().unwrap().as_socket_addr().unwrap();
        let found = Arc::new(std::sync::Mutex::new(None));
        let found2 = found.clone();

        let io2 = io.clone();
        co_spawn_io(io.clone(), async move {
            let (stream, _peer) = listener.accept().await.unwrap();
            async_write(&stream, b"hello").await.unwrap();
            async_write(&stream, b"\nworld").await.unwrap();
        });

        co_spawn_io(io2, async move {
            let client = TcpStream::connect(io, addr).await.unwrap();
            let mut out = Vec::new();
            let pos = async_read_until(&client, &mut out, b'\n', 1024).await.unwrap();
            *found2.lock().unwrap() = Some((pos, out[..pos].to_vec()));
        });

        ctx.run_for(Duration::from_millis(500)).unwrap();
        let (pos, line) = found.lock().unwrap().take().unwrap();
        assert_eq!(pos, 5);
        assert_eq!(line, b"hello");
    }

    #[test]
    fn async_read_until_reports_message_size_when_cap_exceeded() {
        let mut ctx = IoContext::new().unwrap();
        let io = ctx.get_executor().as_io_executor();
        let listener = TcpListener::bind(io.clone(), "127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_endpoint().unwrap().as_socket_addr().unwrap();
        let got_err = Arc::new(AtomicBool::new(false));
        let got_err2 = got_err.clone();

        let io2 = io.clone();
        co_spawn_io(io.clone(), async move {
            let (stream, _peer) = listener.accept().await.unwrap();
            async_write(&stream, b"no delimiter here at all").await.unwrap();
        });

        co_spawn_io(io2, async move {
            let client = TcpStream::connect(io, addr).await.unwrap();
            let mut out = Vec::new();
            let res = async_read_until(&client, &mut out, b'\n', 4).await;
            got_err2.store(matches!(res, Err(e) if e.kind() == Kind::MessageSize), Ordering::SeqCst);
        });

        ctx.run_for(Duration::from_millis(500)).unwrap();
        assert!(got_err.load(Ordering::SeqCst));
    }
}
