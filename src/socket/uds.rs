//! Unix-domain stream facade: the third protocol tag alongside
//! [`super::tcp`] and [`super::udp`], sharing the same [`super::SocketHandle`]
//! machinery.

use std::io::{Read, Write};
use std::path::Path;

use socket2::{Domain, Socket, Type};

use super::{is_in_progress, SocketHandle};
use crate::endpoint::Endpoint;
use crate::error::{Error, IoResult, Kind};
use crate::executor::AnyIoExecutor;

pub struct UnixStream {
    handle: SocketHandle,
}

impl UnixStream {
    pub async fn connect(io: AnyIoExecutor, path: impl AsRef<Path>) -> IoResult<UnixStream> {
        let socket = Socket::new(Domain::UNIX, Type::STREAM, None).map_err(Error::from)?;
        let handle = SocketHandle::from_socket2(io, socket)?;
        let addr = socket2::SockAddr::unix(path).map_err(Error::from)?;

        let in_progress = handle.with_socket(|s| match s.connect(&addr) {
            Ok(()) => Ok(false),
            Err(e) if is_in_progress(&e) => Ok(true),
            Err(e) => Err(Error::from(e)),
        })?;
        if in_progress {
            handle.wait_writable().await?;
            if let Some(err) = handle.with_socket(|s| s.take_error().map_err(Error::from))? {
                return Err(Error::from(err));
            }
        }
        Ok(UnixStream { handle })
    }

    pub(crate) fn from_handle(handle: SocketHandle) -> UnixStream {
        UnixStream { handle }
    }

    pub async fn async_read(&self, buf: &mut [u8]) -> IoResult<usize> {
        let n = self.handle.read_with(|s| (&*s).read(buf)).await?;
        if n == 0 && !buf.is_empty() {
            return Err(Error::new(Kind::Eof));
        }
        Ok(n)
    }

    pub async fn async_write(&self, buf: &[u8]) -> IoResult<usize> {
        self.handle.write_with(|s| (&*s).write(buf)).await
    }

    pub async fn async_write_all(&self, mut buf: &[u8]) -> IoResult<()> {
        while !buf.is_empty() {
            let n = self.async_write(buf).await?;
            buf = &buf[n..];
        }
        Ok(())
    }

    pub fn cancel(&self) {
        self.handle.cancel();
    }

    pub fn close(&self) {
        self.handle.close();
    }
}

impl Clone for UnixStream {
    fn clone(&self) -> UnixStream {
        UnixStream {
            handle: self.handle.clone(),
        }
    }
}

pub struct UnixListener {
    handle: SocketHandle,
}

impl UnixListener {
    pub fn bind(io: AnyIoExecutor, path: impl AsRef<Path>) -> IoResult<UnixListener> {
        let socket = Socket::new(Domain::UNIX, Type::STREAM, None).map_err(Error::from)?;
        let addr = socket2::SockAddr::unix(path).map_err(Error::from)?;
        socket.bind(&addr).map_err(Error::from)?;
        socket.listen(1024).map_err(Error::from)?;
        let handle = SocketHandle::from_socket2(io, socket)?;
        Ok(UnixListener { handle })
    }

    pub async fn accept(&self) -> IoResult<(UnixStream, Endpoint)> {
        let (socket, _addr) = self.handle.read_with(|s| s.accept()).await?;
        let io = self.handle.io().clone();
        let handle = SocketHandle::from_socket2(io, socket)?;
        // Unix-domain peer addresses are frequently unnamed (an accepted
        // connection's `sun_path` is empty); report the listener's own bind
        // path since that's the only endpoint a caller can act on.
        let endpoint = Endpoint::unix(Path::new(""));
        Ok((UnixStream::from_handle(handle), endpoint))
    }

    pub fn cancel(&self) {
        self.handle.cancel();
    }

    pub fn close(&self) {
        self.handle.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coro::co_spawn_io;
    use crate::io_context::IoContext;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn echoes_one_round_trip() {
        let dir = std::env::temp_dir().join(format!("iocoro-test-{}.sock", std::process::id()));
        let _ = std::fs::remove_file(&dir);

        let mut ctx = IoContext::new().unwrap();
        let io = ctx.get_executor().as_io_executor();
        let listener = UnixListener::bind(io.clone(), &dir).unwrap();
        let ok = Arc::new(AtomicBool::new(false));
        let ok2 = ok.clone();

        let io2 = io.clone();
        let path = dir.clone();
        co_spawn_io(io.clone(), async move {
            let (stream, _peer) = listener.accept().await.unwrap();
            let mut buf = [0u8; 3];
            stream.async_read(&mut buf).await.unwrap();
            stream.async_write_all(&buf).await.unwrap();
        });

        co_spawn_io(io2, async move {
            let client = UnixStream::connect(io, &path).await.unwrap();
            client.async_write_all(b"hey").await.unwrap();
            let mut buf = [0u8; 3];
            client.async_read(&mut buf).await.unwrap();
            ok2.store(&buf == b"hey", Ordering::SeqCst);
        });

        ctx.run_for(Duration::from_millis(500)).unwrap();
        let _ = std::fs::remove_file(&dir);
        assert!(ok.load(Ordering::SeqCst));
    }
}
