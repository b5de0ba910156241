//! TCP stream/listener facades, built on [`super::SocketHandle`]. Socket
//! creation follows mio's own `net/tcp/stream.rs`: a non-blocking
//! `socket2::Socket` constructed directly rather than going through
//! `std::net::TcpStream::connect` (which has no non-blocking connect path
//! of its own).

use std::io::{Read, Write};
use std::net::SocketAddr;

use socket2::{Domain, Protocol, Socket, Type};

use super::{is_in_progress, SocketHandle, SocketOption};
use crate::endpoint::Endpoint;
use crate::error::{Error, IoResult, Kind};
use crate::executor::AnyIoExecutor;

pub struct TcpStream {
    handle: SocketHandle,
}

impl TcpStream {
    pub async fn connect(io: AnyIoExecutor, addr: SocketAddr) -> IoResult<TcpStream> {
        let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP)).map_err(Error::from)?;
        let handle = SocketHandle::from_socket2(io, socket)?;

        let in_progress = handle.with_socket(|s| match s.connect(&addr.into()) {
            Ok(()) => Ok(false),
            Err(e) if is_in_progress(&e) => Ok(true),
            Err(e) => Err(Error::from(e)),
        })?;
        if in_progress {
            handle.wait_writable().await?;
            let pending = handle.with_socket(|s| s.take_error().map_err(Error::from))?;
            if let Some(err) = pending {
                return Err(Error::from(err));
            }
        }
        Ok(TcpStream { handle })
    }

    pub(crate) fn from_handle(handle: SocketHandle) -> TcpStream {
        TcpStream { handle }
    }

    pub fn local_endpoint(&self) -> IoResult<Endpoint> {
        self.handle
            .with_socket(|s| s.local_addr().map_err(Error::from))
            .map(|a| Endpoint::tcp(a.as_socket().expect("AF_INET/AF_INET6 local addr")))
    }

    pub fn peer_endpoint(&self) -> IoResult<Endpoint> {
        self.handle
            .with_socket(|s| s.peer_addr().map_err(Error::from))
            .map(|a| Endpoint::tcp(a.as_socket().expect("AF_INET/AF_INET6 peer addr")))
    }

    pub fn set_option<O: SocketOption>(&self, option: O, value: O::Value) -> IoResult<()> {
        self.handle.with_socket(|s| option.set(s, value))
    }

    pub fn get_option<O: SocketOption>(&self, option: O) -> IoResult<O::Value> {
        self.handle.with_socket(|s| option.get(s))
    }

    pub async fn async_read(&self, buf: &mut [u8]) -> IoResult<usize> {
        let n = self
            .handle
            .read_with(|s| (&*s).read(buf))
            .await?;
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

    pub fn shutdown(&self, how: std::net::Shutdown) -> IoResult<()> {
        self.handle.with_socket(|s| s.shutdown(how).map_err(Error::from))
    }

    pub fn cancel(&self) {
        self.handle.cancel();
    }

    pub fn close(&self) {
        self.handle.close();
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_open()
    }
}

impl Clone for TcpStream {
    fn clone(&self) -> TcpStream {
        TcpStream {
            handle: self.handle.clone(),
        }
    }
}

pub struct TcpListener {
    handle: SocketHandle,
}

impl TcpListener {
    pub fn bind(io: AnyIoExecutor, addr: SocketAddr) -> IoResult<TcpListener> {
        let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP)).map_err(Error::from)?;
        socket.set_reuse_address(true).map_err(Error::from)?;
        socket.bind(&addr.into()).map_err(Error::from)?;
        socket.listen(1024).map_err(Error::from)?;
        let handle = SocketHandle::from_socket2(io, socket)?;
        Ok(TcpListener { handle })
    }

    pub fn local_endpoint(&self) -> IoResult<Endpoint> {
        self.handle
            .with_socket(|s| s.local_addr().map_err(Error::from))
            .map(|a| Endpoint::tcp(a.as_socket().expect("AF_INET/AF_INET6 local addr")))
    }

    pub async fn accept(&self) -> IoResult<(TcpStream, Endpoint)> {
        let (socket, addr) = self
            .handle
            .read_with(|s| s.accept())
            .await?;
        let io = self.handle.io().clone();
        let handle = SocketHandle::from_socket2(io, socket)?;
        let endpoint = Endpoint::tcp(addr.as_socket().expect("AF_INET/AF_INET6 peer addr"));
        Ok((TcpStream::from_handle(handle), endpoint))
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
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[test]
    fn echoes_one_round_trip() {
        let mut ctx = IoContext::new().unwrap();
        let io = ctx.get_executor().as_io_executor();
        let listener = TcpListener::bind(io.clone(), "127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_endpoint().unwrap().as_socket_addr().unwrap();
        let ok = Arc::new(AtomicBool::new(false));
        let ok2 = ok.clone();

        let io2 = io.clone();
        co_spawn_io(io.clone(), async move {
            let (stream, _peer) = listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            stream.async_read(&mut buf).await.unwrap();
            stream.async_write_all(&buf).await.unwrap();
        });

        co_spawn_io(io2, async move {
            let client = TcpStream::connect(io, addr).await.unwrap();
            client.async_write_all(b"hello").await.unwrap();
            let mut buf = [0u8; 5];
            client.async_read(&mut buf).await.unwrap();
            ok2.store(&buf == b"hello", Ordering::SeqCst);
        });

        ctx.run_for(Duration::from_millis(500)).unwrap();
        assert!(ok.load(Ordering::SeqCst));
    }

    #[test]
    fn socket_options_round_trip() {
        let mut ctx = IoContext::new().unwrap();
        let io = ctx.get_executor().as_io_executor();
        let listener = TcpListener::bind(io.clone(), "127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_endpoint().unwrap().as_socket_addr().unwrap();

        let slot: Arc<Mutex<Option<TcpStream>>> = Arc::new(Mutex::new(None));
        let slot2 = slot.clone();
        co_spawn_io(io.clone(), async move {
            let s = TcpStream::connect(io, addr).await.unwrap();
            *slot2.lock().unwrap() = Some(s);
        });
        ctx.run_for(Duration::from_millis(200)).unwrap();
        let client = slot.lock().unwrap().take().unwrap();

        client.set_option(crate::socket::NoDelay, true).unwrap();
        assert!(client.get_option(crate::socket::NoDelay).unwrap());

        client.set_option(crate::socket::SendBufferSize, 64 * 1024).unwrap();
        assert!(client.get_option(crate::socket::SendBufferSize).unwrap() > 0);

        client.set_option(crate::socket::ReusePort, true).unwrap();
        assert!(client.get_option(crate::socket::ReusePort).unwrap());
    }
}
