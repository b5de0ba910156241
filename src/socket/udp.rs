//! UDP socket facade.

use std::net::SocketAddr;

use socket2::{Domain, Protocol, Socket, Type};

use super::SocketHandle;
use crate::endpoint::Endpoint;
use crate::error::{Error, IoResult};
use crate::executor::AnyIoExecutor;

pub struct UdpSocket {
    handle: SocketHandle,
}

impl UdpSocket {
    pub fn bind(io: AnyIoExecutor, addr: SocketAddr) -> IoResult<UdpSocket> {
        let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP)).map_err(Error::from)?;
        socket.bind(&addr.into()).map_err(Error::from)?;
        let handle = SocketHandle::from_socket2(io, socket)?;
        Ok(UdpSocket { handle })
    }

    pub fn local_endpoint(&self) -> IoResult<Endpoint> {
        self.handle
            .with_socket(|s| s.local_addr().map_err(Error::from))
            .map(|a| Endpoint::tcp(a.as_socket().expect("AF_INET/AF_INET6 local addr")))
    }

    /// Connect the socket to a default peer so `async_send`/`async_recv`
    /// can be used instead of the `_to`/`_from` variants.
    pub fn connect(&self, addr: SocketAddr) -> IoResult<()> {
        self.handle.with_socket(|s| s.connect(&addr.into()).map_err(Error::from))
    }

    pub async fn async_send_to(&self, buf: &[u8], addr: SocketAddr) -> IoResult<usize> {
        let target = addr.into();
        self.handle
            .write_with(|s| s.send_to(buf, &target))
            .await
    }

    pub async fn async_recv_from(&self, buf: &mut [u8]) -> IoResult<(usize, Endpoint)> {
        let (n, from) = self
            .handle
            .read_with(|s| {
                // `recv_from` takes an uninitialized-buffer view; `buf` is
                // already initialized, which is a valid (if conservative)
                // `MaybeUninit<u8>` slice to hand it.
                let uninit = unsafe {
                    std::slice::from_raw_parts_mut(
                        buf.as_mut_ptr().cast::<std::mem::MaybeUninit<u8>>(),
                        buf.len(),
                    )
                };
                s.recv_from(uninit)
            })
            .await?;
        let endpoint = Endpoint::tcp(from.as_socket().expect("AF_INET/AF_INET6 peer addr"));
        Ok((n, endpoint))
    }

    pub async fn async_send(&self, buf: &[u8]) -> IoResult<usize> {
        self.handle.write_with(|s| std::io::Write::write(&mut &*s, buf)).await
    }

    pub async fn async_recv(&self, buf: &mut [u8]) -> IoResult<usize> {
        self.handle.read_with(|s| std::io::Read::read(&mut &*s, buf)).await
    }

    pub fn cancel(&self) {
        self.handle.cancel();
    }

    pub fn close(&self) {
        self.handle.close();
    }
}
