//! Socket layer and outbound connection establishment.
//!
//! The session only ever talks to sockets through [`Socket`], so every call
//! is non-blocking and "would block" surfaces as `ErrorKind::WouldBlock`.
//! [`TcpConnector`] starts a connect and hands back a stream that may still
//! be connecting; [`probe`] tells the session how that attempt ended once the
//! stream reports writable.

use std::io::{self, ErrorKind};
use std::mem::MaybeUninit;
use std::net::SocketAddrV4;

use socket2::{Domain, Protocol, SockAddr, SockRef, Type};
use tokio::io::Interest;
use tokio::net::TcpStream;

/// Non-blocking byte stream operations.
pub trait Socket {
    /// Read into `buf`. `Ok(0)` is EOF.
    fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write from `buf`, returning how much was accepted.
    fn try_send(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Look at the receive queue without consuming it. `Ok(0)` is EOF,
    /// `Ok(n)` means data is waiting.
    fn try_peek(&mut self) -> io::Result<usize>;

    /// Forget cached write readiness so the next wait blocks until the
    /// socket reports writable again.
    fn clear_write_readiness(&mut self);
}

impl Socket for TcpStream {
    fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.try_read(buf)
    }

    fn try_send(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.try_write(buf)
    }

    fn try_peek(&mut self) -> io::Result<usize> {
        // a refused connect leaves its errno in SO_ERROR
        if let Some(e) = self.take_error()? {
            return Err(e);
        }
        let mut scratch = [MaybeUninit::<u8>::uninit(); 1];
        SockRef::from(&*self).peek(&mut scratch)
    }

    fn clear_write_readiness(&mut self) {
        // tokio drops the readiness when the closure would block
        let _ = self.try_io(Interest::WRITABLE, || {
            Err::<(), _>(io::Error::from(ErrorKind::WouldBlock))
        });
    }
}

/// Opens outbound connections for a session.
pub trait Connector {
    type Stream: Socket;

    /// Start connecting to `target`. The returned stream may still be
    /// connecting; completion is confirmed with [`probe`].
    fn connect(&mut self, target: SocketAddrV4) -> io::Result<Self::Stream>;
}

/// Connects plain TCP sockets and registers them with the tokio reactor.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Stream = TcpStream;

    fn connect(&mut self, target: SocketAddrV4) -> io::Result<TcpStream> {
        let socket = socket2::Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nonblocking(true)?;
        socket.set_nodelay(true)?;

        match socket.connect(&SockAddr::from(target)) {
            Ok(()) => {}
            Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {}
            Err(e) => return Err(e),
        }

        TcpStream::from_std(socket.into())
    }
}

/// Outcome of checking a connect attempt.
#[derive(Debug)]
pub enum ConnectProbe {
    /// The connection is up.
    Connected,
    /// The attempt has not finished yet.
    Pending,
    /// The attempt failed: refused, unreachable, reset or closed at once.
    Failed(io::Error),
}

/// Classify a connect attempt after its socket reported writable.
///
/// Writability fires for both success and failure, so the socket is peeked:
/// data or "would block" means connected, `NotConnected` means still in
/// progress, EOF or any other error means the attempt failed.
pub fn probe<S: Socket + ?Sized>(socket: &mut S) -> ConnectProbe {
    match socket.try_peek() {
        Ok(0) => ConnectProbe::Failed(io::Error::new(
            ErrorKind::UnexpectedEof,
            "remote closed while connecting",
        )),
        Ok(_) => ConnectProbe::Connected,
        Err(e) if e.kind() == ErrorKind::WouldBlock => ConnectProbe::Connected,
        Err(e) if e.kind() == ErrorKind::NotConnected => ConnectProbe::Pending,
        Err(e) if e.kind() == ErrorKind::Interrupted => ConnectProbe::Pending,
        Err(e) => ConnectProbe::Failed(e),
    }
}
