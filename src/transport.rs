//! Byte transport under the script channel
//!
//! The read timeout of a connection is mutable state shared by every read
//! on it. `ReadDeadline` is the only way to install one, and it removes the
//! timeout again when dropped, so no exit path can leak it.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// A bidirectional byte stream whose reads can be bounded by a timeout.
pub trait TimedStream: Read + Write {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;
}

impl TimedStream for TcpStream {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }
}

/// Open a TCP connection, bounded by `timeout` per resolved address.
pub fn connect_tcp(host: &str, port: u16, timeout: Duration) -> io::Result<TcpStream> {
    let addrs: Vec<SocketAddr> = (host, port).to_socket_addrs()?.collect();
    let mut last_err = io::Error::new(
        io::ErrorKind::AddrNotAvailable,
        format!("no address resolved for {}:{}", host, port),
    );
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(e) => last_err = e,
        }
    }
    Err(last_err)
}

/// True when a read failed only because its timeout elapsed.
///
/// Unix reports `WouldBlock`, Windows `TimedOut`.
pub fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// Scoped receive-with-deadline over a borrowed stream.
pub struct ReadDeadline<'a, S: TimedStream> {
    stream: &'a mut S,
}

impl<'a, S: TimedStream> ReadDeadline<'a, S> {
    pub fn new(stream: &'a mut S) -> Self {
        Self { stream }
    }

    /// Read one chunk, waiting at most `remaining`.
    ///
    /// A zero `remaining` is rejected by sockets, so callers must stop
    /// before reaching it.
    pub fn recv(&mut self, buf: &mut [u8], remaining: Duration) -> io::Result<usize> {
        self.stream.set_read_timeout(Some(remaining))?;
        self.stream.read(buf)
    }
}

impl<S: TimedStream> Drop for ReadDeadline<'_, S> {
    fn drop(&mut self) {
        if let Err(e) = self.stream.set_read_timeout(None) {
            tracing::warn!("Failed to clear read timeout: {}", e);
        }
    }
}
