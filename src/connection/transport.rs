// src/connection/transport.rs

//! The raw byte stream under a `Connection`: plain TCP, TLS over TCP, or a
//! local domain socket, behind one blocking `Read + Write` type.

use super::tls::TlsStream;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

#[cfg(unix)]
use std::os::unix::net::UnixStream;

/// Which kind of stream a transport wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Tcp,
    Tls,
    Unix,
}

/// An enum to wrap the different stream types into a single type.
enum AnyStream {
    Tcp(TcpStream),
    Tls(Box<TlsStream>),
    #[cfg(unix)]
    Unix(UnixStream),
}

/// Which halves of a socket have been shut down locally. Shared with every
/// `ShutdownHandle` cloned from the same transport.
#[derive(Debug, Default)]
struct HalfClose {
    input: AtomicBool,
    output: AtomicBool,
}

impl HalfClose {
    fn mark(&self, how: Shutdown) {
        if matches!(how, Shutdown::Read | Shutdown::Both) {
            self.input.store(true, Ordering::Release);
        }
        if matches!(how, Shutdown::Write | Shutdown::Both) {
            self.output.store(true, Ordering::Release);
        }
    }

    fn any(&self) -> bool {
        self.input.load(Ordering::Acquire) || self.output.load(Ordering::Acquire)
    }
}

/// An owned, connected stream plus the half-close state the OS won't report back.
pub struct Transport {
    stream: AnyStream,
    half_close: Arc<HalfClose>,
}

impl Transport {
    pub fn tcp(stream: TcpStream) -> Self {
        Self::wrap(AnyStream::Tcp(stream))
    }

    pub fn tls(stream: TlsStream) -> Self {
        Self::wrap(AnyStream::Tls(Box::new(stream)))
    }

    fn wrap(stream: AnyStream) -> Self {
        Self {
            stream,
            half_close: Arc::default(),
        }
    }

    /// Connects to a local domain socket and applies the read deadline.
    ///
    /// std offers no timed connect for unix sockets; a local connect either
    /// succeeds or fails immediately, so only the read deadline is applied.
    #[cfg(unix)]
    pub fn connect_unix(path: &Path, read_timeout: Option<Duration>) -> io::Result<Self> {
        let stream = UnixStream::connect(path)?;
        stream.set_read_timeout(read_timeout)?;
        Ok(Self::wrap(AnyStream::Unix(stream)))
    }

    #[cfg(not(unix))]
    pub fn connect_unix(_path: &Path, _read_timeout: Option<Duration>) -> io::Result<Self> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "unix domain sockets are not supported on this platform",
        ))
    }

    pub fn kind(&self) -> TransportKind {
        match &self.stream {
            AnyStream::Tcp(_) => TransportKind::Tcp,
            AnyStream::Tls(_) => TransportKind::Tls,
            #[cfg(unix)]
            AnyStream::Unix(_) => TransportKind::Unix,
        }
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match &self.stream {
            AnyStream::Tcp(s) => s.set_read_timeout(timeout),
            AnyStream::Tls(s) => s.get_ref().set_read_timeout(timeout),
            #[cfg(unix)]
            AnyStream::Unix(s) => s.set_read_timeout(timeout),
        }
    }

    pub fn read_timeout(&self) -> io::Result<Option<Duration>> {
        match &self.stream {
            AnyStream::Tcp(s) => s.read_timeout(),
            AnyStream::Tls(s) => s.get_ref().read_timeout(),
            #[cfg(unix)]
            AnyStream::Unix(s) => s.read_timeout(),
        }
    }

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match &self.stream {
            AnyStream::Tcp(s) => s.set_nonblocking(nonblocking),
            AnyStream::Tls(s) => s.get_ref().set_nonblocking(nonblocking),
            #[cfg(unix)]
            AnyStream::Unix(s) => s.set_nonblocking(nonblocking),
        }
    }

    /// Reads whatever is already available without waiting.
    ///
    /// Returns `Ok(0)` when nothing is pending. The stream is switched back to
    /// blocking mode before returning, whatever the read outcome.
    pub fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.set_nonblocking(true)?;
        let result = match self.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            other => other,
        };
        self.set_nonblocking(false)?;
        result
    }

    /// A printable peer address, if the OS still reports one.
    pub fn peer_addr(&self) -> Option<String> {
        match &self.stream {
            AnyStream::Tcp(s) => s.peer_addr().ok().map(|a| a.to_string()),
            AnyStream::Tls(s) => s.get_ref().peer_addr().ok().map(|a| a.to_string()),
            #[cfg(unix)]
            AnyStream::Unix(s) => s.peer_addr().ok().map(|a| format!("{a:?}")),
        }
    }

    /// Local liveness: neither half has been shut down on this side.
    ///
    /// Nothing here asks the peer. A reset from the other end only shows up as
    /// an error on the next read or write.
    pub fn is_connected(&self) -> bool {
        !self.half_close.any()
    }

    pub fn shutdown(&mut self, how: Shutdown) -> io::Result<()> {
        match &self.stream {
            AnyStream::Tcp(s) => s.shutdown(how)?,
            AnyStream::Tls(s) => s.get_ref().shutdown(how)?,
            #[cfg(unix)]
            AnyStream::Unix(s) => s.shutdown(how)?,
        }
        self.half_close.mark(how);
        Ok(())
    }

    /// A second handle on the same socket, for aborting blocked I/O from
    /// another thread.
    pub fn shutdown_handle(&self) -> io::Result<ShutdownHandle> {
        let socket = match &self.stream {
            AnyStream::Tcp(s) => RawSocket::Tcp(s.try_clone()?),
            AnyStream::Tls(s) => RawSocket::Tcp(s.get_ref().try_clone()?),
            #[cfg(unix)]
            AnyStream::Unix(s) => RawSocket::Unix(s.try_clone()?),
        };
        Ok(ShutdownHandle {
            socket,
            half_close: self.half_close.clone(),
        })
    }

    /// Closes the stream. TLS sessions send `close_notify` first.
    ///
    /// TCP sockets carry `SO_LINGER(0)`, so the close is abortive: the kernel
    /// resets the connection instead of lingering in FIN_WAIT. Both halves are
    /// shut down explicitly since a `ShutdownHandle` may still hold a
    /// duplicate descriptor.
    pub fn close(mut self) -> io::Result<()> {
        if let AnyStream::Tls(s) = &mut self.stream {
            s.conn.send_close_notify();
            while s.conn.wants_write() {
                s.conn.write_tls(&mut s.sock)?;
            }
        }
        match self.shutdown(Shutdown::Both) {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }

    /// Closes the stream, discarding any error.
    pub fn close_quietly(self) {
        if let Err(e) = self.close() {
            debug!("Ignoring error while closing transport: {}", e);
        }
    }
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.stream {
            AnyStream::Tcp(s) => s.read(buf),
            AnyStream::Tls(s) => s.read(buf),
            #[cfg(unix)]
            AnyStream::Unix(s) => s.read(buf),
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.stream {
            AnyStream::Tcp(s) => s.write(buf),
            AnyStream::Tls(s) => s.write(buf),
            #[cfg(unix)]
            AnyStream::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.stream {
            AnyStream::Tcp(s) => s.flush(),
            AnyStream::Tls(s) => s.flush(),
            #[cfg(unix)]
            AnyStream::Unix(s) => s.flush(),
        }
    }
}

enum RawSocket {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

/// Lets another thread cancel blocking I/O on a `Connection`.
///
/// Shutting the socket down wakes a blocked read with end-of-stream, which the
/// owning `Connection` reports as a connection error and marks itself broken.
pub struct ShutdownHandle {
    socket: RawSocket,
    half_close: Arc<HalfClose>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) -> io::Result<()> {
        self.shutdown_half(Shutdown::Both)
    }

    /// Half-closes the outgoing direction only. Data the peer already sent
    /// stays readable; later writes fail.
    pub fn shutdown_output(&self) -> io::Result<()> {
        self.shutdown_half(Shutdown::Write)
    }

    fn shutdown_half(&self, how: Shutdown) -> io::Result<()> {
        match &self.socket {
            RawSocket::Tcp(s) => s.shutdown(how)?,
            #[cfg(unix)]
            RawSocket::Unix(s) => s.shutdown(how)?,
        }
        self.half_close.mark(how);
        Ok(())
    }
}

/// Opens a TCP connection to `host:port`, trying each resolved address in turn.
pub fn connect_tcp(host: &str, port: u16, timeout: Option<Duration>) -> io::Result<TcpStream> {
    let mut last_err = None;
    for addr in (host, port).to_socket_addrs()? {
        let attempt = match timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => {
                configure_tcp(&stream)?;
                return Ok(stream);
            }
            Err(e) => {
                debug!("Connect to {} failed: {}", addr, e);
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("no addresses resolved for {host}:{port}"),
        )
    }))
}

/// Applies the latency-oriented socket options: address reuse, keep-alive,
/// no Nagle delay, and abortive close.
fn configure_tcp(stream: &TcpStream) -> io::Result<()> {
    stream.set_nodelay(true)?;
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        let fd = stream.as_raw_fd();
        let on: libc::c_int = 1;
        setsockopt(fd, libc::SOL_SOCKET, libc::SO_REUSEADDR, &on)?;
        setsockopt(fd, libc::SOL_SOCKET, libc::SO_KEEPALIVE, &on)?;
        let linger = libc::linger {
            l_onoff: 1,
            l_linger: 0,
        };
        setsockopt(fd, libc::SOL_SOCKET, libc::SO_LINGER, &linger)?;
    }
    Ok(())
}

#[cfg(unix)]
fn setsockopt<T>(fd: libc::c_int, level: libc::c_int, name: libc::c_int, value: &T) -> io::Result<()> {
    // SAFETY: `value` points to a live `T` for the duration of the call and the
    // length passed matches its size.
    let rc = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            value as *const T as *const libc::c_void,
            std::mem::size_of::<T>() as libc::socklen_t,
        )
    };
    if rc == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}
