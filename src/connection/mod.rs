// src/connection/mod.rs

//! A single blocking channel to a RESP server.
//!
//! `Connection` owns the transport and both buffers. Commands are encoded into
//! the write buffer by `send` and reach the peer at the next `flush`, which
//! every reply accessor performs first. Replies are decoded from the read
//! buffer in arrival order, which is what makes pipelining with `get_many`
//! correct without per-command acknowledgement.
//!
//! Faults follow two rules. A connection-level failure (transport, TLS, fatal
//! decode, timeout change) moves the channel to `ChannelState::Broken`; every
//! later I/O call then fails fast with `ClientError::Broken` until the caller
//! runs a fresh `connect`. A server-reported `-ERR` is data: it is returned as
//! `Reply::Error` or raised as `ClientError::Data` by typed accessors, and never
//! touches the channel state.

mod guard;
mod state;
pub mod tls;
mod transport;

pub use guard::InfiniteTimeoutGuard;
pub use state::ChannelState;
pub use transport::{ShutdownHandle, TransportKind};

use crate::config::ConnectionConfig;
use crate::core::builder;
use crate::core::protocol::{Request, RespCodec, read_error_line_if_possible};
use crate::core::{ClientError, ClientResult, ProtocolCommand, Reply};
use bytes::{Bytes, BytesMut};
use std::io::{self, Read, Write};
use std::time::Duration;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, info, warn};
use transport::Transport;

/// Pending output above this size is written through before `send` returns.
const WRITE_BUFFER_SIZE: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// A synchronous, single-owner RESP channel. Not safe for concurrent use;
/// pool several instances for parallelism.
pub struct Connection {
    config: ConnectionConfig,
    transport: Option<Transport>,
    codec: RespCodec,
    write_buf: BytesMut,
    read_buf: BytesMut,
    state: ChannelState,
    timeout_overridden: bool,
}

impl Connection {
    /// Creates an unconnected channel. No I/O happens until first use.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            transport: None,
            codec: RespCodec,
            write_buf: BytesMut::with_capacity(WRITE_BUFFER_SIZE),
            read_buf: BytesMut::with_capacity(READ_CHUNK_SIZE),
            state: ChannelState::Open,
            timeout_overridden: false,
        }
    }

    pub fn with_host(host: impl Into<String>) -> Self {
        Self::new(ConnectionConfig {
            host: host.into(),
            ..ConnectionConfig::default()
        })
    }

    pub fn with_host_port(host: impl Into<String>, port: u16) -> Self {
        Self::new(ConnectionConfig::new(host, port))
    }

    pub fn with_tls(host: impl Into<String>, port: u16, tls: bool) -> Self {
        Self::new(ConnectionConfig::new(host, port).with_tls(tls))
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn host(&self) -> &str {
        &self.config.host
    }

    /// Takes effect on the next connect.
    pub fn set_host(&mut self, host: impl Into<String>) {
        self.config.host = host.into();
    }

    pub fn port(&self) -> u16 {
        self.config.port
    }

    /// Takes effect on the next connect.
    pub fn set_port(&mut self, port: u16) {
        self.config.port = port;
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.config.connect_timeout
    }

    pub fn set_connect_timeout(&mut self, timeout: Option<Duration>) {
        self.config.connect_timeout = timeout;
    }

    /// The configured read deadline (not any temporary infinite override).
    pub fn read_timeout(&self) -> Option<Duration> {
        self.config.read_timeout
    }

    /// Changes the configured read deadline, re-applying it to a live socket
    /// unless an infinite override is in effect.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> ClientResult<()> {
        self.config.read_timeout = timeout;
        if self.timeout_overridden || self.state.is_broken() || self.transport.is_none() {
            return Ok(());
        }
        self.apply_read_timeout(timeout)
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_broken(&self) -> bool {
        self.state.is_broken()
    }

    /// Liveness only: a transport exists and neither half has been shut down
    /// locally. A peer reset is not seen here; it surfaces as an error on the
    /// next read or write. A connected channel may still be broken.
    pub fn is_connected(&self) -> bool {
        self.transport.as_ref().is_some_and(Transport::is_connected)
    }

    pub fn transport_kind(&self) -> Option<TransportKind> {
        self.transport.as_ref().map(Transport::kind)
    }

    pub fn peer_addr(&self) -> Option<String> {
        self.transport.as_ref().and_then(Transport::peer_addr)
    }

    /// The read deadline currently set on the socket.
    ///
    /// Fails with `ClientError::NotConnected` when no transport exists. An OS
    /// failure to report the option breaks the channel.
    pub fn socket_read_timeout(&mut self) -> ClientResult<Option<Duration>> {
        let transport = self.transport.as_ref().ok_or_else(|| self.not_connected())?;
        let result = transport.read_timeout();
        result.map_err(|e| {
            let err = ClientError::transport(self.host(), self.port(), "read timeout query", e);
            self.mark_broken(&err);
            err
        })
    }

    /// A handle another thread can use to abort a blocked read or write.
    pub fn shutdown_handle(&mut self) -> ClientResult<ShutdownHandle> {
        let transport = self.transport.as_ref().ok_or_else(|| self.not_connected())?;
        let result = transport.shutdown_handle();
        result.map_err(|e| {
            let err = ClientError::transport(self.host(), self.port(), "socket clone", e);
            self.mark_broken(&err);
            err
        })
    }

    /// Establishes the transport.
    ///
    /// A no-op when already connected and open. On a broken channel the old
    /// transport is discarded and a brand-new one is established; success is
    /// the only way back to `ChannelState::Open`.
    pub fn connect(&mut self) -> ClientResult<()> {
        if !self.state.is_broken() && self.is_connected() {
            return Ok(());
        }

        if let Some(old) = self.transport.take() {
            debug!("Discarding previous transport to {}:{}", self.host(), self.port());
            old.close_quietly();
        }
        self.write_buf.clear();
        self.read_buf.clear();
        self.timeout_overridden = false;

        match self.establish() {
            Ok(transport) => {
                self.transport = Some(transport);
                self.state = ChannelState::Open;
                Ok(())
            }
            Err(e) => {
                self.mark_broken(&e);
                Err(e)
            }
        }
    }

    fn establish(&self) -> ClientResult<Transport> {
        let config = &self.config;
        let (host, port) = (config.host.as_str(), config.port);

        if let Some(path) = &config.unix_socket_path {
            // Best effort: any failure here falls through to TCP.
            match Transport::connect_unix(path, config.read_timeout) {
                Ok(transport) => {
                    info!("Connected to unix socket {}", path.display());
                    return Ok(transport);
                }
                Err(e) => debug!(
                    "Unix socket {} unavailable ({}); falling back to TCP {}:{}",
                    path.display(),
                    e,
                    host,
                    port
                ),
            }
        }

        debug!("Connecting to {}:{}", host, port);
        let tcp = transport::connect_tcp(host, port, config.connect_timeout)
            .map_err(|e| ClientError::connection(host, port, e))?;
        tcp.set_read_timeout(config.read_timeout)
            .map_err(|e| ClientError::connection(host, port, e))?;

        let transport = if config.tls.enabled {
            Transport::tls(tls::handshake(config, tcp)?)
        } else {
            Transport::tcp(tcp)
        };
        info!("Connected to {}:{} over {:?}", host, port, transport.kind());
        Ok(transport)
    }

    /// Sends a command with no arguments.
    pub fn send_command<C: ProtocolCommand>(&mut self, command: C) -> ClientResult<&mut Self> {
        let no_args: &[&[u8]] = &[];
        self.send(command, no_args)
    }

    /// Sends a command with text arguments, encoded as UTF-8.
    pub fn send_str<C: ProtocolCommand>(
        &mut self,
        command: C,
        args: &[&str],
    ) -> ClientResult<&mut Self> {
        self.send(command, args)
    }

    /// Frames a command into the write buffer, connecting first if needed.
    ///
    /// Output reaches the peer at the next flush, or earlier once the buffer
    /// passes its size threshold. If that write fails, any error line the
    /// server already sent is folded into the returned error's message. No
    /// retry happens here.
    pub fn send<C, A>(&mut self, command: C, args: &[A]) -> ClientResult<&mut Self>
    where
        C: ProtocolCommand,
        A: AsRef<[u8]>,
    {
        self.ensure_open()?;
        if let Err(e) = self.try_send(command.raw(), args) {
            let e = match self.recover_error_line() {
                Some(server_msg) if !server_msg.is_empty() => e.with_message(server_msg),
                _ => e,
            };
            self.mark_broken(&e);
            return Err(e);
        }
        Ok(self)
    }

    fn try_send<A: AsRef<[u8]>>(&mut self, command: &[u8], args: &[A]) -> ClientResult<()> {
        // Only a missing transport triggers a connect. An existing one that
        // has failed must report that failure on its next write.
        if self.transport.is_none() {
            self.connect()?;
        }
        self.codec
            .encode(Request::new(command, args), &mut self.write_buf)?;
        if self.write_buf.len() >= WRITE_BUFFER_SIZE {
            self.write_out()?;
        }
        Ok(())
    }

    /// Best-effort read of a `-ERR` line the server may have sent before
    /// closing. Never blocks; every failure is ignored.
    fn recover_error_line(&mut self) -> Option<String> {
        let transport = self.transport.as_mut()?;
        let mut chunk = [0u8; 512];
        if let Ok(n) = transport.read_available(&mut chunk)
            && n > 0
        {
            self.read_buf.extend_from_slice(&chunk[..n]);
        }
        read_error_line_if_possible(&mut self.read_buf)
    }

    /// Writes the output buffer to the transport.
    pub fn flush(&mut self) -> ClientResult<()> {
        self.ensure_open()?;
        if let Err(e) = self.write_out() {
            self.mark_broken(&e);
            return Err(e);
        }
        Ok(())
    }

    fn write_out(&mut self) -> ClientResult<()> {
        if self.write_buf.is_empty() {
            return Ok(());
        }
        let (host, port) = (self.config.host.as_str(), self.config.port);
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| ClientError::connection_msg(format!("Not connected to {host}:{port}")))?;
        transport
            .write_all(&self.write_buf)
            .and_then(|_| transport.flush())
            .map_err(|e| ClientError::transport(host, port, "write", e))?;
        self.write_buf.clear();
        Ok(())
    }

    /// Decodes one reply without flushing, marking the channel broken on any
    /// connection-level failure.
    fn read_checked(&mut self) -> ClientResult<Reply> {
        self.ensure_open()?;
        match self.read_reply() {
            Ok(reply) => Ok(reply),
            Err(e) => {
                if e.is_connection_error() {
                    self.mark_broken(&e);
                }
                Err(e)
            }
        }
    }

    fn read_reply(&mut self) -> ClientResult<Reply> {
        let (host, port) = (self.config.host.as_str(), self.config.port);
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            if let Some(reply) = self.codec.decode(&mut self.read_buf)? {
                return Ok(reply);
            }
            let transport = self.transport.as_mut().ok_or_else(|| {
                ClientError::connection_msg(format!("Not connected to {host}:{port}"))
            })?;
            let n = match transport.read(&mut chunk) {
                Ok(0) => {
                    return Err(ClientError::connection_msg(format!(
                        "Unexpected end of stream from {host}:{port}"
                    )));
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ClientError::transport(host, port, "read", e)),
            };
            self.read_buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Flushes, then decodes exactly one reply. A server `-ERR` comes back as
    /// `Reply::Error`, not as an error.
    pub fn get_one(&mut self) -> ClientResult<Reply> {
        self.flush()?;
        self.read_checked()
    }

    /// Pipelined read: one flush, then `count` replies in issue order.
    ///
    /// A `-ERR` for any item is kept in place as `Reply::Error` and reading
    /// continues. A connection-level failure aborts the whole batch, discards
    /// the replies read so far, and leaves the channel broken.
    pub fn get_many(&mut self, count: usize) -> ClientResult<Vec<Reply>> {
        self.flush()?;
        let mut replies = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            replies.push(self.read_checked()?);
        }
        Ok(replies)
    }

    /// Status reply (`+OK`) as text, or `None` on a protocol null.
    pub fn get_status_code_reply(&mut self) -> ClientResult<Option<String>> {
        self.flush()?;
        match self.read_checked()? {
            Reply::Status(s) => Ok(Some(s)),
            Reply::Bulk(None) | Reply::Array(None) => Ok(None),
            Reply::Error(msg) => Err(ClientError::Data(msg)),
            other => Err(other.mismatch("status")),
        }
    }

    /// Bulk reply decoded as UTF-8 (lossily), or `None` for `$-1`.
    pub fn get_bulk_reply(&mut self) -> ClientResult<Option<String>> {
        Ok(self
            .get_binary_bulk_reply()?
            .map(|b| String::from_utf8_lossy(&b).into_owned()))
    }

    pub fn get_binary_bulk_reply(&mut self) -> ClientResult<Option<Bytes>> {
        self.flush()?;
        match self.read_checked()? {
            Reply::Bulk(b) => Ok(b),
            Reply::Error(msg) => Err(ClientError::Data(msg)),
            other => Err(other.mismatch("bulk")),
        }
    }

    pub fn get_integer_reply(&mut self) -> ClientResult<Option<i64>> {
        self.flush()?;
        match self.read_checked()? {
            Reply::Integer(i) => Ok(Some(i)),
            Reply::Bulk(None) => Ok(None),
            Reply::Error(msg) => Err(ClientError::Data(msg)),
            other => Err(other.mismatch("integer")),
        }
    }

    /// Array of bulk strings as text; null elements stay `None`.
    pub fn get_multi_bulk_reply(&mut self) -> ClientResult<Option<Vec<Option<String>>>> {
        Ok(self.get_binary_multi_bulk_reply()?.map(builder::string_list))
    }

    pub fn get_binary_multi_bulk_reply(&mut self) -> ClientResult<Option<Vec<Option<Bytes>>>> {
        self.flush()?;
        let Some(items) = expect_array(self.read_checked()?)? else {
            return Ok(None);
        };
        items
            .into_iter()
            .map(|item| match item {
                Reply::Bulk(b) => Ok(b),
                Reply::Error(msg) => Err(ClientError::Data(msg)),
                other => Err(other.mismatch("bulk")),
            })
            .collect::<ClientResult<Vec<_>>>()
            .map(Some)
    }

    pub fn get_integer_multi_bulk_reply(&mut self) -> ClientResult<Option<Vec<Option<i64>>>> {
        self.flush()?;
        let Some(items) = expect_array(self.read_checked()?)? else {
            return Ok(None);
        };
        items
            .into_iter()
            .map(|item| match item {
                Reply::Integer(i) => Ok(Some(i)),
                Reply::Bulk(None) => Ok(None),
                Reply::Error(msg) => Err(ClientError::Data(msg)),
                other => Err(other.mismatch("integer")),
            })
            .collect::<ClientResult<Vec<_>>>()
            .map(Some)
    }

    /// Array of arbitrary replies, nested arrays included, after a flush.
    pub fn get_object_multi_bulk_reply(&mut self) -> ClientResult<Option<Vec<Reply>>> {
        self.flush()?;
        self.get_raw_object_multi_bulk_reply()
    }

    /// Like `get_object_multi_bulk_reply` but without flushing first; for
    /// streams the server pushes unprompted, such as subscription messages.
    pub fn get_raw_object_multi_bulk_reply(&mut self) -> ClientResult<Option<Vec<Reply>>> {
        expect_array(self.read_checked()?)
    }

    /// Lifts the socket read deadline so the next reply may take forever.
    /// Pair with `rollback_timeout`, or use `infinite_timeout` for a guard.
    pub fn set_timeout_infinite(&mut self) -> ClientResult<()> {
        self.ensure_open()?;
        if self.transport.is_none() {
            self.connect()?;
        }
        self.apply_read_timeout(None)?;
        self.timeout_overridden = true;
        Ok(())
    }

    /// Restores the configured read deadline after `set_timeout_infinite`.
    pub fn rollback_timeout(&mut self) -> ClientResult<()> {
        self.ensure_open()?;
        self.timeout_overridden = false;
        if self.transport.is_none() {
            // The next connect applies the configured deadline anyway.
            return Ok(());
        }
        self.apply_read_timeout(self.config.read_timeout)
    }

    /// Lifts the read deadline for the lifetime of the returned guard.
    pub fn infinite_timeout(&mut self) -> ClientResult<InfiniteTimeoutGuard<'_>> {
        InfiniteTimeoutGuard::new(self)
    }

    fn apply_read_timeout(&mut self, timeout: Option<Duration>) -> ClientResult<()> {
        let (host, port) = (self.config.host.as_str(), self.config.port);
        let result = match self.transport.as_ref() {
            Some(transport) => transport
                .set_read_timeout(timeout)
                .map_err(|e| ClientError::transport(host, port, "read timeout change", e)),
            None => Err(ClientError::connection_msg(format!(
                "Not connected to {host}:{port}"
            ))),
        };
        if let Err(e) = result {
            self.mark_broken(&e);
            return Err(e);
        }
        Ok(())
    }

    /// Flushes pending output and closes the transport.
    ///
    /// The close always happens, even when the flush fails; the flush error is
    /// then reported and the channel marked broken. A broken channel is closed
    /// without flushing. A no-op when nothing is connected.
    pub fn disconnect(&mut self) -> ClientResult<()> {
        let Some(transport) = self.transport.take() else {
            return Ok(());
        };
        if !transport.is_connected() {
            transport.close_quietly();
            self.write_buf.clear();
            self.read_buf.clear();
            return Ok(());
        }

        let (host, port) = (self.config.host.clone(), self.config.port);
        let mut transport = transport;
        let flushed = if self.state.is_broken() || self.write_buf.is_empty() {
            Ok(())
        } else {
            transport
                .write_all(&self.write_buf)
                .and_then(|_| transport.flush())
        };
        self.write_buf.clear();
        self.read_buf.clear();
        self.timeout_overridden = false;

        let closed = transport.close();
        debug!("Disconnected from {}:{}", host, port);
        if let Err(e) = flushed.and(closed) {
            let err = ClientError::transport(&host, port, "disconnect", e);
            self.mark_broken(&err);
            return Err(err);
        }
        Ok(())
    }

    /// Disconnects and consumes the connection.
    pub fn close(mut self) -> ClientResult<()> {
        self.disconnect()
    }

    fn ensure_open(&self) -> ClientResult<()> {
        match self.state {
            ChannelState::Open => Ok(()),
            ChannelState::Broken => Err(ClientError::Broken),
        }
    }

    fn mark_broken(&mut self, cause: &ClientError) {
        if !self.state.is_broken() {
            warn!(
                "Connection to {}:{} is broken: {}",
                self.config.host, self.config.port, cause
            );
        }
        self.state = ChannelState::Broken;
    }

    fn not_connected(&self) -> ClientError {
        ClientError::NotConnected(format!("{}:{}", self.config.host, self.config.port))
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.transport.is_some()
            && let Err(e) = self.disconnect()
        {
            debug!("Error while dropping connection: {}", e);
        }
    }
}

fn expect_array(reply: Reply) -> ClientResult<Option<Vec<Reply>>> {
    match reply {
        Reply::Array(items) => Ok(items),
        Reply::Bulk(None) => Ok(None),
        Reply::Error(msg) => Err(ClientError::Data(msg)),
        other => Err(other.mismatch("array")),
    }
}
