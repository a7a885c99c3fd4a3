// tests/integration/test_helpers.rs

//! Test helpers: a scripted in-process RESP server and reply builders.

use bytes::BytesMut;
use spinel_conn::core::protocol::RespCodec;
use spinel_conn::{Connection, ConnectionConfig, Reply};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio_util::codec::Decoder;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Installs a test-writer subscriber once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::new("debug"))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// The server side of one accepted connection.
pub struct Peer<S> {
    pub stream: S,
    buf: BytesMut,
}

impl<S: Read + Write> Peer<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buf: BytesMut::new(),
        }
    }

    /// Reads one request frame and returns its arguments, or `None` on EOF.
    pub fn read_command(&mut self) -> Option<Vec<Vec<u8>>> {
        let mut chunk = [0u8; 4096];
        loop {
            match RespCodec.decode(&mut self.buf).expect("client sent malformed RESP") {
                Some(Reply::Array(Some(items))) => {
                    return Some(
                        items
                            .into_iter()
                            .map(|item| match item {
                                Reply::Bulk(Some(b)) => b.to_vec(),
                                other => panic!("request element is not a bulk string: {other:?}"),
                            })
                            .collect(),
                    );
                }
                Some(other) => panic!("request is not an array: {other:?}"),
                None => {}
            }
            let n = self.stream.read(&mut chunk).ok()?;
            if n == 0 {
                return None;
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Reads one command and asserts its name and arguments.
    pub fn expect(&mut self, expected: &[&str]) {
        let args = self.read_command().expect("connection closed before command");
        let args: Vec<String> = args
            .iter()
            .map(|a| String::from_utf8_lossy(a).into_owned())
            .collect();
        assert_eq!(args, expected);
    }

    pub fn reply(&mut self, raw: &[u8]) {
        self.stream.write_all(raw).expect("write reply");
        self.stream.flush().expect("flush reply");
    }
}

/// A server on an ephemeral localhost port that runs `handler` for each of
/// the next `connections` accepted sockets, in order.
pub struct MockServer {
    pub port: u16,
    handle: JoinHandle<()>,
}

impl MockServer {
    pub fn start<F>(connections: usize, handler: F) -> Self
    where
        F: Fn(usize, &mut Peer<TcpStream>) + Send + 'static,
    {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let handle = thread::spawn(move || {
            for idx in 0..connections {
                let (stream, _) = listener.accept().expect("accept");
                let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
                let mut peer = Peer::new(stream);
                handler(idx, &mut peer);
            }
        });
        Self { port, handle }
    }

    /// A connection to this server with short timeouts.
    pub fn connection(&self) -> Connection {
        Connection::new(self.config())
    }

    pub fn config(&self) -> ConnectionConfig {
        ConnectionConfig::new("127.0.0.1", self.port)
            .with_connect_timeout(Some(Duration::from_secs(1)))
            .with_read_timeout(Some(Duration::from_secs(2)))
    }

    /// Waits for the server thread, re-raising any assertion it failed.
    pub fn join(self) {
        if let Err(panic) = self.handle.join() {
            std::panic::resume_unwind(panic);
        }
    }
}

/// A localhost port with nothing listening on it.
pub fn dead_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    listener.local_addr().expect("addr").port()
}

pub fn status(s: &str) -> Vec<u8> {
    format!("+{s}\r\n").into_bytes()
}

pub fn error(s: &str) -> Vec<u8> {
    format!("-{s}\r\n").into_bytes()
}

pub fn integer(i: i64) -> Vec<u8> {
    format!(":{i}\r\n").into_bytes()
}

pub fn bulk(data: &[u8]) -> Vec<u8> {
    let mut out = format!("${}\r\n", data.len()).into_bytes();
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
    out
}

pub const NIL: &[u8] = b"$-1\r\n";

pub fn array(items: &[Vec<u8>]) -> Vec<u8> {
    let mut out = format!("*{}\r\n", items.len()).into_bytes();
    for item in items {
        out.extend_from_slice(item);
    }
    out
}
