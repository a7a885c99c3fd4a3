// tests/integration/pipeline_test.rs

//! Pipelined sends followed by a single batch read.

use super::test_helpers::*;
use bytes::Bytes;
use spinel_conn::{ClientError, Connection, ConnectionConfig, Reply};
use std::net::TcpListener;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn pipeline_keeps_error_in_position() {
    let server = MockServer::start(1, |_, peer| {
        // Nothing is answered until the whole batch has arrived.
        peer.expect(&["SET", "a", "1"]);
        peer.expect(&["INCR", "a", "extra"]);
        peer.expect(&["GET", "a"]);
        let mut out = status("OK");
        out.extend(error("ERR wrong number of arguments for 'incr' command"));
        out.extend(bulk(b"1"));
        peer.reply(&out);
    });

    let mut conn = server.connection();
    conn.send_str("SET", &["a", "1"])
        .unwrap()
        .send_str("INCR", &["a", "extra"])
        .unwrap()
        .send_str("GET", &["a"])
        .unwrap();

    let replies = conn.get_many(3).unwrap();
    assert_eq!(
        replies,
        vec![
            Reply::Status("OK".into()),
            Reply::Error("ERR wrong number of arguments for 'incr' command".into()),
            Reply::Bulk(Some(Bytes::from_static(b"1"))),
        ]
    );
    assert!(!conn.is_broken());
    drop(conn);
    server.join();
}

#[test]
fn get_many_of_zero_only_flushes() {
    let server = MockServer::start(1, |_, peer| {
        peer.expect(&["PING"]);
        peer.reply(&status("PONG"));
    });

    let mut conn = server.connection();
    conn.send_command("PING").unwrap();
    assert!(conn.get_many(0).unwrap().is_empty());
    assert_eq!(conn.get_one().unwrap(), Reply::Status("PONG".into()));
    drop(conn);
    server.join();
}

#[test]
fn malformed_frame_aborts_batch_and_breaks_channel() {
    let server = MockServer::start(1, |_, peer| {
        peer.expect(&["PING"]);
        peer.expect(&["PING"]);
        peer.expect(&["PING"]);
        let mut out = status("PONG");
        out.extend_from_slice(b"?garbage\r\n");
        out.extend(status("PONG"));
        peer.reply(&out);
    });

    let mut conn = server.connection();
    for _ in 0..3 {
        conn.send_command("PING").unwrap();
    }
    let err = conn.get_many(3).unwrap_err();
    assert!(matches!(err, ClientError::Protocol(_)), "got {err:?}");
    assert!(conn.is_broken());
    assert_eq!(conn.get_one(), Err(ClientError::Broken));
    drop(conn);
    server.join();
}

#[test]
fn peer_close_mid_batch_is_a_connection_error() {
    let server = MockServer::start(1, |_, peer| {
        peer.expect(&["GET", "a"]);
        peer.expect(&["GET", "b"]);
        peer.reply(&bulk(b"1"));
    });

    let mut conn = server.connection();
    conn.send_str("GET", &["a"]).unwrap();
    conn.send_str("GET", &["b"]).unwrap();
    let err = conn.get_many(2).unwrap_err();
    assert!(err.is_connection_error());
    assert!(err.to_string().contains("end of stream"), "got {err}");
    assert!(conn.is_broken());
    server.join();
}

#[test]
fn large_pipeline_is_written_through_in_order() {
    const N: usize = 2_000;
    let server = MockServer::start(1, |_, peer| {
        let mut out = Vec::new();
        for i in 0..N {
            let key = format!("key:{i}");
            peer.expect(&["INCR", key.as_str()]);
            out.extend(integer(i as i64));
        }
        peer.reply(&out);
    });

    let mut conn = server.connection();
    for i in 0..N {
        conn.send_str("INCR", &[format!("key:{i}").as_str()]).unwrap();
    }
    let replies = conn.get_many(N).unwrap();
    assert_eq!(replies.len(), N);
    for (i, reply) in replies.into_iter().enumerate() {
        assert_eq!(reply, Reply::Integer(i as i64));
    }
    drop(conn);
    server.join();
}

#[test]
fn peer_reset_between_sends_breaks_instead_of_reconnecting() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let (reset_tx, reset_rx) = mpsc::channel();
    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        thread::sleep(Duration::from_millis(200));
        // Dropping with the client's PING still unread resets the connection.
        drop(stream);
        reset_tx.send(()).unwrap();

        listener.set_nonblocking(true).unwrap();
        let deadline = Instant::now() + Duration::from_millis(500);
        let mut reconnects = 0;
        while Instant::now() < deadline {
            if listener.accept().is_ok() {
                reconnects += 1;
            }
            thread::sleep(Duration::from_millis(10));
        }
        reconnects
    });

    let mut conn = Connection::new(
        ConnectionConfig::new("127.0.0.1", port).with_read_timeout(Some(Duration::from_secs(2))),
    );
    conn.send_command("PING").unwrap();
    conn.flush().unwrap();
    conn.send_str("SET", &["a", "1"]).unwrap();

    reset_rx.recv().unwrap();
    thread::sleep(Duration::from_millis(100));

    // Buffered only; the reset is not visible until the next write.
    conn.send_str("GET", &["a"]).unwrap();
    assert!(conn.is_connected());
    assert!(!conn.is_broken());

    let err = conn.get_many(3).unwrap_err();
    assert!(err.is_connection_error(), "got {err:?}");
    assert!(conn.is_broken());
    assert_eq!(conn.send_command("PING").err(), Some(ClientError::Broken));

    assert_eq!(server.join().unwrap(), 0, "the client must not reconnect on its own");
}

#[test]
fn oversized_batch_count_fails_on_read_not_allocation() {
    let server = MockServer::start(1, |_, peer| {
        peer.expect(&["PING"]);
        peer.reply(&status("PONG"));
    });

    let mut conn = server.connection();
    conn.send_command("PING").unwrap();
    let err = conn.get_many(usize::MAX / 2).unwrap_err();
    assert!(err.is_connection_error());
    assert!(conn.is_broken());
    server.join();
}
