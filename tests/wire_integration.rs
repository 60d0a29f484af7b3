//! Wire-level integration tests: a real server on an ephemeral port, driven
//! by a raw-socket client speaking the PostgreSQL v3 protocol.

mod wire_test_support;

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use portico::engine::{NullQueryEngine, QueryEngine, QueryOutcome};

use wire_test_support::{
    WireTestServer, packet_bytes, query_bytes, read_until_ready, ssl_request_bytes, startup,
    startup_bytes,
};

/// Tags every statement with its byte length; lets tests confirm an
/// oversized query arrived intact.
struct LenEngine;

impl QueryEngine for LenEngine {
    fn execute(&self, query: &str) -> QueryOutcome {
        QueryOutcome::Complete {
            tag: format!("LEN {}", query.len()),
        }
    }
}

/// Echoes the statement back as its completion tag.
struct TagEngine;

impl QueryEngine for TagEngine {
    fn execute(&self, query: &str) -> QueryOutcome {
        QueryOutcome::Complete {
            tag: query.to_string(),
        }
    }
}

/// Completes on a worker after a delay, exercising the deferred-result
/// wake path end to end.
struct SlowRowsEngine;

impl QueryEngine for SlowRowsEngine {
    fn execute(&self, _query: &str) -> QueryOutcome {
        std::thread::sleep(Duration::from_millis(10));
        QueryOutcome::Rows {
            columns: vec!["value".to_string()],
            rows: vec![vec![Some("42".to_string())]],
            tag: "SELECT 1".to_string(),
        }
    }
}

#[tokio::test]
async fn test_plain_startup_produces_auth_ok_then_ready() {
    let server = WireTestServer::start_with(Arc::new(NullQueryEngine), None).await;
    let mut stream = server.connect().await;

    stream.write_all(&startup_bytes("postgres")).await.unwrap();
    let messages = read_until_ready(&mut stream).await;

    // authentication-ok (type 0) first
    assert_eq!(messages[0].0, b'R');
    assert_eq!(messages[0].1, 0i32.to_be_bytes());
    // backend key data follows
    assert_eq!(messages[1].0, b'K');
    // ready-for-query, idle, last
    let last = messages.last().unwrap();
    assert_eq!(last.0, b'Z');
    assert_eq!(last.1, b"I");
    // parameter status messages in between
    assert!(messages.iter().any(|(t, p)| *t == b'S' && p.starts_with(b"server_version\0")));
}

#[tokio::test]
async fn test_ssl_request_rejected_without_tls_config() {
    let server = WireTestServer::start_with(Arc::new(NullQueryEngine), None).await;
    let mut stream = server.connect().await;

    stream.write_all(&ssl_request_bytes()).await.unwrap();
    let reply = stream.read_u8().await.unwrap();
    assert_eq!(reply, b'N');

    // the session continues in plaintext
    startup(&mut stream, "postgres").await;
}

#[tokio::test]
async fn test_gss_encryption_request_is_rejected() {
    let server = WireTestServer::start_with(Arc::new(NullQueryEngine), None).await;
    let mut stream = server.connect().await;

    let mut wire = 8u32.to_be_bytes().to_vec();
    wire.extend_from_slice(&80877104i32.to_be_bytes());
    stream.write_all(&wire).await.unwrap();

    assert_eq!(stream.read_u8().await.unwrap(), b'N');
    startup(&mut stream, "postgres").await;
}

#[tokio::test]
async fn test_cancel_request_closes_without_reply() {
    let server = WireTestServer::start_with(Arc::new(NullQueryEngine), None).await;
    let mut stream = server.connect().await;

    let mut wire = 16u32.to_be_bytes().to_vec();
    wire.extend_from_slice(&80877102i32.to_be_bytes());
    wire.extend_from_slice(&1i32.to_be_bytes());
    wire.extend_from_slice(&2i32.to_be_bytes());
    stream.write_all(&wire).await.unwrap();

    let mut buf = [0u8; 1];
    assert_eq!(stream.read(&mut buf).await.unwrap(), 0);
}

#[tokio::test]
async fn test_terminate_closes_the_connection() {
    let server = WireTestServer::start_with(Arc::new(NullQueryEngine), None).await;
    let mut stream = server.connect().await;
    startup(&mut stream, "postgres").await;

    stream.write_all(&packet_bytes(b'X', b"")).await.unwrap();

    let mut buf = [0u8; 1];
    assert_eq!(stream.read(&mut buf).await.unwrap(), 0);
}

#[tokio::test]
async fn test_malformed_length_closes_without_wire_error() {
    let server = WireTestServer::start_with(Arc::new(NullQueryEngine), None).await;
    let mut stream = server.connect().await;
    startup(&mut stream, "postgres").await;

    // length field below its own size
    stream.write_all(&[b'Q', 0, 0, 0, 2]).await.unwrap();

    let mut buf = [0u8; 64];
    assert_eq!(stream.read(&mut buf).await.unwrap(), 0);
}

#[tokio::test]
async fn test_oversized_query_spans_multiple_read_passes() {
    let server = WireTestServer::start_with(Arc::new(LenEngine), None).await;
    let mut stream = server.connect().await;
    startup(&mut stream, "postgres").await;

    // far larger than the 8 KiB socket buffer; one logical packet
    let sql = "x".repeat(20_000);
    stream.write_all(&query_bytes(&sql)).await.unwrap();

    let messages = read_until_ready(&mut stream).await;
    let complete = messages.iter().find(|(t, _)| *t == b'C').unwrap();
    assert_eq!(complete.1, b"LEN 20000\0");
}

#[tokio::test]
async fn test_deferred_query_wakes_and_returns_rows() {
    let server = WireTestServer::start_with(Arc::new(SlowRowsEngine), None).await;
    let mut stream = server.connect().await;
    startup(&mut stream, "postgres").await;

    stream.write_all(&query_bytes("SELECT 42")).await.unwrap();
    let messages = read_until_ready(&mut stream).await;

    let types: Vec<u8> = messages.iter().map(|(t, _)| *t).collect();
    assert_eq!(types, vec![b'T', b'D', b'C', b'Z']);

    // one column, "42"
    let data_row = &messages[1].1;
    assert_eq!(&data_row[..2], &1i16.to_be_bytes());
    assert_eq!(&data_row[2..6], &2i32.to_be_bytes());
    assert_eq!(&data_row[6..], b"42");

    assert_eq!(messages[2].1, b"SELECT 1\0");
}

#[tokio::test]
async fn test_pipelined_queries_answered_in_order() {
    let server = WireTestServer::start_with(Arc::new(TagEngine), None).await;
    let mut stream = server.connect().await;
    startup(&mut stream, "postgres").await;

    // both statements in a single segment; responses must come back FIFO
    let mut wire = query_bytes("first");
    wire.extend_from_slice(&query_bytes("second"));
    stream.write_all(&wire).await.unwrap();

    let first = read_until_ready(&mut stream).await;
    assert_eq!(first.iter().find(|(t, _)| *t == b'C').unwrap().1, b"first\0");

    let second = read_until_ready(&mut stream).await;
    assert_eq!(
        second.iter().find(|(t, _)| *t == b'C').unwrap().1,
        b"second\0"
    );
}

#[tokio::test]
async fn test_empty_query_gets_empty_response() {
    let server = WireTestServer::start_with(Arc::new(NullQueryEngine), None).await;
    let mut stream = server.connect().await;
    startup(&mut stream, "postgres").await;

    stream.write_all(&query_bytes("")).await.unwrap();
    let messages = read_until_ready(&mut stream).await;
    let types: Vec<u8> = messages.iter().map(|(t, _)| *t).collect();
    assert_eq!(types, vec![b'I', b'Z']);
}

#[tokio::test]
async fn test_unsupported_extended_message_gets_error_response() {
    let server = WireTestServer::start_with(Arc::new(NullQueryEngine), None).await;
    let mut stream = server.connect().await;
    startup(&mut stream, "postgres").await;

    // a Parse message; extended protocol is not offered
    stream
        .write_all(&packet_bytes(b'P', b"\0SELECT 1\0\0\0"))
        .await
        .unwrap();

    let messages = read_until_ready(&mut stream).await;
    assert_eq!(messages[0].0, b'E');
    assert!(
        messages[0]
            .1
            .windows(6)
            .any(|window| window == b"C0A000")
    );
}
