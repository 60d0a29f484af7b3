//! Test utilities for wire-level integration tests.
//!
//! Provides a server wrapper around an ephemeral port plus raw-socket
//! helpers speaking just enough of the PostgreSQL v3 protocol to drive the
//! connection engine from the client side.

// pulled in via `mod` by several test binaries; not all of them use every helper
#![allow(dead_code)]

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use portico::engine::QueryEngine;
use portico::server::Server;

/// SSLRequest wire code (1234 << 16 | 5679).
pub const SSL_REQUEST_CODE: i32 = 80877103;

/// A test server wrapper that handles setup and teardown.
///
/// The server is started when created and automatically aborted when dropped.
pub struct WireTestServer {
    port: u16,
    handle: JoinHandle<()>,
}

impl WireTestServer {
    /// Starts a server with the given engine and optional TLS material on
    /// an available port.
    pub async fn start_with(
        engine: Arc<dyn QueryEngine>,
        tls_config: Option<Arc<rustls::ServerConfig>>,
    ) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = Server::new(listener, engine, tls_config);
        let handle = tokio::spawn(async move {
            let _ = server.serve().await;
        });

        Self { port, handle }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Connects to the test server with a raw `TcpStream`.
    pub async fn connect(&self) -> TcpStream {
        TcpStream::connect(("127.0.0.1", self.port)).await.unwrap()
    }
}

impl Drop for WireTestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// The startup packet for `user`, protocol 3.0.
pub fn startup_bytes(user: &str) -> Vec<u8> {
    let mut body = (3i32 << 16).to_be_bytes().to_vec();
    body.extend_from_slice(b"user\0");
    body.extend_from_slice(user.as_bytes());
    body.push(0);
    body.push(0); // parameter list terminator
    let mut wire = ((body.len() + 4) as u32).to_be_bytes().to_vec();
    wire.extend_from_slice(&body);
    wire
}

/// The SSLRequest sentinel packet.
pub fn ssl_request_bytes() -> Vec<u8> {
    let mut wire = 8u32.to_be_bytes().to_vec();
    wire.extend_from_slice(&SSL_REQUEST_CODE.to_be_bytes());
    wire
}

/// A steady-state `[type][length][payload]` packet.
pub fn packet_bytes(msg_type: u8, payload: &[u8]) -> Vec<u8> {
    let mut wire = vec![msg_type];
    wire.extend_from_slice(&((payload.len() + 4) as u32).to_be_bytes());
    wire.extend_from_slice(payload);
    wire
}

/// A simple-query packet.
pub fn query_bytes(sql: &str) -> Vec<u8> {
    let mut payload = sql.as_bytes().to_vec();
    payload.push(0);
    packet_bytes(b'Q', &payload)
}

/// Reads one backend message, returning its type byte and payload.
pub async fn read_message(stream: &mut TcpStream) -> (u8, Vec<u8>) {
    let msg_type = stream.read_u8().await.unwrap();
    let len = stream.read_i32().await.unwrap();
    assert!(len >= 4, "invalid length {} for message '{}'", len, msg_type as char);
    let mut payload = vec![0u8; (len - 4) as usize];
    stream.read_exact(&mut payload).await.unwrap();
    (msg_type, payload)
}

/// Reads backend messages up to and including ReadyForQuery.
pub async fn read_until_ready(stream: &mut TcpStream) -> Vec<(u8, Vec<u8>)> {
    let mut messages = Vec::new();
    loop {
        let message = read_message(stream).await;
        let done = message.0 == b'Z';
        messages.push(message);
        if done {
            return messages;
        }
    }
}

/// Performs a full plaintext startup and asserts the standard response
/// sequence, leaving the stream ready for queries.
pub async fn startup(stream: &mut TcpStream, user: &str) -> Vec<(u8, Vec<u8>)> {
    stream.write_all(&startup_bytes(user)).await.unwrap();
    let messages = read_until_ready(stream).await;
    assert_eq!(messages.first().map(|m| m.0), Some(b'R'));
    assert_eq!(messages.last().map(|m| m.0), Some(b'Z'));
    messages
}
