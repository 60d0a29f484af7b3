//! Readiness-aware transport shims over plain and TLS sockets.
//!
//! The state machine never touches the socket directly; it sees a uniform
//! outcome vocabulary instead. Short reads, interrupted syscalls, and
//! would-block conditions in *either* direction (a TLS session mid
//! renegotiation can block a read on a pending write and vice-versa) all
//! surface as variants the caller converts into state transitions.
//!
//! ## Terminology
//!
//! - **WouldBlockRead / WouldBlockWrite**: the operation cannot progress
//!   until the socket is readable / writable. The nominal direction of the
//!   operation does not determine which one a TLS session reports.
//! - **Interrupted**: EINTR equivalent; always retryable with no state
//!   change.

pub mod tls;

pub use tls::TlsSession;

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncWriteExt, Interest};
use tokio::net::TcpStream;

/// Outcome of one non-blocking read attempt.
#[derive(Debug)]
pub enum ReadOutcome {
    /// `n > 0` bytes were placed in the destination slice.
    Bytes(usize),
    /// Orderly peer close.
    Eof,
    WouldBlockRead,
    WouldBlockWrite,
    Interrupted,
    Fatal(io::Error),
}

/// Outcome of one non-blocking write attempt.
#[derive(Debug)]
pub enum WriteOutcome {
    Bytes(usize),
    WouldBlockRead,
    WouldBlockWrite,
    Interrupted,
    Fatal(io::Error),
}

/// Outcome of draining transport-internal output (TLS records the session
/// has produced but not yet pushed to the socket).
#[derive(Debug)]
pub enum FlushOutcome {
    Flushed,
    WouldBlockWrite,
    Fatal(io::Error),
}

/// Outcome of one TLS handshake step.
#[derive(Debug)]
pub enum HandshakeOutcome {
    Done,
    WouldBlockRead,
    WouldBlockWrite,
    Fatal(io::Error),
}

/// The connection's byte pipe: a plain socket, a TLS session over it, or
/// nothing once closed.
pub enum Transport {
    Plain(TcpStream),
    Tls(TlsSession),
    #[cfg(test)]
    Script(script::ScriptTransport),
    Closed,
}

impl Transport {
    pub fn is_tls(&self) -> bool {
        matches!(self, Transport::Tls(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Transport::Closed)
    }

    /// Reads into `dst` without blocking.
    pub fn try_read(&mut self, dst: &mut [u8]) -> ReadOutcome {
        match self {
            Transport::Plain(stream) => match stream.try_read(dst) {
                Ok(0) => ReadOutcome::Eof,
                Ok(n) => ReadOutcome::Bytes(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => ReadOutcome::WouldBlockRead,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => ReadOutcome::Interrupted,
                Err(e) => ReadOutcome::Fatal(e),
            },
            Transport::Tls(session) => session.try_read(dst),
            #[cfg(test)]
            Transport::Script(script) => script.try_read(dst),
            Transport::Closed => ReadOutcome::Eof,
        }
    }

    /// Writes from `src` without blocking.
    pub fn try_write(&mut self, src: &[u8]) -> WriteOutcome {
        match self {
            Transport::Plain(stream) => match stream.try_write(src) {
                Ok(n) => WriteOutcome::Bytes(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => WriteOutcome::WouldBlockWrite,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => WriteOutcome::Interrupted,
                Err(e) => WriteOutcome::Fatal(e),
            },
            Transport::Tls(session) => session.try_write(src),
            #[cfg(test)]
            Transport::Script(script) => script.try_write(src),
            Transport::Closed => WriteOutcome::Fatal(io::Error::new(
                io::ErrorKind::NotConnected,
                "write on closed transport",
            )),
        }
    }

    /// Drains output the transport itself buffers. A no-op for plain
    /// sockets; for TLS this pushes produced records onto the wire.
    pub fn try_flush(&mut self) -> FlushOutcome {
        match self {
            Transport::Tls(session) => session.try_flush(),
            _ => FlushOutcome::Flushed,
        }
    }

    /// Replaces the plain socket with a TLS session bound to it. The
    /// handshake itself is driven afterwards via [`Transport::drive_handshake`].
    pub fn start_tls(&mut self, config: Arc<rustls::ServerConfig>) -> io::Result<()> {
        let prev = std::mem::replace(self, Transport::Closed);
        match prev {
            Transport::Plain(stream) => {
                let session = rustls::ServerConnection::new(config)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
                *self = Transport::Tls(TlsSession::new(stream, session));
                Ok(())
            }
            other => {
                *self = other;
                Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "TLS requested on a non-plain transport",
                ))
            }
        }
    }

    /// Advances the server-side TLS handshake as far as the socket allows.
    pub fn drive_handshake(&mut self) -> HandshakeOutcome {
        match self {
            Transport::Tls(session) => session.drive_handshake(),
            _ => HandshakeOutcome::Done,
        }
    }

    /// Awaits socket readiness for `interest`. Readiness errors are left for
    /// the next I/O attempt to surface.
    pub async fn ready(&self, interest: Interest) {
        match self {
            Transport::Plain(stream) => {
                let _ = stream.ready(interest).await;
            }
            Transport::Tls(session) => {
                let _ = session.stream().ready(interest).await;
            }
            #[cfg(test)]
            Transport::Script(_) => {}
            Transport::Closed => {}
        }
    }

    /// Orderly shutdown: close-notify for TLS sessions, then a socket
    /// shutdown. Tolerates would-block with a bounded number of retries.
    pub async fn shutdown(&mut self) {
        match self {
            Transport::Plain(stream) => {
                let _ = stream.shutdown().await;
            }
            Transport::Tls(session) => session.shutdown().await,
            #[cfg(test)]
            Transport::Script(script) => script.shutdown_calls += 1,
            Transport::Closed => {}
        }
    }

    /// Drops the underlying socket; the FD is closed exactly once.
    pub fn close(&mut self) {
        *self = Transport::Closed;
    }
}
