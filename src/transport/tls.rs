//! TLS transport over a rustls server session, sans-IO style.
//!
//! The session is pumped manually: encrypted bytes move between the socket
//! and the session with `read_tls`/`write_tls`, plaintext with the session's
//! reader and writer. This keeps the readiness model honest: the session
//! may hold decoded application data the event loop cannot observe, so the
//! read path always drains the session before consulting the socket, and a
//! blocked handshake step is reported in the direction the *session* needs,
//! not the direction the caller asked for.

use std::io::{self, Read, Write};

use tokio::io::{AsyncWriteExt, Interest};
use tokio::net::TcpStream;

use crate::transport::{FlushOutcome, HandshakeOutcome, ReadOutcome, WriteOutcome};

/// Retry bound for the orderly-shutdown loop. The peer controls how long a
/// close-notify exchange takes; the cap keeps a hostile peer from pinning
/// the task.
const SHUTDOWN_RETRY_CAP: usize = 32;

/// A TLS server session bound to a connected socket.
pub struct TlsSession {
    stream: TcpStream,
    session: rustls::ServerConnection,
}

/// Non-blocking `io::Read` view of the socket for `read_tls`.
struct SockRead<'a>(&'a TcpStream);

impl Read for SockRead<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.try_read(buf)
    }
}

/// Non-blocking `io::Write` view of the socket for `write_tls`.
struct SockWrite<'a>(&'a TcpStream);

impl Write for SockWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.try_write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Result of pushing session-buffered records to the socket.
enum Pump {
    Drained,
    WouldBlockWrite,
    Interrupted,
    Fatal(io::Error),
}

impl TlsSession {
    pub fn new(stream: TcpStream, session: rustls::ServerConnection) -> Self {
        Self { stream, session }
    }

    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    /// Reads decrypted application bytes into `dst`.
    ///
    /// Order matters: session-buffered plaintext first (invisible to the
    /// event loop), then pending outbound records (a renegotiating session
    /// must write before it can read), then fresh bytes from the socket.
    pub fn try_read(&mut self, dst: &mut [u8]) -> ReadOutcome {
        loop {
            match self.session.reader().read(dst) {
                Ok(0) => return ReadOutcome::Eof,
                Ok(n) => return ReadOutcome::Bytes(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return ReadOutcome::Fatal(e),
            }

            if self.session.wants_write() {
                match self.pump_writes() {
                    Pump::Drained => {}
                    Pump::WouldBlockWrite => return ReadOutcome::WouldBlockWrite,
                    Pump::Interrupted => return ReadOutcome::Interrupted,
                    Pump::Fatal(e) => return ReadOutcome::Fatal(e),
                }
            }

            match self.session.read_tls(&mut SockRead(&self.stream)) {
                Ok(0) => return ReadOutcome::Eof,
                Ok(_) => {
                    if let Err(e) = self.session.process_new_packets() {
                        // push the alert out best-effort before giving up
                        let _ = self.session.write_tls(&mut SockWrite(&self.stream));
                        return ReadOutcome::Fatal(io::Error::new(io::ErrorKind::InvalidData, e));
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return ReadOutcome::WouldBlockRead;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    return ReadOutcome::Interrupted;
                }
                Err(e) => return ReadOutcome::Fatal(e),
            }
        }
    }

    /// Encrypts and writes plaintext from `src`.
    ///
    /// The returned byte count refers to plaintext accepted by the session;
    /// records the socket did not take yet are pushed by the next flush, so
    /// accepted bytes are never re-submitted.
    pub fn try_write(&mut self, src: &[u8]) -> WriteOutcome {
        match self.pump_writes() {
            Pump::Drained => {}
            Pump::WouldBlockWrite => return WriteOutcome::WouldBlockWrite,
            Pump::Interrupted => return WriteOutcome::Interrupted,
            Pump::Fatal(e) => return WriteOutcome::Fatal(e),
        }

        if self.session.is_handshaking() && self.session.wants_read() {
            // mid-renegotiation the session needs inbound handshake bytes
            // before it will carry more application data
            return WriteOutcome::WouldBlockRead;
        }

        let n = match self.session.writer().write(src) {
            Ok(n) => n,
            Err(e) => return WriteOutcome::Fatal(e),
        };

        // opportunistic push; a block here is not an error since the
        // plaintext is already owned by the session
        if let Pump::Fatal(e) = self.pump_writes() {
            return WriteOutcome::Fatal(e);
        }
        WriteOutcome::Bytes(n)
    }

    /// Pushes any session-buffered records onto the wire.
    pub fn try_flush(&mut self) -> FlushOutcome {
        loop {
            match self.pump_writes() {
                Pump::Drained => return FlushOutcome::Flushed,
                Pump::WouldBlockWrite => return FlushOutcome::WouldBlockWrite,
                Pump::Interrupted => continue,
                Pump::Fatal(e) => return FlushOutcome::Fatal(e),
            }
        }
    }

    /// Advances the server handshake as far as the socket allows.
    pub fn drive_handshake(&mut self) -> HandshakeOutcome {
        while self.session.is_handshaking() {
            if self.session.wants_write() {
                match self.pump_writes() {
                    Pump::Drained => continue,
                    Pump::WouldBlockWrite => return HandshakeOutcome::WouldBlockWrite,
                    Pump::Interrupted => continue,
                    Pump::Fatal(e) => return HandshakeOutcome::Fatal(e),
                }
            }
            match self.session.read_tls(&mut SockRead(&self.stream)) {
                Ok(0) => {
                    return HandshakeOutcome::Fatal(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "peer closed during TLS handshake",
                    ));
                }
                Ok(_) => {
                    if let Err(e) = self.session.process_new_packets() {
                        let _ = self.session.write_tls(&mut SockWrite(&self.stream));
                        return HandshakeOutcome::Fatal(io::Error::new(
                            io::ErrorKind::InvalidData,
                            e,
                        ));
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return HandshakeOutcome::WouldBlockRead;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return HandshakeOutcome::Fatal(e),
            }
        }

        // handshake done; push the final flight before reporting success
        match self.pump_writes() {
            Pump::Drained => HandshakeOutcome::Done,
            Pump::WouldBlockWrite => HandshakeOutcome::WouldBlockWrite,
            Pump::Interrupted => HandshakeOutcome::WouldBlockWrite,
            Pump::Fatal(e) => HandshakeOutcome::Fatal(e),
        }
    }

    /// Orderly close: queue a close-notify and drain it, tolerating a
    /// bounded number of would-block rounds, then shut the socket down.
    pub async fn shutdown(&mut self) {
        self.session.send_close_notify();
        let mut retries = 0;
        loop {
            match self.pump_writes() {
                Pump::Drained => break,
                Pump::WouldBlockWrite => {
                    retries += 1;
                    if retries > SHUTDOWN_RETRY_CAP {
                        break;
                    }
                    let _ = self.stream.ready(Interest::WRITABLE).await;
                }
                Pump::Interrupted => continue,
                Pump::Fatal(_) => break,
            }
        }
        let _ = self.stream.shutdown().await;
    }

    fn pump_writes(&mut self) -> Pump {
        while self.session.wants_write() {
            match self.session.write_tls(&mut SockWrite(&self.stream)) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Pump::WouldBlockWrite,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => return Pump::Interrupted,
                Err(e) => return Pump::Fatal(e),
            }
        }
        Pump::Drained
    }
}
