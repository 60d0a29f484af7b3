//! Per-connection state machine and driver.
//!
//! A [`ConnectionHandle`] owns a client socket from accept to close: the
//! transport (plain or TLS), both socket buffers, the startup framer, the
//! protocol handler, the traffic cop, and the two events that can
//! reactivate it. Transitions are driven by three independent sources
//! (socket readiness, parse progress over a partially filled buffer, and
//! the query engine's completion wake) and meet in one place:
//!
//! ```text
//!         READ ──proceed──> PROCESS ──proceed──> WRITE
//!          ^                   │  │                │
//!          │<───need data──────┘  └─processing──> WAIT_RESULT
//!          │                                        │ (wake)
//!          └────────────rearm read──────── WRITE <──┘
//!
//!         any error / EOF / terminate ──> CLOSING ──> CLOSED
//! ```
//!
//! All transitions for one handle execute on its driver task; nothing here
//! is locked. The single cross-thread touch point is the wake event, which
//! the traffic cop raises from its worker.

use std::sync::Arc;

use tokio::io::Interest;
use tokio::net::TcpStream;
use tracing::{debug, error, trace, warn};

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::engine::{QueryEngine, TrafficCop};
use crate::event::{EventMask, NetworkEvent, WakeEvent};
use crate::framer::{FrameOutcome, PacketFramer};
use crate::packet::OutputPacket;
use crate::protocol::{InitialResult, PostgresHandler, ProcessResult, ProtocolHandler};
use crate::transport::{
    FlushOutcome, HandshakeOutcome, ReadOutcome, Transport, WriteOutcome,
};

/// Safety cap on handshake rounds; each round awaits readiness, so the cap
/// only bounds a peer that keeps the handshake alive without finishing it.
const TLS_HANDSHAKE_ROUND_CAP: usize = 256;

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Filling the read buffer from the socket.
    Read,
    /// Framing packets and dispatching them to the protocol handler.
    Process,
    /// Draining the response queue to the socket.
    Write,
    /// Network event deregistered; waiting for the query engine's wake.
    WaitResult,
    /// Tearing down.
    Closing,
    /// Terminal.
    Closed,
}

/// What a state handler asks the driver to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Enter the next state immediately.
    Proceed,
    /// More inbound bytes are required; yield until the socket is ready.
    NeedData,
    /// A deferred result is pending; park until the wake fires.
    GetResult,
    /// The socket rejected a write; yield until it is writable.
    NotReady,
    /// Orderly peer close.
    Finish,
    /// Unrecoverable; close.
    Error,
    /// Nothing further.
    None,
}

/// Write-path progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteState {
    Complete,
    NotReady,
    Error,
}

/// One client connection's state machine.
pub struct ConnectionHandle {
    pid: i32,
    transport: Transport,
    tls_config: Option<Arc<rustls::ServerConfig>>,
    rbuf: ReadBuffer,
    wbuf: WriteBuffer,
    startup_framer: PacketFramer,
    handler: Option<Box<dyn ProtocolHandler>>,
    cop: Arc<TrafficCop>,
    network_event: NetworkEvent,
    wake_event: Arc<WakeEvent>,
    state: ConnState,
    /// Index of the next response packet to serialize.
    next_response: usize,
    /// An accepted SSL request awaits its handshake after the reply byte.
    ssl_handshake_pending: bool,
    /// The first (type-less) startup packet has been negotiated.
    startup_done: bool,
    /// TLS session holds a partial record; skip buffer shuffling on re-entry.
    read_blocked: bool,
    /// A read stalled on a pending TLS write; rearm for writability.
    read_blocked_on_write: bool,
    /// A write stalled on the socket; resume flushing before new packets.
    write_blocked: bool,
    /// A write stalled on a pending TLS read; rearm for readability.
    write_blocked_on_read: bool,
}

impl ConnectionHandle {
    pub fn new(
        socket: TcpStream,
        pid: i32,
        engine: Arc<dyn QueryEngine>,
        tls_config: Option<Arc<rustls::ServerConfig>>,
    ) -> Self {
        Self::with_transport(Transport::Plain(socket), pid, engine, tls_config)
    }

    fn with_transport(
        transport: Transport,
        pid: i32,
        engine: Arc<dyn QueryEngine>,
        tls_config: Option<Arc<rustls::ServerConfig>>,
    ) -> Self {
        let wake_event = WakeEvent::new();
        let cop = TrafficCop::new(engine);
        // the cop sees the wake handle only as an opaque completion token
        let token = Arc::clone(&wake_event);
        cop.set_task_callback(move || token.raise());

        Self {
            pid,
            transport,
            tls_config,
            rbuf: ReadBuffer::new(),
            wbuf: WriteBuffer::new(),
            startup_framer: PacketFramer::startup(),
            handler: None,
            cop,
            network_event: NetworkEvent::new(),
            wake_event,
            state: ConnState::Read,
            next_response: 0,
            ssl_handshake_pending: false,
            startup_done: false,
            read_blocked: false,
            read_blocked_on_write: false,
            write_blocked: false,
            write_blocked_on_read: false,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn network_event(&self) -> &NetworkEvent {
        &self.network_event
    }

    /// Drives the state machine until the connection closes.
    pub async fn run(mut self) {
        self.network_event.rearm(EventMask::READ_PERSIST);
        while self.state != ConnState::Closed {
            self.step().await;
        }
        debug!(pid = self.pid, "connection finished");
    }

    /// Executes one state, including any yield to the event sources.
    async fn step(&mut self) {
        match self.state {
            ConnState::Read => match self.fill_read_buffer() {
                Transition::Proceed => self.state = ConnState::Process,
                Transition::NeedData => {
                    self.rearm_after_read();
                    self.wait_for_event().await;
                }
                Transition::Finish => self.state = ConnState::Closing,
                _ => self.state = ConnState::Closing,
            },
            ConnState::Process => match self.process() {
                Transition::Proceed => self.state = ConnState::Write,
                Transition::NeedData => self.state = ConnState::Read,
                Transition::GetResult => {
                    // no spurious readiness deliveries while the engine works
                    self.network_event.disarm();
                    self.state = ConnState::WaitResult;
                }
                _ => self.state = ConnState::Closing,
            },
            ConnState::Write => match self.write_packets() {
                WriteState::Complete => {
                    if self.ssl_handshake_pending {
                        self.ssl_handshake_pending = false;
                        if !self.establish_tls().await {
                            self.state = ConnState::Closing;
                            return;
                        }
                    }
                    self.network_event.rearm(EventMask::READ_PERSIST);
                    // a deferred statement may have parked mid-batch with
                    // complete packets still buffered; those never trigger
                    // another readiness event, so process them now
                    self.state = if self.rbuf.available_read() > 0 {
                        ConnState::Process
                    } else {
                        ConnState::Read
                    };
                }
                WriteState::NotReady => {
                    self.rearm_after_write();
                    self.wait_for_event().await;
                }
                WriteState::Error => self.state = ConnState::Closing,
            },
            ConnState::WaitResult => {
                self.wake_event.wait().await;
                self.get_result();
            }
            ConnState::Closing => {
                self.close().await;
            }
            ConnState::Closed => {}
        }
    }

    /// READ: pulls socket bytes into the read buffer.
    ///
    /// Drains greedily while the buffer has room: a TLS session may hold
    /// decoded application data the event loop cannot observe, so stopping
    /// at the first short read would strand it. Any bytes at all make the
    /// pass a success; compaction beforehand is the only mechanism that
    /// makes room for large packets mid-assembly.
    fn fill_read_buffer(&mut self) -> Transition {
        if !self.read_blocked {
            if self.rbuf.available_read() == 0 {
                self.rbuf.reset();
            }
            if self.rbuf.committed() == self.rbuf.capacity() && self.rbuf.cursor() > 0 {
                self.rbuf.compact();
            }
        }

        let mut result = Transition::NeedData;
        loop {
            if self.rbuf.available_write() == 0 {
                // buffer full; let PROCESS drain it
                return Transition::Proceed;
            }
            let is_tls = self.transport.is_tls();
            self.read_blocked = false;
            self.read_blocked_on_write = false;
            match self.transport.try_read(self.rbuf.fill_slice()) {
                ReadOutcome::Bytes(n) => {
                    trace!(pid = self.pid, bytes = n, "read");
                    self.rbuf.advance_committed(n);
                    result = Transition::Proceed;
                }
                ReadOutcome::Eof => return Transition::Finish,
                ReadOutcome::WouldBlockRead => {
                    if is_tls {
                        self.read_blocked = true;
                    }
                    return result;
                }
                ReadOutcome::WouldBlockWrite => {
                    // renegotiation turned this read into a pending write
                    self.read_blocked_on_write = true;
                    return result;
                }
                ReadOutcome::Interrupted => continue,
                ReadOutcome::Fatal(e) => {
                    error!(pid = self.pid, error = %e, "fatal read error");
                    return Transition::Error;
                }
            }
        }
    }

    /// PROCESS: startup negotiation until `startup_done`, then the protocol
    /// handler's packet loop.
    fn process(&mut self) -> Transition {
        if !self.startup_done {
            return self.process_initial();
        }
        let Some(handler) = self.handler.as_mut() else {
            error!(pid = self.pid, "startup finished without a protocol handler");
            return Transition::Error;
        };
        match handler.process(&mut self.rbuf) {
            ProcessResult::Complete => Transition::Proceed,
            ProcessResult::MoreDataRequired => Transition::NeedData,
            ProcessResult::Processing => Transition::GetResult,
            ProcessResult::Terminate => Transition::Error,
        }
    }

    /// Frames the type-less startup packet and hands it to the handler,
    /// creating the handler on first contact.
    fn process_initial(&mut self) -> Transition {
        match self.startup_framer.poll_packet(&mut self.rbuf) {
            FrameOutcome::NeedMore => Transition::NeedData,
            FrameOutcome::Malformed => {
                warn!(pid = self.pid, "malformed startup packet");
                Transition::Error
            }
            FrameOutcome::Complete(pkt) => {
                let pid = self.pid;
                let cop = Arc::clone(&self.cop);
                let handler = self
                    .handler
                    .get_or_insert_with(|| {
                        Box::new(PostgresHandler::new(pid, cop)) as Box<dyn ProtocolHandler>
                    });
                let ssl_capable = self.tls_config.is_some() && !self.transport.is_tls();
                match handler.process_initial_packet(pkt, ssl_capable) {
                    InitialResult::SslResponse { accepted } => {
                        self.ssl_handshake_pending = accepted;
                        Transition::Proceed
                    }
                    InitialResult::Complete => {
                        self.startup_done = true;
                        Transition::Proceed
                    }
                    InitialResult::Terminate => Transition::Error,
                }
            }
        }
    }

    /// WRITE: serializes queued responses into the write buffer and flushes.
    ///
    /// A would-block mid-stream leaves `next_response`, the packet's
    /// `write_cursor`/`skip_header`, and the buffer's flush cursor exactly
    /// where they were, so re-entry resumes without duplicating a byte.
    fn write_packets(&mut self) -> WriteState {
        // bytes stranded by an earlier would-block go out first
        if self.write_blocked {
            match self.flush_write_buffer() {
                WriteState::Complete => {}
                other => return other,
            }
        }

        let mut responses = match self.handler.as_mut() {
            Some(handler) => std::mem::take(handler.responses_mut()),
            None => return WriteState::Complete,
        };

        while self.next_response < responses.len() {
            let pkt = &mut responses[self.next_response];
            trace!(
                pid = self.pid,
                msg_type = %(pkt.msg_type as char),
                len = pkt.len(),
                "serializing response"
            );
            let outcome = match self.buffer_write_header(pkt) {
                WriteState::Complete => self.buffer_write_content(pkt),
                other => other,
            };
            if !matches!(outcome, WriteState::Complete) {
                if let Some(handler) = self.handler.as_mut() {
                    *handler.responses_mut() = responses;
                }
                return outcome;
            }
            self.next_response += 1;
        }

        responses.clear();
        self.next_response = 0;
        let mut force_flush = false;
        if let Some(handler) = self.handler.as_mut() {
            *handler.responses_mut() = responses;
            force_flush = handler.flush_flag();
        }

        if force_flush {
            match self.flush_write_buffer() {
                WriteState::Complete => {
                    if let Some(handler) = self.handler.as_mut() {
                        handler.set_flush_flag(false);
                    }
                }
                other => return other,
            }
        }
        WriteState::Complete
    }

    /// Emits a packet's header: one type byte (unless zero) and the
    /// length-including-itself field (unless suppressed). The five header
    /// bytes always land contiguously; the buffer is flushed first if they
    /// would not fit.
    fn buffer_write_header(&mut self, pkt: &mut OutputPacket) -> WriteState {
        if pkt.skip_header {
            return WriteState::Complete;
        }
        if self.wbuf.available_write() < 5 {
            match self.flush_write_buffer() {
                WriteState::Complete => {}
                other => return other,
            }
        }
        if pkt.msg_type != 0 {
            self.wbuf.append(&[pkt.msg_type]);
        }
        if !pkt.omit_length {
            let wire_len = (pkt.len() + 4) as u32;
            self.wbuf.append(&wire_len.to_be_bytes());
        }
        pkt.skip_header = true;
        WriteState::Complete
    }

    /// Copies a packet's payload into the write buffer, flushing whenever
    /// the window fills.
    fn buffer_write_content(&mut self, pkt: &mut OutputPacket) -> WriteState {
        while pkt.remaining() > 0 {
            let window = self.wbuf.available_write();
            if window == 0 {
                match self.flush_write_buffer() {
                    WriteState::Complete => continue,
                    other => return other,
                }
            }
            let n = window.min(pkt.remaining());
            self.wbuf
                .append(&pkt.payload[pkt.write_cursor..pkt.write_cursor + n]);
            pkt.write_cursor += n;
        }
        WriteState::Complete
    }

    /// Drains the write buffer to the socket.
    fn flush_write_buffer(&mut self) -> WriteState {
        while self.wbuf.outstanding() > 0 {
            self.write_blocked = false;
            self.write_blocked_on_read = false;
            match self.transport.try_write(self.wbuf.flush_slice()) {
                WriteOutcome::Bytes(n) => {
                    trace!(pid = self.pid, bytes = n, "flushed");
                    self.wbuf.advance_flushed(n);
                }
                WriteOutcome::WouldBlockWrite => {
                    self.write_blocked = true;
                    return WriteState::NotReady;
                }
                WriteOutcome::WouldBlockRead => {
                    // renegotiation turned this write into a pending read
                    self.write_blocked_on_read = true;
                    return WriteState::NotReady;
                }
                WriteOutcome::Interrupted => continue,
                WriteOutcome::Fatal(e) => {
                    error!(pid = self.pid, error = %e, "fatal write error");
                    return WriteState::Error;
                }
            }
        }
        // transports that buffer records internally drain here
        match self.transport.try_flush() {
            FlushOutcome::Flushed => {
                self.wbuf.reset();
                WriteState::Complete
            }
            FlushOutcome::WouldBlockWrite => {
                self.write_blocked = true;
                WriteState::NotReady
            }
            FlushOutcome::Fatal(e) => {
                error!(pid = self.pid, error = %e, "fatal flush error");
                WriteState::Error
            }
        }
    }

    /// GET_RESULT: re-register the network event, let the handler turn the
    /// completed outcome into response packets, head to WRITE.
    fn get_result(&mut self) {
        self.network_event.rearm(EventMask::READ_PERSIST);
        if let Some(handler) = self.handler.as_mut() {
            handler.get_result();
        }
        self.cop.set_queuing(false);
        self.state = ConnState::Write;
    }

    /// Allocates the TLS session and drives the handshake to completion,
    /// yielding to the event loop between rounds.
    async fn establish_tls(&mut self) -> bool {
        let Some(config) = self.tls_config.clone() else {
            error!(pid = self.pid, "SSL accepted without a TLS configuration");
            return false;
        };
        if let Err(e) = self.transport.start_tls(config) {
            error!(pid = self.pid, error = %e, "failed to allocate TLS session");
            return false;
        }
        debug!(pid = self.pid, "TLS handshake started");

        for _ in 0..TLS_HANDSHAKE_ROUND_CAP {
            match self.transport.drive_handshake() {
                HandshakeOutcome::Done => {
                    debug!(pid = self.pid, "TLS handshake completed");
                    return true;
                }
                HandshakeOutcome::WouldBlockRead => {
                    self.transport.ready(Interest::READABLE).await;
                }
                HandshakeOutcome::WouldBlockWrite => {
                    self.transport.ready(Interest::WRITABLE).await;
                }
                HandshakeOutcome::Fatal(e) => {
                    error!(pid = self.pid, error = %e, "TLS handshake failed");
                    return false;
                }
            }
        }
        warn!(pid = self.pid, "TLS handshake exceeded round cap");
        false
    }

    /// CLOSING: idempotent teardown. Deregisters the events, shuts the
    /// transport down in order, resets every owned component, and releases
    /// the socket exactly once.
    async fn close(&mut self) -> Transition {
        if self.state == ConnState::Closed {
            return Transition::None;
        }
        debug!(pid = self.pid, "closing connection");
        self.state = ConnState::Closed;
        self.network_event.disarm();
        self.transport.shutdown().await;
        self.transport.close();
        self.rbuf.reset();
        self.wbuf.reset();
        self.startup_framer.reset();
        if let Some(handler) = self.handler.as_mut() {
            handler.reset();
        }
        self.cop.reset();
        self.next_response = 0;
        self.ssl_handshake_pending = false;
        self.read_blocked = false;
        self.read_blocked_on_write = false;
        self.write_blocked = false;
        self.write_blocked_on_read = false;
        Transition::None
    }

    /// Rearm mask after a read stalled: readability, unless the TLS session
    /// actually needs the socket writable.
    fn rearm_after_read(&mut self) {
        let mask = if self.read_blocked_on_write {
            EventMask::WRITE_PERSIST
        } else {
            EventMask::READ_PERSIST
        };
        self.network_event.rearm(mask);
    }

    /// Rearm mask after a write stalled: writability, unless the TLS
    /// session actually needs the socket readable.
    fn rearm_after_write(&mut self) {
        let mask = if self.write_blocked_on_read {
            EventMask::READ_PERSIST
        } else {
            EventMask::WRITE_PERSIST
        };
        self.network_event.rearm(mask);
    }

    /// Sleeps until an armed event fires. In WAIT_RESULT the network event
    /// is disarmed, so only the wake can deliver.
    async fn wait_for_event(&self) {
        if self.network_event.is_armed() {
            let interest = self.network_event.mask().interest();
            tokio::select! {
                _ = self.transport.ready(interest) => {}
                _ = self.wake_event.wait() => {}
            }
        } else {
            self.wake_event.wait().await;
        }
    }
}
