//! The capability set a wire dialect exposes to the connection engine.

use crate::buffer::ReadBuffer;
use crate::packet::{InputPacket, OutputPacket};

/// Result of one handler pass over the read buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessResult {
    /// One or more responses are queued; the engine should write them.
    Complete,
    /// A packet is incomplete; the engine should read more bytes.
    MoreDataRequired,
    /// The query engine took ownership of a request and will raise the wake
    /// event when its result is ready.
    Processing,
    /// The connection must close.
    Terminate,
}

/// Result of startup-packet negotiation.
///
/// The SSL sentinel exchange and the real startup packet both arrive in
/// startup framing; the variant tells the engine which one it just handled
/// and what to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitialResult {
    /// An SSL (or GSSAPI) negotiation request was answered with a single
    /// byte; when `accepted`, a TLS handshake follows the reply and the real
    /// startup packet arrives over TLS.
    SslResponse { accepted: bool },
    /// Startup negotiation finished; authentication and session responses
    /// are queued.
    Complete,
    /// The startup packet was unacceptable (or a cancel request); close.
    Terminate,
}

/// A wire protocol dialect.
///
/// The engine owns framing of the *startup* packet (it is the only packet
/// without a type byte); everything after that goes through `process`, which
/// frames and interprets steady-state packets itself. Responses accumulate
/// in the queue returned by `responses_mut` and are drained by the engine's
/// WRITE state.
pub trait ProtocolHandler: Send + Sync {
    /// Consumes complete packets from the read buffer, queueing responses.
    fn process(&mut self, rbuf: &mut ReadBuffer) -> ProcessResult;

    /// Performs version/parameter negotiation on the startup packet.
    fn process_initial_packet(&mut self, packet: InputPacket, ssl_capable: bool) -> InitialResult;

    /// Ordered response queue; the engine drains it from its own cursor.
    fn responses_mut(&mut self) -> &mut Vec<OutputPacket>;

    /// When set, the engine flushes the socket after draining responses.
    fn flush_flag(&self) -> bool;

    fn set_flush_flag(&mut self, on: bool);

    /// Invoked on wake: appends response packets synthesised from the
    /// completed query.
    fn get_result(&mut self);

    /// Clears queues and parser state.
    fn reset(&mut self);
}
