//! Packet framing over the inbound socket buffer.
//!
//! The framer turns the byte stream accumulated in a [`ReadBuffer`] into
//! discrete [`InputPacket`]s. Two framing modes exist: the startup packet a
//! client sends first has no type byte (`[length:4][payload]`), every
//! subsequent packet is `[type:1][length:4][payload]`. In both modes the
//! wire length field counts itself, so the payload is `length - 4` bytes.
//!
//! A partially received packet persists inside the framer between READ
//! passes; [`FrameOutcome::NeedMore`] tells the state machine to go back to
//! the socket for more bytes.

use crate::buffer::{BufferError, ReadBuffer};
use crate::packet::InputPacket;

/// Maximum packet payload in bytes (16 MB).
/// PostgreSQL allows up to 1 GB; 16 MB is a reasonable default for most use cases.
pub const MAX_PACKET_PAYLOAD: usize = 16 * 1024 * 1024;

/// Result of one framing attempt.
#[derive(Debug)]
pub enum FrameOutcome {
    /// A whole packet was decoded.
    Complete(InputPacket),
    /// The buffer ran short; read more bytes and try again.
    NeedMore,
    /// The length field is impossible; the connection must close.
    Malformed,
}

/// Framing mode. Startup packets carry no type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FramingMode {
    Startup,
    SteadyState,
}

/// Incremental packet decoder.
pub struct PacketFramer {
    mode: FramingMode,
    in_progress: InputPacket,
}

impl PacketFramer {
    /// A framer for the connection's first packet (no type byte).
    pub fn startup() -> Self {
        Self {
            mode: FramingMode::Startup,
            in_progress: InputPacket::new(),
        }
    }

    /// A framer for the steady-state `[type][length][payload]` format.
    pub fn steady_state() -> Self {
        Self {
            mode: FramingMode::SteadyState,
            in_progress: InputPacket::new(),
        }
    }

    /// Discards any partially decoded packet.
    pub fn reset(&mut self) {
        self.in_progress.reset();
    }

    /// Attempts to decode the next packet from `rbuf`.
    ///
    /// Consumes header bytes only once enough are buffered, then accretes
    /// payload bytes until the packet reaches its advertised length. Payloads
    /// larger than the buffer capacity reserve an extended allocation and are
    /// filled over as many passes as it takes.
    pub fn poll_packet(&mut self, rbuf: &mut ReadBuffer) -> FrameOutcome {
        if !self.in_progress.header_parsed {
            match self.parse_header(rbuf) {
                HeaderOutcome::Parsed => {}
                HeaderOutcome::NeedMore => return FrameOutcome::NeedMore,
                HeaderOutcome::Malformed => return FrameOutcome::Malformed,
            }
        }

        let wanted = self.in_progress.remaining();
        if wanted > 0 {
            let chunk = rbuf.take(wanted);
            self.in_progress.extend_payload(chunk);
        } else {
            self.in_progress.fully_read = true;
        }

        if self.in_progress.fully_read {
            FrameOutcome::Complete(std::mem::take(&mut self.in_progress))
        } else {
            FrameOutcome::NeedMore
        }
    }

    fn parse_header(&mut self, rbuf: &mut ReadBuffer) -> HeaderOutcome {
        let msg_type = match self.mode {
            FramingMode::Startup => None,
            FramingMode::SteadyState => {
                // consume nothing until the whole header is buffered
                if rbuf.available_read() < 5 {
                    return HeaderOutcome::NeedMore;
                }
                Some(rbuf.read_u8().unwrap_or(0))
            }
        };
        let wire_len = match rbuf.read_u32_be() {
            Ok(len) => len as usize,
            Err(BufferError::ShortBuffer) => return HeaderOutcome::NeedMore,
        };

        // The length field counts itself; anything under 4 (including zero)
        // cannot describe a packet.
        if wire_len < 4 {
            return HeaderOutcome::Malformed;
        }
        let payload_len = wire_len - 4;
        if payload_len > MAX_PACKET_PAYLOAD {
            return HeaderOutcome::Malformed;
        }

        let pkt = &mut self.in_progress;
        pkt.msg_type = msg_type;
        pkt.length = payload_len;
        pkt.is_extended = payload_len > rbuf.capacity();
        pkt.payload.reserve(payload_len);
        pkt.header_parsed = true;
        HeaderOutcome::Parsed
    }
}

enum HeaderOutcome {
    Parsed,
    NeedMore,
    Malformed,
}
