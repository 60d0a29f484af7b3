//! Logical framing units for the wire protocol.
//!
//! An [`InputPacket`] accretes payload bytes across any number of socket
//! reads until it reaches its advertised length; packets larger than the
//! socket buffer reserve their full payload up front and are filled over
//! multiple READ passes. An [`OutputPacket`] carries the partial-write
//! bookkeeping (`write_cursor`, `skip_header`) that lets a response survive
//! a would-block in the middle of serialization without duplicating bytes.

use bytes::BytesMut;

/// A decoded (or partially decoded) inbound protocol packet.
///
/// The startup packet is the only packet without a type byte; for it
/// `msg_type` is `None`. `length` counts payload bytes only, the wire
/// length field having already been adjusted by the framer.
#[derive(Debug)]
pub struct InputPacket {
    pub msg_type: Option<u8>,
    pub length: usize,
    pub payload: BytesMut,
    pub header_parsed: bool,
    pub fully_read: bool,
    /// Payload larger than the socket buffer; filled over multiple reads.
    pub is_extended: bool,
}

impl InputPacket {
    pub fn new() -> Self {
        Self {
            msg_type: None,
            length: 0,
            payload: BytesMut::new(),
            header_parsed: false,
            fully_read: false,
            is_extended: false,
        }
    }

    /// Bytes still missing from the payload.
    pub fn remaining(&self) -> usize {
        self.length - self.payload.len()
    }

    /// Appends payload bytes, marking the packet complete once the payload
    /// reaches its advertised length.
    pub fn extend_payload(&mut self, bytes: &[u8]) {
        debug_assert!(bytes.len() <= self.remaining());
        self.payload.extend_from_slice(bytes);
        if self.payload.len() == self.length {
            self.fully_read = true;
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for InputPacket {
    fn default() -> Self {
        Self::new()
    }
}

/// An outbound protocol packet queued by the protocol handler.
///
/// `msg_type == 0` means no type byte is emitted (reserved for future
/// dialects). `omit_length` suppresses the length field as well; the
/// single-byte SSL negotiation replies are the only packets that use it.
#[derive(Debug)]
pub struct OutputPacket {
    pub msg_type: u8,
    pub payload: BytesMut,
    /// Payload bytes already copied into the socket write buffer.
    pub write_cursor: usize,
    /// Header already emitted by a previous partial write.
    pub skip_header: bool,
    pub omit_length: bool,
}

impl OutputPacket {
    pub fn new(msg_type: u8, payload: BytesMut) -> Self {
        Self {
            msg_type,
            payload,
            write_cursor: 0,
            skip_header: false,
            omit_length: false,
        }
    }

    /// A bare single-byte reply with neither length field nor payload,
    /// used for the SSL request accept/reject answer.
    pub fn bare_byte(msg_type: u8) -> Self {
        Self {
            msg_type,
            payload: BytesMut::new(),
            write_cursor: 0,
            skip_header: false,
            omit_length: true,
        }
    }

    /// Payload length in bytes (the wire length field adds 4 for itself).
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Payload bytes not yet copied to the socket buffer.
    pub fn remaining(&self) -> usize {
        self.payload.len() - self.write_cursor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_packet_accretion() {
        let mut pkt = InputPacket::new();
        pkt.msg_type = Some(b'Q');
        pkt.length = 10;
        pkt.header_parsed = true;

        pkt.extend_payload(b"hello");
        assert!(!pkt.fully_read);
        assert_eq!(pkt.remaining(), 5);

        pkt.extend_payload(b"world");
        assert!(pkt.fully_read);
        assert_eq!(pkt.remaining(), 0);
        assert_eq!(&pkt.payload[..], b"helloworld");
    }

    #[test]
    fn test_output_packet_bare_byte() {
        let pkt = OutputPacket::bare_byte(b'N');
        assert!(pkt.omit_length);
        assert_eq!(pkt.len(), 0);
        assert_eq!(pkt.remaining(), 0);
    }

    #[test]
    fn test_output_packet_write_cursor() {
        let mut pkt = OutputPacket::new(b'D', BytesMut::from(&b"abcdef"[..]));
        assert_eq!(pkt.remaining(), 6);
        pkt.write_cursor += 4;
        assert_eq!(pkt.remaining(), 2);
    }
}
