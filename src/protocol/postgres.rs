//! PostgreSQL v3 protocol handler.
//!
//! Interprets framed packets: the startup negotiation (SSL/GSSAPI
//! sentinels, cancel requests, the startup parameter block) and the
//! steady-state simple-query flow. Statements are handed to the traffic
//! cop, which completes them asynchronously; `get_result` materialises the
//! response packets once the connection is woken.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::buffer::ReadBuffer;
use crate::engine::{QueryOutcome, TrafficCop};
use crate::framer::{FrameOutcome, PacketFramer};
use crate::packet::{InputPacket, OutputPacket};
use crate::protocol::backend::{
    BackendMessage, DataValue, ErrorInfo, FieldDescription, TransactionStatus, sql_state,
};
use crate::protocol::frontend::{StartupMessage, StartupParameters};
use crate::protocol::handler::{InitialResult, ProcessResult, ProtocolHandler};

/// Parameter status values sent after a successful startup.
/// psql expects certain parameters to be present.
const SERVER_PARAMETERS: [(&str, &str); 7] = [
    ("server_version", "16.0"),
    ("server_encoding", "UTF8"),
    ("client_encoding", "UTF8"),
    ("DateStyle", "ISO, MDY"),
    ("TimeZone", "UTC"),
    ("integer_datetimes", "on"),
    ("standard_conforming_strings", "on"),
];

/// What a single dispatched packet did.
enum Dispatch {
    /// Responses were queued.
    Responded,
    /// The traffic cop took the request; a wake will follow.
    Deferred,
    /// Close the connection.
    Terminate,
}

/// PostgreSQL v3 implementation of [`ProtocolHandler`].
pub struct PostgresHandler {
    pid: i32,
    cop: Arc<TrafficCop>,
    framer: PacketFramer,
    responses: Vec<OutputPacket>,
    flush: bool,
    parameters: StartupParameters,
}

impl PostgresHandler {
    pub fn new(pid: i32, cop: Arc<TrafficCop>) -> Self {
        Self {
            pid,
            cop,
            framer: PacketFramer::steady_state(),
            responses: Vec::new(),
            flush: false,
            parameters: StartupParameters::default(),
        }
    }

    /// Startup parameters captured during negotiation.
    pub fn parameters(&self) -> &StartupParameters {
        &self.parameters
    }

    fn push(&mut self, message: BackendMessage) {
        self.responses.push(message.into_packet());
    }

    /// Queues ReadyForQuery and requests a flush; every response batch ends
    /// with this.
    fn push_ready(&mut self) {
        self.push(BackendMessage::ReadyForQuery {
            status: TransactionStatus::Idle,
        });
        self.flush = true;
    }

    fn dispatch(&mut self, pkt: InputPacket) -> Dispatch {
        let msg_type = pkt.msg_type.unwrap_or(0);
        match msg_type {
            b'Q' => {
                let mut payload = pkt.payload;
                let query = match crate::protocol::codec::get_cstring(&mut payload) {
                    Ok(query) => query,
                    Err(e) => {
                        warn!(pid = self.pid, error = %e, "malformed query packet");
                        return Dispatch::Terminate;
                    }
                };
                if query.trim().is_empty() {
                    self.push(BackendMessage::EmptyQueryResponse);
                    self.push_ready();
                    return Dispatch::Responded;
                }
                debug!(pid = self.pid, query = %query, "statement handed to traffic cop");
                self.cop.submit(query);
                Dispatch::Deferred
            }
            b'X' => Dispatch::Terminate,
            b'S' => {
                // Sync outside an extended-query sequence just gets a
                // ReadyForQuery
                self.push_ready();
                Dispatch::Responded
            }
            other => {
                debug!(pid = self.pid, msg_type = %(other as char), "unsupported message type");
                self.push(
                    ErrorInfo::new(
                        sql_state::FEATURE_NOT_SUPPORTED,
                        format!("message type '{}' is not supported", other as char),
                    )
                    .into(),
                );
                self.push_ready();
                Dispatch::Responded
            }
        }
    }
}

impl ProtocolHandler for PostgresHandler {
    /// Consumes every complete packet currently buffered. Stops early when a
    /// statement is deferred so responses stay in request order.
    fn process(&mut self, rbuf: &mut ReadBuffer) -> ProcessResult {
        let mut responded = false;
        loop {
            match self.framer.poll_packet(rbuf) {
                FrameOutcome::NeedMore => {
                    return if responded {
                        ProcessResult::Complete
                    } else {
                        ProcessResult::MoreDataRequired
                    };
                }
                FrameOutcome::Malformed => {
                    warn!(pid = self.pid, "malformed packet length");
                    return ProcessResult::Terminate;
                }
                FrameOutcome::Complete(pkt) => match self.dispatch(pkt) {
                    Dispatch::Responded => responded = true,
                    Dispatch::Deferred => return ProcessResult::Processing,
                    Dispatch::Terminate => return ProcessResult::Terminate,
                },
            }
        }
    }

    fn process_initial_packet(&mut self, packet: InputPacket, ssl_capable: bool) -> InitialResult {
        match StartupMessage::parse(packet.payload) {
            Ok(StartupMessage::SslRequest) => {
                let reply = if ssl_capable { b'S' } else { b'N' };
                self.responses.push(OutputPacket::bare_byte(reply));
                self.flush = true;
                InitialResult::SslResponse {
                    accepted: ssl_capable,
                }
            }
            Ok(StartupMessage::GssEncRequest) => {
                // GSSAPI encryption is never offered
                self.responses.push(OutputPacket::bare_byte(b'N'));
                self.flush = true;
                InitialResult::SslResponse { accepted: false }
            }
            Ok(StartupMessage::CancelRequest { process_id, .. }) => {
                debug!(pid = self.pid, target_pid = process_id, "cancel request");
                InitialResult::Terminate
            }
            Ok(StartupMessage::Startup {
                protocol_version,
                parameters,
            }) => {
                debug!(
                    pid = self.pid,
                    version = protocol_version,
                    user = %parameters.user,
                    database = ?parameters.database,
                    "startup accepted"
                );
                self.parameters = parameters;

                let secret_key = rand::random::<i32>();
                self.push(BackendMessage::AuthenticationOk);
                self.push(BackendMessage::BackendKeyData {
                    process_id: self.pid,
                    secret_key,
                });
                for (name, value) in SERVER_PARAMETERS {
                    self.push(BackendMessage::ParameterStatus {
                        name: name.to_string(),
                        value: value.to_string(),
                    });
                }
                self.push_ready();
                InitialResult::Complete
            }
            Err(e) => {
                warn!(pid = self.pid, error = %e, "startup packet rejected");
                InitialResult::Terminate
            }
        }
    }

    fn responses_mut(&mut self) -> &mut Vec<OutputPacket> {
        &mut self.responses
    }

    fn flush_flag(&self) -> bool {
        self.flush
    }

    fn set_flush_flag(&mut self, on: bool) {
        self.flush = on;
    }

    fn get_result(&mut self) {
        match self.cop.take_outcome() {
            Some(QueryOutcome::Complete { tag }) => {
                self.push(BackendMessage::CommandComplete { tag });
            }
            Some(QueryOutcome::Rows { columns, rows, tag }) => {
                self.push(BackendMessage::RowDescription {
                    fields: columns.into_iter().map(FieldDescription::text).collect(),
                });
                for row in rows {
                    self.push(BackendMessage::DataRow {
                        values: row
                            .into_iter()
                            .map(|v| v.map(DataValue::text).unwrap_or(DataValue::Null))
                            .collect(),
                    });
                }
                self.push(BackendMessage::CommandComplete { tag });
            }
            Some(QueryOutcome::Error { code, message }) => {
                self.push(ErrorInfo::new(code, message).into());
            }
            None => {
                // woken without an outcome; report rather than hang the client
                warn!(pid = self.pid, "wake without a query outcome");
                self.push(
                    ErrorInfo::new(sql_state::INTERNAL_ERROR, "query produced no result").into(),
                );
            }
        }
        self.push_ready();
    }

    fn reset(&mut self) {
        self.responses.clear();
        self.flush = false;
        self.framer.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{NullQueryEngine, QueryEngine};
    use bytes::BytesMut;

    fn handler() -> PostgresHandler {
        PostgresHandler::new(7, TrafficCop::new(Arc::new(NullQueryEngine)))
    }

    fn startup_packet(payload: &[u8]) -> InputPacket {
        let mut pkt = InputPacket::new();
        pkt.length = payload.len();
        pkt.header_parsed = true;
        pkt.payload = BytesMut::from(payload);
        pkt.fully_read = true;
        pkt
    }

    fn startup_body(user: &str) -> Vec<u8> {
        let mut body = (3i32 << 16).to_be_bytes().to_vec();
        body.extend_from_slice(b"user\0");
        body.extend_from_slice(user.as_bytes());
        body.push(0);
        body.push(0);
        body
    }

    #[test]
    fn test_startup_queues_auth_ok_through_ready() {
        let mut h = handler();
        let result = h.process_initial_packet(startup_packet(&startup_body("postgres")), false);
        assert_eq!(result, InitialResult::Complete);
        assert_eq!(h.parameters().user, "postgres");

        let types: Vec<u8> = h.responses_mut().iter().map(|p| p.msg_type).collect();
        assert_eq!(types.first(), Some(&b'R'));
        assert_eq!(types.get(1), Some(&b'K'));
        assert_eq!(types.last(), Some(&b'Z'));
        assert!(h.flush_flag());
    }

    #[test]
    fn test_ssl_request_rejected_without_tls() {
        let mut h = handler();
        let payload = super::super::frontend::SSL_REQUEST_CODE.to_be_bytes();
        let result = h.process_initial_packet(startup_packet(&payload), false);
        assert_eq!(result, InitialResult::SslResponse { accepted: false });

        let reply = &h.responses_mut()[0];
        assert_eq!(reply.msg_type, b'N');
        assert!(reply.omit_length);
    }

    #[test]
    fn test_ssl_request_accepted_with_tls() {
        let mut h = handler();
        let payload = super::super::frontend::SSL_REQUEST_CODE.to_be_bytes();
        let result = h.process_initial_packet(startup_packet(&payload), true);
        assert_eq!(result, InitialResult::SslResponse { accepted: true });
        assert_eq!(h.responses_mut()[0].msg_type, b'S');
    }

    #[test]
    fn test_cancel_request_terminates() {
        let mut h = handler();
        let mut payload = super::super::frontend::CANCEL_REQUEST_CODE.to_be_bytes().to_vec();
        payload.extend_from_slice(&1i32.to_be_bytes());
        payload.extend_from_slice(&2i32.to_be_bytes());
        assert_eq!(
            h.process_initial_packet(startup_packet(&payload), false),
            InitialResult::Terminate
        );
    }

    fn steady_bytes(msg_type: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![msg_type];
        out.extend_from_slice(&((payload.len() + 4) as u32).to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[tokio::test]
    async fn test_empty_query_gets_empty_response() {
        let mut h = handler();
        let mut rbuf = ReadBuffer::new();
        rbuf.push_bytes(&steady_bytes(b'Q', b"\0"));

        assert_eq!(h.process(&mut rbuf), ProcessResult::Complete);
        let types: Vec<u8> = h.responses_mut().iter().map(|p| p.msg_type).collect();
        assert_eq!(types, vec![b'I', b'Z']);
    }

    #[tokio::test]
    async fn test_query_is_deferred_to_the_cop() {
        let mut h = handler();
        let mut rbuf = ReadBuffer::new();
        rbuf.push_bytes(&steady_bytes(b'Q', b"SELECT 1\0"));

        assert_eq!(h.process(&mut rbuf), ProcessResult::Processing);
        assert!(h.cop.is_queuing());
        assert!(h.responses_mut().is_empty());
    }

    #[test]
    fn test_terminate_message() {
        let mut h = handler();
        let mut rbuf = ReadBuffer::new();
        rbuf.push_bytes(&steady_bytes(b'X', b""));
        assert_eq!(h.process(&mut rbuf), ProcessResult::Terminate);
    }

    #[test]
    fn test_unsupported_message_gets_error_and_ready() {
        let mut h = handler();
        let mut rbuf = ReadBuffer::new();
        rbuf.push_bytes(&steady_bytes(b'P', b"\0SELECT 1\0\0\0"));

        assert_eq!(h.process(&mut rbuf), ProcessResult::Complete);
        let types: Vec<u8> = h.responses_mut().iter().map(|p| p.msg_type).collect();
        assert_eq!(types, vec![b'E', b'Z']);
    }

    #[test]
    fn test_partial_packet_requests_more_data() {
        let mut h = handler();
        let mut rbuf = ReadBuffer::new();
        // header promises 10 payload bytes, only 3 arrive
        rbuf.push_bytes(&[b'Q']);
        rbuf.push_bytes(&14u32.to_be_bytes());
        rbuf.push_bytes(b"SEL");
        assert_eq!(h.process(&mut rbuf), ProcessResult::MoreDataRequired);
    }

    #[test]
    fn test_get_result_error_outcome() {
        let mut h = handler();
        // NullQueryEngine outcome, stored synchronously for the test
        *h.cop.outcome_slot_for_tests() = Some(NullQueryEngine.execute("SELECT 1"));
        h.get_result();
        let types: Vec<u8> = h.responses_mut().iter().map(|p| p.msg_type).collect();
        assert_eq!(types, vec![b'E', b'Z']);
        assert!(h.flush_flag());
    }

    #[test]
    fn test_get_result_rows_outcome() {
        let mut h = handler();
        *h.cop.outcome_slot_for_tests() = Some(QueryOutcome::Rows {
            columns: vec!["a".into(), "b".into()],
            rows: vec![vec![Some("1".into()), None]],
            tag: "SELECT 1".into(),
        });
        h.get_result();
        let types: Vec<u8> = h.responses_mut().iter().map(|p| p.msg_type).collect();
        assert_eq!(types, vec![b'T', b'D', b'C', b'Z']);
    }

    #[test]
    fn test_reset_clears_queue_and_flush() {
        let mut h = handler();
        h.push(BackendMessage::EmptyQueryResponse);
        h.push_ready();
        h.reset();
        assert!(h.responses_mut().is_empty());
        assert!(!h.flush_flag());
    }
}
