use bytes::{BufMut, BytesMut};

use crate::packet::OutputPacket;
use crate::protocol::codec::put_cstring;
use crate::protocol::types::{ErrorFieldCode, FormatCode, type_oid};

/// SQL State codes for error responses.
///
/// References:
/// - <https://www.postgresql.org/docs/current/errcodes-appendix.html>
pub mod sql_state {
    // Class 08 - Connection Exception
    /// Connection exception (generic)
    pub const CONNECTION_EXCEPTION: &str = "08000";

    // Class 0A - Feature Not Supported
    /// Feature not supported
    pub const FEATURE_NOT_SUPPORTED: &str = "0A000";

    // Class 42 - Syntax Error or Access Rule Violation
    /// Syntax error
    pub const SYNTAX_ERROR: &str = "42601";

    // Class XX - Internal Error
    /// Internal error
    pub const INTERNAL_ERROR: &str = "XX000";
}

/// Messages sent by the backend (server) to the client.
#[derive(Debug)]
pub enum BackendMessage {
    /// 'R' - Authentication response (AuthenticationOk)
    AuthenticationOk,
    /// 'K' - Backend key data for cancel requests
    BackendKeyData { process_id: i32, secret_key: i32 },
    /// 'S' - Parameter status notification
    ParameterStatus { name: String, value: String },
    /// 'Z' - Ready for query
    ReadyForQuery { status: TransactionStatus },
    /// 'E' - Error response
    ErrorResponse { fields: Vec<ErrorField> },
    /// 'T' - Row description (column metadata)
    RowDescription { fields: Vec<FieldDescription> },
    /// 'D' - Data row
    DataRow { values: Vec<DataValue> },
    /// 'C' - Command complete
    CommandComplete { tag: String },
    /// 'I' - Empty query response
    EmptyQueryResponse,
}

impl BackendMessage {
    /// Returns the message type byte.
    fn ty(&self) -> u8 {
        match self {
            BackendMessage::AuthenticationOk => b'R',
            BackendMessage::BackendKeyData { .. } => b'K',
            BackendMessage::ParameterStatus { .. } => b'S',
            BackendMessage::ReadyForQuery { .. } => b'Z',
            BackendMessage::ErrorResponse { .. } => b'E',
            BackendMessage::RowDescription { .. } => b'T',
            BackendMessage::DataRow { .. } => b'D',
            BackendMessage::CommandComplete { .. } => b'C',
            BackendMessage::EmptyQueryResponse => b'I',
        }
    }

    /// Serializes this message into an [`OutputPacket`] ready for the
    /// response queue. The connection engine emits the type byte and length
    /// field; only the body is encoded here.
    pub fn into_packet(self) -> OutputPacket {
        let mut payload = BytesMut::new();
        self.encode_body(&mut payload);
        OutputPacket::new(self.ty(), payload)
    }

    /// Encodes the body of this message into the given BytesMut buffer.
    fn encode_body(&self, dst: &mut BytesMut) {
        match self {
            BackendMessage::AuthenticationOk => {
                dst.put_i32(0); // auth type 0 = Ok
            }
            BackendMessage::BackendKeyData {
                process_id,
                secret_key,
            } => {
                dst.put_i32(*process_id);
                dst.put_i32(*secret_key);
            }
            BackendMessage::ParameterStatus { name, value } => {
                put_cstring(dst, name);
                put_cstring(dst, value);
            }
            BackendMessage::ReadyForQuery { status } => {
                dst.put_u8(status.as_byte());
            }
            BackendMessage::ErrorResponse { fields } => {
                for field in fields {
                    field.encode(dst);
                }
                dst.put_u8(0); // terminator
            }
            BackendMessage::RowDescription { fields } => {
                dst.put_i16(fields.len() as i16);
                for field in fields {
                    field.encode(dst);
                }
            }
            BackendMessage::DataRow { values } => {
                dst.put_i16(values.len() as i16);
                for value in values {
                    value.encode(dst);
                }
            }
            BackendMessage::CommandComplete { tag } => {
                put_cstring(dst, tag);
            }
            BackendMessage::EmptyQueryResponse => {
                // No body
            }
        }
    }
}

/// Transaction status indicator for ReadyForQuery message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// 'I' - Idle (not in a transaction block)
    Idle,
    /// 'T' - In a transaction block
    InTransaction,
    /// 'E' - In a failed transaction block
    Failed,
}

impl TransactionStatus {
    fn as_byte(self) -> u8 {
        match self {
            TransactionStatus::Idle => b'I',
            TransactionStatus::InTransaction => b'T',
            TransactionStatus::Failed => b'E',
        }
    }
}

/// Error/Notice field.
#[derive(Debug)]
pub struct ErrorField {
    pub code: ErrorFieldCode,
    pub value: String,
}

impl ErrorField {
    /// Creates a new error field.
    pub fn new(code: ErrorFieldCode, value: impl Into<String>) -> Self {
        Self {
            code,
            value: value.into(),
        }
    }

    /// Encodes this error field into the given BytesMut buffer.
    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(self.code.as_u8());
        put_cstring(dst, &self.value);
    }
}

/// Structured error information for PostgreSQL error responses.
///
/// PostgreSQL error responses have required fields (severity, SQL state,
/// message) and optional fields (position, detail, hint, etc.). This struct
/// provides a builder-style API for constructing well-formed error responses.
#[derive(Debug, Clone)]
pub struct ErrorInfo {
    /// Severity level (ERROR, FATAL, PANIC, WARNING, NOTICE, DEBUG, INFO, LOG)
    pub severity: &'static str,
    /// SQLSTATE code (e.g., "0A000" for feature not supported)
    pub code: &'static str,
    /// Primary human-readable error message
    pub message: String,
}

impl ErrorInfo {
    /// Creates a new error with the required fields.
    ///
    /// Severity defaults to "ERROR".
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: "ERROR",
            code,
            message: message.into(),
        }
    }

    /// Sets the severity level.
    ///
    /// Common values: "ERROR", "FATAL", "PANIC", "WARNING", "NOTICE"
    pub fn with_severity(mut self, severity: &'static str) -> Self {
        self.severity = severity;
        self
    }
}

impl From<ErrorInfo> for BackendMessage {
    fn from(info: ErrorInfo) -> Self {
        let fields = vec![
            ErrorField::new(ErrorFieldCode::Severity, info.severity),
            ErrorField::new(ErrorFieldCode::SeverityNonLocalized, info.severity),
            ErrorField::new(ErrorFieldCode::SqlState, info.code),
            ErrorField::new(ErrorFieldCode::Message, info.message),
        ];

        BackendMessage::ErrorResponse { fields }
    }
}

/// Column metadata in a RowDescription message.
#[derive(Debug, Clone)]
pub struct FieldDescription {
    pub name: String,
    pub type_oid: i32,
}

impl FieldDescription {
    /// A text-typed column.
    pub fn text(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_oid: type_oid::TEXT,
        }
    }

    fn encode(&self, dst: &mut BytesMut) {
        put_cstring(dst, &self.name);
        dst.put_i32(0); // table OID (not a table column)
        dst.put_i16(0); // column attribute number
        dst.put_i32(self.type_oid);
        dst.put_i16(-1); // type size (variable)
        dst.put_i32(-1); // type modifier
        dst.put_i16(FormatCode::Text.as_i16());
    }
}

/// A single column value in a data row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataValue {
    /// SQL NULL value (encoded as length -1)
    Null,
    /// Non-NULL value (encoded as length + data bytes)
    Data(Vec<u8>),
}

impl DataValue {
    /// A text value.
    pub fn text(value: impl Into<String>) -> Self {
        DataValue::Data(value.into().into_bytes())
    }

    fn encode(&self, dst: &mut BytesMut) {
        match self {
            DataValue::Null => dst.put_i32(-1),
            DataValue::Data(bytes) => {
                dst.put_i32(bytes.len() as i32);
                dst.put_slice(bytes);
            }
        }
    }
}
