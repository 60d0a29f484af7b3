use std::collections::HashMap;

use bytes::{Buf, BytesMut};

use crate::protocol::ProtocolError;
use crate::protocol::codec::get_cstring;

/// SSLRequest magic number
pub const SSL_REQUEST_CODE: i32 = (1234 << 16) | 5679; // 80877103

/// GSSENCRequest magic number
pub const GSSENC_REQUEST_CODE: i32 = (1234 << 16) | 5680; // 80877104

/// CancelRequest magic number
pub const CANCEL_REQUEST_CODE: i32 = (1234 << 16) | 5678; // 80877102

/// Messages sent by the frontend (client) during startup phase.
#[derive(Debug)]
pub enum StartupMessage {
    /// SSLRequest - client wants to negotiate SSL
    SslRequest,
    /// GSSENCRequest - client wants GSSAPI encryption
    GssEncRequest,
    /// CancelRequest - client wants to cancel a query
    CancelRequest { process_id: i32, secret_key: i32 },
    /// StartupMessage - normal connection startup
    Startup {
        protocol_version: i32,
        parameters: StartupParameters,
    },
}

/// Startup parameters from the client
#[derive(Debug, Clone, Default)]
pub struct StartupParameters {
    pub user: String,
    pub database: Option<String>,
    pub application_name: Option<String>,
    pub client_encoding: Option<String>,
    pub other: HashMap<String, String>,
}

impl StartupMessage {
    /// Parse a startup-phase message from its payload (the framer has
    /// already stripped the length field).
    pub fn parse(mut payload: BytesMut) -> Result<Self, ProtocolError> {
        // Minimum payload is the 4-byte version/code field
        if payload.len() < 4 {
            return Err(ProtocolError::InvalidMessage);
        }

        let code = payload.get_i32();
        let remaining = payload.len();

        match code {
            SSL_REQUEST_CODE if remaining == 0 => Ok(StartupMessage::SslRequest),
            GSSENC_REQUEST_CODE if remaining == 0 => Ok(StartupMessage::GssEncRequest),
            CANCEL_REQUEST_CODE if remaining == 8 => {
                let process_id = payload.get_i32();
                let secret_key = payload.get_i32();
                Ok(StartupMessage::CancelRequest {
                    process_id,
                    secret_key,
                })
            }
            SSL_REQUEST_CODE | GSSENC_REQUEST_CODE | CANCEL_REQUEST_CODE => {
                Err(ProtocolError::InvalidMessage)
            }
            version if (version >> 16) == 3 => {
                let parameters = Self::parse_startup_parameters(payload)?;
                Ok(StartupMessage::Startup {
                    protocol_version: version,
                    parameters,
                })
            }
            _ => Err(ProtocolError::UnsupportedProtocolVersion(code)),
        }
    }

    fn parse_startup_parameters(mut payload: BytesMut) -> Result<StartupParameters, ProtocolError> {
        let mut params = StartupParameters::default();

        loop {
            if payload.is_empty() {
                break;
            }

            let name = get_cstring(&mut payload)?;

            // Empty name signals end of parameters
            if name.is_empty() {
                break;
            }

            let value = get_cstring(&mut payload)?;

            match name.as_str() {
                "user" => params.user = value,
                "database" => params.database = Some(value),
                "application_name" => params.application_name = Some(value),
                "client_encoding" => params.client_encoding = Some(value),
                _ => {
                    params.other.insert(name, value);
                }
            }
        }

        if params.user.is_empty() {
            return Err(ProtocolError::MissingParameter("user"));
        }

        Ok(params)
    }
}
