//! PostgreSQL wire protocol handling.
//!
//! This module defines the capability set the connection engine expects
//! from a wire dialect ([`ProtocolHandler`]) and implements it for the
//! PostgreSQL v3.0 protocol. The engine itself never interprets packet
//! contents; it frames bytes and drains response queues, so a second wire
//! dialect is a second `ProtocolHandler` implementation, not an engine
//! change.
//!
//! ```text
//! +----------+                            +------------------+
//! |  Client  |  --- startup / Query -->   | PostgresHandler  |
//! |  (psql)  |  <-- BackendMessage  ---   | (via TrafficCop) |
//! +----------+                            +------------------+
//! ```
//!
//! ## Terminology
//!
//! - **StartupMessage**: the first, type-less packet (SSL request, GSS
//!   request, cancel request, or the startup parameter block)
//! - **BackendMessage**: messages from server to client (RowDescription,
//!   DataRow, ReadyForQuery, etc.)
//! - **ProcessResult**: what the handler tells the state machine after a
//!   pass over the read buffer

pub mod backend;
pub mod codec;
pub mod error;
pub mod frontend;
pub mod handler;
pub mod postgres;
pub mod types;

pub use backend::{
    BackendMessage, DataValue, ErrorField, ErrorInfo, FieldDescription, TransactionStatus,
    sql_state,
};
pub use error::ProtocolError;
pub use frontend::{StartupMessage, StartupParameters};
pub use handler::{InitialResult, ProcessResult, ProtocolHandler};
pub use postgres::PostgresHandler;
pub use types::{ErrorFieldCode, FormatCode, type_oid};
