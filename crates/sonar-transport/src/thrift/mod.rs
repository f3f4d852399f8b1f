//! Thrift transport.
//!
//! Binary protocol over TCP, buffered or framed:
//!
//! ```thrift
//! struct PingReply { 1: string Value, 2: string Err }
//! service Probe { PingReply Ping() }
//! ```
//!
//! The reply travels in field 0 of the `Ping_result` struct. A domain
//! failure is carried in `Err`, where the empty string means none; any
//! other endpoint error becomes an application exception. The binary
//! protocol has no headers, so no trace context is propagated.

pub mod client;
pub mod protocol;
pub mod server;

use bytes::Bytes;
use sonar_core::{PingResponse, SonarError, PING_METHOD};
use tokio::io::AsyncRead;

use protocol::{ttype, BinaryReader, MessageType, MessageWriter, ProtocolResult};

pub use client::ThriftClient;
pub use server::ThriftServer;

/// How messages are delimited on the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportMode {
    /// Messages follow each other on the stream.
    #[default]
    Buffered,
    /// Each message is prefixed with its length.
    Framed,
}

impl TransportMode {
    /// Picks the mode from a `framed` flag.
    #[must_use]
    pub const fn from_framed(framed: bool) -> Self {
        if framed {
            Self::Framed
        } else {
            Self::Buffered
        }
    }
}

/// `TApplicationException` types.
pub mod exception {
    /// Unclassified failure.
    pub const UNKNOWN: i32 = 0;
    /// The server has no such method.
    pub const UNKNOWN_METHOD: i32 = 1;
    /// A message of a type the receiver does not accept.
    pub const INVALID_MESSAGE_TYPE: i32 = 2;
    /// The reply names another method.
    pub const WRONG_METHOD_NAME: i32 = 3;
    /// The reply answers another call.
    pub const BAD_SEQUENCE_ID: i32 = 4;
    /// The reply holds no result.
    pub const MISSING_RESULT: i32 = 5;
    /// The handler failed.
    pub const INTERNAL_ERROR: i32 = 6;
    /// The message could not be decoded.
    pub const PROTOCOL_ERROR: i32 = 7;
}

/// A `TApplicationException`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationException {
    /// One of the [`exception`] types.
    pub kind: i32,
    /// Human-readable message.
    pub message: String,
}

impl ApplicationException {
    /// Creates an exception.
    pub fn new(kind: i32, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Maps an endpoint error to the exception sent to the caller.
    #[must_use]
    pub fn internal(err: &SonarError) -> Self {
        Self::new(exception::INTERNAL_ERROR, err.to_string())
    }
}

impl From<ApplicationException> for SonarError {
    fn from(exception: ApplicationException) -> Self {
        let code = u16::try_from(exception.kind).unwrap_or_default();
        Self::status(code, exception.message)
    }
}

/// Wire form of the ping reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PingReply {
    /// Payload; empty on failure.
    pub value: String,
    /// Domain error string; empty when none.
    pub err: String,
}

/// Encodes a ping response into its wire reply.
#[must_use]
pub fn encode_response(response: &PingResponse) -> PingReply {
    PingReply {
        value: response.payload().to_string(),
        err: response.err_string(),
    }
}

/// Decodes a wire reply into a ping response.
#[must_use]
pub fn decode_response(reply: PingReply) -> PingResponse {
    PingResponse::from_wire(reply.value, &reply.err)
}

/// Encodes a `Ping` call with its empty argument struct.
#[must_use]
pub fn encode_call(seq_id: i32) -> Bytes {
    let mut writer = MessageWriter::begin(PING_METHOD, MessageType::Call, seq_id);
    writer.write_field_stop();
    writer.finish()
}

/// Encodes a successful `Ping` reply.
#[must_use]
pub fn encode_reply(seq_id: i32, reply: &PingReply) -> Bytes {
    let mut writer = MessageWriter::begin(PING_METHOD, MessageType::Reply, seq_id);
    writer.write_field_begin(ttype::STRUCT, 0);
    writer.write_field_begin(ttype::STRING, 1);
    writer.write_string(&reply.value);
    writer.write_field_begin(ttype::STRING, 2);
    writer.write_string(&reply.err);
    writer.write_field_stop();
    writer.write_field_stop();
    writer.finish()
}

/// Encodes an exception reply to the call `name`/`seq_id`.
#[must_use]
pub fn encode_exception(name: &str, seq_id: i32, exception: &ApplicationException) -> Bytes {
    let mut writer = MessageWriter::begin(name, MessageType::Exception, seq_id);
    writer.write_field_begin(ttype::STRING, 1);
    writer.write_string(&exception.message);
    writer.write_field_begin(ttype::I32, 2);
    writer.write_i32(exception.kind);
    writer.write_field_stop();
    writer.finish()
}

/// Reads the body of a `Ping` reply. `None` means field 0 was absent.
pub async fn read_ping_result<R>(reader: &mut BinaryReader<R>) -> ProtocolResult<Option<PingReply>>
where
    R: AsyncRead + Unpin + Send,
{
    let mut result = None;
    while let Some((field_type, id)) = reader.read_field_begin().await? {
        if id == 0 && field_type == ttype::STRUCT {
            result = Some(read_ping_reply(reader).await?);
        } else {
            reader.skip(field_type).await?;
        }
    }
    Ok(result)
}

async fn read_ping_reply<R>(reader: &mut BinaryReader<R>) -> ProtocolResult<PingReply>
where
    R: AsyncRead + Unpin + Send,
{
    let mut reply = PingReply::default();
    while let Some((field_type, id)) = reader.read_field_begin().await? {
        match (id, field_type) {
            (1, ttype::STRING) => reply.value = reader.read_string().await?,
            (2, ttype::STRING) => reply.err = reader.read_string().await?,
            _ => reader.skip(field_type).await?,
        }
    }
    Ok(reply)
}

/// Reads the body of an exception reply.
pub async fn read_exception<R>(reader: &mut BinaryReader<R>) -> ProtocolResult<ApplicationException>
where
    R: AsyncRead + Unpin + Send,
{
    let mut received = ApplicationException::new(exception::UNKNOWN, String::new());
    while let Some((field_type, id)) = reader.read_field_begin().await? {
        match (id, field_type) {
            (1, ttype::STRING) => received.message = reader.read_string().await?,
            (2, ttype::I32) => received.kind = reader.read_i32().await?,
            _ => reader.skip(field_type).await?,
        }
    }
    Ok(received)
}
