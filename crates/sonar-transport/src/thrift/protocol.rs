//! Thrift binary protocol.
//!
//! Only what the probe service needs: message headers (strict on write,
//! strict or legacy on read), struct fields, strings and i32, plus
//! skipping of any other value. Framed transport prefixes each message
//! with its big-endian length.

use std::io::Cursor;

use bytes::{BufMut, Bytes, BytesMut};
use sonar_core::{BoxFuture, SonarError};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream};

use super::TransportMode;

/// Version word of a strict binary message header.
const VERSION_1: u32 = 0x8001_0000;
const VERSION_MASK: u32 = 0xffff_0000;

/// Largest string, container or frame accepted from the wire.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Deepest struct nesting [`BinaryReader::skip`] follows.
const MAX_SKIP_DEPTH: usize = 64;

/// Buffer capacity used when none is configured.
pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

/// Wire type tags.
#[allow(missing_docs)]
pub mod ttype {
    pub const STOP: u8 = 0;
    pub const BOOL: u8 = 2;
    pub const BYTE: u8 = 3;
    pub const DOUBLE: u8 = 4;
    pub const I16: u8 = 6;
    pub const I32: u8 = 8;
    pub const I64: u8 = 10;
    pub const STRING: u8 = 11;
    pub const STRUCT: u8 = 12;
    pub const MAP: u8 = 13;
    pub const SET: u8 = 14;
    pub const LIST: u8 = 15;
}

/// Errors raised while reading or writing the binary protocol.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Socket failure, including the peer closing the connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The message header carries an unsupported version.
    #[error("bad protocol version {0:#010x}")]
    BadVersion(u32),

    /// Unknown message type in the header.
    #[error("invalid message type {0}")]
    InvalidMessageType(u8),

    /// A negative length on the wire.
    #[error("negative size {0}")]
    NegativeSize(i32),

    /// A length above [`MAX_MESSAGE_SIZE`].
    #[error("size {0} exceeds limit")]
    SizeLimit(usize),

    /// A string that is not UTF-8.
    #[error("invalid UTF-8 in string")]
    InvalidUtf8,

    /// A value of an unknown type tag.
    #[error("unknown type {0}")]
    UnknownType(u8),

    /// Nested structs deeper than the skip limit.
    #[error("nesting too deep")]
    DepthLimit,
}

impl ProtocolError {
    /// Returns `true` when the peer closed the connection between messages.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}

impl From<ProtocolError> for SonarError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Io(e) => Self::transport(e.to_string()),
            other => Self::decode(other.to_string()),
        }
    }
}

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Message type carried in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// A request expecting a reply.
    Call = 1,
    /// A successful reply.
    Reply = 2,
    /// An application exception in place of a reply.
    Exception = 3,
    /// A request without a reply.
    Oneway = 4,
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Call),
            2 => Ok(Self::Reply),
            3 => Ok(Self::Exception),
            4 => Ok(Self::Oneway),
            other => Err(ProtocolError::InvalidMessageType(other)),
        }
    }
}

/// A decoded message header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    /// Method name.
    pub name: String,
    /// Message type.
    pub kind: MessageType,
    /// Sequence id echoed by the reply.
    pub seq_id: i32,
}

/// Encodes one message into memory.
#[derive(Debug, Default)]
pub struct MessageWriter {
    buf: BytesMut,
}

impl MessageWriter {
    /// Starts a message with a strict header.
    #[must_use]
    pub fn begin(name: &str, kind: MessageType, seq_id: i32) -> Self {
        let mut writer = Self {
            buf: BytesMut::with_capacity(64),
        };
        writer.buf.put_u32(VERSION_1 | kind as u32);
        writer.write_string(name);
        writer.buf.put_i32(seq_id);
        writer
    }

    /// Writes a field header.
    pub fn write_field_begin(&mut self, ttype: u8, id: i16) {
        self.buf.put_u8(ttype);
        self.buf.put_i16(id);
    }

    /// Ends the current struct.
    pub fn write_field_stop(&mut self) {
        self.buf.put_u8(ttype::STOP);
    }

    /// Writes a length-prefixed UTF-8 string.
    pub fn write_string(&mut self, value: &str) {
        // strings above 2 GiB never reach here; the reader caps at 16 MiB
        self.buf.put_i32(value.len() as i32);
        self.buf.put_slice(value.as_bytes());
    }

    /// Writes a big-endian i32.
    pub fn write_i32(&mut self, value: i32) {
        self.buf.put_i32(value);
    }

    /// Finishes the message.
    #[must_use]
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Reads binary protocol values from an async source.
#[derive(Debug)]
pub struct BinaryReader<R> {
    inner: R,
}

impl<R> BinaryReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// Wraps a source.
    pub const fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Reads a message header, strict or legacy.
    pub async fn read_message_begin(&mut self) -> ProtocolResult<MessageHeader> {
        let first = self.inner.read_i32().await?;

        if first < 0 {
            let word = first as u32;
            if word & VERSION_MASK != VERSION_1 {
                return Err(ProtocolError::BadVersion(word));
            }
            let kind = MessageType::try_from((word & 0xff) as u8)?;
            let name = self.read_string().await?;
            let seq_id = self.inner.read_i32().await?;
            Ok(MessageHeader { name, kind, seq_id })
        } else {
            // legacy header: the first word is the name length
            let name = self.read_string_body(first).await?;
            let kind = MessageType::try_from(self.inner.read_u8().await?)?;
            let seq_id = self.inner.read_i32().await?;
            Ok(MessageHeader { name, kind, seq_id })
        }
    }

    /// Reads a field header; `None` marks the end of the struct.
    pub async fn read_field_begin(&mut self) -> ProtocolResult<Option<(u8, i16)>> {
        let ttype = self.inner.read_u8().await?;
        if ttype == ttype::STOP {
            return Ok(None);
        }
        let id = self.inner.read_i16().await?;
        Ok(Some((ttype, id)))
    }

    /// Reads a length-prefixed UTF-8 string.
    pub async fn read_string(&mut self) -> ProtocolResult<String> {
        let len = self.inner.read_i32().await?;
        self.read_string_body(len).await
    }

    /// Reads a big-endian i32.
    pub async fn read_i32(&mut self) -> ProtocolResult<i32> {
        Ok(self.inner.read_i32().await?)
    }

    async fn read_string_body(&mut self, len: i32) -> ProtocolResult<String> {
        let len = checked_size(len)?;
        let mut bytes = vec![0; len];
        self.inner.read_exact(&mut bytes).await?;
        String::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8)
    }

    /// Skips a whole struct, up to and including its stop byte.
    pub async fn skip_struct(&mut self) -> ProtocolResult<()> {
        self.skip(ttype::STRUCT).await
    }

    /// Skips one value of type `ttype`.
    pub fn skip(&mut self, ttype: u8) -> BoxFuture<'_, ProtocolResult<()>> {
        self.skip_nested(ttype, 0)
    }

    fn skip_nested(&mut self, ttype: u8, depth: usize) -> BoxFuture<'_, ProtocolResult<()>> {
        Box::pin(async move {
            if depth > MAX_SKIP_DEPTH {
                return Err(ProtocolError::DepthLimit);
            }
            match ttype {
                ttype::BOOL | ttype::BYTE => self.discard(1).await,
                ttype::I16 => self.discard(2).await,
                ttype::I32 => self.discard(4).await,
                ttype::DOUBLE | ttype::I64 => self.discard(8).await,
                ttype::STRING => {
                    let len = checked_size(self.inner.read_i32().await?)?;
                    self.discard(len).await
                }
                ttype::STRUCT => {
                    while let Some((field_type, _)) = self.read_field_begin().await? {
                        self.skip_nested(field_type, depth + 1).await?;
                    }
                    Ok(())
                }
                ttype::MAP => {
                    let key = self.inner.read_u8().await?;
                    let value = self.inner.read_u8().await?;
                    let len = checked_size(self.inner.read_i32().await?)?;
                    for _ in 0..len {
                        self.skip_nested(key, depth + 1).await?;
                        self.skip_nested(value, depth + 1).await?;
                    }
                    Ok(())
                }
                ttype::SET | ttype::LIST => {
                    let element = self.inner.read_u8().await?;
                    let len = checked_size(self.inner.read_i32().await?)?;
                    for _ in 0..len {
                        self.skip_nested(element, depth + 1).await?;
                    }
                    Ok(())
                }
                other => Err(ProtocolError::UnknownType(other)),
            }
        })
    }

    async fn discard(&mut self, len: usize) -> ProtocolResult<()> {
        let len = len as u64;
        let mut limited = (&mut self.inner).take(len);
        let copied = tokio::io::copy(&mut limited, &mut tokio::io::sink()).await?;
        if copied < len {
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
        }
        Ok(())
    }
}

fn checked_size(len: i32) -> ProtocolResult<usize> {
    let len = usize::try_from(len).map_err(|_| ProtocolError::NegativeSize(len))?;
    if len > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::SizeLimit(len));
    }
    Ok(len)
}

/// Source handed out by [`MessageStream::reader`].
pub type MessageSource<'a> = &'a mut (dyn AsyncRead + Unpin + Send);

/// A connection speaking the binary protocol over a buffered or framed
/// transport.
#[derive(Debug)]
pub struct MessageStream<S> {
    io: BufStream<S>,
    mode: TransportMode,
    frame: Cursor<Vec<u8>>,
}

impl<S> MessageStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wraps `io`. A `buffer_size` of zero reads and writes unbuffered.
    pub fn new(io: S, mode: TransportMode, buffer_size: usize) -> Self {
        Self {
            io: BufStream::with_capacity(buffer_size, buffer_size, io),
            mode,
            frame: Cursor::new(Vec::new()),
        }
    }

    /// Returns a reader positioned at the next message.
    ///
    /// In framed mode the whole frame is read first.
    pub async fn reader(&mut self) -> ProtocolResult<BinaryReader<MessageSource<'_>>> {
        match self.mode {
            TransportMode::Buffered => {
                let source: MessageSource<'_> = &mut self.io;
                Ok(BinaryReader::new(source))
            }
            TransportMode::Framed => {
                let len = checked_size(self.io.read_i32().await?)?;
                let mut frame = vec![0; len];
                self.io.read_exact(&mut frame).await?;
                self.frame = Cursor::new(frame);
                let source: MessageSource<'_> = &mut self.frame;
                Ok(BinaryReader::new(source))
            }
        }
    }

    /// Writes one encoded message and flushes it.
    pub async fn write_message(&mut self, message: &[u8]) -> ProtocolResult<()> {
        if self.mode == TransportMode::Framed {
            let len = u32::try_from(message.len())
                .map_err(|_| ProtocolError::SizeLimit(message.len()))?;
            self.io.write_u32(len).await?;
        }
        self.io.write_all(message).await?;
        self.io.flush().await?;
        Ok(())
    }
}
