//! Compact binary encoding of [`Error`] values.
//!
//! ## Layout
//!
//! ```text
//! error  := string(op) string(token) varint(kind) cause
//! string := varint(len) utf8[len]
//! cause  := 0x00                  no cause
//!         | 'E' error             nested structured error
//!         | 'e' string            message text
//! ```
//!
//! Foreign causes are written as their message text, so they come back as
//! [`Cause::Message`]. Empty op and token fields decode as absent.

use super::{Cause, Error, Kind, Op};
use crate::Token;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::encoding::{decode_varint, encode_varint};

const TAG_NONE: u8 = 0x00;
const TAG_ERROR: u8 = b'E';
const TAG_MESSAGE: u8 = b'e';

/// Deepest cause chain accepted by [`Error::from_bytes`].
pub const MAX_DEPTH: usize = 64;

/// A payload passed to [`Error::from_bytes`] was malformed.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The payload ended in the middle of a field.
    #[error("payload truncated")]
    Truncated,

    /// A length or kind prefix was not a valid varint.
    #[error("malformed varint: {context}")]
    Varint { context: String },

    /// The kind code does not name a [`Kind`].
    #[error("unknown error kind code {0}")]
    UnknownKind(u64),

    /// A length prefix does not fit in this platform's address space.
    #[error("length prefix {0} does not fit in memory")]
    LengthOverflow(u64),

    /// The cause tag is not one of the known tags.
    #[error("unknown cause tag {0:#04x}")]
    UnknownTag(u8),

    /// A string field held invalid UTF-8.
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,

    /// The cause chain nests deeper than [`MAX_DEPTH`].
    #[error("cause chain nests deeper than {} levels", MAX_DEPTH)]
    TooDeep,

    /// Bytes remained after a complete error was decoded.
    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),
}

impl From<DecodeError> for Error {
    fn from(err: DecodeError) -> Self {
        Error::builder()
            .op(Op::new("error.decode"))
            .kind(Kind::Invalid)
            .source(err)
            .build()
    }
}

impl Error {
    /// Serializes this error and its cause chain.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Appends the encoding of this error to `buf`.
    pub fn encode(&self, buf: &mut impl BufMut) {
        put_str(buf, self.op().map_or("", Op::as_str));
        put_str(buf, self.token().map_or("", Token::as_str));
        encode_varint(u64::from(self.own_kind().code()), buf);

        match self.cause() {
            None => buf.put_u8(TAG_NONE),
            Some(Cause::Error(inner)) => {
                buf.put_u8(TAG_ERROR);
                inner.encode(buf);
            }
            Some(cause) => {
                buf.put_u8(TAG_MESSAGE);
                put_str(buf, &cause.to_string());
            }
        }
    }

    /// Decodes an error produced by [`Error::to_bytes`].
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] if `payload` is truncated, carries unknown
    /// codes or tags, nests deeper than [`MAX_DEPTH`], or has trailing bytes.
    pub fn from_bytes(mut payload: &[u8]) -> Result<Error, DecodeError> {
        let err = decode_error(&mut payload, 0)?;
        if payload.has_remaining() {
            return Err(DecodeError::TrailingBytes(payload.remaining()));
        }
        Ok(err)
    }
}

fn put_str(buf: &mut impl BufMut, s: &str) {
    encode_varint(s.len() as u64, buf);
    buf.put_slice(s.as_bytes());
}

fn get_varint(buf: &mut &[u8]) -> Result<u64, DecodeError> {
    if !buf.has_remaining() {
        return Err(DecodeError::Truncated);
    }
    decode_varint(buf).map_err(|e| DecodeError::Varint {
        context: e.to_string(),
    })
}

fn field_len(raw: u64) -> Result<usize, DecodeError> {
    usize::try_from(raw).map_err(|_| DecodeError::LengthOverflow(raw))
}

fn get_str(buf: &mut &[u8]) -> Result<String, DecodeError> {
    let len = field_len(get_varint(buf)?)?;
    if buf.remaining() < len {
        return Err(DecodeError::Truncated);
    }
    let s = core::str::from_utf8(&buf[..len])
        .map_err(|_| DecodeError::InvalidUtf8)?
        .to_owned();
    buf.advance(len);
    Ok(s)
}

fn decode_error(buf: &mut &[u8], depth: usize) -> Result<Error, DecodeError> {
    if depth >= MAX_DEPTH {
        return Err(DecodeError::TooDeep);
    }

    let op = get_str(buf)?;
    let token = get_str(buf)?;
    let code = get_varint(buf)?;
    let kind = Kind::from_code(code).ok_or(DecodeError::UnknownKind(code))?;

    let mut builder = Error::builder().kind(kind);
    if !op.is_empty() {
        builder = builder.op(op);
    }
    if !token.is_empty() {
        builder = builder.token(token);
    }

    if !buf.has_remaining() {
        return Err(DecodeError::Truncated);
    }
    builder = match buf.get_u8() {
        TAG_NONE => builder,
        TAG_ERROR => builder.cause(decode_error(buf, depth + 1)?),
        TAG_MESSAGE => builder.message(get_str(buf)?),
        tag => return Err(DecodeError::UnknownTag(tag)),
    };

    Ok(builder.build())
}
