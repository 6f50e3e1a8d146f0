//! Daemon wire format.
//!
//! Every frame is `[kind:u8][len:u32 BE][body:len]`. Strings inside a body
//! are `[len:u16 BE][utf8]`.
//!
//! | kind | frame         | body                                  |
//! |------|---------------|---------------------------------------|
//! | 1    | `Hello`       | service, network, description strings |
//! | 2    | `Subscribe`   | pattern string                        |
//! | 3    | `Unsubscribe` | pattern string                        |
//! | 4    | `Publish`     | subject string, encoded message       |
//!
//! The daemon routes `Publish` on the subject string alone and forwards the
//! frame bytes untouched; only bus clients decode the message.
//!
//! Message encoding:
//!
//! ```text
//! message := subject?(send) subject?(reply) count:u16 field*
//! subject? := len:u16 (0 = absent) utf8
//! field   := name:string tag:u8 value
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use vcircuit_core::error::TransportError;
use vcircuit_core::message::{FieldValue, Message};
use vcircuit_core::subject::Subject;

/// Frame header size (kind + length).
pub const HEADER_LEN: usize = 5;

/// Largest accepted frame body.
pub const MAX_FRAME: usize = 16 * 1024 * 1024;

/// Nesting limit for embedded messages.
const MAX_DEPTH: usize = 32;

const KIND_HELLO: u8 = 1;
const KIND_SUBSCRIBE: u8 = 2;
const KIND_UNSUBSCRIBE: u8 = 3;
const KIND_PUBLISH: u8 = 4;

const TAG_U32: u8 = 1;
const TAG_U64: u8 = 2;
const TAG_I64: u8 = 3;
const TAG_F64: u8 = 4;
const TAG_STRING: u8 = 5;
const TAG_BYTES: u8 = 6;
const TAG_MESSAGE: u8 = 7;

/// Wire protocol errors
#[derive(Debug, Error)]
pub enum WireError {
    #[error("Truncated frame body")]
    Truncated,

    #[error("Unknown frame kind {0}")]
    UnknownKind(u8),

    #[error("Unknown field tag {0}")]
    UnknownTag(u8),

    #[error("Frame body of {0} bytes exceeds limit")]
    TooLarge(usize),

    #[error("String too long to encode: {0} bytes")]
    StringTooLong(usize),

    #[error("Invalid UTF-8 in string")]
    Utf8,

    #[error("Invalid subject: {0}")]
    Subject(String),

    #[error("Messages nested too deeply")]
    TooDeep,
}

/// Result type alias for wire operations
pub type Result<T> = std::result::Result<T, WireError>;

impl From<WireError> for TransportError {
    fn from(e: WireError) -> Self {
        Self::Codec(e.to_string())
    }
}

/// A decoded daemon frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Hello {
        service: String,
        network: String,
        description: String,
    },
    Subscribe(Subject),
    Unsubscribe(Subject),
    Publish {
        subject: Subject,
        payload: Bytes,
    },
}

impl Frame {
    /// Build a `Publish` frame for `msg`, which must have a send subject.
    pub fn publish(subject: Subject, msg: &Message) -> Result<Self> {
        Ok(Self::Publish {
            subject,
            payload: encode_message(msg)?,
        })
    }

    const fn kind(&self) -> u8 {
        match self {
            Self::Hello { .. } => KIND_HELLO,
            Self::Subscribe(_) => KIND_SUBSCRIBE,
            Self::Unsubscribe(_) => KIND_UNSUBSCRIBE,
            Self::Publish { .. } => KIND_PUBLISH,
        }
    }

    /// Encode header and body.
    pub fn encode(&self) -> Result<Bytes> {
        let mut body = BytesMut::new();
        match self {
            Self::Hello {
                service,
                network,
                description,
            } => {
                put_str(&mut body, service)?;
                put_str(&mut body, network)?;
                put_str(&mut body, description)?;
            }
            Self::Subscribe(pattern) | Self::Unsubscribe(pattern) => {
                put_str(&mut body, pattern.as_str())?;
            }
            Self::Publish { subject, payload } => {
                put_str(&mut body, subject.as_str())?;
                body.extend_from_slice(payload);
            }
        }

        if body.len() > MAX_FRAME {
            return Err(WireError::TooLarge(body.len()));
        }

        let mut out = BytesMut::with_capacity(HEADER_LEN + body.len());
        out.put_u8(self.kind());
        out.put_u32(body.len() as u32);
        out.extend_from_slice(&body);
        Ok(out.freeze())
    }

    /// Decode a body read after a header with `kind`.
    pub fn decode(kind: u8, mut body: Bytes) -> Result<Self> {
        match kind {
            KIND_HELLO => Ok(Self::Hello {
                service: get_str(&mut body)?,
                network: get_str(&mut body)?,
                description: get_str(&mut body)?,
            }),
            KIND_SUBSCRIBE => Ok(Self::Subscribe(get_subject(&mut body, true)?)),
            KIND_UNSUBSCRIBE => Ok(Self::Unsubscribe(get_subject(&mut body, true)?)),
            KIND_PUBLISH => {
                let subject = get_subject(&mut body, false)?;
                Ok(Self::Publish {
                    subject,
                    payload: body,
                })
            }
            other => Err(WireError::UnknownKind(other)),
        }
    }
}

/// Validate a frame header; returns the kind and body length.
pub fn parse_header(header: &[u8; HEADER_LEN]) -> Result<(u8, usize)> {
    let kind = header[0];
    if !(KIND_HELLO..=KIND_PUBLISH).contains(&kind) {
        return Err(WireError::UnknownKind(kind));
    }
    let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
    if len > MAX_FRAME {
        return Err(WireError::TooLarge(len));
    }
    Ok((kind, len))
}

/// Encode a message (subjects and fields).
pub fn encode_message(msg: &Message) -> Result<Bytes> {
    let mut out = BytesMut::with_capacity(64);
    put_message(&mut out, msg)?;
    Ok(out.freeze())
}

/// Decode a message produced by [`encode_message`].
pub fn decode_message(mut src: Bytes) -> Result<Message> {
    get_message(&mut src, 0)
}

fn put_str(dst: &mut BytesMut, s: &str) -> Result<()> {
    let len = u16::try_from(s.len()).map_err(|_| WireError::StringTooLong(s.len()))?;
    dst.put_u16(len);
    dst.extend_from_slice(s.as_bytes());
    Ok(())
}

fn put_opt_subject(dst: &mut BytesMut, subject: Option<&Subject>) -> Result<()> {
    put_str(dst, subject.map_or("", Subject::as_str))
}

fn put_message(dst: &mut BytesMut, msg: &Message) -> Result<()> {
    put_opt_subject(dst, msg.send_subject())?;
    put_opt_subject(dst, msg.reply_subject())?;

    let count = u16::try_from(msg.len()).map_err(|_| WireError::TooLarge(msg.len()))?;
    dst.put_u16(count);

    for field in msg.fields() {
        put_str(dst, &field.name)?;
        match &field.value {
            FieldValue::U32(v) => {
                dst.put_u8(TAG_U32);
                dst.put_u32(*v);
            }
            FieldValue::U64(v) => {
                dst.put_u8(TAG_U64);
                dst.put_u64(*v);
            }
            FieldValue::I64(v) => {
                dst.put_u8(TAG_I64);
                dst.put_i64(*v);
            }
            FieldValue::F64(v) => {
                dst.put_u8(TAG_F64);
                dst.put_f64(*v);
            }
            FieldValue::String(v) => {
                dst.put_u8(TAG_STRING);
                dst.put_u32(v.len() as u32);
                dst.extend_from_slice(v.as_bytes());
            }
            FieldValue::Bytes(v) => {
                dst.put_u8(TAG_BYTES);
                dst.put_u32(v.len() as u32);
                dst.extend_from_slice(v);
            }
            FieldValue::Message(inner) => {
                dst.put_u8(TAG_MESSAGE);
                let nested = encode_message(inner)?;
                dst.put_u32(nested.len() as u32);
                dst.extend_from_slice(&nested);
            }
        }
    }
    Ok(())
}

#[inline]
fn need(src: &Bytes, n: usize) -> Result<()> {
    if src.len() < n {
        return Err(WireError::Truncated);
    }
    Ok(())
}

fn get_str(src: &mut Bytes) -> Result<String> {
    need(src, 2)?;
    let len = src.get_u16() as usize;
    need(src, len)?;
    let raw = src.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| WireError::Utf8)
}

fn get_subject(src: &mut Bytes, allow_pattern: bool) -> Result<Subject> {
    let s = get_str(src)?;
    let parsed = if allow_pattern {
        Subject::parse(&s)
    } else {
        Subject::literal(&s)
    };
    parsed.map_err(|e| WireError::Subject(e.to_string()))
}

fn get_opt_subject(src: &mut Bytes) -> Result<Option<Subject>> {
    let s = get_str(src)?;
    if s.is_empty() {
        return Ok(None);
    }
    Subject::literal(&s)
        .map(Some)
        .map_err(|e| WireError::Subject(e.to_string()))
}

fn get_blob(src: &mut Bytes) -> Result<Bytes> {
    need(src, 4)?;
    let len = src.get_u32() as usize;
    need(src, len)?;
    Ok(src.split_to(len))
}

fn get_message(src: &mut Bytes, depth: usize) -> Result<Message> {
    if depth > MAX_DEPTH {
        return Err(WireError::TooDeep);
    }

    let mut msg = Message::new();
    if let Some(send) = get_opt_subject(src)? {
        msg.set_send_subject(send);
    }
    if let Some(reply) = get_opt_subject(src)? {
        msg.set_reply_subject(reply);
    }

    need(src, 2)?;
    let count = src.get_u16();
    for _ in 0..count {
        let name = get_str(src)?;
        need(src, 1)?;
        let value = match src.get_u8() {
            TAG_U32 => {
                need(src, 4)?;
                FieldValue::U32(src.get_u32())
            }
            TAG_U64 => {
                need(src, 8)?;
                FieldValue::U64(src.get_u64())
            }
            TAG_I64 => {
                need(src, 8)?;
                FieldValue::I64(src.get_i64())
            }
            TAG_F64 => {
                need(src, 8)?;
                FieldValue::F64(src.get_f64())
            }
            TAG_STRING => {
                let raw = get_blob(src)?;
                FieldValue::String(String::from_utf8(raw.to_vec()).map_err(|_| WireError::Utf8)?)
            }
            TAG_BYTES => FieldValue::Bytes(get_blob(src)?),
            TAG_MESSAGE => {
                let mut nested = get_blob(src)?;
                FieldValue::Message(Box::new(get_message(&mut nested, depth + 1)?))
            }
            other => return Err(WireError::UnknownTag(other)),
        };
        msg.update(&name, value);
    }
    Ok(msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subj(s: &str) -> Subject {
        Subject::parse(s).unwrap()
    }

    fn split(frame: &Bytes) -> (u8, Bytes) {
        let header: [u8; HEADER_LEN] = frame[..HEADER_LEN].try_into().unwrap();
        let (kind, len) = parse_header(&header).unwrap();
        assert_eq!(len, frame.len() - HEADER_LEN);
        (kind, frame.slice(HEADER_LEN..))
    }

    #[test]
    fn test_request_message_survives_encoding() {
        let mut inner = Message::to(subj("VCIRCUIT.WORK"))
            .with_reply_subject(subj("VCIRCUIT.REPLY.1"))
            .with_u32("x", 7)
            .with_u32("y", u32::MAX);
        inner.update_string("note", "héllo".into());

        let mut envelope = Message::to(subj("_INBOX.ab.1")).with_u32("_vc", 3);
        envelope.update_message("data", inner);
        envelope.update_f64("t", 1.5);
        envelope.update_i64("neg", -4);
        envelope.update_bytes("raw", Bytes::from_static(&[0, 1, 2]));

        let decoded = decode_message(encode_message(&envelope).unwrap()).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_publish_frame() {
        let msg = Message::to(subj("A.B")).with_u64("n", 1);
        let frame = Frame::publish(subj("A.B"), &msg).unwrap().encode().unwrap();

        let (kind, body) = split(&frame);
        match Frame::decode(kind, body).unwrap() {
            Frame::Publish { subject, payload } => {
                assert_eq!(subject, subj("A.B"));
                assert_eq!(decode_message(payload).unwrap(), msg);
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn test_control_frames() {
        let frames = [
            Frame::Hello {
                service: "7522".into(),
                network: String::new(),
                description: "vcclient".into(),
            },
            Frame::Subscribe(subj("_VC.*.SYSTEM.>")),
            Frame::Unsubscribe(subj("A")),
        ];
        for frame in frames {
            let bytes = frame.encode().unwrap();
            let (kind, body) = split(&bytes);
            assert_eq!(Frame::decode(kind, body).unwrap(), frame);
        }
    }

    #[test]
    fn test_header_validation() {
        assert!(matches!(
            parse_header(&[9, 0, 0, 0, 0]),
            Err(WireError::UnknownKind(9))
        ));
        assert!(matches!(
            parse_header(&[4, 0xFF, 0, 0, 0]),
            Err(WireError::TooLarge(_))
        ));
    }

    #[test]
    fn test_truncated_and_bad_subject() {
        let payload = encode_message(&Message::new().with_u32("x", 1)).unwrap();
        let cut = payload.slice(..payload.len() - 1);
        assert!(matches!(decode_message(cut), Err(WireError::Truncated)));

        // Wildcards are not valid publish subjects.
        let mut body = BytesMut::new();
        put_str(&mut body, "A.*").unwrap();
        assert!(matches!(
            Frame::decode(KIND_PUBLISH, body.freeze()),
            Err(WireError::Subject(_))
        ));
    }
}
