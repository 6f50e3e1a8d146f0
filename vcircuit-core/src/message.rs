//! Self-describing messages.
//!
//! A [`Message`] carries an optional send subject, an optional reply subject
//! and an ordered list of named, typed fields. Field updates use
//! insert-or-replace semantics so a request message can be reused and updated
//! in place across sends.
//!
//! # Examples
//!
//! ```
//! use vcircuit_core::message::Message;
//!
//! let mut msg = Message::new()
//!     .with_u32("x", 2)
//!     .with_u32("y", 3);
//!
//! let sum = msg.get_u32("x").unwrap() + msg.get_u32("y").unwrap();
//! msg.update_u32("sum", sum);
//!
//! assert_eq!(msg.get_u32("sum").unwrap(), 5);
//! assert_eq!(msg.to_string(), "{x=2 y=3 sum=5}");
//! ```

use crate::error::{Result, TransportError};
use crate::subject::Subject;
use bytes::Bytes;
use smallvec::SmallVec;
use std::fmt;

/// Typed field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    U32(u32),
    U64(u64),
    I64(i64),
    F64(f64),
    String(String),
    Bytes(Bytes),
    Message(Box<Message>),
}

impl FieldValue {
    /// Short type name used in error messages.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::U32(_) => "u32",
            Self::U64(_) => "u64",
            Self::I64(_) => "i64",
            Self::F64(_) => "f64",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Message(_) => "message",
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::U32(v) => write!(f, "{v}"),
            Self::U64(v) => write!(f, "{v}"),
            Self::I64(v) => write!(f, "{v}"),
            Self::F64(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "\"{v}\""),
            Self::Bytes(v) => write!(f, "[{} bytes]", v.len()),
            Self::Message(v) => write!(f, "{v}"),
        }
    }
}

/// A named field.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub value: FieldValue,
}

/// Message with addressing and typed fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    send_subject: Option<Subject>,
    reply_subject: Option<Subject>,
    fields: SmallVec<[Field; 4]>,
}

macro_rules! typed_accessors {
    ($($update:ident, $with:ident, $get:ident, $variant:ident, $ty:ty;)*) => {
        $(
            #[doc = concat!("Insert or replace a `", stringify!($ty), "` field.")]
            pub fn $update(&mut self, name: &str, value: $ty) {
                self.update(name, FieldValue::$variant(value));
            }

            #[doc = concat!("Builder form of [`Message::", stringify!($update), "`].")]
            #[must_use]
            pub fn $with(mut self, name: &str, value: $ty) -> Self {
                self.$update(name, value);
                self
            }

            #[doc = concat!("Read a `", stringify!($ty), "` field.")]
            pub fn $get(&self, name: &str) -> Result<$ty> {
                match self.get(name) {
                    Some(FieldValue::$variant(v)) => Ok(v.clone()),
                    Some(other) => Err(TransportError::field(
                        name,
                        format!("expected {}, found {}", stringify!($ty), other.type_name()),
                    )),
                    None => Err(TransportError::field(name, "missing")),
                }
            }
        )*
    };
}

impl Message {
    /// Create an empty message.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty message addressed to `subject`.
    #[must_use]
    pub fn to(subject: Subject) -> Self {
        Self {
            send_subject: Some(subject),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn send_subject(&self) -> Option<&Subject> {
        self.send_subject.as_ref()
    }

    pub fn set_send_subject(&mut self, subject: Subject) {
        self.send_subject = Some(subject);
    }

    #[must_use]
    pub const fn reply_subject(&self) -> Option<&Subject> {
        self.reply_subject.as_ref()
    }

    pub fn set_reply_subject(&mut self, subject: Subject) {
        self.reply_subject = Some(subject);
    }

    pub fn clear_reply_subject(&mut self) {
        self.reply_subject = None;
    }

    #[must_use]
    pub fn with_reply_subject(mut self, subject: Subject) -> Self {
        self.reply_subject = Some(subject);
        self
    }

    /// Insert or replace a field.
    pub fn update(&mut self, name: &str, value: FieldValue) {
        if let Some(field) = self.fields.iter_mut().find(|f| f.name == name) {
            field.value = value;
        } else {
            self.fields.push(Field {
                name: name.to_string(),
                value,
            });
        }
    }

    /// Look up a field by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.value)
    }

    /// Remove a field; returns its value if it was present.
    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        let pos = self.fields.iter().position(|f| f.name == name)?;
        Some(self.fields.remove(pos).value)
    }

    /// Fields in insertion order.
    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    typed_accessors! {
        update_u32, with_u32, get_u32, U32, u32;
        update_u64, with_u64, get_u64, U64, u64;
        update_i64, with_i64, get_i64, I64, i64;
        update_f64, with_f64, get_f64, F64, f64;
        update_string, with_string, get_string, String, String;
        update_bytes, with_bytes, get_bytes, Bytes, Bytes;
    }

    /// Insert or replace a nested message field.
    pub fn update_message(&mut self, name: &str, value: Message) {
        self.update(name, FieldValue::Message(Box::new(value)));
    }

    /// Read a nested message field.
    pub fn get_message(&self, name: &str) -> Result<&Message> {
        match self.get(name) {
            Some(FieldValue::Message(m)) => Ok(m),
            Some(other) => Err(TransportError::field(
                name,
                format!("expected message, found {}", other.type_name()),
            )),
            None => Err(TransportError::field(name, "missing")),
        }
    }

    /// Take a nested message field out of this message.
    pub fn take_message(&mut self, name: &str) -> Result<Message> {
        match self.remove(name) {
            Some(FieldValue::Message(m)) => Ok(*m),
            Some(other) => Err(TransportError::field(
                name,
                format!("expected message, found {}", other.type_name()),
            )),
            None => Err(TransportError::field(name, "missing")),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}={}", field.name, field.value)?;
        }
        f.write_str("}")
    }
}
