//! Subject names and wildcard patterns.
//!
//! A subject is a dot-separated list of non-empty elements, e.g.
//! `VCIRCUIT.WORK`. Subscription patterns may additionally use:
//!
//! - `*` to match exactly one element
//! - `>` as the last element to match one or more trailing elements
//!
//! Send subjects must be literal.

use crate::error::{Result, TransportError};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Maximum length of a subject in bytes.
pub const SUBJECT_MAX: usize = 255;

/// Prefix of process-generated inbox subjects.
pub const INBOX_PREFIX: &str = "_INBOX";

/// A validated subject name or subscription pattern.
///
/// Cloning is cheap (shared string).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Subject(Arc<str>);

impl Subject {
    /// Parse a subject or pattern.
    ///
    /// # Examples
    ///
    /// ```
    /// use vcircuit_core::subject::Subject;
    ///
    /// let s = Subject::parse("VCIRCUIT.WORK").unwrap();
    /// assert!(!s.is_pattern());
    ///
    /// let p = Subject::parse("_VC.*.SYSTEM.>").unwrap();
    /// assert!(p.is_pattern());
    ///
    /// assert!(Subject::parse("A..B").is_err());
    /// assert!(Subject::parse("A.>.B").is_err());
    /// ```
    pub fn parse(s: &str) -> Result<Self> {
        s.parse()
    }

    /// Parse a subject that must be usable as a send address.
    pub fn literal(s: &str) -> Result<Self> {
        let subject = Self::parse(s)?;
        if subject.is_pattern() {
            return Err(TransportError::invalid_subject(
                s,
                "wildcards are not allowed in send subjects",
            ));
        }
        Ok(subject)
    }

    /// The subject as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterate over the dot-separated elements.
    pub fn elements(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    /// Returns true if the subject contains a wildcard element.
    #[must_use]
    pub fn is_pattern(&self) -> bool {
        self.elements().any(|e| e == "*" || e == ">")
    }

    /// Returns true if this is a process inbox subject.
    #[must_use]
    pub fn is_inbox(&self) -> bool {
        self.0.starts_with(INBOX_PREFIX) && self.0[INBOX_PREFIX.len()..].starts_with('.')
    }

    /// Append an element, e.g. `VCIRCUIT.REPLY` + `7` = `VCIRCUIT.REPLY.7`.
    pub fn child(&self, element: &str) -> Result<Self> {
        format!("{}.{}", self.0, element).parse()
    }

    /// Check whether this pattern matches a literal subject.
    ///
    /// ```
    /// use vcircuit_core::subject::Subject;
    ///
    /// let p = Subject::parse("_VC.*.SYSTEM.CIRCUIT.DISCONNECTED").unwrap();
    /// let s = Subject::parse("_VC.WARN.SYSTEM.CIRCUIT.DISCONNECTED").unwrap();
    /// assert!(p.matches(&s));
    /// ```
    #[must_use]
    pub fn matches(&self, subject: &Subject) -> bool {
        pattern_matches(self.as_str(), subject.as_str())
    }
}

/// Element-wise wildcard match of `pattern` against a literal `subject`.
pub(crate) fn pattern_matches(pattern: &str, subject: &str) -> bool {
    let mut subject_elems = subject.split('.');

    for p in pattern.split('.') {
        match p {
            ">" => return subject_elems.next().is_some(),
            "*" => {
                if subject_elems.next().is_none() {
                    return false;
                }
            }
            literal => match subject_elems.next() {
                Some(s) if s == literal => {}
                _ => return false,
            },
        }
    }

    subject_elems.next().is_none()
}

impl FromStr for Subject {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(TransportError::invalid_subject(s, "subject cannot be empty"));
        }
        if s.len() > SUBJECT_MAX {
            return Err(TransportError::invalid_subject(
                s,
                format!("subject longer than {SUBJECT_MAX} bytes"),
            ));
        }

        let count = s.split('.').count();
        for (i, element) in s.split('.').enumerate() {
            if element.is_empty() {
                return Err(TransportError::invalid_subject(s, "empty element"));
            }
            if element == ">" && i + 1 != count {
                return Err(TransportError::invalid_subject(
                    s,
                    "'>' is only allowed as the last element",
                ));
            }
            if element.len() > 1 && (element.contains('*') || element.contains('>')) {
                return Err(TransportError::invalid_subject(
                    s,
                    "wildcards must occupy a whole element",
                ));
            }
            if element.chars().any(char::is_whitespace) {
                return Err(TransportError::invalid_subject(s, "whitespace in element"));
            }
        }

        Ok(Self(Arc::from(s)))
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Subject {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
