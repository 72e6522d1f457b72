//-
// Copyright (c) 2024, Jason Lingle
//
// This file is part of Mailcore.
//
// Mailcore is free software: you can  redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Mailcore is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Mailcore. If not, see <http://www.gnu.org/licenses/>.

//! RFC 5464 mailbox annotations ("METADATA").
//!
//! Keys are validated once, on construction, so the rest of the system can
//! treat an `AnnotationKey` as well-formed. The rules are checked in a fixed
//! order and the first violated one is reported, so clients always see the
//! same message for the same bad key.

use std::fmt;
use std::str::FromStr;

use crate::support::error::Error;

pub const SLASH: char = '/';

/// Punctuation permitted in annotation keys besides `/`.
///
/// Everything else outside `[A-Za-z0-9]` is rejected. `*` and `%` are
/// reported separately since they have meaning in searches.
pub const ALLOWED_PUNCTUATION: &str = "/.-_:+@=!~";

/// The maximum number of annotations stored on one mailbox.
pub const MAX_ANNOTATIONS: usize = 200;
/// The maximum size, in bytes, of one annotation value.
pub const MAX_ANNOTATION_VALUE: usize = 64 * 1024;

/// A validated annotation entry name, such as `/shared/comment`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AnnotationKey(String);

impl AnnotationKey {
    /// Validate `raw` as an annotation key.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        if raw.trim().is_empty() {
            return Err(Error::Validation(
                "Annotation key must not be empty or blank".to_owned(),
            ));
        }

        if !raw.starts_with(SLASH) {
            return Err(invalid(raw, "does not start with a slash"));
        }

        for forbidden in &['*', '%'] {
            if raw.contains(*forbidden) {
                return Err(invalid(
                    raw,
                    &format!("contains at least a '{}' character", forbidden),
                ));
            }
        }

        if raw.contains("//") {
            return Err(invalid(raw, "contains 2 consecutive '/'"));
        }

        if raw.ends_with(SLASH) {
            return Err(invalid(raw, "ends with '/'"));
        }

        if let Some(ch) = raw.chars().find(|&ch| !is_key_char(ch)) {
            return Err(invalid(
                raw,
                &format!("contains the forbidden character {:?}", ch),
            ));
        }

        Ok(AnnotationKey(raw.to_owned()))
    }

    /// The canonical string form of this key.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The number of `/`-separated components, e.g. 2 for
    /// `/shared/comment`.
    pub fn count_components(&self) -> usize {
        self.0.matches(SLASH).count()
    }

    /// Whether `self` is `other` or an ancestor of it.
    pub fn is_ancestor_or_is_equal(&self, other: &AnnotationKey) -> bool {
        other.0 == self.0
            || (other.0.starts_with(&self.0)
                && other.0[self.0.len()..].starts_with(SLASH))
    }

    /// Whether `self` is `other` or its immediate parent.
    pub fn is_parent_or_is_equal(&self, other: &AnnotationKey) -> bool {
        self.is_ancestor_or_is_equal(other)
            && other.count_components() <= self.count_components() + 1
    }

    /// Whether `candidate` should be returned for a request of `self` with
    /// the given depth.
    pub fn selects(
        &self,
        candidate: &AnnotationKey,
        depth: AnnotationDepth,
    ) -> bool {
        if !self.is_ancestor_or_is_equal(candidate) {
            return false;
        }

        let extra = candidate.count_components() - self.count_components();
        match depth {
            AnnotationDepth::Zero => 0 == extra,
            AnnotationDepth::One => extra <= 1,
            AnnotationDepth::Infinity => true,
        }
    }
}

fn invalid(raw: &str, reason: &str) -> Error {
    Error::Validation(format!("Annotation key {:?} {}", raw, reason))
}

fn is_key_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ALLOWED_PUNCTUATION.contains(ch)
}

impl FromStr for AnnotationKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        Self::parse(s)
    }
}

impl fmt::Display for AnnotationKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The RFC 5464 `DEPTH` option.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnnotationDepth {
    Zero,
    One,
    Infinity,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnnotationKind {
    Binary,
    String,
    /// The value is absent; setting a nil value deletes the annotation.
    Nil,
}

/// The raw content offered when constructing an `AnnotationValue`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AnnotationPayload {
    Text(String),
    Bytes(Vec<u8>),
}

#[derive(Clone, PartialEq, Eq)]
pub enum AnnotationValue {
    Binary(Vec<u8>),
    String(String),
    Nil,
}

impl AnnotationValue {
    /// Build a value of the given kind.
    ///
    /// The payload must be present for concrete kinds, absent for `Nil`, and
    /// of the form matching the kind.
    pub fn new(
        kind: AnnotationKind,
        payload: Option<AnnotationPayload>,
    ) -> Result<Self, Error> {
        match (kind, payload) {
            (AnnotationKind::Nil, None) => Ok(AnnotationValue::Nil),
            (AnnotationKind::Nil, Some(_)) => Err(Error::Validation(
                "A nil annotation value cannot carry a payload".to_owned(),
            )),
            (_, None) => Err(Error::Validation(format!(
                "A {:?} annotation value requires a payload",
                kind
            ))),
            (AnnotationKind::String, Some(AnnotationPayload::Text(s))) => {
                Ok(AnnotationValue::String(s))
            },
            (AnnotationKind::Binary, Some(AnnotationPayload::Bytes(b))) => {
                Ok(AnnotationValue::Binary(b))
            },
            (kind, Some(_)) => Err(Error::Validation(format!(
                "Payload does not match annotation kind {:?}",
                kind
            ))),
        }
    }

    pub fn kind(&self) -> AnnotationKind {
        match *self {
            AnnotationValue::Binary(_) => AnnotationKind::Binary,
            AnnotationValue::String(_) => AnnotationKind::String,
            AnnotationValue::Nil => AnnotationKind::Nil,
        }
    }

    pub fn as_str(&self) -> Result<&str, Error> {
        match *self {
            AnnotationValue::String(ref s) => Ok(s),
            _ => Err(Error::IllegalState(format!(
                "{:?} annotation value accessed as a string",
                self.kind()
            ))),
        }
    }

    pub fn as_bytes(&self) -> Result<&[u8], Error> {
        match *self {
            AnnotationValue::Binary(ref b) => Ok(b),
            _ => Err(Error::IllegalState(format!(
                "{:?} annotation value accessed as binary",
                self.kind()
            ))),
        }
    }

    pub fn is_nil(&self) -> bool {
        AnnotationValue::Nil == *self
    }

    /// The size of the value in bytes.
    pub fn size(&self) -> usize {
        match *self {
            AnnotationValue::Binary(ref b) => b.len(),
            AnnotationValue::String(ref s) => s.len(),
            AnnotationValue::Nil => 0,
        }
    }
}

impl fmt::Debug for AnnotationValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            AnnotationValue::Binary(ref b) => {
                write!(f, "Binary({} bytes)", b.len())
            },
            AnnotationValue::String(ref s) => write!(f, "String({:?})", s),
            AnnotationValue::Nil => write!(f, "Nil"),
        }
    }
}

/// One entry of a mailbox's annotation collection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MailboxAnnotation {
    pub key: AnnotationKey,
    pub value: AnnotationValue,
}

impl MailboxAnnotation {
    pub fn string(key: AnnotationKey, value: &str) -> Self {
        MailboxAnnotation {
            key,
            value: AnnotationValue::String(value.to_owned()),
        }
    }

    pub fn binary(key: AnnotationKey, value: Vec<u8>) -> Self {
        MailboxAnnotation {
            key,
            value: AnnotationValue::Binary(value),
        }
    }

    /// An annotation which, when set, removes `key`.
    pub fn nil(key: AnnotationKey) -> Self {
        MailboxAnnotation {
            key,
            value: AnnotationValue::Nil,
        }
    }
}

/// A batch of annotation changes to apply to one mailbox.
///
/// Nil values delete their key; everything else inserts or replaces.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AnnotationCommand {
    pub annotations: Vec<MailboxAnnotation>,
}

impl AnnotationCommand {
    pub fn new(annotations: Vec<MailboxAnnotation>) -> Self {
        AnnotationCommand { annotations }
    }

    /// Check the command's values against the per-value size limit.
    pub fn validate(&self) -> Result<(), Error> {
        for annotation in &self.annotations {
            if annotation.value.size() > MAX_ANNOTATION_VALUE {
                return Err(Error::Validation(format!(
                    "Value of annotation {} exceeds {} bytes",
                    annotation.key, MAX_ANNOTATION_VALUE
                )));
            }
        }
        Ok(())
    }
}
