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

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::prelude::*;

use super::ids::*;
use crate::support::error::Error;

#[derive(Clone, PartialOrd, Ord, Hash)]
pub enum Flag {
    Answered,
    Deleted,
    Draft,
    Flagged,
    Seen,
    Keyword(String),
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            &Flag::Answered => write!(f, "\\Answered"),
            &Flag::Deleted => write!(f, "\\Deleted"),
            &Flag::Draft => write!(f, "\\Draft"),
            &Flag::Flagged => write!(f, "\\Flagged"),
            &Flag::Seen => write!(f, "\\Seen"),
            &Flag::Keyword(ref kw) => write!(f, "{}", kw),
        }
    }
}

impl fmt::Debug for Flag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        <Flag as fmt::Display>::fmt(self, f)
    }
}

impl FromStr for Flag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        if s.eq_ignore_ascii_case("\\answered") {
            Ok(Flag::Answered)
        } else if s.eq_ignore_ascii_case("\\deleted") {
            Ok(Flag::Deleted)
        } else if s.eq_ignore_ascii_case("\\draft") {
            Ok(Flag::Draft)
        } else if s.eq_ignore_ascii_case("\\flagged") {
            Ok(Flag::Flagged)
        } else if s.eq_ignore_ascii_case("\\seen") {
            Ok(Flag::Seen)
        } else if s.starts_with('\\') {
            Err(Error::Validation(format!("Unknown system flag {}", s)))
        } else if !s.is_empty() && s.bytes().all(is_atom_char) {
            // Keywords are case-insensitive; store them folded so the
            // derived ordering agrees with equality.
            Ok(Flag::Keyword(s.to_ascii_lowercase()))
        } else {
            Err(Error::Validation(format!("Invalid keyword {:?}", s)))
        }
    }
}

fn is_atom_char(ch: u8) -> bool {
    match ch {
        0..=b' ' => false,
        127..=255 => false,
        b'(' | b')' | b'{' | b'*' | b'%' | b'\\' | b'"' | b']' => false,
        _ => true,
    }
}

impl PartialEq for Flag {
    fn eq(&self, other: &Flag) -> bool {
        match (self, other) {
            (&Flag::Answered, &Flag::Answered) => true,
            (&Flag::Deleted, &Flag::Deleted) => true,
            (&Flag::Draft, &Flag::Draft) => true,
            (&Flag::Flagged, &Flag::Flagged) => true,
            (&Flag::Seen, &Flag::Seen) => true,
            (&Flag::Keyword(ref a), &Flag::Keyword(ref b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Flag {}

/// The set of flags on one message.
///
/// `\Recent` is not a real flag in the sense that clients cannot set it, so
/// it is tracked separately.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Flags {
    pub flags: BTreeSet<Flag>,
    pub recent: bool,
}

impl Flags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of(flags: impl IntoIterator<Item = Flag>) -> Self {
        Flags {
            flags: flags.into_iter().collect(),
            recent: false,
        }
    }

    pub fn contains(&self, flag: &Flag) -> bool {
        self.flags.contains(flag)
    }

    pub fn is_seen(&self) -> bool {
        self.contains(&Flag::Seen)
    }

    pub fn is_deleted(&self) -> bool {
        self.contains(&Flag::Deleted)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlagsUpdateMode {
    Add,
    Remove,
    Replace,
}

/// A STORE-style change to the flags of a set of messages.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlagsUpdate {
    pub mode: FlagsUpdateMode,
    pub flags: BTreeSet<Flag>,
}

impl FlagsUpdate {
    pub fn new(
        mode: FlagsUpdateMode,
        flags: impl IntoIterator<Item = Flag>,
    ) -> Self {
        FlagsUpdate {
            mode,
            flags: flags.into_iter().collect(),
        }
    }

    /// Compute the new flags of a message currently having `old`.
    pub fn apply(&self, old: &Flags) -> Flags {
        let flags = match self.mode {
            FlagsUpdateMode::Add => {
                old.flags.union(&self.flags).cloned().collect()
            },
            FlagsUpdateMode::Remove => {
                old.flags.difference(&self.flags).cloned().collect()
            },
            FlagsUpdateMode::Replace => self.flags.clone(),
        };

        Flags {
            flags,
            recent: old.recent,
        }
    }
}

/// The before-and-after flags of one message affected by a flag update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdatedFlags {
    pub uid: MessageUid,
    pub modseq: ModSeq,
    pub old_flags: Flags,
    pub new_flags: Flags,
}

impl UpdatedFlags {
    pub fn is_changed(&self, flag: &Flag) -> bool {
        self.old_flags.contains(flag) != self.new_flags.contains(flag)
    }
}

/// The metadata of one message, as carried by `Added` and `Expunged`
/// events.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageMetaData {
    pub uid: MessageUid,
    pub modseq: ModSeq,
    pub size: u64,
    pub internal_date: DateTime<Utc>,
    pub flags: Flags,
}

/// How much of a message a read operation materialises.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum FetchType {
    /// Only uid, modseq, size, date and flags.
    Metadata,
    /// Metadata plus the header block.
    Headers,
    /// Metadata plus the body, without headers.
    Body,
    /// Everything.
    Full,
}

impl FetchType {
    pub fn includes_headers(self) -> bool {
        FetchType::Headers == self || FetchType::Full == self
    }

    pub fn includes_body(self) -> bool {
        FetchType::Body == self || FetchType::Full == self
    }
}

/// A message as offered to the message mapper for insertion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewMessage {
    pub internal_date: DateTime<Utc>,
    pub flags: Flags,
    /// The raw RFC 5322 message.
    pub content: Vec<u8>,
}

impl NewMessage {
    pub fn new(content: Vec<u8>, flags: Flags) -> Self {
        NewMessage {
            internal_date: Utc::now(),
            flags,
            content,
        }
    }
}

/// A message stored in a mailbox, materialised to the degree requested by a
/// `FetchType`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MailboxMessage {
    pub mailbox_id: MailboxId,
    pub metadata: MessageMetaData,
    /// The header block, if fetched.
    pub headers: Option<Vec<u8>>,
    /// The body, if fetched.
    pub body: Option<Vec<u8>>,
}

/// Find the offset at which the body of `content` starts, i.e., just after
/// the first blank line.
///
/// If there is no blank line, the whole message is headers.
pub fn body_start_offset(content: &[u8]) -> usize {
    let crlf = content
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|p| p + 4);
    let lf = content.windows(2).position(|w| w == b"\n\n").map(|p| p + 2);

    match (crlf, lf) {
        (Some(a), Some(b)) => a.min(b),
        (Some(a), None) | (None, Some(a)) => a,
        (None, None) => content.len(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_flags() {
        assert_eq!(Flag::Seen, "\\SEEN".parse().unwrap());
        assert_eq!(
            Flag::Keyword("notjunk".to_owned()),
            "NotJunk".parse().unwrap()
        );
        assert_eq!(
            "$Forwarded".parse::<Flag>().unwrap(),
            "$forwarded".parse::<Flag>().unwrap()
        );
        assert_matches!(Err(Error::Validation(_)), "\\Plugh".parse::<Flag>());
        assert_matches!(Err(Error::Validation(_)), "a b".parse::<Flag>());
        assert_matches!(Err(Error::Validation(_)), "".parse::<Flag>());
    }

    #[test]
    fn update_modes() {
        let old = Flags::of(vec![Flag::Seen, Flag::Draft]);

        let add = FlagsUpdate::new(FlagsUpdateMode::Add, vec![Flag::Flagged]);
        assert_eq!(
            Flags::of(vec![Flag::Seen, Flag::Draft, Flag::Flagged]),
            add.apply(&old)
        );

        let rm = FlagsUpdate::new(FlagsUpdateMode::Remove, vec![Flag::Seen]);
        assert_eq!(Flags::of(vec![Flag::Draft]), rm.apply(&old));

        let replace =
            FlagsUpdate::new(FlagsUpdateMode::Replace, vec![Flag::Deleted]);
        assert_eq!(Flags::of(vec![Flag::Deleted]), replace.apply(&old));

        let mut recent = old.clone();
        recent.recent = true;
        assert!(replace.apply(&recent).recent);
    }

    #[test]
    fn find_body() {
        assert_eq!(8, body_start_offset(b"A: b\r\n\r\nbody"));
        assert_eq!(6, body_start_offset(b"A: b\n\nbody"));
        assert_eq!(4, body_start_offset(b"A: b"));
        assert_eq!(0, body_start_offset(b""));
    }
}
