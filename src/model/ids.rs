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

use std::convert::TryFrom;
use std::fmt;
use std::num::NonZeroU64;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::support::error::Error;

/// Identifies a mailbox independently of its path.
///
/// Ids are assigned by the storage backend the first time a mailbox is saved
/// and never change afterwards, even across renames. Backends assign them
/// from a strictly increasing counter, so they are never reused.
#[derive(
    Deserialize,
    Serialize,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
#[serde(transparent)]
pub struct MailboxId(pub u64);

impl fmt::Debug for MailboxId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "MailboxId({})", self.0)
    }
}

impl fmt::Display for MailboxId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MailboxId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        s.parse::<u64>().map(MailboxId).map_err(|_| {
            Error::Validation(format!("{:?} is not a mailbox id", s))
        })
    }
}

/// Uniquely identifies a message within a single mailbox.
///
/// UIDs start at 1 and increase monotonically as messages are added to the
/// mailbox. UIDs are never reused.
#[derive(
    Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(transparent)]
pub struct MessageUid(pub NonZeroU64);

impl fmt::Debug for MessageUid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Uid({})", self.0.get())
    }
}

impl fmt::Display for MessageUid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.get())
    }
}

impl MessageUid {
    // Unsafe because new() isn't const for some reason
    pub const MIN: Self = unsafe { MessageUid(NonZeroU64::new_unchecked(1)) };
    pub const MAX: Self =
        unsafe { MessageUid(NonZeroU64::new_unchecked(u64::MAX)) };

    pub fn of(uid: u64) -> Option<Self> {
        NonZeroU64::new(uid).map(MessageUid)
    }

    pub fn next(self) -> Option<Self> {
        self.0.get().checked_add(1).and_then(MessageUid::of)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }

    #[cfg(test)]
    pub fn u(uid: u64) -> Self {
        MessageUid::of(uid).unwrap()
    }
}

impl TryFrom<u64> for MessageUid {
    type Error = ();

    fn try_from(v: u64) -> Result<Self, ()> {
        Self::of(v).ok_or(())
    }
}

/// A CONDSTORE "modifier sequence" number.
///
/// Every change to a message in a mailbox (insertion, flag update, expunge)
/// is assigned the next modseq of that mailbox. `ModSeq::ZERO` is the value
/// of a mailbox in which nothing has happened yet.
#[derive(
    Deserialize,
    Serialize,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
)]
#[serde(transparent)]
pub struct ModSeq(pub u64);

impl ModSeq {
    pub const ZERO: Self = ModSeq(0);

    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(ModSeq)
    }
}

impl fmt::Debug for ModSeq {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ModSeq({})", self.0)
    }
}

/// A range of UIDs, as used by the message mapper's bulk operations.
///
/// All bounds are inclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageRange {
    One(MessageUid),
    From(MessageUid),
    Range(MessageUid, MessageUid),
    All,
}

impl MessageRange {
    pub fn contains(&self, uid: MessageUid) -> bool {
        match *self {
            MessageRange::One(u) => u == uid,
            MessageRange::From(start) => uid >= start,
            MessageRange::Range(start, end) => uid >= start && uid <= end,
            MessageRange::All => true,
        }
    }

    /// The inclusive bounds of this range.
    pub fn bounds(&self) -> (MessageUid, MessageUid) {
        match *self {
            MessageRange::One(u) => (u, u),
            MessageRange::From(start) => (start, MessageUid::MAX),
            MessageRange::Range(start, end) => (start, end),
            MessageRange::All => (MessageUid::MIN, MessageUid::MAX),
        }
    }
}
