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

//! RFC 4314 access control lists.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;

use crate::support::error::Error;

bitflags! {
    /// A set of RFC 4314 rights.
    pub struct Rights: u16 {
        /// `l`: the mailbox is visible to LIST/LSUB.
        const LOOKUP = 1 << 0;
        /// `r`: SELECT, FETCH, SEARCH, COPY from.
        const READ = 1 << 1;
        /// `s`: keep the `\Seen` flag across sessions.
        const WRITE_SEEN = 1 << 2;
        /// `w`: set or clear flags other than `\Seen` and `\Deleted`.
        const WRITE = 1 << 3;
        /// `i`: APPEND, COPY into.
        const INSERT = 1 << 4;
        /// `p`: send mail to the submission address of the mailbox.
        const POST = 1 << 5;
        /// `k`: create child mailboxes.
        const CREATE_MAILBOX = 1 << 6;
        /// `x`: delete the mailbox itself.
        const DELETE_MAILBOX = 1 << 7;
        /// `t`: set or clear `\Deleted`.
        const DELETE_MESSAGES = 1 << 8;
        /// `e`: EXPUNGE.
        const PERFORM_EXPUNGE = 1 << 9;
        /// `a`: administer the ACL itself.
        const ADMINISTER = 1 << 10;
    }
}

const RIGHT_LETTERS: &[(char, Rights)] = &[
    ('l', Rights::LOOKUP),
    ('r', Rights::READ),
    ('s', Rights::WRITE_SEEN),
    ('w', Rights::WRITE),
    ('i', Rights::INSERT),
    ('p', Rights::POST),
    ('k', Rights::CREATE_MAILBOX),
    ('x', Rights::DELETE_MAILBOX),
    ('t', Rights::DELETE_MESSAGES),
    ('e', Rights::PERFORM_EXPUNGE),
    ('a', Rights::ADMINISTER),
];

impl FromStr for Rights {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let mut rights = Rights::empty();
        for ch in s.chars() {
            let right = RIGHT_LETTERS
                .iter()
                .find(|&&(letter, _)| letter == ch)
                .map(|&(_, right)| right)
                .ok_or_else(|| {
                    Error::Validation(format!(
                        "Unsupported right flag {:?}",
                        ch
                    ))
                })?;
            rights |= right;
        }
        Ok(rights)
    }
}

impl fmt::Display for Rights {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for &(letter, right) in RIGHT_LETTERS {
            if self.contains(right) {
                write!(f, "{}", letter)?;
            }
        }
        Ok(())
    }
}

/// What kind of principal an ACL entry names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NameType {
    User,
    Group,
    /// One of `owner`, `authenticated`, `anybody`.
    Special,
}

pub const OWNER: &str = "owner";
pub const AUTHENTICATED: &str = "authenticated";
pub const ANYBODY: &str = "anybody";

const GROUP_MARKER: char = '$';
const NEGATIVE_MARKER: char = '-';

/// The left-hand side of an ACL entry.
///
/// A negative key denies rather than grants its rights.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryKey {
    pub name: String,
    pub kind: NameType,
    pub negative: bool,
}

impl EntryKey {
    pub fn user(name: &str) -> Self {
        EntryKey {
            name: name.to_owned(),
            kind: NameType::User,
            negative: false,
        }
    }

    pub fn group(name: &str) -> Self {
        EntryKey {
            name: name.to_owned(),
            kind: NameType::Group,
            negative: false,
        }
    }

    pub fn owner() -> Self {
        EntryKey {
            name: OWNER.to_owned(),
            kind: NameType::Special,
            negative: false,
        }
    }

    pub fn negated(mut self) -> Self {
        self.negative = true;
        self
    }
}

impl FromStr for EntryKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let (negative, rest) = match s.strip_prefix(NEGATIVE_MARKER) {
            Some(rest) => (true, rest),
            None => (false, s),
        };

        let (kind, name) = match rest.strip_prefix(GROUP_MARKER) {
            Some(name) => (NameType::Group, name),
            None if [OWNER, AUTHENTICATED, ANYBODY].contains(&rest) => {
                (NameType::Special, rest)
            },
            None => (NameType::User, rest),
        };

        if name.is_empty() {
            return Err(Error::Validation(format!(
                "ACL entry key {:?} names nobody",
                s
            )));
        }

        Ok(EntryKey {
            name: name.to_owned(),
            kind,
            negative,
        })
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.negative {
            write!(f, "{}", NEGATIVE_MARKER)?;
        }
        if NameType::Group == self.kind {
            write!(f, "{}", GROUP_MARKER)?;
        }
        write!(f, "{}", self.name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EditMode {
    Add,
    Remove,
    Replace,
}

/// A change to be applied to one entry of an ACL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AclCommand {
    pub key: EntryKey,
    pub mode: EditMode,
    pub rights: Rights,
}

impl AclCommand {
    pub fn new(key: EntryKey, mode: EditMode, rights: Rights) -> Self {
        AclCommand { key, mode, rights }
    }

    /// Build a command from RFC 4314 `SETACL` syntax, where a leading `+`
    /// or `-` on the rights selects adding or removing them.
    pub fn parse(key: &str, rights: &str) -> Result<Self, Error> {
        let key = key.parse::<EntryKey>()?;
        let (mode, rights) = if let Some(r) = rights.strip_prefix('+') {
            (EditMode::Add, r)
        } else if let Some(r) = rights.strip_prefix('-') {
            (EditMode::Remove, r)
        } else {
            (EditMode::Replace, rights)
        };

        Ok(AclCommand::new(key, mode, rights.parse()?))
    }
}

/// An access control list.
///
/// Entries are ordered by key. An entry never has an empty set of rights;
/// removing the last right removes the entry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MailboxAcl {
    entries: BTreeMap<EntryKey, Rights>,
}

impl MailboxAcl {
    pub fn new() -> Self {
        Self::default()
    }

    /// The ACL given to a freshly created mailbox: everything for its
    /// owner.
    pub fn owner_default() -> Self {
        let mut acl = Self::new();
        acl.entries.insert(EntryKey::owner(), Rights::all());
        acl
    }

    pub fn get(&self, key: &EntryKey) -> Rights {
        self.entries.get(key).copied().unwrap_or_else(Rights::empty)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&EntryKey, Rights)> + '_ {
        self.entries.iter().map(|(k, &r)| (k, r))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Apply `command` to this ACL.
    pub fn apply(&mut self, command: &AclCommand) {
        let current = self.get(&command.key);
        let updated = match command.mode {
            EditMode::Add => current | command.rights,
            EditMode::Remove => current - command.rights,
            EditMode::Replace => command.rights,
        };

        if updated.is_empty() {
            self.entries.remove(&command.key);
        } else {
            self.entries.insert(command.key.clone(), updated);
        }
    }

    /// Return a copy of this ACL with `command` applied.
    pub fn with(&self, command: &AclCommand) -> Self {
        let mut acl = self.clone();
        acl.apply(command);
        acl
    }
}

/// A single `(key, rights)` pair taken from an ACL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AclEntry {
    pub key: EntryKey,
    pub rights: Rights,
}

/// The difference between two versions of an ACL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AclDiff {
    old: MailboxAcl,
    new: MailboxAcl,
}

impl AclDiff {
    pub fn compute(old: &MailboxAcl, new: &MailboxAcl) -> Self {
        AclDiff {
            old: old.clone(),
            new: new.clone(),
        }
    }

    pub fn old_acl(&self) -> &MailboxAcl {
        &self.old
    }

    pub fn new_acl(&self) -> &MailboxAcl {
        &self.new
    }

    /// Entries present only in the new ACL.
    pub fn added_entries(&self) -> Vec<AclEntry> {
        self.new
            .entries()
            .filter(|(k, _)| !self.old.entries.contains_key(k))
            .map(|(k, rights)| AclEntry {
                key: k.clone(),
                rights,
            })
            .collect()
    }

    /// Entries present in both ACLs with different rights, with their new
    /// rights.
    pub fn changed_entries(&self) -> Vec<AclEntry> {
        self.new
            .entries()
            .filter(|&(k, rights)| {
                self.old.entries.get(k).map_or(false, |&old| old != rights)
            })
            .map(|(k, rights)| AclEntry {
                key: k.clone(),
                rights,
            })
            .collect()
    }

    /// Entries present only in the old ACL, with their old rights.
    pub fn removed_entries(&self) -> Vec<AclEntry> {
        self.old
            .entries()
            .filter(|(k, _)| !self.new.entries.contains_key(k))
            .map(|(k, rights)| AclEntry {
                key: k.clone(),
                rights,
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.old == self.new
    }
}
