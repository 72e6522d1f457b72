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

//! Events describing committed mutations, and their delivery to listeners.
//!
//! An `Event` is an envelope (id, time, acting session) around an
//! `EventKind`, the closed set of things that can happen to a mailbox.
//! Events are only built through the constructors here, which take
//! snapshots of everything they refer to; nothing in an event changes after
//! construction.

mod bus;
mod dispatcher;
mod listener;
mod registry;

pub use self::bus::*;
pub use self::dispatcher::*;
pub use self::listener::*;
pub use self::registry::*;

use std::fmt;

use chrono::prelude::*;

use crate::mapper::require_id;
use crate::model::*;
use crate::support::error::Error;

/// Identifies one event across every node which sees it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(u64);

impl EventId {
    pub fn random() -> Self {
        EventId(rand::random())
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "EventId({:016x})", self.0)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// What happened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventKind {
    MailboxAdded {
        mailbox: Mailbox,
    },
    MailboxRenamed {
        old_path: MailboxPath,
        /// The mailbox as it is after the rename.
        mailbox: Mailbox,
    },
    MailboxDeletion {
        mailbox: Mailbox,
    },
    /// Messages were added. `messages` is in insertion order.
    Added {
        mailbox: Mailbox,
        messages: Vec<MessageMetaData>,
    },
    /// Messages were removed. `messages` is in removal order.
    Expunged {
        mailbox: Mailbox,
        messages: Vec<MessageMetaData>,
    },
    FlagsUpdated {
        mailbox: Mailbox,
        updated: Vec<UpdatedFlags>,
    },
    MailboxAclUpdated {
        mailbox_id: MailboxId,
        path: MailboxPath,
        diff: AclDiff,
    },
}

impl EventKind {
    /// A short name for the kind of event, for logging.
    pub fn name(&self) -> &'static str {
        match *self {
            EventKind::MailboxAdded { .. } => "MailboxAdded",
            EventKind::MailboxRenamed { .. } => "MailboxRenamed",
            EventKind::MailboxDeletion { .. } => "MailboxDeletion",
            EventKind::Added { .. } => "Added",
            EventKind::Expunged { .. } => "Expunged",
            EventKind::FlagsUpdated { .. } => "FlagsUpdated",
            EventKind::MailboxAclUpdated { .. } => "MailboxAclUpdated",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    id: EventId,
    occurred_at: DateTime<Utc>,
    session: MailboxSession,
    mailbox_id: MailboxId,
    kind: EventKind,
}

impl Event {
    fn new(
        session: &MailboxSession,
        mailbox_id: MailboxId,
        kind: EventKind,
    ) -> Self {
        Event {
            id: EventId::random(),
            occurred_at: Utc::now(),
            session: session.clone(),
            mailbox_id,
            kind,
        }
    }

    pub fn mailbox_added(
        session: &MailboxSession,
        mailbox: &Mailbox,
    ) -> Result<Self, Error> {
        Ok(Self::new(
            session,
            require_id(mailbox)?,
            EventKind::MailboxAdded {
                mailbox: mailbox.clone(),
            },
        ))
    }

    pub fn mailbox_renamed(
        session: &MailboxSession,
        old_path: &MailboxPath,
        mailbox: &Mailbox,
    ) -> Result<Self, Error> {
        Ok(Self::new(
            session,
            require_id(mailbox)?,
            EventKind::MailboxRenamed {
                old_path: old_path.clone(),
                mailbox: mailbox.clone(),
            },
        ))
    }

    pub fn mailbox_deletion(
        session: &MailboxSession,
        mailbox: &Mailbox,
    ) -> Result<Self, Error> {
        Ok(Self::new(
            session,
            require_id(mailbox)?,
            EventKind::MailboxDeletion {
                mailbox: mailbox.clone(),
            },
        ))
    }

    pub fn added(
        session: &MailboxSession,
        mailbox: &Mailbox,
        messages: Vec<MessageMetaData>,
    ) -> Result<Self, Error> {
        Ok(Self::new(
            session,
            require_id(mailbox)?,
            EventKind::Added {
                mailbox: mailbox.clone(),
                messages,
            },
        ))
    }

    pub fn expunged(
        session: &MailboxSession,
        mailbox: &Mailbox,
        messages: Vec<MessageMetaData>,
    ) -> Result<Self, Error> {
        Ok(Self::new(
            session,
            require_id(mailbox)?,
            EventKind::Expunged {
                mailbox: mailbox.clone(),
                messages,
            },
        ))
    }

    pub fn flags_updated(
        session: &MailboxSession,
        mailbox: &Mailbox,
        updated: Vec<UpdatedFlags>,
    ) -> Result<Self, Error> {
        Ok(Self::new(
            session,
            require_id(mailbox)?,
            EventKind::FlagsUpdated {
                mailbox: mailbox.clone(),
                updated,
            },
        ))
    }

    pub fn acl_updated(
        session: &MailboxSession,
        mailbox: &Mailbox,
        diff: AclDiff,
    ) -> Result<Self, Error> {
        let mailbox_id = require_id(mailbox)?;
        Ok(Self::new(
            session,
            mailbox_id,
            EventKind::MailboxAclUpdated {
                mailbox_id,
                path: mailbox.path.clone(),
                diff,
            },
        ))
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn session(&self) -> &MailboxSession {
        &self.session
    }

    pub fn mailbox_id(&self) -> MailboxId {
        self.mailbox_id
    }

    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    /// The path of the affected mailbox as of when the event was built.
    ///
    /// For renames, this is the new path.
    pub fn path(&self) -> &MailboxPath {
        match self.kind {
            EventKind::MailboxAdded { ref mailbox }
            | EventKind::MailboxRenamed { ref mailbox, .. }
            | EventKind::MailboxDeletion { ref mailbox }
            | EventKind::Added { ref mailbox, .. }
            | EventKind::Expunged { ref mailbox, .. }
            | EventKind::FlagsUpdated { ref mailbox, .. } => &mailbox.path,
            EventKind::MailboxAclUpdated { ref path, .. } => path,
        }
    }

    /// The UIDs this event concerns, in event order.
    ///
    /// Events which aren't about messages have none.
    pub fn uids(&self) -> Vec<MessageUid> {
        match self.kind {
            EventKind::Added { ref messages, .. }
            | EventKind::Expunged { ref messages, .. } => {
                messages.iter().map(|m| m.uid).collect()
            },
            EventKind::FlagsUpdated { ref updated, .. } => {
                updated.iter().map(|u| u.uid).collect()
            },
            _ => Vec::new(),
        }
    }

    /// The metadata of `uid` in an `Added` or `Expunged` event.
    pub fn metadata(&self, uid: MessageUid) -> Option<&MessageMetaData> {
        match self.kind {
            EventKind::Added { ref messages, .. }
            | EventKind::Expunged { ref messages, .. } => {
                messages.iter().find(|m| m.uid == uid)
            },
            _ => None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {} on {} ({})",
            self.kind.name(),
            self.id,
            self.path(),
            self.mailbox_id
        )
    }
}
