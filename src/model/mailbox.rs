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

use std::collections::BTreeMap;

use super::acl::MailboxAcl;
use super::annotation::{AnnotationKey, AnnotationValue};
use super::ids::MailboxId;
use super::path::MailboxPath;

/// A mailbox entity.
///
/// Values of this type are snapshots: changing one does nothing until it is
/// handed back to a mapper, and an event carrying a `Mailbox` keeps seeing
/// the state at the time the event was built.
///
/// The ACL and annotations can only be changed through the mapper's command
/// operations, so they are not publicly mutable here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mailbox {
    id: Option<MailboxId>,
    pub path: MailboxPath,
    pub uid_validity: u32,
    acl: MailboxAcl,
    annotations: BTreeMap<AnnotationKey, AnnotationValue>,
}

impl Mailbox {
    /// A mailbox which has not yet been saved.
    pub fn new(path: MailboxPath, uid_validity: u32) -> Self {
        Mailbox {
            id: None,
            path,
            uid_validity,
            acl: MailboxAcl::owner_default(),
            annotations: BTreeMap::new(),
        }
    }

    /// The id of this mailbox, or `None` if it has never been saved.
    pub fn id(&self) -> Option<MailboxId> {
        self.id
    }

    pub fn acl(&self) -> &MailboxAcl {
        &self.acl
    }

    pub fn annotations(
        &self,
    ) -> impl Iterator<Item = (&AnnotationKey, &AnnotationValue)> + '_ {
        self.annotations.iter()
    }

    /// Record the id assigned by the backend.
    ///
    /// Only mappers call this, and only for a mailbox without an id.
    pub(crate) fn assign_id(&mut self, id: MailboxId) {
        debug_assert!(self.id.is_none());
        self.id = Some(id);
    }

    pub(crate) fn acl_mut(&mut self) -> &mut MailboxAcl {
        &mut self.acl
    }

    pub(crate) fn annotations_mut(
        &mut self,
    ) -> &mut BTreeMap<AnnotationKey, AnnotationValue> {
        &mut self.annotations
    }
}

/// Generate a UID validity value for a new mailbox.
///
/// This is the lower 32 bits of the UNIX time relative to 2020-01-01 (so it
/// won't wrap until 2156), which is strictly ascending in practice. Callers
/// which create mailboxes in quick succession must still avoid collisions
/// themselves.
pub fn generate_uid_validity() -> u32 {
    let now = chrono::Utc::now().timestamp() as u32;
    now.wrapping_sub(1577836800).max(1)
}
