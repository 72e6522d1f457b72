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

//! The storage layer.
//!
//! Storage backends implement `MailboxMapper` and `MessageMapper`; nothing
//! above this layer knows what the backend is. The general guidelines are:
//!
//! 1. Every operation is atomic on its own.
//! 2. Several operations can be made atomic together with
//!    `run_in_transaction`. An error inside the transaction rolls back
//!    everything it did and is returned unchanged.
//! 3. Identifiers (mailbox ids, UIDs, modseqs) are assigned by the backend,
//!    inside the same atomic unit as the write that needs them, so that
//!    concurrent writers never see duplicates or regressions.
//! 4. "Not found" is always reported as `Error::NxMailbox` or
//!    `Error::NxMessage`, never as a backend failure, and vice versa.

pub mod cache;
pub mod memory;

use std::collections::BTreeMap;

use crate::model::*;
use crate::support::error::Error;

/// Explicit transaction control over a backend.
///
/// Use `run_in_transaction` rather than calling these directly.
pub trait Transactional {
    /// Start a transaction, or join the one already open on this thread.
    fn begin(&self) -> Result<(), Error>;
    /// Commit the innermost transaction level.
    fn commit(&self) -> Result<(), Error>;
    /// Abandon the innermost transaction level.
    ///
    /// Rolling back a nested level dooms the outer transaction too.
    fn rollback(&self);
}

/// Run `work` atomically against `backend`.
///
/// If `work` fails, all its effects are rolled back and its error is returned
/// unchanged. A panic inside `work` also rolls back.
pub fn run_in_transaction<B: Transactional + ?Sized, T>(
    backend: &B,
    work: impl FnOnce() -> Result<T, Error>,
) -> Result<T, Error> {
    struct Guard<'a, B: Transactional + ?Sized> {
        backend: &'a B,
        done: bool,
    }

    impl<B: Transactional + ?Sized> Drop for Guard<'_, B> {
        fn drop(&mut self) {
            if !self.done {
                self.backend.rollback();
            }
        }
    }

    backend.begin()?;
    let mut guard = Guard {
        backend,
        done: false,
    };

    let result = work();
    guard.done = true;
    match result {
        Ok(v) => {
            backend.commit()?;
            Ok(v)
        },
        Err(e) => {
            backend.rollback();
            Err(e)
        },
    }
}

/// Access to mailbox entities in one backend.
pub trait MailboxMapper: Transactional + Send + Sync {
    /// Insert or update `mailbox`, keyed by its id.
    ///
    /// If `mailbox` has no id, the backend assigns one and records it in
    /// `mailbox`. Fails with `MailboxExists` if a different mailbox already
    /// has the same path.
    fn save(&self, mailbox: &mut Mailbox) -> Result<MailboxId, Error>;

    fn find_by_id(&self, id: MailboxId) -> Result<Mailbox, Error>;

    /// Find the mailbox with exactly `path`.
    fn find_by_path(&self, path: &MailboxPath) -> Result<Mailbox, Error>;

    /// Find all mailboxes in the tree of `pattern` whose name matches
    /// `pattern.name`, in which `%` matches any run of characters.
    fn find_by_path_pattern(
        &self,
        pattern: &MailboxPath,
    ) -> Result<Vec<Mailbox>, Error>;

    /// Whether any mailbox is a strict hierarchical descendant of `mailbox`.
    fn has_children(
        &self,
        mailbox: &Mailbox,
        delimiter: char,
    ) -> Result<bool, Error>;

    /// Every mailbox in the backend.
    fn list(&self) -> Result<Vec<Mailbox>, Error>;

    /// Remove `mailbox` and everything it contains.
    fn delete(&self, mailbox: &Mailbox) -> Result<(), Error>;

    /// Apply `command` to the stored ACL of `mailbox`, also updating the
    /// caller's copy, and return what changed.
    fn update_acl(
        &self,
        mailbox: &mut Mailbox,
        command: &AclCommand,
    ) -> Result<AclDiff, Error>;

    /// Apply `command` to the stored annotations of `mailbox`, also
    /// updating the caller's copy.
    fn set_annotations(
        &self,
        mailbox: &mut Mailbox,
        command: &AnnotationCommand,
    ) -> Result<(), Error>;

    fn get_all_annotations(
        &self,
        mailbox: &Mailbox,
    ) -> Result<Vec<MailboxAnnotation>, Error> {
        let id = require_id(mailbox)?;
        Ok(self
            .find_by_id(id)?
            .annotations()
            .map(|(key, value)| MailboxAnnotation {
                key: key.clone(),
                value: value.clone(),
            })
            .collect())
    }

    /// The annotations whose keys are exactly one of `keys`.
    fn get_annotations_by_keys(
        &self,
        mailbox: &Mailbox,
        keys: &[AnnotationKey],
    ) -> Result<Vec<MailboxAnnotation>, Error> {
        self.get_annotations_by_keys_with_depth(
            mailbox,
            keys,
            AnnotationDepth::Zero,
        )
    }

    /// The annotations selected by any of `keys` at `depth`.
    fn get_annotations_by_keys_with_depth(
        &self,
        mailbox: &Mailbox,
        keys: &[AnnotationKey],
        depth: AnnotationDepth,
    ) -> Result<Vec<MailboxAnnotation>, Error> {
        Ok(self
            .get_all_annotations(mailbox)?
            .into_iter()
            .filter(|a| keys.iter().any(|k| k.selects(&a.key, depth)))
            .collect())
    }
}

/// The result of moving a message between mailboxes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MovedMessage {
    /// The message as it was in the source mailbox.
    pub source: MessageMetaData,
    /// The message as it now is in the destination mailbox.
    pub target: MessageMetaData,
}

/// Access to the messages of mailboxes in one backend.
///
/// UIDs and modseqs are allocated per mailbox. Within one mailbox, every
/// allocation is strictly greater than all before it, including under
/// concurrent use.
pub trait MessageMapper: Transactional + Send + Sync {
    /// Insert a new message into `mailbox`, allocating its UID and modseq.
    fn add(
        &self,
        mailbox: &Mailbox,
        message: NewMessage,
    ) -> Result<MessageMetaData, Error>;

    /// Copy message `uid` of `source` into `target` as a new message.
    fn copy_to(
        &self,
        target: &Mailbox,
        source: MailboxId,
        uid: MessageUid,
    ) -> Result<MessageMetaData, Error>;

    /// Move message `uid` of `source` into `target`.
    fn move_to(
        &self,
        target: &Mailbox,
        source: MailboxId,
        uid: MessageUid,
    ) -> Result<MovedMessage, Error>;

    /// Immediately remove one message.
    fn delete(
        &self,
        mailbox: &Mailbox,
        uid: MessageUid,
    ) -> Result<MessageMetaData, Error>;

    /// Apply `update` to every message in `range`.
    ///
    /// Only messages whose flags actually change are returned, and only they
    /// are assigned a new modseq.
    fn update_flags(
        &self,
        mailbox: &Mailbox,
        update: &FlagsUpdate,
        range: MessageRange,
    ) -> Result<Vec<UpdatedFlags>, Error>;

    /// Remove every message in `range` which has the `\Deleted` flag.
    fn expunge_marked_for_deletion(
        &self,
        mailbox: &Mailbox,
        range: MessageRange,
    ) -> Result<BTreeMap<MessageUid, MessageMetaData>, Error>;

    fn list_uids(&self, mailbox: &Mailbox) -> Result<Vec<MessageUid>, Error>;

    fn count_messages(&self, mailbox: &Mailbox) -> Result<u64, Error>;

    fn count_unseen(&self, mailbox: &Mailbox) -> Result<u64, Error>;

    fn find_first_unseen(
        &self,
        mailbox: &Mailbox,
    ) -> Result<Option<MessageUid>, Error>;

    /// The UIDs of messages with `\Recent` set, in ascending order.
    fn find_recent(&self, mailbox: &Mailbox) -> Result<Vec<MessageUid>, Error>;

    /// Clear `\Recent` on every message of `mailbox`, returning the UIDs
    /// which had it.
    fn reset_recent(&self, mailbox: &Mailbox)
        -> Result<Vec<MessageUid>, Error>;

    /// Read up to `limit` messages in `range`, in ascending UID order.
    fn find_in_mailbox(
        &self,
        mailbox: &Mailbox,
        range: MessageRange,
        fetch_type: FetchType,
        limit: Option<usize>,
    ) -> Result<Vec<MailboxMessage>, Error>;

    /// The greatest UID ever allocated in `mailbox`.
    fn last_uid(&self, mailbox: &Mailbox) -> Result<Option<MessageUid>, Error>;

    /// The greatest modseq ever allocated in `mailbox`.
    fn highest_modseq(&self, mailbox: &Mailbox) -> Result<ModSeq, Error>;
}

/// Return the id of `mailbox`, failing with `NxMailbox` if it has never been
/// saved.
pub fn require_id(mailbox: &Mailbox) -> Result<MailboxId, Error> {
    mailbox.id().ok_or(Error::NxMailbox)
}
