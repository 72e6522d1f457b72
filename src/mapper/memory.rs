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

//! An in-memory storage backend.
//!
//! This is the reference implementation of the mapper contracts. It is used
//! by tests throughout the crate and by embedders that don't need
//! persistence.
//!
//! All state lives behind one mutex. A transaction is owned by a single
//! thread; while it is open, every other thread's operations block until it
//! commits or rolls back, so transactions are fully serialisable. State is
//! snapshotted when the transaction starts and restored on rollback.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use log::warn;

use super::*;
use crate::support::mailbox_paths::name_pattern_matcher;

#[derive(Clone)]
struct StoredMessage {
    metadata: MessageMetaData,
    content: Arc<Vec<u8>>,
    body_start: usize,
}

#[derive(Clone, Default)]
struct MailboxMessages {
    last_uid: Option<MessageUid>,
    highest_modseq: ModSeq,
    messages: BTreeMap<MessageUid, StoredMessage>,
}

impl MailboxMessages {
    fn next_uid(&mut self) -> Result<MessageUid, Error> {
        let uid = match self.last_uid {
            None => MessageUid::MIN,
            Some(last) => last.next().ok_or(Error::GaveUpInsertion)?,
        };
        self.last_uid = Some(uid);
        Ok(uid)
    }

    fn next_modseq(&mut self) -> Result<ModSeq, Error> {
        let modseq = self.highest_modseq.next().ok_or(Error::GaveUpInsertion)?;
        self.highest_modseq = modseq;
        Ok(modseq)
    }

    fn range(
        &self,
        range: MessageRange,
    ) -> impl Iterator<Item = (&MessageUid, &StoredMessage)> + '_ {
        let (start, end) = range.bounds();
        let it = if start <= end {
            Some(self.messages.range(start..=end))
        } else {
            None
        };
        it.into_iter().flatten()
    }
}

#[derive(Clone, Default)]
struct State {
    last_mailbox_id: u64,
    mailboxes: BTreeMap<MailboxId, Mailbox>,
    messages: HashMap<MailboxId, MailboxMessages>,
}

impl State {
    fn mailbox(&self, id: MailboxId) -> Result<&Mailbox, Error> {
        self.mailboxes.get(&id).ok_or(Error::NxMailbox)
    }

    fn mailbox_mut(&mut self, id: MailboxId) -> Result<&mut Mailbox, Error> {
        self.mailboxes.get_mut(&id).ok_or(Error::NxMailbox)
    }

    fn messages(&self, mailbox: &Mailbox) -> Result<&MailboxMessages, Error> {
        let id = require_id(mailbox)?;
        self.messages.get(&id).ok_or(Error::NxMailbox)
    }

    fn messages_mut(
        &mut self,
        mailbox: &Mailbox,
    ) -> Result<&mut MailboxMessages, Error> {
        let id = require_id(mailbox)?;
        self.messages.get_mut(&id).ok_or(Error::NxMailbox)
    }

    fn path_taken_by_other(&self, mailbox: &Mailbox) -> bool {
        self.mailboxes
            .values()
            .any(|m| m.path == mailbox.path && m.id() != mailbox.id())
    }

    fn insert_message(
        &mut self,
        target: &Mailbox,
        content: Arc<Vec<u8>>,
        body_start: usize,
        internal_date: chrono::DateTime<chrono::Utc>,
        mut flags: Flags,
    ) -> Result<MessageMetaData, Error> {
        let messages = self.messages_mut(target)?;
        let uid = messages.next_uid()?;
        let modseq = messages.next_modseq()?;
        flags.recent = true;

        let metadata = MessageMetaData {
            uid,
            modseq,
            size: content.len() as u64,
            internal_date,
            flags,
        };
        messages.messages.insert(
            uid,
            StoredMessage {
                metadata: metadata.clone(),
                content,
                body_start,
            },
        );
        Ok(metadata)
    }

    fn remove_message(
        &mut self,
        mailbox_id: MailboxId,
        uid: MessageUid,
    ) -> Result<StoredMessage, Error> {
        let messages =
            self.messages.get_mut(&mailbox_id).ok_or(Error::NxMailbox)?;
        if !messages.messages.contains_key(&uid) {
            return Err(Error::NxMessage);
        }

        // The removal is itself a change to the mailbox
        messages.next_modseq()?;
        messages.messages.remove(&uid).ok_or(Error::NxMessage)
    }
}

struct Txn {
    owner: ThreadId,
    depth: usize,
    snapshot: State,
    doomed: bool,
}

struct Inner {
    state: State,
    txn: Option<Txn>,
}

/// A storage backend which keeps everything in memory.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    txn_released: Condvar,
    offline: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            inner: Mutex::new(Inner {
                state: State::default(),
                txn: None,
            }),
            txn_released: Condvar::new(),
            offline: AtomicBool::new(false),
        }
    }

    /// Simulate the backend becoming unreachable (or reachable again).
    ///
    /// While offline, every operation fails with `TransientStore`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Lock the state, waiting for any other thread's transaction to end.
    fn lock(&self) -> Result<MutexGuard<'_, Inner>, Error> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::TransientStore(
                "memory store is offline".to_owned(),
            ));
        }

        let me = thread::current().id();
        let mut inner = self.inner.lock().unwrap();
        while inner.txn.as_ref().map_or(false, |t| t.owner != me) {
            inner = self.txn_released.wait(inner).unwrap();
        }
        Ok(inner)
    }

    fn read<T>(
        &self,
        f: impl FnOnce(&State) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let inner = self.lock()?;
        f(&inner.state)
    }

    fn write<T>(
        &self,
        f: impl FnOnce(&mut State) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let mut inner = self.lock()?;
        f(&mut inner.state)
    }

    fn end_txn(&self, inner: &mut Inner, restore: bool) {
        if let Some(txn) = inner.txn.take() {
            if restore {
                inner.state = txn.snapshot;
            }
        }
        self.txn_released.notify_all();
    }
}

impl Transactional for MemoryStore {
    fn begin(&self) -> Result<(), Error> {
        let mut inner = self.lock()?;
        if let Some(ref mut txn) = inner.txn {
            txn.depth += 1;
            return Ok(());
        }

        let snapshot = inner.state.clone();
        inner.txn = Some(Txn {
            owner: thread::current().id(),
            depth: 1,
            snapshot,
            doomed: false,
        });
        Ok(())
    }

    fn commit(&self) -> Result<(), Error> {
        let me = thread::current().id();
        let mut inner = self.inner.lock().unwrap();
        let (outermost, doomed) = match inner.txn {
            Some(ref mut txn) if txn.owner == me => {
                txn.depth -= 1;
                (0 == txn.depth, txn.doomed)
            },
            _ => {
                return Err(Error::IllegalState(
                    "commit without an open transaction".to_owned(),
                ))
            },
        };

        if outermost {
            self.end_txn(&mut inner, doomed);
            if doomed {
                return Err(Error::Conflict(
                    "an inner transaction was rolled back".to_owned(),
                ));
            }
        }

        Ok(())
    }

    fn rollback(&self) {
        let me = thread::current().id();
        let mut inner = self.inner.lock().unwrap();
        let outermost = match inner.txn {
            Some(ref mut txn) if txn.owner == me => {
                txn.depth -= 1;
                txn.doomed = true;
                0 == txn.depth
            },
            _ => {
                warn!("Rollback without an open transaction");
                return;
            },
        };

        if outermost {
            self.end_txn(&mut inner, true);
        }
    }
}

impl MailboxMapper for MemoryStore {
    fn save(&self, mailbox: &mut Mailbox) -> Result<MailboxId, Error> {
        self.write(|state| {
            if state.path_taken_by_other(mailbox) {
                return Err(Error::MailboxExists);
            }

            let id = match mailbox.id() {
                Some(id) => id,
                None => {
                    state.last_mailbox_id += 1;
                    let id = MailboxId(state.last_mailbox_id);
                    mailbox.assign_id(id);
                    id
                },
            };

            state.mailboxes.insert(id, mailbox.clone());
            state.messages.entry(id).or_default();
            Ok(id)
        })
    }

    fn find_by_id(&self, id: MailboxId) -> Result<Mailbox, Error> {
        self.read(|state| state.mailbox(id).map(Mailbox::clone))
    }

    fn find_by_path(&self, path: &MailboxPath) -> Result<Mailbox, Error> {
        self.read(|state| {
            state
                .mailboxes
                .values()
                .find(|m| m.path == *path)
                .cloned()
                .ok_or(Error::NxMailbox)
        })
    }

    fn find_by_path_pattern(
        &self,
        pattern: &MailboxPath,
    ) -> Result<Vec<Mailbox>, Error> {
        let matcher = name_pattern_matcher(&pattern.name);
        self.read(|state| {
            Ok(state
                .mailboxes
                .values()
                .filter(|m| m.path.same_tree(pattern) && matcher(&m.path.name))
                .cloned()
                .collect())
        })
    }

    fn has_children(
        &self,
        mailbox: &Mailbox,
        delimiter: char,
    ) -> Result<bool, Error> {
        self.read(|state| {
            Ok(state
                .mailboxes
                .values()
                .any(|m| m.path.is_child_of(&mailbox.path, delimiter)))
        })
    }

    fn list(&self) -> Result<Vec<Mailbox>, Error> {
        self.read(|state| Ok(state.mailboxes.values().cloned().collect()))
    }

    fn delete(&self, mailbox: &Mailbox) -> Result<(), Error> {
        let id = require_id(mailbox)?;
        self.write(|state| {
            state.mailboxes.remove(&id).ok_or(Error::NxMailbox)?;
            state.messages.remove(&id);
            Ok(())
        })
    }

    fn update_acl(
        &self,
        mailbox: &mut Mailbox,
        command: &AclCommand,
    ) -> Result<AclDiff, Error> {
        let id = require_id(mailbox)?;
        self.write(|state| {
            let stored = state.mailbox_mut(id)?;
            let old = stored.acl().clone();
            stored.acl_mut().apply(command);
            let diff = AclDiff::compute(&old, stored.acl());
            *mailbox.acl_mut() = stored.acl().clone();
            Ok(diff)
        })
    }

    fn set_annotations(
        &self,
        mailbox: &mut Mailbox,
        command: &AnnotationCommand,
    ) -> Result<(), Error> {
        command.validate()?;
        let id = require_id(mailbox)?;
        self.write(|state| {
            let stored = state.mailbox_mut(id)?;
            let mut annotations = stored.annotations_mut().clone();
            for annotation in &command.annotations {
                if annotation.value.is_nil() {
                    annotations.remove(&annotation.key);
                } else {
                    let key = annotation.key.clone();
                    annotations.insert(key, annotation.value.clone());
                }
            }

            if annotations.len() > MAX_ANNOTATIONS {
                return Err(Error::Validation(format!(
                    "A mailbox may have at most {} annotations",
                    MAX_ANNOTATIONS
                )));
            }

            *mailbox.annotations_mut() = annotations.clone();
            *stored.annotations_mut() = annotations;
            Ok(())
        })
    }
}

impl MessageMapper for MemoryStore {
    fn add(
        &self,
        mailbox: &Mailbox,
        message: NewMessage,
    ) -> Result<MessageMetaData, Error> {
        let body_start = body_start_offset(&message.content);
        self.write(|state| {
            state.insert_message(
                mailbox,
                Arc::new(message.content),
                body_start,
                message.internal_date,
                message.flags,
            )
        })
    }

    fn copy_to(
        &self,
        target: &Mailbox,
        source: MailboxId,
        uid: MessageUid,
    ) -> Result<MessageMetaData, Error> {
        self.write(|state| {
            let original = state
                .messages
                .get(&source)
                .ok_or(Error::NxMailbox)?
                .messages
                .get(&uid)
                .cloned()
                .ok_or(Error::NxMessage)?;

            state.insert_message(
                target,
                original.content,
                original.body_start,
                original.metadata.internal_date,
                original.metadata.flags,
            )
        })
    }

    fn move_to(
        &self,
        target: &Mailbox,
        source: MailboxId,
        uid: MessageUid,
    ) -> Result<MovedMessage, Error> {
        self.write(|state| {
            // Validate the target before touching the source, since nothing
            // here is rolled back outside a transaction.
            state.messages(target)?;
            let original = state.remove_message(source, uid)?;
            let target = state.insert_message(
                target,
                original.content,
                original.body_start,
                original.metadata.internal_date,
                original.metadata.flags.clone(),
            )?;

            Ok(MovedMessage {
                source: original.metadata,
                target,
            })
        })
    }

    fn delete(
        &self,
        mailbox: &Mailbox,
        uid: MessageUid,
    ) -> Result<MessageMetaData, Error> {
        let id = require_id(mailbox)?;
        self.write(|state| Ok(state.remove_message(id, uid)?.metadata))
    }

    fn update_flags(
        &self,
        mailbox: &Mailbox,
        update: &FlagsUpdate,
        range: MessageRange,
    ) -> Result<Vec<UpdatedFlags>, Error> {
        self.write(|state| {
            let messages = state.messages_mut(mailbox)?;
            let changes = messages
                .range(range)
                .filter_map(|(&uid, stored)| {
                    let new_flags = update.apply(&stored.metadata.flags);
                    if new_flags == stored.metadata.flags {
                        None
                    } else {
                        Some((uid, stored.metadata.flags.clone(), new_flags))
                    }
                })
                .collect::<Vec<_>>();

            let mut updated = Vec::with_capacity(changes.len());
            for (uid, old_flags, new_flags) in changes {
                let modseq = messages.next_modseq()?;
                if let Some(stored) = messages.messages.get_mut(&uid) {
                    stored.metadata.flags = new_flags.clone();
                    stored.metadata.modseq = modseq;
                }
                updated.push(UpdatedFlags {
                    uid,
                    modseq,
                    old_flags,
                    new_flags,
                });
            }

            Ok(updated)
        })
    }

    fn expunge_marked_for_deletion(
        &self,
        mailbox: &Mailbox,
        range: MessageRange,
    ) -> Result<BTreeMap<MessageUid, MessageMetaData>, Error> {
        let id = require_id(mailbox)?;
        self.write(|state| {
            let doomed = state
                .messages(mailbox)?
                .range(range)
                .filter(|(_, stored)| stored.metadata.flags.is_deleted())
                .map(|(&uid, _)| uid)
                .collect::<Vec<_>>();

            let mut expunged = BTreeMap::new();
            for uid in doomed {
                let stored = state.remove_message(id, uid)?;
                expunged.insert(uid, stored.metadata);
            }
            Ok(expunged)
        })
    }

    fn list_uids(&self, mailbox: &Mailbox) -> Result<Vec<MessageUid>, Error> {
        self.read(|state| {
            Ok(state.messages(mailbox)?.messages.keys().copied().collect())
        })
    }

    fn count_messages(&self, mailbox: &Mailbox) -> Result<u64, Error> {
        self.read(|state| Ok(state.messages(mailbox)?.messages.len() as u64))
    }

    fn count_unseen(&self, mailbox: &Mailbox) -> Result<u64, Error> {
        self.read(|state| {
            Ok(state
                .messages(mailbox)?
                .messages
                .values()
                .filter(|m| !m.metadata.flags.is_seen())
                .count() as u64)
        })
    }

    fn find_first_unseen(
        &self,
        mailbox: &Mailbox,
    ) -> Result<Option<MessageUid>, Error> {
        self.read(|state| {
            Ok(state
                .messages(mailbox)?
                .messages
                .values()
                .find(|m| !m.metadata.flags.is_seen())
                .map(|m| m.metadata.uid))
        })
    }

    fn find_recent(&self, mailbox: &Mailbox) -> Result<Vec<MessageUid>, Error> {
        self.read(|state| {
            Ok(state
                .messages(mailbox)?
                .messages
                .values()
                .filter(|m| m.metadata.flags.recent)
                .map(|m| m.metadata.uid)
                .collect())
        })
    }

    fn reset_recent(
        &self,
        mailbox: &Mailbox,
    ) -> Result<Vec<MessageUid>, Error> {
        self.write(|state| {
            let mut reset = Vec::new();
            for stored in state.messages_mut(mailbox)?.messages.values_mut() {
                if stored.metadata.flags.recent {
                    stored.metadata.flags.recent = false;
                    reset.push(stored.metadata.uid);
                }
            }
            Ok(reset)
        })
    }

    fn find_in_mailbox(
        &self,
        mailbox: &Mailbox,
        range: MessageRange,
        fetch_type: FetchType,
        limit: Option<usize>,
    ) -> Result<Vec<MailboxMessage>, Error> {
        let mailbox_id = require_id(mailbox)?;
        self.read(|state| {
            Ok(state
                .messages(mailbox)?
                .range(range)
                .take(limit.unwrap_or(usize::MAX))
                .map(|(_, stored)| MailboxMessage {
                    mailbox_id,
                    metadata: stored.metadata.clone(),
                    headers: if fetch_type.includes_headers() {
                        Some(stored.content[..stored.body_start].to_vec())
                    } else {
                        None
                    },
                    body: if fetch_type.includes_body() {
                        Some(stored.content[stored.body_start..].to_vec())
                    } else {
                        None
                    },
                })
                .collect())
        })
    }

    fn last_uid(&self, mailbox: &Mailbox) -> Result<Option<MessageUid>, Error> {
        self.read(|state| Ok(state.messages(mailbox)?.last_uid))
    }

    fn highest_modseq(&self, mailbox: &Mailbox) -> Result<ModSeq, Error> {
        self.read(|state| Ok(state.messages(mailbox)?.highest_modseq))
    }
}
