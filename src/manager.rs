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

//! The mutating front door of the core.
//!
//! `MailboxManager` is the only thing which builds events. Every mutation
//! runs in one transaction against the mappers; the events describing it
//! are collected while it runs and dispatched only once it has committed,
//! in the order the changes were made.
//!
//! The mailbox and message mappers given to a manager must share one
//! transaction domain (for example, both being the same `MemoryStore`),
//! since transactions are opened on the mailbox mapper only.
//!
//! Managers which share a backend act as the nodes of one deployment by
//! also sharing an `EventBus`. A mutation holds the bus's publication
//! sequence from the start of its transaction until its events have been
//! handed to every node. Listeners thus see the events of any one mailbox
//! in commit order, but neither a synchronous nor an asynchronous listener
//! may wait on a mutation running on another thread.

use std::sync::Arc;

use log::info;

use crate::events::*;
use crate::listeners::{AclPropagationListener, QuotaUpdater};
use crate::mapper::cache::CachingMailboxMapper;
use crate::mapper::memory::MemoryStore;
use crate::mapper::*;
use crate::model::*;
use crate::quota::{CurrentQuotaManager, QuotaRootResolver};
use crate::support::error::Error;
use crate::support::system_config::CoreConfig;
use crate::support::threading::WorkQueue;

pub struct MailboxManager {
    delimiter: char,
    namespace: String,
    mailboxes: Arc<dyn MailboxMapper>,
    messages: Arc<dyn MessageMapper>,
    dispatcher: Arc<EventDispatcher>,
}

impl MailboxManager {
    /// Set up a manager over the given mappers.
    ///
    /// The manager becomes a new node of `bus`: it sees the events of every
    /// other node of the bus, and they see its events.
    pub fn new(
        config: &CoreConfig,
        mailboxes: Arc<dyn MailboxMapper>,
        messages: Arc<dyn MessageMapper>,
        bus: &Arc<EventBus>,
    ) -> Result<Self, Error> {
        config.validate()?;

        let registry = Arc::new(ListenerRegistry::new());
        let mailboxes = if config.cache.enabled {
            let cache = Arc::new(CachingMailboxMapper::new(
                mailboxes,
                config.cache.max_entries,
            ));
            registry.add_global(Arc::clone(&cache) as ListenerRef);
            cache as Arc<dyn MailboxMapper>
        } else {
            mailboxes
        };

        let queue = WorkQueue::new(
            "events",
            config.events.async_workers,
            config.events.async_queue_size,
        );

        Ok(MailboxManager {
            delimiter: config.mailbox.delimiter,
            namespace: config.mailbox.default_namespace.clone(),
            mailboxes,
            messages,
            dispatcher: EventDispatcher::attach(bus, registry, queue),
        })
    }

    /// Set up a manager backed by a fresh `MemoryStore`.
    pub fn in_memory(config: &CoreConfig) -> Result<Self, Error> {
        let store = Arc::new(MemoryStore::new());
        Self::new(
            config,
            Arc::clone(&store) as Arc<dyn MailboxMapper>,
            store,
            &Arc::new(EventBus::new(config.events.once_ledger_size)),
        )
    }

    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    /// The path of the mailbox called `name` belonging to the user of
    /// `session`.
    pub fn path(&self, session: &MailboxSession, name: &str) -> MailboxPath {
        MailboxPath::new(&self.namespace, session.user(), name)
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        self.dispatcher.bus()
    }

    pub fn registry(&self) -> &Arc<ListenerRegistry> {
        self.dispatcher.registry()
    }

    pub fn register_listener(
        &self,
        mailbox: MailboxId,
        listener: ListenerRef,
    ) -> bool {
        self.registry().add_local(mailbox, listener)
    }

    pub fn register_global_listener(&self, listener: ListenerRef) -> bool {
        self.registry().add_global(listener)
    }

    /// Keep current quota usage in `quota` up to date.
    pub fn enable_quota(
        &self,
        resolver: Arc<dyn QuotaRootResolver>,
        quota: Arc<dyn CurrentQuotaManager>,
    ) {
        self.register_global_listener(Arc::new(QuotaUpdater::new(
            resolver, quota,
        )));
    }

    /// Propagate `Lookup` rights up the mailbox hierarchy.
    pub fn enable_acl_propagation(&self) {
        self.register_global_listener(Arc::new(AclPropagationListener::new(
            Arc::clone(&self.mailboxes),
            self.delimiter,
        )));
    }

    /// Run `work` in a transaction, then dispatch the events it produced.
    ///
    /// If dispatch to a synchronous listener fails, the remaining events
    /// are still dispatched and the first failure is returned.
    fn mutate<T>(
        &self,
        work: impl FnOnce(&mut Vec<Event>) -> Result<T, Error>,
    ) -> Result<T, Error> {
        self.bus().sequenced(|| {
            let mut events = Vec::new();
            let result =
                run_in_transaction(&*self.mailboxes, || work(&mut events))?;

            let mut first_error = None;
            for event in events {
                if let Err(e) = self.dispatcher.dispatch(event) {
                    first_error.get_or_insert(e);
                }
            }

            match first_error {
                None => Ok(result),
                Some(e) => Err(e),
            }
        })
    }

    fn validate_name(&self, path: &MailboxPath) -> Result<(), Error> {
        let delim = self.delimiter;
        let double = format!("{}{}", delim, delim);
        if path.name.is_empty()
            || path.name.starts_with(delim)
            || path.name.ends_with(delim)
            || path.name.contains(&double)
            || path.name.contains(|c: char| '%' == c || '*' == c)
            || path.name.chars().any(char::is_control)
        {
            Err(Error::UnsafeName)
        } else {
            Ok(())
        }
    }

    pub fn get_mailbox(
        &self,
        _session: &MailboxSession,
        path: &MailboxPath,
    ) -> Result<Mailbox, Error> {
        self.mailboxes.find_by_path(path)
    }

    /// List the mailboxes matching `pattern`, where `%` in the name matches
    /// any run of characters.
    pub fn list_mailboxes(
        &self,
        _session: &MailboxSession,
        pattern: &MailboxPath,
    ) -> Result<Vec<Mailbox>, Error> {
        let mut found = self.mailboxes.find_by_path_pattern(pattern)?;
        found.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(found)
    }

    pub fn has_children(
        &self,
        _session: &MailboxSession,
        path: &MailboxPath,
    ) -> Result<bool, Error> {
        let mailbox = self.mailboxes.find_by_path(path)?;
        self.mailboxes.has_children(&mailbox, self.delimiter)
    }

    /// Create `path`, along with any of its ancestors which don't exist yet.
    pub fn create_mailbox(
        &self,
        session: &MailboxSession,
        path: &MailboxPath,
    ) -> Result<MailboxId, Error> {
        self.validate_name(path)?;

        let id = self.mutate(|events| {
            match self.mailboxes.find_by_path(path) {
                Ok(_) => return Err(Error::MailboxExists),
                Err(e) if e.is_not_found() => (),
                Err(e) => return Err(e),
            }

            for ancestor in path.ancestors(self.delimiter) {
                self.create_if_missing(session, &ancestor, events)?;
            }

            let mut mailbox =
                Mailbox::new(path.clone(), generate_uid_validity());
            let id = self.mailboxes.save(&mut mailbox)?;
            events.push(Event::mailbox_added(session, &mailbox)?);
            Ok(id)
        })?;

        info!("{} Created {}", session, path);
        Ok(id)
    }

    fn create_if_missing(
        &self,
        session: &MailboxSession,
        path: &MailboxPath,
        events: &mut Vec<Event>,
    ) -> Result<(), Error> {
        match self.mailboxes.find_by_path(path) {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                let mut mailbox =
                    Mailbox::new(path.clone(), generate_uid_validity());
                self.mailboxes.save(&mut mailbox)?;
                events.push(Event::mailbox_added(session, &mailbox)?);
                Ok(())
            },
            Err(e) => Err(e),
        }
    }

    /// Delete `path` and every message in it.
    ///
    /// Children of `path` are left alone. Listeners registered for the
    /// mailbox are dropped once they have seen its deletion.
    pub fn delete_mailbox(
        &self,
        session: &MailboxSession,
        path: &MailboxPath,
    ) -> Result<(), Error> {
        self.mutate(|events| {
            let mailbox = self.mailboxes.find_by_path(path)?;

            let mut expunged = Vec::new();
            for uid in self.messages.list_uids(&mailbox)? {
                expunged.push(MessageMapper::delete(
                    &*self.messages,
                    &mailbox,
                    uid,
                )?);
            }
            MailboxMapper::delete(&*self.mailboxes, &mailbox)?;

            if !expunged.is_empty() {
                events.push(Event::expunged(session, &mailbox, expunged)?);
            }
            events.push(Event::mailbox_deletion(session, &mailbox)?);
            Ok(())
        })?;

        info!("{} Deleted {}", session, path);
        Ok(())
    }

    /// Rename `from` to `to`, moving all descendants of `from` along with
    /// it. Missing ancestors of `to` are created.
    pub fn rename_mailbox(
        &self,
        session: &MailboxSession,
        from: &MailboxPath,
        to: &MailboxPath,
    ) -> Result<(), Error> {
        self.validate_name(to)?;
        if to == from || to.is_child_of(from, self.delimiter) {
            return Err(Error::Validation(format!(
                "Cannot rename {} to {}",
                from, to
            )));
        }

        self.mutate(|events| {
            match self.mailboxes.find_by_path(to) {
                Ok(_) => return Err(Error::MailboxExists),
                Err(e) if e.is_not_found() => (),
                Err(e) => return Err(e),
            }

            let root = self.mailboxes.find_by_path(from)?;
            let descendants_pattern =
                from.with_name(&format!("{}{}%", from.name, self.delimiter));
            let mut descendants = self
                .mailboxes
                .find_by_path_pattern(&descendants_pattern)?
                .into_iter()
                .filter(|m| m.path.is_child_of(from, self.delimiter))
                .collect::<Vec<_>>();
            descendants.sort_by(|a, b| a.path.cmp(&b.path));

            for ancestor in to.ancestors(self.delimiter) {
                self.create_if_missing(session, &ancestor, events)?;
            }

            for mut mailbox in std::iter::once(root).chain(descendants) {
                let old_path = mailbox.path.clone();
                mailbox.path = old_path.renamed_under(from, to).ok_or_else(
                    || {
                        Error::IllegalState(format!(
                            "{} is not under {}",
                            old_path, from
                        ))
                    },
                )?;
                self.mailboxes.save(&mut mailbox)?;
                events.push(Event::mailbox_renamed(
                    session, &old_path, &mailbox,
                )?);
            }

            Ok(())
        })?;

        info!("{} Renamed {} to {}", session, from, to);
        Ok(())
    }

    pub fn append_message(
        &self,
        session: &MailboxSession,
        path: &MailboxPath,
        message: NewMessage,
    ) -> Result<MessageMetaData, Error> {
        self.mutate(|events| {
            let mailbox = self.mailboxes.find_by_path(path)?;
            let added = self.messages.add(&mailbox, message)?;
            events.push(Event::added(session, &mailbox, vec![added.clone()])?);
            Ok(added)
        })
    }

    pub fn fetch(
        &self,
        _session: &MailboxSession,
        path: &MailboxPath,
        range: MessageRange,
        fetch_type: FetchType,
        limit: Option<usize>,
    ) -> Result<Vec<MailboxMessage>, Error> {
        let mailbox = self.mailboxes.find_by_path(path)?;
        self.messages
            .find_in_mailbox(&mailbox, range, fetch_type, limit)
    }

    pub fn set_flags(
        &self,
        session: &MailboxSession,
        path: &MailboxPath,
        update: &FlagsUpdate,
        range: MessageRange,
    ) -> Result<Vec<UpdatedFlags>, Error> {
        self.mutate(|events| {
            let mailbox = self.mailboxes.find_by_path(path)?;
            let updated =
                self.messages.update_flags(&mailbox, update, range)?;
            events.push(Event::flags_updated(
                session,
                &mailbox,
                updated.clone(),
            )?);
            Ok(updated)
        })
    }

    /// Remove the messages in `range` which are marked `\Deleted`.
    pub fn expunge(
        &self,
        session: &MailboxSession,
        path: &MailboxPath,
        range: MessageRange,
    ) -> Result<Vec<MessageUid>, Error> {
        self.mutate(|events| {
            let mailbox = self.mailboxes.find_by_path(path)?;
            let expunged = self
                .messages
                .expunge_marked_for_deletion(&mailbox, range)?;
            let uids = expunged.keys().copied().collect();
            events.push(Event::expunged(
                session,
                &mailbox,
                expunged.into_iter().map(|(_, m)| m).collect(),
            )?);
            Ok(uids)
        })
    }

    fn source_uids(
        &self,
        source: &Mailbox,
        range: MessageRange,
    ) -> Result<Vec<MessageUid>, Error> {
        Ok(self
            .messages
            .list_uids(source)?
            .into_iter()
            .filter(|&uid| range.contains(uid))
            .collect())
    }

    /// Copy the messages in `range` of `from` into `to`, returning the new
    /// messages.
    pub fn copy_messages(
        &self,
        session: &MailboxSession,
        from: &MailboxPath,
        to: &MailboxPath,
        range: MessageRange,
    ) -> Result<Vec<MessageMetaData>, Error> {
        self.mutate(|events| {
            let source = self.mailboxes.find_by_path(from)?;
            let target = self.mailboxes.find_by_path(to)?;
            let source_id = require_id(&source)?;

            let mut copied = Vec::new();
            for uid in self.source_uids(&source, range)? {
                copied.push(self.messages.copy_to(&target, source_id, uid)?);
            }

            events.push(Event::added(session, &target, copied.clone())?);
            Ok(copied)
        })
    }

    /// Move the messages in `range` of `from` into `to`.
    pub fn move_messages(
        &self,
        session: &MailboxSession,
        from: &MailboxPath,
        to: &MailboxPath,
        range: MessageRange,
    ) -> Result<Vec<MovedMessage>, Error> {
        self.mutate(|events| {
            let source = self.mailboxes.find_by_path(from)?;
            let target = self.mailboxes.find_by_path(to)?;
            let source_id = require_id(&source)?;

            let mut moved = Vec::new();
            for uid in self.source_uids(&source, range)? {
                moved.push(self.messages.move_to(&target, source_id, uid)?);
            }

            events.push(Event::added(
                session,
                &target,
                moved.iter().map(|m| m.target.clone()).collect(),
            )?);
            events.push(Event::expunged(
                session,
                &source,
                moved.iter().map(|m| m.source.clone()).collect(),
            )?);
            Ok(moved)
        })
    }

    /// Apply an ACL command to `path`, returning what changed.
    pub fn apply_rights_command(
        &self,
        session: &MailboxSession,
        path: &MailboxPath,
        command: &AclCommand,
    ) -> Result<AclDiff, Error> {
        self.mutate(|events| {
            let mut mailbox = self.mailboxes.find_by_path(path)?;
            let diff = self.mailboxes.update_acl(&mut mailbox, command)?;
            if !diff.is_empty() {
                events.push(Event::acl_updated(
                    session,
                    &mailbox,
                    diff.clone(),
                )?);
            }
            Ok(diff)
        })
    }

    pub fn set_annotations(
        &self,
        _session: &MailboxSession,
        path: &MailboxPath,
        annotations: Vec<MailboxAnnotation>,
    ) -> Result<(), Error> {
        let command = AnnotationCommand::new(annotations);
        command.validate()?;
        run_in_transaction(&*self.mailboxes, || {
            let mut mailbox = self.mailboxes.find_by_path(path)?;
            self.mailboxes.set_annotations(&mut mailbox, &command)
        })
    }

    /// Read the annotations of `path` selected by `keys` at `depth`.
    ///
    /// If `keys` is empty, every annotation is returned.
    pub fn get_annotations(
        &self,
        _session: &MailboxSession,
        path: &MailboxPath,
        keys: &[AnnotationKey],
        depth: AnnotationDepth,
    ) -> Result<Vec<MailboxAnnotation>, Error> {
        let mailbox = self.mailboxes.find_by_path(path)?;
        if keys.is_empty() {
            self.mailboxes.get_all_annotations(&mailbox)
        } else {
            self.mailboxes
                .get_annotations_by_keys_with_depth(&mailbox, keys, depth)
        }
    }

    /// Block until the asynchronous listeners of every node of the bus have
    /// caught up.
    pub fn wait_idle(&self) {
        self.bus().wait_idle();
    }

    /// The number of asynchronous listener invocations on this node which
    /// have failed.
    pub fn listener_failures(&self) -> u64 {
        self.dispatcher.failures()
    }

    /// Let asynchronous listeners finish and stop their workers.
    pub fn shutdown(&mut self) {
        self.dispatcher.shutdown();
    }
}
