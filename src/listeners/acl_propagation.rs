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

use std::sync::Arc;

use log::{info, warn};

use crate::events::*;
use crate::mapper::MailboxMapper;
use crate::model::*;
use crate::support::error::Error;

/// Grants `Lookup` on every ancestor of a mailbox to whoever has `Lookup` on
/// the mailbox itself, so that shared mailboxes stay reachable through
/// hierarchical listing.
///
/// Only positive entries are propagated. Nothing but `Lookup` is ever added
/// to an ancestor, and nothing is ever removed.
pub struct AclPropagationListener {
    mapper: Arc<dyn MailboxMapper>,
    delimiter: char,
}

impl AclPropagationListener {
    pub fn new(mapper: Arc<dyn MailboxMapper>, delimiter: char) -> Self {
        AclPropagationListener { mapper, delimiter }
    }

    fn propagate(
        &self,
        event: &Event,
        mailbox_id: MailboxId,
        entries: impl FnOnce(&Mailbox) -> Vec<AclEntry>,
    ) -> Result<(), Error> {
        let mailbox = match self.mapper.find_by_id(mailbox_id) {
            Ok(mailbox) => mailbox,
            Err(e) if e.is_not_found() => {
                warn!(
                    "{} {} vanished before ACL propagation",
                    event.session(),
                    mailbox_id
                );
                return Ok(());
            },
            Err(e) => return Err(e),
        };

        let keys = entries(&mailbox)
            .into_iter()
            .filter(|e| !e.key.negative && e.rights.contains(Rights::LOOKUP))
            .map(|e| e.key)
            .collect::<Vec<_>>();
        if keys.is_empty() {
            return Ok(());
        }

        let mut first_error = None;
        for ancestor_path in mailbox.path.ancestors(self.delimiter) {
            if let Err(e) = self.grant_lookup(event, &ancestor_path, &keys) {
                warn!(
                    "{} Failed to propagate ACL to {}: {}",
                    event.session(),
                    ancestor_path,
                    e
                );
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    fn grant_lookup(
        &self,
        event: &Event,
        path: &MailboxPath,
        keys: &[EntryKey],
    ) -> Result<(), Error> {
        let mut ancestor = match self.mapper.find_by_path(path) {
            Ok(ancestor) => ancestor,
            Err(e) if e.is_not_found() => {
                warn!(
                    "{} Skipping ACL propagation to missing {}",
                    event.session(),
                    path
                );
                return Ok(());
            },
            Err(e) => return Err(e),
        };

        for key in keys {
            if ancestor.acl().get(key).contains(Rights::LOOKUP) {
                continue;
            }

            info!(
                "{} Granting lookup on {} to {}",
                event.session(),
                path,
                key
            );
            let command =
                AclCommand::new(key.clone(), EditMode::Add, Rights::LOOKUP);
            match self.mapper.update_acl(&mut ancestor, &command) {
                Ok(_) => (),
                Err(e) if e.is_not_found() => {
                    warn!(
                        "{} {} vanished during ACL propagation",
                        event.session(),
                        path
                    );
                    return Ok(());
                },
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }
}

impl MailboxListener for AclPropagationListener {
    fn listener_type(&self) -> ListenerType {
        ListenerType::Once
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Asynchronous
    }

    fn event(&self, event: &Event) -> Result<(), Error> {
        match *event.kind() {
            EventKind::MailboxAclUpdated {
                mailbox_id,
                ref diff,
                ..
            } => self.propagate(event, mailbox_id, |_| {
                let mut entries = diff.added_entries();
                entries.extend(diff.changed_entries());
                entries
            }),
            EventKind::MailboxRenamed { .. } => {
                self.propagate(event, event.mailbox_id(), |mailbox| {
                    mailbox
                        .acl()
                        .entries()
                        .map(|(key, rights)| AclEntry {
                            key: key.clone(),
                            rights,
                        })
                        .collect()
                })
            },
            _ => Ok(()),
        }
    }
}
