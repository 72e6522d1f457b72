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

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::events::*;
use crate::model::{MailboxId, MailboxPath};
use crate::support::error::Error;

/// What a reindexer should do with a mailbox it enumerated earlier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathToIndex {
    /// The mailbox no longer exists; skip it.
    Deleted,
    /// The mailbox now lives at this path.
    Renamed(MailboxPath),
    /// Nothing happened to the mailbox.
    Unchanged,
}

#[derive(Default)]
struct Drift {
    deleted: HashSet<MailboxId>,
    renamed: HashMap<MailboxId, MailboxPath>,
}

/// Tracks mailboxes deleted or renamed while a long reindexing run is in
/// progress.
///
/// One tracker is registered for the duration of one run.
#[derive(Default)]
pub struct ReindexingTracker {
    drift: Mutex<Drift>,
}

impl ReindexingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deletion wins over any rename, in whatever order they were seen.
    pub fn path_to_index(&self, id: MailboxId) -> PathToIndex {
        let drift = self.drift.lock().unwrap();
        if drift.deleted.contains(&id) {
            PathToIndex::Deleted
        } else if let Some(path) = drift.renamed.get(&id) {
            PathToIndex::Renamed(path.clone())
        } else {
            PathToIndex::Unchanged
        }
    }
}

impl MailboxListener for ReindexingTracker {
    fn listener_type(&self) -> ListenerType {
        ListenerType::EachNode
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Synchronous
    }

    fn event(&self, event: &Event) -> Result<(), Error> {
        match *event.kind() {
            EventKind::MailboxDeletion { .. } => {
                self.drift.lock().unwrap().deleted.insert(event.mailbox_id());
            },
            EventKind::MailboxRenamed { ref mailbox, .. } => {
                self.drift
                    .lock()
                    .unwrap()
                    .renamed
                    .insert(event.mailbox_id(), mailbox.path.clone());
            },
            _ => (),
        }

        Ok(())
    }
}
