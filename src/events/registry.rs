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

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::listener::MailboxListener;
use crate::model::MailboxId;

pub type ListenerRef = Arc<dyn MailboxListener>;

/// Whether `a` and `b` are the same listener instance.
fn same_listener(a: &ListenerRef, b: &ListenerRef) -> bool {
    // Compare the data pointers only; vtable pointers for the same type are
    // not guaranteed to be unique.
    Arc::as_ptr(a) as *const u8 == Arc::as_ptr(b) as *const u8
}

fn add_unique(listeners: &mut Vec<ListenerRef>, listener: ListenerRef) -> bool {
    if listeners.iter().any(|l| same_listener(l, &listener)) {
        false
    } else {
        listeners.push(listener);
        true
    }
}

fn remove(listeners: &mut Vec<ListenerRef>, listener: &ListenerRef) -> bool {
    let before = listeners.len();
    listeners.retain(|l| !same_listener(l, listener));
    listeners.len() != before
}

/// The set of listeners interested in events.
///
/// Global listeners see events for every mailbox; local listeners only those
/// for the mailbox they were registered with. Both are ordered sets in
/// registration order: adding a listener which is already present does
/// nothing. Removing something absent is likewise not an error.
///
/// Lookups return snapshots, so dispatching never holds a lock while running
/// listener code, and registration changes never block on dispatch.
#[derive(Default)]
pub struct ListenerRegistry {
    global: RwLock<Vec<ListenerRef>>,
    local: RwLock<HashMap<MailboxId, Vec<ListenerRef>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether the listener was newly added.
    pub fn add_global(&self, listener: ListenerRef) -> bool {
        add_unique(&mut self.global.write().unwrap(), listener)
    }

    /// Returns whether the listener was present.
    pub fn remove_global(&self, listener: &ListenerRef) -> bool {
        remove(&mut self.global.write().unwrap(), listener)
    }

    /// Returns whether the listener was newly added.
    pub fn add_local(&self, mailbox: MailboxId, listener: ListenerRef) -> bool {
        add_unique(
            self.local.write().unwrap().entry(mailbox).or_default(),
            listener,
        )
    }

    /// Returns whether the listener was present.
    pub fn remove_local(
        &self,
        mailbox: MailboxId,
        listener: &ListenerRef,
    ) -> bool {
        let mut local = self.local.write().unwrap();
        let (removed, now_empty) = match local.get_mut(&mailbox) {
            Some(listeners) => {
                (remove(listeners, listener), listeners.is_empty())
            },
            None => (false, false),
        };

        if now_empty {
            local.remove(&mailbox);
        }

        removed
    }

    /// Drop every local listener of `mailbox`.
    pub fn delete_registry_for(&self, mailbox: MailboxId) {
        self.local.write().unwrap().remove(&mailbox);
    }

    pub fn global_listeners(&self) -> Vec<ListenerRef> {
        self.global.read().unwrap().clone()
    }

    pub fn local_listeners(&self, mailbox: MailboxId) -> Vec<ListenerRef> {
        self.local
            .read()
            .unwrap()
            .get(&mailbox)
            .cloned()
            .unwrap_or_default()
    }

    /// Everything which should receive an event on `mailbox`, in delivery
    /// order: global listeners, then local ones.
    pub fn listeners_for(&self, mailbox: MailboxId) -> Vec<ListenerRef> {
        let mut listeners = self.global_listeners();
        listeners.extend(self.local_listeners(mailbox));
        listeners
    }
}
