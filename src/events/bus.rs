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

use std::ptr;
use std::sync::{Arc, Condvar, Mutex, RwLock, Weak};
use std::thread::{self, ThreadId};

use log::{debug, warn};

use super::dispatcher::{EventDispatcher, OnceLedger};
use super::Event;
use crate::support::error::Error;

/// Connects the dispatchers of every node of one deployment.
///
/// An event published through any node's dispatcher is delivered on every
/// attached node: `EachNode` listeners run once per node, while `Once`
/// listeners run on whichever node claims the event first in the shared
/// ledger. The publishing node always delivers first.
///
/// Publication is sequenced: while one thread is inside `sequenced` or
/// `publish`, no other thread can publish. Holding the sequence across a
/// commit and the publication of its events makes the order in which
/// listeners see the events of a mailbox the order of the commits.
pub struct EventBus {
    ledger: OnceLedger,
    nodes: RwLock<Vec<Weak<EventDispatcher>>>,
    gate: PublishGate,
}

impl EventBus {
    pub fn new(ledger_capacity: usize) -> Self {
        EventBus {
            ledger: OnceLedger::new(ledger_capacity),
            nodes: RwLock::new(Vec::new()),
            gate: PublishGate::default(),
        }
    }

    pub fn ledger(&self) -> &OnceLedger {
        &self.ledger
    }

    /// The number of nodes currently attached.
    pub fn node_count(&self) -> usize {
        self.live_nodes().len()
    }

    pub(super) fn attach(&self, node: &Arc<EventDispatcher>) {
        let mut nodes = self.nodes.write().unwrap();
        nodes.retain(|n| n.strong_count() > 0);
        nodes.push(Arc::downgrade(node));
    }

    fn live_nodes(&self) -> Vec<Arc<EventDispatcher>> {
        self.nodes
            .read()
            .unwrap()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Run `work` while holding the publication sequence.
    ///
    /// The sequence is reentrant: `work` may publish, or call `sequenced`
    /// again, on the same thread.
    pub fn sequenced<T>(&self, work: impl FnOnce() -> T) -> T {
        let _held = self.gate.enter();
        work()
    }

    pub(super) fn publish(
        &self,
        origin: &EventDispatcher,
        event: Event,
    ) -> Result<(), Error> {
        self.sequenced(|| {
            let event = Arc::new(event);
            debug!("{} Publishing {}", event.session(), event);

            let result = origin.deliver(&event);
            for node in self.live_nodes() {
                if ptr::eq(&*node, origin) {
                    continue;
                }

                if let Err(e) = node.deliver(&event) {
                    warn!(
                        "{} Delivery of {} failed on another node: {}",
                        event.session(),
                        event,
                        e
                    );
                }
            }

            result
        })
    }

    /// Block until every node has finished its asynchronous deliveries.
    pub fn wait_idle(&self) {
        for node in self.live_nodes() {
            node.wait_idle();
        }
    }
}

/// A reentrant lock with no data, owned by one thread at a time.
#[derive(Default)]
struct PublishGate {
    owner: Mutex<Option<(ThreadId, usize)>>,
    released: Condvar,
}

struct GateHold<'a>(&'a PublishGate);

impl PublishGate {
    fn enter(&self) -> GateHold<'_> {
        let me = thread::current().id();
        let mut owner = self.owner.lock().unwrap();
        loop {
            match *owner {
                None => {
                    *owner = Some((me, 1));
                    break;
                },
                Some((thread, depth)) if thread == me => {
                    *owner = Some((me, depth + 1));
                    break;
                },
                Some(_) => owner = self.released.wait(owner).unwrap(),
            }
        }

        GateHold(self)
    }
}

impl Drop for GateHold<'_> {
    fn drop(&mut self) {
        let mut owner = self.0.owner.lock().unwrap();
        match *owner {
            Some((thread, depth)) if depth > 1 => {
                *owner = Some((thread, depth - 1));
            },
            _ => {
                *owner = None;
                self.0.released.notify_all();
            },
        }
    }
}
