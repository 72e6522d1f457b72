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

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use log::{debug, error};

use super::bus::EventBus;
use super::listener::*;
use super::registry::ListenerRegistry;
use super::{Event, EventId, EventKind};
use crate::support::error::Error;
use crate::support::threading::WorkQueue;

/// Records which `Once` listeners have already been given which events.
///
/// The ledger only remembers the most recent `capacity` deliveries; events
/// are expected to reach every node well before that many others have.
pub struct OnceLedger {
    capacity: usize,
    state: Mutex<LedgerState>,
}

#[derive(Default)]
struct LedgerState {
    seen: HashSet<(EventId, String)>,
    order: VecDeque<(EventId, String)>,
}

impl OnceLedger {
    pub fn new(capacity: usize) -> Self {
        OnceLedger {
            capacity: capacity.max(1),
            state: Mutex::new(LedgerState::default()),
        }
    }

    /// Claim the delivery of `event` to the listener called `listener`.
    ///
    /// Returns `true` exactly once per pair; the caller that gets `true`
    /// must perform the delivery.
    pub fn claim(&self, event: EventId, listener: &str) -> bool {
        let key = (event, listener.to_owned());
        let mut state = self.state.lock().unwrap();
        if state.seen.contains(&key) {
            return false;
        }

        if state.order.len() >= self.capacity {
            if let Some(oldest) = state.order.pop_front() {
                state.seen.remove(&oldest);
            }
        }

        state.seen.insert(key.clone());
        state.order.push_back(key);
        true
    }
}

/// One node's end of an `EventBus`: its listeners and the workers which run
/// the asynchronous ones.
///
/// Listeners are invoked in registry order (global, then local). Synchronous
/// listeners run on the publishing thread. Asynchronous ones are handed to
/// the work queue keyed by mailbox, so that they see the events of any one
/// mailbox in the order they were published.
pub struct EventDispatcher {
    bus: Arc<EventBus>,
    registry: Arc<ListenerRegistry>,
    queue: WorkQueue,
}

impl EventDispatcher {
    /// Create a dispatcher and attach it to `bus` as a new node.
    pub fn attach(
        bus: &Arc<EventBus>,
        registry: Arc<ListenerRegistry>,
        queue: WorkQueue,
    ) -> Arc<Self> {
        let dispatcher = Arc::new(EventDispatcher {
            bus: Arc::clone(bus),
            registry,
            queue,
        });
        bus.attach(&dispatcher);
        dispatcher
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn registry(&self) -> &Arc<ListenerRegistry> {
        &self.registry
    }

    /// Publish `event` on the bus, delivering it here first and then on
    /// every other node.
    ///
    /// Every synchronous listener of this node runs even if an earlier one
    /// fails; the first failure is returned once they all have. Failures on
    /// other nodes and asynchronous failures never reach the caller.
    pub fn dispatch(&self, event: Event) -> Result<(), Error> {
        self.bus.publish(self, event)
    }

    /// Deliver `event` to the listeners of this node.
    pub(super) fn deliver(&self, event: &Arc<Event>) -> Result<(), Error> {
        let mut first_error = None;

        debug!("{} Delivering {}", event.session(), event);
        for listener in self.registry.listeners_for(event.mailbox_id()) {
            if ListenerType::Once == listener.listener_type()
                && !self.bus.ledger().claim(event.id(), &listener.name())
            {
                continue;
            }

            match listener.execution_mode() {
                ExecutionMode::Synchronous => {
                    if let Err(e) = listener.event(event) {
                        error!(
                            "{} {} failed to handle {}: {}",
                            event.session(),
                            listener.name(),
                            event,
                            e
                        );
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                    }
                },

                ExecutionMode::Asynchronous => {
                    let label = format!(
                        "{} {} handling {}",
                        event.session(),
                        listener.name(),
                        event
                    );
                    let event = Arc::clone(event);
                    self.queue.submit(
                        event.mailbox_id().0,
                        label,
                        move || listener.event(&event),
                    );
                },
            }
        }

        // The deletion was the last event the local listeners could get.
        if let EventKind::MailboxDeletion { .. } = *event.kind() {
            self.registry.delete_registry_for(event.mailbox_id());
        }

        match first_error {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    /// The number of asynchronous deliveries not yet finished.
    pub fn pending(&self) -> usize {
        self.queue.pending()
    }

    /// The number of asynchronous deliveries which have failed.
    pub fn failures(&self) -> u64 {
        self.queue.failures()
    }

    /// Block until all asynchronous deliveries so far have finished.
    pub fn wait_idle(&self) {
        self.queue.wait_idle();
    }

    /// Finish all asynchronous deliveries and stop the workers.
    pub fn shutdown(&self) {
        self.queue.shutdown();
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::events::ListenerRef;
    use crate::model::*;

    struct Recorder {
        kind: ListenerType,
        mode: ExecutionMode,
        name: String,
        fail: bool,
        log: Arc<Mutex<Vec<String>>>,
        calls: AtomicUsize,
    }

    impl Recorder {
        fn new(
            name: &str,
            kind: ListenerType,
            mode: ExecutionMode,
            log: &Arc<Mutex<Vec<String>>>,
        ) -> Arc<Self> {
            Arc::new(Recorder {
                kind,
                mode,
                name: name.to_owned(),
                fail: false,
                log: Arc::clone(log),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(
            name: &str,
            mode: ExecutionMode,
            log: &Arc<Mutex<Vec<String>>>,
        ) -> Arc<Self> {
            Arc::new(Recorder {
                kind: ListenerType::EachNode,
                mode,
                name: name.to_owned(),
                fail: true,
                log: Arc::clone(log),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl MailboxListener for Recorder {
        fn listener_type(&self) -> ListenerType {
            self.kind
        }

        fn execution_mode(&self) -> ExecutionMode {
            self.mode
        }

        fn name(&self) -> String {
            self.name.clone()
        }

        fn event(&self, _: &Event) -> Result<(), Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.log.lock().unwrap().push(self.name.clone());
            if self.fail {
                Err(Error::TransientStore(format!("{} is down", self.name)))
            } else {
                Ok(())
            }
        }
    }

    fn dispatcher(
        bus: &Arc<EventBus>,
        workers: usize,
    ) -> Arc<EventDispatcher> {
        EventDispatcher::attach(
            bus,
            Arc::new(ListenerRegistry::new()),
            WorkQueue::new("events", workers, 16),
        )
    }

    fn bus() -> Arc<EventBus> {
        Arc::new(EventBus::new(16))
    }

    fn mailbox(id: u64) -> Mailbox {
        let mut mailbox =
            Mailbox::new(MailboxPath::for_user("azure", "INBOX"), 1);
        mailbox.assign_id(MailboxId(id));
        mailbox
    }

    fn event(id: u64) -> Event {
        Event::added(&MailboxSession::new("azure", '.'), &mailbox(id), vec![])
            .unwrap()
    }

    fn as_ref(r: &Arc<Recorder>) -> ListenerRef {
        Arc::clone(r) as ListenerRef
    }

    #[test]
    fn global_then_local_in_registration_order() {
        crate::init_test_log();
        let log = Arc::new(Mutex::new(Vec::new()));
        let d = dispatcher(&bus(), 2);

        let sync = ExecutionMode::Synchronous;
        let each = ListenerType::EachNode;
        let r = |name: &str| as_ref(&Recorder::new(name, each, sync, &log));
        let registry = d.registry();
        registry.add_local(MailboxId(1), r("l1"));
        registry.add_global(r("g1"));
        registry.add_local(MailboxId(1), r("l2"));
        registry.add_global(r("g2"));
        registry.add_local(MailboxId(2), r("other"));

        d.dispatch(event(1)).unwrap();
        assert_eq!(vec!["g1", "g2", "l1", "l2"], *log.lock().unwrap());
    }

    #[test]
    fn double_registration_delivers_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let d = dispatcher(&bus(), 2);
        let r = Recorder::new(
            "r",
            ListenerType::EachNode,
            ExecutionMode::Synchronous,
            &log,
        );
        d.registry().add_local(MailboxId(1), as_ref(&r));
        d.registry().add_local(MailboxId(1), as_ref(&r));

        d.dispatch(event(1)).unwrap();
        assert_eq!(1, r.calls());
    }

    #[test]
    fn sync_failure_propagates_after_all_sync_listeners_ran() {
        crate::init_test_log();
        let log = Arc::new(Mutex::new(Vec::new()));
        let d = dispatcher(&bus(), 2);
        let bad = Recorder::failing("bad", ExecutionMode::Synchronous, &log);
        let good = Recorder::new(
            "good",
            ListenerType::EachNode,
            ExecutionMode::Synchronous,
            &log,
        );
        d.registry().add_global(as_ref(&bad));
        d.registry().add_global(as_ref(&good));

        assert_matches!(Err(Error::TransientStore(_)), d.dispatch(event(1)));
        assert_eq!(1, good.calls());
    }

    #[test]
    fn async_failure_is_isolated() {
        crate::init_test_log();
        let log = Arc::new(Mutex::new(Vec::new()));
        let d = dispatcher(&bus(), 2);
        let bad = Recorder::failing("bad", ExecutionMode::Asynchronous, &log);
        let good = Recorder::new(
            "good",
            ListenerType::EachNode,
            ExecutionMode::Asynchronous,
            &log,
        );
        d.registry().add_global(as_ref(&bad));
        d.registry().add_global(as_ref(&good));

        d.dispatch(event(1)).unwrap();
        d.dispatch(event(1)).unwrap();
        d.wait_idle();

        assert_eq!(2, bad.calls());
        assert_eq!(2, good.calls());
        assert_eq!(2, d.failures());
        assert_eq!(0, d.pending());
    }

    /// Records the ids of the events it sees, and dawdles over `Expunged`.
    struct SlowOnExpunge {
        seen: Mutex<Vec<(MailboxId, EventId)>>,
    }

    impl MailboxListener for SlowOnExpunge {
        fn listener_type(&self) -> ListenerType {
            ListenerType::EachNode
        }

        fn execution_mode(&self) -> ExecutionMode {
            ExecutionMode::Asynchronous
        }

        fn event(&self, event: &Event) -> Result<(), Error> {
            if let EventKind::Expunged { .. } = *event.kind() {
                thread::sleep(Duration::from_millis(100));
            }
            self.seen
                .lock()
                .unwrap()
                .push((event.mailbox_id(), event.id()));
            Ok(())
        }
    }

    #[test]
    fn async_delivery_per_mailbox_is_in_publication_order() {
        let d = dispatcher(&bus(), 3);
        let listener = Arc::new(SlowOnExpunge {
            seen: Mutex::new(Vec::new()),
        });
        d.registry().add_global(Arc::clone(&listener) as ListenerRef);

        let session = MailboxSession::new("azure", '.');
        let mut published = Vec::new();
        for round in 0..3 {
            for id in 1..=4 {
                let event = if 0 == round {
                    Event::expunged(&session, &mailbox(id), vec![]).unwrap()
                } else {
                    Event::added(&session, &mailbox(id), vec![]).unwrap()
                };
                published.push((MailboxId(id), event.id()));
                d.dispatch(event).unwrap();
            }
        }
        d.wait_idle();

        let seen = listener.seen.lock().unwrap();
        assert_eq!(published.len(), seen.len());
        for id in 1..=4 {
            let of = |log: &[(MailboxId, EventId)]| {
                log.iter()
                    .filter(|&&(m, _)| MailboxId(id) == m)
                    .map(|&(_, e)| e)
                    .collect::<Vec<_>>()
            };
            assert_eq!(of(&published), of(&seen));
        }
    }

    #[test]
    fn deletion_drops_local_listeners_after_delivery() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let d = dispatcher(&bus(), 1);
        let r = Recorder::new(
            "r",
            ListenerType::EachNode,
            ExecutionMode::Synchronous,
            &log,
        );
        d.registry().add_local(MailboxId(1), as_ref(&r));

        d.dispatch(
            Event::mailbox_deletion(
                &MailboxSession::new("azure", '.'),
                &mailbox(1),
            )
            .unwrap(),
        )
        .unwrap();
        assert_eq!(1, r.calls());
        assert!(d.registry().local_listeners(MailboxId(1)).is_empty());
    }

    #[test]
    fn ledger_is_bounded() {
        let ledger = OnceLedger::new(2);
        let a = EventId::random();
        assert!(ledger.claim(a, "x"));
        assert!(!ledger.claim(a, "x"));
        assert!(ledger.claim(a, "y"));
        assert!(ledger.claim(EventId::random(), "x"));
        // The oldest claim has been forgotten
        assert!(ledger.claim(a, "x"));
    }

    #[test]
    fn shutdown_drains() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let d = dispatcher(&bus(), 2);
        let r = Recorder::new(
            "r",
            ListenerType::EachNode,
            ExecutionMode::Asynchronous,
            &log,
        );
        d.registry().add_global(as_ref(&r));
        for _ in 0..10 {
            d.dispatch(event(1)).unwrap();
        }

        d.shutdown();
        assert_eq!(10, r.calls());
    }
}
