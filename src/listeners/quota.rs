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

use log::{debug, warn};

use crate::events::*;
use crate::model::MessageMetaData;
use crate::quota::{CurrentQuotaManager, QuotaRootResolver};
use crate::support::error::Error;

/// Maintains current quota usage from `Added` and `Expunged` events.
///
/// Usage is attributed to the quota root of the path the mailbox had when
/// the event was built, not whatever path it has by the time the event is
/// handled.
pub struct QuotaUpdater {
    resolver: Arc<dyn QuotaRootResolver>,
    manager: Arc<dyn CurrentQuotaManager>,
}

impl QuotaUpdater {
    pub fn new(
        resolver: Arc<dyn QuotaRootResolver>,
        manager: Arc<dyn CurrentQuotaManager>,
    ) -> Self {
        QuotaUpdater { resolver, manager }
    }

    fn apply(
        &self,
        event: &Event,
        messages: &[MessageMetaData],
        increase: bool,
    ) -> Result<(), Error> {
        // An empty event must not reach the manager at all, not even as a
        // zero delta.
        if messages.is_empty() {
            return Ok(());
        }

        let root = match self.resolver.quota_root(event.path()) {
            Ok(root) => root,
            Err(e) => {
                warn!(
                    "{} Dropping quota update for {}: can't resolve quota \
                     root: {}",
                    event.session(),
                    event,
                    e
                );
                return Ok(());
            },
        };

        let count = messages.len() as u64;
        let size = messages.iter().map(|m| m.size).sum::<u64>();
        debug!(
            "{} Quota of {} {} by {} messages, {} bytes",
            event.session(),
            root,
            if increase { "increases" } else { "decreases" },
            count,
            size
        );

        if increase {
            self.manager.increase(&root, count, size)
        } else {
            self.manager.decrease(&root, count, size)
        }
    }
}

impl MailboxListener for QuotaUpdater {
    fn listener_type(&self) -> ListenerType {
        ListenerType::EachNode
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Asynchronous
    }

    fn event(&self, event: &Event) -> Result<(), Error> {
        match *event.kind() {
            EventKind::Added { ref messages, .. } => {
                self.apply(event, messages, true)
            },
            EventKind::Expunged { ref messages, .. } => {
                self.apply(event, messages, false)
            },
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Mutex;

    use chrono::prelude::*;

    use super::*;
    use crate::model::*;
    use crate::quota::*;

    /// Records every call instead of counting.
    #[derive(Default)]
    struct CallLog {
        calls: Mutex<Vec<(String, QuotaRoot, u64, u64)>>,
    }

    impl CurrentQuotaManager for CallLog {
        fn increase(
            &self,
            root: &QuotaRoot,
            count: u64,
            size: u64,
        ) -> Result<(), Error> {
            self.calls.lock().unwrap().push((
                "increase".to_owned(),
                root.clone(),
                count,
                size,
            ));
            Ok(())
        }

        fn decrease(
            &self,
            root: &QuotaRoot,
            count: u64,
            size: u64,
        ) -> Result<(), Error> {
            self.calls.lock().unwrap().push((
                "decrease".to_owned(),
                root.clone(),
                count,
                size,
            ));
            Ok(())
        }

        fn current(&self, _: &QuotaRoot) -> Result<CurrentQuota, Error> {
            Ok(CurrentQuota::default())
        }
    }

    struct Unresolvable;

    impl QuotaRootResolver for Unresolvable {
        fn quota_root(&self, _: &MailboxPath) -> Result<QuotaRoot, Error> {
            Err(Error::NxMailbox)
        }
    }

    fn mailbox(user: &str) -> Mailbox {
        let mut mailbox = Mailbox::new(MailboxPath::for_user(user, "INBOX"), 1);
        mailbox.assign_id(MailboxId(1));
        mailbox
    }

    fn meta(uid: u64, size: u64) -> MessageMetaData {
        MessageMetaData {
            uid: MessageUid::u(uid),
            modseq: ModSeq(uid),
            size,
            internal_date: Utc::now(),
            flags: Flags::new(),
        }
    }

    fn setup() -> (Arc<CallLog>, QuotaUpdater) {
        let log = Arc::new(CallLog::default());
        let updater = QuotaUpdater::new(
            Arc::new(DefaultUserQuotaRootResolver),
            Arc::clone(&log) as Arc<dyn CurrentQuotaManager>,
        );
        (log, updater)
    }

    #[test]
    fn added_and_expunged_aggregate() {
        let (log, updater) = setup();
        let session = MailboxSession::new("azure", '.');
        let root = QuotaRoot::new("#private&azure", None);

        updater
            .event(
                &Event::added(
                    &session,
                    &mailbox("azure"),
                    vec![meta(1, 100), meta(2, 50)],
                )
                .unwrap(),
            )
            .unwrap();
        updater
            .event(
                &Event::expunged(
                    &session,
                    &mailbox("azure"),
                    vec![meta(1, 100)],
                )
                .unwrap(),
            )
            .unwrap();

        assert_eq!(
            vec![
                ("increase".to_owned(), root.clone(), 2, 150),
                ("decrease".to_owned(), root, 1, 100),
            ],
            *log.calls.lock().unwrap()
        );
    }

    #[test]
    fn empty_events_never_call_manager() {
        let (log, updater) = setup();
        let session = MailboxSession::new("azure", '.');

        updater
            .event(&Event::added(&session, &mailbox("azure"), vec![]).unwrap())
            .unwrap();
        updater
            .event(
                &Event::expunged(&session, &mailbox("azure"), vec![]).unwrap(),
            )
            .unwrap();
        assert!(log.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn unresolvable_root_is_dropped() {
        crate::init_test_log();
        let log = Arc::new(CallLog::default());
        let updater = QuotaUpdater::new(
            Arc::new(Unresolvable),
            Arc::clone(&log) as Arc<dyn CurrentQuotaManager>,
        );
        let session = MailboxSession::new("azure", '.');

        updater
            .event(
                &Event::added(&session, &mailbox("azure"), vec![meta(1, 1)])
                    .unwrap(),
            )
            .unwrap();
        assert!(log.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn other_events_ignored() {
        let (log, updater) = setup();
        let session = MailboxSession::new("azure", '.');
        updater
            .event(
                &Event::mailbox_deletion(&session, &mailbox("azure")).unwrap(),
            )
            .unwrap();
        assert!(log.calls.lock().unwrap().is_empty());
    }
}
