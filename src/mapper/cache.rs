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

//! A read-through cache of mailboxes keyed by path.
//!
//! Writes invalidate the affected paths before they reach the backend. To
//! keep a reader which raced a write from re-populating the cache with the
//! pre-write state, every path being written carries a "write in progress"
//! marker, and every invalidation bumps a generation counter. A reader only
//! populates the cache if no write to its path is in progress and the
//! generation is the same as when it started its lookup. This is more
//! conservative than necessary (an unrelated write also suppresses
//! population) but never caches a stale value.
//!
//! Nothing is populated while a transaction is open, since the backend may
//! then return state which is never committed. ACL and annotation updates
//! of a cached mailbox put the updated copy back into the cache, but only
//! once the outermost transaction has committed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::debug;

use super::*;
use crate::events::{
    Event, EventKind, ExecutionMode, ListenerType, MailboxListener,
};

#[derive(Default)]
struct CacheState {
    entries: HashMap<MailboxPath, Mailbox>,
    paths_by_id: HashMap<MailboxId, MailboxPath>,
    writing: HashMap<MailboxPath, usize>,
    generation: u64,
    open_transactions: usize,
    refresh_on_commit: Vec<Mailbox>,
}

impl CacheState {
    fn invalidate(&mut self, path: &MailboxPath) {
        if let Some(mailbox) = self.entries.remove(path) {
            if let Some(id) = mailbox.id() {
                self.paths_by_id.remove(&id);
            }
        }
        self.generation += 1;
    }

    fn invalidate_id(&mut self, id: MailboxId) {
        if let Some(path) = self.paths_by_id.remove(&id) {
            self.entries.remove(&path);
        }
        self.generation += 1;
    }

    fn insert(&mut self, mailbox: Mailbox, max_entries: usize) {
        let id = match mailbox.id() {
            Some(id) => id,
            None => return,
        };

        if self.entries.len() >= max_entries
            && !self.entries.contains_key(&mailbox.path)
        {
            // Evict an arbitrary entry
            let victim = self.entries.keys().next().cloned();
            if let Some(victim) = victim {
                self.invalidate(&victim);
            }
        }

        self.paths_by_id.insert(id, mailbox.path.clone());
        self.entries.insert(mailbox.path.clone(), mailbox);
    }
}

/// Wraps a `MailboxMapper` with a bounded path-keyed cache.
///
/// Only `find_by_path` reads through the cache. Pattern lookups, children
/// checks and listings always go to the backend.
pub struct CachingMailboxMapper {
    backend: Arc<dyn MailboxMapper>,
    max_entries: usize,
    state: Mutex<CacheState>,
}

impl CachingMailboxMapper {
    pub fn new(backend: Arc<dyn MailboxMapper>, max_entries: usize) -> Self {
        CachingMailboxMapper {
            backend,
            max_entries: max_entries.max(1),
            state: Mutex::new(CacheState::default()),
        }
    }

    /// The number of cached mailboxes.
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        0 == self.len()
    }

    /// Forget whatever is cached for `path`.
    pub fn invalidate(&self, path: &MailboxPath) {
        self.state.lock().unwrap().invalidate(path);
    }

    /// Forget everything.
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.entries.clear();
        state.paths_by_id.clear();
        state.generation += 1;
    }

    /// Run `write` with the cache entries for `mailbox` invalidated and
    /// marked as being written until it completes.
    fn write_through<T>(
        &self,
        mailbox: &Mailbox,
        write: impl FnOnce() -> Result<T, Error>,
    ) -> Result<T, Error> {
        let mut paths = vec![mailbox.path.clone()];
        {
            let mut state = self.state.lock().unwrap();
            // A save of an existing mailbox may be a rename, in which case
            // the entry under the old path must go too.
            if let Some(old_path) =
                mailbox.id().and_then(|id| state.paths_by_id.get(&id))
            {
                if *old_path != mailbox.path {
                    paths.push(old_path.clone());
                }
            }

            for path in &paths {
                state.invalidate(path);
                *state.writing.entry(path.clone()).or_insert(0) += 1;
            }
        }

        let result = write();

        let mut state = self.state.lock().unwrap();
        for path in &paths {
            let done = match state.writing.get_mut(path) {
                Some(count) => {
                    *count -= 1;
                    0 == *count
                },
                None => false,
            };
            if done {
                state.writing.remove(path);
            }
        }
        state.generation += 1;

        result
    }

    /// Run an ACL or annotation `update` of `mailbox` through the backend,
    /// then cache the updated copy if the old one was cached.
    fn update_in_place<T>(
        &self,
        mailbox: &mut Mailbox,
        update: impl FnOnce(&mut Mailbox) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let was_cached = {
            let state = self.state.lock().unwrap();
            mailbox.id().is_some()
                && state.entries.get(&mailbox.path).map(Mailbox::id)
                    == Some(mailbox.id())
        };

        let snapshot = mailbox.clone();
        let result = self.write_through(&snapshot, || update(mailbox))?;

        if was_cached {
            let mut state = self.state.lock().unwrap();
            if state.open_transactions > 0 {
                state.refresh_on_commit.push(mailbox.clone());
            } else if !state.writing.contains_key(&mailbox.path) {
                state.insert(mailbox.clone(), self.max_entries);
            }
        }

        Ok(result)
    }

    fn end_transaction(&self, committed: bool) {
        let mut state = self.state.lock().unwrap();
        state.open_transactions = state.open_transactions.saturating_sub(1);
        state.generation += 1;
        if !committed {
            state.refresh_on_commit.clear();
        } else if 0 == state.open_transactions {
            for mailbox in std::mem::take(&mut state.refresh_on_commit) {
                if !state.writing.contains_key(&mailbox.path) {
                    state.insert(mailbox, self.max_entries);
                }
            }
        }
    }
}

impl Transactional for CachingMailboxMapper {
    fn begin(&self) -> Result<(), Error> {
        self.backend.begin()?;
        self.state.lock().unwrap().open_transactions += 1;
        Ok(())
    }

    fn commit(&self) -> Result<(), Error> {
        let result = self.backend.commit();
        self.end_transaction(result.is_ok());
        if result.is_err() {
            self.clear();
        }
        result
    }

    fn rollback(&self) {
        self.backend.rollback();
        self.end_transaction(false);
        self.clear();
    }
}

impl MailboxMapper for CachingMailboxMapper {
    fn save(&self, mailbox: &mut Mailbox) -> Result<MailboxId, Error> {
        let snapshot = mailbox.clone();
        self.write_through(&snapshot, || self.backend.save(mailbox))
    }

    fn find_by_id(&self, id: MailboxId) -> Result<Mailbox, Error> {
        self.backend.find_by_id(id)
    }

    fn find_by_path(&self, path: &MailboxPath) -> Result<Mailbox, Error> {
        let generation = {
            let state = self.state.lock().unwrap();
            if let Some(cached) = state.entries.get(path) {
                return Ok(cached.clone());
            }
            state.generation
        };

        match self.backend.find_by_path(path) {
            Ok(mailbox) => {
                let mut state = self.state.lock().unwrap();
                if state.generation == generation
                    && 0 == state.open_transactions
                    && !state.writing.contains_key(path)
                {
                    state.insert(mailbox.clone(), self.max_entries);
                }
                Ok(mailbox)
            },
            Err(e) if e.is_not_found() => {
                debug!("{} disappeared, dropping from cache", path);
                self.invalidate(path);
                Err(e)
            },
            Err(e) => Err(e),
        }
    }

    fn find_by_path_pattern(
        &self,
        pattern: &MailboxPath,
    ) -> Result<Vec<Mailbox>, Error> {
        self.backend.find_by_path_pattern(pattern)
    }

    fn has_children(
        &self,
        mailbox: &Mailbox,
        delimiter: char,
    ) -> Result<bool, Error> {
        self.backend.has_children(mailbox, delimiter)
    }

    fn list(&self) -> Result<Vec<Mailbox>, Error> {
        self.backend.list()
    }

    fn delete(&self, mailbox: &Mailbox) -> Result<(), Error> {
        self.write_through(mailbox, || self.backend.delete(mailbox))
    }

    fn update_acl(
        &self,
        mailbox: &mut Mailbox,
        command: &AclCommand,
    ) -> Result<AclDiff, Error> {
        self.update_in_place(mailbox, |mailbox| {
            self.backend.update_acl(mailbox, command)
        })
    }

    fn set_annotations(
        &self,
        mailbox: &mut Mailbox,
        command: &AnnotationCommand,
    ) -> Result<(), Error> {
        self.update_in_place(mailbox, |mailbox| {
            self.backend.set_annotations(mailbox, command)
        })
    }
}

/// Keeps the cache coherent with changes made through other mappers, such
/// as those of other nodes sharing the same backend.
impl MailboxListener for CachingMailboxMapper {
    fn listener_type(&self) -> ListenerType {
        ListenerType::EachNode
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Synchronous
    }

    fn event(&self, event: &Event) -> Result<(), Error> {
        match *event.kind() {
            EventKind::MailboxDeletion { ref mailbox } => {
                self.invalidate(&mailbox.path)
            },
            EventKind::MailboxRenamed {
                ref old_path,
                ref mailbox,
            } => {
                self.invalidate(old_path);
                self.invalidate(&mailbox.path);
            },
            EventKind::MailboxAclUpdated { mailbox_id, .. } => {
                self.state.lock().unwrap().invalidate_id(mailbox_id)
            },
            _ => (),
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;
    use crate::mapper::memory::MemoryStore;

    /// Delegates to a `MemoryStore`, counting path lookups and optionally
    /// failing them.
    struct Spy {
        store: MemoryStore,
        lookups: AtomicUsize,
        unavailable: AtomicBool,
        during_lookup: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    }

    impl Spy {
        fn new() -> Arc<Self> {
            Arc::new(Spy {
                store: MemoryStore::new(),
                lookups: AtomicUsize::new(0),
                unavailable: AtomicBool::new(false),
                during_lookup: Mutex::new(None),
            })
        }

        fn lookups(&self) -> usize {
            self.lookups.load(Ordering::SeqCst)
        }
    }

    impl Transactional for Spy {
        fn begin(&self) -> Result<(), Error> {
            self.store.begin()
        }

        fn commit(&self) -> Result<(), Error> {
            self.store.commit()
        }

        fn rollback(&self) {
            self.store.rollback()
        }
    }

    impl MailboxMapper for Spy {
        fn save(&self, mailbox: &mut Mailbox) -> Result<MailboxId, Error> {
            self.store.save(mailbox)
        }

        fn find_by_id(&self, id: MailboxId) -> Result<Mailbox, Error> {
            self.store.find_by_id(id)
        }

        fn find_by_path(&self, path: &MailboxPath) -> Result<Mailbox, Error> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            let hook = self.during_lookup.lock().unwrap().take();
            if let Some(hook) = hook {
                hook();
            }
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(Error::TransientStore("down".to_owned()));
            }
            self.store.find_by_path(path)
        }

        fn find_by_path_pattern(
            &self,
            pattern: &MailboxPath,
        ) -> Result<Vec<Mailbox>, Error> {
            self.store.find_by_path_pattern(pattern)
        }

        fn has_children(
            &self,
            mailbox: &Mailbox,
            delimiter: char,
        ) -> Result<bool, Error> {
            self.store.has_children(mailbox, delimiter)
        }

        fn list(&self) -> Result<Vec<Mailbox>, Error> {
            self.store.list()
        }

        fn delete(&self, mailbox: &Mailbox) -> Result<(), Error> {
            MailboxMapper::delete(&self.store, mailbox)
        }

        fn update_acl(
            &self,
            mailbox: &mut Mailbox,
            command: &AclCommand,
        ) -> Result<AclDiff, Error> {
            self.store.update_acl(mailbox, command)
        }

        fn set_annotations(
            &self,
            mailbox: &mut Mailbox,
            command: &AnnotationCommand,
        ) -> Result<(), Error> {
            self.store.set_annotations(mailbox, command)
        }
    }

    fn path(name: &str) -> MailboxPath {
        MailboxPath::for_user("azure", name)
    }

    fn setup() -> (Arc<Spy>, CachingMailboxMapper) {
        let spy = Spy::new();
        let cache = CachingMailboxMapper::new(
            Arc::clone(&spy) as Arc<dyn MailboxMapper>,
            100,
        );
        (spy, cache)
    }

    #[test]
    fn reads_through_once() {
        let (spy, cache) = setup();
        let mut mailbox = Mailbox::new(path("INBOX"), 1);
        cache.save(&mut mailbox).unwrap();

        assert_eq!(mailbox, cache.find_by_path(&path("INBOX")).unwrap());
        assert_eq!(mailbox, cache.find_by_path(&path("INBOX")).unwrap());
        assert_eq!(1, spy.lookups());
        assert_eq!(1, cache.len());
    }

    #[test]
    fn not_found_evicts_stale_entry() {
        let (spy, cache) = setup();
        let cache = Arc::new(cache);
        let mut mailbox = Mailbox::new(path("INBOX"), 1);
        cache.save(&mut mailbox).unwrap();

        // Deleted through some path this cache never saw
        MailboxMapper::delete(&spy.store, &mailbox).unwrap();

        // While the backend lookup is running, a racing reader caches the
        // old state
        let racer = Arc::clone(&cache);
        let stale = mailbox.clone();
        *spy.during_lookup.lock().unwrap() = Some(Box::new(move || {
            racer.state.lock().unwrap().insert(stale, 100);
        }));

        assert_matches!(
            Err(Error::NxMailbox),
            cache.find_by_path(&path("INBOX"))
        );
        assert!(cache.is_empty());
        assert_matches!(
            Err(Error::NxMailbox),
            cache.find_by_path(&path("INBOX"))
        );
        assert_eq!(2, spy.lookups());
    }

    #[test]
    fn transient_error_does_not_invalidate() {
        let (spy, cache) = setup();
        let mut mailbox = Mailbox::new(path("INBOX"), 1);
        cache.save(&mut mailbox).unwrap();
        let mut other = Mailbox::new(path("Other"), 1);
        cache.save(&mut other).unwrap();
        cache.find_by_path(&path("INBOX")).unwrap();

        spy.unavailable.store(true, Ordering::SeqCst);
        assert_matches!(
            Err(Error::TransientStore(_)),
            cache.find_by_path(&path("Other"))
        );
        // Still served from cache
        assert_eq!(mailbox, cache.find_by_path(&path("INBOX")).unwrap());
        assert_eq!(1, cache.len());
    }

    #[test]
    fn writes_invalidate() {
        let (spy, cache) = setup();
        let mut mailbox = Mailbox::new(path("a"), 1);
        cache.save(&mut mailbox).unwrap();
        cache.find_by_path(&path("a")).unwrap();

        // Rename
        mailbox.path = path("b");
        cache.save(&mut mailbox).unwrap();
        assert!(cache.is_empty());
        assert_matches!(Err(Error::NxMailbox), cache.find_by_path(&path("a")));
        assert_eq!(mailbox, cache.find_by_path(&path("b")).unwrap());

        MailboxMapper::delete(&cache, &mailbox).unwrap();
        assert!(cache.is_empty());
        assert_matches!(Err(Error::NxMailbox), cache.find_by_path(&path("b")));
        assert_eq!(4, spy.lookups());
    }

    #[test]
    fn acl_update_refreshes_cached_copy() {
        let (spy, cache) = setup();
        let mut mailbox = Mailbox::new(path("a"), 1);
        cache.save(&mut mailbox).unwrap();
        cache.find_by_path(&path("a")).unwrap();

        cache
            .update_acl(&mut mailbox, &AclCommand::parse("bob", "+l").unwrap())
            .unwrap();
        let cached = cache.find_by_path(&path("a")).unwrap();
        assert_eq!(Rights::LOOKUP, cached.acl().get(&EntryKey::user("bob")));
        assert_eq!(1, spy.lookups());
    }

    #[test]
    fn uncommitted_acl_never_cached() {
        let (spy, cache) = setup();
        let mut mailbox = Mailbox::new(path("a"), 1);
        cache.save(&mut mailbox).unwrap();
        cache.find_by_path(&path("a")).unwrap();
        let bob = EntryKey::user("bob");
        let grant = AclCommand::parse("bob", "+l").unwrap();

        let result: Result<(), Error> = run_in_transaction(&cache, || {
            let mut copy = mailbox.clone();
            cache.update_acl(&mut copy, &grant)?;
            assert!(cache.is_empty());
            let seen = cache.find_by_path(&path("a"))?;
            assert_eq!(Rights::LOOKUP, seen.acl().get(&bob));
            assert!(cache.is_empty());
            Err(Error::Conflict("test".to_owned()))
        });
        assert_matches!(Err(Error::Conflict(_)), result);
        assert!(cache.is_empty());
        let seen = cache.find_by_path(&path("a")).unwrap();
        assert_eq!(Rights::empty(), seen.acl().get(&bob));

        run_in_transaction(&cache, || {
            let mut copy = mailbox.clone();
            cache.update_acl(&mut copy, &grant)?;
            assert!(cache.is_empty());
            Ok(())
        })
        .unwrap();
        // Refreshed on commit without another backend lookup
        let lookups = spy.lookups();
        let seen = cache.find_by_path(&path("a")).unwrap();
        assert_eq!(Rights::LOOKUP, seen.acl().get(&bob));
        assert_eq!(lookups, spy.lookups());
    }

    #[test]
    fn pass_through_operations() {
        let (spy, cache) = setup();
        let mut parent = Mailbox::new(path("a"), 1);
        cache.save(&mut parent).unwrap();
        let mut child = Mailbox::new(path("a.b"), 1);
        cache.save(&mut child).unwrap();

        assert!(cache.has_children(&parent, '.').unwrap());
        assert_eq!(2, cache.find_by_path_pattern(&path("a%")).unwrap().len());
        assert_eq!(2, cache.list().unwrap().len());
        assert_eq!(0, spy.lookups());
        assert!(cache.is_empty());
    }

    #[test]
    fn racing_reader_does_not_repopulate() {
        let (_spy, cache) = setup();
        let mut mailbox = Mailbox::new(path("a"), 1);
        cache.save(&mut mailbox).unwrap();

        let snapshot = mailbox.clone();
        cache
            .write_through(&snapshot, || {
                // A reader running while the write is in flight sees the
                // old state but must not cache it
                cache.find_by_path(&path("a"))?;
                assert!(cache.is_empty());
                Ok(())
            })
            .unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn bounded_size() {
        let spy = Spy::new();
        let cache = CachingMailboxMapper::new(
            Arc::clone(&spy) as Arc<dyn MailboxMapper>,
            2,
        );
        for name in &["a", "b", "c"] {
            let mut mailbox = Mailbox::new(path(name), 1);
            cache.save(&mut mailbox).unwrap();
        }
        for name in &["a", "b", "c"] {
            cache.find_by_path(&path(name)).unwrap();
        }
        assert_eq!(2, cache.len());
    }

    #[test]
    fn rollback_clears() {
        let (_spy, cache) = setup();
        let result: Result<(), Error> = run_in_transaction(&cache, || {
            let mut mailbox = Mailbox::new(path("a"), 1);
            cache.save(&mut mailbox)?;
            cache.find_by_path(&path("a"))?;
            Err(Error::Conflict("test".to_owned()))
        });
        assert_matches!(Err(Error::Conflict(_)), result);
        assert!(cache.is_empty());
        assert_matches!(Err(Error::NxMailbox), cache.find_by_path(&path("a")));
    }
}
