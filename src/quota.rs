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

//! Quota roots and usage accounting.
//!
//! Current usage is never recomputed from storage once running; it only
//! moves by the deltas the quota listener derives from events.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use log::warn;

use crate::model::MailboxPath;
use crate::support::error::Error;

/// A scope under which usage of several mailboxes is accounted together.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QuotaRoot {
    pub value: String,
    pub domain: Option<String>,
}

impl QuotaRoot {
    pub fn new(value: &str, domain: Option<&str>) -> Self {
        QuotaRoot {
            value: value.to_owned(),
            domain: domain.map(str::to_owned),
        }
    }
}

impl fmt::Display for QuotaRoot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

/// Usage under one quota root.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CurrentQuota {
    pub count: u64,
    pub size: u64,
}

pub trait QuotaRootResolver: Send + Sync {
    fn quota_root(&self, path: &MailboxPath) -> Result<QuotaRoot, Error>;
}

/// Puts every mailbox of a user under a single root named
/// `namespace&user`.
///
/// If the user name has the form `local@domain`, the root's domain is
/// `domain`.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultUserQuotaRootResolver;

pub const SEPARATOR: char = '&';

impl QuotaRootResolver for DefaultUserQuotaRootResolver {
    fn quota_root(&self, path: &MailboxPath) -> Result<QuotaRoot, Error> {
        if path.user.is_empty() {
            return Err(Error::Validation(format!(
                "{} has no owner to account quota to",
                path
            )));
        }

        let domain = path
            .user
            .rsplit_once('@')
            .map(|(_, domain)| domain)
            .filter(|domain| !domain.is_empty());
        Ok(QuotaRoot::new(
            &format!("{}{}{}", path.namespace, SEPARATOR, path.user),
            domain,
        ))
    }
}

pub trait CurrentQuotaManager: Send + Sync {
    fn increase(
        &self,
        root: &QuotaRoot,
        count: u64,
        size: u64,
    ) -> Result<(), Error>;

    fn decrease(
        &self,
        root: &QuotaRoot,
        count: u64,
        size: u64,
    ) -> Result<(), Error>;

    fn current(&self, root: &QuotaRoot) -> Result<CurrentQuota, Error>;
}

/// Keeps usage counters in memory.
#[derive(Default)]
pub struct InMemoryCurrentQuotaManager {
    usage: Mutex<HashMap<QuotaRoot, CurrentQuota>>,
}

impl InMemoryCurrentQuotaManager {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CurrentQuotaManager for InMemoryCurrentQuotaManager {
    fn increase(
        &self,
        root: &QuotaRoot,
        count: u64,
        size: u64,
    ) -> Result<(), Error> {
        let mut usage = self.usage.lock().unwrap();
        let current = usage.entry(root.clone()).or_default();
        current.count = current.count.saturating_add(count);
        current.size = current.size.saturating_add(size);
        Ok(())
    }

    fn decrease(
        &self,
        root: &QuotaRoot,
        count: u64,
        size: u64,
    ) -> Result<(), Error> {
        let mut usage = self.usage.lock().unwrap();
        let current = usage.entry(root.clone()).or_default();
        if count > current.count || size > current.size {
            warn!(
                "Quota of {} would underflow ({:?} - {} messages, {} bytes); \
                 clamping at zero",
                root, current, count, size
            );
        }

        current.count = current.count.saturating_sub(count);
        current.size = current.size.saturating_sub(size);
        Ok(())
    }

    fn current(&self, root: &QuotaRoot) -> Result<CurrentQuota, Error> {
        Ok(self
            .usage
            .lock()
            .unwrap()
            .get(root)
            .copied()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_resolver() {
        let resolver = DefaultUserQuotaRootResolver;
        assert_eq!(
            QuotaRoot::new("#private&azure", None),
            resolver
                .quota_root(&MailboxPath::for_user("azure", "INBOX"))
                .unwrap()
        );
        assert_eq!(
            QuotaRoot::new("#private&azure@example.com", Some("example.com")),
            resolver
                .quota_root(&MailboxPath::for_user("azure@example.com", "a.b"))
                .unwrap()
        );
        assert_eq!(
            resolver
                .quota_root(&MailboxPath::for_user("azure", "INBOX"))
                .unwrap(),
            resolver
                .quota_root(&MailboxPath::for_user("azure", "Other"))
                .unwrap()
        );
        assert_matches!(
            Err(Error::Validation(_)),
            resolver.quota_root(&MailboxPath::for_user("", "INBOX"))
        );
    }

    #[test]
    fn in_memory_counts() {
        let manager = InMemoryCurrentQuotaManager::new();
        let root = QuotaRoot::new("#private&azure", None);

        assert_eq!(CurrentQuota::default(), manager.current(&root).unwrap());
        manager.increase(&root, 3, 300).unwrap();
        manager.decrease(&root, 1, 100).unwrap();
        assert_eq!(
            CurrentQuota {
                count: 2,
                size: 200
            },
            manager.current(&root).unwrap()
        );

        crate::init_test_log();
        manager.decrease(&root, 5, 50).unwrap();
        assert_eq!(
            CurrentQuota {
                count: 0,
                size: 150
            },
            manager.current(&root).unwrap()
        );
    }
}
