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

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::support::error::Error;
use crate::support::mailbox_paths::{hierarchy_levels, is_descendant};

pub const PRIVATE_NAMESPACE: &str = "#private";
pub const INBOX: &str = "INBOX";

/// The full name of a mailbox: the namespace and user owning it, and its
/// hierarchical name within that user's tree.
///
/// Paths compare structurally. The hierarchy delimiter is not part of the
/// path; operations which care about the hierarchy take it as a parameter.
#[derive(
    Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct MailboxPath {
    pub namespace: String,
    pub user: String,
    pub name: String,
}

impl MailboxPath {
    pub fn new(namespace: &str, user: &str, name: &str) -> Self {
        MailboxPath {
            namespace: namespace.to_owned(),
            user: user.to_owned(),
            name: name.to_owned(),
        }
    }

    /// A path in the private namespace of `user`.
    pub fn for_user(user: &str, name: &str) -> Self {
        Self::new(PRIVATE_NAMESPACE, user, name)
    }

    pub fn inbox(user: &str) -> Self {
        Self::for_user(user, INBOX)
    }

    /// Whether `self` and `other` live in the same user tree.
    pub fn same_tree(&self, other: &MailboxPath) -> bool {
        self.namespace == other.namespace && self.user == other.user
    }

    /// Return a path with the same owner but a different name.
    pub fn with_name(&self, name: &str) -> Self {
        Self::new(&self.namespace, &self.user, name)
    }

    /// Instantiate a path inferior to this one.
    pub fn child(&self, name: &str, delimiter: char) -> Result<Self, Error> {
        if name.is_empty()
            || name.contains(delimiter)
            || name.contains(|c| '%' == c || '*' == c)
        {
            return Err(Error::UnsafeName);
        }

        Ok(self.with_name(&format!("{}{}{}", self.name, delimiter, name)))
    }

    /// Every level of this path's hierarchy, from the root down to and
    /// including this path itself.
    pub fn hierarchy_levels(&self, delimiter: char) -> Vec<MailboxPath> {
        hierarchy_levels(&self.name, delimiter)
            .map(|name| self.with_name(name))
            .collect()
    }

    /// Every strict ancestor of this path, nearest the root first.
    pub fn ancestors(&self, delimiter: char) -> Vec<MailboxPath> {
        let mut levels = self.hierarchy_levels(delimiter);
        if levels.last() == Some(self) {
            levels.pop();
        }
        levels
    }

    /// Whether this path is a strict hierarchical descendant of `parent`.
    pub fn is_child_of(&self, parent: &MailboxPath, delimiter: char) -> bool {
        self.same_tree(parent)
            && is_descendant(&self.name, &parent.name, delimiter)
    }

    /// Given that `self` is `old_parent` or one of its descendants, return
    /// the corresponding path under `new_parent`.
    pub fn renamed_under(
        &self,
        old_parent: &MailboxPath,
        new_parent: &MailboxPath,
    ) -> Option<MailboxPath> {
        if !self.same_tree(old_parent)
            || !self.name.starts_with(&old_parent.name)
        {
            return None;
        }

        let suffix = &self.name[old_parent.name.len()..];
        Some(new_parent.with_name(&format!("{}{}", new_parent.name, suffix)))
    }

    pub fn is_inbox(&self) -> bool {
        INBOX.eq_ignore_ascii_case(&self.name)
    }
}

impl fmt::Display for MailboxPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}:{}", self.namespace, self.user, self.name)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn p(name: &str) -> MailboxPath {
        MailboxPath::for_user("azure", name)
    }

    #[test]
    fn ancestors_exclude_self() {
        assert_eq!(vec![p("a"), p("a.b")], p("a.b.c").ancestors('.'));
        assert!(p("a").ancestors('.').is_empty());
        assert_eq!(
            vec![p("a"), p("a.b"), p("a.b.c")],
            p("a.b.c").hierarchy_levels('.')
        );
        assert_eq!(vec![p("a")], p("a/b").ancestors('/'));
    }

    #[test]
    fn child_relationship() {
        assert!(p("a.b").is_child_of(&p("a"), '.'));
        assert!(p("a.b.c").is_child_of(&p("a"), '.'));
        assert!(!p("ab").is_child_of(&p("a"), '.'));
        assert!(!p("a").is_child_of(&p("a"), '.'));
        assert!(!MailboxPath::for_user("zim", "a.b").is_child_of(&p("a"), '.'));
        assert!(!MailboxPath::new("#shared", "azure", "a.b")
            .is_child_of(&p("a"), '.'));
    }

    #[test]
    fn make_child() {
        assert_eq!(p("a.b"), p("a").child("b", '.').unwrap());
        assert_matches!(Err(Error::UnsafeName), p("a").child("b.c", '.'));
        assert_matches!(Err(Error::UnsafeName), p("a").child("", '.'));
        assert_matches!(Err(Error::UnsafeName), p("a").child("b%", '.'));
    }

    #[test]
    fn rebase_on_rename() {
        assert_eq!(
            Some(p("x.c")),
            p("a.b.c").renamed_under(&p("a.b"), &p("x"))
        );
        assert_eq!(Some(p("x")), p("a.b").renamed_under(&p("a.b"), &p("x")));
        assert_eq!(None, p("q").renamed_under(&p("a.b"), &p("x")));
    }

    #[test]
    fn inbox_is_case_insensitive() {
        assert!(p("inbox").is_inbox());
        assert!(MailboxPath::inbox("azure").is_inbox());
        assert!(!p("inbox.sub").is_inbox());
    }
}
