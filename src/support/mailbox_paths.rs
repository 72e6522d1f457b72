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

/// Given a mailbox name, emit every level of its hierarchy, starting from the
/// root and ending with `name` itself.
///
/// E.g., `a.b.c` yields `a`, `a.b`, `a.b.c`. Empty segments are preserved as
/// they are part of the name; `a..b` yields `a`, `a.`, `a..b`.
pub fn hierarchy_levels(
    name: &str,
    delimiter: char,
) -> impl Iterator<Item = &str> + '_ {
    name.match_indices(delimiter)
        .map(move |(ix, _)| &name[..ix])
        .chain(std::iter::once(name))
        .filter(|s| !s.is_empty())
}

/// Whether `name` is a strict hierarchical descendant of `parent`.
pub fn is_descendant(name: &str, parent: &str, delimiter: char) -> bool {
    name.len() > parent.len() + delimiter.len_utf8()
        && name.starts_with(parent)
        && name[parent.len()..].starts_with(delimiter)
}

/// Creates a predicate which identifies which mailbox names match `pattern`.
///
/// `%` matches any sequence of characters, including the hierarchy
/// delimiter and the empty string. All other characters match themselves.
///
/// Listing a pattern means fetching all mailboxes of the user and then
/// narrowing them down. Users have few enough mailboxes that this is not a
/// problem, and backends with an index on the name are free to do better.
pub fn name_pattern_matcher(pattern: &str) -> impl Fn(&str) -> bool {
    let mut rx = "^".to_owned();
    let mut first = true;
    for chunk in pattern.split('%') {
        if !first {
            rx.push_str(".*");
        }
        first = false;
        rx.push_str(&regex::escape(chunk));
    }
    rx.push('$');

    let rx = regex::Regex::new(&rx).expect("Built invalid regex?");
    move |s| rx.is_match(s)
}
