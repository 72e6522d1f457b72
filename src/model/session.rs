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

/// The identity on whose behalf a mutation is performed.
///
/// Sessions are carried by every event so listeners can attribute their own
/// side effects. The `Display` format is used as the prefix of log messages
/// relating to the session.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MailboxSession {
    id: u64,
    user: String,
    delimiter: char,
}

impl MailboxSession {
    pub fn new(user: &str, delimiter: char) -> Self {
        MailboxSession {
            id: rand::random(),
            user: sanitise(user),
            delimiter,
        }
    }

    /// A session for work performed by the server itself rather than a
    /// user, e.g. propagation done by listeners.
    pub fn system(delimiter: char) -> Self {
        Self::new("<system>", delimiter)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn delimiter(&self) -> char {
        self.delimiter
    }
}

impl fmt::Display for MailboxSession {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}[{:016x}]", self.user, self.id)
    }
}

fn sanitise(s: &str) -> String {
    let mut s = s.to_owned();
    s.retain(|c| !c.is_control());
    if let Some((truncate_len, _)) = s.char_indices().nth(64) {
        s.truncate(truncate_len);
    }

    s
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn display_is_log_safe() {
        let session = MailboxSession::new("az\nure", '.');
        assert_eq!("azure", session.user());
        assert!(session.to_string().starts_with("azure["));

        let long = "x".repeat(100);
        assert_eq!(64, MailboxSession::new(&long, '.').user().len());
    }
}
