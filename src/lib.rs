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

//! The mailbox storage and notification core of a mail server.
//!
//! Storage backends implement the mapper traits in `mapper`; the
//! `MailboxManager` runs mutations against them and publishes `Event`s
//! through the dispatcher in `events`, where derived state (quota counters,
//! ACL propagation, reindex tracking, caches) is kept up to date by
//! listeners.

#[cfg(test)]
macro_rules! assert_matches {
    ($expected:pat, $actual:expr) => {
        match $actual {
            $expected => (),
            unexpected => panic!(
                "Expected {} matches {}, got {:?}",
                stringify!($expected),
                stringify!($actual),
                unexpected
            ),
        }
    };
}

pub mod events;
pub mod extractor;
pub mod listeners;
pub mod manager;
pub mod mapper;
pub mod model;
pub mod quota;
pub mod support;

pub use crate::support::error::Error;

#[cfg(test)]
static INIT_TEST_LOG: std::sync::Once = std::sync::Once::new();

#[cfg(test)]
fn init_test_log() {
    INIT_TEST_LOG.call_once(|| {
        // Another test binary in the same process may already own the
        // logger; that is fine.
        let _ = crate::support::logging::init_console(log::LevelFilter::Debug);
    })
}
