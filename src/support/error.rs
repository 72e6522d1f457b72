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

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("No such mailbox")]
    NxMailbox,
    #[error("No such message")]
    NxMessage,
    #[error("Mailbox already exists")]
    MailboxExists,
    #[error("Invalid mailbox name")]
    UnsafeName,
    #[error("Identifier space exhausted")]
    GaveUpInsertion,
    #[error("{0}")]
    Validation(String),
    #[error("Illegal state: {0}")]
    IllegalState(String),
    #[error("Storage backend unavailable: {0}")]
    TransientStore(String),
    #[error("Concurrent modification: {0}")]
    Conflict(String),
    #[error("Bad configuration: {0}")]
    Configuration(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether this error means the requested entity does not exist.
    ///
    /// Only these errors may be used to infer absence; everything else might
    /// succeed if retried.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NxMailbox | Error::NxMessage)
    }

    /// Whether retrying the whole transaction might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::TransientStore(_) | Error::Conflict(_) | Error::Io(_)
        )
    }
}
