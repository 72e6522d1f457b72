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

use super::Event;
use crate::support::error::Error;

/// How many consumers across a deployment receive each event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ListenerType {
    /// Exactly one node handles each event.
    Once,
    /// Every node handles each event.
    EachNode,
}

/// Whether the mutating call waits for the listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExecutionMode {
    /// The mutation blocks until the listener finishes, and the listener's
    /// failure is the mutation's failure.
    Synchronous,
    /// The listener runs on the dispatcher's work queue. Its failures are
    /// logged and go no further.
    Asynchronous,
}

/// Something which reacts to events.
///
/// Listeners must be idempotent, and must treat events concerning no
/// messages as no-ops.
pub trait MailboxListener: Send + Sync {
    fn listener_type(&self) -> ListenerType;

    fn execution_mode(&self) -> ExecutionMode;

    /// The identity of this listener across nodes.
    ///
    /// Two nodes' instances of the same `Once` listener must return the same
    /// name, and distinct `Once` listeners must not.
    fn name(&self) -> String {
        std::any::type_name::<Self>().to_owned()
    }

    fn event(&self, event: &Event) -> Result<(), Error>;
}
