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

//! The entities shared by mappers, events and listeners.

pub mod acl;
pub mod annotation;
pub mod ids;
pub mod mailbox;
pub mod message;
pub mod path;
pub mod session;

pub use self::acl::*;
pub use self::annotation::*;
pub use self::ids::*;
pub use self::mailbox::*;
pub use self::message::*;
pub use self::path::*;
pub use self::session::*;
