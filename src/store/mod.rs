/*
 * mod.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Raven, a mail-retrieval and local-delivery server.
 *
 * Raven is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Raven is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Raven.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Per-user mail store: domain/user registry, mailbox hierarchy, content-addressed
//! message blobs, and the SEARCH key grammar that runs over them.

pub mod domain;
pub mod mailbox;
pub mod membership;
pub mod message;
pub mod partition;
pub mod search;
mod store;

pub use domain::{Domain, Registry, User};
pub use mailbox::{MailboxRecord, SpecialUse, DEFAULT_MAILBOXES};
pub use membership::{MailboxUidList, MembershipEntry};
pub use message::{Address, Envelope, Flag, Message};
pub use partition::{FetchCandidate, FlagsResult, MailboxEntry, StoreOp, UserPartition};
pub use search::{evaluate, SearchContext, SearchKey};
pub use store::Store;
