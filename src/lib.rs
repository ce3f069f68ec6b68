/*
 * lib.rs
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

//! Raven: LMTP ingress, a per-user message store, and an IMAP4rev1 session
//! core gated by a SASL broker. See each module for its slice of the system.

pub mod config;
pub mod error;
pub mod http;
pub mod imap;
pub mod lmtp;
pub mod localstorage;
pub mod mime;
pub mod net;
pub mod sasl;
pub mod store;
