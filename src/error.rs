/*
 * error.rs
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

//! Error taxonomy shared by the Store, LMTP, IMAP and SASL broker components.
//!
//! Kinds map onto protocol-visible outcomes: IMAP `NO`/`BAD`, LMTP 4xx/5xx.
//! Only `Fatal` unwinds a connection; everything else is captured at the
//! command boundary and turned into a tagged completion line.

use std::fmt;

#[derive(Debug)]
pub enum RavenError {
    /// Malformed command or command used in the wrong session state.
    Protocol(String),
    /// Missing, insufficient, or rejected credentials.
    Auth(String),
    /// Referenced entity (mailbox, message, subscription) does not exist.
    NotFound(String),
    /// Entity already exists (duplicate CREATE, duplicate user).
    AlreadyExists(String),
    /// Invariant violation short of corruption: inferior hierarchy, INBOX rename/delete, unsubscribed name.
    Conflict(String),
    /// A response code clients can parse out of a Conflict/NotFound (e.g. destination mailbox missing).
    TryCreate(String),
    /// Retriable storage or network failure.
    TransientIO(String),
    /// Corruption or violated invariant detected; the affected partition must refuse further work.
    Fatal(String),
}

impl RavenError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn already_exists(msg: impl Into<String>) -> Self {
        Self::AlreadyExists(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, RavenError::Fatal(_))
    }

    /// IMAP tagged-completion keyword: BAD for protocol errors, NO otherwise.
    pub fn imap_keyword(&self) -> &'static str {
        match self {
            RavenError::Protocol(_) => "BAD",
            _ => "NO",
        }
    }

    /// Optional bracketed IMAP response code, if this error kind carries one.
    pub fn imap_response_code(&self) -> Option<String> {
        match self {
            RavenError::TryCreate(_) => Some("[TRYCREATE]".to_string()),
            _ => None,
        }
    }

    /// LMTP per-recipient status code class: 5xx permanent, 4xx transient.
    pub fn lmtp_code(&self) -> u16 {
        match self {
            RavenError::Protocol(_) => 500,
            RavenError::Auth(_) => 530,
            RavenError::NotFound(_) | RavenError::AlreadyExists(_) | RavenError::Conflict(_) | RavenError::TryCreate(_) => 550,
            RavenError::TransientIO(_) => 451,
            RavenError::Fatal(_) => 554,
        }
    }
}

impl fmt::Display for RavenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RavenError::Protocol(m) => write!(f, "protocol error: {}", m),
            RavenError::Auth(m) => write!(f, "authentication error: {}", m),
            RavenError::NotFound(m) => write!(f, "not found: {}", m),
            RavenError::AlreadyExists(m) => write!(f, "already exists: {}", m),
            RavenError::Conflict(m) => write!(f, "conflict: {}", m),
            RavenError::TryCreate(m) => write!(f, "{} (try creating the mailbox first)", m),
            RavenError::TransientIO(m) => write!(f, "transient I/O error: {}", m),
            RavenError::Fatal(m) => write!(f, "fatal: {}", m),
        }
    }
}

impl std::error::Error for RavenError {}

impl From<std::io::Error> for RavenError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        match e.kind() {
            NotFound => RavenError::NotFound(e.to_string()),
            AlreadyExists => RavenError::AlreadyExists(e.to_string()),
            TimedOut | Interrupted | WouldBlock => RavenError::TransientIO(e.to_string()),
            _ => RavenError::TransientIO(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, RavenError>;
