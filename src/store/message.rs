/*
 * message.rs
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

//! Message and envelope types shared by the store and the IMAP response formatter.

use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// Message flags: system flags plus user-defined keywords.
#[derive(Debug, Clone, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub enum Flag {
    Seen,
    Answered,
    Flagged,
    Deleted,
    Draft,
    Recent,
    Custom(String),
}

impl Flag {
    /// Parse an IMAP flag atom (`\Seen`, `\Answered`, ..., or a bare keyword).
    pub fn parse(s: &str) -> Self {
        match s {
            "\\Seen" => Flag::Seen,
            "\\Answered" => Flag::Answered,
            "\\Flagged" => Flag::Flagged,
            "\\Deleted" => Flag::Deleted,
            "\\Draft" => Flag::Draft,
            "\\Recent" => Flag::Recent,
            other => Flag::Custom(other.to_string()),
        }
    }

    pub fn as_imap_atom(&self) -> String {
        match self {
            Flag::Seen => "\\Seen".to_string(),
            Flag::Answered => "\\Answered".to_string(),
            Flag::Flagged => "\\Flagged".to_string(),
            Flag::Deleted => "\\Deleted".to_string(),
            Flag::Draft => "\\Draft".to_string(),
            Flag::Recent => "\\Recent".to_string(),
            Flag::Custom(k) => k.clone(),
        }
    }

    /// Short token used in the on-disk membership record (teacher's Maildir flag-letter idea,
    /// generalized to cover `\Recent` and arbitrary keywords).
    fn token(&self) -> String {
        match self {
            Flag::Seen => "S".to_string(),
            Flag::Answered => "R".to_string(),
            Flag::Flagged => "F".to_string(),
            Flag::Deleted => "T".to_string(),
            Flag::Draft => "D".to_string(),
            Flag::Recent => "X".to_string(),
            Flag::Custom(k) => format!("k:{}", k),
        }
    }

    fn from_token(tok: &str) -> Option<Self> {
        match tok {
            "S" => Some(Flag::Seen),
            "R" => Some(Flag::Answered),
            "F" => Some(Flag::Flagged),
            "T" => Some(Flag::Deleted),
            "D" => Some(Flag::Draft),
            "X" => Some(Flag::Recent),
            k => k.strip_prefix("k:").map(|kw| Flag::Custom(kw.to_string())),
        }
    }

    pub fn encode_set(flags: &BTreeSet<Flag>) -> String {
        if flags.is_empty() {
            return "-".to_string();
        }
        flags.iter().map(|f| f.token()).collect::<Vec<_>>().join(",")
    }

    pub fn decode_set(s: &str) -> BTreeSet<Flag> {
        if s == "-" || s.is_empty() {
            return BTreeSet::new();
        }
        s.split(',').filter_map(Flag::from_token).collect()
    }
}

/// Address for the ENVELOPE response and RFC 5322 header reconstruction.
#[derive(Debug, Clone)]
pub struct Address {
    pub display_name: Option<String>,
    pub local_part: String,
    pub domain: Option<String>,
}

/// Cached envelope fields, computed once on delivery/APPEND and stored alongside the message
/// so FETCH ENVELOPE does not need to re-parse the raw bytes on every request.
#[derive(Debug, Clone, Default)]
pub struct Envelope {
    pub date: Option<String>,
    pub subject: Option<String>,
    pub from: Vec<Address>,
    pub sender: Vec<Address>,
    pub reply_to: Vec<Address>,
    pub to: Vec<Address>,
    pub cc: Vec<Address>,
    pub bcc: Vec<Address>,
    pub in_reply_to: Option<String>,
    pub message_id: Option<String>,
}

/// An immutable, content-addressed message blob within a user's store.
/// `id` is the lower-case hex SHA-256 of `raw`, so two deliveries of byte-identical
/// content naturally share storage and a refcount.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub raw: Vec<u8>,
    pub size: u64,
    pub internal_date: i64,
    pub envelope: Envelope,
}

impl Message {
    pub fn content_id(raw: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(raw);
        let digest = hasher.finalize();
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }
}
