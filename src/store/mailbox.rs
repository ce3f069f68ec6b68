/*
 * mailbox.rs
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

//! Mailbox metadata: name, special-use attribute, UIDVALIDITY, and the
//! directory-per-mailbox layout that holds it, one level below a user's
//! partition root.

use crate::localstorage::mailbox_name_codec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// `\Seen`-style special-use attribute for a default mailbox, per RFC 6154 naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpecialUse {
    Inbox,
    Sent,
    Drafts,
    Trash,
    Spam,
}

impl SpecialUse {
    pub fn attribute(&self) -> &'static str {
        match self {
            SpecialUse::Inbox => "\\Inbox",
            SpecialUse::Sent => "\\Sent",
            SpecialUse::Drafts => "\\Drafts",
            SpecialUse::Trash => "\\Trash",
            SpecialUse::Spam => "\\Junk",
        }
    }

    pub fn default_name(&self) -> &'static str {
        match self {
            SpecialUse::Inbox => "INBOX",
            SpecialUse::Sent => "Sent",
            SpecialUse::Drafts => "Drafts",
            SpecialUse::Trash => "Trash",
            SpecialUse::Spam => "Spam",
        }
    }
}

/// The five mailboxes invariant 3 requires to exist before a user's first session.
pub const DEFAULT_MAILBOXES: [SpecialUse; 5] = [
    SpecialUse::Inbox,
    SpecialUse::Sent,
    SpecialUse::Drafts,
    SpecialUse::Trash,
    SpecialUse::Spam,
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailboxRecord {
    pub id: u64,
    pub name: String,
    pub special_use: Option<SpecialUse>,
    pub uid_validity: u32,
    pub uid_next: u32,
    pub created_at: i64,
}

impl MailboxRecord {
    /// Case-insensitive only for `INBOX`; every other hierarchical component compares
    /// case-sensitively, per the data model's naming rule.
    pub fn name_matches(&self, other: &str) -> bool {
        names_equal(&self.name, other)
    }
}

pub fn names_equal(a: &str, b: &str) -> bool {
    let fold = |s: &str| {
        if s.eq_ignore_ascii_case("INBOX") {
            "INBOX".to_string()
        } else {
            s.to_string()
        }
    };
    fold(a) == fold(b)
}

pub fn is_inbox(name: &str) -> bool {
    name.eq_ignore_ascii_case("INBOX")
}

/// Hierarchical name -> filesystem directory, one path component per `/`-separated
/// segment, each escaped through the mailbox name codec so arbitrary UTF-8 mailbox
/// names stay representable on disk.
pub fn mailbox_dir(partition_root: &Path, name: &str) -> PathBuf {
    let mut path = partition_root.join("mailboxes");
    for segment in name.split('/') {
        path.push(mailbox_name_codec::encode(segment));
    }
    path
}

/// True if `child` is a strict hierarchical descendant of `parent` under `/`.
pub fn is_child_of(parent: &str, child: &str) -> bool {
    match child.strip_prefix(parent) {
        Some(rest) => rest.starts_with('/'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbox_name_is_case_insensitive_only_for_inbox() {
        assert!(names_equal("INBOX", "inbox"));
        assert!(names_equal("Inbox", "INBOX"));
        assert!(!names_equal("Foo", "foo"));
    }

    #[test]
    fn hierarchy_child_detection() {
        assert!(is_child_of("Foo", "Foo/Bar"));
        assert!(!is_child_of("Foo", "Foobar"));
        assert!(!is_child_of("Foo", "Foo"));
    }
}
