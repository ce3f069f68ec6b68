/*
 * membership.rs
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

//! Per-mailbox UID list: `uid -> (content hash, flags, internal date)`.
//!
//! One file per mailbox directory, generalizing the Maildir `.uidlist` idea to carry
//! flags and internal date alongside the UID instead of a filename, since a mailbox
//! link here points at a shared content-addressed blob rather than owning its own file.

use crate::store::message::Flag;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

const HEADER: &str = "# raven-uidlist v1";

#[derive(Debug, Clone)]
pub struct MembershipEntry {
    pub uid: u32,
    pub content_hash: String,
    pub flags: BTreeSet<Flag>,
    pub internal_date: i64,
}

#[derive(Debug)]
pub struct MailboxUidList {
    path: PathBuf,
    pub uid_validity: u32,
    pub uid_next: u32,
    entries: Vec<MembershipEntry>,
    dirty: bool,
}

impl MailboxUidList {
    pub fn new(mailbox_dir: &Path) -> Self {
        Self {
            path: mailbox_dir.join(".uidlist"),
            uid_validity: 0,
            uid_next: 1,
            entries: Vec::new(),
            dirty: false,
        }
    }

    /// Load from disk, or initialize a fresh `uid_validity` derived from wall-clock seconds
    /// if no file exists yet (open question in the design notes: monotonic counter vs.
    /// seconds-since-epoch; we use the latter, matching the teacher's own `.uidlist`).
    pub fn load(&mut self) -> std::io::Result<()> {
        self.entries.clear();
        if !self.path.exists() {
            self.uid_validity = now_secs_u32();
            self.uid_next = 1;
            self.dirty = true;
            return Ok(());
        }
        let f = File::open(&self.path)?;
        let r = BufReader::new(f);
        let mut lines = r.lines();
        let first = lines.next().transpose()?.unwrap_or_default();
        if first != HEADER {
            self.uid_validity = now_secs_u32();
            self.uid_next = 1;
            self.dirty = true;
            return Ok(());
        }
        for line in lines {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(rest) = line.strip_prefix("uidvalidity ") {
                self.uid_validity = rest.trim().parse().unwrap_or(self.uid_validity);
            } else if let Some(rest) = line.strip_prefix("uidnext ") {
                self.uid_next = rest.trim().parse().unwrap_or(self.uid_next);
            } else {
                let fields: Vec<&str> = line.splitn(4, '\t').collect();
                if fields.len() == 4 {
                    if let (Ok(uid), Ok(date)) = (fields[0].parse::<u32>(), fields[1].parse::<i64>()) {
                        self.entries.push(MembershipEntry {
                            uid,
                            internal_date: date,
                            content_hash: fields[2].to_string(),
                            flags: Flag::decode_set(fields[3]),
                        });
                    }
                }
            }
        }
        self.dirty = false;
        Ok(())
    }

    pub fn save(&mut self) -> std::io::Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let tmp = self.path.with_extension("tmp");
        {
            let f = File::create(&tmp)?;
            let mut w = BufWriter::new(f);
            writeln!(w, "{}", HEADER)?;
            writeln!(w, "uidvalidity {}", self.uid_validity)?;
            writeln!(w, "uidnext {}", self.uid_next)?;
            let mut sorted = self.entries.clone();
            sorted.sort_by_key(|e| e.uid);
            for e in &sorted {
                writeln!(
                    w,
                    "{}\t{}\t{}\t{}",
                    e.uid,
                    e.internal_date,
                    e.content_hash,
                    Flag::encode_set(&e.flags)
                )?;
            }
            w.flush()?;
        }
        std::fs::rename(tmp, &self.path)?;
        self.dirty = false;
        Ok(())
    }

    pub fn entries(&self) -> &[MembershipEntry] {
        &self.entries
    }

    pub fn get(&self, uid: u32) -> Option<&MembershipEntry> {
        self.entries.iter().find(|e| e.uid == uid)
    }

    fn get_mut(&mut self, uid: u32) -> Option<&mut MembershipEntry> {
        self.entries.iter_mut().find(|e| e.uid == uid)
    }

    /// Link a message into this mailbox, assigning it the next UID. The caller is responsible
    /// for serializing this call per mailbox (see `UserPartition`'s per-mailbox write lock).
    pub fn append(&mut self, content_hash: String, flags: BTreeSet<Flag>, internal_date: i64) -> u32 {
        let uid = self.uid_next;
        self.uid_next += 1;
        self.entries.push(MembershipEntry {
            uid,
            content_hash,
            flags,
            internal_date,
        });
        self.dirty = true;
        uid
    }

    pub fn set_flags(&mut self, uid: u32, flags: BTreeSet<Flag>) -> bool {
        if let Some(e) = self.get_mut(uid) {
            e.flags = flags;
            self.dirty = true;
            true
        } else {
            false
        }
    }

    pub fn remove(&mut self, uid: u32) -> Option<MembershipEntry> {
        let idx = self.entries.iter().position(|e| e.uid == uid)?;
        self.dirty = true;
        Some(self.entries.remove(idx))
    }

    /// Rotate UIDVALIDITY, used when a mailbox is recreated under the same name or when
    /// crash recovery cannot prove UID monotonicity was preserved.
    pub fn rotate_uid_validity(&mut self) {
        self.uid_validity = now_secs_u32().max(self.uid_validity + 1);
        self.uid_next = 1;
        self.entries.clear();
        self.dirty = true;
    }
}

fn now_secs_u32() -> u32 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn assigns_monotonic_uids_and_persists() {
        let dir = tempdir().unwrap();
        let mut list = MailboxUidList::new(dir.path());
        list.load().unwrap();
        let uid1 = list.append("hash1".to_string(), BTreeSet::new(), 1000);
        let uid2 = list.append("hash2".to_string(), BTreeSet::new(), 1001);
        assert_eq!(uid1, 1);
        assert_eq!(uid2, 2);
        list.save().unwrap();

        let mut reloaded = MailboxUidList::new(dir.path());
        reloaded.load().unwrap();
        assert_eq!(reloaded.uid_next, 3);
        assert_eq!(reloaded.entries().len(), 2);
        assert_eq!(reloaded.get(1).unwrap().content_hash, "hash1");
    }

    #[test]
    fn uid_never_reused_after_removal() {
        let dir = tempdir().unwrap();
        let mut list = MailboxUidList::new(dir.path());
        list.load().unwrap();
        let uid1 = list.append("h1".to_string(), BTreeSet::new(), 1);
        list.remove(uid1);
        let uid2 = list.append("h2".to_string(), BTreeSet::new(), 2);
        assert!(uid2 > uid1);
    }
}
