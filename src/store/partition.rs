/*
 * partition.rs
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

//! A single user's private store partition: mailboxes, membership, and the
//! content-addressed blob pool they share.
//!
//! Layout on disk, under `<data_dir>/users/<user_id>/`:
//! ```text
//! mailboxes.json        mailbox metadata (name, special-use, uid_validity, uid_next)
//! subscriptions.json    subscribed names, independent of mailbox existence
//! mailboxes/<enc>/      one directory per mailbox, holding .uidlist
//! blobs/<aa>/<hash>     content-addressed message bytes, refcounted
//! ```
//! A single `tokio::sync::Mutex` per mailbox serializes UID assignment and
//! membership-file writes; reads of already-loaded state don't take it.

use crate::error::{RavenError, Result};
use crate::mime::parse_envelope;
use crate::store::mailbox::{self, is_inbox, names_equal, MailboxRecord, SpecialUse, DEFAULT_MAILBOXES};
use crate::store::membership::{MailboxUidList, MembershipEntry};
use crate::store::message::{Address, Envelope, Flag, Message};
use crate::store::search::{evaluate, SearchContext, SearchKey};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Default, Serialize, Deserialize)]
struct MailboxDoc {
    next_mailbox_id: u64,
    mailboxes: Vec<MailboxRecord>,
}

pub enum StoreOp {
    Replace,
    Add,
    Remove,
}

pub struct FlagsResult {
    pub uid: u32,
    pub sequence_number: u32,
    pub flags: BTreeSet<Flag>,
}

pub struct FetchCandidate {
    pub uid: u32,
    pub sequence_number: u32,
    pub flags: BTreeSet<Flag>,
    pub internal_date: i64,
    pub message: Message,
}

pub struct MailboxEntry {
    pub name: String,
    pub selectable: bool,
    pub has_children: bool,
}

pub struct UserPartition {
    root: PathBuf,
    mailbox_doc_path: PathBuf,
    subscriptions_path: PathBuf,
    doc: Mutex<MailboxDoc>,
    subscriptions: Mutex<Vec<String>>,
    uid_lists: Mutex<HashMap<u64, Arc<Mutex<MailboxUidList>>>>,
}

impl UserPartition {
    pub fn open(data_dir: &Path, user_id: u64) -> Result<Self> {
        let root = data_dir.join("users").join(user_id.to_string());
        std::fs::create_dir_all(root.join("mailboxes"))?;
        std::fs::create_dir_all(root.join("blobs"))?;

        let mailbox_doc_path = root.join("mailboxes.json");
        let doc = if mailbox_doc_path.exists() {
            let raw = std::fs::read_to_string(&mailbox_doc_path)?;
            serde_json::from_str(&raw).map_err(|e| RavenError::Fatal(format!("corrupt mailboxes.json: {e}")))?
        } else {
            MailboxDoc::default()
        };

        let subscriptions_path = root.join("subscriptions.json");
        let subscriptions = if subscriptions_path.exists() {
            let raw = std::fs::read_to_string(&subscriptions_path)?;
            serde_json::from_str(&raw).map_err(|e| RavenError::Fatal(format!("corrupt subscriptions.json: {e}")))?
        } else {
            Vec::new()
        };

        Ok(Self {
            root,
            mailbox_doc_path,
            subscriptions_path,
            doc: Mutex::new(doc),
            subscriptions: Mutex::new(subscriptions),
            uid_lists: Mutex::new(HashMap::new()),
        })
    }

    async fn save_doc(&self, doc: &MailboxDoc) -> Result<()> {
        let tmp = self.mailbox_doc_path.with_extension("tmp");
        let raw = serde_json::to_string_pretty(doc).map_err(|e| RavenError::Fatal(e.to_string()))?;
        tokio::fs::write(&tmp, raw).await?;
        tokio::fs::rename(&tmp, &self.mailbox_doc_path).await?;
        Ok(())
    }

    async fn save_subscriptions(&self, subs: &[String]) -> Result<()> {
        let tmp = self.subscriptions_path.with_extension("tmp");
        let raw = serde_json::to_string_pretty(subs).map_err(|e| RavenError::Fatal(e.to_string()))?;
        tokio::fs::write(&tmp, raw).await?;
        tokio::fs::rename(&tmp, &self.subscriptions_path).await?;
        Ok(())
    }

    /// Idempotent: creates `{INBOX, Sent, Drafts, Trash, Spam}` and auto-subscribes them.
    /// Returns immediately if already provisioned.
    pub async fn ensure_default_mailboxes(&self) -> Result<()> {
        let mut doc = self.doc.lock().await;
        if !doc.mailboxes.is_empty() {
            return Ok(());
        }
        let mut subs = self.subscriptions.lock().await;
        for special in DEFAULT_MAILBOXES {
            let name = special.default_name().to_string();
            self.create_mailbox_locked(&mut doc, &name, Some(special))?;
            if !subs.contains(&name) {
                subs.push(name);
            }
        }
        self.save_doc(&doc).await?;
        self.save_subscriptions(&subs).await?;
        Ok(())
    }

    fn create_mailbox_locked(&self, doc: &mut MailboxDoc, name: &str, special: Option<SpecialUse>) -> Result<u64> {
        if doc.mailboxes.iter().any(|m| m.name_matches(name)) {
            return Err(RavenError::already_exists(format!("mailbox {name} already exists")));
        }
        let id = doc.next_mailbox_id;
        doc.next_mailbox_id += 1;
        let dir = mailbox::mailbox_dir(&self.root, name);
        std::fs::create_dir_all(&dir)?;
        let mut uids = MailboxUidList::new(&dir);
        uids.load()?;
        doc.mailboxes.push(MailboxRecord {
            id,
            name: name.to_string(),
            special_use: special,
            uid_validity: uids.uid_validity,
            uid_next: uids.uid_next,
            created_at: now_secs(),
        });
        Ok(id)
    }

    fn strip_trailing_delimiter(name: &str) -> &str {
        name.strip_suffix('/').unwrap_or(name)
    }

    pub async fn create_mailbox(&self, name: &str) -> Result<u64> {
        let name = Self::strip_trailing_delimiter(name);
        if is_inbox(name) {
            return Err(RavenError::conflict("INBOX always exists and cannot be created"));
        }
        let mut doc = self.doc.lock().await;
        // Auto-create superior hierarchy, e.g. "a/b/c" creates "a" and "a/b" first.
        let mut prefix = String::new();
        let segments: Vec<&str> = name.split('/').collect();
        for segment in &segments[..segments.len().saturating_sub(1)] {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(segment);
            if !doc.mailboxes.iter().any(|m| m.name_matches(&prefix)) {
                self.create_mailbox_locked(&mut doc, &prefix, None)?;
            }
        }
        let id = self.create_mailbox_locked(&mut doc, name, None)?;
        self.save_doc(&doc).await?;
        Ok(id)
    }

    pub async fn get_mailbox(&self, name: &str) -> Result<MailboxRecord> {
        let doc = self.doc.lock().await;
        doc.mailboxes
            .iter()
            .find(|m| m.name_matches(name))
            .cloned()
            .ok_or_else(|| RavenError::not_found(format!("mailbox {name} does not exist")))
    }

    pub async fn delete_mailbox(&self, name: &str) -> Result<()> {
        if is_inbox(name) {
            return Err(RavenError::conflict("INBOX cannot be deleted"));
        }
        let mut doc = self.doc.lock().await;
        let has_children = doc.mailboxes.iter().any(|m| mailbox::is_child_of(name, &m.name));
        if has_children {
            return Err(RavenError::conflict(format!("mailbox {name} has inferior children")));
        }
        let idx = doc
            .mailboxes
            .iter()
            .position(|m| m.name_matches(name))
            .ok_or_else(|| RavenError::not_found(format!("mailbox {name} does not exist")))?;
        let record = doc.mailboxes.remove(idx);
        self.save_doc(&doc).await?;
        drop(doc);

        let dir = mailbox::mailbox_dir(&self.root, &record.name);
        let mut uids = MailboxUidList::new(&dir);
        uids.load()?;
        for entry in uids.entries().to_vec() {
            self.release_blob(&entry.content_hash).await?;
        }
        let _ = tokio::fs::remove_dir_all(&dir).await;
        self.uid_lists.lock().await.remove(&record.id);
        Ok(())
    }

    pub async fn rename_mailbox(&self, old: &str, new: &str) -> Result<()> {
        let new = Self::strip_trailing_delimiter(new);
        if is_inbox(new) {
            return Err(RavenError::conflict("cannot rename a mailbox to INBOX"));
        }
        {
            let doc = self.doc.lock().await;
            if doc.mailboxes.iter().any(|m| m.name_matches(new)) {
                return Err(RavenError::already_exists(format!("mailbox {new} already exists")));
            }
        }

        if is_inbox(old) {
            // INBOX itself is special-cased: its messages move to `new`, INBOX stays present
            // and empty, per RFC 3501 6.3.5.
            let inbox = self.get_mailbox("INBOX").await?;
            self.create_mailbox(new).await?;
            let new_record = self.get_mailbox(new).await?;
            let src_dir = mailbox::mailbox_dir(&self.root, &inbox.name);
            let dst_dir = mailbox::mailbox_dir(&self.root, &new_record.name);
            let mut src_uids = MailboxUidList::new(&src_dir);
            src_uids.load()?;
            let mut dst_uids = MailboxUidList::new(&dst_dir);
            dst_uids.load()?;
            for entry in src_uids.entries().to_vec() {
                dst_uids.append(entry.content_hash, entry.flags, entry.internal_date);
            }
            dst_uids.save()?;
            src_uids.rotate_uid_validity();
            src_uids.save()?;
            self.sync_uid_counters(inbox.id, src_uids.uid_validity, src_uids.uid_next).await?;
            self.sync_uid_counters(new_record.id, dst_uids.uid_validity, dst_uids.uid_next).await?;
            return Ok(());
        }

        let mut doc = self.doc.lock().await;
        let renames: Vec<(usize, String)> = doc
            .mailboxes
            .iter()
            .enumerate()
            .filter_map(|(i, m)| {
                if m.name_matches(old) {
                    Some((i, new.to_string()))
                } else if mailbox::is_child_of(old, &m.name) {
                    let suffix = &m.name[old.len()..];
                    Some((i, format!("{new}{suffix}")))
                } else {
                    None
                }
            })
            .collect();
        if renames.is_empty() {
            return Err(RavenError::not_found(format!("mailbox {old} does not exist")));
        }
        for (idx, new_name) in &renames {
            let old_dir = mailbox::mailbox_dir(&self.root, &doc.mailboxes[*idx].name);
            let new_dir = mailbox::mailbox_dir(&self.root, new_name);
            if let Some(parent) = new_dir.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::rename(&old_dir, &new_dir)?;
            doc.mailboxes[*idx].name = new_name.clone();
        }
        self.save_doc(&doc).await?;
        Ok(())
    }

    async fn sync_uid_counters(&self, mailbox_id: u64, uid_validity: u32, uid_next: u32) -> Result<()> {
        let mut doc = self.doc.lock().await;
        if let Some(m) = doc.mailboxes.iter_mut().find(|m| m.id == mailbox_id) {
            m.uid_validity = uid_validity;
            m.uid_next = uid_next;
        }
        self.save_doc(&doc).await
    }

    async fn uid_list_for(&self, mailbox_id: u64, mailbox_name: &str) -> Result<Arc<Mutex<MailboxUidList>>> {
        let mut lists = self.uid_lists.lock().await;
        if let Some(existing) = lists.get(&mailbox_id) {
            return Ok(existing.clone());
        }
        let dir = mailbox::mailbox_dir(&self.root, mailbox_name);
        let mut uids = MailboxUidList::new(&dir);
        uids.load()?;
        let arc = Arc::new(Mutex::new(uids));
        lists.insert(mailbox_id, arc.clone());
        Ok(arc)
    }

    fn blob_path(&self, content_hash: &str) -> PathBuf {
        self.root.join("blobs").join(&content_hash[..2]).join(content_hash)
    }

    fn refcount_path(&self, content_hash: &str) -> PathBuf {
        self.blob_path(content_hash).with_extension("refcount")
    }

    async fn store_blob(&self, raw: &[u8]) -> Result<String> {
        let content_hash = Message::content_id(raw);
        let path = self.blob_path(&content_hash);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let refcount_path = self.refcount_path(&content_hash);
        let count = if path.exists() {
            read_refcount(&refcount_path).await.unwrap_or(1)
        } else {
            tokio::fs::write(&path, raw).await?;
            0
        };
        write_refcount(&refcount_path, count + 1).await?;
        Ok(content_hash)
    }

    async fn release_blob(&self, content_hash: &str) -> Result<()> {
        let refcount_path = self.refcount_path(content_hash);
        let count = read_refcount(&refcount_path).await.unwrap_or(1);
        if count <= 1 {
            let _ = tokio::fs::remove_file(self.blob_path(content_hash)).await;
            let _ = tokio::fs::remove_file(&refcount_path).await;
        } else {
            write_refcount(&refcount_path, count - 1).await?;
        }
        Ok(())
    }

    async fn load_blob(&self, content_hash: &str) -> Result<Vec<u8>> {
        tokio::fs::read(self.blob_path(content_hash)).await.map_err(RavenError::from)
    }

    /// Appends a message to `mailbox_id`, returning `(uid, uidvalidity)`. Atomic: the blob is
    /// written (or its refcount bumped) before the UID is assigned, and either both succeed
    /// or neither does.
    pub async fn append_message(
        &self,
        mailbox_name: &str,
        raw: &[u8],
        flags: BTreeSet<Flag>,
        internal_date: i64,
    ) -> Result<(u32, u32)> {
        let record = self.get_mailbox(mailbox_name).await?;
        let content_hash = self.store_blob(raw).await?;
        let uid_list = self.uid_list_for(record.id, &record.name).await?;
        let mut uids = uid_list.lock().await;
        let uid = uids.append(content_hash, flags, internal_date);
        uids.save()?;
        let uidvalidity = uids.uid_validity;
        let uid_next = uids.uid_next;
        drop(uids);
        self.sync_uid_counters(record.id, uidvalidity, uid_next).await?;
        Ok((uid, uidvalidity))
    }

    /// Same as `append_message` but always targets INBOX, tagging the new membership
    /// `\Recent`, for LMTP delivery.
    pub async fn deliver_to_inbox(&self, raw: &[u8]) -> Result<u32> {
        let mut flags = BTreeSet::new();
        flags.insert(Flag::Recent);
        let (uid, _) = self.append_message("INBOX", raw, flags, now_secs()).await?;
        Ok(uid)
    }

    pub async fn list_mailboxes(&self, reference: &str, pattern: &str) -> Result<Vec<MailboxEntry>> {
        let doc = self.doc.lock().await;
        let full_pattern = format!("{reference}{pattern}");
        if pattern.is_empty() {
            return Ok(vec![MailboxEntry { name: reference.to_string(), selectable: false, has_children: false }]);
        }
        let mut matched = Vec::new();
        let mut implied_parents = BTreeSet::new();
        for m in &doc.mailboxes {
            if crate::imap::wildcard::matches(&full_pattern, &m.name) {
                let has_children = doc.mailboxes.iter().any(|other| mailbox::is_child_of(&m.name, &other.name));
                matched.push((m.name.clone(), true, has_children));
            } else if full_pattern.contains('%') {
                for ancestor in ancestors(&m.name) {
                    if crate::imap::wildcard::matches(&full_pattern, &ancestor) {
                        implied_parents.insert(ancestor);
                    }
                }
            }
        }
        let matched_names: BTreeSet<String> = matched.iter().map(|(n, _, _)| n.clone()).collect();
        for name in implied_parents {
            if !matched_names.contains(&name) {
                matched.push((name, false, true));
            }
        }
        Ok(matched
            .into_iter()
            .map(|(name, selectable, has_children)| MailboxEntry { name, selectable, has_children })
            .collect())
    }

    pub async fn list_subscriptions(&self, reference: &str, pattern: &str) -> Result<Vec<MailboxEntry>> {
        let subs = self.subscriptions.lock().await;
        let doc = self.doc.lock().await;
        let full_pattern = format!("{reference}{pattern}");
        let mut matched = Vec::new();
        let mut implied_parents = BTreeSet::new();
        for name in subs.iter() {
            if crate::imap::wildcard::matches(&full_pattern, name) {
                let exists = doc.mailboxes.iter().any(|m| m.name_matches(name));
                matched.push((name.clone(), exists));
            } else if full_pattern.contains('%') {
                for ancestor in ancestors(name) {
                    if crate::imap::wildcard::matches(&full_pattern, &ancestor) {
                        implied_parents.insert(ancestor);
                    }
                }
            }
        }
        let matched_names: BTreeSet<String> = matched.iter().map(|(n, _)| n.clone()).collect();
        for name in implied_parents {
            if !matched_names.contains(&name) {
                matched.push((name, false));
            }
        }
        Ok(matched
            .into_iter()
            .map(|(name, exists)| MailboxEntry { name, selectable: exists, has_children: false })
            .collect())
    }

    pub async fn subscribe(&self, name: &str) -> Result<()> {
        let mut subs = self.subscriptions.lock().await;
        if !subs.iter().any(|s| names_equal(s, name)) {
            subs.push(name.to_string());
            self.save_subscriptions(&subs).await?;
        }
        Ok(())
    }

    pub async fn unsubscribe(&self, name: &str) -> Result<()> {
        let mut subs = self.subscriptions.lock().await;
        let before = subs.len();
        subs.retain(|s| !names_equal(s, name));
        if subs.len() == before {
            return Err(RavenError::not_found(format!("{name} was never subscribed")));
        }
        self.save_subscriptions(&subs).await
    }

    /// Loads every live message in a mailbox, in UID order, with its sequence number in the
    /// current snapshot.
    pub async fn snapshot(&self, mailbox_name: &str) -> Result<Vec<FetchCandidate>> {
        let record = self.get_mailbox(mailbox_name).await?;
        let uid_list = self.uid_list_for(record.id, &record.name).await?;
        let uids = uid_list.lock().await;
        let mut entries = uids.entries().to_vec();
        entries.sort_by_key(|e| e.uid);
        drop(uids);

        let mut out = Vec::with_capacity(entries.len());
        for (i, entry) in entries.into_iter().enumerate() {
            let raw = self.load_blob(&entry.content_hash).await?;
            let message = build_message(&entry, raw);
            out.push(FetchCandidate {
                uid: entry.uid,
                sequence_number: (i + 1) as u32,
                flags: entry.flags.clone(),
                internal_date: entry.internal_date,
                message,
            });
        }
        Ok(out)
    }

    pub async fn search(&self, mailbox_name: &str, key: &SearchKey) -> Result<Vec<(u32, u32)>> {
        let snapshot = self.snapshot(mailbox_name).await?;
        let mut hits = Vec::new();
        for candidate in &snapshot {
            let membership = MembershipEntry {
                uid: candidate.uid,
                content_hash: String::new(),
                flags: candidate.flags.clone(),
                internal_date: candidate.internal_date,
            };
            let ctx = SearchContext {
                message: &candidate.message,
                membership: &membership,
                sequence_number: candidate.sequence_number,
            };
            if evaluate(key, &ctx) {
                hits.push((candidate.sequence_number, candidate.uid));
            }
        }
        Ok(hits)
    }

    pub async fn store_flags(
        &self,
        mailbox_name: &str,
        uids: &[u32],
        op: StoreOp,
        flags: BTreeSet<Flag>,
    ) -> Result<Vec<FlagsResult>> {
        let record = self.get_mailbox(mailbox_name).await?;
        let uid_list = self.uid_list_for(record.id, &record.name).await?;
        let mut list = uid_list.lock().await;
        let mut all: Vec<MembershipEntry> = list.entries().to_vec();
        all.sort_by_key(|e| e.uid);
        let mut results = Vec::new();
        for (i, entry) in all.iter().enumerate() {
            if !uids.contains(&entry.uid) {
                continue;
            }
            let new_flags = match op {
                StoreOp::Replace => flags.clone(),
                StoreOp::Add => entry.flags.union(&flags).cloned().collect(),
                StoreOp::Remove => entry.flags.difference(&flags).cloned().collect(),
            };
            list.set_flags(entry.uid, new_flags.clone());
            results.push(FlagsResult { uid: entry.uid, sequence_number: (i + 1) as u32, flags: new_flags });
        }
        list.save()?;
        Ok(results)
    }

    pub async fn copy(&self, src_mailbox: &str, uids: &[u32], dest_name: &str) -> Result<Vec<(u32, u32)>> {
        let dest_exists = self.get_mailbox(dest_name).await.is_ok();
        if !dest_exists {
            return Err(RavenError::TryCreate(format!("destination mailbox {dest_name} does not exist")));
        }
        let src_record = self.get_mailbox(src_mailbox).await?;
        let dest_record = self.get_mailbox(dest_name).await?;
        let src_uid_list = self.uid_list_for(src_record.id, &src_record.name).await?;
        let src = src_uid_list.lock().await;
        let mut to_copy = Vec::new();
        for uid in uids {
            if let Some(entry) = src.get(*uid) {
                to_copy.push(entry.clone());
            }
        }
        drop(src);

        let dest_uid_list = self.uid_list_for(dest_record.id, &dest_record.name).await?;
        let mut dest = dest_uid_list.lock().await;
        let mut assigned = Vec::new();
        for entry in &to_copy {
            let refcount_path = self.refcount_path(&entry.content_hash);
            let count = read_refcount(&refcount_path).await.unwrap_or(1);
            write_refcount(&refcount_path, count + 1).await?;
            let mut flags = entry.flags.clone();
            flags.insert(Flag::Recent);
            let new_uid = dest.append(entry.content_hash.clone(), flags, entry.internal_date);
            assigned.push((entry.uid, new_uid));
        }
        dest.save()?;
        let uidvalidity = dest.uid_validity;
        let uid_next = dest.uid_next;
        drop(dest);
        self.sync_uid_counters(dest_record.id, uidvalidity, uid_next).await?;
        Ok(assigned)
    }

    /// Removes every `\Deleted`-flagged message from `mailbox_name`. Returns the removed
    /// sequence numbers in descending order, ready to drive `* N EXPUNGE` responses.
    pub async fn expunge(&self, mailbox_name: &str) -> Result<Vec<u32>> {
        let record = self.get_mailbox(mailbox_name).await?;
        let uid_list = self.uid_list_for(record.id, &record.name).await?;
        let mut list = uid_list.lock().await;
        let mut all = list.entries().to_vec();
        all.sort_by_key(|e| e.uid);

        let mut removed_sequences = Vec::new();
        let mut removed_hashes = Vec::new();
        for (i, entry) in all.iter().enumerate() {
            if entry.flags.contains(&Flag::Deleted) {
                removed_sequences.push((i + 1) as u32);
                removed_hashes.push(entry.content_hash.clone());
            }
        }
        for entry in &all {
            if entry.flags.contains(&Flag::Deleted) {
                list.remove(entry.uid);
            }
        }
        list.save()?;
        drop(list);
        for hash in removed_hashes {
            self.release_blob(&hash).await?;
        }
        removed_sequences.sort_unstable_by(|a, b| b.cmp(a));
        Ok(removed_sequences)
    }
}

fn ancestors(name: &str) -> Vec<String> {
    let mut out = Vec::new();
    let segments: Vec<&str> = name.split('/').collect();
    let mut prefix = String::new();
    for segment in &segments[..segments.len().saturating_sub(1)] {
        if !prefix.is_empty() {
            prefix.push('/');
        }
        prefix.push_str(segment);
        out.push(prefix.clone());
    }
    out
}

fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

fn build_message(entry: &MembershipEntry, raw: Vec<u8>) -> Message {
    let envelope = extract_envelope(&raw);
    Message {
        id: entry.content_hash.clone(),
        size: raw.len() as u64,
        internal_date: entry.internal_date,
        raw,
        envelope,
    }
}

fn extract_envelope(raw: &[u8]) -> Envelope {
    match parse_envelope(raw) {
        Ok(headers) => Envelope {
            date: headers.date.map(|d| d.to_rfc2822()),
            subject: headers.subject,
            from: headers.from.into_iter().map(address_from_email).collect(),
            sender: headers.sender.into_iter().map(address_from_email).collect(),
            reply_to: headers.reply_to.into_iter().map(address_from_email).collect(),
            to: headers.to.into_iter().map(address_from_email).collect(),
            cc: headers.cc.into_iter().map(address_from_email).collect(),
            bcc: headers.bcc.into_iter().map(address_from_email).collect(),
            in_reply_to: headers.in_reply_to.map(|m| m.to_string()),
            message_id: headers.message_id.map(|m| m.to_string()),
        },
        Err(_) => Envelope::default(),
    }
}

fn address_from_email(addr: crate::mime::EmailAddress) -> Address {
    Address {
        display_name: addr.display_name,
        local_part: addr.local_part,
        domain: Some(addr.domain),
    }
}

async fn read_refcount(path: &Path) -> Option<u32> {
    tokio::fs::read_to_string(path).await.ok()?.trim().parse().ok()
}

async fn write_refcount(path: &Path, count: u32) -> Result<()> {
    tokio::fs::write(path, count.to_string()).await.map_err(RavenError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn default_mailboxes_are_idempotent() {
        let dir = tempdir().unwrap();
        let partition = UserPartition::open(dir.path(), 1).unwrap();
        partition.ensure_default_mailboxes().await.unwrap();
        partition.ensure_default_mailboxes().await.unwrap();
        let inbox = partition.get_mailbox("INBOX").await.unwrap();
        assert_eq!(inbox.name, "INBOX");
    }

    #[tokio::test]
    async fn append_then_snapshot_round_trips() {
        let dir = tempdir().unwrap();
        let partition = UserPartition::open(dir.path(), 1).unwrap();
        partition.ensure_default_mailboxes().await.unwrap();
        let raw = b"From: a@b.com\r\nSubject: hi\r\n\r\nbody";
        let uid = partition.deliver_to_inbox(raw).await.unwrap();
        assert_eq!(uid, 1);
        let snapshot = partition.snapshot("INBOX").await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].uid, 1);
    }

    #[tokio::test]
    async fn cannot_delete_inbox() {
        let dir = tempdir().unwrap();
        let partition = UserPartition::open(dir.path(), 1).unwrap();
        partition.ensure_default_mailboxes().await.unwrap();
        let err = partition.delete_mailbox("INBOX").await.unwrap_err();
        assert!(matches!(err, RavenError::Conflict(_)));
    }

    #[tokio::test]
    async fn cannot_delete_mailbox_with_children() {
        let dir = tempdir().unwrap();
        let partition = UserPartition::open(dir.path(), 1).unwrap();
        partition.ensure_default_mailboxes().await.unwrap();
        partition.create_mailbox("Foo").await.unwrap();
        partition.create_mailbox("Foo/Bar").await.unwrap();
        let err = partition.delete_mailbox("Foo").await.unwrap_err();
        assert!(matches!(err, RavenError::Conflict(_)));
    }

    #[tokio::test]
    async fn expunge_returns_descending_sequence_numbers() {
        let dir = tempdir().unwrap();
        let partition = UserPartition::open(dir.path(), 1).unwrap();
        partition.ensure_default_mailboxes().await.unwrap();
        partition.deliver_to_inbox(b"Subject: one\r\n\r\nbody1").await.unwrap();
        let uid2 = partition.deliver_to_inbox(b"Subject: two\r\n\r\nbody2").await.unwrap();
        partition.deliver_to_inbox(b"Subject: three\r\n\r\nbody3").await.unwrap();
        let mut flags = BTreeSet::new();
        flags.insert(Flag::Deleted);
        partition.store_flags("INBOX", &[uid2], StoreOp::Add, flags).await.unwrap();
        let removed = partition.expunge("INBOX").await.unwrap();
        assert_eq!(removed, vec![2]);
    }
}
