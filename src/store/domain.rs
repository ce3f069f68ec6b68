/*
 * domain.rs
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

//! Domain and user registry: the small, rarely-written directory that maps
//! `local_part@domain` onto a user's partition directory on disk. Kept as a
//! single JSON document under the data root rather than one file per domain,
//! since the whole registry is small and read on every LMTP RCPT TO and IMAP
//! LOGIN.

use crate::error::{RavenError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Domain {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub local_part: String,
    pub domain_id: u64,
    #[serde(default)]
    pub default_mailboxes_created: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryDoc {
    next_domain_id: u64,
    next_user_id: u64,
    domains: Vec<Domain>,
    users: Vec<User>,
}

/// Process-wide directory of domains and users, persisted as a single JSON file.
/// Callers serialize writes through `&mut self`; the daemon holds one instance
/// behind an async mutex (see `Store`).
#[derive(Debug)]
pub struct Registry {
    path: PathBuf,
    doc: RegistryDoc,
}

impl Registry {
    pub fn open(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join("registry.json");
        let doc = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str(&raw)
                .map_err(|e| RavenError::Fatal(format!("corrupt registry.json: {e}")))?
        } else {
            RegistryDoc::default()
        };
        Ok(Self { path, doc })
    }

    fn save(&self) -> Result<()> {
        let tmp = self.path.with_extension("tmp");
        let raw = serde_json::to_string_pretty(&self.doc)
            .map_err(|e| RavenError::Fatal(format!("serializing registry.json: {e}")))?;
        std::fs::write(&tmp, raw)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn find_domain(&self, name: &str) -> Option<&Domain> {
        let folded = name.to_ascii_lowercase();
        self.doc.domains.iter().find(|d| d.name == folded)
    }

    pub fn domain(&self, name: &str) -> Option<Domain> {
        self.find_domain(name).cloned()
    }

    pub fn get_or_create_domain(&mut self, name: &str) -> Result<Domain> {
        let folded = name.to_ascii_lowercase();
        if let Some(d) = self.find_domain(&folded) {
            return Ok(d.clone());
        }
        let id = self.doc.next_domain_id;
        self.doc.next_domain_id += 1;
        let domain = Domain { id, name: folded };
        self.doc.domains.push(domain.clone());
        self.save()?;
        Ok(domain)
    }

    pub fn user(&self, domain_id: u64, local_part: &str) -> Option<User> {
        let folded = local_part.to_ascii_lowercase();
        self.doc
            .users
            .iter()
            .find(|u| u.domain_id == domain_id && u.local_part == folded)
            .cloned()
    }

    pub fn user_by_id(&self, id: u64) -> Option<User> {
        self.doc.users.iter().find(|u| u.id == id).cloned()
    }

    pub fn get_or_create_user(&mut self, domain_id: u64, local_part: &str) -> Result<User> {
        let folded = local_part.to_ascii_lowercase();
        if let Some(u) = self.user(domain_id, &folded) {
            return Ok(u);
        }
        let id = self.doc.next_user_id;
        self.doc.next_user_id += 1;
        let user = User {
            id,
            local_part: folded,
            domain_id,
            default_mailboxes_created: false,
        };
        self.doc.users.push(user.clone());
        self.save()?;
        Ok(user)
    }

    pub fn mark_default_mailboxes_created(&mut self, user_id: u64) -> Result<()> {
        if let Some(u) = self.doc.users.iter_mut().find(|u| u.id == user_id) {
            u.default_mailboxes_created = true;
        }
        self.save()
    }

    pub fn domains_by_id(&self) -> HashMap<u64, Domain> {
        self.doc.domains.iter().map(|d| (d.id, d.clone())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn domain_and_user_lookup_is_case_folded() {
        let dir = tempdir().unwrap();
        let mut reg = Registry::open(dir.path()).unwrap();
        let d = reg.get_or_create_domain("Example.COM").unwrap();
        assert_eq!(d.name, "example.com");
        let u = reg.get_or_create_user(d.id, "Alice").unwrap();
        assert_eq!(u.local_part, "alice");
        let again = reg.user(d.id, "ALICE").unwrap();
        assert_eq!(again.id, u.id);
    }

    #[test]
    fn registry_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let user_id = {
            let mut reg = Registry::open(dir.path()).unwrap();
            let d = reg.get_or_create_domain("example.com").unwrap();
            reg.get_or_create_user(d.id, "bob").unwrap().id
        };
        let reg = Registry::open(dir.path()).unwrap();
        assert!(reg.user_by_id(user_id).is_some());
    }
}
