/*
 * store.rs
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

//! Top-level store: a shared domain/user registry plus per-user partitions,
//! opened lazily and cached. Eviction is permitted but never evicts a
//! partition still held by an active session.

use crate::error::{RavenError, Result};
use crate::store::domain::{Domain, Registry, User};
use crate::store::partition::UserPartition;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Above this many cached partitions, `evict_idle` will drop any partition
/// whose only reference is the cache's own `Arc`.
const DEFAULT_CACHE_CAP: usize = 256;

pub struct Store {
    data_dir: PathBuf,
    registry: Mutex<Registry>,
    partitions: Mutex<HashMap<u64, Arc<UserPartition>>>,
    cache_cap: usize,
}

impl Store {
    pub async fn open(data_dir: PathBuf) -> Result<Self> {
        tokio::fs::create_dir_all(&data_dir).await?;
        let registry = Registry::open(&data_dir)?;
        Ok(Self {
            data_dir,
            registry: Mutex::new(registry),
            partitions: Mutex::new(HashMap::new()),
            cache_cap: DEFAULT_CACHE_CAP,
        })
    }

    pub fn data_dir(&self) -> &std::path::Path {
        &self.data_dir
    }

    /// Idempotent: returns the existing user if the (domain, local_part) pair is
    /// already registered, provisioning default mailboxes on first creation only.
    pub async fn create_user(&self, domain_name: &str, local_part: &str) -> Result<User> {
        let (user, is_new) = {
            let mut registry = self.registry.lock().await;
            let domain = registry.get_or_create_domain(domain_name)?;
            let existing = registry.user(domain.id, local_part).is_some();
            let user = registry.get_or_create_user(domain.id, local_part)?;
            (user, !existing)
        };
        if is_new {
            let partition = self.open_partition(user.id).await?;
            partition.ensure_default_mailboxes().await?;
            let mut registry = self.registry.lock().await;
            registry.mark_default_mailboxes_created(user.id)?;
        }
        Ok(user)
    }

    pub async fn domain(&self, name: &str) -> Option<Domain> {
        self.registry.lock().await.domain(name)
    }

    pub async fn user(&self, domain_id: u64, local_part: &str) -> Option<User> {
        self.registry.lock().await.user(domain_id, local_part)
    }

    pub async fn find_user_by_email(&self, email: &str) -> Option<User> {
        let (local_part, domain_name) = email.rsplit_once('@')?;
        let domain = self.domain(domain_name).await?;
        self.user(domain.id, local_part).await
    }

    /// Resolve (and lazily create + cache) a user's partition. Callers hold the
    /// returned `Arc` for the lifetime of their session so the partition is never
    /// evicted out from under an in-flight SELECT/IMAP command.
    pub async fn open_partition(&self, user_id: u64) -> Result<Arc<UserPartition>> {
        let mut partitions = self.partitions.lock().await;
        if let Some(existing) = partitions.get(&user_id) {
            return Ok(existing.clone());
        }
        let partition = Arc::new(UserPartition::open(&self.data_dir, user_id)?);
        partitions.insert(user_id, partition.clone());
        Ok(partition)
    }

    pub async fn partition_for_user(&self, domain_name: &str, local_part: &str) -> Result<Arc<UserPartition>> {
        let user = self
            .user(
                self.domain(domain_name)
                    .await
                    .ok_or_else(|| RavenError::not_found("unknown domain"))?
                    .id,
                local_part,
            )
            .await
            .ok_or_else(|| RavenError::not_found("unknown user"))?;
        self.open_partition(user.id).await
    }

    /// Drop cached partitions with no external holders, down to `cache_cap`.
    /// A partition still referenced by a live session (`Arc::strong_count() > 1`)
    /// is always kept regardless of cache size.
    pub async fn evict_idle(&self) {
        let mut partitions = self.partitions.lock().await;
        if partitions.len() <= self.cache_cap {
            return;
        }
        let before = partitions.len();
        partitions.retain(|_, p| Arc::strong_count(p) > 1);
        debug!(before, after = partitions.len(), "evicted idle store partitions");
    }

    #[cfg(test)]
    pub fn with_cache_cap(mut self, cap: usize) -> Self {
        self.cache_cap = cap;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_user_is_idempotent_and_provisions_inbox() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().to_path_buf()).await.unwrap();
        let u1 = store.create_user("example.com", "alice").await.unwrap();
        let u2 = store.create_user("example.com", "alice").await.unwrap();
        assert_eq!(u1.id, u2.id);

        let partition = store.open_partition(u1.id).await.unwrap();
        assert!(partition.get_mailbox("INBOX").await.is_ok());
    }

    #[tokio::test]
    async fn open_partition_returns_same_cached_instance() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().to_path_buf()).await.unwrap();
        let user = store.create_user("example.com", "bob").await.unwrap();
        let a = store.open_partition(user.id).await.unwrap();
        let b = store.open_partition(user.id).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn evict_idle_keeps_referenced_partitions() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().to_path_buf()).await.unwrap().with_cache_cap(0);
        let user = store.create_user("example.com", "carol").await.unwrap();
        let held = store.open_partition(user.id).await.unwrap();
        store.evict_idle().await;
        assert!(store.partitions.lock().await.contains_key(&user.id));
        drop(held);
    }
}
