// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Resource store interface and the in-memory adapter.
//!
//! The pipeline only talks to [`Repository`]; any durable backend can be
//! plugged in by implementing it for the three entity kinds.

use crate::error::StoreError;
use crate::models::{Blog, Entry, Record, User};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Store result type alias
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// CRUD capability set for one entity kind.
#[async_trait]
pub trait Repository<T: Record>: Send + Sync {
    /// Insert a record; the store assigns its id.
    async fn create(&self, record: T) -> StoreResult<T>;

    async fn get(&self, id: u64) -> StoreResult<T>;

    /// Replace the stored record with the same id.
    async fn update(&self, record: T) -> StoreResult<T>;

    async fn delete(&self, id: u64) -> StoreResult<()>;

    /// Every record, in ascending id order.
    async fn list(&self) -> StoreResult<Vec<T>>;
}

/// Handles to the three repositories.
#[derive(Clone)]
pub struct ResourceStore {
    pub users: Arc<dyn Repository<User>>,
    pub blogs: Arc<dyn Repository<Blog>>,
    pub entries: Arc<dyn Repository<Entry>>,
}

impl ResourceStore {
    /// Store backed by process memory.
    pub fn in_memory() -> Self {
        Self {
            users: Arc::new(MemoryRepository::<User>::new()),
            blogs: Arc::new(MemoryRepository::<Blog>::new()),
            entries: Arc::new(MemoryRepository::<Entry>::new()),
        }
    }

    /// Find the user owning an access key.
    pub async fn user_by_accesskey(&self, accesskey: &str) -> StoreResult<Option<User>> {
        Ok(self
            .users
            .list()
            .await?
            .into_iter()
            .find(|user| user.accesskey == accesskey))
    }

    /// Delete a blog together with its entries.
    pub async fn delete_blog(&self, id: u64) -> StoreResult<()> {
        self.blogs.delete(id).await?;
        for entry in self.entries.list().await? {
            if entry.blog == id {
                self.entries.delete(entry.id).await?;
            }
        }
        Ok(())
    }

    /// Delete a user and drop it from every entry's author list.
    pub async fn delete_user(&self, id: u64) -> StoreResult<()> {
        self.users.delete(id).await?;
        for mut entry in self.entries.list().await? {
            if entry.users.contains(&id) {
                entry.users.retain(|user| *user != id);
                self.entries.update(entry).await?;
            }
        }
        Ok(())
    }
}

/// In-memory repository with store-assigned ascending ids.
pub struct MemoryRepository<T> {
    records: RwLock<BTreeMap<u64, T>>,
    next_id: AtomicU64,
}

impl<T: Record> MemoryRepository<T> {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn check_unique(records: &BTreeMap<u64, T>, candidate: &T) -> StoreResult<()> {
        for (field, value) in candidate.unique_keys() {
            let taken = records.values().any(|other| {
                other.id() != candidate.id()
                    && other
                        .unique_keys()
                        .iter()
                        .any(|(f, v)| *f == field && *v == value)
            });
            if taken {
                return Err(StoreError::Conflict {
                    field: field.to_string(),
                    message: format!("{} with this {} already exists.", T::KIND.name(), field),
                });
            }
        }
        Ok(())
    }
}

impl<T: Record> Default for MemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Record> Repository<T> for MemoryRepository<T> {
    async fn create(&self, mut record: T) -> StoreResult<T> {
        let mut records = self.records.write().await;
        record.set_id(0);
        Self::check_unique(&records, &record)?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        record.set_id(id);
        records.insert(id, record.clone());
        debug!(kind = T::KIND.name(), id, "Created record");
        Ok(record)
    }

    async fn get(&self, id: u64) -> StoreResult<T> {
        self.records
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn update(&self, record: T) -> StoreResult<T> {
        let mut records = self.records.write().await;
        if !records.contains_key(&record.id()) {
            return Err(StoreError::NotFound);
        }
        Self::check_unique(&records, &record)?;
        records.insert(record.id(), record.clone());
        Ok(record)
    }

    async fn delete(&self, id: u64) -> StoreResult<()> {
        self.records
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn list(&self) -> StoreResult<Vec<T>> {
        Ok(self.records.read().await.values().cloned().collect())
    }
}
