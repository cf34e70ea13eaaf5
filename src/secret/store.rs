// src/secret/store.rs

//! The versioned key-value store coordinated secrets live in.
//!
//! Any store with create-if-absent and compare-and-swap on a per-record
//! version can back a [`CoordinatedSecretSource`](super::CoordinatedSecretSource).
//! [`MemoryStore`] is the in-process implementation.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use crate::error;

/// A record and the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedRecord {
    pub data: Bytes,
    pub version: i64,
}

/// Failures reported by a [`CoordinationStore`].
#[derive(Debug)]
pub enum StoreError {
    /// `create` found a record already at the path.
    AlreadyExists,
    NotFound,
    /// `set` was given a version that is no longer current.
    BadVersion,
    /// The store could not be reached.
    Unavailable(Box<dyn StdError + Send + Sync>),
}

impl StoreError {
    pub fn unavailable<E: Into<Box<dyn StdError + Send + Sync>>>(e: E) -> Self {
        StoreError::Unavailable(e.into())
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::AlreadyExists => f.write_str("record already exists"),
            StoreError::NotFound => f.write_str("record not found"),
            StoreError::BadVersion => f.write_str("record version changed"),
            StoreError::Unavailable(e) => write!(f, "store unavailable: {e}"),
        }
    }
}

impl StdError for StoreError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            StoreError::Unavailable(e) => Some(&**e),
            _ => None,
        }
    }
}

impl From<StoreError> for crate::Error {
    fn from(e: StoreError) -> crate::Error {
        match e {
            StoreError::BadVersion => error::conflict(e),
            e => error::store(e),
        }
    }
}

/// A versioned store shared by every process of a fleet.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Creates a record at `path`, failing with
    /// [`StoreError::AlreadyExists`] if one is there.
    async fn create(&self, path: &str, data: Bytes) -> Result<(), StoreError>;

    async fn get(&self, path: &str) -> Result<VersionedRecord, StoreError>;

    /// Replaces the record if its version is still `expected_version` and
    /// returns the new version.
    async fn set(&self, path: &str, data: Bytes, expected_version: i64)
        -> Result<i64, StoreError>;
}

/// An in-process [`CoordinationStore`].
///
/// Versions start at 0 on create and increase by one on every successful
/// `set`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, VersionedRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn create(&self, path: &str, data: Bytes) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        if records.contains_key(path) {
            return Err(StoreError::AlreadyExists);
        }
        records.insert(path.to_owned(), VersionedRecord { data, version: 0 });
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<VersionedRecord, StoreError> {
        self.records
            .read()
            .await
            .get(path)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn set(
        &self,
        path: &str,
        data: Bytes,
        expected_version: i64,
    ) -> Result<i64, StoreError> {
        let mut records = self.records.write().await;
        let record = records.get_mut(path).ok_or(StoreError::NotFound)?;
        if record.version != expected_version {
            return Err(StoreError::BadVersion);
        }
        record.data = data;
        record.version += 1;
        Ok(record.version)
    }
}
