// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The storage backend contract and the records it applies.

use crate::storage::StorageKey;
use serde::{Deserialize, Serialize};
use sonde_core::telemetry::{Lifetime, MetricValue, MetricsError};
use std::collections::BTreeMap;
use std::fmt::Debug;
use thiserror::Error;

/// A single durable mutation of one lifetime's partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StorageRecord {
    /// Sets the value of a key.
    Put {
        /// The key being written.
        key: StorageKey,
        /// The new value.
        value: MetricValue,
    },
    /// Deletes one key.
    Remove {
        /// The key being removed.
        key: StorageKey,
    },
    /// Deletes every key of one storage.
    ClearStorage {
        /// The storage being cleared.
        storage: String,
    },
    /// Deletes every key of the partition.
    ClearAll,
}

impl StorageRecord {
    /// Applies this record to an in-memory partition.
    pub fn apply_to(&self, entries: &mut BTreeMap<StorageKey, MetricValue>) {
        match self {
            StorageRecord::Put { key, value } => {
                entries.insert(key.clone(), value.clone());
            }
            StorageRecord::Remove { key } => {
                entries.remove(key);
            }
            StorageRecord::ClearStorage { storage } => {
                entries.retain(|key, _| &key.storage != storage);
            }
            StorageRecord::ClearAll => entries.clear(),
        }
    }
}

/// The persisted entries of one lifetime.
#[derive(Debug, Default)]
pub struct LoadedRecords {
    /// Every readable entry, ordered by key.
    pub entries: Vec<(StorageKey, MetricValue)>,
    /// Number of entries that could not be read and were skipped.
    pub skipped: usize,
}

/// Errors raised by storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The underlying file system failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The database refused an operation.
    #[error("database error: {0}")]
    Database(String),
    /// A value could not be encoded.
    #[error("failed to encode value: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    /// A thread panicked while holding a storage lock.
    #[error("storage lock poisoned")]
    LockPoisoned,
    /// The backend refused the write.
    #[error("write rejected: {0}")]
    Rejected(String),
}

impl From<StorageError> for MetricsError {
    fn from(e: StorageError) -> Self {
        MetricsError::StorageError(e.to_string())
    }
}

/// Result of a backend operation.
pub type StorageResult<T> = Result<T, StorageError>;

/// Durable storage for metric values, one partition per [`Lifetime`].
pub trait StorageBackend: Send + Sync + Debug + 'static {
    /// Get a reference to this object as Any for downcasting
    fn as_any(&self) -> &dyn std::any::Any;

    /// Reads every persisted entry of a lifetime.
    ///
    /// Unreadable entries are skipped one by one and counted.
    fn load(&self, lifetime: Lifetime) -> StorageResult<LoadedRecords>;

    /// Applies a record; returns only once the change is durable.
    fn apply(&self, lifetime: Lifetime, record: &StorageRecord) -> StorageResult<()>;

    /// Get statistics about this backend
    fn stats(&self) -> BackendStats;
}

/// Counters describing a backend's activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendStats {
    /// Records applied since the backend was opened
    pub applied_records: usize,
    /// Entries skipped while loading because they were unreadable
    pub skipped_records: usize,
}
