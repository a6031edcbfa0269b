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

//! Durable, lifetime-partitioned metric storage.

pub mod backend;
pub mod engine;
pub mod memory_backend;
pub mod redb_backend;

use serde::{Deserialize, Serialize};
use std::fmt::Display;

pub use self::backend::{
    BackendStats, LoadedRecords, StorageBackend, StorageError, StorageRecord, StorageResult,
};
pub use self::engine::MetricStore;
pub use self::memory_backend::InMemoryBackend;
pub use self::redb_backend::RedbBackend;

/// Addresses one stored value inside a lifetime partition.
///
/// `storage` is the ping (or internal storage) name, `metric` the metric
/// identifier, or `identifier/label` for one label of a labeled metric.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StorageKey {
    /// The storage (ping) name.
    pub storage: String,
    /// The metric identifier.
    pub metric: String,
}

impl StorageKey {
    /// Creates a key.
    pub fn new(storage: impl Into<String>, metric: impl Into<String>) -> Self {
        Self {
            storage: storage.into(),
            metric: metric.into(),
        }
    }
}

impl Display for StorageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.storage, self.metric)
    }
}
