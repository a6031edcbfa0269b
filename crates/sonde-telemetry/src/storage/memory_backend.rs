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

//! A backend keeping every partition in memory.

use crate::storage::backend::{
    BackendStats, LoadedRecords, StorageBackend, StorageError, StorageRecord, StorageResult,
};
use crate::storage::StorageKey;
use sonde_core::telemetry::{Lifetime, MetricValue};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

/// In-memory storage backend, used by tests and ephemeral engines.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    partitions: [RwLock<BTreeMap<StorageKey, MetricValue>>; 3],
    stats: RwLock<BackendStats>,
    fail_writes: AtomicBool,
}

impl InMemoryBackend {
    /// Create a new in-memory backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following write fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of entries currently held for a lifetime.
    pub fn entry_count(&self, lifetime: Lifetime) -> usize {
        self.partitions[lifetime.index()]
            .read()
            .map(|entries| entries.len())
            .unwrap_or(0)
    }
}

impl StorageBackend for InMemoryBackend {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn load(&self, lifetime: Lifetime) -> StorageResult<LoadedRecords> {
        let entries = self.partitions[lifetime.index()]
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(LoadedRecords {
            entries: entries
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
            skipped: 0,
        })
    }

    fn apply(&self, lifetime: Lifetime, record: &StorageRecord) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Rejected("writes disabled".to_string()));
        }
        let mut entries = self.partitions[lifetime.index()]
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        record.apply_to(&mut entries);
        if let Ok(mut stats) = self.stats.write() {
            stats.applied_records += 1;
        }
        Ok(())
    }

    fn stats(&self) -> BackendStats {
        self.stats.read().map(|s| s.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(storage: &str, metric: &str, value: MetricValue) -> StorageRecord {
        StorageRecord::Put {
            key: StorageKey::new(storage, metric),
            value,
        }
    }

    #[test]
    fn test_in_memory_backend_basic_operations() {
        let backend = InMemoryBackend::new();

        backend
            .apply(Lifetime::Ping, &put("store1", "test.counter", MetricValue::Counter(42)))
            .unwrap();
        backend
            .apply(Lifetime::User, &put("store1", "test.flag", MetricValue::Boolean(true)))
            .unwrap();

        let ping = backend.load(Lifetime::Ping).unwrap();
        assert_eq!(ping.entries.len(), 1);
        assert_eq!(ping.entries[0].1.as_counter(), Some(42));
        assert!(backend.load(Lifetime::Application).unwrap().entries.is_empty());
        assert_eq!(backend.stats().applied_records, 2);
    }

    #[test]
    fn test_overwrites_keep_one_entry() {
        let backend = InMemoryBackend::new();
        for i in 0..5 {
            backend
                .apply(Lifetime::Ping, &put("store1", "test.counter", MetricValue::Counter(i)))
                .unwrap();
        }
        assert_eq!(backend.entry_count(Lifetime::Ping), 1);
        assert_eq!(
            backend.load(Lifetime::Ping).unwrap().entries[0].1,
            MetricValue::Counter(4)
        );
    }

    #[test]
    fn test_rejected_writes_are_not_applied() {
        let backend = InMemoryBackend::new();
        backend.set_fail_writes(true);

        let result = backend.apply(
            Lifetime::Ping,
            &put("store1", "test.counter", MetricValue::Counter(1)),
        );
        assert!(matches!(result, Err(StorageError::Rejected(_))));
        assert_eq!(backend.entry_count(Lifetime::Ping), 0);

        backend.set_fail_writes(false);
        assert!(backend.apply(Lifetime::Ping, &StorageRecord::ClearAll).is_ok());
    }
}
