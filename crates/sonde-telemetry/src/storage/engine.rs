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

//! The metric store: live values in memory, every mutation persisted first.

use crate::storage::backend::{StorageBackend, StorageError, StorageRecord};
use crate::storage::memory_backend::InMemoryBackend;
use crate::storage::StorageKey;
use sonde_core::telemetry::metrics::LABEL_SEPARATOR;
use sonde_core::telemetry::{CommonMetricData, Lifetime, MetricValue, MetricsResult};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};

/// One lifetime's live values. `None` marks a key that was created but never written.
type Partition = RwLock<HashMap<StorageKey, Mutex<Option<MetricValue>>>>;

/// A point-in-time copy of one storage, across all lifetimes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StorageSnapshot {
    /// Values keyed by metric identifier (`identifier/label` for labeled values).
    pub entries: BTreeMap<String, MetricValue>,
}

impl StorageSnapshot {
    /// Whether nothing was recorded in the storage.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up one identifier.
    pub fn get(&self, identifier: &str) -> Option<&MetricValue> {
        self.entries.get(identifier)
    }
}

/// Thread-safe, durable storage of metric values.
///
/// Values live in one partition per [`Lifetime`]. Writers take the partition's
/// read lock plus the key's mutex, so writers of distinct keys never wait on
/// each other. Each accepted mutation is applied to the backend before the
/// in-memory value changes.
#[derive(Debug)]
pub struct MetricStore {
    backend: Arc<dyn StorageBackend>,
    partitions: [Partition; 3],
}

impl MetricStore {
    /// Opens a store over `backend`, loading every persisted entry.
    pub fn open(backend: Arc<dyn StorageBackend>) -> MetricsResult<Self> {
        let store = Self {
            backend,
            partitions: Default::default(),
        };

        for lifetime in Lifetime::ALL {
            let loaded = store.backend.load(lifetime)?;
            log::info!(
                "Loaded {} {} entries ({} skipped)",
                loaded.entries.len(),
                lifetime,
                loaded.skipped
            );

            let mut map = store.partition(lifetime).write().map_err(poisoned)?;
            for (key, value) in loaded.entries {
                map.insert(key, Mutex::new(Some(value)));
            }
        }

        Ok(store)
    }

    /// A store backed by memory only.
    pub fn in_memory() -> Self {
        Self {
            backend: Arc::new(InMemoryBackend::new()),
            partitions: Default::default(),
        }
    }

    /// The backend this store persists to.
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    fn partition(&self, lifetime: Lifetime) -> &Partition {
        &self.partitions[lifetime.index()]
    }

    /// Sets the value in every storage named by `meta`, last write wins.
    pub fn record(&self, meta: &CommonMetricData, value: &MetricValue) -> MetricsResult<()> {
        self.record_with(meta, |_| Some(value.clone()))
    }

    /// Read-modify-write of the value in every storage named by `meta`.
    ///
    /// `transform` runs once per storage while that key is locked, so the
    /// merge is atomic with respect to other writers. Returning `None` leaves
    /// the key untouched.
    pub fn record_with<F>(&self, meta: &CommonMetricData, mut transform: F) -> MetricsResult<()>
    where
        F: FnMut(Option<&MetricValue>) -> Option<MetricValue>,
    {
        let identifier = meta.identifier();
        for storage in meta.storage_names() {
            let key = StorageKey::new(storage.as_str(), identifier.as_str());
            self.update(meta.lifetime, key, &mut transform)?;
        }
        Ok(())
    }

    /// Read-modify-write of a single key.
    pub fn update<F>(&self, lifetime: Lifetime, key: StorageKey, transform: F) -> MetricsResult<()>
    where
        F: FnOnce(Option<&MetricValue>) -> Option<MetricValue>,
    {
        let partition = self.partition(lifetime);
        let mut transform = Some(transform);
        loop {
            {
                let map = partition.read().map_err(poisoned)?;
                if let Some(slot) = map.get(&key) {
                    let mut current = slot.lock().map_err(poisoned)?;
                    let Some(transform) = transform.take() else {
                        return Ok(());
                    };
                    let Some(new_value) = transform(current.as_ref()) else {
                        return Ok(());
                    };
                    self.backend.apply(
                        lifetime,
                        &StorageRecord::Put {
                            key: key.clone(),
                            value: new_value.clone(),
                        },
                    )?;
                    *current = Some(new_value);
                    return Ok(());
                }
            }
            partition
                .write()
                .map_err(poisoned)?
                .entry(key.clone())
                .or_insert_with(|| Mutex::new(None));
        }
    }

    /// Reads one value.
    pub fn read(&self, lifetime: Lifetime, storage: &str, identifier: &str) -> Option<MetricValue> {
        let map = self.partition(lifetime).read().ok()?;
        let slot = map.get(&StorageKey::new(storage, identifier))?;
        let value = slot.lock().ok()?;
        value.clone()
    }

    /// Copies every value of `storage` across all lifetimes.
    ///
    /// With `clear_ping_lifetime`, the storage's PING-lifetime keys are
    /// removed in the same step.
    pub fn snapshot(
        &self,
        storage: &str,
        clear_ping_lifetime: bool,
    ) -> MetricsResult<StorageSnapshot> {
        if clear_ping_lifetime {
            return self
                .snapshot_with(storage, |snapshot| Ok(Some(snapshot.clone())))
                .map(Option::unwrap_or_default);
        }
        let ping = self.partition(Lifetime::Ping).read().map_err(poisoned)?;
        self.capture(storage, &ping)
    }

    /// Snapshots `storage`, runs `commit`, and clears the storage's
    /// PING-lifetime keys only if `commit` produced a value.
    ///
    /// PING-lifetime writers are excluded for the whole step, so a write that
    /// starts after the snapshot lands in the next one. `commit` must not
    /// write PING-lifetime metrics.
    pub fn snapshot_with<T, F>(&self, storage: &str, commit: F) -> MetricsResult<Option<T>>
    where
        F: FnOnce(&StorageSnapshot) -> MetricsResult<Option<T>>,
    {
        let mut ping = self.partition(Lifetime::Ping).write().map_err(poisoned)?;
        let snapshot = self.capture(storage, &ping)?;

        let outcome = commit(&snapshot)?;
        if outcome.is_some() {
            let record = StorageRecord::ClearStorage {
                storage: storage.to_string(),
            };
            if let Err(e) = self.backend.apply(Lifetime::Ping, &record) {
                log::error!("Failed to persist the clearing of '{storage}': {e}");
            }
            ping.retain(|key, _| key.storage != storage);
        }
        Ok(outcome)
    }

    /// Copies `storage` out of the USER and APPLICATION partitions and the
    /// already locked PING partition.
    fn capture(
        &self,
        storage: &str,
        ping: &HashMap<StorageKey, Mutex<Option<MetricValue>>>,
    ) -> MetricsResult<StorageSnapshot> {
        let mut snapshot = StorageSnapshot::default();
        for lifetime in [Lifetime::User, Lifetime::Application] {
            let map = self.partition(lifetime).read().map_err(poisoned)?;
            copy_storage(&map, storage, &mut snapshot.entries)?;
        }
        copy_storage(ping, storage, &mut snapshot.entries)?;
        Ok(snapshot)
    }

    /// Removes every key of `storage` in one lifetime.
    pub fn clear_storage(&self, lifetime: Lifetime, storage: &str) -> MetricsResult<()> {
        let mut map = self.partition(lifetime).write().map_err(poisoned)?;
        self.backend.apply(
            lifetime,
            &StorageRecord::ClearStorage {
                storage: storage.to_string(),
            },
        )?;
        map.retain(|key, _| key.storage != storage);
        Ok(())
    }

    /// Removes every key of one lifetime.
    pub fn clear_lifetime(&self, lifetime: Lifetime) -> MetricsResult<()> {
        let mut map = self.partition(lifetime).write().map_err(poisoned)?;
        self.backend.apply(lifetime, &StorageRecord::ClearAll)?;
        map.clear();
        log::debug!("Cleared the {lifetime} lifetime");
        Ok(())
    }

    /// Removes every key of every lifetime.
    pub fn clear_all(&self) -> MetricsResult<()> {
        for lifetime in Lifetime::ALL {
            self.clear_lifetime(lifetime)?;
        }
        Ok(())
    }

    /// Removes a single value.
    pub fn remove(&self, lifetime: Lifetime, storage: &str, identifier: &str) -> MetricsResult<()> {
        let key = StorageKey::new(storage, identifier);
        let mut map = self.partition(lifetime).write().map_err(poisoned)?;
        if map.contains_key(&key) {
            self.backend
                .apply(lifetime, &StorageRecord::Remove { key: key.clone() })?;
            map.remove(&key);
        }
        Ok(())
    }

    /// Number of distinct labels stored for a labeled metric.
    pub fn label_count(&self, lifetime: Lifetime, storage: &str, identifier: &str) -> usize {
        let prefix = format!("{identifier}{LABEL_SEPARATOR}");
        let Ok(map) = self.partition(lifetime).read() else {
            return 0;
        };
        map.iter()
            .filter(|(key, slot)| {
                key.storage == storage
                    && key.metric.starts_with(&prefix)
                    && slot.lock().map(|v| v.is_some()).unwrap_or(false)
            })
            .count()
    }

    /// Copies every value of `storage` in one lifetime.
    ///
    /// Must not be called for the PING lifetime from inside
    /// [`snapshot_with`](Self::snapshot_with).
    pub fn entries(
        &self,
        lifetime: Lifetime,
        storage: &str,
    ) -> MetricsResult<BTreeMap<String, MetricValue>> {
        let map = self.partition(lifetime).read().map_err(poisoned)?;
        let mut out = BTreeMap::new();
        copy_storage(&map, storage, &mut out)?;
        Ok(out)
    }
}

fn copy_storage(
    map: &HashMap<StorageKey, Mutex<Option<MetricValue>>>,
    storage: &str,
    out: &mut BTreeMap<String, MetricValue>,
) -> MetricsResult<()> {
    for (key, slot) in map.iter().filter(|(key, _)| key.storage == storage) {
        if let Some(value) = slot.lock().map_err(poisoned)?.as_ref() {
            out.insert(key.metric.clone(), value.clone());
        }
    }
    Ok(())
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> StorageError {
    StorageError::LockPoisoned
}

#[cfg(test)]
mod tests {
    use super::*;
    use sonde_core::telemetry::MetricsError;
    use std::thread;

    fn meta(name: &str, pings: &[&str], lifetime: Lifetime) -> CommonMetricData {
        CommonMetricData::new("test", name, pings, lifetime)
    }

    fn add(store: &MetricStore, meta: &CommonMetricData, amount: i32) {
        store
            .record_with(meta, |old| match old {
                Some(MetricValue::Counter(v)) => Some(MetricValue::Counter(v + amount)),
                _ => Some(MetricValue::Counter(amount)),
            })
            .unwrap();
    }

    #[test]
    fn test_record_fans_out_to_every_storage() {
        let store = MetricStore::in_memory();
        let flag = meta("flag", &["store1", "store2"], Lifetime::Ping);
        store.record(&flag, &MetricValue::Boolean(true)).unwrap();

        for storage in ["store1", "store2"] {
            assert_eq!(
                store.read(Lifetime::Ping, storage, "test.flag"),
                Some(MetricValue::Boolean(true))
            );
        }
        assert_eq!(store.read(Lifetime::User, "store1", "test.flag"), None);
    }

    #[test]
    fn test_declined_transform_leaves_no_value() {
        let store = MetricStore::in_memory();
        let m = meta("skipped", &["store1"], Lifetime::Ping);
        store.record_with(&m, |_| None).unwrap();
        assert_eq!(store.read(Lifetime::Ping, "store1", "test.skipped"), None);
        assert!(store.snapshot("store1", false).unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_counter_adds_are_not_lost() {
        let store = Arc::new(MetricStore::in_memory());
        let counter = meta("hits", &["store1"], Lifetime::Ping);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let counter = counter.clone();
                thread::spawn(move || {
                    for _ in 0..250 {
                        add(&store, &counter, 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(
            store.read(Lifetime::Ping, "store1", "test.hits"),
            Some(MetricValue::Counter(2_000))
        );
    }

    #[test]
    fn test_snapshot_with_clears_only_ping_lifetime_on_success() {
        let store = MetricStore::in_memory();
        add(&store, &meta("ping", &["store1"], Lifetime::Ping), 1);
        add(&store, &meta("app", &["store1"], Lifetime::Application), 2);
        add(&store, &meta("user", &["store1"], Lifetime::User), 3);
        add(&store, &meta("other", &["store2"], Lifetime::Ping), 4);

        // A failed commit keeps everything.
        let failed: MetricsResult<Option<()>> = store.snapshot_with("store1", |_| {
            Err(MetricsError::StorageError("disk full".to_string()))
        });
        assert!(failed.is_err());
        assert!(store.read(Lifetime::Ping, "store1", "test.ping").is_some());

        let taken = store
            .snapshot_with("store1", |snapshot| Ok(Some(snapshot.entries.len())))
            .unwrap();
        assert_eq!(taken, Some(3));

        let after = store.snapshot("store1", false).unwrap();
        assert_eq!(after.get("test.ping"), None);
        assert_eq!(after.get("test.app"), Some(&MetricValue::Counter(2)));
        assert_eq!(after.get("test.user"), Some(&MetricValue::Counter(3)));
        assert!(store.read(Lifetime::Ping, "store2", "test.other").is_some());
    }

    #[test]
    fn test_failed_write_leaves_memory_untouched() {
        let backend = Arc::new(InMemoryBackend::new());
        let store = MetricStore::open(backend.clone()).unwrap();
        let m = meta("count", &["store1"], Lifetime::Ping);
        add(&store, &m, 5);

        backend.set_fail_writes(true);
        let result = store.record(&m, &MetricValue::Counter(99));
        assert!(matches!(result, Err(MetricsError::StorageError(_))));
        assert_eq!(
            store.read(Lifetime::Ping, "store1", "test.count"),
            Some(MetricValue::Counter(5))
        );
    }

    #[test]
    fn test_reopen_loads_the_backend() {
        let backend: Arc<dyn StorageBackend> = Arc::new(InMemoryBackend::new());
        {
            let store = MetricStore::open(Arc::clone(&backend)).unwrap();
            add(&store, &meta("a", &["store1"], Lifetime::User), 2);
            add(&store, &meta("a", &["store1"], Lifetime::User), 3);
            store.remove(Lifetime::User, "store1", "test.a").unwrap();
            add(&store, &meta("b", &["store1"], Lifetime::User), 7);
        }

        let store = MetricStore::open(backend).unwrap();
        assert_eq!(store.read(Lifetime::User, "store1", "test.a"), None);
        assert_eq!(
            store.read(Lifetime::User, "store1", "test.b"),
            Some(MetricValue::Counter(7))
        );
    }

    #[test]
    fn test_clear_operations() {
        let store = MetricStore::in_memory();
        add(&store, &meta("a", &["store1", "store2"], Lifetime::Application), 1);
        add(&store, &meta("b", &["store1"], Lifetime::User), 1);

        store.clear_storage(Lifetime::Application, "store1").unwrap();
        assert_eq!(store.read(Lifetime::Application, "store1", "test.a"), None);
        assert!(store.read(Lifetime::Application, "store2", "test.a").is_some());

        store.clear_lifetime(Lifetime::Application).unwrap();
        assert_eq!(store.read(Lifetime::Application, "store2", "test.a"), None);
        assert!(store.read(Lifetime::User, "store1", "test.b").is_some());

        store.clear_all().unwrap();
        assert!(store.snapshot("store1", false).unwrap().is_empty());
    }

    #[test]
    fn test_label_count() {
        let store = MetricStore::in_memory();
        for label in ["a", "b", "c"] {
            let m = meta(&format!("labeled/{label}"), &["store1"], Lifetime::Ping);
            add(&store, &m, 1);
        }
        add(&store, &meta("labeled_other", &["store1"], Lifetime::Ping), 1);

        assert_eq!(store.label_count(Lifetime::Ping, "store1", "test.labeled"), 3);
        assert_eq!(store.label_count(Lifetime::Ping, "store2", "test.labeled"), 0);
    }

    #[test]
    fn test_entries_of_one_lifetime() {
        let store = MetricStore::in_memory();
        add(&store, &meta("a", &["store1"], Lifetime::Application), 1);
        add(&store, &meta("b", &["store1"], Lifetime::User), 2);
        add(&store, &meta("c", &["store2"], Lifetime::Application), 3);

        let entries = store.entries(Lifetime::Application, "store1").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries.get("test.a"), Some(&MetricValue::Counter(1)));
    }
}
