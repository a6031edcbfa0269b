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

//! Durable backend over an embedded `redb` database.

use crate::storage::backend::{
    BackendStats, LoadedRecords, StorageBackend, StorageError, StorageRecord, StorageResult,
};
use crate::storage::StorageKey;
use redb::{Database, ReadableTable, TableDefinition};
use sonde_core::telemetry::{Lifetime, MetricValue};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// One table per lifetime. Keys are `storage \0 metric`, values bincode.
const PING: TableDefinition<&[u8], &[u8]> = TableDefinition::new("ping");
const APPLICATION: TableDefinition<&[u8], &[u8]> = TableDefinition::new("application");
const USER: TableDefinition<&[u8], &[u8]> = TableDefinition::new("user");

const KEY_SEPARATOR: u8 = 0;

fn table(lifetime: Lifetime) -> TableDefinition<'static, &'static [u8], &'static [u8]> {
    match lifetime {
        Lifetime::Ping => PING,
        Lifetime::Application => APPLICATION,
        Lifetime::User => USER,
    }
}

fn encode_key(key: &StorageKey) -> Vec<u8> {
    [
        key.storage.as_bytes(),
        &[KEY_SEPARATOR],
        key.metric.as_bytes(),
    ]
    .concat()
}

fn decode_key(bytes: &[u8]) -> Option<StorageKey> {
    let split = bytes.iter().position(|b| *b == KEY_SEPARATOR)?;
    let storage = std::str::from_utf8(&bytes[..split]).ok()?;
    let metric = std::str::from_utf8(&bytes[split + 1..]).ok()?;
    Some(StorageKey::new(storage, metric))
}

/// Key range covering every metric of one storage.
fn storage_range(storage: &str) -> (Vec<u8>, Vec<u8>) {
    let lo = [storage.as_bytes(), &[KEY_SEPARATOR]].concat();
    let hi = [storage.as_bytes(), &[KEY_SEPARATOR + 1]].concat();
    (lo, hi)
}

fn encode_value(value: &MetricValue) -> StorageResult<Vec<u8>> {
    Ok(bincode::serde::encode_to_vec(
        value,
        bincode::config::standard(),
    )?)
}

fn decode_value(bytes: &[u8]) -> Option<MetricValue> {
    bincode::serde::decode_from_slice::<MetricValue, _>(bytes, bincode::config::standard())
        .ok()
        .map(|(value, _)| value)
}

fn db_err(e: impl std::fmt::Display) -> StorageError {
    StorageError::Database(e.to_string())
}

/// Database backend stored at `<data>/db/sonde.redb`.
///
/// Every [`StorageRecord`] is applied in its own committed write
/// transaction, so a crash loses at most the record being written.
pub struct RedbBackend {
    path: PathBuf,
    db: Database,
    stats: Mutex<BackendStats>,
}

impl std::fmt::Debug for RedbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbBackend")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl RedbBackend {
    /// Opens (creating if needed) the database under `<data_path>/db`.
    pub fn open(data_path: &Path) -> StorageResult<Self> {
        let dir = data_path.join("db");
        fs::create_dir_all(&dir)?;
        let path = dir.join("sonde.redb");

        let db = Database::create(&path).map_err(db_err)?;

        // Ensure tables exist
        {
            let w = db.begin_write().map_err(db_err)?;
            for lifetime in Lifetime::ALL {
                w.open_table(table(lifetime)).map_err(db_err)?;
            }
            w.commit().map_err(db_err)?;
        }

        log::debug!("Opened metric database at {}", path.display());
        Ok(Self {
            path,
            db,
            stats: Mutex::new(BackendStats::default()),
        })
    }

    /// The database file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for RedbBackend {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn load(&self, lifetime: Lifetime) -> StorageResult<LoadedRecords> {
        let r = self.db.begin_read().map_err(db_err)?;
        let t = r.open_table(table(lifetime)).map_err(db_err)?;

        let mut loaded = LoadedRecords::default();
        for entry in t.iter().map_err(db_err)? {
            let Ok((k, v)) = entry else {
                loaded.skipped += 1;
                continue;
            };
            match (decode_key(k.value()), decode_value(v.value())) {
                (Some(key), Some(value)) => loaded.entries.push((key, value)),
                _ => {
                    log::warn!(
                        "Skipping unreadable {} entry ({} bytes)",
                        lifetime,
                        v.value().len()
                    );
                    loaded.skipped += 1;
                }
            }
        }

        if let Ok(mut stats) = self.stats.lock() {
            stats.skipped_records += loaded.skipped;
        }
        Ok(loaded)
    }

    fn apply(&self, lifetime: Lifetime, record: &StorageRecord) -> StorageResult<()> {
        let w = self.db.begin_write().map_err(db_err)?;
        {
            let mut t = w.open_table(table(lifetime)).map_err(db_err)?;
            match record {
                StorageRecord::Put { key, value } => {
                    let bytes = encode_value(value)?;
                    t.insert(encode_key(key).as_slice(), bytes.as_slice())
                        .map_err(db_err)?;
                }
                StorageRecord::Remove { key } => {
                    t.remove(encode_key(key).as_slice()).map_err(db_err)?;
                }
                StorageRecord::ClearStorage { storage } => {
                    let (lo, hi) = storage_range(storage);
                    let mut keys = Vec::new();
                    for entry in t.range(lo.as_slice()..hi.as_slice()).map_err(db_err)? {
                        let (k, _) = entry.map_err(db_err)?;
                        keys.push(k.value().to_vec());
                    }
                    for k in keys {
                        t.remove(k.as_slice()).map_err(db_err)?;
                    }
                }
                StorageRecord::ClearAll => {
                    let mut keys = Vec::new();
                    for entry in t.iter().map_err(db_err)? {
                        let (k, _) = entry.map_err(db_err)?;
                        keys.push(k.value().to_vec());
                    }
                    for k in keys {
                        t.remove(k.as_slice()).map_err(db_err)?;
                    }
                }
            }
        }
        w.commit().map_err(db_err)?;

        if let Ok(mut stats) = self.stats.lock() {
            stats.applied_records += 1;
        }
        Ok(())
    }

    fn stats(&self) -> BackendStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }
}
