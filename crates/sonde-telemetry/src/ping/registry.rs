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

//! Registry of ping types.

use crate::metrics::handle::{HandleTable, PingHandle};
use crate::ping::ping_type::PingType;
use sonde_core::telemetry::{MetricsError, MetricsResult};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Debug, Default)]
struct RegistryState {
    table: HandleTable<PingType>,
    by_name: HashMap<String, u64>,
}

/// Registry of ping types, addressed by handle or by name.
#[derive(Debug, Default)]
pub struct PingRegistry {
    state: RwLock<RegistryState>,
}

impl PingRegistry {
    /// Create a new, empty ping registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a ping type. A second registration of the same name returns
    /// the first handle.
    pub fn register(&self, ping: PingType) -> MetricsResult<PingHandle> {
        let mut state = self
            .state
            .write()
            .map_err(|_| MetricsError::StorageError("Failed to acquire write lock".to_string()))?;
        if let Some(&raw) = state.by_name.get(&ping.name) {
            if state.table.get(raw).is_some_and(|existing| *existing != ping) {
                log::warn!("Ping '{}' re-registered with different metadata; keeping the first", ping.name);
            }
            return Ok(PingHandle(raw));
        }
        let name = ping.name.clone();
        let raw = state.table.insert(ping);
        state.by_name.insert(name, raw);
        Ok(PingHandle(raw))
    }

    /// Resolve a handle to its ping type.
    pub fn resolve(&self, handle: PingHandle) -> MetricsResult<Arc<PingType>> {
        let state = self
            .state
            .read()
            .map_err(|_| MetricsError::StorageError("Failed to acquire read lock".to_string()))?;
        state
            .table
            .get(handle.0)
            .ok_or(MetricsError::UnknownHandle(handle.0))
    }

    /// Look up a ping type by name.
    pub fn get_by_name(&self, name: &str) -> MetricsResult<Arc<PingType>> {
        let state = self
            .state
            .read()
            .map_err(|_| MetricsError::StorageError("Failed to acquire read lock".to_string()))?;
        state
            .by_name
            .get(name)
            .and_then(|&raw| state.table.get(raw))
            .ok_or_else(|| MetricsError::UnknownPing(name.to_string()))
    }

    /// Destroy a handle; later resolutions fail.
    pub fn destroy(&self, handle: PingHandle) -> MetricsResult<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| MetricsError::StorageError("Failed to acquire write lock".to_string()))?;
        let ping = state
            .table
            .remove(handle.0)
            .ok_or(MetricsError::UnknownHandle(handle.0))?;
        state.by_name.remove(&ping.name);
        Ok(())
    }
}
