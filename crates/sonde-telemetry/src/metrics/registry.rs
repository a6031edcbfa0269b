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

//! Registry for managing metric definitions.

use crate::metrics::descriptor::MetricDescriptor;
use crate::metrics::handle::{HandleTable, MetricHandle};
use sonde_core::telemetry::{MetricId, MetricsError, MetricsResult};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Debug, Default)]
struct RegistryState {
    table: HandleTable<MetricDescriptor>,
    by_id: HashMap<MetricId, u64>,
}

/// Central registry of metric definitions.
///
/// Hosts register a [`MetricDescriptor`] once and refer to the metric by the
/// returned [`MetricHandle`] afterwards. Registration is idempotent by
/// identity and type.
#[derive(Debug, Default)]
pub struct MetricRegistry {
    state: RwLock<RegistryState>,
}

impl MetricRegistry {
    /// Create a new, empty metric registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a metric, or return the handle of the identical metric
    /// registered earlier.
    ///
    /// Fails with [`MetricsError::TypeMismatch`] if the identity is already
    /// registered with another type.
    pub fn register(&self, descriptor: MetricDescriptor) -> MetricsResult<MetricHandle> {
        let id = descriptor.meta.id();
        let mut state = self
            .state
            .write()
            .map_err(|_| MetricsError::StorageError("Failed to acquire write lock".to_string()))?;

        if let Some(&raw) = state.by_id.get(&id) {
            if let Some(existing) = state.table.get(raw) {
                if existing.metric_type() != descriptor.metric_type() {
                    return Err(MetricsError::TypeMismatch {
                        expected: existing.metric_type(),
                        found: descriptor.metric_type(),
                    });
                }
                if *existing != descriptor {
                    log::warn!("Metric '{id}' re-registered with different metadata; keeping the first");
                }
                return Ok(MetricHandle(raw));
            }
        }

        log::trace!("Registering metric '{id}' as {:?}", descriptor.metric_type());
        let raw = state.table.insert(descriptor);
        state.by_id.insert(id, raw);
        Ok(MetricHandle(raw))
    }

    /// Resolve a handle to its descriptor.
    pub fn resolve(&self, handle: MetricHandle) -> MetricsResult<Arc<MetricDescriptor>> {
        let state = self
            .state
            .read()
            .map_err(|_| MetricsError::StorageError("Failed to acquire read lock".to_string()))?;
        state
            .table
            .get(handle.0)
            .ok_or(MetricsError::UnknownHandle(handle.0))
    }

    /// Destroy a handle; later resolutions fail.
    pub fn destroy(&self, handle: MetricHandle) -> MetricsResult<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| MetricsError::StorageError("Failed to acquire write lock".to_string()))?;
        let descriptor = state
            .table
            .remove(handle.0)
            .ok_or(MetricsError::UnknownHandle(handle.0))?;
        state.by_id.remove(&descriptor.meta.id());
        Ok(())
    }

    /// Look up the handle of a registered metric by identity.
    pub fn find(&self, id: &MetricId) -> Option<MetricHandle> {
        let state = self.state.read().ok()?;
        state.by_id.get(id).copied().map(MetricHandle)
    }

    /// Get the number of registered metrics
    pub fn metric_count(&self) -> usize {
        self.state.read().map(|s| s.table.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::descriptor::MetricKind;
    use sonde_core::telemetry::{CommonMetricData, Lifetime, MetricType};

    fn counter(name: &str) -> MetricDescriptor {
        MetricDescriptor::new(
            CommonMetricData::new("engine", name, &["store1"], Lifetime::Ping),
            MetricKind::Counter,
        )
    }

    #[test]
    fn test_registration_is_idempotent() {
        let registry = MetricRegistry::new();
        let first = registry.register(counter("frames")).unwrap();
        let again = registry.register(counter("frames")).unwrap();
        assert_eq!(first, again);
        assert_eq!(registry.metric_count(), 1);
        assert_eq!(registry.find(&MetricId::new("engine", "frames")), Some(first));
    }

    #[test]
    fn test_first_registration_wins() {
        let registry = MetricRegistry::new();
        let first = registry.register(counter("frames")).unwrap();

        let mut other = counter("frames");
        other.meta.lifetime = Lifetime::User;
        let again = registry.register(other).unwrap();

        assert_eq!(first, again);
        assert_eq!(registry.resolve(first).unwrap().meta.lifetime, Lifetime::Ping);
    }

    #[test]
    fn test_type_conflict_is_rejected() {
        let registry = MetricRegistry::new();
        registry.register(counter("frames")).unwrap();

        let mut flag = counter("frames");
        flag.kind = MetricKind::Boolean;
        assert_eq!(
            registry.register(flag),
            Err(MetricsError::TypeMismatch {
                expected: MetricType::Counter,
                found: MetricType::Boolean,
            })
        );
    }

    #[test]
    fn test_destroy_invalidates_handle() {
        let registry = MetricRegistry::new();
        let handle = registry.register(counter("frames")).unwrap();
        registry.destroy(handle).unwrap();

        assert_eq!(
            registry.resolve(handle).unwrap_err(),
            MetricsError::UnknownHandle(handle.0)
        );
        assert!(registry.destroy(handle).is_err());
        assert_eq!(registry.find(&MetricId::new("engine", "frames")), None);

        // Re-registering yields a fresh handle.
        let fresh = registry.register(counter("frames")).unwrap();
        assert_ne!(fresh, handle);
    }

    #[test]
    fn test_unknown_handle() {
        let registry = MetricRegistry::new();
        assert!(matches!(
            registry.resolve(MetricHandle(0)),
            Err(MetricsError::UnknownHandle(0))
        ));
    }
}
