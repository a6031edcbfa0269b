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

//! Service tying together storage, registries, ping assembly and uploads.

use crate::client_info::{
    collect_client_info, ensure_client_id, ensure_first_run_date, SystemInfoProvider,
};
use crate::config::Configuration;
use crate::error_recording::{self, ErrorType, METRICS_PING_NAME};
use crate::metrics::{MetricDescriptor, MetricHandle, MetricRegistry, PingHandle};
use crate::ping::{PingAssembler, PingRegistry, PingType};
use crate::storage::{MetricStore, RedbBackend, StorageError};
use crate::upload::request::{telemetry_agent, upload_path};
use crate::upload::{PendingPing, UploadScheduler};
use crate::utils::timer::TimerRegistry;
use serde_json::Value as JsonValue;
use sonde_core::telemetry::{
    ClientInfoProvider, DatetimeValue, Lifetime, MetricValue, MetricsResult,
};
use sonde_core::upload::{ResponseDisposition, UploadResult, UploadTask};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard};

/// The telemetry engine.
///
/// All methods take `&self` and are safe to call from any thread.
pub struct TelemetryService {
    pub(crate) config: Configuration,
    pub(crate) store: MetricStore,
    pub(crate) metrics: MetricRegistry,
    pub(crate) pings: PingRegistry,
    pub(crate) timers: TimerRegistry,
    scheduler: UploadScheduler,
    /// Upload gate. Recordings and submissions hold it shared; toggling
    /// holds it exclusively while clearing.
    upload_enabled: RwLock<bool>,
    /// Serializes admission of new dynamic labels.
    pub(crate) label_admission: Mutex<()>,
    client_info_provider: Box<dyn ClientInfoProvider>,
    engine_start: DatetimeValue,
}

impl std::fmt::Debug for TelemetryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryService")
            .field("config", &self.config)
            .field("upload_enabled", &self.is_upload_enabled())
            .field("metrics", &self.metrics.metric_count())
            .field("pending_pings", &self.scheduler.pending_count())
            .finish_non_exhaustive()
    }
}

impl TelemetryService {
    /// Opens the engine over `config.data_path`, reporting platform facts
    /// through `sysinfo`.
    pub fn new(config: Configuration) -> MetricsResult<Self> {
        Self::with_provider(config, Box::new(SystemInfoProvider))
    }

    /// Opens the engine with a host-supplied [`ClientInfoProvider`].
    ///
    /// Loads persisted metrics, clears the APPLICATION lifetime, and
    /// queues every document left pending by an earlier run.
    pub fn with_provider(
        config: Configuration,
        client_info_provider: Box<dyn ClientInfoProvider>,
    ) -> MetricsResult<Self> {
        std::fs::create_dir_all(&config.data_path).map_err(StorageError::from)?;
        let backend = RedbBackend::open(&config.data_path)?;
        let store = MetricStore::open(Arc::new(backend))?;
        store.clear_lifetime(Lifetime::Application)?;

        let scheduler = UploadScheduler::new(
            &config.data_path,
            config.upload_policy.clone(),
            telemetry_agent(&config.language_binding_name),
        );

        let service = Self {
            upload_enabled: RwLock::new(config.upload_enabled),
            label_admission: Mutex::new(()),
            config,
            store,
            metrics: MetricRegistry::new(),
            pings: PingRegistry::new(),
            timers: TimerRegistry::new(),
            scheduler,
            client_info_provider,
            engine_start: DatetimeValue::now(),
        };
        service
            .pings
            .register(PingType::new(METRICS_PING_NAME, true, false))?;

        if service.is_upload_enabled() {
            ensure_client_id(&service.store)?;
            ensure_first_run_date(&service.store)?;
        } else {
            service.store.clear_all()?;
            service.scheduler.clear()?;
        }

        log::info!(
            "Telemetry service started for '{}' at {}",
            service.config.application_id,
            service.config.data_path.display()
        );
        Ok(service)
    }

    /// The active configuration.
    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// The metric store.
    pub fn store(&self) -> &MetricStore {
        &self.store
    }

    /// Returns a reference to the metric registry.
    pub fn metric_registry(&self) -> &MetricRegistry {
        &self.metrics
    }

    /// Returns a reference to the ping registry.
    pub fn ping_registry(&self) -> &PingRegistry {
        &self.pings
    }

    // --- Registration ---

    /// Registers a metric. See [`MetricRegistry::register`].
    pub fn register_metric(&self, descriptor: MetricDescriptor) -> MetricsResult<MetricHandle> {
        self.metrics.register(descriptor)
    }

    /// Destroys a metric handle.
    pub fn destroy_metric(&self, handle: MetricHandle) -> MetricsResult<()> {
        self.metrics.destroy(handle)
    }

    /// Registers a ping type.
    pub fn register_ping(&self, ping: PingType) -> MetricsResult<PingHandle> {
        self.pings.register(ping)
    }

    /// Destroys a ping handle.
    pub fn destroy_ping(&self, handle: PingHandle) -> MetricsResult<()> {
        self.pings.destroy(handle)
    }

    // --- Pings ---

    /// Assembles, persists and queues a ping.
    ///
    /// Returns `Ok(false)` when nothing was queued: upload is disabled, or
    /// the ping was empty and not `send_if_empty`.
    pub fn submit_ping(&self, handle: PingHandle, reason: Option<&str>) -> MetricsResult<bool> {
        let ping = self.pings.resolve(handle)?;
        self.submit(&ping, reason)
    }

    /// Same as [`submit_ping`](Self::submit_ping), by name.
    pub fn submit_ping_by_name(&self, name: &str, reason: Option<&str>) -> MetricsResult<bool> {
        let ping = self.pings.get_by_name(name)?;
        self.submit(&ping, reason)
    }

    fn submit(&self, ping: &PingType, reason: Option<&str>) -> MetricsResult<bool> {
        let gate = self.upload_gate()?;
        if !*gate {
            log::info!("Upload disabled; not submitting '{}'", ping.name);
            return Ok(false);
        }

        let client_info =
            collect_client_info(&self.store, &self.config, self.client_info_provider.as_ref());
        let assembler = PingAssembler::new(&self.store, self.engine_start);
        let app_id = self.config.sanitized_application_id();

        let queued = assembler.submit(ping, reason, &client_info, |document| {
            let body = serde_json::to_string(&document.payload)?;
            if self.config.log_pings {
                log::info!("Ping '{}': {body}", document.ping_name);
            }
            let mut headers = BTreeMap::new();
            if let Some(tag) = &self.config.debug_view_tag {
                headers.insert("X-Debug-ID".to_string(), tag.clone());
            }
            self.scheduler.enqueue(PendingPing {
                document_id: document.document_id.clone(),
                path: upload_path(&app_id, &document.ping_name, &document.document_id),
                body,
                headers,
            })
        })?;

        if queued.is_some() {
            log::info!("Ping '{}' queued for upload", ping.name);
        }
        Ok(queued.is_some())
    }

    /// Assembles a ping for inspection. Storage is not cleared and the
    /// sequence number is not advanced.
    pub fn test_collect_ping(
        &self,
        name: &str,
        reason: Option<&str>,
    ) -> MetricsResult<Option<JsonValue>> {
        let ping = self.pings.get_by_name(name)?;
        let client_info =
            collect_client_info(&self.store, &self.config, self.client_info_provider.as_ref());
        let assembler = PingAssembler::new(&self.store, self.engine_start);
        Ok(assembler
            .collect(&ping, reason, &client_info)?
            .map(|document| document.payload))
    }

    // --- Uploads ---

    /// The next upload task for the host.
    pub fn get_upload_task(&self) -> UploadTask {
        self.scheduler.get_next_task()
    }

    /// Applies the host's outcome for an uploaded document.
    pub fn process_upload_response(
        &self,
        document_id: &str,
        result: UploadResult,
    ) -> ResponseDisposition {
        self.scheduler.process_upload_response(document_id, result)
    }

    /// Number of documents queued or in flight.
    pub fn pending_ping_count(&self) -> usize {
        self.scheduler.pending_count()
    }

    // --- Global controls ---

    /// Whether recording and uploading are enabled.
    pub fn is_upload_enabled(&self) -> bool {
        self.upload_enabled.read().map(|gate| *gate).unwrap_or(false)
    }

    /// Shared access to the upload gate. Never taken twice by one thread.
    pub(crate) fn upload_gate(&self) -> MetricsResult<RwLockReadGuard<'_, bool>> {
        Ok(self
            .upload_enabled
            .read()
            .map_err(|_| StorageError::LockPoisoned)?)
    }

    /// Enables or disables recording and uploading.
    ///
    /// Disabling clears every stored metric (client id included) and every
    /// pending document. Enabling generates a fresh client id. Recordings and
    /// submissions in flight finish before the switch; later ones see it.
    pub fn set_upload_enabled(&self, enabled: bool) -> MetricsResult<()> {
        let mut gate = self
            .upload_enabled
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        if *gate == enabled {
            return Ok(());
        }
        *gate = enabled;

        if enabled {
            log::info!("Upload enabled");
            ensure_client_id(&self.store)?;
            ensure_first_run_date(&self.store)?;
        } else {
            log::info!("Upload disabled; clearing all metrics and pending pings");
            self.timers.clear();
            self.store.clear_all()?;
            self.scheduler.clear()?;
        }
        Ok(())
    }

    /// Clears the APPLICATION lifetime (host-defined session boundary).
    pub fn clear_application_lifetime(&self) -> MetricsResult<()> {
        self.store.clear_lifetime(Lifetime::Application)
    }

    // --- Inspection ---

    /// The stored value of a metric in `ping` (default: its first ping).
    pub fn test_get_value(
        &self,
        handle: MetricHandle,
        ping: Option<&str>,
    ) -> MetricsResult<Option<MetricValue>> {
        let descriptor = self.metrics.resolve(handle)?;
        let meta = &descriptor.meta;
        Ok(storage_for(meta, ping)
            .and_then(|storage| self.store.read(meta.lifetime, storage, &meta.identifier())))
    }

    /// The stored value of one label of a labeled metric.
    pub fn test_get_labeled_value(
        &self,
        handle: MetricHandle,
        label: &str,
        ping: Option<&str>,
    ) -> MetricsResult<Option<MetricValue>> {
        let descriptor = self.metrics.resolve(handle)?;
        let meta = &descriptor.meta;
        let identifier = meta.id().labeled_identifier(label);
        Ok(storage_for(meta, ping)
            .and_then(|storage| self.store.read(meta.lifetime, storage, &identifier)))
    }

    /// Whether a metric has a stored value in `ping`.
    pub fn test_has_value(&self, handle: MetricHandle, ping: Option<&str>) -> MetricsResult<bool> {
        Ok(self.test_get_value(handle, ping)?.is_some())
    }

    /// Number of errors of `error` recorded against a metric.
    pub fn test_get_num_recorded_errors(
        &self,
        handle: MetricHandle,
        error: ErrorType,
        ping: Option<&str>,
    ) -> MetricsResult<i32> {
        let descriptor = self.metrics.resolve(handle)?;
        error_recording::test_get_num_recorded_errors(&self.store, &descriptor.meta, error, ping)
    }
}

fn storage_for<'a>(
    meta: &'a sonde_core::telemetry::CommonMetricData,
    ping: Option<&'a str>,
) -> Option<&'a str> {
    ping.or_else(|| meta.send_in_pings.first().map(String::as_str))
}
