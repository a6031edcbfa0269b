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

//! Typed recording operations.
//!
//! Every operation resolves its handle first. A destroyed handle or a
//! metric that should not record (disabled, or upload disabled) makes the
//! call a silent no-op; using a handle with an operation of another type is
//! a [`MetricsError::TypeMismatch`]. Invalid values are rejected or clamped
//! and reported through the error counters.

use crate::error_recording::{record_error, ErrorType};
use crate::metrics::descriptor::{MetricDescriptor, MetricKind};
use crate::metrics::handle::MetricHandle;
use crate::metrics::labeled::labeled_meta;
use crate::service::TelemetryService;
use crate::storage::StorageError;
use crate::utils::timer::{TimerError, TimerId};
use sonde_core::telemetry::{
    CommonMetricData, DatetimeValue, Histogram, MetricType, MetricValue, MetricsError,
    MetricsResult, RecordedEvent, TimeUnit,
};
use std::collections::BTreeMap;
use std::ops::Deref;
use std::sync::{Arc, RwLockReadGuard};
use uuid::Uuid;

/// Maximum length, in characters, of a string metric.
pub const MAX_STRING_LENGTH: usize = 100;

/// Maximum number of items in a string list.
pub const MAX_LIST_LENGTH: usize = 100;

/// Maximum length, in characters, of an event extra value.
pub const MAX_EXTRA_VALUE_LENGTH: usize = 500;

/// Largest timing sample, in nanoseconds (10 minutes).
pub const MAX_SAMPLE_TIME: u64 = 1_000 * 1_000 * 1_000 * 60 * 10;

/// Truncates `value` to `max` characters. Returns whether it was truncated.
pub(crate) fn truncate(value: &str, max: usize) -> (String, bool) {
    match value.char_indices().nth(max) {
        Some((end, _)) => (value[..end].to_string(), true),
        None => (value.to_string(), false),
    }
}

fn add_counter(old: Option<&MetricValue>, amount: i32) -> MetricValue {
    match old {
        Some(MetricValue::Counter(v)) => MetricValue::Counter(v.saturating_add(amount)),
        _ => MetricValue::Counter(amount),
    }
}

/// A metric cleared for recording.
///
/// Holds the upload gate open, so disabling upload waits for the recording to
/// finish and a recording never lands after the clear.
pub(crate) struct Recording<'a> {
    descriptor: Arc<MetricDescriptor>,
    _gate: RwLockReadGuard<'a, bool>,
}

impl Deref for Recording<'_> {
    type Target = MetricDescriptor;

    fn deref(&self) -> &MetricDescriptor {
        &self.descriptor
    }
}

impl TelemetryService {
    /// Resolves `handle` for a recording of type `expected`.
    ///
    /// `Ok(None)` means the recording must be skipped silently.
    pub(crate) fn recordable(
        &self,
        handle: MetricHandle,
        expected: MetricType,
    ) -> MetricsResult<Option<Recording<'_>>> {
        let descriptor = match self.metrics.resolve(handle) {
            Ok(descriptor) => descriptor,
            Err(MetricsError::UnknownHandle(raw)) => {
                log::debug!("Recording on unknown or destroyed handle {raw} ignored");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        if descriptor.metric_type() != expected {
            return Err(MetricsError::TypeMismatch {
                expected,
                found: descriptor.metric_type(),
            });
        }
        let gate = self.upload_gate()?;
        if !descriptor.should_record(*gate) {
            return Ok(None);
        }
        Ok(Some(Recording {
            descriptor,
            _gate: gate,
        }))
    }

    fn error(&self, meta: &CommonMetricData, error: ErrorType, message: &str, count: usize) {
        record_error(&self.store, meta, error, message, count);
    }

    // --- Boolean ---

    /// Sets a boolean.
    pub fn boolean_set(&self, handle: MetricHandle, value: bool) -> MetricsResult<()> {
        let Some(d) = self.recordable(handle, MetricType::Boolean)? else {
            return Ok(());
        };
        self.store.record(&d.meta, &MetricValue::Boolean(value))
    }

    // --- Counter ---

    /// Adds `amount` to a counter. Non-positive amounts are rejected.
    pub fn counter_add(&self, handle: MetricHandle, amount: i32) -> MetricsResult<()> {
        let Some(d) = self.recordable(handle, MetricType::Counter)? else {
            return Ok(());
        };
        if amount <= 0 {
            self.error(
                &d.meta,
                ErrorType::InvalidValue,
                &format!("Added negative or zero value {amount}"),
                1,
            );
            return Ok(());
        }
        self.store
            .record_with(&d.meta, |old| Some(add_counter(old, amount)))
    }

    // --- Quantity ---

    /// Sets a quantity. Negative values are rejected.
    pub fn quantity_set(&self, handle: MetricHandle, value: i64) -> MetricsResult<()> {
        let Some(d) = self.recordable(handle, MetricType::Quantity)? else {
            return Ok(());
        };
        if value < 0 {
            self.error(
                &d.meta,
                ErrorType::InvalidValue,
                &format!("Set negative value {value}"),
                1,
            );
            return Ok(());
        }
        self.store.record(&d.meta, &MetricValue::Quantity(value))
    }

    // --- String ---

    /// Sets a string, truncated to [`MAX_STRING_LENGTH`] characters.
    pub fn string_set(&self, handle: MetricHandle, value: &str) -> MetricsResult<()> {
        let Some(d) = self.recordable(handle, MetricType::String)? else {
            return Ok(());
        };
        let (value, truncated) = truncate(value, MAX_STRING_LENGTH);
        if truncated {
            self.error(&d.meta, ErrorType::InvalidOverflow, "String truncated", 1);
        }
        self.store.record(&d.meta, &MetricValue::String(value))
    }

    // --- String list ---

    /// Appends to a string list. Items past [`MAX_LIST_LENGTH`] are dropped.
    pub fn string_list_add(&self, handle: MetricHandle, value: &str) -> MetricsResult<()> {
        let Some(d) = self.recordable(handle, MetricType::StringList)? else {
            return Ok(());
        };
        let (value, truncated) = truncate(value, MAX_STRING_LENGTH);
        if truncated {
            self.error(&d.meta, ErrorType::InvalidOverflow, "List item truncated", 1);
        }

        let mut full = false;
        self.store.record_with(&d.meta, |old| match old {
            Some(MetricValue::StringList(list)) if list.len() >= MAX_LIST_LENGTH => {
                full = true;
                None
            }
            Some(MetricValue::StringList(list)) => {
                let mut list = list.clone();
                list.push(value.clone());
                Some(MetricValue::StringList(list))
            }
            _ => Some(MetricValue::StringList(vec![value.clone()])),
        })?;
        if full {
            self.error(
                &d.meta,
                ErrorType::InvalidValue,
                &format!("String list exceeds {MAX_LIST_LENGTH} items"),
                1,
            );
        }
        Ok(())
    }

    /// Replaces a string list.
    pub fn string_list_set(&self, handle: MetricHandle, values: &[String]) -> MetricsResult<()> {
        let Some(d) = self.recordable(handle, MetricType::StringList)? else {
            return Ok(());
        };
        if values.len() > MAX_LIST_LENGTH {
            self.error(
                &d.meta,
                ErrorType::InvalidValue,
                &format!("String list of {} items exceeds {MAX_LIST_LENGTH}", values.len()),
                1,
            );
        }
        let mut overflowed = 0;
        let list: Vec<String> = values
            .iter()
            .take(MAX_LIST_LENGTH)
            .map(|v| {
                let (v, truncated) = truncate(v, MAX_STRING_LENGTH);
                overflowed += usize::from(truncated);
                v
            })
            .collect();
        self.error(&d.meta, ErrorType::InvalidOverflow, "List items truncated", overflowed);
        self.store.record(&d.meta, &MetricValue::StringList(list))
    }

    // --- UUID ---

    /// Sets a UUID from its textual form. Unparseable values are rejected.
    pub fn uuid_set(&self, handle: MetricHandle, value: &str) -> MetricsResult<()> {
        let Some(d) = self.recordable(handle, MetricType::Uuid)? else {
            return Ok(());
        };
        match Uuid::parse_str(value) {
            Ok(uuid) => self
                .store
                .record(&d.meta, &MetricValue::Uuid(uuid.hyphenated().to_string())),
            Err(_) => {
                self.error(
                    &d.meta,
                    ErrorType::InvalidValue,
                    &format!("Unexpected UUID value '{value}'"),
                    1,
                );
                Ok(())
            }
        }
    }

    /// Generates a random UUID, stores it, and returns it.
    pub fn uuid_generate_and_set(&self, handle: MetricHandle) -> MetricsResult<String> {
        let uuid = Uuid::new_v4().to_string();
        if let Some(d) = self.recordable(handle, MetricType::Uuid)? {
            self.store.record(&d.meta, &MetricValue::Uuid(uuid.clone()))?;
        }
        Ok(uuid)
    }

    // --- Datetime ---

    /// Sets a datetime, or now when `value` is `None`, truncated to the
    /// metric's time unit.
    pub fn datetime_set(
        &self,
        handle: MetricHandle,
        value: Option<DatetimeValue>,
    ) -> MetricsResult<()> {
        let Some(d) = self.recordable(handle, MetricType::Datetime)? else {
            return Ok(());
        };
        let time_unit = match d.kind {
            MetricKind::Datetime { time_unit } => time_unit,
            _ => TimeUnit::Millisecond,
        };
        let value = value.unwrap_or_else(DatetimeValue::now).truncate(time_unit);
        self.store
            .record(&d.meta, &MetricValue::Datetime(value, time_unit))
    }

    // --- Timespan ---

    fn timespan_unit(d: &MetricDescriptor) -> TimeUnit {
        match d.kind {
            MetricKind::Timespan { time_unit } => time_unit,
            _ => TimeUnit::Millisecond,
        }
    }

    /// Starts the timespan at host time `start_ns`.
    pub fn timespan_start(&self, handle: MetricHandle, start_ns: u64) -> MetricsResult<()> {
        let Some(d) = self.recordable(handle, MetricType::Timespan)? else {
            return Ok(());
        };
        if let Err(e) = self.timers.timespan_start(handle, start_ns) {
            self.error(&d.meta, ErrorType::InvalidState, &e.to_string(), 1);
        }
        Ok(())
    }

    /// Stops the timespan at host time `stop_ns` and stores the elapsed time.
    pub fn timespan_stop(&self, handle: MetricHandle, stop_ns: u64) -> MetricsResult<()> {
        let Some(d) = self.recordable(handle, MetricType::Timespan)? else {
            self.timers.timespan_cancel(handle);
            return Ok(());
        };
        match self.timers.timespan_stop(handle, stop_ns) {
            Ok(elapsed) => self.set_timespan_once(&d, elapsed),
            Err(e) => {
                self.error(&d.meta, ErrorType::InvalidState, &e.to_string(), 1);
                Ok(())
            }
        }
    }

    /// Abandons a running timespan.
    pub fn timespan_cancel(&self, handle: MetricHandle) {
        self.timers.timespan_cancel(handle);
    }

    /// Stores an externally measured timespan. Rejected while the timer runs.
    pub fn timespan_set_raw(&self, handle: MetricHandle, elapsed_ns: u64) -> MetricsResult<()> {
        let Some(d) = self.recordable(handle, MetricType::Timespan)? else {
            return Ok(());
        };
        if self.timers.timespan_is_running(handle) {
            self.error(
                &d.meta,
                ErrorType::InvalidState,
                "Timespan already running; raw value discarded",
                1,
            );
            return Ok(());
        }
        self.set_timespan_once(&d, elapsed_ns)
    }

    fn set_timespan_once(&self, d: &MetricDescriptor, elapsed_ns: u64) -> MetricsResult<()> {
        let unit = Self::timespan_unit(d);
        let mut already_set = false;
        self.store.record_with(&d.meta, |old| match old {
            Some(MetricValue::Timespan(..)) => {
                already_set = true;
                None
            }
            _ => Some(MetricValue::Timespan(elapsed_ns, unit)),
        })?;
        if already_set {
            self.error(
                &d.meta,
                ErrorType::InvalidState,
                "Timespan value already recorded; new value discarded",
                1,
            );
        }
        Ok(())
    }

    // --- Timing distribution ---

    /// Starts a timer at host time `start_ns`.
    pub fn timing_distribution_start(&self, handle: MetricHandle, start_ns: u64) -> TimerId {
        self.timers.distribution_start(handle, start_ns)
    }

    /// Stops a timer at host time `stop_ns` and accumulates the elapsed time.
    pub fn timing_distribution_stop_and_accumulate(
        &self,
        handle: MetricHandle,
        id: TimerId,
        stop_ns: u64,
    ) -> MetricsResult<()> {
        let elapsed = self.timers.distribution_stop(handle, id, stop_ns);
        let Some(d) = self.recordable(handle, MetricType::TimingDistribution)? else {
            return Ok(());
        };
        match elapsed {
            Ok(elapsed) => self.accumulate_timings(&d, vec![elapsed]),
            Err(e @ (TimerError::NotRunning | TimerError::NegativeDuration)) => {
                self.error(&d.meta, ErrorType::InvalidState, &e.to_string(), 1);
                Ok(())
            }
            Err(TimerError::AlreadyRunning) => Ok(()),
        }
    }

    /// Abandons a running timer.
    pub fn timing_distribution_cancel(&self, handle: MetricHandle, id: TimerId) {
        self.timers.distribution_cancel(handle, id);
    }

    /// Accumulates samples given in the metric's time unit. Negative samples
    /// are rejected.
    pub fn timing_distribution_accumulate_samples(
        &self,
        handle: MetricHandle,
        samples: &[i64],
    ) -> MetricsResult<()> {
        let Some(d) = self.recordable(handle, MetricType::TimingDistribution)? else {
            return Ok(());
        };
        let unit = match d.kind {
            MetricKind::TimingDistribution { time_unit } => time_unit,
            _ => TimeUnit::Nanosecond,
        };
        let negatives = samples.iter().filter(|s| **s < 0).count();
        self.error(
            &d.meta,
            ErrorType::InvalidValue,
            &format!("Accumulated {negatives} negative samples"),
            negatives,
        );
        let nanos = samples
            .iter()
            .filter(|s| **s >= 0)
            .map(|s| (*s as u64).saturating_mul(unit.as_nanos()))
            .collect();
        self.accumulate_timings(&d, nanos)
    }

    fn accumulate_timings(&self, d: &MetricDescriptor, samples: Vec<u64>) -> MetricsResult<()> {
        if samples.is_empty() {
            return Ok(());
        }
        let overflows = samples.iter().filter(|s| **s > MAX_SAMPLE_TIME).count();
        self.error(
            &d.meta,
            ErrorType::InvalidOverflow,
            &format!("{overflows} samples longer than 10 minutes"),
            overflows,
        );
        self.store.record_with(&d.meta, |old| {
            let mut hist = match old {
                Some(MetricValue::TimingDistribution(h)) => h.clone(),
                _ => Histogram::timing(),
            };
            for sample in &samples {
                hist.accumulate((*sample).min(MAX_SAMPLE_TIME));
            }
            Some(MetricValue::TimingDistribution(hist))
        })
    }

    // --- Custom distribution ---

    /// Accumulates samples into the metric's linear or exponential buckets.
    pub fn custom_distribution_accumulate_samples(
        &self,
        handle: MetricHandle,
        samples: &[i64],
    ) -> MetricsResult<()> {
        let Some(d) = self.recordable(handle, MetricType::CustomDistribution)? else {
            return Ok(());
        };
        let Some(bucketing) = d.bucketing() else {
            return Ok(());
        };
        let negatives = samples.iter().filter(|s| **s < 0).count();
        self.error(
            &d.meta,
            ErrorType::InvalidValue,
            &format!("Accumulated {negatives} negative samples"),
            negatives,
        );
        if negatives == samples.len() {
            return Ok(());
        }
        self.store.record_with(&d.meta, |old| {
            let mut hist = match old {
                Some(MetricValue::CustomDistribution(h)) => h.clone(),
                _ => Histogram::new(bucketing),
            };
            for sample in samples.iter().filter(|s| **s >= 0) {
                hist.accumulate(*sample as u64);
            }
            Some(MetricValue::CustomDistribution(hist))
        })
    }

    // --- Event ---

    /// Records an event at host time `timestamp_ms`.
    ///
    /// Events with an extra key the metric does not declare are rejected.
    /// Extra values are truncated to [`MAX_EXTRA_VALUE_LENGTH`] characters.
    pub fn event_record(
        &self,
        handle: MetricHandle,
        timestamp_ms: u64,
        extras: BTreeMap<String, String>,
    ) -> MetricsResult<()> {
        let Some(d) = self.recordable(handle, MetricType::Event)? else {
            return Ok(());
        };
        let allowed: &[String] = match &d.kind {
            MetricKind::Event { allowed_extra_keys } => allowed_extra_keys,
            _ => &[],
        };
        if let Some(key) = extras.keys().find(|k| !allowed.contains(*k)) {
            self.error(
                &d.meta,
                ErrorType::InvalidValue,
                &format!("Invalid extra key '{key}'"),
                1,
            );
            return Ok(());
        }

        let mut truncated = 0;
        let extra: BTreeMap<String, String> = extras
            .into_iter()
            .map(|(k, v)| {
                let (v, was_truncated) = truncate(&v, MAX_EXTRA_VALUE_LENGTH);
                truncated += usize::from(was_truncated);
                (k, v)
            })
            .collect();
        self.error(&d.meta, ErrorType::InvalidOverflow, "Extra values truncated", truncated);

        let event = RecordedEvent {
            timestamp: timestamp_ms,
            category: d.meta.category.clone(),
            name: d.meta.name.clone(),
            extra: (!extra.is_empty()).then_some(extra),
        };
        self.store.record_with(&d.meta, |old| {
            let mut events = match old {
                Some(MetricValue::Events(events)) => events.clone(),
                _ => Vec::new(),
            };
            events.push(event.clone());
            Some(MetricValue::Events(events))
        })
    }

    // --- Labeled ---

    /// Runs `write` against the storage of `label`.
    ///
    /// Dynamic labels are resolved and written under the admission lock, so
    /// concurrent new labels cannot push a metric past [`MAX_LABELS`].
    ///
    /// [`MAX_LABELS`]: crate::metrics::labeled::MAX_LABELS
    fn with_label<F>(&self, d: &MetricDescriptor, label: &str, write: F) -> MetricsResult<()>
    where
        F: FnOnce(&CommonMetricData) -> MetricsResult<()>,
    {
        let dynamic = matches!(d.kind, MetricKind::Labeled { labels: None, .. });
        let _admission = if dynamic {
            Some(
                self.label_admission
                    .lock()
                    .map_err(|_| StorageError::LockPoisoned)?,
            )
        } else {
            None
        };
        let meta = labeled_meta(&self.store, d, label);
        write(&meta)
    }

    /// Adds to one label of a labeled counter.
    pub fn labeled_counter_add(
        &self,
        handle: MetricHandle,
        label: &str,
        amount: i32,
    ) -> MetricsResult<()> {
        let Some(d) = self.recordable(handle, MetricType::LabeledCounter)? else {
            return Ok(());
        };
        self.with_label(&d, label, |meta| {
            if amount <= 0 {
                self.error(
                    meta,
                    ErrorType::InvalidValue,
                    &format!("Added negative or zero value {amount}"),
                    1,
                );
                return Ok(());
            }
            self.store
                .record_with(meta, |old| Some(add_counter(old, amount)))
        })
    }

    /// Sets one label of a labeled boolean.
    pub fn labeled_boolean_set(
        &self,
        handle: MetricHandle,
        label: &str,
        value: bool,
    ) -> MetricsResult<()> {
        let Some(d) = self.recordable(handle, MetricType::LabeledBoolean)? else {
            return Ok(());
        };
        self.with_label(&d, label, |meta| {
            self.store.record(meta, &MetricValue::Boolean(value))
        })
    }

    /// Sets one label of a labeled string.
    pub fn labeled_string_set(
        &self,
        handle: MetricHandle,
        label: &str,
        value: &str,
    ) -> MetricsResult<()> {
        let Some(d) = self.recordable(handle, MetricType::LabeledString)? else {
            return Ok(());
        };
        let (value, truncated) = truncate(value, MAX_STRING_LENGTH);
        self.with_label(&d, label, |meta| {
            if truncated {
                self.error(meta, ErrorType::InvalidOverflow, "String truncated", 1);
            }
            self.store.record(meta, &MetricValue::String(value))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::metrics::descriptor::{HistogramType, LabeledKind};
    use crate::metrics::labeled::OTHER_LABEL;
    use sonde_core::telemetry::Lifetime;
    use tempfile::{tempdir, TempDir};

    fn service() -> (TempDir, TelemetryService) {
        let dir = tempdir().unwrap();
        let service = TelemetryService::new(Configuration::new(dir.path(), "test.app")).unwrap();
        (dir, service)
    }

    fn register(service: &TelemetryService, name: &str, kind: MetricKind) -> MetricHandle {
        let meta = CommonMetricData::new("test", name, &["store1"], Lifetime::Ping);
        service
            .register_metric(MetricDescriptor::new(meta, kind))
            .unwrap()
    }

    #[test]
    fn test_counter_rejects_non_positive() {
        let (_dir, service) = service();
        let counter = register(&service, "clicks", MetricKind::Counter);

        service.counter_add(counter, 2).unwrap();
        service.counter_add(counter, 0).unwrap();
        service.counter_add(counter, -5).unwrap();
        service.counter_add(counter, 3).unwrap();

        assert_eq!(
            service.test_get_value(counter, None).unwrap(),
            Some(MetricValue::Counter(5))
        );
        assert_eq!(
            service
                .test_get_num_recorded_errors(counter, ErrorType::InvalidValue, None)
                .unwrap(),
            2
        );
    }

    #[test]
    fn test_counter_saturates() {
        let (_dir, service) = service();
        let counter = register(&service, "big", MetricKind::Counter);
        service.counter_add(counter, i32::MAX).unwrap();
        service.counter_add(counter, 10).unwrap();
        assert_eq!(
            service.test_get_value(counter, None).unwrap(),
            Some(MetricValue::Counter(i32::MAX))
        );
    }

    #[test]
    fn test_type_mismatch_is_an_error() {
        let (_dir, service) = service();
        let flag = register(&service, "flag", MetricKind::Boolean);
        let result = service.counter_add(flag, 1);
        assert!(matches!(result, Err(MetricsError::TypeMismatch { .. })));
        assert!(!service.test_has_value(flag, None).unwrap());
    }

    #[test]
    fn test_destroyed_handle_is_ignored() {
        let (_dir, service) = service();
        let flag = register(&service, "flag", MetricKind::Boolean);
        service.destroy_metric(flag).unwrap();
        assert!(service.boolean_set(flag, true).is_ok());
    }

    #[test]
    fn test_disabled_metric_records_nothing() {
        let (_dir, service) = service();
        let mut meta = CommonMetricData::new("test", "off", &["store1"], Lifetime::Ping);
        meta.disabled = true;
        let handle = service
            .register_metric(MetricDescriptor::new(meta, MetricKind::Quantity))
            .unwrap();
        service.quantity_set(handle, 7).unwrap();
        assert!(!service.test_has_value(handle, None).unwrap());
    }

    #[test]
    fn test_string_truncation() {
        let (_dir, service) = service();
        let string = register(&service, "name", MetricKind::String);
        service.string_set(string, &"x".repeat(150)).unwrap();

        let stored = service.test_get_value(string, None).unwrap().unwrap();
        assert_eq!(stored.as_str().map(str::len), Some(MAX_STRING_LENGTH));
        assert_eq!(
            service
                .test_get_num_recorded_errors(string, ErrorType::InvalidOverflow, None)
                .unwrap(),
            1
        );
    }

    #[test]
    fn test_string_list_caps_length() {
        let (_dir, service) = service();
        let list = register(&service, "tags", MetricKind::StringList);
        for i in 0..(MAX_LIST_LENGTH + 2) {
            service.string_list_add(list, &format!("tag{i}")).unwrap();
        }
        match service.test_get_value(list, None).unwrap() {
            Some(MetricValue::StringList(items)) => assert_eq!(items.len(), MAX_LIST_LENGTH),
            other => panic!("unexpected value {other:?}"),
        }
        assert_eq!(
            service
                .test_get_num_recorded_errors(list, ErrorType::InvalidValue, None)
                .unwrap(),
            2
        );
    }

    #[test]
    fn test_uuid_validation() {
        let (_dir, service) = service();
        let uuid = register(&service, "id", MetricKind::Uuid);

        service.uuid_set(uuid, "not-a-uuid").unwrap();
        assert!(!service.test_has_value(uuid, None).unwrap());

        service
            .uuid_set(uuid, "9E2C0F57-8A4D-4F6B-9B0C-3C2A1D5E7F80")
            .unwrap();
        assert_eq!(
            service.test_get_value(uuid, None).unwrap(),
            Some(MetricValue::Uuid(
                "9e2c0f57-8a4d-4f6b-9b0c-3c2a1d5e7f80".to_string()
            ))
        );

        let generated = service.uuid_generate_and_set(uuid).unwrap();
        assert_eq!(
            service.test_get_value(uuid, None).unwrap(),
            Some(MetricValue::Uuid(generated))
        );
    }

    #[test]
    fn test_timespan_lifecycle() {
        let (_dir, service) = service();
        let span = register(
            &service,
            "load",
            MetricKind::Timespan {
                time_unit: TimeUnit::Millisecond,
            },
        );

        service.timespan_stop(span, 10).unwrap();
        assert_eq!(
            service
                .test_get_num_recorded_errors(span, ErrorType::InvalidState, None)
                .unwrap(),
            1
        );

        service.timespan_start(span, 1_000).unwrap();
        service.timespan_set_raw(span, 5).unwrap();
        service.timespan_stop(span, 3_001_000).unwrap();
        assert_eq!(
            service.test_get_value(span, None).unwrap(),
            Some(MetricValue::Timespan(3_000_000, TimeUnit::Millisecond))
        );

        // A second value is rejected until the ping is sent.
        service.timespan_set_raw(span, 42).unwrap();
        assert_eq!(
            service
                .test_get_num_recorded_errors(span, ErrorType::InvalidState, None)
                .unwrap(),
            3
        );
    }

    #[test]
    fn test_timing_distribution_timers() {
        let (_dir, service) = service();
        let timing = register(
            &service,
            "frame",
            MetricKind::TimingDistribution {
                time_unit: TimeUnit::Nanosecond,
            },
        );

        let first = service.timing_distribution_start(timing, 100);
        let second = service.timing_distribution_start(timing, 200);
        assert_ne!(first, second);
        service
            .timing_distribution_stop_and_accumulate(timing, second, 700)
            .unwrap();
        service
            .timing_distribution_stop_and_accumulate(timing, first, 1_100)
            .unwrap();

        let cancelled = service.timing_distribution_start(timing, 0);
        service.timing_distribution_cancel(timing, cancelled);
        service
            .timing_distribution_stop_and_accumulate(timing, cancelled, 50)
            .unwrap();

        let value = service.test_get_value(timing, None).unwrap().unwrap();
        let hist = value.as_histogram().unwrap();
        assert_eq!(hist.count(), 2);
        assert_eq!(hist.sum(), 1_500);
        assert_eq!(
            service
                .test_get_num_recorded_errors(timing, ErrorType::InvalidState, None)
                .unwrap(),
            1
        );
    }

    #[test]
    fn test_timing_samples_are_clamped_and_filtered() {
        let (_dir, service) = service();
        let timing = register(
            &service,
            "io",
            MetricKind::TimingDistribution {
                time_unit: TimeUnit::Second,
            },
        );
        service
            .timing_distribution_accumulate_samples(timing, &[1, -3, 3_600])
            .unwrap();

        let value = service.test_get_value(timing, None).unwrap().unwrap();
        let hist = value.as_histogram().unwrap();
        assert_eq!(hist.count(), 2);
        assert_eq!(hist.sum(), 1_000_000_000 + MAX_SAMPLE_TIME);
        assert_eq!(
            service
                .test_get_num_recorded_errors(timing, ErrorType::InvalidValue, None)
                .unwrap(),
            1
        );
        assert_eq!(
            service
                .test_get_num_recorded_errors(timing, ErrorType::InvalidOverflow, None)
                .unwrap(),
            1
        );
    }

    #[test]
    fn test_custom_distribution_buckets() {
        let (_dir, service) = service();
        let custom = register(
            &service,
            "sizes",
            MetricKind::CustomDistribution {
                range_min: 1,
                range_max: 100,
                bucket_count: 5,
                histogram_type: HistogramType::Linear,
            },
        );
        service
            .custom_distribution_accumulate_samples(custom, &[2, 40, 500])
            .unwrap();

        let value = service.test_get_value(custom, None).unwrap().unwrap();
        let hist = value.as_histogram().unwrap();
        assert_eq!(hist.count(), 3);
        assert_eq!(hist.values().get(&100), Some(&1));
    }

    #[test]
    fn test_event_extras() {
        let (_dir, service) = service();
        let event = register(
            &service,
            "opened",
            MetricKind::Event {
                allowed_extra_keys: vec!["source".to_string()],
            },
        );

        let mut extras = BTreeMap::new();
        extras.insert("source".to_string(), "y".repeat(600));
        service.event_record(event, 10, extras).unwrap();

        let mut bad = BTreeMap::new();
        bad.insert("unknown".to_string(), "v".to_string());
        service.event_record(event, 20, bad).unwrap();

        match service.test_get_value(event, None).unwrap() {
            Some(MetricValue::Events(events)) => {
                assert_eq!(events.len(), 1);
                let extra = events[0].extra.as_ref().unwrap();
                assert_eq!(extra["source"].len(), MAX_EXTRA_VALUE_LENGTH);
            }
            other => panic!("unexpected value {other:?}"),
        }
        assert_eq!(
            service
                .test_get_num_recorded_errors(event, ErrorType::InvalidValue, None)
                .unwrap(),
            1
        );
    }

    #[test]
    fn test_labeled_counter_static_labels() {
        let (_dir, service) = service();
        let labeled = register(
            &service,
            "by_kind",
            MetricKind::Labeled {
                kind: LabeledKind::Counter,
                labels: Some(vec!["a".to_string(), "b".to_string()]),
            },
        );
        service.labeled_counter_add(labeled, "a", 1).unwrap();
        service.labeled_counter_add(labeled, "zzz", 2).unwrap();

        assert_eq!(
            service.test_get_labeled_value(labeled, "a", None).unwrap(),
            Some(MetricValue::Counter(1))
        );
        assert_eq!(
            service
                .test_get_labeled_value(labeled, OTHER_LABEL, None)
                .unwrap(),
            Some(MetricValue::Counter(2))
        );
        assert!(service
            .test_get_labeled_value(labeled, "zzz", None)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_recording_stops_when_upload_disabled() {
        let (_dir, service) = service();
        let flag = register(&service, "flag", MetricKind::Boolean);
        service.set_upload_enabled(false).unwrap();
        service.boolean_set(flag, true).unwrap();
        assert!(!service.test_has_value(flag, None).unwrap());
    }

    #[test]
    fn test_no_recording_lands_after_disable() {
        let (_dir, service) = service();
        let service = Arc::new(service);
        let hits = register(&service, "hits", MetricKind::Counter);

        let writers: Vec<_> = (0..4)
            .map(|_| {
                let service = Arc::clone(&service);
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        service.counter_add(hits, 1).unwrap();
                    }
                })
            })
            .collect();
        service.set_upload_enabled(false).unwrap();
        for writer in writers {
            writer.join().unwrap();
        }

        assert!(!service.test_has_value(hits, None).unwrap());
        assert!(service.store.snapshot("store1", false).unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_dynamic_labels_respect_the_cap() {
        let (_dir, service) = service();
        let service = Arc::new(service);
        let labeled = register(
            &service,
            "dyn",
            MetricKind::Labeled {
                kind: LabeledKind::Counter,
                labels: None,
            },
        );

        let writers: Vec<_> = (0..8)
            .map(|t| {
                let service = Arc::clone(&service);
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        for i in 0..4 {
                            let label = format!("t{t}_{i}");
                            service.labeled_counter_add(labeled, &label, 1).unwrap();
                        }
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        assert_eq!(
            service.store.label_count(Lifetime::Ping, "store1", "test.dyn"),
            crate::metrics::labeled::MAX_LABELS + 1
        );
        let total: i32 = service
            .store
            .snapshot("store1", false)
            .unwrap()
            .entries
            .iter()
            .filter(|(id, _)| id.starts_with("test.dyn/"))
            .filter_map(|(_, value)| value.as_counter())
            .sum();
        assert_eq!(total, 8 * 10 * 4);
    }
}

