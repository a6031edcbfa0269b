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

//! Running timers for timespan and timing distribution metrics, and an
//! RAII helper that records the duration of a scope.

use crate::metrics::MetricHandle;
use crate::service::TelemetryService;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;
use thiserror::Error;

/// Identifier for a running timing distribution timer.
pub type TimerId = u64;

/// Misuse of a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TimerError {
    /// A timespan was started while already running.
    #[error("timer already running")]
    AlreadyRunning,
    /// A timer was stopped without a matching start.
    #[error("timer not running")]
    NotRunning,
    /// The stop timestamp precedes the start timestamp.
    #[error("timer stopped with negative duration")]
    NegativeDuration,
}

/// Start timestamps of running timers, keyed by metric handle.
///
/// Timestamps are host-supplied nanoseconds from a monotonic clock.
#[derive(Debug, Default)]
pub struct TimerRegistry {
    timespans: Mutex<HashMap<MetricHandle, u64>>,
    distributions: Mutex<HashMap<(MetricHandle, TimerId), u64>>,
    next_id: AtomicU64,
}

impl TimerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the timespan of `handle`.
    pub fn timespan_start(&self, handle: MetricHandle, start_ns: u64) -> Result<(), TimerError> {
        let Ok(mut running) = self.timespans.lock() else {
            return Err(TimerError::NotRunning);
        };
        if running.contains_key(&handle) {
            return Err(TimerError::AlreadyRunning);
        }
        running.insert(handle, start_ns);
        Ok(())
    }

    /// Stops the timespan of `handle`, returning the elapsed nanoseconds.
    pub fn timespan_stop(&self, handle: MetricHandle, stop_ns: u64) -> Result<u64, TimerError> {
        let start = self
            .timespans
            .lock()
            .ok()
            .and_then(|mut running| running.remove(&handle))
            .ok_or(TimerError::NotRunning)?;
        stop_ns
            .checked_sub(start)
            .ok_or(TimerError::NegativeDuration)
    }

    /// Whether the timespan of `handle` is running.
    pub fn timespan_is_running(&self, handle: MetricHandle) -> bool {
        self.timespans
            .lock()
            .map(|running| running.contains_key(&handle))
            .unwrap_or(false)
    }

    /// Forgets the timespan of `handle`.
    pub fn timespan_cancel(&self, handle: MetricHandle) {
        if let Ok(mut running) = self.timespans.lock() {
            running.remove(&handle);
        }
    }

    /// Starts a new timer for a timing distribution.
    pub fn distribution_start(&self, handle: MetricHandle, start_ns: u64) -> TimerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut running) = self.distributions.lock() {
            running.insert((handle, id), start_ns);
        }
        id
    }

    /// Stops a timing distribution timer, returning the elapsed nanoseconds.
    pub fn distribution_stop(
        &self,
        handle: MetricHandle,
        id: TimerId,
        stop_ns: u64,
    ) -> Result<u64, TimerError> {
        let start = self
            .distributions
            .lock()
            .ok()
            .and_then(|mut running| running.remove(&(handle, id)))
            .ok_or(TimerError::NotRunning)?;
        stop_ns
            .checked_sub(start)
            .ok_or(TimerError::NegativeDuration)
    }

    /// Forgets a timing distribution timer.
    pub fn distribution_cancel(&self, handle: MetricHandle, id: TimerId) {
        if let Ok(mut running) = self.distributions.lock() {
            running.remove(&(handle, id));
        }
    }

    /// Forgets every running timer.
    pub fn clear(&self) {
        if let Ok(mut running) = self.timespans.lock() {
            running.clear();
        }
        if let Ok(mut running) = self.distributions.lock() {
            running.clear();
        }
    }
}

/// Nanoseconds elapsed on a process-wide monotonic clock.
pub fn monotonic_ns() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = EPOCH.get_or_init(Instant::now);
    u64::try_from(epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
}

/// A utility for timing the duration of a scope and automatically recording
/// the result in a timing distribution when it is dropped.
///
/// The measurement is recorded even on early returns.
pub struct ScopedTimer<'a> {
    service: &'a TelemetryService,
    handle: MetricHandle,
    id: TimerId,
}

impl<'a> ScopedTimer<'a> {
    /// Starts a timer on the given timing distribution.
    pub fn new(service: &'a TelemetryService, handle: MetricHandle) -> Self {
        let id = service.timing_distribution_start(handle, monotonic_ns());
        Self {
            service,
            handle,
            id,
        }
    }

    /// Drops the measurement instead of recording it.
    pub fn cancel(self) {
        self.service.timing_distribution_cancel(self.handle, self.id);
        std::mem::forget(self);
    }
}

impl Drop for ScopedTimer<'_> {
    fn drop(&mut self) {
        if let Err(e) =
            self.service
                .timing_distribution_stop_and_accumulate(self.handle, self.id, monotonic_ns())
        {
            log::warn!("[ScopedTimer] Failed to record metric: {:?}", e);
        }
    }
}
