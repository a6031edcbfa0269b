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

//! Recording of data-quality errors as labeled counters.
//!
//! Misuse that the host cannot be expected to check up front (a negative
//! quantity, an overlong string, a timer stopped twice) does not fail the
//! call. The value is rejected or truncated, and an error counter
//! `sonde.error.<type>` labeled by the offending metric's identifier is
//! incremented in the metric's pings and in the `metrics` ping.

use crate::storage::MetricStore;
use sonde_core::telemetry::metrics::LABEL_SEPARATOR;
use sonde_core::telemetry::{CommonMetricData, Lifetime, MetricValue, MetricsResult};
use std::fmt::Display;

/// Category of every error counter.
pub const ERROR_CATEGORY: &str = "sonde.error";

/// The ping error counters are always sent in, besides the metric's own pings.
pub const METRICS_PING_NAME: &str = "metrics";

/// The kinds of recording errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorType {
    /// The value was not valid for the metric.
    InvalidValue,
    /// The label of a labeled metric was not valid.
    InvalidLabel,
    /// The metric was used in the wrong state (e.g. a timer stopped twice).
    InvalidState,
    /// The value exceeded a limit and was truncated or clamped.
    InvalidOverflow,
}

impl ErrorType {
    /// The error counter's name.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorType::InvalidValue => "invalid_value",
            ErrorType::InvalidLabel => "invalid_label",
            ErrorType::InvalidState => "invalid_state",
            ErrorType::InvalidOverflow => "invalid_overflow",
        }
    }
}

/// The identifier of `meta` with any label stripped.
fn base_identifier(meta: &CommonMetricData) -> String {
    let identifier = meta.identifier();
    match identifier.split_once(LABEL_SEPARATOR) {
        Some((base, _)) => base.to_string(),
        None => identifier,
    }
}

fn error_meta(meta: &CommonMetricData, error: ErrorType) -> CommonMetricData {
    let mut send_in_pings = meta.send_in_pings.clone();
    if !send_in_pings.iter().any(|p| p == METRICS_PING_NAME) {
        send_in_pings.push(METRICS_PING_NAME.to_string());
    }
    CommonMetricData {
        category: ERROR_CATEGORY.to_string(),
        name: format!("{}{LABEL_SEPARATOR}{}", error.as_str(), base_identifier(meta)),
        send_in_pings,
        lifetime: Lifetime::Ping,
        disabled: false,
    }
}

/// Records `num_errors` errors of type `error` against `meta`.
pub fn record_error(
    store: &MetricStore,
    meta: &CommonMetricData,
    error: ErrorType,
    message: impl Display,
    num_errors: usize,
) {
    if num_errors == 0 {
        return;
    }
    log::warn!("{}: {message}", meta.identifier());

    let amount = i32::try_from(num_errors).unwrap_or(i32::MAX);
    let result = store.record_with(&error_meta(meta, error), |old| match old {
        Some(MetricValue::Counter(v)) => Some(MetricValue::Counter(v.saturating_add(amount))),
        _ => Some(MetricValue::Counter(amount)),
    });
    if let Err(e) = result {
        log::error!("Failed to record {} error: {e}", error.as_str());
    }
}

/// Number of errors of `error` recorded against `meta` in `ping`.
///
/// Defaults to the metric's first ping when `ping` is `None`.
pub fn test_get_num_recorded_errors(
    store: &MetricStore,
    meta: &CommonMetricData,
    error: ErrorType,
    ping: Option<&str>,
) -> MetricsResult<i32> {
    let error_meta = error_meta(meta, error);
    let storage = ping
        .or_else(|| meta.send_in_pings.first().map(String::as_str))
        .unwrap_or(METRICS_PING_NAME);
    Ok(store
        .read(Lifetime::Ping, storage, &error_meta.identifier())
        .and_then(|v| v.as_counter())
        .unwrap_or(0))
}
