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

//! Time units and the serializable datetime representation.

use chrono::{DateTime, FixedOffset, Local, Offset, TimeZone, Timelike};
use serde::{Deserialize, Serialize};

/// The precision at which a time-based metric is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TimeUnit {
    /// Nanosecond precision.
    Nanosecond,
    /// Microsecond precision.
    Microsecond,
    /// Millisecond precision.
    #[default]
    Millisecond,
    /// Second precision.
    Second,
    /// Minute precision.
    Minute,
    /// Hour precision.
    Hour,
    /// Day precision.
    Day,
}

impl TimeUnit {
    /// Returns the lowercase name used in payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            TimeUnit::Nanosecond => "nanosecond",
            TimeUnit::Microsecond => "microsecond",
            TimeUnit::Millisecond => "millisecond",
            TimeUnit::Second => "second",
            TimeUnit::Minute => "minute",
            TimeUnit::Hour => "hour",
            TimeUnit::Day => "day",
        }
    }

    /// Number of nanoseconds in one unit.
    pub fn as_nanos(self) -> u64 {
        match self {
            TimeUnit::Nanosecond => 1,
            TimeUnit::Microsecond => 1_000,
            TimeUnit::Millisecond => 1_000_000,
            TimeUnit::Second => 1_000_000_000,
            TimeUnit::Minute => 60 * 1_000_000_000,
            TimeUnit::Hour => 3_600 * 1_000_000_000,
            TimeUnit::Day => 86_400 * 1_000_000_000,
        }
    }

    /// Converts a duration in nanoseconds into this unit, truncating.
    pub fn duration_convert(self, nanos: u64) -> u64 {
        nanos / self.as_nanos()
    }

    /// The `chrono` format string rendering a datetime at this precision.
    pub fn format_pattern(self) -> &'static str {
        match self {
            TimeUnit::Nanosecond => "%Y-%m-%dT%H:%M:%S%.f%:z",
            TimeUnit::Microsecond => "%Y-%m-%dT%H:%M:%S%.6f%:z",
            TimeUnit::Millisecond => "%Y-%m-%dT%H:%M:%S%.3f%:z",
            TimeUnit::Second => "%Y-%m-%dT%H:%M:%S%:z",
            TimeUnit::Minute => "%Y-%m-%dT%H:%M%:z",
            TimeUnit::Hour => "%Y-%m-%dT%H%:z",
            TimeUnit::Day => "%Y-%m-%d%:z",
        }
    }
}

/// A point in time with its UTC offset, in a form that survives storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatetimeValue {
    /// Seconds since the Unix epoch.
    pub seconds: i64,
    /// Sub-second nanoseconds.
    pub nanos: u32,
    /// Offset from UTC in seconds, east positive.
    pub offset_seconds: i32,
}

impl DatetimeValue {
    /// The current local time.
    pub fn now() -> Self {
        Self::from_chrono(&Local::now().fixed_offset())
    }

    /// Converts from a `chrono` datetime, keeping its offset.
    pub fn from_chrono<Tz: TimeZone>(dt: &DateTime<Tz>) -> Self {
        Self {
            seconds: dt.timestamp(),
            nanos: dt.timestamp_subsec_nanos(),
            offset_seconds: dt.offset().fix().local_minus_utc(),
        }
    }

    /// Converts back into a `chrono` datetime with a fixed offset.
    ///
    /// Out-of-range components fall back to the Unix epoch in UTC.
    pub fn to_chrono(&self) -> DateTime<FixedOffset> {
        let offset = FixedOffset::east_opt(self.offset_seconds)
            .unwrap_or_else(|| Offset::fix(&chrono::Utc));
        DateTime::from_timestamp(self.seconds, self.nanos)
            .unwrap_or_default()
            .with_timezone(&offset)
    }

    /// Drops the precision below `unit`.
    pub fn truncate(&self, unit: TimeUnit) -> Self {
        let dt = self.to_chrono();
        let truncated = match unit {
            TimeUnit::Nanosecond => Some(dt),
            TimeUnit::Microsecond => dt.with_nanosecond(dt.nanosecond() / 1_000 * 1_000),
            TimeUnit::Millisecond => dt.with_nanosecond(dt.nanosecond() / 1_000_000 * 1_000_000),
            TimeUnit::Second => dt.with_nanosecond(0),
            TimeUnit::Minute => dt.with_nanosecond(0).and_then(|d| d.with_second(0)),
            TimeUnit::Hour => dt
                .with_nanosecond(0)
                .and_then(|d| d.with_second(0))
                .and_then(|d| d.with_minute(0)),
            TimeUnit::Day => dt
                .with_nanosecond(0)
                .and_then(|d| d.with_second(0))
                .and_then(|d| d.with_minute(0))
                .and_then(|d| d.with_hour(0)),
        };
        Self::from_chrono(&truncated.unwrap_or(dt))
    }

    /// Renders the ISO 8601 form at the given precision.
    pub fn to_iso_string(&self, unit: TimeUnit) -> String {
        self.to_chrono().format(unit.format_pattern()).to_string()
    }
}
