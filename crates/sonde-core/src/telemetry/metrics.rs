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

//! Abstract definitions for metric identity, lifetimes and stored values.

use crate::telemetry::event::RecordedEvent;
use crate::telemetry::experiment::RecordedExperiment;
use crate::telemetry::histogram::Histogram;
use crate::telemetry::time::{DatetimeValue, TimeUnit};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::fmt::{Debug, Display};
use std::hash::Hash;

/// The separator between a metric identifier and the label of a labeled value.
pub const LABEL_SEPARATOR: char = '/';

/// A unique, structured identifier for a metric.
///
/// A `MetricId` is composed of a category and a name. Together they form the
/// dotted identifier under which the metric appears in ping payloads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetricId {
    /// The broad category of the metric (e.g., "browser", "app.session").
    pub category: String,
    /// The specific name of the metric (e.g., "tabs_opened").
    pub name: String,
}

impl MetricId {
    /// Creates a new `MetricId` with a category and a name.
    pub fn new(category: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            name: name.into(),
        }
    }

    /// Returns the dotted identifier (e.g., "category.name").
    ///
    /// Metrics with an empty category are identified by their name alone.
    pub fn identifier(&self) -> String {
        if self.category.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.category, self.name)
        }
    }

    /// Returns the storage identifier of one label of a labeled metric.
    pub fn labeled_identifier(&self, label: &str) -> String {
        format!("{}{LABEL_SEPARATOR}{label}", self.identifier())
    }
}

impl Display for MetricId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.identifier())
    }
}

/// The scope controlling when an accumulated metric value is cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Lifetime {
    /// Cleared every time the ping it belongs to is successfully assembled.
    #[default]
    Ping,
    /// Cleared at the application/session boundary defined by the host.
    Application,
    /// Persists across restarts until explicitly deleted.
    User,
}

impl Lifetime {
    /// All lifetimes, shortest-lived first.
    pub const ALL: [Lifetime; 3] = [Lifetime::Ping, Lifetime::Application, Lifetime::User];

    /// Returns the short name used for on-disk partitions.
    pub fn as_str(self) -> &'static str {
        match self {
            Lifetime::Ping => "ping",
            Lifetime::Application => "app",
            Lifetime::User => "user",
        }
    }

    /// Returns a dense index, usable to address per-lifetime arrays.
    pub fn index(self) -> usize {
        match self {
            Lifetime::Ping => 0,
            Lifetime::Application => 1,
            Lifetime::User => 2,
        }
    }
}

impl Display for Lifetime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The type tag of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricType {
    /// A single true/false flag.
    Boolean,
    /// A value that only ever increases within a ping.
    Counter,
    /// A single non-negative integer that is overwritten on each set.
    Quantity,
    /// A single bounded string.
    String,
    /// A bounded list of bounded strings.
    StringList,
    /// A UUID in its hyphenated textual form.
    Uuid,
    /// An absolute point in time, truncated to a time unit.
    Datetime,
    /// A single elapsed duration.
    Timespan,
    /// A distribution of durations in functional buckets.
    TimingDistribution,
    /// A distribution of arbitrary samples in linear or exponential buckets.
    CustomDistribution,
    /// A list of timestamped events with extra key/value data.
    Event,
    /// A counter split by label.
    LabeledCounter,
    /// A boolean split by label.
    LabeledBoolean,
    /// A string split by label.
    LabeledString,
    /// An experiment's active branch.
    Experiment,
}

impl MetricType {
    /// Returns the name of the ping section this metric type is reported in.
    pub fn section_name(self) -> &'static str {
        match self {
            MetricType::Boolean => "boolean",
            MetricType::Counter => "counter",
            MetricType::Quantity => "quantity",
            MetricType::String => "string",
            MetricType::StringList => "string_list",
            MetricType::Uuid => "uuid",
            MetricType::Datetime => "datetime",
            MetricType::Timespan => "timespan",
            MetricType::TimingDistribution => "timing_distribution",
            MetricType::CustomDistribution => "custom_distribution",
            MetricType::Event => "events",
            MetricType::LabeledCounter => "labeled_counter",
            MetricType::LabeledBoolean => "labeled_boolean",
            MetricType::LabeledString => "labeled_string",
            MetricType::Experiment => "experiment",
        }
    }

    /// Returns the labeled variant of a plain type, if one exists.
    pub fn labeled(self) -> Option<MetricType> {
        match self {
            MetricType::Counter => Some(MetricType::LabeledCounter),
            MetricType::Boolean => Some(MetricType::LabeledBoolean),
            MetricType::String => Some(MetricType::LabeledString),
            _ => None,
        }
    }
}

/// Metadata shared by every metric type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommonMetricData {
    /// The metric's category.
    pub category: String,
    /// The metric's name.
    pub name: String,
    /// The pings this metric is sent in.
    pub send_in_pings: Vec<String>,
    /// When the accumulated value is cleared.
    pub lifetime: Lifetime,
    /// Whether recording is disabled for this metric.
    pub disabled: bool,
}

impl CommonMetricData {
    /// Creates metadata for a metric sent in the given pings.
    pub fn new(
        category: impl Into<String>,
        name: impl Into<String>,
        send_in_pings: &[&str],
        lifetime: Lifetime,
    ) -> Self {
        Self {
            category: category.into(),
            name: name.into(),
            send_in_pings: send_in_pings.iter().map(|p| p.to_string()).collect(),
            lifetime,
            disabled: false,
        }
    }

    /// Returns the identity of this metric.
    pub fn id(&self) -> MetricId {
        MetricId::new(self.category.clone(), self.name.clone())
    }

    /// Returns the dotted identifier of this metric.
    pub fn identifier(&self) -> String {
        self.id().identifier()
    }

    /// The storages (ping names) a recording fans out to.
    pub fn storage_names(&self) -> &[String] {
        &self.send_in_pings
    }
}

/// An enumeration of the values a metric can hold in storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetricValue {
    /// A boolean flag.
    Boolean(bool),
    /// A counter; additive within a storage key.
    Counter(i32),
    /// A quantity; last write wins.
    Quantity(i64),
    /// A string; last write wins.
    String(String),
    /// A list of strings; additions append.
    StringList(Vec<String>),
    /// A UUID in hyphenated form.
    Uuid(String),
    /// An absolute time with its precision.
    Datetime(DatetimeValue, TimeUnit),
    /// An elapsed duration in nanoseconds, reported in the given unit.
    Timespan(u64, TimeUnit),
    /// A distribution of nanosecond durations.
    TimingDistribution(Histogram),
    /// A distribution of arbitrary samples.
    CustomDistribution(Histogram),
    /// Recorded events, in recording order.
    Events(Vec<RecordedEvent>),
    /// An active experiment annotation.
    Experiment(RecordedExperiment),
}

impl MetricValue {
    /// Returns the [`MetricType`] corresponding to this value.
    pub fn metric_type(&self) -> MetricType {
        match self {
            MetricValue::Boolean(_) => MetricType::Boolean,
            MetricValue::Counter(_) => MetricType::Counter,
            MetricValue::Quantity(_) => MetricType::Quantity,
            MetricValue::String(_) => MetricType::String,
            MetricValue::StringList(_) => MetricType::StringList,
            MetricValue::Uuid(_) => MetricType::Uuid,
            MetricValue::Datetime(..) => MetricType::Datetime,
            MetricValue::Timespan(..) => MetricType::Timespan,
            MetricValue::TimingDistribution(_) => MetricType::TimingDistribution,
            MetricValue::CustomDistribution(_) => MetricType::CustomDistribution,
            MetricValue::Events(_) => MetricType::Event,
            MetricValue::Experiment(_) => MetricType::Experiment,
        }
    }

    /// Returns the value as an `i32` if it is a `Counter`.
    pub fn as_counter(&self) -> Option<i32> {
        match self {
            MetricValue::Counter(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value as a `bool` if it is a `Boolean`.
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            MetricValue::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value as a `&str` if it is a `String` or `Uuid`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetricValue::String(v) | MetricValue::Uuid(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the histogram of a distribution value.
    pub fn as_histogram(&self) -> Option<&Histogram> {
        match self {
            MetricValue::TimingDistribution(h) | MetricValue::CustomDistribution(h) => Some(h),
            _ => None,
        }
    }

    /// Returns the payload representation of this value.
    ///
    /// Events are returned as an array in recording order; the ping assembler
    /// re-bases their timestamps when it merges them into one list.
    pub fn as_json(&self) -> JsonValue {
        match self {
            MetricValue::Boolean(v) => json!(v),
            MetricValue::Counter(v) => json!(v),
            MetricValue::Quantity(v) => json!(v),
            MetricValue::String(v) | MetricValue::Uuid(v) => json!(v),
            MetricValue::StringList(v) => json!(v),
            MetricValue::Datetime(dt, unit) => json!(dt.to_iso_string(*unit)),
            MetricValue::Timespan(nanos, unit) => json!({
                "value": unit.duration_convert(*nanos),
                "time_unit": unit.as_str(),
            }),
            MetricValue::TimingDistribution(h) | MetricValue::CustomDistribution(h) => {
                h.snapshot_json()
            }
            MetricValue::Events(events) => {
                JsonValue::Array(events.iter().map(|e| e.as_json(0)).collect())
            }
            MetricValue::Experiment(experiment) => experiment.as_json(),
        }
    }
}

/// A specialized `Result` type for metric-related operations.
pub type MetricsResult<T> = Result<T, MetricsError>;

/// An error that can occur within the telemetry core.
///
/// These are caller-facing: misuse is reported synchronously and aborts the
/// operation without any partial state change.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricsError {
    /// The handle was never issued by this process or has been destroyed.
    UnknownHandle(u64),
    /// An operation was attempted on a metric of the wrong type.
    TypeMismatch {
        /// The expected metric type for the operation.
        expected: MetricType,
        /// The actual metric type that was found.
        found: MetricType,
    },
    /// A ping name was used that is not registered.
    UnknownPing(String),
    /// An argument was rejected before any state was touched.
    InvalidArgument(String),
    /// An error originating from the storage layer.
    StorageError(String),
    /// A persisted or outgoing payload could not be (de)serialized.
    Serialization(String),
}

impl Display for MetricsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricsError::UnknownHandle(handle) => {
                write!(f, "Unknown or destroyed handle: {handle}")
            }
            MetricsError::TypeMismatch { expected, found } => {
                write!(f, "Type mismatch: expected {expected:?}, found {found:?}")
            }
            MetricsError::UnknownPing(name) => write!(f, "Unknown ping type: {name}"),
            MetricsError::InvalidArgument(msg) => write!(f, "Invalid argument: {msg}"),
            MetricsError::StorageError(msg) => write!(f, "Storage error: {msg}"),
            MetricsError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
        }
    }
}

impl std::error::Error for MetricsError {}

impl From<serde_json::Error> for MetricsError {
    fn from(e: serde_json::Error) -> Self {
        MetricsError::Serialization(e.to_string())
    }
}

impl MetricsError {
    /// Returns a stable numeric code for hosts that surface errors as a
    /// `(code, message)` pair.
    pub fn code(&self) -> i32 {
        match self {
            MetricsError::UnknownHandle(_) => 1,
            MetricsError::TypeMismatch { .. } => 2,
            MetricsError::UnknownPing(_) => 3,
            MetricsError::InvalidArgument(_) => 4,
            MetricsError::StorageError(_) => 5,
            MetricsError::Serialization(_) => 6,
        }
    }
}
