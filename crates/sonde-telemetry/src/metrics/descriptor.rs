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

//! Static description of a registered metric.

use sonde_core::telemetry::{Bucketing, CommonMetricData, MetricType, TimeUnit};

/// The bucketing family of a custom distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistogramType {
    /// Equal-width buckets.
    Linear,
    /// Exponentially-spaced buckets.
    Exponential,
}

/// The plain type underneath a labeled metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabeledKind {
    /// A counter per label.
    Counter,
    /// A boolean per label.
    Boolean,
    /// A string per label.
    String,
}

/// Type-specific parameters of a metric.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricKind {
    /// See [`MetricType::Boolean`].
    Boolean,
    /// See [`MetricType::Counter`].
    Counter,
    /// See [`MetricType::Quantity`].
    Quantity,
    /// See [`MetricType::String`].
    String,
    /// See [`MetricType::StringList`].
    StringList,
    /// See [`MetricType::Uuid`].
    Uuid,
    /// See [`MetricType::Datetime`].
    Datetime {
        /// Reporting precision.
        time_unit: TimeUnit,
    },
    /// See [`MetricType::Timespan`].
    Timespan {
        /// Reporting unit.
        time_unit: TimeUnit,
    },
    /// See [`MetricType::TimingDistribution`].
    TimingDistribution {
        /// Unit of raw samples passed to `accumulate_samples`.
        time_unit: TimeUnit,
    },
    /// See [`MetricType::CustomDistribution`].
    CustomDistribution {
        /// Smallest non-underflow bucket.
        range_min: u64,
        /// Start of the overflow bucket.
        range_max: u64,
        /// Total number of buckets.
        bucket_count: usize,
        /// Bucket spacing.
        histogram_type: HistogramType,
    },
    /// See [`MetricType::Event`].
    Event {
        /// The extra keys events may carry.
        allowed_extra_keys: Vec<String>,
    },
    /// A labeled counter, boolean or string.
    Labeled {
        /// The per-label type.
        kind: LabeledKind,
        /// A fixed label set, or `None` for dynamic labels.
        labels: Option<Vec<String>>,
    },
}

impl MetricKind {
    /// The type tag of this kind.
    pub fn metric_type(&self) -> MetricType {
        match self {
            MetricKind::Boolean => MetricType::Boolean,
            MetricKind::Counter => MetricType::Counter,
            MetricKind::Quantity => MetricType::Quantity,
            MetricKind::String => MetricType::String,
            MetricKind::StringList => MetricType::StringList,
            MetricKind::Uuid => MetricType::Uuid,
            MetricKind::Datetime { .. } => MetricType::Datetime,
            MetricKind::Timespan { .. } => MetricType::Timespan,
            MetricKind::TimingDistribution { .. } => MetricType::TimingDistribution,
            MetricKind::CustomDistribution { .. } => MetricType::CustomDistribution,
            MetricKind::Event { .. } => MetricType::Event,
            MetricKind::Labeled { kind, .. } => match kind {
                LabeledKind::Counter => MetricType::LabeledCounter,
                LabeledKind::Boolean => MetricType::LabeledBoolean,
                LabeledKind::String => MetricType::LabeledString,
            },
        }
    }
}

/// A registered metric: its common metadata and type parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDescriptor {
    /// Identity, pings and lifetime.
    pub meta: CommonMetricData,
    /// Type and type-specific parameters.
    pub kind: MetricKind,
}

impl MetricDescriptor {
    /// Creates a descriptor.
    pub fn new(meta: CommonMetricData, kind: MetricKind) -> Self {
        Self { meta, kind }
    }

    /// The type tag of this metric.
    pub fn metric_type(&self) -> MetricType {
        self.kind.metric_type()
    }

    /// Whether a recording should be accepted right now.
    pub fn should_record(&self, upload_enabled: bool) -> bool {
        upload_enabled && !self.meta.disabled
    }

    /// The bucketing of a custom distribution.
    pub fn bucketing(&self) -> Option<Bucketing> {
        match self.kind {
            MetricKind::CustomDistribution {
                range_min,
                range_max,
                bucket_count,
                histogram_type,
            } => Some(match histogram_type {
                HistogramType::Linear => Bucketing::Linear {
                    min: range_min,
                    max: range_max,
                    bucket_count,
                },
                HistogramType::Exponential => Bucketing::Exponential {
                    min: range_min,
                    max: range_max,
                    bucket_count,
                },
            }),
            _ => None,
        }
    }
}
