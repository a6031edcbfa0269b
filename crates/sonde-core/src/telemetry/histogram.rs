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

//! Sparse bucketed histograms backing the distribution metrics.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};
use std::collections::BTreeMap;

/// How samples are mapped to buckets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Bucketing {
    /// Buckets grow exponentially with `buckets_per_magnitude` buckets per
    /// power of `log_base`. Unbounded; used for timing distributions.
    Functional {
        /// The base of the exponential growth.
        log_base: f64,
        /// Number of buckets between two powers of `log_base`.
        buckets_per_magnitude: f64,
    },
    /// `bucket_count` equal-width buckets between `min` and `max`, plus an
    /// underflow bucket at 0.
    Linear {
        /// Smallest non-underflow bucket.
        min: u64,
        /// Start of the overflow bucket.
        max: u64,
        /// Total number of buckets.
        bucket_count: usize,
    },
    /// `bucket_count` exponentially-spaced buckets between `min` and `max`.
    Exponential {
        /// Smallest non-underflow bucket.
        min: u64,
        /// Start of the overflow bucket.
        max: u64,
        /// Total number of buckets.
        bucket_count: usize,
    },
}

impl Bucketing {
    /// Functional bucketing for timing distributions: base 2, 8 buckets per magnitude.
    pub const TIMING: Bucketing = Bucketing::Functional {
        log_base: 2.0,
        buckets_per_magnitude: 8.0,
    };

    /// Returns the minimum of the bucket `sample` falls into.
    pub fn bucket_minimum(&self, sample: u64) -> u64 {
        match *self {
            Bucketing::Functional {
                log_base,
                buckets_per_magnitude,
            } => {
                if sample == 0 {
                    return 0;
                }
                let exponent = log_base.powf(1.0 / buckets_per_magnitude);
                let mut index = ((sample as f64).ln() / exponent.ln()).floor() as i32;
                // Guard against float drift pushing the minimum past the sample.
                while index > 0 && exponent.powi(index) as u64 > sample {
                    index -= 1;
                }
                exponent.powi(index) as u64
            }
            Bucketing::Linear {
                min,
                max,
                bucket_count,
            } => range_lookup(&linear_range(min, max, bucket_count), sample),
            Bucketing::Exponential {
                min,
                max,
                bucket_count,
            } => range_lookup(&exponential_range(min, max, bucket_count), sample),
        }
    }
}

/// Finds the bucket `i` such that `ranges[i] <= sample < ranges[i + 1]`.
fn range_lookup(ranges: &[u64], sample: u64) -> u64 {
    match ranges.binary_search(&sample) {
        Ok(i) => ranges[i],
        Err(0) => 0,
        Err(i) => ranges[i - 1],
    }
}

/// Bucket minimums for a linear histogram. The first bucket is the underflow bucket.
pub fn linear_range(min: u64, max: u64, bucket_count: usize) -> Vec<u64> {
    let min = min.max(1);
    if bucket_count < 3 {
        return vec![0, min];
    }
    let mut ranges = Vec::with_capacity(bucket_count);
    ranges.push(0);
    let steps = (bucket_count - 2) as u64;
    for i in 1..bucket_count {
        let k = (i - 1) as u64;
        let value = (min * (steps - k.min(steps)) + max * k.min(steps)) / steps;
        ranges.push(value);
    }
    ranges.dedup();
    ranges
}

/// Bucket minimums for an exponential histogram. The first bucket is the underflow bucket.
pub fn exponential_range(min: u64, max: u64, bucket_count: usize) -> Vec<u64> {
    let log_max = (max as f64).ln();

    let mut ranges = Vec::with_capacity(bucket_count);
    let mut current = min.max(1);

    ranges.push(0);
    ranges.push(current);

    for i in 2..bucket_count {
        let log_current = (current as f64).ln();
        let log_ratio = (log_max - log_current) / (bucket_count - i) as f64;
        let next_value = (log_current + log_ratio).exp().round() as u64;
        current = if next_value > current {
            next_value
        } else {
            current + 1
        };
        ranges.push(current);
    }

    ranges
}

/// A sparse histogram: only buckets that received samples are kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    bucketing: Bucketing,
    values: BTreeMap<u64, u64>,
    count: u64,
    sum: u64,
}

impl Histogram {
    /// Creates an empty histogram with the given bucketing.
    pub fn new(bucketing: Bucketing) -> Self {
        Self {
            bucketing,
            values: BTreeMap::new(),
            count: 0,
            sum: 0,
        }
    }

    /// Creates an empty histogram suited to nanosecond timings.
    pub fn timing() -> Self {
        Self::new(Bucketing::TIMING)
    }

    /// Adds a single sample.
    pub fn accumulate(&mut self, sample: u64) {
        let bucket = self.bucketing.bucket_minimum(sample);
        *self.values.entry(bucket).or_insert(0) += 1;
        self.sum = self.sum.saturating_add(sample);
        self.count += 1;
    }

    /// The bucketing scheme.
    pub fn bucketing(&self) -> Bucketing {
        self.bucketing
    }

    /// Total of all samples.
    pub fn sum(&self) -> u64 {
        self.sum
    }

    /// Number of samples.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Sample counts keyed by bucket minimum.
    pub fn values(&self) -> &BTreeMap<u64, u64> {
        &self.values
    }

    /// Whether any sample was recorded.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Payload shape: `{ "sum", "count", "values": { "<bucket>": n } }`.
    pub fn snapshot_json(&self) -> JsonValue {
        let values: Map<String, JsonValue> = self
            .values
            .iter()
            .map(|(bucket, n)| (bucket.to_string(), json!(n)))
            .collect();
        json!({
            "sum": self.sum,
            "count": self.count,
            "values": values,
        })
    }
}
