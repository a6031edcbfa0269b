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

//! Contracts for recording metrics and describing their values.

pub mod client;
pub mod event;
pub mod experiment;
pub mod histogram;
pub mod metrics;
pub mod time;

pub use self::client::{ClientInfo, ClientInfoProvider};
pub use self::event::RecordedEvent;
pub use self::experiment::RecordedExperiment;
pub use self::histogram::{Bucketing, Histogram};
pub use self::metrics::{
    CommonMetricData, Lifetime, MetricId, MetricType, MetricValue, MetricsError, MetricsResult,
};
pub use self::time::{DatetimeValue, TimeUnit};
