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

//! # Sonde Telemetry
//!
//! The telemetry engine: durable metric storage with lifetimes, typed
//! recording through handles, ping assembly, and a pull-based upload
//! scheduler over a directory of pending documents.
//!
//! ```no_run
//! use sonde_core::telemetry::{CommonMetricData, Lifetime};
//! use sonde_telemetry::{Configuration, MetricDescriptor, MetricKind, PingType, TelemetryService};
//!
//! # fn main() -> Result<(), sonde_core::telemetry::MetricsError> {
//! let service = TelemetryService::new(Configuration::new("/tmp/sonde", "org.example.app"))?;
//! let clicks = service.register_metric(MetricDescriptor::new(
//!     CommonMetricData::new("ui", "clicks", &["store1"], Lifetime::Ping),
//!     MetricKind::Counter,
//! ))?;
//! service.register_ping(PingType::new("store1", true, false))?;
//! service.counter_add(clicks, 1)?;
//! service.submit_ping_by_name("store1", None)?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod client_info;
pub mod config;
pub mod error_recording;
pub mod experiments;
pub mod logging;
pub mod metrics;
pub mod ping;
pub mod service;
pub mod storage;
pub mod upload;
pub mod utils;

pub use config::Configuration;
pub use error_recording::ErrorType;
pub use metrics::{
    HistogramType, LabeledKind, MetricDescriptor, MetricHandle, MetricKind, PingHandle,
};
pub use ping::PingType;
pub use service::TelemetryService;
pub use storage::{InMemoryBackend, MetricStore, RedbBackend, StorageBackend};
pub use upload::{UploadPolicy, UploadScheduler};
pub use utils::timer::ScopedTimer;
