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

//! Metric definitions, handles and the typed recording operations.

pub mod descriptor;
pub mod handle;
pub mod labeled;
pub mod recording;
pub mod registry;

pub use self::descriptor::{HistogramType, LabeledKind, MetricDescriptor, MetricKind};
pub use self::handle::{MetricHandle, PingHandle};
pub use self::registry::MetricRegistry;
