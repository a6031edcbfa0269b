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

//! Recorded events, the payload of event metrics.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::collections::BTreeMap;

/// A single event occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedEvent {
    /// Host-supplied timestamp, in milliseconds.
    pub timestamp: u64,
    /// The event metric's category.
    pub category: String,
    /// The event metric's name.
    pub name: String,
    /// Optional extra key/value data.
    pub extra: Option<BTreeMap<String, String>>,
}

impl RecordedEvent {
    /// Payload form, with the timestamp made relative to `base`.
    pub fn as_json(&self, base: u64) -> JsonValue {
        let mut event = json!({
            "timestamp": self.timestamp.saturating_sub(base),
            "category": self.category,
            "name": self.name,
        });
        if let Some(extra) = self.extra.as_ref().filter(|e| !e.is_empty()) {
            event["extra"] = json!(extra);
        }
        event
    }
}
