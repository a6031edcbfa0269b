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

//! Experiment annotations carried in every ping's `ping_info`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::collections::BTreeMap;

/// The active branch of one experiment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedExperiment {
    /// The branch the client is enrolled in.
    pub branch: String,
    /// Optional host-defined context.
    pub extra: Option<BTreeMap<String, String>>,
}

impl RecordedExperiment {
    /// Payload form: `{"branch": ..., "extra": {...}}`, `extra` omitted when empty.
    pub fn as_json(&self) -> JsonValue {
        let mut experiment = json!({ "branch": self.branch });
        if let Some(extra) = self.extra.as_ref().filter(|e| !e.is_empty()) {
            experiment["extra"] = json!(extra);
        }
        experiment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_extra_is_omitted() {
        let bare = RecordedExperiment {
            branch: "treatment".to_string(),
            extra: Some(BTreeMap::new()),
        };
        assert_eq!(bare.as_json(), json!({ "branch": "treatment" }));

        let rich = RecordedExperiment {
            branch: "control".to_string(),
            extra: Some(BTreeMap::from([("cohort".to_string(), "a".to_string())])),
        };
        assert_eq!(
            rich.as_json(),
            json!({ "branch": "control", "extra": { "cohort": "a" } })
        );
    }
}
