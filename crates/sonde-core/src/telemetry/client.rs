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

//! Client information reported in every ping.

use serde_json::{Map, Value as JsonValue};

/// A source of platform facts, supplied by the embedding host or the engine.
pub trait ClientInfoProvider: Send + Sync {
    /// Operating system name.
    fn os(&self) -> String;
    /// Operating system version.
    fn os_version(&self) -> String;
    /// CPU architecture.
    fn architecture(&self) -> String;
}

/// The `client_info` section of a ping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    /// Version of the telemetry SDK producing the ping.
    pub telemetry_sdk_build: String,
    /// Persistent per-profile client id.
    pub client_id: Option<String>,
    /// The day this profile first ran.
    pub first_run_date: Option<String>,
    /// Operating system name.
    pub os: String,
    /// Operating system version.
    pub os_version: String,
    /// CPU architecture.
    pub architecture: String,
    /// Application build identifier.
    pub app_build: String,
    /// User-visible application version.
    pub app_display_version: String,
    /// Release channel, if any.
    pub app_channel: Option<String>,
}

impl ClientInfo {
    /// Payload form. The client id is only included when requested.
    pub fn as_json(&self, include_client_id: bool) -> JsonValue {
        let mut map = Map::new();
        let mut put = |key: &str, value: &str| {
            map.insert(key.to_string(), JsonValue::String(value.to_string()));
        };
        put("telemetry_sdk_build", &self.telemetry_sdk_build);
        put("os", &self.os);
        put("os_version", &self.os_version);
        put("architecture", &self.architecture);
        put("app_build", &self.app_build);
        put("app_display_version", &self.app_display_version);
        if let Some(channel) = &self.app_channel {
            put("app_channel", channel);
        }
        if let Some(date) = &self.first_run_date {
            put("first_run_date", date);
        }
        if include_client_id {
            if let Some(id) = &self.client_id {
                put("client_id", id);
            }
        }
        JsonValue::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id_is_opt_in() {
        let info = ClientInfo {
            telemetry_sdk_build: "0.1.0".into(),
            client_id: Some("c0ffee00-0000-4000-8000-000000000000".into()),
            os: "Linux".into(),
            ..Default::default()
        };
        assert!(info.as_json(false).get("client_id").is_none());
        assert_eq!(
            info.as_json(true)["client_id"],
            "c0ffee00-0000-4000-8000-000000000000"
        );
        assert!(info.as_json(true).get("app_channel").is_none());
    }
}
