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

//! Engine configuration.

use crate::upload::policy::UploadPolicy;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration of a [`TelemetryService`](crate::service::TelemetryService).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Root of the engine's on-disk state (`db/`, `pending_pings/`).
    pub data_path: PathBuf,
    /// The application's id, used in upload paths.
    pub application_id: String,
    /// Whether recording and uploading are enabled at startup.
    pub upload_enabled: bool,
    /// Name of the host language binding, reported in the user agent.
    pub language_binding_name: String,
    /// Application build identifier.
    pub app_build: String,
    /// User-visible application version.
    pub app_display_version: String,
    /// Release channel.
    pub channel: Option<String>,
    /// Tag routing pings to a debug view; sent as `X-Debug-ID`.
    pub debug_view_tag: Option<String>,
    /// Log every assembled ping payload.
    pub log_pings: bool,
    /// Pending-ping limits.
    pub upload_policy: UploadPolicy,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("sonde_data"),
            application_id: "unknown".to_string(),
            upload_enabled: true,
            language_binding_name: "Rust".to_string(),
            app_build: "unknown".to_string(),
            app_display_version: "unknown".to_string(),
            channel: None,
            debug_view_tag: None,
            log_pings: false,
            upload_policy: UploadPolicy::default(),
        }
    }
}

impl Configuration {
    /// A default configuration rooted at `data_path`.
    pub fn new(data_path: impl Into<PathBuf>, application_id: impl Into<String>) -> Self {
        Self {
            data_path: data_path.into(),
            application_id: application_id.into(),
            ..Default::default()
        }
    }

    /// Load configuration from JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading configuration from {}", path.display()))?;
        Self::from_json(&content)
            .with_context(|| format!("parsing configuration from {}", path.display()))
    }

    /// Save configuration to JSON file
    pub fn to_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)
            .with_context(|| format!("writing configuration to {}", path.as_ref().display()))?;
        Ok(())
    }

    /// The application id as it appears in upload paths.
    pub fn sanitized_application_id(&self) -> String {
        sanitize_application_id(&self.application_id)
    }
}

/// Lowercases `id` and replaces every run of characters outside `[a-z0-9]`
/// with a single `-`.
pub fn sanitize_application_id(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    let mut in_run = false;
    for c in id.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            in_run = false;
        } else if !in_run {
            out.push('-');
            in_run = true;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_sanitize_application_id() {
        assert_eq!(sanitize_application_id("org.example.App"), "org-example-app");
        assert_eq!(sanitize_application_id("my__app!!1"), "my-app-1");
        assert_eq!(sanitize_application_id("plain"), "plain");
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = Configuration::from_json(
            r#"{ "application_id": "demo", "upload_policy": { "max_pending_pings_count": 3 } }"#,
        )
        .unwrap();

        assert_eq!(config.application_id, "demo");
        assert!(config.upload_enabled);
        assert_eq!(config.upload_policy.max_pending_pings_count, 3);
        assert_eq!(config.upload_policy.max_ping_body_size, 1024 * 1024);
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sonde.json");

        let mut config = Configuration::new(dir.path().join("data"), "org.example.app");
        config.debug_view_tag = Some("tester".to_string());
        config.to_file(&path).unwrap();

        assert_eq!(Configuration::from_file(&path).unwrap(), config);
        assert!(Configuration::from_file(dir.path().join("missing.json")).is_err());
    }
}
