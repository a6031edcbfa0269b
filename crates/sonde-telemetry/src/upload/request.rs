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

//! Construction of [`PingRequest`]s handed to the host.

use crate::upload::directory::PendingPing;
use chrono::Utc;
use sonde_core::upload::PingRequest;

/// Version of the document schema, part of every upload path.
pub const SCHEMA_VERSION: u32 = 1;

/// Upload path of a document: `/submit/<app-id>/<ping>/<schema>/<document-id>`.
pub fn upload_path(sanitized_app_id: &str, ping_name: &str, document_id: &str) -> String {
    format!("/submit/{sanitized_app_id}/{ping_name}/{SCHEMA_VERSION}/{document_id}")
}

/// The `X-Telemetry-Agent` header value.
pub fn telemetry_agent(language_binding_name: &str) -> String {
    format!(
        "Sonde/{} ({language_binding_name} on {})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS
    )
}

/// Builds the request for a pending document, stamping the hand-out time.
pub fn build_request(ping: &PendingPing, agent: &str) -> PingRequest {
    let body = ping.body.clone().into_bytes();
    let mut headers = ping.headers.clone();
    headers.insert(
        "Content-Type".to_string(),
        "application/json; charset=utf-8".to_string(),
    );
    headers.insert("Content-Length".to_string(), body.len().to_string());
    headers.insert(
        "Date".to_string(),
        Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
    );
    headers.insert("X-Telemetry-Agent".to_string(), agent.to_string());

    PingRequest {
        document_id: ping.document_id.clone(),
        path: ping.path.clone(),
        body,
        headers,
    }
}
