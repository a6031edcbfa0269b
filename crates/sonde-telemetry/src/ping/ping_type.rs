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

//! Ping type definitions.

/// A named document type metrics are sent in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingType {
    /// Name of the ping; metrics list it in `send_in_pings`.
    pub name: String,
    /// Whether `client_info.client_id` is included.
    pub include_client_id: bool,
    /// Whether a document is produced even when nothing was recorded.
    pub send_if_empty: bool,
    /// Accepted submission reasons.
    pub reason_codes: Vec<String>,
}

impl PingType {
    /// Creates a ping type without reason codes.
    pub fn new(name: impl Into<String>, include_client_id: bool, send_if_empty: bool) -> Self {
        Self {
            name: name.into(),
            include_client_id,
            send_if_empty,
            reason_codes: Vec::new(),
        }
    }

    /// Adds the accepted submission reasons.
    pub fn with_reason_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reason_codes = codes.into_iter().map(Into::into).collect();
        self
    }

    /// Whether `reason` is one of this ping's reason codes.
    pub fn accepts_reason(&self, reason: &str) -> bool {
        self.reason_codes.iter().any(|r| r == reason)
    }
}
