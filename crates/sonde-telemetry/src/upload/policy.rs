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

//! Limits applied to pending ping documents.

use serde::{Deserialize, Serialize};

/// Limits on the pending-ping queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadPolicy {
    /// Bodies larger than this are discarded instead of uploaded.
    pub max_ping_body_size: u64,
    /// At most this many documents are kept on disk; the oldest go first.
    pub max_pending_pings_count: usize,
    /// At most this many bytes are kept on disk; the oldest go first.
    pub max_pending_pings_directory_size: u64,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_ping_body_size: 1024 * 1024,
            max_pending_pings_count: 250,
            max_pending_pings_directory_size: 10 * 1024 * 1024,
        }
    }
}
