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

//! The upload protocol between the engine and the host's transport.
//!
//! The engine never performs network I/O. It hands out [`UploadTask`]s and
//! the host reports back an [`UploadResult`] for each uploaded document.

use std::collections::BTreeMap;

/// What the host should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadTask {
    /// Nothing can be handed out right now; ask again later.
    Wait,
    /// Upload this document and report the outcome.
    Upload(PingRequest),
    /// The queue is drained.
    Done,
}

/// A document ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingRequest {
    /// Identifier of the document, echoed back in the upload result.
    pub document_id: String,
    /// Upload path, relative to the host's server endpoint.
    pub path: String,
    /// The serialized JSON body.
    pub body: Vec<u8>,
    /// HTTP headers to send along.
    pub headers: BTreeMap<String, String>,
}

impl PingRequest {
    /// The body as UTF-8 text.
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

/// The outcome of one upload attempt, as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadResult {
    /// The server answered with this HTTP status.
    HttpStatus(u16),
    /// The request never completed but may succeed later (e.g. no network).
    RecoverableFailure,
    /// The request can never succeed (e.g. malformed URL).
    UnrecoverableFailure,
}

/// What happened to a document after its upload result was processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseDisposition {
    /// The document was delivered or rejected for good and has been deleted.
    Deleted,
    /// The document goes back into the queue.
    Requeued,
    /// The document id was unknown or not in flight.
    Ignored,
}

impl UploadResult {
    /// Classifies the result: terminal results delete the document.
    pub fn is_terminal(&self) -> bool {
        match *self {
            UploadResult::HttpStatus(status) => {
                (200..300).contains(&status) || ((400..500).contains(&status) && status != 429)
            }
            UploadResult::UnrecoverableFailure => true,
            UploadResult::RecoverableFailure => false,
        }
    }
}
