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

//! Hands out pending documents one at a time and applies upload outcomes.
//!
//! States of a document: assembled, queued (persisted and visible here),
//! in flight (handed to the host), deleted. A document is persisted before it
//! becomes visible, and deleted only after a terminal outcome, so delivery is
//! at-least-once across crashes.

use crate::upload::directory::{PendingPing, PendingPingsDirectory};
use crate::upload::policy::UploadPolicy;
use crate::upload::request::build_request;
use sonde_core::telemetry::{MetricsError, MetricsResult};
use sonde_core::upload::{ResponseDisposition, UploadResult, UploadTask};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct SchedulerState {
    queue: VecDeque<PendingPing>,
    in_flight: Option<PendingPing>,
    wait_after_failure: bool,
}

/// The upload scheduler. Performs no network I/O.
#[derive(Debug)]
pub struct UploadScheduler {
    directory: PendingPingsDirectory,
    policy: UploadPolicy,
    agent: String,
    state: Mutex<SchedulerState>,
}

impl UploadScheduler {
    /// Opens the scheduler over `<data_path>/pending_pings`, queueing every
    /// document persisted by an earlier run.
    pub fn new(data_path: &Path, policy: UploadPolicy, agent: String) -> Self {
        let directory = PendingPingsDirectory::new(data_path);
        let queue: VecDeque<_> = directory.scan(&policy).into();
        if !queue.is_empty() {
            log::info!("Rehydrated {} pending pings", queue.len());
        }
        Self {
            directory,
            policy,
            agent,
            state: Mutex::new(SchedulerState {
                queue,
                ..Default::default()
            }),
        }
    }

    fn state(&self) -> MetricsResult<MutexGuard<'_, SchedulerState>> {
        self.state
            .lock()
            .map_err(|_| MetricsError::StorageError("upload scheduler lock poisoned".to_string()))
    }

    /// Persists a document and queues it.
    pub fn enqueue(&self, ping: PendingPing) -> MetricsResult<()> {
        let mut state = self.state()?;
        self.directory.store(&ping)?;
        log::debug!("Queued ping {}", ping.document_id);
        state.queue.push_back(ping);
        Ok(())
    }

    /// The next thing the host should do.
    ///
    /// Only one document is in flight at a time. After a non-terminal
    /// outcome the next call answers [`UploadTask::Wait`] once. `Done` is
    /// only returned after a rescan of the directory found nothing.
    pub fn get_next_task(&self) -> UploadTask {
        let Ok(mut state) = self.state() else {
            return UploadTask::Wait;
        };
        if state.in_flight.is_some() {
            return UploadTask::Wait;
        }
        if state.wait_after_failure {
            state.wait_after_failure = false;
            return UploadTask::Wait;
        }

        loop {
            let Some(ping) = state.queue.pop_front() else {
                let found = self.directory.scan(&self.policy);
                if found.is_empty() {
                    return UploadTask::Done;
                }
                state.queue.extend(found);
                continue;
            };

            if ping.body.len() as u64 > self.policy.max_ping_body_size {
                log::warn!(
                    "Discarding ping {}: body of {} bytes exceeds the limit",
                    ping.document_id,
                    ping.body.len()
                );
                self.directory.delete(&ping.document_id);
                continue;
            }

            let request = build_request(&ping, &self.agent);
            state.in_flight = Some(ping);
            return UploadTask::Upload(request);
        }
    }

    /// Applies the host's outcome for an in-flight document.
    pub fn process_upload_response(
        &self,
        document_id: &str,
        result: UploadResult,
    ) -> ResponseDisposition {
        let Ok(mut state) = self.state() else {
            return ResponseDisposition::Ignored;
        };
        if state.in_flight.as_ref().map(|p| p.document_id.as_str()) != Some(document_id) {
            log::warn!("Ignoring upload result {result:?} for unknown document {document_id}");
            return ResponseDisposition::Ignored;
        }
        let Some(ping) = state.in_flight.take() else {
            return ResponseDisposition::Ignored;
        };

        if result.is_terminal() {
            log::debug!("Ping {document_id} done with {result:?}");
            self.directory.delete(document_id);
            ResponseDisposition::Deleted
        } else {
            log::info!("Ping {document_id} will be retried after {result:?}");
            state.queue.push_back(ping);
            state.wait_after_failure = true;
            ResponseDisposition::Requeued
        }
    }

    /// Drops every queued document and deletes the files.
    pub fn clear(&self) -> MetricsResult<()> {
        let mut state = self.state()?;
        state.queue.clear();
        state.in_flight = None;
        state.wait_after_failure = false;
        self.directory.clear()?;
        Ok(())
    }

    /// Number of documents queued or in flight.
    pub fn pending_count(&self) -> usize {
        self.state()
            .map(|s| s.queue.len() + usize::from(s.in_flight.is_some()))
            .unwrap_or(0)
    }

    /// The pending-pings directory.
    pub fn directory(&self) -> &PendingPingsDirectory {
        &self.directory
    }
}
