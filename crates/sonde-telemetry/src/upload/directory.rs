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

//! On-disk queue of documents awaiting upload.
//!
//! Each document is one file `<data>/pending_pings/<document-id>` with three
//! lines: the upload path, the JSON body, and a JSON metadata object holding
//! extra headers. Files are written under `<data>/tmp/`, synced, then renamed
//! into place, so a file in `pending_pings/` is always complete.

use crate::storage::StorageError;
use crate::upload::policy::UploadPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use uuid::Uuid;

/// A persisted document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPing {
    /// The document id (also the file name).
    pub document_id: String,
    /// Upload path.
    pub path: String,
    /// JSON body.
    pub body: String,
    /// Extra headers recorded at submission.
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PingMetadata {
    #[serde(default)]
    headers: BTreeMap<String, String>,
}

/// The pending-pings directory.
#[derive(Debug, Clone)]
pub struct PendingPingsDirectory {
    dir: PathBuf,
    tmp_dir: PathBuf,
}

impl PendingPingsDirectory {
    /// The directory under `data_path`. Nothing is created yet.
    pub fn new(data_path: &Path) -> Self {
        Self {
            dir: data_path.join("pending_pings"),
            tmp_dir: data_path.join("tmp"),
        }
    }

    /// The directory holding pending documents.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn file_path(&self, document_id: &str) -> PathBuf {
        self.dir.join(document_id)
    }

    /// Durably writes a document.
    pub fn store(&self, ping: &PendingPing) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir)?;
        fs::create_dir_all(&self.tmp_dir)?;

        let metadata = serde_json::to_string(&PingMetadata {
            headers: ping.headers.clone(),
        })
        .map_err(|e| StorageError::Rejected(e.to_string()))?;

        let tmp_path = self.tmp_dir.join(&ping.document_id);
        {
            let mut file = File::create(&tmp_path)?;
            writeln!(file, "{}", ping.path)?;
            writeln!(file, "{}", ping.body)?;
            writeln!(file, "{metadata}")?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, self.file_path(&ping.document_id))?;
        Ok(())
    }

    /// Deletes a document. Returns whether a file was removed.
    pub fn delete(&self, document_id: &str) -> bool {
        match fs::remove_file(self.file_path(document_id)) {
            Ok(()) => true,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("Failed to delete pending ping {document_id}: {e}");
                }
                false
            }
        }
    }

    /// Deletes every pending document.
    pub fn clear(&self) -> Result<(), StorageError> {
        for path in [&self.dir, &self.tmp_dir] {
            match fs::remove_dir_all(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    /// Reads every valid document, oldest first, enforcing `policy`.
    ///
    /// Files whose name is not a UUID or whose content is malformed are
    /// deleted. When the count or total size exceeds the policy, the oldest
    /// documents are deleted until it fits.
    pub fn scan(&self, policy: &UploadPolicy) -> Vec<PendingPing> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("Failed to read {}: {e}", self.dir.display());
                }
                return Vec::new();
            }
        };

        let mut found: Vec<(SystemTime, u64, PendingPing)> = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if Uuid::parse_str(&name).is_err() {
                log::warn!("Deleting pending file with a non-UUID name: {name}");
                remove_quietly(&path);
                continue;
            }
            let Some(ping) = read_pending(&path, &name) else {
                log::warn!("Deleting malformed pending ping {name}");
                remove_quietly(&path);
                continue;
            };
            let meta = entry.metadata().ok();
            let modified = meta
                .as_ref()
                .and_then(|m| m.modified().ok())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            let size = meta.map(|m| m.len()).unwrap_or(0);
            found.push((modified, size, ping));
        }

        found.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.2.document_id.cmp(&b.2.document_id)));

        // Keep the newest documents that fit; evict the rest.
        let mut kept_count = 0;
        let mut kept_size = 0u64;
        let mut keep = vec![false; found.len()];
        for (i, (_, size, _)) in found.iter().enumerate().rev() {
            if kept_count < policy.max_pending_pings_count
                && kept_size + size <= policy.max_pending_pings_directory_size
            {
                kept_count += 1;
                kept_size += size;
                keep[i] = true;
            }
        }

        found
            .into_iter()
            .zip(keep)
            .filter_map(|((_, _, ping), keep)| {
                if !keep {
                    log::info!("Evicting pending ping {} over quota", ping.document_id);
                    remove_quietly(&self.file_path(&ping.document_id));
                    return None;
                }
                Some(ping)
            })
            .collect()
    }
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        log::warn!("Failed to delete {}: {e}", path.display());
    }
}

fn read_pending(path: &Path, document_id: &str) -> Option<PendingPing> {
    let content = fs::read_to_string(path).ok()?;
    let mut lines = content.lines();
    let upload_path = lines.next().filter(|l| !l.is_empty())?;
    let body = lines.next()?;
    serde_json::from_str::<serde_json::Value>(body).ok()?;
    let metadata = match lines.next() {
        Some(line) if !line.is_empty() => serde_json::from_str::<PingMetadata>(line).ok()?,
        _ => PingMetadata::default(),
    };
    Some(PendingPing {
        document_id: document_id.to_string(),
        path: upload_path.to_string(),
        body: body.to_string(),
        headers: metadata.headers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;
    use tempfile::tempdir;

    fn pending(body: &str) -> PendingPing {
        let id = Uuid::new_v4().to_string();
        PendingPing {
            path: format!("/submit/app/store1/1/{id}"),
            document_id: id,
            body: body.to_string(),
            headers: BTreeMap::from([("X-Debug-ID".to_string(), "tag".to_string())]),
        }
    }

    #[test]
    fn test_store_and_scan() {
        let dir = tempdir().unwrap();
        let pending_dir = PendingPingsDirectory::new(dir.path());
        let ping = pending(r#"{"a":1}"#);
        pending_dir.store(&ping).unwrap();

        let found = pending_dir.scan(&UploadPolicy::default());
        assert_eq!(found, vec![ping.clone()]);

        assert!(pending_dir.delete(&ping.document_id));
        assert!(!pending_dir.delete(&ping.document_id));
        assert!(pending_dir.scan(&UploadPolicy::default()).is_empty());
    }

    #[test]
    fn test_scan_deletes_invalid_files() {
        let dir = tempdir().unwrap();
        let pending_dir = PendingPingsDirectory::new(dir.path());
        fs::create_dir_all(pending_dir.path()).unwrap();

        fs::write(pending_dir.path().join("not-a-uuid"), "x\n{}\n").unwrap();
        let bad_id = Uuid::new_v4().to_string();
        fs::write(pending_dir.path().join(&bad_id), "/path\nnot json\n").unwrap();

        assert!(pending_dir.scan(&UploadPolicy::default()).is_empty());
        assert!(!pending_dir.path().join("not-a-uuid").exists());
        assert!(!pending_dir.path().join(bad_id).exists());
    }

    #[test]
    fn test_scan_orders_oldest_first_and_evicts_over_count() {
        let dir = tempdir().unwrap();
        let pending_dir = PendingPingsDirectory::new(dir.path());
        let mut stored = Vec::new();
        for i in 0..3 {
            let ping = pending(&format!("{{\"n\":{i}}}"));
            pending_dir.store(&ping).unwrap();
            stored.push(ping);
            thread::sleep(Duration::from_millis(20));
        }

        let all = pending_dir.scan(&UploadPolicy::default());
        assert_eq!(all, stored);

        let policy = UploadPolicy {
            max_pending_pings_count: 2,
            ..Default::default()
        };
        let kept = pending_dir.scan(&policy);
        assert_eq!(kept, stored[1..].to_vec());
        assert!(!pending_dir.path().join(&stored[0].document_id).exists());
    }

    #[test]
    fn test_clear_removes_everything() {
        let dir = tempdir().unwrap();
        let pending_dir = PendingPingsDirectory::new(dir.path());
        pending_dir.store(&pending("{}")).unwrap();
        pending_dir.clear().unwrap();
        assert!(pending_dir.scan(&UploadPolicy::default()).is_empty());
        assert!(pending_dir.path().exists());
    }
}
