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

//! Turns a storage snapshot into a ping document.
//!
//! Document shape:
//!
//! ```json
//! {
//!   "ping_info": {
//!     "seq": 0, "start_time": "...", "end_time": "...", "reason": "...",
//!     "experiments": { "<id>": { "branch": "...", "extra": {} } }
//!   },
//!   "client_info": { ... },
//!   "metrics": { "<section>": { "<identifier>": <value> } },
//!   "events": [ { "timestamp": 0, "category": "...", "name": "...", "extra": {} } ]
//! }
//! ```
//!
//! `metrics`, `events` and `experiments` are omitted when empty. Labeled values are nested
//! one level deeper, by label.

use crate::experiments::snapshot_experiments;
use crate::ping::ping_type::PingType;
use crate::storage::engine::StorageSnapshot;
use crate::storage::MetricStore;
use serde_json::{json, Map, Value as JsonValue};
use sonde_core::telemetry::metrics::LABEL_SEPARATOR;
use sonde_core::telemetry::{
    ClientInfo, CommonMetricData, DatetimeValue, Lifetime, MetricValue, MetricsResult,
    RecordedEvent, TimeUnit,
};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Internal storage holding per-ping sequence numbers and start times.
pub const INTERNAL_STORAGE: &str = "sonde_internal_info";

/// A ping document ready to be persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledPing {
    /// Fresh identifier of this document.
    pub document_id: String,
    /// The ping's name.
    pub ping_name: String,
    /// Sequence number of the document.
    pub seq: i32,
    /// The JSON payload.
    pub payload: JsonValue,
}

fn sequence_meta(ping_name: &str) -> CommonMetricData {
    CommonMetricData::new("", format!("{ping_name}#sequence"), &[INTERNAL_STORAGE], Lifetime::User)
}

fn start_time_meta(ping_name: &str) -> CommonMetricData {
    CommonMetricData::new("", format!("{ping_name}#start"), &[INTERNAL_STORAGE], Lifetime::User)
}

/// Builds ping documents from the metric store.
#[derive(Debug)]
pub struct PingAssembler<'a> {
    store: &'a MetricStore,
    engine_start: DatetimeValue,
}

impl<'a> PingAssembler<'a> {
    /// An assembler over `store`. `engine_start` is the start time of a
    /// ping's first interval.
    pub fn new(store: &'a MetricStore, engine_start: DatetimeValue) -> Self {
        Self {
            store,
            engine_start,
        }
    }

    /// The next sequence number of a ping.
    pub fn sequence_number(&self, ping_name: &str) -> i32 {
        self.store
            .read(
                Lifetime::User,
                INTERNAL_STORAGE,
                &sequence_meta(ping_name).identifier(),
            )
            .and_then(|v| v.as_counter())
            .unwrap_or(0)
    }

    fn start_time(&self, ping_name: &str) -> DatetimeValue {
        match self.store.read(
            Lifetime::User,
            INTERNAL_STORAGE,
            &start_time_meta(ping_name).identifier(),
        ) {
            Some(MetricValue::Datetime(dt, _)) => dt,
            _ => self.engine_start,
        }
    }

    /// Assembles `ping` without clearing storage or advancing its sequence.
    pub fn collect(
        &self,
        ping: &PingType,
        reason: Option<&str>,
        client_info: &ClientInfo,
    ) -> MetricsResult<Option<AssembledPing>> {
        let snapshot = self.store.snapshot(&ping.name, false)?;
        Ok(self.build(&snapshot, ping, reason, client_info, DatetimeValue::now()))
    }

    /// Assembles `ping` and hands the document to `persist`.
    ///
    /// Only when `persist` succeeds are the ping's PING-lifetime values
    /// cleared and its sequence number and start time advanced. Returns
    /// `None` when the ping was empty and not `send_if_empty`.
    pub fn submit<T, F>(
        &self,
        ping: &PingType,
        reason: Option<&str>,
        client_info: &ClientInfo,
        persist: F,
    ) -> MetricsResult<Option<T>>
    where
        F: FnOnce(&AssembledPing) -> MetricsResult<T>,
    {
        self.store.snapshot_with(&ping.name, |snapshot| {
            let end = DatetimeValue::now();
            let Some(document) = self.build(snapshot, ping, reason, client_info, end) else {
                log::info!("Ping '{}' is empty; not sending", ping.name);
                return Ok(None);
            };
            let persisted = persist(&document)?;
            self.advance(&ping.name, end);
            Ok(Some(persisted))
        })
    }

    fn advance(&self, ping_name: &str, end: DatetimeValue) {
        let seq = self.store.record_with(&sequence_meta(ping_name), |old| match old {
            Some(MetricValue::Counter(v)) => Some(MetricValue::Counter(v.saturating_add(1))),
            _ => Some(MetricValue::Counter(1)),
        });
        let start = self.store.record(
            &start_time_meta(ping_name),
            &MetricValue::Datetime(end, TimeUnit::Nanosecond),
        );
        if let Err(e) = seq.and(start) {
            log::error!("Failed to advance the metadata of ping '{ping_name}': {e}");
        }
    }

    fn build(
        &self,
        snapshot: &StorageSnapshot,
        ping: &PingType,
        reason: Option<&str>,
        client_info: &ClientInfo,
        end: DatetimeValue,
    ) -> Option<AssembledPing> {
        if snapshot.is_empty() && !ping.send_if_empty {
            return None;
        }

        let seq = self.sequence_number(&ping.name);
        let mut ping_info = json!({
            "seq": seq,
            "start_time": self.start_time(&ping.name).to_iso_string(TimeUnit::Minute),
            "end_time": end.to_iso_string(TimeUnit::Minute),
        });
        if let Some(reason) = reason {
            if ping.accepts_reason(reason) {
                ping_info["reason"] = json!(reason);
            } else {
                log::warn!("Ping '{}' submitted with unknown reason '{reason}'", ping.name);
            }
        }
        match snapshot_experiments(self.store) {
            Ok(experiments) if !experiments.is_empty() => {
                ping_info["experiments"] = JsonValue::Object(experiments);
            }
            Ok(_) => {}
            Err(e) => log::error!("Failed to read experiment annotations: {e}"),
        }

        let mut payload = json!({
            "ping_info": ping_info,
            "client_info": client_info.as_json(ping.include_client_id),
        });
        let (metrics, events) = group_metrics(snapshot);
        if !metrics.is_empty() {
            payload["metrics"] = JsonValue::Object(metrics);
        }
        if !events.is_empty() {
            payload["events"] = JsonValue::Array(events);
        }

        Some(AssembledPing {
            document_id: Uuid::new_v4().to_string(),
            ping_name: ping.name.clone(),
            seq,
            payload,
        })
    }
}

/// Groups values by section and identifier, and merges all events into one
/// list sorted by timestamp, relative to the earliest.
fn group_metrics(snapshot: &StorageSnapshot) -> (Map<String, JsonValue>, Vec<JsonValue>) {
    let mut sections: BTreeMap<&'static str, Map<String, JsonValue>> = BTreeMap::new();
    let mut events: Vec<&RecordedEvent> = Vec::new();

    for (identifier, value) in &snapshot.entries {
        if let MetricValue::Events(recorded) = value {
            events.extend(recorded.iter());
            continue;
        }

        let metric_type = value.metric_type();
        match identifier.split_once(LABEL_SEPARATOR) {
            Some((base, label)) => {
                let Some(labeled) = metric_type.labeled() else {
                    log::warn!("Dropping labeled value '{identifier}' of unlabeled type");
                    continue;
                };
                let per_label = sections
                    .entry(labeled.section_name())
                    .or_default()
                    .entry(base.to_string())
                    .or_insert_with(|| JsonValue::Object(Map::new()));
                if let JsonValue::Object(per_label) = per_label {
                    per_label.insert(label.to_string(), value.as_json());
                }
            }
            None => {
                sections
                    .entry(metric_type.section_name())
                    .or_default()
                    .insert(identifier.clone(), value.as_json());
            }
        }
    }

    events.sort_by_key(|e| e.timestamp);
    let base = events.first().map(|e| e.timestamp).unwrap_or(0);
    let events = events.into_iter().map(|e| e.as_json(base)).collect();

    let sections = sections
        .into_iter()
        .map(|(name, values)| (name.to_string(), JsonValue::Object(values)))
        .collect();
    (sections, events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sonde_core::telemetry::MetricsError;

    fn meta(category: &str, name: &str, lifetime: Lifetime) -> CommonMetricData {
        CommonMetricData::new(category, name, &["store1"], lifetime)
    }

    fn event(timestamp: u64, name: &str) -> RecordedEvent {
        RecordedEvent {
            timestamp,
            category: "ui".to_string(),
            name: name.to_string(),
            extra: None,
        }
    }

    fn client_info() -> ClientInfo {
        ClientInfo {
            telemetry_sdk_build: "test".to_string(),
            client_id: Some("client".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_document_shape() {
        let store = MetricStore::in_memory();
        store
            .record(&meta("cat", "flag", Lifetime::Ping), &MetricValue::Boolean(true))
            .unwrap();
        store
            .record(&meta("cat", "hits/red", Lifetime::Ping), &MetricValue::Counter(2))
            .unwrap();
        store
            .record(
                &meta("ui", "clicks", Lifetime::Ping),
                &MetricValue::Events(vec![event(1_200, "b"), event(1_000, "a")]),
            )
            .unwrap();

        let assembler = PingAssembler::new(&store, DatetimeValue::now());
        let ping = PingType::new("store1", false, false).with_reason_codes(["test"]);
        let doc = assembler
            .collect(&ping, Some("test"), &client_info())
            .unwrap()
            .unwrap();

        let payload = &doc.payload;
        assert_eq!(payload["ping_info"]["seq"], 0);
        assert_eq!(payload["ping_info"]["reason"], "test");
        assert!(payload["client_info"].get("client_id").is_none());
        assert_eq!(payload["metrics"]["boolean"]["cat.flag"], true);
        assert_eq!(payload["metrics"]["labeled_counter"]["cat.hits"]["red"], 2);
        assert_eq!(payload["events"][0]["name"], "a");
        assert_eq!(payload["events"][0]["timestamp"], 0);
        assert_eq!(payload["events"][1]["timestamp"], 200);
    }

    #[test]
    fn test_empty_ping_policy() {
        let store = MetricStore::in_memory();
        let assembler = PingAssembler::new(&store, DatetimeValue::now());

        let quiet = PingType::new("store1", false, false);
        assert!(assembler.collect(&quiet, None, &client_info()).unwrap().is_none());

        let chatty = PingType::new("store1", true, true);
        let doc = assembler.collect(&chatty, None, &client_info()).unwrap().unwrap();
        assert!(doc.payload.get("metrics").is_none());
        assert_eq!(doc.payload["client_info"]["client_id"], "client");
    }

    #[test]
    fn test_submit_advances_sequence_and_clears_ping_lifetime() {
        let store = MetricStore::in_memory();
        let assembler = PingAssembler::new(&store, DatetimeValue::now());
        let ping = PingType::new("store1", false, false);
        let user = meta("cat", "user", Lifetime::User);

        store.record(&meta("cat", "ping", Lifetime::Ping), &MetricValue::Counter(1)).unwrap();
        store.record(&user, &MetricValue::Counter(5)).unwrap();

        let seq = assembler
            .submit(&ping, None, &client_info(), |doc| Ok(doc.seq))
            .unwrap();
        assert_eq!(seq, Some(0));
        assert_eq!(assembler.sequence_number("store1"), 1);

        let next = assembler.collect(&ping, None, &client_info()).unwrap().unwrap();
        let metrics = next.payload["metrics"]["counter"].as_object().unwrap();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics["cat.user"], 5);
        assert_eq!(next.payload["ping_info"]["seq"], 1);
    }

    #[test]
    fn test_failed_persist_keeps_everything() {
        let store = MetricStore::in_memory();
        let assembler = PingAssembler::new(&store, DatetimeValue::now());
        let ping = PingType::new("store1", false, false);
        store.record(&meta("cat", "ping", Lifetime::Ping), &MetricValue::Counter(1)).unwrap();

        let result: MetricsResult<Option<()>> = assembler.submit(&ping, None, &client_info(), |_| {
            Err(MetricsError::StorageError("disk full".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(assembler.sequence_number("store1"), 0);
        assert!(store.read(Lifetime::Ping, "store1", "cat.ping").is_some());
    }

    #[test]
    fn test_unknown_reason_is_dropped() {
        let store = MetricStore::in_memory();
        let assembler = PingAssembler::new(&store, DatetimeValue::now());
        let ping = PingType::new("store1", false, true);
        let doc = assembler
            .collect(&ping, Some("bogus"), &client_info())
            .unwrap()
            .unwrap();
        assert!(doc.payload["ping_info"].get("reason").is_none());
    }
}
