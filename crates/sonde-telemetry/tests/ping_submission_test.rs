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

use anyhow::Result;
use serde_json::Value as JsonValue;
use sonde_core::telemetry::{CommonMetricData, Lifetime, MetricValue};
use sonde_core::upload::{ResponseDisposition, UploadResult, UploadTask};
use sonde_telemetry::{
    Configuration, MetricDescriptor, MetricHandle, MetricKind, PingType, TelemetryService,
};
use std::collections::BTreeMap;
use tempfile::tempdir;

fn counter(service: &TelemetryService, name: &str, lifetime: Lifetime) -> Result<MetricHandle> {
    let meta = CommonMetricData::new("test", name, &["store1"], lifetime);
    Ok(service.register_metric(MetricDescriptor::new(meta, MetricKind::Counter))?)
}

fn next_upload(service: &TelemetryService) -> (String, JsonValue) {
    match service.get_upload_task() {
        UploadTask::Upload(request) => {
            let body: JsonValue =
                serde_json::from_slice(&request.body).expect("ping body should be JSON");
            (request.document_id, body)
        }
        other => panic!("expected an upload, got {other:?}"),
    }
}

#[test]
fn test_counter_reaches_the_store1_ping() -> Result<()> {
    // --- 1. ARRANGE ---
    let dir = tempdir()?;
    let service = TelemetryService::new(Configuration::new(dir.path(), "org.example.Test"))?;
    service.register_ping(PingType::new("store1", true, false))?;
    let clicks = counter(&service, "clicks", Lifetime::Ping)?;

    // --- 2. ACT ---
    service.counter_add(clicks, 1)?;
    service.counter_add(clicks, 1)?;
    assert!(service.submit_ping_by_name("store1", None)?);

    // --- 3. ASSERT ---
    assert_eq!(service.pending_ping_count(), 1);
    let (document_id, body) = next_upload(&service);
    assert_eq!(body["metrics"]["counter"]["test.clicks"], 2);
    assert_eq!(body["ping_info"]["seq"], 0);
    assert!(body["client_info"]["client_id"].is_string());
    assert!(!service.test_has_value(clicks, None)?);

    assert_eq!(
        service.process_upload_response(&document_id, UploadResult::HttpStatus(200)),
        ResponseDisposition::Deleted
    );
    assert_eq!(service.get_upload_task(), UploadTask::Done);
    Ok(())
}

#[test]
fn test_upload_request_carries_path_and_headers() -> Result<()> {
    let dir = tempdir()?;
    let mut config = Configuration::new(dir.path(), "org.example.Test");
    config.debug_view_tag = Some("my-tag".to_string());
    let service = TelemetryService::new(config)?;
    service.register_ping(PingType::new("store1", false, true))?;
    service.submit_ping_by_name("store1", None)?;

    match service.get_upload_task() {
        UploadTask::Upload(request) => {
            assert_eq!(
                request.path,
                format!("/submit/org-example-test/store1/1/{}", request.document_id)
            );
            assert_eq!(
                request.headers.get("Content-Type").map(String::as_str),
                Some("application/json; charset=utf-8")
            );
            assert_eq!(request.headers.get("X-Debug-ID").map(String::as_str), Some("my-tag"));
            assert!(request.headers.contains_key("X-Telemetry-Agent"));
        }
        other => panic!("expected an upload, got {other:?}"),
    }
    Ok(())
}

#[test]
fn test_sequence_numbers_advance_per_ping() -> Result<()> {
    let dir = tempdir()?;
    let service = TelemetryService::new(Configuration::new(dir.path(), "app"))?;
    service.register_ping(PingType::new("store1", false, true))?;

    for _ in 0..3 {
        service.submit_ping_by_name("store1", None)?;
    }

    let mut seqs = Vec::new();
    for _ in 0..3 {
        let (id, body) = next_upload(&service);
        seqs.push(body["ping_info"]["seq"].as_i64().unwrap_or(-1));
        service.process_upload_response(&id, UploadResult::HttpStatus(200));
    }
    assert_eq!(seqs, vec![0, 1, 2]);
    Ok(())
}

#[test]
fn test_empty_ping_is_not_sent() -> Result<()> {
    let dir = tempdir()?;
    let service = TelemetryService::new(Configuration::new(dir.path(), "app"))?;
    service.register_ping(PingType::new("store1", true, false))?;

    assert!(!service.submit_ping_by_name("store1", None)?);
    assert_eq!(service.pending_ping_count(), 0);
    assert_eq!(service.get_upload_task(), UploadTask::Done);
    Ok(())
}

#[test]
fn test_unknown_ping_is_an_error() -> Result<()> {
    let dir = tempdir()?;
    let service = TelemetryService::new(Configuration::new(dir.path(), "app"))?;
    assert!(service.submit_ping_by_name("nope", None).is_err());
    Ok(())
}

#[test]
fn test_lifetimes_survive_submission_differently() -> Result<()> {
    let dir = tempdir()?;
    let service = TelemetryService::new(Configuration::new(dir.path(), "app"))?;
    service.register_ping(PingType::new("store1", false, false))?;
    let per_ping = counter(&service, "per_ping", Lifetime::Ping)?;
    let per_app = counter(&service, "per_app", Lifetime::Application)?;
    let per_user = counter(&service, "per_user", Lifetime::User)?;

    for handle in [per_ping, per_app, per_user] {
        service.counter_add(handle, 4)?;
    }
    assert!(service.submit_ping_by_name("store1", None)?);

    assert!(!service.test_has_value(per_ping, None)?);
    assert_eq!(service.test_get_value(per_app, None)?, Some(MetricValue::Counter(4)));
    assert_eq!(service.test_get_value(per_user, None)?, Some(MetricValue::Counter(4)));

    service.clear_application_lifetime()?;
    assert!(!service.test_has_value(per_app, None)?);
    assert!(service.test_has_value(per_user, None)?);
    Ok(())
}

#[test]
fn test_metric_sent_in_two_pings() -> Result<()> {
    let dir = tempdir()?;
    let service = TelemetryService::new(Configuration::new(dir.path(), "app"))?;
    service.register_ping(PingType::new("store1", false, false))?;
    service.register_ping(PingType::new("store2", false, false))?;
    let meta = CommonMetricData::new("test", "shared", &["store1", "store2"], Lifetime::Ping);
    let shared = service.register_metric(MetricDescriptor::new(meta, MetricKind::Quantity))?;

    service.quantity_set(shared, 9)?;
    assert!(service.submit_ping_by_name("store1", None)?);

    assert!(!service.test_has_value(shared, Some("store1"))?);
    assert_eq!(
        service.test_get_value(shared, Some("store2"))?,
        Some(MetricValue::Quantity(9))
    );
    let collected = service
        .test_collect_ping("store2", None)?
        .expect("store2 has data");
    assert_eq!(collected["metrics"]["quantity"]["test.shared"], 9);
    Ok(())
}

#[test]
fn test_events_are_reported_in_order() -> Result<()> {
    let dir = tempdir()?;
    let service = TelemetryService::new(Configuration::new(dir.path(), "app"))?;
    service.register_ping(PingType::new("events", false, false))?;
    let meta = CommonMetricData::new("ui", "tap", &["events"], Lifetime::Ping);
    let tap = service.register_metric(MetricDescriptor::new(
        meta,
        MetricKind::Event {
            allowed_extra_keys: vec!["button".to_string()],
        },
    ))?;

    let mut extras = BTreeMap::new();
    extras.insert("button".to_string(), "ok".to_string());
    service.event_record(tap, 5_000, extras)?;
    service.event_record(tap, 4_000, BTreeMap::new())?;

    let payload = service
        .test_collect_ping("events", None)?
        .expect("events were recorded");
    let events = payload["events"].as_array().expect("events array");
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["timestamp"], 0);
    assert_eq!(events[1]["timestamp"], 1_000);
    assert_eq!(events[1]["extra"]["button"], "ok");
    Ok(())
}
