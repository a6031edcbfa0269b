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

//! Client information: platform facts and the persisted client id.

use crate::config::Configuration;
use crate::storage::MetricStore;
use sonde_core::telemetry::{
    ClientInfo, ClientInfoProvider, CommonMetricData, DatetimeValue, Lifetime, MetricValue,
    MetricsResult, TimeUnit,
};
use sysinfo::System;
use uuid::Uuid;

/// Internal storage holding the client id and first-run date.
pub const CLIENT_INFO_STORAGE: &str = "sonde_client_info";

/// Version of this SDK, reported as `telemetry_sdk_build`.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Platform facts read through `sysinfo`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemInfoProvider;

impl ClientInfoProvider for SystemInfoProvider {
    fn os(&self) -> String {
        System::name().unwrap_or_else(|| std::env::consts::OS.to_string())
    }

    fn os_version(&self) -> String {
        System::os_version().unwrap_or_else(|| "unknown".to_string())
    }

    fn architecture(&self) -> String {
        std::env::consts::ARCH.to_string()
    }
}

fn client_id_meta() -> CommonMetricData {
    CommonMetricData::new("", "client_id", &[CLIENT_INFO_STORAGE], Lifetime::User)
}

fn first_run_date_meta() -> CommonMetricData {
    CommonMetricData::new("", "first_run_date", &[CLIENT_INFO_STORAGE], Lifetime::User)
}

/// Returns the persisted client id, generating one if missing.
pub fn ensure_client_id(store: &MetricStore) -> MetricsResult<String> {
    let meta = client_id_meta();
    if let Some(MetricValue::Uuid(id)) =
        store.read(Lifetime::User, CLIENT_INFO_STORAGE, &meta.identifier())
    {
        return Ok(id);
    }
    let id = Uuid::new_v4().to_string();
    store.record(&meta, &MetricValue::Uuid(id.clone()))?;
    log::info!("Generated a new client id");
    Ok(id)
}

/// Records today as the first-run date unless one is already stored.
pub fn ensure_first_run_date(store: &MetricStore) -> MetricsResult<()> {
    let today = DatetimeValue::now().truncate(TimeUnit::Day);
    store.record_with(&first_run_date_meta(), |old| match old {
        Some(MetricValue::Datetime(..)) => None,
        _ => Some(MetricValue::Datetime(today, TimeUnit::Day)),
    })
}

/// Assembles the `client_info` section from storage, configuration and platform.
pub fn collect_client_info(
    store: &MetricStore,
    config: &Configuration,
    provider: &dyn ClientInfoProvider,
) -> ClientInfo {
    let client_id = store
        .read(Lifetime::User, CLIENT_INFO_STORAGE, &client_id_meta().identifier())
        .and_then(|v| v.as_str().map(str::to_string));
    let first_run_date = match store.read(
        Lifetime::User,
        CLIENT_INFO_STORAGE,
        &first_run_date_meta().identifier(),
    ) {
        Some(MetricValue::Datetime(dt, unit)) => Some(dt.to_iso_string(unit)),
        _ => None,
    };

    ClientInfo {
        telemetry_sdk_build: SDK_VERSION.to_string(),
        client_id,
        first_run_date,
        os: provider.os(),
        os_version: provider.os_version(),
        architecture: provider.architecture(),
        app_build: config.app_build.clone(),
        app_display_version: config.app_display_version.clone(),
        app_channel: config.channel.clone(),
    }
}
