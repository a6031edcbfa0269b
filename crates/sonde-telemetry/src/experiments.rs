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

//! Experiment annotations.
//!
//! An active experiment is stored as an APPLICATION-lifetime value under
//! `<id>#experiment` in the internal storage, and every ping reports the
//! active set in `ping_info.experiments`. Annotations do not survive a
//! restart; the host sets them again on each run.

use crate::metrics::recording::truncate;
use crate::ping::INTERNAL_STORAGE;
use crate::service::TelemetryService;
use crate::storage::MetricStore;
use serde_json::{Map, Value as JsonValue};
use sonde_core::telemetry::{
    CommonMetricData, Lifetime, MetricValue, MetricsResult, RecordedExperiment,
};
use std::collections::BTreeMap;

/// Maximum length, in characters, of experiment and branch ids.
pub const MAX_EXPERIMENT_ID_LENGTH: usize = 30;

const EXPERIMENT_SUFFIX: &str = "#experiment";

fn experiment_meta(experiment_id: &str) -> CommonMetricData {
    let (id, truncated) = truncate(experiment_id, MAX_EXPERIMENT_ID_LENGTH);
    if truncated {
        log::warn!(
            "Experiment id '{experiment_id}' exceeds {MAX_EXPERIMENT_ID_LENGTH} characters; truncated"
        );
    }
    CommonMetricData::new(
        "",
        format!("{id}{EXPERIMENT_SUFFIX}"),
        &[INTERNAL_STORAGE],
        Lifetime::Application,
    )
}

/// The active experiments as `{ "<id>": { "branch": ..., "extra": ... } }`.
///
/// Reads only the APPLICATION lifetime.
pub(crate) fn snapshot_experiments(store: &MetricStore) -> MetricsResult<Map<String, JsonValue>> {
    let entries = store.entries(Lifetime::Application, INTERNAL_STORAGE)?;
    Ok(entries
        .iter()
        .filter_map(|(identifier, value)| {
            let id = identifier.strip_suffix(EXPERIMENT_SUFFIX)?;
            match value {
                MetricValue::Experiment(experiment) => Some((id.to_string(), experiment.as_json())),
                _ => None,
            }
        })
        .collect())
}

impl TelemetryService {
    /// Marks an experiment as active on `branch`.
    ///
    /// Ids and branches are truncated to [`MAX_EXPERIMENT_ID_LENGTH`]
    /// characters. Ignored while upload is disabled.
    pub fn set_experiment_active(
        &self,
        experiment_id: &str,
        branch: &str,
        extra: Option<BTreeMap<String, String>>,
    ) -> MetricsResult<()> {
        let gate = self.upload_gate()?;
        if !*gate {
            return Ok(());
        }
        let meta = experiment_meta(experiment_id);
        let (branch, truncated) = truncate(branch, MAX_EXPERIMENT_ID_LENGTH);
        if truncated {
            log::warn!("Branch of experiment '{experiment_id}' truncated to '{branch}'");
        }
        self.store.record(
            &meta,
            &MetricValue::Experiment(RecordedExperiment { branch, extra }),
        )
    }

    /// Removes an experiment annotation.
    pub fn set_experiment_inactive(&self, experiment_id: &str) -> MetricsResult<()> {
        let gate = self.upload_gate()?;
        if !*gate {
            return Ok(());
        }
        let meta = experiment_meta(experiment_id);
        self.store
            .remove(Lifetime::Application, INTERNAL_STORAGE, &meta.identifier())
    }

    /// The stored annotation of an experiment, if it is active.
    pub fn test_get_experiment_data(&self, experiment_id: &str) -> Option<RecordedExperiment> {
        let meta = experiment_meta(experiment_id);
        match self
            .store
            .read(Lifetime::Application, INTERNAL_STORAGE, &meta.identifier())
        {
            Some(MetricValue::Experiment(experiment)) => Some(experiment),
            _ => None,
        }
    }

    /// Whether an experiment is active.
    pub fn test_is_experiment_active(&self, experiment_id: &str) -> bool {
        self.test_get_experiment_data(experiment_id).is_some()
    }
}
