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

//! Label validation for labeled metrics.

use crate::error_recording::{record_error, ErrorType};
use crate::metrics::descriptor::{MetricDescriptor, MetricKind};
use crate::storage::MetricStore;
use sonde_core::telemetry::CommonMetricData;

/// The label values are folded into once a metric runs out of labels.
pub const OTHER_LABEL: &str = "__other__";

/// Maximum number of distinct dynamic labels per metric.
pub const MAX_LABELS: usize = 16;

/// Maximum length of a dynamic label.
pub const MAX_LABEL_LENGTH: usize = 71;

fn is_valid_label(label: &str) -> bool {
    !label.is_empty()
        && label.len() <= MAX_LABEL_LENGTH
        && label.bytes().all(|b| (0x20..=0x7E).contains(&b))
}

/// Resolves the label a recording actually lands on and returns the
/// metadata of that label's storage key.
///
/// With a static label list, unknown labels become [`OTHER_LABEL`]. With
/// dynamic labels, labels already seen are kept, new labels beyond
/// [`MAX_LABELS`] become [`OTHER_LABEL`], and invalid labels are reported as
/// `invalid_label` and become [`OTHER_LABEL`].
pub fn labeled_meta(
    store: &MetricStore,
    descriptor: &MetricDescriptor,
    label: &str,
) -> CommonMetricData {
    let meta = &descriptor.meta;
    let static_labels = match &descriptor.kind {
        MetricKind::Labeled { labels, .. } => labels.as_deref(),
        _ => None,
    };

    let resolved = match static_labels {
        Some(labels) => {
            if labels.iter().any(|l| l == label) {
                label
            } else {
                OTHER_LABEL
            }
        }
        None => dynamic_label(store, meta, label),
    };

    let mut labeled = meta.clone();
    labeled.name = format!(
        "{}{}{resolved}",
        meta.name,
        sonde_core::telemetry::metrics::LABEL_SEPARATOR
    );
    labeled
}

fn dynamic_label<'l>(store: &MetricStore, meta: &CommonMetricData, label: &'l str) -> &'l str {
    let Some(storage) = meta.send_in_pings.first() else {
        return OTHER_LABEL;
    };
    let identifier = meta.id();
    if store
        .read(meta.lifetime, storage, &identifier.labeled_identifier(label))
        .is_some()
    {
        return label;
    }
    if store.label_count(meta.lifetime, storage, &identifier.identifier()) >= MAX_LABELS {
        return OTHER_LABEL;
    }
    if !is_valid_label(label) {
        record_error(
            store,
            meta,
            ErrorType::InvalidLabel,
            format_args!("Invalid label '{label}'"),
            1,
        );
        return OTHER_LABEL;
    }
    label
}
