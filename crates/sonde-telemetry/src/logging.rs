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

//! Logging bootstrap for hosts that do not install their own `log` backend.

/// Installs `env_logger`, honoring `RUST_LOG`. Does nothing if a logger is
/// already installed.
pub fn init() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}

/// Installs `env_logger` with an explicit filter (e.g. `"sonde_telemetry=debug"`).
pub fn init_with_filter(filter: &str) {
    let _ = env_logger::Builder::new().parse_filters(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_with_filter("sonde_telemetry=trace");
        init();
        log::trace!("logger installed");
    }
}
