/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

use std::time::Duration;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

/// Configuration for a Switchboard kernel.
///
/// Loaded from `config.toml` in the XDG config directory for `switchboard`.
/// Every section falls back to its defaults when missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchboardConfig {
    /// Correlation deadlines
    pub timeouts: TimeoutConfig,
    /// Routing limits
    pub limits: LimitsConfig,
}

/// Default deadlines used when a caller does not pass one explicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Deadline for bidirectional replies, in milliseconds
    pub bidirectional_timeout_ms: u64,
    /// Deadline for each message chain hop, in milliseconds
    pub chain_timeout_ms: u64,
    /// Deadline for protocol replies, in milliseconds
    pub protocol_timeout_ms: u64,
}

/// Routing limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Upper bound on channel attempts made by a single send
    pub max_channel_attempts: usize,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            bidirectional_timeout_ms: 5_000,
            chain_timeout_ms: 5_000,
            protocol_timeout_ms: 5_000,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_channel_attempts: 64,
        }
    }
}

impl SwitchboardConfig {
    /// Default bidirectional deadline as a `Duration`.
    pub const fn bidirectional_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.bidirectional_timeout_ms)
    }

    /// Default chain hop deadline as a `Duration`.
    pub const fn chain_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.chain_timeout_ms)
    }

    /// Default protocol deadline as a `Duration`.
    pub const fn protocol_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.protocol_timeout_ms)
    }

    /// Parses a configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Load configuration from XDG-compliant locations.
    ///
    /// Looks for `switchboard/config.toml` under the XDG config directories.
    /// A missing file yields the defaults; an unreadable or malformed file is
    /// logged and also yields the defaults.
    pub fn load() -> Self {
        use tracing::{error, info};

        let xdg_dirs = match xdg::BaseDirectories::with_prefix("switchboard") {
            Ok(dirs) => dirs,
            Err(e) => {
                error!("Failed to initialize XDG directories: {}", e);
                return Self::default();
            }
        };

        let Some(path) = xdg_dirs.find_config_file("config.toml") else {
            info!("No configuration file found, using defaults");
            return Self::default();
        };

        info!("Loading configuration from: {}", path.display());
        match std::fs::read_to_string(&path) {
            Ok(text) => match Self::from_toml(&text) {
                Ok(config) => {
                    info!("Successfully loaded configuration");
                    config
                }
                Err(e) => {
                    error!("Failed to parse configuration file {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                error!("Failed to read configuration file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }
}

lazy_static! {
    /// Global configuration loaded once from XDG-compliant locations.
    pub static ref CONFIG: SwitchboardConfig = SwitchboardConfig::load();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_files_keep_defaults() {
        let config = SwitchboardConfig::from_toml(
            r#"
            [timeouts]
            chain_timeout_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(config.chain_timeout(), Duration::from_millis(250));
        assert_eq!(config.bidirectional_timeout(), Duration::from_millis(5_000));
        assert_eq!(config.limits.max_channel_attempts, 64);
    }

    #[test]
    fn malformed_files_are_rejected() {
        assert!(SwitchboardConfig::from_toml("timeouts = 3").is_err());
    }
}
