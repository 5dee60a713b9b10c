// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Application configuration (engines, PipeWire behaviour, surface bridge).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Settings shared by every synth engine process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sample_rate: u32,
    pub buffer_size: u32,
    /// MIDI input index handed to engines. Engines refuse to start without it.
    pub midi_device_idx: Option<u32>,
    /// Time given to an engine process to register with PipeWire.
    pub boot_delay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            buffer_size: 512,
            midi_device_idx: Some(0),
            boot_delay_ms: 2000,
        }
    }
}

impl EngineConfig {
    pub fn boot_delay(&self) -> Duration {
        Duration::from_millis(self.boot_delay_ms)
    }
}

/// How a routing column connects a source instrument to a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingStrategy {
    /// One pw-loopback process per column.
    #[default]
    Loopback,
    /// Direct pw-link port pairs per column.
    Links,
}

/// PipeWire discovery behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipeWireConfig {
    pub retry_count: u32,
    pub retry_interval_ms: u64,
    /// Topology refresh period. Zero disables periodic refresh.
    pub refresh_interval_secs: u64,
    #[serde(default)]
    pub routing: RoutingStrategy,
}

impl Default for PipeWireConfig {
    fn default() -> Self {
        Self {
            retry_count: 10,
            retry_interval_ms: 250,
            refresh_interval_secs: 5,
            routing: RoutingStrategy::default(),
        }
    }
}

impl PipeWireConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.refresh_interval_secs > 0).then(|| Duration::from_secs(self.refresh_interval_secs))
    }
}

/// Control-surface bridge settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    /// UDP port on which surface events arrive as OSC.
    pub osc_port: u16,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self { osc_port: 9100 }
    }
}

/// Instrument definition lookup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstrumentsConfig {
    /// Folder holding `<short_name>.json` definitions. Defaults to
    /// `<config dir>/instruments`.
    pub definition_folder: Option<PathBuf>,
    /// Short names to load. Empty loads every definition in the folder.
    #[serde(default)]
    pub enabled: Vec<String>,
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub pipewire: PipeWireConfig,
    #[serde(default)]
    pub surface: SurfaceConfig,
    #[serde(default)]
    pub instruments: InstrumentsConfig,
}

impl AppConfig {
    /// Load config from TOML string.
    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
