// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Instrument definitions loaded from JSON.

use crate::controls::ControlDefinition;
use pushpin_osc::Message;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Which process backs an instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EngineKind {
    /// Surge XT command-line build, controlled over OSC.
    #[default]
    #[serde(rename = "surge-xt")]
    SurgeXt,
    /// A hardware device bridged into PipeWire by overwitch.
    #[serde(rename = "external")]
    External,
}

/// Kind of device page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeviceKind {
    #[default]
    #[serde(rename = "device")]
    Osc,
    #[serde(rename = "audio-in")]
    AudioIn,
}

/// A device page of an instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDefinition {
    #[serde(rename = "$type", default)]
    pub kind: DeviceKind,
    #[serde(default = "default_device_name")]
    pub name: String,
    /// Display half the device occupies (0 = left, 1 = right).
    #[serde(default)]
    pub slot: Option<u8>,
    /// Whether the device's controls may be mod-matrix destinations.
    #[serde(default)]
    pub modmatrix: bool,
    /// Messages sent when the device is selected.
    #[serde(default)]
    pub init: Vec<Message>,
    #[serde(default)]
    pub controls: Vec<ControlDefinition>,
}

fn default_device_name() -> String {
    "Device".to_string()
}

/// One clip-menu control: `[name, address, min, max]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipControlDefinition(pub String, pub String, pub f32, pub f32);

/// A named section of clip-menu controls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipSection {
    pub section: String,
    #[serde(default)]
    pub controls: Vec<ClipControlDefinition>,
    /// Per-control map from raw value (as string) to display label.
    #[serde(default)]
    pub control_value_label_maps: HashMap<String, HashMap<String, String>>,
}

/// A complete instrument definition file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentDefinition {
    /// Display name. Also the `node.description` of the instrument's duplex node.
    pub instrument_name: String,
    /// File stem used to look the definition up. Filled from the file name when absent.
    #[serde(default)]
    pub instrument_short_name: String,
    #[serde(default)]
    pub engine: EngineKind,
    /// Port the engine listens on.
    #[serde(default)]
    pub osc_in_port: Option<u16>,
    /// Port the engine reports values to.
    #[serde(default)]
    pub osc_out_port: Option<u16>,
    /// Volume applied to the engine's output node once it appears.
    #[serde(default)]
    pub volume: Option<f32>,
    #[serde(default)]
    pub devices: Vec<DeviceDefinition>,
    #[serde(default)]
    pub clip: Option<Vec<ClipSection>>,
}

impl InstrumentDefinition {
    pub fn new(name: &str, short_name: &str) -> Self {
        Self {
            instrument_name: name.to_string(),
            instrument_short_name: short_name.to_string(),
            engine: EngineKind::default(),
            osc_in_port: None,
            osc_out_port: None,
            volume: None,
            devices: Vec::new(),
            clip: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_definition() {
        let def: InstrumentDefinition = serde_json::from_str(
            r#"{
                "instrument_name": "Surge XT 1",
                "instrument_short_name": "surge1",
                "engine": "surge-xt",
                "osc_in_port": 1030,
                "osc_out_port": 1031,
                "volume": 0.8,
                "devices": [
                    {"name": "Osc 1", "slot": 0, "modmatrix": true,
                     "init": [{"address": "/param/a/osc/1/type", "value": 0}],
                     "controls": [{"$type": "control-range", "label": "Pitch", "address": "/p"}]},
                    {"$type": "audio-in", "name": "Audio In", "slot": 1}
                ],
                "clip": [
                    {"section": "Filter", "controls": [["Cutoff", "/cut", 0, 1]],
                     "control_value_label_maps": {"Cutoff": {"64": "mid"}}}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(def.engine, EngineKind::SurgeXt);
        assert_eq!(def.volume, Some(0.8));
        assert_eq!(def.devices.len(), 2);
        assert_eq!(def.devices[0].kind, DeviceKind::Osc);
        assert_eq!(def.devices[1].kind, DeviceKind::AudioIn);
        assert_eq!(def.devices[1].slot, Some(1));
        let clip = def.clip.unwrap();
        assert_eq!(clip[0].controls[0].1, "/cut");
        assert_eq!(clip[0].control_value_label_maps["Cutoff"]["64"], "mid");
    }

    #[test]
    fn test_minimal_external_definition() {
        let def: InstrumentDefinition = serde_json::from_str(
            r#"{"instrument_name": "Digitakt", "engine": "external"}"#,
        )
        .unwrap();
        assert_eq!(def.engine, EngineKind::External);
        assert!(def.devices.is_empty());
        assert!(def.clip.is_none());
        assert!(def.osc_in_port.is_none());
        assert!(def.volume.is_none());
    }
}
