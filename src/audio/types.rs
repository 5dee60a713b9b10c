// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! PipeWire type definitions for dumped objects, nodes and ports.

use serde::Deserialize;
use serde_json::{Map, Value};

/// Number of stereo pairs on each side of a duplex device.
pub const DUPLEX_PAIRS: usize = 8;

/// Raw object from `pw-dump` output.
#[derive(Debug, Clone, Deserialize)]
pub struct PwObject {
    pub id: u32,
    #[serde(rename = "type")]
    pub object_type: String,
    #[serde(default)]
    pub info: Option<PwInfo>,
}

/// The `info` block of a dumped object. Only fields read here are kept.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PwInfo {
    #[serde(default)]
    pub props: Map<String, Value>,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(rename = "n-input-ports", default)]
    pub n_input_ports: Option<u32>,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl PwObject {
    pub fn kind(&self) -> ObjectType {
        ObjectType::from_str(&self.object_type)
    }

    pub fn prop(&self, key: &str) -> Option<&Value> {
        self.info.as_ref()?.props.get(key)
    }

    pub fn prop_str(&self, key: &str) -> Option<&str> {
        self.prop(key)?.as_str()
    }

    /// Read an integer property. PipeWire versions disagree on whether ids are
    /// numbers or strings, so both are accepted.
    pub fn prop_u64(&self, key: &str) -> Option<u64> {
        match self.prop(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn prop_u32(&self, key: &str) -> Option<u32> {
        self.prop_u64(key).and_then(|v| u32::try_from(v).ok())
    }

    /// Direction of the first `PortConfig` param, as set on DSP nodes.
    pub fn port_config_direction(&self) -> Option<PortDirection> {
        let dir = self
            .info
            .as_ref()?
            .params
            .get("PortConfig")?
            .as_array()?
            .first()?
            .get("direction")?
            .as_str()?;
        Some(PortDirection::from_str(dir))
    }
}

/// Interface type of a dumped object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Client,
    Node,
    Port,
    Link,
    Other,
}

impl ObjectType {
    pub fn from_str(s: &str) -> Self {
        match s {
            "PipeWire:Interface:Client" => Self::Client,
            "PipeWire:Interface:Node" => Self::Node,
            "PipeWire:Interface:Port" => Self::Port,
            "PipeWire:Interface:Link" => Self::Link,
            _ => Self::Other,
        }
    }
}

/// Represents a PipeWire node (engine, loopback or device).
#[derive(Debug, Clone, PartialEq)]
pub struct PwNode {
    pub id: u32,
    pub name: String,
    pub description: String,
    pub client_id: Option<u32>,
    pub process_id: Option<u32>,
    pub object_serial: Option<u64>,
    pub n_input_ports: u32,
    pub port_config_direction: Option<PortDirection>,
}

impl PwNode {
    pub fn from_object(obj: &PwObject) -> Self {
        let info = obj.info.as_ref();
        Self {
            id: obj.id,
            name: obj.prop_str("node.name").unwrap_or_default().to_string(),
            description: obj.prop_str("node.description").unwrap_or_default().to_string(),
            client_id: obj.prop_u32("client.id"),
            process_id: obj.prop_u32("application.process.id"),
            object_serial: obj.prop_u64("object.serial"),
            n_input_ports: info.and_then(|i| i.n_input_ports).unwrap_or(0),
            port_config_direction: obj.port_config_direction(),
        }
    }

    pub fn display_name(&self) -> &str {
        if !self.description.is_empty() {
            &self.description
        } else if !self.name.is_empty() {
            &self.name
        } else {
            "Unknown"
        }
    }
}

/// Represents a port on a PipeWire node.
#[derive(Debug, Clone, PartialEq)]
pub struct PwPort {
    pub id: u32,
    pub node_id: u32,
    pub name: String,
    pub direction: PortDirection,
    pub channel: AudioChannel,
}

impl PwPort {
    pub fn from_object(obj: &PwObject) -> Self {
        let direction = obj
            .info
            .as_ref()
            .and_then(|i| i.direction.as_deref())
            .map(PortDirection::from_str)
            .unwrap_or(PortDirection::Unknown);
        Self {
            id: obj.id,
            node_id: obj.prop_u32("node.id").unwrap_or(0),
            name: obj.prop_str("port.name").unwrap_or_default().to_string(),
            direction,
            channel: obj
                .prop_str("audio.channel")
                .map(AudioChannel::from_str)
                .unwrap_or(AudioChannel::Unknown),
        }
    }
}

/// Direction of a port or DSP node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortDirection {
    Input,
    Output,
    Unknown,
}

impl PortDirection {
    pub fn from_str(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "in" | "input" => Self::Input,
            "out" | "output" => Self::Output,
            _ => Self::Unknown,
        }
    }
}

/// Audio channel position of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioChannel {
    FrontLeft,
    FrontRight,
    Mono,
    Unknown,
}

impl AudioChannel {
    pub fn from_str(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "FL" => Self::FrontLeft,
            "FR" => Self::FrontRight,
            "MONO" => Self::Mono,
            _ => Self::Unknown,
        }
    }
}

/// Port ids of a left/right pair. Either side may be missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct StereoPair {
    pub left: Option<u32>,
    pub right: Option<u32>,
}

impl StereoPair {
    pub fn new(left: u32, right: u32) -> Self {
        Self {
            left: Some(left),
            right: Some(right),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }

    pub fn is_complete(&self) -> bool {
        self.left.is_some() && self.right.is_some()
    }

    /// Pick the FL/FR ports out of a port list.
    pub fn from_ports<'a>(ports: impl IntoIterator<Item = &'a PwPort>) -> Self {
        let mut pair = Self::default();
        for port in ports {
            match port.channel {
                AudioChannel::FrontLeft => pair.left = Some(port.id),
                AudioChannel::FrontRight => pair.right = Some(port.id),
                _ => {}
            }
        }
        pair
    }
}

/// Ports owned by an instrument's engine nodes, split by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstrumentPorts {
    pub input: Vec<PwPort>,
    pub output: Vec<PwPort>,
}

impl InstrumentPorts {
    pub fn stereo_input(&self) -> StereoPair {
        StereoPair::from_ports(&self.input)
    }

    pub fn stereo_output(&self) -> StereoPair {
        StereoPair::from_ports(&self.output)
    }
}

/// Side of a duplex device a port belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplexSide {
    /// `playback_N` ports: audio going into the device.
    Input,
    /// `capture_N` ports: audio coming out of the device.
    Output,
}

/// Decoded duplex ports: eight stereo inputs and eight stereo outputs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DuplexPorts {
    pub inputs: [StereoPair; DUPLEX_PAIRS],
    pub outputs: [StereoPair; DUPLEX_PAIRS],
}

impl DuplexPorts {
    pub fn side_mut(&mut self, side: DuplexSide) -> &mut [StereoPair; DUPLEX_PAIRS] {
        match side {
            DuplexSide::Input => &mut self.inputs,
            DuplexSide::Output => &mut self.outputs,
        }
    }
}

/// The input and output nodes a running engine registered.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineNodes {
    pub input: PwNode,
    pub output: PwNode,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_props_accept_numbers_and_strings() {
        let obj: PwObject = serde_json::from_value(json!({
            "id": 40,
            "type": "PipeWire:Interface:Port",
            "info": {
                "direction": "output",
                "props": {"node.id": "39", "port.name": "output_FL", "audio.channel": "FL"}
            }
        }))
        .unwrap();
        let port = PwPort::from_object(&obj);
        assert_eq!(port.node_id, 39);
        assert_eq!(port.direction, PortDirection::Output);
        assert_eq!(port.channel, AudioChannel::FrontLeft);
    }

    #[test]
    fn test_object_without_info() {
        let obj: PwObject = serde_json::from_value(json!({
            "id": 1, "type": "PipeWire:Interface:Core", "info": null
        }))
        .unwrap();
        assert_eq!(obj.kind(), ObjectType::Other);
        assert!(obj.prop("anything").is_none());
        assert!(obj.port_config_direction().is_none());
    }

    #[test]
    fn test_node_port_config_direction() {
        let obj: PwObject = serde_json::from_value(json!({
            "id": 55,
            "type": "PipeWire:Interface:Node",
            "info": {
                "n-input-ports": 2,
                "props": {"object.serial": 812, "client.id": 54, "node.name": "surge"},
                "params": {"PortConfig": [{"direction": "Output", "mode": "dsp"}]}
            }
        }))
        .unwrap();
        let node = PwNode::from_object(&obj);
        assert_eq!(node.port_config_direction, Some(PortDirection::Output));
        assert_eq!(node.object_serial, Some(812));
        assert_eq!(node.client_id, Some(54));
        assert_eq!(node.n_input_ports, 2);
        assert_eq!(node.display_name(), "surge");
    }

    #[test]
    fn test_stereo_pair_from_ports() {
        let ports = vec![
            PwPort {
                id: 7,
                node_id: 1,
                name: "input_FR".into(),
                direction: PortDirection::Input,
                channel: AudioChannel::FrontRight,
            },
            PwPort {
                id: 6,
                node_id: 1,
                name: "input_FL".into(),
                direction: PortDirection::Input,
                channel: AudioChannel::FrontLeft,
            },
        ];
        let pair = StereoPair::from_ports(&ports);
        assert_eq!(pair, StereoPair::new(6, 7));
        assert!(pair.is_complete());
        assert!(StereoPair::default().is_empty());
    }
}
