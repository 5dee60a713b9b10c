// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! PipeWire topology discovery from `pw-dump` output.
//!
//! A [`Topology`] is a snapshot of the dumped object list. All lookups are
//! pure scans over that snapshot so they can be tested against fixtures.

use super::types::{
    DuplexPorts, DuplexSide, EngineNodes, InstrumentPorts, ObjectType, PortDirection, PwNode,
    PwObject, PwPort, StereoPair, DUPLEX_PAIRS,
};
use regex::Regex;
use std::collections::HashSet;
use std::process::Command;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("Failed to execute pw-dump: {0}")]
    PwDumpFailed(String),
    #[error("Invalid JSON from pw-dump: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("Gave up after {0} attempts")]
    NotFound(u32),
}

/// Interface filter passed to `pw-dump -N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpFilter {
    All,
    Node,
    Client,
}

impl DumpFilter {
    fn arg(self) -> Option<&'static str> {
        match self {
            Self::All => None,
            Self::Node => Some("Node"),
            Self::Client => Some("Client"),
        }
    }
}

/// A snapshot of PipeWire objects.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    objects: Vec<PwObject>,
}

impl Topology {
    pub fn new(objects: Vec<PwObject>) -> Self {
        Self { objects }
    }

    /// Parse a `pw-dump` JSON array. Objects that do not deserialize are skipped.
    pub fn from_json(json: &str) -> Result<Self, TopologyError> {
        let raw: Vec<serde_json::Value> = serde_json::from_str(json)?;
        let objects = raw
            .into_iter()
            .filter_map(|v| serde_json::from_value::<PwObject>(v).ok())
            .collect();
        Ok(Self { objects })
    }

    /// Run `pw-dump` and parse its output.
    pub fn capture(filter: DumpFilter) -> Result<Self, TopologyError> {
        let mut cmd = Command::new("pw-dump");
        if let Some(arg) = filter.arg() {
            cmd.arg("-N").arg(arg);
        }
        let output = cmd
            .output()
            .map_err(|e| TopologyError::PwDumpFailed(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TopologyError::PwDumpFailed(stderr.to_string()));
        }

        let topology = Self::from_json(&String::from_utf8_lossy(&output.stdout))?;
        trace!("pw-dump returned {} objects", topology.objects.len());
        Ok(topology)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn of_kind(&self, kind: ObjectType) -> impl Iterator<Item = &PwObject> {
        self.objects.iter().filter(move |o| o.kind() == kind)
    }

    pub fn nodes(&self) -> impl Iterator<Item = PwNode> + '_ {
        self.of_kind(ObjectType::Node).map(PwNode::from_object)
    }

    pub fn ports(&self) -> impl Iterator<Item = PwPort> + '_ {
        self.of_kind(ObjectType::Port).map(PwPort::from_object)
    }

    /// Nodes owned by clients of the process `pid`.
    pub fn instrument_nodes(&self, pid: u32) -> Vec<PwNode> {
        let clients: HashSet<u32> = self
            .of_kind(ObjectType::Client)
            .filter(|c| c.prop_u32("application.process.id") == Some(pid))
            .map(|c| c.id)
            .collect();

        self.nodes()
            .filter(|n| n.client_id.map(|c| clients.contains(&c)).unwrap_or(false))
            .collect()
    }

    /// Ports on `nodes`, split into inputs and outputs by port name.
    pub fn instrument_ports(&self, nodes: &[PwNode]) -> InstrumentPorts {
        let ids: HashSet<u32> = nodes.iter().map(|n| n.id).collect();
        let mut ports = InstrumentPorts::default();

        for obj in self.of_kind(ObjectType::Port) {
            let has_direction = obj
                .info
                .as_ref()
                .map(|i| i.direction.is_some())
                .unwrap_or(false);
            if !has_direction {
                continue;
            }
            let port = PwPort::from_object(obj);
            if !ids.contains(&port.node_id) {
                continue;
            }
            if port.name.contains("output") {
                ports.output.push(port);
            } else if port.name.contains("input") {
                ports.input.push(port);
            }
        }

        ports
    }

    /// The first node whose description matches `description`.
    pub fn duplex_node(&self, description: &str) -> Option<PwNode> {
        self.nodes().find(|n| n.description == description)
    }

    /// Decode the `playback_N` / `capture_N` ports of a duplex node.
    pub fn duplex_ports(&self, node_id: u32) -> DuplexPorts {
        let mut duplex = DuplexPorts::default();
        for port in self.ports().filter(|p| p.node_id == node_id) {
            let Some((side, pair, left)) = decode_duplex_port_name(&port.name) else {
                continue;
            };
            let slot = &mut duplex.side_mut(side)[pair];
            if left {
                slot.left = Some(port.id);
            } else {
                slot.right = Some(port.id);
            }
        }
        duplex
    }

    /// Input and output nodes registered by the process `pid`.
    ///
    /// Nodes are ordered by input port count, most first. A process with one
    /// node uses it for both sides.
    pub fn engine_nodes(&self, pid: u32) -> Option<EngineNodes> {
        let mut nodes: Vec<PwNode> = self
            .nodes()
            .filter(|n| n.process_id == Some(pid))
            .collect();
        nodes.sort_by(|a, b| b.n_input_ports.cmp(&a.n_input_ports));

        let input = nodes.first()?.clone();
        let output = nodes.last()?.clone();
        Some(EngineNodes { input, output })
    }

    /// Id of the client created by the process `pid`.
    pub fn client_for_process(&self, pid: u32) -> Option<u32> {
        self.of_kind(ObjectType::Client)
            .find(|c| c.prop_u32("pipewire.sec.pid") == Some(pid))
            .map(|c| c.id)
    }
}

/// `object.serial` of the node whose port config has `direction`.
pub fn node_serial(nodes: &[PwNode], direction: PortDirection) -> Option<u64> {
    nodes
        .iter()
        .find(|n| n.port_config_direction == Some(direction))
        .and_then(|n| n.object_serial)
}

/// Left/right port ids by `audio.channel`.
pub fn stereo_ports(ports: &[PwPort]) -> StereoPair {
    StereoPair::from_ports(ports)
}

fn duplex_port_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^(playback|capture)_(\d+)$").ok())
        .as_ref()
}

/// Decode `playback_N` / `capture_N` into `(side, pair, is_left)`.
///
/// Channels are numbered from 1; odd channels are left.
pub fn decode_duplex_port_name(name: &str) -> Option<(DuplexSide, usize, bool)> {
    let caps = duplex_port_pattern()?.captures(name)?;
    let side = match &caps[1] {
        "playback" => DuplexSide::Input,
        _ => DuplexSide::Output,
    };
    let channel: usize = caps[2].parse().ok()?;
    if channel == 0 || channel > DUPLEX_PAIRS * 2 {
        return None;
    }
    Some((side, (channel - 1) / 2, channel % 2 == 1))
}

/// Retry `probe` up to `attempts` times, sleeping `interval` in between.
pub fn poll_blocking<T>(
    attempts: u32,
    interval: Duration,
    mut probe: impl FnMut() -> Option<T>,
) -> Result<T, TopologyError> {
    for attempt in 0..attempts {
        if attempt > 0 {
            std::thread::sleep(interval);
        }
        if let Some(found) = probe() {
            debug!("Found after {} attempt(s)", attempt + 1);
            return Ok(found);
        }
        trace!("Attempt {} came up empty", attempt + 1);
    }
    Err(TopologyError::NotFound(attempts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client(id: u32, pid: u32) -> serde_json::Value {
        json!({
            "id": id,
            "type": "PipeWire:Interface:Client",
            "info": {"props": {
                "application.process.id": pid,
                "pipewire.sec.pid": pid.to_string()
            }}
        })
    }

    fn node(id: u32, props: serde_json::Value, inputs: u32, dir: Option<&str>) -> serde_json::Value {
        let params = match dir {
            Some(d) => json!({"PortConfig": [{"direction": d}]}),
            None => json!({}),
        };
        json!({
            "id": id,
            "type": "PipeWire:Interface:Node",
            "info": {"n-input-ports": inputs, "props": props, "params": params}
        })
    }

    fn port(id: u32, node: u32, name: &str, channel: &str) -> serde_json::Value {
        let direction = if name.contains("input") || name.starts_with("playback") {
            "input"
        } else {
            "output"
        };
        json!({
            "id": id,
            "type": "PipeWire:Interface:Port",
            "info": {
                "direction": direction,
                "props": {"node.id": node, "port.name": name, "audio.channel": channel}
            }
        })
    }

    fn fixture() -> Topology {
        let objects = json!([
            client(30, 4242),
            client(31, 9999),
            node(40, json!({"client.id": 30, "application.process.id": 4242,
                            "node.name": "surge-in", "object.serial": 500}), 2, Some("Input")),
            node(41, json!({"client.id": 30, "application.process.id": 4242,
                            "node.name": "surge-out", "object.serial": 501}), 0, Some("Output")),
            node(50, json!({"client.id": 31, "node.description": "Digitakt"}), 16, None),
            port(60, 40, "input_FL", "FL"),
            port(61, 40, "input_FR", "FR"),
            port(62, 41, "output_FL", "FL"),
            port(63, 41, "output_FR", "FR"),
            port(70, 50, "playback_1", "AUX0"),
            port(71, 50, "playback_2", "AUX1"),
            port(72, 50, "capture_3", "AUX2"),
            port(73, 50, "capture_4", "AUX3"),
            port(74, 50, "monitor_1", "AUX4"),
            {"id": 80, "type": "PipeWire:Interface:Link", "info": {"props": {}}},
            {"id": 1, "type": "PipeWire:Interface:Core", "info": null}
        ]);
        Topology::from_json(&objects.to_string()).unwrap()
    }

    #[test]
    fn test_instrument_nodes_by_process() {
        let topo = fixture();
        let nodes = topo.instrument_nodes(4242);
        assert_eq!(nodes.iter().map(|n| n.id).collect::<Vec<_>>(), vec![40, 41]);
        assert!(topo.instrument_nodes(1).is_empty());
    }

    #[test]
    fn test_instrument_ports_split_by_name() {
        let topo = fixture();
        let nodes = topo.instrument_nodes(4242);
        let ports = topo.instrument_ports(&nodes);
        assert_eq!(ports.input.len(), 2);
        assert_eq!(ports.output.len(), 2);
        assert_eq!(ports.stereo_input(), StereoPair::new(60, 61));
        assert_eq!(ports.stereo_output(), StereoPair::new(62, 63));
    }

    #[test]
    fn test_duplex_node_and_ports() {
        let topo = fixture();
        let node = topo.duplex_node("Digitakt").unwrap();
        assert_eq!(node.id, 50);
        let duplex = topo.duplex_ports(node.id);
        assert_eq!(duplex.inputs[0], StereoPair::new(70, 71));
        assert_eq!(duplex.outputs[1], StereoPair::new(72, 73));
        assert!(duplex.outputs[0].is_empty());
        assert!(topo.duplex_node("Missing").is_none());
    }

    #[test]
    fn test_decode_duplex_port_names() {
        assert_eq!(
            decode_duplex_port_name("playback_1"),
            Some((DuplexSide::Input, 0, true))
        );
        assert_eq!(
            decode_duplex_port_name("capture_16"),
            Some((DuplexSide::Output, 7, false))
        );
        assert_eq!(decode_duplex_port_name("capture_17"), None);
        assert_eq!(decode_duplex_port_name("playback_0"), None);
        assert_eq!(decode_duplex_port_name("monitor_1"), None);
        assert_eq!(decode_duplex_port_name("playback_FL"), None);
    }

    #[test]
    fn test_engine_nodes_sorted_by_inputs() {
        let topo = fixture();
        let nodes = topo.engine_nodes(4242).unwrap();
        assert_eq!(nodes.input.id, 40);
        assert_eq!(nodes.output.id, 41);
        assert!(topo.engine_nodes(7).is_none());
    }

    #[test]
    fn test_single_engine_node_is_both_sides() {
        let objects = json!([node(9, json!({"application.process.id": 5}), 0, None)]);
        let topo = Topology::from_json(&objects.to_string()).unwrap();
        let nodes = topo.engine_nodes(5).unwrap();
        assert_eq!(nodes.input.id, nodes.output.id);
    }

    #[test]
    fn test_client_lookup_and_serials() {
        let topo = fixture();
        assert_eq!(topo.client_for_process(9999), Some(31));
        assert_eq!(topo.client_for_process(1), None);

        let nodes = topo.instrument_nodes(4242);
        assert_eq!(node_serial(&nodes, PortDirection::Input), Some(500));
        assert_eq!(node_serial(&nodes, PortDirection::Output), Some(501));
        assert_eq!(node_serial(&[], PortDirection::Output), None);
    }

    #[test]
    fn test_stereo_ports_ignore_other_channels() {
        let topo = fixture();
        let ports: Vec<PwPort> = topo.ports().filter(|p| p.node_id == 50).collect();
        assert!(stereo_ports(&ports).is_empty());
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            Topology::from_json("not json"),
            Err(TopologyError::InvalidJson(_))
        ));
        assert!(Topology::from_json("[]").unwrap().is_empty());
    }

    #[test]
    fn test_poll_blocking_gives_up() {
        let mut calls = 0;
        let result: Result<(), _> = poll_blocking(3, Duration::from_millis(1), || {
            calls += 1;
            None
        });
        assert!(matches!(result, Err(TopologyError::NotFound(3))));
        assert_eq!(calls, 3);

        let mut n = 0;
        let found = poll_blocking(5, Duration::from_millis(1), || {
            n += 1;
            (n == 2).then_some(n)
        })
        .unwrap();
        assert_eq!(found, 2);
    }

    #[test]
    #[ignore = "requires a running PipeWire"]
    fn test_capture_live_graph() {
        let topo = Topology::capture(DumpFilter::All).unwrap();
        assert!(!topo.is_empty());
    }
}
