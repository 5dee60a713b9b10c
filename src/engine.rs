// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Synth engine processes and their place in the PipeWire graph.

use crate::audio::connections::{self, ConnectionTable, LinkAction};
use crate::audio::topology::{self, node_serial, poll_blocking, DumpFilter, Topology, TopologyError};
use crate::audio::types::{DuplexPorts, EngineNodes, InstrumentPorts, PortDirection, PwNode, StereoPair};
use crate::config::{EngineConfig, EngineKind, InstrumentDefinition, PipeWireConfig};
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("No MIDI input device configured for '{0}'")]
    MissingMidiDevice(String),
    #[error("Instrument '{instrument}' has no {port}")]
    MissingOscPort {
        instrument: String,
        port: &'static str,
    },
    #[error("Failed to spawn {program}: {source}")]
    SpawnFailed {
        program: String,
        source: std::io::Error,
    },
    #[error("Engine '{0}' is not running")]
    NotStarted(String),
    #[error("Engine '{0}' has no PipeWire nodes yet")]
    NotInstantiated(String),
    #[error("No PipeWire nodes for pid {pid}: {source}")]
    NodesNotFound { pid: u32, source: TopologyError },
}

/// A blocking search for an engine's nodes, run off the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeQuery {
    pub pid: u32,
    attempts: u32,
    interval: Duration,
}

impl NodeQuery {
    /// Poll `pw-dump -N Node` until the process has registered its nodes.
    pub fn run(self) -> Result<EngineNodes, EngineError> {
        poll_blocking(self.attempts, self.interval, || {
            Topology::capture(DumpFilter::Node).ok()?.engine_nodes(self.pid)
        })
        .map_err(|source| EngineError::NodesNotFound {
            pid: self.pid,
            source,
        })
    }
}

/// A running (or not yet started) synth process.
#[derive(Debug)]
pub struct Engine {
    kind: EngineKind,
    instrument_name: String,
    sample_rate: u32,
    buffer_size: u32,
    midi_device_idx: u32,
    osc_in_port: Option<u16>,
    osc_out_port: Option<u16>,
    boot_delay: Duration,
    retry_count: u32,
    retry_interval: Duration,
    process: Option<Child>,
    nodes: Option<EngineNodes>,
    instrument_nodes: Vec<PwNode>,
    ports: InstrumentPorts,
    duplex_node: Option<PwNode>,
    duplex_ports: DuplexPorts,
    connections: ConnectionTable,
}

impl Engine {
    pub fn new(
        definition: &InstrumentDefinition,
        engine: &EngineConfig,
        pipewire: &PipeWireConfig,
    ) -> Result<Self, EngineError> {
        let midi_device_idx = engine
            .midi_device_idx
            .ok_or_else(|| EngineError::MissingMidiDevice(definition.instrument_name.clone()))?;

        Ok(Self {
            kind: definition.engine,
            instrument_name: definition.instrument_name.clone(),
            sample_rate: engine.sample_rate,
            buffer_size: engine.buffer_size,
            midi_device_idx,
            osc_in_port: definition.osc_in_port,
            osc_out_port: definition.osc_out_port,
            boot_delay: engine.boot_delay(),
            retry_count: pipewire.retry_count,
            retry_interval: pipewire.retry_interval(),
            process: None,
            nodes: None,
            instrument_nodes: Vec::new(),
            ports: InstrumentPorts::default(),
            duplex_node: None,
            duplex_ports: DuplexPorts::default(),
            connections: ConnectionTable::default(),
        })
    }

    fn missing_port(&self, port: &'static str) -> EngineError {
        EngineError::MissingOscPort {
            instrument: self.instrument_name.clone(),
            port,
        }
    }

    /// Program and arguments used to launch the engine.
    pub fn command_line(&self) -> Result<(String, Vec<String>), EngineError> {
        match self.kind {
            EngineKind::SurgeXt => {
                let osc_in = self.osc_in_port.ok_or_else(|| self.missing_port("osc_in_port"))?;
                let osc_out = self
                    .osc_out_port
                    .ok_or_else(|| self.missing_port("osc_out_port"))?;
                Ok((
                    "surge-xt-cli".to_string(),
                    vec![
                        "--audio-interface=0.0".to_string(),
                        "--audio-input-interface=0.0".to_string(),
                        format!("--midi-input={}", self.midi_device_idx),
                        format!("--sample-rate={}", self.sample_rate),
                        format!("--buffer-size={}", self.buffer_size),
                        format!("--osc-in-port={}", osc_in),
                        format!("--osc-out-port={}", osc_out),
                    ],
                ))
            }
            EngineKind::External => Ok((
                "pw-jack".to_string(),
                vec!["overwitch-cli".to_string(), "-n".to_string(), "0".to_string()],
            )),
        }
    }

    /// Spawn the engine and give it time to boot.
    pub async fn start(&mut self) -> Result<(), EngineError> {
        let (program, args) = self.command_line()?;
        info!("Starting engine for '{}': {} {}", self.instrument_name, program, args.join(" "));

        let child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| EngineError::SpawnFailed {
                program: program.clone(),
                source,
            })?;
        debug!("{} spawned with PID: {}", program, child.id());
        self.process = Some(child);

        tokio::time::sleep(self.boot_delay).await;
        Ok(())
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(Child::id)
    }

    #[cfg(test)]
    pub fn attach_process(&mut self, child: Child) {
        self.process = Some(child);
    }

    /// Forget the process if it has exited. Returns true when it had.
    pub fn reap_exited(&mut self) -> bool {
        let Some(child) = self.process.as_mut() else {
            return false;
        };
        let status = match child.try_wait() {
            Ok(Some(status)) => status,
            Ok(None) => return false,
            Err(e) => {
                debug!("Could not poll engine '{}': {}", self.instrument_name, e);
                return false;
            }
        };
        warn!(
            "Engine '{}' (pid {}) exited: {}",
            self.instrument_name,
            child.id(),
            status
        );
        self.process = None;
        self.forget_pipewire();
        true
    }

    fn forget_pipewire(&mut self) {
        self.nodes = None;
        self.instrument_nodes.clear();
        self.ports = InstrumentPorts::default();
        self.connections = ConnectionTable::default();
    }

    /// Node lookup for the running process.
    pub fn node_query(&self) -> Result<NodeQuery, EngineError> {
        let pid = self
            .pid()
            .ok_or_else(|| EngineError::NotStarted(self.instrument_name.clone()))?;
        Ok(NodeQuery {
            pid,
            attempts: self.retry_count,
            interval: self.retry_interval,
        })
    }

    /// Record the nodes a [`NodeQuery`] found for `pid`.
    ///
    /// Returns false and keeps nothing when `pid` is no longer the engine's process.
    pub fn update_config(&mut self, pid: u32, nodes: EngineNodes) -> bool {
        if self.pid() != Some(pid) {
            debug!(
                "Dropping nodes of old pid {} for '{}'",
                pid, self.instrument_name
            );
            return false;
        }
        info!(
            "Engine '{}' nodes: input {} ({}), output {} ({})",
            self.instrument_name,
            nodes.input.id,
            nodes.input.display_name(),
            nodes.output.id,
            nodes.output.display_name()
        );
        self.nodes = Some(nodes);
        true
    }

    /// Refresh instrument nodes, ports and duplex device from a topology snapshot.
    pub fn configure_pipewire(&mut self, topology: &Topology) {
        match self.pid() {
            Some(pid) => self.configure_from(pid, topology),
            None => debug!("Engine '{}' not started, skipping PipeWire setup", self.instrument_name),
        }
    }

    fn configure_from(&mut self, pid: u32, topology: &Topology) {
        self.instrument_nodes = topology.instrument_nodes(pid);
        self.ports = topology.instrument_ports(&self.instrument_nodes);
        self.duplex_node = topology.duplex_node(&self.instrument_name);
        self.duplex_ports = self
            .duplex_node
            .as_ref()
            .map(|n| topology.duplex_ports(n.id))
            .unwrap_or_default();

        let complete = |pairs: &[StereoPair]| pairs.iter().filter(|p| p.is_complete()).count();
        debug!(
            "Engine '{}': {} nodes, {} input / {} output ports, duplex {:?} ({} / {} pairs)",
            self.instrument_name,
            self.instrument_nodes.len(),
            self.ports.input.len(),
            self.ports.output.len(),
            self.duplex_node.as_ref().map(|n| n.id),
            complete(&self.duplex_ports.inputs),
            complete(&self.duplex_ports.outputs)
        );
    }

    /// Stop the engine process.
    pub fn stop(&mut self) {
        if let Some(mut child) = self.process.take() {
            info!("Stopping engine '{}' (pid {})", self.instrument_name, child.id());
            if let Err(e) = child.kill() {
                debug!("Process kill returned error (may be already dead): {}", e);
            }
            let _ = child.wait();
        }
        self.forget_pipewire();
    }

    pub fn nodes(&self) -> Option<&EngineNodes> {
        self.nodes.as_ref()
    }

    /// PipeWire id of the output node, used for volume.
    pub fn pipewire_id(&self) -> Result<u32, EngineError> {
        self.nodes
            .as_ref()
            .map(|n| n.output.id)
            .ok_or_else(|| EngineError::NotInstantiated(self.instrument_name.clone()))
    }

    /// Serial of the node audio should be sent into.
    pub fn input_serial(&self) -> Option<u64> {
        node_serial(&self.instrument_nodes, PortDirection::Input)
    }

    /// Serial of the node audio comes out of.
    pub fn output_serial(&self) -> Option<u64> {
        node_serial(&self.instrument_nodes, PortDirection::Output)
    }

    pub fn stereo_input(&self) -> StereoPair {
        topology::stereo_ports(&self.ports.input)
    }

    pub fn stereo_output(&self) -> StereoPair {
        topology::stereo_ports(&self.ports.output)
    }

    #[cfg(test)]
    pub fn connections(&self) -> &ConnectionTable {
        &self.connections
    }

    /// Plan linking `source` into this engine's input on `column`.
    pub fn plan_route(&mut self, column: usize, source: StereoPair) -> Vec<LinkAction> {
        let dest = self.stereo_input();
        self.connections.plan_connect(column, source, dest)
    }

    /// Plan removing whatever `column` routes into this engine.
    pub fn plan_unroute(&mut self, column: usize) -> Vec<LinkAction> {
        let dest = self.stereo_input();
        self.connections.plan_disconnect(column, dest)
    }

    /// Remove every link recorded in the connection table.
    pub fn clear_routes(&mut self) {
        let dest = self.stereo_input();
        let actions = self.connections.plan_clear(dest);
        let failures = connections::apply(&actions);
        if failures > 0 {
            warn!("{} unlink(s) failed for '{}'", failures, self.instrument_name);
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}
