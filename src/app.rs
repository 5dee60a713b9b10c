// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Application state: instruments, device selection and routing.
//!
//! The app runs on the tokio loop in `main`. Subprocess work (pw-dump,
//! pw-link, pw-loopback) is pushed to blocking workers. Work that waits on
//! PipeWire reports back through [`TaskEvent`]s.

use crate::audio::connections::{self, LinkAction};
use crate::audio::loopback::{loopback_name, LoopbackCommand, LoopbackEvent, LoopbackWorker};
use crate::audio::routing;
use crate::audio::types::EngineNodes;
use crate::audio::{
    check_pipewire_tools, DumpFilter, LoopbackError, LoopbackSlots, SharedLoopbacks, Topology,
    TopologyError,
};
use crate::clip_menu::ClipMenuMode;
use crate::config::{AppConfig, ConfigError, InstrumentDefinition, PipeWireConfig, RoutingStrategy};
use crate::devices::mod_matrix::MappingRow;
use crate::devices::{Device, ModDestination, ModMatrixDevice, RouteChoice, RouteRequest, RouteSource};
use crate::engine::{Engine, EngineError};
use crate::osc::{self, Inbound, OscClient, OscError};
use crate::surface::{Button, SurfaceEvent};
use pushpin_osc::{Message, MOD_PREFIX};
use rosc::OscMessage;
use std::collections::HashSet;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("PipeWire error: {0}")]
    Topology(#[from] TopologyError),
    #[error("OSC error: {0}")]
    Osc(#[from] OscError),
    #[error("Loopback error: {0}")]
    Loopback(#[from] LoopbackError),
    #[error("Background task failed: {0}")]
    Join(String),
}

fn join_error(e: tokio::task::JoinError) -> AppError {
    AppError::Join(e.to_string())
}

/// Where an inbound OSC message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Surface,
    Instrument(usize),
}

/// Results of background work, delivered back to the event loop.
#[derive(Debug)]
pub enum TaskEvent {
    /// A node search for the engine of `instrument` finished.
    EngineNodes {
        instrument: usize,
        pid: u32,
        result: Result<EngineNodes, EngineError>,
    },
    /// The loopback worker of `instrument` finished a command.
    Loopback {
        instrument: usize,
        event: LoopbackEvent,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Devices,
    Clip,
}

/// One configured instrument and everything attached to it.
pub struct Instrument {
    pub definition: InstrumentDefinition,
    pub engine: Engine,
    client: Option<OscClient>,
    pub devices: Vec<Device>,
    pub mod_matrix: ModMatrixDevice,
    loopbacks: SharedLoopbacks,
    loopback_worker: Option<LoopbackWorker>,
}

impl Instrument {
    pub fn new(definition: InstrumentDefinition, config: &AppConfig) -> Result<Self, AppError> {
        let engine = Engine::new(&definition, &config.engine, &config.pipewire)?;
        let devices = definition
            .devices
            .iter()
            .map(|d| Device::from_definition(d, &definition.instrument_name))
            .collect();
        Ok(Self {
            definition,
            engine,
            client: None,
            devices,
            mod_matrix: ModMatrixDevice::new(),
            loopbacks: LoopbackSlots::shared(),
            loopback_worker: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.definition.instrument_name
    }

    pub fn short_name(&self) -> &str {
        &self.definition.instrument_short_name
    }

    fn send(&self, messages: &[Message]) {
        if let Some(client) = &self.client {
            client.send_all(messages);
        }
    }

    fn send_osc(&self, messages: Vec<OscMessage>) {
        let Some(client) = &self.client else {
            return;
        };
        for message in messages {
            if let Err(e) = client.send_raw(&message.addr, message.args) {
                warn!("Failed to send {} to '{}': {}", message.addr, self.name(), e);
            }
        }
    }

    /// Hand a command to the loopback worker, starting it on first use.
    fn send_loopback(
        &mut self,
        index: usize,
        config: &PipeWireConfig,
        tasks: &mpsc::UnboundedSender<TaskEvent>,
        command: LoopbackCommand,
    ) -> Result<(), AppError> {
        let worker = match self.loopback_worker.take() {
            Some(worker) => worker,
            None => {
                let tasks = tasks.clone();
                LoopbackWorker::spawn(
                    self.short_name(),
                    self.loopbacks.clone(),
                    config.retry_count,
                    config.retry_interval(),
                    move |event| {
                        let _ = tasks.send(TaskEvent::Loopback {
                            instrument: index,
                            event,
                        });
                    },
                )?
            }
        };
        worker.send(command)?;
        self.loopback_worker = Some(worker);
        Ok(())
    }

    /// Set the engine's output volume when the definition asks for one.
    fn apply_volume(&self) {
        let Some(volume) = self.definition.volume else {
            return;
        };
        let node_id = match self.engine.pipewire_id() {
            Ok(id) => id,
            Err(e) => {
                warn!("Cannot set volume: {}", e);
                return;
            }
        };
        let name = self.name().to_string();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = routing::set_volume(node_id, volume) {
                warn!("Volume for '{}' failed: {}", name, e);
            }
        });
    }

    pub fn mod_destinations(&self) -> Vec<ModDestination> {
        self.devices.iter().filter_map(Device::mod_destination).collect()
    }

    pub fn mod_rows(&self) -> Vec<MappingRow> {
        self.mod_matrix.rows(|address| {
            self.devices
                .iter()
                .find_map(|d| d.label_for(address))
                .map(str::to_string)
        })
    }

    /// Every value query for the instrument's devices and mappings.
    fn query_all(&self) -> Vec<OscMessage> {
        let mut out: Vec<OscMessage> = self.devices.iter().flat_map(Device::query_all).collect();
        out.push(self.mod_matrix.query_all());
        out
    }

    /// Apply a message reported by the engine.
    fn handle(&mut self, message: &OscMessage) -> bool {
        if message.addr.starts_with(MOD_PREFIX) {
            return self.mod_matrix.handle(message);
        }
        let mut handled = false;
        for device in &mut self.devices {
            handled |= device.handle(message);
        }
        handled
    }
}

pub struct App {
    config: AppConfig,
    instruments: Vec<Instrument>,
    selected_instrument: usize,
    /// Index into the instrument's devices. One past the end is the mod matrix.
    selected_device: usize,
    mode: Mode,
    clip: ClipMenuMode,
    tasks: mpsc::UnboundedSender<TaskEvent>,
    /// Instruments with a node search in flight.
    pending_nodes: HashSet<usize>,
}

impl App {
    pub fn new(
        config: AppConfig,
        definitions: Vec<InstrumentDefinition>,
        tasks: mpsc::UnboundedSender<TaskEvent>,
    ) -> Result<Self, AppError> {
        let clip = ClipMenuMode::new(&definitions);
        let instruments = definitions
            .into_iter()
            .map(|d| Instrument::new(d, &config))
            .collect::<Result<Vec<_>, _>>()?;
        info!("Configured {} instrument(s)", instruments.len());
        Ok(Self {
            config,
            instruments,
            selected_instrument: 0,
            selected_device: 0,
            mode: Mode::Devices,
            clip,
            tasks,
            pending_nodes: HashSet::new(),
        })
    }

    fn is_mod_matrix_selected(&self) -> bool {
        self.instruments
            .get(self.selected_instrument)
            .map(|i| self.selected_device == i.devices.len())
            .unwrap_or(false)
    }

    /// Start engines, attach OSC sockets and bring the PipeWire view up to date.
    pub async fn startup(&mut self, tx: &mpsc::UnboundedSender<Inbound<Source>>) -> Result<(), AppError> {
        check_pipewire_tools();

        for (index, instrument) in self.instruments.iter_mut().enumerate() {
            if let Err(e) = instrument.engine.start().await {
                error!("Failed to start engine for '{}': {}", instrument.name(), e);
                continue;
            }
            if let Some(port) = instrument.definition.osc_in_port {
                instrument.client = Some(OscClient::new(port)?);
            }
            if let Some(port) = instrument.definition.osc_out_port {
                let socket = osc::bind(port).await?;
                tokio::spawn(osc::listen(socket, Source::Instrument(index), tx.clone()));
            }
        }

        if let Err(e) = self.refresh().await {
            warn!("PipeWire graph unavailable, starting without it: {}", e);
            self.rebuild_routing();
        }
        self.select_current();
        for instrument in &self.instruments {
            instrument.send_osc(instrument.query_all());
        }
        info!("Startup complete");
        Ok(())
    }

    /// Re-read the PipeWire graph and reconfigure every engine.
    ///
    /// Engines that have exited are forgotten. Node searches for engines
    /// without nodes run in the background and report through [`TaskEvent`].
    pub async fn refresh(&mut self) -> Result<(), AppError> {
        self.reap_engines();
        self.discover_nodes();
        let topology = tokio::task::spawn_blocking(|| Topology::capture(DumpFilter::All))
            .await
            .map_err(join_error)??;
        self.apply_topology(&topology);
        Ok(())
    }

    fn reap_engines(&mut self) {
        for (index, instrument) in self.instruments.iter_mut().enumerate() {
            if instrument.engine.reap_exited() {
                self.pending_nodes.remove(&index);
            }
        }
    }

    /// Start a node search for every running engine that has no nodes yet.
    fn discover_nodes(&mut self) {
        for (index, instrument) in self.instruments.iter().enumerate() {
            if instrument.engine.nodes().is_some() || self.pending_nodes.contains(&index) {
                continue;
            }
            let Ok(query) = instrument.engine.node_query() else {
                continue;
            };
            self.pending_nodes.insert(index);
            let tasks = self.tasks.clone();
            tokio::task::spawn_blocking(move || {
                let result = query.run();
                let _ = tasks.send(TaskEvent::EngineNodes {
                    instrument: index,
                    pid: query.pid,
                    result,
                });
            });
        }
    }

    /// Reconfigure every running engine from a topology snapshot.
    pub fn apply_topology(&mut self, topology: &Topology) {
        if topology.is_empty() {
            warn!("PipeWire graph is empty");
        } else {
            trace!("Topology refreshed: {} objects", topology.len());
        }
        for instrument in &mut self.instruments {
            instrument.engine.configure_pipewire(topology);
        }
        self.rebuild_routing();
    }

    /// Apply the result of background work.
    pub fn handle_task(&mut self, task: TaskEvent) {
        match task {
            TaskEvent::EngineNodes {
                instrument: index,
                pid,
                result,
            } => {
                self.pending_nodes.remove(&index);
                let Some(instrument) = self.instruments.get_mut(index) else {
                    return;
                };
                match result {
                    Ok(nodes) => {
                        if instrument.engine.update_config(pid, nodes) {
                            instrument.apply_volume();
                        }
                    }
                    Err(e) => warn!("'{}': {}", instrument.name(), e),
                }
            }
            TaskEvent::Loopback {
                instrument: index,
                event,
            } => {
                let name = self
                    .instruments
                    .get(index)
                    .map(Instrument::name)
                    .unwrap_or_default();
                match event {
                    LoopbackEvent::Opened {
                        column,
                        pid,
                        client_id,
                    } => info!(
                        "Column {} of '{}' routed through loopback pid {} (client {:?})",
                        column, name, pid, client_id
                    ),
                    LoopbackEvent::Closed { column } => {
                        info!("Column {} of '{}' disconnected", column, name)
                    }
                    LoopbackEvent::Failed { column, message } => {
                        error!("Routing column {} of '{}' failed: {}", column, name, message)
                    }
                }
            }
        }
    }

    /// Refresh every audio-in device with the other running instruments.
    pub fn rebuild_routing(&mut self) {
        let sources: Vec<RouteSource> = self
            .instruments
            .iter()
            .filter_map(|i| {
                Some(RouteSource {
                    label: i.name().to_string(),
                    pid: i.engine.pid()?,
                })
            })
            .collect();

        for instrument in &mut self.instruments {
            let own = instrument.engine.pid();
            let others: Vec<RouteSource> = sources
                .iter()
                .filter(|s| Some(s.pid) != own)
                .cloned()
                .collect();
            for device in &mut instrument.devices {
                device.update_routing(&others);
            }
        }
    }

    /// Send select and query messages for the current device.
    fn select_current(&mut self) {
        let device_index = self.selected_device;
        let Some(instrument) = self.instruments.get_mut(self.selected_instrument) else {
            return;
        };
        match instrument.devices.get(device_index) {
            Some(device) => {
                info!("Selected '{}' / '{}'", instrument.name(), device.label());
                let mut messages = device.select();
                messages.extend(device.query_visible());
                instrument.mod_matrix.deactivate();
                instrument.send_osc(messages);
            }
            None => {
                info!(
                    "Selected '{}' / {} ({} mapping(s))",
                    instrument.name(),
                    instrument.mod_matrix.label(),
                    instrument.mod_matrix.table().len()
                );
                let message = instrument.mod_matrix.select();
                instrument.send_osc(vec![message]);
            }
        }
    }

    pub fn select_instrument(&mut self, index: usize) -> bool {
        if index >= self.instruments.len() || index == self.selected_instrument {
            return false;
        }
        self.selected_instrument = index;
        self.selected_device = 0;
        self.select_current();
        true
    }

    pub fn select_device(&mut self, index: usize) -> bool {
        let Some(instrument) = self.instruments.get(self.selected_instrument) else {
            return false;
        };
        if index > instrument.devices.len() || index == self.selected_device {
            return false;
        }
        self.selected_device = index;
        self.select_current();
        true
    }

    fn turn_page(&mut self, forward: bool) -> bool {
        let device_index = self.selected_device;
        let Some(instrument) = self.instruments.get_mut(self.selected_instrument) else {
            return false;
        };
        let Some(device) = instrument.devices.get_mut(device_index) else {
            return false;
        };
        let (prev, next) = device.next_prev();
        let page = device.page();
        let moved = match forward {
            true if next => device.set_page(page + 1),
            false if prev => device.set_page(page - 1),
            _ => false,
        };
        if moved {
            let queries = device.query_visible();
            instrument.send_osc(queries);
        }
        moved
    }

    pub async fn handle_inbound(&mut self, inbound: Inbound<Source>) {
        match inbound.source {
            Source::Surface => match SurfaceEvent::from_osc(&inbound.message) {
                Some(event) => self.handle_surface(event).await,
                None => debug!("Unknown surface message {}", inbound.message.addr),
            },
            Source::Instrument(index) => {
                let Some(instrument) = self.instruments.get_mut(index) else {
                    return;
                };
                if !instrument.handle(&inbound.message) {
                    trace!("Unhandled {} from '{}'", inbound.message.addr, instrument.name());
                } else if inbound.message.addr.starts_with(MOD_PREFIX)
                    && instrument.mod_matrix.is_active()
                {
                    if instrument.mod_matrix.table().is_empty() {
                        debug!("'{}' mod matrix has no mappings", instrument.name());
                    } else {
                        for row in instrument.mod_rows() {
                            debug!(
                                "'{}' mod {} -> {} at {:.2}",
                                instrument.name(),
                                row.source,
                                row.dest,
                                row.depth
                            );
                        }
                    }
                }
            }
        }
    }

    pub async fn handle_surface(&mut self, event: SurfaceEvent) {
        if let SurfaceEvent::Button(Button::Clip) = event {
            self.mode = match self.mode {
                Mode::Devices => Mode::Clip,
                Mode::Clip => Mode::Devices,
            };
            info!("Mode: {:?}", self.mode);
            if self.mode == Mode::Devices {
                self.select_current();
            }
            return;
        }
        if let SurfaceEvent::Button(Button::LowerRow(n)) = event {
            self.select_instrument(n as usize);
            return;
        }
        match self.mode {
            Mode::Devices => self.handle_device_event(event).await,
            Mode::Clip => self.handle_clip_event(event),
        }
    }

    async fn handle_device_event(&mut self, event: SurfaceEvent) {
        match event {
            SurfaceEvent::Button(Button::UpperRow(n)) => {
                self.select_device(n as usize);
            }
            SurfaceEvent::Button(Button::PageLeft) => {
                self.turn_page(false);
            }
            SurfaceEvent::Button(Button::PageRight) => {
                self.turn_page(true);
            }
            SurfaceEvent::Button(_) => {}
            SurfaceEvent::Encoder { index, increment } => {
                let is_mod_matrix = self.is_mod_matrix_selected();
                let device_index = self.selected_device;
                let instrument_index = self.selected_instrument;
                let Some(instrument) = self.instruments.get_mut(instrument_index) else {
                    return;
                };
                if is_mod_matrix {
                    let dests = instrument.mod_destinations();
                    let messages = instrument.mod_matrix.on_encoder(index, increment, &dests);
                    instrument.send_osc(messages);
                    return;
                }
                let Some(device) = instrument.devices.get_mut(device_index) else {
                    return;
                };
                let (messages, routes) = device.on_encoder(index, increment);
                instrument.send(&messages);
                for request in routes {
                    if let Err(e) = self.route(instrument_index, request).await {
                        error!("Routing column {} failed: {}", request.column, e);
                    }
                }
            }
        }
    }

    fn handle_clip_event(&mut self, event: SurfaceEvent) {
        let Some(instrument) = self.instruments.get(self.selected_instrument) else {
            return;
        };
        let Some(menu) = self.clip.menu_mut(instrument.short_name()) else {
            return;
        };
        match event {
            SurfaceEvent::Button(Button::UpperRow(n)) => {
                menu.select_section(n as usize);
            }
            SurfaceEvent::Button(Button::PageLeft) => {
                menu.page_left();
            }
            SurfaceEvent::Button(Button::PageRight) => {
                menu.page_right();
            }
            SurfaceEvent::Button(_) => {}
            SurfaceEvent::Encoder { index, increment } => {
                if let Some(message) = menu.on_encoder(index, increment) {
                    instrument.send(&[message]);
                }
                return;
            }
        }
        debug!("Clip menu '{}' page {}", menu.section(), menu.page());
    }

    /// Connect or disconnect a routing column feeding instrument `dest`.
    pub async fn route(&mut self, dest: usize, request: RouteRequest) -> Result<(), AppError> {
        let source = match request.choice {
            RouteChoice::Disconnect => None,
            RouteChoice::Source(pid) => {
                let found = self
                    .instruments
                    .iter()
                    .position(|i| i.engine.pid() == Some(pid));
                if found.is_none() {
                    warn!("No instrument with pid {} to route from", pid);
                    return Ok(());
                }
                found
            }
        };

        match self.config.pipewire.routing {
            RoutingStrategy::Loopback => self.route_loopback(dest, request.column, source),
            RoutingStrategy::Links => self.route_links(dest, request.column, source).await,
        }
    }

    /// Queue a loopback change. The outcome arrives as [`TaskEvent::Loopback`].
    fn route_loopback(
        &mut self,
        dest: usize,
        column: usize,
        source: Option<usize>,
    ) -> Result<(), AppError> {
        let command = match source {
            None => LoopbackCommand::Close { column },
            Some(source) => {
                let source_serial = self
                    .instruments
                    .get(source)
                    .and_then(|s| s.engine.output_serial());
                let Some(instrument) = self.instruments.get(dest) else {
                    return Ok(());
                };
                let (Some(source_serial), Some(dest_serial)) =
                    (source_serial, instrument.engine.input_serial())
                else {
                    warn!(
                        "Cannot route column {} into '{}': node serials not known yet",
                        column,
                        instrument.name()
                    );
                    return Ok(());
                };
                LoopbackCommand::Open {
                    column,
                    name: loopback_name(instrument.short_name(), column),
                    source_serial,
                    dest_serial,
                }
            }
        };
        let Some(instrument) = self.instruments.get_mut(dest) else {
            return Ok(());
        };
        instrument.send_loopback(dest, &self.config.pipewire, &self.tasks, command)
    }

    /// Update the connection table of `dest` and return the link changes it needs.
    fn plan_links(&mut self, dest: usize, column: usize, source: Option<usize>) -> Vec<LinkAction> {
        let source_pair = source
            .and_then(|s| self.instruments.get(s))
            .map(|s| s.engine.stereo_output());
        let Some(instrument) = self.instruments.get_mut(dest) else {
            return Vec::new();
        };
        match source_pair {
            Some(pair) => instrument.engine.plan_route(column, pair),
            None => instrument.engine.plan_unroute(column),
        }
    }

    async fn route_links(
        &mut self,
        dest: usize,
        column: usize,
        source: Option<usize>,
    ) -> Result<(), AppError> {
        let actions = self.plan_links(dest, column, source);
        if actions.is_empty() {
            return Ok(());
        }
        let failures = tokio::task::spawn_blocking(move || connections::apply(&actions))
            .await
            .map_err(join_error)?;
        if failures > 0 {
            let name = self
                .instruments
                .get(dest)
                .map(Instrument::name)
                .unwrap_or_default();
            warn!(
                "{} link operation(s) failed on column {} of '{}'",
                failures, column, name
            );
        }
        Ok(())
    }

    /// Close loopbacks, remove links and stop every engine.
    pub fn shutdown(&mut self) {
        info!("Shutting down {} instrument(s)", self.instruments.len());
        for instrument in &mut self.instruments {
            // Joins the worker once its current command is done.
            instrument.loopback_worker = None;
            instrument.loopbacks.lock().close_all();
            instrument.engine.clear_routes();
            instrument.engine.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::types::StereoPair;
    use crate::controls::DETENTS_PER_ITEM;
    use std::process::Command;
    use std::time::Duration;

    fn definition(short: &str) -> InstrumentDefinition {
        serde_json::from_value(serde_json::json!({
            "instrument_name": format!("Synth {}", short),
            "instrument_short_name": short,
            "osc_in_port": 1030,
            "osc_out_port": 1031,
            "devices": [
                {"name": "Osc", "slot": 0, "modmatrix": true, "controls": [
                    {"$type": "control-range", "label": "Pitch", "address": "/pitch", "modmatrix": true}
                ]},
                {"$type": "audio-in", "name": "Audio In", "slot": 1}
            ]
        }))
        .unwrap()
    }

    fn app() -> App {
        let (tx, _rx) = mpsc::unbounded_channel();
        App::new(AppConfig::default(), vec![definition("a"), definition("b")], tx).unwrap()
    }

    /// Two instruments whose engines are stand-in processes.
    fn running_app(routing: RoutingStrategy) -> (App, mpsc::UnboundedReceiver<TaskEvent>, Vec<u32>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut config = AppConfig::default();
        config.pipewire.routing = routing;
        let mut app = App::new(config, vec![definition("a"), definition("b")], tx).unwrap();
        let pids = app
            .instruments
            .iter_mut()
            .map(|i| {
                i.engine
                    .attach_process(Command::new("sleep").arg("30").spawn().unwrap());
                i.engine.pid().unwrap()
            })
            .collect();
        (app, rx, pids)
    }

    /// Client, input and output node, and stereo ports for each pid.
    /// Instrument `n` uses ids from `100 * (n + 1)`.
    fn graph(pids: &[u32], with_input_ports: bool) -> Topology {
        let mut objects = Vec::new();
        for (n, pid) in pids.iter().enumerate() {
            let base = 100 * (n as u32 + 1);
            objects.push(serde_json::json!(
                {"id": base, "type": "PipeWire:Interface:Client",
                 "info": {"props": {"application.process.id": pid}}}));
            objects.push(serde_json::json!(
                {"id": base + 1, "type": "PipeWire:Interface:Node",
                 "info": {"props": {"client.id": base, "object.serial": base + 1,
                                    "application.process.id": pid},
                          "params": {"PortConfig": [{"direction": "Input"}]}}}));
            objects.push(serde_json::json!(
                {"id": base + 2, "type": "PipeWire:Interface:Node",
                 "info": {"props": {"client.id": base, "object.serial": base + 2,
                                    "application.process.id": pid},
                          "params": {"PortConfig": [{"direction": "Output"}]}}}));
            let mut ports = vec![("output", base + 2, base + 20, "FL"), ("output", base + 2, base + 21, "FR")];
            if with_input_ports {
                ports.push(("input", base + 1, base + 10, "FL"));
                ports.push(("input", base + 1, base + 11, "FR"));
            }
            for (direction, node, id, channel) in ports {
                objects.push(serde_json::json!(
                    {"id": id, "type": "PipeWire:Interface:Port",
                     "info": {"direction": direction,
                              "props": {"node.id": node,
                                        "port.name": format!("{}_{}", direction, channel),
                                        "audio.channel": channel}}}));
            }
        }
        Topology::from_json(&serde_json::Value::Array(objects).to_string()).unwrap()
    }

    #[test]
    fn test_new_builds_instruments() {
        let app = app();
        assert_eq!(app.instruments.len(), 2);
        assert_eq!(app.instruments[0].devices.len(), 2);
        assert_eq!(app.instruments[1].short_name(), "b");
        assert_eq!(
            app.instruments[0].mod_destinations(),
            vec![ModDestination {
                label: "Osc".into(),
                controls: vec![("Pitch".into(), "/pitch".into())]
            }]
        );
    }

    #[test]
    fn test_missing_midi_device_fails() {
        let mut config = AppConfig::default();
        config.engine.midi_device_idx = None;
        assert!(matches!(
            App::new(config, vec![definition("a")], mpsc::unbounded_channel().0),
            Err(AppError::Engine(EngineError::MissingMidiDevice(_)))
        ));
    }

    #[tokio::test]
    async fn test_buttons_select_devices_and_instruments() {
        let mut app = app();
        app.handle_surface(SurfaceEvent::Button(Button::UpperRow(1))).await;
        assert_eq!(app.selected_device, 1);
        // One past the last device is the mod matrix.
        app.handle_surface(SurfaceEvent::Button(Button::UpperRow(2))).await;
        assert_eq!(app.selected_device, 2);
        assert!(app.instruments[0].mod_matrix.is_active());
        app.handle_surface(SurfaceEvent::Button(Button::UpperRow(5))).await;
        assert_eq!(app.selected_device, 2);

        app.handle_surface(SurfaceEvent::Button(Button::LowerRow(1))).await;
        assert_eq!(app.selected_instrument, 1);
        assert_eq!(app.selected_device, 0);
        app.handle_surface(SurfaceEvent::Button(Button::LowerRow(4))).await;
        assert_eq!(app.selected_instrument, 1);
    }

    #[tokio::test]
    async fn test_mod_matrix_encoder_records_mapping() {
        let mut app = app();
        app.handle_surface(SurfaceEvent::Button(Button::UpperRow(2))).await;
        app.handle_surface(SurfaceEvent::Encoder {
            index: 5,
            increment: 1,
        })
        .await;
        let table = app.instruments[0].mod_matrix.table();
        assert_eq!(table.get("/mod/macro_1", "/pitch").map(|m| m.depth), Some(0.0));
    }

    #[tokio::test]
    async fn test_clip_mode_routes_buttons_to_menu() {
        let mut app = app();
        app.handle_surface(SurfaceEvent::Button(Button::Clip)).await;
        assert_eq!(app.mode, Mode::Clip);
        app.handle_surface(SurfaceEvent::Button(Button::UpperRow(1))).await;
        app.handle_surface(SurfaceEvent::Button(Button::PageRight)).await;
        let menu = app.clip.menu("a").unwrap();
        assert_eq!(menu.section(), "16 to 31");
        assert_eq!(menu.page(), 1);
        // Device selection is untouched in clip mode.
        assert_eq!(app.selected_device, 0);

        app.handle_surface(SurfaceEvent::Button(Button::Clip)).await;
        assert_eq!(app.mode, Mode::Devices);
    }

    #[tokio::test]
    async fn test_engine_values_reach_devices() {
        let mut app = app();
        app.handle_inbound(Inbound {
            source: Source::Instrument(0),
            message: OscMessage {
                addr: "/mod/macro_2".into(),
                args: vec![rosc::OscType::String("/pitch".into()), rosc::OscType::Float(0.5)],
            },
        })
        .await;
        let rows = app.instruments[0].mod_rows();
        assert_eq!(rows[0].source, "Macro 2");
        assert_eq!(rows[0].dest, "Pitch");
        assert!(app.instruments[1].mod_matrix.table().is_empty());
    }

    #[tokio::test]
    async fn test_route_without_engines_is_noop() {
        let mut app = app();
        let request = RouteRequest {
            column: 0,
            choice: RouteChoice::Source(4242),
        };
        assert!(app.route(0, request).await.is_ok());

        let request = RouteRequest {
            column: 0,
            choice: RouteChoice::Disconnect,
        };
        assert!(app.route(0, request).await.is_ok());
        assert_eq!(app.instruments[0].loopbacks.lock().open_count(), 0);

        app.config.pipewire.routing = RoutingStrategy::Links;
        assert!(app.route(1, request).await.is_ok());
    }

    #[tokio::test]
    async fn test_page_buttons_without_pages() {
        let mut app = app();
        app.handle_surface(SurfaceEvent::Button(Button::PageRight)).await;
        assert_eq!(app.instruments[0].devices[0].page(), 0);
        app.handle_surface(SurfaceEvent::Encoder {
            index: 0,
            increment: DETENTS_PER_ITEM,
        })
        .await;
    }

    #[tokio::test]
    async fn test_link_route_records_connection() {
        let (mut app, _rx, pids) = running_app(RoutingStrategy::Links);
        app.apply_topology(&graph(&pids, true));
        assert_eq!(app.instruments[1].engine.stereo_input(), StereoPair::new(210, 211));

        // Column 2 of "b" takes audio from "a".
        let actions = app.plan_links(1, 2, Some(0));
        assert_eq!(
            actions,
            vec![
                LinkAction::Link {
                    output: 120,
                    input: 210
                },
                LinkAction::Link {
                    output: 121,
                    input: 211
                },
            ]
        );
        let connections = app.instruments[1].engine.connections();
        assert_eq!(connections.get(2), Some(StereoPair::new(120, 121)));
        assert_eq!(connections.get(0), Some(StereoPair::default()));
        assert!(app.plan_links(1, 2, Some(0)).is_empty());

        let actions = app.plan_links(1, 2, None);
        assert_eq!(actions.len(), 2);
        assert!(actions.iter().all(|a| matches!(a, LinkAction::Unlink { .. })));
        assert_eq!(
            app.instruments[1].engine.connections().get(2),
            Some(StereoPair::default())
        );
    }

    #[tokio::test]
    async fn test_link_route_waits_for_destination_ports() {
        let (mut app, _rx, pids) = running_app(RoutingStrategy::Links);
        app.apply_topology(&graph(&pids, false));
        assert!(app.plan_links(1, 0, Some(0)).is_empty());
        assert_eq!(
            app.instruments[1].engine.connections().get(0),
            Some(StereoPair::default())
        );

        app.apply_topology(&graph(&pids, true));
        assert_eq!(app.plan_links(1, 0, Some(0)).len(), 2);
        assert_eq!(
            app.instruments[1].engine.connections().get(0),
            Some(StereoPair::new(120, 121))
        );
    }

    #[tokio::test]
    async fn test_loopback_route_reports_back() {
        let (mut app, mut rx, pids) = running_app(RoutingStrategy::Loopback);
        app.apply_topology(&graph(&pids, true));
        assert_eq!(app.instruments[0].engine.output_serial(), Some(102));
        assert_eq!(app.instruments[1].engine.input_serial(), Some(201));

        let request = RouteRequest {
            column: 3,
            choice: RouteChoice::Source(pids[0]),
        };
        assert!(app.route(1, request).await.is_ok());
        assert!(app.instruments[1].loopback_worker.is_some());

        // Opened when pw-loopback exists, Failed otherwise. Either way the
        // event loop is never blocked waiting for it.
        let task = tokio::time::timeout(Duration::from_secs(30), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(
            matches!(
                &task,
                TaskEvent::Loopback {
                    instrument: 1,
                    event: LoopbackEvent::Opened { column: 3, .. }
                        | LoopbackEvent::Failed { column: 3, .. },
                }
            ),
            "unexpected task event {:?}",
            task
        );
        app.handle_task(task);
        app.shutdown();
        assert_eq!(app.instruments[1].loopbacks.lock().open_count(), 0);
    }

    #[tokio::test]
    async fn test_startup_tolerates_missing_pipewire() {
        let mut app = app();
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(app.startup(&tx).await.is_ok());
        assert_eq!(app.selected_instrument, 0);
        assert_eq!(app.mode, Mode::Devices);
    }

    #[tokio::test]
    async fn test_node_results_reach_engine() {
        let (mut app, _rx, pids) = running_app(RoutingStrategy::Links);
        let nodes = graph(&pids, true).engine_nodes(pids[1]).unwrap();
        app.pending_nodes.insert(1);
        app.handle_task(TaskEvent::EngineNodes {
            instrument: 1,
            pid: pids[1],
            result: Ok(nodes),
        });
        assert!(app.pending_nodes.is_empty());
        assert_eq!(app.instruments[1].engine.pipewire_id().unwrap(), 202);

        // Only the engine without nodes gets a search.
        app.discover_nodes();
        assert_eq!(app.pending_nodes, HashSet::from([0]));
        app.discover_nodes();
        assert_eq!(app.pending_nodes.len(), 1);
    }

    #[tokio::test]
    async fn test_exited_engine_drops_late_node_results() {
        let mut app = app();
        app.instruments[0]
            .engine
            .attach_process(Command::new("true").spawn().unwrap());
        let pid = app.instruments[0].engine.pid().unwrap();
        let nodes = graph(&[pid], true).engine_nodes(pid).unwrap();
        app.pending_nodes.insert(0);

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while app.instruments[0].engine.pid().is_some() {
            assert!(std::time::Instant::now() < deadline, "engine never exited");
            app.reap_engines();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(app.pending_nodes.is_empty());

        app.handle_task(TaskEvent::EngineNodes {
            instrument: 0,
            pid,
            result: Ok(nodes),
        });
        assert!(app.instruments[0].engine.nodes().is_none());
    }
}
