// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The audio input device: input processing controls plus routing switches
//! choosing which instrument feeds each routing column.

use super::osc_device::OscDevice;
use super::{RouteChoice, RouteRequest};
use crate::audio::connections::column_for_knob;
use crate::config::DeviceDefinition;
use crate::controls::definition::{
    GroupDefinition, MenuDefinition, MenuItemDefinition, RangeDefinition, SwitchDefinition,
};
use crate::controls::{Control, ControlDefinition};
use pushpin_osc::{Message, MessageValue};
use tracing::{debug, warn};

/// Address carried by a routing group's select message.
pub const ROUTE_ADDRESS: &str = "/route";

/// Address of the "None sel." group: disconnect the column.
pub const UNROUTE_ADDRESS: &str = "/";

/// Routing switches appended after the fixed controls.
pub const ROUTING_SWITCHES: usize = 4;

/// An instrument that can be picked as a routing source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSource {
    pub label: String,
    pub pid: u32,
}

fn range(label: &str, param: u8, bipolar: bool) -> Control {
    Control::from_definition(&ControlDefinition::Range(RangeDefinition {
        label: label.to_string(),
        address: format!("/param/a/osc/1/param{}", param),
        min: 0.0,
        max: 1.0,
        bipolar,
        modmatrix: false,
    }))
}

fn fixed_controls() -> Vec<Control> {
    vec![
        range("Audio Channel", 1, true),
        range("Audio Gain", 2, false),
        Control::Spacer,
        Control::Spacer,
        Control::Spacer,
        Control::Spacer,
        range("Low Cut", 6, false),
        range("High Cut", 7, false),
    ]
}

fn route_group(label: &str, pid: Option<u32>, item: &str) -> GroupDefinition {
    let onselect = match pid {
        Some(pid) => Message::new(ROUTE_ADDRESS, Some(MessageValue::Int(pid as i64))),
        None => Message::new(UNROUTE_ADDRESS, None),
    };
    GroupDefinition {
        label: label.to_string(),
        pid: pid.map(|p| p.to_string()),
        onselect: Some(onselect.clone()),
        controls: vec![ControlDefinition::Menu(MenuDefinition {
            label: String::new(),
            address: None,
            items: vec![MenuItemDefinition {
                label: item.to_string(),
                onselect: Some(onselect),
            }],
        })],
    }
}

/// A routing switch listing "None sel." and one group per source.
pub fn routing_switch(label: &str, sources: &[RouteSource]) -> Control {
    let mut groups = vec![route_group("None sel.", None, "None")];
    groups.extend(
        sources
            .iter()
            .map(|s| route_group(&s.label, Some(s.pid), "L+R")),
    );
    Control::from_definition(&ControlDefinition::Switch(SwitchDefinition {
        label: label.to_string(),
        address: None,
        groups,
    }))
}

fn active_pid(control: &Control) -> Option<String> {
    match control {
        Control::Switch(s) => s.active_group().and_then(|g| g.pid.clone()),
        _ => None,
    }
}

/// Interpret a message emitted by a routing switch.
fn route_choice(message: &Message) -> Option<RouteChoice> {
    match message.address.as_str() {
        UNROUTE_ADDRESS => Some(RouteChoice::Disconnect),
        ROUTE_ADDRESS => message
            .value
            .as_ref()
            .and_then(MessageValue::as_u32)
            .map(RouteChoice::Source),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct AudioInDevice {
    device: OscDevice,
    fixed: usize,
    label: String,
    last_knob: usize,
}

impl AudioInDevice {
    pub fn from_definition(def: &DeviceDefinition, instrument_label: &str) -> Self {
        let controls = fixed_controls();
        let fixed = controls.len();
        Self {
            device: OscDevice::new(&def.name, def.slot, false, def.init.clone(), controls),
            fixed,
            label: instrument_label.to_string(),
            last_knob: 0,
        }
    }

    pub fn device(&self) -> &OscDevice {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut OscDevice {
        &mut self.device
    }

    fn routing_controls(&self) -> &[Control] {
        let controls = self.device.controls();
        &controls[self.fixed.min(controls.len())..]
    }

    /// Rebuild the routing switches from the current instruments.
    ///
    /// A switch that pointed at a source still present keeps that selection.
    pub fn update(&mut self, sources: &[RouteSource]) {
        let previous: Vec<Option<String>> = self.routing_controls().iter().map(active_pid).collect();

        let mut switches = Vec::with_capacity(ROUTING_SWITCHES);
        for n in 0..ROUTING_SWITCHES {
            let mut switch = routing_switch(&self.label, sources);
            if let (Some(Some(pid)), Control::Switch(s)) = (previous.get(n), &mut switch) {
                if let Some(idx) = s.groups.iter().position(|g| g.pid.as_deref() == Some(pid.as_str())) {
                    s.selector.set_index(idx);
                }
            }
            switches.push(switch);
        }
        self.device.replace_tail(self.fixed, switches);
        debug!(
            "Audio input '{}' routing rebuilt with {} source(s), selections {:?}",
            self.label,
            sources.len(),
            self.selections()
        );
    }

    /// Turn an encoder. Routing selections come back as route requests,
    /// everything else as messages for the engine.
    pub fn on_encoder(&mut self, index: usize, increment: i32) -> (Vec<Message>, Vec<RouteRequest>) {
        self.last_knob = index;
        let is_routing = self
            .device
            .visible()
            .get(index)
            .copied()
            .flatten()
            .map(|path| path.index >= self.fixed)
            .unwrap_or(false);

        let messages = self.device.on_encoder(index, increment);
        if !is_routing {
            return (messages, Vec::new());
        }

        let Some(column) = self.device.slot.and_then(|slot| column_for_knob(slot, index)) else {
            warn!(
                "Audio input '{}' has no display slot, routing ignored",
                self.label
            );
            return (Vec::new(), Vec::new());
        };
        debug!(
            "Audio input '{}' knob {} drives column {}",
            self.label, self.last_knob, column
        );
        let routes = messages
            .iter()
            .filter_map(route_choice)
            .map(|choice| RouteRequest { column, choice })
            .collect();
        (Vec::new(), routes)
    }

    /// The source pid currently selected on each routing switch.
    pub fn selections(&self) -> Vec<Option<u32>> {
        self.routing_controls()
            .iter()
            .map(|c| active_pid(c).and_then(|p| p.parse().ok()))
            .collect()
    }
}
