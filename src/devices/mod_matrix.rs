// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Mod matrix: picks a modulation source and destination with the encoders
//! and keeps a table of the mappings the engine reports.
//!
//! Encoder columns, left to right: source category, source, destination
//! device, destination control, depth, set mapping, delete mapping.

use crate::controls::Selector;
use pushpin_osc::{number, MOD_PREFIX, MOD_SOURCE_CATEGORIES, QUERY_ALL_MODS};
use rosc::{OscMessage, OscType};
use tracing::{debug, trace};

pub const CATEGORY_COLUMN: usize = 0;
pub const SOURCE_COLUMN: usize = 1;
pub const DEVICE_COLUMN: usize = 2;
pub const CONTROL_COLUMN: usize = 3;
pub const DEPTH_COLUMN: usize = 4;
pub const SET_COLUMN: usize = 5;
pub const DELETE_COLUMN: usize = 6;

/// Depth resolution: one encoder increment moves the depth by 0.01.
const DEPTH_STEPS: i32 = 100;

/// Neutral depth: sends as zero modulation.
const DEPTH_CENTER: f32 = 0.5;

/// Map a `[0, 1]` knob depth to the engine's `[-1, 1]` range.
pub fn scale_depth(depth: f32) -> f32 {
    (depth - DEPTH_CENTER) * 2.0
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mapping {
    pub source: String,
    pub dest: String,
    pub depth: f32,
}

/// Mappings keyed by `(source, dest)`, in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappingTable {
    mappings: Vec<Mapping>,
}

impl MappingTable {
    /// Overwrite the depth of an existing mapping or append a new one.
    pub fn upsert(&mut self, source: &str, dest: &str, depth: f32) {
        match self
            .mappings
            .iter_mut()
            .find(|m| m.source == source && m.dest == dest)
        {
            Some(existing) => existing.depth = depth,
            None => self.mappings.push(Mapping {
                source: source.to_string(),
                dest: dest.to_string(),
                depth,
            }),
        }
    }

    /// Remove a mapping. Returns whether one was present.
    pub fn remove(&mut self, source: &str, dest: &str) -> bool {
        let before = self.mappings.len();
        self.mappings
            .retain(|m| !(m.source == source && m.dest == dest));
        self.mappings.len() != before
    }

    #[cfg(test)]
    pub fn get(&self, source: &str, dest: &str) -> Option<&Mapping> {
        self.mappings
            .iter()
            .find(|m| m.source == source && m.dest == dest)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mapping> {
        self.mappings.iter()
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

/// A device whose controls may be modulated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModDestination {
    pub label: String,
    /// `(label, address)` of each modulatable control.
    pub controls: Vec<(String, String)>,
}

/// One line of the mapping list as shown on the display.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingRow {
    pub source: String,
    pub dest: String,
    pub depth: f32,
}

/// The current encoder selections, resolved to labels.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub category: &'static str,
    pub source: Option<&'static str>,
    pub device: Option<String>,
    pub control: Option<String>,
    pub depth: f32,
}

#[derive(Debug, Clone, Default)]
pub struct ModMatrixDevice {
    category: Selector,
    source: Selector,
    device: Selector,
    control: Selector,
    depth_steps: i32,
    active: bool,
    table: MappingTable,
}

impl ModMatrixDevice {
    pub fn new() -> Self {
        Self {
            depth_steps: DEPTH_STEPS / 2,
            ..Self::default()
        }
    }

    pub fn label(&self) -> &'static str {
        "Mod Matrix"
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn deactivate(&mut self) {
        self.active = false;
    }

    pub fn table(&self) -> &MappingTable {
        &self.table
    }

    /// Knob depth in `[0, 1]`.
    pub fn depth(&self) -> f32 {
        self.depth_steps as f32 / DEPTH_STEPS as f32
    }

    /// Ask the engine for every mapping and mark the matrix active.
    pub fn select(&mut self) -> OscMessage {
        self.active = true;
        OscMessage {
            addr: QUERY_ALL_MODS.to_string(),
            args: Vec::new(),
        }
    }

    pub fn query_all(&self) -> OscMessage {
        OscMessage {
            addr: QUERY_ALL_MODS.to_string(),
            args: vec![OscType::Float(0.0)],
        }
    }

    fn source_address(&self) -> Option<&'static str> {
        MOD_SOURCE_CATEGORIES
            .get(self.category.index())?
            .sources
            .get(self.source.index())
            .map(|s| s.address)
    }

    fn dest_address<'a>(&self, dests: &'a [ModDestination]) -> Option<&'a str> {
        dests
            .get(self.device.index())?
            .controls
            .get(self.control.index())
            .map(|(_, address)| address.as_str())
    }

    pub fn selection(&self, dests: &[ModDestination]) -> Selection {
        let category = MOD_SOURCE_CATEGORIES.get(self.category.index());
        let device = dests.get(self.device.index());
        Selection {
            category: category.map(|c| c.label).unwrap_or(""),
            source: category
                .and_then(|c| c.sources.get(self.source.index()))
                .map(|s| s.label),
            device: device.map(|d| d.label.clone()),
            control: device
                .and_then(|d| d.controls.get(self.control.index()))
                .map(|(label, _)| label.clone()),
            depth: self.depth(),
        }
    }

    /// Turn encoder `column`. Returns the messages to send to the engine.
    pub fn on_encoder(
        &mut self,
        column: usize,
        increment: i32,
        dests: &[ModDestination],
    ) -> Vec<OscMessage> {
        match column {
            CATEGORY_COLUMN => {
                if self.category.rotate(increment, MOD_SOURCE_CATEGORIES.len()) {
                    self.source.reset();
                }
            }
            SOURCE_COLUMN => {
                let len = MOD_SOURCE_CATEGORIES
                    .get(self.category.index())
                    .map(|c| c.sources.len())
                    .unwrap_or(0);
                self.source.rotate(increment, len);
            }
            DEVICE_COLUMN => {
                if self.device.rotate(increment, dests.len()) {
                    self.control.reset();
                }
            }
            CONTROL_COLUMN => {
                let len = dests
                    .get(self.device.index())
                    .map(|d| d.controls.len())
                    .unwrap_or(0);
                self.control.rotate(increment, len);
            }
            DEPTH_COLUMN => {
                self.depth_steps = self
                    .depth_steps
                    .saturating_add(increment)
                    .clamp(0, DEPTH_STEPS);
            }
            SET_COLUMN | DELETE_COLUMN if increment != 0 => {
                let (Some(source), Some(dest)) = (self.source_address(), self.dest_address(dests))
                else {
                    debug!("Mod matrix: no source or destination selected");
                    return Vec::new();
                };
                let depth = if column == SET_COLUMN {
                    scale_depth(self.depth())
                } else {
                    0.0
                };
                if column == SET_COLUMN {
                    self.table.upsert(source, dest, depth);
                    debug!("Mod matrix: {} -> {} at {:.2}", source, dest, depth);
                } else {
                    self.table.remove(source, dest);
                    debug!("Mod matrix: removed {} -> {}", source, dest);
                }
                return vec![OscMessage {
                    addr: source.to_string(),
                    args: vec![OscType::String(dest.to_string()), OscType::Float(depth)],
                }];
            }
            _ => {}
        }
        trace!("Mod matrix selection {:?}", self.selection(dests));
        Vec::new()
    }

    /// Record a mapping reported by the engine as `/mod/... <dest> <depth>`.
    pub fn handle(&mut self, message: &OscMessage) -> bool {
        if !message.addr.starts_with(MOD_PREFIX) {
            return false;
        }
        let dest = match message.args.first() {
            Some(OscType::String(dest)) => dest,
            _ => return false,
        };
        let Some(depth) = message.args.get(1).and_then(number) else {
            return false;
        };
        self.table.upsert(&message.addr, dest, depth);
        true
    }

    /// Display rows. `dest_label` resolves a control address to its label.
    pub fn rows(&self, dest_label: impl Fn(&str) -> Option<String>) -> Vec<MappingRow> {
        self.table
            .iter()
            .map(|m| MappingRow {
                source: pushpin_osc::mod_source_label(&m.source)
                    .map(str::to_string)
                    .unwrap_or_else(|| m.source.clone()),
                dest: dest_label(&m.dest).unwrap_or_else(|| m.dest.clone()),
                depth: (m.depth * 100.0).round() / 100.0,
            })
            .collect()
    }
}
