// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Runtime controls bound to OSC addresses.
//!
//! Controls never talk to the network themselves. Turning an encoder returns
//! the messages that should be sent, and incoming OSC values are applied with
//! [`Control::set_state`].

pub mod definition;

pub use definition::ControlDefinition;

use definition::{GroupDefinition, MacroParam, MenuItemDefinition};
use pushpin_osc::{first_number, query_address, Message, MessageValue};
use rosc::OscType;

/// Encoder increments needed to move a list selection by one item.
pub const DETENTS_PER_ITEM: i32 = 10;

/// Fraction of a range covered by one encoder increment.
const RANGE_STEPS: f32 = 100.0;

/// A list cursor driven by an encoder.
///
/// The cursor accumulates increments and moves one item every
/// [`DETENTS_PER_ITEM`] increments, clamped to the list bounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Selector {
    ticks: i32,
}

impl Selector {
    pub fn index(&self) -> usize {
        (self.ticks / DETENTS_PER_ITEM).max(0) as usize
    }

    /// Rotate within a list of `len` items. Returns true if the index changed.
    pub fn rotate(&mut self, increment: i32, len: usize) -> bool {
        let before = self.index();
        if len == 0 {
            self.ticks = 0;
            return before != 0;
        }
        let max = (len as i32) * DETENTS_PER_ITEM - 1;
        self.ticks = self.ticks.saturating_add(increment).clamp(0, max);
        self.index() != before
    }

    /// Jump directly to an item.
    pub fn set_index(&mut self, index: usize) {
        self.ticks = index as i32 * DETENTS_PER_ITEM;
    }

    pub fn reset(&mut self) {
        self.ticks = 0;
    }
}

/// A continuous parameter in `[min, max]`.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeControl {
    pub label: String,
    pub address: String,
    pub min: f32,
    pub max: f32,
    pub bipolar: bool,
    pub modmatrix: bool,
    pub value: f32,
}

impl RangeControl {
    fn step(&self) -> f32 {
        (self.max - self.min) / RANGE_STEPS
    }

    fn clamp(&self, value: f32) -> f32 {
        let (lo, hi) = if self.min <= self.max {
            (self.min, self.max)
        } else {
            (self.max, self.min)
        };
        value.clamp(lo, hi)
    }
}

/// One control fanning out to several parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct MacroControl {
    pub label: String,
    pub params: Vec<MacroParam>,
    pub modmatrix: bool,
    /// Normalized macro position in `[0, 1]`.
    pub value: f32,
}

/// A group of controls selected by a switch.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlGroup {
    pub label: String,
    pub pid: Option<String>,
    pub onselect: Option<Message>,
    pub controls: Vec<Control>,
}

impl ControlGroup {
    fn from_definition(def: &GroupDefinition) -> Self {
        Self {
            label: def.label.clone(),
            pid: def.pid.clone(),
            onselect: def.onselect.clone(),
            controls: def.controls.iter().map(Control::from_definition).collect(),
        }
    }
}

/// Chooses one of several control groups.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchControl {
    pub label: String,
    pub address: Option<String>,
    pub groups: Vec<ControlGroup>,
    pub selector: Selector,
}

impl SwitchControl {
    pub fn active_index(&self) -> usize {
        self.selector.index()
    }

    pub fn active_group(&self) -> Option<&ControlGroup> {
        self.groups.get(self.active_index())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MenuItem {
    pub label: String,
    pub onselect: Option<Message>,
}

impl From<&MenuItemDefinition> for MenuItem {
    fn from(def: &MenuItemDefinition) -> Self {
        Self {
            label: def.label.clone(),
            onselect: def.onselect.clone(),
        }
    }
}

/// A list of items, each sending its own message when selected.
#[derive(Debug, Clone, PartialEq)]
pub struct MenuControl {
    pub label: String,
    pub address: Option<String>,
    pub items: Vec<MenuItem>,
    pub selector: Selector,
}

impl MenuControl {
    pub fn selected(&self) -> Option<&MenuItem> {
        self.items.get(self.selector.index())
    }
}

/// A control occupying one or more encoder slots on a device page.
#[derive(Debug, Clone, PartialEq)]
pub enum Control {
    Range(RangeControl),
    Macro(MacroControl),
    Spacer,
    SpacerAddress { address: String, value: Option<f32> },
    Switch(SwitchControl),
    Menu(MenuControl),
}

impl Control {
    pub fn from_definition(def: &ControlDefinition) -> Self {
        match def {
            ControlDefinition::Range(r) => Control::Range(RangeControl {
                label: r.label.clone(),
                address: r.address.clone(),
                min: r.min,
                max: r.max,
                bipolar: r.bipolar,
                modmatrix: r.modmatrix,
                value: if r.bipolar {
                    (r.min + r.max) / 2.0
                } else {
                    r.min
                },
            }),
            ControlDefinition::Macro(m) => Control::Macro(MacroControl {
                label: m.label.clone(),
                params: m.params.clone(),
                modmatrix: m.modmatrix,
                value: 0.0,
            }),
            ControlDefinition::Spacer => Control::Spacer,
            ControlDefinition::SpacerAddress(s) => Control::SpacerAddress {
                address: s.address.clone(),
                value: None,
            },
            ControlDefinition::Switch(s) => Control::Switch(SwitchControl {
                label: s.label.clone(),
                address: s.address.clone(),
                groups: s.groups.iter().map(ControlGroup::from_definition).collect(),
                selector: Selector::default(),
            }),
            ControlDefinition::Menu(m) => Control::Menu(MenuControl {
                label: m.label.clone(),
                address: m.address.clone(),
                items: m.items.iter().map(MenuItem::from).collect(),
                selector: Selector::default(),
            }),
        }
    }

    /// Number of page slots taken, including a switch's active group.
    pub fn size(&self) -> usize {
        match self {
            Control::Switch(s) => 1 + s.active_group().map(|g| g.controls.len()).unwrap_or(0),
            _ => 1,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Control::Range(r) => &r.label,
            Control::Macro(m) => &m.label,
            Control::Spacer | Control::SpacerAddress { .. } => "",
            Control::Switch(s) => &s.label,
            Control::Menu(m) => &m.label,
        }
    }

    /// The primary address of the control, if it has one.
    pub fn address(&self) -> Option<&str> {
        match self {
            Control::Range(r) => Some(&r.address),
            Control::Macro(_) | Control::Spacer => None,
            Control::SpacerAddress { address, .. } => Some(address),
            Control::Switch(s) => s.address.as_deref(),
            Control::Menu(m) => m.address.as_deref(),
        }
    }

    /// Every address whose incoming values update this control.
    pub fn listen_addresses(&self) -> Vec<&str> {
        match self {
            Control::Macro(m) => m.params.iter().map(|p| p.address.as_str()).collect(),
            _ => self.address().into_iter().collect(),
        }
    }

    pub fn is_modmatrix(&self) -> bool {
        match self {
            Control::Range(r) => r.modmatrix,
            Control::Macro(m) => m.modmatrix,
            _ => false,
        }
    }

    /// Query message asking the engine to report this control's value.
    pub fn query(&self) -> Option<Message> {
        self.address().map(|a| Message::new(query_address(a), None))
    }

    /// Controls of the active group shown after a switch.
    pub fn children(&self) -> &[Control] {
        match self {
            Control::Switch(s) => s.active_group().map(|g| g.controls.as_slice()).unwrap_or(&[]),
            _ => &[],
        }
    }

    /// Message sent when the control first becomes visible.
    pub fn select(&self) -> Option<Message> {
        match self {
            Control::Switch(s) => s.active_group().and_then(|g| g.onselect.clone()),
            _ => None,
        }
    }

    /// Apply an encoder turn and return the messages to send.
    pub fn update_value(&mut self, increment: i32) -> Vec<Message> {
        match self {
            Control::Range(r) => {
                r.value = r.clamp(r.value + increment as f32 * r.step());
                vec![Message::new(
                    r.address.clone(),
                    Some(MessageValue::Float(r.value as f64)),
                )]
            }
            Control::Macro(m) => {
                m.value = (m.value + increment as f32 / RANGE_STEPS).clamp(0.0, 1.0);
                let value = m.value;
                m.params
                    .iter()
                    .map(|p| {
                        let scaled = p.min + value * (p.max - p.min);
                        Message::new(p.address.clone(), Some(MessageValue::Float(scaled as f64)))
                    })
                    .collect()
            }
            Control::Spacer | Control::SpacerAddress { .. } => Vec::new(),
            Control::Switch(s) => {
                if s.selector.rotate(increment, s.groups.len()) {
                    s.active_group().and_then(|g| g.onselect.clone()).into_iter().collect()
                } else {
                    Vec::new()
                }
            }
            Control::Menu(m) => {
                if m.selector.rotate(increment, m.items.len()) {
                    m.selected().and_then(|i| i.onselect.clone()).into_iter().collect()
                } else {
                    Vec::new()
                }
            }
        }
    }

    /// Apply a value reported by the engine for `address`.
    pub fn set_state(&mut self, address: &str, args: &[OscType]) {
        let Some(value) = first_number(args) else {
            return;
        };
        match self {
            Control::Range(r) => r.value = r.clamp(value),
            Control::Macro(m) => {
                if let Some(p) = m.params.iter().find(|p| p.address == address) {
                    let span = p.max - p.min;
                    if span != 0.0 {
                        m.value = ((value - p.min) / span).clamp(0.0, 1.0);
                    }
                }
            }
            Control::Spacer => {}
            Control::SpacerAddress { value: v, .. } => *v = Some(value),
            Control::Switch(s) => {
                let idx = value.max(0.0) as usize;
                if idx < s.groups.len() {
                    s.selector.set_index(idx);
                }
            }
            Control::Menu(m) => {
                let idx = value.max(0.0) as usize;
                if idx < m.items.len() {
                    m.selector.set_index(idx);
                }
            }
        }
    }
}
