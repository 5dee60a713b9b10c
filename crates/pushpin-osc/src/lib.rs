// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Shared OSC vocabulary for Pushpin.
//!
//! This crate defines the addresses, message values and modulation sources
//! that the controller exchanges with synth engines and with the control
//! surface bridge.

use rosc::{OscMessage, OscType};
use serde::{Deserialize, Serialize};

/// Prefix that turns a parameter address into its query address.
pub const QUERY_PREFIX: &str = "/q";

/// Asks an engine to report every modulation routing it holds.
pub const QUERY_ALL_MODS: &str = "/q/all_mods";

/// Prefix shared by every modulation source address.
pub const MOD_PREFIX: &str = "/mod/";

/// Surface bridge: encoder turned, args `(index: int, increment: int)`.
pub const SURFACE_ENCODER: &str = "/surface/encoder";

/// Surface bridge: button pressed, args `(name: string)`.
pub const SURFACE_BUTTON: &str = "/surface/button";

/// Loopback address on which engines listen.
pub const LOCALHOST: &str = "127.0.0.1";

/// Build the query address for a parameter address.
pub fn query_address(address: &str) -> String {
    format!("{}{}", QUERY_PREFIX, address)
}

/// A scalar value carried by an `onselect` message in instrument definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl MessageValue {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MessageValue::Int(i) => Some(*i as f64),
            MessageValue::Float(f) => Some(*f),
            MessageValue::Text(s) => s.parse().ok(),
        }
    }

    /// Integer view of the value, used for process ids.
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            MessageValue::Int(i) => u32::try_from(*i).ok(),
            MessageValue::Float(f) if *f >= 0.0 => Some(*f as u32),
            MessageValue::Float(_) => None,
            MessageValue::Text(s) => s.parse().ok(),
        }
    }

    pub fn to_osc(&self) -> OscType {
        match self {
            MessageValue::Int(i) => match i32::try_from(*i) {
                Ok(v) => OscType::Int(v),
                Err(_) => OscType::Long(*i),
            },
            MessageValue::Float(f) => OscType::Float(*f as f32),
            MessageValue::Text(s) => OscType::String(s.clone()),
        }
    }
}

/// An address plus optional value, as written in instrument definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub address: String,
    #[serde(default)]
    pub value: Option<MessageValue>,
    #[serde(default, rename = "$comment", skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl Message {
    pub fn new(address: impl Into<String>, value: Option<MessageValue>) -> Self {
        Self {
            address: address.into(),
            value,
            comment: None,
        }
    }

    /// Encode as an OSC message. A missing value yields no arguments.
    pub fn to_osc(&self) -> OscMessage {
        OscMessage {
            addr: self.address.clone(),
            args: self.value.iter().map(MessageValue::to_osc).collect(),
        }
    }

    /// Encode with any numeric value sent as a float. Engine parameters are floats.
    pub fn to_float_osc(&self) -> OscMessage {
        OscMessage {
            addr: self.address.clone(),
            args: self
                .value
                .iter()
                .map(|v| match v.as_f64() {
                    Some(f) => OscType::Float(f as f32),
                    None => v.to_osc(),
                })
                .collect(),
        }
    }
}

/// Extract the first numeric argument of an OSC message.
pub fn first_number(args: &[OscType]) -> Option<f32> {
    args.iter().find_map(number)
}

/// Numeric view of a single OSC argument.
pub fn number(arg: &OscType) -> Option<f32> {
    match arg {
        OscType::Float(f) => Some(*f),
        OscType::Double(d) => Some(*d as f32),
        OscType::Int(i) => Some(*i as f32),
        OscType::Long(l) => Some(*l as f32),
        OscType::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        OscType::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// A modulation source known to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModSource {
    pub address: &'static str,
    pub label: &'static str,
}

const fn src(address: &'static str, label: &'static str) -> ModSource {
    ModSource { address, label }
}

/// A named group of modulation sources.
#[derive(Debug, Clone, Copy)]
pub struct ModSourceCategory {
    pub label: &'static str,
    pub sources: &'static [ModSource],
}

pub const MOD_SOURCES_MACROS: &[ModSource] = &[
    src("/mod/macro_1", "Macro 1"),
    src("/mod/macro_2", "Macro 2"),
    src("/mod/macro_3", "Macro 3"),
    src("/mod/macro_4", "Macro 4"),
    src("/mod/macro_5", "Macro 5"),
    src("/mod/macro_6", "Macro 6"),
    src("/mod/macro_7", "Macro 7"),
    src("/mod/macro_8", "Macro 8"),
];

pub const MOD_SOURCES_INTERNAL: &[ModSource] = &[
    src("/mod/at", "Aftertouch"),
    src("/mod/breath", "Breath"),
    src("/mod/expr", "Expression"),
    src("/mod/sus", "Sustain"),
    src("/mod/pb", "Pitch Bend"),
    src("/mod/vel", "Velocity"),
    src("/mod/rel_vel", "Release Vel"),
    src("/mod/keytrk", "Keytrack"),
    src("/mod/pat", "Poly AT"),
    src("/mod/timbre", "Timbre"),
    src("/mod/mw", "ModWheel"),
    src("/mod/alt_bi", "Alt Bipolar"),
    src("/mod/alt_uni", "Alt Unipol."),
    src("/mod/rand_bi/0", "Rand Bi 0"),
    src("/mod/rand_uni/0", "Rand Uni 0"),
    src("/mod/rand_bi/1", "Rand Bi 1"),
    src("/mod/rand_uni/1", "Rand Uni 1"),
    src("/mod/a/lowest_key", "Lowest Key"),
    src("/mod/a/highest_key", "Highest Key"),
    src("/mod/a/latest_key", "Latest Key"),
];

pub const MOD_SOURCES_LFOS: &[ModSource] = &[
    src("/mod/a/feg", "Filter EG"),
    src("/mod/a/aeg", "Amp EG"),
    src("/mod/a/slfo_1/0", "LFO1"),
    src("/mod/a/slfo_1/1", "LFO1 WF"),
    src("/mod/a/slfo_1/2", "LFO1 EG"),
    src("/mod/a/slfo_2/0", "LFO2"),
    src("/mod/a/slfo_2/1", "LFO2 WF"),
    src("/mod/a/slfo_2/2", "LFO2 EG"),
    src("/mod/a/slfo_3/0", "LFO3"),
    src("/mod/a/slfo_3/1", "LFO3 WF"),
    src("/mod/a/slfo_3/2", "LFO3 EG"),
    src("/mod/a/slfo_4/0", "LFO4"),
    src("/mod/a/slfo_4/1", "LFO4 WF"),
    src("/mod/a/slfo_4/2", "LFO4 EG"),
    src("/mod/a/slfo_5/0", "LFO5"),
    src("/mod/a/slfo_5/1", "LFO5 WF"),
    src("/mod/a/slfo_5/2", "LFO5 EG"),
    src("/mod/a/slfo_6/0", "LFO6"),
    src("/mod/a/slfo_6/1", "LFO6 WF"),
    src("/mod/a/slfo_6/2", "LFO6 EG"),
];

/// Every source category, in the order shown on the surface.
pub const MOD_SOURCE_CATEGORIES: &[ModSourceCategory] = &[
    ModSourceCategory {
        label: "Macros",
        sources: MOD_SOURCES_MACROS,
    },
    ModSourceCategory {
        label: "Internal",
        sources: MOD_SOURCES_INTERNAL,
    },
    ModSourceCategory {
        label: "LFOs",
        sources: MOD_SOURCES_LFOS,
    },
];

/// Iterate over every known modulation source.
pub fn all_mod_sources() -> impl Iterator<Item = &'static ModSource> {
    MOD_SOURCE_CATEGORIES.iter().flat_map(|c| c.sources.iter())
}

/// Look up the display label of a modulation source address.
pub fn mod_source_label(address: &str) -> Option<&'static str> {
    all_mod_sources()
        .find(|s| s.address == address)
        .map(|s| s.label)
}
