// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Control definitions as written in instrument JSON files.

use pushpin_osc::Message;
use serde::{Deserialize, Deserializer, Serialize};

/// A control entry, tagged by its `$type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "$type")]
pub enum ControlDefinition {
    #[serde(rename = "control-range")]
    Range(RangeDefinition),
    #[serde(rename = "control-macro")]
    Macro(MacroDefinition),
    #[serde(rename = "control-spacer")]
    Spacer,
    #[serde(rename = "control-spacer-address")]
    SpacerAddress(SpacerAddressDefinition),
    #[serde(rename = "control-switch")]
    Switch(SwitchDefinition),
    #[serde(rename = "control-menu")]
    Menu(MenuDefinition),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeDefinition {
    #[serde(default)]
    pub label: String,
    pub address: String,
    #[serde(default)]
    pub min: f32,
    #[serde(default = "default_max")]
    pub max: f32,
    #[serde(default, deserialize_with = "flag")]
    pub bipolar: bool,
    #[serde(default, deserialize_with = "flag")]
    pub modmatrix: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroParam {
    pub address: String,
    #[serde(default)]
    pub min: f32,
    #[serde(default = "default_max")]
    pub max: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroDefinition {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub params: Vec<MacroParam>,
    #[serde(default, deserialize_with = "flag")]
    pub modmatrix: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpacerAddressDefinition {
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupDefinition {
    #[serde(default)]
    pub label: String,
    /// Process id of the instrument a routing group points at.
    #[serde(default)]
    pub pid: Option<String>,
    #[serde(default)]
    pub onselect: Option<Message>,
    #[serde(default)]
    pub controls: Vec<ControlDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchDefinition {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub groups: Vec<GroupDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuItemDefinition {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub onselect: Option<Message>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuDefinition {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub items: Vec<MenuItemDefinition>,
}

fn default_max() -> f32 {
    1.0
}

/// Accept `true`/`false` as well as `0`/`1` for boolean flags.
fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Number(f64),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Number(n) => n != 0.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_with_numeric_bipolar() {
        let def: ControlDefinition = serde_json::from_str(
            r#"{"$type": "control-range", "label": "Audio Channel",
                "address": "/param/a/osc/1/param1", "min": 0, "max": 1, "bipolar": 1}"#,
        )
        .unwrap();
        match def {
            ControlDefinition::Range(r) => {
                assert!(r.bipolar);
                assert!(!r.modmatrix);
                assert_eq!(r.max, 1.0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_spacer_and_switch() {
        let defs: Vec<ControlDefinition> = serde_json::from_str(
            r#"[
                {"$type": "control-spacer"},
                {"$type": "control-switch", "label": "Osc Type", "groups": [
                    {"$type": "group", "label": "Classic",
                     "onselect": {"$type": "message", "address": "/param/a/osc/1/type", "value": 0},
                     "controls": [{"$type": "control-range", "label": "Shape", "address": "/s"}]}
                ]}
            ]"#,
        )
        .unwrap();
        assert_eq!(defs[0], ControlDefinition::Spacer);
        match &defs[1] {
            ControlDefinition::Switch(s) => {
                assert_eq!(s.groups.len(), 1);
                assert_eq!(s.groups[0].controls.len(), 1);
                assert!(s.address.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let result: Result<ControlDefinition, _> =
            serde_json::from_str(r#"{"$type": "control-blob"}"#);
        assert!(result.is_err());
    }
}
