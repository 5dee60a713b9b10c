// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Clip menu mode: MIDI-style 0..127 controls grouped into sections.

use crate::config::{ClipSection, InstrumentDefinition};
use crate::layout::PAGE_WIDTH;
use pushpin_osc::{Message, MessageValue};
use std::collections::HashMap;
use tracing::debug;

pub const CLIP_VALUE_MAX: u8 = 127;
pub const CLIP_VALUE_DEFAULT: u8 = 64;

/// Controls per section in the default layout.
const DEFAULT_SECTION_SIZE: usize = 16;
/// Controls in the default layout.
const DEFAULT_CONTROL_COUNT: usize = 128;

#[derive(Debug, Clone, PartialEq)]
pub struct ClipControl {
    pub name: String,
    pub address: String,
    pub min: f32,
    pub max: f32,
    pub section: String,
    pub value: u8,
    /// Raw value (as string) to display label.
    pub value_labels: HashMap<String, String>,
}

impl ClipControl {
    pub fn new(name: &str, address: &str, min: f32, max: f32, section: &str) -> Self {
        Self {
            name: name.to_string(),
            address: address.to_string(),
            min,
            max,
            section: section.to_string(),
            value: CLIP_VALUE_DEFAULT,
            value_labels: HashMap::new(),
        }
    }

    /// The value mapped into `[min, max]`.
    pub fn scaled(&self) -> f32 {
        self.min + (self.value as f32 / CLIP_VALUE_MAX as f32) * (self.max - self.min)
    }

    pub fn update_value(&mut self, increment: i32) -> Message {
        self.value = (self.value as i32)
            .saturating_add(increment)
            .clamp(0, CLIP_VALUE_MAX as i32) as u8;
        Message::new(
            self.address.clone(),
            Some(MessageValue::Float(self.scaled() as f64)),
        )
    }

    pub fn display_value(&self) -> String {
        let raw = self.value.to_string();
        self.value_labels.get(&raw).cloned().unwrap_or(raw)
    }
}

fn default_controls() -> Vec<ClipControl> {
    (0..DEFAULT_CONTROL_COUNT)
        .map(|i| {
            let start = i / DEFAULT_SECTION_SIZE * DEFAULT_SECTION_SIZE;
            let section = format!("{} to {}", start, start + DEFAULT_SECTION_SIZE - 1);
            ClipControl::new(&format!("CC {}", i), &format!("/cc/{}", i), 0.0, 1.0, &section)
        })
        .collect()
}

fn controls_from_sections(sections: &[ClipSection]) -> Vec<ClipControl> {
    let mut out = Vec::new();
    for section in sections {
        for def in &section.controls {
            let mut control = ClipControl::new(&def.0, &def.1, def.2, def.3, &section.section);
            if let Some(labels) = section.control_value_label_maps.get(&def.0) {
                control.value_labels = labels.clone();
            }
            out.push(control);
        }
    }
    out
}

/// One instrument's clip menu.
#[derive(Debug, Clone)]
pub struct ClipMenu {
    controls: Vec<ClipControl>,
    section: String,
    page: usize,
}

impl ClipMenu {
    pub fn new(controls: Vec<ClipControl>) -> Self {
        let section = controls
            .first()
            .map(|c| c.section.clone())
            .unwrap_or_default();
        Self {
            controls,
            section,
            page: 0,
        }
    }

    /// From the instrument's `clip` sections, or the default CC layout.
    pub fn from_definition(def: &InstrumentDefinition) -> Self {
        match &def.clip {
            Some(sections) if !sections.is_empty() => Self::new(controls_from_sections(sections)),
            _ => Self::new(default_controls()),
        }
    }

    /// Section names in first-seen order.
    pub fn sections(&self) -> Vec<&str> {
        let mut sections: Vec<&str> = Vec::new();
        for control in &self.controls {
            if !sections.contains(&control.section.as_str()) {
                sections.push(&control.section);
            }
        }
        sections
    }

    pub fn section(&self) -> &str {
        &self.section
    }

    pub fn page(&self) -> usize {
        self.page
    }

    fn section_indices(&self) -> Vec<usize> {
        self.controls
            .iter()
            .enumerate()
            .filter(|(_, c)| c.section == self.section)
            .map(|(i, _)| i)
            .collect()
    }

    fn visible_indices(&self) -> Vec<usize> {
        self.section_indices()
            .into_iter()
            .skip(self.page * PAGE_WIDTH)
            .take(PAGE_WIDTH)
            .collect()
    }

    pub fn visible(&self) -> Vec<&ClipControl> {
        self.visible_indices()
            .into_iter()
            .map(|i| &self.controls[i])
            .collect()
    }

    fn page_count(&self) -> usize {
        self.section_indices().len().div_ceil(PAGE_WIDTH)
    }

    /// Whether pages exist before and after the current one.
    pub fn next_prev(&self) -> (bool, bool) {
        (self.page > 0, self.page + 1 < self.page_count())
    }

    /// Switch to the section at `index`, on its first page.
    pub fn select_section(&mut self, index: usize) -> bool {
        let Some(name) = self.sections().get(index).map(|s| s.to_string()) else {
            return false;
        };
        debug!("Clip section '{}'", name);
        self.section = name;
        self.page = 0;
        true
    }

    pub fn page_left(&mut self) -> bool {
        if !self.next_prev().0 {
            return false;
        }
        self.page -= 1;
        true
    }

    pub fn page_right(&mut self) -> bool {
        if !self.next_prev().1 {
            return false;
        }
        self.page += 1;
        true
    }

    pub fn on_encoder(&mut self, index: usize, increment: i32) -> Option<Message> {
        let i = *self.visible_indices().get(index)?;
        let control = &mut self.controls[i];
        let message = control.update_value(increment);
        debug!("Clip '{}' = {}", control.name, control.display_value());
        Some(message)
    }
}

/// Clip menus of every instrument, by short name.
#[derive(Debug, Clone, Default)]
pub struct ClipMenuMode {
    menus: HashMap<String, ClipMenu>,
}

impl ClipMenuMode {
    pub fn new<'a>(definitions: impl IntoIterator<Item = &'a InstrumentDefinition>) -> Self {
        Self {
            menus: definitions
                .into_iter()
                .map(|d| (d.instrument_short_name.clone(), ClipMenu::from_definition(d)))
                .collect(),
        }
    }

    #[cfg(test)]
    pub fn menu(&self, short_name: &str) -> Option<&ClipMenu> {
        self.menus.get(short_name)
    }

    pub fn menu_mut(&mut self, short_name: &str) -> Option<&mut ClipMenu> {
        self.menus.get_mut(short_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(clip: serde_json::Value) -> InstrumentDefinition {
        serde_json::from_value(serde_json::json!({
            "instrument_name": "Digitakt",
            "instrument_short_name": "digitakt",
            "clip": clip,
        }))
        .unwrap()
    }

    #[test]
    fn test_default_layout() {
        let menu = ClipMenu::from_definition(&definition(serde_json::Value::Null));
        let sections = menu.sections();
        assert_eq!(sections.len(), 8);
        assert_eq!(sections[0], "0 to 15");
        assert_eq!(sections[7], "112 to 127");
        assert_eq!(menu.section(), "0 to 15");
        let names: Vec<&str> = menu.visible().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["CC 0", "CC 1", "CC 2", "CC 3", "CC 4", "CC 5", "CC 6", "CC 7"]);
        assert_eq!(menu.visible()[3].address, "/cc/3");
        assert_eq!(menu.next_prev(), (false, true));
    }

    #[test]
    fn test_paging_and_sections() {
        let mut menu = ClipMenu::from_definition(&definition(serde_json::Value::Null));
        assert!(!menu.page_left());
        assert!(menu.page_right());
        assert_eq!(menu.visible()[0].name, "CC 8");
        assert!(!menu.page_right());
        assert_eq!(menu.next_prev(), (true, false));

        assert!(menu.select_section(2));
        assert_eq!(menu.page(), 0);
        assert_eq!(menu.visible()[0].name, "CC 32");
        assert!(!menu.select_section(8));
        assert_eq!(menu.section(), "32 to 47");
    }

    #[test]
    fn test_encoder_scales_value() {
        let mut menu = ClipMenu::from_definition(&definition(serde_json::json!([
            {"section": "Filter", "controls": [["Cutoff", "/cut", 20.0, 147.0], ["Reso", "/res", 0, 1]],
             "control_value_label_maps": {"Reso": {"0": "off"}}}
        ])));
        let msg = menu.on_encoder(0, 63).unwrap();
        assert_eq!(msg.address, "/cut");
        assert_eq!(msg.value, Some(MessageValue::Float(147.0)));

        let msg = menu.on_encoder(1, -200).unwrap();
        assert_eq!(msg.value, Some(MessageValue::Float(0.0)));
        assert_eq!(menu.visible()[1].display_value(), "off");
        assert_eq!(menu.visible()[0].display_value(), "127");
        assert!(menu.on_encoder(2, 1).is_none());
    }

    #[test]
    fn test_encoder_extreme_increments_saturate() {
        let mut menu = ClipMenu::from_definition(&definition(serde_json::Value::Null));
        menu.on_encoder(0, i32::MAX);
        let msg = menu.on_encoder(0, i32::MAX).unwrap();
        assert_eq!(msg.value, Some(MessageValue::Float(1.0)));
        assert_eq!(menu.visible()[0].value, CLIP_VALUE_MAX);
        let msg = menu.on_encoder(0, i32::MIN).unwrap();
        assert_eq!(msg.value, Some(MessageValue::Float(0.0)));
    }

    #[test]
    fn test_mode_keeps_menu_per_instrument() {
        let defs = vec![
            definition(serde_json::Value::Null),
            InstrumentDefinition::new("Surge XT 1", "surge1"),
        ];
        let mut mode = ClipMenuMode::new(&defs);
        mode.menu_mut("digitakt").unwrap().select_section(3);
        assert_eq!(mode.menu("digitakt").unwrap().section(), "48 to 63");
        assert_eq!(mode.menu("surge1").unwrap().section(), "0 to 15");
        assert!(mode.menu("missing").is_none());
    }
}
