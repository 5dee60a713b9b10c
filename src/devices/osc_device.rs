// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A paged device whose controls are bound to engine OSC addresses.

use crate::config::DeviceDefinition;
use crate::controls::Control;
use crate::layout::{self, ControlPath, Layout, PageEntry};
use crate::osc::Dispatcher;
use pushpin_osc::Message;
use rosc::OscMessage;
use tracing::{debug, trace};

#[derive(Debug, Clone)]
pub struct OscDevice {
    pub label: String,
    pub slot: Option<u8>,
    pub modmatrix: bool,
    init: Vec<Message>,
    controls: Vec<Control>,
    dispatcher: Dispatcher<ControlPath>,
    page: usize,
}

impl OscDevice {
    pub fn from_definition(def: &DeviceDefinition) -> Self {
        let controls = def.controls.iter().map(Control::from_definition).collect();
        Self::new(&def.name, def.slot, def.modmatrix, def.init.clone(), controls)
    }

    pub fn new(
        label: &str,
        slot: Option<u8>,
        modmatrix: bool,
        init: Vec<Message>,
        controls: Vec<Control>,
    ) -> Self {
        let mut device = Self {
            label: label.to_string(),
            slot,
            modmatrix,
            init,
            controls,
            dispatcher: Dispatcher::default(),
            page: 0,
        };
        device.remap();
        device
    }

    /// Rebuild the address map after the control list changed.
    fn remap(&mut self) {
        self.dispatcher.clear();
        for path in layout::all_paths(&self.controls) {
            if let Some(control) = layout::resolve(&self.controls, path) {
                for address in control.listen_addresses() {
                    self.dispatcher.map(address, path);
                }
            }
        }
        let layout = self.layout();
        trace!(
            "Device '{}': {} controls in {} slots over {} page(s), {} addresses",
            self.label,
            layout.control_paths().count(),
            layout::total_size(&self.controls),
            layout.page_count(),
            self.dispatcher.len()
        );
    }

    pub fn controls(&self) -> &[Control] {
        &self.controls
    }

    /// Keep the first `len` controls and append `extra`.
    pub fn replace_tail(&mut self, len: usize, extra: Vec<Control>) {
        self.controls.truncate(len);
        self.controls.extend(extra);
        self.remap();
        self.clamp_page();
    }

    pub fn layout(&self) -> Layout {
        Layout::build(&self.controls)
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn next_prev(&self) -> (bool, bool) {
        self.layout().next_prev(self.page)
    }

    /// Move to `page` if it exists. Returns whether the page changed.
    pub fn set_page(&mut self, page: usize) -> bool {
        if page == self.page || page >= self.layout().page_count() {
            return false;
        }
        self.page = page;
        debug!("Device '{}' page {}", self.label, page);
        true
    }

    fn clamp_page(&mut self) {
        let count = self.layout().page_count();
        if self.page >= count {
            self.page = count.saturating_sub(1);
        }
    }

    /// Paths of the controls on the current page, by encoder slot.
    pub fn visible(&self) -> Vec<Option<ControlPath>> {
        self.layout()
            .page(self.page)
            .iter()
            .map(|entry| match entry {
                PageEntry::Control(path) => Some(*path),
                PageEntry::Spacer => None,
            })
            .collect()
    }

    pub fn control(&self, path: ControlPath) -> Option<&Control> {
        layout::resolve(&self.controls, path)
    }

    /// Init messages followed by the select messages of visible controls.
    pub fn select(&self) -> Vec<OscMessage> {
        let mut out: Vec<OscMessage> = self.init.iter().map(Message::to_float_osc).collect();
        for path in self.visible().into_iter().flatten() {
            if let Some(msg) = self.control(path).and_then(Control::select) {
                out.push(msg.to_osc());
            }
        }
        out
    }

    /// Turn encoder `index` on the current page.
    pub fn on_encoder(&mut self, index: usize, increment: i32) -> Vec<Message> {
        let Some(Some(path)) = self.visible().get(index).copied() else {
            return Vec::new();
        };
        let page_count = self.layout().page_count();
        let out = layout::resolve_mut(&mut self.controls, path)
            .map(|control| control.update_value(increment))
            .unwrap_or_default();

        // A switch may have changed group and with it the page layout.
        if self.layout().page_count() != page_count {
            self.clamp_page();
        }
        out
    }

    fn queries<'a>(&self, paths: impl Iterator<Item = &'a ControlPath>) -> Vec<OscMessage> {
        paths
            .filter_map(|path| self.control(*path))
            .filter_map(Control::query)
            .map(|m| m.to_osc())
            .collect()
    }

    pub fn query_visible(&self) -> Vec<OscMessage> {
        let visible: Vec<ControlPath> = self.visible().into_iter().flatten().collect();
        self.queries(visible.iter())
    }

    pub fn query_all(&self) -> Vec<OscMessage> {
        let paths = layout::all_paths(&self.controls);
        self.queries(paths.iter())
    }

    /// Apply an incoming message. Returns whether any control took it.
    pub fn handle(&mut self, message: &OscMessage) -> bool {
        if self.dispatcher.is_empty() {
            return false;
        }
        let targets = self.dispatcher.targets(&message.addr).to_vec();
        for path in &targets {
            if let Some(control) = layout::resolve_mut(&mut self.controls, *path) {
                control.set_state(&message.addr, &message.args);
            }
        }
        !targets.is_empty()
    }

    /// Label of the control bound to `address`, if any.
    pub fn label_for(&self, address: &str) -> Option<&str> {
        self.dispatcher
            .targets(address)
            .first()
            .and_then(|path| self.control(*path))
            .map(Control::label)
    }

    /// `(label, address)` of every control that may be a mod-matrix destination.
    pub fn mod_destinations(&self) -> Vec<(String, String)> {
        layout::all_paths(&self.controls)
            .into_iter()
            .filter_map(|path| self.control(path))
            .filter(|c| c.is_modmatrix())
            .filter_map(|c| {
                let address = c.address().or_else(|| c.listen_addresses().first().copied())?;
                Some((c.label().to_string(), address.to_string()))
            })
            .collect()
    }
}
