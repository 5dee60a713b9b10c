// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Device pages shown on the control surface.

pub mod audio_in;
pub mod mod_matrix;
pub mod osc_device;

pub use audio_in::{AudioInDevice, RouteSource};
pub use mod_matrix::{ModDestination, ModMatrixDevice};
pub use osc_device::OscDevice;

use crate::config::{DeviceDefinition, DeviceKind};
use pushpin_osc::Message;
use rosc::OscMessage;

/// What a routing switch asks for on one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteChoice {
    Disconnect,
    /// Route from the instrument whose engine has this pid.
    Source(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteRequest {
    pub column: usize,
    pub choice: RouteChoice,
}

/// A device page of an instrument.
#[derive(Debug, Clone)]
pub enum Device {
    Osc(OscDevice),
    AudioIn(AudioInDevice),
}

impl Device {
    pub fn from_definition(def: &DeviceDefinition, instrument_label: &str) -> Self {
        match def.kind {
            DeviceKind::Osc => Device::Osc(OscDevice::from_definition(def)),
            DeviceKind::AudioIn => {
                Device::AudioIn(AudioInDevice::from_definition(def, instrument_label))
            }
        }
    }

    pub fn inner(&self) -> &OscDevice {
        match self {
            Device::Osc(d) => d,
            Device::AudioIn(d) => d.device(),
        }
    }

    pub fn inner_mut(&mut self) -> &mut OscDevice {
        match self {
            Device::Osc(d) => d,
            Device::AudioIn(d) => d.device_mut(),
        }
    }

    pub fn label(&self) -> &str {
        &self.inner().label
    }

    pub fn is_modmatrix(&self) -> bool {
        self.inner().modmatrix
    }

    pub fn select(&self) -> Vec<OscMessage> {
        self.inner().select()
    }

    /// Turn an encoder. Returns engine messages and routing requests.
    pub fn on_encoder(&mut self, index: usize, increment: i32) -> (Vec<Message>, Vec<RouteRequest>) {
        match self {
            Device::Osc(d) => (d.on_encoder(index, increment), Vec::new()),
            Device::AudioIn(d) => d.on_encoder(index, increment),
        }
    }

    pub fn query_visible(&self) -> Vec<OscMessage> {
        self.inner().query_visible()
    }

    pub fn query_all(&self) -> Vec<OscMessage> {
        self.inner().query_all()
    }

    pub fn handle(&mut self, message: &OscMessage) -> bool {
        self.inner_mut().handle(message)
    }

    pub fn page(&self) -> usize {
        self.inner().page()
    }

    pub fn set_page(&mut self, page: usize) -> bool {
        self.inner_mut().set_page(page)
    }

    pub fn next_prev(&self) -> (bool, bool) {
        self.inner().next_prev()
    }

    pub fn label_for(&self, address: &str) -> Option<&str> {
        self.inner().label_for(address)
    }

    /// The device as a mod-matrix destination, if it is one and has any targets.
    pub fn mod_destination(&self) -> Option<ModDestination> {
        if !self.is_modmatrix() {
            return None;
        }
        let controls = self.inner().mod_destinations();
        (!controls.is_empty()).then(|| ModDestination {
            label: self.label().to_string(),
            controls,
        })
    }

    /// Rebuild routing switches. No-op for plain OSC devices.
    pub fn update_routing(&mut self, sources: &[RouteSource]) {
        if let Device::AudioIn(d) = self {
            d.update(sources);
        }
    }
}
