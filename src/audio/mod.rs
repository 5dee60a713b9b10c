// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! PipeWire integration through its command-line tools.

pub mod connections;
pub mod loopback;
pub mod routing;
pub mod topology;
pub mod types;

pub use loopback::{LoopbackError, LoopbackSlots, SharedLoopbacks};
pub use routing::check_pipewire_tools;
pub use topology::{DumpFilter, Topology, TopologyError};
