// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Per-column link bookkeeping for direct port routing.
//!
//! Each routing column holds at most one source. Planning is separate from
//! execution so that the table can be checked without PipeWire.

use super::routing::{self, RoutingError};
use super::types::StereoPair;
use tracing::{debug, warn};

/// Routing columns across both display halves.
pub const COLUMNS: usize = 8;

/// Columns per display half.
const COLUMNS_PER_SLOT: usize = COLUMNS / 2;

/// Routing column for an encoder turned on a device in display `slot`.
///
/// Two encoders share a column. Returns `None` for an unknown slot or knob.
pub fn column_for_knob(slot: u8, knob: usize) -> Option<usize> {
    if knob >= COLUMNS {
        return None;
    }
    match slot {
        0 => Some(knob / 2),
        1 => Some(knob / 2 + COLUMNS_PER_SLOT),
        _ => None,
    }
}

/// A single `pw-link` invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkAction {
    Link { output: u32, input: u32 },
    Unlink { output: u32, input: u32 },
}

impl LinkAction {
    pub fn execute(self) -> Result<(), RoutingError> {
        match self {
            LinkAction::Link { output, input } => routing::create_link(output, input),
            LinkAction::Unlink { output, input } => routing::destroy_link(output, input),
        }
    }
}

fn pair_actions(source: StereoPair, dest: StereoPair, link: bool) -> Vec<LinkAction> {
    let mut actions = Vec::with_capacity(2);
    for (output, input) in [(source.left, dest.left), (source.right, dest.right)] {
        if let (Some(output), Some(input)) = (output, input) {
            actions.push(if link {
                LinkAction::Link { output, input }
            } else {
                LinkAction::Unlink { output, input }
            });
        }
    }
    actions
}

/// Source ports currently linked into each column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionTable {
    slots: [StereoPair; COLUMNS],
}

impl ConnectionTable {
    #[cfg(test)]
    pub fn get(&self, column: usize) -> Option<StereoPair> {
        self.slots.get(column).copied()
    }

    /// Route `source` into `dest` on `column`, replacing whatever was there.
    ///
    /// Returns the links to remove and create, in order. Connecting the source
    /// already held by the column yields nothing.
    pub fn plan_connect(
        &mut self,
        column: usize,
        source: StereoPair,
        dest: StereoPair,
    ) -> Vec<LinkAction> {
        let Some(current) = self.slots.get_mut(column) else {
            warn!("Connection column {} out of range", column);
            return Vec::new();
        };
        if source.is_empty() || *current == source {
            return Vec::new();
        }
        let links = pair_actions(source, dest, true);
        if links.is_empty() {
            debug!("Column {}: destination ports not known yet", column);
            return Vec::new();
        }

        let mut actions = pair_actions(*current, dest, false);
        actions.extend(links);
        *current = source;
        debug!("Column {} now holds {:?}", column, source);
        actions
    }

    /// Remove whatever `column` routes into `dest`.
    pub fn plan_disconnect(&mut self, column: usize, dest: StereoPair) -> Vec<LinkAction> {
        let Some(current) = self.slots.get_mut(column) else {
            warn!("Connection column {} out of range", column);
            return Vec::new();
        };
        let actions = pair_actions(*current, dest, false);
        *current = StereoPair::default();
        actions
    }

    /// Forget all recorded sources and return the unlinks for them.
    pub fn plan_clear(&mut self, dest: StereoPair) -> Vec<LinkAction> {
        (0..COLUMNS)
            .flat_map(|column| self.plan_disconnect(column, dest))
            .collect()
    }
}

/// Run planned actions in order. A failed action is logged and the rest still run.
pub fn apply(actions: &[LinkAction]) -> usize {
    let mut failures = 0;
    for action in actions {
        if let Err(e) = action.execute() {
            warn!("{:?} failed: {}", action, e);
            failures += 1;
        }
    }
    failures
}
