// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Page layout: splitting a flat control list into fixed-width pages.
//!
//! The surface has eight encoders under the display, so a device shows its
//! controls eight at a time. A control that does not fit on the current page
//! moves to a fresh page and the gap it leaves behind is filled with spacers.
//! A switch is followed on the same page by the controls of its active group.

use crate::controls::Control;

/// Encoder slots per page.
pub const PAGE_WIDTH: usize = 8;

/// Location of a control inside a device's control list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControlPath {
    /// Index in the top-level list.
    pub index: usize,
    /// `(group, control)` inside a switch, for group children.
    pub child: Option<(usize, usize)>,
}

impl ControlPath {
    pub fn top(index: usize) -> Self {
        Self { index, child: None }
    }

    pub fn child(index: usize, group: usize, control: usize) -> Self {
        Self {
            index,
            child: Some((group, control)),
        }
    }
}

/// One encoder slot on a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageEntry {
    Control(ControlPath),
    /// Padding inserted when the next control did not fit.
    Spacer,
}

pub type Page = Vec<PageEntry>;

/// Controls laid out into pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pages: Vec<Page>,
}

impl Layout {
    pub fn build(controls: &[Control]) -> Self {
        let mut pages: Vec<Page> = Vec::new();
        let mut current: Page = Vec::new();

        for (index, control) in controls.iter().enumerate() {
            if !current.is_empty() && current.len() + control.size() > PAGE_WIDTH {
                let missing = PAGE_WIDTH.saturating_sub(current.len());
                current.extend(std::iter::repeat(PageEntry::Spacer).take(missing));
                pages.push(std::mem::take(&mut current));
            }

            current.push(PageEntry::Control(ControlPath::top(index)));
            if let Control::Switch(switch) = control {
                let group = switch.active_index();
                for child in 0..control.children().len() {
                    current.push(PageEntry::Control(ControlPath::child(index, group, child)));
                }
            }
        }
        pages.push(current);

        Self { pages }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Entries of a page, empty when the page does not exist.
    pub fn page(&self, page: usize) -> &[PageEntry] {
        self.pages.get(page).map(|p| p.as_slice()).unwrap_or(&[])
    }

    /// Whether previous/next page buttons should be offered from `page`.
    pub fn next_prev(&self, page: usize) -> (bool, bool) {
        (page > 0, page + 1 < self.pages.len())
    }

    /// Every entry of every page, in display order.
    pub fn entries(&self) -> impl Iterator<Item = &PageEntry> {
        self.pages.iter().flatten()
    }

    /// Every control path of every page, skipping padding.
    pub fn control_paths(&self) -> impl Iterator<Item = ControlPath> + '_ {
        self.entries().filter_map(|e| match e {
            PageEntry::Control(path) => Some(*path),
            PageEntry::Spacer => None,
        })
    }
}

/// Total number of slots the controls need, ignoring padding.
pub fn total_size(controls: &[Control]) -> usize {
    controls.iter().map(Control::size).sum()
}

/// Resolve a path against a control list.
pub fn resolve(controls: &[Control], path: ControlPath) -> Option<&Control> {
    let top = controls.get(path.index)?;
    match (top, path.child) {
        (_, None) => Some(top),
        (Control::Switch(s), Some((group, child))) => s.groups.get(group)?.controls.get(child),
        _ => None,
    }
}

/// Resolve a path against a control list, mutably.
pub fn resolve_mut(controls: &mut [Control], path: ControlPath) -> Option<&mut Control> {
    let top = controls.get_mut(path.index)?;
    match path.child {
        None => Some(top),
        Some((group, child)) => match top {
            Control::Switch(s) => s.groups.get_mut(group)?.controls.get_mut(child),
            _ => None,
        },
    }
}

/// Every path in a control list, including children of every switch group.
pub fn all_paths(controls: &[Control]) -> Vec<ControlPath> {
    let mut paths = Vec::new();
    for (index, control) in controls.iter().enumerate() {
        paths.push(ControlPath::top(index));
        if let Control::Switch(s) = control {
            for (g, group) in s.groups.iter().enumerate() {
                for c in 0..group.controls.len() {
                    paths.push(ControlPath::child(index, g, c));
                }
            }
        }
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controls::{ControlDefinition, DETENTS_PER_ITEM};

    fn range(n: usize) -> Control {
        let def: ControlDefinition = serde_json::from_str(&format!(
            r#"{{"$type": "control-range", "label": "R{n}", "address": "/r/{n}"}}"#
        ))
        .unwrap();
        Control::from_definition(&def)
    }

    fn switch(children: usize) -> Control {
        let controls: Vec<String> = (0..children)
            .map(|c| format!(r#"{{"$type": "control-range", "address": "/s/{c}"}}"#))
            .collect();
        let def: ControlDefinition = serde_json::from_str(&format!(
            r#"{{"$type": "control-switch", "groups": [
                {{"label": "A", "controls": [{}]}},
                {{"label": "B", "controls": []}}
            ]}}"#,
            controls.join(",")
        ))
        .unwrap();
        Control::from_definition(&def)
    }

    #[test]
    fn test_empty_list_has_one_empty_page() {
        let layout = Layout::build(&[]);
        assert_eq!(layout.page_count(), 1);
        assert!(layout.page(0).is_empty());
        assert_eq!(layout.next_prev(0), (false, false));
    }

    #[test]
    fn test_exact_fit_stays_on_one_page() {
        let controls: Vec<Control> = (0..8).map(range).collect();
        let layout = Layout::build(&controls);
        assert_eq!(layout.page_count(), 1);
        assert_eq!(layout.page(0).len(), 8);
    }

    #[test]
    fn test_overflow_starts_unpadded_page() {
        let controls: Vec<Control> = (0..10).map(range).collect();
        let layout = Layout::build(&controls);
        assert_eq!(layout.page_count(), 2);
        assert_eq!(layout.page(1).len(), 2);
        assert_eq!(layout.page(1)[0], PageEntry::Control(ControlPath::top(8)));
        assert_eq!(layout.next_prev(0), (false, true));
        assert_eq!(layout.next_prev(1), (true, false));
    }

    #[test]
    fn test_switch_that_does_not_fit_pads_previous_page() {
        let mut controls: Vec<Control> = (0..6).map(range).collect();
        controls.push(switch(3));
        let layout = Layout::build(&controls);

        assert_eq!(layout.page_count(), 2);
        assert_eq!(layout.page(0).len(), PAGE_WIDTH);
        assert_eq!(layout.page(0)[6], PageEntry::Spacer);
        assert_eq!(layout.page(0)[7], PageEntry::Spacer);
        assert_eq!(
            layout.page(1),
            &[
                PageEntry::Control(ControlPath::top(6)),
                PageEntry::Control(ControlPath::child(6, 0, 0)),
                PageEntry::Control(ControlPath::child(6, 0, 1)),
                PageEntry::Control(ControlPath::child(6, 0, 2)),
            ]
        );
    }

    #[test]
    fn test_pages_follow_active_group() {
        let mut controls = vec![switch(2)];
        assert_eq!(Layout::build(&controls).page(0).len(), 3);
        controls[0].update_value(DETENTS_PER_ITEM);
        assert_eq!(Layout::build(&controls).page(0).len(), 1);
        assert_eq!(total_size(&controls), 1);
    }

    #[test]
    fn test_four_routing_style_switches_fill_one_page() {
        let controls: Vec<Control> = (0..4).map(|_| switch(1)).collect();
        let layout = Layout::build(&controls);
        assert_eq!(layout.page_count(), 1);
        assert_eq!(layout.page(0).len(), 8);
    }

    #[test]
    fn test_resolve_paths() {
        let controls = vec![range(0), switch(2)];
        assert_eq!(resolve(&controls, ControlPath::top(0)).unwrap().label(), "R0");
        let child = resolve(&controls, ControlPath::child(1, 0, 1)).unwrap();
        assert_eq!(child.address(), Some("/s/1"));
        assert!(resolve(&controls, ControlPath::child(0, 0, 0)).is_none());
        assert!(resolve(&controls, ControlPath::top(9)).is_none());
        assert_eq!(all_paths(&controls).len(), 4);
    }

    #[test]
    fn test_out_of_range_page_is_empty() {
        let layout = Layout::build(&[range(0)]);
        assert!(layout.page(3).is_empty());
        assert_eq!(layout.control_paths().count(), 1);
    }
}
