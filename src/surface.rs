// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Control-surface events received over OSC.
//!
//! A bridge process forwards the hardware's encoders and buttons as
//! `/surface/encoder <index> <increment>` and `/surface/button <name>`.
//! Button names follow the hardware labels, e.g. `Upper Row 3` or `Page Left`.

use pushpin_osc::{number, SURFACE_BUTTON, SURFACE_ENCODER};
use rosc::{OscMessage, OscType};

/// Buttons per row above and below the display.
pub const ROW_BUTTONS: u8 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    /// Above the display, numbered from 0.
    UpperRow(u8),
    /// Below the display, numbered from 0.
    LowerRow(u8),
    PageLeft,
    PageRight,
    Clip,
}

impl Button {
    /// Parse a button name. Case, spaces and underscores are not significant.
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized: String = name
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();

        let row = |prefix: &str| -> Option<u8> {
            let n: u8 = normalized.strip_prefix(prefix)?.parse().ok()?;
            (1..=ROW_BUTTONS).contains(&n).then(|| n - 1)
        };

        match normalized.as_str() {
            "pageleft" => Some(Self::PageLeft),
            "pageright" => Some(Self::PageRight),
            "clip" => Some(Self::Clip),
            _ => row("upperrow")
                .map(Self::UpperRow)
                .or_else(|| row("lowerrow").map(Self::LowerRow)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceEvent {
    Encoder { index: usize, increment: i32 },
    Button(Button),
}

impl SurfaceEvent {
    /// Decode a surface message. Unknown addresses and malformed arguments yield `None`.
    pub fn from_osc(message: &OscMessage) -> Option<Self> {
        match message.addr.as_str() {
            SURFACE_ENCODER => {
                let index = number(message.args.first()?)?;
                let increment = number(message.args.get(1)?)?;
                if index < 0.0 {
                    return None;
                }
                Some(Self::Encoder {
                    index: index as usize,
                    increment: increment as i32,
                })
            }
            SURFACE_BUTTON => match message.args.first()? {
                OscType::String(name) => Button::from_name(name).map(Self::Button),
                _ => None,
            },
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(addr: &str, args: Vec<OscType>) -> OscMessage {
        OscMessage {
            addr: addr.to_string(),
            args,
        }
    }

    #[test]
    fn test_button_names() {
        assert_eq!(Button::from_name("Upper Row 1"), Some(Button::UpperRow(0)));
        assert_eq!(Button::from_name("lower_row_8"), Some(Button::LowerRow(7)));
        assert_eq!(Button::from_name("Page Right"), Some(Button::PageRight));
        assert_eq!(Button::from_name("CLIP"), Some(Button::Clip));
        assert_eq!(Button::from_name("Upper Row 9"), None);
        assert_eq!(Button::from_name("Upper Row 0"), None);
        assert_eq!(Button::from_name("Play"), None);
    }

    #[test]
    fn test_encoder_event() {
        let event = SurfaceEvent::from_osc(&msg(
            SURFACE_ENCODER,
            vec![OscType::Int(3), OscType::Int(-2)],
        ));
        assert_eq!(
            event,
            Some(SurfaceEvent::Encoder {
                index: 3,
                increment: -2
            })
        );
        assert!(SurfaceEvent::from_osc(&msg(SURFACE_ENCODER, vec![OscType::Int(3)])).is_none());
        assert!(SurfaceEvent::from_osc(&msg(
            SURFACE_ENCODER,
            vec![OscType::Int(-1), OscType::Int(1)]
        ))
        .is_none());
    }

    #[test]
    fn test_huge_increment_saturates() {
        let event = SurfaceEvent::from_osc(&msg(
            SURFACE_ENCODER,
            vec![OscType::Int(0), OscType::Float(1e12)],
        ));
        assert_eq!(
            event,
            Some(SurfaceEvent::Encoder {
                index: 0,
                increment: i32::MAX
            })
        );
    }

    #[test]
    fn test_button_event() {
        let event = SurfaceEvent::from_osc(&msg(
            SURFACE_BUTTON,
            vec![OscType::String("Page Left".into())],
        ));
        assert_eq!(event, Some(SurfaceEvent::Button(Button::PageLeft)));
        assert!(SurfaceEvent::from_osc(&msg(SURFACE_BUTTON, vec![OscType::Int(1)])).is_none());
        assert!(SurfaceEvent::from_osc(&msg("/other", vec![])).is_none());
    }
}
