//! Known Thrustmaster wheels and the code that switches each one into its
//! full-feature mode.
//!
//! Entries are keyed by the `(model, attachment)` pair the wheel reports in
//! its reply to the model query. Entries sharing a model code must stay
//! contiguous: [`resolve`] only looks for an attachment match within the run
//! that starts at the first entry for a model.
//!
//! The TMX is not listed. It needs two control packets to switch and is left
//! in generic mode.

#[cfg(feature = "serde")]
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct WheelInfo {
    pub model: u8,
    pub attachment: u8,
    /// Sent as `wValue` of the switch command.
    pub switch_value: u16,
    pub name: &'static str,
}

const fn wheel(model: u8, attachment: u8, switch_value: u16, name: &'static str) -> WheelInfo {
    WheelInfo {
        model,
        attachment,
        switch_value,
        name,
    }
}

static WHEELS: [WheelInfo; 8] = [
    wheel(0x00, 0x02, 0x0002, "Thrustmaster T500RS"),
    wheel(0x00, 0x09, 0x000b, "Thrustmaster T128"),
    wheel(0x02, 0x00, 0x0005, "Thrustmaster T300RS (Missing Attachment)"),
    wheel(0x02, 0x03, 0x0005, "Thrustmaster T300RS (F1 attachment)"),
    wheel(0x02, 0x04, 0x0005, "Thrustmaster T300 Ferrari Alcantara Edition"),
    wheel(0x02, 0x06, 0x0005, "Thrustmaster T300RS"),
    wheel(0x02, 0x09, 0x0005, "Thrustmaster T300RS (Open Wheel Attachment)"),
    wheel(0x03, 0x06, 0x0006, "Thrustmaster T150RS"),
];

/// All known wheels, in lookup order.
pub fn wheels() -> &'static [WheelInfo] {
    &WHEELS
}

/// Outcome of a catalog lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    pub wheel: &'static WheelInfo,
    /// `false` when no entry matched the attachment and the first entry for
    /// the model was used instead.
    pub attachment_matched: bool,
}

/// Find the catalog entry for a reported `(model, attachment)` pair.
///
/// Returns `None` only if the model itself is unknown. An unknown attachment
/// on a known model falls back to the first entry for that model.
pub fn resolve(model: u8, attachment: u8) -> Option<Resolved> {
    let start = WHEELS.iter().position(|w| w.model == model)?;
    let candidate = &WHEELS[start];

    let matched = WHEELS[start..]
        .iter()
        .take_while(|w| w.model == model)
        .find(|w| w.attachment == attachment);

    Some(match matched {
        Some(wheel) => Resolved {
            wheel,
            attachment_matched: true,
        },
        None => Resolved {
            wheel: candidate,
            attachment_matched: false,
        },
    })
}
