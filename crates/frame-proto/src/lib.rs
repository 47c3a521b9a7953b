//! Shared wire definitions for host ↔ guest frame height synchronization.
//! Keeping this in a dedicated crate lets both sides of the handshake (and
//! bindings for other runtimes) depend on the message shapes without pulling
//! in the controllers.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

mod origin;

pub use origin::resolve_origin;

/// Height used when neither side has produced a better answer.
pub const DEFAULT_HEIGHT: u32 = 450;

/// Messages exchanged between the embedding page and the embedded document.
///
/// On the wire these are `{ "kind": "host-height", "pixels": 300 }` and
/// `{ "kind": "guest-height", "pixels": 620 }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum FrameMessage {
    /// Host-authoritative height; the guest locks to it.
    HostHeight {
        #[serde(deserialize_with = "pixels::deserialize")]
        pixels: u32,
    },
    /// Height the guest measured for its own content.
    GuestHeight {
        #[serde(deserialize_with = "pixels::deserialize")]
        pixels: u32,
    },
}

impl FrameMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            FrameMessage::HostHeight { .. } => "host-height",
            FrameMessage::GuestHeight { .. } => "guest-height",
        }
    }

    pub fn pixels(&self) -> u32 {
        match self {
            FrameMessage::HostHeight { pixels } | FrameMessage::GuestHeight { pixels } => *pixels,
        }
    }

    /// Decodes an inbound payload. Anything that is not one of our two
    /// shapes yields `None`; foreign traffic is expected on a shared bus.
    pub fn from_value(value: &Value) -> Option<Self> {
        Self::deserialize(value).ok()
    }

    pub fn to_value(&self) -> Value {
        json!({ "kind": self.kind(), "pixels": self.pixels() })
    }
}

/// Converts a raw numeric height into whole pixels. Negative, non-finite and
/// out-of-range values are rejected.
pub fn to_pixels(raw: f64) -> Option<u32> {
    if !raw.is_finite() || raw < 0.0 {
        return None;
    }
    let rounded = raw.round();
    if rounded > f64::from(u32::MAX) {
        return None;
    }
    Some(rounded as u32)
}

mod pixels {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawPixels {
        Number(f64),
        Text(String),
    }

    // Older senders stringify the height, so accept "300" as well as 300.
    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<u32, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = match RawPixels::deserialize(deserializer)? {
            RawPixels::Number(value) => value,
            RawPixels::Text(text) => text.trim().parse::<f64>().map_err(D::Error::custom)?,
        };
        super::to_pixels(raw)
            .ok_or_else(|| D::Error::custom(format!("invalid pixel value {raw}")))
    }
}
