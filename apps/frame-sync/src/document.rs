use std::sync::Arc;

use parking_lot::Mutex;

/// The slice of the embedded document the guest reporter touches.
pub trait Document: Send {
    /// Rendered height of the body, in pixels.
    fn content_height(&self) -> u32;

    /// Turns off the document's own vertical scrolling; the host frame
    /// decides how much is visible.
    fn hide_vertical_overflow(&mut self);

    /// Forces the body to an explicit pixel height.
    fn set_height(&mut self, pixels: u32);
}

pub type SharedDocument<D> = Arc<Mutex<D>>;

/// In-memory stand-in for a rendered document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatedDocument {
    content_height: u32,
    explicit_height: Option<u32>,
    overflow_hidden: bool,
    overflow_toggles: u32,
}

impl SimulatedDocument {
    pub fn new(content_height: u32) -> Self {
        Self {
            content_height,
            ..Self::default()
        }
    }

    pub fn shared(content_height: u32) -> SharedDocument<Self> {
        Arc::new(Mutex::new(Self::new(content_height)))
    }

    /// Simulates a reflow of the natural content.
    pub fn set_content_height(&mut self, pixels: u32) {
        self.content_height = pixels;
    }

    pub fn explicit_height(&self) -> Option<u32> {
        self.explicit_height
    }

    pub fn overflow_hidden(&self) -> bool {
        self.overflow_hidden
    }

    pub(crate) fn overflow_toggles(&self) -> u32 {
        self.overflow_toggles
    }
}

impl Document for SimulatedDocument {
    // An explicit body height wins over the natural content height, as the
    // body's offset height would.
    fn content_height(&self) -> u32 {
        self.explicit_height.unwrap_or(self.content_height)
    }

    fn hide_vertical_overflow(&mut self) {
        self.overflow_hidden = true;
        self.overflow_toggles += 1;
    }

    fn set_height(&mut self, pixels: u32) {
        self.explicit_height = Some(pixels);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_height_overrides_content() {
        let mut doc = SimulatedDocument::new(812);
        assert_eq!(doc.content_height(), 812);
        doc.set_height(500);
        doc.set_content_height(900);
        assert_eq!(doc.content_height(), 500);
        assert_eq!(doc.explicit_height(), Some(500));
    }
}
