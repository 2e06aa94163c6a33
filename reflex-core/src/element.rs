use std::fmt;

/// Opaque identity the scheduler hands out for every pushed display element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(pub u64);

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "el#{}", self.0)
    }
}

/// Something the scheduler can make visible and invisible.
///
/// The engine toggles visibility and nothing else: content, layout and
/// rasterization belong to the host.
pub trait VisualHandle {
    fn show(&mut self);
    fn hide(&mut self);
}

/// Handle for elements that only exist for their timing (init and storage
/// pages).
#[derive(Debug, Clone, Copy, Default)]
pub struct NullHandle;

impl VisualHandle for NullHandle {
    fn show(&mut self) {}
    fn hide(&mut self) {}
}

/// Timing fields of one display element, all in epoch milliseconds.
///
/// `display_onset`/`display_offset` are the projected refresh boundaries the
/// transition was scheduled for; the `*_time` fields are the clock readings
/// taken when the transition was processed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElementTiming {
    pub requested_at: f64,
    pub display_onset: Option<f64>,
    pub display_offset: Option<f64>,
    pub display_onset_time: Option<f64>,
    pub display_offset_time: Option<f64>,
    pub display_duration: Option<f64>,
}

impl ElementTiming {
    pub fn requested_at(requested_at: f64) -> Self {
        Self {
            requested_at,
            ..Self::default()
        }
    }
}
