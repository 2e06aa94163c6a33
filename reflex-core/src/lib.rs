pub mod element;
pub mod phase;
pub mod response;
pub mod stimulus;
pub mod trial;

pub use element::{ElementId, ElementTiming, NullHandle, VisualHandle};
pub use phase::TrialPhase;
pub use response::{ANY_MARKER, ANY_SYMBOLS, ResponseRecord, ResponseSet};
pub use stimulus::{ArrowDirection, Shape};
pub use trial::{EndAction, ParseEndActionError, TrialConfig, TrialRecord};
