//! Frame-synchronised stimulus presentation.
//!
//! A [`Session`] owns one block of trials. Stimuli are declared as
//! [`StimulusSpec`]s, grouped into pages by the [`PageController`], resolved
//! against persisted configuration by the [`ConfigResolver`] and shown and
//! hidden on projected refresh boundaries by the [`FrameScheduler`]. Key
//! presses go through [`ResponseCapture`], which latches one reaction time per
//! capturing stimulus.

pub mod capture;
pub mod config;
pub mod page;
pub mod scheduler;
pub mod session;
pub mod stimulus;

pub use capture::{InputOutcome, ResponseCapture};
pub use config::{
    ConfigError, ConfigOption, ConfigOverrides, ConfigResolver, EngineConfig, Millis,
};
pub use page::{ActivatedStimulus, PageActivation, PageContext, PageController};
pub use scheduler::{
    ActiveStimulus, ClockState, DisplayElement, FrameEvent, FrameScheduler, TickReport,
    is_valid_period,
};
pub use session::{INIT_POST_ID, PageHost, STORAGE_ID, Session, TrialParams};
pub use stimulus::{
    ActivateFn, Conditional, ElementFn, Lifecycle, ResponseCallbacks, ResponseFn, StimulusKind,
    StimulusSpec,
};
