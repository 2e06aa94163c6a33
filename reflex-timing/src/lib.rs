//! Clocks, refresh-period estimation and frame pacing.
//!
//! Nothing here knows about stimuli: the scheduler asks a [`Clock`] for the
//! time, uses [`calc_frames`] to count refresh periods since its anchor, and
//! a [`RefreshEstimator`] turns the timestamps seen during a calibration
//! window into a period estimate.

pub mod estimate;
pub mod frames;
pub mod timer;

pub use estimate::{
    CalibrationStats, DEFAULT_REFRESH_PERIOD_MS, FRAME_BIAS_RATIO, RefreshEstimator, calc_frames,
    estimate_refresh_period, median,
};
pub use frames::{FALLBACK_FRAME_INTERVAL_MS, FrameSource, IntervalFrames, ScriptedFrames};
pub use timer::{
    Clock, ClockCapability, CoarseClock, HighPrecisionClock, HostClock, ManualClock,
    high_precision_sleep,
};
