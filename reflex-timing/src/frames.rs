use crate::timer::{Clock, ClockCapability, ManualClock, high_precision_sleep};
use std::time::Duration;

/// Interval used when the host has no native frame callback.
pub const FALLBACK_FRAME_INTERVAL_MS: f64 = 16.66;

/// Recurring frame opportunity that drives the scheduler.
pub trait FrameSource {
    /// Waits for the next frame and returns its timestamp in epoch ms.
    fn next_frame(&mut self) -> f64;

    fn capability(&self) -> ClockCapability;
}

/// Fixed-interval pacing for hosts without a vsync-driven callback.
///
/// Each call sleeps until one interval after the previous frame, so a slow
/// caller gets the next frame immediately instead of drifting further.
#[derive(Debug, Clone)]
pub struct IntervalFrames<C: Clock> {
    clock: C,
    interval_ms: f64,
    last_frame: f64,
}

impl<C: Clock> IntervalFrames<C> {
    pub fn new(clock: C) -> Self {
        Self::with_interval(clock, FALLBACK_FRAME_INTERVAL_MS)
    }

    pub fn with_interval(clock: C, interval_ms: f64) -> Self {
        Self {
            clock,
            interval_ms,
            last_frame: 0.0,
        }
    }
}

impl<C: Clock> FrameSource for IntervalFrames<C> {
    fn next_frame(&mut self) -> f64 {
        let now = self.clock.now();
        let wait = (self.interval_ms - (now - self.last_frame)).max(0.0);
        if wait > 0.0 {
            high_precision_sleep(Duration::from_secs_f64(wait / 1000.0));
        }
        self.last_frame = now + wait;
        self.last_frame
    }

    fn capability(&self) -> ClockCapability {
        ClockCapability::TimerFallback
    }
}

/// Deterministic frames: advances a [`ManualClock`] by a repeating list of
/// intervals, one per frame.
#[derive(Debug, Clone)]
pub struct ScriptedFrames {
    clock: ManualClock,
    intervals: Vec<f64>,
    cursor: usize,
}

impl ScriptedFrames {
    pub fn new(clock: ManualClock, intervals: Vec<f64>) -> Self {
        let intervals = if intervals.is_empty() {
            vec![FALLBACK_FRAME_INTERVAL_MS]
        } else {
            intervals
        };
        Self {
            clock,
            intervals,
            cursor: 0,
        }
    }

    pub fn steady(clock: ManualClock, interval_ms: f64) -> Self {
        Self::new(clock, vec![interval_ms])
    }
}

impl FrameSource for ScriptedFrames {
    fn next_frame(&mut self) -> f64 {
        let step = self.intervals[self.cursor % self.intervals.len()];
        self.cursor += 1;
        self.clock.advance(step);
        self.clock.now()
    }

    fn capability(&self) -> ClockCapability {
        self.clock.capability()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_frames_cycle_through_intervals() {
        let clock = ManualClock::new(0.0);
        let mut frames = ScriptedFrames::new(clock.clone(), vec![16.0, 17.0]);
        assert_eq!(frames.next_frame(), 16.0);
        assert_eq!(frames.next_frame(), 33.0);
        assert_eq!(frames.next_frame(), 49.0);
        assert_eq!(clock.now(), 49.0);
    }

    #[test]
    fn interval_frames_do_not_wait_when_late() {
        let clock = ManualClock::new(1_000.0);
        let mut frames = IntervalFrames::with_interval(clock.clone(), 16.66);
        // First frame: last_frame is 0, so the caller is already late.
        assert_eq!(frames.next_frame(), 1_000.0);
        clock.advance(40.0);
        assert_eq!(frames.next_frame(), 1_040.0);
        assert_eq!(frames.capability(), ClockCapability::TimerFallback);
    }
}
