use crate::stimulus::ElementFn;
use reflex_core::{ElementId, ElementTiming, VisualHandle};
use reflex_store::{TrialData, field_key};
use reflex_timing::{Clock, DEFAULT_REFRESH_PERIOD_MS, calc_frames};
use std::collections::VecDeque;
use std::fmt;

/// Frame bookkeeping of the scheduler, all in epoch milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct ClockState {
    /// Anchor the frame count is measured from; 0 until the first tick.
    pub reference_time: f64,
    pub frames_since_reference: u64,
    pub refresh_period: f64,
    /// Refresh boundary of the previous tick.
    pub last_refresh: f64,
    /// Boundary at which what is scheduled this tick becomes visible.
    pub projected_refresh: f64,
}

impl ClockState {
    pub fn new(refresh_period: f64) -> Self {
        Self {
            reference_time: 0.0,
            frames_since_reference: 0,
            refresh_period,
            last_refresh: 0.0,
            projected_refresh: 0.0,
        }
    }

    pub fn is_anchored(&self) -> bool {
        self.reference_time != 0.0
    }
}

/// One visual element on the display stack.
pub struct DisplayElement {
    label: String,
    handle: Box<dyn VisualHandle>,
    duration: f64,
    delay: f64,
    advance_on_hide: bool,
    record_timing: bool,
    on_display: Option<ElementFn>,
    during_display: Option<ElementFn>,
    on_hide: Option<ElementFn>,
    id: ElementId,
    timing: ElementTiming,
    shown: bool,
    hide: bool,
}

impl DisplayElement {
    pub fn new(label: impl Into<String>, handle: Box<dyn VisualHandle>) -> Self {
        Self {
            label: label.into(),
            handle,
            duration: f64::INFINITY,
            delay: 0.0,
            advance_on_hide: false,
            record_timing: true,
            on_display: None,
            during_display: None,
            on_hide: None,
            id: ElementId(0),
            timing: ElementTiming::default(),
            shown: false,
            hide: false,
        }
    }

    pub fn duration(mut self, ms: f64) -> Self {
        self.duration = ms;
        self
    }

    pub fn delay(mut self, ms: f64) -> Self {
        self.delay = ms;
        self
    }

    pub fn advance_on_hide(mut self, advance: bool) -> Self {
        self.advance_on_hide = advance;
        self
    }

    pub fn record_timing(mut self, record: bool) -> Self {
        self.record_timing = record;
        self
    }

    pub fn with_callbacks(
        mut self,
        on_display: Option<ElementFn>,
        during_display: Option<ElementFn>,
        on_hide: Option<ElementFn>,
    ) -> Self {
        self.on_display = on_display;
        self.during_display = during_display;
        self.on_hide = on_hide;
        self
    }

    pub fn id(&self) -> ElementId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn timing(&self) -> &ElementTiming {
        &self.timing
    }

    pub fn is_shown(&self) -> bool {
        self.shown
    }
}

impl fmt::Debug for DisplayElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisplayElement")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("duration", &self.duration)
            .field("delay", &self.delay)
            .field("shown", &self.shown)
            .field("hide", &self.hide)
            .field("timing", &self.timing)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FrameEvent {
    Shown {
        id: ElementId,
        label: String,
        timing: ElementTiming,
    },
    Hidden {
        id: ElementId,
        label: String,
        timing: ElementTiming,
    },
    /// Removed before it was ever shown.
    Discarded { id: ElementId, label: String },
}

impl FrameEvent {
    pub fn id(&self) -> ElementId {
        match self {
            FrameEvent::Shown { id, .. }
            | FrameEvent::Hidden { id, .. }
            | FrameEvent::Discarded { id, .. } => *id,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub now: f64,
    pub projected_refresh: f64,
    pub events: Vec<FrameEvent>,
    /// The page ended on this tick.
    pub advance: bool,
    pub remaining: usize,
}

/// The stimulus holding the response register.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveStimulus {
    pub stimulus_id: String,
    pub element: ElementId,
    /// Wall-clock onset, once the element has been shown.
    pub onset_time: Option<f64>,
}

/// A usable refresh period is positive and finite.
pub fn is_valid_period(period: f64) -> bool {
    period.is_finite() && period > 0.0
}

/// Frame-synchronised display stack.
///
/// Every tick projects the next refresh boundary and shows or hides elements
/// so that the change is visible at that boundary. Each element is shown at
/// most once and hidden at most once, in that order.
pub struct FrameScheduler {
    clock: ClockState,
    stack: VecDeque<DisplayElement>,
    force_advance: bool,
    ready: bool,
    next_id: u64,
    active: Option<ActiveStimulus>,
}

impl FrameScheduler {
    /// An invalid `refresh_period` is replaced by the 60 Hz default.
    pub fn new(refresh_period: f64) -> Self {
        let refresh_period = if is_valid_period(refresh_period) {
            refresh_period
        } else {
            tracing::warn!(
                period = refresh_period,
                fallback = DEFAULT_REFRESH_PERIOD_MS,
                "invalid refresh period, using default"
            );
            DEFAULT_REFRESH_PERIOD_MS
        };
        Self {
            clock: ClockState::new(refresh_period),
            stack: VecDeque::new(),
            force_advance: false,
            ready: false,
            next_id: 1,
            active: None,
        }
    }

    pub fn clock_state(&self) -> &ClockState {
        &self.clock
    }

    pub fn refresh_period(&self) -> f64 {
        self.clock.refresh_period
    }

    /// Rejects periods that are not positive and finite.
    pub fn set_refresh_period(&mut self, period: f64) -> bool {
        if !is_valid_period(period) {
            tracing::warn!(period, "ignoring invalid refresh period");
            return false;
        }
        self.clock.refresh_period = period;
        true
    }

    /// Restarts the frame count from `reference_time`.
    pub fn reanchor(&mut self, reference_time: f64) {
        self.clock.reference_time = reference_time;
        self.clock.frames_since_reference = 0;
    }

    /// Allows the page to advance. Until then an empty stack just idles.
    pub fn set_ready(&mut self) {
        self.ready = true;
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Request time for an element pushed now: the last refresh boundary once
    /// the scheduler is running, the clock before that.
    pub fn request_time<C: Clock>(&self, clock: &C) -> f64 {
        if self.clock.is_anchored() && self.clock.last_refresh > 0.0 {
            self.clock.last_refresh
        } else {
            clock.now()
        }
    }

    pub fn push(&mut self, mut element: DisplayElement, requested_at: f64) -> ElementId {
        let id = ElementId(self.next_id);
        self.next_id += 1;
        element.id = id;
        element.timing = ElementTiming::requested_at(requested_at);
        element.shown = false;
        element.hide = false;
        tracing::trace!(%id, label = %element.label, requested_at, "element queued");
        self.stack.push_back(element);
        id
    }

    /// Marks one element for hiding on the next tick. Returns `false` when the
    /// element is no longer on the stack.
    pub fn hide_element(&mut self, id: ElementId) -> bool {
        match self.stack.iter_mut().find(|el| el.id == id) {
            Some(el) => {
                el.hide = true;
                true
            }
            None => false,
        }
    }

    /// Marks every element for hiding and forces the page to advance.
    pub fn hide_all(&mut self) {
        for el in &mut self.stack {
            el.hide = true;
        }
        self.force_advance = true;
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn get(&self, id: ElementId) -> Option<&DisplayElement> {
        self.stack.iter().find(|el| el.id == id)
    }

    /// Gives `element` the response register, replacing any previous holder.
    pub fn activate(&mut self, stimulus_id: &str, element: ElementId) {
        let onset_time = self
            .get(element)
            .and_then(|el| el.timing.display_onset_time);
        self.active = Some(ActiveStimulus {
            stimulus_id: stimulus_id.to_owned(),
            element,
            onset_time,
        });
    }

    pub fn active(&self) -> Option<&ActiveStimulus> {
        self.active.as_ref()
    }

    pub fn clear_active(&mut self) {
        self.active = None;
    }

    pub fn tick<C: Clock>(&mut self, clock: &C, trial: &mut TrialData) -> TickReport {
        let now = clock.now();
        let state = &mut self.clock;
        if state.is_anchored() {
            state.frames_since_reference =
                calc_frames(state.reference_time, now, state.refresh_period);
        } else {
            state.reference_time = now;
            state.frames_since_reference = 0;
        }
        let current_refresh =
            state.reference_time + state.frames_since_reference as f64 * state.refresh_period;
        state.projected_refresh = current_refresh + state.refresh_period;
        let projected = state.projected_refresh;

        let mut report = TickReport {
            now,
            projected_refresh: projected,
            ..TickReport::default()
        };
        let mut kept: Vec<DisplayElement> = Vec::with_capacity(self.stack.len());

        while let Some(mut el) = self.stack.pop_front() {
            let expired = el.shown
                && el
                    .timing
                    .display_onset
                    .is_some_and(|onset| onset + el.duration < projected);
            if el.hide || self.force_advance || expired {
                if el.shown {
                    Self::hide(&mut el, projected, clock, trial, &mut report);
                } else {
                    tracing::trace!(id = %el.id, label = %el.label, "dropping element that was never shown");
                    report.events.push(FrameEvent::Discarded {
                        id: el.id,
                        label: el.label.clone(),
                    });
                }
                if el.advance_on_hide {
                    self.force_advance = true;
                    for mut other in kept.drain(..) {
                        other.hide = true;
                        self.stack.push_back(other);
                    }
                }
                continue;
            }

            if !el.shown && el.timing.requested_at + el.delay < projected {
                self.show(&mut el, projected, clock, trial, &mut report);
            } else if el.shown {
                if let Some(f) = el.during_display.as_mut() {
                    if let Err(err) = f(&el.timing, trial) {
                        record_fault(trial, "DuringDisplayError", &el.label, &err);
                    }
                }
            }
            kept.push(el);
        }

        self.stack = kept.into();
        self.clock.last_refresh = current_refresh;
        report.remaining = self.stack.len();
        if (self.stack.is_empty() || self.force_advance) && self.ready {
            self.force_advance = false;
            report.advance = true;
        }
        report
    }

    fn show<C: Clock>(
        &mut self,
        el: &mut DisplayElement,
        projected: f64,
        clock: &C,
        trial: &mut TrialData,
        report: &mut TickReport,
    ) {
        el.handle.show();
        let now = clock.now();
        el.shown = true;
        el.timing.display_onset = Some(projected);
        el.timing.display_onset_time = Some(now);
        if el.record_timing {
            trial.set(&field_key(&el.label, "OnsetTime"), now);
        }
        if let Some(active) = self.active.as_mut().filter(|a| a.element == el.id) {
            active.onset_time = Some(now);
        }
        if let Some(f) = el.on_display.as_mut() {
            if let Err(err) = f(&el.timing, trial) {
                record_fault(trial, "OnsetError", &el.label, &err);
            }
        }
        tracing::debug!(id = %el.id, label = %el.label, onset = projected, "element shown");
        report.events.push(FrameEvent::Shown {
            id: el.id,
            label: el.label.clone(),
            timing: el.timing.clone(),
        });
    }

    fn hide<C: Clock>(
        el: &mut DisplayElement,
        projected: f64,
        clock: &C,
        trial: &mut TrialData,
        report: &mut TickReport,
    ) {
        el.handle.hide();
        let now = clock.now();
        el.hide = true;
        let onset = el.timing.display_onset.unwrap_or(projected);
        el.timing.display_offset = Some(projected.max(onset));
        el.timing.display_offset_time = Some(now);
        el.timing.display_duration = el.timing.display_onset_time.map(|t| now - t);
        if el.record_timing {
            trial.set(&field_key(&el.label, "OffsetTime"), now);
            if let Some(d) = el.timing.display_duration {
                trial.set(&field_key(&el.label, "CalculatedDuration"), d);
            }
        }
        if let Some(f) = el.on_hide.as_mut() {
            if let Err(err) = f(&el.timing, trial) {
                record_fault(trial, "OffsetError", &el.label, &err);
            }
        }
        tracing::debug!(id = %el.id, label = %el.label, offset = ?el.timing.display_offset, "element hidden");
        report.events.push(FrameEvent::Hidden {
            id: el.id,
            label: el.label.clone(),
            timing: el.timing.clone(),
        });
    }
}

impl fmt::Debug for FrameScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameScheduler")
            .field("clock", &self.clock)
            .field("stack", &self.stack)
            .field("force_advance", &self.force_advance)
            .field("ready", &self.ready)
            .field("active", &self.active)
            .finish()
    }
}

/// A failing user callback never stops the trial; the failure lands in the
/// record instead.
pub(crate) fn record_fault(trial: &mut TrialData, kind: &str, label: &str, err: &anyhow::Error) {
    tracing::warn!(label, kind, error = %err, "callback failed");
    trial.set(&field_key("Error", kind), format!("{label}: {err:#}"));
}
