use crate::capture::{InputOutcome, ResponseCapture};
use crate::config::{ConfigError, ConfigOption, ConfigResolver, EngineConfig, Millis};
use crate::page::{ActivatedStimulus, PageContext, PageController};
use crate::scheduler::{ClockState, FrameEvent, FrameScheduler, TickReport, is_valid_period};
use crate::stimulus::{StimulusKind, StimulusSpec};
use rand::Rng;
use reflex_core::{ElementId, TrialPhase, TrialRecord};
use reflex_store::{
    BLOCK_DATA_FIELD, BlockData, COLUMNS_FIELD, Persistence, SurveyData, TrialData, Value,
    field_key,
};
use reflex_timing::{Clock, ClockCapability, FrameSource, RefreshEstimator};

/// Id of the element that opens every trial and calibrates the display on
/// the first trial of a block.
pub const INIT_POST_ID: &str = "InitPost";
/// Id of the element whose display stores the trial.
pub const STORAGE_ID: &str = "Exit";

/// Receives page and trial milestones from the session.
pub trait PageHost {
    fn page_advanced(&mut self, _page: usize) {}

    fn trial_finished(&mut self, record: &TrialRecord);
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrialParams {
    pub block_id: String,
    /// Drawn once per trial when given as a set.
    pub inter_trial_delay: Option<Millis>,
    /// Block document to resume from instead of the one held by the
    /// persistence backend.
    pub block_data: Option<String>,
}

impl TrialParams {
    pub fn new(block_id: impl Into<String>) -> Self {
        Self {
            block_id: block_id.into(),
            ..Self::default()
        }
    }

    pub fn inter_trial_delay(mut self, ms: impl Into<Millis>) -> Self {
        self.inter_trial_delay = Some(ms.into());
        self
    }

    pub fn block_data(mut self, json: impl Into<String>) -> Self {
        self.block_data = Some(json.into());
        self
    }
}

struct Calibration {
    estimator: RefreshEstimator,
    collecting: bool,
}

/// One block of trials.
///
/// All mutable engine state lives here and is driven from a single thread:
/// the host calls [`Session::tick`] once per frame and
/// [`Session::handle_input`] for key presses between frames.
pub struct Session<C: Clock, R: Rng, P: Persistence> {
    config: EngineConfig,
    clock: C,
    rng: R,
    resolver: ConfigResolver,
    scheduler: FrameScheduler,
    pages: PageController,
    capture: ResponseCapture,
    trial: TrialData,
    block: BlockData,
    survey: SurveyData<P>,
    phase: TrialPhase,
    calibration: Option<Calibration>,
    init_element: Option<ElementId>,
    storage_element: Option<ElementId>,
    last_record: Option<TrialRecord>,
    last_now: f64,
    clock_regressed: bool,
}

impl<C: Clock, R: Rng, P: Persistence> Session<C, R, P> {
    pub fn new(config: EngineConfig, clock: C, rng: R, persistence: P) -> Self {
        let capability = clock.capability();
        if !capability.is_high_res() {
            tracing::warn!(
                capability = capability.as_str(),
                "no high resolution clock, reaction times are less precise"
            );
        }
        let scheduler = FrameScheduler::new(config.default_refresh_period_ms);
        Self {
            config,
            clock,
            rng,
            resolver: ConfigResolver::new(),
            scheduler,
            pages: PageController::new(),
            capture: ResponseCapture::new(),
            trial: TrialData::new(),
            block: BlockData::default(),
            survey: SurveyData::new(persistence),
            phase: TrialPhase::Idle,
            calibration: None,
            init_element: None,
            storage_element: None,
            last_record: None,
            last_now: 0.0,
            clock_regressed: false,
        }
    }

    pub fn phase(&self) -> TrialPhase {
        self.phase
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn capability(&self) -> ClockCapability {
        self.clock.capability()
    }

    /// False without a native high-resolution clock, or once the clock has
    /// been seen running backwards. Timing is still recorded either way.
    pub fn is_compatible(&self) -> bool {
        self.clock.capability().is_high_res() && !self.clock_regressed
    }

    pub fn clock_state(&self) -> &ClockState {
        self.scheduler.clock_state()
    }

    pub fn scheduler(&self) -> &FrameScheduler {
        &self.scheduler
    }

    pub fn page_set(&self) -> &[ActivatedStimulus] {
        self.pages.page_set()
    }

    pub fn trial_data(&self) -> &TrialData {
        &self.trial
    }

    pub fn trial_data_mut(&mut self) -> &mut TrialData {
        &mut self.trial
    }

    pub fn block_data(&self) -> &BlockData {
        &self.block
    }

    pub fn survey(&self) -> &SurveyData<P> {
        &self.survey
    }

    pub fn last_record(&self) -> Option<&TrialRecord> {
        self.last_record.as_ref()
    }

    pub fn into_persistence(self) -> P {
        self.survey.into_backend()
    }

    /// Opens a trial: restores the block, seeds trial data with the block's
    /// columns and queues the init element.
    pub fn init_trial(&mut self, params: TrialParams) {
        let now = self.clock.now();
        let stored = match params.block_data {
            Some(json) => json,
            None => self.survey.get_string(BLOCK_DATA_FIELD).unwrap_or_else(|err| {
                tracing::warn!(%err, "ignoring unreadable block data");
                String::new()
            }),
        };
        self.block = BlockData::load_for(&stored, &params.block_id).unwrap_or_else(|err| {
            tracing::warn!(%err, block = params.block_id, "block data corrupt, starting over");
            BlockData::new(&params.block_id)
        });

        if let Some(period) = self.block.refresh_period.filter(|p| !is_valid_period(*p)) {
            tracing::warn!(period, "discarding invalid cached refresh period");
            self.block.refresh_period = None;
        }

        self.trial = TrialData::seeded(&self.block.trial_columns);
        let period = self
            .block
            .refresh_period
            .unwrap_or(self.config.default_refresh_period_ms);
        self.scheduler = FrameScheduler::new(period);
        self.pages = PageController::new();
        self.capture = ResponseCapture::new();
        self.calibration = None;
        self.init_element = None;
        self.storage_element = None;
        self.last_record = None;
        self.phase = TrialPhase::Init;

        if let Some(done) = self.block.previous_storage_done {
            self.trial.set("InitPre[OnsetTime]", done);
            self.trial.set("InitPre[OffsetTime]", now);
            self.trial.set("InitPre[CalculatedDuration]", now - done);
        }
        self.trial.set("Init[OnsetTime]", now);
        if let (Some(onset), Some(offset)) =
            (self.block.server_comm_onset, self.block.server_comm_offset)
        {
            self.trial.set("InitServerComm[OnsetTime]", onset);
            self.trial.set("InitServerComm[OffsetTime]", offset);
            self.trial.set("InitServerComm[CalculatedDuration]", offset - onset);
        }

        let iti = params
            .inter_trial_delay
            .and_then(|mut m| m.sample(&mut self.rng));
        if let Some(iti) = iti {
            self.trial
                .set(&field_key(&params.block_id, "InterTrialDelay"), iti);
        }
        self.block.inter_trial_delay = iti.filter(|d| *d > 0.0);

        self.trial.set(
            &ConfigResolver::key(INIT_POST_ID, ConfigOption::Duration),
            0.0,
        );
        self.pages
            .declare(StimulusSpec::internal(INIT_POST_ID, StimulusKind::Init));
        tracing::info!(
            block = params.block_id,
            trial = self.block.block_counter,
            first = self.block.is_first_trial(),
            "trial initialised"
        );
    }

    /// Queues a stimulus behind everything declared so far.
    pub fn declare(&mut self, mut spec: StimulusSpec) {
        spec.overrides.sample(&mut self.rng);
        self.pages.declare(spec);
    }

    /// Persists one configuration option. Errors are logged and returned; the
    /// affected stimulus falls back to its defaults.
    pub fn set_config(
        &mut self,
        config_id: &str,
        option: &str,
        value: impl Into<Value>,
    ) -> Result<(), ConfigError> {
        match self.resolver.set_config(
            &mut self.rng,
            &mut self.trial,
            &mut self.block,
            config_id,
            option,
            value.into(),
        ) {
            Ok(_) => Ok(()),
            Err(err) => {
                tracing::warn!(%err, config_id, "configuration ignored");
                Err(err)
            }
        }
    }

    /// Queues the storage element. Declare it after the last stimulus.
    pub fn exit_trial(&mut self) {
        self.pages.declare(
            StimulusSpec::internal(STORAGE_ID, StimulusKind::Storage)
                .duration(0.0)
                .load_config(false),
        );
    }

    /// Makes the engine ready and ends the init page once the remaining
    /// inter-trial delay has passed. The first trial of a block uses that
    /// window to calibrate the refresh period instead.
    pub fn start(&mut self) {
        let now = self.clock.now();
        let iti = self.block.inter_trial_delay;
        let window = match self.block.previous_end_time {
            Some(end) => {
                if let Some(period) = self.block.refresh_period {
                    self.scheduler.set_refresh_period(period);
                }
                iti.map_or(0.0, |d| d - (now - end)).max(0.0)
            }
            None => {
                self.calibration = Some(Calibration {
                    estimator: RefreshEstimator::new(),
                    collecting: false,
                });
                iti.map_or(self.config.calibration_window_ms, |d| d * 3.0)
            }
        };
        self.trial.set(
            &ConfigResolver::key(INIT_POST_ID, ConfigOption::Duration),
            window,
        );
        self.scheduler.set_ready();
        self.scheduler.hide_all();
        tracing::info!(
            window_ms = window,
            calibrating = self.calibration.is_some(),
            "trial started"
        );
    }

    /// Ends the current page on the next tick.
    pub fn proceed(&mut self) {
        self.scheduler.hide_all();
    }

    pub fn is_capturing(&self) -> bool {
        self.phase.allows_input() && self.capture.is_armed_for(self.scheduler.active())
    }

    pub fn handle_input(&mut self, symbol: char) -> InputOutcome {
        if !self.phase.allows_input() {
            return InputOutcome::default();
        }
        let now = self.clock.now();
        let outcome =
            self.capture
                .handle_input(symbol, self.scheduler.active(), now, &mut self.trial);
        if let Some(record) = &outcome.latched {
            self.survey.set("ACC", record.accuracy);
        }
        if let Some(id) = outcome.terminate {
            self.scheduler.hide_element(id);
        }
        outcome
    }

    /// One frame callback.
    pub fn tick<H: PageHost>(&mut self, host: &mut H) -> TickReport {
        let report = self.scheduler.tick(&self.clock, &mut self.trial);
        if report.now < self.last_now && !self.clock_regressed {
            tracing::warn!(now = report.now, previous = self.last_now, "clock went backwards");
            self.clock_regressed = true;
        }
        self.last_now = report.now;

        if let Some(cal) = self.calibration.as_mut().filter(|c| c.collecting) {
            cal.estimator.record(report.now);
        }
        for event in &report.events {
            self.observe(event, report.now, host);
        }
        if report.advance {
            self.advance_page(host);
        }
        report
    }

    /// Ticks once per frame of `frames` until the trial is stored or
    /// `max_frames` have passed. Returns the number of frames used.
    pub fn run<F: FrameSource, H: PageHost>(
        &mut self,
        frames: &mut F,
        host: &mut H,
        max_frames: usize,
    ) -> usize {
        let mut used = 0;
        while used < max_frames && !self.phase.is_finished() {
            frames.next_frame();
            self.tick(host);
            used += 1;
        }
        used
    }

    fn observe<H: PageHost>(&mut self, event: &FrameEvent, now: f64, host: &mut H) {
        let id = Some(event.id());
        match event {
            FrameEvent::Shown { timing, .. } if id == self.init_element => {
                if let Some(onset) = timing.display_onset_time {
                    self.trial.set("Init[OffsetTime]", onset);
                    if let Some(start) = self.trial.get_f64("Init[OnsetTime]") {
                        self.trial.set("Init[CalculatedDuration]", onset - start);
                    }
                }
                if let Some(cal) = self.calibration.as_mut() {
                    cal.estimator.clear();
                    cal.collecting = true;
                }
            }
            FrameEvent::Hidden { .. } | FrameEvent::Discarded { .. }
                if id == self.init_element =>
            {
                self.finish_calibration(now);
                self.phase = TrialPhase::Stimuli;
            }
            FrameEvent::Shown { .. } if id == self.storage_element => {
                self.store_trial(now, host);
            }
            _ => {}
        }
    }

    fn finish_calibration(&mut self, now: f64) {
        let Some(cal) = self.calibration.take() else {
            return;
        };
        let stats = cal.estimator.calibration_stats();
        match cal.estimator.estimate() {
            Some(period) if self.scheduler.set_refresh_period(period) => {
                tracing::info!(
                    period_ms = period,
                    hz = 1000.0 / period,
                    jitter_ms = stats.jitter_ms,
                    samples = stats.samples,
                    "refresh period calibrated"
                );
            }
            _ => tracing::warn!(
                samples = stats.samples,
                period_ms = self.scheduler.refresh_period(),
                "calibration window too short, keeping refresh period"
            ),
        }
        self.block.refresh_period = Some(self.scheduler.refresh_period());
        self.scheduler.reanchor(now);
    }

    fn store_trial<H: PageHost>(&mut self, now: f64, host: &mut H) {
        self.phase = TrialPhase::Exit;
        let block_id = self.block.current_block.clone();
        let trial_nr = self.block.block_counter;
        self.block.previous_end_time = Some(now);

        self.trial.set(&field_key(&block_id, "TrialNr"), trial_nr);
        self.trial
            .set(&field_key(&block_id, "RefreshPeriod"), self.scheduler.refresh_period());
        self.trial.set("BlockId", block_id.as_str());
        self.trial.set("EngineType", self.clock.capability().as_str());
        self.trial.set("Exit[OnsetTime]", now);
        self.trial.set("Engine[Version]", self.config.version.as_str());

        let record = TrialRecord {
            block_id: block_id.clone(),
            trial_nr,
            fields: self.trial.to_strings(),
            new_columns: self.trial.newly_added().map(str::to_owned).collect(),
        };
        if let Err(err) = self
            .survey
            .register_columns(COLUMNS_FIELD, &block_id, &record.new_columns)
        {
            tracing::warn!(%err, "column registry not updated");
        }

        self.block.register_columns(self.trial.columns());
        self.block.block_counter += 1;
        self.block.previous_storage_done = Some(self.clock.now());
        match self.block.to_json() {
            Ok(json) => self.survey.set(BLOCK_DATA_FIELD, json),
            Err(err) => tracing::warn!(%err, "block data not saved"),
        }

        tracing::info!(
            block = block_id,
            trial = trial_nr,
            fields = record.fields.len(),
            new_columns = record.new_columns.len(),
            "trial stored"
        );
        host.trial_finished(&record);
        self.last_record = Some(record);
        self.phase = TrialPhase::Done;
    }

    fn advance_page<H: PageHost>(&mut self, host: &mut H) {
        if let Some(page) = self
            .pages
            .proceed_page(&mut self.scheduler, &mut self.capture)
        {
            host.page_advanced(page);
        }
        let activation = self.pages.activate_next_page(PageContext {
            scheduler: &mut self.scheduler,
            capture: &mut self.capture,
            resolver: &self.resolver,
            trial: &mut self.trial,
            block: &self.block,
            clock: &self.clock,
        });
        for stimulus in &activation.shown {
            match stimulus.kind {
                StimulusKind::Init => self.init_element = Some(stimulus.element),
                StimulusKind::Storage => self.storage_element = Some(stimulus.element),
                StimulusKind::Stimulus => {}
            }
        }
    }
}
