use crate::capture::ResponseCapture;
use crate::config::ConfigResolver;
use crate::scheduler::{DisplayElement, FrameScheduler, record_fault};
use crate::stimulus::{Lifecycle, StimulusKind, StimulusSpec};
use reflex_core::{ElementId, TrialConfig};
use reflex_store::{BlockData, TrialData};
use reflex_timing::Clock;
use std::collections::VecDeque;

/// Everything activation touches, borrowed from the session for one call.
pub struct PageContext<'a, C: Clock> {
    pub scheduler: &'a mut FrameScheduler,
    pub capture: &'a mut ResponseCapture,
    pub resolver: &'a ConfigResolver,
    pub trial: &'a mut TrialData,
    pub block: &'a BlockData,
    pub clock: &'a C,
}

/// A stimulus that made it onto a page.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivatedStimulus {
    pub stimulus_id: String,
    pub element: ElementId,
    pub kind: StimulusKind,
    pub config: TrialConfig,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageActivation {
    /// 1-based page number, 0 when nothing was activated.
    pub page: usize,
    pub shown: Vec<ActivatedStimulus>,
    /// Ids skipped because their conditional said no.
    pub skipped: Vec<String>,
    /// The queue is empty after this activation.
    pub exhausted: bool,
}

/// FIFO of declared stimuli, grouped into pages on activation.
#[derive(Debug, Default)]
pub struct PageController {
    queue: VecDeque<StimulusSpec>,
    page_set: Vec<ActivatedStimulus>,
    pages: usize,
}

impl PageController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, spec: StimulusSpec) {
        tracing::trace!(id = spec.id(), queued = self.queue.len() + 1, "stimulus declared");
        self.queue.push_back(spec);
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn page_set(&self) -> &[ActivatedStimulus] {
        &self.page_set
    }

    pub fn pages_shown(&self) -> usize {
        self.pages
    }

    /// Ends the current page: clears the page set and the response register.
    /// Returns the number of the page that ended, if one was open.
    pub fn proceed_page(
        &mut self,
        scheduler: &mut FrameScheduler,
        capture: &mut ResponseCapture,
    ) -> Option<usize> {
        if self.page_set.is_empty() {
            return None;
        }
        self.page_set.clear();
        scheduler.clear_active();
        capture.disarm();
        Some(self.pages)
    }

    /// Pops stimuli into a new page.
    ///
    /// A stimulus whose conditional fails is skipped and the next one is
    /// considered. A shown stimulus ends the page unless it continues
    /// stacking.
    pub fn activate_next_page<C: Clock>(&mut self, mut ctx: PageContext<'_, C>) -> PageActivation {
        let mut activation = PageActivation::default();
        while let Some(mut spec) = self.queue.pop_front() {
            if !spec.evaluate(ctx.trial) {
                tracing::debug!(id = spec.id(), "conditional false, stimulus skipped");
                activation.skipped.push(spec.id);
                continue;
            }
            let stacking = spec.continue_stacking;
            let activated = Self::activate(spec, &mut ctx);
            self.page_set.push(activated.clone());
            activation.shown.push(activated);
            if !stacking {
                break;
            }
        }
        activation.exhausted = self.queue.is_empty();
        if !activation.shown.is_empty() {
            self.pages += 1;
            activation.page = self.pages;
            tracing::debug!(
                page = self.pages,
                stimuli = activation.shown.len(),
                pending = self.queue.len(),
                "page activated"
            );
        }
        activation
    }

    fn activate<C: Clock>(spec: StimulusSpec, ctx: &mut PageContext<'_, C>) -> ActivatedStimulus {
        let StimulusSpec {
            id,
            config_id,
            kind,
            handle,
            load_config,
            advance_on_hide,
            record_timing,
            overrides,
            lifecycle,
            responses,
            ..
        } = spec;
        let config_id = config_id.unwrap_or_else(|| id.clone());
        let persisted = load_config.then_some((&*ctx.trial, ctx.block));
        let config = ctx.resolver.resolve(&config_id, &overrides, persisted);

        let Lifecycle {
            on_activate,
            on_display,
            during_display,
            on_hide,
        } = lifecycle;
        let element = DisplayElement::new(id.as_str(), handle)
            .duration(config.duration)
            .delay(config.delay)
            .advance_on_hide(advance_on_hide)
            .record_timing(record_timing)
            .with_callbacks(on_display, during_display, on_hide);
        let requested_at = ctx.scheduler.request_time(ctx.clock);
        let element_id = ctx.scheduler.push(element, requested_at);

        if config.wants_capture() || responses.on_key_press.is_some() {
            ctx.scheduler.activate(&id, element_id);
            ctx.capture
                .arm(&id, element_id, config.clone(), responses, ctx.trial);
        }
        if let Some(mut f) = on_activate {
            if let Err(err) = f(ctx.trial) {
                record_fault(ctx.trial, "ShowError", &id, &err);
            }
        }

        ActivatedStimulus {
            stimulus_id: id,
            element: element_id,
            kind,
            config,
        }
    }
}
