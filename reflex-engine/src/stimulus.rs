use crate::config::{ConfigOverrides, Millis};
use reflex_core::{ElementTiming, EndAction, NullHandle, ResponseSet, VisualHandle};
use reflex_store::TrialData;
use std::fmt;

/// Called with the element's timing when it is shown, on every frame it stays
/// shown, and when it is hidden.
pub type ElementFn = Box<dyn FnMut(&ElementTiming, &mut TrialData) -> anyhow::Result<()>>;
/// Called once when the stimulus becomes part of the active page.
pub type ActivateFn = Box<dyn FnMut(&mut TrialData) -> anyhow::Result<()>>;
pub type ResponseFn = Box<dyn FnMut(char, &mut TrialData) -> anyhow::Result<()>>;
/// Decides at activation time whether the stimulus is shown at all.
pub type Conditional = Box<dyn FnMut(&TrialData) -> bool>;

#[derive(Default)]
pub struct Lifecycle {
    pub on_activate: Option<ActivateFn>,
    pub on_display: Option<ElementFn>,
    pub during_display: Option<ElementFn>,
    pub on_hide: Option<ElementFn>,
}

#[derive(Default)]
pub struct ResponseCallbacks {
    pub on_key_press: Option<ResponseFn>,
    pub on_correct_key: Option<ResponseFn>,
    pub on_incorrect_key: Option<ResponseFn>,
    pub on_allowable_key: Option<ResponseFn>,
}

impl ResponseCallbacks {
    pub fn is_empty(&self) -> bool {
        self.on_key_press.is_none()
            && self.on_correct_key.is_none()
            && self.on_incorrect_key.is_none()
            && self.on_allowable_key.is_none()
    }
}

/// Role of a queued stimulus. `Init` and `Storage` are queued by the session
/// itself around the user's stimuli.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StimulusKind {
    #[default]
    Stimulus,
    Init,
    Storage,
}

/// A stimulus as declared by the experiment, before it reaches a page.
pub struct StimulusSpec {
    pub(crate) id: String,
    pub(crate) config_id: Option<String>,
    pub(crate) kind: StimulusKind,
    pub(crate) handle: Box<dyn VisualHandle>,
    pub(crate) conditional: Option<Conditional>,
    pub(crate) load_config: bool,
    pub(crate) continue_stacking: bool,
    pub(crate) advance_on_hide: bool,
    pub(crate) record_timing: bool,
    pub(crate) overrides: ConfigOverrides,
    pub(crate) lifecycle: Lifecycle,
    pub(crate) responses: ResponseCallbacks,
}

impl StimulusSpec {
    pub fn new(id: impl Into<String>, handle: impl VisualHandle + 'static) -> Self {
        Self {
            id: id.into(),
            config_id: None,
            kind: StimulusKind::Stimulus,
            handle: Box::new(handle),
            conditional: None,
            load_config: true,
            continue_stacking: false,
            advance_on_hide: true,
            record_timing: true,
            overrides: ConfigOverrides::default(),
            lifecycle: Lifecycle::default(),
            responses: ResponseCallbacks::default(),
        }
    }

    pub(crate) fn internal(id: &str, kind: StimulusKind) -> Self {
        let mut spec = Self::new(id, NullHandle);
        spec.kind = kind;
        spec.record_timing = kind != StimulusKind::Storage;
        spec
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> StimulusKind {
        self.kind
    }

    /// Key prefix configuration is looked up under; defaults to the id.
    pub fn config_id(&self) -> &str {
        self.config_id.as_deref().unwrap_or(&self.id)
    }

    pub fn with_config_id(mut self, config_id: impl Into<String>) -> Self {
        self.config_id = Some(config_id.into());
        self
    }

    pub fn conditional(mut self, f: impl FnMut(&TrialData) -> bool + 'static) -> Self {
        self.conditional = Some(Box::new(f));
        self
    }

    /// When disabled, persisted configuration is ignored and only overrides
    /// and defaults apply.
    pub fn load_config(mut self, load: bool) -> Self {
        self.load_config = load;
        self
    }

    /// Keeps activating the following stimulus onto the same page.
    pub fn continue_stacking(mut self, stack: bool) -> Self {
        self.continue_stacking = stack;
        self
    }

    /// Whether hiding this stimulus ends the page. On by default.
    pub fn advance_on_hide(mut self, advance: bool) -> Self {
        self.advance_on_hide = advance;
        self
    }

    /// Whether `<id>[OnsetTime]` and friends are written to trial data.
    pub fn record_timing(mut self, record: bool) -> Self {
        self.record_timing = record;
        self
    }

    pub fn duration(mut self, ms: impl Into<Millis>) -> Self {
        self.overrides.duration = Some(ms.into());
        self
    }

    pub fn delay(mut self, ms: impl Into<Millis>) -> Self {
        self.overrides.delay = Some(ms.into());
        self
    }

    pub fn allowable(mut self, symbols: impl Into<ResponseSet>) -> Self {
        self.overrides.allowable = Some(symbols.into());
        self
    }

    pub fn correct(mut self, symbols: impl Into<ResponseSet>) -> Self {
        self.overrides.correct = Some(symbols.into());
        self
    }

    pub fn end_action(mut self, action: EndAction) -> Self {
        self.overrides.end_action = Some(action);
        self
    }

    pub fn on_activate(
        mut self,
        f: impl FnMut(&mut TrialData) -> anyhow::Result<()> + 'static,
    ) -> Self {
        self.lifecycle.on_activate = Some(Box::new(f));
        self
    }

    pub fn on_display(
        mut self,
        f: impl FnMut(&ElementTiming, &mut TrialData) -> anyhow::Result<()> + 'static,
    ) -> Self {
        self.lifecycle.on_display = Some(Box::new(f));
        self
    }

    pub fn during_display(
        mut self,
        f: impl FnMut(&ElementTiming, &mut TrialData) -> anyhow::Result<()> + 'static,
    ) -> Self {
        self.lifecycle.during_display = Some(Box::new(f));
        self
    }

    pub fn on_hide(
        mut self,
        f: impl FnMut(&ElementTiming, &mut TrialData) -> anyhow::Result<()> + 'static,
    ) -> Self {
        self.lifecycle.on_hide = Some(Box::new(f));
        self
    }

    pub fn on_key_press(
        mut self,
        f: impl FnMut(char, &mut TrialData) -> anyhow::Result<()> + 'static,
    ) -> Self {
        self.responses.on_key_press = Some(Box::new(f));
        self
    }

    pub fn on_correct_key(
        mut self,
        f: impl FnMut(char, &mut TrialData) -> anyhow::Result<()> + 'static,
    ) -> Self {
        self.responses.on_correct_key = Some(Box::new(f));
        self
    }

    pub fn on_incorrect_key(
        mut self,
        f: impl FnMut(char, &mut TrialData) -> anyhow::Result<()> + 'static,
    ) -> Self {
        self.responses.on_incorrect_key = Some(Box::new(f));
        self
    }

    pub fn on_allowable_key(
        mut self,
        f: impl FnMut(char, &mut TrialData) -> anyhow::Result<()> + 'static,
    ) -> Self {
        self.responses.on_allowable_key = Some(Box::new(f));
        self
    }

    /// Runs the conditional, if any. Stimuli without one are always shown.
    pub(crate) fn evaluate(&mut self, trial: &TrialData) -> bool {
        self.conditional.as_mut().is_none_or(|f| f(trial))
    }
}

impl fmt::Debug for StimulusSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StimulusSpec")
            .field("id", &self.id)
            .field("config_id", &self.config_id)
            .field("kind", &self.kind)
            .field("conditional", &self.conditional.is_some())
            .field("load_config", &self.load_config)
            .field("continue_stacking", &self.continue_stacking)
            .field("advance_on_hide", &self.advance_on_hide)
            .field("overrides", &self.overrides)
            .finish_non_exhaustive()
    }
}
