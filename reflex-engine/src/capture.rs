use crate::scheduler::{ActiveStimulus, record_fault};
use crate::stimulus::{ResponseCallbacks, ResponseFn};
use reflex_core::{ElementId, EndAction, ResponseRecord, TrialConfig};
use reflex_store::{TrialData, field_key};

/// Result of one key press.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputOutcome {
    /// A stimulus was listening for input.
    pub accepted: bool,
    /// The symbol was allowable or correct for that stimulus.
    pub qualifying: bool,
    /// Set when this press latched the stimulus' response.
    pub latched: Option<ResponseRecord>,
    /// Element to hide because its end action is `TERMINATE`.
    pub terminate: Option<ElementId>,
}

struct CaptureTarget {
    stimulus_id: String,
    element: ElementId,
    config: TrialConfig,
    record: ResponseRecord,
    callbacks: ResponseCallbacks,
}

/// Keyboard capture for the stimulus holding the response register.
///
/// The first qualifying press is latched; later presses still reach the
/// callbacks but never overwrite the record.
#[derive(Default)]
pub struct ResponseCapture {
    target: Option<CaptureTarget>,
}

impl ResponseCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts listening on behalf of `stimulus_id` and seeds its response
    /// fields so they appear in the record even without a response.
    pub fn arm(
        &mut self,
        stimulus_id: &str,
        element: ElementId,
        config: TrialConfig,
        callbacks: ResponseCallbacks,
        trial: &mut TrialData,
    ) {
        trial.set(&field_key(stimulus_id, "RTTime"), "");
        trial.set(&field_key(stimulus_id, "RT"), "");
        trial.set(&field_key(stimulus_id, "RESP"), "");
        trial.set(&field_key(stimulus_id, "ACC"), 0);
        let previous = self.target.replace(CaptureTarget {
            stimulus_id: stimulus_id.to_owned(),
            element,
            config,
            record: ResponseRecord::default(),
            callbacks,
        });
        if let Some(previous) = previous {
            tracing::debug!(
                previous = %previous.stimulus_id,
                current = stimulus_id,
                "response register taken over"
            );
        }
    }

    /// Stops listening and hands back the final record of the target.
    pub fn disarm(&mut self) -> Option<(String, ResponseRecord)> {
        self.target.take().map(|t| (t.stimulus_id, t.record))
    }

    pub fn is_armed_for(&self, active: Option<&ActiveStimulus>) -> bool {
        match (&self.target, active) {
            (Some(target), Some(active)) => target.element == active.element,
            _ => false,
        }
    }

    pub fn record(&self) -> Option<&ResponseRecord> {
        self.target.as_ref().map(|t| &t.record)
    }

    pub fn handle_input(
        &mut self,
        symbol: char,
        active: Option<&ActiveStimulus>,
        now: f64,
        trial: &mut TrialData,
    ) -> InputOutcome {
        let Some(active) = active else {
            return InputOutcome::default();
        };
        let Some(target) = self
            .target
            .as_mut()
            .filter(|t| t.element == active.element)
        else {
            return InputOutcome::default();
        };

        let allowable = target.config.is_allowable(symbol);
        let correct = target.config.is_correct(symbol);
        let mut outcome = InputOutcome {
            accepted: true,
            qualifying: allowable || correct,
            ..InputOutcome::default()
        };

        if outcome.qualifying && !target.record.is_latched() {
            let rt = active.onset_time.map(|onset| now - onset);
            target.record = ResponseRecord {
                rt_time: Some(now),
                rt,
                resp: Some(symbol),
                accuracy: u8::from(correct),
            };
            let id = target.stimulus_id.as_str();
            trial.set(&field_key(id, "RTTime"), now);
            match rt {
                Some(rt) => trial.set(&field_key(id, "RT"), rt),
                None => trial.set(&field_key(id, "RT"), ""),
            }
            trial.set(&field_key(id, "RESP"), symbol.to_string());
            trial.set(&field_key(id, "ACC"), target.record.accuracy);
            tracing::debug!(stimulus = id, %symbol, ?rt, correct, "response latched");
            outcome.latched = Some(target.record.clone());
        }

        let id = target.stimulus_id.as_str();
        let callbacks = &mut target.callbacks;
        fire(&mut callbacks.on_key_press, symbol, id, trial);
        if correct {
            fire(&mut callbacks.on_correct_key, symbol, id, trial);
        } else if allowable {
            fire(&mut callbacks.on_incorrect_key, symbol, id, trial);
        }
        if allowable {
            fire(&mut callbacks.on_allowable_key, symbol, id, trial);
        }

        if allowable && target.config.end_action == EndAction::Terminate {
            outcome.terminate = Some(target.element);
        }
        outcome
    }
}

fn fire(callback: &mut Option<ResponseFn>, symbol: char, id: &str, trial: &mut TrialData) {
    if let Some(f) = callback.as_mut() {
        if let Err(err) = f(symbol, trial) {
            record_fault(trial, "ResponseError", id, &err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn armed(config: TrialConfig, callbacks: ResponseCallbacks) -> (ResponseCapture, ActiveStimulus, TrialData) {
        let mut trial = TrialData::new();
        let mut capture = ResponseCapture::new();
        capture.arm("probe", ElementId(7), config, callbacks, &mut trial);
        let active = ActiveStimulus {
            stimulus_id: "probe".into(),
            element: ElementId(7),
            onset_time: Some(1000.0),
        };
        (capture, active, trial)
    }

    fn config(allowable: &str, correct: &str) -> TrialConfig {
        TrialConfig {
            allowable: allowable.into(),
            correct: correct.into(),
            ..TrialConfig::default()
        }
    }

    #[test]
    fn arming_seeds_response_fields() {
        let (_, _, trial) = armed(config("ab", "a"), ResponseCallbacks::default());
        assert_eq!(trial.get_str("probe[RT]"), Some(""));
        assert_eq!(trial.get_str("probe[RESP]"), Some(""));
        assert_eq!(trial.get_f64("probe[ACC]"), Some(0.0));
    }

    #[test]
    fn allowable_and_correct_symbols() {
        let (mut capture, active, mut trial) = armed(config("ab", "a"), ResponseCallbacks::default());

        let out = capture.handle_input('c', Some(&active), 1100.0, &mut trial);
        assert!(out.accepted);
        assert!(!out.qualifying);
        assert!(out.latched.is_none());

        let out = capture.handle_input('b', Some(&active), 1250.0, &mut trial);
        let rec = out.latched.expect("b is allowable");
        assert_eq!(rec.accuracy, 0);
        assert_eq!(rec.rt, Some(250.0));
        assert_eq!(trial.get_str("probe[RESP]"), Some("b"));

        let out = capture.handle_input('a', Some(&active), 1300.0, &mut trial);
        assert!(out.qualifying);
        assert!(out.latched.is_none(), "only the first response is latched");
        assert_eq!(trial.get_f64("probe[ACC]"), Some(0.0));
        assert_eq!(trial.get_f64("probe[RT]"), Some(250.0));
    }

    #[test]
    fn callbacks_fire_on_every_press() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let push = |name: &'static str| {
            let log = log.clone();
            Some(Box::new(move |c: char, _: &mut TrialData| -> anyhow::Result<()> {
                log.borrow_mut().push(format!("{name}:{c}"));
                Ok(())
            }) as ResponseFn)
        };
        let callbacks = ResponseCallbacks {
            on_key_press: push("key"),
            on_correct_key: push("correct"),
            on_incorrect_key: push("incorrect"),
            on_allowable_key: push("allowable"),
        };
        let (mut capture, active, mut trial) = armed(config("ab", "a"), callbacks);
        capture.handle_input('b', Some(&active), 1100.0, &mut trial);
        capture.handle_input('a', Some(&active), 1200.0, &mut trial);
        capture.handle_input('z', Some(&active), 1300.0, &mut trial);
        assert_eq!(
            *log.borrow(),
            vec![
                "key:b", "incorrect:b", "allowable:b",
                "key:a", "correct:a", "allowable:a",
                "key:z",
            ]
        );
    }

    #[test]
    fn terminate_only_on_allowable_symbols() {
        let cfg = TrialConfig {
            end_action: EndAction::Terminate,
            ..config("fj", "f")
        };
        let (mut capture, active, mut trial) = armed(cfg, ResponseCallbacks::default());
        assert_eq!(capture.handle_input('x', Some(&active), 1010.0, &mut trial).terminate, None);
        assert_eq!(
            capture.handle_input('j', Some(&active), 1020.0, &mut trial).terminate,
            Some(ElementId(7))
        );
    }

    #[test]
    fn input_is_ignored_without_matching_register() {
        let (mut capture, mut active, mut trial) = armed(config("a", ""), ResponseCallbacks::default());
        assert_eq!(capture.handle_input('a', None, 1.0, &mut trial), InputOutcome::default());
        active.element = ElementId(8);
        assert!(!capture.is_armed_for(Some(&active)));
        assert_eq!(capture.handle_input('a', Some(&active), 1.0, &mut trial), InputOutcome::default());
    }

    #[test]
    fn response_before_onset_has_no_rt() {
        let (mut capture, mut active, mut trial) = armed(config("a", "a"), ResponseCallbacks::default());
        active.onset_time = None;
        let rec = capture
            .handle_input('a', Some(&active), 990.0, &mut trial)
            .latched
            .unwrap();
        assert_eq!(rec.rt, None);
        assert_eq!(rec.accuracy, 1);
        assert_eq!(trial.get_str("probe[RT]"), Some(""));
        assert_eq!(capture.disarm().map(|(id, r)| (id, r.resp)), Some(("probe".into(), Some('a'))));
    }
}
