//! Arrow-direction choice task driven through the engine.
//!
//! Each trial shows a fixation cross, then a left or right arrow that waits
//! up to two seconds for `f` (left) or `j` (right). A red square follows any
//! trial that was not answered correctly.

use rand::Rng;
use reflex_core::{ArrowDirection, EndAction, Shape, TrialRecord};
use reflex_engine::{PageHost, Session, StimulusSpec, TrialParams};
use reflex_render::{Scene, SceneHandle};
use reflex_store::Persistence;
use reflex_timing::Clock;

pub const DEFAULT_TRIALS: u32 = 10;
pub const BLOCK_ID: &str = "arrows";

const WHITE: [u8; 4] = [255, 255, 255, 255];

pub struct ArrowTask {
    fixation: SceneHandle,
    left: SceneHandle,
    right: SceneHandle,
    feedback: SceneHandle,
    trials: u32,
    started: u32,
}

impl ArrowTask {
    pub fn new(scene: &Scene, center: (f32, f32), trials: u32) -> Self {
        let arrow = |direction| Shape::Arrow {
            direction,
            size: 60.0,
            color: WHITE,
        };
        Self {
            fixation: scene.add(
                Shape::Fixation {
                    size: 40.0,
                    color: WHITE,
                },
                center,
            ),
            left: scene.add(arrow(ArrowDirection::Left), center),
            right: scene.add(arrow(ArrowDirection::Right), center),
            feedback: scene.add(
                Shape::Rectangle {
                    width: 80.0,
                    height: 80.0,
                    color: [220, 40, 40, 255],
                },
                center,
            ),
            trials,
            started: 0,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.trials - self.started
    }

    /// Declares and starts the next trial. Returns `false` once every trial
    /// has been run.
    pub fn next_trial<C: Clock, R: Rng, P: Persistence>(
        &mut self,
        session: &mut Session<C, R, P>,
        rng: &mut impl Rng,
    ) -> bool {
        if self.remaining() == 0 {
            return false;
        }
        self.started += 1;

        let go_left = rng.random_bool(0.5);
        let (handle, correct, direction) = if go_left {
            (self.left.clone(), "f", "left")
        } else {
            (self.right.clone(), "j", "right")
        };

        session.init_trial(
            TrialParams::new(BLOCK_ID).inter_trial_delay(vec![500.0, 750.0, 1000.0]),
        );
        session.declare(
            StimulusSpec::new("fixation", self.fixation.clone()).duration(vec![400.0, 600.0]),
        );
        session.declare(
            StimulusSpec::new("probe", handle)
                .allowable("fj")
                .correct(correct)
                .end_action(EndAction::Terminate)
                .duration(2000.0)
                .on_activate(move |trial| {
                    trial.set("probe[Direction]", direction);
                    Ok(())
                }),
        );
        session.declare(
            StimulusSpec::new("feedback", self.feedback.clone())
                .conditional(|trial| trial.get_f64("probe[ACC]") != Some(1.0))
                .duration(500.0),
        );
        session.exit_trial();
        session.start();
        tracing::debug!(trial = self.started, direction, "trial declared");
        true
    }
}

/// Collects finished trials and logs each one as JSON.
#[derive(Debug, Default)]
pub struct RecordLog {
    pub records: Vec<TrialRecord>,
}

impl PageHost for RecordLog {
    fn page_advanced(&mut self, page: usize) {
        tracing::trace!(page, "page advanced");
    }

    fn trial_finished(&mut self, record: &TrialRecord) {
        match serde_json::to_string(record) {
            Ok(json) => tracing::info!(trial = record.trial_nr, record = %json, "trial stored"),
            Err(err) => tracing::warn!(%err, "trial record not serialisable"),
        }
        self.records.push(record.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use reflex_engine::EngineConfig;
    use reflex_store::MemoryPersistence;
    use reflex_timing::{FrameSource, ManualClock, ScriptedFrames};

    #[test]
    fn task_runs_every_trial_and_answers_correctly() {
        let clock = ManualClock::new(1_000.0);
        let mut frames = ScriptedFrames::steady(clock.clone(), 16.0);
        let config = EngineConfig {
            calibration_window_ms: 100.0,
            ..EngineConfig::default()
        };
        let mut session = Session::new(
            config,
            clock.clone(),
            StdRng::seed_from_u64(3),
            MemoryPersistence::new(),
        );
        let scene = Scene::new();
        let mut task = ArrowTask::new(&scene, (100.0, 100.0), 3);
        let mut rng = StdRng::seed_from_u64(9);
        let mut log = RecordLog::default();

        while task.next_trial(&mut session, &mut rng) {
            for _ in 0..2000 {
                if session.phase().is_finished() {
                    break;
                }
                let probe_on = session
                    .scheduler()
                    .active()
                    .is_some_and(|a| a.stimulus_id == "probe" && a.onset_time.is_some());
                if session.is_capturing() && probe_on {
                    let key = if scene.is_visible(task.left.index()) { 'f' } else { 'j' };
                    session.handle_input(key);
                }
                frames.next_frame();
                session.tick(&mut log);
            }
        }

        assert_eq!(log.records.len(), 3);
        for record in &log.records {
            assert_eq!(record.field("probe[ACC]"), Some("1"));
            assert!(record.field("feedback[OnsetTime]").is_none_or(str::is_empty));
        }
        assert!(scene.visible().is_empty());
        assert_eq!(task.remaining(), 0);
    }
}
