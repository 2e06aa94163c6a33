/// Where a trial is in its Init -> Stimuli -> Exit pass.
#[derive(Copy, Debug, Clone, PartialEq, Eq, Default)]
pub enum TrialPhase {
    /// No trial has been initialised on the session yet.
    #[default]
    Idle,
    /// The init page is on screen; on the first trial of a block this is
    /// also the refresh calibration window.
    Init,
    Stimuli,
    /// The storage page has been shown and the trial record is being built.
    Exit,
    Done,
}

impl TrialPhase {
    pub fn allows_input(&self) -> bool {
        matches!(self, Self::Stimuli)
    }

    pub fn next(&self) -> Option<Self> {
        use TrialPhase::*;
        Some(match self {
            Idle => Init,
            Init => Stimuli,
            Stimuli => Exit,
            Exit => Done,
            Done => return None,
        })
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_run_in_order_and_stop_at_done() {
        let mut phase = TrialPhase::default();
        let mut seen = vec![phase];
        while let Some(next) = phase.next() {
            phase = next;
            seen.push(phase);
        }
        assert_eq!(
            seen,
            vec![
                TrialPhase::Idle,
                TrialPhase::Init,
                TrialPhase::Stimuli,
                TrialPhase::Exit,
                TrialPhase::Done
            ]
        );
        assert!(phase.is_finished());
    }

    #[test]
    fn only_stimuli_accept_input() {
        assert!(TrialPhase::Stimuli.allows_input());
        assert!(!TrialPhase::Init.allows_input());
        assert!(!TrialPhase::Exit.allows_input());
    }
}
