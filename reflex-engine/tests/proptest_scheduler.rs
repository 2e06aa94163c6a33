use proptest::prelude::*;
use reflex_core::{ElementTiming, NullHandle};
use reflex_engine::{DisplayElement, ElementFn, FrameEvent, FrameScheduler};
use reflex_store::TrialData;
use reflex_timing::ManualClock;
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Call {
    Display,
    During,
    Hide,
}

type Log = Rc<RefCell<Vec<(usize, Call)>>>;

fn logger(log: &Log, idx: usize, call: Call) -> Option<ElementFn> {
    let log = log.clone();
    Some(Box::new(move |_: &ElementTiming, _: &mut TrialData| -> anyhow::Result<()> {
        log.borrow_mut().push((idx, call));
        Ok(())
    }))
}

#[derive(Debug, Clone)]
struct ElementPlan {
    duration: f64,
    delay: f64,
    advance: bool,
    /// Frame at which the element is pushed.
    pushed_at: usize,
}

fn plan() -> impl Strategy<Value = ElementPlan> {
    (
        prop_oneof![Just(f64::INFINITY), 0.0f64..200.0],
        0.0f64..100.0,
        any::<bool>(),
        0usize..20,
    )
        .prop_map(|(duration, delay, advance, pushed_at)| ElementPlan {
            duration,
            delay,
            advance,
            pushed_at,
        })
}

proptest! {
    #[test]
    fn show_and_hide_happen_once_and_in_order(
        plans in prop::collection::vec(plan(), 1..8),
        intervals in prop::collection::vec(1.0f64..40.0, 1..6),
        period in 5.0f64..25.0,
    ) {
        let clock = ManualClock::new(10_000.0);
        let mut trial = TrialData::new();
        let mut sched = FrameScheduler::new(period);
        sched.set_ready();
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let mut timings: Vec<Option<ElementTiming>> = vec![None; plans.len()];
        let mut ids = Vec::new();

        for frame in 0..80 {
            for (idx, p) in plans.iter().enumerate().filter(|(_, p)| p.pushed_at == frame) {
                let element = DisplayElement::new(format!("e{idx}"), Box::new(NullHandle))
                    .duration(p.duration)
                    .delay(p.delay)
                    .advance_on_hide(p.advance)
                    .with_callbacks(
                        logger(&log, idx, Call::Display),
                        logger(&log, idx, Call::During),
                        logger(&log, idx, Call::Hide),
                    );
                let at = sched.request_time(&clock);
                ids.push((sched.push(element, at), idx));
            }
            if frame == 70 {
                sched.hide_all();
            }
            clock.advance(intervals[frame % intervals.len()]);
            let report = sched.tick(&clock, &mut trial);
            for event in report.events {
                if let FrameEvent::Hidden { id, timing, .. } = event {
                    let idx = ids.iter().find(|(e, _)| *e == id).map(|(_, i)| *i).unwrap();
                    timings[idx] = Some(timing);
                }
            }
        }

        prop_assert!(sched.is_empty());
        let log = log.borrow();
        for idx in 0..plans.len() {
            let calls: Vec<Call> = log.iter().filter(|(i, _)| *i == idx).map(|(_, c)| *c).collect();
            let displays = calls.iter().filter(|c| **c == Call::Display).count();
            let hides = calls.iter().filter(|c| **c == Call::Hide).count();
            prop_assert!(displays <= 1);
            prop_assert_eq!(displays, hides);
            if displays == 1 {
                prop_assert_eq!(calls.first(), Some(&Call::Display));
                prop_assert_eq!(calls.last(), Some(&Call::Hide));
                let timing = timings[idx].as_ref().unwrap();
                prop_assert!(timing.display_onset.unwrap() <= timing.display_offset.unwrap());
            }
        }
    }
}
