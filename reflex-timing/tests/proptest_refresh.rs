//! Property tests for refresh estimation and frame counting.
//!
//! 1. `calc_frames` never decreases as the current time grows.
//! 2. `calc_frames` is within one frame of the exact quotient.
//! 3. The median lies between the minimum and maximum input.
//! 4. A jittered periodic sample stream estimates its period within the jitter.

use proptest::prelude::*;
use reflex_timing::{calc_frames, estimate_refresh_period, median};

fn period_strategy() -> impl Strategy<Value = f64> {
    (5.0f64..50.0).prop_map(|p| (p * 100.0).round() / 100.0)
}

proptest! {
    #[test]
    fn calc_frames_is_monotonic(period in period_strategy(), a in 0.0f64..10_000.0, b in 0.0f64..10_000.0) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(calc_frames(0.0, lo, period) <= calc_frames(0.0, hi, period));
    }

    #[test]
    fn calc_frames_stays_near_quotient(period in period_strategy(), elapsed in 0.0f64..10_000.0) {
        let frames = calc_frames(0.0, elapsed, period) as f64;
        let exact = elapsed / period;
        prop_assert!(frames >= exact.floor());
        prop_assert!(frames <= exact.floor() + 1.0);
    }

    #[test]
    fn median_is_bounded(values in prop::collection::vec(-1_000.0f64..1_000.0, 1..64)) {
        let m = median(&values).unwrap();
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        prop_assert!(m >= min && m <= max);
    }

    #[test]
    fn jittered_stream_estimates_its_period(
        period in period_strategy(),
        jitter in prop::collection::vec(-1.0f64..1.0, 8..120),
    ) {
        let mut t = 1.0e12;
        let mut samples = Vec::with_capacity(jitter.len());
        for j in &jitter {
            t += period + j;
            samples.push(t);
        }
        let estimate = estimate_refresh_period(&samples).unwrap();
        prop_assert!((estimate - period).abs() <= 1.0 + 1e-6, "estimate {} for period {}", estimate, period);
    }
}
