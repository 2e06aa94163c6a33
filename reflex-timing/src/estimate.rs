use std::collections::VecDeque;

/// Nominal 60 Hz period used until a block has been calibrated.
pub const DEFAULT_REFRESH_PERIOD_MS: f64 = 1000.0 / 60.0;

/// Fraction of a period past which a partial frame counts as a whole one.
///
/// Frame callbacks fire systematically late, so a remainder this close to a
/// full period means the refresh has already happened.
pub const FRAME_BIAS_RATIO: f64 = 0.9;

/// Median of `values`; the mean of the two middle values for even counts.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let half = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[half])
    } else {
        Some((sorted[half - 1] + sorted[half]) / 2.0)
    }
}

/// Whole refresh periods between `previous` and `current`.
pub fn calc_frames(previous: f64, current: f64, period: f64) -> u64 {
    if period <= 0.0 || current <= previous {
        return 0;
    }
    let diff = current - previous;
    let whole = (diff / period).floor();
    let remainder = diff - whole * period;
    let mut frames = whole as u64;
    if remainder >= period * FRAME_BIAS_RATIO {
        frames += 1;
    }
    frames
}

/// Median of the positive deltas between consecutive frame timestamps.
pub fn estimate_refresh_period(samples: &[f64]) -> Option<f64> {
    median(&positive_deltas(samples.iter()))
}

fn positive_deltas<'a>(samples: impl Iterator<Item = &'a f64> + Clone) -> Vec<f64> {
    samples
        .clone()
        .zip(samples.skip(1))
        .map(|(a, b)| b - a)
        .filter(|d| *d > 0.0)
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationStats {
    pub samples: usize,
    pub average_frame_time_ms: f64,
    pub jitter_ms: f64,
    pub min_frame_time_ms: f64,
    pub max_frame_time_ms: f64,
    pub effective_hz: f64,
    pub median_period_ms: Option<f64>,
}

/// Collects frame timestamps during a calibration window.
#[derive(Debug, Clone)]
pub struct RefreshEstimator {
    samples: VecDeque<f64>,
    max_samples: usize,
}

impl RefreshEstimator {
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    pub fn with_capacity(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples: max_samples.max(2),
        }
    }

    pub fn record(&mut self, timestamp: f64) {
        if self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(timestamp);
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn estimate(&self) -> Option<f64> {
        median(&positive_deltas(self.samples.iter()))
    }

    pub fn calibration_stats(&self) -> CalibrationStats {
        let deltas = positive_deltas(self.samples.iter());
        if deltas.is_empty() {
            return CalibrationStats {
                samples: self.samples.len(),
                average_frame_time_ms: 0.0,
                jitter_ms: 0.0,
                min_frame_time_ms: 0.0,
                max_frame_time_ms: 0.0,
                effective_hz: 0.0,
                median_period_ms: None,
            };
        }
        let avg = deltas.iter().sum::<f64>() / deltas.len() as f64;
        let var = deltas.iter().map(|x| (x - avg).powi(2)).sum::<f64>() / deltas.len() as f64;
        let min = deltas.iter().copied().fold(f64::INFINITY, f64::min);
        let max = deltas.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        CalibrationStats {
            samples: self.samples.len(),
            average_frame_time_ms: avg,
            jitter_ms: var.sqrt(),
            min_frame_time_ms: min,
            max_frame_time_ms: max,
            effective_hz: if avg > 0.0 { 1000.0 / avg } else { 0.0 },
            median_period_ms: median(&deltas),
        }
    }
}

impl Default for RefreshEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_of_small_inputs() {
        assert_eq!(median(&[]), None);
        assert_eq!(median(&[5.0]), Some(5.0));
        assert_eq!(median(&[4.0, 6.0]), Some(5.0));
        assert_eq!(median(&[1.0, 2.0, 3.0]), Some(2.0));
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
    }

    #[test]
    fn calc_frames_applies_late_callback_bias() {
        assert_eq!(calc_frames(0.0, 16.0, 16.66), 1);
        assert_eq!(calc_frames(0.0, 50.0, 16.66), 3);
        assert_eq!(calc_frames(0.0, 33.0, 16.66), 2);
        assert_eq!(calc_frames(0.0, 25.0, 16.66), 1);
    }

    #[test]
    fn calc_frames_guards_degenerate_input() {
        assert_eq!(calc_frames(10.0, 5.0, 16.66), 0);
        assert_eq!(calc_frames(0.0, 100.0, 0.0), 0);
    }

    #[test]
    fn estimate_uses_median_of_differences() {
        // One dropped frame (33.4) and one early callback (15.0) do not move
        // the median delta.
        let samples = [0.0, 16.7, 33.4, 66.8, 81.8, 98.5];
        assert_eq!(estimate_refresh_period(&samples), Some(16.7));
    }

    #[test]
    fn estimate_ignores_non_increasing_samples() {
        let samples = [10.0, 10.0, 26.0, 20.0, 36.0];
        assert_eq!(estimate_refresh_period(&samples), Some(16.0));
        assert_eq!(estimate_refresh_period(&[4.0]), None);
    }

    #[test]
    fn estimator_window_is_bounded() {
        let mut est = RefreshEstimator::with_capacity(3);
        for t in [0.0, 10.0, 20.0, 30.0, 40.0] {
            est.record(t);
        }
        assert_eq!(est.len(), 3);
        assert_eq!(est.estimate(), Some(10.0));
        est.record(55.0);
        assert_eq!(est.calibration_stats().max_frame_time_ms, 15.0);
        est.clear();
        for t in [0.0, 10.0, 20.0, 30.0, 40.0] {
            est.record(t);
        }
        let stats = est.calibration_stats();
        assert_eq!(stats.average_frame_time_ms, 10.0);
        assert_eq!(stats.jitter_ms, 0.0);
        assert_eq!(stats.effective_hz, 100.0);
    }
}
