use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Source of millisecond timestamps aligned to the Unix epoch.
///
/// Every component reads time through this trait so the scheduler can be
/// driven by a real monotonic clock, a coarse wall clock, or a scripted one.
pub trait Clock: Clone + Send + Sync {
    fn now(&self) -> f64;

    fn capability(&self) -> ClockCapability;

    fn elapsed(&self, since: f64) -> Duration {
        Duration::from_secs_f64((self.now() - since).max(0.0) / 1000.0)
    }
}

/// How much the platform clock can be trusted for sub-frame timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClockCapability {
    NativeHighRes,
    /// Only a coarse wall clock; frame callbacks are paced by a timer.
    TimerFallback,
}

impl ClockCapability {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClockCapability::NativeHighRes => "native-highres",
            ClockCapability::TimerFallback => "timer",
        }
    }

    pub fn is_high_res(&self) -> bool {
        matches!(self, ClockCapability::NativeHighRes)
    }
}

fn epoch_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
        * 1000.0
}

/// Monotonic clock: an [`Instant`] anchored once to the wall-clock epoch.
#[derive(Debug, Clone)]
pub struct HighPrecisionClock {
    start: Instant,
    epoch_at_start: f64,
}

impl HighPrecisionClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            epoch_at_start: epoch_ms(),
        }
    }
}

impl Default for HighPrecisionClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for HighPrecisionClock {
    fn now(&self) -> f64 {
        self.epoch_at_start + self.start.elapsed().as_secs_f64() * 1000.0
    }

    fn capability(&self) -> ClockCapability {
        ClockCapability::NativeHighRes
    }
}

/// Wall clock truncated to whole milliseconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoarseClock;

impl Clock for CoarseClock {
    fn now(&self) -> f64 {
        epoch_ms().floor()
    }

    fn capability(&self) -> ClockCapability {
        ClockCapability::TimerFallback
    }
}

/// The best clock the host offers, picked by probing [`Instant`].
#[derive(Debug, Clone)]
pub enum HostClock {
    HighRes(HighPrecisionClock),
    Coarse(CoarseClock),
}

const PROBE_ROUNDS: usize = 16;
const PROBE_SPIN_LIMIT: usize = 1_000_000;

impl HostClock {
    pub fn detect() -> Self {
        let resolution = Self::probe_resolution_ms();
        if resolution <= 1.0 {
            tracing::debug!(resolution_ms = resolution, "using monotonic high-resolution clock");
            HostClock::HighRes(HighPrecisionClock::new())
        } else {
            tracing::warn!(
                resolution_ms = resolution,
                "monotonic clock too coarse, timing precision is reduced"
            );
            HostClock::Coarse(CoarseClock)
        }
    }

    /// Smallest observable non-zero step of [`Instant`], in milliseconds.
    fn probe_resolution_ms() -> f64 {
        let mut best = f64::INFINITY;
        for _ in 0..PROBE_ROUNDS {
            let a = Instant::now();
            let mut b = Instant::now();
            let mut spins = 0;
            while b == a && spins < PROBE_SPIN_LIMIT {
                b = Instant::now();
                spins += 1;
            }
            let step = (b - a).as_secs_f64() * 1000.0;
            if step > 0.0 {
                best = best.min(step);
            }
        }
        best
    }
}

impl Clock for HostClock {
    fn now(&self) -> f64 {
        match self {
            HostClock::HighRes(c) => c.now(),
            HostClock::Coarse(c) => c.now(),
        }
    }

    fn capability(&self) -> ClockCapability {
        match self {
            HostClock::HighRes(c) => c.capability(),
            HostClock::Coarse(c) => c.capability(),
        }
    }
}

/// Settable clock shared between a driver and the engine. Clones observe the
/// same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now_bits: Arc<AtomicU64>,
    capability: ClockCapability,
}

impl ManualClock {
    pub fn new(start_ms: f64) -> Self {
        Self {
            now_bits: Arc::new(AtomicU64::new(start_ms.to_bits())),
            capability: ClockCapability::NativeHighRes,
        }
    }

    pub fn with_capability(mut self, capability: ClockCapability) -> Self {
        self.capability = capability;
        self
    }

    pub fn set(&self, ms: f64) {
        self.now_bits.store(ms.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, ms: f64) {
        self.set(self.now() + ms);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.now_bits.load(Ordering::SeqCst))
    }

    fn capability(&self) -> ClockCapability {
        self.capability
    }
}

/// Sleeps for `duration` using the most precise primitive available.
pub fn high_precision_sleep(duration: Duration) {
    #[cfg(target_os = "linux")]
    linux_sleep(duration);
    #[cfg(not(target_os = "linux"))]
    std::thread::sleep(duration);
}

#[cfg(target_os = "linux")]
fn linux_sleep(duration: Duration) {
    use libc::{CLOCK_MONOTONIC, clock_nanosleep, timespec};

    let req = timespec {
        tv_sec: duration.as_secs() as libc::time_t,
        tv_nsec: duration.subsec_nanos() as libc::c_long,
    };

    // SAFETY: `req` is a valid timespec and the remainder pointer may be null.
    unsafe {
        clock_nanosleep(CLOCK_MONOTONIC, 0, &req, std::ptr::null_mut());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new(1_000.0);
        let view = clock.clone();
        clock.advance(16.5);
        assert_eq!(view.now(), 1_016.5);
        view.set(2_000.0);
        assert_eq!(clock.now(), 2_000.0);
    }

    #[test]
    fn high_precision_clock_is_epoch_aligned_and_monotonic() {
        let clock = HighPrecisionClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(a > 1e12, "expected an epoch timestamp, got {a}");
        assert!(b >= a);
        assert!(clock.capability().is_high_res());
    }

    #[test]
    fn coarse_clock_reports_fallback() {
        assert_eq!(CoarseClock.capability(), ClockCapability::TimerFallback);
        assert_eq!(CoarseClock.capability().as_str(), "timer");
        assert_eq!(CoarseClock.now().fract(), 0.0);
    }

    #[test]
    fn elapsed_never_goes_negative() {
        let clock = ManualClock::new(50.0);
        assert_eq!(clock.elapsed(80.0), Duration::ZERO);
        assert!((clock.elapsed(40.0).as_secs_f64() - 0.010).abs() < 1e-9);
    }
}
