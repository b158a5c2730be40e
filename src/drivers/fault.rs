//! Latency and fault injection
//!
//! Drivers draw a delay and a failure decision from a [`FaultModel`] on every
//! operation. [`RandomFaults`] emulates hardware non-determinism; tests plug
//! in [`NoFaults`] or [`FixedFaults`] instead.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use spin::Mutex;

/// Source of simulated latency and transient failures
pub trait FaultModel: Send + Sync {
    /// Delay for the next operation
    fn latency(&self) -> Duration;

    /// Whether the next operation fails
    fn should_fail(&self) -> bool;
}

// ============================================================================
// Random
// ============================================================================

/// xorshift64* generator
#[derive(Debug, Clone)]
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        // Zero is a fixed point of xorshift
        Self {
            state: if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed },
        }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    /// Uniform in [0, 1)
    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }
}

/// Seed derived from the clock, distinct for every call
pub fn entropy_seed() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    nanos ^ COUNTER
        .fetch_add(1, Ordering::Relaxed)
        .wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// Uniform latency in `[min, max]` with a fixed failure probability
#[derive(Debug)]
pub struct RandomFaults {
    min: Duration,
    max: Duration,
    failure_chance: f64,
    rng: Mutex<XorShift64>,
}

impl RandomFaults {
    pub fn new(min: Duration, max: Duration, failure_chance: f64, seed: u64) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        Self {
            min,
            max,
            failure_chance: failure_chance.clamp(0.0, 1.0),
            rng: Mutex::new(XorShift64::new(seed)),
        }
    }

    pub fn failure_chance(&self) -> f64 {
        self.failure_chance
    }

    pub fn latency_range(&self) -> (Duration, Duration) {
        (self.min, self.max)
    }
}

impl FaultModel for RandomFaults {
    fn latency(&self) -> Duration {
        let span = self.max - self.min;
        let frac = self.rng.lock().next_f64();
        self.min + span.mul_f64(frac)
    }

    fn should_fail(&self) -> bool {
        self.rng.lock().next_f64() < self.failure_chance
    }
}

// ============================================================================
// Deterministic stand-ins
// ============================================================================

/// No latency, never fails
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFaults;

impl FaultModel for NoFaults {
    fn latency(&self) -> Duration {
        Duration::ZERO
    }

    fn should_fail(&self) -> bool {
        false
    }
}

/// Constant latency and a failure switch that can be flipped at runtime
#[derive(Debug, Default)]
pub struct FixedFaults {
    latency: Duration,
    failing: AtomicBool,
}

impl FixedFaults {
    pub fn new(latency: Duration, failing: bool) -> Self {
        Self {
            latency,
            failing: AtomicBool::new(failing),
        }
    }

    /// Every operation fails until switched back
    pub fn failing() -> Self {
        Self::new(Duration::ZERO, true)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl FaultModel for FixedFaults {
    fn latency(&self) -> Duration {
        self.latency
    }

    fn should_fail(&self) -> bool {
        self.failing.load(Ordering::SeqCst)
    }
}

/// Sleep for the model's next latency draw, returns the time slept
pub fn simulate_latency(model: &dyn FaultModel) -> Duration {
    let delay = model.latency();
    if !delay.is_zero() {
        std::thread::sleep(delay);
    }
    delay
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_latency_in_range() {
        let model = RandomFaults::new(
            Duration::from_millis(10),
            Duration::from_millis(100),
            0.05,
            42,
        );
        for _ in 0..1000 {
            let d = model.latency();
            assert!(d >= Duration::from_millis(10));
            assert!(d <= Duration::from_millis(100));
        }
    }

    #[test]
    fn test_random_failure_rate() {
        let model = RandomFaults::new(Duration::ZERO, Duration::ZERO, 0.05, 7);
        let failures = (0..10_000).filter(|_| model.should_fail()).count();
        // 5% of 10k with a generous margin
        assert!((300..=700).contains(&failures), "failures = {}", failures);
    }

    #[test]
    fn test_extreme_chances() {
        let never = RandomFaults::new(Duration::ZERO, Duration::ZERO, 0.0, 1);
        let always = RandomFaults::new(Duration::ZERO, Duration::ZERO, 1.5, 1);
        assert!((0..100).all(|_| !never.should_fail()));
        assert!((0..100).all(|_| always.should_fail()));
    }

    #[test]
    fn test_seeded_models_agree() {
        let a = RandomFaults::new(Duration::ZERO, Duration::from_millis(50), 0.5, 99);
        let b = RandomFaults::new(Duration::ZERO, Duration::from_millis(50), 0.5, 99);
        for _ in 0..50 {
            assert_eq!(a.latency(), b.latency());
            assert_eq!(a.should_fail(), b.should_fail());
        }
    }

    #[test]
    fn test_fixed_faults_switch() {
        let model = FixedFaults::failing();
        assert!(model.should_fail());
        model.set_failing(false);
        assert!(!model.should_fail());
        assert_eq!(simulate_latency(&model), Duration::ZERO);
    }

    #[test]
    fn test_zero_seed() {
        let mut rng = XorShift64::new(0);
        assert_ne!(rng.next_u64(), 0);
    }
}
