//! Concurrent-safe accumulators
//!
//! Aggregators are named accumulators shared by every compute invocation in
//! a run. Compute functions combine values into them concurrently; the
//! executor reads `delta` between supersteps to test for convergence.

use std::sync::atomic::{AtomicU64, Ordering};

/// A named, concurrent-safe accumulator.
///
/// `aggregate` must be a commutative combine. `delta` reports the change in
/// the value since the previous call to `delta` or `set`.
pub trait Aggregator: Send + Sync {
    /// Names the aggregator kind for serialization.
    fn kind(&self) -> &'static str;

    /// Overwrites the current value and resets the delta baseline.
    fn set(&self, value: f64);

    /// Returns the current value.
    fn get(&self) -> f64;

    /// Combines `value` into the accumulator.
    fn aggregate(&self, value: f64);

    /// Returns the change since the last `delta` or `set`.
    fn delta(&self) -> f64;
}

/// A float accumulator using compare-and-swap over the IEEE 754 bit pattern
/// held in an atomic 64-bit integer.
#[derive(Default)]
pub struct Float64Accumulator {
    cur: AtomicU64,
    prev: AtomicU64,
}

impl Float64Accumulator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Aggregator for Float64Accumulator {
    fn kind(&self) -> &'static str {
        "float64_accumulator"
    }

    fn set(&self, value: f64) {
        let bits = value.to_bits();
        self.cur.store(bits, Ordering::SeqCst);
        self.prev.store(bits, Ordering::SeqCst);
    }

    fn get(&self) -> f64 {
        f64::from_bits(self.cur.load(Ordering::SeqCst))
    }

    fn aggregate(&self, value: f64) {
        loop {
            let old = self.cur.load(Ordering::SeqCst);
            let new = (f64::from_bits(old) + value).to_bits();
            if self
                .cur
                .compare_exchange(old, new, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return;
            }
        }
    }

    fn delta(&self) -> f64 {
        loop {
            let cur = self.cur.load(Ordering::SeqCst);
            let prev = self.prev.load(Ordering::SeqCst);
            if self
                .prev
                .compare_exchange(prev, cur, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return f64::from_bits(cur) - f64::from_bits(prev);
            }
        }
    }
}
