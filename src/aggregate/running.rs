//! Online sum / mean / variance accumulators.
//!
//! ## Exact Accumulation
//!
//! ```text
//! add(x):    count += 1
//!            S1 += x        (exact, fixed-point limbs)
//!            S2 += x * x    (exact, fixed-point limbs)
//!
//! remove(x): count -= 1, S1 -= x, S2 -= x * x
//! ```
//!
//! `S1` and `S2` are integers on a fixed binary grid (see `exact.rs`), so a
//! remove undoes its add bit for bit and the stored state depends only on
//! which values are held. A window that slides forward and back returns to
//! the identical accumulator whatever the values are.
//!
//! Derived statistics are computed on read and rounded once:
//!
//! ```text
//! sum      = round(S1)
//! mean     = sum / count
//! M2       = S2 - S1^2 / count      (double-double, clamped at zero)
//! variance = M2 / (count - 1)
//! ```
//!
//! `NaN` and infinities are counted on the side and poison every statistic
//! while they are held.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::aggregate::exact::{ExactSquares, ExactSum};
use crate::aggregate::WindowAggregate;
use crate::error::{CursorError, Result};

/// Reversible accumulator with O(1) updates.
pub trait RunningAggregate {
    /// Admit a value
    fn add_value(&mut self, value: f64);

    /// Reverse a previous `add_value(value)`.
    ///
    /// # Errors
    ///
    /// [`CursorError::EmptyAggregate`] when no values are held.
    fn remove_value(&mut self, value: f64) -> Result<()>;

    /// Aggregate over the values currently held; `NaN` when empty
    fn current_result(&self) -> f64;

    /// Number of values currently held
    fn count(&self) -> usize;
}

/// Exactly reversible accumulator for count, sum, mean and variance.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningStats {
    count: usize,
    sum: ExactSum,
    squares: ExactSquares,
    nan: usize,
    pos_inf: usize,
    neg_inf: usize,
}

impl RunningStats {
    /// Create an empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a value
    pub fn add_value(&mut self, value: f64) {
        self.count += 1;
        if value.is_nan() {
            self.nan += 1;
        } else if value == f64::INFINITY {
            self.pos_inf += 1;
        } else if value == f64::NEG_INFINITY {
            self.neg_inf += 1;
        } else {
            self.sum.add(value);
            self.squares.add_square(value);
        }
    }

    /// Reverse a previous `add_value(value)`.
    ///
    /// # Errors
    ///
    /// [`CursorError::EmptyAggregate`] when empty, and
    /// [`CursorError::InvalidOperation`] for a `NaN` or infinity that is not
    /// held. Nothing changes on error.
    pub fn remove_value(&mut self, value: f64) -> Result<()> {
        if self.count == 0 {
            return Err(CursorError::EmptyAggregate);
        }
        if value.is_finite() {
            self.sum.sub(value);
            self.squares.sub_square(value);
        } else {
            let held = if value.is_nan() {
                &mut self.nan
            } else if value > 0.0 {
                &mut self.pos_inf
            } else {
                &mut self.neg_inf
            };
            if *held == 0 {
                return Err(CursorError::InvalidOperation(
                    "removed a non-finite value that was never added",
                ));
            }
            *held -= 1;
        }
        self.count -= 1;
        Ok(())
    }

    /// Number of values held
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Whether a `NaN` or infinity is held
    #[inline]
    fn has_non_finite(&self) -> bool {
        self.nan + self.pos_inf + self.neg_inf > 0
    }

    /// Correctly rounded sum of values held (`0.0` when empty)
    pub fn sum(&self) -> f64 {
        match (self.nan, self.pos_inf, self.neg_inf) {
            (0, 0, 0) => self.sum.to_f64(),
            (0, _, 0) => f64::INFINITY,
            (0, 0, _) => f64::NEG_INFINITY,
            _ => f64::NAN,
        }
    }

    /// `sum / count`, or `NaN` when empty
    #[inline]
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            f64::NAN
        } else {
            self.sum() / self.count as f64
        }
    }

    /// Sum of squared deviations from the mean (`0.0` when empty).
    pub fn sum2(&self) -> f64 {
        if self.has_non_finite() {
            return f64::NAN;
        }
        if self.count == 0 || self.squares.is_zero() {
            return 0.0;
        }
        let n = self.count as f64;
        let (a_hi, a_lo) = self.sum.to_double_double();
        let (b_hi, b_lo) = self.squares.to_double_double();

        // S1^2
        let p_hi = a_hi * a_hi;
        let p_lo = a_hi.mul_add(a_hi, -p_hi) + 2.0 * a_hi * a_lo;

        // S1^2 / n
        let q_hi = p_hi / n;
        let remainder = (-q_hi).mul_add(n, p_hi);
        let q_lo = (remainder + p_lo) / n;

        let m2 = (b_hi - q_hi) + (b_lo - q_lo);
        if m2.is_nan() {
            m2
        } else {
            m2.max(0.0)
        }
    }

    /// Sample variance, or `NaN` below two values
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            f64::NAN
        } else {
            self.sum2() / (self.count - 1) as f64
        }
    }

    /// Sample standard deviation, or `NaN` below two values
    #[inline]
    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Drop all values
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Feed the full accumulator state into a state-root hasher
    pub fn hash_into(&self, hasher: &mut Sha256) {
        hasher.update((self.count as u64).to_le_bytes());
        for counter in [self.nan, self.pos_inf, self.neg_inf] {
            hasher.update((counter as u64).to_le_bytes());
        }
        self.sum.hash_into(hasher);
        self.squares.hash_into(hasher);
    }
}

impl RunningAggregate for RunningStats {
    fn add_value(&mut self, value: f64) {
        RunningStats::add_value(self, value);
    }

    fn remove_value(&mut self, value: f64) -> Result<()> {
        RunningStats::remove_value(self, value)
    }

    fn current_result(&self) -> f64 {
        self.mean()
    }

    fn count(&self) -> usize {
        self.count
    }
}

/// Statistic reported by an [`OnlineAggregate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Statistic {
    Sum,
    #[default]
    Mean,
    Variance,
    StdDev,
}

/// Window aggregate backed by [`RunningStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OnlineAggregate {
    stats: RunningStats,
    statistic: Statistic,
}

impl OnlineAggregate {
    /// Empty aggregate reporting `statistic`
    pub fn new(statistic: Statistic) -> Self {
        Self {
            stats: RunningStats::new(),
            statistic,
        }
    }

    /// Moving sum
    pub fn sum() -> Self {
        Self::new(Statistic::Sum)
    }

    /// Moving average
    pub fn mean() -> Self {
        Self::new(Statistic::Mean)
    }

    /// Moving sample variance
    pub fn variance() -> Self {
        Self::new(Statistic::Variance)
    }

    /// Moving sample standard deviation
    pub fn std_dev() -> Self {
        Self::new(Statistic::StdDev)
    }

    /// Statistic this aggregate reports
    #[inline]
    pub fn statistic(&self) -> Statistic {
        self.statistic
    }

    /// Underlying accumulator
    #[inline]
    pub fn stats(&self) -> &RunningStats {
        &self.stats
    }
}

impl RunningAggregate for OnlineAggregate {
    fn add_value(&mut self, value: f64) {
        self.stats.add_value(value);
    }

    fn remove_value(&mut self, value: f64) -> Result<()> {
        self.stats.remove_value(value)
    }

    fn current_result(&self) -> f64 {
        match self.statistic {
            Statistic::Sum if self.stats.count() == 0 => f64::NAN,
            Statistic::Sum => self.stats.sum(),
            Statistic::Mean => self.stats.mean(),
            Statistic::Variance => self.stats.variance(),
            Statistic::StdDev => self.stats.std_dev(),
        }
    }

    fn count(&self) -> usize {
        self.stats.count()
    }
}

impl WindowAggregate for OnlineAggregate {
    fn push_back(&mut self, value: f64) {
        self.stats.add_value(value);
    }

    fn push_front(&mut self, value: f64) {
        self.stats.add_value(value);
    }

    fn pop_front(&mut self, value: f64) -> Result<()> {
        self.stats.remove_value(value)
    }

    fn pop_back(&mut self, value: f64) -> Result<()> {
        self.stats.remove_value(value)
    }

    fn clear(&mut self) {
        self.stats.clear();
    }

    fn len(&self) -> usize {
        self.stats.count()
    }

    fn current(&self) -> f64 {
        self.current_result()
    }

    fn hash_into(&self, hasher: &mut Sha256) {
        hasher.update([self.statistic as u8]);
        self.stats.hash_into(hasher);
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9 * (1.0 + a.abs().max(b.abs()))
    }

    fn reference_variance(values: &[f64]) -> f64 {
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / (n - 1.0)
    }

    fn stats_of(values: &[f64]) -> RunningStats {
        let mut stats = RunningStats::new();
        for &v in values {
            stats.add_value(v);
        }
        stats
    }

    #[test]
    fn test_empty_stats() {
        let stats = RunningStats::new();
        assert_eq!(stats.count(), 0);
        assert_eq!(stats.sum(), 0.0);
        assert_eq!(stats.sum2(), 0.0);
        assert!(stats.mean().is_nan());
        assert!(stats.variance().is_nan());
        assert!(stats.current_result().is_nan());
    }

    #[test]
    fn test_add_values() {
        let stats = stats_of(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(stats.count(), 8);
        assert_eq!(stats.sum(), 40.0);
        assert_eq!(stats.mean(), 5.0);
        assert_eq!(stats.sum2(), 32.0);
        assert_eq!(stats.variance(), 32.0 / 7.0);
    }

    #[test]
    fn test_remove_reverses_add() {
        let mut stats = stats_of(&[1.5, -2.0, 8.25, 3.0]);
        let before = stats;

        stats.add_value(100.0);
        stats.remove_value(100.0).unwrap();

        assert_eq!(stats, before);
    }

    #[test]
    fn test_fractional_slide_restores_exactly() {
        // Naive float accumulation drifts on these: 46.21 comes back as
        // 46.209999999999994 after sliding forward and back.
        let data: Vec<f64> = (0..200).map(|x| x as f64 * 0.1 + 0.01).collect();
        let width = 5;

        for start in 0..data.len() - 2 * width {
            let mut stats = stats_of(&data[start..start + width]);
            let before = stats;
            let (sum, variance) = (stats.sum(), stats.variance());

            for i in start..start + width {
                stats.remove_value(data[i]).unwrap();
                stats.add_value(data[i + width]);
            }
            for i in (start..start + width).rev() {
                stats.remove_value(data[i + width]).unwrap();
                stats.add_value(data[i]);
            }

            assert_eq!(stats, before, "start {start}");
            assert_eq!(stats.sum().to_bits(), sum.to_bits());
            assert_eq!(stats.variance().to_bits(), variance.to_bits());
        }
    }

    #[test]
    fn test_state_depends_only_on_held_values() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let values: Vec<f64> = (0..64).map(|_| rng.gen_range(-1e3..1e3) / 7.0).collect();
        let direct = stats_of(&values[32..]);

        // Reach the same window through a long run of adds and removes
        let mut walked = RunningStats::new();
        for (i, &v) in values.iter().enumerate() {
            walked.add_value(v);
            if i >= 32 {
                walked.remove_value(values[i - 32]).unwrap();
            }
        }
        assert_eq!(walked, direct);
        assert_eq!(walked.mean().to_bits(), direct.mean().to_bits());
    }

    #[test]
    fn test_sum_is_correctly_rounded() {
        assert_eq!(stats_of(&[1e100, 1.0, -1e100]).sum(), 1.0);
        assert_eq!(stats_of(&[0.1; 10]).sum(), 1.0);
        assert_eq!(stats_of(&[0.1; 10]).mean(), 0.1);
    }

    #[test]
    fn test_remove_to_empty_resets_exactly() {
        let mut stats = RunningStats::new();
        stats.add_value(0.1);
        stats.add_value(0.7);
        stats.remove_value(0.1).unwrap();
        stats.remove_value(0.7).unwrap();

        assert_eq!(stats, RunningStats::default());
    }

    #[test]
    fn test_remove_from_empty_fails() {
        let mut stats = RunningStats::new();
        assert_eq!(stats.remove_value(1.0), Err(CursorError::EmptyAggregate));
    }

    #[test]
    fn test_remove_unknown_non_finite_fails() {
        let mut stats = stats_of(&[1.0, 2.0]);
        let before = stats;
        assert!(matches!(
            stats.remove_value(f64::NAN),
            Err(CursorError::InvalidOperation(_))
        ));
        assert!(stats.remove_value(f64::INFINITY).is_err());
        assert_eq!(stats, before);
    }

    #[test]
    fn test_sliding_variance_matches_reference() {
        let data: Vec<f64> = (0..50).map(|i| ((i * 37) % 11) as f64 * 0.5 - 2.0).collect();
        let width = 7;
        let mut stats = RunningStats::new();

        for (i, &v) in data.iter().enumerate() {
            stats.add_value(v);
            if i >= width {
                stats.remove_value(data[i - width]).unwrap();
            }
            if i + 1 >= width {
                let window = &data[i + 1 - width..=i];
                assert!(approx(stats.variance(), reference_variance(window)), "step {i}");
            }
        }
    }

    #[test]
    fn test_variance_with_large_offset() {
        // Deviations survive a mean of 1e9
        let values: Vec<f64> = [4.0, 7.0, 13.0, 16.0].iter().map(|v| v + 1e9).collect();
        let stats = stats_of(&values);
        assert_eq!(stats.variance(), 30.0);

        let constant = stats_of(&[0.1; 7]);
        assert!(constant.variance() < 1e-25);
    }

    #[test]
    fn test_non_finite_values() {
        let mut stats = stats_of(&[1.0, f64::NAN]);
        assert!(stats.mean().is_nan());
        assert!(stats.variance().is_nan());

        stats.remove_value(f64::NAN).unwrap();
        assert_eq!(stats.mean(), 1.0);

        stats.add_value(f64::INFINITY);
        assert_eq!(stats.sum(), f64::INFINITY);
        stats.add_value(f64::NEG_INFINITY);
        assert!(stats.sum().is_nan());

        stats.remove_value(f64::INFINITY).unwrap();
        stats.remove_value(f64::NEG_INFINITY).unwrap();
        assert_eq!(stats, stats_of(&[1.0]));
    }

    #[test]
    fn test_online_aggregate_statistics() {
        let mut sum = OnlineAggregate::sum();
        let mut mean = OnlineAggregate::mean();
        let mut var = OnlineAggregate::variance();
        let mut sd = OnlineAggregate::std_dev();
        assert!(sum.current().is_nan());

        for v in [1.0, 2.0, 3.0, 4.0] {
            sum.push_back(v);
            mean.push_back(v);
            var.push_back(v);
            sd.push_back(v);
        }
        assert_eq!(sum.current(), 10.0);
        assert_eq!(mean.current(), 2.5);
        assert!(approx(var.current(), 5.0 / 3.0));
        assert!(approx(sd.current(), (5.0f64 / 3.0).sqrt()));
        assert_eq!(mean.statistic(), Statistic::Mean);
    }

    #[test]
    fn test_online_aggregate_slide() {
        let mut mean = OnlineAggregate::mean();
        mean.load(&[1.0, 2.0]);
        assert_eq!(mean.current(), 1.5);

        mean.slide_forward(1.0, 3.0).unwrap();
        assert_eq!(mean.current(), 2.5);

        mean.slide_backward(3.0, 1.0).unwrap();
        assert_eq!(mean.current(), 1.5);
        assert_eq!(mean.len(), 2);

        mean.clear();
        assert!(mean.is_empty());
        assert!(mean.current().is_nan());
    }

    #[test]
    fn test_hash_covers_accumulator_state() {
        let digest = |aggregate: &OnlineAggregate| {
            let mut hasher = Sha256::new();
            aggregate.hash_into(&mut hasher);
            hasher.finalize()
        };

        let mut a = OnlineAggregate::variance();
        a.load(&[1.0, 2.0, 3.0]);
        let mut b = OnlineAggregate::variance();
        b.load(&[2.0, 3.0, 4.0]);
        // Same count and variance, different held values
        assert_eq!(a.current(), b.current());
        assert_ne!(digest(&a), digest(&b));

        // Same multiset in another order
        let mut c = OnlineAggregate::variance();
        c.load(&[3.0, 1.0, 2.0]);
        assert_eq!(digest(&a), digest(&c));

        let mut d = OnlineAggregate::mean();
        d.load(&[1.0, 2.0, 3.0]);
        assert_ne!(digest(&a), digest(&d));
    }
}
