//! Incremental aggregates maintained over a sliding window.
//!
//! ## Design
//!
//! Window cursors never recompute from scratch on a step. They hand the
//! aggregate the value leaving the window and the value entering it, and
//! the aggregate updates in place:
//!
//! ```text
//! forward step:   [a b c d] e   ->   a [b c d e]    slide_forward(a, e)
//! backward step:  z [a b c d]   ->   [z a b c] d    slide_backward(d, z)
//! ```
//!
//! Window growth and shrinkage (ramp-up, key-width windows) go through the
//! `push_*` / `pop_*` operations. Values are always handed over exactly as
//! they were admitted so order-sensitive aggregates can verify them.
//!
//! ## Components
//!
//! - [`RunningStats`] / [`OnlineAggregate`]: exactly reversible sum, mean, variance
//! - [`RunningMedian`]: fixed-width median with O(sqrt(w)) updates
//! - [`MovingMedian`]: window median switching between naive and indexed modes

mod exact;
mod median;
mod moving_median;
mod running;

pub use median::{naive_median, RunningMedian};
pub use moving_median::MovingMedian;
pub use running::{OnlineAggregate, RunningAggregate, RunningStats, Statistic};

use std::fmt::Debug;

use sha2::{Digest, Sha256};

use crate::error::Result;

/// Aggregate driven by a window cursor.
///
/// The window is a sequence: `front` is the oldest value, `back` the newest.
pub trait WindowAggregate: Clone + Debug {
    /// Append a value as the newest
    fn push_back(&mut self, value: f64);

    /// Prepend a value as the oldest
    fn push_front(&mut self, value: f64);

    /// Remove the oldest value, which must equal `value`
    fn pop_front(&mut self, value: f64) -> Result<()>;

    /// Remove the newest value, which must equal `value`
    fn pop_back(&mut self, value: f64) -> Result<()>;

    /// Forward step at constant width: evict the oldest, admit a newest.
    fn slide_forward(&mut self, evicted: f64, admitted: f64) -> Result<()> {
        self.pop_front(evicted)?;
        self.push_back(admitted);
        Ok(())
    }

    /// Backward step at constant width: evict the newest, admit an oldest.
    fn slide_backward(&mut self, evicted: f64, admitted: f64) -> Result<()> {
        self.pop_back(evicted)?;
        self.push_front(admitted);
        Ok(())
    }

    /// Replace the contents with `values`, oldest first
    fn load(&mut self, values: &[f64]) {
        self.clear();
        for &value in values {
            self.push_back(value);
        }
    }

    /// Drop all values
    fn clear(&mut self);

    /// Number of values held
    fn len(&self) -> usize;

    #[inline]
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Aggregate over the held values; `NaN` when empty
    fn current(&self) -> f64;

    /// Feed the aggregate's state into a state-root hasher.
    ///
    /// Two aggregates holding the same values must hash identically. The
    /// default covers only the count and the current result; aggregates
    /// with richer internal state override it.
    fn hash_into(&self, hasher: &mut Sha256) {
        hasher.update((self.len() as u64).to_le_bytes());
        hasher.update(self.current().to_bits().to_le_bytes());
    }
}

/// Bitwise value identity, treating every NaN as equal.
#[inline]
pub(crate) fn same_value(a: f64, b: f64) -> bool {
    a.to_bits() == b.to_bits() || (a.is_nan() && b.is_nan())
}
