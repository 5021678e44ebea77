//! Window median that switches between a naive and an indexed mode.
//!
//! While the window is below its capacity (ramp-up, shrinking windows,
//! key-width windows) the values are kept in a plain deque and the median
//! is found by sorting. Once a bounded window fills up it is promoted to a
//! [`RunningMedian`], and constant-width slides cost O(sqrt(w)). Any
//! operation that changes the window size demotes it back to the deque.

use std::collections::VecDeque;

use log::debug;
use sha2::{Digest, Sha256};

use crate::aggregate::{naive_median, same_value, RunningMedian, WindowAggregate};
use crate::error::{CursorError, Result};

/// Median over a moving window of values.
#[derive(Debug, Clone)]
pub struct MovingMedian {
    /// Window size at which the indexed mode kicks in; `None` stays naive
    capacity: Option<usize>,

    /// Values in sequence order while naive
    ramp: VecDeque<f64>,

    /// Indexed state once full; `ramp` is empty while this is set
    indexed: Option<RunningMedian>,

    median: f64,
}

impl MovingMedian {
    /// Median for count windows of `width` values
    ///
    /// # Errors
    ///
    /// [`CursorError::InvalidWidth`] when `width` is zero.
    pub fn new(width: usize) -> Result<Self> {
        if width == 0 {
            return Err(CursorError::InvalidWidth("0".to_string()));
        }
        Ok(Self {
            capacity: Some(width),
            ramp: VecDeque::with_capacity(width),
            indexed: None,
            median: f64::NAN,
        })
    }

    /// Median for windows of varying size (key-width windows)
    pub fn unbounded() -> Self {
        Self {
            capacity: None,
            ramp: VecDeque::new(),
            indexed: None,
            median: f64::NAN,
        }
    }

    /// Whether the indexed O(sqrt(w)) mode is active
    #[inline]
    pub fn is_indexed(&self) -> bool {
        self.indexed.is_some()
    }

    /// Window size at which the indexed mode kicks in
    #[inline]
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Deque of values, demoting from indexed mode first
    fn ramp_mut(&mut self) -> &mut VecDeque<f64> {
        if let Some(indexed) = self.indexed.take() {
            debug!("moving median leaving indexed mode");
            self.ramp.extend(indexed.values_in_sequence());
        }
        &mut self.ramp
    }

    fn promote_if_full(&mut self) {
        if self.indexed.is_some() || self.capacity != Some(self.ramp.len()) {
            return;
        }
        if let Ok(indexed) = RunningMedian::from_window(self.ramp.make_contiguous()) {
            debug!("moving median entering indexed mode at width {}", self.ramp.len());
            self.indexed = Some(indexed);
            self.ramp.clear();
        }
    }

    fn refresh(&mut self) {
        self.median = match &self.indexed {
            Some(indexed) => indexed.median(),
            None => naive_median(self.ramp.make_contiguous()),
        };
    }

    fn settle(&mut self) {
        self.promote_if_full();
        self.refresh();
    }
}

impl WindowAggregate for MovingMedian {
    fn push_back(&mut self, value: f64) {
        self.ramp_mut().push_back(value);
        self.settle();
    }

    fn push_front(&mut self, value: f64) {
        self.ramp_mut().push_front(value);
        self.settle();
    }

    fn pop_front(&mut self, value: f64) -> Result<()> {
        let ramp = self.ramp_mut();
        match ramp.front().copied() {
            None => return Err(CursorError::EmptyAggregate),
            Some(oldest) if !same_value(oldest, value) => {
                return Err(CursorError::InvalidOperation(
                    "evicted value is not the oldest in the window",
                ))
            }
            Some(_) => {
                ramp.pop_front();
            }
        }
        self.settle();
        Ok(())
    }

    fn pop_back(&mut self, value: f64) -> Result<()> {
        let ramp = self.ramp_mut();
        match ramp.back().copied() {
            None => return Err(CursorError::EmptyAggregate),
            Some(newest) if !same_value(newest, value) => {
                return Err(CursorError::InvalidOperation(
                    "evicted value is not the newest in the window",
                ))
            }
            Some(_) => {
                ramp.pop_back();
            }
        }
        self.settle();
        Ok(())
    }

    fn slide_forward(&mut self, evicted: f64, admitted: f64) -> Result<()> {
        if let Some(indexed) = self.indexed.as_mut() {
            if !indexed.oldest_value().is_some_and(|v| same_value(v, evicted)) {
                return Err(CursorError::InvalidOperation(
                    "evicted value is not the oldest in the window",
                ));
            }
            self.median = indexed.update(admitted)?;
            return Ok(());
        }
        self.pop_front(evicted)?;
        self.push_back(admitted);
        Ok(())
    }

    fn slide_backward(&mut self, evicted: f64, admitted: f64) -> Result<()> {
        if let Some(indexed) = self.indexed.as_mut() {
            if !indexed.newest_value().is_some_and(|v| same_value(v, evicted)) {
                return Err(CursorError::InvalidOperation(
                    "evicted value is not the newest in the window",
                ));
            }
            self.median = indexed.update_back(admitted)?;
            return Ok(());
        }
        self.pop_back(evicted)?;
        self.push_front(admitted);
        Ok(())
    }

    fn load(&mut self, values: &[f64]) {
        self.indexed = None;
        self.ramp.clear();
        self.ramp.extend(values.iter().copied());
        self.settle();
    }

    fn clear(&mut self) {
        self.indexed = None;
        self.ramp.clear();
        self.median = f64::NAN;
    }

    fn len(&self) -> usize {
        match &self.indexed {
            Some(indexed) => indexed.width(),
            None => self.ramp.len(),
        }
    }

    fn current(&self) -> f64 {
        self.median
    }

    fn hash_into(&self, hasher: &mut Sha256) {
        hasher.update((self.len() as u64).to_le_bytes());
        match &self.indexed {
            Some(indexed) => {
                for value in indexed.values_in_sequence() {
                    hasher.update(value.to_bits().to_le_bytes());
                }
            }
            None => {
                for value in &self.ramp {
                    hasher.update(value.to_bits().to_le_bytes());
                }
            }
        }
        hasher.update(self.median.to_bits().to_le_bytes());
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
