//! In-memory ordered source and its cursor.
//!
//! ## Design
//!
//! `SortedSeries` stores keys and values in two parallel sorted vectors
//! behind an `Arc<RwLock<_>>`. Cloning the series clones the *handle*, so
//! cursors handed out by it observe appends made through any handle.
//!
//! ## Mutation Model
//!
//! - **Append** (key greater than the last key): never disturbs cursors.
//!   A cursor that hit the end simply succeeds on its next `move_next()`.
//! - **Insert / remove elsewhere**: bumps the mutation epoch. A cursor that
//!   notices a new epoch re-locates itself by its current key; if that key
//!   is gone it reports [`CursorError::OutOfOrderKey`].
//!
//! ## Example
//!
//! ```
//! use window_cursor::cursor::{OrderedCursor, SortedSeries};
//!
//! let series: SortedSeries<i64, f64> = [(1, 1.0), (2, 2.0)].into_iter().collect();
//! let mut cursor = series.cursor();
//!
//! assert!(cursor.move_next().unwrap());
//! assert!(cursor.move_next().unwrap());
//! assert!(!cursor.move_next().unwrap());
//!
//! series.append(3, 3.0).unwrap();
//! assert!(cursor.move_next().unwrap());
//! assert_eq!(cursor.current(), Some((3, 3.0)));
//! ```

use std::fmt::Debug;
use std::sync::Arc;

use log::{trace, warn};
use parking_lot::RwLock;

use crate::cursor::{ensure_ready, initialize_state, CursorState, OrderedCursor, Recyclable};
use crate::error::{CursorError, Result};
use crate::types::Lookup;

#[derive(Debug)]
struct SeriesData<K, V> {
    keys: Vec<K>,
    values: Vec<V>,
    /// Bumped on every mutation other than an append
    epoch: u64,
}

/// Shared, append-friendly sorted map.
#[derive(Debug)]
pub struct SortedSeries<K, V> {
    inner: Arc<RwLock<SeriesData<K, V>>>,
}

impl<K, V> Clone for SortedSeries<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: Ord + Clone + Debug, V: Clone> Default for SortedSeries<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Clone + Debug, V: Clone> SortedSeries<K, V> {
    /// Create an empty series
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create an empty series with pre-allocated capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(SeriesData {
                keys: Vec::with_capacity(capacity),
                values: Vec::with_capacity(capacity),
                epoch: 0,
            })),
        }
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Append a key greater than every existing key.
    ///
    /// # Errors
    ///
    /// [`CursorError::OutOfOrderKey`] if `key` is not strictly greater than
    /// the last key.
    pub fn append(&self, key: K, value: V) -> Result<()> {
        let mut data = self.inner.write();
        if let Some(last) = data.keys.last() {
            if key <= *last {
                return Err(CursorError::out_of_order(&key));
            }
        }
        data.keys.push(key);
        data.values.push(value);
        Ok(())
    }

    /// Insert or replace at any position.
    ///
    /// Returns the replaced value, if any. Anything other than a plain
    /// append bumps the mutation epoch.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let mut data = self.inner.write();
        match data.keys.binary_search(&key) {
            Ok(idx) => {
                data.epoch += 1;
                Some(std::mem::replace(&mut data.values[idx], value))
            }
            Err(idx) => {
                if idx < data.keys.len() {
                    data.epoch += 1;
                }
                data.keys.insert(idx, key);
                data.values.insert(idx, value);
                None
            }
        }
    }

    /// Remove a key, returning its value
    pub fn remove(&self, key: &K) -> Option<V> {
        let mut data = self.inner.write();
        let idx = data.keys.binary_search(key).ok()?;
        data.epoch += 1;
        data.keys.remove(idx);
        Some(data.values.remove(idx))
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Number of elements
    pub fn len(&self) -> usize {
        self.inner.read().keys.len()
    }

    /// Whether the series holds no elements
    pub fn is_empty(&self) -> bool {
        self.inner.read().keys.is_empty()
    }

    /// Smallest key
    pub fn first_key(&self) -> Option<K> {
        self.inner.read().keys.first().cloned()
    }

    /// Largest key
    pub fn last_key(&self) -> Option<K> {
        self.inner.read().keys.last().cloned()
    }

    /// Current mutation epoch
    pub fn epoch(&self) -> u64 {
        self.inner.read().epoch
    }

    // ========================================================================
    // Cursors
    // ========================================================================

    /// Uninitialized cursor; call `initialize()` before moving it
    pub fn get_cursor(&self) -> SeriesCursor<K, V> {
        SeriesCursor {
            series: self.clone(),
            state: CursorState::Uninitialized,
            position: None,
            current: None,
            epoch: 0,
        }
    }

    /// Initialized cursor, ready to move
    pub fn cursor(&self) -> SeriesCursor<K, V> {
        let mut cursor = self.get_cursor();
        cursor.state = CursorState::Initialized;
        cursor
    }
}

impl<K: Ord + Clone + Debug, V: Clone> FromIterator<(K, V)> for SortedSeries<K, V> {
    /// Sorts by key; a repeated key keeps its last value
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut pairs: Vec<(K, V)> = iter.into_iter().collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));

        let mut keys: Vec<K> = Vec::with_capacity(pairs.len());
        let mut values: Vec<V> = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            if keys.last() == Some(&key) {
                if let Some(last) = values.last_mut() {
                    *last = value;
                }
            } else {
                keys.push(key);
                values.push(value);
            }
        }

        Self {
            inner: Arc::new(RwLock::new(SeriesData {
                keys,
                values,
                epoch: 0,
            })),
        }
    }
}

/// Cursor over a [`SortedSeries`].
#[derive(Debug, Clone)]
pub struct SeriesCursor<K, V> {
    series: SortedSeries<K, V>,
    state: CursorState,
    position: Option<usize>,
    current: Option<(K, V)>,
    /// Source epoch the position was computed against
    epoch: u64,
}

impl<K: Ord + Clone + Debug, V: Clone> SeriesCursor<K, V> {
    /// The series this cursor walks
    pub fn series(&self) -> &SortedSeries<K, V> {
        &self.series
    }

    fn set_position(&mut self, data: &SeriesData<K, V>, idx: usize) {
        self.position = Some(idx);
        self.current = Some((data.keys[idx].clone(), data.values[idx].clone()));
        self.epoch = data.epoch;
        self.state = CursorState::Moving;
    }

    /// Revalidate the position after out-of-order mutations of the source.
    fn sync(&mut self, data: &SeriesData<K, V>) -> Result<Option<usize>> {
        let Some(pos) = self.position else {
            return Ok(None);
        };
        if data.epoch == self.epoch {
            return Ok(Some(pos));
        }
        let Some((key, _)) = self.current.as_ref() else {
            return Ok(None);
        };
        match data.keys.binary_search(key) {
            Ok(idx) => {
                trace!("cursor re-synchronised at index {} after epoch {}", idx, data.epoch);
                self.set_position(data, idx);
                Ok(Some(idx))
            }
            Err(_) => {
                warn!("cursor anchor key {:?} removed from source", key);
                Err(CursorError::out_of_order(key))
            }
        }
    }
}

impl<K: Ord + Clone + Debug, V: Clone> OrderedCursor for SeriesCursor<K, V> {
    type Key = K;
    type Value = V;

    fn state(&self) -> CursorState {
        self.state
    }

    fn initialize(&mut self) -> Result<()> {
        initialize_state(&mut self.state)
    }

    fn move_first(&mut self) -> Result<bool> {
        ensure_ready(self.state, "move_first")?;
        let inner = Arc::clone(&self.series.inner);
        let data = inner.read();
        if data.keys.is_empty() {
            return Ok(false);
        }
        self.set_position(&data, 0);
        Ok(true)
    }

    fn move_last(&mut self) -> Result<bool> {
        ensure_ready(self.state, "move_last")?;
        let inner = Arc::clone(&self.series.inner);
        let data = inner.read();
        if data.keys.is_empty() {
            return Ok(false);
        }
        self.set_position(&data, data.keys.len() - 1);
        Ok(true)
    }

    fn move_next(&mut self) -> Result<bool> {
        ensure_ready(self.state, "move_next")?;
        if self.position.is_none() {
            return self.move_first();
        }
        let inner = Arc::clone(&self.series.inner);
        let data = inner.read();
        let Some(pos) = self.sync(&data)? else {
            return Ok(false);
        };
        if pos + 1 >= data.keys.len() {
            return Ok(false);
        }
        self.set_position(&data, pos + 1);
        Ok(true)
    }

    fn move_previous(&mut self) -> Result<bool> {
        ensure_ready(self.state, "move_previous")?;
        if self.position.is_none() {
            return self.move_last();
        }
        let inner = Arc::clone(&self.series.inner);
        let data = inner.read();
        let Some(pos) = self.sync(&data)? else {
            return Ok(false);
        };
        if pos == 0 {
            return Ok(false);
        }
        self.set_position(&data, pos - 1);
        Ok(true)
    }

    fn move_at(&mut self, key: &K, direction: Lookup) -> Result<bool> {
        ensure_ready(self.state, "move_at")?;
        let inner = Arc::clone(&self.series.inner);
        let data = inner.read();
        match direction.resolve(&data.keys, key) {
            Some(idx) => {
                self.set_position(&data, idx);
                Ok(true)
            }
            None => {
                // Stay put, but the old position must still be valid
                self.sync(&data)?;
                Ok(false)
            }
        }
    }

    fn current_key(&self) -> Option<&K> {
        if self.state != CursorState::Moving {
            return None;
        }
        self.current.as_ref().map(|(k, _)| k)
    }

    fn current_value(&self) -> Option<V> {
        if self.state != CursorState::Moving {
            return None;
        }
        self.current.as_ref().map(|(_, v)| v.clone())
    }

    fn dispose(&mut self) {
        debug_assert_ne!(self.state, CursorState::Disposed, "cursor disposed twice");
        self.state = CursorState::Disposed;
        self.position = None;
        self.current = None;
    }
}

impl<K, V> Recyclable for SeriesCursor<K, V> {
    fn recycle(&mut self) {
        self.state = CursorState::Uninitialized;
        self.position = None;
        self.current = None;
        self.epoch = 0;
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn make_series(keys: &[i64]) -> SortedSeries<i64, f64> {
        keys.iter().map(|&k| (k, k as f64 * 10.0)).collect()
    }

    #[test]
    fn test_from_iter_sorts_and_dedups() {
        let series: SortedSeries<i64, f64> =
            vec![(3, 3.0), (1, 1.0), (2, 2.0), (1, 1.5)].into_iter().collect();

        assert_eq!(series.len(), 3);
        assert_eq!(series.first_key(), Some(1));
        assert_eq!(series.last_key(), Some(3));

        let mut cursor = series.cursor();
        assert!(cursor.move_first().unwrap());
        assert_eq!(cursor.current(), Some((1, 1.5)));
    }

    #[test]
    fn test_append_rejects_out_of_order() {
        let series = make_series(&[1, 2, 3]);

        assert!(series.append(4, 40.0).is_ok());
        assert_eq!(
            series.append(4, 41.0),
            Err(CursorError::OutOfOrderKey { key: "4".to_string() })
        );
        assert!(series.append(0, 0.0).is_err());
        assert_eq!(series.len(), 4);
        assert_eq!(series.epoch(), 0);
    }

    #[test]
    fn test_uninitialized_cursor_rejects_moves() {
        let series = make_series(&[1, 2, 3]);
        let mut cursor = series.get_cursor();

        assert_eq!(cursor.state(), CursorState::Uninitialized);
        assert_eq!(
            cursor.move_next(),
            Err(CursorError::NotInitialized { operation: "move_next" })
        );
        assert!(cursor.move_at(&1, Lookup::EQ).is_err());

        cursor.initialize().unwrap();
        assert!(cursor.move_next().unwrap());
        assert_eq!(cursor.current_key(), Some(&1));
    }

    #[test]
    fn test_forward_backward_walk() {
        let series = make_series(&[1, 2, 3]);
        let mut cursor = series.cursor();

        let mut forward = Vec::new();
        while cursor.move_next().unwrap() {
            forward.push(*cursor.current_key().unwrap());
        }
        assert_eq!(forward, vec![1, 2, 3]);

        let mut backward = Vec::new();
        let mut cursor = series.cursor();
        while cursor.move_previous().unwrap() {
            backward.push(*cursor.current_key().unwrap());
        }
        assert_eq!(backward, vec![3, 2, 1]);
    }

    #[test]
    fn test_stable_false_then_append() {
        let series = make_series(&[1, 2]);
        let mut cursor = series.cursor();
        assert!(cursor.move_last().unwrap());

        for _ in 0..3 {
            assert!(!cursor.move_next().unwrap());
            assert_eq!(cursor.current(), Some((2, 20.0)));
        }

        series.append(5, 50.0).unwrap();
        assert!(cursor.move_next().unwrap());
        assert_eq!(cursor.current(), Some((5, 50.0)));
    }

    #[test]
    fn test_move_at_directions() {
        let series = make_series(&[10, 20, 30]);
        let mut cursor = series.cursor();

        assert!(cursor.move_at(&20, Lookup::EQ).unwrap());
        assert_eq!(cursor.current_key(), Some(&20));

        assert!(cursor.move_at(&25, Lookup::LE).unwrap());
        assert_eq!(cursor.current_key(), Some(&20));

        assert!(cursor.move_at(&25, Lookup::GT).unwrap());
        assert_eq!(cursor.current_key(), Some(&30));

        // Failed lookups keep the previous position
        assert!(!cursor.move_at(&25, Lookup::EQ).unwrap());
        assert_eq!(cursor.current_key(), Some(&30));
        assert!(!cursor.move_at(&10, Lookup::LT).unwrap());
        assert_eq!(cursor.current_key(), Some(&30));
    }

    #[test]
    fn test_clone_is_independent() {
        let series = make_series(&[1, 2, 3, 4]);
        let mut original = series.cursor();
        original.move_first().unwrap();

        let mut clone = original.clone();
        clone.move_next().unwrap();
        clone.move_next().unwrap();

        assert_eq!(original.current_key(), Some(&1));
        assert_eq!(clone.current_key(), Some(&3));
    }

    #[test]
    fn test_resync_after_insert_before_position() {
        let series = make_series(&[10, 20, 30]);
        let mut cursor = series.cursor();
        cursor.move_at(&20, Lookup::EQ).unwrap();

        series.insert(15, 150.0);
        assert!(cursor.move_previous().unwrap());
        assert_eq!(cursor.current(), Some((15, 150.0)));
    }

    #[test]
    fn test_removed_anchor_is_out_of_order() {
        let series = make_series(&[10, 20, 30]);
        let mut cursor = series.cursor();
        cursor.move_at(&20, Lookup::EQ).unwrap();

        assert_eq!(series.remove(&20), Some(200.0));
        assert_eq!(
            cursor.move_next(),
            Err(CursorError::OutOfOrderKey { key: "20".to_string() })
        );
        // Repositioning recovers
        assert!(cursor.move_first().unwrap());
        assert_eq!(cursor.current_key(), Some(&10));
    }

    #[test]
    fn test_dispose() {
        let series = make_series(&[1]);
        let mut cursor = series.cursor();
        cursor.move_first().unwrap();
        cursor.dispose();

        assert_eq!(cursor.state(), CursorState::Disposed);
        assert!(cursor.current().is_none());
        assert_eq!(
            cursor.move_next(),
            Err(CursorError::Disposed { operation: "move_next" })
        );
        assert!(cursor.initialize().is_err());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "cursor disposed twice")]
    fn test_double_dispose_panics_in_debug() {
        let series = make_series(&[1]);
        let mut cursor = series.cursor();
        cursor.dispose();
        cursor.dispose();
    }

    #[test]
    fn test_empty_series() {
        let series: SortedSeries<i64, f64> = SortedSeries::new();
        let mut cursor = series.cursor();

        assert!(!cursor.move_next().unwrap());
        assert!(!cursor.move_previous().unwrap());
        assert_eq!(cursor.state(), CursorState::Initialized);
        assert!(cursor.current().is_none());

        series.append(1, 1.0).unwrap();
        assert!(cursor.move_next().unwrap());
    }
}
