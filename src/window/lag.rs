//! Cursor pairing each element with the one `width` positions earlier.
//!
//! ## Stepping Protocol
//!
//! ```text
//! forward:   primary += step, then lagged += step
//! backward:  lagged  -= step, then primary -= step
//! ```
//!
//! The leading cursor always moves first, so a refused move stops before
//! the two cursors can drift apart. A step is made of `step` single moves;
//! when any of them is refused, every single move already made in that
//! step is undone and the cursor reports `Ok(false)` from where it started.

use log::{debug, trace};

use crate::cursor::{
    ensure_ready, initialize_state, undo_move, CursorState, OrderedCursor, Recyclable,
};
use crate::error::{CursorError, Result};
use crate::types::Lookup;

/// Current element together with the lagged one
#[derive(Debug, Clone, PartialEq)]
pub struct LagValue<K, V> {
    /// Value at the current position
    pub current: V,
    /// Key `width` positions earlier
    pub lagged_key: K,
    /// Value `width` positions earlier
    pub lagged: V,
}

/// Which cursor a reposition places first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Anchor {
    Primary,
    Lagged,
}

/// Cursor whose value pairs the current element with a lagged one.
///
/// # Example
///
/// ```
/// use window_cursor::cursor::{OrderedCursor, SortedSeries};
/// use window_cursor::window::LagCursor;
///
/// let series: SortedSeries<i64, f64> = (1..=4).map(|k| (k, k as f64)).collect();
/// let mut lag = LagCursor::new(series.cursor(), 2, 1).unwrap();
///
/// assert!(lag.move_next().unwrap());
/// let value = lag.current_value().unwrap();
/// assert_eq!((value.lagged_key, value.lagged, value.current), (1, 1.0, 3.0));
/// ```
#[derive(Debug, Clone)]
pub struct LagCursor<C> {
    primary: C,
    lagged: C,
    width: usize,
    step: usize,
    state: CursorState,
}

impl<C: OrderedCursor> LagCursor<C> {
    /// Create a lag cursor over `cursor`.
    ///
    /// # Arguments
    ///
    /// * `width` - Positions between the current and the lagged element
    /// * `step` - Positions advanced per move
    pub fn new(cursor: C, width: usize, step: usize) -> Result<Self> {
        if width == 0 {
            return Err(CursorError::InvalidWidth("lag width 0".to_string()));
        }
        if step == 0 {
            return Err(CursorError::InvalidWidth("lag step 0".to_string()));
        }
        let state = match cursor.state() {
            CursorState::Uninitialized => CursorState::Uninitialized,
            CursorState::Disposed => return Err(CursorError::Disposed { operation: "new" }),
            CursorState::Initialized | CursorState::Moving => CursorState::Initialized,
        };
        Ok(Self {
            lagged: cursor.clone(),
            primary: cursor,
            width,
            step,
            state,
        })
    }

    /// Elements between the lagged and the current position
    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Elements advanced per `move_next` / `move_previous`
    #[inline]
    pub fn step(&self) -> usize {
        self.step
    }

    /// Key of the lagged element
    pub fn lagged_key(&self) -> Option<&C::Key> {
        if self.state != CursorState::Moving {
            return None;
        }
        self.lagged.current_key()
    }

    /// Move `cursor` `count` times, undoing the moves made if one is refused.
    fn move_by(cursor: &mut C, count: usize, forward: bool) -> Result<bool> {
        for done in 0..count {
            let moved = if forward {
                cursor.move_next()
            } else {
                cursor.move_previous()
            };
            match moved {
                Ok(true) => {}
                Ok(false) => {
                    Self::rewind(cursor, done, forward)?;
                    return Ok(false);
                }
                Err(err) => {
                    Self::rewind(cursor, done, forward)?;
                    return Err(err);
                }
            }
        }
        Ok(true)
    }

    fn rewind(cursor: &mut C, count: usize, forward: bool) -> Result<()> {
        for _ in 0..count {
            undo_move(cursor, forward)?;
        }
        Ok(())
    }

    fn step_by(&mut self, forward: bool) -> Result<bool> {
        let step = self.step;
        let (leader, follower) = if forward {
            (&mut self.primary, &mut self.lagged)
        } else {
            (&mut self.lagged, &mut self.primary)
        };

        if !Self::move_by(leader, step, forward)? {
            trace!("lag cursor refused {} step", if forward { "forward" } else { "backward" });
            return Ok(false);
        }
        match Self::move_by(follower, step, forward) {
            Ok(true) => Ok(true),
            Ok(false) => {
                Self::rewind(leader, step, forward)?;
                Ok(false)
            }
            Err(err) => {
                Self::rewind(leader, step, forward)?;
                Err(err)
            }
        }
    }

    fn reposition<F>(&mut self, operation: &'static str, anchor: Anchor, position: F) -> Result<bool>
    where
        F: FnOnce(&mut C) -> Result<bool>,
    {
        ensure_ready(self.state, operation)?;
        let snapshot = self.clone();
        match self.reposition_inner(anchor, position) {
            Ok(true) => {
                debug!(
                    "{} positioned lag cursor at {:?} lagging {:?}",
                    operation,
                    self.primary.current_key(),
                    self.lagged.current_key()
                );
                self.state = CursorState::Moving;
                Ok(true)
            }
            Ok(false) => {
                *self = snapshot;
                Ok(false)
            }
            Err(err) => {
                *self = snapshot;
                Err(err)
            }
        }
    }

    fn reposition_inner<F>(&mut self, anchor: Anchor, position: F) -> Result<bool>
    where
        F: FnOnce(&mut C) -> Result<bool>,
    {
        match anchor {
            Anchor::Primary => {
                if !position(&mut self.primary)? {
                    return Ok(false);
                }
                self.lagged = self.primary.clone();
                Self::move_by(&mut self.lagged, self.width, false)
            }
            Anchor::Lagged => {
                if !position(&mut self.lagged)? {
                    return Ok(false);
                }
                self.primary = self.lagged.clone();
                Self::move_by(&mut self.primary, self.width, true)
            }
        }
    }
}

impl<C: OrderedCursor> OrderedCursor for LagCursor<C> {
    type Key = C::Key;
    type Value = LagValue<C::Key, C::Value>;

    fn state(&self) -> CursorState {
        self.state
    }

    fn initialize(&mut self) -> Result<()> {
        if self.state == CursorState::Uninitialized {
            self.primary.initialize()?;
            self.lagged = self.primary.clone();
        }
        initialize_state(&mut self.state)
    }

    fn move_first(&mut self) -> Result<bool> {
        self.reposition("move_first", Anchor::Lagged, |cursor: &mut C| cursor.move_first())
    }

    fn move_last(&mut self) -> Result<bool> {
        self.reposition("move_last", Anchor::Primary, |cursor: &mut C| cursor.move_last())
    }

    fn move_next(&mut self) -> Result<bool> {
        ensure_ready(self.state, "move_next")?;
        if self.state != CursorState::Moving {
            return self.move_first();
        }
        self.step_by(true)
    }

    fn move_previous(&mut self) -> Result<bool> {
        ensure_ready(self.state, "move_previous")?;
        if self.state != CursorState::Moving {
            return self.move_last();
        }
        self.step_by(false)
    }

    fn move_at(&mut self, key: &C::Key, direction: Lookup) -> Result<bool> {
        self.reposition("move_at", Anchor::Primary, |cursor: &mut C| {
            cursor.move_at(key, direction)
        })
    }

    fn current_key(&self) -> Option<&C::Key> {
        if self.state != CursorState::Moving {
            return None;
        }
        self.primary.current_key()
    }

    fn current_value(&self) -> Option<Self::Value> {
        if self.state != CursorState::Moving {
            return None;
        }
        let (lagged_key, lagged) = self.lagged.current()?;
        Some(LagValue {
            current: self.primary.current_value()?,
            lagged_key,
            lagged,
        })
    }

    fn dispose(&mut self) {
        debug_assert_ne!(self.state, CursorState::Disposed, "cursor disposed twice");
        for cursor in [&mut self.primary, &mut self.lagged] {
            if cursor.state() != CursorState::Disposed {
                cursor.dispose();
            }
        }
        self.state = CursorState::Disposed;
    }
}

impl<C: OrderedCursor + Recyclable> Recyclable for LagCursor<C> {
    fn recycle(&mut self) {
        self.primary.recycle();
        self.lagged = self.primary.clone();
        self.state = CursorState::Uninitialized;
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::SortedSeries;

    fn series(keys: &[i64]) -> SortedSeries<i64, f64> {
        keys.iter().map(|&k| (k, k as f64 * 10.0)).collect()
    }

    fn pairs<C: OrderedCursor>(lag: &mut LagCursor<C>, forward: bool) -> Vec<(C::Key, C::Key)> {
        let mut out = Vec::new();
        loop {
            let moved = if forward { lag.move_next() } else { lag.move_previous() };
            if !moved.unwrap() {
                return out;
            }
            out.push((lag.current_key().unwrap().clone(), lag.lagged_key().unwrap().clone()));
        }
    }

    #[test]
    fn test_invalid_parameters() {
        let s = series(&[1, 2]);
        assert!(matches!(LagCursor::new(s.cursor(), 0, 1), Err(CursorError::InvalidWidth(_))));
        assert!(matches!(LagCursor::new(s.cursor(), 1, 0), Err(CursorError::InvalidWidth(_))));

        let lag = LagCursor::new(s.cursor(), 1, 2).unwrap();
        assert_eq!((lag.width(), lag.step()), (1, 2));
    }

    #[test]
    fn test_forward_values() {
        let s = series(&[1, 2, 3, 4, 5, 6]);
        let mut lag = LagCursor::new(s.cursor(), 2, 1).unwrap();

        assert!(lag.move_next().unwrap());
        assert_eq!(
            lag.current(),
            Some((3, LagValue { current: 30.0, lagged_key: 1, lagged: 10.0 }))
        );
        assert_eq!(pairs(&mut lag, true), vec![(4, 2), (5, 3), (6, 4)]);
    }

    #[test]
    fn test_backward_mirrors_forward() {
        let s = series(&[1, 2, 3, 4, 5, 6, 7]);
        let mut lag = LagCursor::new(s.cursor(), 3, 1).unwrap();

        let mut forward = pairs(&mut lag, true);
        let last = lag.current_key().copied();
        let mut backward = pairs(&mut lag, false);
        backward.reverse();

        assert_eq!(last, Some(7));
        forward.pop();
        assert_eq!(forward, backward);
        assert_eq!(lag.current_key(), Some(&4));
    }

    #[test]
    fn test_decimated_steps_roll_back() {
        let s = series(&[1, 2, 3, 4, 5, 6]);
        let mut lag = LagCursor::new(s.cursor(), 2, 2).unwrap();

        assert!(lag.move_first().unwrap());
        assert_eq!(lag.current_key(), Some(&3));
        assert!(lag.move_next().unwrap());
        assert_eq!(lag.current_key(), Some(&5));

        // Only one element left: the partial step is undone
        assert!(!lag.move_next().unwrap());
        assert_eq!(lag.current_key(), Some(&5));
        assert_eq!(lag.lagged_key(), Some(&3));

        assert!(lag.move_previous().unwrap());
        assert_eq!(lag.current_key(), Some(&3));
        assert!(!lag.move_previous().unwrap());
        assert_eq!(lag.lagged_key(), Some(&1));
    }

    #[test]
    fn test_move_at() {
        let s = series(&[10, 20, 30, 40, 50]);
        let mut lag = LagCursor::new(s.cursor(), 2, 1).unwrap();

        assert!(lag.move_at(&45, Lookup::LE).unwrap());
        assert_eq!(lag.current_key(), Some(&40));
        assert_eq!(lag.lagged_key(), Some(&20));

        // Not enough history before 20: position is kept
        assert!(!lag.move_at(&20, Lookup::EQ).unwrap());
        assert_eq!(lag.current_key(), Some(&40));
    }

    #[test]
    fn test_stable_false_then_append() {
        let s = series(&[1, 2]);
        let mut lag = LagCursor::new(s.cursor(), 2, 1).unwrap();

        assert!(!lag.move_next().unwrap());
        assert_eq!(lag.state(), CursorState::Initialized);

        s.append(3, 30.0).unwrap();
        assert!(lag.move_next().unwrap());
        assert_eq!(lag.lagged_key(), Some(&1));
        assert!(!lag.move_next().unwrap());

        s.append(4, 40.0).unwrap();
        assert!(lag.move_next().unwrap());
        assert_eq!(lag.current_key(), Some(&4));
        assert_eq!(lag.lagged_key(), Some(&2));
    }

    #[test]
    fn test_lifecycle() {
        let s = series(&[1, 2, 3]);
        let mut lag = LagCursor::new(s.get_cursor(), 1, 1).unwrap();
        assert_eq!(
            lag.move_last(),
            Err(CursorError::NotInitialized { operation: "move_last" })
        );

        lag.initialize().unwrap();
        assert!(lag.move_last().unwrap());
        lag.dispose();
        assert!(lag.move_next().is_err());
        assert!(lag.current().is_none());

        lag.recycle();
        lag.initialize().unwrap();
        assert!(lag.move_first().unwrap());
        assert_eq!(lag.current_key(), Some(&2));
    }
}
