//! Cursor yielding a running aggregate over a trailing window.
//!
//! ## Design
//!
//! A `SpanCursor` drives two clones of the source cursor:
//!
//! ```text
//!            tail                 front
//!             v                     v
//! ... k2 k3 [k4 k5 k6 k7 k8 k9 k10 k11] k12 ...
//!            \________ window ________/
//! ```
//!
//! - `front` sits on the current element (the newest in the window)
//! - `tail` sits on the oldest element in the window
//! - `window` mirrors the windowed `(key, value)` pairs so evicted values
//!   can be handed to the aggregate without re-reading the source
//!
//! ## Stepping
//!
//! A forward step moves `front` once, then `tail` once per evicted element,
//! checking that `tail` lands exactly on the next windowed key. A backward
//! step does the mirror image: `tail` admits older elements, `front` drops
//! the newest. Any divergence between the two cursors means the source was
//! reordered underneath the window; every move made so far is undone and
//! [`CursorError::OutOfOrderKey`] is returned.
//!
//! A move returning `Ok(false)` never changes the cursor's position,
//! window, or aggregate.
//!
//! ## Repositioning
//!
//! `move_first`, `move_last` and `move_at` rebuild the window from scratch
//! around the new position. The previous state is snapshotted first and
//! restored on failure.

use std::collections::VecDeque;

use log::{debug, trace, warn};
use sha2::{Digest, Sha256};

use crate::aggregate::{MovingMedian, OnlineAggregate, Statistic, WindowAggregate};
use crate::cursor::{
    ensure_ready, initialize_state, undo_move, CursorState, OrderedCursor, Recyclable,
};
use crate::error::{CursorError, Result};
use crate::types::{AsF64, Lookup, SeriesKey};
use crate::window::{KeyWidthWindow, WindowPolicy};

type Distance<C> = <<C as OrderedCursor>::Key as SeriesKey>::Distance;

/// Moving-window aggregate over an ordered cursor.
///
/// `current_key()` is the key of the underlying element and
/// `current_value()` the aggregate over the window ending there.
#[derive(Debug, Clone)]
pub struct SpanCursor<C, A>
where
    C: OrderedCursor,
    C::Key: SeriesKey,
{
    /// Source cursor on the current element
    front: C,

    /// Source cursor on the oldest windowed element
    tail: C,

    /// Windowed entries, oldest first
    window: VecDeque<(C::Key, f64)>,

    aggregate: A,

    policy: WindowPolicy<Distance<C>>,

    /// An element precedes the window in the source (key-width windows)
    has_prior: bool,

    state: CursorState,
}

impl<C, A> SpanCursor<C, A>
where
    C: OrderedCursor,
    C::Key: SeriesKey,
    C::Value: AsF64,
    A: WindowAggregate,
{
    /// Create a window cursor over `cursor`.
    ///
    /// The window cursor is uninitialized if `cursor` is, and initialized
    /// (but unpositioned) otherwise.
    ///
    /// # Errors
    ///
    /// - [`CursorError::InvalidWidth`] / [`CursorError::NotSupported`] for
    ///   a policy rejected by [`WindowPolicy::validate`]
    /// - [`CursorError::Disposed`] if `cursor` was disposed
    pub fn new(cursor: C, policy: WindowPolicy<Distance<C>>, aggregate: A) -> Result<Self> {
        policy.validate::<C::Key>()?;
        let state = match cursor.state() {
            CursorState::Uninitialized => CursorState::Uninitialized,
            CursorState::Disposed => return Err(CursorError::Disposed { operation: "new" }),
            CursorState::Initialized | CursorState::Moving => CursorState::Initialized,
        };
        debug!("span cursor created with {:?}", policy);

        Ok(Self {
            tail: cursor.clone(),
            front: cursor,
            window: VecDeque::new(),
            aggregate,
            policy,
            has_prior: false,
            state,
        })
    }

    /// Window policy
    #[inline]
    pub fn policy(&self) -> &WindowPolicy<Distance<C>> {
        &self.policy
    }

    /// Aggregate over the current window
    #[inline]
    pub fn aggregate(&self) -> &A {
        &self.aggregate
    }

    /// Number of elements in the current window
    #[inline]
    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    /// Windowed entries, oldest first
    pub fn window(&self) -> impl Iterator<Item = (&C::Key, f64)> + '_ {
        self.window.iter().map(|(key, value)| (key, *value))
    }

    /// SHA-256 over the position, the windowed entries and the aggregate.
    ///
    /// Two cursors report the same root exactly when they sit on the same
    /// key with the same window and the same aggregate state, as reported by
    /// [`WindowAggregate::hash_into`].
    pub fn state_root(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update([self.state as u8]);
        hasher.update((self.window.len() as u64).to_le_bytes());
        for (key, value) in &self.window {
            key.hash_into(&mut hasher);
            hasher.update(value.to_bits().to_le_bytes());
        }
        self.aggregate.hash_into(&mut hasher);
        hasher.finalize().into()
    }

    /// [`state_root`](Self::state_root) as lowercase hex
    pub fn state_root_hex(&self) -> String {
        hex::encode(self.state_root())
    }

    // ========================================================================
    // Window bookkeeping
    // ========================================================================

    fn entry_of(cursor: &C) -> Result<(C::Key, f64)> {
        match (cursor.current_key(), cursor.current_value()) {
            (Some(key), Some(value)) => Ok((key.clone(), value.as_f64())),
            _ => Err(CursorError::InvalidOperation("source cursor is not positioned")),
        }
    }

    fn current_key_unchecked(&self) -> Option<&C::Key> {
        self.window.back().map(|(key, _)| key)
    }

    fn is_complete(&self) -> bool {
        match &self.policy {
            WindowPolicy::Count {
                width,
                allow_incomplete,
            } => *allow_incomplete || self.window.len() >= *width,
            WindowPolicy::KeyWidth(window) => match (self.window.back(), self.window.front()) {
                (Some((current, _)), Some((oldest, _))) => {
                    window.is_complete(current, oldest, self.has_prior)
                }
                _ => false,
            },
        }
    }

    /// Number of windowed entries leaving when `key` becomes current
    fn forward_evictions(&self, key: &C::Key) -> usize {
        let len = self.window.len();
        match &self.policy {
            WindowPolicy::Count { width, .. } => (len + 1).saturating_sub(*width),
            WindowPolicy::KeyWidth(window) => {
                let key_at = |i: usize| self.window.get(i).map_or(key, |(k, _)| k);
                let mut evicted = 0;
                if window.anchored() {
                    // Keep the newest entry outside the range as the anchor
                    while evicted < len && !window.retains(key, key_at(evicted + 1)) {
                        evicted += 1;
                    }
                } else {
                    while evicted < len && !window.retains(key, key_at(evicted)) {
                        evicted += 1;
                    }
                }
                evicted
            }
        }
    }

    /// Move `tail` forward `count` times onto the entries that will become
    /// oldest. On divergence `tail` is restored and an error returned.
    fn advance_tail(&mut self, count: usize, key: &C::Key) -> Result<()> {
        for i in 0..count {
            let expected = self.window.get(i + 1).map_or(key, |(k, _)| k);
            let moved = self.tail.move_next()?;
            if moved && self.tail.current_key() == Some(expected) {
                continue;
            }
            let expected = expected.clone();
            for _ in 0..i + usize::from(moved) {
                undo_move(&mut self.tail, true)?;
            }
            warn!("window tail diverged from source, expected {:?}", expected);
            return Err(CursorError::out_of_order(&expected));
        }
        Ok(())
    }

    /// Hand the step to the aggregate, then update the window.
    ///
    /// The window is untouched unless the aggregate accepted the step. When
    /// one of several evictions fails, the earlier ones are pushed back.
    fn commit_forward(&mut self, key: C::Key, value: f64, evictions: usize) -> Result<()> {
        match evictions {
            0 => self.aggregate.push_back(value),
            1 => self.aggregate.slide_forward(self.window[0].1, value)?,
            _ => {
                for i in 0..evictions {
                    if let Err(err) = self.aggregate.pop_front(self.window[i].1) {
                        for j in (0..i).rev() {
                            self.aggregate.push_front(self.window[j].1);
                        }
                        return Err(err);
                    }
                }
                self.aggregate.push_back(value);
            }
        }
        if evictions > 0 {
            self.window.drain(..evictions);
            self.has_prior = true;
        }
        self.window.push_back((key, value));
        Ok(())
    }

    /// Extend a key-width window backwards through `tail`.
    ///
    /// # Returns
    ///
    /// Whether an element outside the window precedes it. Always `false`
    /// for anchored windows, whose completeness does not depend on it.
    fn admit_backward(
        &mut self,
        current: &C::Key,
        window: &KeyWidthWindow<Distance<C>>,
        admitted: &mut usize,
    ) -> Result<bool> {
        loop {
            let Some(oldest) = self.window.front().map(|(k, _)| k.clone()) else {
                return Ok(false);
            };
            if window.anchored() && !window.retains(current, &oldest) {
                return Ok(false);
            }
            if !self.tail.move_previous()? {
                return Ok(false);
            }
            let (key, value) = Self::entry_of(&self.tail)?;
            if key >= oldest {
                undo_move(&mut self.tail, false)?;
                warn!("source yielded {:?} before {:?}", key, oldest);
                return Err(CursorError::out_of_order(&key));
            }
            if !window.anchored() && !window.retains(current, &key) {
                undo_move(&mut self.tail, false)?;
                return Ok(true);
            }
            self.window.push_front((key, value));
            self.aggregate.push_front(value);
            *admitted += 1;
        }
    }

    /// Rebuild the window around the element under `front`.
    fn load_window(&mut self) -> Result<()> {
        let (key, value) = Self::entry_of(&self.front)?;
        self.tail = self.front.clone();
        self.window.clear();
        self.aggregate.clear();
        self.has_prior = false;

        match self.policy.clone() {
            WindowPolicy::Count { width, .. } => {
                self.window.push_back((key, value));
                while self.window.len() < width && self.tail.move_previous()? {
                    let entry = Self::entry_of(&self.tail)?;
                    if entry.0 >= self.window[0].0 {
                        warn!("source yielded {:?} before {:?}", entry.0, self.window[0].0);
                        return Err(CursorError::out_of_order(&entry.0));
                    }
                    self.window.push_front(entry);
                }
                let values: Vec<f64> = self.window.iter().map(|(_, v)| *v).collect();
                self.aggregate.load(&values);
            }
            WindowPolicy::KeyWidth(window) => {
                self.window.push_back((key.clone(), value));
                self.aggregate.push_back(value);
                let mut admitted = 0;
                self.has_prior = self.admit_backward(&key, &window, &mut admitted)?;
            }
        }
        trace!("window loaded with {} entries", self.window.len());
        Ok(())
    }

    // ========================================================================
    // Steps
    // ========================================================================

    fn step_forward(&mut self) -> Result<bool> {
        if !self.front.move_next()? {
            trace!("span cursor at end of source");
            return Ok(false);
        }
        let (key, value) = Self::entry_of(&self.front)?;
        if let Some((newest, _)) = self.window.back() {
            if key <= *newest {
                warn!("source yielded {:?} after {:?}", key, newest);
                undo_move(&mut self.front, true)?;
                return Err(CursorError::out_of_order(&key));
            }
        }

        let evictions = self.forward_evictions(&key);
        if let Err(err) = self.advance_tail(evictions, &key) {
            undo_move(&mut self.front, true)?;
            return Err(err);
        }
        if let Err(err) = self.commit_forward(key, value, evictions) {
            for _ in 0..evictions {
                undo_move(&mut self.tail, true)?;
            }
            undo_move(&mut self.front, true)?;
            return Err(err);
        }
        Ok(true)
    }

    fn step_backward_count(&mut self, width: usize, allow_incomplete: bool) -> Result<bool> {
        let len = self.window.len();
        let Some(oldest) = self.window.front().map(|(k, _)| k.clone()) else {
            return Ok(false);
        };

        // A full window admits the element before its oldest
        let mut admitted = None;
        if len >= width && self.tail.move_previous()? {
            let (key, value) = Self::entry_of(&self.tail)?;
            if key >= oldest {
                warn!("source yielded {:?} before {:?}", key, oldest);
                undo_move(&mut self.tail, false)?;
                return Err(CursorError::out_of_order(&key));
            }
            admitted = Some((key, value));
        }
        if admitted.is_none() && (!allow_incomplete || len <= 1) {
            return Ok(false);
        }

        let expected = if len >= 2 {
            self.window[len - 2].0.clone()
        } else if let Some((key, _)) = &admitted {
            key.clone()
        } else {
            return Ok(false);
        };
        let moved = self.front.move_previous()?;
        if !moved || self.front.current_key() != Some(&expected) {
            if moved {
                undo_move(&mut self.front, false)?;
            }
            if admitted.is_some() {
                undo_move(&mut self.tail, false)?;
            }
            warn!("window front diverged from source, expected {:?}", expected);
            return Err(CursorError::out_of_order(&expected));
        }

        let evicted = self.window[len - 1].1;
        let updated = match &admitted {
            Some((_, value)) => self.aggregate.slide_backward(evicted, *value),
            None => self.aggregate.pop_back(evicted),
        };
        if let Err(err) = updated {
            undo_move(&mut self.front, false)?;
            if admitted.is_some() {
                undo_move(&mut self.tail, false)?;
            }
            return Err(err);
        }

        self.window.pop_back();
        if let Some(entry) = admitted {
            self.window.push_front(entry);
        }
        Ok(true)
    }

    fn step_backward_keyed(&mut self, window: &KeyWidthWindow<Distance<C>>) -> Result<bool> {
        let len = self.window.len();
        if !self.front.move_previous()? {
            return Ok(false);
        }
        let (key, value) = Self::entry_of(&self.front)?;
        let consistent = match len {
            0 => false,
            1 => key < self.window[0].0,
            _ => key == self.window[len - 2].0,
        };
        if !consistent {
            warn!("window front diverged from source at {:?}", key);
            undo_move(&mut self.front, false)?;
            return Err(CursorError::out_of_order(&key));
        }

        let had_prior = self.has_prior;
        let Some(evicted) = self.window.pop_back() else {
            undo_move(&mut self.front, false)?;
            return Ok(false);
        };
        if let Err(err) = self.aggregate.pop_back(evicted.1) {
            self.window.push_back(evicted);
            undo_move(&mut self.front, false)?;
            return Err(err);
        }

        let mut admitted = 0;
        if self.window.is_empty() {
            // `tail` sat on the evicted element; bring it onto the new current
            let moved = self.tail.move_previous()?;
            if !moved || self.tail.current_key() != Some(&key) {
                if moved {
                    undo_move(&mut self.tail, false)?;
                }
                self.aggregate.push_back(evicted.1);
                self.window.push_back(evicted);
                undo_move(&mut self.front, false)?;
                warn!("window tail diverged from source at {:?}", key);
                return Err(CursorError::out_of_order(&key));
            }
            self.window.push_front((key.clone(), value));
            self.aggregate.push_front(value);
            admitted = 1;
        }

        match self.admit_backward(&key, window, &mut admitted) {
            Ok(has_prior) => {
                self.has_prior = has_prior;
                if self.is_complete() {
                    return Ok(true);
                }
                trace!("window at {:?} incomplete, staying put", key);
                self.undo_backward(admitted, evicted, had_prior)?;
                Ok(false)
            }
            Err(err) => {
                self.undo_backward(admitted, evicted, had_prior)?;
                Err(err)
            }
        }
    }

    /// Reverse a partial key-width backward step.
    fn undo_backward(
        &mut self,
        admitted: usize,
        evicted: (C::Key, f64),
        had_prior: bool,
    ) -> Result<()> {
        for _ in 0..admitted {
            if let Some((_, value)) = self.window.pop_front() {
                self.aggregate.pop_front(value)?;
            }
            undo_move(&mut self.tail, false)?;
        }
        self.aggregate.push_back(evicted.1);
        self.window.push_back(evicted);
        undo_move(&mut self.front, false)?;
        self.has_prior = had_prior;
        Ok(())
    }

    // ========================================================================
    // Repositioning
    // ========================================================================

    /// Reposition `front` and rebuild the window, restoring the previous
    /// state unless the new window is complete.
    ///
    /// # Arguments
    ///
    /// * `seek_complete` - Step forward past incomplete windows
    /// * `position` - Moves the source cursor to the new position
    fn reposition<F>(&mut self, operation: &'static str, seek_complete: bool, position: F) -> Result<bool>
    where
        F: FnOnce(&mut C) -> Result<bool>,
    {
        ensure_ready(self.state, operation)?;
        let snapshot = self.clone();
        match self.reposition_inner(seek_complete, position) {
            Ok(true) => {
                debug!("{} positioned span cursor at {:?}", operation, self.current_key_unchecked());
                self.state = CursorState::Moving;
                Ok(true)
            }
            Ok(false) => {
                trace!("{} found no complete window", operation);
                *self = snapshot;
                Ok(false)
            }
            Err(err) => {
                *self = snapshot;
                Err(err)
            }
        }
    }

    fn reposition_inner<F>(&mut self, seek_complete: bool, position: F) -> Result<bool>
    where
        F: FnOnce(&mut C) -> Result<bool>,
    {
        if !position(&mut self.front)? {
            return Ok(false);
        }
        self.load_window()?;
        if seek_complete {
            while !self.is_complete() {
                if !self.step_forward()? {
                    return Ok(false);
                }
            }
        }
        Ok(self.is_complete())
    }
}

impl<C> SpanCursor<C, OnlineAggregate>
where
    C: OrderedCursor,
    C::Key: SeriesKey,
    C::Value: AsF64,
{
    /// Moving average over `policy` windows
    pub fn moving_average(cursor: C, policy: WindowPolicy<Distance<C>>) -> Result<Self> {
        Self::new(cursor, policy, OnlineAggregate::mean())
    }

    /// Moving sum, mean, variance or standard deviation
    pub fn moving_statistic(
        cursor: C,
        policy: WindowPolicy<Distance<C>>,
        statistic: Statistic,
    ) -> Result<Self> {
        Self::new(cursor, policy, OnlineAggregate::new(statistic))
    }
}

impl<C> SpanCursor<C, MovingMedian>
where
    C: OrderedCursor,
    C::Key: SeriesKey,
    C::Value: AsF64,
{
    /// Moving median; count windows use the indexed O(sqrt(w)) median
    pub fn moving_median(cursor: C, policy: WindowPolicy<Distance<C>>) -> Result<Self> {
        let median = match &policy {
            WindowPolicy::Count { width, .. } => MovingMedian::new(*width)?,
            WindowPolicy::KeyWidth(_) => MovingMedian::unbounded(),
        };
        Self::new(cursor, policy, median)
    }
}

impl<C, A> OrderedCursor for SpanCursor<C, A>
where
    C: OrderedCursor,
    C::Key: SeriesKey,
    C::Value: AsF64,
    A: WindowAggregate,
{
    type Key = C::Key;
    type Value = f64;

    fn state(&self) -> CursorState {
        self.state
    }

    fn initialize(&mut self) -> Result<()> {
        if self.state == CursorState::Uninitialized {
            self.front.initialize()?;
            self.tail = self.front.clone();
        }
        initialize_state(&mut self.state)
    }

    fn move_first(&mut self) -> Result<bool> {
        self.reposition("move_first", true, |cursor: &mut C| cursor.move_first())
    }

    fn move_last(&mut self) -> Result<bool> {
        self.reposition("move_last", false, |cursor: &mut C| cursor.move_last())
    }

    fn move_next(&mut self) -> Result<bool> {
        ensure_ready(self.state, "move_next")?;
        if self.state != CursorState::Moving {
            return self.move_first();
        }
        self.step_forward()
    }

    fn move_previous(&mut self) -> Result<bool> {
        ensure_ready(self.state, "move_previous")?;
        if self.state != CursorState::Moving {
            return self.move_last();
        }
        match self.policy.clone() {
            WindowPolicy::Count {
                width,
                allow_incomplete,
            } => self.step_backward_count(width, allow_incomplete),
            WindowPolicy::KeyWidth(window) => self.step_backward_keyed(&window),
        }
    }

    fn move_at(&mut self, key: &C::Key, direction: Lookup) -> Result<bool> {
        self.reposition("move_at", false, |cursor: &mut C| cursor.move_at(key, direction))
    }

    fn current_key(&self) -> Option<&C::Key> {
        if self.state != CursorState::Moving {
            return None;
        }
        self.window.back().map(|(key, _)| key)
    }

    fn current_value(&self) -> Option<f64> {
        if self.state != CursorState::Moving {
            return None;
        }
        Some(self.aggregate.current())
    }

    fn dispose(&mut self) {
        debug_assert_ne!(self.state, CursorState::Disposed, "cursor disposed twice");
        for cursor in [&mut self.front, &mut self.tail] {
            if cursor.state() != CursorState::Disposed {
                cursor.dispose();
            }
        }
        self.window.clear();
        self.aggregate.clear();
        self.state = CursorState::Disposed;
    }
}

impl<C, A> Recyclable for SpanCursor<C, A>
where
    C: OrderedCursor + Recyclable,
    C::Key: SeriesKey,
    A: WindowAggregate,
{
    fn recycle(&mut self) {
        self.front.recycle();
        self.tail = self.front.clone();
        self.window.clear();
        self.aggregate.clear();
        self.has_prior = false;
        self.state = CursorState::Uninitialized;
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
