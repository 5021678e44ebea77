//! Window cursors layered on top of an [`OrderedCursor`](crate::cursor::OrderedCursor).
//!
//! ## Window Policies
//!
//! ```text
//! Count { width: 3 }            keys: 1 2 3 4 5 6
//!                                         [4 5 6]      current = 6
//!
//! KeyWidth { width: 10, GE }    keys: 0 5 10 12 20 23
//!                                               [20 23]  current = 23
//! ```
//!
//! - **Count**: the current element plus the `width - 1` elements before it
//! - **KeyWidth**: every earlier element whose key distance from the current
//!   key satisfies the direction relative to `width`:
//!
//! | Direction | Retained             | Extra                                    |
//! |-----------|----------------------|------------------------------------------|
//! | `GE`      | `distance <= width`  |                                          |
//! | `GT`      | `distance <  width`  |                                          |
//! | `LE`      | `distance <  width`  | plus the nearest element at `>= width`   |
//! | `LT`      | `distance <= width`  | plus the nearest element at `> width`    |
//!
//! `EQ` is rejected for key-width windows: irregular keys rarely land on an
//! exact distance.
//!
//! ## Completeness
//!
//! A window is *complete* once the source provably holds enough history
//! for it. Positions with an incomplete window are skipped when stepping
//! forward from the start and fail every other move, unless a count policy
//! allows incomplete windows.
//!
//! ## Components
//!
//! - [`SpanCursor`]: yields an aggregate of the window at each position
//! - [`LagCursor`]: pairs each element with the one `width` steps earlier

mod lag;
mod span;

pub use lag::{LagCursor, LagValue};
pub use span::SpanCursor;

use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::error::{CursorError, Result};
use crate::types::{Lookup, SeriesKey};

/// Key-distance window definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyWidthWindow<D> {
    /// Key distance spanned by the window
    pub width: D,

    /// How elements at exactly `width` (or just past it) are treated
    pub direction: Lookup,
}

impl<D: PartialOrd> KeyWidthWindow<D> {
    /// Whether `candidate` lies inside the window ending at `current`
    pub fn retains<K>(&self, current: &K, candidate: &K) -> bool
    where
        K: SeriesKey<Distance = D>,
    {
        let distance = current.distance_from(candidate);
        match self.direction {
            Lookup::GT | Lookup::LE => distance < self.width,
            Lookup::EQ | Lookup::GE | Lookup::LT => distance <= self.width,
        }
    }

    /// Whether the window keeps one element beyond the retained range
    #[inline]
    pub fn anchored(&self) -> bool {
        self.direction.is_backward()
    }

    /// Whether a window ending at `current` whose oldest element is `oldest`
    /// is complete.
    ///
    /// # Arguments
    ///
    /// * `has_prior` - An element exists before `oldest` in the source
    pub fn is_complete<K>(&self, current: &K, oldest: &K, has_prior: bool) -> bool
    where
        K: SeriesKey<Distance = D>,
    {
        match self.direction {
            Lookup::GE => has_prior || current.distance_from(oldest) >= self.width,
            Lookup::GT => has_prior,
            Lookup::LE | Lookup::LT => !self.retains(current, oldest),
            Lookup::EQ => false,
        }
    }
}

/// How a window cursor decides which elements make up the window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WindowPolicy<D> {
    /// Fixed number of elements ending at the current one
    Count {
        width: usize,
        /// Yield shorter windows near the start of the source
        allow_incomplete: bool,
    },
    /// Elements within a key distance of the current one
    KeyWidth(KeyWidthWindow<D>),
}

impl<D> WindowPolicy<D> {
    /// Count window of `width` elements
    pub fn count(width: usize) -> Self {
        WindowPolicy::Count {
            width,
            allow_incomplete: false,
        }
    }

    /// Count window that also yields windows shorter than `width`
    pub fn count_allow_incomplete(width: usize) -> Self {
        WindowPolicy::Count {
            width,
            allow_incomplete: true,
        }
    }

    /// Key-distance window
    pub fn key_width(width: D, direction: Lookup) -> Self {
        WindowPolicy::KeyWidth(KeyWidthWindow { width, direction })
    }

    /// Element count for count windows
    pub fn count_width(&self) -> Option<usize> {
        match self {
            WindowPolicy::Count { width, .. } => Some(*width),
            WindowPolicy::KeyWidth(_) => None,
        }
    }
}

impl<D: PartialOrd + Debug> WindowPolicy<D> {
    /// Check the policy against the key type it will run over.
    ///
    /// # Errors
    ///
    /// - [`CursorError::InvalidWidth`] for a zero count or a non-positive distance
    /// - [`CursorError::NotSupported`] for `EQ` key-width windows
    pub fn validate<K>(&self) -> Result<()>
    where
        K: SeriesKey<Distance = D>,
    {
        match self {
            WindowPolicy::Count { width: 0, .. } => {
                Err(CursorError::InvalidWidth("0".to_string()))
            }
            WindowPolicy::Count { .. } => Ok(()),
            WindowPolicy::KeyWidth(window) => {
                if !(window.width > K::zero_distance()) {
                    return Err(CursorError::InvalidWidth(format!("{:?}", window.width)));
                }
                if window.direction == Lookup::EQ {
                    return Err(CursorError::NotSupported(
                        "EQ lookup for key-width windows",
                    ));
                }
                Ok(())
            }
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
