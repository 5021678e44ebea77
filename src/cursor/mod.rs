//! Cursor contract over sorted key/value sequences.
//!
//! ## Lifecycle
//!
//! ```text
//! Uninitialized --initialize()--> Initialized --move_*()--> Moving
//!        \                              \                      \
//!         +------------------------------+------dispose()-------+--> Disposed
//! ```
//!
//! - Moving before `initialize()` fails with [`CursorError::NotInitialized`]
//! - Moving after `dispose()` fails with [`CursorError::Disposed`]
//! - `current*()` only yields values in the `Moving` state
//!
//! ## Stable false
//!
//! `move_next()` returning `false` leaves the cursor where it was. Calling it
//! again keeps returning `false` until the source grows, at which point the
//! retried move continues from the preserved position.
//!
//! ## Components
//!
//! - [`OrderedCursor`]: the capability every cursor implements
//! - [`SortedSeries`] / [`SeriesCursor`]: in-memory ordered source
//! - [`CursorPool`]: optional lease-based instance reuse

pub mod pool;
pub mod series;

pub use pool::{CursorPool, Lease, Recyclable};
pub use series::{SeriesCursor, SortedSeries};

use log::error;

use crate::error::{CursorError, Result};
use crate::types::Lookup;

/// Lifecycle state of a cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CursorState {
    /// Created, not yet usable
    #[default]
    Uninitialized,
    /// Ready to move, no current position
    Initialized,
    /// Positioned on an element
    Moving,
    /// Released; every move fails
    Disposed,
}

/// Bidirectional cursor over a sorted key/value sequence.
///
/// Cloning yields an independent cursor at the same position.
pub trait OrderedCursor: Clone {
    type Key: Ord + Clone + std::fmt::Debug;
    type Value: Clone;

    /// Current lifecycle state
    fn state(&self) -> CursorState;

    /// Make the cursor ready to move. No-op when already initialized.
    fn initialize(&mut self) -> Result<()>;

    /// Position on the first element
    fn move_first(&mut self) -> Result<bool>;

    /// Position on the last element
    fn move_last(&mut self) -> Result<bool>;

    /// Advance one position; `Ok(false)` leaves the position unchanged
    fn move_next(&mut self) -> Result<bool>;

    /// Step back one position; `Ok(false)` leaves the position unchanged
    fn move_previous(&mut self) -> Result<bool>;

    /// Position at the element `direction` resolves for `key`.
    ///
    /// On `Ok(false)` the cursor keeps its pre-call position.
    fn move_at(&mut self, key: &Self::Key, direction: Lookup) -> Result<bool>;

    /// Key at the current position
    fn current_key(&self) -> Option<&Self::Key>;

    /// Value at the current position
    fn current_value(&self) -> Option<Self::Value>;

    /// Release the cursor. Disposing twice is a programming error.
    fn dispose(&mut self);

    /// Key/value pair at the current position
    fn current(&self) -> Option<(Self::Key, Self::Value)> {
        let key = self.current_key()?.clone();
        let value = self.current_value()?;
        Some((key, value))
    }

    /// Whether the cursor sits on an element
    #[inline]
    fn is_positioned(&self) -> bool {
        self.state() == CursorState::Moving
    }
}

/// Reject moves on cursors that are not ready.
#[inline]
pub(crate) fn ensure_ready(state: CursorState, operation: &'static str) -> Result<()> {
    match state {
        CursorState::Uninitialized => Err(CursorError::NotInitialized { operation }),
        CursorState::Disposed => Err(CursorError::Disposed { operation }),
        CursorState::Initialized | CursorState::Moving => Ok(()),
    }
}

/// Shared `initialize()` transition.
#[inline]
pub(crate) fn initialize_state(state: &mut CursorState) -> Result<()> {
    match *state {
        CursorState::Uninitialized => {
            *state = CursorState::Initialized;
            Ok(())
        }
        CursorState::Disposed => Err(CursorError::Disposed {
            operation: "initialize",
        }),
        CursorState::Initialized | CursorState::Moving => Ok(()),
    }
}

/// Reverse a single successful move of `cursor`.
///
/// # Arguments
///
/// * `was_forward` - The move being undone was a `move_next()`
///
/// # Errors
///
/// [`CursorError::OutOfOrderKey`] if the reverse step is refused, which
/// means the source changed underneath the composed cursor.
pub(crate) fn undo_move<C: OrderedCursor>(cursor: &mut C, was_forward: bool) -> Result<()> {
    let moved = if was_forward {
        cursor.move_previous()?
    } else {
        cursor.move_next()?
    };
    if moved {
        Ok(())
    } else {
        error!("rollback refused at {:?}", cursor.current_key());
        Err(CursorError::out_of_order(&cursor.current_key()))
    }
}
