//! Error type shared by every cursor and aggregate.
//!
//! ## Taxonomy
//!
//! - **Usage errors**: moving before `initialize()`, moving after `dispose()`,
//!   zero widths, stale pool leases. These are contract violations and are
//!   never recovered from internally.
//! - **Ordering violations**: the source produced keys out of order while a
//!   cursor was stepping or rolling back. Carries the offending key.
//! - **Unsupported configurations**: rejected when the window is built.
//!
//! Empty windows are *not* errors: aggregates report `NaN`.

use std::fmt::Debug;

use thiserror::Error;

/// Errors raised by cursors, windows and aggregates.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CursorError {
    /// A move was attempted on a cursor that was never initialized
    #[error("`{operation}` called on an uninitialized cursor; call `initialize()` first")]
    NotInitialized { operation: &'static str },

    /// A move was attempted on a disposed cursor
    #[error("`{operation}` called on a disposed cursor")]
    Disposed { operation: &'static str },

    /// Window width (or lag step) is zero or negative
    #[error("window width must be positive, got {0}")]
    InvalidWidth(String),

    /// The source returned a key out of the expected order
    #[error("out-of-order key {key} encountered while moving cursor")]
    OutOfOrderKey { key: String },

    /// `remove_value` on an aggregate holding no values
    #[error("cannot remove a value from an empty aggregate")]
    EmptyAggregate,

    /// Configuration is valid in principle but not implemented
    #[error("not supported: {0}")]
    NotSupported(&'static str),

    /// Other contract violations
    #[error("invalid operation: {0}")]
    InvalidOperation(&'static str),

    /// A pool lease outlived the instance it referred to
    #[error("stale lease for slot {key} (version {version})")]
    StaleLease { key: usize, version: u64 },
}

impl CursorError {
    /// Build an ordering violation carrying the offending key.
    pub fn out_of_order<K: Debug>(key: &K) -> Self {
        CursorError::OutOfOrderKey {
            key: format!("{key:?}"),
        }
    }
}

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, CursorError>;
