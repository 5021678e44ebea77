//! # Window Cursor
//!
//! Moving-window aggregation over sorted key/value series.
//!
//! ## Architecture
//!
//! The crate is layered leaf to root:
//! - **Types**: lookup directions and the key/value contracts
//! - **Cursor**: the [`OrderedCursor`] capability, an in-memory [`SortedSeries`]
//!   source and an optional lease-based [`CursorPool`]
//! - **Aggregate**: exactly reversible running statistics and a checkpoint-indexed
//!   running median
//! - **Window**: [`SpanCursor`] (aggregate over a trailing window) and
//!   [`LagCursor`] (current element paired with a lagged one)
//!
//! ## Design Principles
//!
//! 1. **Determinism**: identical moves over identical data yield bit-identical
//!    results, on any clone, in either direction
//! 2. **Incremental**: a step updates the aggregate with the values entering
//!    and leaving the window, never recomputing the whole window
//! 3. **Stable failure**: a move returning `false` leaves the cursor untouched,
//!    so it can be retried once the source grows
//! 4. **Static dispatch**: cursors compose through generic parameters
//!
//! ## Example
//!
//! ```
//! use window_cursor::{OrderedCursor, SortedSeries, SpanCursor, WindowPolicy};
//!
//! let series: SortedSeries<i64, f64> = (1..=5).map(|k| (k, k as f64)).collect();
//! let mut average = SpanCursor::moving_average(series.cursor(), WindowPolicy::count(2)).unwrap();
//!
//! let mut out = Vec::new();
//! while average.move_next().unwrap() {
//!     out.push(average.current_value().unwrap());
//! }
//! assert_eq!(out, vec![1.5, 2.5, 3.5, 4.5]);
//! ```

// ============================================================================
// Module declarations
// ============================================================================

/// Error taxonomy shared by every cursor
pub mod error;

/// Core contracts: lookup directions, key and value traits
pub mod types;

/// Cursor capability, sorted series source, cursor pool
pub mod cursor;

/// Running statistics and medians
pub mod aggregate;

/// Window policies and window cursors
pub mod window;

// ============================================================================
// Re-exports for convenience
// ============================================================================

pub use aggregate::{
    naive_median, MovingMedian, OnlineAggregate, RunningAggregate, RunningMedian, RunningStats,
    Statistic, WindowAggregate,
};
pub use cursor::{
    CursorPool, CursorState, Lease, OrderedCursor, Recyclable, SeriesCursor, SortedSeries,
};
pub use error::{CursorError, Result};
pub use types::{AsF64, Lookup, SeriesKey};
pub use window::{KeyWidthWindow, LagCursor, LagValue, SpanCursor, WindowPolicy};
