//! Core contracts shared by cursors and windows.
//!
//! ## Types
//!
//! - [`Lookup`]: direction used by key positioning (`EQ`, `GE`, `GT`, `LE`, `LT`)
//! - [`SeriesKey`]: ordered key with a distance for key-width windows
//! - [`AsF64`]: conversion of stored values into aggregate input

mod key;
mod lookup;

pub use key::{AsF64, SeriesKey};
pub use lookup::Lookup;
