//! Key and value contracts for windowed series.
//!
//! ## Keys
//!
//! A [`SeriesKey`] is totally ordered and, for key-width windows, supports a
//! distance between two keys that compares against the window width.
//! Integer keys use saturating subtraction; decimal keys use
//! `rust_decimal::Decimal` arithmetic.
//!
//! ## Values
//!
//! Aggregates work on `f64`. Anything stored in a series must convert via
//! [`AsF64`].
//!
//! ```
//! use window_cursor::types::{AsF64, SeriesKey};
//! use rust_decimal::Decimal;
//!
//! assert_eq!(10i64.distance_from(&4), 6);
//! assert_eq!(Decimal::new(15, 1).as_f64(), 1.5);
//! ```

use std::fmt::Debug;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};

/// Ordered key usable by cursors and key-width windows.
pub trait SeriesKey: Ord + Clone + Debug {
    /// Distance between two keys, comparable to a key-width window width
    type Distance: PartialOrd + Clone + Debug;

    /// Distance from `earlier` up to `self`
    fn distance_from(&self, earlier: &Self) -> Self::Distance;

    /// The zero distance (widths must be strictly greater)
    fn zero_distance() -> Self::Distance;

    /// Feed a canonical byte encoding of the key into a state-root hasher
    fn hash_into(&self, hasher: &mut Sha256);
}

/// Conversion of stored values into aggregate input.
pub trait AsF64 {
    fn as_f64(&self) -> f64;
}

// ============================================================================
// Integer keys
// ============================================================================

macro_rules! integer_key {
    ($($t:ty),*) => {
        $(
            impl SeriesKey for $t {
                type Distance = $t;

                #[inline]
                fn distance_from(&self, earlier: &Self) -> $t {
                    self.saturating_sub(*earlier)
                }

                #[inline]
                fn zero_distance() -> $t {
                    0
                }

                fn hash_into(&self, hasher: &mut Sha256) {
                    hasher.update(self.to_le_bytes());
                }
            }

            impl AsF64 for $t {
                #[inline]
                fn as_f64(&self) -> f64 {
                    *self as f64
                }
            }
        )*
    };
}

integer_key!(i32, i64, u32, u64, usize);

// ============================================================================
// Decimal keys
// ============================================================================

impl SeriesKey for Decimal {
    type Distance = Decimal;

    fn distance_from(&self, earlier: &Self) -> Decimal {
        self.saturating_sub(*earlier)
    }

    fn zero_distance() -> Decimal {
        Decimal::ZERO
    }

    fn hash_into(&self, hasher: &mut Sha256) {
        // Normalize so 1.0 and 1.00 hash identically
        hasher.update(self.normalize().serialize());
    }
}

impl AsF64 for Decimal {
    /// Out-of-range decimals become `NaN`
    fn as_f64(&self) -> f64 {
        self.to_f64().unwrap_or(f64::NAN)
    }
}

// ============================================================================
// Float values
// ============================================================================

impl AsF64 for f64 {
    #[inline]
    fn as_f64(&self) -> f64 {
        *self
    }
}

impl AsF64 for f32 {
    #[inline]
    fn as_f64(&self) -> f64 {
        f64::from(*self)
    }
}
