//! Exact fixed-point accumulation of `f64` sums.
//!
//! ## Design
//!
//! Every finite `f64` is an integer multiple of `2^-1074`, so a sum of
//! doubles is an integer on that grid. The accumulator keeps that integer
//! in base-2^32 limbs stored as `i64`:
//!
//! ```text
//! value = sum(limbs[i] * 2^(32 * i)) * 2^-BASE
//! ```
//!
//! Adding a term adds its 32-bit digits into the limbs it covers; removing
//! it subtracts the same digits. Limbs are never carried in place, so an
//! add followed by the matching remove restores every limb exactly and the
//! stored state depends only on the multiset of values held, not on the
//! order they arrived or left in.
//!
//! Carries are propagated on a copy when the value is read, which then
//! rounds once to the nearest `f64`.
//!
//! ## Layouts
//!
//! | Alias          | Terms       | BASE | Limbs |
//! |----------------|-------------|------|-------|
//! | [`ExactSum`]     | `x`         | 1074 | 68    |
//! | [`ExactSquares`] | `x * x`     | 2148 | 134   |
//!
//! Each limb absorbs less than `2^33` per held term, so up to `2^30`
//! values can be held at once.

use std::fmt;

use sha2::{Digest, Sha256};

/// Sum of doubles, exact on the `2^-1074` grid
pub(crate) type ExactSum = ExactAccumulator<68, 1074>;

/// Sum of squared doubles, exact on the `2^-2148` grid
pub(crate) type ExactSquares = ExactAccumulator<134, 2148>;

const LIMB_BITS: u32 = 32;
const LIMB_MASK: u64 = (1 << LIMB_BITS) - 1;

/// Fixed-point integer accumulator with `LIMBS` base-2^32 digits.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct ExactAccumulator<const LIMBS: usize, const BASE: i32> {
    limbs: [i64; LIMBS],
}

impl<const LIMBS: usize, const BASE: i32> Default for ExactAccumulator<LIMBS, BASE> {
    fn default() -> Self {
        Self { limbs: [0; LIMBS] }
    }
}

impl<const LIMBS: usize, const BASE: i32> fmt::Debug for ExactAccumulator<LIMBS, BASE> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ExactAccumulator").field(&self.to_f64()).finish()
    }
}

impl<const LIMBS: usize, const BASE: i32> ExactAccumulator<LIMBS, BASE> {
    /// Add (or with `negative`, subtract) `magnitude * 2^exponent`.
    ///
    /// `exponent + BASE` must be non-negative and the term must fit below
    /// the top two limbs.
    pub(crate) fn add_term(&mut self, magnitude: u128, exponent: i32, negative: bool) {
        if magnitude == 0 {
            return;
        }
        debug_assert!(exponent + BASE >= 0, "term below the accumulator grid");
        let position = (exponent + BASE) as u32;
        let mut limb = (position / LIMB_BITS) as usize;
        let shift = position % LIMB_BITS;

        let mut rest = magnitude;
        while rest != 0 {
            let shifted = (rest as u64 & LIMB_MASK) << shift;
            let low = (shifted & LIMB_MASK) as i64;
            let high = (shifted >> LIMB_BITS) as i64;
            if negative {
                self.limbs[limb] -= low;
                self.limbs[limb + 1] -= high;
            } else {
                self.limbs[limb] += low;
                self.limbs[limb + 1] += high;
            }
            rest >>= LIMB_BITS;
            limb += 1;
        }
    }

    /// Add a finite `value`
    #[inline]
    pub(crate) fn add(&mut self, value: f64) {
        let (mantissa, exponent) = decompose(value);
        self.add_term(mantissa as u128, exponent, value.is_sign_negative());
    }

    /// Subtract a finite `value`
    #[inline]
    pub(crate) fn sub(&mut self, value: f64) {
        let (mantissa, exponent) = decompose(value);
        self.add_term(mantissa as u128, exponent, !value.is_sign_negative());
    }

    /// Add `value * value` for a finite `value`
    #[inline]
    pub(crate) fn add_square(&mut self, value: f64) {
        let (mantissa, exponent) = decompose(value);
        let mantissa = mantissa as u128;
        self.add_term(mantissa * mantissa, 2 * exponent, false);
    }

    /// Subtract `value * value` for a finite `value`
    #[inline]
    pub(crate) fn sub_square(&mut self, value: f64) {
        let (mantissa, exponent) = decompose(value);
        let mantissa = mantissa as u128;
        self.add_term(mantissa * mantissa, 2 * exponent, true);
    }

    /// Whether the held value is exactly zero
    pub(crate) fn is_zero(&self) -> bool {
        self.normalized().1.iter().all(|&digit| digit == 0)
    }

    /// Nearest `f64` to the held value (ties to even, `±inf` on overflow).
    pub(crate) fn to_f64(&self) -> f64 {
        let (negative, digits) = self.normalized();
        let Some(top) = digits.iter().rposition(|&digit| digit != 0) else {
            return 0.0;
        };

        // Top three digits hold at least 65 significant bits once `top >= 2`,
        // so a sticky bit in position 0 rounds correctly.
        let bottom = top.saturating_sub(2);
        let mut mantissa: u128 = 0;
        for &digit in digits[bottom..=top].iter().rev() {
            mantissa = (mantissa << LIMB_BITS) | digit as u128;
        }
        if digits[..bottom].iter().any(|&digit| digit != 0) {
            mantissa |= 1;
        }

        let exponent = LIMB_BITS as i32 * bottom as i32 - BASE;
        let magnitude = scale_by_pow2(mantissa as f64, exponent);
        if negative {
            -magnitude
        } else {
            magnitude
        }
    }

    /// The held value as an unevaluated pair `hi + lo` with `hi` the nearest
    /// `f64` and `lo` the nearest `f64` to the remainder.
    pub(crate) fn to_double_double(&self) -> (f64, f64) {
        let hi = self.to_f64();
        if !hi.is_finite() {
            return (hi, 0.0);
        }
        let mut remainder = *self;
        remainder.sub(hi);
        (hi, remainder.to_f64())
    }

    /// Feed the raw limbs into a state-root hasher
    pub(crate) fn hash_into(&self, hasher: &mut Sha256) {
        for limb in &self.limbs {
            hasher.update(limb.to_le_bytes());
        }
    }

    /// Carry-propagated magnitude digits, each in `[0, 2^32)`, with the sign.
    fn normalized(&self) -> (bool, [u64; LIMBS]) {
        let mut digits = [0u64; LIMBS];
        let mut carry = 0i64;
        for (digit, &limb) in digits.iter_mut().zip(&self.limbs) {
            let value = limb + carry;
            carry = value >> LIMB_BITS;
            *digit = value as u64 & LIMB_MASK;
        }

        // A negative total leaves a borrow out of the top limb
        if carry >= 0 {
            return (false, digits);
        }
        let mut borrow = 1u64;
        for digit in digits.iter_mut() {
            let value = (LIMB_MASK - *digit) + borrow;
            borrow = value >> LIMB_BITS;
            *digit = value & LIMB_MASK;
        }
        (true, digits)
    }
}

/// Split a finite `value` into `(mantissa, exponent)` with
/// `|value| = mantissa * 2^exponent`.
fn decompose(value: f64) -> (u64, i32) {
    debug_assert!(value.is_finite(), "non-finite values are tracked separately");
    let bits = value.to_bits();
    let biased = ((bits >> 52) & 0x7ff) as i32;
    let fraction = bits & ((1 << 52) - 1);
    if biased == 0 {
        (fraction, -1074)
    } else {
        (fraction | (1 << 52), biased - 1075)
    }
}

/// `2^exponent` for `exponent` in the normal range
#[inline]
fn pow2(exponent: i32) -> f64 {
    debug_assert!((-1022..=1023).contains(&exponent));
    f64::from_bits(((exponent + 1023) as u64) << 52)
}

/// `value * 2^exponent` in steps of at most `2^1000`. Steps are exact until
/// the result leaves the normal range.
fn scale_by_pow2(mut value: f64, mut exponent: i32) -> f64 {
    while exponent > 1000 {
        value *= pow2(1000);
        exponent -= 1000;
    }
    while exponent < -1000 {
        value *= pow2(-1000);
        exponent += 1000;
    }
    value * pow2(exponent)
}

// ============================================================================
// Unit Tests
// ============================================================================
