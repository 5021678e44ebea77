//! Lookup direction for key-based positioning.
//!
//! ## Semantics
//!
//! Given a sorted key sequence and a target key:
//!
//! | Direction | Resolves to |
//! |-----------|-------------|
//! | `EQ` | the element with exactly the target key |
//! | `GE` | the first element with key `>=` target |
//! | `GT` | the first element with key `>` target |
//! | `LE` | the last element with key `<=` target |
//! | `LT` | the last element with key `<` target |
//!
//! ## Example
//!
//! ```
//! use window_cursor::types::Lookup;
//!
//! let keys = [10, 20, 30];
//! assert_eq!(Lookup::GE.resolve(&keys, &15), Some(1));
//! assert_eq!(Lookup::LT.resolve(&keys, &10), None);
//! ```

use serde::{Deserialize, Serialize};

/// How a key lookup resolves when the exact key is or isn't present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lookup {
    /// Exact match only
    EQ,
    /// Greater than or equal
    GE,
    /// Strictly greater
    GT,
    /// Less than or equal
    LE,
    /// Strictly less
    LT,
}

impl Lookup {
    /// Resolve `key` against sorted `keys`, returning the matching index.
    ///
    /// `keys` must be sorted ascending without duplicates.
    pub fn resolve<K: Ord>(self, keys: &[K], key: &K) -> Option<usize> {
        match self {
            Lookup::EQ => keys.binary_search(key).ok(),
            Lookup::GE => {
                let idx = keys.partition_point(|k| k < key);
                (idx < keys.len()).then_some(idx)
            }
            Lookup::GT => {
                let idx = keys.partition_point(|k| k <= key);
                (idx < keys.len()).then_some(idx)
            }
            Lookup::LE => keys.partition_point(|k| k <= key).checked_sub(1),
            Lookup::LT => keys.partition_point(|k| k < key).checked_sub(1),
        }
    }

    /// Whether the direction looks backwards from the target key
    #[inline]
    pub fn is_backward(self) -> bool {
        matches!(self, Lookup::LE | Lookup::LT)
    }
}
