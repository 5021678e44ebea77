//! Lease-based cursor pool.
//!
//! ## Design
//!
//! Leased instances live in a `Slab`; returned instances are recycled and
//! parked on a free list for the next `rent()`. Every rent stamps the lease
//! with a fresh lifecycle version, so a [`Lease`] kept after `give_back()`
//! is detected as stale even when its slab key has been reused.
//!
//! Per slab docs (https://docs.rs/slab/0.4.11):
//! - Keys are `usize` values returned by `slab.insert()`
//! - Keys may be reused after `slab.remove()`
//!
//! ## Example
//!
//! ```
//! use window_cursor::cursor::{CursorPool, OrderedCursor, SortedSeries};
//!
//! let series: SortedSeries<i64, f64> = [(1, 1.0)].into_iter().collect();
//! let mut pool = CursorPool::new();
//!
//! let lease = pool.rent(|| series.get_cursor());
//! pool.get_mut(&lease).unwrap().initialize().unwrap();
//! pool.give_back(lease).unwrap();
//!
//! assert!(pool.get(&lease).is_err()); // stale
//! ```

use log::debug;
use slab::Slab;

use crate::error::{CursorError, Result};

/// Default number of recycled instances kept on the free list
pub const DEFAULT_POOL_CAPACITY: usize = 64;

/// Instances that can be reset to their freshly-created state.
///
/// `recycle()` must reset every field: a recycled instance is handed out
/// again as if newly constructed (uninitialized).
pub trait Recyclable {
    fn recycle(&mut self);
}

/// Handle to a leased pool instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Lease {
    key: usize,
    version: u64,
}

impl Lease {
    /// Slab key of the leased slot
    #[inline]
    pub fn key(&self) -> usize {
        self.key
    }

    /// Lifecycle version stamped at rent time
    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug)]
struct Slot<T> {
    item: T,
    version: u64,
}

/// Pool of reusable cursor instances.
#[derive(Debug)]
pub struct CursorPool<T> {
    /// Instances currently leased out
    leased: Slab<Slot<T>>,

    /// Recycled instances waiting for reuse
    free: Vec<T>,

    /// Upper bound on the free list
    max_free: usize,

    /// Last lifecycle version handed out
    version: u64,

    /// Instances ever constructed by this pool
    created: usize,
}

impl<T: Recyclable> Default for CursorPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Recyclable> CursorPool<T> {
    /// Create a pool keeping up to [`DEFAULT_POOL_CAPACITY`] free instances
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_POOL_CAPACITY)
    }

    /// Create a pool keeping up to `max_free` recycled instances
    pub fn with_capacity(max_free: usize) -> Self {
        Self {
            leased: Slab::with_capacity(max_free),
            free: Vec::with_capacity(max_free),
            max_free,
            version: 0,
            created: 0,
        }
    }

    /// Lease an instance, reusing a recycled one when available.
    ///
    /// `make` is only called when the free list is empty.
    pub fn rent(&mut self, make: impl FnOnce() -> T) -> Lease {
        let item = match self.free.pop() {
            Some(item) => item,
            None => {
                self.created += 1;
                debug!("cursor pool constructing instance #{}", self.created);
                make()
            }
        };
        self.version += 1;
        let version = self.version;
        let key = self.leased.insert(Slot { item, version });
        Lease { key, version }
    }

    /// Borrow a leased instance
    pub fn get(&self, lease: &Lease) -> Result<&T> {
        match self.leased.get(lease.key) {
            Some(slot) if slot.version == lease.version => Ok(&slot.item),
            _ => Err(stale(lease)),
        }
    }

    /// Mutably borrow a leased instance
    pub fn get_mut(&mut self, lease: &Lease) -> Result<&mut T> {
        match self.leased.get_mut(lease.key) {
            Some(slot) if slot.version == lease.version => Ok(&mut slot.item),
            _ => Err(stale(lease)),
        }
    }

    /// Return a leased instance. It is recycled before reuse.
    pub fn give_back(&mut self, lease: Lease) -> Result<()> {
        match self.leased.get(lease.key) {
            Some(slot) if slot.version == lease.version => {}
            _ => return Err(stale(&lease)),
        }
        let mut slot = self.leased.remove(lease.key);
        slot.item.recycle();
        if self.free.len() < self.max_free {
            self.free.push(slot.item);
        }
        Ok(())
    }

    /// Number of instances currently leased
    #[inline]
    pub fn leased_count(&self) -> usize {
        self.leased.len()
    }

    /// Number of recycled instances ready for reuse
    #[inline]
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Number of instances ever constructed
    #[inline]
    pub fn created_count(&self) -> usize {
        self.created
    }
}

fn stale(lease: &Lease) -> CursorError {
    CursorError::StaleLease {
        key: lease.key,
        version: lease.version,
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
