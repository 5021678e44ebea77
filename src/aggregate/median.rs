//! Fixed-width running median with checkpoint-indexed sorted order.
//!
//! ## Design
//!
//! The `w` window values live in a fixed arena of nodes. Each node sits on
//! two orderings at once:
//!
//! ```text
//! sequence order (ring):  slot 0 -> slot 1 -> ... -> slot w-1 -> slot 0
//!                         ^ oldest
//!
//! sorted order (list):    head <-> n <-> n <-> ... <-> tail
//!                         ^ cp[0]        ^ cp[1]        (every `step` ranks)
//! ```
//!
//! - Sequence order is implicit: slot `i` is followed by slot `(i + 1) % w`,
//!   and `oldest` marks the slot the next `update()` overwrites
//! - Sorted order is a doubly-linked list through `prev_sorted` /
//!   `next_sorted` arena indices
//! - `checkpoints[j]` is the node at sorted rank `j * step`, with
//!   `step = floor(sqrt(w))`
//!
//! Ties are broken by slot index, so the sorted order is a strict total
//! order over `(value, slot)` and every rank is well defined.
//!
//! ## Update
//!
//! Replacing a value moves one node in the sorted list. The node's old and
//! new ranks are located through the checkpoints (binary search, then at
//! most `step` hops), the node is spliced to its new place, and only the
//! checkpoints whose rank falls between the two positions shift by one
//! neighbour. Each update is O(sqrt(w)).

use std::cmp::Ordering;

use crate::error::{CursorError, Result};

/// A window value with its place in the sorted order
#[derive(Debug, Clone, Copy)]
struct MedianNode {
    value: f64,
    prev_sorted: Option<usize>,
    next_sorted: Option<usize>,
}

/// Median of the last `width` values with O(sqrt(width)) updates.
///
/// Created empty; `initialize()` loads the first full window, after which
/// `update()` slides it forward one value at a time.
#[derive(Debug, Clone)]
pub struct RunningMedian {
    width: usize,

    /// Rank distance between consecutive checkpoints
    step: usize,

    /// Window values indexed by slot
    nodes: Vec<MedianNode>,

    /// Node at rank `j * step` for each `j`
    checkpoints: Vec<usize>,

    /// Smallest node
    head: Option<usize>,

    /// Largest node
    tail: Option<usize>,

    /// Slot holding the oldest value
    oldest: usize,

    /// Cached result
    median: f64,
}

impl RunningMedian {
    /// Create an empty median over `width` values
    ///
    /// # Errors
    ///
    /// [`CursorError::InvalidWidth`] when `width` is zero.
    pub fn new(width: usize) -> Result<Self> {
        if width == 0 {
            return Err(CursorError::InvalidWidth("0".to_string()));
        }
        let step = isqrt(width).max(1);
        Ok(Self {
            width,
            step,
            nodes: Vec::with_capacity(width),
            checkpoints: Vec::with_capacity(width / step),
            head: None,
            tail: None,
            oldest: 0,
            median: f64::NAN,
        })
    }

    /// Create and initialize from a full window (oldest first)
    pub fn from_window(window: &[f64]) -> Result<Self> {
        let mut median = Self::new(window.len())?;
        median.initialize(window)?;
        Ok(median)
    }

    /// Load the initial window, oldest value first.
    ///
    /// # Arguments
    ///
    /// * `window` - Exactly `width` values
    ///
    /// # Errors
    ///
    /// [`CursorError::InvalidOperation`] when the length differs from the width.
    pub fn initialize(&mut self, window: &[f64]) -> Result<()> {
        if window.len() != self.width {
            return Err(CursorError::InvalidOperation(
                "initial median window must hold exactly `width` values",
            ));
        }

        self.nodes = window
            .iter()
            .map(|&value| MedianNode {
                value,
                prev_sorted: None,
                next_sorted: None,
            })
            .collect();

        let mut order: Vec<usize> = (0..self.width).collect();
        order.sort_by(|&a, &b| cmp_key((window[a], a), (window[b], b)));

        for pair in order.windows(2) {
            self.nodes[pair[0]].next_sorted = Some(pair[1]);
            self.nodes[pair[1]].prev_sorted = Some(pair[0]);
        }
        self.head = order.first().copied();
        self.tail = order.last().copied();

        self.checkpoints = order.iter().step_by(self.step).copied().collect();
        self.checkpoints.truncate(self.width / self.step);

        self.oldest = 0;
        self.median = self.compute_median();
        Ok(())
    }

    /// Whether `initialize()` has loaded a window
    #[inline]
    pub fn is_initialized(&self) -> bool {
        !self.nodes.is_empty()
    }

    /// Window width
    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Current median, `NaN` before initialization
    #[inline]
    pub fn median(&self) -> f64 {
        self.median
    }

    /// Slide forward: drop the oldest value, append `value` as newest.
    ///
    /// # Returns
    ///
    /// The median of the new window.
    pub fn update(&mut self, value: f64) -> Result<f64> {
        self.ensure_initialized()?;
        let slot = self.oldest;
        self.replace(slot, value);
        self.oldest = (slot + 1) % self.width;
        Ok(self.median)
    }

    /// Slide backward: drop the newest value, prepend `value` as oldest.
    ///
    /// # Returns
    ///
    /// The median of the new window.
    pub fn update_back(&mut self, value: f64) -> Result<f64> {
        self.ensure_initialized()?;
        let slot = self.newest_slot();
        self.replace(slot, value);
        self.oldest = slot;
        Ok(self.median)
    }

    /// Oldest value in the window
    pub fn oldest_value(&self) -> Option<f64> {
        self.nodes.get(self.oldest).map(|node| node.value)
    }

    /// Newest value in the window
    pub fn newest_value(&self) -> Option<f64> {
        self.nodes.get(self.newest_slot()).map(|node| node.value)
    }

    /// Window values, oldest first
    pub fn values_in_sequence(&self) -> Vec<f64> {
        let len = self.nodes.len();
        (0..len)
            .map(|i| self.nodes[(self.oldest + i) % len].value)
            .collect()
    }

    /// Window values in sorted order
    pub fn values_sorted(&self) -> Vec<f64> {
        let mut values = Vec::with_capacity(self.nodes.len());
        let mut cursor = self.head;
        while let Some(node) = cursor {
            values.push(self.nodes[node].value);
            cursor = self.nodes[node].next_sorted;
        }
        values
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(CursorError::InvalidOperation(
                "running median updated before initialize",
            ))
        }
    }

    #[inline]
    fn newest_slot(&self) -> usize {
        (self.oldest + self.width - 1) % self.width
    }

    #[inline]
    fn key(&self, node: usize) -> (f64, usize) {
        (self.nodes[node].value, node)
    }

    /// Overwrite the value in `slot` and restore sorted order.
    fn replace(&mut self, slot: usize, value: f64) {
        if self.width == 1 {
            self.nodes[slot].value = value;
            self.median = value;
            return;
        }

        let old_rank = self.rank_of(slot);
        let (anchor, new_rank) = self.insertion_point(slot, (value, slot), old_rank);

        self.nodes[slot].value = value;
        if new_rank != old_rank {
            let old_prev = self.nodes[slot].prev_sorted;
            let old_next = self.nodes[slot].next_sorted;
            self.unlink(slot);
            self.link_after(anchor, slot);
            self.shift_checkpoints(slot, old_rank, new_rank, old_prev, old_next);
        }
        self.median = self.compute_median();
    }

    /// Sorted rank of `node` under the current values.
    fn rank_of(&self, node: usize) -> usize {
        let target = self.key(node);
        let j = self
            .checkpoints
            .partition_point(|&cp| cmp_key(self.key(cp), target) != Ordering::Greater)
            .saturating_sub(1);

        let mut cursor = self.checkpoints[j];
        let mut rank = j * self.step;
        while cursor != node {
            match self.nodes[cursor].next_sorted {
                Some(next) => cursor = next,
                None => {
                    debug_assert!(false, "node {node} missing from sorted order");
                    break;
                }
            }
            rank += 1;
        }
        rank
    }

    /// Where `node` belongs once its key becomes `new_key`.
    ///
    /// # Returns
    ///
    /// The node the moved node should follow (`None` for the head) and
    /// the moved node's rank in the final order.
    fn insertion_point(
        &self,
        node: usize,
        new_key: (f64, usize),
        old_rank: usize,
    ) -> (Option<usize>, usize) {
        let below = self
            .checkpoints
            .partition_point(|&cp| cmp_key(self.key(cp), new_key) == Ordering::Less);
        if below == 0 {
            return (None, 0);
        }

        // Last node, under the old keys, strictly below the new key
        let mut left = self.checkpoints[below - 1];
        let mut left_rank = (below - 1) * self.step;
        while let Some(next) = self.nodes[left].next_sorted {
            if cmp_key(self.key(next), new_key) != Ordering::Less {
                break;
            }
            left = next;
            left_rank += 1;
        }

        let new_rank = left_rank + 1 - usize::from(old_rank <= left_rank);
        let anchor = if left == node {
            self.nodes[node].prev_sorted
        } else {
            Some(left)
        };
        (anchor, new_rank)
    }

    fn unlink(&mut self, node: usize) {
        let prev = self.nodes[node].prev_sorted;
        let next = self.nodes[node].next_sorted;

        match prev {
            Some(p) => self.nodes[p].next_sorted = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n].prev_sorted = prev,
            None => self.tail = prev,
        }

        self.nodes[node].prev_sorted = None;
        self.nodes[node].next_sorted = None;
    }

    fn link_after(&mut self, anchor: Option<usize>, node: usize) {
        let next = match anchor {
            Some(a) => self.nodes[a].next_sorted,
            None => self.head,
        };

        self.nodes[node].prev_sorted = anchor;
        self.nodes[node].next_sorted = next;

        match anchor {
            Some(a) => self.nodes[a].next_sorted = Some(node),
            None => self.head = Some(node),
        }
        match next {
            Some(n) => self.nodes[n].prev_sorted = Some(node),
            None => self.tail = Some(node),
        }
    }

    /// Re-point the checkpoints whose rank lies between the moved node's
    /// old and new ranks. The sorted links are already final.
    fn shift_checkpoints(
        &mut self,
        moved: usize,
        old_rank: usize,
        new_rank: usize,
        old_prev: Option<usize>,
        old_next: Option<usize>,
    ) {
        let lo = old_rank.min(new_rank);
        let hi = old_rank.max(new_rank);
        let moved_up = old_rank < new_rank;

        let first = lo.div_ceil(self.step);
        let last = (hi / self.step).min(self.checkpoints.len() - 1);

        for j in first..=last {
            let rank = j * self.step;
            let current = self.checkpoints[j];
            let replacement = if rank == new_rank {
                Some(moved)
            } else if rank == old_rank {
                if moved_up {
                    old_next
                } else {
                    old_prev
                }
            } else if moved_up {
                self.nodes[current].next_sorted
            } else {
                self.nodes[current].prev_sorted
            };
            self.checkpoints[j] = replacement.unwrap_or(current);
        }
    }

    /// Node at sorted `rank`, reached from the nearest checkpoint below it
    fn node_at_rank(&self, rank: usize) -> usize {
        let j = (rank / self.step).min(self.checkpoints.len() - 1);
        let mut node = self.checkpoints[j];
        for _ in 0..rank - j * self.step {
            match self.nodes[node].next_sorted {
                Some(next) => node = next,
                None => break,
            }
        }
        node
    }

    fn compute_median(&self) -> f64 {
        let mid = self.width / 2;
        if self.width % 2 == 1 {
            return self.nodes[self.node_at_rank(mid)].value;
        }
        let lower = self.node_at_rank(mid - 1);
        let upper = self.nodes[lower].next_sorted.unwrap_or(lower);
        (self.nodes[lower].value + self.nodes[upper].value) / 2.0
    }
}

/// Median by sorting a copy, used for short or unbounded windows.
///
/// Even-length inputs average the two middle values. Returns `NaN` when
/// `values` is empty.
pub fn naive_median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    }
}

#[inline]
fn cmp_key(a: (f64, usize), b: (f64, usize)) -> Ordering {
    a.0.total_cmp(&b.0).then(a.1.cmp(&b.1))
}

fn isqrt(n: usize) -> usize {
    let mut root = (n as f64).sqrt() as usize;
    while root * root > n {
        root -= 1;
    }
    while (root + 1) * (root + 1) <= n {
        root += 1;
    }
    root
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    /// Walk both orderings and verify every structural invariant.
    fn check_invariants(median: &RunningMedian) {
        let mut ranks = vec![usize::MAX; median.width];
        let mut cursor = median.head;
        let mut prev: Option<usize> = None;
        let mut rank = 0;
        while let Some(node) = cursor {
            assert_eq!(median.nodes[node].prev_sorted, prev, "back link of {node}");
            if let Some(p) = prev {
                assert_eq!(
                    cmp_key(median.key(p), median.key(node)),
                    Ordering::Less,
                    "sorted order broken at rank {rank}"
                );
            }
            ranks[node] = rank;
            prev = Some(node);
            cursor = median.nodes[node].next_sorted;
            rank += 1;
        }
        assert_eq!(rank, median.width, "sorted list length");
        assert_eq!(median.tail, prev);

        assert_eq!(median.checkpoints.len(), median.width / median.step);
        for (j, &cp) in median.checkpoints.iter().enumerate() {
            assert_eq!(ranks[cp], j * median.step, "checkpoint {j}");
        }
        assert_eq!(median.median().to_bits(), naive_median(&median.values_in_sequence()).to_bits());
    }

    #[test]
    fn test_zero_width_rejected() {
        assert!(matches!(RunningMedian::new(0), Err(CursorError::InvalidWidth(_))));
    }

    #[test]
    fn test_initialize_length_checked() {
        let mut median = RunningMedian::new(3).unwrap();
        assert!(median.initialize(&[1.0, 2.0]).is_err());
        assert!(median.update(1.0).is_err());
        assert!(median.median().is_nan());
    }

    #[test]
    fn test_window_three_sequence() {
        let mut median = RunningMedian::from_window(&[5.0, 2.0, 8.0]).unwrap();
        assert_eq!(median.median(), 5.0);

        assert_eq!(median.update(1.0).unwrap(), 2.0); // [2, 8, 1]
        assert_eq!(median.update(9.0).unwrap(), 8.0); // [8, 1, 9]
        assert_eq!(median.update(3.0).unwrap(), 3.0); // [1, 9, 3]
        check_invariants(&median);
        assert_eq!(median.values_in_sequence(), vec![1.0, 9.0, 3.0]);
    }

    #[test]
    fn test_even_width_averages_middle_pair() {
        let mut median = RunningMedian::from_window(&[4.0, 1.0, 3.0, 2.0]).unwrap();
        assert_eq!(median.median(), 2.5);

        median.update(10.0).unwrap(); // [1, 3, 2, 10]
        assert_eq!(median.median(), 2.5);
        median.update(10.0).unwrap(); // [3, 2, 10, 10]
        assert_eq!(median.median(), 6.5);
        check_invariants(&median);
    }

    #[test]
    fn test_width_one() {
        let mut median = RunningMedian::from_window(&[7.0]).unwrap();
        assert_eq!(median.update(3.0).unwrap(), 3.0);
        assert_eq!(median.update_back(4.0).unwrap(), 4.0);
        assert_eq!(median.values_in_sequence(), vec![4.0]);
    }

    #[test]
    fn test_duplicates() {
        let mut median = RunningMedian::from_window(&[2.0, 2.0, 2.0, 2.0, 2.0]).unwrap();
        for v in [2.0, 1.0, 2.0, 3.0, 2.0, 2.0] {
            median.update(v).unwrap();
            check_invariants(&median);
        }
        assert_eq!(median.median(), 2.0);
    }

    #[test]
    fn test_update_back_reverses_update() {
        let window = [6.0, 1.0, 9.0, 4.0, 4.0, 7.0, 2.0];
        let mut median = RunningMedian::from_window(&window).unwrap();
        let before = median.median();

        median.update(5.0).unwrap();
        median.update_back(6.0).unwrap();

        assert_eq!(median.values_in_sequence(), window.to_vec());
        assert_eq!(median.median(), before);
        assert_eq!(median.oldest_value(), Some(6.0));
        assert_eq!(median.newest_value(), Some(2.0));
        check_invariants(&median);
    }

    #[test]
    fn test_values_sorted() {
        let median = RunningMedian::from_window(&[3.0, -1.0, 2.0, 2.0]).unwrap();
        assert_eq!(median.values_sorted(), vec![-1.0, 2.0, 2.0, 3.0]);
    }

    #[test]
    fn test_random_updates_match_naive() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);

        for width in [2usize, 3, 4, 5, 8, 9, 10, 16, 17, 31] {
            let initial: Vec<f64> = (0..width).map(|_| rng.gen_range(0..20) as f64).collect();
            let mut median = RunningMedian::from_window(&initial).unwrap();
            check_invariants(&median);

            for _ in 0..400 {
                // Small value range forces plenty of ties
                let value = rng.gen_range(0..20) as f64;
                if rng.gen_bool(0.8) {
                    median.update(value).unwrap();
                } else {
                    median.update_back(value).unwrap();
                }
                check_invariants(&median);
            }
        }
    }

    #[test]
    fn test_naive_median() {
        assert!(naive_median(&[]).is_nan());
        assert_eq!(naive_median(&[3.0]), 3.0);
        assert_eq!(naive_median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(naive_median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
    }

    #[test]
    fn test_isqrt() {
        assert_eq!(isqrt(1), 1);
        assert_eq!(isqrt(3), 1);
        assert_eq!(isqrt(4), 2);
        assert_eq!(isqrt(99), 9);
        assert_eq!(isqrt(100), 10);
    }
}
