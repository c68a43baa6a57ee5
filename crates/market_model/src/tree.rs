//! Lazy multiplicative range tree.
//!
//! Segment tree over `n` bins whose leaves hold WAD-scaled weights. Unlike
//! an additive lazy tree, a pending factor scales the *entire* subtree sum
//! and pending factors compose by multiplication: every leaf in the covered
//! range is scaled uniformly, so scalar multiplication distributes over the
//! cached sums.
//!
//! Invariants:
//! - every applied factor lies in `[MIN_FACTOR, MAX_FACTOR]`
//! - the total sum never exceeds `MAX_TREE_SUM`
//! - a node's cached sum is valid only once the pending factors above it
//!   have been applied; reads descend with an accumulated factor instead of
//!   mutating, so `&self` queries are safe against a stable snapshot

use crate::{MAX_BIN_COUNT, MAX_FACTOR, MAX_TREE_SUM, MIN_FACTOR};
use wad_math::{wmul_floor, wmul_nearest, MathError, WAD};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeError {
    /// Bin count is zero or above `MAX_BIN_COUNT`.
    InvalidBinCount,
    /// Range endpoints out of bounds or inverted.
    InvalidRange,
    /// Factor outside `[MIN_FACTOR, MAX_FACTOR]`.
    FactorOutOfBounds,
    /// Applying the factor would push the total past `MAX_TREE_SUM`.
    SumOverflow,
    /// Seed already applied or tree already traded.
    AlreadySeeded,
    /// Seed factor slice length does not match the bin count.
    SeedLengthMismatch,
    /// Arithmetic failure (should be unreachable after validation).
    Math(MathError),
}

impl From<MathError> for TreeError {
    fn from(e: MathError) -> Self {
        TreeError::Math(e)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeTree {
    /// Number of live bins.
    n: usize,
    /// Power-of-two leaf capacity.
    size: usize,
    /// 1-based node sums; `sums[1]` is the total.
    sums: Vec<u128>,
    /// Pending multiplicative factor for each internal node's children.
    lazy: Vec<u128>,
    seeded: bool,
    touched: bool,
}

impl RangeTree {
    /// Allocates `n` unit-weight leaves.
    pub fn new(n: usize) -> Result<Self, TreeError> {
        if n == 0 || n > MAX_BIN_COUNT {
            return Err(TreeError::InvalidBinCount);
        }
        let size = n.next_power_of_two();
        let mut sums = vec![0u128; 2 * size];
        for i in 0..n {
            sums[size + i] = WAD;
        }
        for node in (1..size).rev() {
            sums[node] = sums[2 * node] + sums[2 * node + 1];
        }
        Ok(Self {
            n,
            size,
            sums,
            lazy: vec![WAD; 2 * size],
            seeded: false,
            touched: false,
        })
    }

    pub fn bin_count(&self) -> usize {
        self.n
    }

    /// Total sum of all leaves, O(1).
    pub fn total_sum(&self) -> u128 {
        self.sums[1]
    }

    /// Applies the opening prior, one factor per bin. Allowed exactly once,
    /// before any range update has touched the tree.
    pub fn seed(&mut self, factors: &[u128]) -> Result<(), TreeError> {
        if self.seeded || self.touched {
            return Err(TreeError::AlreadySeeded);
        }
        if factors.len() != self.n {
            return Err(TreeError::SeedLengthMismatch);
        }
        for &f in factors {
            if !(MIN_FACTOR..=MAX_FACTOR).contains(&f) {
                return Err(TreeError::FactorOutOfBounds);
            }
        }
        for (i, &f) in factors.iter().enumerate() {
            self.sums[self.size + i] = wmul_floor(WAD, f)?;
        }
        for node in (1..self.size).rev() {
            self.sums[node] = self.sums[2 * node] + self.sums[2 * node + 1];
        }
        if self.sums[1] > MAX_TREE_SUM {
            return Err(TreeError::SumOverflow);
        }
        self.seeded = true;
        Ok(())
    }

    /// Multiplies every leaf in `[lo, hi]` by `factor`, O(log n).
    pub fn apply_range_factor(
        &mut self,
        lo: usize,
        hi: usize,
        factor: u128,
    ) -> Result<(), TreeError> {
        if lo > hi || hi >= self.n {
            return Err(TreeError::InvalidRange);
        }
        if !(MIN_FACTOR..=MAX_FACTOR).contains(&factor) {
            return Err(TreeError::FactorOutOfBounds);
        }
        // Reject before mutating: project the new total from the current
        // range sum so a failed application leaves the tree untouched.
        let range = self.range_sum(lo, hi)?;
        let scaled = wmul_floor(range, factor)?;
        let projected = self.sums[1] - range + scaled;
        if projected > MAX_TREE_SUM {
            return Err(TreeError::SumOverflow);
        }
        self.apply_rec(1, 0, self.size - 1, lo, hi, factor)?;
        self.touched = true;
        Ok(())
    }

    /// Sum of leaves in `[lo, hi]`, O(log n). Does not mutate: pending
    /// factors above a node are folded into an accumulator on the way down.
    pub fn range_sum(&self, lo: usize, hi: usize) -> Result<u128, TreeError> {
        if lo > hi || hi >= self.n {
            return Err(TreeError::InvalidRange);
        }
        self.query_rec(1, 0, self.size - 1, lo, hi, WAD)
    }

    /// Reconstructs every leaf weight by resolving pending factors top-down.
    /// O(n); used for seeding checks and consistency verification.
    pub fn leaf_values(&self) -> Result<Vec<u128>, TreeError> {
        let mut out = vec![0u128; self.n];
        self.collect_rec(1, 0, self.size - 1, WAD, &mut out)?;
        Ok(out)
    }

    fn apply_rec(
        &mut self,
        node: usize,
        nl: usize,
        nr: usize,
        lo: usize,
        hi: usize,
        factor: u128,
    ) -> Result<(), TreeError> {
        if hi < nl || nr < lo {
            return Ok(());
        }
        if lo <= nl && nr <= hi {
            self.scale_node(node, factor)?;
            return Ok(());
        }
        self.push_down(node)?;
        let mid = (nl + nr) / 2;
        self.apply_rec(2 * node, nl, mid, lo, hi, factor)?;
        self.apply_rec(2 * node + 1, mid + 1, nr, lo, hi, factor)?;
        self.sums[node] = self.sums[2 * node] + self.sums[2 * node + 1];
        Ok(())
    }

    fn query_rec(
        &self,
        node: usize,
        nl: usize,
        nr: usize,
        lo: usize,
        hi: usize,
        acc: u128,
    ) -> Result<u128, TreeError> {
        if hi < nl || nr < lo {
            return Ok(0);
        }
        if lo <= nl && nr <= hi {
            return Ok(wmul_floor(self.sums[node], acc)?);
        }
        let acc = if node < self.size && self.lazy[node] != WAD {
            wmul_nearest(acc, self.lazy[node])?
        } else {
            acc
        };
        let mid = (nl + nr) / 2;
        let left = self.query_rec(2 * node, nl, mid, lo, hi, acc)?;
        let right = self.query_rec(2 * node + 1, mid + 1, nr, lo, hi, acc)?;
        Ok(left + right)
    }

    fn collect_rec(
        &self,
        node: usize,
        nl: usize,
        nr: usize,
        acc: u128,
        out: &mut [u128],
    ) -> Result<(), TreeError> {
        if nl >= self.n {
            return Ok(());
        }
        if node >= self.size {
            out[nl] = wmul_floor(self.sums[node], acc)?;
            return Ok(());
        }
        let acc = if self.lazy[node] != WAD {
            wmul_nearest(acc, self.lazy[node])?
        } else {
            acc
        };
        let mid = (nl + nr) / 2;
        self.collect_rec(2 * node, nl, mid, acc, out)?;
        self.collect_rec(2 * node + 1, mid + 1, nr, acc, out)?;
        Ok(())
    }

    /// Scales a node's cached sum and composes its pending child factor.
    fn scale_node(&mut self, node: usize, factor: u128) -> Result<(), TreeError> {
        self.sums[node] = wmul_floor(self.sums[node], factor)?;
        if node < self.size {
            self.lazy[node] = wmul_nearest(self.lazy[node], factor)?;
        }
        Ok(())
    }

    fn push_down(&mut self, node: usize) -> Result<(), TreeError> {
        let pending = self.lazy[node];
        if pending != WAD {
            self.scale_node(2 * node, pending)?;
            self.scale_node(2 * node + 1, pending)?;
            self.lazy[node] = WAD;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_unit_leaves() {
        let t = RangeTree::new(5).unwrap();
        assert_eq!(t.total_sum(), 5 * WAD);
        assert_eq!(t.range_sum(0, 4).unwrap(), 5 * WAD);
        assert_eq!(t.range_sum(2, 2).unwrap(), WAD);
    }

    #[test]
    fn test_invalid_bin_count() {
        assert_eq!(RangeTree::new(0), Err(TreeError::InvalidBinCount));
        assert_eq!(
            RangeTree::new(MAX_BIN_COUNT + 1),
            Err(TreeError::InvalidBinCount)
        );
    }

    #[test]
    fn test_single_leaf_range_update() {
        let mut t = RangeTree::new(4).unwrap();
        t.apply_range_factor(2, 2, 2 * WAD).unwrap();
        assert_eq!(t.range_sum(2, 2).unwrap(), 2 * WAD);
        assert_eq!(t.total_sum(), 5 * WAD);
    }

    #[test]
    fn test_full_range_update() {
        let mut t = RangeTree::new(7).unwrap();
        t.apply_range_factor(0, 6, 3 * WAD).unwrap();
        assert_eq!(t.total_sum(), 21 * WAD);
        assert_eq!(t.range_sum(0, 6).unwrap(), 21 * WAD);
    }

    #[test]
    fn test_factor_bounds_rejected() {
        let mut t = RangeTree::new(4).unwrap();
        assert_eq!(
            t.apply_range_factor(0, 3, MIN_FACTOR - 1),
            Err(TreeError::FactorOutOfBounds)
        );
        assert_eq!(
            t.apply_range_factor(0, 3, MAX_FACTOR + 1),
            Err(TreeError::FactorOutOfBounds)
        );
        // failed applications leave the tree untouched
        assert_eq!(t.total_sum(), 4 * WAD);
    }

    #[test]
    fn test_overlapping_updates_consistent_with_leaves() {
        let mut t = RangeTree::new(8).unwrap();
        t.apply_range_factor(0, 5, 3 * WAD).unwrap();
        t.apply_range_factor(3, 7, WAD / 2).unwrap();
        t.apply_range_factor(1, 4, 2 * WAD).unwrap();
        let leaves = t.leaf_values().unwrap();
        let recomputed: u128 = leaves.iter().sum();
        let total = t.total_sum();
        assert!(
            total.abs_diff(recomputed) <= 64,
            "total {total} leaves {recomputed}"
        );
    }

    #[test]
    fn test_seed_once() {
        let mut t = RangeTree::new(3).unwrap();
        t.seed(&[WAD, 2 * WAD, WAD]).unwrap();
        assert_eq!(t.total_sum(), 4 * WAD);
        assert_eq!(t.seed(&[WAD, WAD, WAD]), Err(TreeError::AlreadySeeded));
    }

    #[test]
    fn test_seed_after_trade_rejected() {
        let mut t = RangeTree::new(3).unwrap();
        t.apply_range_factor(0, 0, 2 * WAD).unwrap();
        assert_eq!(t.seed(&[WAD, WAD, WAD]), Err(TreeError::AlreadySeeded));
    }

    #[test]
    fn test_seed_length_and_bounds() {
        let mut t = RangeTree::new(3).unwrap();
        assert_eq!(t.seed(&[WAD, WAD]), Err(TreeError::SeedLengthMismatch));
        assert_eq!(
            t.seed(&[WAD, WAD, MAX_FACTOR + 1]),
            Err(TreeError::FactorOutOfBounds)
        );
    }

    #[test]
    fn test_sum_overflow_guard() {
        let mut t = RangeTree::new(2).unwrap();
        // 2 WAD total; pushing to > 1e36 needs ~ 5e17x, far past one safe
        // application, so drive it with repeated max-factor updates.
        for _ in 0..8 {
            t.apply_range_factor(0, 1, MAX_FACTOR).unwrap();
        }
        // total is now 2e18 * 100^8 = 2e34; one more 100x projects past 1e36
        assert_eq!(
            t.apply_range_factor(0, 1, MAX_FACTOR),
            Err(TreeError::SumOverflow)
        );
        assert_eq!(t.total_sum() / WAD, 2 * 10u128.pow(16));
    }

    #[test]
    fn test_padding_leaves_do_not_count() {
        // n = 5 rounds to capacity 8; padded leaves stay zero
        let mut t = RangeTree::new(5).unwrap();
        t.apply_range_factor(0, 4, 10 * WAD).unwrap();
        assert_eq!(t.total_sum(), 50 * WAD);
    }
}
