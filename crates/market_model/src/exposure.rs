//! Per-market settlement exposure ledger.
//!
//! Diff array over bins: for each possible settlement bin, the total token
//! quantity payable if settlement lands there. Range updates are O(1)
//! amortized (two-point diff), point queries reconstruct a prefix sum.
//!
//! A negative reconstructed exposure is a hard bookkeeping failure, never a
//! clamp-to-zero case: it means more quantity was removed from a bin than
//! was ever added.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExposureError {
    /// Bin index out of range or range inverted.
    InvalidRange,
    /// Accumulated exposure overflowed.
    Overflow,
    /// Reconstructed exposure went negative.
    NegativeExposure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExposureLedger {
    /// diff[i] adds at bin i; diff[hi + 1] cancels past the range end.
    diff: Vec<i128>,
    bins: usize,
}

impl ExposureLedger {
    pub fn new(bins: usize) -> Self {
        Self {
            diff: vec![0; bins + 1],
            bins,
        }
    }

    pub fn bin_count(&self) -> usize {
        self.bins
    }

    /// Adds `qty` to every bin in `[lo, hi]`.
    pub fn range_add(&mut self, lo: usize, hi: usize, qty: u64) -> Result<(), ExposureError> {
        self.range_update(lo, hi, qty as i128)
    }

    /// Removes `qty` from every bin in `[lo, hi]`.
    pub fn range_sub(&mut self, lo: usize, hi: usize, qty: u64) -> Result<(), ExposureError> {
        self.range_update(lo, hi, -(qty as i128))
    }

    fn range_update(&mut self, lo: usize, hi: usize, delta: i128) -> Result<(), ExposureError> {
        if lo > hi || hi >= self.bins {
            return Err(ExposureError::InvalidRange);
        }
        self.diff[lo] = self.diff[lo]
            .checked_add(delta)
            .ok_or(ExposureError::Overflow)?;
        self.diff[hi + 1] = self.diff[hi + 1]
            .checked_sub(delta)
            .ok_or(ExposureError::Overflow)?;
        Ok(())
    }

    /// Total payout owed if settlement lands on `bin`.
    pub fn payout_at(&self, bin: usize) -> Result<u64, ExposureError> {
        if bin >= self.bins {
            return Err(ExposureError::InvalidRange);
        }
        let mut acc: i128 = 0;
        for &d in &self.diff[..=bin] {
            acc = acc.checked_add(d).ok_or(ExposureError::Overflow)?;
        }
        if acc < 0 {
            return Err(ExposureError::NegativeExposure);
        }
        u64::try_from(acc).map_err(|_| ExposureError::Overflow)
    }

    /// Exposure at every bin; fails on any negative reconstruction.
    pub fn snapshot(&self) -> Result<Vec<u64>, ExposureError> {
        let mut out = Vec::with_capacity(self.bins);
        let mut acc: i128 = 0;
        for &d in &self.diff[..self.bins] {
            acc = acc.checked_add(d).ok_or(ExposureError::Overflow)?;
            if acc < 0 {
                return Err(ExposureError::NegativeExposure);
            }
            out.push(u64::try_from(acc).map_err(|_| ExposureError::Overflow)?);
        }
        Ok(out)
    }
}
