//! Tick-space to bin-index mapping.
//!
//! A market discretizes the continuous outcome axis `[min_tick, max_tick)`
//! into bins of width `tick_spacing`. Position ranges are half-open in tick
//! space and inclusive-inclusive in bin space: the upper tick is exclusive,
//! so `range_to_bins(l, u)` covers bins `index(l) ..= index(u) - 1`.

use crate::MAX_BIN_COUNT;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickError {
    /// Spacing is zero or negative.
    InvalidSpacing,
    /// min/max inverted, misaligned, or bin count out of range.
    InvalidBounds,
    /// Tick not aligned to the spacing grid.
    Misaligned,
    /// Tick outside `[min_tick, max_tick]`.
    OutOfRange,
    /// Zero-width or inverted range.
    EmptyRange,
}

/// Immutable per-market tick grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickGrid {
    min_tick: i64,
    max_tick: i64,
    tick_spacing: i64,
    bin_count: usize,
}

impl TickGrid {
    pub fn new(min_tick: i64, max_tick: i64, tick_spacing: i64) -> Result<Self, TickError> {
        if tick_spacing <= 0 {
            return Err(TickError::InvalidSpacing);
        }
        if min_tick >= max_tick {
            return Err(TickError::InvalidBounds);
        }
        let span = max_tick - min_tick;
        if span % tick_spacing != 0 {
            return Err(TickError::InvalidBounds);
        }
        let bin_count = (span / tick_spacing) as usize;
        if bin_count == 0 || bin_count > MAX_BIN_COUNT {
            return Err(TickError::InvalidBounds);
        }
        Ok(Self {
            min_tick,
            max_tick,
            tick_spacing,
            bin_count,
        })
    }

    pub fn min_tick(&self) -> i64 {
        self.min_tick
    }

    pub fn max_tick(&self) -> i64 {
        self.max_tick
    }

    pub fn tick_spacing(&self) -> i64 {
        self.tick_spacing
    }

    pub fn bin_count(&self) -> usize {
        self.bin_count
    }

    /// Maps an aligned, in-bounds position range to an inclusive bin range.
    /// The upper tick is exclusive: `(l, l + spacing)` maps to one bin.
    pub fn range_to_bins(&self, lower: i64, upper: i64) -> Result<(usize, usize), TickError> {
        if lower >= upper {
            return Err(TickError::EmptyRange);
        }
        if lower < self.min_tick || upper > self.max_tick {
            return Err(TickError::OutOfRange);
        }
        if (lower - self.min_tick) % self.tick_spacing != 0
            || (upper - self.min_tick) % self.tick_spacing != 0
        {
            return Err(TickError::Misaligned);
        }
        let lo = ((lower - self.min_tick) / self.tick_spacing) as usize;
        let hi = ((upper - self.min_tick) / self.tick_spacing) as usize - 1;
        Ok((lo, hi))
    }

    /// Maps a raw settlement value to its bin: clamped into the grid, then
    /// aligned down to the spacing. Out-of-range values fold into the
    /// boundary bin — the market only carries exposure inside its bounds,
    /// so the edge bin is the carrier of all tail mass.
    pub fn settlement_bin(&self, tick: i64) -> usize {
        if tick <= self.min_tick {
            return 0;
        }
        if tick >= self.max_tick {
            return self.bin_count - 1;
        }
        ((tick - self.min_tick) / self.tick_spacing) as usize
    }

    /// Grid-aligned settlement tick for a raw value (lower edge of
    /// `settlement_bin`).
    pub fn settlement_tick(&self, tick: i64) -> i64 {
        self.min_tick + self.settlement_bin(tick) as i64 * self.tick_spacing
    }
}
