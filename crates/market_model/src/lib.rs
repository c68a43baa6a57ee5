//! Pure pricing-engine models for CLMSR range markets.
//!
//! No I/O, no shared state: every function is total over its checked domain
//! and returns a plain error enum on violation. The stateful core composes
//! these models; nothing in here knows about custody, positions or batches.
//!
//! - `tree`: lazy multiplicative range tree over discrete outcome bins
//! - `ticks`: tick-space to bin-index mapping
//! - `exposure`: per-bin settlement payout ledger
//! - `clmsr`: cost / proceeds / inverse-cost formulas

#![forbid(unsafe_code)]

pub mod clmsr;
pub mod exposure;
pub mod ticks;
pub mod tree;

pub use clmsr::ClmsrError;
pub use exposure::{ExposureError, ExposureLedger};
pub use ticks::{TickError, TickGrid};
pub use tree::{RangeTree, TreeError};

use wad_math::WAD;

/// Hard cap on bins per market.
pub const MAX_BIN_COUNT: usize = 16_384;

/// Smallest factor a single range update may apply (0.01).
pub const MIN_FACTOR: u128 = WAD / 100;

/// Largest factor a single range update may apply (100). Larger effective
/// moves must be chunked by the caller into repeated safe applications.
pub const MAX_FACTOR: u128 = 100 * WAD;

/// Ceiling on the tree's total sum. Keeps two factor applications of
/// headroom below u128::MAX (~3.4e38) for every cached node sum.
pub const MAX_TREE_SUM: u128 = 1_000_000_000_000_000_000_000_000_000_000_000_000; // 1e36

/// Liquidity parameter bounds (WAD).
pub const MIN_ALPHA: u128 = WAD;
pub const MAX_ALPHA: u128 = 1_000_000_000 * WAD;
