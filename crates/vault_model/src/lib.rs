//! Pure vault-accounting models.
//!
//! Everything here operates on plain integers (micro units, WAD ratios) and
//! proves its conservation identities in tests; the stateful core is the
//! only caller. Modules:
//!
//! - `waterfall`: per-batch fee/loss/grant distribution across the vault,
//!   the backstop pool and the treasury
//! - `batch`: share pricing and mint/burn arithmetic at a fixed batch price
//! - `risk`: liquidity bounds and prior-admissibility for market creation

#![forbid(unsafe_code)]

pub mod batch;
pub mod risk;
pub mod waterfall;

pub use batch::{drawdown, share_price, shares_for_deposit, withdraw_payout, BatchMathError};
pub use risk::{RiskCheck, RiskError, RiskParams};
pub use waterfall::{WaterfallConfig, WaterfallError, WaterfallInput, WaterfallOutput};
