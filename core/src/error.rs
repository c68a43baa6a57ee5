//! Structured error type for the core services.
//!
//! Four classes, all aborting the whole operation with no partial state:
//! validation (caller bug), sequencing (retry once the gate opens),
//! capacity/solvency (hard failure, never silently clamped), arithmetic.
//! Model-crate errors fold in via `From`.

use crate::market::MarketId;
use crate::vault::BatchId;
use crate::PositionId;
use market_model::{ClmsrError, ExposureError, TickError, TreeError};
use thiserror::Error;
use vault_model::{BatchMathError, RiskError, WaterfallError};
use wad_math::MathError;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CoreError {
    // --- validation ---
    #[error("amount must be non-zero")]
    ZeroAmount,
    #[error("unknown market {0}")]
    UnknownMarket(MarketId),
    #[error("unknown position {0}")]
    UnknownPosition(PositionId),
    #[error("caller does not own position {0}")]
    NotPositionOwner(PositionId),
    #[error("fee {fee} exceeds base amount {base}")]
    FeeExceedsBase { fee: u64, base: u64 },
    #[error("quantity needs {needed} chunks, limit {limit}")]
    TooManyChunks { needed: u64, limit: u64 },
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    // --- sequencing ---
    #[error("market {0} is not trading")]
    MarketNotTrading(MarketId),
    #[error("market {0} is already settled")]
    AlreadySettled(MarketId),
    #[error("market {0} has not been marked failed")]
    NotFailed(MarketId),
    #[error("settlement window for market {0} is not open")]
    SettlementWindowNotOpen(MarketId),
    #[error("settlement window for market {0} has closed")]
    SettlementWindowClosed(MarketId),
    #[error("operations window for market {0} has not begun")]
    OpsWindowNotReached(MarketId),
    #[error("operations window for market {0} has closed")]
    OpsWindowClosed(MarketId),
    #[error("no settlement candidate inside the submission window")]
    NoCandidate,
    #[error("market {0} has executed claims and cannot reopen")]
    MarketHasClaims(MarketId),
    #[error("market {0} is not settled")]
    NotSettled(MarketId),
    #[error("batch {0} is not ready to process")]
    BatchNotReady(BatchId),
    #[error("batch {0} was already processed")]
    BatchAlreadyProcessed(BatchId),
    #[error("batch {0} has not been processed yet")]
    BatchNotProcessed(BatchId),
    #[error("a pending request already exists for this user")]
    RequestExists,
    #[error("no pending request for this user")]
    NoSuchRequest,
    #[error("request was already resolved by batch processing")]
    RequestAlreadyResolved,
    #[error("request batch has not been processed yet")]
    RequestNotResolved,
    #[error("vault is already seeded")]
    VaultAlreadySeeded,
    #[error("vault is not seeded")]
    VaultNotSeeded,

    // --- capacity / solvency ---
    #[error("seed amount {amount} below minimum {minimum}")]
    SeedBelowMinimum { amount: u64, minimum: u64 },
    #[error("insufficient shares: requested {requested}, available {available}")]
    InsufficientShares { requested: u128, available: u128 },
    #[error("insufficient escrow: requested {requested}, available {available}")]
    InsufficientEscrow { requested: u64, available: u64 },
    #[error("insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: u64, available: u64 },

    // --- wrapped model failures ---
    #[error("math failure: {0:?}")]
    Math(MathError),
    #[error("range tree: {0:?}")]
    Tree(TreeError),
    #[error("tick grid: {0:?}")]
    Tick(TickError),
    #[error("exposure ledger: {0:?}")]
    Exposure(ExposureError),
    #[error("clmsr math: {0:?}")]
    Clmsr(ClmsrError),
    #[error("fee waterfall: {0:?}")]
    Waterfall(WaterfallError),
    #[error("batch math: {0:?}")]
    BatchMath(BatchMathError),
    #[error("risk gate: {0:?}")]
    Risk(RiskError),
}

impl From<MathError> for CoreError {
    fn from(e: MathError) -> Self {
        CoreError::Math(e)
    }
}

impl From<TreeError> for CoreError {
    fn from(e: TreeError) -> Self {
        CoreError::Tree(e)
    }
}

impl From<TickError> for CoreError {
    fn from(e: TickError) -> Self {
        CoreError::Tick(e)
    }
}

impl From<ExposureError> for CoreError {
    fn from(e: ExposureError) -> Self {
        CoreError::Exposure(e)
    }
}

impl From<ClmsrError> for CoreError {
    fn from(e: ClmsrError) -> Self {
        CoreError::Clmsr(e)
    }
}

impl From<WaterfallError> for CoreError {
    fn from(e: WaterfallError) -> Self {
        CoreError::Waterfall(e)
    }
}

impl From<BatchMathError> for CoreError {
    fn from(e: BatchMathError) -> Self {
        CoreError::BatchMath(e)
    }
}

impl From<RiskError> for CoreError {
    fn from(e: RiskError) -> Self {
        CoreError::Risk(e)
    }
}
