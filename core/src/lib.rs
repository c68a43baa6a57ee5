//! lattice-core: CLMSR range markets over a shared capital vault.
//!
//! The pricing engine (`market_model`) and the vault accounting models
//! (`vault_model`) are pure; this crate owns the state and the sequencing:
//! market lifecycle and settlement windows, trade execution with custody
//! and fee enforcement, the per-batch P&L snapshot, and the batch
//! accounting cycle that is the sole mutator of vault NAV/shares/price.
//!
//! All mutating calls funnel through `&mut Protocol`; `SharedProtocol`
//! wraps it in a mutex for the single-writer discipline the accounting
//! model requires.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod interfaces;
pub mod market;
pub mod protocol;
pub mod trade;
pub mod vault;

pub use config::ProtocolConfig;
pub use error::CoreError;
pub use interfaces::{
    AccountId, Custody, FeePolicy, InMemoryCustody, InMemoryOracle, InMemoryRegistry,
    NoFeePolicy, Oracle, OracleSample, Position, PositionRegistry, ProportionalFeePolicy,
    TradeContext, TradeKind,
};
pub use market::{Market, MarketId, MarketParams, MarketPhase, MarketStatus, SettlementOutcome};
pub use protocol::{MarketSummary, Protocol, SharedProtocol};
pub use vault::{BatchId, BatchSummary, PnlSnapshot, Vault, VaultSummary};

pub type CoreResult<T> = Result<T, CoreError>;

pub type PositionId = u64;
