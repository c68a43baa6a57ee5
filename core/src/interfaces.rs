//! Collaborator seams: custody, position registry, oracle, fee policy.
//!
//! The core never implements transfer mechanics, position ownership or
//! price discovery itself; it calls through these traits. The in-memory
//! implementations back the test suites and any single-process deployment.

use crate::error::CoreError;
use crate::market::MarketId;
use crate::{CoreResult, PositionId};
use std::collections::HashMap;

/// External account handle (trader, depositor, treasury, ...).
pub type AccountId = u64;

// ----------------------------------------------------------------------------
// Custody
// ----------------------------------------------------------------------------

/// Token custody. `pull` moves funds from an account into the protocol
/// reserve; `push` pays out of the reserve. Both are balance-checked.
pub trait Custody {
    fn pull(&mut self, from: AccountId, amount: u64) -> CoreResult<()>;
    fn push(&mut self, to: AccountId, amount: u64) -> CoreResult<()>;
}

/// Map-backed custody for tests and single-process use.
#[derive(Debug, Default, Clone)]
pub struct InMemoryCustody {
    balances: HashMap<AccountId, u64>,
    reserve: u64,
}

impl InMemoryCustody {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: credit an external account.
    pub fn fund(&mut self, account: AccountId, amount: u64) {
        *self.balances.entry(account).or_default() += amount;
    }

    pub fn balance_of(&self, account: AccountId) -> u64 {
        self.balances.get(&account).copied().unwrap_or(0)
    }

    /// Total held by the protocol.
    pub fn reserve(&self) -> u64 {
        self.reserve
    }
}

impl Custody for InMemoryCustody {
    fn pull(&mut self, from: AccountId, amount: u64) -> CoreResult<()> {
        let balance = self.balances.entry(from).or_default();
        if *balance < amount {
            return Err(CoreError::InsufficientBalance {
                requested: amount,
                available: *balance,
            });
        }
        *balance -= amount;
        self.reserve += amount;
        Ok(())
    }

    fn push(&mut self, to: AccountId, amount: u64) -> CoreResult<()> {
        if self.reserve < amount {
            return Err(CoreError::InsufficientBalance {
                requested: amount,
                available: self.reserve,
            });
        }
        self.reserve -= amount;
        *self.balances.entry(to).or_default() += amount;
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Position registry
// ----------------------------------------------------------------------------

/// A trader's claim on a tick range. Owned by the registry; the core treats
/// it as an opaque record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub owner: AccountId,
    pub market: MarketId,
    pub lower_tick: i64,
    pub upper_tick: i64,
    pub quantity: u64,
}

pub trait PositionRegistry {
    fn mint(&mut self, position: Position) -> PositionId;
    fn burn(&mut self, id: PositionId) -> CoreResult<Position>;
    fn update_quantity(&mut self, id: PositionId, quantity: u64) -> CoreResult<()>;
    fn get(&self, id: PositionId) -> CoreResult<Position>;
    fn owner_of(&self, id: PositionId) -> CoreResult<AccountId>;
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryRegistry {
    positions: HashMap<PositionId, Position>,
    next_id: PositionId,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

impl PositionRegistry for InMemoryRegistry {
    fn mint(&mut self, position: Position) -> PositionId {
        let id = self.next_id;
        self.next_id += 1;
        self.positions.insert(id, position);
        id
    }

    fn burn(&mut self, id: PositionId) -> CoreResult<Position> {
        self.positions
            .remove(&id)
            .ok_or(CoreError::UnknownPosition(id))
    }

    fn update_quantity(&mut self, id: PositionId, quantity: u64) -> CoreResult<()> {
        let position = self
            .positions
            .get_mut(&id)
            .ok_or(CoreError::UnknownPosition(id))?;
        position.quantity = quantity;
        Ok(())
    }

    fn get(&self, id: PositionId) -> CoreResult<Position> {
        self.positions
            .get(&id)
            .copied()
            .ok_or(CoreError::UnknownPosition(id))
    }

    fn owner_of(&self, id: PositionId) -> CoreResult<AccountId> {
        Ok(self.get(id)?.owner)
    }
}

// ----------------------------------------------------------------------------
// Oracle
// ----------------------------------------------------------------------------

/// One settlement candidate: a raw outcome value and its observation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OracleSample {
    pub value: i64,
    pub timestamp: u64,
}

/// Supplies at most one candidate per market at a time; the core consumes
/// only the latest and never performs price discovery.
pub trait Oracle {
    fn latest_candidate(&self, market: MarketId) -> Option<OracleSample>;
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryOracle {
    candidates: HashMap<MarketId, OracleSample>,
}

impl InMemoryOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, market: MarketId, value: i64, timestamp: u64) {
        self.candidates
            .insert(market, OracleSample { value, timestamp });
    }

    pub fn clear(&mut self, market: MarketId) {
        self.candidates.remove(&market);
    }
}

impl Oracle for InMemoryOracle {
    fn latest_candidate(&self, market: MarketId) -> Option<OracleSample> {
        self.candidates.get(&market).copied()
    }
}

// ----------------------------------------------------------------------------
// Fee policy
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeKind {
    Buy,
    Sell,
}

/// Everything a pluggable fee strategy may price on.
#[derive(Debug, Clone, Copy)]
pub struct TradeContext {
    pub market: MarketId,
    pub kind: TradeKind,
    /// Trade cost (buys) or proceeds (sells), micro units.
    pub base_amount: u64,
    pub quantity: u64,
}

/// Pluggable fee strategy. The core enforces `fee <= base_amount` on every
/// call regardless of the implementation.
pub trait FeePolicy {
    fn quote_fee(&self, ctx: &TradeContext) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoFeePolicy;

impl FeePolicy for NoFeePolicy {
    fn quote_fee(&self, _ctx: &TradeContext) -> u64 {
        0
    }
}

/// Flat basis-point fee on the base amount, rounded up.
#[derive(Debug, Clone, Copy)]
pub struct ProportionalFeePolicy {
    pub fee_bps: u64,
}

impl FeePolicy for ProportionalFeePolicy {
    fn quote_fee(&self, ctx: &TradeContext) -> u64 {
        let raw = ctx.base_amount as u128 * self.fee_bps as u128;
        (raw / 10_000 + u128::from(raw % 10_000 != 0)) as u64
    }
}
