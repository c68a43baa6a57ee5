//! The orchestrator: owns every market, the vault and the collaborators,
//! and sequences all mutating operations behind `&mut self`.
//!
//! Market creation runs through the risk gate against the vault's live NAV
//! and drawdown; settlement outcomes are recorded into the current batch
//! snapshot; batch processing delegates to the vault. `SharedProtocol`
//! provides the single-writer lock for multi-threaded embedders.

use crate::config::ProtocolConfig;
use crate::error::CoreError;
use crate::interfaces::{AccountId, Custody, FeePolicy, Oracle, PositionRegistry};
use crate::market::{Market, MarketId, MarketParams, MarketPhase, MarketStatus};
use crate::vault::{BatchId, BatchSummary, Vault, VaultSummary};
use crate::CoreResult;
use log::{info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use vault_model::risk;
use wad_math::MathError;

/// Read-only market snapshot for the query surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MarketSummary {
    pub id: MarketId,
    pub trading: bool,
    pub settled: bool,
    pub bin_count: usize,
    pub alpha_wad: u128,
    pub total_sum: u128,
    pub fees_accrued: u64,
    pub open_positions: u32,
    pub escrow: u64,
    pub tail_budget: u64,
    pub settlement_tick: Option<i64>,
}

pub struct Protocol<C, R, O, F> {
    pub(crate) config: ProtocolConfig,
    pub(crate) custody: C,
    pub(crate) registry: R,
    pub(crate) oracle: O,
    pub(crate) fees: F,
    pub(crate) vault: Vault,
    pub(crate) markets: HashMap<MarketId, Market>,
    next_market_id: MarketId,
}

impl<C, R, O, F> Protocol<C, R, O, F>
where
    C: Custody,
    R: PositionRegistry,
    O: Oracle,
    F: FeePolicy,
{
    pub fn new(config: ProtocolConfig, custody: C, registry: R, oracle: O, fees: F) -> CoreResult<Self> {
        config.validate()?;
        let vault = Vault::new(config.vault, config.waterfall);
        Ok(Protocol {
            config,
            custody,
            registry,
            oracle,
            fees,
            vault,
            markets: HashMap::new(),
            next_market_id: 0,
        })
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn custody(&self) -> &C {
        &self.custody
    }

    pub fn custody_mut(&mut self) -> &mut C {
        &mut self.custody
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn oracle_mut(&mut self) -> &mut O {
        &mut self.oracle
    }

    pub fn market(&self, id: MarketId) -> CoreResult<&Market> {
        self.markets.get(&id).ok_or(CoreError::UnknownMarket(id))
    }

    pub(crate) fn market_mut(&mut self, id: MarketId) -> CoreResult<&mut Market> {
        self.markets.get_mut(&id).ok_or(CoreError::UnknownMarket(id))
    }

    // ------------------------------------------------------------------
    // Market lifecycle
    // ------------------------------------------------------------------

    /// Creates a market, admission-checked against the vault's current NAV,
    /// drawdown and backstop. The prior's tail budget is committed on the
    /// market for the waterfall to consume at settlement.
    pub fn create_market(&mut self, params: &MarketParams) -> CoreResult<MarketId> {
        let id = self.next_market_id;
        let market = Market::new(id, params, 0)?;

        let nav = u64::try_from(self.vault.nav()).map_err(|_| CoreError::Math(MathError::Overflow))?;
        let backstop =
            u64::try_from(self.vault.backstop()).map_err(|_| CoreError::Math(MathError::Overflow))?;
        let check = risk::check_admission(
            &self.config.risk.params(),
            nav,
            backstop,
            self.vault.drawdown()?,
            params.alpha_wad,
            market.grid().bin_count(),
            market.tree.total_sum(),
        )?;

        let mut market = market;
        market.tail_budget = check.tail_budget;
        self.markets.insert(id, market);
        self.next_market_id += 1;
        info!(
            "market {id} created: alpha {}, tail budget {}, limit {}",
            params.alpha_wad, check.tail_budget, check.alpha_limit
        );
        Ok(id)
    }

    pub fn market_phase(&self, id: MarketId, now: u64) -> CoreResult<MarketPhase> {
        Ok(self.market(id)?.phase(now, &self.config.settlement))
    }

    /// Pulls the oracle's latest candidate into the market's settlement slot.
    pub fn submit_settlement(&mut self, id: MarketId, now: u64) -> CoreResult<()> {
        let sample = self.oracle.latest_candidate(id).ok_or(CoreError::NoCandidate)?;
        let timing = self.config.settlement;
        self.market_mut(id)?.submit_candidate(sample, now, &timing)
    }

    /// Finalizes from the stored candidate and records the P&L into the
    /// current batch.
    pub fn finalize_settlement(&mut self, id: MarketId, now: u64) -> CoreResult<()> {
        let timing = self.config.settlement;
        let market = self.markets.get_mut(&id).ok_or(CoreError::UnknownMarket(id))?;
        let outcome = market.finalize_primary(now, &timing)?;
        let tail = market.tail_budget;
        let batch = self.vault.record_pnl(outcome.lt, outcome.fees, tail);
        self.market_mut(id)?.settled_batch = Some(batch);
        info!(
            "market {id} settled at tick {}: lt {}, fees {}, batch {batch}",
            outcome.tick, outcome.lt, outcome.fees
        );
        Ok(())
    }

    pub fn mark_settlement_failed(&mut self, id: MarketId, now: u64) -> CoreResult<()> {
        let timing = self.config.settlement;
        self.market_mut(id)?.mark_failed(now, &timing)?;
        warn!("market {id}: primary settlement marked failed");
        Ok(())
    }

    /// Settles a failed market from an operator-supplied value.
    pub fn finalize_secondary(&mut self, id: MarketId, value: i64) -> CoreResult<()> {
        let market = self.markets.get_mut(&id).ok_or(CoreError::UnknownMarket(id))?;
        let outcome = market.finalize_secondary(value)?;
        let tail = market.tail_budget;
        let batch = self.vault.record_pnl(outcome.lt, outcome.fees, tail);
        self.market_mut(id)?.settled_batch = Some(batch);
        info!(
            "market {id} settled (secondary) at tick {}: lt {}, batch {batch}",
            outcome.tick, outcome.lt
        );
        Ok(())
    }

    /// Administrative reset of a settled or failed market back to Trading
    /// under a fresh settlement time. The P&L record is unwound from its
    /// still-unprocessed batch. Rejected once any payout claim has run:
    /// claimed escrow has left custody and cannot be re-reserved.
    pub fn reopen_market(
        &mut self,
        id: MarketId,
        new_settlement_time: u64,
        now: u64,
    ) -> CoreResult<()> {
        let market = self.markets.get_mut(&id).ok_or(CoreError::UnknownMarket(id))?;
        market.ensure_reopenable(new_settlement_time, now)?;
        if let Some(batch) = market.settled_batch {
            let (lt, fees, tail) = (market.recorded_lt, market.recorded_fees, market.tail_budget);
            self.vault.unrecord_pnl(batch, lt, fees, tail)?;
        }
        self.market_mut(id)?.reopen(new_settlement_time, now)?;
        warn!("market {id} reopened, next settlement at {new_settlement_time}");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Vault pass-throughs
    // ------------------------------------------------------------------

    pub fn seed_vault(&mut self, account: AccountId, amount: u64) -> CoreResult<u128> {
        self.vault.seed(&mut self.custody, account, amount)
    }

    pub fn request_deposit(&mut self, account: AccountId, amount: u64) -> CoreResult<BatchId> {
        self.vault.request_deposit(&mut self.custody, account, amount)
    }

    pub fn request_withdraw(&mut self, account: AccountId, shares: u128) -> CoreResult<BatchId> {
        self.vault.request_withdraw(account, shares)
    }

    pub fn cancel_request(&mut self, account: AccountId) -> CoreResult<()> {
        self.vault.cancel_request(&mut self.custody, account)
    }

    pub fn claim_deposit(&mut self, account: AccountId) -> CoreResult<u128> {
        self.vault.claim_deposit(&mut self.custody, account)
    }

    pub fn claim_withdraw(&mut self, account: AccountId) -> CoreResult<u64> {
        self.vault.claim_withdraw(&mut self.custody, account)
    }

    pub fn fund_backstop(&mut self, from: AccountId, amount: u64) -> CoreResult<()> {
        self.vault.fund_backstop(&mut self.custody, from, amount)
    }

    pub fn process_batch(&mut self, id: BatchId, now: u64) -> CoreResult<BatchSummary> {
        self.vault.process_batch(id, now)
    }

    // ------------------------------------------------------------------
    // Query surface
    // ------------------------------------------------------------------

    pub fn vault_summary(&self) -> CoreResult<VaultSummary> {
        self.vault.summary()
    }

    pub fn batch_summary(&self, id: BatchId) -> Option<BatchSummary> {
        self.vault.batch_summary(id)
    }

    pub fn share_balance_of(&self, account: AccountId) -> u128 {
        self.vault.share_balance_of(account)
    }

    pub fn current_batch(&self) -> BatchId {
        self.vault.current_batch()
    }

    pub fn market_summary(&self, id: MarketId) -> CoreResult<MarketSummary> {
        let m = self.market(id)?;
        Ok(MarketSummary {
            id: m.id,
            trading: m.status() == MarketStatus::Trading,
            settled: m.status().is_settled(),
            bin_count: m.grid().bin_count(),
            alpha_wad: m.alpha(),
            total_sum: m.tree.total_sum(),
            fees_accrued: m.fees_accrued,
            open_positions: m.open_positions,
            escrow: m.escrow,
            tail_budget: m.tail_budget,
            settlement_tick: m.settlement_tick,
        })
    }
}

/// Single-writer handle: one mutex around the whole protocol, cheap clones
/// for handing to worker threads.
pub struct SharedProtocol<C, R, O, F> {
    inner: Arc<Mutex<Protocol<C, R, O, F>>>,
}

impl<C, R, O, F> Clone for SharedProtocol<C, R, O, F> {
    fn clone(&self) -> Self {
        SharedProtocol {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C, R, O, F> SharedProtocol<C, R, O, F>
where
    C: Custody,
    R: PositionRegistry,
    O: Oracle,
    F: FeePolicy,
{
    pub fn new(protocol: Protocol<C, R, O, F>) -> Self {
        SharedProtocol {
            inner: Arc::new(Mutex::new(protocol)),
        }
    }

    /// Runs `f` under the write lock.
    pub fn with<T>(&self, f: impl FnOnce(&mut Protocol<C, R, O, F>) -> T) -> T {
        f(&mut self.inner.lock())
    }
}
