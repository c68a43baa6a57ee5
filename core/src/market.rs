//! Market state and the settlement state machine.
//!
//! A market is a seeded range tree plus an exposure ledger plus lifecycle
//! flags. Phases derive from wall-clock gates against `settlement_time`:
//!
//! `Trading` -> `SettlementOpen` (candidate submission) -> `PendingOps`
//! (finalize or mark failed) -> terminal `Settled` / `Failed` ->
//! `SettledSecondary`.
//!
//! Settlement computes the trading P&L `lt = α·(ln Z_end − ln Z_start)`
//! minus the payout reserve, moves the reserve into an escrow drained only
//! by claims, and hands `(lt, fees)` to the caller for batch recording.

use crate::config::SettlementTiming;
use crate::error::CoreError;
use crate::interfaces::OracleSample;
use crate::vault::BatchId;
use crate::CoreResult;
use market_model::{ExposureLedger, RangeTree, TickGrid, MAX_ALPHA, MIN_ALPHA};
use wad_math::{ln_wad, wad_to_micro_ceil, wad_to_micro_floor, wdiv_ceil, wdiv_floor, wmul_ceil,
    wmul_floor};

pub type MarketId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketStatus {
    Trading,
    Settled,
    Failed,
    SettledSecondary,
}

impl MarketStatus {
    pub fn is_settled(&self) -> bool {
        matches!(self, MarketStatus::Settled | MarketStatus::SettledSecondary)
    }
}

/// Wall-clock phase, independent of the stored status flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketPhase {
    Trading,
    SettlementOpen,
    PendingOps,
    Closed,
}

/// Creation parameters. `seed_factors`, when present, applies the opening
/// prior (one factor per bin) before any trade.
#[derive(Debug, Clone)]
pub struct MarketParams {
    pub min_tick: i64,
    pub max_tick: i64,
    pub tick_spacing: i64,
    pub alpha_wad: u128,
    pub settlement_time: u64,
    pub seed_factors: Option<Vec<u128>>,
}

/// What one settlement produced; the caller records `lt` and `fees` into
/// the current batch snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementOutcome {
    pub tick: i64,
    pub bin: usize,
    pub reserve: u64,
    pub lt: i128,
    pub fees: u64,
}

#[derive(Debug, Clone)]
pub struct Market {
    pub id: MarketId,
    pub(crate) grid: TickGrid,
    pub(crate) alpha: u128,
    pub(crate) status: MarketStatus,
    pub(crate) tree: RangeTree,
    pub(crate) exposure: ExposureLedger,
    pub(crate) settlement_time: u64,
    pub(crate) candidate: Option<OracleSample>,
    pub(crate) settlement_tick: Option<i64>,
    pub(crate) settlement_value: Option<i64>,
    /// Tree total right after seeding; the P&L baseline.
    pub(crate) z_start: u128,
    pub(crate) fees_accrued: u64,
    pub(crate) open_positions: u32,
    /// Committed at creation by the risk gate, consumed by the waterfall.
    pub(crate) tail_budget: u64,
    /// Payout reserve awaiting claims.
    pub(crate) escrow: u64,
    /// Claims executed since settlement; a claimed market cannot reopen.
    pub(crate) claims: u32,
    /// Batch the settlement P&L was recorded into.
    pub(crate) settled_batch: Option<BatchId>,
    pub(crate) recorded_lt: i128,
    pub(crate) recorded_fees: u64,
}

impl Market {
    pub fn new(id: MarketId, params: &MarketParams, tail_budget: u64) -> CoreResult<Self> {
        if params.alpha_wad < MIN_ALPHA || params.alpha_wad > MAX_ALPHA {
            return Err(CoreError::InvalidConfig("alpha outside liquidity bounds"));
        }
        let grid = TickGrid::new(params.min_tick, params.max_tick, params.tick_spacing)?;
        let mut tree = RangeTree::new(grid.bin_count())?;
        if let Some(factors) = &params.seed_factors {
            tree.seed(factors)?;
        }
        let z_start = tree.total_sum();
        let exposure = ExposureLedger::new(grid.bin_count());
        Ok(Market {
            id,
            grid,
            alpha: params.alpha_wad,
            status: MarketStatus::Trading,
            tree,
            exposure,
            settlement_time: params.settlement_time,
            candidate: None,
            settlement_tick: None,
            settlement_value: None,
            z_start,
            fees_accrued: 0,
            open_positions: 0,
            tail_budget,
            escrow: 0,
            claims: 0,
            settled_batch: None,
            recorded_lt: 0,
            recorded_fees: 0,
        })
    }

    pub fn phase(&self, now: u64, timing: &SettlementTiming) -> MarketPhase {
        if now < self.settlement_time {
            return MarketPhase::Trading;
        }
        let submit_end = self.settlement_time + timing.submit_window_secs;
        if now < submit_end {
            return MarketPhase::SettlementOpen;
        }
        if now < submit_end + timing.ops_window_secs {
            return MarketPhase::PendingOps;
        }
        MarketPhase::Closed
    }

    pub fn status(&self) -> MarketStatus {
        self.status
    }

    pub fn alpha(&self) -> u128 {
        self.alpha
    }

    pub fn grid(&self) -> &TickGrid {
        &self.grid
    }

    /// Trading requires both the Trading phase and an unsettled status.
    pub(crate) fn ensure_trading(&self, now: u64, timing: &SettlementTiming) -> CoreResult<()> {
        if self.status != MarketStatus::Trading
            || self.phase(now, timing) != MarketPhase::Trading
        {
            return Err(CoreError::MarketNotTrading(self.id));
        }
        Ok(())
    }

    /// Stores a settlement candidate; the latest submission wins.
    pub(crate) fn submit_candidate(
        &mut self,
        sample: OracleSample,
        now: u64,
        timing: &SettlementTiming,
    ) -> CoreResult<()> {
        if self.status != MarketStatus::Trading {
            return Err(CoreError::AlreadySettled(self.id));
        }
        match self.phase(now, timing) {
            MarketPhase::SettlementOpen => {}
            MarketPhase::Trading => return Err(CoreError::SettlementWindowNotOpen(self.id)),
            _ => return Err(CoreError::SettlementWindowClosed(self.id)),
        }
        self.candidate = Some(sample);
        Ok(())
    }

    /// Finalizes from the stored candidate; Trading -> Settled.
    pub(crate) fn finalize_primary(
        &mut self,
        now: u64,
        timing: &SettlementTiming,
    ) -> CoreResult<SettlementOutcome> {
        if self.status != MarketStatus::Trading {
            return Err(CoreError::AlreadySettled(self.id));
        }
        self.ensure_ops_window(now, timing)?;
        let sample = self.candidate.ok_or(CoreError::NoCandidate)?;
        let submit_end = self.settlement_time + timing.submit_window_secs;
        if sample.timestamp < self.settlement_time || sample.timestamp >= submit_end {
            return Err(CoreError::NoCandidate);
        }
        let outcome = self.settle_at(sample.value)?;
        self.status = MarketStatus::Settled;
        Ok(outcome)
    }

    /// Marks the primary settlement failed, discarding any candidate.
    pub(crate) fn mark_failed(&mut self, now: u64, timing: &SettlementTiming) -> CoreResult<()> {
        if self.status != MarketStatus::Trading {
            return Err(CoreError::AlreadySettled(self.id));
        }
        self.ensure_ops_window(now, timing)?;
        self.candidate = None;
        self.status = MarketStatus::Failed;
        Ok(())
    }

    /// Settles a Failed market from an operator-supplied value.
    pub(crate) fn finalize_secondary(&mut self, value: i64) -> CoreResult<SettlementOutcome> {
        if self.status != MarketStatus::Failed {
            return Err(CoreError::NotFailed(self.id));
        }
        let outcome = self.settle_at(value)?;
        self.status = MarketStatus::SettledSecondary;
        Ok(outcome)
    }

    /// Preconditions for an administrative reset: the market is past
    /// Trading, nothing has been claimed, and the replacement settlement
    /// time lies in the future so the market actually re-enters Trading.
    pub(crate) fn ensure_reopenable(&self, new_settlement_time: u64, now: u64) -> CoreResult<()> {
        if self.status == MarketStatus::Trading {
            return Err(CoreError::NotSettled(self.id));
        }
        if self.claims > 0 {
            return Err(CoreError::MarketHasClaims(self.id));
        }
        if new_settlement_time <= now {
            return Err(CoreError::InvalidConfig(
                "reopen settlement time must be in the future",
            ));
        }
        Ok(())
    }

    /// Administrative reset back to Trading with a fresh settlement time.
    /// Clears settlement fields and releases the escrowed reserve; the
    /// caller unwinds the batch record. Rejected once any claim has run:
    /// claimed positions are burned and their escrow is gone, so the
    /// settlement can no longer be undone without double counting.
    pub(crate) fn reopen(&mut self, new_settlement_time: u64, now: u64) -> CoreResult<()> {
        self.ensure_reopenable(new_settlement_time, now)?;
        self.status = MarketStatus::Trading;
        self.candidate = None;
        self.settlement_tick = None;
        self.settlement_value = None;
        self.settlement_time = new_settlement_time;
        self.escrow = 0;
        self.settled_batch = None;
        self.recorded_lt = 0;
        self.recorded_fees = 0;
        Ok(())
    }

    fn ensure_ops_window(&self, now: u64, timing: &SettlementTiming) -> CoreResult<()> {
        match self.phase(now, timing) {
            MarketPhase::PendingOps => Ok(()),
            MarketPhase::Closed => Err(CoreError::OpsWindowClosed(self.id)),
            _ => Err(CoreError::OpsWindowNotReached(self.id)),
        }
    }

    fn settle_at(&mut self, value: i64) -> CoreResult<SettlementOutcome> {
        let tick = self.grid.settlement_tick(value);
        let bin = self.grid.settlement_bin(value);
        let reserve = self.exposure.payout_at(bin)?;
        let gross = trading_pnl(self.alpha, self.z_start, self.tree.total_sum())?;
        let lt = gross
            .checked_sub(reserve as i128)
            .ok_or(CoreError::Math(wad_math::MathError::Overflow))?;
        self.settlement_tick = Some(tick);
        self.settlement_value = Some(value);
        self.escrow = reserve;
        self.recorded_lt = lt;
        self.recorded_fees = self.fees_accrued;
        Ok(SettlementOutcome {
            tick,
            bin,
            reserve,
            lt,
            fees: self.fees_accrued,
        })
    }
}

/// Signed trading P&L in micro units: `α·ln(z_end/z_start)`. Gains floor,
/// loss magnitudes ceil, so the vault never over-states its take.
fn trading_pnl(alpha: u128, z_start: u128, z_end: u128) -> CoreResult<i128> {
    if z_start == 0 {
        return Err(CoreError::Math(wad_math::MathError::DivByZero));
    }
    if z_end >= z_start {
        let ratio = wdiv_floor(z_end, z_start)?;
        let gain = wmul_floor(alpha, ln_wad(ratio)?)?;
        Ok(wad_to_micro_floor(gain)? as i128)
    } else {
        let ratio = wdiv_ceil(z_start, z_end)?;
        let loss = wmul_ceil(alpha, ln_wad(ratio)?)?;
        Ok(-(wad_to_micro_ceil(loss)? as i128))
    }
}
