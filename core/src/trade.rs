//! Trade execution: quotes, position open/increase/decrease/close, and
//! post-settlement claims.
//!
//! Every mutating path is validate-then-commit: the price impact is computed
//! against cloned tree and ledger state, custody moves the funds, and only
//! then does the market take the new state. A failure at any step leaves the
//! market untouched.
//!
//! Quantities larger than one safe factor application split into chunks of
//! `max_safe_chunk_quantity(α)`; the chunk count is bounded.

use crate::error::CoreError;
use crate::interfaces::{AccountId, Custody, FeePolicy, Oracle, PositionRegistry, Position,
    TradeContext, TradeKind};
use crate::market::MarketId;
use crate::protocol::Protocol;
use crate::{CoreResult, PositionId};
use log::debug;
use market_model::{clmsr, RangeTree};

/// Upper bound on factor applications per trade.
pub const MAX_CHUNKS: u64 = 128;

/// Applies a chunked buy to `tree`, returning the total charged cost.
fn apply_buy(
    tree: &mut RangeTree,
    alpha: u128,
    lo: usize,
    hi: usize,
    qty: u64,
) -> CoreResult<u64> {
    let max_chunk = clmsr::max_safe_chunk_quantity(alpha)?;
    if max_chunk == 0 {
        return Err(CoreError::Clmsr(clmsr::ClmsrError::QuantityTooLarge));
    }
    let needed = qty.div_ceil(max_chunk);
    if needed > MAX_CHUNKS {
        return Err(CoreError::TooManyChunks {
            needed,
            limit: MAX_CHUNKS,
        });
    }
    let mut remaining = qty;
    let mut total = 0u64;
    while remaining > 0 {
        let q = remaining.min(max_chunk);
        let before = tree.total_sum();
        let factor = clmsr::buy_factor(alpha, q)?;
        tree.apply_range_factor(lo, hi, factor)?;
        let cost = clmsr::buy_cost(alpha, before, tree.total_sum())?;
        total = total
            .checked_add(cost)
            .ok_or(CoreError::Math(wad_math::MathError::Overflow))?;
        remaining -= q;
    }
    Ok(total)
}

/// Applies a chunked sell to `tree`, returning the total proceeds.
fn apply_sell(
    tree: &mut RangeTree,
    alpha: u128,
    lo: usize,
    hi: usize,
    qty: u64,
) -> CoreResult<u64> {
    let max_chunk = clmsr::max_safe_chunk_quantity(alpha)?;
    if max_chunk == 0 {
        return Err(CoreError::Clmsr(clmsr::ClmsrError::QuantityTooLarge));
    }
    let needed = qty.div_ceil(max_chunk);
    if needed > MAX_CHUNKS {
        return Err(CoreError::TooManyChunks {
            needed,
            limit: MAX_CHUNKS,
        });
    }
    let mut remaining = qty;
    let mut total = 0u64;
    while remaining > 0 {
        let q = remaining.min(max_chunk);
        let before = tree.total_sum();
        let factor = clmsr::sell_factor(alpha, q)?;
        tree.apply_range_factor(lo, hi, factor)?;
        let proceeds = clmsr::sell_proceeds(alpha, before, tree.total_sum())?;
        total = total
            .checked_add(proceeds)
            .ok_or(CoreError::Math(wad_math::MathError::Overflow))?;
        remaining -= q;
    }
    Ok(total)
}

impl<C, R, O, F> Protocol<C, R, O, F>
where
    C: Custody,
    R: PositionRegistry,
    O: Oracle,
    F: FeePolicy,
{
    // ------------------------------------------------------------------
    // Quotes (read-only)
    // ------------------------------------------------------------------

    /// Cost of buying `qty` over `[lower, upper)`, excluding fees.
    pub fn quote_buy(
        &self,
        market: MarketId,
        lower: i64,
        upper: i64,
        qty: u64,
    ) -> CoreResult<u64> {
        if qty == 0 {
            return Err(CoreError::ZeroAmount);
        }
        let m = self.market(market)?;
        let (lo, hi) = m.grid().range_to_bins(lower, upper)?;
        let mut tree = m.tree.clone();
        apply_buy(&mut tree, m.alpha(), lo, hi, qty)
    }

    /// Proceeds of selling `qty` over `[lower, upper)`, excluding fees.
    pub fn quote_sell(
        &self,
        market: MarketId,
        lower: i64,
        upper: i64,
        qty: u64,
    ) -> CoreResult<u64> {
        if qty == 0 {
            return Err(CoreError::ZeroAmount);
        }
        let m = self.market(market)?;
        let (lo, hi) = m.grid().range_to_bins(lower, upper)?;
        let mut tree = m.tree.clone();
        apply_sell(&mut tree, m.alpha(), lo, hi, qty)
    }

    /// Quantity a cost budget buys over `[lower, upper)`.
    pub fn quote_quantity_from_cost(
        &self,
        market: MarketId,
        lower: i64,
        upper: i64,
        cost: u64,
    ) -> CoreResult<u64> {
        let m = self.market(market)?;
        let (lo, hi) = m.grid().range_to_bins(lower, upper)?;
        let total = m.tree.total_sum();
        let range = m.tree.range_sum(lo, hi)?;
        Ok(clmsr::quantity_from_cost(m.alpha(), total, range, cost)?)
    }

    // ------------------------------------------------------------------
    // Position mutation
    // ------------------------------------------------------------------

    /// Buys `qty` over `[lower, upper)` and mints a position.
    pub fn open_position(
        &mut self,
        trader: AccountId,
        market: MarketId,
        lower: i64,
        upper: i64,
        qty: u64,
        now: u64,
    ) -> CoreResult<PositionId> {
        if qty == 0 {
            return Err(CoreError::ZeroAmount);
        }
        let timing = self.config.settlement;
        let m = self.markets.get_mut(&market).ok_or(CoreError::UnknownMarket(market))?;
        m.ensure_trading(now, &timing)?;
        let (lo, hi) = m.grid().range_to_bins(lower, upper)?;

        // price against clones; the market only takes the new state after
        // custody succeeds
        let mut tree = m.tree.clone();
        let cost = apply_buy(&mut tree, m.alpha(), lo, hi, qty)?;
        let mut exposure = m.exposure.clone();
        exposure.range_add(lo, hi, qty)?;

        let fee = self.fees.quote_fee(&TradeContext {
            market,
            kind: TradeKind::Buy,
            base_amount: cost,
            quantity: qty,
        });
        if fee > cost {
            return Err(CoreError::FeeExceedsBase { fee, base: cost });
        }
        let charge = cost
            .checked_add(fee)
            .ok_or(CoreError::Math(wad_math::MathError::Overflow))?;
        self.custody.pull(trader, charge)?;

        let m = self.markets.get_mut(&market).ok_or(CoreError::UnknownMarket(market))?;
        m.tree = tree;
        m.exposure = exposure;
        m.fees_accrued += fee;
        m.open_positions += 1;
        let id = self.registry.mint(Position {
            owner: trader,
            market,
            lower_tick: lower,
            upper_tick: upper,
            quantity: qty,
        });
        debug!("position {id} opened: market {market}, qty {qty}, cost {cost}, fee {fee}");
        Ok(id)
    }

    /// Buys `qty` more into an existing position.
    pub fn increase_position(
        &mut self,
        caller: AccountId,
        id: PositionId,
        qty: u64,
        now: u64,
    ) -> CoreResult<()> {
        if qty == 0 {
            return Err(CoreError::ZeroAmount);
        }
        let position = self.registry.get(id)?;
        if position.owner != caller {
            return Err(CoreError::NotPositionOwner(id));
        }
        let timing = self.config.settlement;
        let market = position.market;
        let m = self.markets.get_mut(&market).ok_or(CoreError::UnknownMarket(market))?;
        m.ensure_trading(now, &timing)?;
        let (lo, hi) = m.grid().range_to_bins(position.lower_tick, position.upper_tick)?;

        let mut tree = m.tree.clone();
        let cost = apply_buy(&mut tree, m.alpha(), lo, hi, qty)?;
        let mut exposure = m.exposure.clone();
        exposure.range_add(lo, hi, qty)?;

        let fee = self.fees.quote_fee(&TradeContext {
            market,
            kind: TradeKind::Buy,
            base_amount: cost,
            quantity: qty,
        });
        if fee > cost {
            return Err(CoreError::FeeExceedsBase { fee, base: cost });
        }
        let charge = cost
            .checked_add(fee)
            .ok_or(CoreError::Math(wad_math::MathError::Overflow))?;
        self.custody.pull(caller, charge)?;

        let m = self.markets.get_mut(&market).ok_or(CoreError::UnknownMarket(market))?;
        m.tree = tree;
        m.exposure = exposure;
        m.fees_accrued += fee;
        self.registry.update_quantity(id, position.quantity + qty)?;
        debug!("position {id} increased by {qty}, cost {cost}, fee {fee}");
        Ok(())
    }

    /// Sells `qty` out of a position; selling everything burns it.
    pub fn decrease_position(
        &mut self,
        caller: AccountId,
        id: PositionId,
        qty: u64,
        now: u64,
    ) -> CoreResult<u64> {
        if qty == 0 {
            return Err(CoreError::ZeroAmount);
        }
        let position = self.registry.get(id)?;
        if position.owner != caller {
            return Err(CoreError::NotPositionOwner(id));
        }
        if qty > position.quantity {
            return Err(CoreError::InsufficientShares {
                requested: qty as u128,
                available: position.quantity as u128,
            });
        }
        let timing = self.config.settlement;
        let market = position.market;
        let m = self.markets.get_mut(&market).ok_or(CoreError::UnknownMarket(market))?;
        m.ensure_trading(now, &timing)?;
        let (lo, hi) = m.grid().range_to_bins(position.lower_tick, position.upper_tick)?;

        let mut tree = m.tree.clone();
        let proceeds = apply_sell(&mut tree, m.alpha(), lo, hi, qty)?;
        let mut exposure = m.exposure.clone();
        exposure.range_sub(lo, hi, qty)?;

        let fee = self.fees.quote_fee(&TradeContext {
            market,
            kind: TradeKind::Sell,
            base_amount: proceeds,
            quantity: qty,
        });
        if fee > proceeds {
            return Err(CoreError::FeeExceedsBase {
                fee,
                base: proceeds,
            });
        }
        let payout = proceeds - fee;
        if payout > 0 {
            self.custody.push(caller, payout)?;
        }

        let m = self.markets.get_mut(&market).ok_or(CoreError::UnknownMarket(market))?;
        m.tree = tree;
        m.exposure = exposure;
        m.fees_accrued += fee;
        if qty == position.quantity {
            self.registry.burn(id)?;
            let m = self.markets.get_mut(&market).ok_or(CoreError::UnknownMarket(market))?;
            m.open_positions -= 1;
        } else {
            self.registry.update_quantity(id, position.quantity - qty)?;
        }
        debug!("position {id} decreased by {qty}, proceeds {proceeds}, fee {fee}");
        Ok(payout)
    }

    /// Sells the whole position.
    pub fn close_position(&mut self, caller: AccountId, id: PositionId, now: u64) -> CoreResult<u64> {
        let position = self.registry.get(id)?;
        self.decrease_position(caller, id, position.quantity, now)
    }

    // ------------------------------------------------------------------
    // Settlement claims
    // ------------------------------------------------------------------

    /// Claims a settled position: its quantity if the settlement bin lies in
    /// the position's range, zero otherwise. Burns the position and drains
    /// the escrow.
    pub fn claim_payout(&mut self, caller: AccountId, id: PositionId) -> CoreResult<u64> {
        let position = self.registry.get(id)?;
        if position.owner != caller {
            return Err(CoreError::NotPositionOwner(id));
        }
        let market = position.market;
        let m = self.markets.get_mut(&market).ok_or(CoreError::UnknownMarket(market))?;
        if !m.status().is_settled() {
            return Err(CoreError::NotSettled(market));
        }
        let tick = m.settlement_tick.ok_or(CoreError::NotSettled(market))?;
        let bin = m.grid().settlement_bin(tick);
        let (lo, hi) = m.grid().range_to_bins(position.lower_tick, position.upper_tick)?;
        let payout = if (lo..=hi).contains(&bin) {
            position.quantity
        } else {
            0
        };
        if payout > m.escrow {
            return Err(CoreError::InsufficientEscrow {
                requested: payout,
                available: m.escrow,
            });
        }
        if payout > 0 {
            self.custody.push(caller, payout)?;
        }
        let m = self.markets.get_mut(&market).ok_or(CoreError::UnknownMarket(market))?;
        m.escrow -= payout;
        m.open_positions -= 1;
        // even a zero payout burns the position, which pins the settlement
        m.claims += 1;
        self.registry.burn(id)?;
        debug!("position {id} claimed: payout {payout}");
        Ok(payout)
    }
}
