//! CLMSR cost, proceeds and inverse-cost formulas.
//!
//! A buy of quantity `q` over a bin range multiplies the range's weights by
//! `exp(q/α)` and costs `α·ln(sum_after/sum_before)`; a sell applies the
//! reciprocal factor and pays `α·ln(sum_before/sum_after)`. Both ratios are
//! >= 1 by construction, which is exactly the domain `ln_wad` supports.
//!
//! Rounding is protocol-biased throughout: buy factors and costs round up,
//! sell factors and proceeds round down.

use crate::{MAX_FACTOR, MIN_FACTOR};
use wad_math::{
    exp_wad, ln_wad, micro_to_wad, mul_div_ceil, mul_div_floor, wad_to_micro_ceil,
    wad_to_micro_floor, wdiv_ceil, wdiv_floor, wmul_ceil, wmul_floor, MathError, EXP_INPUT_MAX,
    WAD,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClmsrError {
    /// Quantity is zero.
    ZeroQuantity,
    /// Cost is zero.
    ZeroCost,
    /// Liquidity parameter is zero.
    ZeroLiquidity,
    /// Quantity exceeds the safe single-chunk bound; the caller must split.
    QuantityTooLarge,
    /// Cost-denominated order exceeds the safe single-chunk bound.
    CostTooLarge,
    /// Arithmetic failure.
    Math(MathError),
}

impl From<MathError> for ClmsrError {
    fn from(e: MathError) -> Self {
        ClmsrError::Math(e)
    }
}

/// Largest quantity (micro units) a single factor application can carry at
/// liquidity `alpha` while `exp(q/α)` stays inside the safe factor range.
/// One micro unit of slack absorbs the ceiling division in
/// `buy_factor`.
pub fn max_safe_chunk_quantity(alpha: u128) -> Result<u64, ClmsrError> {
    if alpha == 0 {
        return Err(ClmsrError::ZeroLiquidity);
    }
    let q_wad = wmul_floor(alpha, EXP_INPUT_MAX)?;
    Ok(wad_to_micro_floor(q_wad)?.saturating_sub(1))
}

/// Factor `exp(q/α)` for a buy chunk. Rounds the exponent up so the charged
/// cost never under-states the move.
pub fn buy_factor(alpha: u128, qty: u64) -> Result<u128, ClmsrError> {
    if qty == 0 {
        return Err(ClmsrError::ZeroQuantity);
    }
    if alpha == 0 {
        return Err(ClmsrError::ZeroLiquidity);
    }
    let x = wdiv_ceil(micro_to_wad(qty), alpha)?;
    if x > EXP_INPUT_MAX {
        return Err(ClmsrError::QuantityTooLarge);
    }
    // exp(ln 100) can land a hair past MAX_FACTOR; fold it back in.
    Ok(exp_wad(x)?.clamp(WAD, MAX_FACTOR))
}

/// Factor `1/exp(q/α)` for a sell chunk. The reciprocal rounds up (factor
/// closer to one), so the paid proceeds never over-state the move.
pub fn sell_factor(alpha: u128, qty: u64) -> Result<u128, ClmsrError> {
    if qty == 0 {
        return Err(ClmsrError::ZeroQuantity);
    }
    if alpha == 0 {
        return Err(ClmsrError::ZeroLiquidity);
    }
    let x = wdiv_floor(micro_to_wad(qty), alpha)?;
    if x > EXP_INPUT_MAX {
        return Err(ClmsrError::QuantityTooLarge);
    }
    let e = exp_wad(x)?;
    Ok(mul_div_ceil(WAD, WAD, e)?.clamp(MIN_FACTOR, WAD))
}

/// Cost in micro units of moving the total sum from `sum_before` to
/// `sum_after` at liquidity `alpha`. Rounded up: the protocol is owed.
pub fn buy_cost(alpha: u128, sum_before: u128, sum_after: u128) -> Result<u64, ClmsrError> {
    if sum_before == 0 {
        return Err(MathError::DivByZero.into());
    }
    if sum_after <= sum_before {
        // tiny quantities can floor the factor to exactly one
        return Ok(0);
    }
    let ratio = wdiv_ceil(sum_after, sum_before)?;
    let cost_wad = wmul_ceil(alpha, ln_wad(ratio)?)?;
    Ok(wad_to_micro_ceil(cost_wad)?)
}

/// Proceeds in micro units of moving the total sum from `sum_before` down
/// to `sum_after`. Rounded down: paying out.
pub fn sell_proceeds(alpha: u128, sum_before: u128, sum_after: u128) -> Result<u64, ClmsrError> {
    if sum_after == 0 {
        return Err(MathError::DivByZero.into());
    }
    if sum_before <= sum_after {
        return Ok(0);
    }
    let ratio = wdiv_floor(sum_before, sum_after)?;
    let proceeds_wad = wmul_floor(alpha, ln_wad(ratio)?)?;
    Ok(wad_to_micro_floor(proceeds_wad)?)
}

/// Inverts the cost function for cost-denominated buys:
/// `q = α·ln(1 + (e^{cost/α} − 1)·sum_total/sum_range)`.
/// Rounded down so the delivered quantity never exceeds what the cost pays.
pub fn quantity_from_cost(
    alpha: u128,
    sum_total: u128,
    sum_range: u128,
    cost: u64,
) -> Result<u64, ClmsrError> {
    if cost == 0 {
        return Err(ClmsrError::ZeroCost);
    }
    if alpha == 0 {
        return Err(ClmsrError::ZeroLiquidity);
    }
    if sum_range == 0 {
        return Err(MathError::DivByZero.into());
    }
    let x = wdiv_floor(micro_to_wad(cost), alpha)?;
    if x > EXP_INPUT_MAX {
        return Err(ClmsrError::CostTooLarge);
    }
    let growth = exp_wad(x)? - WAD;
    let scaled = mul_div_floor(growth, sum_total, sum_range)?;
    let q_wad = wmul_floor(alpha, ln_wad(WAD + scaled)?)?;
    Ok(wad_to_micro_floor(q_wad)?)
}
