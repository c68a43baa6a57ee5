//! Liquidity bounds and prior admissibility for market creation.
//!
//! The gate keeps a new market from promising more downside than the vault
//! and backstop can absorb:
//! - `alpha_base = λ·NAV / ln_ceil(num_bins)` — the ceiling-rounded log
//!   keeps the bound conservative (a uniform-prior market's worst loss is
//!   `α·ln n`)
//! - `alpha_limit = max(0, alpha_base·(1 − k·drawdown))`
//! - tail budget `ΔE = α·max(0, ln(z_seed / (n·WAD)))` — the log-ratio of
//!   the opening prior's sum to the uniform baseline; it must fit inside
//!   the current backstop NAV

use wad_math::{ln_wad, ln_wad_ceil, micro_to_wad, mul_div_floor, wad_to_micro_ceil, wmul_ceil,
    wmul_floor, MathError, WAD};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskError {
    /// Liquidity parameter above the current limit.
    AlphaAboveLimit,
    /// Opening prior's tail budget exceeds backstop capacity.
    TailBudgetExceedsBackstop,
    /// Bin count of zero or one carries no log bound.
    InvalidBinCount,
    /// Arithmetic failure.
    Math(MathError),
}

impl From<MathError> for RiskError {
    fn from(e: MathError) -> Self {
        RiskError::Math(e)
    }
}

/// Gate parameters. `lambda` scales NAV into the base liquidity bound; `k`
/// scales drawdown into a haircut on it; `enforce` disables rejection (the
/// bound is still computed and reported).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskParams {
    pub lambda_wad: u128,
    pub k_wad: u128,
    pub enforce: bool,
}

/// Result of an admissibility check, kept for reporting even when
/// enforcement is off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskCheck {
    pub alpha_limit: u128,
    pub tail_budget: u64,
}

/// `alpha_base`, WAD: `λ·NAV / ln_ceil(n)`.
pub fn alpha_base(params: &RiskParams, nav: u64, num_bins: usize) -> Result<u128, RiskError> {
    if num_bins < 2 {
        return Err(RiskError::InvalidBinCount);
    }
    let scaled_nav = wmul_floor(params.lambda_wad, micro_to_wad(nav))?;
    let ln_bins = ln_wad_ceil(num_bins as u128 * WAD)?;
    Ok(mul_div_floor(scaled_nav, WAD, ln_bins)?)
}

/// `alpha_limit = max(0, alpha_base·(1 − k·drawdown))`, WAD.
pub fn alpha_limit(
    params: &RiskParams,
    nav: u64,
    num_bins: usize,
    drawdown_wad: u128,
) -> Result<u128, RiskError> {
    let base = alpha_base(params, nav, num_bins)?;
    let haircut = wmul_floor(params.k_wad, drawdown_wad)?;
    if haircut >= WAD {
        return Ok(0);
    }
    Ok(wmul_floor(base, WAD - haircut)?)
}

/// Tail budget of an opening prior, micro units, ceiling-rounded: the
/// backstop must be able to cover at least this much.
pub fn tail_budget(alpha_wad: u128, seed_sum: u128, num_bins: usize) -> Result<u64, RiskError> {
    let baseline = num_bins as u128 * WAD;
    if seed_sum <= baseline {
        // at-or-below-uniform priors draw nothing from the backstop
        return Ok(0);
    }
    // ratio >= 1 by the branch above; ceiling keeps the demand conservative
    let ratio = wad_math::wdiv_ceil(seed_sum, baseline)?;
    let budget_wad = wmul_ceil(alpha_wad, ln_wad(ratio)?)?;
    Ok(wad_to_micro_ceil(budget_wad)?)
}

/// Full admissibility check for a market creation request.
pub fn check_admission(
    params: &RiskParams,
    nav: u64,
    backstop_nav: u64,
    drawdown_wad: u128,
    alpha_wad: u128,
    num_bins: usize,
    seed_sum: u128,
) -> Result<RiskCheck, RiskError> {
    let limit = alpha_limit(params, nav, num_bins, drawdown_wad)?;
    let budget = tail_budget(alpha_wad, seed_sum, num_bins)?;
    if params.enforce {
        if alpha_wad > limit {
            return Err(RiskError::AlphaAboveLimit);
        }
        if budget > backstop_nav {
            return Err(RiskError::TailBudgetExceedsBackstop);
        }
    }
    Ok(RiskCheck {
        alpha_limit: limit,
        tail_budget: budget,
    })
}
