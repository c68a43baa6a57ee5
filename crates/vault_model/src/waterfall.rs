//! Fee waterfall: distributes one batch's P&L and fees across the vault,
//! the backstop pool and the treasury, subject to a drawdown floor.
//!
//! Conservation identities, exact over the integers (no tolerance):
//! - `f_loss + f_pool == ftot`
//! - `n_pre - n_prev == lt + f_vault + grant`
//!
//! Failure is always total: a grant that cannot be fully funded fails the
//! batch instead of being silently capped, because a capped grant would
//! silently break the floor guarantee.

use wad_math::{mul_div_ceil, mul_div_floor, MathError, WAD};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaterfallError {
    /// `n_prev + lt + f_loss` went below zero: losses exceed the vault even
    /// after fees absorb what they can.
    CatastrophicLoss,
    /// Needed grant exceeds the market-committed tail budget.
    GrantExceedsTailBudget,
    /// Needed grant exceeds the backstop pool.
    GrantExceedsBackstop,
    /// `phi` split weights do not sum to exactly 1.0.
    BadWeights,
    /// `pdd` outside `[-1, 0]` or `rho` above 1.0.
    BadConfig,
    /// Arithmetic failure.
    Math(MathError),
}

impl From<MathError> for WaterfallError {
    fn from(e: MathError) -> Self {
        WaterfallError::Math(e)
    }
}

/// Waterfall parameters. `pdd` is the per-batch drawdown floor as a signed
/// WAD in `[-1, 0]` (e.g. -0.3 keeps NAV at >= 70% of the pre-batch value);
/// `rho` bounds the backstop top-up share of the fee pool; the `phi` weights
/// split the remaining pool and must sum to exactly one WAD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaterfallConfig {
    pub pdd_wad: i128,
    pub rho_wad: u128,
    pub phi_lp_wad: u128,
    pub phi_backstop_wad: u128,
    pub phi_treasury_wad: u128,
}

impl WaterfallConfig {
    pub fn validate(&self) -> Result<(), WaterfallError> {
        if self.pdd_wad > 0 || self.pdd_wad < -(WAD as i128) {
            return Err(WaterfallError::BadConfig);
        }
        if self.rho_wad > WAD {
            return Err(WaterfallError::BadConfig);
        }
        let phi_sum = self
            .phi_lp_wad
            .checked_add(self.phi_backstop_wad)
            .and_then(|s| s.checked_add(self.phi_treasury_wad))
            .ok_or(WaterfallError::BadWeights)?;
        if phi_sum != WAD {
            return Err(WaterfallError::BadWeights);
        }
        Ok(())
    }
}

/// One batch's inputs, micro units. `lt` is the accumulated signed P&L;
/// `tail_budget` is the sum of settled markets' stored tail budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaterfallInput {
    pub lt: i128,
    pub ftot: u128,
    pub n_prev: u128,
    pub b_prev: u128,
    pub t_prev: u128,
    pub tail_budget: u128,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaterfallOutput {
    /// Fees consumed absorbing losses.
    pub f_loss: u128,
    /// Fees left after loss absorption.
    pub f_pool: u128,
    /// Backstop grant funding the floor.
    pub grant: u128,
    /// Pre-batch NAV handed to deposit/withdraw processing.
    pub n_pre: u128,
    /// Total flowing to the vault: `f_loss` + LP share + split dust.
    pub f_vault: u128,
    /// Backstop pool after grant, top-up and split share.
    pub b_next: u128,
    /// Treasury after its split share.
    pub t_next: u128,
    /// Backstop top-up taken from the pool before the split.
    pub f_fill: u128,
}

/// Runs the waterfall. Pure; all-or-nothing.
pub fn run(input: &WaterfallInput, cfg: &WaterfallConfig) -> Result<WaterfallOutput, WaterfallError> {
    cfg.validate()?;

    // 1. Fees absorb losses first.
    let loss = u128::try_from(-input.lt.min(0)).map_err(|_| WaterfallError::CatastrophicLoss)?;
    let f_loss = input.ftot.min(loss);
    let f_pool = input.ftot - f_loss;

    // 2. Raw NAV after P&L and loss absorption.
    let n_raw_signed = i128::try_from(input.n_prev)
        .map_err(|_| WaterfallError::Math(MathError::Overflow))?
        .checked_add(input.lt)
        .and_then(|v| v.checked_add(f_loss as i128))
        .ok_or(WaterfallError::Math(MathError::Overflow))?;
    if n_raw_signed < 0 {
        return Err(WaterfallError::CatastrophicLoss);
    }
    let n_raw = n_raw_signed as u128;

    // 3. Protective floor, ceiling-rounded so it is never under-estimated.
    let floor_factor = (WAD as i128 + cfg.pdd_wad) as u128;
    let n_floor = mul_div_ceil(input.n_prev, floor_factor, WAD)?;

    // 4. Grant sized to the floor gap, fully funded or the batch fails.
    let grant = n_floor.saturating_sub(n_raw);
    if grant > input.tail_budget {
        return Err(WaterfallError::GrantExceedsTailBudget);
    }
    if grant > input.b_prev {
        return Err(WaterfallError::GrantExceedsBackstop);
    }

    // 5. Backstop top-up, then the phi split of the remaining pool. Floor
    //    division everywhere; dust lands in the LP bucket.
    let f_fill = mul_div_floor(f_pool, cfg.rho_wad, WAD)?;
    let remaining = f_pool - f_fill;
    let f_core_lp = mul_div_floor(remaining, cfg.phi_lp_wad, WAD)?;
    let f_core_bs = mul_div_floor(remaining, cfg.phi_backstop_wad, WAD)?;
    let f_core_tr = mul_div_floor(remaining, cfg.phi_treasury_wad, WAD)?;
    let dust = remaining - f_core_lp - f_core_bs - f_core_tr;
    let lp_total = f_core_lp + dust;

    // 6. Outputs.
    let f_vault = f_loss + lp_total;
    let n_pre = n_raw + grant + lp_total;
    let b_next = input.b_prev - grant + f_fill + f_core_bs;
    let t_next = input
        .t_prev
        .checked_add(f_core_tr)
        .ok_or(WaterfallError::Math(MathError::Overflow))?;

    Ok(WaterfallOutput {
        f_loss,
        f_pool,
        grant,
        n_pre,
        f_vault,
        b_next,
        t_next,
        f_fill,
    })
}
