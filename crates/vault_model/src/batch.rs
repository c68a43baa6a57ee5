//! Share pricing and mint/burn arithmetic at a fixed batch price.
//!
//! Every batch fixes one price `pe = n_pre / shares_prev` (WAD) and applies
//! all pending withdrawals and deposits at it. Rounding policy:
//! - deposit: mint `floor(amount / pe)` shares, credit the vault
//!   `ceil(minted * pe)`, refund the residual to the depositor — the vault
//!   never retains undeposited residual
//! - withdraw: pay `floor(shares * pe)` — rounding dust stays in the vault

use wad_math::{mul_div_ceil, mul_div_floor, wdiv_floor, MathError, WAD};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMathError {
    /// Price of zero cannot price a deposit or withdrawal.
    ZeroPrice,
    /// Arithmetic failure.
    Math(MathError),
}

impl From<MathError> for BatchMathError {
    fn from(e: MathError) -> Self {
        BatchMathError::Math(e)
    }
}

/// Share price in WAD: `nav / shares`, floor; 1.0 when no shares exist.
pub fn share_price(nav: u128, shares: u128) -> Result<u128, BatchMathError> {
    if shares == 0 {
        return Ok(WAD);
    }
    Ok(wdiv_floor(nav, shares)?)
}

/// Deposit of `amount` at price `pe`: returns `(minted, credit, refund)`
/// with `credit + refund == amount` exactly.
pub fn shares_for_deposit(amount: u128, pe: u128) -> Result<(u128, u128, u128), BatchMathError> {
    if pe == 0 {
        return Err(BatchMathError::ZeroPrice);
    }
    let minted = mul_div_floor(amount, WAD, pe)?;
    // minted*pe <= amount*WAD by construction, so the ceiling stays <= amount
    let credit = mul_div_ceil(minted, pe, WAD)?;
    Ok((minted, credit, amount - credit))
}

/// Withdrawal of `shares` at price `pe`: the paid amount, floor-rounded.
pub fn withdraw_payout(shares: u128, pe: u128) -> Result<u128, BatchMathError> {
    if pe == 0 {
        return Err(BatchMathError::ZeroPrice);
    }
    Ok(mul_div_floor(shares, pe, WAD)?)
}

/// Drawdown `max(0, 1 - price/peak)` in WAD, clamped to `[0, 1]`.
pub fn drawdown(price: u128, peak: u128) -> Result<u128, BatchMathError> {
    if peak == 0 || price >= peak {
        return Ok(0);
    }
    let ratio = wdiv_floor(price, peak)?;
    Ok((WAD - ratio).min(WAD))
}
