//! WAD (1e18) fixed-point arithmetic for the pricing and vault engines.
//!
//! All internal ratios, prices and per-bin weights are u128 values scaled by
//! `WAD`. The external accounting unit is micro units (1e6) carried in u64.
//! Conversions between the two are one-directional with an explicit rounding
//! policy: ceiling when the protocol is owed, floor when paying out.
//!
//! `ln_wad` is defined for ratios >= 1.0 only; every CLMSR cost evaluation
//! is a logarithm of a ratio >= 1 by construction. `exp_wad` is bounded by
//! `EXP_INPUT_MAX` so the resulting factor stays inside the safe factor
//! range applied to the range tree.

#![forbid(unsafe_code)]

pub mod ops;

pub use ops::{mul_div_ceil, mul_div_floor, mul_div_nearest, mul_wide};

/// Fixed-point scale: 1e18.
pub const WAD: u128 = 1_000_000_000_000_000_000;

/// Half of `WAD`, used by nearest-rounding.
pub const HALF_WAD: u128 = WAD / 2;

/// External unit scale: micro units (1e6).
pub const MICRO_SCALE: u64 = 1_000_000;

/// WAD per micro unit (1e12).
pub const MICRO_PER_WAD: u128 = WAD / MICRO_SCALE as u128;

/// ln(2) scaled by WAD.
pub const LN2_WAD: u128 = 693_147_180_559_945_309;

/// Upper bound on `exp_wad` input: ln(100) scaled by WAD. exp of this is
/// exactly the maximum multiplicative factor the range tree accepts.
pub const EXP_INPUT_MAX: u128 = 4_605_170_185_988_091_368;

/// Math error kinds. Total and Copy so model crates can match on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathError {
    /// Result does not fit the target width.
    Overflow,
    /// Division by zero.
    DivByZero,
    /// `ln_wad` input below 1.0 WAD.
    LnDomain,
    /// `exp_wad` input above `EXP_INPUT_MAX`.
    ExpDomain,
}

pub type MathResult<T> = Result<T, MathError>;

/// (a * b) / WAD, rounded down.
#[inline]
pub fn wmul_floor(a: u128, b: u128) -> MathResult<u128> {
    mul_div_floor(a, b, WAD)
}

/// (a * b) / WAD, rounded up.
#[inline]
pub fn wmul_ceil(a: u128, b: u128) -> MathResult<u128> {
    mul_div_ceil(a, b, WAD)
}

/// (a * b) / WAD, rounded to nearest (ties away from zero).
#[inline]
pub fn wmul_nearest(a: u128, b: u128) -> MathResult<u128> {
    mul_div_nearest(a, b, WAD)
}

/// (a * WAD) / b, rounded down.
#[inline]
pub fn wdiv_floor(a: u128, b: u128) -> MathResult<u128> {
    mul_div_floor(a, WAD, b)
}

/// (a * WAD) / b, rounded up.
#[inline]
pub fn wdiv_ceil(a: u128, b: u128) -> MathResult<u128> {
    mul_div_ceil(a, WAD, b)
}

/// (a * WAD) / b, rounded to nearest.
#[inline]
pub fn wdiv_nearest(a: u128, b: u128) -> MathResult<u128> {
    mul_div_nearest(a, WAD, b)
}

/// Natural log of a WAD ratio `x >= WAD`.
///
/// Range-reduces by powers of two (`x = 2^k * y`, `y` in [1, 2)), then sums
/// the atanh series `ln y = 2 * (z + z^3/3 + z^5/5 + ...)` with
/// `z = (y - 1)/(y + 1) <= 1/3`. Ten odd terms keep the truncation error
/// below 1e-10 relative, well inside the 1e-6 target.
pub fn ln_wad(x: u128) -> MathResult<u128> {
    if x < WAD {
        return Err(MathError::LnDomain);
    }
    let mut y = x;
    let mut k: u32 = 0;
    while y >= 2 * WAD {
        y >>= 1;
        k += 1;
    }
    // z = (y - WAD) / (y + WAD), in [0, WAD/3]
    let z = mul_div_floor(y - WAD, WAD, y + WAD)?;
    let z_sq = wmul_floor(z, z)?;
    let mut term = z;
    let mut sum = z;
    for i in 1u128..10 {
        term = wmul_floor(term, z_sq)?;
        sum += term / (2 * i + 1);
    }
    Ok(2 * sum + (k as u128) * LN2_WAD)
}

/// `ln_wad` rounded up by one unit when inexact. Used where a conservative
/// (never under-estimated) log is required, e.g. liquidity bounds.
pub fn ln_wad_ceil(x: u128) -> MathResult<u128> {
    // The series truncation under-estimates by at most 1e-9 relative; pad by
    // that bound plus one unit so the result is never below the true log.
    let ln = ln_wad(x)?;
    Ok(ln + ln / 1_000_000_000 + 1)
}

/// e^x for a WAD exponent `0 <= x <= EXP_INPUT_MAX`.
///
/// Range-reduces by ln 2 (`x = n*ln2 + r`, `r < ln2`), evaluates the Taylor
/// series of `e^r`, then shifts by `n`. With `r < 0.694` twenty terms put
/// the truncation error far below 1e-12 relative.
pub fn exp_wad(x: u128) -> MathResult<u128> {
    if x > EXP_INPUT_MAX {
        return Err(MathError::ExpDomain);
    }
    let n = (x / LN2_WAD) as u32;
    let r = x - (n as u128) * LN2_WAD;
    let mut term = WAD;
    let mut sum = WAD;
    for i in 1u128..=20 {
        term = wmul_floor(term, r)? / i;
        if term == 0 {
            break;
        }
        sum += term;
    }
    sum.checked_shl(n).ok_or(MathError::Overflow)
}

/// Micro units to WAD. Exact.
#[inline]
pub fn micro_to_wad(amount: u64) -> u128 {
    amount as u128 * MICRO_PER_WAD
}

/// WAD to micro units, rounded up. Used when the protocol is owed (debits):
/// fractional dust is charged to the payer, never forgiven.
pub fn wad_to_micro_ceil(x: u128) -> MathResult<u64> {
    let q = x / MICRO_PER_WAD + u128::from(x % MICRO_PER_WAD != 0);
    u64::try_from(q).map_err(|_| MathError::Overflow)
}

/// WAD to micro units, rounded down. Used when paying out (credits):
/// fractional dust stays with the protocol.
pub fn wad_to_micro_floor(x: u128) -> MathResult<u64> {
    u64::try_from(x / MICRO_PER_WAD).map_err(|_| MathError::Overflow)
}
