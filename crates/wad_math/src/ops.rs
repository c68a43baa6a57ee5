//! Widening multiply/divide primitives.
//!
//! Tree sums can reach ~1e36 while factors are WAD-scaled, so a*b routinely
//! exceeds u128. All muldivs here go through a 256-bit intermediate held as
//! a (hi, lo) pair of u128 limbs.

use crate::{MathError, MathResult};

const MASK64: u128 = (1 << 64) - 1;

/// Full 256-bit product of two u128 values as (hi, lo).
pub fn mul_wide(a: u128, b: u128) -> (u128, u128) {
    let (a_hi, a_lo) = (a >> 64, a & MASK64);
    let (b_hi, b_lo) = (b >> 64, b & MASK64);

    let ll = a_lo * b_lo;
    let lh = a_lo * b_hi;
    let hl = a_hi * b_lo;
    let hh = a_hi * b_hi;

    let (mid, mid_carry) = lh.overflowing_add(hl);
    let (lo, lo_carry) = ll.overflowing_add(mid << 64);
    let hi = hh
        + (mid >> 64)
        + ((mid_carry as u128) << 64)
        + lo_carry as u128;
    (hi, lo)
}

/// Divide the 256-bit value (hi, lo) by `d`, returning quotient and
/// remainder. Errors if `d == 0` or the quotient exceeds u128.
fn div_wide(hi: u128, lo: u128, d: u128) -> MathResult<(u128, u128)> {
    if d == 0 {
        return Err(MathError::DivByZero);
    }
    if hi == 0 {
        return Ok((lo / d, lo % d));
    }
    if hi >= d {
        return Err(MathError::Overflow);
    }
    // Shift-subtract long division over the low limb's bits. The remainder
    // stays below d throughout, so a shifted-out top bit always means the
    // true remainder exceeds d and wrapping subtraction is exact.
    let mut rem = hi;
    let mut quot: u128 = 0;
    for i in (0..128).rev() {
        let top = rem >> 127;
        rem = (rem << 1) | ((lo >> i) & 1);
        if top == 1 || rem >= d {
            rem = rem.wrapping_sub(d);
            quot |= 1 << i;
        }
    }
    Ok((quot, rem))
}

/// floor(a * b / d).
pub fn mul_div_floor(a: u128, b: u128, d: u128) -> MathResult<u128> {
    let (hi, lo) = mul_wide(a, b);
    let (q, _) = div_wide(hi, lo, d)?;
    Ok(q)
}

/// ceil(a * b / d).
pub fn mul_div_ceil(a: u128, b: u128, d: u128) -> MathResult<u128> {
    let (hi, lo) = mul_wide(a, b);
    let (q, r) = div_wide(hi, lo, d)?;
    if r == 0 {
        Ok(q)
    } else {
        q.checked_add(1).ok_or(MathError::Overflow)
    }
}

/// round(a * b / d), ties away from zero.
pub fn mul_div_nearest(a: u128, b: u128, d: u128) -> MathResult<u128> {
    let (hi, lo) = mul_wide(a, b);
    let (q, r) = div_wide(hi, lo, d)?;
    // r < d <= u128::MAX, so 2r cannot wrap only when r <= u128::MAX/2;
    // compare via r >= d - r instead.
    if r >= d - r && r != 0 {
        q.checked_add(1).ok_or(MathError::Overflow)
    } else {
        Ok(q)
    }
}
