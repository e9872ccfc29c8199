// Fixed-point helpers shared by the pool ledger, premium accrual and markdown.
// Rates are WAD-scaled (1e18) per second. Amounts are raw token units held as u128.

use anchor_lang::prelude::*;

use crate::error::CreditError;

pub const WAD: u128 = 1_000_000_000_000_000_000u128;
pub const BPS: u128 = 10_000u128;
pub const SECONDS_PER_YEAR: u128 = 365 * 24 * 60 * 60;

/// Cap on `rate * elapsed` inside `growth`. Every Taylor term stays inside u128 below it.
pub const MAX_EXPONENT: u128 = 8 * WAD;

pub const VIRTUAL_SHARES: u128 = 1_000_000;
pub const VIRTUAL_ASSETS: u128 = 1;

/// Continuously compounded growth `e^(rate * elapsed) - 1`, WAD-scaled.
///
/// Third-order Taylor expansion. The exponent saturates at `MAX_EXPONENT`, so a keeper
/// touching a position abandoned for years gets a bounded (and still monotonic) result
/// instead of an overflow.
pub fn growth(rate_per_second: u128, elapsed: u64) -> u128 {
    let exponent = rate_per_second
        .saturating_mul(elapsed as u128)
        .min(MAX_EXPONENT);
    let first = exponent;
    let second = exponent * exponent / (2 * WAD);
    let third = second * exponent / (3 * WAD);
    first + second + third
}

/// `a * b / WAD` rounded down, split so `a` may be any u128. Saturates.
pub fn wad_mul_down(a: u128, b: u128) -> u128 {
    let whole = (a / WAD).saturating_mul(b);
    let frac = (a % WAD).saturating_mul(b) / WAD;
    whole.saturating_add(frac)
}

/// `a * b / WAD` rounded up. Saturates.
pub fn wad_mul_up(a: u128, b: u128) -> u128 {
    let whole = (a / WAD).saturating_mul(b);
    let frac = (a % WAD).saturating_mul(b);
    let frac_up = frac / WAD + u128::from(frac % WAD != 0);
    whole.saturating_add(frac_up)
}

/// Full 256-bit product of two u128 values as (high, low).
fn widening_mul(a: u128, b: u128) -> (u128, u128) {
    const MASK: u128 = u64::MAX as u128;
    let (a_hi, a_lo) = (a >> 64, a & MASK);
    let (b_hi, b_lo) = (b >> 64, b & MASK);

    let ll = a_lo * b_lo;
    let lh = a_lo * b_hi;
    let hl = a_hi * b_lo;
    let hh = a_hi * b_hi;

    let mid = (ll >> 64) + (lh & MASK) + (hl & MASK);
    let low = (ll & MASK) | (mid << 64);
    let high = hh + (lh >> 64) + (hl >> 64) + (mid >> 64);
    (high, low)
}

/// `(high, low) / d` as (quotient, remainder). None when `d` is zero or the
/// quotient does not fit in 128 bits.
fn wide_div(high: u128, low: u128, d: u128) -> Option<(u128, u128)> {
    if d == 0 || high >= d {
        return None;
    }
    if high == 0 {
        return Some((low / d, low % d));
    }
    let mut rem = high;
    let mut quot = 0u128;
    for bit in (0..128).rev() {
        let carry = rem >> 127;
        rem = (rem << 1) | ((low >> bit) & 1);
        quot <<= 1;
        if carry == 1 || rem >= d {
            rem = rem.wrapping_sub(d);
            quot |= 1;
        }
    }
    Some((quot, rem))
}

/// `a * b / d` rounded down. The product is taken at 256 bits, so only a zero
/// divisor or a quotient above u128 fails.
pub fn mul_div_down(a: u128, b: u128, d: u128) -> Result<u128> {
    if let Some(product) = a.checked_mul(b) {
        return product
            .checked_div(d)
            .ok_or_else(|| error!(CreditError::MathOverflow));
    }
    let (high, low) = widening_mul(a, b);
    wide_div(high, low, d)
        .map(|(q, _)| q)
        .ok_or_else(|| error!(CreditError::MathOverflow))
}

pub fn mul_div_up(a: u128, b: u128, d: u128) -> Result<u128> {
    require!(d > 0, CreditError::MathOverflow);
    if let Some(product) = a.checked_mul(b) {
        return Ok(product / d + u128::from(product % d != 0));
    }
    let (high, low) = widening_mul(a, b);
    let (q, r) = wide_div(high, low, d).ok_or(CreditError::MathOverflow)?;
    q.checked_add(u128::from(r != 0))
        .ok_or_else(|| error!(CreditError::MathOverflow))
}

pub fn to_shares_down(assets: u128, total_assets: u128, total_shares: u128) -> Result<u128> {
    mul_div_down(
        assets,
        total_shares.saturating_add(VIRTUAL_SHARES),
        total_assets.saturating_add(VIRTUAL_ASSETS),
    )
}

pub fn to_shares_up(assets: u128, total_assets: u128, total_shares: u128) -> Result<u128> {
    mul_div_up(
        assets,
        total_shares.saturating_add(VIRTUAL_SHARES),
        total_assets.saturating_add(VIRTUAL_ASSETS),
    )
}

pub fn to_assets_down(shares: u128, total_assets: u128, total_shares: u128) -> Result<u128> {
    mul_div_down(
        shares,
        total_assets.saturating_add(VIRTUAL_ASSETS),
        total_shares.saturating_add(VIRTUAL_SHARES),
    )
}

pub fn to_assets_up(shares: u128, total_assets: u128, total_shares: u128) -> Result<u128> {
    mul_div_up(
        shares,
        total_assets.saturating_add(VIRTUAL_ASSETS),
        total_shares.saturating_add(VIRTUAL_SHARES),
    )
}

/// Annualized basis points to a WAD-scaled per-second rate.
pub fn annual_bps_to_per_second(bps: u64) -> u128 {
    (bps as u128) * WAD / BPS / SECONDS_PER_YEAR
}

/// True when exactly one of the two inputs is zero.
pub fn exactly_one_zero(a: u128, b: u128) -> bool {
    (a == 0) != (b == 0)
}

pub fn to_u64(value: u128) -> Result<u64> {
    u64::try_from(value).map_err(|_| error!(CreditError::MathOverflow))
}
