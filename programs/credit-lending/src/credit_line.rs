use anchor_lang::prelude::*;

use crate::accrual::{self, AccrualOutcome};
use crate::constants::*;
use crate::error::CreditError;
use crate::pool::{self, MarketAccrual};
use crate::state::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CreditLineChange {
    pub created: bool,
    pub previous_limit: u64,
    pub previous_rate: u128,
    pub base: MarketAccrual,
    pub accrual: AccrualOutcome,
}

/// Grant or adjust a line. Interest up to `now` is booked at the old rate before the
/// new one applies; lowering the limit below current debt only blocks further borrows.
#[allow(clippy::too_many_arguments)]
pub fn apply_credit_line(
    market_key: &Pubkey,
    market: &mut Market,
    line: &mut CreditLine,
    params: &CreditParams,
    borrower: Pubkey,
    credit_limit: u64,
    premium_rate: u128,
    now: i64,
) -> Result<CreditLineChange> {
    require!(borrower != Pubkey::default(), CreditError::ZeroAddress);
    require!(
        premium_rate <= params.max_premium_rate,
        CreditError::PremiumRateTooHigh
    );

    let created = line.borrower == Pubkey::default();
    if created {
        line.market = *market_key;
        line.borrower = borrower;
    }
    require_keys_eq!(line.borrower, borrower, CreditError::Unauthorized);

    let base = pool::accrue_market(market, now)?;
    let accrual = accrual::accrue_borrower(market_key, market, line, params, now)?;

    let change = CreditLineChange {
        created,
        previous_limit: line.credit_limit,
        previous_rate: line.premium.premium_rate,
        base,
        accrual,
    };
    line.credit_limit = credit_limit;
    line.premium.premium_rate = premium_rate;
    Ok(change)
}

pub fn set_credit_line(ctx: Context<SetCreditLine>, credit_limit: u64, premium_rate: u128) -> Result<()> {
    let now = Clock::get()?.unix_timestamp;
    let params = ctx.accounts.protocol_config.params;
    let market_key = ctx.accounts.market.key();
    let borrower = ctx.accounts.borrower.key();

    let line = &mut ctx.accounts.credit_line;
    let change = apply_credit_line(
        &market_key,
        &mut ctx.accounts.market,
        line,
        &params,
        borrower,
        credit_limit,
        premium_rate,
        now,
    )?;
    if change.created {
        line.bump = ctx.bumps.credit_line;
    }

    pool::emit_market_accrual(&market_key, &change.base);
    accrual::emit_premium_accrual(&market_key, &borrower, &change.accrual);
    emit!(CreditLineSet {
        market: market_key,
        borrower,
        credit_limit,
        premium_rate,
        previous_limit: change.previous_limit,
        previous_rate: change.previous_rate,
    });
    msg!("Credit line set: limit {}, rate {}", credit_limit, premium_rate);
    Ok(())
}

#[derive(Accounts)]
pub struct SetCreditLine<'info> {
    #[account(
        mut,
        has_one = credit_authority @ CreditError::Unauthorized,
        constraint = !market.locked @ CreditError::ReentrantCall
    )]
    pub market: Account<'info, Market>,
    #[account(seeds = [PROTOCOL_CONFIG_SEED], bump = protocol_config.bump)]
    pub protocol_config: Account<'info, ProtocolConfig>,
    #[account(
        init_if_needed,
        payer = credit_authority,
        space = CreditLine::SIZE,
        seeds = [CREDIT_LINE_SEED, market.key().as_ref(), borrower.key().as_ref()],
        bump
    )]
    pub credit_line: Account<'info, CreditLine>,
    /// CHECK: only the address is used, as the credit line seed
    pub borrower: UncheckedAccount<'info>,
    #[account(mut)]
    pub credit_authority: Signer<'info>,
    pub system_program: Program<'info, System>,
}

#[event]
pub struct CreditLineSet {
    pub market: Pubkey,
    pub borrower: Pubkey,
    pub credit_limit: u64,
    pub premium_rate: u128,
    pub previous_limit: u64,
    pub previous_rate: u128,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::annual_bps_to_per_second;

    const T0: i64 = 1_700_000_000;
    const DAY: i64 = 86_400;

    fn params() -> CreditParams {
        CreditParams {
            max_premium_rate: annual_bps_to_per_second(2_000),
            grace_period: 7 * DAY,
            delinquency_period: 23 * DAY,
            min_cycle_duration: DAY,
            full_markdown_duration: 90 * DAY,
            ..Default::default()
        }
    }

    fn market() -> Market {
        let mut m = Market {
            last_update: T0,
            ..Default::default()
        };
        let mut lp = SupplyPosition::default();
        pool::execute_supply(&mut m, &mut lp, 1_000_000, 0, T0).unwrap();
        m
    }

    #[test]
    fn test_rejects_default_borrower_and_high_rate() {
        let key = Pubkey::new_unique();
        let mut m = market();
        let mut line = CreditLine::default();
        let err = apply_credit_line(&key, &mut m, &mut line, &params(), Pubkey::default(), 10, 0, T0)
            .unwrap_err();
        assert_eq!(err, CreditError::ZeroAddress.into());

        let too_high = annual_bps_to_per_second(2_001);
        let err = apply_credit_line(&key, &mut m, &mut line, &params(), Pubkey::new_unique(), 10, too_high, T0)
            .unwrap_err();
        assert_eq!(err, CreditError::PremiumRateTooHigh.into());
    }

    #[test]
    fn test_first_grant_does_not_start_clock() {
        let key = Pubkey::new_unique();
        let borrower = Pubkey::new_unique();
        let mut m = market();
        let mut line = CreditLine::default();
        let rate = annual_bps_to_per_second(800);
        let change = apply_credit_line(&key, &mut m, &mut line, &params(), borrower, 50_000, rate, T0).unwrap();
        assert!(change.created);
        assert_eq!(line.market, key);
        assert_eq!(line.borrower, borrower);
        assert_eq!(line.credit_limit, 50_000);
        assert_eq!(line.premium.premium_rate, rate);
        assert!(!line.premium.is_initialized());
    }

    #[test]
    fn test_rate_change_accrues_at_old_rate_first() {
        let key = Pubkey::new_unique();
        let borrower = Pubkey::new_unique();
        let low = annual_bps_to_per_second(500);
        let high = annual_bps_to_per_second(2_000);

        let mut m = market();
        let mut line = CreditLine::default();
        apply_credit_line(&key, &mut m, &mut line, &params(), borrower, 100_000, low, T0).unwrap();
        pool::execute_borrow(&key, &mut m, &mut line, &params(), 50_000, 0, T0).unwrap();

        let change = apply_credit_line(&key, &mut m, &mut line, &params(), borrower, 100_000, high, T0 + 365 * DAY)
            .unwrap();
        // 50,000 * (e^0.05 - 1) = 2,563.5
        assert!(change.accrual.premium >= 2_562 && change.accrual.premium <= 2_564);
        assert_eq!(change.previous_rate, low);
        assert_eq!(line.premium.premium_rate, high);
        assert_eq!(line.premium.last_accrual_time, T0 + 365 * DAY);
    }

    #[test]
    fn test_limit_below_debt_blocks_new_borrows() {
        let key = Pubkey::new_unique();
        let borrower = Pubkey::new_unique();
        let mut m = market();
        let mut line = CreditLine::default();
        apply_credit_line(&key, &mut m, &mut line, &params(), borrower, 100_000, 0, T0).unwrap();
        pool::execute_borrow(&key, &mut m, &mut line, &params(), 60_000, 0, T0).unwrap();

        apply_credit_line(&key, &mut m, &mut line, &params(), borrower, 40_000, 0, T0).unwrap();
        assert!(line.owed_assets(&m).unwrap() >= 60_000);
        let err = pool::execute_borrow(&key, &mut m, &mut line, &params(), 1, 0, T0).unwrap_err();
        assert_eq!(err, CreditError::CreditLimitExceeded.into());
    }
}
