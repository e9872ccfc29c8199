use std::collections::BTreeSet;

use anchor_lang::prelude::*;

use crate::constants::PROTOCOL_CONFIG_SEED;
use crate::cycle::repayment_status;
use crate::error::CreditError;
use crate::math::{self, growth, wad_mul_down};
use crate::pool;
use crate::state::*;

/// What one borrower accrual booked. A no-op leaves both timestamps equal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AccrualOutcome {
    pub premium: u128,
    pub penalty: u128,
    pub shares: u128,
    pub fee: u128,
    pub fee_shares: u128,
    pub previous_accrual_time: i64,
    pub accrual_time: i64,
}

impl AccrualOutcome {
    pub fn interest(&self) -> u128 {
        self.premium.saturating_add(self.penalty)
    }

    pub fn is_noop(&self) -> bool {
        self.previous_accrual_time == self.accrual_time
    }
}

/// Penalty owed for `[previous, now)` on the frozen cycle balance.
///
/// Only accrues while the line is Delinquent or Default, and never for time before the
/// grace window closed, so a borrower that was accrued during Grace still pays penalty
/// from the exact moment delinquency began.
pub fn penalty_amount(
    obligation: &Obligation,
    params: &CreditParams,
    status: RepaymentStatus,
    previous: i64,
    now: i64,
) -> u128 {
    if !status.is_delinquent_or_worse() {
        return 0;
    }
    let Obligation::Outstanding {
        cycle_end_time,
        ending_balance,
        ..
    } = *obligation
    else {
        return 0;
    };
    let start = previous.max(cycle_end_time.saturating_add(params.grace_period));
    if now <= start {
        return 0;
    }
    wad_mul_down(
        ending_balance as u128,
        growth(params.penalty_rate, (now - start) as u64),
    )
}

/// Bring one credit line's premium and penalty current and book them into the market.
///
/// The market's base accrual must already have run for `now`. Calling this twice at the
/// same instant books nothing the second time.
pub fn accrue_borrower(
    market_key: &Pubkey,
    market: &mut Market,
    line: &mut CreditLine,
    params: &CreditParams,
    now: i64,
) -> Result<AccrualOutcome> {
    require_keys_eq!(line.market, *market_key, CreditError::WrongMarket);

    let previous = line.premium.last_accrual_time;
    let mut outcome = AccrualOutcome {
        previous_accrual_time: previous,
        accrual_time: previous,
        ..Default::default()
    };
    if !line.premium.is_initialized() || now <= previous {
        return Ok(outcome);
    }

    let elapsed = (now - previous) as u64;
    let (status, _) = repayment_status(&line.obligation, params, now);
    let owed = line.owed_assets(market)?;
    let snapshot = line.premium.principal_snapshot;

    // Snapshot part plus the base interest booked since it, each grown once at the premium rate.
    let premium_growth = growth(line.premium.premium_rate, elapsed);
    outcome.premium = wad_mul_down(snapshot, premium_growth)
        .saturating_add(wad_mul_down(owed.saturating_sub(snapshot), premium_growth));
    outcome.penalty = penalty_amount(&line.obligation, params, status, previous, now);

    // Clamp to what the totals can still hold; a long-dormant line saturates instead of failing.
    let headroom = u128::MAX - market.total_supply_assets.max(market.total_borrow_assets);
    outcome.premium = outcome.premium.min(headroom);
    outcome.penalty = outcome.penalty.min(headroom - outcome.premium);

    let interest = outcome.interest();
    if interest > 0 {
        let share_room = u128::MAX - market.total_borrow_shares;
        let shares = math::to_shares_up(
            interest,
            market.total_borrow_assets,
            market.total_borrow_shares,
        )
        .unwrap_or(share_room)
        .min(share_room);
        line.borrow_shares = line.borrow_shares.saturating_add(shares);
        market.total_borrow_shares = market.total_borrow_shares.saturating_add(shares);
        market.total_borrow_assets = market.total_borrow_assets.saturating_add(interest);
        let (fee, fee_shares) = pool::book_interest(market, interest)?;
        outcome.shares = shares;
        outcome.fee = fee;
        outcome.fee_shares = fee_shares;
    }

    line.premium.principal_snapshot = line.owed_assets(market)?;
    line.premium.last_accrual_time = now;
    outcome.accrual_time = now;
    Ok(outcome)
}

/// Accrue many lines against one market. A failing line is rolled back and reported
/// without stopping the rest.
pub fn accrue_batch(
    market_key: &Pubkey,
    market: &mut Market,
    lines: &mut [&mut CreditLine],
    params: &CreditParams,
    now: i64,
) -> Vec<Result<AccrualOutcome>> {
    lines
        .iter_mut()
        .map(|line| {
            let market_before = market.clone();
            let line_before = (**line).clone();
            let result = accrue_borrower(market_key, market, &mut **line, params, now);
            if result.is_err() {
                *market = market_before;
                **line = line_before;
            }
            result
        })
        .collect()
}

pub(crate) fn emit_premium_accrual(market: &Pubkey, borrower: &Pubkey, outcome: &AccrualOutcome) {
    if outcome.is_noop() {
        return;
    }
    emit!(PremiumAccrued {
        market: *market,
        borrower: *borrower,
        premium: outcome.premium,
        penalty: outcome.penalty,
        shares: outcome.shares,
        fee_shares: outcome.fee_shares,
        previous_accrual_time: outcome.previous_accrual_time,
        accrual_time: outcome.accrual_time,
    });
}

fn skip(market: Pubkey, account: Pubkey, reason: &str) {
    msg!("Skipping {}: {}", account, reason);
    emit!(AccrualSkipped {
        market,
        account,
        reason: reason.to_string(),
    });
}

/// Split keeper input into loadable credit lines and the accounts passed over, with why.
pub fn select_credit_lines<'info>(
    infos: &'info [AccountInfo<'info>],
) -> (Vec<Account<'info, CreditLine>>, Vec<(Pubkey, &'static str)>) {
    let mut seen = BTreeSet::new();
    let mut lines = Vec::with_capacity(infos.len());
    let mut skipped = Vec::new();
    for info in infos {
        if !info.is_writable {
            skipped.push((info.key(), "account not writable"));
            continue;
        }
        if !seen.insert(info.key()) {
            skipped.push((info.key(), "duplicate account"));
            continue;
        }
        match Account::<CreditLine>::try_from(info) {
            Ok(line) => lines.push(line),
            Err(_) => skipped.push((info.key(), "not a credit line")),
        }
    }
    (lines, skipped)
}

/// Keeper entrypoint. Credit lines are passed writable in `remaining_accounts`.
pub fn accrue_premiums<'info>(
    ctx: Context<'_, '_, 'info, 'info, AccruePremiums<'info>>,
) -> Result<()> {
    let now = Clock::get()?.unix_timestamp;
    let params = ctx.accounts.protocol_config.params;
    let market_key = ctx.accounts.market.key();
    let market = &mut ctx.accounts.market;

    let base = pool::accrue_market(market, now)?;
    pool::emit_market_accrual(&market_key, &base);

    let (mut lines, skipped) = select_credit_lines(ctx.remaining_accounts);
    for (account, reason) in skipped {
        skip(market_key, account, reason);
    }

    let mut refs: Vec<&mut CreditLine> = lines.iter_mut().map(|line| &mut **line).collect();
    let results = accrue_batch(&market_key, market, &mut refs, &params, now);

    let mut accrued = 0u32;
    for (line, result) in lines.iter().zip(results) {
        match result {
            Ok(outcome) => {
                emit_premium_accrual(&market_key, &line.borrower, &outcome);
                line.exit(&crate::ID)?;
                accrued += 1;
            }
            Err(err) => skip(market_key, line.key(), &err.to_string()),
        }
    }
    msg!("Accrued {} credit lines", accrued);
    Ok(())
}

#[derive(Accounts)]
pub struct AccruePremiums<'info> {
    #[account(mut, constraint = !market.locked @ CreditError::ReentrantCall)]
    pub market: Account<'info, Market>,
    #[account(seeds = [PROTOCOL_CONFIG_SEED], bump = protocol_config.bump)]
    pub protocol_config: Account<'info, ProtocolConfig>,
}

#[event]
pub struct PremiumAccrued {
    pub market: Pubkey,
    pub borrower: Pubkey,
    pub premium: u128,
    pub penalty: u128,
    pub shares: u128,
    pub fee_shares: u128,
    pub previous_accrual_time: i64,
    pub accrual_time: i64,
}

#[event]
pub struct AccrualSkipped {
    pub market: Pubkey,
    pub account: Pubkey,
    pub reason: String,
}
