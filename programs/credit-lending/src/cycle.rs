// Repayment cycles. The credit authority closes a cycle and posts one obligation per
// borrower; status is derived from the oldest unpaid cycle end, never stored.

use std::collections::BTreeSet;

use anchor_lang::prelude::*;

use crate::accrual::{self, AccrualOutcome};
use crate::constants::{CREDIT_LINE_SEED, PROTOCOL_CONFIG_SEED};
use crate::error::CreditError;
use crate::markdown::{self, MarkdownExit};
use crate::pool;
use crate::state::*;

impl Obligation {
    /// Apply a newly posted cycle to the existing obligation.
    ///
    /// | current     | posted due | result                                   |
    /// |-------------|------------|------------------------------------------|
    /// | any         | 0          | cleared                                  |
    /// | None        | > 0        | anchored to the posted cycle             |
    /// | Outstanding | > 0        | amount refreshed, first anchor kept      |
    pub fn post(self, cycle_id: u64, cycle_end_time: i64, amount_due: u64, ending_balance: u64) -> Self {
        match (self, amount_due) {
            (_, 0) => Obligation::None,
            (Obligation::None, due) => Obligation::Outstanding {
                cycle_id,
                cycle_end_time,
                amount_due: due,
                ending_balance,
            },
            (
                Obligation::Outstanding {
                    cycle_id,
                    cycle_end_time,
                    ending_balance,
                    ..
                },
                due,
            ) => Obligation::Outstanding {
                cycle_id,
                cycle_end_time,
                amount_due: due,
                ending_balance,
            },
        }
    }

    pub fn amount_due(&self) -> u64 {
        match self {
            Obligation::None => 0,
            Obligation::Outstanding { amount_due, .. } => *amount_due,
        }
    }

    pub fn is_outstanding(&self) -> bool {
        self.amount_due() > 0
    }
}

/// Status of an obligation at `now`, plus the cycle end it is measured from (0 when Current).
pub fn repayment_status(
    obligation: &Obligation,
    params: &CreditParams,
    now: i64,
) -> (RepaymentStatus, i64) {
    match *obligation {
        Obligation::Outstanding {
            cycle_end_time,
            amount_due,
            ..
        } if amount_due > 0 => {
            let elapsed = now.saturating_sub(cycle_end_time);
            let status = if elapsed < params.grace_period {
                RepaymentStatus::Grace
            } else if elapsed < params.default_after() {
                RepaymentStatus::Delinquent
            } else {
                RepaymentStatus::Default
            };
            (status, cycle_end_time)
        }
        _ => (RepaymentStatus::Current, 0),
    }
}

/// One borrower's statement for a closed cycle.
#[derive(AnchorSerialize, AnchorDeserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObligationEntry {
    pub amount_due: u64,
    pub ending_balance: u64,
}

pub fn validate_cycle_end(
    market: &Market,
    params: &CreditParams,
    cycle_end_time: i64,
    now: i64,
) -> Result<()> {
    require!(
        cycle_end_time > 0 && cycle_end_time <= now,
        CreditError::InvalidCycleEndTime
    );
    if market.cycle_count > 0 {
        require!(
            cycle_end_time >= market.last_cycle_end.saturating_add(params.min_cycle_duration),
            CreditError::InvalidCycleEndTime
        );
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PostOutcome {
    pub accrual: AccrualOutcome,
    pub previous: Obligation,
    pub current: Obligation,
    pub markdown_exit: Option<MarkdownExit>,
}

/// Accrue the line at its pre-post status, then apply the posting.
#[allow(clippy::too_many_arguments)]
pub fn post_obligation(
    market_key: &Pubkey,
    market: &mut Market,
    line: &mut CreditLine,
    params: &CreditParams,
    cycle_id: u64,
    cycle_end_time: i64,
    entry: &ObligationEntry,
    now: i64,
) -> Result<PostOutcome> {
    let accrual = accrual::accrue_borrower(market_key, market, line, params, now)?;

    let previous = line.obligation;
    line.obligation = previous.post(cycle_id, cycle_end_time, entry.amount_due, entry.ending_balance);

    let (status, _) = repayment_status(&line.obligation, params, now);
    let markdown_exit = markdown::exit_if_cured(market, &mut line.markdown, status);

    Ok(PostOutcome {
        accrual,
        previous,
        current: line.obligation,
        markdown_exit,
    })
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CycleOutcome {
    pub cycle_id: u64,
    pub base: pool::MarketAccrual,
    pub posts: Vec<PostOutcome>,
}

/// Close a cycle for the market and post every entry to its positional credit line.
#[allow(clippy::too_many_arguments)]
pub fn close_cycle_for(
    market_key: &Pubkey,
    market: &mut Market,
    lines: &mut [&mut CreditLine],
    params: &CreditParams,
    cycle_end_time: i64,
    entries: &[ObligationEntry],
    now: i64,
) -> Result<CycleOutcome> {
    require!(lines.len() == entries.len(), CreditError::LengthMismatch);
    validate_cycle_end(market, params, cycle_end_time, now)?;
    let mut borrowers = BTreeSet::new();
    for line in lines.iter() {
        require!(borrowers.insert(line.borrower), CreditError::DuplicateAccount);
    }

    let base = pool::accrue_market(market, now)?;
    let cycle_id = market.cycle_count.checked_add(1).ok_or(CreditError::MathOverflow)?;
    market.cycle_count = cycle_id;
    market.last_cycle_end = cycle_end_time;

    let mut posts = Vec::with_capacity(lines.len());
    for (line, entry) in lines.iter_mut().zip(entries) {
        posts.push(post_obligation(
            market_key,
            market,
            &mut **line,
            params,
            cycle_id,
            cycle_end_time,
            entry,
            now,
        )?);
    }
    Ok(CycleOutcome { cycle_id, base, posts })
}

/// Every account must be a writable credit line PDA of this market.
pub fn load_cycle_lines<'info>(
    market_key: &Pubkey,
    infos: &'info [AccountInfo<'info>],
) -> Result<Vec<Account<'info, CreditLine>>> {
    let mut lines = Vec::with_capacity(infos.len());
    for info in infos {
        require!(info.is_writable, CreditError::AccountNotWritable);
        let line = Account::<CreditLine>::try_from(info)?;
        let (expected, _) = Pubkey::find_program_address(
            &[CREDIT_LINE_SEED, market_key.as_ref(), line.borrower.as_ref()],
            &crate::ID,
        );
        require_keys_eq!(expected, info.key(), CreditError::WrongMarket);
        lines.push(line);
    }
    Ok(lines)
}

pub fn close_cycle<'info>(
    ctx: Context<'_, '_, 'info, 'info, CloseCycle<'info>>,
    cycle_end_time: i64,
    entries: Vec<ObligationEntry>,
) -> Result<()> {
    let now = Clock::get()?.unix_timestamp;
    let params = ctx.accounts.protocol_config.params;
    let market_key = ctx.accounts.market.key();
    let market = &mut ctx.accounts.market;

    let mut lines = load_cycle_lines(&market_key, ctx.remaining_accounts)?;
    let mut refs: Vec<&mut CreditLine> = lines.iter_mut().map(|line| &mut **line).collect();
    let outcome = close_cycle_for(
        &market_key,
        market,
        &mut refs,
        &params,
        cycle_end_time,
        &entries,
        now,
    )?;

    pool::emit_market_accrual(&market_key, &outcome.base);
    for (line, post) in lines.iter().zip(&outcome.posts) {
        accrual::emit_premium_accrual(&market_key, &line.borrower, &post.accrual);
        if let Some(exit) = post.markdown_exit {
            markdown::emit_default_exit(&market_key, &line.borrower, &exit, now);
        }
        emit!(ObligationPosted {
            market: market_key,
            borrower: line.borrower,
            cycle_id: outcome.cycle_id,
            amount_due: post.current.amount_due(),
            anchor_cycle_id: match post.current {
                Obligation::Outstanding { cycle_id, .. } => cycle_id,
                Obligation::None => 0,
            },
            cleared: post.previous.is_outstanding() && !post.current.is_outstanding(),
        });
        line.exit(&crate::ID)?;
    }

    emit!(CycleClosed {
        market: market_key,
        cycle_id: outcome.cycle_id,
        cycle_end_time,
        borrowers: outcome.posts.len() as u32,
    });
    msg!("Cycle {} closed at {}", outcome.cycle_id, cycle_end_time);
    Ok(())
}

/// Read-only status query; the result is returned through program return data.
pub fn get_repayment_status(ctx: Context<GetRepaymentStatus>) -> Result<RepaymentStatusView> {
    let now = Clock::get()?.unix_timestamp;
    let (status, cycle_end_time) = repayment_status(
        &ctx.accounts.credit_line.obligation,
        &ctx.accounts.protocol_config.params,
        now,
    );
    Ok(RepaymentStatusView {
        status,
        cycle_end_time,
        amount_due: ctx.accounts.credit_line.obligation.amount_due(),
    })
}

#[derive(AnchorSerialize, AnchorDeserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct RepaymentStatusView {
    pub status: RepaymentStatus,
    pub cycle_end_time: i64,
    pub amount_due: u64,
}

#[derive(Accounts)]
pub struct CloseCycle<'info> {
    #[account(
        mut,
        has_one = credit_authority @ CreditError::Unauthorized,
        constraint = !market.locked @ CreditError::ReentrantCall
    )]
    pub market: Account<'info, Market>,
    #[account(seeds = [PROTOCOL_CONFIG_SEED], bump = protocol_config.bump)]
    pub protocol_config: Account<'info, ProtocolConfig>,
    pub credit_authority: Signer<'info>,
}

#[derive(Accounts)]
pub struct GetRepaymentStatus<'info> {
    pub market: Account<'info, Market>,
    #[account(seeds = [PROTOCOL_CONFIG_SEED], bump = protocol_config.bump)]
    pub protocol_config: Account<'info, ProtocolConfig>,
    #[account(
        seeds = [CREDIT_LINE_SEED, market.key().as_ref(), credit_line.borrower.as_ref()],
        bump = credit_line.bump
    )]
    pub credit_line: Account<'info, CreditLine>,
}

#[event]
pub struct CycleClosed {
    pub market: Pubkey,
    pub cycle_id: u64,
    pub cycle_end_time: i64,
    pub borrowers: u32,
}

#[event]
pub struct ObligationPosted {
    pub market: Pubkey,
    pub borrower: Pubkey,
    pub cycle_id: u64,
    pub amount_due: u64,
    /// Cycle the obligation is measured from; differs from `cycle_id` while carried over
    pub anchor_cycle_id: u64,
    pub cleared: bool,
}
