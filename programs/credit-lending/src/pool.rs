// Pooled share ledger: base-rate accrual, supply/withdraw liquidity, borrow/repay against
// a credit line. Every path accrues the market, then the borrower, before touching shares.

use anchor_lang::prelude::*;
use anchor_spl::token::{self, Token, TokenAccount, Transfer};

use crate::accrual::{self, AccrualOutcome};
use crate::constants::*;
use crate::cycle::repayment_status;
use crate::error::CreditError;
use crate::markdown::{self, MarkdownExit};
use crate::math::{self, BPS};
use crate::state::*;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MarketAccrual {
    pub interest: u128,
    pub fee: u128,
    pub fee_shares: u128,
    pub rate: u128,
    pub previous_update: i64,
    pub update: i64,
}

/// Accrue base-rate interest on market totals. No-op when no time has passed.
pub fn accrue_market(market: &mut Market, now: i64) -> Result<MarketAccrual> {
    require!(market.last_update != 0, CreditError::MarketNotCreated);

    let mut accrual = MarketAccrual {
        previous_update: market.last_update,
        update: market.last_update,
        ..Default::default()
    };
    if now <= market.last_update {
        return Ok(accrual);
    }
    let elapsed = (now - market.last_update) as u64;
    market.last_update = now;
    accrual.update = now;

    if market.total_borrow_assets == 0 {
        return Ok(accrual);
    }

    accrual.rate = market
        .interest_model
        .borrow_rate(market.total_supply_assets, market.total_borrow_assets);
    let interest = math::wad_mul_down(
        market.total_borrow_assets,
        math::growth(accrual.rate, elapsed),
    );
    if interest == 0 {
        return Ok(accrual);
    }

    market.total_borrow_assets = market.total_borrow_assets.saturating_add(interest);
    let (fee, fee_shares) = book_interest(market, interest)?;
    accrual.interest = interest;
    accrual.fee = fee;
    accrual.fee_shares = fee_shares;
    Ok(accrual)
}

/// Credit `interest` to depositors and carve the protocol fee out of it as supply shares.
/// The borrow side must already be booked by the caller.
pub fn book_interest(market: &mut Market, interest: u128) -> Result<(u128, u128)> {
    market.total_supply_assets = market.total_supply_assets.saturating_add(interest);
    if market.fee_bps == 0 {
        return Ok((0, 0));
    }

    let fee_bps = market.fee_bps as u128;
    let fee = (interest / BPS) * fee_bps + (interest % BPS) * fee_bps / BPS;
    if fee == 0 {
        return Ok((0, 0));
    }

    // Shares priced against supply before the fee so depositors absorb it, not the borrower.
    let fee_shares = math::to_shares_down(
        fee,
        market.total_supply_assets.saturating_sub(fee),
        market.total_supply_shares,
    )?;
    market.total_supply_shares = market.total_supply_shares.saturating_add(fee_shares);
    market.pending_fee_shares = market.pending_fee_shares.saturating_add(fee_shares);
    Ok((fee, fee_shares))
}

pub fn execute_supply(
    market: &mut Market,
    position: &mut SupplyPosition,
    assets: u128,
    shares: u128,
    now: i64,
) -> Result<(u128, u128, MarketAccrual)> {
    require!(math::exactly_one_zero(assets, shares), CreditError::InconsistentInput);
    let base = accrue_market(market, now)?;

    let (assets, shares) = if assets > 0 {
        let s = math::to_shares_down(assets, market.total_supply_assets, market.total_supply_shares)?;
        (assets, s)
    } else {
        let a = math::to_assets_up(shares, market.total_supply_assets, market.total_supply_shares)?;
        (a, shares)
    };
    require!(assets > 0 && shares > 0, CreditError::ZeroAmount);

    position.shares = position.shares.checked_add(shares).ok_or(CreditError::MathOverflow)?;
    market.total_supply_shares = market
        .total_supply_shares
        .checked_add(shares)
        .ok_or(CreditError::MathOverflow)?;
    market.total_supply_assets = market
        .total_supply_assets
        .checked_add(assets)
        .ok_or(CreditError::MathOverflow)?;
    Ok((assets, shares, base))
}

pub fn execute_withdraw(
    market: &mut Market,
    position: &mut SupplyPosition,
    assets: u128,
    shares: u128,
    now: i64,
) -> Result<(u128, u128, MarketAccrual)> {
    require!(math::exactly_one_zero(assets, shares), CreditError::InconsistentInput);
    let base = accrue_market(market, now)?;

    let (assets, shares) = if assets > 0 {
        let s = math::to_shares_up(assets, market.total_supply_assets, market.total_supply_shares)?;
        (assets, s)
    } else {
        let a = math::to_assets_down(shares, market.total_supply_assets, market.total_supply_shares)?;
        (a, shares)
    };
    require!(shares <= position.shares, CreditError::InsufficientShares);

    let new_supply_assets = market
        .total_supply_assets
        .checked_sub(assets)
        .ok_or(CreditError::InsufficientLiquidity)?;
    require!(
        market.total_borrow_assets <= new_supply_assets,
        CreditError::InsufficientLiquidity
    );

    position.shares -= shares;
    market.total_supply_shares = market.total_supply_shares.saturating_sub(shares);
    market.total_supply_assets = new_supply_assets;
    Ok((assets, shares, base))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BorrowOutcome {
    pub assets: u128,
    pub shares: u128,
    pub base: MarketAccrual,
    pub accrual: AccrualOutcome,
}

pub fn execute_borrow(
    market_key: &Pubkey,
    market: &mut Market,
    line: &mut CreditLine,
    params: &CreditParams,
    assets: u128,
    shares: u128,
    now: i64,
) -> Result<BorrowOutcome> {
    require!(math::exactly_one_zero(assets, shares), CreditError::InconsistentInput);
    require!(line.credit_limit > 0, CreditError::NoCreditLine);

    let base = accrue_market(market, now)?;
    let accrual = accrual::accrue_borrower(market_key, market, line, params, now)?;

    let (status, _) = repayment_status(&line.obligation, params, now);
    require!(
        status == RepaymentStatus::Current,
        CreditError::OutstandingRepaymentObligation
    );

    let (assets, shares) = if assets > 0 {
        let s = math::to_shares_up(assets, market.total_borrow_assets, market.total_borrow_shares)?;
        (assets, s)
    } else {
        let a = math::to_assets_down(shares, market.total_borrow_assets, market.total_borrow_shares)?;
        (a, shares)
    };
    require!(assets > 0, CreditError::ZeroAmount);

    let new_line_shares = line.borrow_shares.checked_add(shares).ok_or(CreditError::MathOverflow)?;
    let new_borrow_shares = market
        .total_borrow_shares
        .checked_add(shares)
        .ok_or(CreditError::MathOverflow)?;
    let new_borrow_assets = market
        .total_borrow_assets
        .checked_add(assets)
        .ok_or(CreditError::MathOverflow)?;
    require!(
        assets <= market.available_liquidity(),
        CreditError::InsufficientLiquidity
    );
    let owed = math::to_assets_up(new_line_shares, new_borrow_assets, new_borrow_shares)?;
    require!(owed <= line.credit_limit as u128, CreditError::CreditLimitExceeded);

    line.borrow_shares = new_line_shares;
    market.total_borrow_shares = new_borrow_shares;
    market.total_borrow_assets = new_borrow_assets;

    if !line.premium.is_initialized() {
        line.premium.last_accrual_time = now;
    }
    line.premium.principal_snapshot = owed;

    Ok(BorrowOutcome { assets, shares, base, accrual })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RepayOutcome {
    pub assets: u128,
    pub shares: u128,
    pub obligation_cleared: bool,
    pub markdown_exit: Option<MarkdownExit>,
    pub base: MarketAccrual,
    pub accrual: AccrualOutcome,
}

pub fn execute_repay(
    market_key: &Pubkey,
    market: &mut Market,
    line: &mut CreditLine,
    params: &CreditParams,
    assets: u128,
    shares: u128,
    now: i64,
) -> Result<RepayOutcome> {
    require!(math::exactly_one_zero(assets, shares), CreditError::InconsistentInput);

    let base = accrue_market(market, now)?;
    let accrual = accrual::accrue_borrower(market_key, market, line, params, now)?;

    let (assets, shares) = if assets > 0 {
        let s = math::to_shares_down(assets, market.total_borrow_assets, market.total_borrow_shares)?;
        (assets, s)
    } else {
        let a = math::to_assets_up(shares, market.total_borrow_assets, market.total_borrow_shares)?;
        (a, shares)
    };
    require!(assets > 0, CreditError::ZeroAmount);
    require!(shares <= line.borrow_shares, CreditError::RepayExceedsDebt);

    let amount_due = line.obligation.amount_due() as u128;
    require!(
        assets >= amount_due,
        CreditError::PartialPaymentWhileObligationOutstanding
    );

    line.borrow_shares -= shares;
    market.total_borrow_shares = market.total_borrow_shares.saturating_sub(shares);
    market.total_borrow_assets = market.total_borrow_assets.saturating_sub(assets);

    let obligation_cleared = amount_due > 0;
    if obligation_cleared {
        line.obligation = Obligation::None;
    }
    let (status, _) = repayment_status(&line.obligation, params, now);
    let markdown_exit = markdown::exit_if_cured(market, &mut line.markdown, status);

    line.premium.principal_snapshot = line.owed_assets(market)?;

    Ok(RepayOutcome {
        assets,
        shares,
        obligation_cleared,
        markdown_exit,
        base,
        accrual,
    })
}

/// Move pending fee shares into the fee recipient's supply position.
pub fn execute_claim_fees(market: &mut Market, position: &mut SupplyPosition) -> Result<u128> {
    let shares = market.pending_fee_shares;
    require!(shares > 0, CreditError::ZeroAmount);
    position.shares = position.shares.checked_add(shares).ok_or(CreditError::MathOverflow)?;
    market.pending_fee_shares = 0;
    Ok(shares)
}

pub(crate) fn emit_market_accrual(market: &Pubkey, accrual: &MarketAccrual) {
    if accrual.interest == 0 {
        return;
    }
    emit!(InterestAccrued {
        market: *market,
        rate: accrual.rate,
        interest: accrual.interest,
        fee: accrual.fee,
        fee_shares: accrual.fee_shares,
        previous_update: accrual.previous_update,
        update: accrual.update,
    });
}

/// Flag the market and persist checkpoint state before a token CPI leaves the program.
pub(crate) fn lock_market(market: &mut Account<'_, Market>) -> Result<()> {
    market.locked = true;
    market.exit(&crate::ID)
}

fn vault_transfer_out<'info>(
    market: &Account<'info, Market>,
    vault: &Account<'info, TokenAccount>,
    to: &Account<'info, TokenAccount>,
    token_program: &Program<'info, Token>,
    amount: u64,
) -> Result<()> {
    let bump = [market.bump];
    let seeds: &[&[u8]] = &[MARKET_SEED, market.market_id.as_ref(), &bump];
    let signer = &[seeds];
    let cpi_accounts = Transfer {
        from: vault.to_account_info(),
        to: to.to_account_info(),
        authority: market.to_account_info(),
    };
    token::transfer(
        CpiContext::new_with_signer(token_program.to_account_info(), cpi_accounts, signer),
        amount,
    )
}

pub fn accrue_interest(ctx: Context<AccrueInterest>) -> Result<()> {
    let now = Clock::get()?.unix_timestamp;
    let market_key = ctx.accounts.market.key();
    let accrual = accrue_market(&mut ctx.accounts.market, now)?;
    emit_market_accrual(&market_key, &accrual);
    Ok(())
}

pub fn supply(ctx: Context<Supply>, assets: u64, shares: u128) -> Result<()> {
    let now = Clock::get()?.unix_timestamp;
    let market_key = ctx.accounts.market.key();

    let position = &mut ctx.accounts.position;
    if position.owner == Pubkey::default() {
        position.market = market_key;
        position.owner = ctx.accounts.supplier.key();
        position.bump = ctx.bumps.position;
    }

    let market = &mut ctx.accounts.market;
    let (assets, shares, base) = execute_supply(market, position, assets as u128, shares, now)?;
    emit_market_accrual(&market_key, &base);
    let amount = math::to_u64(assets)?;

    lock_market(market)?;
    position.exit(&crate::ID)?;
    let cpi_accounts = Transfer {
        from: ctx.accounts.supplier_token_account.to_account_info(),
        to: ctx.accounts.vault.to_account_info(),
        authority: ctx.accounts.supplier.to_account_info(),
    };
    token::transfer(
        CpiContext::new(ctx.accounts.token_program.to_account_info(), cpi_accounts),
        amount,
    )?;
    ctx.accounts.market.locked = false;

    emit!(Supplied {
        market: market_key,
        owner: ctx.accounts.supplier.key(),
        assets,
        shares,
    });
    Ok(())
}

pub fn withdraw(ctx: Context<Withdraw>, assets: u64, shares: u128) -> Result<()> {
    let now = Clock::get()?.unix_timestamp;
    let market_key = ctx.accounts.market.key();
    let market = &mut ctx.accounts.market;
    let position = &mut ctx.accounts.position;

    let (assets, shares, base) = execute_withdraw(market, position, assets as u128, shares, now)?;
    emit_market_accrual(&market_key, &base);
    let amount = math::to_u64(assets)?;

    lock_market(market)?;
    position.exit(&crate::ID)?;
    vault_transfer_out(
        &ctx.accounts.market,
        &ctx.accounts.vault,
        &ctx.accounts.receiver,
        &ctx.accounts.token_program,
        amount,
    )?;
    ctx.accounts.market.locked = false;

    emit!(Withdrawn {
        market: market_key,
        owner: ctx.accounts.owner.key(),
        assets,
        shares,
    });
    Ok(())
}

pub fn borrow(ctx: Context<Borrow>, assets: u64, shares: u128) -> Result<()> {
    let now = Clock::get()?.unix_timestamp;
    let params = ctx.accounts.protocol_config.params;
    let market_key = ctx.accounts.market.key();
    let market = &mut ctx.accounts.market;
    let line = &mut ctx.accounts.credit_line;

    let outcome = execute_borrow(&market_key, market, line, &params, assets as u128, shares, now)?;
    emit_market_accrual(&market_key, &outcome.base);
    accrual::emit_premium_accrual(&market_key, &line.borrower, &outcome.accrual);
    let amount = math::to_u64(outcome.assets)?;

    lock_market(market)?;
    line.exit(&crate::ID)?;
    vault_transfer_out(
        &ctx.accounts.market,
        &ctx.accounts.vault,
        &ctx.accounts.receiver,
        &ctx.accounts.token_program,
        amount,
    )?;
    ctx.accounts.market.locked = false;

    emit!(Borrowed {
        market: market_key,
        borrower: ctx.accounts.borrower.key(),
        assets: outcome.assets,
        shares: outcome.shares,
        owed_after: ctx.accounts.credit_line.premium.principal_snapshot,
    });
    msg!("Borrowed {} against credit line", amount);
    Ok(())
}

pub fn repay(ctx: Context<Repay>, assets: u64, shares: u128) -> Result<()> {
    let now = Clock::get()?.unix_timestamp;
    let params = ctx.accounts.protocol_config.params;
    let market_key = ctx.accounts.market.key();
    let market = &mut ctx.accounts.market;
    let line = &mut ctx.accounts.credit_line;

    let outcome = execute_repay(&market_key, market, line, &params, assets as u128, shares, now)?;
    emit_market_accrual(&market_key, &outcome.base);
    accrual::emit_premium_accrual(&market_key, &line.borrower, &outcome.accrual);
    if let Some(exit) = outcome.markdown_exit {
        markdown::emit_default_exit(&market_key, &line.borrower, &exit, now);
    }
    let amount = math::to_u64(outcome.assets)?;

    lock_market(market)?;
    line.exit(&crate::ID)?;
    let cpi_accounts = Transfer {
        from: ctx.accounts.payer_token_account.to_account_info(),
        to: ctx.accounts.vault.to_account_info(),
        authority: ctx.accounts.payer.to_account_info(),
    };
    token::transfer(
        CpiContext::new(ctx.accounts.token_program.to_account_info(), cpi_accounts),
        amount,
    )?;
    ctx.accounts.market.locked = false;

    emit!(Repaid {
        market: market_key,
        borrower: ctx.accounts.credit_line.borrower,
        payer: ctx.accounts.payer.key(),
        assets: outcome.assets,
        shares: outcome.shares,
        obligation_cleared: outcome.obligation_cleared,
    });
    Ok(())
}

pub fn claim_fees(ctx: Context<ClaimFees>) -> Result<()> {
    let market_key = ctx.accounts.market.key();
    let position = &mut ctx.accounts.position;
    if position.owner == Pubkey::default() {
        position.market = market_key;
        position.owner = ctx.accounts.fee_recipient.key();
        position.bump = ctx.bumps.position;
    }
    let shares = execute_claim_fees(&mut ctx.accounts.market, position)?;
    emit!(FeesClaimed {
        market: market_key,
        fee_recipient: ctx.accounts.fee_recipient.key(),
        shares,
    });
    Ok(())
}

#[derive(Accounts)]
pub struct AccrueInterest<'info> {
    #[account(mut, constraint = !market.locked @ CreditError::ReentrantCall)]
    pub market: Account<'info, Market>,
}

#[derive(Accounts)]
pub struct Supply<'info> {
    #[account(mut, constraint = !market.locked @ CreditError::ReentrantCall)]
    pub market: Account<'info, Market>,
    #[account(
        init_if_needed,
        payer = supplier,
        space = SupplyPosition::SIZE,
        seeds = [SUPPLY_SEED, market.key().as_ref(), supplier.key().as_ref()],
        bump
    )]
    pub position: Account<'info, SupplyPosition>,
    #[account(mut)]
    pub supplier: Signer<'info>,
    #[account(mut, token::mint = market.loan_mint, token::authority = supplier)]
    pub supplier_token_account: Account<'info, TokenAccount>,
    #[account(mut, address = market.vault @ CreditError::InvalidConfig)]
    pub vault: Account<'info, TokenAccount>,
    pub token_program: Program<'info, Token>,
    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
pub struct Withdraw<'info> {
    #[account(mut, constraint = !market.locked @ CreditError::ReentrantCall)]
    pub market: Account<'info, Market>,
    #[account(
        mut,
        seeds = [SUPPLY_SEED, market.key().as_ref(), owner.key().as_ref()],
        bump = position.bump,
        has_one = owner @ CreditError::Unauthorized
    )]
    pub position: Account<'info, SupplyPosition>,
    pub owner: Signer<'info>,
    #[account(mut, token::mint = market.loan_mint)]
    pub receiver: Account<'info, TokenAccount>,
    #[account(mut, address = market.vault @ CreditError::InvalidConfig)]
    pub vault: Account<'info, TokenAccount>,
    pub token_program: Program<'info, Token>,
}

#[derive(Accounts)]
pub struct Borrow<'info> {
    #[account(mut, constraint = !market.locked @ CreditError::ReentrantCall)]
    pub market: Account<'info, Market>,
    #[account(seeds = [PROTOCOL_CONFIG_SEED], bump = protocol_config.bump)]
    pub protocol_config: Account<'info, ProtocolConfig>,
    #[account(
        mut,
        seeds = [CREDIT_LINE_SEED, market.key().as_ref(), borrower.key().as_ref()],
        bump = credit_line.bump,
        has_one = borrower @ CreditError::Unauthorized
    )]
    pub credit_line: Account<'info, CreditLine>,
    pub borrower: Signer<'info>,
    #[account(mut, token::mint = market.loan_mint)]
    pub receiver: Account<'info, TokenAccount>,
    #[account(mut, address = market.vault @ CreditError::InvalidConfig)]
    pub vault: Account<'info, TokenAccount>,
    pub token_program: Program<'info, Token>,
}

#[derive(Accounts)]
pub struct Repay<'info> {
    #[account(mut, constraint = !market.locked @ CreditError::ReentrantCall)]
    pub market: Account<'info, Market>,
    #[account(seeds = [PROTOCOL_CONFIG_SEED], bump = protocol_config.bump)]
    pub protocol_config: Account<'info, ProtocolConfig>,
    #[account(
        mut,
        seeds = [CREDIT_LINE_SEED, market.key().as_ref(), credit_line.borrower.as_ref()],
        bump = credit_line.bump
    )]
    pub credit_line: Account<'info, CreditLine>,
    pub payer: Signer<'info>,
    #[account(mut, token::mint = market.loan_mint, token::authority = payer)]
    pub payer_token_account: Account<'info, TokenAccount>,
    #[account(mut, address = market.vault @ CreditError::InvalidConfig)]
    pub vault: Account<'info, TokenAccount>,
    pub token_program: Program<'info, Token>,
}

#[derive(Accounts)]
pub struct ClaimFees<'info> {
    #[account(
        mut,
        has_one = fee_recipient @ CreditError::Unauthorized,
        constraint = !market.locked @ CreditError::ReentrantCall
    )]
    pub market: Account<'info, Market>,
    #[account(
        init_if_needed,
        payer = fee_recipient,
        space = SupplyPosition::SIZE,
        seeds = [SUPPLY_SEED, market.key().as_ref(), fee_recipient.key().as_ref()],
        bump
    )]
    pub position: Account<'info, SupplyPosition>,
    #[account(mut)]
    pub fee_recipient: Signer<'info>,
    pub system_program: Program<'info, System>,
}

#[event]
pub struct InterestAccrued {
    pub market: Pubkey,
    pub rate: u128,
    pub interest: u128,
    pub fee: u128,
    pub fee_shares: u128,
    pub previous_update: i64,
    pub update: i64,
}

#[event]
pub struct Supplied {
    pub market: Pubkey,
    pub owner: Pubkey,
    pub assets: u128,
    pub shares: u128,
}

#[event]
pub struct Withdrawn {
    pub market: Pubkey,
    pub owner: Pubkey,
    pub assets: u128,
    pub shares: u128,
}

#[event]
pub struct Borrowed {
    pub market: Pubkey,
    pub borrower: Pubkey,
    pub assets: u128,
    pub shares: u128,
    pub owed_after: u128,
}

#[event]
pub struct Repaid {
    pub market: Pubkey,
    pub borrower: Pubkey,
    pub payer: Pubkey,
    pub assets: u128,
    pub shares: u128,
    pub obligation_cleared: bool,
}

#[event]
pub struct FeesClaimed {
    pub market: Pubkey,
    pub fee_recipient: Pubkey,
    pub shares: u128,
}
