// Credit-line lending markets: pooled supply/borrow shares with per-borrower premium
// and penalty accrual, repayment cycles with sticky obligations, and markdown of
// defaulted debt with proportional reward burn.

use anchor_lang::prelude::*;

pub mod accrual;
pub mod admin;
pub mod constants;
pub mod credit_line;
pub mod cycle;
pub mod error;
pub mod markdown;
pub mod math;
pub mod policy;
pub mod pool;
pub mod state;

use accrual::*;
use admin::*;
use credit_line::*;
use cycle::*;
use markdown::*;
use pool::*;
use state::*;

declare_id!("EjHwBb3zZzP5CAdG1A4qBc7Q8Nr36G4Cic3yPms3qWTT");

#[program]
pub mod credit_lending {
    use super::*;

    /// Create the protocol config singleton
    pub fn initialize_protocol(ctx: Context<InitializeProtocol>, params: CreditParams) -> Result<()> {
        admin::initialize_protocol(ctx, params)
    }

    /// Update credit parameters, optionally handing over the admin role
    pub fn update_protocol_config(
        ctx: Context<UpdateProtocolConfig>,
        params: CreditParams,
        new_authority: Option<Pubkey>,
    ) -> Result<()> {
        admin::update_protocol_config(ctx, params, new_authority)
    }

    pub fn create_market(ctx: Context<CreateMarket>, params: CreateMarketParams) -> Result<()> {
        admin::create_market(ctx, params)
    }

    pub fn set_fee(ctx: Context<SetFee>, fee_bps: u64, fee_recipient: Pubkey) -> Result<()> {
        admin::set_fee(ctx, fee_bps, fee_recipient)
    }

    /// Grant or update a borrower's credit line (credit authority only)
    pub fn set_credit_line(
        ctx: Context<SetCreditLine>,
        credit_limit: u64,
        premium_rate: u128,
    ) -> Result<()> {
        credit_line::set_credit_line(ctx, credit_limit, premium_rate)
    }

    pub fn accrue_interest(ctx: Context<AccrueInterest>) -> Result<()> {
        pool::accrue_interest(ctx)
    }

    /// Keeper batch accrual; credit lines go in remaining accounts
    pub fn accrue_premiums<'info>(
        ctx: Context<'_, '_, 'info, 'info, AccruePremiums<'info>>,
    ) -> Result<()> {
        accrual::accrue_premiums(ctx)
    }

    pub fn supply(ctx: Context<Supply>, assets: u64, shares: u128) -> Result<()> {
        pool::supply(ctx, assets, shares)
    }

    pub fn withdraw(ctx: Context<Withdraw>, assets: u64, shares: u128) -> Result<()> {
        pool::withdraw(ctx, assets, shares)
    }

    /// Borrow against a credit line. Exactly one of `assets` or `shares` must be non-zero.
    pub fn borrow(ctx: Context<Borrow>, assets: u64, shares: u128) -> Result<()> {
        pool::borrow(ctx, assets, shares)
    }

    /// Repay debt. While an obligation is outstanding the payment must cover it in full.
    pub fn repay(ctx: Context<Repay>, assets: u64, shares: u128) -> Result<()> {
        pool::repay(ctx, assets, shares)
    }

    pub fn claim_fees(ctx: Context<ClaimFees>) -> Result<()> {
        pool::claim_fees(ctx)
    }

    /// Close a repayment cycle; `entries[i]` applies to the i-th remaining account
    pub fn close_cycle<'info>(
        ctx: Context<'_, '_, 'info, 'info, CloseCycle<'info>>,
        cycle_end_time: i64,
        entries: Vec<ObligationEntry>,
    ) -> Result<()> {
        cycle::close_cycle(ctx, cycle_end_time, entries)
    }

    pub fn get_repayment_status(ctx: Context<GetRepaymentStatus>) -> Result<RepaymentStatusView> {
        cycle::get_repayment_status(ctx)
    }

    /// Sync a borrower's markdown and burn the reward tokens it calls for
    pub fn update_markdown(ctx: Context<UpdateMarkdown>) -> Result<()> {
        markdown::update_markdown(ctx)
    }

    /// Write off a credit line (credit authority only)
    pub fn settle_credit_line(ctx: Context<SettleCreditLine>) -> Result<()> {
        markdown::settle_credit_line(ctx)
    }
}
