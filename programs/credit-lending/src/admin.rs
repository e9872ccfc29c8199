use anchor_lang::prelude::*;
use anchor_spl::token::{Mint, Token, TokenAccount};

use crate::constants::*;
use crate::error::CreditError;
use crate::policy::MarkdownMode;
use crate::pool;
use crate::state::*;

#[derive(AnchorSerialize, AnchorDeserialize, Clone, Debug)]
pub struct CreateMarketParams {
    pub market_id: [u8; 32],
    pub oracle: Pubkey,
    pub credit_authority: Pubkey,
    pub interest_model: InterestRateModelConfig,
    pub fee_bps: u64,
    pub fee_recipient: Pubkey,
    pub reward_mint: Option<Pubkey>,
    pub markdown_mode: MarkdownMode,
}

pub fn validate_market_params(loan_mint: &Pubkey, params: &CreateMarketParams) -> Result<()> {
    params.interest_model.validate()?;
    require!(params.fee_bps <= MAX_FEE_BPS, CreditError::InvalidConfig);
    require!(
        params.credit_authority != Pubkey::default(),
        CreditError::ZeroAddress
    );
    require!(
        params.fee_recipient != Pubkey::default(),
        CreditError::ZeroAddress
    );
    let expected = Market::id_for(
        loan_mint,
        &params.oracle,
        &params.interest_model,
        &params.credit_authority,
    );
    require!(expected == params.market_id, CreditError::InvalidMarketId);
    Ok(())
}

pub fn initialize_protocol(ctx: Context<InitializeProtocol>, params: CreditParams) -> Result<()> {
    params.validate()?;

    let protocol_config = &mut ctx.accounts.protocol_config;
    protocol_config.authority = ctx.accounts.authority.key();
    protocol_config.params = params;
    protocol_config.bump = ctx.bumps.protocol_config;

    emit!(ProtocolConfigUpdated {
        authority: protocol_config.authority,
        params,
    });
    msg!("Credit protocol initialized");
    Ok(())
}

pub fn update_protocol_config(
    ctx: Context<UpdateProtocolConfig>,
    params: CreditParams,
    new_authority: Option<Pubkey>,
) -> Result<()> {
    params.validate()?;

    let protocol_config = &mut ctx.accounts.protocol_config;
    if let Some(authority) = new_authority {
        require!(authority != Pubkey::default(), CreditError::ZeroAddress);
        protocol_config.authority = authority;
    }
    protocol_config.params = params;

    emit!(ProtocolConfigUpdated {
        authority: protocol_config.authority,
        params,
    });
    msg!("Protocol configuration updated");
    Ok(())
}

pub fn create_market(ctx: Context<CreateMarket>, params: CreateMarketParams) -> Result<()> {
    let loan_mint = ctx.accounts.loan_mint.key();
    validate_market_params(&loan_mint, &params)?;

    let market = &mut ctx.accounts.market;
    market.market_id = params.market_id;
    market.loan_mint = loan_mint;
    market.oracle = params.oracle;
    market.credit_authority = params.credit_authority;
    market.vault = ctx.accounts.vault.key();
    market.interest_model = params.interest_model;
    market.reward_mint = params.reward_mint;
    market.markdown_mode = params.markdown_mode;
    market.fee_bps = params.fee_bps;
    market.fee_recipient = params.fee_recipient;
    market.last_update = Clock::get()?.unix_timestamp;
    market.bump = ctx.bumps.market;
    market.vault_bump = ctx.bumps.vault;

    emit!(MarketCreated {
        market: market.key(),
        market_id: params.market_id,
        loan_mint,
        oracle: params.oracle,
        credit_authority: params.credit_authority,
        fee_bps: params.fee_bps,
        reward_mint: params.reward_mint,
    });
    msg!("Market created for mint {}", loan_mint);
    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeeChange {
    pub previous_fee_bps: u64,
    pub previous_recipient: Pubkey,
    pub settled_shares: u128,
    pub base: pool::MarketAccrual,
}

/// Fee changes apply from now on; interest up to now is booked at the old fee. When the
/// recipient changes, shares it already earned move to its supply position first.
pub fn apply_fee_change(
    market_key: &Pubkey,
    market: &mut Market,
    previous_position: &mut SupplyPosition,
    fee_bps: u64,
    fee_recipient: Pubkey,
    now: i64,
) -> Result<FeeChange> {
    require!(fee_bps <= MAX_FEE_BPS, CreditError::InvalidConfig);
    require!(fee_recipient != Pubkey::default(), CreditError::ZeroAddress);

    let base = pool::accrue_market(market, now)?;
    let previous_recipient = market.fee_recipient;
    let mut settled_shares = 0;
    if fee_recipient != previous_recipient && market.pending_fee_shares > 0 {
        if previous_position.owner == Pubkey::default() {
            previous_position.market = *market_key;
            previous_position.owner = previous_recipient;
        }
        settled_shares = pool::execute_claim_fees(market, previous_position)?;
    }

    let change = FeeChange {
        previous_fee_bps: market.fee_bps,
        previous_recipient,
        settled_shares,
        base,
    };
    market.fee_bps = fee_bps;
    market.fee_recipient = fee_recipient;
    Ok(change)
}

pub fn set_fee(ctx: Context<SetFee>, fee_bps: u64, fee_recipient: Pubkey) -> Result<()> {
    let now = Clock::get()?.unix_timestamp;
    let market_key = ctx.accounts.market.key();
    let position = &mut ctx.accounts.previous_recipient_position;
    let created = position.owner == Pubkey::default();

    let change = apply_fee_change(
        &market_key,
        &mut ctx.accounts.market,
        position,
        fee_bps,
        fee_recipient,
        now,
    )?;
    if created && position.owner != Pubkey::default() {
        position.bump = ctx.bumps.previous_recipient_position;
    }

    pool::emit_market_accrual(&market_key, &change.base);
    emit!(FeeUpdated {
        market: market_key,
        previous_fee_bps: change.previous_fee_bps,
        fee_bps,
        previous_recipient: change.previous_recipient,
        fee_recipient,
        settled_shares: change.settled_shares,
    });
    Ok(())
}

#[derive(Accounts)]
pub struct InitializeProtocol<'info> {
    #[account(
        init,
        payer = authority,
        space = ProtocolConfig::SIZE,
        seeds = [PROTOCOL_CONFIG_SEED],
        bump
    )]
    pub protocol_config: Account<'info, ProtocolConfig>,
    #[account(mut)]
    pub authority: Signer<'info>,
    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
pub struct UpdateProtocolConfig<'info> {
    #[account(
        mut,
        seeds = [PROTOCOL_CONFIG_SEED],
        bump = protocol_config.bump,
        has_one = authority @ CreditError::Unauthorized
    )]
    pub protocol_config: Account<'info, ProtocolConfig>,
    pub authority: Signer<'info>,
}

#[derive(Accounts)]
#[instruction(params: CreateMarketParams)]
pub struct CreateMarket<'info> {
    #[account(
        init,
        payer = payer,
        space = Market::SIZE,
        seeds = [MARKET_SEED, params.market_id.as_ref()],
        bump
    )]
    pub market: Account<'info, Market>,
    pub loan_mint: Account<'info, Mint>,
    #[account(
        init,
        payer = payer,
        seeds = [VAULT_SEED, market.key().as_ref()],
        bump,
        token::mint = loan_mint,
        token::authority = market
    )]
    pub vault: Account<'info, TokenAccount>,
    #[account(mut)]
    pub payer: Signer<'info>,
    pub token_program: Program<'info, Token>,
    pub system_program: Program<'info, System>,
    pub rent: Sysvar<'info, Rent>,
}

#[derive(Accounts)]
pub struct SetFee<'info> {
    #[account(mut, constraint = !market.locked @ CreditError::ReentrantCall)]
    pub market: Account<'info, Market>,
    #[account(
        seeds = [PROTOCOL_CONFIG_SEED],
        bump = protocol_config.bump,
        has_one = authority @ CreditError::Unauthorized
    )]
    pub protocol_config: Account<'info, ProtocolConfig>,
    /// Receives pending fee shares when the recipient changes
    #[account(
        init_if_needed,
        payer = authority,
        space = SupplyPosition::SIZE,
        seeds = [SUPPLY_SEED, market.key().as_ref(), market.fee_recipient.as_ref()],
        bump
    )]
    pub previous_recipient_position: Account<'info, SupplyPosition>,
    #[account(mut)]
    pub authority: Signer<'info>,
    pub system_program: Program<'info, System>,
}

#[event]
pub struct ProtocolConfigUpdated {
    pub authority: Pubkey,
    pub params: CreditParams,
}

#[event]
pub struct MarketCreated {
    pub market: Pubkey,
    pub market_id: [u8; 32],
    pub loan_mint: Pubkey,
    pub oracle: Pubkey,
    pub credit_authority: Pubkey,
    pub fee_bps: u64,
    pub reward_mint: Option<Pubkey>,
}

#[event]
pub struct FeeUpdated {
    pub market: Pubkey,
    pub previous_fee_bps: u64,
    pub fee_bps: u64,
    pub previous_recipient: Pubkey,
    pub fee_recipient: Pubkey,
    pub settled_shares: u128,
}
