use anchor_lang::prelude::*;
use anchor_lang::solana_program::hash::hashv;

use crate::constants::{MAX_BASE_RATE_BPS, MAX_RATE_PER_SECOND};
use crate::error::CreditError;
use crate::math::{self, BPS, SECONDS_PER_YEAR, WAD};
use crate::policy::MarkdownMode;

/// Protocol-wide settings owned by the admin. Engine code never reads this account
/// directly; handlers copy `params` out and pass it down.
#[account]
#[derive(Default, Debug)]
pub struct ProtocolConfig {
    pub authority: Pubkey,
    pub params: CreditParams,
    pub bump: u8,
}

impl ProtocolConfig {
    pub const SIZE: usize = 8 + // discriminator
        32 + // authority
        CreditParams::SIZE +
        1; // bump
}

/// Credit configuration value object injected into every engine call.
#[derive(AnchorSerialize, AnchorDeserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CreditParams {
    /// Ceiling for a borrower premium (WAD per second)
    pub max_premium_rate: u128,
    /// Penalty applied on the frozen cycle balance while Delinquent or Default (WAD per second)
    pub penalty_rate: u128,
    /// Seconds after cycle end before a due obligation turns Delinquent
    pub grace_period: i64,
    /// Seconds after the grace window before Delinquent turns Default
    pub delinquency_period: i64,
    /// Minimum spacing between two cycle end times
    pub min_cycle_duration: i64,
    /// Seconds in Default until the markdown fraction reaches 1
    pub full_markdown_duration: i64,
}

impl CreditParams {
    pub const SIZE: usize = 16 * 2 + 8 * 4;

    pub fn validate(&self) -> Result<()> {
        require!(
            self.max_premium_rate <= MAX_RATE_PER_SECOND,
            CreditError::InvalidConfig
        );
        require!(
            self.penalty_rate <= MAX_RATE_PER_SECOND,
            CreditError::InvalidConfig
        );
        require!(
            self.grace_period > 0
                && self.delinquency_period > 0
                && self.min_cycle_duration > 0
                && self.full_markdown_duration > 0,
            CreditError::InvalidConfig
        );
        Ok(())
    }

    /// Seconds after cycle end at which an unpaid obligation is in Default.
    pub fn default_after(&self) -> i64 {
        self.grace_period.saturating_add(self.delinquency_period)
    }
}

#[account]
#[derive(Default, Debug, PartialEq)]
pub struct Market {
    pub market_id: [u8; 32],
    pub loan_mint: Pubkey,
    pub oracle: Pubkey,
    pub credit_authority: Pubkey,
    pub vault: Pubkey,
    pub interest_model: InterestRateModelConfig,
    pub reward_mint: Option<Pubkey>,
    pub markdown_mode: MarkdownMode,
    pub fee_bps: u64,
    pub fee_recipient: Pubkey,
    pub total_supply_assets: u128,
    pub total_supply_shares: u128,
    pub total_borrow_assets: u128,
    pub total_borrow_shares: u128,
    pub pending_fee_shares: u128,
    pub total_markdown: u128, // sum of borrower markdown amounts
    pub last_update: i64,
    pub cycle_count: u64,
    pub last_cycle_end: i64,
    pub locked: bool, // set while a token CPI is in flight
    pub bump: u8,
    pub vault_bump: u8,
}

impl Market {
    pub const SIZE: usize = 8 + // discriminator
        32 + // market_id
        32 + // loan_mint
        32 + // oracle
        32 + // credit_authority
        32 + // vault
        InterestRateModelConfig::SIZE +
        1 + 32 + // reward_mint Option
        1 +  // markdown_mode
        8 +  // fee_bps
        32 + // fee_recipient
        16 + // total_supply_assets
        16 + // total_supply_shares
        16 + // total_borrow_assets
        16 + // total_borrow_shares
        16 + // pending_fee_shares
        16 + // total_markdown
        8 +  // last_update
        8 +  // cycle_count
        8 +  // last_cycle_end
        1 +  // locked
        1 +  // bump
        1;   // vault_bump

    /// Identity of a market: hash of its immutable configuration tuple.
    pub fn id_for(
        loan_mint: &Pubkey,
        oracle: &Pubkey,
        interest_model: &InterestRateModelConfig,
        credit_authority: &Pubkey,
    ) -> [u8; 32] {
        hashv(&[
            loan_mint.as_ref(),
            oracle.as_ref(),
            &interest_model.to_bytes(),
            credit_authority.as_ref(),
        ])
        .to_bytes()
    }

    pub fn available_liquidity(&self) -> u128 {
        self.total_supply_assets
            .saturating_sub(self.total_borrow_assets)
    }
}

/// Kinked base-rate model, annualized basis points.
#[derive(AnchorSerialize, AnchorDeserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InterestRateModelConfig {
    pub base_rate_bps: u64,
    pub slope1_bps: u64,
    pub slope2_bps: u64,
    pub kink_bps: u64,
}

impl InterestRateModelConfig {
    pub const SIZE: usize = 8 * 4;

    pub fn validate(&self) -> Result<()> {
        require!(
            self.base_rate_bps <= MAX_BASE_RATE_BPS,
            CreditError::InvalidConfig
        );
        require!(self.kink_bps <= BPS as u64, CreditError::InvalidConfig);
        Ok(())
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out[0..8].copy_from_slice(&self.base_rate_bps.to_le_bytes());
        out[8..16].copy_from_slice(&self.slope1_bps.to_le_bytes());
        out[16..24].copy_from_slice(&self.slope2_bps.to_le_bytes());
        out[24..32].copy_from_slice(&self.kink_bps.to_le_bytes());
        out
    }

    /// Base borrow rate for the given totals, WAD per second.
    pub fn borrow_rate(&self, total_supply: u128, total_borrow: u128) -> u128 {
        // utilization = borrowed / max(1, supply)
        let supply = total_supply.max(1);
        let util = total_borrow.saturating_mul(WAD) / supply;

        let to_wad = |bps: u64| (bps as u128) * WAD / BPS;
        let kink = to_wad(self.kink_bps);
        let base = to_wad(self.base_rate_bps);
        let slope1 = to_wad(self.slope1_bps);
        let slope2 = to_wad(self.slope2_bps);

        let annual = if util <= kink {
            base + math::wad_mul_down(util, slope1)
        } else {
            let pre = base + math::wad_mul_down(kink, slope1);
            pre + math::wad_mul_down(util - kink, slope2)
        };
        annual / SECONDS_PER_YEAR
    }
}

/// Per (market, borrower) unsecured position.
#[account]
#[derive(Default, Debug, PartialEq)]
pub struct CreditLine {
    pub market: Pubkey,
    pub borrower: Pubkey,
    pub credit_limit: u64,
    pub borrow_shares: u128,
    pub premium: BorrowerPremium,
    pub obligation: Obligation,
    pub markdown: MarkdownState,
    pub bump: u8,
}

impl CreditLine {
    pub const SIZE: usize = 8 + // discriminator
        32 + // market
        32 + // borrower
        8 +  // credit_limit
        16 + // borrow_shares
        BorrowerPremium::SIZE +
        Obligation::SIZE +
        MarkdownState::SIZE +
        1; // bump

    /// Owed assets at the market's current exchange rate, rounded up.
    pub fn owed_assets(&self, market: &Market) -> Result<u128> {
        math::to_assets_up(
            self.borrow_shares,
            market.total_borrow_assets,
            market.total_borrow_shares,
        )
    }
}

#[derive(AnchorSerialize, AnchorDeserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BorrowerPremium {
    /// Zero until the first borrow; a dormant line never accrues.
    pub last_accrual_time: i64,
    /// WAD per second
    pub premium_rate: u128,
    /// Owed assets as of `last_accrual_time`
    pub principal_snapshot: u128,
}

impl BorrowerPremium {
    pub const SIZE: usize = 8 + 16 + 16;

    pub fn is_initialized(&self) -> bool {
        self.last_accrual_time != 0
    }
}

/// Most recent unpaid cycle requirement. Transitions live in `cycle.rs`.
#[derive(AnchorSerialize, AnchorDeserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Obligation {
    #[default]
    None,
    Outstanding {
        cycle_id: u64,
        cycle_end_time: i64,
        amount_due: u64,
        ending_balance: u64,
    },
}

impl Obligation {
    pub const SIZE: usize = 1 + 8 + 8 + 8 + 8;
}

/// Derived each read from the obligation and `now`; never stored.
#[derive(AnchorSerialize, AnchorDeserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum RepaymentStatus {
    Current,
    Grace,
    Delinquent,
    Default,
}

impl RepaymentStatus {
    pub fn is_delinquent_or_worse(&self) -> bool {
        matches!(self, RepaymentStatus::Delinquent | RepaymentStatus::Default)
    }
}

#[derive(AnchorSerialize, AnchorDeserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MarkdownState {
    /// WAD fraction of the frozen balance considered uncollectible
    pub last_markdown_fraction: u128,
    /// Zero when no default episode is active
    pub default_start_time: i64,
    /// Cycle anchoring the current episode
    pub default_cycle_id: u64,
    /// Reward balance captured when the episode started
    pub reward_baseline: u64,
    pub reward_burned: u64,
    pub markdown_amount: u128,
}

impl MarkdownState {
    pub const SIZE: usize = 16 + 8 + 8 + 8 + 8 + 16;

    pub fn is_active(&self) -> bool {
        self.default_start_time != 0
    }
}

#[account]
#[derive(Default, Debug, PartialEq)]
pub struct SupplyPosition {
    pub market: Pubkey,
    pub owner: Pubkey,
    pub shares: u128,
    pub bump: u8,
}

impl SupplyPosition {
    pub const SIZE: usize = 8 + // discriminator
        32 + // market
        32 + // owner
        16 + // shares
        1;   // bump
}
