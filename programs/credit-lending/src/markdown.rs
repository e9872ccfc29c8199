// Default episodes: markdown of the frozen cycle balance and proportional burn of the
// borrower's reward tokens. Settlement writes the line off and closes the episode for good.

use anchor_lang::prelude::*;
use anchor_lang::solana_program::program_option::COption;
use anchor_spl::token::{self, Burn, Mint, Token, TokenAccount};

use crate::accrual::{self, AccrualOutcome};
use crate::constants::*;
use crate::cycle::repayment_status;
use crate::error::CreditError;
use crate::math::{self, wad_mul_down, wad_mul_up, WAD};
use crate::policy::{ConfiguredMarkdown, MarkdownModel};
use crate::pool::{self, MarketAccrual};
use crate::state::*;

impl MarkdownState {
    /// Reward tokens that should be gone at the current fraction, rounded up.
    pub fn target_burned(&self) -> u64 {
        wad_mul_up(self.reward_baseline as u128, self.last_markdown_fraction.min(WAD))
            .min(self.reward_baseline as u128) as u64
    }

    /// Burn still owed, capped by what the program can actually burn.
    pub fn reward_burn_due(&self, burnable: u64) -> u64 {
        self.target_burned()
            .saturating_sub(self.reward_burned)
            .min(burnable)
    }

    pub fn record_burn(&mut self, amount: u64) {
        self.reward_burned = self.reward_burned.saturating_add(amount);
    }
}

/// Snapshot of an episode at the moment it ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MarkdownExit {
    pub fraction: u128,
    pub markdown_amount: u128,
    pub reward_burned: u64,
    pub default_start_time: i64,
}

/// End the active episode, if any, and drop its markdown from the market total.
pub fn exit_default(market: &mut Market, state: &mut MarkdownState) -> Option<MarkdownExit> {
    if !state.is_active() {
        return None;
    }
    let exit = MarkdownExit {
        fraction: state.last_markdown_fraction,
        markdown_amount: state.markdown_amount,
        reward_burned: state.reward_burned,
        default_start_time: state.default_start_time,
    };
    market.total_markdown = market.total_markdown.saturating_sub(state.markdown_amount);
    *state = MarkdownState::default();
    Some(exit)
}

/// Exit when the line is no longer in Default.
pub fn exit_if_cured(
    market: &mut Market,
    state: &mut MarkdownState,
    status: RepaymentStatus,
) -> Option<MarkdownExit> {
    if status == RepaymentStatus::Default {
        return None;
    }
    exit_default(market, state)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MarkdownUpdate {
    pub status: RepaymentStatus,
    pub entered: bool,
    pub exited: Option<MarkdownExit>,
    pub fraction_before: u128,
    pub fraction_after: u128,
    pub markdown_before: u128,
    pub markdown_after: u128,
}

/// Moment an obligation anchored at `cycle_end_time` turns Default.
pub fn default_onset(cycle_end_time: i64, params: &CreditParams) -> i64 {
    cycle_end_time.saturating_add(params.default_after())
}

/// Bring a line's markdown in line with its status at `now`.
///
/// Entering Default starts an episode anchored to the obligation's cycle and captures the
/// reward baseline. The episode clock starts at the default onset, not at the sync, so
/// the fraction only depends on time spent in Default. While in Default the fraction
/// only grows. Leaving Default, or an episode left over from an older cycle, resets
/// everything.
pub fn sync_markdown<M: MarkdownModel>(
    market: &mut Market,
    line: &mut CreditLine,
    params: &CreditParams,
    model: &M,
    now: i64,
    reward_balance: u64,
) -> MarkdownUpdate {
    let (status, _) = repayment_status(&line.obligation, params, now);
    let state = &mut line.markdown;
    let mut update = MarkdownUpdate {
        status,
        entered: false,
        exited: None,
        fraction_before: state.last_markdown_fraction,
        fraction_after: state.last_markdown_fraction,
        markdown_before: state.markdown_amount,
        markdown_after: state.markdown_amount,
    };

    let (cycle_id, cycle_end_time, ending_balance) = match line.obligation {
        Obligation::Outstanding {
            cycle_id,
            cycle_end_time,
            ending_balance,
            ..
        } if status == RepaymentStatus::Default => (cycle_id, cycle_end_time, ending_balance),
        _ => {
            update.exited = exit_default(market, state);
            update.fraction_after = 0;
            update.markdown_after = 0;
            return update;
        }
    };

    if state.is_active() && state.default_cycle_id != cycle_id {
        update.exited = exit_default(market, state);
    }
    if !state.is_active() {
        state.default_start_time = default_onset(cycle_end_time, params);
        state.default_cycle_id = cycle_id;
        state.reward_baseline = reward_balance;
        update.entered = true;
    }
    update.fraction_before = state.last_markdown_fraction;
    update.markdown_before = state.markdown_amount;

    let computed = model.fraction(now.saturating_sub(state.default_start_time));
    state.last_markdown_fraction = state.last_markdown_fraction.max(computed).min(WAD);
    state.markdown_amount = wad_mul_down(ending_balance as u128, state.last_markdown_fraction);
    market.total_markdown = market
        .total_markdown
        .saturating_sub(update.markdown_before)
        .saturating_add(state.markdown_amount);

    update.fraction_after = state.last_markdown_fraction;
    update.markdown_after = state.markdown_amount;
    update
}

/// Reward tokens the market PDA may burn: the delegated part of the borrower's balance.
pub fn burnable_balance(account: &TokenAccount, market_key: &Pubkey) -> u64 {
    match account.delegate {
        COption::Some(delegate) if delegate == *market_key => {
            account.amount.min(account.delegated_amount)
        }
        _ => 0,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SettlementOutcome {
    pub written_off_assets: u128,
    pub written_off_shares: u128,
    pub fraction_before: u128,
    pub markdown_exit: Option<MarkdownExit>,
    pub base: MarketAccrual,
    pub accrual: AccrualOutcome,
}

/// Write off the line's remaining debt against suppliers and close it.
pub fn execute_settlement(
    market_key: &Pubkey,
    market: &mut Market,
    line: &mut CreditLine,
    params: &CreditParams,
    now: i64,
) -> Result<SettlementOutcome> {
    let base = pool::accrue_market(market, now)?;
    let accrual = accrual::accrue_borrower(market_key, market, line, params, now)?;

    let fraction_before = line.markdown.last_markdown_fraction;
    let shares = line.borrow_shares;
    let assets = line.owed_assets(market)?.min(market.total_borrow_assets);

    market.total_borrow_shares = market.total_borrow_shares.saturating_sub(shares);
    market.total_borrow_assets = market.total_borrow_assets.saturating_sub(assets);
    market.total_supply_assets = market.total_supply_assets.saturating_sub(assets);

    line.borrow_shares = 0;
    line.obligation = Obligation::None;
    let markdown_exit = exit_default(market, &mut line.markdown);
    line.markdown = MarkdownState::default();
    line.credit_limit = 0;
    line.premium.principal_snapshot = 0;
    if line.premium.is_initialized() {
        line.premium.last_accrual_time = now;
    }

    Ok(SettlementOutcome {
        written_off_assets: assets,
        written_off_shares: shares,
        fraction_before,
        markdown_exit,
        base,
        accrual,
    })
}

/// Validate the optional reward accounts against the market and the line's borrower.
/// Returns (balance, burnable); both zero for markets without a reward mint.
fn reward_balances(
    market: &Account<Market>,
    line: &CreditLine,
    reward_mint: &Option<Account<Mint>>,
    reward_account: &Option<Account<TokenAccount>>,
) -> Result<(u64, u64)> {
    let Some(expected_mint) = market.reward_mint else {
        return Ok((0, 0));
    };
    let mint = reward_mint.as_ref().ok_or(CreditError::InvalidRewardAccount)?;
    let account = reward_account.as_ref().ok_or(CreditError::InvalidRewardAccount)?;
    require_keys_eq!(mint.key(), expected_mint, CreditError::InvalidRewardAccount);
    require_keys_eq!(account.mint, expected_mint, CreditError::InvalidRewardAccount);
    require_keys_eq!(account.owner, line.borrower, CreditError::InvalidRewardAccount);
    Ok((account.amount, burnable_balance(account, &market.key())))
}

fn burn_reward<'info>(
    market: &Account<'info, Market>,
    mint: &Account<'info, Mint>,
    from: &Account<'info, TokenAccount>,
    token_program: &Program<'info, Token>,
    amount: u64,
) -> Result<()> {
    let bump = [market.bump];
    let seeds: &[&[u8]] = &[MARKET_SEED, market.market_id.as_ref(), &bump];
    let signer = &[seeds];
    let cpi_accounts = Burn {
        mint: mint.to_account_info(),
        from: from.to_account_info(),
        authority: market.to_account_info(),
    };
    token::burn(
        CpiContext::new_with_signer(token_program.to_account_info(), cpi_accounts, signer),
        amount,
    )
}

pub(crate) fn emit_default_exit(market: &Pubkey, borrower: &Pubkey, exit: &MarkdownExit, now: i64) {
    emit!(DefaultExited {
        market: *market,
        borrower: *borrower,
        fraction: exit.fraction,
        markdown_amount: exit.markdown_amount,
        reward_burned: exit.reward_burned,
        default_start_time: exit.default_start_time,
        exited_at: now,
    });
}

pub fn update_markdown(ctx: Context<UpdateMarkdown>) -> Result<()> {
    let now = Clock::get()?.unix_timestamp;
    let params = ctx.accounts.protocol_config.params;
    let market_key = ctx.accounts.market.key();
    let (reward_balance, burnable) = reward_balances(
        &ctx.accounts.market,
        &ctx.accounts.credit_line,
        &ctx.accounts.reward_mint,
        &ctx.accounts.borrower_reward_account,
    )?;
    let model = ConfiguredMarkdown::resolve(ctx.accounts.market.markdown_mode, &params);

    let market = &mut ctx.accounts.market;
    let line = &mut ctx.accounts.credit_line;
    let borrower = line.borrower;
    let base = pool::accrue_market(market, now)?;
    let accrued = accrual::accrue_borrower(&market_key, market, line, &params, now)?;
    pool::emit_market_accrual(&market_key, &base);
    accrual::emit_premium_accrual(&market_key, &borrower, &accrued);

    let update = sync_markdown(market, line, &params, &model, now, reward_balance);

    if let Some(exit) = update.exited {
        emit_default_exit(&market_key, &borrower, &exit, now);
    }
    if update.entered {
        emit!(DefaultEntered {
            market: market_key,
            borrower,
            cycle_id: line.markdown.default_cycle_id,
            default_start_time: line.markdown.default_start_time,
            reward_baseline: line.markdown.reward_baseline,
        });
    }
    if update.fraction_after != update.fraction_before || update.markdown_after != update.markdown_before {
        emit!(MarkdownUpdated {
            market: market_key,
            borrower,
            fraction_before: update.fraction_before,
            fraction_after: update.fraction_after,
            markdown_amount: update.markdown_after,
            total_markdown: market.total_markdown,
        });
    }

    let burn = line.markdown.reward_burn_due(burnable);
    if burn == 0 {
        return Ok(());
    }
    line.markdown.record_burn(burn);
    let total_burned = line.markdown.reward_burned;
    pool::lock_market(market)?;
    line.exit(&crate::ID)?;

    if let (Some(mint), Some(from)) = (&ctx.accounts.reward_mint, &ctx.accounts.borrower_reward_account) {
        burn_reward(&ctx.accounts.market, mint, from, &ctx.accounts.token_program, burn)?;
    }
    ctx.accounts.market.locked = false;

    emit!(RewardBurned {
        market: market_key,
        borrower,
        amount: burn,
        total_burned,
    });
    msg!("Burned {} reward tokens for defaulted borrower", burn);
    Ok(())
}

pub fn settle_credit_line(ctx: Context<SettleCreditLine>) -> Result<()> {
    let now = Clock::get()?.unix_timestamp;
    let params = ctx.accounts.protocol_config.params;
    let market_key = ctx.accounts.market.key();
    let (_, burnable) = reward_balances(
        &ctx.accounts.market,
        &ctx.accounts.credit_line,
        &ctx.accounts.reward_mint,
        &ctx.accounts.borrower_reward_account,
    )?;

    let market = &mut ctx.accounts.market;
    let line = &mut ctx.accounts.credit_line;
    let borrower = line.borrower;
    let outcome = execute_settlement(&market_key, market, line, &params, now)?;

    pool::emit_market_accrual(&market_key, &outcome.base);
    accrual::emit_premium_accrual(&market_key, &borrower, &outcome.accrual);
    emit!(MarkdownUpdated {
        market: market_key,
        borrower,
        fraction_before: outcome.fraction_before,
        fraction_after: WAD,
        markdown_amount: outcome.written_off_assets,
        total_markdown: market.total_markdown,
    });
    if let Some(exit) = outcome.markdown_exit {
        emit_default_exit(&market_key, &borrower, &exit, now);
    }

    if burnable > 0 {
        pool::lock_market(market)?;
        line.exit(&crate::ID)?;
        if let (Some(mint), Some(from)) = (&ctx.accounts.reward_mint, &ctx.accounts.borrower_reward_account) {
            burn_reward(&ctx.accounts.market, mint, from, &ctx.accounts.token_program, burnable)?;
        }
        ctx.accounts.market.locked = false;
        emit!(RewardBurned {
            market: market_key,
            borrower,
            amount: burnable,
            total_burned: burnable,
        });
    }

    emit!(CreditLineSettled {
        market: market_key,
        borrower,
        written_off_assets: math::to_u64(outcome.written_off_assets)?,
        written_off_shares: outcome.written_off_shares,
        reward_burned: burnable,
    });
    msg!("Credit line settled, {} written off", outcome.written_off_assets);
    Ok(())
}

#[derive(Accounts)]
pub struct UpdateMarkdown<'info> {
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
    #[account(mut)]
    pub reward_mint: Option<Account<'info, Mint>>,
    #[account(mut)]
    pub borrower_reward_account: Option<Account<'info, TokenAccount>>,
    pub token_program: Program<'info, Token>,
}

#[derive(Accounts)]
pub struct SettleCreditLine<'info> {
    #[account(
        mut,
        has_one = credit_authority @ CreditError::Unauthorized,
        constraint = !market.locked @ CreditError::ReentrantCall
    )]
    pub market: Account<'info, Market>,
    #[account(seeds = [PROTOCOL_CONFIG_SEED], bump = protocol_config.bump)]
    pub protocol_config: Account<'info, ProtocolConfig>,
    #[account(
        mut,
        seeds = [CREDIT_LINE_SEED, market.key().as_ref(), credit_line.borrower.as_ref()],
        bump = credit_line.bump
    )]
    pub credit_line: Account<'info, CreditLine>,
    pub credit_authority: Signer<'info>,
    #[account(mut)]
    pub reward_mint: Option<Account<'info, Mint>>,
    #[account(mut)]
    pub borrower_reward_account: Option<Account<'info, TokenAccount>>,
    pub token_program: Program<'info, Token>,
}

#[event]
pub struct DefaultEntered {
    pub market: Pubkey,
    pub borrower: Pubkey,
    pub cycle_id: u64,
    pub default_start_time: i64,
    pub reward_baseline: u64,
}

#[event]
pub struct MarkdownUpdated {
    pub market: Pubkey,
    pub borrower: Pubkey,
    pub fraction_before: u128,
    pub fraction_after: u128,
    pub markdown_amount: u128,
    pub total_markdown: u128,
}

#[event]
pub struct RewardBurned {
    pub market: Pubkey,
    pub borrower: Pubkey,
    pub amount: u64,
    pub total_burned: u64,
}

#[event]
pub struct DefaultExited {
    pub market: Pubkey,
    pub borrower: Pubkey,
    pub fraction: u128,
    pub markdown_amount: u128,
    pub reward_burned: u64,
    pub default_start_time: i64,
    pub exited_at: i64,
}

#[event]
pub struct CreditLineSettled {
    pub market: Pubkey,
    pub borrower: Pubkey,
    pub written_off_assets: u64,
    pub written_off_shares: u128,
    pub reward_burned: u64,
}

#[cfg(test)]
mod tests {
    use anchor_lang::solana_program::program_pack::Pack;
    use anchor_spl::token::spl_token::state::{Account as SplTokenAccount, AccountState};

    use super::*;
    use crate::policy::LinearMarkdown;

    const T0: i64 = 1_700_000_000;
    const DAY: i64 = 86_400;

    fn params() -> CreditParams {
        CreditParams {
            grace_period: 7 * DAY,
            delinquency_period: 23 * DAY,
            min_cycle_duration: DAY,
            full_markdown_duration: 90 * DAY,
            ..Default::default()
        }
    }

    fn model() -> LinearMarkdown {
        LinearMarkdown { full_duration: 90 * DAY }
    }

    fn defaulted_line(cycle_id: u64, cycle_end: i64, balance: u64) -> CreditLine {
        CreditLine {
            obligation: Obligation::Outstanding {
                cycle_id,
                cycle_end_time: cycle_end,
                amount_due: balance / 10,
                ending_balance: balance,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_fraction_grows_and_tracks_total() {
        let mut m = Market::default();
        let mut line = defaulted_line(1, T0, 20_000);
        let default_at = T0 + 30 * DAY;

        let entered = sync_markdown(&mut m, &mut line, &params(), &model(), default_at, 0);
        assert!(entered.entered);
        assert_eq!(line.markdown.default_start_time, default_at);
        assert_eq!(line.markdown.markdown_amount, 0);

        let half = sync_markdown(&mut m, &mut line, &params(), &model(), default_at + 45 * DAY, 0);
        assert!(!half.entered);
        assert_eq!(half.fraction_after, WAD / 2);
        assert_eq!(line.markdown.markdown_amount, 10_000);
        assert_eq!(m.total_markdown, 10_000);

        let full = sync_markdown(&mut m, &mut line, &params(), &model(), default_at + 200 * DAY, 0);
        assert_eq!(full.fraction_after, WAD);
        assert_eq!(m.total_markdown, 20_000);
    }

    #[test]
    fn test_not_in_default_stays_clean() {
        let mut m = Market::default();
        let mut line = defaulted_line(1, T0, 20_000);
        let update = sync_markdown(&mut m, &mut line, &params(), &model(), T0 + 10 * DAY, 500);
        assert_eq!(update.status, RepaymentStatus::Delinquent);
        assert!(!update.entered);
        assert_eq!(line.markdown, MarkdownState::default());
    }

    #[test]
    fn test_cure_resets_episode() {
        let mut m = Market::default();
        let mut line = defaulted_line(1, T0, 20_000);
        sync_markdown(&mut m, &mut line, &params(), &model(), T0 + 30 * DAY, 0);
        sync_markdown(&mut m, &mut line, &params(), &model(), T0 + 60 * DAY, 0);
        assert!(m.total_markdown > 0);

        line.obligation = Obligation::None;
        let update = sync_markdown(&mut m, &mut line, &params(), &model(), T0 + 61 * DAY, 0);
        let exit = update.exited.unwrap();
        assert_eq!(exit.fraction, WAD / 3);
        assert_eq!(line.markdown, MarkdownState::default());
        assert_eq!(m.total_markdown, 0);
    }

    #[test]
    fn test_reward_baseline_resets_between_episodes() {
        let mut m = Market::default();
        let mut line = defaulted_line(1, T0, 20_000);
        let first_default = T0 + 30 * DAY;

        sync_markdown(&mut m, &mut line, &params(), &model(), first_default, 1_000);
        sync_markdown(&mut m, &mut line, &params(), &model(), first_default + 45 * DAY, 1_000);
        let due = line.markdown.reward_burn_due(1_000);
        assert_eq!(due, 500);
        line.markdown.record_burn(due);
        assert_eq!(line.markdown.reward_burn_due(500), 0);

        // Cured, then a later cycle defaults with a smaller reward balance.
        line.obligation = Obligation::None;
        sync_markdown(&mut m, &mut line, &params(), &model(), first_default + 50 * DAY, 500);
        assert_eq!(line.markdown.reward_burned, 0);

        let second_end = first_default + 100 * DAY;
        line.obligation = defaulted_line(5, second_end, 20_000).obligation;
        let second_default = second_end + 30 * DAY;
        let update = sync_markdown(&mut m, &mut line, &params(), &model(), second_default, 200);
        assert!(update.entered);
        assert_eq!(line.markdown.reward_baseline, 200);
        sync_markdown(&mut m, &mut line, &params(), &model(), second_default + 45 * DAY, 200);
        assert_eq!(line.markdown.reward_burn_due(200), 100);
    }

    #[test]
    fn test_stale_episode_replaced_for_new_cycle() {
        let mut m = Market::default();
        let mut line = defaulted_line(1, T0, 20_000);
        sync_markdown(&mut m, &mut line, &params(), &model(), T0 + 60 * DAY, 300);
        assert_eq!(line.markdown.default_cycle_id, 1);

        // Obligation cleared and re-posted between two syncs.
        let later = T0 + 200 * DAY;
        line.obligation = defaulted_line(4, later - 40 * DAY, 8_000).obligation;
        let update = sync_markdown(&mut m, &mut line, &params(), &model(), later, 300);
        assert!(update.exited.is_some());
        assert!(update.entered);
        assert_eq!(line.markdown.default_cycle_id, 4);
        // The new cycle turned Default ten days before this sync.
        assert_eq!(line.markdown.default_start_time, later - 10 * DAY);
        assert_eq!(line.markdown.markdown_amount, 888);
        assert_eq!(m.total_markdown, 888);
    }

    #[test]
    fn test_fraction_independent_of_sync_time() {
        let onset = T0 + 30 * DAY;
        let mut m_early = Market::default();
        let mut early = defaulted_line(1, T0, 20_000);
        let mut m_late = Market::default();
        let mut late = defaulted_line(1, T0, 20_000);

        sync_markdown(&mut m_early, &mut early, &params(), &model(), onset, 0);
        let first_seen = sync_markdown(&mut m_late, &mut late, &params(), &model(), onset + 60 * DAY, 0);
        assert!(first_seen.entered);
        assert_eq!(late.markdown.default_start_time, onset);
        assert_eq!(first_seen.fraction_after, 60 * DAY as u128 * WAD / (90 * DAY as u128));

        let a = sync_markdown(&mut m_early, &mut early, &params(), &model(), onset + 90 * DAY, 0);
        let b = sync_markdown(&mut m_late, &mut late, &params(), &model(), onset + 90 * DAY, 0);
        assert_eq!(a.fraction_after, WAD);
        assert_eq!(b.fraction_after, WAD);
        assert_eq!(early.markdown, late.markdown);
        assert_eq!(m_early.total_markdown, m_late.total_markdown);
    }

    fn reward_account(amount: u64, delegate: Option<Pubkey>, delegated_amount: u64) -> TokenAccount {
        let state = SplTokenAccount {
            mint: Pubkey::new_unique(),
            owner: Pubkey::new_unique(),
            amount,
            delegate: delegate.map_or(COption::None, COption::Some),
            state: AccountState::Initialized,
            is_native: COption::None,
            delegated_amount,
            close_authority: COption::None,
        };
        let mut data = [0u8; SplTokenAccount::LEN];
        SplTokenAccount::pack(state, &mut data).unwrap();
        TokenAccount::try_deserialize_unchecked(&mut &data[..]).unwrap()
    }

    #[test]
    fn test_burnable_is_delegated_balance() {
        let market_key = Pubkey::new_unique();
        assert_eq!(burnable_balance(&reward_account(1_000, None, 0), &market_key), 0);
        assert_eq!(
            burnable_balance(&reward_account(1_000, Some(Pubkey::new_unique()), 1_000), &market_key),
            0
        );
        assert_eq!(
            burnable_balance(&reward_account(1_000, Some(market_key), 300), &market_key),
            300
        );
        // Approval larger than the balance only covers what is there.
        assert_eq!(
            burnable_balance(&reward_account(1_000, Some(market_key), 5_000), &market_key),
            1_000
        );
    }

    #[test]
    fn test_burn_due_capped_by_burnable() {
        let state = MarkdownState {
            last_markdown_fraction: WAD / 2,
            default_start_time: T0,
            reward_baseline: 1_000,
            ..Default::default()
        };
        assert_eq!(state.target_burned(), 500);
        assert_eq!(state.reward_burn_due(120), 120);
        assert_eq!(state.reward_burn_due(0), 0);
    }

    #[test]
    fn test_settlement_socializes_loss() {
        let key = Pubkey::new_unique();
        let mut m = Market {
            last_update: T0,
            ..Default::default()
        };
        let mut lp = SupplyPosition::default();
        pool::execute_supply(&mut m, &mut lp, 100_000, 0, T0).unwrap();
        let mut line = CreditLine {
            market: key,
            borrower: Pubkey::new_unique(),
            credit_limit: 50_000,
            ..Default::default()
        };
        pool::execute_borrow(&key, &mut m, &mut line, &params(), 20_000, 0, T0).unwrap();
        line.obligation = Obligation::None.post(1, T0 + DAY, 2_000, 20_000);
        sync_markdown(&mut m, &mut line, &params(), &model(), T0 + 31 * DAY, 0);
        sync_markdown(&mut m, &mut line, &params(), &model(), T0 + 40 * DAY, 0);
        assert_eq!(m.total_markdown, 2_000);

        let outcome = execute_settlement(&key, &mut m, &mut line, &params(), T0 + 40 * DAY).unwrap();
        assert_eq!(outcome.written_off_assets, 20_000);
        assert!(outcome.markdown_exit.is_some());
        assert_eq!(m.total_borrow_assets, 0);
        assert_eq!(m.total_borrow_shares, 0);
        assert_eq!(m.total_supply_assets, 80_000);
        assert_eq!(m.total_markdown, 0);
        assert_eq!(line.borrow_shares, 0);
        assert_eq!(line.credit_limit, 0);
        assert_eq!(line.obligation, Obligation::None);
        assert_eq!(line.markdown, MarkdownState::default());
    }
}
