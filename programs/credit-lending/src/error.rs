use anchor_lang::prelude::*;

#[error_code]
pub enum CreditError {
    // Authorization
    #[msg("Unauthorized access")]
    Unauthorized,

    // Invalid input
    #[msg("Borrower address must not be the default pubkey")]
    ZeroAddress,
    #[msg("Cycle end time must advance by at least the minimum cycle duration and not be in the future")]
    InvalidCycleEndTime,
    #[msg("Premium rate exceeds the protocol ceiling")]
    PremiumRateTooHigh,
    #[msg("Exactly one of assets or shares must be non-zero")]
    InconsistentInput,
    #[msg("Invalid amount - must be greater than zero")]
    ZeroAmount,
    #[msg("Invalid configuration")]
    InvalidConfig,
    #[msg("Market id does not match the market parameters")]
    InvalidMarketId,
    #[msg("Obligation entries do not match the credit line accounts")]
    LengthMismatch,
    #[msg("Invalid reward token account")]
    InvalidRewardAccount,
    #[msg("Credit line belongs to another market")]
    WrongMarket,
    #[msg("Credit line passed more than once")]
    DuplicateAccount,
    #[msg("Credit line account must be writable")]
    AccountNotWritable,

    // Insufficient state
    #[msg("Market has not been created")]
    MarketNotCreated,
    #[msg("Borrower has no credit line")]
    NoCreditLine,

    // Business rules
    #[msg("Repayment is smaller than the outstanding obligation")]
    PartialPaymentWhileObligationOutstanding,
    #[msg("Borrower has an outstanding repayment obligation")]
    OutstandingRepaymentObligation,
    #[msg("Borrow would exceed the credit limit")]
    CreditLimitExceeded,
    #[msg("Insufficient liquidity in market")]
    InsufficientLiquidity,
    #[msg("Repay amount exceeds debt")]
    RepayExceedsDebt,
    #[msg("Withdraw amount exceeds supplied shares")]
    InsufficientShares,
    #[msg("Market is locked by an in-flight token transfer")]
    ReentrantCall,

    // Arithmetic
    #[msg("Math overflow")]
    MathOverflow,
}
