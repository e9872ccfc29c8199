pub const PROTOCOL_CONFIG_SEED: &[u8] = b"protocol_config";
pub const MARKET_SEED: &[u8] = b"market";
pub const VAULT_SEED: &[u8] = b"vault";
pub const CREDIT_LINE_SEED: &[u8] = b"credit_line";
pub const SUPPLY_SEED: &[u8] = b"supply";

/// Market fee ceiling (25% of accrued interest)
pub const MAX_FEE_BPS: u64 = 2_500;

/// Ceiling for any configured per-second rate: 1000% annualized
pub const MAX_RATE_PER_SECOND: u128 = 10 * crate::math::WAD / crate::math::SECONDS_PER_YEAR;

/// Upper bound for base_rate_bps in the interest model
pub const MAX_BASE_RATE_BPS: u64 = 1_000_000;
