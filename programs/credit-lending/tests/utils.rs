use std::path::Path;

use anchor_lang::solana_program::program_pack::Pack;
use anchor_lang::{InstructionData, ToAccountMetas};
use anchor_spl::token::spl_token;
use litesvm::types::{FailedTransactionMetadata, TransactionMetadata};
use litesvm::LiteSVM;
use solana_sdk::{
    clock::Clock,
    instruction::{Instruction, InstructionError},
    pubkey::Pubkey,
    signature::{Keypair, Signer},
    system_instruction, system_program, sysvar,
    transaction::{Transaction, TransactionError},
};

use credit_lending::admin::CreateMarketParams;
use credit_lending::constants::*;
use credit_lending::math::annual_bps_to_per_second;
use credit_lending::policy::MarkdownMode;
use credit_lending::state::{CreditParams, InterestRateModelConfig, Market};

// Constants
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;
pub const T0: i64 = 1_700_000_000;
pub const DAY: i64 = 86_400;

const PROGRAM_PATH: &str = concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../../target/deploy/credit_lending.so"
);

/// Fresh VM with the program loaded and the clock at `T0`. None until `anchor build`
/// has produced the program binary.
pub fn setup() -> Option<LiteSVM> {
    if !Path::new(PROGRAM_PATH).exists() {
        eprintln!("skipping: {} not built", PROGRAM_PATH);
        return None;
    }
    let mut svm = LiteSVM::new();
    svm.add_program_from_file(credit_lending::ID, PROGRAM_PATH)
        .expect("program binary should load");
    set_time(&mut svm, T0);
    Some(svm)
}

pub fn set_time(svm: &mut LiteSVM, unix_timestamp: i64) {
    let mut clock = svm.get_sysvar::<Clock>();
    clock.unix_timestamp = unix_timestamp;
    svm.set_sysvar::<Clock>(&clock);
}

pub fn funded_keypair(svm: &mut LiteSVM) -> Keypair {
    let keypair = Keypair::new();
    svm.airdrop(&keypair.pubkey(), 10 * LAMPORTS_PER_SOL).unwrap();
    keypair
}

pub fn send(
    svm: &mut LiteSVM,
    instructions: &[Instruction],
    payer: &Keypair,
    signers: &[&Keypair],
) -> Result<TransactionMetadata, FailedTransactionMetadata> {
    let mut all: Vec<&Keypair> = vec![payer];
    all.extend(signers.iter().copied().filter(|s| s.pubkey() != payer.pubkey()));
    let tx = Transaction::new_signed_with_payer(
        instructions,
        Some(&payer.pubkey()),
        all.as_slice(),
        svm.latest_blockhash(),
    );
    svm.send_transaction(tx)
}

pub fn program_ix(accounts: impl ToAccountMetas, data: impl InstructionData) -> Instruction {
    Instruction {
        program_id: credit_lending::ID,
        accounts: accounts.to_account_metas(None),
        data: data.data(),
    }
}

/// Custom program error code carried by a failed transaction, if any.
pub fn custom_error(failed: &FailedTransactionMetadata) -> Option<u32> {
    match failed.err {
        TransactionError::InstructionError(_, InstructionError::Custom(code)) => Some(code),
        _ => None,
    }
}

/// Helper function
pub fn create_mint(svm: &mut LiteSVM, authority: &Pubkey, decimals: u8) -> Pubkey {
    let mint = Keypair::new();
    let payer = funded_keypair(svm);
    let rent = svm.minimum_balance_for_rent_exemption(spl_token::state::Mint::LEN);
    let create = system_instruction::create_account(
        &payer.pubkey(),
        &mint.pubkey(),
        rent,
        spl_token::state::Mint::LEN as u64,
        &spl_token::id(),
    );
    let init = spl_token::instruction::initialize_mint(
        &spl_token::id(),
        &mint.pubkey(),
        authority,
        None,
        decimals,
    )
    .unwrap();
    send(svm, &[create, init], &payer, &[&mint]).unwrap();
    mint.pubkey()
}

// Helper to create token accounts
pub fn create_token_account(svm: &mut LiteSVM, mint: &Pubkey, owner: &Pubkey) -> Pubkey {
    let account = Keypair::new();
    let payer = funded_keypair(svm);
    let rent = svm.minimum_balance_for_rent_exemption(spl_token::state::Account::LEN);
    let create = system_instruction::create_account(
        &payer.pubkey(),
        &account.pubkey(),
        rent,
        spl_token::state::Account::LEN as u64,
        &spl_token::id(),
    );
    let init =
        spl_token::instruction::initialize_account(&spl_token::id(), &account.pubkey(), mint, owner)
            .unwrap();
    send(svm, &[create, init], &payer, &[&account]).unwrap();
    account.pubkey()
}

// Helper to mint tokens
pub fn mint_tokens(svm: &mut LiteSVM, mint: &Pubkey, to: &Pubkey, authority: &Keypair, amount: u64) {
    let ix = spl_token::instruction::mint_to(
        &spl_token::id(),
        mint,
        to,
        &authority.pubkey(),
        &[],
        amount,
    )
    .unwrap();
    let payer = funded_keypair(svm);
    send(svm, &[ix], &payer, &[authority]).unwrap();
}

pub fn token_account(svm: &LiteSVM, address: &Pubkey) -> spl_token::state::Account {
    let account = svm.get_account(address).unwrap();
    spl_token::state::Account::unpack(&account.data).unwrap()
}

pub fn read_account<T: anchor_lang::AccountDeserialize>(svm: &LiteSVM, address: &Pubkey) -> T {
    let account = svm.get_account(address).unwrap();
    T::try_deserialize(&mut account.data.as_slice()).unwrap()
}

// PDA derivation functions
pub fn protocol_config_pda() -> Pubkey {
    Pubkey::find_program_address(&[PROTOCOL_CONFIG_SEED], &credit_lending::ID).0
}

pub fn market_pda(market_id: &[u8; 32]) -> Pubkey {
    Pubkey::find_program_address(&[MARKET_SEED, market_id.as_ref()], &credit_lending::ID).0
}

pub fn vault_pda(market: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(&[VAULT_SEED, market.as_ref()], &credit_lending::ID).0
}

pub fn credit_line_pda(market: &Pubkey, borrower: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(
        &[CREDIT_LINE_SEED, market.as_ref(), borrower.as_ref()],
        &credit_lending::ID,
    )
    .0
}

pub fn supply_pda(market: &Pubkey, owner: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(&[SUPPLY_SEED, market.as_ref(), owner.as_ref()], &credit_lending::ID).0
}

pub fn credit_params() -> CreditParams {
    CreditParams {
        max_premium_rate: annual_bps_to_per_second(5_000),
        penalty_rate: annual_bps_to_per_second(1_000),
        grace_period: 7 * DAY,
        delinquency_period: 23 * DAY,
        min_cycle_duration: 7 * DAY,
        full_markdown_duration: 90 * DAY,
    }
}

/// A market whose admin is also its credit authority.
pub struct TestMarket {
    pub admin: Keypair,
    pub market: Pubkey,
    pub vault: Pubkey,
    pub loan_mint: Pubkey,
    pub reward_mint: Pubkey,
}

pub fn create_market(svm: &mut LiteSVM) -> TestMarket {
    let admin = funded_keypair(svm);
    let protocol_config = protocol_config_pda();
    let init = program_ix(
        credit_lending::accounts::InitializeProtocol {
            protocol_config,
            authority: admin.pubkey(),
            system_program: system_program::ID,
        },
        credit_lending::instruction::InitializeProtocol {
            params: credit_params(),
        },
    );
    send(svm, &[init], &admin, &[]).expect("protocol init should succeed");

    let loan_mint = create_mint(svm, &admin.pubkey(), 6);
    let reward_mint = create_mint(svm, &admin.pubkey(), 9);
    let oracle = Pubkey::new_unique();
    let interest_model = InterestRateModelConfig {
        base_rate_bps: 200,
        slope1_bps: 1_000,
        slope2_bps: 10_000,
        kink_bps: 8_000,
    };
    let market_id = Market::id_for(&loan_mint, &oracle, &interest_model, &admin.pubkey());
    let market = market_pda(&market_id);
    let vault = vault_pda(&market);
    let create = program_ix(
        credit_lending::accounts::CreateMarket {
            market,
            loan_mint,
            vault,
            payer: admin.pubkey(),
            token_program: spl_token::id(),
            system_program: system_program::ID,
            rent: sysvar::rent::ID,
        },
        credit_lending::instruction::CreateMarket {
            params: CreateMarketParams {
                market_id,
                oracle,
                credit_authority: admin.pubkey(),
                interest_model,
                fee_bps: 1_000,
                fee_recipient: Pubkey::new_unique(),
                reward_mint: Some(reward_mint),
                markdown_mode: MarkdownMode::Linear,
            },
        },
    );
    send(svm, &[create], &admin, &[]).expect("market creation should succeed");

    TestMarket {
        admin,
        market,
        vault,
        loan_mint,
        reward_mint,
    }
}

impl TestMarket {
    pub fn set_credit_line(&self, svm: &mut LiteSVM, borrower: &Pubkey, limit: u64) -> Pubkey {
        let credit_line = credit_line_pda(&self.market, borrower);
        let ix = program_ix(
            credit_lending::accounts::SetCreditLine {
                market: self.market,
                protocol_config: protocol_config_pda(),
                credit_line,
                borrower: *borrower,
                credit_authority: self.admin.pubkey(),
                system_program: system_program::ID,
            },
            credit_lending::instruction::SetCreditLine {
                credit_limit: limit,
                premium_rate: annual_bps_to_per_second(800),
            },
        );
        send(svm, &[ix], &self.admin, &[]).expect("credit line should be set");
        credit_line
    }

    /// Mint loan tokens to a fresh supplier and deposit them.
    pub fn supply(&self, svm: &mut LiteSVM, assets: u64) {
        let supplier = funded_keypair(svm);
        let source = create_token_account(svm, &self.loan_mint, &supplier.pubkey());
        mint_tokens(svm, &self.loan_mint, &source, &self.admin, assets);
        let ix = program_ix(
            credit_lending::accounts::Supply {
                market: self.market,
                position: supply_pda(&self.market, &supplier.pubkey()),
                supplier: supplier.pubkey(),
                supplier_token_account: source,
                vault: self.vault,
                token_program: spl_token::id(),
                system_program: system_program::ID,
            },
            credit_lending::instruction::Supply { assets, shares: 0 },
        );
        send(svm, &[ix], &supplier, &[]).expect("supply should succeed");
    }

    pub fn borrow(&self, svm: &mut LiteSVM, borrower: &Keypair, assets: u64) {
        let receiver = create_token_account(svm, &self.loan_mint, &borrower.pubkey());
        let ix = program_ix(
            credit_lending::accounts::Borrow {
                market: self.market,
                protocol_config: protocol_config_pda(),
                credit_line: credit_line_pda(&self.market, &borrower.pubkey()),
                borrower: borrower.pubkey(),
                receiver,
                vault: self.vault,
                token_program: spl_token::id(),
            },
            credit_lending::instruction::Borrow { assets, shares: 0 },
        );
        send(svm, &[ix], borrower, &[]).expect("borrow should succeed");
    }
}
