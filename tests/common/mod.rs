#![allow(dead_code)]

use std::sync::Mutex;

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use recurring_ledger::{
    config::{ConfigManager, EngineConfig},
    core::LedgerManager,
    domain::{BankAccount, NewTransaction, TransactionKind},
};
use rust_decimal::Decimal;
use tempfile::TempDir;
use uuid::Uuid;

/// Holds TempDir guards so temporary folders live for the duration of the test run.
static TEST_DIRS: Lazy<Mutex<Vec<TempDir>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// Batch size small enough to reason about windows by hand.
pub const TEST_BATCH_SIZE: usize = 10;

/// Manager plus one user owning two bank accounts.
pub struct TestLedger {
    pub manager: LedgerManager,
    pub user: Uuid,
    pub checking: BankAccount,
    pub savings: BankAccount,
}

impl TestLedger {
    pub fn balance_of(&self, account_id: Uuid) -> Decimal {
        self.manager
            .accounts()
            .get(self.user, account_id)
            .expect("account exists")
            .balance
    }

    pub fn earning(&self, date: NaiveDate, amount: Decimal) -> NewTransaction {
        NewTransaction::new(
            TransactionKind::Earning {
                bank_account_id: self.checking.id,
                category_id: Uuid::new_v4(),
            },
            date,
            amount,
            "Salary",
        )
    }

    pub fn debit(&self, date: NaiveDate, amount: Decimal) -> NewTransaction {
        NewTransaction::new(
            TransactionKind::DebitExpense {
                bank_account_id: self.checking.id,
                category_id: Uuid::new_v4(),
            },
            date,
            amount,
            "Groceries",
        )
    }

    pub fn transference(&self, date: NaiveDate, amount: Decimal) -> NewTransaction {
        NewTransaction::new(
            TransactionKind::Transference {
                origin_bank_account_id: self.checking.id,
                destiny_bank_account_id: self.savings.id,
            },
            date,
            amount,
            "Monthly saving",
        )
    }
}

pub fn setup_ledger() -> TestLedger {
    setup_ledger_with(EngineConfig::default().with_batch_size(TEST_BATCH_SIZE))
}

pub fn setup_ledger_with(config: EngineConfig) -> TestLedger {
    recurring_ledger::utils::init_tracing();
    let manager = LedgerManager::new(config).expect("valid config");
    let user = Uuid::new_v4();
    let checking = manager
        .accounts()
        .create(user, "Checking", Decimal::from(1000))
        .expect("create checking");
    let savings = manager
        .accounts()
        .create(user, "Savings", Decimal::ZERO)
        .expect("create savings");
    TestLedger {
        manager,
        user,
        checking,
        savings,
    }
}

/// Creates a config manager backed by a unique directory for each test.
pub fn setup_config_env() -> (ConfigManager, std::path::PathBuf) {
    let temp = TempDir::new().expect("create temp dir");
    let base = temp.path().to_path_buf();
    TEST_DIRS.lock().expect("lock temp dir registry").push(temp);
    let config_manager =
        ConfigManager::with_base_dir(base.clone()).expect("create config manager for temp dir");
    (config_manager, base)
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}
