//! Storage contracts consumed by the recurrence engine, plus the in-memory reference
//! implementation and JSON snapshots of it.

pub mod memory;
pub mod snapshot;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::{BankAccount, Transaction, TransactionPatch};
use crate::errors::LedgerError;

pub type Result<T> = std::result::Result<T, LedgerError>;

pub use memory::InMemoryStore;
pub use snapshot::{load_snapshot_from_path, save_snapshot_to_path, StoreSnapshot};

/// Transaction storage operations needed by the services and the materializer.
pub trait TransactionRepository: Send + Sync {
    fn create(&self, transaction: Transaction) -> Result<Transaction>;
    fn update(&self, transaction: &Transaction) -> Result<()>;
    /// Removes the row, returning it when it existed.
    fn delete(&self, id: Uuid) -> Result<Option<Transaction>>;
    fn find_unique_from_user_by_id(&self, user_id: Uuid, id: Uuid) -> Result<Option<Transaction>>;
    /// Looks up a recurring root (no `origin_id`, recurrence rule present).
    fn find_unique_origin_transaction_by_id(&self, id: Uuid) -> Result<Option<Transaction>>;
    /// Every recurring root in storage, across users.
    fn find_many_recurring_roots(&self) -> Result<Vec<Transaction>>;
    /// Occurrences of the series rooted at `origin_id`, oldest first.
    fn find_many_by_origin(&self, origin_id: Uuid) -> Result<Vec<Transaction>>;
    /// Generates the next batch of occurrences for `root`, starting after `base_date`
    /// (the root's own date when `None`). Returns how many rows were inserted; a batch
    /// already generated from the same base date is not generated twice.
    fn create_many_of_recurrence(
        &self,
        root: &Transaction,
        base_date: Option<NaiveDate>,
    ) -> Result<usize>;
    /// Occurrence anchoring the next rolling-job firing: the one half a batch back from
    /// the newest occurrence.
    fn find_unique_middle_of_current_recurrence(
        &self,
        origin_id: Uuid,
    ) -> Result<Option<Transaction>>;
    /// Newest occurrence of the series.
    fn find_unique_end_of_current_recurrence(
        &self,
        origin_id: Uuid,
    ) -> Result<Option<Transaction>>;
    fn update_many_accomplished(
        &self,
        root: &Transaction,
        patch: &TransactionPatch,
    ) -> Result<usize>;
    fn update_many_pending(&self, root: &Transaction, patch: &TransactionPatch) -> Result<usize>;
    /// Removes accomplished occurrences, returning them so their balance effect can be reversed.
    fn delete_many_accomplished(&self, root: &Transaction) -> Result<Vec<Transaction>>;
    fn delete_many_pending(&self, root: &Transaction) -> Result<usize>;
    /// Clears `origin_id` on every row still linked to `root`.
    fn detach_occurrences(&self, root: &Transaction) -> Result<usize>;
    fn references_bank_account(&self, account_id: Uuid) -> Result<bool>;
}

/// Bank account storage, including the two balance mutations the ledger relies on.
pub trait BankAccountRepository: Send + Sync {
    fn create(&self, account: BankAccount) -> Result<BankAccount>;
    fn find_unique_from_user_by_id(&self, user_id: Uuid, id: Uuid) -> Result<Option<BankAccount>>;
    fn find_many_from_user(&self, user_id: Uuid) -> Result<Vec<BankAccount>>;
    fn delete(&self, id: Uuid) -> Result<Option<BankAccount>>;
    fn update_unique_by_id_increasing_balance(
        &self,
        id: Uuid,
        amount: Decimal,
    ) -> Result<BankAccount>;
    fn update_unique_by_id_decreasing_balance(
        &self,
        id: Uuid,
        amount: Decimal,
    ) -> Result<BankAccount>;
}

/// Atomic boundary spanning several aggregate writes. Boundaries nest: every `begin`
/// must be matched by exactly one `commit` or `rollback`.
pub trait UnitOfWork: Send + Sync {
    fn begin(&self) -> Result<()>;
    fn commit(&self) -> Result<()>;
    fn rollback(&self) -> Result<()>;
}

impl dyn UnitOfWork {
    /// Runs `work` inside a boundary, committing on `Ok` and rolling back on `Err`.
    pub fn transaction<T, E>(
        &self,
        work: impl FnOnce() -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: From<LedgerError> + std::fmt::Display,
    {
        self.begin()?;
        match work() {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(err) => {
                tracing::warn!(error = %err, "rolling back unit of work");
                if let Err(rollback_err) = self.rollback() {
                    tracing::error!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }
}
