use std::sync::{Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{
    BankAccount, Displayable, Identifiable, Owned, Transaction, TransactionPatch,
};
use crate::errors::LedgerError;

use super::{BankAccountRepository, Result, TransactionRepository, UnitOfWork};

/// Rows held by [`InMemoryStore`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StoreState {
    pub accounts: Vec<BankAccount>,
    pub transactions: Vec<Transaction>,
}

/// Open units of work and the thread holding them.
#[derive(Default)]
struct Writer {
    owner: Option<ThreadId>,
    savepoints: Vec<StoreState>,
}

/// Reference storage backend keeping every row in memory.
///
/// Units of work are savepoints of the whole state: `rollback` restores the state as it
/// was at the matching `begin`. The outermost `begin` makes the calling thread the only
/// writer until the matching `commit` or `rollback`; writes from other threads wait for
/// it. Reads never wait.
pub struct InMemoryStore {
    state: Mutex<StoreState>,
    writer: Mutex<Writer>,
    writer_released: Condvar,
    batch_size: usize,
}

impl InMemoryStore {
    pub fn new(batch_size: usize) -> Self {
        Self::from_state(StoreState::default(), batch_size)
    }

    pub fn from_state(state: StoreState, batch_size: usize) -> Self {
        Self {
            state: Mutex::new(state),
            writer: Mutex::new(Writer::default()),
            writer_released: Condvar::new(),
            batch_size,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Copy of the current rows.
    pub fn state(&self) -> Result<StoreState> {
        Ok(self.lock_state()?.clone())
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, StoreState>> {
        self.state
            .lock()
            .map_err(|_| LedgerError::Storage("store state lock poisoned".into()))
    }

    /// Waits until no other thread holds an open unit of work.
    fn lock_writer(&self) -> Result<MutexGuard<'_, Writer>> {
        let current = thread::current().id();
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| LedgerError::Storage("writer lock poisoned".into()))?;
        while writer.owner.is_some_and(|owner| owner != current) {
            writer = self
                .writer_released
                .wait(writer)
                .map_err(|_| LedgerError::Storage("writer lock poisoned".into()))?;
        }
        Ok(writer)
    }

    /// Runs a single mutation once the calling thread may write.
    fn write<T>(&self, mutation: impl FnOnce(&mut StoreState) -> Result<T>) -> Result<T> {
        let _writer = self.lock_writer()?;
        let mut state = self.lock_state()?;
        mutation(&mut state)
    }

    /// Closes the innermost unit of work of the calling thread, restoring its savepoint
    /// when `restore` is set. Closing the outermost one releases the writer.
    fn close_unit_of_work(&self, restore: bool) -> Result<()> {
        let mut writer = self.lock_writer()?;
        let savepoint = writer.savepoints.pop().ok_or_else(|| {
            LedgerError::Storage("no open unit of work to close".into())
        })?;
        if restore {
            *self.lock_state()? = savepoint;
        }
        if writer.savepoints.is_empty() {
            writer.owner = None;
            self.writer_released.notify_all();
        }
        Ok(())
    }

    fn adjust_balance(&self, id: Uuid, delta: Decimal) -> Result<BankAccount> {
        self.write(|state| {
            let idx = position(&state.accounts, id)
                .ok_or_else(|| LedgerError::Storage(format!("bank account {id} not found")))?;
            let account = &mut state.accounts[idx];
            account.balance += delta;
            tracing::debug!(account = %account.display_label(), %delta, "balance adjusted");
            Ok(account.clone())
        })
    }

    fn update_many_where(
        &self,
        root: &Transaction,
        accomplished: bool,
        patch: &TransactionPatch,
    ) -> Result<usize> {
        self.write(|state| {
            let mut updated = 0;
            for txn in state.transactions.iter_mut().filter(|txn| {
                txn.origin_id == Some(root.id) && txn.is_accomplished == accomplished
            }) {
                patch.apply_to(txn);
                updated += 1;
            }
            Ok(updated)
        })
    }

    /// Occurrences of a series, newest first.
    fn window_newest_first(state: &StoreState, origin_id: Uuid) -> Vec<&Transaction> {
        let mut window: Vec<&Transaction> = state
            .transactions
            .iter()
            .filter(|txn| txn.origin_id == Some(origin_id))
            .collect();
        window.sort_by(|a, b| {
            b.transacted_at
                .cmp(&a.transacted_at)
                .then(b.created_at.cmp(&a.created_at))
        });
        window
    }
}

fn position<T: Identifiable>(items: &[T], id: Uuid) -> Option<usize> {
    items.iter().position(|item| item.id() == id)
}

impl TransactionRepository for InMemoryStore {
    fn create(&self, transaction: Transaction) -> Result<Transaction> {
        self.write(|state| {
            if position(&state.transactions, transaction.id).is_some() {
                return Err(LedgerError::Storage(format!(
                    "transaction {} already exists",
                    transaction.id
                )));
            }
            state.transactions.push(transaction.clone());
            Ok(transaction)
        })
    }

    fn update(&self, transaction: &Transaction) -> Result<()> {
        self.write(|state| {
            let idx = position(&state.transactions, transaction.id).ok_or_else(|| {
                LedgerError::Storage(format!("transaction {} not found", transaction.id))
            })?;
            state.transactions[idx] = transaction.clone();
            Ok(())
        })
    }

    fn delete(&self, id: Uuid) -> Result<Option<Transaction>> {
        self.write(|state| {
            Ok(position(&state.transactions, id).map(|idx| state.transactions.remove(idx)))
        })
    }

    fn find_unique_from_user_by_id(&self, user_id: Uuid, id: Uuid) -> Result<Option<Transaction>> {
        let state = self.lock_state()?;
        Ok(state
            .transactions
            .iter()
            .find(|txn| txn.id == id && txn.is_owned_by(user_id))
            .cloned())
    }

    fn find_unique_origin_transaction_by_id(&self, id: Uuid) -> Result<Option<Transaction>> {
        let state = self.lock_state()?;
        Ok(state
            .transactions
            .iter()
            .find(|txn| txn.id == id && txn.is_recurring_root())
            .cloned())
    }

    fn find_many_recurring_roots(&self) -> Result<Vec<Transaction>> {
        let state = self.lock_state()?;
        Ok(state
            .transactions
            .iter()
            .filter(|txn| txn.is_recurring_root())
            .cloned()
            .collect())
    }

    fn find_many_by_origin(&self, origin_id: Uuid) -> Result<Vec<Transaction>> {
        let state = self.lock_state()?;
        let mut occurrences: Vec<Transaction> = state
            .transactions
            .iter()
            .filter(|txn| txn.origin_id == Some(origin_id))
            .cloned()
            .collect();
        occurrences.sort_by_key(|txn| txn.transacted_at);
        Ok(occurrences)
    }

    fn create_many_of_recurrence(
        &self,
        root: &Transaction,
        base_date: Option<NaiveDate>,
    ) -> Result<usize> {
        let recurrence = root.recurrence.ok_or_else(|| {
            LedgerError::Storage(format!("transaction {} carries no recurrence rule", root.id))
        })?;
        let base = base_date.unwrap_or(root.transacted_at);
        let count = recurrence.batch_len(self.batch_size);

        let mut batch = Vec::with_capacity(count);
        for index in 1..=count {
            let index = u32::try_from(index)
                .map_err(|_| LedgerError::Storage("batch index overflow".into()))?;
            let date = recurrence.occurrence_date(base, index).ok_or_else(|| {
                LedgerError::Storage(format!(
                    "occurrence {index} after {base} is outside the supported calendar"
                ))
            })?;
            batch.push(root.occurrence_at(date));
        }

        self.write(|state| {
            if let Some(first) = batch.first() {
                let already_generated = state.transactions.iter().any(|txn| {
                    txn.origin_id == Some(root.id) && txn.transacted_at == first.transacted_at
                });
                if already_generated {
                    tracing::debug!(origin = %root.id, %base, "batch already generated, skipping");
                    return Ok(0);
                }
            }
            let created = batch.len();
            state.transactions.extend(batch);
            Ok(created)
        })
    }

    fn find_unique_middle_of_current_recurrence(
        &self,
        origin_id: Uuid,
    ) -> Result<Option<Transaction>> {
        let state = self.lock_state()?;
        let middle = Self::window_newest_first(&state, origin_id)
            .into_iter()
            .nth(self.batch_size / 2)
            .cloned();
        tracing::debug!(origin = %origin_id, found = middle.is_some(), "middle occurrence lookup");
        Ok(middle)
    }

    fn find_unique_end_of_current_recurrence(
        &self,
        origin_id: Uuid,
    ) -> Result<Option<Transaction>> {
        let state = self.lock_state()?;
        let end = Self::window_newest_first(&state, origin_id)
            .into_iter()
            .next()
            .cloned();
        tracing::debug!(origin = %origin_id, found = end.is_some(), "end occurrence lookup");
        Ok(end)
    }

    fn update_many_accomplished(
        &self,
        root: &Transaction,
        patch: &TransactionPatch,
    ) -> Result<usize> {
        self.update_many_where(root, true, patch)
    }

    fn update_many_pending(&self, root: &Transaction, patch: &TransactionPatch) -> Result<usize> {
        self.update_many_where(root, false, patch)
    }

    fn delete_many_accomplished(&self, root: &Transaction) -> Result<Vec<Transaction>> {
        self.write(|state| {
            let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.transactions)
                .into_iter()
                .partition(|txn| txn.origin_id == Some(root.id) && txn.is_accomplished);
            state.transactions = kept;
            Ok(removed)
        })
    }

    fn delete_many_pending(&self, root: &Transaction) -> Result<usize> {
        self.write(|state| {
            let before = state.transactions.len();
            state
                .transactions
                .retain(|txn| !(txn.origin_id == Some(root.id) && !txn.is_accomplished));
            Ok(before - state.transactions.len())
        })
    }

    fn detach_occurrences(&self, root: &Transaction) -> Result<usize> {
        self.write(|state| {
            let mut detached = 0;
            for txn in state
                .transactions
                .iter_mut()
                .filter(|txn| txn.origin_id == Some(root.id))
            {
                txn.origin_id = None;
                detached += 1;
            }
            Ok(detached)
        })
    }

    fn references_bank_account(&self, account_id: Uuid) -> Result<bool> {
        let state = self.lock_state()?;
        Ok(state
            .transactions
            .iter()
            .any(|txn| txn.kind.bank_account_ids().contains(&account_id)))
    }
}

impl BankAccountRepository for InMemoryStore {
    fn create(&self, account: BankAccount) -> Result<BankAccount> {
        self.write(|state| {
            if position(&state.accounts, account.id).is_some() {
                return Err(LedgerError::Storage(format!(
                    "bank account {} already exists",
                    account.id
                )));
            }
            state.accounts.push(account.clone());
            Ok(account)
        })
    }

    fn find_unique_from_user_by_id(&self, user_id: Uuid, id: Uuid) -> Result<Option<BankAccount>> {
        let state = self.lock_state()?;
        Ok(state
            .accounts
            .iter()
            .find(|account| account.id == id && account.is_owned_by(user_id))
            .cloned())
    }

    fn find_many_from_user(&self, user_id: Uuid) -> Result<Vec<BankAccount>> {
        let state = self.lock_state()?;
        Ok(state
            .accounts
            .iter()
            .filter(|account| account.is_owned_by(user_id))
            .cloned()
            .collect())
    }

    fn delete(&self, id: Uuid) -> Result<Option<BankAccount>> {
        self.write(|state| Ok(position(&state.accounts, id).map(|idx| state.accounts.remove(idx))))
    }

    fn update_unique_by_id_increasing_balance(
        &self,
        id: Uuid,
        amount: Decimal,
    ) -> Result<BankAccount> {
        self.adjust_balance(id, amount)
    }

    fn update_unique_by_id_decreasing_balance(
        &self,
        id: Uuid,
        amount: Decimal,
    ) -> Result<BankAccount> {
        self.adjust_balance(id, -amount)
    }
}

impl UnitOfWork for InMemoryStore {
    fn begin(&self) -> Result<()> {
        let mut writer = self.lock_writer()?;
        let snapshot = self.lock_state()?.clone();
        writer.owner = Some(thread::current().id());
        writer.savepoints.push(snapshot);
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        self.close_unit_of_work(false)
    }

    fn rollback(&self) -> Result<()> {
        self.close_unit_of_work(true)
    }
}
