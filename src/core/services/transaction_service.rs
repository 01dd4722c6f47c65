//! Business logic for transactions and the recurring series they root.

use std::sync::Arc;

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::core::ledger_mutator::LedgerMutator;
use crate::core::materializer::{Materialization, RecurrenceMaterializer};
use crate::core::services::{ServiceError, ServiceResult};
use crate::domain::{
    NewTransaction, Recurrence, RecurrenceScope, Transaction, TransactionKind, TransactionPatch,
};
use crate::scheduler::JobScheduler;
use crate::storage::{BankAccountRepository, TransactionRepository, UnitOfWork};

/// Rows touched by a scoped delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeriesDeletion {
    pub accomplished: usize,
    pub pending: usize,
    pub root_deleted: bool,
}

/// Validated use cases over transactions. Every write that touches more than one row
/// runs inside a single unit of work.
pub struct TransactionService {
    transactions: Arc<dyn TransactionRepository>,
    accounts: Arc<dyn BankAccountRepository>,
    unit_of_work: Arc<dyn UnitOfWork>,
    mutator: LedgerMutator,
    materializer: RecurrenceMaterializer,
    config: EngineConfig,
}

impl TransactionService {
    pub fn new(
        transactions: Arc<dyn TransactionRepository>,
        accounts: Arc<dyn BankAccountRepository>,
        scheduler: Arc<dyn JobScheduler>,
        unit_of_work: Arc<dyn UnitOfWork>,
        config: EngineConfig,
    ) -> Self {
        Self {
            mutator: LedgerMutator::new(accounts.clone()),
            materializer: RecurrenceMaterializer::new(
                transactions.clone(),
                scheduler,
                unit_of_work.clone(),
            ),
            transactions,
            accounts,
            unit_of_work,
            config,
        }
    }

    pub fn materializer(&self) -> &RecurrenceMaterializer {
        &self.materializer
    }

    /// Creates a transaction. An accomplished one moves balances right away; one carrying
    /// a recurrence rule becomes the root of a series and is materialized in the same
    /// unit of work.
    pub fn create(&self, user_id: Uuid, input: NewTransaction) -> ServiceResult<Transaction> {
        self.validate_amount(input.amount)?;
        self.validate_description(&input.description)?;
        if let Some(recurrence) = &input.recurrence {
            self.validate_recurrence(recurrence)?;
        }
        validate_kind(&input.kind)?;
        self.ensure_accounts_owned(user_id, &input.kind)?;

        let txn = input.into_transaction(user_id);
        self.unit_of_work.transaction(|| {
            let created = self.transactions.create(txn)?;
            if created.is_accomplished {
                self.mutator.apply(&created)?;
            }
            if created.is_recurring_root() {
                self.materializer.materialize(&created, false, false)?;
            }
            tracing::info!(
                transaction = %created.id,
                kind = created.kind.label(),
                recurring = created.is_recurring_root(),
                "transaction created"
            );
            Ok(created)
        })
    }

    pub fn get(&self, user_id: Uuid, id: Uuid) -> ServiceResult<Transaction> {
        self.transactions
            .find_unique_from_user_by_id(user_id, id)?
            .ok_or_else(|| ServiceError::transaction_not_found(id))
    }

    /// Occurrences of the series `id` belongs to, oldest first. `id` may name the root or
    /// any of its occurrences.
    pub fn list_series(&self, user_id: Uuid, id: Uuid) -> ServiceResult<Vec<Transaction>> {
        let target = self.get(user_id, id)?;
        let root = self.resolve_root(&target)?;
        Ok(self.transactions.find_many_by_origin(root.id)?)
    }

    /// Marks a pending transaction as accomplished and applies its ledger effect.
    pub fn accomplish(&self, user_id: Uuid, id: Uuid) -> ServiceResult<Transaction> {
        let mut txn = self.get(user_id, id)?;
        if txn.is_accomplished {
            return Err(ServiceError::AlreadyAccomplished(id));
        }
        txn.is_accomplished = true;
        self.unit_of_work.transaction(|| {
            self.transactions.update(&txn)?;
            self.mutator.apply(&txn)?;
            Ok(txn)
        })
    }

    /// Turns an accomplished transaction back into a pending one, reversing its effect.
    pub fn revert_accomplishment(&self, user_id: Uuid, id: Uuid) -> ServiceResult<Transaction> {
        let mut txn = self.get(user_id, id)?;
        if !txn.is_accomplished {
            return Err(ServiceError::Validation(format!(
                "Transaction {id} is still pending"
            )));
        }
        txn.is_accomplished = false;
        self.unit_of_work.transaction(|| {
            self.transactions.update(&txn)?;
            self.mutator.reverse(&txn)?;
            Ok(txn)
        })
    }

    /// Edits a single transaction. When it is accomplished, the old ledger effect is
    /// swapped for the new one atomically. A new recurrence rule on a root re-plans the
    /// series.
    pub fn update(
        &self,
        user_id: Uuid,
        id: Uuid,
        patch: TransactionPatch,
    ) -> ServiceResult<Transaction> {
        let current = self.get(user_id, id)?;
        if patch.is_empty() {
            return Ok(current);
        }
        if let Some(field) = patch.inapplicable_field(&current.kind) {
            return Err(ServiceError::Validation(format!(
                "`{field}` does not apply to {} transactions",
                current.kind.label()
            )));
        }
        if patch.recurrence.is_some() && !current.is_recurring_root() {
            return Err(ServiceError::Forbidden(
                "Recurrence rules can only change on the root of a series".into(),
            ));
        }
        if current.is_accomplished
            && patch
                .transacted_at
                .is_some_and(|date| date != current.transacted_at)
        {
            return Err(ServiceError::Forbidden(
                "The date of an accomplished transaction cannot change".into(),
            ));
        }
        self.validate_patch(&patch)?;

        let mut next = current.clone();
        patch.apply_to(&mut next);
        validate_kind(&next.kind)?;
        if patch.moves_money_reference() {
            self.ensure_accounts_owned(user_id, &next.kind)?;
        }
        let replan = next.recurrence != current.recurrence;

        let updated = self.unit_of_work.transaction(|| {
            self.transactions.update(&next)?;
            self.mutator.replace(&current, &next)?;
            tracing::info!(transaction = %next.id, replan, "transaction updated");
            Ok::<_, ServiceError>(next)
        })?;
        if replan {
            self.materializer.materialize(&updated, false, true)?;
        }
        Ok(updated)
    }

    /// Applies `patch` to the occurrences of the series `id` belongs to, limited to
    /// `scope`. Returns how many occurrences changed.
    pub fn update_recurrence(
        &self,
        user_id: Uuid,
        id: Uuid,
        scope: RecurrenceScope,
        patch: TransactionPatch,
    ) -> ServiceResult<usize> {
        let target = self.get(user_id, id)?;
        let root = self.resolve_root(&target)?;
        if patch.moves_money_reference() || patch.transacted_at.is_some() {
            return Err(ServiceError::Validation(
                "Accounts, cards and dates can only change one occurrence at a time".into(),
            ));
        }
        if patch.amount.is_some() && scope.includes_accomplished() {
            return Err(ServiceError::Validation(
                "The amount of accomplished occurrences cannot change in bulk".into(),
            ));
        }
        if patch.recurrence.is_some() {
            return Err(ServiceError::Forbidden(
                "Recurrence rules change through the root of the series".into(),
            ));
        }
        if let Some(field) = patch.inapplicable_field(&root.kind) {
            return Err(ServiceError::Validation(format!(
                "`{field}` does not apply to {} transactions",
                root.kind.label()
            )));
        }
        self.validate_patch(&patch)?;

        self.unit_of_work.transaction(|| {
            let mut updated = 0;
            if scope.includes_accomplished() {
                updated += self.transactions.update_many_accomplished(&root, &patch)?;
            }
            if scope.includes_pending() {
                updated += self.transactions.update_many_pending(&root, &patch)?;
            }
            tracing::info!(origin = %root.id, ?scope, updated, "series updated");
            Ok(updated)
        })
    }

    /// Deletes a single transaction, reversing its effect when accomplished. Deleting a
    /// series root detaches the occurrences left behind and, once committed, stops its
    /// rolling job.
    pub fn delete(&self, user_id: Uuid, id: Uuid) -> ServiceResult<Transaction> {
        let txn = self.get(user_id, id)?;
        let removed = self.unit_of_work.transaction(|| {
            if txn.is_recurring_root() {
                let detached = self.transactions.detach_occurrences(&txn)?;
                tracing::info!(origin = %txn.id, detached, "occurrences detached from deleted root");
            }
            if txn.is_accomplished {
                self.mutator.reverse(&txn)?;
            }
            let removed = self
                .transactions
                .delete(txn.id)?
                .ok_or_else(|| ServiceError::transaction_not_found(id))?;
            tracing::info!(transaction = %removed.id, "transaction deleted");
            Ok::<_, ServiceError>(removed)
        })?;
        if removed.is_recurring_root() {
            self.materializer.stop_rolling(removed.id)?;
        }
        Ok(removed)
    }

    /// Deletes the occurrences of the series `id` belongs to, limited to `scope`.
    ///
    /// Removing pending occurrences stops the rolling job once the deletion committed.
    /// Removing accomplished ones reverses each of their effects. `All` additionally
    /// deletes the root.
    pub fn delete_recurrence(
        &self,
        user_id: Uuid,
        id: Uuid,
        scope: RecurrenceScope,
    ) -> ServiceResult<SeriesDeletion> {
        let target = self.get(user_id, id)?;
        let root = self.resolve_root(&target)?;

        let deletion = self.unit_of_work.transaction(|| {
            let mut deletion = SeriesDeletion::default();
            if scope.includes_pending() {
                deletion.pending = self.transactions.delete_many_pending(&root)?;
            }
            if scope.includes_accomplished() {
                let removed = self.transactions.delete_many_accomplished(&root)?;
                for occurrence in &removed {
                    self.mutator.reverse(occurrence)?;
                }
                deletion.accomplished = removed.len();
            }
            if scope == RecurrenceScope::All {
                self.transactions.detach_occurrences(&root)?;
                if root.is_accomplished {
                    self.mutator.reverse(&root)?;
                }
                deletion.root_deleted = self.transactions.delete(root.id)?.is_some();
            }
            tracing::info!(
                origin = %root.id,
                ?scope,
                pending = deletion.pending,
                accomplished = deletion.accomplished,
                "series deleted"
            );
            Ok::<_, ServiceError>(deletion)
        })?;
        if scope.includes_pending() {
            self.materializer.stop_rolling(root.id)?;
        }
        Ok(deletion)
    }

    /// Re-registers rolling jobs for every open-ended series in storage.
    pub fn resume_rolling_jobs(&self) -> ServiceResult<usize> {
        let mut resumed = 0;
        for root in self.transactions.find_many_recurring_roots()? {
            if self.materializer.resume(&root)?.is_some() {
                resumed += 1;
            }
        }
        tracing::info!(resumed, "rolling jobs resumed");
        Ok(resumed)
    }

    /// Materializes a root whose series has no occurrences, e.g. after all of them were
    /// deleted. A series that already has a window is `Forbidden`.
    pub fn materialize(&self, user_id: Uuid, id: Uuid) -> ServiceResult<Materialization> {
        let root = self.get(user_id, id)?;
        self.materializer.materialize(&root, true, false)
    }

    fn resolve_root(&self, target: &Transaction) -> ServiceResult<Transaction> {
        match target.origin_id {
            Some(origin_id) => self
                .transactions
                .find_unique_origin_transaction_by_id(origin_id)?
                .ok_or_else(|| ServiceError::transaction_not_found(origin_id)),
            None if target.is_recurring_root() => Ok(target.clone()),
            None => Err(ServiceError::Validation(format!(
                "Transaction {} is not part of a recurrence",
                target.id
            ))),
        }
    }

    fn ensure_accounts_owned(&self, user_id: Uuid, kind: &TransactionKind) -> ServiceResult<()> {
        for account_id in kind.bank_account_ids() {
            self.accounts
                .find_unique_from_user_by_id(user_id, account_id)?
                .ok_or_else(|| ServiceError::bank_account_not_found(account_id))?;
        }
        Ok(())
    }

    fn validate_patch(&self, patch: &TransactionPatch) -> ServiceResult<()> {
        if let Some(amount) = patch.amount {
            self.validate_amount(amount)?;
        }
        if let Some(description) = &patch.description {
            self.validate_description(description)?;
        }
        if let Some(recurrence) = &patch.recurrence {
            self.validate_recurrence(recurrence)?;
        }
        Ok(())
    }

    fn validate_amount(&self, amount: Decimal) -> ServiceResult<()> {
        if amount > Decimal::ZERO {
            Ok(())
        } else {
            Err(ServiceError::Validation(
                "Amount must be greater than zero".into(),
            ))
        }
    }

    fn validate_description(&self, description: &str) -> ServiceResult<()> {
        if description.trim().is_empty() {
            return Err(ServiceError::Validation(
                "Description cannot be empty".into(),
            ));
        }
        let len = description.chars().count();
        if len > self.config.max_description_len {
            return Err(ServiceError::Validation(format!(
                "Description is {len} characters long, the maximum is {}",
                self.config.max_description_len
            )));
        }
        Ok(())
    }

    fn validate_recurrence(&self, recurrence: &Recurrence) -> ServiceResult<()> {
        if recurrence.amount == Some(0) {
            return Err(ServiceError::Validation(
                "Recurrence amount must be at least 1".into(),
            ));
        }
        if let Some(limit) = recurrence.limit {
            if limit == 0 || limit > self.config.max_recurrence_limit {
                return Err(ServiceError::Validation(format!(
                    "Recurrence limit must be between 1 and {}",
                    self.config.max_recurrence_limit
                )));
            }
        }
        Ok(())
    }
}

fn validate_kind(kind: &TransactionKind) -> ServiceResult<()> {
    if let TransactionKind::Transference {
        origin_bank_account_id,
        destiny_bank_account_id,
    } = kind
    {
        if origin_bank_account_id == destiny_bank_account_id {
            return Err(ServiceError::Validation(
                "A transference needs two different accounts".into(),
            ));
        }
    }
    Ok(())
}
