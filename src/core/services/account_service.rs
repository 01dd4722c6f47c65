use std::sync::Arc;

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::BankAccount;
use crate::storage::{BankAccountRepository, TransactionRepository};

use super::{ServiceError, ServiceResult};

pub struct AccountService {
    accounts: Arc<dyn BankAccountRepository>,
    transactions: Arc<dyn TransactionRepository>,
}

impl AccountService {
    pub fn new(
        accounts: Arc<dyn BankAccountRepository>,
        transactions: Arc<dyn TransactionRepository>,
    ) -> Self {
        Self {
            accounts,
            transactions,
        }
    }

    pub fn create(
        &self,
        user_id: Uuid,
        name: &str,
        opening_balance: Decimal,
    ) -> ServiceResult<BankAccount> {
        if name.trim().is_empty() {
            return Err(ServiceError::Validation(
                "Account name cannot be empty".into(),
            ));
        }
        if opening_balance < Decimal::ZERO {
            return Err(ServiceError::Validation(
                "Opening balance cannot be negative".into(),
            ));
        }
        self.validate_name(user_id, name)?;
        let account = self.accounts.create(
            BankAccount::new(user_id, name.trim()).with_balance(opening_balance),
        )?;
        tracing::info!(account = %account.id, user = %user_id, "bank account created");
        Ok(account)
    }

    pub fn get(&self, user_id: Uuid, id: Uuid) -> ServiceResult<BankAccount> {
        self.accounts
            .find_unique_from_user_by_id(user_id, id)?
            .ok_or_else(|| ServiceError::bank_account_not_found(id))
    }

    pub fn list(&self, user_id: Uuid) -> ServiceResult<Vec<BankAccount>> {
        Ok(self.accounts.find_many_from_user(user_id)?)
    }

    /// Removes an account no transaction points at.
    pub fn remove(&self, user_id: Uuid, id: Uuid) -> ServiceResult<BankAccount> {
        let account = self.get(user_id, id)?;
        if self.transactions.references_bank_account(id)? {
            return Err(ServiceError::Validation(
                "Account has linked transactions".into(),
            ));
        }
        self.accounts
            .delete(account.id)?
            .ok_or_else(|| ServiceError::bank_account_not_found(id))
    }

    fn validate_name(&self, user_id: Uuid, candidate: &str) -> ServiceResult<()> {
        let normalized = candidate.trim().to_ascii_lowercase();
        let duplicate = self
            .accounts
            .find_many_from_user(user_id)?
            .iter()
            .any(|account| account.name.trim().to_ascii_lowercase() == normalized);
        if duplicate {
            Err(ServiceError::Validation(format!(
                "Account `{}` already exists",
                candidate
            )))
        } else {
            Ok(())
        }
    }
}
