//! Balance adjustments paired with transaction state changes.
//!
//! Every method here must run inside the caller's unit of work so that the transaction
//! row and the balances it moves commit or roll back together.

use std::sync::Arc;

use rust_decimal::Decimal;

use crate::core::services::ServiceResult;
use crate::domain::{BalanceEffect, Displayable, Transaction};
use crate::storage::BankAccountRepository;

pub struct LedgerMutator {
    accounts: Arc<dyn BankAccountRepository>,
}

impl LedgerMutator {
    pub fn new(accounts: Arc<dyn BankAccountRepository>) -> Self {
        Self { accounts }
    }

    /// Applies the effect of `txn` being accomplished.
    pub fn apply(&self, txn: &Transaction) -> ServiceResult<()> {
        tracing::info!(transaction = %txn.id, label = %txn.display_label(), "applying ledger effect");
        self.apply_effects(txn.balance_effects())
    }

    /// Undoes the effect of `txn` having been accomplished.
    pub fn reverse(&self, txn: &Transaction) -> ServiceResult<()> {
        tracing::info!(transaction = %txn.id, label = %txn.display_label(), "reversing ledger effect");
        self.apply_effects(
            txn.balance_effects()
                .into_iter()
                .map(BalanceEffect::inverted)
                .collect(),
        )
    }

    /// Moves the ledger from the effect of `before` to the effect of `after`, two states
    /// of the same transaction. Either side only counts when accomplished, so editing a
    /// pending transaction never touches balances.
    pub fn replace(&self, before: &Transaction, after: &Transaction) -> ServiceResult<()> {
        let old = if before.is_accomplished {
            before.balance_effects()
        } else {
            Vec::new()
        };
        let new = if after.is_accomplished {
            after.balance_effects()
        } else {
            Vec::new()
        };
        if old == new {
            return Ok(());
        }
        tracing::info!(transaction = %after.id, "replacing ledger effect");
        let mut effects: Vec<BalanceEffect> = old.into_iter().map(BalanceEffect::inverted).collect();
        effects.extend(new);
        self.apply_effects(effects)
    }

    fn apply_effects(&self, effects: Vec<BalanceEffect>) -> ServiceResult<()> {
        for effect in effects {
            if effect.delta > Decimal::ZERO {
                self.accounts
                    .update_unique_by_id_increasing_balance(effect.account_id, effect.delta)?;
            } else if effect.delta < Decimal::ZERO {
                self.accounts
                    .update_unique_by_id_decreasing_balance(effect.account_id, -effect.delta)?;
            }
        }
        Ok(())
    }
}
