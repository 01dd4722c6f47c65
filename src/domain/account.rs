use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::common::*;

/// Bank account whose balance follows the accomplished transactions that move money through it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BankAccount {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
}

impl BankAccount {
    /// Creates a new account with a zero balance.
    pub fn new(user_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            name: name.into(),
            balance: Decimal::ZERO,
            created_at: Utc::now(),
        }
    }

    pub fn with_balance(mut self, balance: Decimal) -> Self {
        self.balance = balance;
        self
    }
}

impl Identifiable for BankAccount {
    fn id(&self) -> Uuid {
        self.id
    }
}

impl Owned for BankAccount {
    fn owner(&self) -> Uuid {
        self.user_id
    }
}

impl Displayable for BankAccount {
    fn display_label(&self) -> String {
        format!("{} ({})", self.name, self.balance)
    }
}
