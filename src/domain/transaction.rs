use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::common::{Displayable, Identifiable, Owned};
use crate::domain::recurrence::Recurrence;

/// Variant-specific references of a financial movement.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransactionKind {
    Earning {
        bank_account_id: Uuid,
        category_id: Uuid,
    },
    DebitExpense {
        bank_account_id: Uuid,
        category_id: Uuid,
    },
    /// Tracks a credit line; never moves a bank-account balance.
    CreditCardExpense {
        credit_card_id: Uuid,
        category_id: Uuid,
    },
    Transference {
        origin_bank_account_id: Uuid,
        destiny_bank_account_id: Uuid,
    },
}

impl TransactionKind {
    pub fn label(&self) -> &'static str {
        match self {
            TransactionKind::Earning { .. } => "earning",
            TransactionKind::DebitExpense { .. } => "debit expense",
            TransactionKind::CreditCardExpense { .. } => "credit card expense",
            TransactionKind::Transference { .. } => "transference",
        }
    }

    pub fn category_id(&self) -> Option<Uuid> {
        match self {
            TransactionKind::Earning { category_id, .. }
            | TransactionKind::DebitExpense { category_id, .. }
            | TransactionKind::CreditCardExpense { category_id, .. } => Some(*category_id),
            TransactionKind::Transference { .. } => None,
        }
    }

    /// Bank accounts whose balance this movement touches once accomplished.
    pub fn bank_account_ids(&self) -> Vec<Uuid> {
        match self {
            TransactionKind::Earning {
                bank_account_id, ..
            }
            | TransactionKind::DebitExpense {
                bank_account_id, ..
            } => vec![*bank_account_id],
            TransactionKind::CreditCardExpense { .. } => Vec::new(),
            TransactionKind::Transference {
                origin_bank_account_id,
                destiny_bank_account_id,
            } => vec![*origin_bank_account_id, *destiny_bank_account_id],
        }
    }

    /// Signed balance deltas produced by accomplishing a movement of `amount`.
    pub fn balance_effects(&self, amount: Decimal) -> Vec<BalanceEffect> {
        match self {
            TransactionKind::Earning {
                bank_account_id, ..
            } => vec![BalanceEffect::new(*bank_account_id, amount)],
            TransactionKind::DebitExpense {
                bank_account_id, ..
            } => vec![BalanceEffect::new(*bank_account_id, -amount)],
            TransactionKind::CreditCardExpense { .. } => Vec::new(),
            TransactionKind::Transference {
                origin_bank_account_id,
                destiny_bank_account_id,
            } => vec![
                BalanceEffect::new(*origin_bank_account_id, -amount),
                BalanceEffect::new(*destiny_bank_account_id, amount),
            ],
        }
    }
}

/// Signed change applied to one bank account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceEffect {
    pub account_id: Uuid,
    pub delta: Decimal,
}

impl BalanceEffect {
    pub fn new(account_id: Uuid, delta: Decimal) -> Self {
        Self { account_id, delta }
    }

    pub fn inverted(self) -> Self {
        Self {
            account_id: self.account_id,
            delta: -self.delta,
        }
    }
}

/// A financial movement: either a root (no `origin_id`, optional recurrence rule) or an
/// occurrence generated from a root (`origin_id` set, no recurrence rule).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(default)]
    pub origin_id: Option<Uuid>,
    pub kind: TransactionKind,
    pub transacted_at: NaiveDate,
    pub amount: Decimal,
    pub description: String,
    #[serde(default)]
    pub is_accomplished: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<Recurrence>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(
        user_id: Uuid,
        kind: TransactionKind,
        transacted_at: NaiveDate,
        amount: Decimal,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            origin_id: None,
            kind,
            transacted_at,
            amount,
            description: description.into(),
            is_accomplished: false,
            recurrence: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_recurrence(mut self, recurrence: Recurrence) -> Self {
        self.recurrence = Some(recurrence);
        self
    }

    pub fn is_occurrence(&self) -> bool {
        self.origin_id.is_some()
    }

    /// Root that starts a recurring series.
    pub fn is_recurring_root(&self) -> bool {
        self.origin_id.is_none() && self.recurrence.is_some()
    }

    /// Identifier of the series this transaction belongs to, if any.
    pub fn series_id(&self) -> Option<Uuid> {
        self.origin_id
            .or_else(|| self.recurrence.as_ref().map(|_| self.id))
    }

    /// Builds a pending occurrence of this root dated `transacted_at`.
    pub fn occurrence_at(&self, transacted_at: NaiveDate) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            user_id: self.user_id,
            origin_id: Some(self.id),
            kind: self.kind,
            transacted_at,
            amount: self.amount,
            description: self.description.clone(),
            is_accomplished: false,
            recurrence: None,
            created_at: Utc::now(),
        }
    }

    pub fn balance_effects(&self) -> Vec<BalanceEffect> {
        self.kind.balance_effects(self.amount)
    }
}

impl Identifiable for Transaction {
    fn id(&self) -> Uuid {
        self.id
    }
}

impl Owned for Transaction {
    fn owner(&self) -> Uuid {
        self.user_id
    }
}

impl Displayable for Transaction {
    fn display_label(&self) -> String {
        format!(
            "{} {} on {} ({})",
            self.kind.label(),
            self.amount,
            self.transacted_at,
            self.description
        )
    }
}

/// Input for creating a root transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub kind: TransactionKind,
    pub transacted_at: NaiveDate,
    pub amount: Decimal,
    pub description: String,
    pub is_accomplished: bool,
    pub recurrence: Option<Recurrence>,
}

impl NewTransaction {
    pub fn new(
        kind: TransactionKind,
        transacted_at: NaiveDate,
        amount: Decimal,
        description: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            transacted_at,
            amount,
            description: description.into(),
            is_accomplished: false,
            recurrence: None,
        }
    }

    pub fn accomplished(mut self) -> Self {
        self.is_accomplished = true;
        self
    }

    pub fn recurring(mut self, recurrence: Recurrence) -> Self {
        self.recurrence = Some(recurrence);
        self
    }

    pub fn into_transaction(self, user_id: Uuid) -> Transaction {
        let mut txn = Transaction::new(
            user_id,
            self.kind,
            self.transacted_at,
            self.amount,
            self.description,
        );
        txn.is_accomplished = self.is_accomplished;
        txn.recurrence = self.recurrence;
        txn
    }
}

/// Partial edit of a transaction. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionPatch {
    pub amount: Option<Decimal>,
    pub description: Option<String>,
    pub transacted_at: Option<NaiveDate>,
    pub category_id: Option<Uuid>,
    pub bank_account_id: Option<Uuid>,
    pub credit_card_id: Option<Uuid>,
    pub origin_bank_account_id: Option<Uuid>,
    pub destiny_bank_account_id: Option<Uuid>,
    pub recurrence: Option<Recurrence>,
}

impl TransactionPatch {
    pub fn is_empty(&self) -> bool {
        *self == TransactionPatch::default()
    }

    /// True when the patch reassigns the account or card the money moves through.
    pub fn moves_money_reference(&self) -> bool {
        self.bank_account_id.is_some()
            || self.credit_card_id.is_some()
            || self.origin_bank_account_id.is_some()
            || self.destiny_bank_account_id.is_some()
    }

    /// Name of the first field that does not exist on `kind`, if any.
    pub fn inapplicable_field(&self, kind: &TransactionKind) -> Option<&'static str> {
        let is_bank = matches!(
            kind,
            TransactionKind::Earning { .. } | TransactionKind::DebitExpense { .. }
        );
        let is_card = matches!(kind, TransactionKind::CreditCardExpense { .. });
        let is_transfer = matches!(kind, TransactionKind::Transference { .. });
        if self.bank_account_id.is_some() && !is_bank {
            return Some("bank_account_id");
        }
        if self.credit_card_id.is_some() && !is_card {
            return Some("credit_card_id");
        }
        if (self.origin_bank_account_id.is_some() || self.destiny_bank_account_id.is_some())
            && !is_transfer
        {
            return Some("origin_bank_account_id/destiny_bank_account_id");
        }
        if self.category_id.is_some() && is_transfer {
            return Some("category_id");
        }
        None
    }

    /// Writes every applicable field onto `txn`. Fields foreign to the transaction's
    /// kind are ignored; callers reject them beforehand via [`Self::inapplicable_field`].
    pub fn apply_to(&self, txn: &mut Transaction) {
        if let Some(amount) = self.amount {
            txn.amount = amount;
        }
        if let Some(description) = &self.description {
            txn.description = description.clone();
        }
        if let Some(transacted_at) = self.transacted_at {
            txn.transacted_at = transacted_at;
        }
        if let Some(recurrence) = self.recurrence {
            txn.recurrence = Some(recurrence);
        }
        match &mut txn.kind {
            TransactionKind::Earning {
                bank_account_id,
                category_id,
            }
            | TransactionKind::DebitExpense {
                bank_account_id,
                category_id,
            } => {
                if let Some(account) = self.bank_account_id {
                    *bank_account_id = account;
                }
                if let Some(category) = self.category_id {
                    *category_id = category;
                }
            }
            TransactionKind::CreditCardExpense {
                credit_card_id,
                category_id,
            } => {
                if let Some(card) = self.credit_card_id {
                    *credit_card_id = card;
                }
                if let Some(category) = self.category_id {
                    *category_id = category;
                }
            }
            TransactionKind::Transference {
                origin_bank_account_id,
                destiny_bank_account_id,
            } => {
                if let Some(origin) = self.origin_bank_account_id {
                    *origin_bank_account_id = origin;
                }
                if let Some(destiny) = self.destiny_bank_account_id {
                    *destiny_bank_account_id = destiny;
                }
            }
        }
    }
}
