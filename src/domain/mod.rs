//! Plain data types for accounts, transactions, and recurrence rules.

pub mod account;
pub mod common;
pub mod recurrence;
pub mod transaction;

pub use account::BankAccount;
pub use common::{Displayable, Identifiable, Owned};
pub use recurrence::{Recurrence, RecurrencePeriod, RecurrenceScope};
pub use transaction::{
    BalanceEffect, NewTransaction, Transaction, TransactionKind, TransactionPatch,
};
