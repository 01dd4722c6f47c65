pub mod ledger_manager;
pub mod ledger_mutator;
pub mod materializer;
pub mod services;

pub use ledger_manager::LedgerManager;
pub use ledger_mutator::LedgerMutator;
pub use materializer::{rolling_job_key, Materialization, RecurrenceMaterializer, RollingJob};
pub use services::{
    AccountService, SeriesDeletion, ServiceError, ServiceResult, TransactionService,
};
