use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;

use crate::config::EngineConfig;
use crate::core::services::{AccountService, ServiceResult, TransactionService};
use crate::errors::LedgerError;
use crate::scheduler::{Clock, InMemoryScheduler, RunReport};
use crate::storage::{load_snapshot_from_path, save_snapshot_to_path, InMemoryStore};

/// Facade wiring the in-memory store, the scheduler and the services together.
pub struct LedgerManager {
    config: EngineConfig,
    store: Arc<InMemoryStore>,
    scheduler: Arc<InMemoryScheduler>,
    accounts: AccountService,
    transactions: TransactionService,
}

impl LedgerManager {
    pub fn new(config: EngineConfig) -> Result<Self, LedgerError> {
        config.validate()?;
        let store = InMemoryStore::new(config.batch_size);
        Ok(Self::assemble(Arc::new(store), config))
    }

    fn assemble(store: Arc<InMemoryStore>, config: EngineConfig) -> Self {
        let scheduler = Arc::new(InMemoryScheduler::new());
        let accounts = AccountService::new(store.clone(), store.clone());
        let transactions = TransactionService::new(
            store.clone(),
            store.clone(),
            scheduler.clone(),
            store.clone(),
            config.clone(),
        );
        Self {
            config,
            store,
            scheduler,
            accounts,
            transactions,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn accounts(&self) -> &AccountService {
        &self.accounts
    }

    pub fn transactions(&self) -> &TransactionService {
        &self.transactions
    }

    pub fn store(&self) -> &InMemoryStore {
        self.store.as_ref()
    }

    pub fn scheduler(&self) -> &InMemoryScheduler {
        self.scheduler.as_ref()
    }

    /// Fires every job due on or before `today`.
    pub fn run_due_jobs(&self, today: NaiveDate) -> Result<RunReport, LedgerError> {
        let report = self.scheduler.run_due(today)?;
        if report.fired > 0 {
            tracing::info!(
                %today,
                fired = report.fired,
                rescheduled = report.rescheduled,
                retired = report.retired,
                failed = report.failed,
                "due jobs processed"
            );
        }
        Ok(report)
    }

    pub fn tick(&self, clock: &dyn Clock) -> Result<RunReport, LedgerError> {
        self.run_due_jobs(clock.today())
    }

    pub fn save_snapshot(&self, path: &Path) -> Result<(), LedgerError> {
        save_snapshot_to_path(&self.store, path)
    }

    /// Restores a manager from a snapshot. Scheduled jobs are not part of a snapshot, so
    /// the rolling job of every open-ended series is registered again on its current
    /// middle occurrence.
    pub fn load_snapshot(path: &Path, config: EngineConfig) -> ServiceResult<Self> {
        config.validate()?;
        let snapshot = load_snapshot_from_path(path)?;
        let store = snapshot.into_store(config.batch_size);
        let manager = Self::assemble(Arc::new(store), config);
        manager.transactions.resume_rolling_jobs()?;
        Ok(manager)
    }
}
