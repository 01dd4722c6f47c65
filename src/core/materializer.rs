//! Turns recurring roots into concrete occurrences and keeps open-ended series topped up
//! through a rolling job anchored on the middle of the generated window.

use std::sync::Arc;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::core::services::{ServiceError, ServiceResult};
use crate::domain::Transaction;
use crate::errors::LedgerError;
use crate::scheduler::{Job, JobOutcome, JobResult, JobScheduler};
use crate::storage::{self, TransactionRepository, UnitOfWork};

/// Scheduler key of the rolling job serving the series rooted at `origin_id`.
pub fn rolling_job_key(origin_id: Uuid) -> String {
    origin_id.to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Materialization {
    /// Every occurrence of a limited series (or nothing new) was written; no job runs.
    Complete { generated: usize },
    /// First window of an open-ended series was written and the rolling job will fire on `anchor`.
    Rolling { generated: usize, anchor: NaiveDate },
    /// The series was re-planned after an edit: its rolling job is cancelled.
    Replanned { cancelled_jobs: usize },
}

pub struct RecurrenceMaterializer {
    transactions: Arc<dyn TransactionRepository>,
    scheduler: Arc<dyn JobScheduler>,
    unit_of_work: Arc<dyn UnitOfWork>,
}

impl RecurrenceMaterializer {
    pub fn new(
        transactions: Arc<dyn TransactionRepository>,
        scheduler: Arc<dyn JobScheduler>,
        unit_of_work: Arc<dyn UnitOfWork>,
    ) -> Self {
        Self {
            transactions,
            scheduler,
            unit_of_work,
        }
    }

    /// Writes the occurrences of `root` and plans its continuation.
    ///
    /// With `apply_transaction` the work runs inside its own unit of work; otherwise it
    /// joins whatever boundary the caller holds. With `update` the series is being
    /// re-planned after an edit: the pending rolling job is cancelled and nothing is
    /// generated. Without `update` the series must not have occurrences yet; a window
    /// only ever grows through its rolling job.
    pub fn materialize(
        &self,
        root: &Transaction,
        apply_transaction: bool,
        update: bool,
    ) -> ServiceResult<Materialization> {
        if apply_transaction {
            self.unit_of_work
                .transaction(|| self.materialize_within(root, update))
        } else {
            self.materialize_within(root, update)
        }
    }

    /// Cancels the rolling job of the series rooted at `origin_id`.
    pub fn stop_rolling(&self, origin_id: Uuid) -> ServiceResult<usize> {
        let cancelled = self
            .scheduler
            .delete_many_by_key(&rolling_job_key(origin_id))?;
        if cancelled > 0 {
            tracing::info!(origin = %origin_id, cancelled, "rolling job cancelled");
        }
        Ok(cancelled)
    }

    /// Re-registers the rolling job of an already materialized open-ended series, e.g.
    /// after restoring a snapshot. Nothing is generated here; an anchor date already in
    /// the past makes the job fire on the next run.
    ///
    /// A window holding less than half a batch has no middle occurrence, so the job is
    /// anchored on its newest occurrence instead.
    pub fn resume(&self, root: &Transaction) -> ServiceResult<Option<NaiveDate>> {
        let open_ended = root.recurrence.map(|r| r.is_open_ended()).unwrap_or(false);
        if !open_ended || root.is_occurrence() {
            return Ok(None);
        }
        let anchor = match self
            .transactions
            .find_unique_middle_of_current_recurrence(root.id)?
        {
            Some(middle) => middle.transacted_at,
            None => match self
                .transactions
                .find_unique_end_of_current_recurrence(root.id)?
            {
                Some(end) => {
                    tracing::info!(
                        origin = %root.id,
                        anchor = %end.transacted_at,
                        "window shorter than half a batch, anchoring on its end"
                    );
                    end.transacted_at
                }
                None => {
                    tracing::debug!(origin = %root.id, "no window to resume");
                    return Ok(None);
                }
            },
        };
        self.schedule(root.id, anchor)?;
        Ok(Some(anchor))
    }

    fn materialize_within(&self, root: &Transaction, update: bool) -> ServiceResult<Materialization> {
        let Some(recurrence) = root.recurrence.filter(|_| root.is_recurring_root()) else {
            return Err(ServiceError::Validation(format!(
                "transaction {} is not the root of a recurrence",
                root.id
            )));
        };

        if update {
            let cancelled_jobs = self.stop_rolling(root.id)?;
            return Ok(Materialization::Replanned { cancelled_jobs });
        }
        if let Some(end) = self
            .transactions
            .find_unique_end_of_current_recurrence(root.id)?
        {
            return Err(ServiceError::Forbidden(format!(
                "series {} is already materialized up to {}",
                root.id, end.transacted_at
            )));
        }

        let generated = self.transactions.create_many_of_recurrence(root, None)?;
        tracing::info!(
            origin = %root.id,
            cadence = %recurrence.label(),
            generated,
            "recurrence materialized"
        );
        if !recurrence.is_open_ended() {
            return Ok(Materialization::Complete { generated });
        }

        match require_middle(self.transactions.as_ref(), root.id, generated)? {
            Some(middle) => {
                self.schedule(root.id, middle.transacted_at)?;
                Ok(Materialization::Rolling {
                    generated,
                    anchor: middle.transacted_at,
                })
            }
            None => Ok(Materialization::Complete { generated }),
        }
    }

    fn schedule(&self, origin_id: Uuid, anchor: NaiveDate) -> ServiceResult<()> {
        let job = RollingJob {
            transactions: self.transactions.clone(),
            unit_of_work: self.unit_of_work.clone(),
            origin_id,
        };
        self.scheduler.create_repeatable_by_dynamic_date(
            Arc::new(job),
            anchor,
            &rolling_job_key(origin_id),
        )?;
        tracing::debug!(origin = %origin_id, %anchor, "rolling job scheduled");
        Ok(())
    }
}

/// Middle occurrence of the current window. A batch was just written when `generated`
/// is non-zero, so a missing middle then means storage and generation disagree.
fn require_middle(
    transactions: &dyn TransactionRepository,
    origin_id: Uuid,
    generated: usize,
) -> storage::Result<Option<Transaction>> {
    let middle = transactions.find_unique_middle_of_current_recurrence(origin_id)?;
    if middle.is_none() && generated > 0 {
        tracing::error!(origin = %origin_id, generated, "middle occurrence missing after batch");
        return Err(LedgerError::BrokenInvariant(format!(
            "no middle occurrence for series {origin_id} after generating {generated} rows"
        )));
    }
    Ok(middle)
}

/// Repeatable job extending an open-ended series by one batch past its newest occurrence.
pub struct RollingJob {
    transactions: Arc<dyn TransactionRepository>,
    unit_of_work: Arc<dyn UnitOfWork>,
    origin_id: Uuid,
}

impl RollingJob {
    fn extend_window(&self) -> JobResult {
        let Some(end) = self
            .transactions
            .find_unique_end_of_current_recurrence(self.origin_id)?
        else {
            tracing::info!(origin = %self.origin_id, "series has no occurrences left, retiring");
            return Ok(JobOutcome::Retire);
        };
        let Some(root) = self
            .transactions
            .find_unique_origin_transaction_by_id(self.origin_id)?
        else {
            tracing::info!(origin = %self.origin_id, "series root is gone, retiring");
            return Ok(JobOutcome::Retire);
        };
        if !root.recurrence.map(|r| r.is_open_ended()).unwrap_or(false) {
            return Ok(JobOutcome::Retire);
        }

        let generated = self
            .transactions
            .create_many_of_recurrence(&root, Some(end.transacted_at))?;
        match require_middle(self.transactions.as_ref(), root.id, generated)? {
            Some(middle) => {
                tracing::info!(
                    origin = %root.id,
                    generated,
                    next = %middle.transacted_at,
                    "series window extended"
                );
                Ok(JobOutcome::Reschedule(middle.transacted_at))
            }
            None => Ok(JobOutcome::Retire),
        }
    }
}

impl Job for RollingJob {
    fn run(&self) -> JobResult {
        self.unit_of_work.transaction(|| self.extend_window())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Recurrence, RecurrencePeriod, TransactionKind};
    use crate::scheduler::InMemoryScheduler;
    use crate::storage::InMemoryStore;
    use chrono::Datelike;
    use rust_decimal_macros::dec;

    struct Fixture {
        store: Arc<InMemoryStore>,
        scheduler: Arc<InMemoryScheduler>,
        materializer: RecurrenceMaterializer,
    }

    fn fixture(batch_size: usize) -> Fixture {
        let store = Arc::new(InMemoryStore::new(batch_size));
        let scheduler = Arc::new(InMemoryScheduler::new());
        let materializer =
            RecurrenceMaterializer::new(store.clone(), scheduler.clone(), store.clone());
        Fixture {
            store,
            scheduler,
            materializer,
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn create_root(store: &Arc<InMemoryStore>, recurrence: Recurrence) -> Transaction {
        let txn = Transaction::new(
            Uuid::new_v4(),
            TransactionKind::DebitExpense {
                bank_account_id: Uuid::new_v4(),
                category_id: Uuid::new_v4(),
            },
            date(2024, 1, 1),
            dec!(9.99),
            "Streaming",
        )
        .with_recurrence(recurrence);
        TransactionRepository::create(store.as_ref(), txn).unwrap()
    }

    fn occurrences(store: &Arc<InMemoryStore>, origin: Uuid) -> Vec<Transaction> {
        store.find_many_by_origin(origin).unwrap()
    }

    #[test]
    fn limited_series_is_complete_without_job() {
        let fx = fixture(10);
        let root = create_root(&fx.store, Recurrence::new(RecurrencePeriod::Month).limited_to(3));

        let outcome = fx.materializer.materialize(&root, true, false).unwrap();

        assert_eq!(outcome, Materialization::Complete { generated: 3 });
        assert_eq!(occurrences(&fx.store, root.id).len(), 3);
        assert!(fx.scheduler.is_empty().unwrap());
    }

    #[test]
    fn open_series_schedules_job_on_middle() {
        let fx = fixture(10);
        let root = create_root(&fx.store, Recurrence::new(RecurrencePeriod::Day));

        let outcome = fx.materializer.materialize(&root, true, false).unwrap();

        assert_eq!(
            outcome,
            Materialization::Rolling {
                generated: 10,
                anchor: date(2024, 1, 6)
            }
        );
        let jobs = fx.scheduler.jobs_by_key(&rolling_job_key(root.id)).unwrap();
        assert_eq!(jobs.len(), 1);
        assert!(jobs[0].repeatable);
    }

    #[test]
    fn rolling_job_extends_from_end_and_moves_anchor() {
        let fx = fixture(10);
        let root = create_root(&fx.store, Recurrence::new(RecurrencePeriod::Day));
        fx.materializer.materialize(&root, true, false).unwrap();

        let report = fx.scheduler.run_due(date(2024, 1, 6)).unwrap();

        assert_eq!(report.fired, 1);
        let rows = occurrences(&fx.store, root.id);
        assert_eq!(rows.len(), 20);
        assert_eq!(rows.last().unwrap().transacted_at, date(2024, 1, 21));
        let jobs = fx.scheduler.jobs_by_key(&rolling_job_key(root.id)).unwrap();
        assert_eq!(
            jobs[0].state,
            crate::scheduler::JobState::Scheduled(date(2024, 1, 16))
        );
    }

    #[test]
    fn update_cancels_job_without_generating() {
        let fx = fixture(10);
        let root = create_root(&fx.store, Recurrence::new(RecurrencePeriod::Week));
        fx.materializer.materialize(&root, true, false).unwrap();

        let outcome = fx.materializer.materialize(&root, true, true).unwrap();

        assert_eq!(outcome, Materialization::Replanned { cancelled_jobs: 1 });
        assert_eq!(occurrences(&fx.store, root.id).len(), 10);
        assert!(fx.scheduler.is_empty().unwrap());
    }

    #[test]
    fn job_retires_once_occurrences_are_gone() {
        let fx = fixture(4);
        let root = create_root(&fx.store, Recurrence::new(RecurrencePeriod::Day));
        fx.materializer.materialize(&root, true, false).unwrap();
        fx.store.delete_many_pending(&root).unwrap();

        let report = fx.scheduler.run_due(date(2024, 12, 31)).unwrap();

        assert_eq!(report.retired, 1);
        assert!(fx.scheduler.is_empty().unwrap());
    }

    #[test]
    fn rejects_non_recurring_transactions() {
        let fx = fixture(4);
        let plain = Transaction::new(
            Uuid::new_v4(),
            TransactionKind::Earning {
                bank_account_id: Uuid::new_v4(),
                category_id: Uuid::new_v4(),
            },
            date(2024, 1, 1),
            dec!(1),
            "One-off",
        );
        let err = fx.materializer.materialize(&plain, true, false).unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[test]
    fn resume_reanchors_existing_window() {
        let fx = fixture(6);
        let root = create_root(&fx.store, Recurrence::new(RecurrencePeriod::Day));
        fx.materializer.materialize(&root, true, false).unwrap();
        fx.scheduler.delete_many_by_key(&rolling_job_key(root.id)).unwrap();

        let anchor = fx.materializer.resume(&root).unwrap();

        assert_eq!(anchor, Some(date(2024, 1, 4)));
        assert_eq!(fx.scheduler.len().unwrap(), 1);
    }

    #[test]
    fn materialized_series_is_not_generated_again() {
        let fx = fixture(10);
        let root = create_root(&fx.store, Recurrence::new(RecurrencePeriod::Month));
        fx.materializer.materialize(&root, true, false).unwrap();
        fx.materializer.materialize(&root, true, true).unwrap();

        let weekly = root.clone().with_recurrence(Recurrence::new(RecurrencePeriod::Week));
        let err = fx.materializer.materialize(&weekly, true, false).unwrap_err();

        assert!(matches!(err, ServiceError::Forbidden(_)));
        let rows = occurrences(&fx.store, root.id);
        assert_eq!(rows.len(), 10);
        assert!(rows.iter().all(|row| row.transacted_at.day() == 1));
        assert!(fx.scheduler.is_empty().unwrap());
    }

    #[test]
    fn thinned_window_resumes_on_its_end() {
        let fx = fixture(10);
        let root = create_root(&fx.store, Recurrence::new(RecurrencePeriod::Day));
        fx.materializer.materialize(&root, true, false).unwrap();
        fx.scheduler.delete_many_by_key(&rolling_job_key(root.id)).unwrap();
        for row in occurrences(&fx.store, root.id).into_iter().skip(4) {
            TransactionRepository::delete(fx.store.as_ref(), row.id).unwrap();
        }

        let anchor = fx.materializer.resume(&root).unwrap();
        assert_eq!(anchor, Some(date(2024, 1, 5)));

        let report = fx.scheduler.run_due(date(2024, 1, 5)).unwrap();
        assert_eq!(report.rescheduled, 1);
        let rows = occurrences(&fx.store, root.id);
        assert_eq!(rows.len(), 14);
        assert_eq!(rows.last().unwrap().transacted_at, date(2024, 1, 15));
        let jobs = fx.scheduler.jobs_by_key(&rolling_job_key(root.id)).unwrap();
        assert_eq!(
            jobs[0].state,
            crate::scheduler::JobState::Scheduled(date(2024, 1, 10))
        );
    }
}
