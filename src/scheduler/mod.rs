//! Deferred and repeatable job execution addressed by key.

pub mod clock;
pub mod memory;

use std::sync::Arc;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::errors::LedgerError;

pub use clock::{Clock, FixedClock, SystemClock};
pub use memory::{InMemoryScheduler, RunReport};

pub type JobId = Uuid;

/// Result of one job run. A fatal [`LedgerError`] retires the job; any other error
/// leaves it queued for the next run.
pub type JobResult = Result<JobOutcome, LedgerError>;

/// What a job asks of the scheduler after running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Run again on the given date.
    Reschedule(NaiveDate),
    /// Done; drop the job.
    Retire,
}

/// Unit of deferred work.
pub trait Job: Send + Sync {
    fn run(&self) -> JobResult;
}

impl<F> Job for F
where
    F: Fn() -> JobResult + Send + Sync,
{
    fn run(&self) -> JobResult {
        self()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobOptions {
    /// Reusing an id replaces the job registered under it.
    pub id: Option<JobId>,
    pub key: Option<String>,
}

impl JobOptions {
    pub fn keyed(key: impl Into<String>) -> Self {
        Self {
            id: None,
            key: Some(key.into()),
        }
    }
}

/// Lifecycle of a registered job as seen through the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Scheduled(NaiveDate),
    Running,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInfo {
    pub id: JobId,
    pub key: Option<String>,
    pub state: JobState,
    pub repeatable: bool,
}

/// Gateway to whatever executes deferred work.
pub trait JobScheduler: Send + Sync {
    /// Runs `work` once on `date`, then retires it.
    fn create_unique(
        &self,
        work: Arc<dyn Job>,
        date: NaiveDate,
        options: JobOptions,
    ) -> Result<JobId, LedgerError>;

    /// Runs `work` on `first_date` and keeps requeueing it on the date each run returns
    /// until it retires. A key holds at most one repeatable job; registering another one
    /// replaces it.
    fn create_repeatable_by_dynamic_date(
        &self,
        work: Arc<dyn Job>,
        first_date: NaiveDate,
        key: &str,
    ) -> Result<JobId, LedgerError>;

    /// Cancels every job tagged with `key`, returning how many were cancelled.
    fn delete_many_by_key(&self, key: &str) -> Result<usize, LedgerError>;

    /// Jobs currently registered under `key`.
    fn jobs_by_key(&self, key: &str) -> Result<Vec<JobInfo>, LedgerError>;
}
