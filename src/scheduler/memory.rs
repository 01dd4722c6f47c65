use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::NaiveDate;
use uuid::Uuid;

use crate::errors::LedgerError;

use super::{Clock, Job, JobId, JobInfo, JobOptions, JobOutcome, JobScheduler, JobState};

/// Upper bound on firings within a single `run_due` call.
const MAX_FIRINGS_PER_RUN: usize = 1024;

#[derive(Clone)]
struct ScheduledJob {
    id: JobId,
    key: Option<String>,
    next_run: NaiveDate,
    repeatable: bool,
    work: Arc<dyn Job>,
}

#[derive(Default)]
struct SchedulerState {
    queued: Vec<ScheduledJob>,
    running: Vec<(JobId, Option<String>, bool)>,
    /// Running jobs cancelled mid-flight; they are dropped instead of requeued.
    cancelled: HashSet<JobId>,
}

impl SchedulerState {
    fn key_is_running(&self, key: &Option<String>) -> bool {
        key.is_some() && self.running.iter().any(|(_, running, _)| running == key)
    }

    fn cancel_key(&mut self, key: &str) -> usize {
        let before = self.queued.len();
        self.queued.retain(|job| job.key.as_deref() != Some(key));
        let mut cancelled = before - self.queued.len();
        for (id, running_key, _) in &self.running {
            if running_key.as_deref() == Some(key) && self.cancelled.insert(*id) {
                cancelled += 1;
            }
        }
        cancelled
    }

    fn cancel_id(&mut self, id: JobId) {
        self.queued.retain(|job| job.id != id);
        if self.running.iter().any(|(running, _, _)| *running == id) {
            self.cancelled.insert(id);
        }
    }
}

/// Summary of one `run_due` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub fired: usize,
    pub rescheduled: usize,
    pub retired: usize,
    pub failed: usize,
}

/// Scheduler that keeps jobs in a single in-process list and runs them on the caller's
/// thread when [`InMemoryScheduler::run_due`] is invoked.
#[derive(Default)]
pub struct InMemoryScheduler {
    state: Mutex<SchedulerState>,
}

impl InMemoryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, SchedulerState>, LedgerError> {
        self.state
            .lock()
            .map_err(|_| LedgerError::Storage("scheduler lock poisoned".into()))
    }

    /// Fires every job due on or before `today`. A job rescheduled onto a date that is
    /// still due fires again within the same pass. Jobs sharing a key never run
    /// concurrently: a due job whose key is already running elsewhere is left queued.
    pub fn run_due(&self, today: NaiveDate) -> Result<RunReport, LedgerError> {
        let mut report = RunReport::default();
        let mut deferred: HashSet<JobId> = HashSet::new();

        while report.fired < MAX_FIRINGS_PER_RUN {
            let Some(job) = self.claim_next_due(today, &deferred)? else {
                break;
            };
            report.fired += 1;
            let result = job.work.run();

            let mut state = self.lock()?;
            state.running.retain(|(id, _, _)| *id != job.id);
            let cancelled = state.cancelled.remove(&job.id);

            match result {
                _ if cancelled => {
                    tracing::debug!(job = %job.id, key = ?job.key, "job cancelled while running");
                    report.retired += 1;
                }
                Ok(JobOutcome::Reschedule(next_run)) if job.repeatable => {
                    tracing::debug!(job = %job.id, key = ?job.key, %next_run, "job rescheduled");
                    state.queued.push(ScheduledJob { next_run, ..job });
                    report.rescheduled += 1;
                }
                Ok(_) => {
                    tracing::info!(job = %job.id, key = ?job.key, "job retired");
                    report.retired += 1;
                }
                Err(err) if err.is_fatal() => {
                    tracing::error!(
                        job = %job.id,
                        key = ?job.key,
                        error = %err,
                        "job failed fatally, retiring"
                    );
                    report.failed += 1;
                    report.retired += 1;
                }
                Err(err) => {
                    tracing::warn!(
                        job = %job.id,
                        key = ?job.key,
                        error = %err,
                        "job failed, retrying next run"
                    );
                    deferred.insert(job.id);
                    state.queued.push(job);
                    report.failed += 1;
                }
            }
        }

        if report.fired >= MAX_FIRINGS_PER_RUN {
            tracing::warn!(fired = report.fired, "run stopped at firing limit");
        }
        Ok(report)
    }

    pub fn tick(&self, clock: &dyn Clock) -> Result<RunReport, LedgerError> {
        self.run_due(clock.today())
    }

    pub fn len(&self) -> Result<usize, LedgerError> {
        let state = self.lock()?;
        Ok(state.queued.len() + state.running.len())
    }

    pub fn is_empty(&self) -> Result<bool, LedgerError> {
        Ok(self.len()? == 0)
    }

    fn claim_next_due(
        &self,
        today: NaiveDate,
        deferred: &HashSet<JobId>,
    ) -> Result<Option<ScheduledJob>, LedgerError> {
        let mut state = self.lock()?;
        let candidate = state
            .queued
            .iter()
            .enumerate()
            .filter(|(_, job)| job.next_run <= today && !deferred.contains(&job.id))
            .filter(|(_, job)| !state.key_is_running(&job.key))
            .min_by_key(|(_, job)| job.next_run)
            .map(|(idx, _)| idx);
        Ok(candidate.map(|idx| {
            let job = state.queued.remove(idx);
            state.running.push((job.id, job.key.clone(), job.repeatable));
            job
        }))
    }

    fn register(&self, job: ScheduledJob) -> Result<JobId, LedgerError> {
        let mut state = self.lock()?;
        let id = job.id;
        state.cancel_id(id);
        state.queued.push(job);
        Ok(id)
    }
}

impl JobScheduler for InMemoryScheduler {
    fn create_unique(
        &self,
        work: Arc<dyn Job>,
        date: NaiveDate,
        options: JobOptions,
    ) -> Result<JobId, LedgerError> {
        let id = options.id.unwrap_or_else(Uuid::new_v4);
        tracing::debug!(job = %id, key = ?options.key, %date, "unique job scheduled");
        self.register(ScheduledJob {
            id,
            key: options.key,
            next_run: date,
            repeatable: false,
            work,
        })
    }

    fn create_repeatable_by_dynamic_date(
        &self,
        work: Arc<dyn Job>,
        first_date: NaiveDate,
        key: &str,
    ) -> Result<JobId, LedgerError> {
        let id = Uuid::new_v4();
        {
            let mut state = self.lock()?;
            let repeatable_ids: Vec<JobId> = state
                .queued
                .iter()
                .filter(|job| job.repeatable && job.key.as_deref() == Some(key))
                .map(|job| job.id)
                .chain(
                    state
                        .running
                        .iter()
                        .filter(|(_, running, repeatable)| {
                            *repeatable && running.as_deref() == Some(key)
                        })
                        .map(|(id, _, _)| *id),
                )
                .collect();
            for existing in repeatable_ids {
                tracing::debug!(job = %existing, key, "replacing repeatable job");
                state.cancel_id(existing);
            }
        }
        tracing::info!(job = %id, key, %first_date, "repeatable job scheduled");
        self.register(ScheduledJob {
            id,
            key: Some(key.to_string()),
            next_run: first_date,
            repeatable: true,
            work,
        })
    }

    fn delete_many_by_key(&self, key: &str) -> Result<usize, LedgerError> {
        let cancelled = self.lock()?.cancel_key(key);
        if cancelled > 0 {
            tracing::info!(key, cancelled, "jobs cancelled");
        }
        Ok(cancelled)
    }

    fn jobs_by_key(&self, key: &str) -> Result<Vec<JobInfo>, LedgerError> {
        let state = self.lock()?;
        let queued = state
            .queued
            .iter()
            .filter(|job| job.key.as_deref() == Some(key))
            .map(|job| JobInfo {
                id: job.id,
                key: job.key.clone(),
                state: JobState::Scheduled(job.next_run),
                repeatable: job.repeatable,
            });
        let running = state
            .running
            .iter()
            .filter(|(id, running, _)| {
                running.as_deref() == Some(key) && !state.cancelled.contains(id)
            })
            .map(|(id, running, repeatable)| JobInfo {
                id: *id,
                key: running.clone(),
                state: JobState::Running,
                repeatable: *repeatable,
            });
        Ok(queued.chain(running).collect())
    }
}
