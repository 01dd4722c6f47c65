mod common;

use common::{date, setup_ledger, setup_ledger_with, TEST_BATCH_SIZE};
use recurring_ledger::{
    config::EngineConfig,
    core::rolling_job_key,
    domain::{Recurrence, RecurrencePeriod},
    scheduler::{JobScheduler, JobState},
    storage::TransactionRepository,
};
use rust_decimal_macros::dec;

#[test]
fn limited_monthly_series_is_generated_at_once() {
    let ledger = setup_ledger();
    let root = ledger
        .manager
        .transactions()
        .create(
            ledger.user,
            ledger
                .earning(date(2024, 1, 15), dec!(100))
                .recurring(Recurrence::new(RecurrencePeriod::Month).limited_to(10)),
        )
        .unwrap();

    let series = ledger
        .manager
        .transactions()
        .list_series(ledger.user, root.id)
        .unwrap();
    assert_eq!(series.len(), 10);
    for (k, occurrence) in series.iter().enumerate() {
        assert_eq!(occurrence.transacted_at, date(2024, 2 + k as u32, 15));
        assert_eq!(occurrence.origin_id, Some(root.id));
        assert!(!occurrence.is_accomplished);
        assert!(occurrence.recurrence.is_none());
    }

    let stored = ledger.manager.store().state().unwrap().transactions;
    assert_eq!(stored.len(), 11);
    assert!(ledger.manager.scheduler().is_empty().unwrap());
}

#[test]
fn open_daily_series_anchors_job_on_middle() {
    let ledger = setup_ledger();
    let root = ledger
        .manager
        .transactions()
        .create(
            ledger.user,
            ledger
                .debit(date(2024, 1, 1), dec!(3.50))
                .recurring(Recurrence::new(RecurrencePeriod::Day)),
        )
        .unwrap();

    let series = ledger
        .manager
        .transactions()
        .list_series(ledger.user, root.id)
        .unwrap();
    assert_eq!(series.len(), TEST_BATCH_SIZE);
    assert_eq!(series.last().unwrap().transacted_at, date(2024, 1, 11));

    let jobs = ledger
        .manager
        .scheduler()
        .jobs_by_key(&rolling_job_key(root.id))
        .unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].state, JobState::Scheduled(date(2024, 1, 6)));
}

#[test]
fn nothing_fires_before_the_anchor() {
    let ledger = setup_ledger();
    ledger
        .manager
        .transactions()
        .create(
            ledger.user,
            ledger
                .earning(date(2024, 1, 1), dec!(1))
                .recurring(Recurrence::new(RecurrencePeriod::Day)),
        )
        .unwrap();

    let report = ledger.manager.run_due_jobs(date(2024, 1, 5)).unwrap();
    assert_eq!(report.fired, 0);
    assert_eq!(ledger.manager.store().state().unwrap().transactions.len(), 11);
}

#[test]
fn rolling_job_keeps_the_window_ahead_of_today() {
    let ledger = setup_ledger();
    let root = ledger
        .manager
        .transactions()
        .create(
            ledger.user,
            ledger
                .earning(date(2024, 1, 1), dec!(1))
                .recurring(Recurrence::new(RecurrencePeriod::Day)),
        )
        .unwrap();

    let report = ledger.manager.run_due_jobs(date(2024, 3, 1)).unwrap();

    assert_eq!(report.fired, 6);
    assert_eq!(report.rescheduled, 6);
    assert_eq!(report.failed, 0);

    let series = ledger
        .manager
        .transactions()
        .list_series(ledger.user, root.id)
        .unwrap();
    assert_eq!(series.len(), 70);
    assert_eq!(series.first().unwrap().transacted_at, date(2024, 1, 2));
    assert_eq!(series.last().unwrap().transacted_at, date(2024, 3, 11));
    for pair in series.windows(2) {
        assert_eq!(
            pair[1].transacted_at - pair[0].transacted_at,
            chrono::Duration::days(1)
        );
    }

    let jobs = ledger
        .manager
        .scheduler()
        .jobs_by_key(&rolling_job_key(root.id))
        .unwrap();
    assert_eq!(jobs[0].state, JobState::Scheduled(date(2024, 3, 6)));
}

#[test]
fn job_retires_without_error_when_no_end_is_left() {
    let ledger = setup_ledger();
    let root = ledger
        .manager
        .transactions()
        .create(
            ledger.user,
            ledger
                .earning(date(2024, 1, 1), dec!(1))
                .recurring(Recurrence::new(RecurrencePeriod::Day)),
        )
        .unwrap();
    ledger.manager.store().delete_many_pending(&root).unwrap();

    let report = ledger.manager.run_due_jobs(date(2024, 1, 6)).unwrap();

    assert_eq!(report.fired, 1);
    assert_eq!(report.retired, 1);
    assert_eq!(report.failed, 0);
    assert!(ledger.manager.scheduler().is_empty().unwrap());
}

#[test]
fn weekly_series_with_explicit_amount_steps_in_days() {
    let ledger = setup_ledger();
    let root = ledger
        .manager
        .transactions()
        .create(
            ledger.user,
            ledger
                .debit(date(2024, 6, 1), dec!(12))
                .recurring(Recurrence::new(RecurrencePeriod::Week).every(3).limited_to(3)),
        )
        .unwrap();

    let dates: Vec<_> = ledger
        .manager
        .transactions()
        .list_series(ledger.user, root.id)
        .unwrap()
        .into_iter()
        .map(|txn| txn.transacted_at)
        .collect();
    assert_eq!(dates, vec![date(2024, 6, 4), date(2024, 6, 7), date(2024, 6, 10)]);
}

#[test]
fn yearly_series_from_leap_day_rolls_into_march() {
    let ledger = setup_ledger();
    let root = ledger
        .manager
        .transactions()
        .create(
            ledger.user,
            ledger
                .earning(date(2024, 2, 29), dec!(50))
                .recurring(Recurrence::new(RecurrencePeriod::Year).limited_to(4)),
        )
        .unwrap();

    let dates: Vec<_> = ledger
        .manager
        .transactions()
        .list_series(ledger.user, root.id)
        .unwrap()
        .into_iter()
        .map(|txn| txn.transacted_at)
        .collect();
    assert_eq!(
        dates,
        vec![
            date(2025, 3, 1),
            date(2026, 3, 1),
            date(2027, 3, 1),
            date(2028, 2, 29)
        ]
    );
}

#[test]
fn limit_above_configured_maximum_is_rejected() {
    let config = EngineConfig {
        max_recurrence_limit: 12,
        ..EngineConfig::default()
    };
    let ledger = setup_ledger_with(config);
    let result = ledger.manager.transactions().create(
        ledger.user,
        ledger
            .earning(date(2024, 1, 1), dec!(1))
            .recurring(Recurrence::new(RecurrencePeriod::Month).limited_to(13)),
    );
    assert!(result.is_err());
    assert!(ledger.manager.store().state().unwrap().transactions.is_empty());
}
