#![doc(test(attr(deny(warnings))))]

//! Recurring Ledger materializes recurring transactions into concrete occurrences,
//! keeps open-ended series topped up through a rolling job, and keeps bank account
//! balances consistent with each transaction's accomplished state.

pub mod config;
pub mod core;
pub mod domain;
pub mod errors;
pub mod scheduler;
pub mod storage;
pub mod utils;

use std::sync::Once;

use crate::config::EngineConfig;

static INIT_TRACING: Once = Once::new();

/// Initializes global tracing and emits a startup info log.
pub fn init() {
    init_with(&EngineConfig::default());
}

/// Same as [`init`], using the log filter from `config`.
pub fn init_with(config: &EngineConfig) {
    INIT_TRACING.call_once(|| {
        utils::init_tracing_with(&config.log_filter);
        tracing::info!("Recurring ledger tracing initialized.");
    });
}
