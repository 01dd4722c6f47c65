use std::{fs, path::Path};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{tmp_path, write_atomic};
use crate::errors::LedgerError;

use super::memory::{InMemoryStore, StoreState};

pub const CURRENT_SCHEMA_VERSION: u8 = 1;

/// Serialized form of an [`InMemoryStore`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreSnapshot {
    pub schema_version: u8,
    pub saved_at: DateTime<Utc>,
    #[serde(flatten)]
    pub state: StoreState,
}

impl StoreSnapshot {
    pub fn capture(store: &InMemoryStore) -> Result<Self, LedgerError> {
        Ok(Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            saved_at: Utc::now(),
            state: store.state()?,
        })
    }

    pub fn into_store(self, batch_size: usize) -> InMemoryStore {
        InMemoryStore::from_state(self.state, batch_size)
    }
}

/// Writes the store to disk atomically by staging to a temporary file.
pub fn save_snapshot_to_path(store: &InMemoryStore, path: &Path) -> Result<(), LedgerError> {
    let snapshot = StoreSnapshot::capture(store)?;
    let json = serde_json::to_string_pretty(&snapshot)?;
    let tmp = tmp_path(path);
    write_atomic(&tmp, &json)?;
    fs::rename(&tmp, path)?;
    tracing::info!(
        path = %path.display(),
        transactions = snapshot.state.transactions.len(),
        accounts = snapshot.state.accounts.len(),
        "store snapshot saved"
    );
    Ok(())
}

/// Loads a snapshot from disk, rejecting schema versions this build does not know.
pub fn load_snapshot_from_path(path: &Path) -> Result<StoreSnapshot, LedgerError> {
    let data = fs::read_to_string(path)?;
    let snapshot: StoreSnapshot = serde_json::from_str(&data)?;
    if snapshot.schema_version > CURRENT_SCHEMA_VERSION {
        return Err(LedgerError::Storage(format!(
            "snapshot schema v{} is newer than supported v{}",
            snapshot.schema_version, CURRENT_SCHEMA_VERSION
        )));
    }
    Ok(snapshot)
}
