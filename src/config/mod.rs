use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};

use crate::errors::LedgerError;
use crate::utils::{app_data_dir, ensure_dir};

const CONFIG_FILE: &str = "config.json";
const TMP_SUFFIX: &str = "tmp";

pub const DEFAULT_BATCH_SIZE: usize = 200;
pub const DEFAULT_MAX_RECURRENCE_LIMIT: u32 = 1000;
pub const DEFAULT_MAX_DESCRIPTION_LEN: usize = 255;
pub const DEFAULT_LOG_FILTER: &str = "recurring_ledger=info";

/// Tunables for the recurrence engine and validation layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Occurrences generated per pass for open-ended series.
    pub batch_size: usize,
    /// Upper bound accepted for `recurrence.limit`; limited series are generated in one pass.
    pub max_recurrence_limit: u32,
    pub max_description_len: usize,
    pub log_filter: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_recurrence_limit: DEFAULT_MAX_RECURRENCE_LIMIT,
            max_description_len: DEFAULT_MAX_DESCRIPTION_LEN,
            log_filter: DEFAULT_LOG_FILTER.into(),
        }
    }
}

impl EngineConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.batch_size < 2 {
            return Err(LedgerError::Config(format!(
                "batch_size must be at least 2, got {}",
                self.batch_size
            )));
        }
        if self.max_recurrence_limit == 0 {
            return Err(LedgerError::Config(
                "max_recurrence_limit must be positive".into(),
            ));
        }
        if self.max_description_len == 0 {
            return Err(LedgerError::Config(
                "max_description_len must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Loads and persists [`EngineConfig`] as JSON inside the application data directory.
pub struct ConfigManager {
    path: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self, LedgerError> {
        Self::with_base_dir(app_data_dir())
    }

    pub fn with_base_dir(base: PathBuf) -> Result<Self, LedgerError> {
        ensure_dir(&base)?;
        Ok(Self {
            path: base.join(CONFIG_FILE),
        })
    }

    /// Reads the stored configuration, falling back to defaults when none exists yet.
    pub fn load(&self) -> Result<EngineConfig, LedgerError> {
        let config = if self.path.exists() {
            let data = fs::read_to_string(&self.path)?;
            serde_json::from_str(&data)?
        } else {
            EngineConfig::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, config: &EngineConfig) -> Result<(), LedgerError> {
        config.validate()?;
        if let Some(parent) = self.path.parent() {
            ensure_dir(parent)?;
        }
        let json = serde_json::to_string_pretty(config)?;
        let tmp = tmp_path(&self.path);
        write_atomic(&tmp, &json)?;
        fs::rename(&tmp, &self.path)?;
        tracing::debug!(path = %self.path.display(), "engine configuration saved");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub(crate) fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.to_path_buf();
    let ext = match path.extension().and_then(|ext| ext.to_str()) {
        Some(existing) => format!("{}.{}", existing, TMP_SUFFIX),
        None => TMP_SUFFIX.to_string(),
    };
    tmp.set_extension(ext);
    tmp
}

pub(crate) fn write_atomic(path: &Path, data: &str) -> Result<(), LedgerError> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let mut file = File::create(path)?;
    file.write_all(data.as_bytes())?;
    file.flush()?;
    Ok(())
}
