mod config;
pub mod database;
mod memory;

pub use config::{Config, HeartbeatConfig, LedgerConfig, TimerConfig};
pub use database::Database;
pub use memory::MemoryStore;

use std::path::PathBuf;

use crate::error::{ConfigError, Result};

/// Persisted key-value records shared by every service.
///
/// Implementations must make [`KvStore::update`], [`KvStore::update_many`]
/// and [`KvStore::set_many`] atomic with respect to every other writer of the
/// same store.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Write several records in one transaction.
    fn set_many(&self, entries: &[(&str, &str)]) -> Result<()>;

    /// Read-modify-write of one record.
    ///
    /// `f` receives the current value and returns the value to store, or
    /// `None` to leave the record untouched. An error from `f` aborts the
    /// update without writing.
    fn update(
        &self,
        key: &str,
        f: &mut dyn FnMut(Option<String>) -> Result<Option<String>>,
    ) -> Result<()>;

    /// Read-modify-write spanning several records.
    ///
    /// `f` receives the current values of `keys`, in order, and returns the
    /// records to write. An empty list writes nothing; an error aborts.
    fn update_many(
        &self,
        keys: &[&str],
        f: &mut dyn FnMut(Vec<Option<String>>) -> Result<Vec<(String, String)>>,
    ) -> Result<()>;
}

/// Returns `~/.config/studycat[-dev]/` based on STUDYCAT_ENV.
///
/// Set STUDYCAT_ENV=dev to use the development data directory, or
/// STUDYCAT_DATA_DIR to point somewhere else entirely.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let dir = match std::env::var_os("STUDYCAT_DATA_DIR") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");
            let env = std::env::var("STUDYCAT_ENV").unwrap_or_else(|_| "production".to_string());
            if env == "dev" {
                base_dir.join("studycat-dev")
            } else {
                base_dir.join("studycat")
            }
        }
    };

    std::fs::create_dir_all(&dir)
        .map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}
