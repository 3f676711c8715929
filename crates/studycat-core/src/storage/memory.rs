use std::collections::HashMap;
use std::sync::Mutex;

use super::KvStore;
use crate::error::{Result, StorageError};

/// In-process store for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut HashMap<String, String>) -> Result<T>) -> Result<T> {
        let mut records = self.records.lock().map_err(|_| StorageError::Poisoned)?;
        f(&mut records)
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.with(|r| Ok(r.get(key).cloned()))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.with(|r| {
            r.insert(key.to_string(), value.to_string());
            Ok(())
        })
    }

    fn set_many(&self, entries: &[(&str, &str)]) -> Result<()> {
        self.with(|r| {
            for (key, value) in entries {
                r.insert(key.to_string(), value.to_string());
            }
            Ok(())
        })
    }

    fn update(
        &self,
        key: &str,
        f: &mut dyn FnMut(Option<String>) -> Result<Option<String>>,
    ) -> Result<()> {
        self.with(|r| {
            if let Some(next) = f(r.get(key).cloned())? {
                r.insert(key.to_string(), next);
            }
            Ok(())
        })
    }

    fn update_many(
        &self,
        keys: &[&str],
        f: &mut dyn FnMut(Vec<Option<String>>) -> Result<Vec<(String, String)>>,
    ) -> Result<()> {
        self.with(|r| {
            let current = keys.iter().map(|key| r.get(*key).cloned()).collect();
            for (key, value) in f(current)? {
                r.insert(key, value);
            }
            Ok(())
        })
    }
}
