//! SQLite-backed record store.
//!
//! Every record lives in one `kv` table as a JSON or plain-text value. The
//! connection is shared behind a mutex; cross-process writers are serialized
//! by SQLite itself (`BEGIN IMMEDIATE` plus a busy timeout).

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use super::{data_dir, KvStore};
use crate::error::{Result, StorageError};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite database holding the persisted records.
pub struct Database {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("path", &self.path).finish()
    }
}

impl Database {
    /// Open the database at `<data_dir>/studycat.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self> {
        let path = data_dir()?.join("studycat.db");
        Self::open_at(&path)
    }

    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|source| StorageError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let db = Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Open a private in-memory database.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| StorageError::OpenFailed {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        let db = Self {
            conn: Mutex::new(conn),
            path: None,
        };
        db.migrate()?;
        Ok(db)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::Poisoned.into())
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;
        Ok(())
    }
}

fn read(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
        row.get(0)
    })
    .optional()
}

fn write(conn: &Connection, key: &str, value: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO kv (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

impl KvStore for Database {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        Ok(read(&conn, key)?)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.lock()?;
        write(&conn, key, value)?;
        Ok(())
    }

    fn set_many(&self, entries: &[(&str, &str)]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        for (key, value) in entries {
            write(&tx, key, value)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn update(
        &self,
        key: &str,
        f: &mut dyn FnMut(Option<String>) -> Result<Option<String>>,
    ) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current = read(&tx, key)?;
        // Dropping `tx` on error rolls back.
        if let Some(next) = f(current)? {
            write(&tx, key, &next)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn update_many(
        &self,
        keys: &[&str],
        f: &mut dyn FnMut(Vec<Option<String>>) -> Result<Vec<(String, String)>>,
    ) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current = keys
            .iter()
            .map(|key| read(&tx, key))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for (key, value) in f(current)? {
            write(&tx, &key, &value)?;
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;

    #[test]
    fn missing_key_reads_none() {
        let db = Database::open_memory().unwrap();
        assert_eq!(db.get("nope").unwrap(), None);
    }

    #[test]
    fn set_overwrites() {
        let db = Database::open_memory().unwrap();
        db.set("a", "1").unwrap();
        db.set("a", "2").unwrap();
        assert_eq!(db.get("a").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn set_many_writes_all() {
        let db = Database::open_memory().unwrap();
        db.set_many(&[("pts:balance", "5"), ("pts:token", "{}")])
            .unwrap();
        assert_eq!(db.get("pts:balance").unwrap().as_deref(), Some("5"));
        assert_eq!(db.get("pts:token").unwrap().as_deref(), Some("{}"));
    }

    #[test]
    fn update_sees_current_value_and_may_skip() {
        let db = Database::open_memory().unwrap();
        db.update("n", &mut |cur| {
            assert!(cur.is_none());
            Ok(Some("1".into()))
        })
        .unwrap();
        db.update("n", &mut |cur| {
            assert_eq!(cur.as_deref(), Some("1"));
            Ok(None)
        })
        .unwrap();
        assert_eq!(db.get("n").unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn failed_update_writes_nothing() {
        let db = Database::open_memory().unwrap();
        db.set("n", "1").unwrap();
        let err = db
            .update("n", &mut |_| Err(CoreError::Custom("boom".into())))
            .unwrap_err();
        assert!(matches!(err, CoreError::Custom(_)));
        assert_eq!(db.get("n").unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn update_many_is_atomic_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("studycat.db");
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let db = Database::open_at(&path).unwrap();
                    for _ in 0..25 {
                        db.update_many(&["a", "b"], &mut |cur| {
                            let a: u64 = cur[0].as_deref().unwrap_or("0").parse().unwrap();
                            let b: u64 = cur[1].as_deref().unwrap_or("0").parse().unwrap();
                            assert_eq!(a, b);
                            Ok(vec![
                                ("a".into(), (a + 1).to_string()),
                                ("b".into(), (b + 1).to_string()),
                            ])
                        })
                        .unwrap();
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }
        let db = Database::open_at(&path).unwrap();
        assert_eq!(db.get("a").unwrap().as_deref(), Some("100"));
        assert_eq!(db.get("b").unwrap().as_deref(), Some("100"));
    }

    #[test]
    fn update_many_writes_nothing_on_empty_or_error() {
        let db = Database::open_memory().unwrap();
        db.set("a", "1").unwrap();
        db.update_many(&["a", "missing"], &mut |cur| {
            assert_eq!(cur, vec![Some("1".to_string()), None]);
            Ok(Vec::new())
        })
        .unwrap();
        let err = db
            .update_many(&["a"], &mut |_| Err(CoreError::Custom("boom".into())))
            .unwrap_err();
        assert!(matches!(err, CoreError::Custom(_)));
        assert_eq!(db.get("a").unwrap().as_deref(), Some("1"));
        assert_eq!(db.get("missing").unwrap(), None);
    }

    #[test]
    fn reopen_keeps_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("studycat.db");
        {
            let db = Database::open_at(&path).unwrap();
            db.set("studyTimer:v1", "{\"running\":false}").unwrap();
        }
        let db = Database::open_at(&path).unwrap();
        assert_eq!(
            db.get("studyTimer:v1").unwrap().as_deref(),
            Some("{\"running\":false}")
        );
        assert_eq!(db.path(), Some(path.as_path()));
    }
}
