//! Coordination store shared by worker processes through a SQLite file

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use rusqlite_migration::{M, Migrations};

use super::CoordinationStore;
use crate::storage::run_migrations;

fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(
        r#"
        CREATE TABLE kv (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            expires_at INTEGER  -- unix millis, NULL = never
        );
        "#,
    )])
}

/// Key/value store in its own SQLite database
///
/// Separate from the mail database so lock traffic never contends with
/// record transactions.
pub struct SqliteCoordination {
    conn: Mutex<Connection>,
}

impl SqliteCoordination {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }

        let mut conn = Connection::open(path)
            .with_context(|| format!("Failed to open coordination database at {:?}", path))?;

        conn.execute_batch(
            r#"
            PRAGMA busy_timeout = 5000;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            "#,
        )?;

        run_migrations(&mut conn, &migrations()).context("Failed to run coordination migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("coordination database mutex poisoned"))
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

impl CoordinationStore for SqliteCoordination {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM kv
                 WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
                params![key, now_millis()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO kv (key, value, expires_at) VALUES (?, ?, NULL)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = NULL",
            params![key, value],
        )?;
        Ok(())
    }

    fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let now = now_millis();
        let expires_at = now.saturating_add(ttl.as_millis().min(i64::MAX as u128) as i64);

        let mut conn = self.conn()?;
        // IMMEDIATE takes the write lock up front, so the expiry sweep and the
        // insert are atomic across processes
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "DELETE FROM kv WHERE key = ? AND expires_at IS NOT NULL AND expires_at <= ?",
            params![key, now],
        )?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO kv (key, value, expires_at) VALUES (?, ?, ?)",
            params![key, value, expires_at],
        )?;
        tx.commit()?;

        Ok(inserted == 1)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM kv WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
            params![key, now_millis()],
        )?;
        // sweep an expired leftover too
        conn.execute("DELETE FROM kv WHERE key = ?", [key])?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_test_store() -> (SqliteCoordination, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = SqliteCoordination::new(dir.path().join("coordination.test.sqlite")).unwrap();
        (store, dir)
    }

    #[test]
    fn test_concurrent_opens_all_succeed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("coordination.test.sqlite");
        let barrier = std::sync::Arc::new(std::sync::Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let path = path.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    SqliteCoordination::new(&path).map(|_| ())
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }
    }

    #[test]
    fn test_set_nx_ex_only_once() {
        let (store, _dir) = create_test_store();
        assert!(store.set_nx_ex("k", "a", Duration::from_secs(60)).unwrap());
        assert!(!store.set_nx_ex("k", "b", Duration::from_secs(60)).unwrap());
        assert_eq!(store.get("k").unwrap().as_deref(), Some("a"));
    }

    #[test]
    fn test_expired_key_can_be_reacquired() {
        let (store, _dir) = create_test_store();
        assert!(store.set_nx_ex("k", "a", Duration::ZERO).unwrap());
        assert!(store.get("k").unwrap().is_none());
        assert!(store.set_nx_ex("k", "b", Duration::from_secs(60)).unwrap());
        assert_eq!(store.get("k").unwrap().as_deref(), Some("b"));
    }

    #[test]
    fn test_two_handles_share_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shared.test.sqlite");
        let first = SqliteCoordination::new(&path).unwrap();
        let second = SqliteCoordination::new(&path).unwrap();

        assert!(first.set_nx_ex("locks:sync:1", "w1", Duration::from_secs(60)).unwrap());
        assert!(!second.set_nx_ex("locks:sync:1", "w2", Duration::from_secs(60)).unwrap());

        assert!(second.delete("locks:sync:1").unwrap());
        assert!(first.set_nx_ex("locks:sync:1", "w1", Duration::from_secs(60)).unwrap());
    }

    #[test]
    fn test_set_overwrites_and_clears_expiry() {
        let (store, _dir) = create_test_store();
        store.set_nx_ex("k", "a", Duration::ZERO).unwrap();
        store.set("k", "b").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("b"));
    }
}
