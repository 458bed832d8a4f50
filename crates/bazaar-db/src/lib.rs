pub mod error;
pub mod migrations;
pub mod models;
pub mod queries;

pub use error::DbError;

use anyhow::Result;
use rusqlite::{Connection, OpenFlags, Transaction, TransactionBehavior};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;

const READER_POOL_SIZE: usize = 4;

/// SQLite store with one writer connection and a small pool of read-only
/// connections. All writes are serialised through the writer mutex.
pub struct Database {
    writer: Mutex<Connection>,
    readers: Vec<Mutex<Connection>>,
    reader_idx: AtomicUsize,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let writer = Connection::open(path)?;

        // WAL mode for concurrent reads
        writer.pragma_update(None, "journal_mode", "WAL")?;
        writer.pragma_update(None, "foreign_keys", "ON")?;
        writer.busy_timeout(std::time::Duration::from_secs(5))?;

        migrations::run(&writer)?;

        let mut readers = Vec::with_capacity(READER_POOL_SIZE);
        for _ in 0..READER_POOL_SIZE {
            let conn = Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            conn.busy_timeout(std::time::Duration::from_secs(5))?;
            readers.push(Mutex::new(conn));
        }

        info!(
            "Database opened at {} (1 writer + {} readers)",
            path.display(),
            READER_POOL_SIZE
        );
        Ok(Self {
            writer: Mutex::new(writer),
            readers,
            reader_idx: AtomicUsize::new(0),
        })
    }

    /// Private in-memory database; reads share the writer connection.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;

        Ok(Self {
            writer: Mutex::new(conn),
            readers: Vec::new(),
            reader_idx: AtomicUsize::new(0),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&Connection) -> Result<T, DbError>,
    {
        if self.readers.is_empty() {
            return self.with_conn_mut(f);
        }
        let idx = self.reader_idx.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        let conn = self.readers[idx].lock().map_err(|_| DbError::LockPoisoned)?;
        f(&conn)
    }

    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&Connection) -> Result<T, DbError>,
    {
        let conn = self.writer.lock().map_err(|_| DbError::LockPoisoned)?;
        f(&conn)
    }

    /// Run `f` inside an IMMEDIATE transaction on the writer. The write lock
    /// is taken up front, so reads made inside `f` cannot go stale before
    /// commit. Any error rolls the whole transaction back.
    pub fn with_tx<F, T>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, DbError>,
    {
        let mut conn = self.writer.lock().map_err(|_| DbError::LockPoisoned)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::fixtures;
    use std::path::PathBuf;

    /// Database file under the temp dir, removed (with its WAL files) on drop.
    struct TempDb(PathBuf);

    impl TempDb {
        fn new(name: &str) -> Self {
            let path = std::env::temp_dir().join(format!(
                "bazaar-{}-{}-{}.db",
                name,
                std::process::id(),
                chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
            ));
            Self(path)
        }
    }

    impl Drop for TempDb {
        fn drop(&mut self) {
            for suffix in ["", "-wal", "-shm"] {
                let mut file = self.0.clone().into_os_string();
                file.push(suffix);
                let _ = std::fs::remove_file(file);
            }
        }
    }

    #[test]
    fn readers_see_committed_writes() {
        let tmp = TempDb::new("readers");
        let db = Database::open(&tmp.0).unwrap();
        assert_eq!(db.readers.len(), READER_POOL_SIZE);

        let user = fixtures::user(&db, "alice");
        let product = fixtures::product(&db, "Kettle", "19.99", 5);
        db.add_to_cart(user, product, 3).unwrap();

        // Round-robin over every reader connection.
        for _ in 0..READER_POOL_SIZE * 2 {
            let view = db.get_product(Some(user), product).unwrap().unwrap();
            assert_eq!(view.stock, 2);
        }
        let cart = db.get_cart_for_user(user).unwrap().unwrap();
        assert_eq!(db.get_cart_items(&[cart.id]).unwrap().len(), 1);
    }

    #[test]
    fn reader_connections_are_read_only() {
        let tmp = TempDb::new("readonly");
        let db = Database::open(&tmp.0).unwrap();

        let result = db.with_conn(|conn| {
            conn.execute("INSERT INTO categories (name, slug) VALUES ('x', 'x')", [])?;
            Ok(())
        });
        assert!(matches!(result, Err(DbError::Sqlite(_))));
        assert!(db.get_category_by_slug("x").unwrap().is_none());
    }

    #[test]
    fn reopening_keeps_data_and_schema() {
        let tmp = TempDb::new("reopen");
        {
            let db = Database::open(&tmp.0).unwrap();
            fixtures::user(&db, "alice");
        }

        let db = Database::open(&tmp.0).unwrap();
        let user = db.get_user_by_username("alice").unwrap().unwrap();
        assert!(db.get_cart_for_user(user.id).unwrap().is_some());
    }
}
