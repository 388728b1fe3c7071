use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rusqlite::{Connection, Transaction};

use crate::db::open_connection;
use crate::error::Result;

/// Fixed-size connection pool over a single SQLite file.
///
/// One dedicated writer connection serializes all mutations (SQLite allows a
/// single writer per file anyway); the remaining connections serve reads
/// round-robin so queries don't queue behind writes.
pub struct Pool {
    writer: Arc<Mutex<Connection>>,
    readers: Vec<Arc<Mutex<Connection>>>,
    next_reader: AtomicUsize,
}

impl Pool {
    pub fn open(path: &str, size: usize) -> Result<Self> {
        let size = size.max(1);
        let writer = Arc::new(Mutex::new(open_connection(path)?));
        let mut readers = Vec::with_capacity(size.saturating_sub(1));
        for _ in 1..size {
            readers.push(Arc::new(Mutex::new(open_connection(path)?)));
        }
        Ok(Self {
            writer,
            readers,
            next_reader: AtomicUsize::new(0),
        })
    }

    /// Run a read-only query on the next reader connection.
    pub fn with_read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = if self.readers.is_empty() {
            &self.writer
        } else {
            let idx = self.next_reader.fetch_add(1, Ordering::Relaxed) % self.readers.len();
            &self.readers[idx]
        };
        let guard = conn.lock().unwrap();
        f(&guard)
    }

    /// Run a mutation on the writer connection.
    pub fn with_write<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.writer.lock().unwrap();
        f(&guard)
    }

    /// Group writes in a transaction. Rolls back when the closure errors,
    /// reporting the failing operation's error unchanged.
    pub fn with_tx<T>(&self, f: impl FnOnce(&Transaction) -> Result<T>) -> Result<T> {
        let mut guard = self.writer.lock().unwrap();
        let tx = guard.transaction()?;
        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                // Explicit for clarity; dropping the transaction also rolls back.
                let _ = tx.rollback();
                Err(e)
            }
        }
    }
}
