//! `recap-store` — typed SQLite persistence for summaries, guild configs,
//! scheduled tasks, and task executions.
//!
//! Schema migrations are numbered and applied exactly once ([`db`]); a
//! fixed-size [`pool::Pool`] keeps one writer plus round-robin readers.
//! JSON-valued fields (lists, nested records) are stored as serialized
//! strings. All list queries order deterministically.

pub mod db;
pub mod error;
pub mod executions;
pub mod guilds;
pub mod pool;
pub mod summaries;
pub mod tasks;

pub use error::{Result, StoreError};
pub use summaries::{SummaryOrder, SummaryQuery};

use crate::pool::Pool;

/// Handle to the persistence layer. Cheap to share via `Arc`.
pub struct Store {
    pub(crate) pool: Pool,
}

impl Store {
    /// Open (or create) the database at `path`, run pending migrations, and
    /// build a pool of `pool_size` connections.
    pub fn open(path: &str, pool_size: usize) -> Result<Self> {
        if let Some(dir) = std::path::Path::new(path).parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)
                    .map_err(|e| StoreError::Transient(e.to_string()))?;
            }
        }
        let pool = Pool::open(path, pool_size)?;
        pool.with_write(|conn| db::run_migrations(conn))?;
        Ok(Self { pool })
    }

    /// Cheap liveness probe for /health.
    pub fn ping(&self) -> Result<()> {
        self.pool
            .with_read(|conn| conn.query_row("SELECT 1", [], |_| Ok(())).map_err(Into::into))
    }
}
