//! SQLite-backed [`StorageHandle`].

use crate::core::actor::StorageHandle;
use crate::core::error::MigrationError;
use crate::core::schemas;
use crate::core::sql::{self, SqlValue};
use rusqlite::{Connection, params_from_iter};
use std::cell::RefCell;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

pub fn db_connect(db_path: &str) -> Result<Connection, MigrationError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))?;
    conn.execute("PRAGMA foreign_keys=ON;", [])?;
    Ok(conn)
}

thread_local! {
    /// Addresses of the [`SqliteDb`] connections held by this thread.
    static HELD: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Releases a `HELD` entry even when the closure panics.
struct HeldGuard(usize);

impl Drop for HeldGuard {
    fn drop(&mut self) {
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(pos) = held.iter().rposition(|&a| a == self.0) {
                held.remove(pos);
            }
        });
    }
}

/// One SQLite database belonging to a storage domain. The connection is
/// serialized behind a mutex; callers share the handle with `Arc`.
///
/// The lock is not re-entrant. Engine calls that write through this handle
/// (`build_insert_values*`, [`DeferredWrite::complete`], the SQLite actor
/// store) must run outside [`SqliteDb::with_conn`]; calling them from inside
/// the closure fails with a usage error.
///
/// [`DeferredWrite::complete`]: crate::core::write::DeferredWrite::complete
pub struct SqliteDb {
    domain_id: String,
    conn: Mutex<Connection>,
}

impl SqliteDb {
    pub fn open(path: &Path, domain_id: &str) -> Result<Self, MigrationError> {
        let conn = db_connect(&path.to_string_lossy())?;
        Ok(Self::from_connection(conn, domain_id))
    }

    pub fn open_in_memory(domain_id: &str) -> Result<Self, MigrationError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self::from_connection(conn, domain_id))
    }

    pub fn from_connection(conn: Connection, domain_id: &str) -> Self {
        Self {
            domain_id: domain_id.to_string(),
            conn: Mutex::new(conn),
        }
    }

    /// Create the `actor` table if it does not exist yet.
    pub fn initialize_actor_table(&self) -> Result<(), MigrationError> {
        self.with_conn(|conn| {
            conn.execute(schemas::ACTOR_DB_SCHEMA, [])?;
            Ok(())
        })
    }

    /// Execute a closure with the serialized connection. Nested use on the
    /// same thread is rejected instead of deadlocking.
    pub fn with_conn<F, R>(&self, f: F) -> Result<R, MigrationError>
    where
        F: FnOnce(&Connection) -> Result<R, MigrationError>,
    {
        let addr = self as *const Self as usize;
        let nested = HELD.with(|held| {
            let mut held = held.borrow_mut();
            if held.contains(&addr) {
                true
            } else {
                held.push(addr);
                false
            }
        });
        if nested {
            return Err(MigrationError::UsageError(format!(
                "connection for '{}' is already held by this thread; \
                 run engine writes outside with_conn",
                self.domain_id
            )));
        }
        let _held = HeldGuard(addr);
        let conn = self.lock()?;
        f(&conn)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, MigrationError> {
        self.conn.lock().map_err(|_| {
            MigrationError::ConfigurationError(format!(
                "SQLite connection lock for '{}' poisoned",
                self.domain_id
            ))
        })
    }
}

impl StorageHandle for SqliteDb {
    fn domain_id(&self) -> &str {
        &self.domain_id
    }

    fn upsert(
        &self,
        table: &str,
        unique_key: &str,
        row: &[(String, SqlValue)],
        set: &[(String, SqlValue)],
    ) -> Result<(), MigrationError> {
        sql::check_identifier(table, "Upsert table")?;
        sql::check_identifier(unique_key, "Upsert key")?;
        for (column, _) in row.iter().chain(set) {
            sql::check_identifier(column, "Upsert column")?;
        }
        if row.is_empty() {
            return Err(MigrationError::UsageError(format!(
                "upsert into '{table}' with no columns"
            )));
        }

        let columns: Vec<&str> = row.iter().map(|(c, _)| c.as_str()).collect();
        let placeholders: Vec<String> = (1..=row.len()).map(|i| format!("?{i}")).collect();
        let conflict = if set.is_empty() {
            "DO NOTHING".to_string()
        } else {
            let assignments: Vec<String> = set
                .iter()
                .map(|(c, _)| format!("{c} = excluded.{c}"))
                .collect();
            format!("DO UPDATE SET {}", assignments.join(", "))
        };
        let statement = format!(
            "INSERT INTO {table} ({}) VALUES ({}) ON CONFLICT({unique_key}) {conflict}",
            columns.join(", "),
            placeholders.join(", "),
        );

        self.with_conn(|conn| {
            conn.execute(&statement, params_from_iter(row.iter().map(|(_, v)| v)))?;
            Ok(())
        })
    }
}
