//! SQLite connection implementation.
//!
//! `SqliteDatabase` wraps a `rusqlite::Connection` behind a mutex and
//! implements the `Database` trait from sqlentity-core. Statements arrive in
//! canonical form and are rendered for SQLite (`?1`, `?2`, ...) before they
//! are prepared.

use crate::schema::SchemaBuilder;
use crate::types::{Param, read_value};
use rusqlite::{Connection, OpenFlags, params_from_iter};
use sqlentity_core::{
    ConfigError, Database, Dialect, Error, QueryErrorKind, Result, Row, SchemaCatalog, Value,
    row::ColumnInfo,
};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Configuration for opening SQLite connections.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Path to the database file, or ":memory:" for in-memory database.
    pub path: String,
    /// Open the database read-only.
    pub read_only: bool,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u32,
    /// Enforce FOREIGN KEY constraints.
    pub foreign_keys: bool,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: ":memory:".to_string(),
            read_only: false,
            busy_timeout_ms: 5000,
            foreign_keys: false,
        }
    }
}

impl SqliteConfig {
    /// Create a new config for a file-based database.
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Create a new config for an in-memory database.
    pub fn memory() -> Self {
        Self::default()
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Set busy timeout.
    pub fn busy_timeout(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = ms;
        self
    }

    pub fn foreign_keys(mut self, enabled: bool) -> Self {
        self.foreign_keys = enabled;
        self
    }

    fn open_flags(&self) -> OpenFlags {
        let mut flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
        };
        flags |= OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        flags
    }
}

/// A SQLite database.
///
/// All access goes through one mutex-protected connection, so the handle can
/// be shared as an `Arc<dyn Database>`.
pub struct SqliteDatabase {
    conn: Mutex<Connection>,
    path: String,
}

impl std::fmt::Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDatabase")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

fn driver_error(sql: Option<&str>, err: rusqlite::Error) -> Error {
    let kind = error_kind(&err);
    Error::query(kind, sql, err.to_string(), Some(Box::new(err)))
}

fn error_kind(err: &rusqlite::Error) -> QueryErrorKind {
    match err {
        rusqlite::Error::SqliteFailure(failure, message) => match failure.code {
            rusqlite::ErrorCode::ConstraintViolation => QueryErrorKind::Constraint,
            rusqlite::ErrorCode::NotFound => QueryErrorKind::NotFound,
            _ => {
                let message = message.as_deref().unwrap_or("");
                if message.starts_with("no such table") || message.starts_with("no such column") {
                    QueryErrorKind::NotFound
                } else if message.contains("syntax error") {
                    QueryErrorKind::Syntax
                } else {
                    QueryErrorKind::Database
                }
            }
        },
        rusqlite::Error::InvalidParameterCount(..) | rusqlite::Error::InvalidParameterName(_) => {
            QueryErrorKind::Syntax
        }
        _ => QueryErrorKind::Database,
    }
}

impl SqliteDatabase {
    /// Open a new SQLite database with the given configuration.
    pub fn open(config: &SqliteConfig) -> Result<Self> {
        let conn = Connection::open_with_flags(&config.path, config.open_flags()).map_err(|e| {
            Error::Config(ConfigError {
                message: format!("failed to open database '{}': {}", config.path, e),
                source: Some(Box::new(e)),
            })
        })?;
        if config.busy_timeout_ms > 0 {
            conn.busy_timeout(Duration::from_millis(u64::from(config.busy_timeout_ms)))
                .map_err(|e| driver_error(None, e))?;
        }
        if config.foreign_keys {
            conn.execute_batch("PRAGMA foreign_keys = ON")
                .map_err(|e| driver_error(Some("PRAGMA foreign_keys = ON"), e))?;
        }
        tracing::debug!(path = %config.path, read_only = config.read_only, "Opened SQLite database");
        Ok(Self {
            conn: Mutex::new(conn),
            path: config.path.clone(),
        })
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self> {
        Self::open(&SqliteConfig::memory())
    }

    /// Open a file-based database.
    pub fn open_file(path: impl Into<String>) -> Result<Self> {
        Self::open(&SqliteConfig::file(path))
    }

    /// Get the database path.
    pub fn path(&self) -> &str {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| {
            Error::query(
                QueryErrorKind::Database,
                None,
                "SQLite connection mutex poisoned",
                None,
            )
        })
    }

    /// Execute SQL directly, without parameters or rendering (for DDL, etc.)
    pub fn execute_raw(&self, sql: &str) -> Result<()> {
        self.lock()?
            .execute_batch(sql)
            .map_err(|e| driver_error(Some(sql), e))
    }

    /// Create every table the catalog describes.
    pub fn create_schema(&self, catalog: &SchemaCatalog) -> Result<()> {
        let statements = SchemaBuilder::new(catalog).if_not_exists().build()?;
        for sql in &statements {
            self.execute_raw(sql)?;
        }
        tracing::info!(tables = statements.len(), "Created schema");
        Ok(())
    }

    /// Run `f` inside a transaction, committing on success.
    pub fn transaction<T>(&self, f: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        self.execute_raw("BEGIN")?;
        match f(self) {
            Ok(value) => {
                self.execute_raw("COMMIT")?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = self.execute_raw("ROLLBACK") {
                    tracing::warn!(error = %rollback, "Rollback failed");
                }
                Err(err)
            }
        }
    }
}

impl Database for SqliteDatabase {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let start = Instant::now();
        let rendered = Dialect::Sqlite.render(sql);
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&rendered)
            .map_err(|e| driver_error(Some(sql), e))?;
        let names: Vec<String> = stmt.column_names().iter().map(|n| (*n).to_string()).collect();
        let width = names.len();
        let columns = Arc::new(ColumnInfo::new(names));

        let mut rows = stmt
            .query(params_from_iter(params.iter().map(Param)))
            .map_err(|e| driver_error(Some(sql), e))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(|e| driver_error(Some(sql), e))? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(read_value(
                    row.get_ref(i).map_err(|e| driver_error(Some(sql), e))?,
                ));
            }
            out.push(Row::with_columns(Arc::clone(&columns), values));
        }
        tracing::trace!(
            sql = %sql,
            rows = out.len(),
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            "SQLite query"
        );
        Ok(out)
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let start = Instant::now();
        let rendered = Dialect::Sqlite.render(sql);
        let affected = self
            .lock()?
            .execute(&rendered, params_from_iter(params.iter().map(Param)))
            .map_err(|e| driver_error(Some(sql), e))?;
        tracing::trace!(
            sql = %sql,
            affected,
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            "SQLite execute"
        );
        Ok(affected as u64)
    }

    fn last_insert_id(&self, _table: &str) -> Result<i64> {
        Ok(self.lock()?.last_insert_rowid())
    }

    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> SqliteDatabase {
        let db = SqliteDatabase::open_memory().unwrap();
        db.execute_raw("CREATE TABLE \"test\" (\"ID\" INTEGER PRIMARY KEY, \"Name\" TEXT, \"Age\" INTEGER)")
            .unwrap();
        db
    }

    #[test]
    fn test_open_memory() {
        let db = SqliteDatabase::open_memory().unwrap();
        assert_eq!(db.path(), ":memory:");
        assert_eq!(db.dialect(), Dialect::Sqlite);
    }

    #[test]
    fn test_parameterized_query() {
        let db = test_db();
        db.execute(
            "INSERT INTO \"test\" (\"Name\", \"Age\") VALUES (?, ?)",
            &[Value::from("Alice"), Value::Int(30)],
        )
        .unwrap();
        assert_eq!(db.last_insert_id("test").unwrap(), 1);

        let rows = db
            .query("SELECT * FROM \"test\" WHERE \"Name\" = ?", &[Value::from("Alice")])
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_named::<String>("Name").unwrap(), "Alice");
        assert_eq!(rows[0].get_named::<i32>("Age").unwrap(), 30);
    }

    #[test]
    fn test_null_handling() {
        let db = test_db();
        db.execute("INSERT INTO \"test\" (\"Name\") VALUES (?)", &[Value::Null])
            .unwrap();
        let rows = db.query("SELECT * FROM \"test\"", &[]).unwrap();
        assert_eq!(rows[0].get_named::<Option<String>>("Name").unwrap(), None);
    }

    #[test]
    fn test_query_scalar() {
        let db = test_db();
        db.execute_raw("INSERT INTO \"test\" (\"Name\") VALUES ('a'), ('b')")
            .unwrap();
        let count = db.query_scalar("SELECT COUNT(*) FROM \"test\"", &[]).unwrap();
        assert_eq!(count, Some(Value::Int(2)));
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = test_db();
        let result: Result<()> = db.transaction(|db| {
            db.execute("INSERT INTO \"test\" (\"Name\") VALUES (?)", &[Value::from("x")])?;
            Err(Error::Logic("abort".into()))
        });
        assert!(result.is_err());
        assert!(db.query("SELECT * FROM \"test\"", &[]).unwrap().is_empty());

        db.transaction(|db| db.execute("INSERT INTO \"test\" (\"Name\") VALUES ('y')", &[]))
            .unwrap();
        assert_eq!(db.query("SELECT * FROM \"test\"", &[]).unwrap().len(), 1);
    }

    #[test]
    fn test_error_kinds() {
        let db = test_db();
        let err = db.query("SELECT * FROM \"missing\"", &[]).unwrap_err();
        match err {
            Error::Query(q) => {
                assert_eq!(q.kind, QueryErrorKind::NotFound);
                assert_eq!(q.sql.as_deref(), Some("SELECT * FROM \"missing\""));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err = db.query("SELEC 1", &[]).unwrap_err();
        assert!(matches!(err, Error::Query(q) if q.kind == QueryErrorKind::Syntax));
    }
}
