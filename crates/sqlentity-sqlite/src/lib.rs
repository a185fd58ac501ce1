//! SQLite database for sqlentity.
//!
//! This crate implements the `Database` trait from sqlentity-core on top of
//! `rusqlite`, and can create the tables a `SchemaCatalog` describes.
//!
//! # Example
//!
//! ```rust,ignore
//! use sqlentity_sqlite::SqliteDatabase;
//!
//! let db = SqliteDatabase::open_memory()?;
//! db.create_schema(&catalog)?;
//! let orm = Orm::new(Arc::new(catalog), Arc::new(db));
//! ```
//!
//! # Type Mapping
//!
//! | Value | SQLite Type |
//! |-------|-------------|
//! | `Bool` | INTEGER (0/1) |
//! | `Int`, `BigInt` | INTEGER |
//! | `Double` | REAL |
//! | `Text`, `Decimal` | TEXT |
//! | `Bytes` | BLOB |
//! | `Json` | TEXT |
//! | `Null` | NULL |
//!
//! Integers read back as `Int` when they fit in 32 bits, `BigInt` otherwise.

pub mod connection;
pub mod schema;
pub mod types;

pub use connection::{SqliteConfig, SqliteDatabase};
pub use schema::SchemaBuilder;

/// Version of the linked SQLite library.
pub fn sqlite_version() -> &'static str {
    rusqlite::version()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_version() {
        let version = sqlite_version();
        assert!(
            version.starts_with('3'),
            "Expected SQLite 3.x, got {}",
            version
        );
    }
}
