//! sqlentity - a metadata-driven ORM query engine.
//!
//! Entity classes, their inheritance and their relations are declared once
//! (in code or JSON). From that metadata sqlentity builds SQL for joined-table
//! inheritance hierarchies, resolves relation chains into joins, and loads
//! related records in batches instead of one query per record.
//!
//! - **Schema catalog**: classes to tables, columns and relation join keys
//! - **Query descriptor**: joins, column collisions and sort-column injection
//! - **Entity lists**: immutable, chainable, lazily executed
//! - **Eager loading**: one query per relation level, never per record
//!
//! # Quick Start
//!
//! ```ignore
//! use sqlentity::prelude::*;
//!
//! let catalog = SchemaCatalog::new(
//!     SchemaDeclaration::new()
//!         .class(ClassDeclaration::new("Team").field("Title", "Varchar").has_many("Players", "Player"))
//!         .class(ClassDeclaration::new("Player").field("Name", "Varchar").has_one("Team", "Team")),
//! )?;
//! let orm = sqlentity::open_sqlite_memory(catalog)?;
//!
//! let teams = orm.list("Team")?.sort("Title")?.eager_load(&["Players"])?;
//! for team in teams.iter()? {
//!     let players = orm.components(&team, "Players")?; // already loaded
//!     println!("{}: {}", team.get_as::<String>("Title")?, players.count()?);
//! }
//! ```
//!
//! # Crates
//!
//! - `sqlentity-core`: values, rows, errors, the `Database` boundary, the catalog
//! - `sqlentity-query`: SQL fragments, `SqlSelect`, `QueryDescriptor`
//! - `sqlentity-list`: `Orm`, `EntityList`, eager loading, relation lists
//! - `sqlentity-sqlite`: `rusqlite`-backed `Database` (feature `sqlite`)

pub use sqlentity_core::{
    ChainError, ClassDeclaration, ConfigError, Database, Dialect, EngineConfig, Error,
    FieldType, FromValue, ManyManyComponent, OrderedMap, QueryError, QueryErrorKind, Relation,
    RelationKind, Result, Row, SchemaCatalog, SchemaDeclaration, SchemaErrorKind, Value,
};

pub use sqlentity_query::{
    Condition, Join, JoinType, Limit, OrderBy, QueryDescriptor, SortDirection, SqlSelect,
};

pub use sqlentity_list::{
    EagerRegistry, EagerValue, Entity, EntityList, FilterValue, GetOneCache, HasManyList,
    ListAlteration, ManyManyList, Orm, PreloadedList, QueryStats, QueryTracker, Record,
    RelationList, RelationWriter, UnsavedItem, UnsavedRelationList,
};

#[cfg(feature = "sqlite")]
pub use sqlentity_sqlite::{SchemaBuilder, SqliteConfig, SqliteDatabase};

/// Open an in-memory SQLite database, create the catalog's tables and
/// return an `Orm` over it.
#[cfg(feature = "sqlite")]
pub fn open_sqlite_memory(catalog: SchemaCatalog) -> Result<Orm> {
    let db = SqliteDatabase::open_memory()?;
    db.create_schema(&catalog)?;
    tracing::debug!(classes = catalog.classes().count(), "Opened in-memory sqlentity database");
    Ok(Orm::new(std::sync::Arc::new(catalog), std::sync::Arc::new(db)))
}

/// Prelude for common imports.
///
/// ```ignore
/// use sqlentity::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        ClassDeclaration, Database, EngineConfig, Entity, EntityList, Error, FilterValue, Orm,
        Record, RelationList, Result, Row, SchemaCatalog, SchemaDeclaration, SortDirection, Value,
    };

    #[cfg(feature = "sqlite")]
    pub use crate::SqliteDatabase;
}

#[cfg(all(test, feature = "sqlite"))]
mod inheritance_tests {
    use super::*;

    fn catalog() -> SchemaCatalog {
        SchemaCatalog::new(
            SchemaDeclaration::new()
                .class(ClassDeclaration::new("Person").field("Name", "Varchar"))
                .class(ClassDeclaration::new("Student").parent("Person").field("Grade", "Varchar(2)")),
        )
        .unwrap()
    }

    #[test]
    fn test_open_sqlite_memory_creates_tables() {
        let orm = open_sqlite_memory(catalog()).unwrap();
        orm.db()
            .execute(
                "INSERT INTO \"Person\" (\"ClassName\", \"Name\") VALUES ('Student', 'Alice')",
                &[],
            )
            .unwrap();
        let id = orm.db().last_insert_id("Person").unwrap();
        orm.db()
            .execute(
                "INSERT INTO \"Student\" (\"ID\", \"Grade\") VALUES (?, 'A')",
                &[Value::BigInt(id)],
            )
            .unwrap();

        let student = orm.get_by_id("Student", id).unwrap().unwrap();
        assert_eq!(student.class(), "Student");
        assert_eq!(student.get_as::<String>("Name").unwrap(), "Alice");
        assert_eq!(student.get_as::<String>("Grade").unwrap(), "A");
    }

    #[test]
    fn test_root_list_reports_concrete_class() {
        let orm = open_sqlite_memory(catalog()).unwrap();
        orm.db()
            .execute(
                "INSERT INTO \"Person\" (\"ClassName\", \"Name\") VALUES ('Person', 'Bob'), ('Student', 'Eve')",
                &[],
            )
            .unwrap();
        let classes: Vec<String> = orm
            .list("Person")
            .unwrap()
            .sort("Name")
            .unwrap()
            .to_vec()
            .unwrap()
            .iter()
            .map(|r| r.class().to_string())
            .collect();
        assert_eq!(classes, vec!["Person", "Student"]);
    }
}
