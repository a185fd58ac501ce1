//! Core types for sqlentity.
//!
//! This crate holds everything the query engine needs that does not build SQL:
//!
//! - `Value` and `Row` for parameters and result sets
//! - the blocking `Database` boundary and its `Dialect`
//! - `EngineConfig` for engine-wide knobs
//! - the `schema` module: entity declarations and the `SchemaCatalog`

pub mod config;
pub mod connection;
pub mod error;
pub mod ordered;
pub mod pattern;
pub mod row;
pub mod schema;
pub mod value;

pub use config::EngineConfig;
pub use connection::{Database, Dialect};
pub use error::{
    ChainError, ConfigError, Error, QueryError, QueryErrorKind, RelationError, Result,
    SchemaError, SchemaErrorKind, TypeError,
};
pub use ordered::OrderedMap;
pub use row::{ColumnInfo, FromValue, Row};
pub use schema::{
    ClassDeclaration, FieldOptions, FieldSpec, FieldType, JoinSource, ManyManyComponent,
    Relation, RelationKind, RemoteJoin, SchemaCatalog, SchemaDeclaration,
};
pub use value::Value;
