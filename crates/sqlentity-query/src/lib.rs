//! SQL construction for sqlentity.
//!
//! `sqlentity-query` is the **query construction layer**. It turns the
//! class metadata held by a `SchemaCatalog` into executable SQL plus
//! parameters.
//!
//! # Role In The Architecture
//!
//! - **Fragments**: `SqlFragment` and `Condition` carry canonical SQL with
//!   bare `?` markers and their values.
//! - **Statements**: `SqlSelect` is a plain SELECT builder with joins,
//!   conditions, ordering and limits.
//! - **Descriptors**: `QueryDescriptor` models the query behind one entity
//!   list. It joins relation chains and inheritance tables, resolves
//!   colliding columns, and runs count/exists/aggregate/column queries.
//!
//! Statements execute through the blocking `Database` trait from
//! `sqlentity-core`. Most users reach these types through the `sqlentity`
//! facade crate.

pub mod clause;
pub mod descriptor;
pub mod expr;
pub mod join;
pub mod select;

pub use clause::{Limit, OrderBy, SortDirection, parse_sort};
pub use descriptor::{FinalizedQuery, QueryDescriptor, relation_prefix};
pub use expr::{Condition, SqlFragment, placeholders, quote_column, quote_identifier, quote_string};
pub use join::{Join, JoinType};
pub use select::SqlSelect;
