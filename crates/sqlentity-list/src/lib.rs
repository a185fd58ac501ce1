//! Entity lists for sqlentity.
//!
//! `sqlentity-list` is the **list layer**. It wraps a `QueryDescriptor` in an
//! immutable, chainable `EntityList` and turns result rows into `Record`s.
//!
//! # Role In The Architecture
//!
//! - **Lists**: every refinement (`filter`, `exclude`, `sort`, `limit`,
//!   `eager_load`, ...) returns a new list; the receiver is never touched.
//! - **Eager loading**: chains registered with `eager_load` are resolved in
//!   one query per chain segment and attached to the hydrated records.
//! - **Relation lists**: `HasManyList` and `ManyManyList` narrow a list to
//!   the children of given parents and write links; `UnsavedRelationList`
//!   buffers links for parents without an id; `PreloadedList` serves eager
//!   data from memory.
//! - **Tracking**: `QueryTracker` counts statements at the `Database`
//!   boundary and warns about N+1 patterns.
//!
//! # Example
//!
//! ```ignore
//! let orm = Orm::new(Arc::new(catalog), db);
//!
//! let players = orm
//!     .list("Player")?
//!     .filter("Team.Title:StartsWith", "Red")?
//!     .sort("Name")?
//!     .eager_load(&["Team", "Comments"])?;
//!
//! for player in players.iter()? {
//!     let comments = orm.components(&player, "Comments")?; // no query
//! }
//! ```

pub mod eager;
pub mod entity;
pub mod filter;
pub mod has_many;
pub mod list;
pub mod many_many;
pub mod memo;
pub mod orm;
pub mod preloaded;
pub mod record;
pub mod tracker;
pub mod unsaved;

#[cfg(test)]
mod testing;

pub use eager::{EagerCallback, EagerEntry, EagerRegistry, EagerStore};
pub use entity::Entity;
pub use filter::{Filter, FilterKey, FilterValue, SearchFilter};
pub use has_many::HasManyList;
pub use list::{ChunkedFetch, EntityList, ListAlteration, ListIter};
pub use many_many::ManyManyList;
pub use memo::GetOneCache;
pub use orm::{Orm, RelationList};
pub use preloaded::PreloadedList;
pub use record::{EagerValue, RECORD_CLASS_COLUMN, Record};
pub use tracker::{QueryStats, QueryTracker};
pub use unsaved::{RelationWriter, UnsavedItem, UnsavedRelationList};
