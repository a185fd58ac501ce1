//! Entity schema: declarations, field types, resolved relations and the
//! catalog that ties them together.

mod catalog;
mod declaration;
mod field;
mod relation;

pub use catalog::{FIXED_FIELDS, SchemaCatalog};
pub use declaration::{
    ClassDeclaration, ManyManyDeclaration, OneToOneDeclaration, POLYMORPHIC, SchemaDeclaration,
};
pub use field::{FieldOptions, FieldSpec, FieldType};
pub use relation::{JoinSource, ManyManyComponent, Relation, RelationKind, RemoteJoin};
