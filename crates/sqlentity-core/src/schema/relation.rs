//! Resolved relation descriptors.
//!
//! Relations are resolved once per (class, name) by the catalog into a
//! closed [`Relation`] enum; callers match on the variant instead of looking
//! at raw declarations.

use super::field::FieldType;
use crate::ordered::OrderedMap;

/// The kind of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    /// `has_one`: this class holds `<Name>ID`.
    OneToOne,
    /// `belongs_to`: the target holds a one-to-one pointing back here.
    ReverseOneToOne,
    /// `has_many`: many targets hold a one-to-one pointing back here.
    OneToMany,
    /// `many_many` through an implicit join table.
    ManyToMany,
    /// `many_many` through an entity class.
    ManyToManyThrough,
    /// `belongs_many_many`: the other side of a many-to-many.
    ReverseManyToMany,
}

impl RelationKind {
    /// Whether a join along this relation yields at most one row per parent.
    pub const fn is_linear(self) -> bool {
        matches!(self, RelationKind::OneToOne | RelationKind::ReverseOneToOne)
    }

    pub const fn is_many_many(self) -> bool {
        matches!(
            self,
            RelationKind::ManyToMany
                | RelationKind::ManyToManyThrough
                | RelationKind::ReverseManyToMany
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            RelationKind::OneToOne => "one_to_one",
            RelationKind::ReverseOneToOne => "reverse_one_to_one",
            RelationKind::OneToMany => "one_to_many",
            RelationKind::ManyToMany => "many_to_many",
            RelationKind::ManyToManyThrough => "many_to_many_through",
            RelationKind::ReverseManyToMany => "reverse_many_to_many",
        }
    }
}

/// The one-to-one field on a remote class that backs a one-to-many or
/// reverse one-to-one relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteJoin {
    /// Name of the one-to-one relation on the remote class.
    pub field: String,
    /// Column holding the parent id, `<field>ID`.
    pub join_column: String,
    /// The remote one-to-one is polymorphic, so `<field>Class` must match too.
    pub polymorphic: bool,
    /// The remote key also carries `<field>Relation`.
    pub needs_relation_column: bool,
}

impl RemoteJoin {
    pub(crate) fn new(field: &str, polymorphic: bool, needs_relation_column: bool) -> Self {
        Self {
            field: field.to_string(),
            join_column: format!("{}ID", field),
            polymorphic,
            needs_relation_column,
        }
    }

    pub fn class_column(&self) -> String {
        format!("{}Class", self.field)
    }

    pub fn relation_column(&self) -> String {
        format!("{}Relation", self.field)
    }
}

/// Where the rows linking both sides of a many-to-many live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinSource {
    /// Implicit join table, e.g. `Team_Sponsors`.
    Table(String),
    /// Entity class whose table holds the two keys.
    Through(String),
}

/// Both sides of a many-to-many relation, from the point of view of the
/// class it was resolved on (the parent).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManyManyComponent {
    pub parent_class: String,
    pub child_class: String,
    /// Join-table column holding the parent id.
    pub parent_field: String,
    /// Join-table column holding the child id.
    pub child_field: String,
    pub join: JoinSource,
    /// Physical table holding `parent_field` and `child_field`.
    pub join_table: String,
    /// Extra columns on the join table or through class.
    pub extra_fields: OrderedMap<FieldType>,
}

/// A relation resolved on a class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relation {
    OneToOne {
        name: String,
        /// Class that declared the relation.
        owner: String,
        /// `None` when the relation is polymorphic.
        target: Option<String>,
        relation_aware: bool,
    },
    ReverseOneToOne {
        name: String,
        owner: String,
        target: String,
        remote: RemoteJoin,
    },
    OneToMany {
        name: String,
        owner: String,
        target: String,
        remote: RemoteJoin,
    },
    ManyToMany {
        name: String,
        component: ManyManyComponent,
    },
    ManyToManyThrough {
        name: String,
        component: ManyManyComponent,
    },
    ReverseManyToMany {
        name: String,
        component: ManyManyComponent,
    },
}

impl Relation {
    pub fn name(&self) -> &str {
        match self {
            Relation::OneToOne { name, .. }
            | Relation::ReverseOneToOne { name, .. }
            | Relation::OneToMany { name, .. }
            | Relation::ManyToMany { name, .. }
            | Relation::ManyToManyThrough { name, .. }
            | Relation::ReverseManyToMany { name, .. } => name,
        }
    }

    pub fn kind(&self) -> RelationKind {
        match self {
            Relation::OneToOne { .. } => RelationKind::OneToOne,
            Relation::ReverseOneToOne { .. } => RelationKind::ReverseOneToOne,
            Relation::OneToMany { .. } => RelationKind::OneToMany,
            Relation::ManyToMany { .. } => RelationKind::ManyToMany,
            Relation::ManyToManyThrough { .. } => RelationKind::ManyToManyThrough,
            Relation::ReverseManyToMany { .. } => RelationKind::ReverseManyToMany,
        }
    }

    /// Class reached by following the relation; `None` for a polymorphic
    /// one-to-one.
    pub fn target_class(&self) -> Option<&str> {
        match self {
            Relation::OneToOne { target, .. } => target.as_deref(),
            Relation::ReverseOneToOne { target, .. } | Relation::OneToMany { target, .. } => {
                Some(target)
            }
            Relation::ManyToMany { component, .. }
            | Relation::ManyToManyThrough { component, .. }
            | Relation::ReverseManyToMany { component, .. } => Some(&component.child_class),
        }
    }

    pub fn many_many(&self) -> Option<&ManyManyComponent> {
        match self {
            Relation::ManyToMany { component, .. }
            | Relation::ManyToManyThrough { component, .. }
            | Relation::ReverseManyToMany { component, .. } => Some(component),
            _ => None,
        }
    }

    pub fn remote_join(&self) -> Option<&RemoteJoin> {
        match self {
            Relation::ReverseOneToOne { remote, .. } | Relation::OneToMany { remote, .. } => {
                Some(remote)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_kinds() {
        assert!(RelationKind::OneToOne.is_linear());
        assert!(RelationKind::ReverseOneToOne.is_linear());
        assert!(!RelationKind::OneToMany.is_linear());
        assert!(!RelationKind::ManyToManyThrough.is_linear());
        assert!(RelationKind::ReverseManyToMany.is_many_many());
    }

    #[test]
    fn remote_join_columns() {
        let remote = RemoteJoin::new("Parent", true, true);
        assert_eq!(remote.join_column, "ParentID");
        assert_eq!(remote.class_column(), "ParentClass");
        assert_eq!(remote.relation_column(), "ParentRelation");
    }

    #[test]
    fn polymorphic_one_to_one_has_no_target() {
        let relation = Relation::OneToOne {
            name: "Parent".into(),
            owner: "Comment".into(),
            target: None,
            relation_aware: false,
        };
        assert_eq!(relation.target_class(), None);
        assert_eq!(relation.kind(), RelationKind::OneToOne);
        assert!(relation.many_many().is_none());
    }
}
