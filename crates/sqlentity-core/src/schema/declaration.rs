//! Schema declarations.
//!
//! A declaration describes entity classes the way configuration does: field
//! type strings and relation maps keyed by relation name. It is plain data;
//! [`SchemaCatalog`](super::SchemaCatalog) validates it and answers
//! questions about it.
//!
//! Declarations load from JSON:
//!
//! ```
//! use sqlentity_core::SchemaDeclaration;
//!
//! let decl = SchemaDeclaration::from_json(r#"{
//!     "classes": [
//!         { "name": "Team", "fields": { "Title": "Varchar" },
//!           "has_many": { "Players": "Player" } },
//!         { "name": "Player", "fields": { "Name": "Varchar" },
//!           "has_one": { "Team": "Team" } }
//!     ]
//! }"#).unwrap();
//! assert_eq!(decl.classes.len(), 2);
//! ```
//!
//! or are built in code with the builder methods on [`ClassDeclaration`].

use crate::error::{Error, Result};
use crate::ordered::OrderedMap;
use serde::{Deserialize, Serialize};

/// Target marker for a one-to-one relation that may point at any class.
pub const POLYMORPHIC: &str = "polymorphic";

/// All entity classes known to an application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaDeclaration {
    #[serde(default)]
    pub classes: Vec<ClassDeclaration>,
}

impl SchemaDeclaration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Add a class declaration.
    pub fn class(mut self, class: ClassDeclaration) -> Self {
        self.classes.push(class);
        self
    }
}

/// One entity class.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassDeclaration {
    pub name: String,
    /// Parent class; `None` for a root (base) class.
    pub parent: Option<String>,
    /// Table name override. Defaults to the class name.
    pub table: Option<String>,
    /// Field name to type string, in declaration order.
    pub fields: OrderedMap<String>,
    #[serde(alias = "has_one")]
    pub one_to_one: OrderedMap<OneToOneDeclaration>,
    /// Relation name to `Class` or `Class.OneToOneName`.
    #[serde(alias = "belongs_to")]
    pub reverse_one_to_one: OrderedMap<String>,
    /// Relation name to `Class` or `Class.OneToOneName`.
    #[serde(alias = "has_many")]
    pub one_to_many: OrderedMap<String>,
    #[serde(alias = "many_many")]
    pub many_to_many: OrderedMap<ManyManyDeclaration>,
    /// Relation name to `Class` or `Class.ManyManyName`.
    #[serde(alias = "belongs_many_many")]
    pub reverse_many_to_many: OrderedMap<String>,
    /// Per many-to-many relation: extra join table fields.
    pub many_many_extra_fields: OrderedMap<OrderedMap<String>>,
    /// Sort applied to new lists of this class, e.g. `"Title ASC"`.
    pub default_sort: Option<String>,
}

/// Target of a one-to-one declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneToOneDeclaration {
    /// A class name, or [`POLYMORPHIC`].
    Class(String),
    /// Structured form; `multi_relational` adds the `Relation` column to a
    /// polymorphic key so one target can back several one-to-many relations.
    Spec {
        class: String,
        #[serde(default)]
        multi_relational: bool,
    },
}

impl OneToOneDeclaration {
    pub fn class(&self) -> &str {
        match self {
            OneToOneDeclaration::Class(class) | OneToOneDeclaration::Spec { class, .. } => class,
        }
    }

    pub fn is_polymorphic(&self) -> bool {
        self.class().eq_ignore_ascii_case(POLYMORPHIC)
    }

    pub fn is_multi_relational(&self) -> bool {
        matches!(
            self,
            OneToOneDeclaration::Spec {
                multi_relational: true,
                ..
            }
        )
    }
}

/// Target of a many-to-many declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ManyManyDeclaration {
    /// Implicit join table.
    Class(String),
    /// Join through an entity class; `from` and `to` name one-to-one
    /// relations on `through`.
    Through {
        through: String,
        from: String,
        to: String,
    },
}

impl ClassDeclaration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn field(mut self, name: impl Into<String>, spec: impl Into<String>) -> Self {
        self.fields.insert(name, spec.into());
        self
    }

    pub fn has_one(mut self, name: impl Into<String>, class: impl Into<String>) -> Self {
        self.one_to_one
            .insert(name, OneToOneDeclaration::Class(class.into()));
        self
    }

    /// Polymorphic one-to-one; `multi_relational` adds the `Relation` column.
    pub fn has_one_polymorphic(mut self, name: impl Into<String>, multi_relational: bool) -> Self {
        self.one_to_one.insert(
            name,
            OneToOneDeclaration::Spec {
                class: POLYMORPHIC.to_string(),
                multi_relational,
            },
        );
        self
    }

    pub fn belongs_to(mut self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.reverse_one_to_one.insert(name, target.into());
        self
    }

    pub fn has_many(mut self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.one_to_many.insert(name, target.into());
        self
    }

    pub fn many_many(mut self, name: impl Into<String>, class: impl Into<String>) -> Self {
        self.many_to_many
            .insert(name, ManyManyDeclaration::Class(class.into()));
        self
    }

    pub fn many_many_through(
        mut self,
        name: impl Into<String>,
        through: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        self.many_to_many.insert(
            name,
            ManyManyDeclaration::Through {
                through: through.into(),
                from: from.into(),
                to: to.into(),
            },
        );
        self
    }

    pub fn belongs_many_many(mut self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.reverse_many_to_many.insert(name, target.into());
        self
    }

    /// Declare an extra join-table field on a many-to-many relation.
    pub fn many_many_extra_field(
        mut self,
        relation: &str,
        field: impl Into<String>,
        spec: impl Into<String>,
    ) -> Self {
        match self.many_many_extra_fields.get_mut(relation) {
            Some(fields) => {
                fields.insert(field, spec.into());
            }
            None => {
                let mut fields = OrderedMap::new();
                fields.insert(field, spec.into());
                self.many_many_extra_fields.insert(relation, fields);
            }
        }
        self
    }

    pub fn default_sort(mut self, sort: impl Into<String>) -> Self {
        self.default_sort = Some(sort.into());
        self
    }

    /// Every relation name this class declares, with the kind label used in
    /// error messages.
    pub(crate) fn relation_names(&self) -> Vec<(&str, &'static str)> {
        let mut names = Vec::new();
        names.extend(self.one_to_one.keys().map(|k| (k, "one_to_one")));
        names.extend(self.reverse_one_to_one.keys().map(|k| (k, "reverse_one_to_one")));
        names.extend(self.one_to_many.keys().map(|k| (k, "one_to_many")));
        names.extend(self.many_to_many.keys().map(|k| (k, "many_to_many")));
        names.extend(
            self.reverse_many_to_many
                .keys()
                .map(|k| (k, "reverse_many_to_many")),
        );
        names
    }
}

/// Split a `Class.Relation` target into its parts.
pub(crate) fn split_dotted(target: &str) -> Result<(&str, Option<&str>)> {
    match target.split_once('.') {
        None => Ok((target, None)),
        Some((class, relation)) if !class.is_empty() && !relation.is_empty() && !relation.contains('.') => {
            Ok((class, Some(relation)))
        }
        Some(_) => Err(Error::schema(
            crate::error::SchemaErrorKind::InvalidDeclaration,
            format!("malformed relation target '{}'", target),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_accepts_aliases_and_structured_targets() {
        let decl = SchemaDeclaration::from_json(
            r#"{ "classes": [ {
                "name": "Comment",
                "fields": { "Body": "Text" },
                "has_one": { "Parent": { "class": "polymorphic", "multi_relational": true },
                             "Author": "Member" },
                "many_many": { "Tags": "Tag",
                               "Events": { "through": "Entry", "from": "Comment", "to": "Event" } }
            } ] }"#,
        )
        .unwrap();
        let class = &decl.classes[0];
        let parent = class.one_to_one.get("Parent").unwrap();
        assert!(parent.is_polymorphic());
        assert!(parent.is_multi_relational());
        assert_eq!(class.one_to_one.get("Author").unwrap().class(), "Member");
        assert!(matches!(
            class.many_to_many.get("Events"),
            Some(ManyManyDeclaration::Through { .. })
        ));
    }

    #[test]
    fn builder_collects_extra_fields() {
        let class = ClassDeclaration::new("Team")
            .many_many("Sponsors", "Sponsor")
            .many_many_extra_field("Sponsors", "Amount", "Int")
            .many_many_extra_field("Sponsors", "Since", "Date");
        let extra = class.many_many_extra_fields.get("Sponsors").unwrap();
        assert_eq!(extra.keys().collect::<Vec<_>>(), vec!["Amount", "Since"]);
    }

    #[test]
    fn dotted_targets() {
        assert_eq!(split_dotted("Player").unwrap(), ("Player", None));
        assert_eq!(split_dotted("Player.Team").unwrap(), ("Player", Some("Team")));
        assert!(split_dotted("Player.").is_err());
        assert!(split_dotted("A.B.C").is_err());
    }
}
