//! One-to-many relation lists.
//!
//! The children of a one-to-many relation are the records of the target
//! class whose one-to-one key points at the parent. Adding a child sets
//! that key; removing it clears the key.

use crate::list::{EntityList, ListAlteration};
use crate::orm::Orm;
use crate::unsaved::RelationWriter;
use sqlentity_core::{Database, Error, OrderedMap, Relation, RemoteJoin, Result, Value};
use sqlentity_query::{Condition, placeholders, quote_identifier, quote_string};
use std::ops::Deref;

#[derive(Debug, Clone)]
pub struct HasManyList {
    base: EntityList,
    list: EntityList,
    relation: String,
    /// Concrete class of the parents, stored in a polymorphic key.
    parent_class: String,
    remote: RemoteJoin,
    foreign_ids: Vec<i64>,
}

impl HasManyList {
    /// The `relation` of `class`, not yet narrowed to any parent.
    pub fn new(orm: &Orm, class: &str, relation: &str) -> Result<Self> {
        let (target, remote) = match orm.catalog().resolve_relation(class, relation)? {
            Some(Relation::OneToMany { target, remote, .. }) => (target, remote),
            _ => {
                return Err(Error::InvalidArgument(format!(
                    "'{}' is not a one_to_many relation on '{}'",
                    relation, class
                )));
            }
        };
        let base = orm.list(&target)?;
        Ok(Self {
            list: base.clone(),
            base,
            relation: relation.to_string(),
            parent_class: class.to_string(),
            remote,
            foreign_ids: Vec::new(),
        })
    }

    pub fn foreign_ids(&self) -> &[i64] {
        &self.foreign_ids
    }

    pub fn for_foreign_id(&self, id: i64) -> Result<Self> {
        self.for_foreign_ids(&[id])
    }

    /// Narrow to the children of any of `ids`. Replaces earlier narrowing.
    pub fn for_foreign_ids(&self, ids: &[i64]) -> Result<Self> {
        let mut out = self.clone();
        out.foreign_ids = ids.to_vec();
        out.list = out.narrowed(&out.base)?;
        Ok(out)
    }

    fn column(&self, field: &str) -> Result<String> {
        self.base
            .orm()
            .catalog()
            .sql_column_for_field(self.base.data_class(), field, "")
    }

    fn narrowed(&self, base: &EntityList) -> Result<EntityList> {
        let mut members = Vec::new();
        if self.foreign_ids.is_empty() {
            members.push(Condition::raw("1 = 0"));
        } else {
            members.push(Condition::sql(
                format!(
                    "{} IN ({})",
                    self.column(&self.remote.join_column)?,
                    placeholders(self.foreign_ids.len())
                ),
                self.foreign_ids.iter().map(|id| Value::BigInt(*id)).collect(),
            ));
        }
        if self.remote.polymorphic {
            members.push(Condition::sql(
                format!("{} = ?", self.column(&self.remote.class_column())?),
                vec![Value::from(self.parent_class.as_str())],
            ));
            if self.remote.needs_relation_column {
                members.push(Condition::raw(format!(
                    "{} = {}",
                    self.column(&self.remote.relation_column())?,
                    quote_string(&self.relation)
                )));
            }
        }
        let condition = Condition::all(members);
        base.alter(|l| {
            l.where_condition(condition);
            Ok(())
        })
    }

    /// Refine the list, keeping the relation.
    pub fn alter(&self, f: impl FnOnce(&mut ListAlteration<'_>) -> Result<()>) -> Result<Self> {
        let mut out = self.clone();
        out.base = self.base.alter(f)?;
        out.list = out.narrowed(&out.base)?;
        Ok(out)
    }

    pub fn list(&self) -> &EntityList {
        &self.list
    }

    fn db(&self) -> &dyn Database {
        self.base.orm().db()
    }

    /// Table holding the remote key.
    fn key_table(&self) -> Result<String> {
        self.base
            .orm()
            .catalog()
            .table_for_field(self.base.data_class(), &self.remote.join_column)?
            .ok_or_else(|| {
                Error::Logic(format!(
                    "'{}' has no column '{}'",
                    self.base.data_class(),
                    self.remote.join_column
                ))
            })
    }

    fn single_parent(&self, operation: &str) -> Result<i64> {
        match self.foreign_ids.as_slice() {
            [id] => Ok(*id),
            ids => Err(Error::Logic(format!(
                "cannot {} on one_to_many '{}' with {} parent ids; narrow to exactly one",
                operation,
                self.relation,
                ids.len()
            ))),
        }
    }

    /// Point child `id` at the parent.
    pub fn add(&self, id: i64) -> Result<()> {
        let parent = self.single_parent("add")?;
        let mut sets = vec![format!("{} = ?", quote_identifier(&self.remote.join_column))];
        let mut params = vec![Value::BigInt(parent)];
        if self.remote.polymorphic {
            sets.push(format!("{} = ?", quote_identifier(&self.remote.class_column())));
            params.push(Value::from(self.parent_class.as_str()));
            if self.remote.needs_relation_column {
                sets.push(format!("{} = ?", quote_identifier(&self.remote.relation_column())));
                params.push(Value::from(self.relation.as_str()));
            }
        }
        params.push(Value::BigInt(id));
        let table = self.key_table()?;
        self.db().execute(
            &format!(
                "UPDATE {} SET {} WHERE \"ID\" = ?",
                quote_identifier(&table),
                sets.join(", ")
            ),
            &params,
        )?;
        tracing::debug!(table = %table, child = id, parent, "Linked one_to_many child");
        Ok(())
    }

    /// Clear child `id`'s key if it points at one of the parents.
    pub fn remove(&self, id: i64) -> Result<u64> {
        if self.foreign_ids.is_empty() {
            return Err(Error::Logic(format!(
                "cannot remove on one_to_many '{}' without a parent id",
                self.relation
            )));
        }
        let mut sets = vec![format!("{} = 0", quote_identifier(&self.remote.join_column))];
        if self.remote.polymorphic {
            sets.push(format!("{} = NULL", quote_identifier(&self.remote.class_column())));
            if self.remote.needs_relation_column {
                sets.push(format!("{} = NULL", quote_identifier(&self.remote.relation_column())));
            }
        }
        let mut params = vec![Value::BigInt(id)];
        params.extend(self.foreign_ids.iter().map(|f| Value::BigInt(*f)));
        self.db().execute(
            &format!(
                "UPDATE {} SET {} WHERE \"ID\" = ? AND {} IN ({})",
                quote_identifier(&self.key_table()?),
                sets.join(", "),
                quote_identifier(&self.remote.join_column),
                placeholders(self.foreign_ids.len())
            ),
            &params,
        )
    }
}

impl Deref for HasManyList {
    type Target = EntityList;

    fn deref(&self) -> &EntityList {
        &self.list
    }
}

impl RelationWriter for HasManyList {
    fn add_id(&self, id: i64, _extra: &OrderedMap<Value>) -> Result<()> {
        self.add(id)
    }

    fn remove_id(&self, id: i64) -> Result<()> {
        self.remove(id).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingDb, catalog};
    use std::sync::Arc;

    fn players() -> (HasManyList, Arc<RecordingDb>) {
        let db = Arc::new(RecordingDb::default());
        let orm = Orm::new(Arc::new(catalog()), db.clone());
        (HasManyList::new(&orm, "Team", "Players").unwrap(), db)
    }

    #[test]
    fn narrows_on_the_remote_key() {
        let (list, _) = players();
        let (sql, params) = list.for_foreign_id(2).unwrap().sql().unwrap();
        assert!(sql.contains("\"Player\".\"TeamID\" IN (?)"), "{sql}");
        assert_eq!(params, vec![Value::BigInt(2)]);
        assert!(matches!(
            HasManyList::new(&list.orm().clone(), "Team", "Sponsors"),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn add_sets_and_remove_clears_the_key() {
        let (list, db) = players();
        let list = list.for_foreign_id(2).unwrap();
        list.add(5).unwrap();
        let (sql, params) = db.statements().pop().unwrap();
        assert_eq!(sql, "UPDATE \"Player\" SET \"TeamID\" = ? WHERE \"ID\" = ?");
        assert_eq!(params, vec![Value::BigInt(2), Value::BigInt(5)]);

        list.remove(5).unwrap();
        assert_eq!(
            db.last_sql(),
            "UPDATE \"Player\" SET \"TeamID\" = 0 WHERE \"ID\" = ? AND \"TeamID\" IN (?)"
        );
    }

    #[test]
    fn add_needs_exactly_one_parent() {
        let (list, _) = players();
        assert!(matches!(list.add(5), Err(Error::Logic(_))));
        let two = list.for_foreign_ids(&[1, 2]).unwrap();
        assert!(matches!(two.add(5), Err(Error::Logic(_))));
    }
}
