//! Relation buffers for unsaved parents.
//!
//! A parent without an id cannot own join rows or remote keys yet, so its
//! to-many relations collect ids (or records) in memory. Once the parent is
//! written, [`UnsavedRelationList::change_to_list`] replays the buffer into
//! the real relation list.

use crate::orm::Orm;
use crate::record::Record;
use sqlentity_core::{Error, OrderedMap, Relation, Result, Value};
use std::collections::HashMap;

/// A relation list that can link and unlink children by id.
pub trait RelationWriter {
    fn add_id(&self, id: i64, extra: &OrderedMap<Value>) -> Result<()>;

    fn remove_id(&self, id: i64) -> Result<()>;
}

/// One buffered child.
#[derive(Debug, Clone, PartialEq)]
pub enum UnsavedItem {
    Id(i64),
    Record(Record),
}

impl UnsavedItem {
    fn id(&self) -> Option<i64> {
        match self {
            UnsavedItem::Id(id) => Some(*id),
            UnsavedItem::Record(record) => record.id(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UnsavedRelationList {
    orm: Orm,
    parent_class: String,
    relation: String,
    target_class: String,
    items: Vec<(UnsavedItem, OrderedMap<Value>)>,
}

impl UnsavedRelationList {
    pub fn new(orm: Orm, parent_class: &str, relation: &str) -> Result<Self> {
        let resolved = orm
            .catalog()
            .resolve_relation(parent_class, relation)?
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "'{}' is not a relation on '{}'",
                    relation, parent_class
                ))
            })?;
        let target_class = match &resolved {
            Relation::OneToMany { target, .. } => target.clone(),
            other => match other.many_many() {
                Some(component) => component.child_class.clone(),
                None => {
                    return Err(Error::InvalidArgument(format!(
                        "'{}' on '{}' is not a to-many relation",
                        relation, parent_class
                    )));
                }
            },
        };
        Ok(Self {
            orm,
            parent_class: parent_class.to_string(),
            relation: relation.to_string(),
            target_class,
            items: Vec::new(),
        })
    }

    pub fn parent_class(&self) -> &str {
        &self.parent_class
    }

    pub fn relation(&self) -> &str {
        &self.relation
    }

    pub fn target_class(&self) -> &str {
        &self.target_class
    }

    fn position(&self, item: &UnsavedItem) -> Option<usize> {
        self.items.iter().position(|(existing, _)| match (existing, item) {
            (UnsavedItem::Record(a), UnsavedItem::Record(b)) if a.is_new() && b.is_new() => a == b,
            (a, b) => a.id().is_some() && a.id() == b.id(),
        })
    }

    /// Buffer a child, replacing the extra fields of one already buffered.
    pub fn add(&mut self, item: UnsavedItem, extra: OrderedMap<Value>) -> Result<()> {
        if let UnsavedItem::Record(record) = &item {
            if !self.orm.catalog().is_subclass_of(record.class(), &self.target_class) {
                return Err(Error::InvalidArgument(format!(
                    "cannot add a '{}' to '{}', which holds '{}'",
                    record.class(),
                    self.relation,
                    self.target_class
                )));
            }
        }
        match self.position(&item) {
            Some(index) => self.items[index].1 = extra,
            None => self.items.push((item, extra)),
        }
        Ok(())
    }

    pub fn add_id(&mut self, id: i64) -> Result<()> {
        self.add(UnsavedItem::Id(id), OrderedMap::new())
    }

    pub fn remove(&mut self, item: &UnsavedItem) {
        if let Some(index) = self.position(item) {
            self.items.remove(index);
        }
    }

    pub fn remove_all(&mut self) {
        self.items.clear();
    }

    pub fn count(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Ids of the buffered children; unsaved records are skipped.
    pub fn ids(&self) -> Vec<i64> {
        self.items.iter().filter_map(|(item, _)| item.id()).collect()
    }

    /// Values of one field. Only `ID` can be read without loading records.
    pub fn column(&self, field: &str) -> Result<Vec<Value>> {
        if field != "ID" {
            return Err(Error::InvalidArgument(format!(
                "an unsaved relation only knows the ID column, not '{}'",
                field
            )));
        }
        Ok(self.ids().into_iter().map(Value::BigInt).collect())
    }

    /// Extra fields buffered with child `id`.
    pub fn extra_fields(&self, id: i64) -> Option<&OrderedMap<Value>> {
        self.items
            .iter()
            .find(|(item, _)| item.id() == Some(id))
            .map(|(_, extra)| extra)
    }

    /// The buffered children as records. Id items are fetched in one query.
    pub fn to_vec(&self) -> Result<Vec<Record>> {
        let ids: Vec<i64> = self
            .items
            .iter()
            .filter_map(|(item, _)| match item {
                UnsavedItem::Id(id) => Some(*id),
                UnsavedItem::Record(_) => None,
            })
            .collect();
        let mut fetched: HashMap<i64, Record> = HashMap::new();
        if !ids.is_empty() {
            for record in self.orm.list(&self.target_class)?.by_ids(&ids)?.to_vec()? {
                if let Some(id) = record.id() {
                    fetched.insert(id, record);
                }
            }
        }
        Ok(self
            .items
            .iter()
            .filter_map(|(item, _)| match item {
                UnsavedItem::Id(id) => fetched.get(id).cloned(),
                UnsavedItem::Record(record) => Some(record.clone()),
            })
            .collect())
    }

    /// Replay the buffer into `target` and empty it. Records that were
    /// never written cannot be linked.
    pub fn change_to_list(self, target: &dyn RelationWriter) -> Result<()> {
        for (item, _) in &self.items {
            if item.id().is_none() {
                return Err(Error::Logic(format!(
                    "cannot link an unsaved '{}' through '{}'; write it first",
                    self.target_class, self.relation
                )));
            }
        }
        for (item, extra) in &self.items {
            if let Some(id) = item.id() {
                target.add_id(id, extra)?;
            }
        }
        tracing::debug!(
            relation = %self.relation,
            items = self.items.len(),
            "Replayed unsaved relation"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingDb, catalog};
    use std::cell::RefCell;
    use std::sync::Arc;

    fn sponsors() -> UnsavedRelationList {
        let orm = Orm::new(Arc::new(catalog()), Arc::new(RecordingDb::default()));
        UnsavedRelationList::new(orm, "Team", "Sponsors").unwrap()
    }

    #[derive(Default)]
    struct Writer {
        added: RefCell<Vec<(i64, OrderedMap<Value>)>>,
    }

    impl RelationWriter for Writer {
        fn add_id(&self, id: i64, extra: &OrderedMap<Value>) -> Result<()> {
            self.added.borrow_mut().push((id, extra.clone()));
            Ok(())
        }

        fn remove_id(&self, _id: i64) -> Result<()> {
            Ok(())
        }
    }

    fn amount(n: i32) -> OrderedMap<Value> {
        let mut extra = OrderedMap::new();
        extra.insert("Amount", Value::from(n));
        extra
    }

    #[test]
    fn buffers_ids_with_extra_fields() {
        let mut list = sponsors();
        list.add(UnsavedItem::Id(4), amount(10)).unwrap();
        list.add_id(6).unwrap();
        list.add(UnsavedItem::Id(4), amount(20)).unwrap();
        assert_eq!(list.count(), 2);
        assert_eq!(list.ids(), vec![4, 6]);
        assert_eq!(list.extra_fields(4), Some(&amount(20)));
        assert_eq!(list.column("ID").unwrap(), vec![Value::BigInt(4), Value::BigInt(6)]);
        assert!(list.column("Title").is_err());

        list.remove(&UnsavedItem::Id(4));
        assert_eq!(list.ids(), vec![6]);
        list.remove_all();
        assert!(list.is_empty());
    }

    #[test]
    fn rejects_records_of_another_class() {
        let mut list = sponsors();
        let player = Record::new("Player");
        assert!(matches!(
            list.add(UnsavedItem::Record(player), OrderedMap::new()),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn change_to_list_replays_in_order() {
        let mut list = sponsors();
        list.add(UnsavedItem::Id(4), amount(10)).unwrap();
        list.add_id(6).unwrap();
        let writer = Writer::default();
        list.change_to_list(&writer).unwrap();
        let added = writer.added.borrow();
        assert_eq!(added.len(), 2);
        assert_eq!(added[0], (4, amount(10)));
        assert_eq!(added[1].0, 6);
    }

    #[test]
    fn change_to_list_refuses_unsaved_records() {
        let mut list = sponsors();
        list.add(UnsavedItem::Record(Record::new("Sponsor")), OrderedMap::new())
            .unwrap();
        let writer = Writer::default();
        assert!(matches!(list.change_to_list(&writer), Err(Error::Logic(_))));
        assert!(writer.added.borrow().is_empty());
    }
}
