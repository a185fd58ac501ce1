//! The entry point: a catalog, a connection and engine settings.

use crate::entity::Entity;
use crate::filter::FilterValue;
use crate::has_many::HasManyList;
use crate::list::EntityList;
use crate::many_many::ManyManyList;
use crate::memo::GetOneCache;
use crate::preloaded::PreloadedList;
use crate::record::{EagerValue, Record};
use crate::unsaved::UnsavedRelationList;
use sqlentity_core::{Database, EngineConfig, Error, Relation, Result, SchemaCatalog, Value};
use std::fmt;
use std::sync::Arc;

/// Shared handles every list is built from. Cloning is cheap.
#[derive(Clone)]
pub struct Orm {
    catalog: Arc<SchemaCatalog>,
    db: Arc<dyn Database>,
    config: Arc<EngineConfig>,
}

impl fmt::Debug for Orm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orm")
            .field("classes", &self.catalog.classes().count())
            .field("dialect", &self.db.dialect())
            .field("config", &self.config)
            .finish()
    }
}

impl Orm {
    pub fn new(catalog: Arc<SchemaCatalog>, db: Arc<dyn Database>) -> Self {
        Self {
            catalog,
            db,
            config: Arc::new(EngineConfig::default()),
        }
    }

    /// Replace the engine settings after validating them.
    pub fn with_config(mut self, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        self.config = Arc::new(config);
        Ok(self)
    }

    pub fn catalog(&self) -> &Arc<SchemaCatalog> {
        &self.catalog
    }

    pub fn db(&self) -> &dyn Database {
        self.db.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// All records of `class`, including subclasses.
    pub fn list(&self, class: &str) -> Result<EntityList> {
        EntityList::new(self.clone(), class)
    }

    pub fn entities<T: Entity>(&self) -> Result<EntityList> {
        self.list(T::CLASS)
    }

    pub fn get_by_id(&self, class: &str, id: i64) -> Result<Option<Record>> {
        self.list(class)?.by_id(id)
    }

    /// First record of `class` matching `filters` in `sort` order, served
    /// from `cache` when the same lookup was made before.
    pub fn get_one(
        &self,
        cache: &mut GetOneCache,
        class: &str,
        filters: &[(&str, FilterValue)],
        sort: Option<&str>,
    ) -> Result<Option<Record>> {
        let filters: Vec<(String, FilterValue)> = filters
            .iter()
            .map(|(key, value)| ((*key).to_string(), value.clone()))
            .collect();
        let key = GetOneCache::key(class, &filters, sort);
        if let Some(hit) = cache.get(&key) {
            tracing::trace!(class = %class, "get_one cache hit");
            return Ok(hit);
        }

        let list = self.list(class)?.alter(|l| {
            l.filter_many(filters.iter().cloned())?;
            if let Some(sort) = sort {
                l.sort(sort)?;
            }
            Ok(())
        })?;
        let record = list.first()?;
        cache.insert(key, class, record.clone());
        Ok(record)
    }

    fn relation(&self, record: &Record, name: &str) -> Result<Relation> {
        self.catalog
            .resolve_relation(record.class(), name)?
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "'{}' is not a relation on '{}'",
                    name,
                    record.class()
                ))
            })
    }

    /// The record a one-to-one or reverse one-to-one relation points at.
    ///
    /// Eager-loaded data is used when present. A reverse one-to-one with no
    /// match yields an unsaved record pointing back at `record`.
    pub fn component(&self, record: &Record, name: &str) -> Result<Option<Record>> {
        match record.eager(name) {
            Some(EagerValue::Record(found)) => return Ok(Some(found)),
            Some(EagerValue::Empty) => return Ok(None),
            Some(EagerValue::List(_)) => {
                return Err(Error::InvalidArgument(format!(
                    "'{}' on '{}' is a to-many relation; use components()",
                    name,
                    record.class()
                )));
            }
            None => {}
        }

        match self.relation(record, name)? {
            Relation::OneToOne { target, .. } => {
                let Some(id) = record.get(&format!("{}ID", name)).and_then(Value::as_id) else {
                    return Ok(None);
                };
                let class = match target {
                    Some(class) => class,
                    None => match record
                        .get(&format!("{}Class", name))
                        .and_then(Value::as_str)
                        .filter(|class| self.catalog.has_class(class))
                    {
                        Some(class) => class.to_string(),
                        None => return Ok(None),
                    },
                };
                self.get_by_id(&class, id)
            }
            Relation::ReverseOneToOne { target, remote, .. } => {
                let mut placeholder = Record::new(target.as_str());
                let Some(id) = record.id() else {
                    return Ok(Some(placeholder));
                };
                let mut filters = vec![(remote.join_column.clone(), FilterValue::from(id))];
                if remote.polymorphic {
                    filters.push((remote.class_column(), FilterValue::from(record.class())));
                }
                if let Some(found) = self.list(&target)?.filter_many(filters.clone())?.first()? {
                    return Ok(Some(found));
                }
                for (field, value) in filters {
                    if let FilterValue::One(value) = value {
                        placeholder.set(&field, value);
                    }
                }
                Ok(Some(placeholder))
            }
            other => Err(Error::InvalidArgument(format!(
                "'{}' on '{}' is a {} relation; use components()",
                name,
                record.class(),
                other.kind().as_str()
            ))),
        }
    }

    /// The records a one-to-many or many-to-many relation holds.
    ///
    /// Eager-loaded data comes back as a preloaded list; an unsaved record
    /// gets a buffer that can be written once it has an id.
    pub fn components(&self, record: &Record, name: &str) -> Result<RelationList> {
        if let Some(value) = record.eager(name) {
            return match value {
                EagerValue::List(list) => Ok(RelationList::Preloaded(list)),
                _ => Err(Error::InvalidArgument(format!(
                    "'{}' on '{}' is not a to-many relation; use component()",
                    name,
                    record.class()
                ))),
            };
        }

        let relation = self.relation(record, name)?;
        if relation.many_many().is_none() && !matches!(relation, Relation::OneToMany { .. }) {
            return Err(Error::InvalidArgument(format!(
                "'{}' on '{}' is a {} relation; use component()",
                name,
                record.class(),
                relation.kind().as_str()
            )));
        }
        let Some(id) = record.id() else {
            return Ok(RelationList::Unsaved(UnsavedRelationList::new(
                self.clone(),
                record.class(),
                name,
            )?));
        };
        if relation.many_many().is_some() {
            Ok(RelationList::ManyMany(
                ManyManyList::new(self, record.class(), name)?.for_foreign_id(id)?,
            ))
        } else {
            Ok(RelationList::HasMany(
                HasManyList::new(self, record.class(), name)?.for_foreign_id(id)?,
            ))
        }
    }
}

/// What `Orm::components` hands back.
#[derive(Debug)]
pub enum RelationList {
    Preloaded(PreloadedList),
    HasMany(HasManyList),
    ManyMany(ManyManyList),
    Unsaved(UnsavedRelationList),
}

impl RelationList {
    pub fn count(&self) -> Result<u64> {
        match self {
            RelationList::Preloaded(list) => Ok(list.count()),
            RelationList::HasMany(list) => list.count(),
            RelationList::ManyMany(list) => list.count(),
            RelationList::Unsaved(list) => Ok(list.count() as u64),
        }
    }

    pub fn to_vec(&self) -> Result<Vec<Record>> {
        match self {
            RelationList::Preloaded(list) => Ok(list.to_vec()),
            RelationList::HasMany(list) => list.to_vec(),
            RelationList::ManyMany(list) => list.to_vec(),
            RelationList::Unsaved(list) => list.to_vec(),
        }
    }

    /// Ids of the related records, in list order.
    pub fn ids(&self) -> Result<Vec<i64>> {
        Ok(self.to_vec()?.iter().filter_map(Record::id).collect())
    }
}
