//! Hydrated records.
//!
//! A `Record` is one row of an entity list turned into a class name plus an
//! ordered field map. Records produced while eager loading also carry a
//! handle on the loaded data, so relations can be read without a query.

use crate::eager::{EagerEntry, EagerStore};
use crate::preloaded::PreloadedList;
use serde::{Deserialize, Serialize};
use sqlentity_core::{Error, FromValue, OrderedMap, Result, Row, SchemaCatalog, Value};
use std::sync::Arc;

/// Column naming the concrete class of each row.
pub const RECORD_CLASS_COLUMN: &str = "RecordClassName";

/// Access to the eager-loaded data of one pass.
#[derive(Debug, Clone)]
pub(crate) struct EagerContext {
    pub(crate) store: Arc<EagerStore>,
    pub(crate) catalog: Arc<SchemaCatalog>,
    /// Chain that reached the record, `""` for list roots.
    pub(crate) prefix: String,
}

impl EagerContext {
    pub(crate) fn key(&self, relation: &str) -> String {
        if self.prefix.is_empty() {
            relation.to_string()
        } else {
            format!("{}.{}", self.prefix, relation)
        }
    }
}

/// Eager-loaded value of one relation of one record.
#[derive(Debug, Clone)]
pub enum EagerValue {
    /// Related record, or an unsaved placeholder for a missing reverse
    /// one-to-one.
    Record(Record),
    /// The one-to-one key is unset or points at nothing.
    Empty,
    /// Related rows of a one-to-many or many-to-many relation.
    List(PreloadedList),
}

/// A hydrated row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    class: String,
    fields: OrderedMap<Value>,
    #[serde(skip)]
    eager: Option<EagerContext>,
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.class == other.class && self.fields == other.fields
    }
}

impl Record {
    /// A new, unsaved record of `class`.
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            fields: OrderedMap::new(),
            eager: None,
        }
    }

    /// A record with the given fields.
    pub fn with_fields(class: impl Into<String>, fields: OrderedMap<Value>) -> Self {
        Self {
            class: class.into(),
            fields,
            eager: None,
        }
    }

    /// Hydrate a result row.
    ///
    /// The class comes from `RecordClassName` when the catalog knows it,
    /// otherwise `default_class`. Synthetic sort columns are dropped.
    pub(crate) fn hydrate(
        catalog: &SchemaCatalog,
        default_class: &str,
        row: &Row,
        eager: Option<EagerContext>,
    ) -> Self {
        let class = row
            .get_by_name(RECORD_CLASS_COLUMN)
            .and_then(Value::as_str)
            .filter(|class| catalog.has_class(class))
            .unwrap_or(default_class)
            .to_string();
        let fields = row
            .iter()
            .filter(|(name, _)| *name != RECORD_CLASS_COLUMN && !name.starts_with("_SortColumn"))
            .map(|(name, value)| (name, value.clone()))
            .collect();
        Self {
            class,
            fields,
            eager,
        }
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    /// Record identifier; `None` for unsaved records.
    pub fn id(&self) -> Option<i64> {
        self.fields.get("ID").and_then(Value::as_id)
    }

    pub fn is_new(&self) -> bool {
        self.id().is_none()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Typed field access. A missing field reads as NULL.
    pub fn get_as<T: FromValue>(&self, field: &str) -> Result<T> {
        T::from_value(self.fields.get(field).unwrap_or(&Value::Null)).map_err(|e| match e {
            Error::Type(mut err) => {
                err.column = Some(field.to_string());
                Error::Type(err)
            }
            other => other,
        })
    }

    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> &mut Self {
        self.fields.insert(field, value.into());
        self
    }

    pub fn fields(&self) -> &OrderedMap<Value> {
        &self.fields
    }

    pub fn into_fields(self) -> OrderedMap<Value> {
        self.fields
    }

    /// Eager-loaded value of `relation`, if the pass that produced this
    /// record loaded it.
    pub fn eager(&self, relation: &str) -> Option<EagerValue> {
        let context = self.eager.as_ref()?;
        let key = context.key(relation);
        let id = self.id()?;
        let entry = context.store.get(&key, id)?;
        let child_context = |class_prefix: &str| EagerContext {
            store: Arc::clone(&context.store),
            catalog: Arc::clone(&context.catalog),
            prefix: class_prefix.to_string(),
        };
        Some(match entry {
            EagerEntry::Record { class, row } => EagerValue::Record(Record::hydrate(
                &context.catalog,
                class,
                row,
                Some(child_context(&key)),
            )),
            EagerEntry::Placeholder { class, fields } => {
                EagerValue::Record(Record::with_fields(class.clone(), fields.clone()))
            }
            EagerEntry::Empty => EagerValue::Empty,
            EagerEntry::List { class, rows } => EagerValue::List(PreloadedList::new(
                Arc::clone(&context.catalog),
                class,
                rows.clone(),
                Some(child_context(&key)),
            )),
        })
    }

    pub fn has_eager(&self, relation: &str) -> bool {
        self.eager(relation).is_some()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
