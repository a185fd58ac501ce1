//! Many-to-many relation lists.
//!
//! A `ManyManyList` is an entity list of the child class inner-joined to
//! the join table, narrowed to the rows of one or more parents. Extra fields
//! on the join table come back as pseudo-fields of each record. Writes touch
//! only join rows: adding or removing a child never creates or deletes the
//! child itself.

use crate::list::{EntityList, ListAlteration};
use crate::orm::Orm;
use crate::record::Record;
use crate::unsaved::RelationWriter;
use sqlentity_core::{
    Database, Error, JoinSource, ManyManyComponent, OrderedMap, Result, SchemaCatalog, Value,
};
use sqlentity_query::{Condition, Join, SqlSelect, placeholders, quote_column, quote_identifier};
use std::ops::Deref;

/// Extra fields stored in the join table itself. Extras a through class
/// keeps on another of its tables are not reachable from the join.
pub(crate) fn join_table_extras(
    catalog: &SchemaCatalog,
    component: &ManyManyComponent,
) -> Result<Vec<String>> {
    let mut extras = Vec::new();
    for name in component.extra_fields.keys() {
        let stored_here = match &component.join {
            JoinSource::Table(_) => true,
            JoinSource::Through(class) => {
                catalog.table_for_field(class, name)?.as_deref()
                    == Some(component.join_table.as_str())
            }
        };
        if stored_here {
            extras.push(name.to_string());
        }
    }
    Ok(extras)
}

#[derive(Debug, Clone)]
pub struct ManyManyList {
    /// The joined list before narrowing to the foreign ids.
    base: EntityList,
    list: EntityList,
    component: ManyManyComponent,
    extras: Vec<String>,
    foreign_ids: Vec<i64>,
}

impl ManyManyList {
    /// The `relation` of `class`, not yet narrowed to any parent.
    pub fn new(orm: &Orm, class: &str, relation: &str) -> Result<Self> {
        let catalog = orm.catalog();
        let component = catalog.many_many_component(class, relation)?.ok_or_else(|| {
            Error::InvalidArgument(format!(
                "'{}' is not a many_many relation on '{}'",
                relation, class
            ))
        })?;
        let extras = join_table_extras(catalog, &component)?;

        let mut base = orm.list(&component.child_class)?;
        let join_table = component.join_table.clone();
        let child_id = catalog.sql_column_for_field(&component.child_class, "ID", "")?;
        base.descriptor_mut().inner_join(
            &join_table,
            &format!(
                "{} = {}",
                quote_column(&join_table, &component.child_field),
                child_id
            ),
            &join_table,
            Join::DEFAULT_PRIORITY,
            Vec::new(),
        );
        for extra in &extras {
            base.add_extra_column(extra, quote_column(&join_table, extra));
        }

        Ok(Self {
            list: base.clone(),
            base,
            component,
            extras,
            foreign_ids: Vec::new(),
        })
    }

    pub fn component(&self) -> &ManyManyComponent {
        &self.component
    }

    pub fn foreign_ids(&self) -> &[i64] {
        &self.foreign_ids
    }

    /// Narrow to the children of one parent.
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

    fn foreign_condition(&self) -> Condition {
        let column = quote_column(&self.component.join_table, &self.component.parent_field);
        if self.foreign_ids.is_empty() {
            return Condition::raw("1 = 0");
        }
        Condition::sql(
            format!("{} IN ({})", column, placeholders(self.foreign_ids.len())),
            self.foreign_ids.iter().map(|id| Value::BigInt(*id)).collect(),
        )
    }

    fn narrowed(&self, base: &EntityList) -> Result<EntityList> {
        let condition = self.foreign_condition();
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

    fn require_foreign_ids(&self, operation: &str) -> Result<()> {
        if self.foreign_ids.is_empty() {
            return Err(Error::Logic(format!(
                "cannot {} on many_many '{}' without a parent id",
                operation, self.component.child_class
            )));
        }
        Ok(())
    }

    fn db(&self) -> &dyn Database {
        self.list.orm().db()
    }

    /// Link child `id` to every parent, or update the extra fields of an
    /// existing link.
    pub fn add(&self, id: i64, extra: &OrderedMap<Value>) -> Result<()> {
        self.require_foreign_ids("add")?;
        for name in extra.keys() {
            if !self.extras.iter().any(|e| e == name) {
                return Err(Error::InvalidArgument(format!(
                    "'{}' is not an extra field of the join table '{}'",
                    name, self.component.join_table
                )));
            }
        }

        let table = &self.component.join_table;
        let parent = &self.component.parent_field;
        let child = &self.component.child_field;
        for foreign_id in &self.foreign_ids {
            let key_params = vec![Value::BigInt(*foreign_id), Value::BigInt(id)];
            let existing = self.db().query_scalar(
                &format!(
                    "SELECT COUNT(*) FROM {} WHERE {} = ? AND {} = ?",
                    quote_identifier(table),
                    quote_identifier(parent),
                    quote_identifier(child)
                ),
                &key_params,
            )?;

            if existing.and_then(|v| v.as_i64()).unwrap_or(0) > 0 {
                if extra.is_empty() {
                    continue;
                }
                let sets: Vec<String> = extra
                    .keys()
                    .map(|name| format!("{} = ?", quote_identifier(name)))
                    .collect();
                let mut params: Vec<Value> = extra.values().cloned().collect();
                params.extend(key_params);
                self.db().execute(
                    &format!(
                        "UPDATE {} SET {} WHERE {} = ? AND {} = ?",
                        quote_identifier(table),
                        sets.join(", "),
                        quote_identifier(parent),
                        quote_identifier(child)
                    ),
                    &params,
                )?;
            } else {
                let mut columns = vec![quote_identifier(parent), quote_identifier(child)];
                let mut markers = vec!["?".to_string(), "?".to_string()];
                let mut params = key_params;
                if let JoinSource::Through(class) = &self.component.join {
                    let catalog = self.list.orm().catalog();
                    if catalog.base_table(class)? == table.as_str() {
                        columns.push(quote_identifier("ClassName"));
                        markers.push("?".to_string());
                        params.push(Value::from(class.as_str()));
                        for stamp in ["Created", "LastEdited"] {
                            columns.push(quote_identifier(stamp));
                            markers.push("CURRENT_TIMESTAMP".to_string());
                        }
                    }
                }
                for (name, value) in extra.iter() {
                    columns.push(quote_identifier(name));
                    markers.push("?".to_string());
                    params.push(value.clone());
                }
                self.db().execute(
                    &format!(
                        "INSERT INTO {} ({}) VALUES ({})",
                        quote_identifier(table),
                        columns.join(", "),
                        markers.join(", ")
                    ),
                    &params,
                )?;
            }
        }
        tracing::debug!(
            table = %table,
            child = id,
            parents = self.foreign_ids.len(),
            "Linked many_many child"
        );
        Ok(())
    }

    pub fn add_record(&self, record: &Record, extra: &OrderedMap<Value>) -> Result<()> {
        let id = record.id().ok_or_else(|| {
            Error::Logic("cannot link an unsaved record; write it first".to_string())
        })?;
        self.add(id, extra)
    }

    /// Unlink child `id` from the parents. The child itself stays.
    pub fn remove_by_id(&self, id: i64) -> Result<u64> {
        self.require_foreign_ids("remove")?;
        let mut params = vec![Value::BigInt(id)];
        params.extend(self.foreign_ids.iter().map(|f| Value::BigInt(*f)));
        self.db().execute(
            &format!(
                "DELETE FROM {} WHERE {} = ? AND {} IN ({})",
                quote_identifier(&self.component.join_table),
                quote_identifier(&self.component.child_field),
                quote_identifier(&self.component.parent_field),
                placeholders(self.foreign_ids.len())
            ),
            &params,
        )
    }

    pub fn remove(&self, record: &Record) -> Result<u64> {
        match record.id() {
            Some(id) => self.remove_by_id(id),
            None => Ok(0),
        }
    }

    /// Unlink every child the list currently holds, in one statement.
    pub fn remove_all(&self) -> Result<u64> {
        self.require_foreign_ids("remove_all")?;
        let catalog = self.list.orm().catalog();
        let child_id = catalog.sql_column_for_field(&self.component.child_class, "ID", "")?;
        let mut children = self.list.descriptor().finalize()?.select;
        children.clear_select();
        children.select_field(child_id, "ID");
        children.clear_order_by();
        let (sub_sql, sub_params) = children.build(self.db().dialect());

        let mut params: Vec<Value> = self.foreign_ids.iter().map(|f| Value::BigInt(*f)).collect();
        params.extend(sub_params);
        let removed = self.db().execute(
            &format!(
                "DELETE FROM {} WHERE {} IN ({}) AND {} IN ({})",
                quote_identifier(&self.component.join_table),
                quote_identifier(&self.component.parent_field),
                placeholders(self.foreign_ids.len()),
                quote_identifier(&self.component.child_field),
                sub_sql
            ),
            &params,
        )?;
        tracing::debug!(table = %self.component.join_table, removed, "Unlinked many_many children");
        Ok(removed)
    }

    /// Extra field values of the link to child `id`; empty when there is
    /// no link or no extras.
    pub fn extra_data(&self, id: i64) -> Result<OrderedMap<Value>> {
        self.require_foreign_ids("read extra data")?;
        if self.extras.is_empty() {
            return Ok(OrderedMap::new());
        }
        let table = &self.component.join_table;
        let mut select = SqlSelect::new(table.clone());
        for extra in &self.extras {
            select.select_field(quote_column(table, extra), extra);
        }
        select.add_where(Condition::sql(
            format!("{} = ?", quote_column(table, &self.component.child_field)),
            vec![Value::BigInt(id)],
        ));
        select.add_where(self.foreign_condition());
        select.set_limit(sqlentity_query::Limit::new(Some(1), 0));
        Ok(select
            .fetch(self.db())?
            .into_iter()
            .next()
            .map(|row| row.into_pairs().into_iter().collect())
            .unwrap_or_default())
    }
}

impl Deref for ManyManyList {
    type Target = EntityList;

    fn deref(&self) -> &EntityList {
        &self.list
    }
}

impl RelationWriter for ManyManyList {
    fn add_id(&self, id: i64, extra: &OrderedMap<Value>) -> Result<()> {
        self.add(id, extra)
    }

    fn remove_id(&self, id: i64) -> Result<()> {
        self.remove_by_id(id).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingDb, catalog};
    use std::sync::Arc;

    fn sponsors() -> (ManyManyList, Arc<RecordingDb>) {
        let db = Arc::new(RecordingDb::default());
        let orm = Orm::new(Arc::new(catalog()), db.clone());
        (ManyManyList::new(&orm, "Team", "Sponsors").unwrap(), db)
    }

    #[test]
    fn joins_the_join_table_and_selects_extras() {
        let (list, _) = sponsors();
        let (sql, params) = list.for_foreign_id(3).unwrap().sql().unwrap();
        assert!(
            sql.contains(
                "INNER JOIN \"Team_Sponsors\" ON \"Team_Sponsors\".\"SponsorID\" = \"Sponsor\".\"ID\""
            ),
            "{sql}"
        );
        assert!(sql.contains("\"Team_Sponsors\".\"Amount\" AS \"Amount\""), "{sql}");
        assert!(sql.contains("\"Team_Sponsors\".\"TeamID\" IN (?)"), "{sql}");
        assert_eq!(params, vec![Value::BigInt(3)]);
    }

    #[test]
    fn narrowing_replaces_and_alter_keeps_it() {
        let (list, _) = sponsors();
        let narrowed = list.for_foreign_id(3).unwrap().for_foreign_ids(&[4, 5]).unwrap();
        let (sql, params) = narrowed.sql().unwrap();
        assert!(sql.contains("IN (?, ?)"));
        assert_eq!(params, vec![Value::BigInt(4), Value::BigInt(5)]);

        let filtered = narrowed
            .alter(|l| {
                l.filter("Amount:GreaterThan", 10)?;
                Ok(())
            })
            .unwrap();
        let (sql, _) = filtered.sql().unwrap();
        assert!(sql.contains("\"Team_Sponsors\".\"Amount\" > ?"), "{sql}");
        assert_eq!(filtered.foreign_ids(), &[4, 5]);
    }

    #[test]
    fn writes_need_a_parent() {
        let (list, _) = sponsors();
        assert!(matches!(list.add(1, &OrderedMap::new()), Err(Error::Logic(_))));
        assert!(matches!(list.remove_all(), Err(Error::Logic(_))));
    }

    #[test]
    fn add_inserts_or_updates_the_link() {
        let (list, db) = sponsors();
        let list = list.for_foreign_id(3).unwrap();
        let mut extra = OrderedMap::new();
        extra.insert("Amount", Value::from(50));
        list.add(7, &extra).unwrap();
        assert_eq!(
            db.last_sql(),
            "INSERT INTO \"Team_Sponsors\" (\"TeamID\", \"SponsorID\", \"Amount\") VALUES (?, ?, ?)"
        );

        db.push_rows(vec![sqlentity_core::Row::from_pairs([("COUNT(*)", Value::BigInt(1))])]);
        list.add(7, &extra).unwrap();
        assert_eq!(
            db.last_sql(),
            "UPDATE \"Team_Sponsors\" SET \"Amount\" = ? WHERE \"TeamID\" = ? AND \"SponsorID\" = ?"
        );

        let mut bogus = OrderedMap::new();
        bogus.insert("Nope", Value::from(1));
        assert!(matches!(list.add(7, &bogus), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn remove_all_is_one_statement() {
        let (list, db) = sponsors();
        let removed = list.for_foreign_id(3).unwrap().remove_all().unwrap();
        assert_eq!(removed, 1);
        let statements = db.statements();
        assert_eq!(statements.len(), 1);
        let (sql, params) = &statements[0];
        assert!(
            sql.starts_with(
                "DELETE FROM \"Team_Sponsors\" WHERE \"TeamID\" IN (?) AND \"SponsorID\" IN (SELECT"
            ),
            "{sql}"
        );
        assert_eq!(params[0], Value::BigInt(3));
    }
}
