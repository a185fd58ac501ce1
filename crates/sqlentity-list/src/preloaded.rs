//! In-memory lists of eager-loaded rows.
//!
//! A `PreloadedList` holds rows the eager loader already fetched. Every
//! refinement works on those rows without touching the database, and the
//! list cannot be written to.

use crate::filter::{Filter, FilterValue};
use crate::record::{EagerContext, Record};
use sqlentity_core::pattern::regex;
use sqlentity_core::{Error, Result, Row, SchemaCatalog, Value};
use sqlentity_query::{SortDirection, parse_sort};
use std::cmp::Ordering;
use std::sync::Arc;

const FIELD_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_]*$";

#[derive(Debug, Clone)]
pub struct PreloadedList {
    catalog: Arc<SchemaCatalog>,
    class: String,
    rows: Vec<Row>,
    eager: Option<EagerContext>,
}

impl PreloadedList {
    pub(crate) fn new(
        catalog: Arc<SchemaCatalog>,
        class: impl Into<String>,
        rows: Vec<Row>,
        eager: Option<EagerContext>,
    ) -> Self {
        Self {
            catalog,
            class: class.into(),
            rows,
            eager,
        }
    }

    pub fn data_class(&self) -> &str {
        &self.class
    }

    fn with_rows(&self, rows: Vec<Row>) -> Self {
        Self {
            catalog: Arc::clone(&self.catalog),
            class: self.class.clone(),
            rows,
            eager: self.eager.clone(),
        }
    }

    fn check_field(&self, field: &str) -> Result<()> {
        if self.catalog.has_field(&self.class, field)?
            || self.rows.iter().any(|row| row.contains_column(field))
        {
            return Ok(());
        }
        Err(Error::InvalidArgument(format!(
            "'{}' is not a field on '{}'",
            field, self.class
        )))
    }

    fn parse_filters<K, V>(&self, pairs: impl IntoIterator<Item = (K, V)>) -> Result<Vec<Filter>>
    where
        K: AsRef<str>,
        V: Into<FilterValue>,
    {
        let mut filters = Vec::new();
        for (key, value) in pairs {
            let filter = Filter::new(key.as_ref(), value)?;
            if !filter.key.chain.is_empty() {
                return Err(Error::InvalidArgument(format!(
                    "preloaded lists cannot filter through relations ('{}')",
                    key.as_ref()
                )));
            }
            self.check_field(&filter.key.field)?;
            filters.push(filter);
        }
        Ok(filters)
    }

    /// How many of `filters` a row matches.
    fn matches(row: &Row, filters: &[Filter]) -> usize {
        filters
            .iter()
            .filter(|filter| {
                filter.matches(row.get_by_name(&filter.key.field).unwrap_or(&Value::Null))
            })
            .count()
    }

    fn retain(&self, keep: impl Fn(usize) -> bool, filters: &[Filter]) -> Self {
        self.with_rows(
            self.rows
                .iter()
                .filter(|row| keep(Self::matches(row, filters)))
                .cloned()
                .collect(),
        )
    }

    pub fn filter(&self, key: &str, value: impl Into<FilterValue>) -> Result<Self> {
        self.filter_many([(key, value)])
    }

    /// Rows matching every pair.
    pub fn filter_many<K, V>(&self, pairs: impl IntoIterator<Item = (K, V)>) -> Result<Self>
    where
        K: AsRef<str>,
        V: Into<FilterValue>,
    {
        let filters = self.parse_filters(pairs)?;
        let total = filters.len();
        Ok(self.retain(|hits| hits == total, &filters))
    }

    /// Rows matching at least one pair.
    pub fn filter_any<K, V>(&self, pairs: impl IntoIterator<Item = (K, V)>) -> Result<Self>
    where
        K: AsRef<str>,
        V: Into<FilterValue>,
    {
        let filters = self.parse_filters(pairs)?;
        Ok(self.retain(|hits| hits > 0, &filters))
    }

    pub fn exclude(&self, key: &str, value: impl Into<FilterValue>) -> Result<Self> {
        self.exclude_many([(key, value)])
    }

    /// Drop rows matching every pair.
    pub fn exclude_many<K, V>(&self, pairs: impl IntoIterator<Item = (K, V)>) -> Result<Self>
    where
        K: AsRef<str>,
        V: Into<FilterValue>,
    {
        let filters = self.parse_filters(pairs)?;
        let total = filters.len();
        Ok(self.retain(|hits| hits < total, &filters))
    }

    /// Drop rows matching any pair.
    pub fn exclude_any<K, V>(&self, pairs: impl IntoIterator<Item = (K, V)>) -> Result<Self>
    where
        K: AsRef<str>,
        V: Into<FilterValue>,
    {
        let filters = self.parse_filters(pairs)?;
        Ok(self.retain(|hits| hits == 0, &filters))
    }

    /// Stable sort by one or more fields (`"Number DESC, Name"`).
    pub fn sort(&self, spec: &str) -> Result<Self> {
        let mut terms = Vec::new();
        for term in parse_sort(spec) {
            let field = term.expr.replace('"', "");
            if !regex(FIELD_PATTERN)?.is_match(&field) {
                return Err(Error::InvalidArgument(format!(
                    "preloaded lists sort by field names only, not '{}'",
                    term.expr
                )));
            }
            self.check_field(&field)?;
            terms.push((field, term.direction));
        }
        let mut rows = self.rows.clone();
        rows.sort_by(|a, b| {
            for (field, direction) in &terms {
                let left = a.get_by_name(field).unwrap_or(&Value::Null);
                let right = b.get_by_name(field).unwrap_or(&Value::Null);
                let ordering = match direction {
                    SortDirection::Asc => left.compare(right),
                    SortDirection::Desc => right.compare(left),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
        Ok(self.with_rows(rows))
    }

    pub fn sort_by(&self, field: &str, direction: SortDirection) -> Result<Self> {
        self.sort(&format!("{} {}", field, direction.as_str()))
    }

    pub fn limit(&self, length: Option<u64>, offset: u64) -> Self {
        let skip = usize::try_from(offset).unwrap_or(usize::MAX);
        let take = length.map_or(usize::MAX, |n| usize::try_from(n).unwrap_or(usize::MAX));
        self.with_rows(self.rows.iter().skip(skip).take(take).cloned().collect())
    }

    pub fn reverse(&self) -> Self {
        self.with_rows(self.rows.iter().rev().cloned().collect())
    }

    pub fn count(&self) -> u64 {
        self.rows.len() as u64
    }

    pub fn exists(&self) -> bool {
        !self.rows.is_empty()
    }

    fn hydrate(&self, row: &Row) -> Record {
        Record::hydrate(&self.catalog, &self.class, row, self.eager.clone())
    }

    pub fn first(&self) -> Option<Record> {
        self.rows.first().map(|row| self.hydrate(row))
    }

    pub fn last(&self) -> Option<Record> {
        self.rows.last().map(|row| self.hydrate(row))
    }

    pub fn by_id(&self, id: i64) -> Option<Record> {
        self.rows
            .iter()
            .find(|row| row.id() == Some(id))
            .map(|row| self.hydrate(row))
    }

    /// First record whose `key` matches `value`.
    pub fn find(&self, key: &str, value: impl Into<FilterValue>) -> Result<Option<Record>> {
        Ok(self.filter(key, value)?.first())
    }

    pub fn column(&self, field: &str) -> Result<Vec<Value>> {
        self.check_field(field)?;
        Ok(self
            .rows
            .iter()
            .map(|row| row.get_by_name(field).cloned().unwrap_or(Value::Null))
            .collect())
    }

    pub fn map(&self, key: &str, value: &str) -> Result<Vec<(Value, Value)>> {
        Ok(self.column(key)?.into_iter().zip(self.column(value)?).collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = Record> + '_ {
        self.rows.iter().map(|row| self.hydrate(row))
    }

    pub fn to_vec(&self) -> Vec<Record> {
        self.iter().collect()
    }

    pub fn add(&self, _id: i64) -> Result<()> {
        Err(read_only("add"))
    }

    pub fn remove(&self, _id: i64) -> Result<()> {
        Err(read_only("remove"))
    }

    pub fn set(&self, _ids: &[i64]) -> Result<()> {
        Err(read_only("set"))
    }
}

fn read_only(operation: &str) -> Error {
    Error::Logic(format!(
        "cannot {} on an eager-loaded list; query the relation instead",
        operation
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::catalog;

    fn players() -> PreloadedList {
        let row = |id: i64, name: &str, number: Option<i64>| {
            Row::from_pairs([
                ("ID", Value::BigInt(id)),
                ("Name", Value::from(name)),
                ("Number", Value::from(number)),
            ])
        };
        PreloadedList::new(
            Arc::new(catalog()),
            "Player",
            vec![
                row(1, "Ann", Some(9)),
                row(2, "Bo", Some(7)),
                row(3, "Cy", None),
                row(4, "Ann", Some(7)),
            ],
            None,
        )
    }

    fn ids(list: &PreloadedList) -> Vec<i64> {
        list.iter().filter_map(|r| r.id()).collect()
    }

    #[test]
    fn filters_and_excludes_by_match_count() {
        let list = players();
        assert_eq!(ids(&list.filter("Name", "Ann").unwrap()), vec![1, 4]);
        assert_eq!(
            ids(&list.filter_many([("Name", FilterValue::from("Ann")), ("Number", 7.into())]).unwrap()),
            vec![4]
        );
        assert_eq!(
            ids(&list.filter_any([("Name", FilterValue::from("Bo")), ("Number", 9.into())]).unwrap()),
            vec![1, 2]
        );
        assert_eq!(
            ids(&list.exclude_many([("Name", FilterValue::from("Ann")), ("Number", 7.into())]).unwrap()),
            vec![1, 2, 3]
        );
        assert_eq!(
            ids(&list.exclude_any([("Name", FilterValue::from("Ann")), ("Number", 7.into())]).unwrap()),
            vec![3]
        );
    }

    #[test]
    fn search_filters_in_memory() {
        let list = players();
        assert_eq!(ids(&list.filter("Number:GreaterThan", 7).unwrap()), vec![1]);
        assert_eq!(ids(&list.filter("Name:StartsWith:nocase", "a").unwrap()), vec![1, 4]);
        assert_eq!(ids(&list.filter("Number", vec![7, 9]).unwrap()), vec![1, 2, 4]);
        assert_eq!(ids(&list.filter("Number", Value::Null).unwrap()), vec![3]);
    }

    #[test]
    fn rejects_unknown_fields_and_chains() {
        let list = players();
        assert!(matches!(list.filter("Nope", 1), Err(Error::InvalidArgument(_))));
        assert!(matches!(list.filter("Team.Title", "x"), Err(Error::InvalidArgument(_))));
        assert!(matches!(list.sort("LOWER(Name)"), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn sorting_is_stable_and_nulls_first() {
        let list = players();
        assert_eq!(ids(&list.sort("Number").unwrap()), vec![3, 2, 4, 1]);
        assert_eq!(ids(&list.sort("Number DESC, Name").unwrap()), vec![1, 4, 2, 3]);
        assert_eq!(ids(&list.sort_by("Name", SortDirection::Desc).unwrap()), vec![3, 2, 1, 4]);
    }

    #[test]
    fn slicing_and_lookup() {
        let list = players();
        assert_eq!(ids(&list.limit(Some(2), 1)), vec![2, 3]);
        assert_eq!(ids(&list.limit(None, 3)), vec![4]);
        assert_eq!(ids(&list.reverse()), vec![4, 3, 2, 1]);
        assert_eq!(list.count(), 4);
        assert_eq!(list.first().and_then(|r| r.id()), Some(1));
        assert_eq!(list.last().and_then(|r| r.id()), Some(4));
        assert_eq!(list.by_id(3).unwrap().get("Name"), Some(&Value::from("Cy")));
        assert!(list.by_id(9).is_none());
        assert_eq!(
            list.find("Number", 7).unwrap().and_then(|r| r.id()),
            Some(2)
        );
        assert_eq!(
            list.map("ID", "Name").unwrap()[1],
            (Value::BigInt(2), Value::from("Bo"))
        );
    }

    #[test]
    fn writes_fail_fast() {
        let list = players();
        assert!(matches!(list.add(5), Err(Error::Logic(_))));
        assert!(matches!(list.remove(1), Err(Error::Logic(_))));
        assert!(matches!(list.set(&[1]), Err(Error::Logic(_))));
    }
}
