//! Entity lists.
//!
//! An `EntityList` is an immutable, lazily evaluated view over the records
//! of one class. Every refinement returns a new list built by [`alter`],
//! which clones the list and hands the clone to a closure as a
//! [`ListAlteration`]; several refinements made inside one closure share
//! that clone.
//!
//! Nothing runs until the list is read. Iteration executes the query once
//! per pass, resolves any registered eager-load chains over the complete
//! result, then hydrates records one at a time.
//!
//! [`alter`]: EntityList::alter

use crate::eager::{self, EagerCallback, EagerRegistry, EagerStore};
use crate::entity::Entity;
use crate::filter::{Filter, FilterKey, FilterValue};
use crate::orm::Orm;
use crate::record::{EagerContext, Record};
use sqlentity_core::pattern::regex;
use sqlentity_core::{Error, OrderedMap, Result, Row, Value};
use sqlentity_query::{
    Condition, Join, Limit, QueryDescriptor, SortDirection, parse_sort, placeholders, quote_column,
    relation_prefix,
};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

const SORT_PATH_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*$";

/// Rows and eager data of one iteration pass.
struct Pass {
    rows: Vec<Row>,
    store: Option<Arc<EagerStore>>,
}

pub struct EntityList {
    orm: Orm,
    descriptor: QueryDescriptor,
    eager: EagerRegistry,
    /// Pseudo-fields selected on top of the data class, name to expression.
    extra_columns: OrderedMap<String>,
    pass: RefCell<Option<Rc<Pass>>>,
}

impl Clone for EntityList {
    fn clone(&self) -> Self {
        Self {
            orm: self.orm.clone(),
            descriptor: self.descriptor.clone(),
            eager: self.eager.clone(),
            extra_columns: self.extra_columns.clone(),
            pass: RefCell::new(None),
        }
    }
}

impl fmt::Debug for EntityList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityList")
            .field("class", &self.data_class())
            .field("eager", &self.eager)
            .field("extra_columns", &self.extra_columns)
            .finish_non_exhaustive()
    }
}

impl EntityList {
    pub(crate) fn new(orm: Orm, class: &str) -> Result<Self> {
        let descriptor = QueryDescriptor::new(Arc::clone(orm.catalog()), class)?
            .allow_collision_statements(orm.config().allow_collision_statements);
        Ok(Self {
            orm,
            descriptor,
            eager: EagerRegistry::default(),
            extra_columns: OrderedMap::new(),
            pass: RefCell::new(None),
        })
    }

    pub fn orm(&self) -> &Orm {
        &self.orm
    }

    pub fn data_class(&self) -> &str {
        self.descriptor.data_class()
    }

    pub fn descriptor(&self) -> &QueryDescriptor {
        &self.descriptor
    }

    pub fn eager_registry(&self) -> &EagerRegistry {
        &self.eager
    }

    pub fn limit_value(&self) -> Limit {
        self.descriptor.limit_value()
    }

    /// The query this list runs, rendered for the connection's dialect.
    pub fn sql(&self) -> Result<(String, Vec<Value>)> {
        self.descriptor.sql(self.orm.db().dialect())
    }

    /// A copy of this list refined by `f`.
    ///
    /// ```ignore
    /// let list = players.alter(|l| {
    ///     l.filter("Team.Title", "Rovers")?.sort("Name DESC")?.limit(Some(10), 0);
    ///     Ok(())
    /// })?;
    /// ```
    pub fn alter(&self, f: impl FnOnce(&mut ListAlteration<'_>) -> Result<()>) -> Result<Self> {
        let mut list = self.clone();
        f(&mut ListAlteration { list: &mut list })?;
        Ok(list)
    }

    pub(crate) fn descriptor_mut(&mut self) -> &mut QueryDescriptor {
        &mut self.descriptor
    }

    /// Select `expr` as pseudo-field `name`, filterable and sortable like a
    /// real field.
    pub(crate) fn add_extra_column(&mut self, name: &str, expr: String) {
        self.descriptor.select_field(expr.clone(), name);
        self.extra_columns.insert(name, expr);
    }

    pub fn extra_columns(&self) -> &OrderedMap<String> {
        &self.extra_columns
    }

    // ---- refinements --------------------------------------------------

    pub fn filter(&self, key: &str, value: impl Into<FilterValue>) -> Result<Self> {
        self.alter(|l| l.filter(key, value).map(|_| ()))
    }

    pub fn filter_many<K, V>(&self, pairs: impl IntoIterator<Item = (K, V)>) -> Result<Self>
    where
        K: AsRef<str>,
        V: Into<FilterValue>,
    {
        self.alter(|l| l.filter_many(pairs).map(|_| ()))
    }

    pub fn filter_any<K, V>(&self, pairs: impl IntoIterator<Item = (K, V)>) -> Result<Self>
    where
        K: AsRef<str>,
        V: Into<FilterValue>,
    {
        self.alter(|l| l.filter_any(pairs).map(|_| ()))
    }

    pub fn exclude(&self, key: &str, value: impl Into<FilterValue>) -> Result<Self> {
        self.alter(|l| l.exclude(key, value).map(|_| ()))
    }

    pub fn exclude_many<K, V>(&self, pairs: impl IntoIterator<Item = (K, V)>) -> Result<Self>
    where
        K: AsRef<str>,
        V: Into<FilterValue>,
    {
        self.alter(|l| l.exclude_many(pairs).map(|_| ()))
    }

    pub fn exclude_any<K, V>(&self, pairs: impl IntoIterator<Item = (K, V)>) -> Result<Self>
    where
        K: AsRef<str>,
        V: Into<FilterValue>,
    {
        self.alter(|l| l.exclude_any(pairs).map(|_| ()))
    }

    pub fn where_sql(&self, sql: &str, params: Vec<Value>) -> Result<Self> {
        self.alter(|l| {
            l.where_sql(sql, params);
            Ok(())
        })
    }

    pub fn sort(&self, spec: &str) -> Result<Self> {
        self.alter(|l| l.sort(spec).map(|_| ()))
    }

    pub fn sort_by(&self, field: &str, direction: SortDirection) -> Result<Self> {
        self.alter(|l| l.sort_by(field, direction).map(|_| ()))
    }

    pub fn limit(&self, length: Option<u64>, offset: u64) -> Result<Self> {
        self.alter(|l| {
            l.limit(length, offset);
            Ok(())
        })
    }

    pub fn reverse(&self) -> Result<Self> {
        self.alter(|l| {
            l.reverse();
            Ok(())
        })
    }

    pub fn distinct(&self, distinct: bool) -> Result<Self> {
        self.alter(|l| {
            l.distinct(distinct);
            Ok(())
        })
    }

    pub fn shuffle(&self) -> Result<Self> {
        self.alter(|l| {
            l.shuffle();
            Ok(())
        })
    }

    pub fn queried_columns(&self, columns: &[&str]) -> Result<Self> {
        self.alter(|l| {
            l.queried_columns(columns);
            Ok(())
        })
    }

    pub fn subtract(&self, other: &EntityList, field: &str) -> Result<Self> {
        self.alter(|l| l.subtract(other, field).map(|_| ()))
    }

    pub fn inner_join(&self, table: &str, on: &str, alias: &str) -> Result<Self> {
        self.alter(|l| {
            l.inner_join(table, on, alias);
            Ok(())
        })
    }

    pub fn left_join(&self, table: &str, on: &str, alias: &str) -> Result<Self> {
        self.alter(|l| {
            l.left_join(table, on, alias);
            Ok(())
        })
    }

    pub fn eager_load(&self, chains: &[&str]) -> Result<Self> {
        self.alter(|l| l.eager_load(chains).map(|_| ()))
    }

    pub fn eager_load_with<F>(&self, chain: &str, callback: F) -> Result<Self>
    where
        F: Fn(EntityList) -> Result<EntityList> + 'static,
    {
        self.alter(|l| l.eager_load_with(chain, callback).map(|_| ()))
    }

    /// Records whose id is in `ids`.
    pub fn by_ids(&self, ids: &[i64]) -> Result<Self> {
        self.alter(|l| l.by_ids(ids).map(|_| ()))
    }

    // ---- column resolution --------------------------------------------

    /// Column a filter key compares against, joining its relation chain.
    fn filter_column(&mut self, key: &FilterKey) -> Result<String> {
        let catalog = Arc::clone(self.orm.catalog());
        if key.chain.is_empty() {
            if let Some(expr) = self.extra_columns.get(&key.field) {
                return Ok(expr.clone());
            }
            return catalog.sql_column_for_field(self.data_class(), &key.field, "");
        }
        let target = self.descriptor.apply_relation(&key.chain_path(), false)?;
        catalog.sql_column_for_field(&target, &key.field, &relation_prefix(&key.chain))
    }

    /// Column a sort term orders by. Only field names and linear relation
    /// chains are accepted.
    fn sort_column(&mut self, term: &str) -> Result<String> {
        let path = term.trim().replace('"', "");
        if !regex(SORT_PATH_PATTERN)?.is_match(&path) {
            return Err(Error::InvalidArgument(format!(
                "'{}' is not a field or relation chain; use where_sql for raw SQL",
                term
            )));
        }
        let catalog = Arc::clone(self.orm.catalog());
        let mut segments: Vec<&str> = path.split('.').collect();
        let field = segments.pop().unwrap_or_default();
        if !segments.is_empty() {
            let target = self.descriptor.apply_relation(&segments.join("."), true)?;
            return catalog.sql_column_for_field(&target, field, &relation_prefix(&segments));
        }

        if let Some(expr) = self.extra_columns.get(field) {
            return Ok(expr.clone());
        }
        match catalog.table_for_field(self.data_class(), field)? {
            Some(table) => Ok(quote_column(&table, field)),
            None => Err(Error::InvalidArgument(format!(
                "cannot sort by '{}', which is not a field on '{}'",
                field,
                self.data_class()
            ))),
        }
    }

    // ---- reading ------------------------------------------------------

    /// Rows of the query without eager loading.
    pub(crate) fn rows(&self) -> Result<Vec<Row>> {
        self.descriptor.execute(self.orm.db())
    }

    fn begin_pass(&self) -> Result<(Rc<Pass>, bool)> {
        let cached = self.pass.borrow().clone();
        if let Some(pass) = cached {
            return Ok((pass, false));
        }
        let rows = self.rows()?;
        let store = if self.eager.is_empty() || rows.is_empty() {
            None
        } else {
            Some(Arc::new(eager::resolve(self, &rows)?))
        };
        let pass = Rc::new(Pass { rows, store });
        *self.pass.borrow_mut() = Some(Rc::clone(&pass));
        Ok((pass, true))
    }

    fn end_pass(&self, pass: &Rc<Pass>) {
        let mut slot = self.pass.borrow_mut();
        if slot.as_ref().is_some_and(|current| Rc::ptr_eq(current, pass)) {
            *slot = None;
        }
    }

    fn hydrate(&self, row: &Row, pass: &Pass) -> Record {
        let eager = pass.store.as_ref().map(|store| EagerContext {
            store: Arc::clone(store),
            catalog: Arc::clone(self.orm.catalog()),
            prefix: String::new(),
        });
        Record::hydrate(self.orm.catalog(), self.data_class(), row, eager)
    }

    /// Iterate the records. The query (and eager loading) runs here, once;
    /// an iteration started while another is in progress shares its rows.
    pub fn iter(&self) -> Result<ListIter<'_>> {
        let (pass, owner) = self.begin_pass()?;
        Ok(ListIter {
            list: self,
            pass,
            index: 0,
            owner,
        })
    }

    pub fn to_vec(&self) -> Result<Vec<Record>> {
        Ok(self.iter()?.collect())
    }

    pub fn to_entities<T: Entity>(&self) -> Result<Vec<T>> {
        self.iter()?.map(|record| T::from_record(&record)).collect()
    }

    /// Number of records, honouring any limit. Inside an iteration pass the
    /// fetched rows are counted instead.
    pub fn count(&self) -> Result<u64> {
        if let Some(pass) = self.pass.borrow().as_ref() {
            return Ok(pass.rows.len() as u64);
        }
        self.descriptor.count(self.orm.db())
    }

    pub fn exists(&self) -> Result<bool> {
        self.descriptor.exists(self.orm.db())
    }

    pub fn first(&self) -> Result<Option<Record>> {
        let offset = self.limit_value().offset;
        Ok(self.limit(Some(1), offset)?.iter()?.next())
    }

    pub fn last(&self) -> Result<Option<Record>> {
        let count = self.count()?;
        if count == 0 {
            return Ok(None);
        }
        let offset = self.limit_value().offset + count - 1;
        Ok(self.limit(Some(1), offset)?.iter()?.next())
    }

    pub fn by_id(&self, id: i64) -> Result<Option<Record>> {
        self.filter("ID", id)?.first()
    }

    /// First record whose `key` matches `value`.
    pub fn find(&self, key: &str, value: impl Into<FilterValue>) -> Result<Option<Record>> {
        self.filter(key, value)?.first()
    }

    pub fn column(&self, field: &str) -> Result<Vec<Value>> {
        self.descriptor.column(self.orm.db(), field)
    }

    pub fn column_unique(&self, field: &str) -> Result<Vec<Value>> {
        self.descriptor.column_unique(self.orm.db(), field)
    }

    /// `(key, value)` pairs of two fields, one per record.
    pub fn map(&self, key: &str, value: &str) -> Result<Vec<(Value, Value)>> {
        for field in [key, value] {
            self.check_field(field)?;
        }
        Ok(self
            .rows()?
            .iter()
            .map(|row| {
                (
                    row.get_by_name(key).cloned().unwrap_or(Value::Null),
                    row.get_by_name(value).cloned().unwrap_or(Value::Null),
                )
            })
            .collect())
    }

    fn check_field(&self, field: &str) -> Result<()> {
        let catalog = self.orm.catalog();
        if self.extra_columns.contains_key(field) || catalog.has_field(self.data_class(), field)? {
            return Ok(());
        }
        for class in catalog.subclasses_for(self.data_class())? {
            if catalog.has_field(&class, field)? {
                return Ok(());
            }
        }
        Err(Error::InvalidArgument(format!(
            "'{}' is not a field on '{}'",
            field,
            self.data_class()
        )))
    }

    pub fn max(&self, field: &str) -> Result<Option<Value>> {
        self.descriptor.max(self.orm.db(), field)
    }

    pub fn min(&self, field: &str) -> Result<Option<Value>> {
        self.descriptor.min(self.orm.db(), field)
    }

    pub fn avg(&self, field: &str) -> Result<Option<Value>> {
        self.descriptor.avg(self.orm.db(), field)
    }

    pub fn sum(&self, field: &str) -> Result<Option<Value>> {
        self.descriptor.sum(self.orm.db(), field)
    }

    /// Fetch the list in pages of `size` records, one query per page.
    pub fn chunked_fetch(&self, size: u64) -> Result<ChunkedFetch> {
        if size == 0 {
            return Err(Error::InvalidArgument(
                "chunked_fetch needs a chunk size above zero".to_string(),
            ));
        }
        Ok(ChunkedFetch {
            list: self.clone(),
            size,
            page: 0,
            buffer: VecDeque::new(),
            done: false,
        })
    }
}

/// In-progress refinement of a cloned list.
pub struct ListAlteration<'a> {
    list: &'a mut EntityList,
}

impl ListAlteration<'_> {
    fn conditions<K, V>(
        &mut self,
        pairs: impl IntoIterator<Item = (K, V)>,
        exclude: bool,
    ) -> Result<Vec<Condition>>
    where
        K: AsRef<str>,
        V: Into<FilterValue>,
    {
        let mut out = Vec::new();
        for (key, value) in pairs {
            let filter = Filter::new(key.as_ref(), value)?;
            let column = self.list.filter_column(&filter.key)?;
            out.push(if exclude {
                filter.exclude_condition(&column)
            } else {
                filter.condition(&column)
            });
        }
        Ok(out)
    }

    /// Keep records whose `key` matches `value`.
    pub fn filter(&mut self, key: &str, value: impl Into<FilterValue>) -> Result<&mut Self> {
        self.filter_many([(key, value)])
    }

    /// Keep records matching every pair.
    pub fn filter_many<K, V>(&mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Result<&mut Self>
    where
        K: AsRef<str>,
        V: Into<FilterValue>,
    {
        for condition in self.conditions(pairs, false)? {
            self.list.descriptor.where_condition(condition);
        }
        Ok(self)
    }

    /// Keep records matching at least one pair.
    pub fn filter_any<K, V>(&mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Result<&mut Self>
    where
        K: AsRef<str>,
        V: Into<FilterValue>,
    {
        let conditions = self.conditions(pairs, false)?;
        self.list.descriptor.where_any(conditions);
        Ok(self)
    }

    pub fn exclude(&mut self, key: &str, value: impl Into<FilterValue>) -> Result<&mut Self> {
        self.exclude_many([(key, value)])
    }

    /// Remove records matching every pair; a record matching only some of
    /// them stays.
    pub fn exclude_many<K, V>(&mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Result<&mut Self>
    where
        K: AsRef<str>,
        V: Into<FilterValue>,
    {
        let conditions = self.conditions(pairs, true)?;
        self.list.descriptor.where_any(conditions);
        Ok(self)
    }

    /// Remove records matching any pair.
    pub fn exclude_any<K, V>(&mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Result<&mut Self>
    where
        K: AsRef<str>,
        V: Into<FilterValue>,
    {
        let conditions = self.conditions(pairs, true)?;
        self.list.descriptor.where_condition(Condition::all(conditions));
        Ok(self)
    }

    /// AND a raw predicate.
    pub fn where_sql(&mut self, sql: &str, params: Vec<Value>) -> &mut Self {
        self.list.descriptor.where_sql(sql, params);
        self
    }

    pub fn where_condition(&mut self, condition: Condition) -> &mut Self {
        self.list.descriptor.where_condition(condition);
        self
    }

    /// Replace the ordering. Terms are field names or linear relation
    /// chains (`Team.Title DESC`); an empty spec leaves the order alone.
    pub fn sort(&mut self, spec: &str) -> Result<&mut Self> {
        let terms = parse_sort(spec);
        if terms.is_empty() {
            return Ok(self);
        }
        let mut resolved = Vec::with_capacity(terms.len());
        for term in terms {
            resolved.push((self.list.sort_column(&term.expr)?, term.direction));
        }
        self.list.descriptor.clear_sort();
        for (column, direction) in resolved {
            self.list.descriptor.add_sort_by(&column, direction);
        }
        Ok(self)
    }

    pub fn sort_by(&mut self, field: &str, direction: SortDirection) -> Result<&mut Self> {
        let column = self.list.sort_column(field)?;
        self.list.descriptor.sort_by(&column, direction);
        Ok(self)
    }

    pub fn limit(&mut self, length: Option<u64>, offset: u64) -> &mut Self {
        self.list.descriptor.limit(length, offset);
        self
    }

    /// Flip the ordering.
    pub fn reverse(&mut self) -> &mut Self {
        self.list.descriptor.reverse_sort();
        self
    }

    pub fn distinct(&mut self, distinct: bool) -> &mut Self {
        self.list.descriptor.distinct(distinct);
        self
    }

    /// Order randomly.
    pub fn shuffle(&mut self) -> &mut Self {
        let random = self.list.orm.db().dialect().random_function();
        self.list.descriptor.sort(random);
        self
    }

    /// Only query tables holding these columns.
    pub fn queried_columns(&mut self, columns: &[&str]) -> &mut Self {
        self.list
            .descriptor
            .set_queried_columns(Some(columns.iter().map(|c| (*c).to_string()).collect()));
        self
    }

    /// Drop records whose `field` appears in `other`.
    pub fn subtract(&mut self, other: &EntityList, field: &str) -> Result<&mut Self> {
        self.list.descriptor.subtract(&other.descriptor, field)?;
        Ok(self)
    }

    pub fn inner_join(&mut self, table: &str, on: &str, alias: &str) -> &mut Self {
        self.list
            .descriptor
            .inner_join(table, on, alias, Join::DEFAULT_PRIORITY, Vec::new());
        self
    }

    pub fn left_join(&mut self, table: &str, on: &str, alias: &str) -> &mut Self {
        self.list
            .descriptor
            .left_join(table, on, alias, Join::DEFAULT_PRIORITY, Vec::new());
        self
    }

    /// Register relation chains for eager loading.
    pub fn eager_load(&mut self, chains: &[&str]) -> Result<&mut Self> {
        for chain in chains {
            self.register(chain, None)?;
        }
        Ok(self)
    }

    /// Register a chain whose last (to-many) segment is fetched through
    /// `callback`.
    pub fn eager_load_with<F>(&mut self, chain: &str, callback: F) -> Result<&mut Self>
    where
        F: Fn(EntityList) -> Result<EntityList> + 'static,
    {
        let callback: EagerCallback = Rc::new(callback);
        self.register(chain, Some(callback))?;
        Ok(self)
    }

    fn register(&mut self, chain: &str, callback: Option<EagerCallback>) -> Result<()> {
        let orm = self.list.orm.clone();
        let class = self.list.data_class().to_string();
        self.list.eager.register(
            orm.catalog(),
            &class,
            chain,
            orm.config().eager_load_max_depth,
            callback,
        )
    }

    /// Restrict to ids.
    pub fn by_ids(&mut self, ids: &[i64]) -> Result<&mut Self> {
        let column = self
            .list
            .orm
            .catalog()
            .sql_column_for_field(self.list.data_class(), "ID", "")?;
        self.list.descriptor.where_sql(
            format!("{} IN ({})", column, placeholders(ids.len().max(1))),
            if ids.is_empty() {
                vec![Value::BigInt(0)]
            } else {
                ids.iter().map(|id| Value::BigInt(*id)).collect()
            },
        );
        Ok(self)
    }
}

/// Records of one iteration pass.
pub struct ListIter<'a> {
    list: &'a EntityList,
    pass: Rc<Pass>,
    index: usize,
    /// This iterator started the pass and ends it.
    owner: bool,
}

impl Iterator for ListIter<'_> {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        match self.pass.rows.get(self.index) {
            Some(row) => {
                self.index += 1;
                Some(self.list.hydrate(row, &self.pass))
            }
            None => {
                if self.owner {
                    self.list.end_pass(&self.pass);
                }
                None
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.pass.rows.len().saturating_sub(self.index);
        (remaining, Some(remaining))
    }
}

impl Drop for ListIter<'_> {
    fn drop(&mut self) {
        if self.owner {
            self.list.end_pass(&self.pass);
        }
    }
}

/// Pages through a list, one query per page, until a short page.
pub struct ChunkedFetch {
    list: EntityList,
    size: u64,
    page: u64,
    buffer: VecDeque<Record>,
    done: bool,
}

impl ChunkedFetch {
    fn fetch_page(&mut self) -> Result<()> {
        let page = self.list.limit(Some(self.size), self.size * self.page)?.to_vec()?;
        tracing::debug!(
            class = %self.list.data_class(),
            page = self.page,
            rows = page.len(),
            "Fetched chunk"
        );
        self.page += 1;
        if (page.len() as u64) < self.size {
            self.done = true;
        }
        self.buffer.extend(page);
        Ok(())
    }
}

impl Iterator for ChunkedFetch {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Result<Record>> {
        if self.buffer.is_empty() && !self.done {
            if let Err(e) = self.fetch_page() {
                self.done = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingDb, catalog};

    fn orm() -> (Orm, Arc<RecordingDb>) {
        let db = Arc::new(RecordingDb::default());
        (Orm::new(Arc::new(catalog()), db.clone()), db)
    }

    #[test]
    fn alter_leaves_the_original_untouched() {
        let (orm, _) = orm();
        let players = orm.list("Player").unwrap();
        let (before, _) = players.sql().unwrap();
        let filtered = players.filter("Name", "Ann").unwrap();
        assert_eq!(players.sql().unwrap().0, before);
        assert_ne!(filtered.sql().unwrap().0, before);
    }

    #[test]
    fn filter_through_a_chain_joins_once() {
        let (orm, _) = orm();
        let list = orm
            .list("Player")
            .unwrap()
            .alter(|l| {
                l.filter("Team.Title", "Rovers")?.filter("Team.Title:not", "Ajax")?;
                Ok(())
            })
            .unwrap();
        let (sql, params) = list.sql().unwrap();
        assert_eq!(sql.matches("AS \"team_Team\"").count(), 1);
        assert!(sql.contains("\"team_Team\".\"Title\" = ?"));
        assert_eq!(params, vec![Value::from("Rovers"), Value::from("Ajax")]);
    }

    #[test]
    fn unknown_filter_field_fails_at_the_call() {
        let (orm, _) = orm();
        let players = orm.list("Player").unwrap();
        assert!(matches!(
            players.filter("Nope", 1),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            players.filter("Name", Vec::<i64>::new()),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn exclude_many_removes_only_full_matches() {
        let (orm, _) = orm();
        let list = orm
            .list("Player")
            .unwrap()
            .exclude_many([("Name", "Ann"), ("Number", "7")])
            .unwrap();
        let (sql, _) = list.sql().unwrap();
        assert!(sql.contains(" OR "), "{sql}");
    }

    #[test]
    fn sort_validates_terms() {
        let (orm, _) = orm();
        let players = orm.list("Player").unwrap();
        assert!(matches!(
            players.sort("RANDOM()"),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            players.sort("Comments.Body"),
            Err(Error::InvalidChain(_))
        ));
        let (sql, _) = players.sort("Team.Title DESC").unwrap().sql().unwrap();
        assert!(sql.contains("\"team_Team\".\"Title\" AS \"_SortColumn0\""), "{sql}");
        assert!(sql.ends_with("ORDER BY \"_SortColumn0\" DESC"), "{sql}");
        let (unchanged, _) = players.sort("  ").unwrap().sql().unwrap();
        assert_eq!(unchanged, players.sql().unwrap().0);
    }

    #[test]
    fn shuffle_uses_the_dialect_random_function() {
        let (orm, _) = orm();
        let (sql, _) = orm.list("Player").unwrap().shuffle().unwrap().sql().unwrap();
        assert!(sql.contains("RANDOM() AS \"_SortColumn0\""), "{sql}");
    }

    #[test]
    fn iteration_runs_the_query_once_per_pass() {
        let (orm, db) = orm();
        db.push_rows(vec![
            Row::from_pairs([("ID", Value::BigInt(1)), ("Name", Value::from("Ann"))]),
            Row::from_pairs([("ID", Value::BigInt(2)), ("Name", Value::from("Bo"))]),
        ]);
        let players = orm.list("Player").unwrap();
        let mut iter = players.iter().unwrap();
        assert_eq!(iter.next().unwrap().id(), Some(1));
        assert_eq!(players.count().unwrap(), 2);
        assert_eq!(iter.next().unwrap().id(), Some(2));
        assert!(iter.next().is_none());
        assert_eq!(db.statements().len(), 1);
    }

    #[test]
    fn chunk_size_must_be_positive() {
        let (orm, _) = orm();
        assert!(matches!(
            orm.list("Player").unwrap().chunked_fetch(0),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn eager_registration_errors_surface_at_the_call() {
        let (orm, _) = orm();
        let players = orm.list("Player").unwrap();
        assert!(matches!(
            players.eager_load(&["Missing"]),
            Err(Error::InvalidChain(_))
        ));
        assert!(players.eager_load(&["Team", "Comments"]).is_ok());
    }
}
