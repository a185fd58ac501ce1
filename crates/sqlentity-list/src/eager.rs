//! Batched eager loading.
//!
//! Relation chains registered on a list (`"Players.Team"`) are loaded in
//! one pass over the list's rows: each segment costs one query for all
//! parents at that level (plus one for the join rows of a many-to-many
//! segment), however many parents there are. Results are stored per
//! (chain, parent id) and read back through [`Record::eager`].
//!
//! [`Record::eager`]: crate::Record::eager

use crate::list::EntityList;
use crate::many_many::join_table_extras;
use crate::orm::Orm;
use crate::record::RECORD_CLASS_COLUMN;
use sqlentity_core::{
    Error, ManyManyComponent, OrderedMap, Relation, RemoteJoin, Result, Row, SchemaCatalog, Value,
};
use sqlentity_query::{Condition, SqlSelect, placeholders, quote_column, quote_string};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Refines the list fetched for a one-to-many or many-to-many segment.
pub type EagerCallback = Rc<dyn Fn(EntityList) -> Result<EntityList>>;

/// Relation chains registered for eager loading.
#[derive(Clone, Default)]
pub struct EagerRegistry {
    chains: Vec<Vec<String>>,
    callbacks: HashMap<String, EagerCallback>,
}

impl fmt::Debug for EagerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EagerRegistry")
            .field("chains", &self.chains)
            .field("callbacks", &self.callbacks.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl EagerRegistry {
    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    /// Registered chains, longest first within a shared prefix.
    pub fn chains(&self) -> &[Vec<String>] {
        &self.chains
    }

    fn callback(&self, path: &str) -> Option<&EagerCallback> {
        self.callbacks.get(path)
    }

    /// Register a dotted chain starting at `class`.
    ///
    /// Every segment must resolve, the chain may not be longer than
    /// `max_depth`, and only a one-to-many or many-to-many segment can take
    /// a callback. Duplicates and prefixes of registered chains add nothing.
    pub fn register(
        &mut self,
        catalog: &SchemaCatalog,
        class: &str,
        chain: &str,
        max_depth: usize,
        callback: Option<EagerCallback>,
    ) -> Result<()> {
        let segments: Vec<String> = chain.split('.').map(|s| s.trim().to_string()).collect();
        if segments.iter().any(String::is_empty) {
            return Err(Error::invalid_chain(chain, "empty relation name"));
        }
        if segments.len() > max_depth {
            return Err(Error::invalid_chain(
                chain,
                format!(
                    "eager loading is limited to {} relations per chain",
                    max_depth
                ),
            ));
        }

        let mut current = class.to_string();
        let mut last = None;
        for (i, segment) in segments.iter().enumerate() {
            let relation = catalog.resolve_relation(&current, segment)?.ok_or_else(|| {
                Error::invalid_chain(
                    chain,
                    format!("'{}' is not a relation on '{}'", segment, current),
                )
            })?;
            match relation.target_class() {
                Some(target) => current = target.to_string(),
                None if i + 1 == segments.len() => {}
                None => {
                    return Err(Error::invalid_chain(
                        chain,
                        format!("cannot load past polymorphic one_to_one '{}'", segment),
                    ));
                }
            }
            last = Some(relation);
        }

        if let Some(callback) = callback {
            let to_many = last
                .as_ref()
                .is_some_and(|r| r.many_many().is_some() || matches!(r, Relation::OneToMany { .. }));
            if !to_many {
                return Err(Error::InvalidArgument(format!(
                    "eager load callbacks only apply to one_to_many and many_to_many relations, not '{}'",
                    chain
                )));
            }
            self.callbacks.insert(segments.join("."), callback);
        }

        if self.chains.contains(&segments) {
            return Ok(());
        }
        if self
            .chains
            .iter()
            .any(|c| c.len() > segments.len() && c.starts_with(&segments))
        {
            return Ok(());
        }
        self.chains
            .retain(|c| !(segments.len() > c.len() && segments.starts_with(c)));
        self.chains.push(segments);
        Ok(())
    }
}

/// What a relation of one parent resolved to.
#[derive(Debug, Clone)]
pub enum EagerEntry {
    Record { class: String, row: Row },
    /// Unsaved stand-in for a missing reverse one-to-one, pointing back at
    /// its parent.
    Placeholder {
        class: String,
        fields: OrderedMap<Value>,
    },
    Empty,
    List { class: String, rows: Vec<Row> },
}

/// Eager-loaded data of one pass, keyed by chain and parent id.
#[derive(Debug, Default)]
pub struct EagerStore {
    entries: HashMap<String, HashMap<i64, EagerEntry>>,
}

impl EagerStore {
    pub fn get(&self, chain: &str, parent_id: i64) -> Option<&EagerEntry> {
        self.entries.get(chain)?.get(&parent_id)
    }

    /// Chains with loaded data.
    pub fn chains(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of parents with an entry under `chain`.
    pub fn parents(&self, chain: &str) -> usize {
        self.entries.get(chain).map_or(0, HashMap::len)
    }

    fn insert(&mut self, chain: &str, parent_id: i64, entry: EagerEntry) {
        self.entries
            .entry(chain.to_string())
            .or_default()
            .insert(parent_id, entry);
    }
}

/// Rows reached at one level of a chain.
struct Level {
    /// Class the rows were fetched as; empty past a polymorphic one-to-one.
    class: String,
    rows: Vec<Row>,
}

/// Load every registered chain of `list` over `rows`.
pub(crate) fn resolve(list: &EntityList, rows: &[Row]) -> Result<EagerStore> {
    let registry = list.eager_registry();
    let mut resolver = Resolver {
        orm: list.orm(),
        store: EagerStore::default(),
        queries: 0,
    };
    let root = Rc::new(Level {
        class: list.data_class().to_string(),
        rows: rows.to_vec(),
    });
    let mut seen: HashMap<String, Rc<Level>> = HashMap::new();

    for chain in registry.chains() {
        let mut parent = Rc::clone(&root);
        for depth in 0..chain.len() {
            let path = chain[..=depth].join(".");
            if let Some(level) = seen.get(&path) {
                parent = Rc::clone(level);
                continue;
            }
            let relation = resolver
                .orm
                .catalog()
                .resolve_relation(&parent.class, &chain[depth])?
                .ok_or_else(|| {
                    Error::invalid_chain(
                        &path,
                        format!("'{}' is not a relation on '{}'", chain[depth], parent.class),
                    )
                })?;

            let level = resolver.load(&path, &parent, &relation, registry.callback(&path))?;
            resolver.check_accounted(&path, &parent)?;
            tracing::debug!(
                chain = %path,
                parents = parent.rows.len(),
                fetched = level.rows.len(),
                "Eager loaded relation"
            );
            let level = Rc::new(level);
            seen.insert(path, Rc::clone(&level));
            parent = level;
        }
    }

    tracing::info!(
        class = %list.data_class(),
        rows = rows.len(),
        chains = registry.chains().len(),
        queries = resolver.queries,
        "Eager loading complete"
    );
    Ok(resolver.store)
}

struct Resolver<'a> {
    orm: &'a Orm,
    store: EagerStore,
    queries: usize,
}

impl Resolver<'_> {
    fn load(
        &mut self,
        path: &str,
        parent: &Level,
        relation: &Relation,
        callback: Option<&EagerCallback>,
    ) -> Result<Level> {
        match relation {
            Relation::OneToOne { name, target, .. } => {
                self.load_one_to_one(path, parent, name, target.as_deref())
            }
            Relation::ReverseOneToOne { target, remote, .. } => {
                self.load_reverse_one_to_one(path, parent, target, remote)
            }
            Relation::OneToMany {
                name,
                target,
                remote,
                ..
            } => self.load_one_to_many(path, parent, name, target, remote, callback),
            Relation::ManyToMany { component, .. }
            | Relation::ManyToManyThrough { component, .. }
            | Relation::ReverseManyToMany { component, .. } => {
                self.load_many_many(path, parent, component, callback)
            }
        }
    }

    /// Fetch rows of `class` matching `condition`, through `callback` if any.
    fn fetch(
        &mut self,
        class: &str,
        condition: Condition,
        callback: Option<&EagerCallback>,
    ) -> Result<Vec<Row>> {
        let mut list = self.orm.list(class)?.alter(|l| {
            l.where_condition(condition);
            Ok(())
        })?;
        if let Some(callback) = callback {
            list = callback(list)?;
            if list.limit_value().is_set() {
                return Err(Error::InvalidArgument(format!(
                    "eager load callback for '{}' must not limit the list",
                    class
                )));
            }
        }
        self.queries += 1;
        list.rows()
    }

    fn id_condition(&self, class: &str, field: &str, ids: &[i64]) -> Result<Condition> {
        let column = self.orm.catalog().sql_column_for_field(class, field, "")?;
        Ok(Condition::sql(
            format!("{} IN ({})", column, placeholders(ids.len())),
            ids.iter().map(|id| Value::BigInt(*id)).collect(),
        ))
    }

    /// Condition on the remote key of a one-to-many or reverse one-to-one,
    /// including the class (and relation) columns of a polymorphic key.
    fn remote_condition(
        &self,
        target: &str,
        remote: &RemoteJoin,
        relation: Option<&str>,
        parent: &Level,
    ) -> Result<Condition> {
        let catalog = self.orm.catalog();
        let ids = parent_ids(&parent.rows);
        let mut members = vec![self.id_condition(target, &remote.join_column, &ids)?];
        if remote.polymorphic {
            let classes: Vec<Value> = unique(parent.rows.iter().map(|r| row_class(r, &parent.class)))
                .into_iter()
                .map(Value::from)
                .collect();
            let column = catalog.sql_column_for_field(target, &remote.class_column(), "")?;
            members.push(Condition::sql(
                format!("{} IN ({})", column, placeholders(classes.len())),
                classes,
            ));
            if let (true, Some(name)) = (remote.needs_relation_column, relation) {
                let column = catalog.sql_column_for_field(target, &remote.relation_column(), "")?;
                members.push(Condition::raw(format!("{} = {}", column, quote_string(name))));
            }
        }
        Ok(Condition::all(members))
    }

    fn load_one_to_one(
        &mut self,
        path: &str,
        parent: &Level,
        name: &str,
        target: Option<&str>,
    ) -> Result<Level> {
        let key_column = format!("{}ID", name);
        let class_column = format!("{}Class", name);

        // Target class per parent; a polymorphic key names it per row.
        let mut wanted: Vec<(String, Vec<i64>)> = Vec::new();
        for row in &parent.rows {
            let Some(fk) = row.get_by_name(&key_column).and_then(Value::as_id) else {
                continue;
            };
            let class = match target {
                Some(class) => class.to_string(),
                None => match row.get_by_name(&class_column).and_then(Value::as_str) {
                    Some(class) if self.orm.catalog().has_class(class) => class.to_string(),
                    _ => continue,
                },
            };
            match wanted.iter_mut().find(|(c, _)| *c == class) {
                Some((_, ids)) => {
                    if !ids.contains(&fk) {
                        ids.push(fk);
                    }
                }
                None => wanted.push((class, vec![fk])),
            }
        }

        let mut fetched: HashMap<(String, i64), Row> = HashMap::new();
        let mut rows = Vec::new();
        for (class, ids) in &wanted {
            let condition = self.id_condition(class, "ID", ids)?;
            for row in self.fetch(class, condition, None)? {
                if let Some(id) = row.id() {
                    fetched.insert((class.clone(), id), row.clone());
                }
                rows.push(row);
            }
        }

        for row in &parent.rows {
            let Some(parent_id) = row.id() else { continue };
            let fk = row.get_by_name(&key_column).and_then(Value::as_id);
            let class = target.map(str::to_string).or_else(|| {
                row.get_by_name(&class_column)
                    .and_then(Value::as_str)
                    .map(str::to_string)
            });
            let entry = match (fk, class) {
                (Some(fk), Some(class)) => match fetched.get(&(class.clone(), fk)) {
                    Some(found) => EagerEntry::Record {
                        class,
                        row: found.clone(),
                    },
                    None => EagerEntry::Empty,
                },
                _ => EagerEntry::Empty,
            };
            self.store.insert(path, parent_id, entry);
        }

        Ok(Level {
            class: target.unwrap_or_default().to_string(),
            rows,
        })
    }

    fn load_reverse_one_to_one(
        &mut self,
        path: &str,
        parent: &Level,
        target: &str,
        remote: &RemoteJoin,
    ) -> Result<Level> {
        let rows = if parent_ids(&parent.rows).is_empty() {
            Vec::new()
        } else {
            let condition = self.remote_condition(target, remote, None, parent)?;
            self.fetch(target, condition, None)?
        };

        let mut by_key: HashMap<i64, &Row> = HashMap::new();
        for row in &rows {
            if let Some(key) = row.get_by_name(&remote.join_column).and_then(Value::as_id) {
                by_key.entry(key).or_insert(row);
            }
        }

        for row in &parent.rows {
            let Some(parent_id) = row.id() else { continue };
            let entry = match by_key.get(&parent_id) {
                Some(found) => EagerEntry::Record {
                    class: target.to_string(),
                    row: (*found).clone(),
                },
                None => {
                    let mut fields = OrderedMap::new();
                    fields.insert(remote.join_column.as_str(), Value::BigInt(parent_id));
                    if remote.polymorphic {
                        fields.insert(remote.class_column(), Value::from(row_class(row, &parent.class)));
                    }
                    EagerEntry::Placeholder {
                        class: target.to_string(),
                        fields,
                    }
                }
            };
            self.store.insert(path, parent_id, entry);
        }

        Ok(Level {
            class: target.to_string(),
            rows,
        })
    }

    fn load_one_to_many(
        &mut self,
        path: &str,
        parent: &Level,
        name: &str,
        target: &str,
        remote: &RemoteJoin,
        callback: Option<&EagerCallback>,
    ) -> Result<Level> {
        let rows = if parent_ids(&parent.rows).is_empty() {
            Vec::new()
        } else {
            let condition = self.remote_condition(target, remote, Some(name), parent)?;
            self.fetch(target, condition, callback)?
        };

        let mut groups: HashMap<i64, Vec<Row>> = HashMap::new();
        for row in &rows {
            if let Some(key) = row.get_by_name(&remote.join_column).and_then(Value::as_id) {
                groups.entry(key).or_default().push(row.clone());
            }
        }

        for row in &parent.rows {
            let Some(parent_id) = row.id() else { continue };
            let mut children = groups.get(&parent_id).cloned().unwrap_or_default();
            if remote.polymorphic {
                let class = row_class(row, &parent.class);
                children.retain(|child| {
                    child
                        .get_by_name(&remote.class_column())
                        .and_then(Value::as_str)
                        == Some(class.as_str())
                });
            }
            self.store.insert(
                path,
                parent_id,
                EagerEntry::List {
                    class: target.to_string(),
                    rows: children,
                },
            );
        }

        Ok(Level {
            class: target.to_string(),
            rows,
        })
    }

    fn load_many_many(
        &mut self,
        path: &str,
        parent: &Level,
        component: &ManyManyComponent,
        callback: Option<&EagerCallback>,
    ) -> Result<Level> {
        let ids = parent_ids(&parent.rows);
        let extras = join_table_extras(self.orm.catalog(), component)?;

        let join_rows = if ids.is_empty() {
            Vec::new()
        } else {
            let mut select = SqlSelect::new(component.join_table.clone());
            select
                .select_field(
                    quote_column(&component.join_table, &component.parent_field),
                    PARENT_KEY,
                )
                .select_field(
                    quote_column(&component.join_table, &component.child_field),
                    CHILD_KEY,
                );
            for extra in &extras {
                select.select_field(quote_column(&component.join_table, extra), extra);
            }
            select.add_where(Condition::sql(
                format!(
                    "{} IN ({})",
                    quote_column(&component.join_table, &component.parent_field),
                    placeholders(ids.len())
                ),
                ids.iter().map(|id| Value::BigInt(*id)).collect(),
            ));
            self.queries += 1;
            select.fetch(self.orm.db())?
        };

        // child id -> (parent id, extra field values), in join-row order
        let mut membership: HashMap<i64, Vec<(i64, Vec<(String, Value)>)>> = HashMap::new();
        let mut child_ids = Vec::new();
        for row in &join_rows {
            let (Some(parent_id), Some(child_id)) = (
                row.get_by_name(PARENT_KEY).and_then(Value::as_id),
                row.get_by_name(CHILD_KEY).and_then(Value::as_id),
            ) else {
                continue;
            };
            let extra_values = extras
                .iter()
                .map(|e| (e.clone(), row.get_by_name(e).cloned().unwrap_or(Value::Null)))
                .collect();
            membership
                .entry(child_id)
                .or_default()
                .push((parent_id, extra_values));
            if !child_ids.contains(&child_id) {
                child_ids.push(child_id);
            }
        }

        let children = if child_ids.is_empty() {
            Vec::new()
        } else {
            let condition = self.id_condition(&component.child_class, "ID", &child_ids)?;
            self.fetch(&component.child_class, condition, callback)?
        };

        let mut lists: HashMap<i64, Vec<Row>> = HashMap::new();
        for child in &children {
            let Some(child_id) = child.id() else { continue };
            for (parent_id, extra_values) in membership.get(&child_id).into_iter().flatten() {
                let merged = if extra_values.is_empty() {
                    child.clone()
                } else {
                    Row::from_pairs(
                        child
                            .iter()
                            .map(|(n, v)| (n.to_string(), v.clone()))
                            .filter(|(n, _)| !extras.contains(n))
                            .chain(extra_values.iter().cloned()),
                    )
                };
                lists.entry(*parent_id).or_default().push(merged);
            }
        }

        for row in &parent.rows {
            let Some(parent_id) = row.id() else { continue };
            self.store.insert(
                path,
                parent_id,
                EagerEntry::List {
                    class: component.child_class.clone(),
                    rows: lists.remove(&parent_id).unwrap_or_default(),
                },
            );
        }

        Ok(Level {
            class: component.child_class.clone(),
            rows: children,
        })
    }

    /// Every parent at this level must have an entry.
    fn check_accounted(&self, path: &str, parent: &Level) -> Result<()> {
        for row in &parent.rows {
            if let Some(id) = row.id() {
                if self.store.get(path, id).is_none() {
                    return Err(Error::Logic(format!(
                        "eager loading '{}' left parent #{} of '{}' without a result",
                        path, id, parent.class
                    )));
                }
            }
        }
        Ok(())
    }
}

const PARENT_KEY: &str = "__ParentID";
const CHILD_KEY: &str = "__ChildID";

fn parent_ids(rows: &[Row]) -> Vec<i64> {
    unique(rows.iter().filter_map(Row::id))
}

fn unique<T: PartialEq>(items: impl Iterator<Item = T>) -> Vec<T> {
    let mut out = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

/// Concrete class of a fetched row.
fn row_class(row: &Row, default: &str) -> String {
    row.get_by_name("ClassName")
        .or_else(|| row.get_by_name(RECORD_CLASS_COLUMN))
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}
