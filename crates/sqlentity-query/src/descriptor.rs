//! The query descriptor.
//!
//! A `QueryDescriptor` is the mutable SQL model behind one entity list. It
//! starts as `SELECT DISTINCT ... FROM "<BaseTable>"`, collects joins,
//! conditions and ordering as the list is refined, and is *finalised* into a
//! concrete [`SqlSelect`] only when something needs to run. Finalisation
//! joins the inheritance tables, selects their columns, resolves columns
//! that more than one table provides, and makes sure every ORDER BY term is
//! selected (required under DISTINCT).
//!
//! The finalised query is cached until the next mutation.

use crate::clause::{Limit, OrderBy, SortDirection, parse_sort};
use crate::expr::{Condition, placeholders, quote_column, quote_identifier, quote_string};
use crate::join::{Join, JoinType};
use crate::select::SqlSelect;
use sqlentity_core::pattern::regex;
use sqlentity_core::{
    Database, Dialect, Error, FieldType, ManyManyComponent, OrderedMap, Relation, RelationKind,
    RemoteJoin, Result, Row, SchemaCatalog, Value,
};
use std::cell::RefCell;
use std::sync::Arc;

/// Priority of subclass table joins. Relation joins use
/// [`Join::DEFAULT_PRIORITY`] and render after them.
const SUBCLASS_JOIN_PRIORITY: i32 = 10;

const SORT_COLUMN: &str = "_SortColumn";

/// Join alias prefix for a relation chain: `Team.Sponsors` becomes
/// `team_sponsors_`. The empty chain has no prefix.
pub fn relation_prefix<S: AsRef<str>>(chain: &[S]) -> String {
    if chain.is_empty() {
        return String::new();
    }
    let joined: Vec<&str> = chain.iter().map(AsRef::as_ref).collect();
    format!("{}_", joined.join("_").to_lowercase())
}

/// The concrete query produced by finalisation.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizedQuery {
    pub select: SqlSelect,
    /// Field name to every qualified expression that competed for it.
    pub collisions: OrderedMap<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct QueryDescriptor {
    catalog: Arc<SchemaCatalog>,
    data_class: String,
    query: SqlSelect,
    query_params: OrderedMap<Value>,
    filter_by_class_name: bool,
    queried_columns: Option<Vec<String>>,
    allow_collision_statements: bool,
    finalized: RefCell<Option<FinalizedQuery>>,
}

impl QueryDescriptor {
    /// Start a query over `data_class`, applying its default sort.
    pub fn new(catalog: Arc<SchemaCatalog>, data_class: &str) -> Result<Self> {
        let base_table = catalog.base_table(data_class)?.to_string();
        let default_sort = catalog.default_sort(data_class)?.map(str::to_string);
        let mut query = SqlSelect::new(base_table);
        query.set_distinct(true);

        let mut descriptor = Self {
            catalog,
            data_class: data_class.to_string(),
            query,
            query_params: OrderedMap::new(),
            filter_by_class_name: true,
            queried_columns: None,
            allow_collision_statements: false,
            finalized: RefCell::new(None),
        };
        if let Some(sort) = default_sort {
            descriptor.sort(&sort);
        }
        Ok(descriptor)
    }

    /// Emit colliding expressions that do not map to a class table as
    /// `WHEN expr IS NOT NULL` branches instead of dropping them.
    pub fn allow_collision_statements(mut self, allow: bool) -> Self {
        self.finalized.get_mut().take();
        self.allow_collision_statements = allow;
        self
    }

    pub fn catalog(&self) -> &Arc<SchemaCatalog> {
        &self.catalog
    }

    pub fn data_class(&self) -> &str {
        &self.data_class
    }

    /// The query as built so far, before finalisation.
    pub fn query(&self) -> &SqlSelect {
        &self.query
    }

    /// Mutable access to the query; drops the finalised cache.
    fn touch(&mut self) -> &mut SqlSelect {
        self.finalized.get_mut().take();
        &mut self.query
    }

    // ---- relations ----------------------------------------------------

    /// Join every segment of a dotted relation chain and return the class
    /// the chain ends on.
    ///
    /// Joins are aliased by chain prefix, so applying the same chain twice
    /// adds nothing. With `linear_only`, segments that can yield several
    /// rows per parent are rejected.
    pub fn apply_relation(&mut self, chain: &str, linear_only: bool) -> Result<String> {
        let mut model_class = self.data_class.clone();
        if chain.is_empty() {
            return Ok(model_class);
        }
        let segments: Vec<&str> = chain.split('.').collect();

        for depth in 0..segments.len() {
            let segment = segments[depth];
            let parent_prefix = relation_prefix(&segments[..depth]);
            let prefix = relation_prefix(&segments[..=depth]);

            let relation = self
                .catalog
                .resolve_relation(&model_class, segment)?
                .ok_or_else(|| {
                    Error::invalid_chain(
                        chain,
                        format!("'{}' is not a relation on '{}'", segment, model_class),
                    )
                })?;
            if linear_only && !relation.kind().is_linear() {
                return Err(Error::invalid_chain(
                    chain,
                    format!(
                        "'{}' is a {} relation on '{}', not a linear one",
                        segment,
                        relation.kind().as_str(),
                        model_class
                    ),
                ));
            }

            model_class = match &relation {
                Relation::OneToOne { target: None, .. } => {
                    return Err(Error::invalid_chain(
                        chain,
                        format!(
                            "cannot join polymorphic one_to_one '{}' on '{}'",
                            segment, model_class
                        ),
                    ));
                }
                Relation::OneToOne {
                    target: Some(target),
                    ..
                } => {
                    self.join_one_to_one(&model_class, segment, target, &parent_prefix, &prefix)?;
                    target.clone()
                }
                Relation::ReverseOneToOne { target, remote, .. }
                | Relation::OneToMany { target, remote, .. } => {
                    self.join_one_to_many(
                        &model_class,
                        segment,
                        target,
                        remote,
                        relation.kind(),
                        &parent_prefix,
                        &prefix,
                    )?;
                    target.clone()
                }
                Relation::ManyToMany { component, .. }
                | Relation::ManyToManyThrough { component, .. }
                | Relation::ReverseManyToMany { component, .. } => {
                    self.join_many_many(component, &parent_prefix, &prefix)?;
                    component.child_class.clone()
                }
            };
        }
        Ok(model_class)
    }

    fn join_one_to_one(
        &mut self,
        local_class: &str,
        field: &str,
        target: &str,
        local_prefix: &str,
        prefix: &str,
    ) -> Result<()> {
        let foreign_base = self.catalog.base_class(target)?;
        let foreign_base_table = self.catalog.table_name(&foreign_base)?.to_string();
        let alias = format!("{}{}", prefix, foreign_base_table);
        if self.query.is_joined_to(&alias) {
            return Ok(());
        }

        let foreign_id = self.catalog.sql_column_for_field(&foreign_base, "ID", prefix)?;
        let local_column =
            self.catalog
                .sql_column_for_field(local_class, &format!("{}ID", field), local_prefix)?;
        self.touch().add_join(Join::left(
            &foreign_base_table,
            format!("{} = {}", foreign_id, local_column),
            &alias,
        ));
        self.join_ancestor_tables(target, &foreign_base_table, prefix)
    }

    #[allow(clippy::too_many_arguments)]
    fn join_one_to_many(
        &mut self,
        local_class: &str,
        relation: &str,
        target: &str,
        remote: &RemoteJoin,
        kind: RelationKind,
        local_prefix: &str,
        prefix: &str,
    ) -> Result<()> {
        let foreign_base = self.catalog.base_class(target)?;
        let foreign_base_table = self.catalog.table_name(&foreign_base)?.to_string();
        let alias = format!("{}{}", prefix, foreign_base_table);
        if self.query.is_joined_to(&alias) {
            return Ok(());
        }

        let local_id = self.catalog.sql_column_for_field(local_class, "ID", local_prefix)?;
        let key = self
            .catalog
            .sql_column_for_field(target, &remote.join_column, prefix)?;
        let mut on = format!("{} = {}", key, local_id);
        if remote.polymorphic {
            let class_column = self
                .catalog
                .sql_column_for_field(target, &remote.class_column(), prefix)?;
            let local_class_column =
                self.catalog
                    .sql_column_for_field(local_class, "ClassName", local_prefix)?;
            on.push_str(&format!(" AND {} = {}", class_column, local_class_column));
            if remote.needs_relation_column && kind == RelationKind::OneToMany {
                let relation_column = self
                    .catalog
                    .sql_column_for_field(target, &remote.relation_column(), prefix)?;
                on.push_str(&format!(" AND {} = {}", relation_column, quote_string(relation)));
            }
        }

        // The key may live on a subclass table of the target; that table is
        // joined first so the base table can hang off it.
        let key_table = self
            .catalog
            .table_for_field(target, &remote.join_column)?
            .unwrap_or_else(|| foreign_base_table.clone());
        if key_table == foreign_base_table {
            self.touch().add_join(Join::left(&foreign_base_table, on, &alias));
        } else {
            let key_alias = format!("{}{}", prefix, key_table);
            self.touch().add_join(Join::left(&key_table, on, &key_alias));
            self.touch().add_join(Join::left(
                &foreign_base_table,
                format!(
                    "{} = {}",
                    quote_column(&alias, "ID"),
                    quote_column(&key_alias, "ID")
                ),
                &alias,
            ));
        }
        self.join_ancestor_tables(target, &foreign_base_table, prefix)
    }

    fn join_many_many(
        &mut self,
        component: &ManyManyComponent,
        parent_prefix: &str,
        prefix: &str,
    ) -> Result<()> {
        let child_base = self.catalog.base_class(&component.child_class)?;
        let child_base_table = self.catalog.table_name(&child_base)?.to_string();
        let child_alias = format!("{}{}", prefix, child_base_table);
        if self.query.is_joined_to(&child_alias) {
            return Ok(());
        }

        let join_alias = format!("{}{}", prefix, component.join_table);
        let parent_id = self
            .catalog
            .sql_column_for_field(&component.parent_class, "ID", parent_prefix)?;
        self.touch().add_join(Join::left(
            &component.join_table,
            format!(
                "{} = {}",
                quote_column(&join_alias, &component.parent_field),
                parent_id
            ),
            &join_alias,
        ));

        let child_id = self.catalog.sql_column_for_field(&child_base, "ID", prefix)?;
        self.touch().add_join(Join::left(
            &child_base_table,
            format!(
                "{} = {}",
                quote_column(&join_alias, &component.child_field),
                child_id
            ),
            &child_alias,
        ));
        self.join_ancestor_tables(&component.child_class, &child_base_table, prefix)
    }

    /// Join the non-base tables of `class`'s ancestry under `prefix`.
    fn join_ancestor_tables(&mut self, class: &str, base_table: &str, prefix: &str) -> Result<()> {
        let base_alias = format!("{}{}", prefix, base_table);
        for ancestor in self.catalog.ancestry(class)?.iter().rev() {
            let Some(table) = self.catalog.table_for(ancestor)?.map(str::to_string) else {
                continue;
            };
            if table == base_table {
                continue;
            }
            let alias = format!("{}{}", prefix, table);
            if self.query.is_joined_to(&alias) {
                continue;
            }
            self.touch().add_join(Join::left(
                &table,
                format!(
                    "{} = {}",
                    quote_column(&base_alias, "ID"),
                    quote_column(&alias, "ID")
                ),
                &alias,
            ));
        }
        Ok(())
    }

    // ---- mutators -----------------------------------------------------

    /// AND a raw predicate with parameters.
    pub fn where_sql(&mut self, sql: impl Into<String>, params: Vec<Value>) -> &mut Self {
        self.touch().add_where(Condition::sql(sql, params));
        self
    }

    /// AND a condition tree.
    pub fn where_condition(&mut self, condition: Condition) -> &mut Self {
        self.touch().add_where(condition);
        self
    }

    /// AND a disjunction of conditions.
    pub fn where_any(&mut self, conditions: Vec<Condition>) -> &mut Self {
        self.touch().add_where(Condition::any(conditions));
        self
    }

    /// Replace the ordering with a sort string. Raw SQL is accepted.
    pub fn sort(&mut self, spec: &str) -> &mut Self {
        self.touch().clear_order_by();
        self.add_sort(spec)
    }

    /// Append the terms of a sort string to the ordering.
    pub fn add_sort(&mut self, spec: &str) -> &mut Self {
        for order in parse_sort(spec) {
            self.push_order(order);
        }
        self
    }

    /// Replace the ordering with one expression.
    pub fn sort_by(&mut self, expr: &str, direction: SortDirection) -> &mut Self {
        self.touch().clear_order_by();
        self.push_order(OrderBy::new(expr, direction));
        self
    }

    pub fn add_sort_by(&mut self, expr: &str, direction: SortDirection) -> &mut Self {
        self.push_order(OrderBy::new(expr, direction));
        self
    }

    /// Function expressions are moved into the select list under a
    /// `_SortColumnN` alias and ordered by that alias.
    fn push_order(&mut self, order: OrderBy) {
        let query = self.touch();
        if !order.expr.contains('(') {
            query.add_order_by(order);
            return;
        }
        let alias = next_sort_alias(query, &[]);
        query.select_field(order.expr.trim(), &alias);
        query.add_order_by(OrderBy::new(quote_identifier(&alias), order.direction));
    }

    /// Flip every ordering direction.
    pub fn reverse_sort(&mut self) -> &mut Self {
        for order in self.touch().order_by_mut() {
            order.direction = order.direction.reversed();
        }
        self
    }

    pub fn clear_sort(&mut self) -> &mut Self {
        self.touch().clear_order_by();
        self
    }

    pub fn limit(&mut self, length: Option<u64>, offset: u64) -> &mut Self {
        self.touch().set_limit(Limit::new(length, offset));
        self
    }

    pub fn limit_value(&self) -> Limit {
        self.query.limit()
    }

    pub fn distinct(&mut self, distinct: bool) -> &mut Self {
        self.touch().set_distinct(distinct);
        self
    }

    pub fn group_by(&mut self, expr: &str) -> &mut Self {
        self.touch().add_group_by(expr);
        self
    }

    pub fn having(&mut self, sql: impl Into<String>, params: Vec<Value>) -> &mut Self {
        self.touch().add_having(Condition::sql(sql, params));
        self
    }

    /// Add a raw INNER JOIN of `table` under `alias`.
    pub fn inner_join(
        &mut self,
        table: &str,
        on: &str,
        alias: &str,
        priority: i32,
        params: Vec<Value>,
    ) -> &mut Self {
        self.touch()
            .add_join(Join::inner(table, on, alias).priority(priority).params(params));
        self
    }

    /// Add a raw LEFT JOIN of `table` under `alias`.
    pub fn left_join(
        &mut self,
        table: &str,
        on: &str,
        alias: &str,
        priority: i32,
        params: Vec<Value>,
    ) -> &mut Self {
        self.touch()
            .add_join(Join::left(table, on, alias).priority(priority).params(params));
        self
    }

    /// Join a subquery under `alias`.
    pub fn join_subquery(
        &mut self,
        join_type: JoinType,
        sql: &str,
        params: Vec<Value>,
        on: &str,
        alias: &str,
    ) -> &mut Self {
        self.touch()
            .add_join(Join::subquery(join_type, sql, params, on, alias));
        self
    }

    pub fn remove_join(&mut self, alias: &str) -> &mut Self {
        self.touch().remove_join(alias);
        self
    }

    /// Select an extra expression under `alias`.
    pub fn select_field(&mut self, expr: impl Into<String>, alias: &str) -> &mut Self {
        self.touch().select_field(expr, alias);
        self
    }

    pub fn set_query_param(&mut self, key: &str, value: impl Into<Value>) -> &mut Self {
        self.finalized.get_mut().take();
        self.query_params.insert(key, value.into());
        self
    }

    pub fn query_param(&self, key: &str) -> Option<&Value> {
        self.query_params.get(key)
    }

    pub fn query_params(&self) -> &OrderedMap<Value> {
        &self.query_params
    }

    /// Restrict finalisation to tables holding these columns. `None`
    /// selects the whole ancestry.
    pub fn set_queried_columns(&mut self, columns: Option<Vec<String>>) -> &mut Self {
        self.finalized.get_mut().take();
        self.queried_columns = columns;
        self
    }

    pub fn queried_columns(&self) -> Option<&[String]> {
        self.queried_columns.as_deref()
    }

    /// Whether to restrict a subclass query to rows of that subclass.
    pub fn set_filter_by_class_name(&mut self, filter: bool) -> &mut Self {
        self.finalized.get_mut().take();
        self.filter_by_class_name = filter;
        self
    }

    /// Exclude rows whose `field` appears in `other`'s result.
    pub fn subtract(&mut self, other: &QueryDescriptor, field: &str) -> Result<&mut Self> {
        let other_expr = other.expression_for_field(field)?.ok_or_else(|| {
            Error::InvalidArgument(format!(
                "cannot subtract on '{}', which '{}' does not select",
                field, other.data_class
            ))
        })?;
        let own_expr = self.expression_for_field(field)?.ok_or_else(|| {
            Error::InvalidArgument(format!(
                "cannot subtract on '{}', which '{}' does not select",
                field, self.data_class
            ))
        })?;

        let mut sub = other.finalize()?.select;
        sub.clear_select();
        sub.select_field(other_expr, field);
        sub.clear_order_by();
        let (sub_sql, sub_params) = sub.build(Dialect::default());
        Ok(self.where_sql(format!("{} NOT IN ({})", own_expr, sub_sql), sub_params))
    }

    // ---- finalisation -------------------------------------------------

    /// The finalised query for the current state, cached until the next
    /// mutation.
    pub fn finalize(&self) -> Result<FinalizedQuery> {
        if let Some(done) = self.finalized.borrow().as_ref() {
            return Ok(done.clone());
        }
        let done = self.build_finalized(self.queried_columns.as_deref())?;
        *self.finalized.borrow_mut() = Some(done.clone());
        Ok(done)
    }

    /// Finalise for an explicit column set without touching the cache.
    pub fn finalize_with_columns(&self, columns: &[String]) -> Result<FinalizedQuery> {
        self.build_finalized(Some(columns))
    }

    fn build_finalized(&self, queried: Option<&[String]>) -> Result<FinalizedQuery> {
        let catalog = &self.catalog;
        let mut query = self.query.clone();
        let base_class = catalog.base_class(&self.data_class)?;
        let base_table = catalog.table_name(&base_class)?.to_string();
        let base_id = quote_column(&base_table, "ID");
        let ancestry = catalog.ancestry(&self.data_class)?;

        let queried = match queried {
            Some(columns) => Some(self.expand_queried_columns(columns)?),
            None => None,
        };
        let table_classes = if queried.is_some() {
            catalog.data_classes_for(&self.data_class)?
        } else {
            ancestry.clone()
        };

        let mut collisions: OrderedMap<Vec<String>> = OrderedMap::new();
        for table_class in &table_classes {
            let Some(table) = catalog.table_for(table_class)?.map(str::to_string) else {
                continue;
            };
            let columns: Vec<String> = catalog
                .database_fields(table_class)?
                .keys()
                .filter(|column| *column != "ID")
                .filter(|column| {
                    queried
                        .as_ref()
                        .is_none_or(|wanted| wanted.iter().any(|w| w.as_str() == *column))
                })
                .map(str::to_string)
                .collect();
            if !ancestry.contains(table_class) && columns.is_empty() {
                continue;
            }

            for column in &columns {
                let quoted = quote_column(&table, column);
                match query.expression_for_field(column).map(str::to_string) {
                    Some(existing) => match collisions.get_mut(column) {
                        Some(candidates) => candidates.push(quoted),
                        None => {
                            collisions.insert(column.as_str(), vec![existing, quoted]);
                        }
                    },
                    None => {
                        query.select_field(quoted, column);
                    }
                }
            }

            if *table_class != base_class {
                query.add_join(
                    Join::left(
                        &table,
                        format!("{} = {}", quote_column(&table, "ID"), base_id),
                        &table,
                    )
                    .priority(SUBCLASS_JOIN_PRIORITY),
                );
            }
        }

        if !collisions.is_empty() {
            self.resolve_collisions(&mut query, &collisions, &base_table)?;
        }

        if self.filter_by_class_name && self.data_class != base_class {
            let classes = catalog.subclasses_for(&self.data_class)?;
            query.add_where(Condition::sql(
                format!(
                    "{} IN ({})",
                    quote_column(&base_table, "ClassName"),
                    placeholders(classes.len())
                ),
                classes.into_iter().map(Value::from).collect(),
            ));
        }

        let class_column = quote_column(&base_table, "ClassName");
        query.select_field(base_id, "ID");
        query.select_field(
            format!(
                "CASE WHEN {col} IS NOT NULL THEN {col} ELSE {} END",
                quote_string(&base_class),
                col = class_column
            ),
            "RecordClassName",
        );

        self.ensure_order_by_columns(&mut query, &OrderedMap::new())?;
        Ok(FinalizedQuery {
            select: query,
            collisions,
        })
    }

    /// Expand composite names into their columns, and add the fixed columns
    /// and plain sort columns.
    fn expand_queried_columns(&self, columns: &[String]) -> Result<Vec<String>> {
        let mut out: Vec<String> = Vec::new();
        let mut push = |name: String| {
            if !out.contains(&name) {
                out.push(name);
            }
        };

        let fixed = ["Created", "LastEdited", "ClassName"];
        for column in columns.iter().map(String::as_str).chain(fixed) {
            match self.composite_in_data_classes(column)? {
                Some(field_type) => {
                    for (suffix, _) in field_type.composite_columns() {
                        push(format!("{}{}", column, suffix));
                    }
                }
                None => push(column.to_string()),
            }
        }
        for order in self.query.order_by() {
            let column = order.expr.trim().replace('"', "");
            if !column.contains('.') && !column.contains('(') && !column.starts_with(SORT_COLUMN) {
                push(column);
            }
        }
        Ok(out)
    }

    fn composite_in_data_classes(&self, field: &str) -> Result<Option<FieldType>> {
        for class in self.catalog.data_classes_for(&self.data_class)? {
            if let Some(field_type) = self.catalog.composite_fields(&class)?.get(field) {
                return Ok(Some(field_type.clone()));
            }
        }
        Ok(None)
    }

    /// Replace each colliding select with a `CASE` over the discriminator.
    fn resolve_collisions(
        &self,
        query: &mut SqlSelect,
        collisions: &OrderedMap<Vec<String>>,
        base_table: &str,
    ) -> Result<()> {
        let class_column = query
            .expression_for_field("ClassName")
            .map(str::to_string)
            .unwrap_or_else(|| quote_column(base_table, "ClassName"));
        let table_pattern = regex(r#"^"([^"]+)"\."#)?;

        for (field, candidates) in collisions.iter() {
            let mut clauses = Vec::new();
            let mut fallbacks = Vec::new();
            for candidate in candidates {
                let class = table_pattern
                    .captures(candidate)
                    .and_then(|caps| caps.get(1))
                    .and_then(|table| self.catalog.class_for_table(table.as_str()));
                match class {
                    Some(class) => {
                        let classes: Vec<String> = self
                            .catalog
                            .subclasses_for(class)?
                            .iter()
                            .map(|c| quote_string(c))
                            .collect();
                        clauses.push(format!(
                            "WHEN {} IN ({}) THEN {}",
                            class_column,
                            classes.join(", "),
                            candidate
                        ));
                    }
                    None if self.allow_collision_statements => {
                        fallbacks.push(format!("WHEN {} IS NOT NULL THEN {}", candidate, candidate));
                    }
                    None => {
                        tracing::warn!(
                            field = %field,
                            expression = %candidate,
                            "Colliding select expression does not map to a class table; leaving it out"
                        );
                    }
                }
            }
            clauses.extend(fallbacks);
            if !clauses.is_empty() {
                query.select_field(format!("CASE {} ELSE NULL END", clauses.join(" ")), field);
            }
        }
        Ok(())
    }

    /// Make every ORDER BY term selectable under DISTINCT.
    ///
    /// Single names are qualified with their table and selected under their
    /// own name. Qualified names not already selected move to a numbered
    /// `_SortColumnN` alias. Function expressions are left alone.
    /// `original` supplies expressions for names the select list lost.
    fn ensure_order_by_columns(&self, query: &mut SqlSelect, original: &OrderedMap<String>) -> Result<()> {
        let orders = query.order_by().to_vec();
        if orders.is_empty() {
            return Ok(());
        }

        let mut rewritten: Vec<OrderBy> = Vec::with_capacity(orders.len());
        for order in &orders {
            let expr = order.expr.trim();
            if expr.contains('(') {
                rewritten.push(order.clone());
                continue;
            }
            let column = expr.replace('"', "");

            if column.starts_with(SORT_COLUMN) {
                if let Some(original_expr) = original.get(&column) {
                    query.select_field(original_expr.clone(), &column);
                }
                rewritten.push(order.clone());
                continue;
            }

            let parts: Vec<&str> = column.split('.').collect();
            if parts.len() == 1 {
                let qualified = match self.catalog.table_for_field(&self.data_class, &column)? {
                    Some(table) => quote_column(&table, &column),
                    None => quote_identifier(&column),
                };
                if query.expression_for_field(&column).is_none()
                    && !query.selects_expression(&qualified)
                {
                    let select_expr = original
                        .get(&column)
                        .cloned()
                        .unwrap_or_else(|| qualified.clone());
                    query.select_field(select_expr, &column);
                }
                rewritten.push(OrderBy::new(qualified, order.direction));
            } else {
                let qualified: Vec<String> = parts.iter().map(|p| quote_identifier(p)).collect();
                let qualified = qualified.join(".");
                if query.selects_expression(&qualified) {
                    rewritten.push(order.clone());
                } else {
                    let alias = next_sort_alias(query, &rewritten);
                    query.select_field(qualified, &alias);
                    rewritten.push(OrderBy::new(quote_identifier(&alias), order.direction));
                }
            }
        }
        query.set_order_by(rewritten);
        Ok(())
    }

    /// SQL expression the finalised query selects for `field`.
    pub fn expression_for_field(&self, field: &str) -> Result<Option<String>> {
        let finalized = self.build_finalized(Some(&[field.to_string()]))?;
        if let Some(expr) = finalized.select.expression_for_field(field) {
            return Ok(Some(expr.to_string()));
        }
        if field == "ID" {
            return self
                .catalog
                .sql_column_for_field(&self.data_class, "ID", "")
                .map(Some);
        }
        Ok(None)
    }

    /// Qualified column for a field of the data class or one of the
    /// expressions selected on top of it.
    fn aggregate_target(&self, field: &str) -> Result<String> {
        if let Some(table) = self.catalog.table_for_field(&self.data_class, field)? {
            return Ok(quote_column(&table, field));
        }
        self.query
            .expression_for_field(field)
            .map(str::to_string)
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "'{}' is not a field on class '{}'",
                    field, self.data_class
                ))
            })
    }

    // ---- execution ----------------------------------------------------

    /// Render the finalised query.
    pub fn sql(&self, dialect: Dialect) -> Result<(String, Vec<Value>)> {
        Ok(self.finalize()?.select.build(dialect))
    }

    #[tracing::instrument(level = "debug", skip(self, db), fields(class = %self.data_class))]
    pub fn execute(&self, db: &dyn Database) -> Result<Vec<Row>> {
        self.finalize()?.select.fetch(db)
    }

    /// Number of distinct records matched, honouring any limit.
    #[tracing::instrument(level = "debug", skip(self, db), fields(class = %self.data_class))]
    pub fn count(&self, db: &dyn Database) -> Result<u64> {
        let select = self.finalize()?.select;
        if select.has_having() {
            return Ok(select.fetch(db)?.len() as u64);
        }
        let base_id = self.catalog.sql_column_for_field(&self.data_class, "ID", "")?;
        let total = select
            .count_query(&format!("DISTINCT {}", base_id))
            .fetch_value(db)?
            .and_then(|v| v.as_i64())
            .and_then(|n| u64::try_from(n).ok())
            .unwrap_or(0);
        Ok(select.limit().apply_to_count(total))
    }

    /// Whether any record matches. The limit is kept; ordering, DISTINCT
    /// and (without HAVING) grouping are dropped.
    #[tracing::instrument(level = "debug", skip(self, db), fields(class = %self.data_class))]
    pub fn exists(&self, db: &dyn Database) -> Result<bool> {
        let mut select = self.finalize()?.select;
        select.clear_order_by().set_distinct(false);
        if !select.has_having() {
            select.clear_group_by();
        }
        let (inner, params) = select.build(db.dialect());
        let sql = format!("SELECT CASE WHEN EXISTS({}) THEN 1 ELSE 0 END", inner);
        tracing::trace!(sql = %sql, "Executing exists");
        let value = db.query_scalar(&sql, &params)?;
        Ok(value.and_then(|v| v.as_i64()) == Some(1))
    }

    /// Evaluate an aggregate expression over the matched rows.
    pub fn aggregate(&self, db: &dyn Database, expression: &str) -> Result<Option<Value>> {
        self.finalize()?
            .select
            .aggregate_query(expression, "Aggregate")
            .fetch_value(db)
    }

    pub fn max(&self, db: &dyn Database, field: &str) -> Result<Option<Value>> {
        self.aggregate(db, &format!("MAX({})", self.aggregate_target(field)?))
    }

    pub fn min(&self, db: &dyn Database, field: &str) -> Result<Option<Value>> {
        self.aggregate(db, &format!("MIN({})", self.aggregate_target(field)?))
    }

    pub fn avg(&self, db: &dyn Database, field: &str) -> Result<Option<Value>> {
        self.aggregate(db, &format!("AVG({})", self.aggregate_target(field)?))
    }

    pub fn sum(&self, db: &dyn Database, field: &str) -> Result<Option<Value>> {
        self.aggregate(db, &format!("SUM({})", self.aggregate_target(field)?))
    }

    /// Values of one field, one per matched record, in query order.
    pub fn column(&self, db: &dyn Database, field: &str) -> Result<Vec<Value>> {
        self.column_values(db, field, false)
    }

    /// Distinct values of one field.
    pub fn column_unique(&self, db: &dyn Database, field: &str) -> Result<Vec<Value>> {
        self.column_values(db, field, true)
    }

    fn column_values(&self, db: &dyn Database, field: &str, unique: bool) -> Result<Vec<Value>> {
        let expression = self.expression_for_field(field)?.ok_or_else(|| {
            Error::InvalidArgument(format!(
                "'{}' is not a field on class '{}'",
                field, self.data_class
            ))
        })?;
        let mut select = self.build_finalized(Some(&[field.to_string()]))?.select;
        let original = select.select().clone();

        select.clear_select();
        select.select_field(expression, field);
        if unique {
            select.set_distinct(true);
        } else if select.is_distinct() && field != "ID" {
            // keep one value per record rather than one per distinct value
            if let Some(id) = original.get("ID") {
                select.select_field(id.clone(), "ID");
            }
        }
        self.ensure_order_by_columns(&mut select, &original)?;

        Ok(select
            .fetch(db)?
            .iter()
            .map(|row| row.get_by_name(field).cloned().unwrap_or(Value::Null))
            .collect())
    }
}

/// First `_SortColumnN` alias not used by the select list or ordering.
fn next_sort_alias(query: &SqlSelect, pending: &[OrderBy]) -> String {
    let mut i = 0;
    loop {
        let alias = format!("{}{}", SORT_COLUMN, i);
        let quoted = quote_identifier(&alias);
        let taken = query.expression_for_field(&alias).is_some()
            || query.order_by().iter().any(|o| o.expr == quoted)
            || pending.iter().any(|o| o.expr == quoted);
        if !taken {
            return alias;
        }
        i += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlentity_core::{ClassDeclaration, SchemaDeclaration};
    use std::sync::Mutex;

    fn catalog() -> Arc<SchemaCatalog> {
        Arc::new(
            SchemaCatalog::new(
                SchemaDeclaration::new()
                    .class(
                        ClassDeclaration::new("Team")
                            .field("Title", "Varchar")
                            .field("Budget", "Money")
                            .has_many("Players", "Player")
                            .has_many("Comments", "Comment")
                            .many_many("Sponsors", "Sponsor")
                            .default_sort("Title ASC"),
                    )
                    .class(
                        ClassDeclaration::new("Player")
                            .field("Name", "Varchar")
                            .has_one("Team", "Team"),
                    )
                    .class(ClassDeclaration::new("Captain").parent("Player").field("Armband", "Boolean"))
                    .class(ClassDeclaration::new("Sponsor").field("Title", "Varchar"))
                    .class(
                        ClassDeclaration::new("Comment")
                            .field("Body", "Text")
                            .has_one_polymorphic("Parent", false),
                    )
                    .class(ClassDeclaration::new("Staff").field("Name", "Varchar"))
                    .class(ClassDeclaration::new("Coach").parent("Staff").field("Rating", "Int"))
                    .class(ClassDeclaration::new("Physio").parent("Staff").field("Rating", "Int")),
            )
            .unwrap(),
        )
    }

    fn sql(descriptor: &QueryDescriptor) -> String {
        descriptor.sql(Dialect::Postgres).unwrap().0
    }

    #[test]
    fn base_query_selects_ancestry_and_record_class() {
        let descriptor = QueryDescriptor::new(catalog(), "Team").unwrap();
        let sql = sql(&descriptor);
        assert!(sql.starts_with("SELECT DISTINCT \"Team\".\"ClassName\" AS \"ClassName\""));
        assert!(sql.contains("\"Team\".\"BudgetAmount\" AS \"BudgetAmount\""));
        assert!(sql.contains("\"Team\".\"ID\" AS \"ID\""));
        assert!(sql.contains(
            "CASE WHEN \"Team\".\"ClassName\" IS NOT NULL THEN \"Team\".\"ClassName\" ELSE 'Team' END AS \"RecordClassName\""
        ));
        assert!(sql.ends_with("FROM \"Team\" ORDER BY \"Team\".\"Title\" ASC"));
    }

    #[test]
    fn subclass_query_joins_and_filters_by_class() {
        let descriptor = QueryDescriptor::new(catalog(), "Captain").unwrap();
        let (sql, params) = descriptor.sql(Dialect::Postgres).unwrap();
        assert!(sql.contains("LEFT JOIN \"Captain\" ON \"Captain\".\"ID\" = \"Player\".\"ID\""));
        assert!(sql.contains("WHERE (\"Player\".\"ClassName\" IN (?))"));
        assert!(sql.contains("\"Captain\".\"Armband\" AS \"Armband\""));
        assert_eq!(params, vec![Value::from("Captain")]);
    }

    #[test]
    fn applying_a_chain_twice_adds_no_joins() {
        let mut once = QueryDescriptor::new(catalog(), "Player").unwrap();
        once.apply_relation("Team", false).unwrap();
        let mut twice = once.clone();
        assert_eq!(twice.apply_relation("Team", false).unwrap(), "Team");
        assert_eq!(sql(&once), sql(&twice));
        assert_eq!(twice.query().joins().len(), 1);
        assert_eq!(twice.query().joins()[0].alias, "team_Team");
    }

    #[test]
    fn linear_only_rejects_one_to_many() {
        let mut descriptor = QueryDescriptor::new(catalog(), "Team").unwrap();
        let err = descriptor.apply_relation("Players", true).unwrap_err();
        assert!(matches!(err, Error::InvalidChain(_)));
        assert_eq!(descriptor.apply_relation("Players", false).unwrap(), "Player");
        let join = &descriptor.query().joins()[0];
        assert_eq!(join.alias, "players_Player");
        assert_eq!(join.on, "\"players_Player\".\"TeamID\" = \"Team\".\"ID\"");
    }

    #[test]
    fn unknown_and_polymorphic_segments() {
        let mut descriptor = QueryDescriptor::new(catalog(), "Comment").unwrap();
        assert!(matches!(
            descriptor.apply_relation("Parent", false),
            Err(Error::InvalidChain(_))
        ));
        assert!(matches!(
            descriptor.apply_relation("Nope", false),
            Err(Error::InvalidChain(_))
        ));
    }

    #[test]
    fn polymorphic_one_to_many_matches_class_column() {
        let mut descriptor = QueryDescriptor::new(catalog(), "Team").unwrap();
        descriptor.apply_relation("Comments", false).unwrap();
        assert_eq!(
            descriptor.query().joins()[0].on,
            "\"comments_Comment\".\"ParentID\" = \"Team\".\"ID\" AND \"comments_Comment\".\"ParentClass\" = \"Team\".\"ClassName\""
        );
    }

    #[test]
    fn many_many_joins_join_table_then_target() {
        let mut descriptor = QueryDescriptor::new(catalog(), "Team").unwrap();
        assert_eq!(descriptor.apply_relation("Sponsors", false).unwrap(), "Sponsor");
        let joins = descriptor.query().joins();
        assert_eq!(joins[0].alias, "sponsors_Team_Sponsors");
        assert_eq!(joins[0].on, "\"sponsors_Team_Sponsors\".\"TeamID\" = \"Team\".\"ID\"");
        assert_eq!(joins[1].alias, "sponsors_Sponsor");
        assert_eq!(
            joins[1].on,
            "\"sponsors_Team_Sponsors\".\"SponsorID\" = \"sponsors_Sponsor\".\"ID\""
        );
    }

    #[test]
    fn relation_sort_moves_to_sort_column() {
        let mut descriptor = QueryDescriptor::new(catalog(), "Player").unwrap();
        descriptor.apply_relation("Team", true).unwrap();
        descriptor.sort("\"team_Team\".\"Title\" DESC");
        let sql = sql(&descriptor);
        assert!(sql.contains("\"team_Team\".\"Title\" AS \"_SortColumn0\""));
        assert!(sql.ends_with("ORDER BY \"_SortColumn0\" DESC"));
    }

    #[test]
    fn function_sort_is_selected() {
        let mut descriptor = QueryDescriptor::new(catalog(), "Player").unwrap();
        descriptor.sort("RANDOM()");
        let ascending = sql(&descriptor);
        assert!(ascending.contains("RANDOM() AS \"_SortColumn0\""));
        assert!(ascending.ends_with("ORDER BY \"_SortColumn0\" ASC"));
        descriptor.reverse_sort();
        assert!(sql(&descriptor).ends_with("ORDER BY \"_SortColumn0\" DESC"));
    }

    #[test]
    fn sibling_columns_resolve_through_case() {
        let mut descriptor = QueryDescriptor::new(catalog(), "Staff").unwrap();
        descriptor.set_queried_columns(Some(vec!["Rating".to_string()]));
        let finalized = descriptor.finalize().unwrap();
        assert_eq!(
            finalized.collisions.get("Rating").unwrap(),
            &vec![
                "\"Coach\".\"Rating\"".to_string(),
                "\"Physio\".\"Rating\"".to_string()
            ]
        );
        assert_eq!(
            finalized.select.expression_for_field("Rating"),
            Some(
                "CASE WHEN \"Staff\".\"ClassName\" IN ('Coach') THEN \"Coach\".\"Rating\" \
                 WHEN \"Staff\".\"ClassName\" IN ('Physio') THEN \"Physio\".\"Rating\" ELSE NULL END"
            )
        );
        assert!(finalized.select.is_joined_to("Coach"));
        assert!(finalized.select.is_joined_to("Physio"));
    }

    #[test]
    fn unmapped_collisions_need_permission() {
        let mut descriptor = QueryDescriptor::new(catalog(), "Player").unwrap();
        descriptor.select_field("COALESCE(NULL, 'x')", "Name");
        let finalized = descriptor.finalize().unwrap();
        assert_eq!(
            finalized.select.expression_for_field("Name"),
            Some("CASE WHEN \"Player\".\"ClassName\" IN ('Player', 'Captain') THEN \"Player\".\"Name\" ELSE NULL END")
        );

        let descriptor = descriptor.allow_collision_statements(true);
        let finalized = descriptor.finalize().unwrap();
        assert!(finalized
            .select
            .expression_for_field("Name")
            .unwrap()
            .contains("WHEN COALESCE(NULL, 'x') IS NOT NULL THEN COALESCE(NULL, 'x')"));
    }

    #[test]
    fn finalisation_is_cached_until_mutation() {
        let mut descriptor = QueryDescriptor::new(catalog(), "Player").unwrap();
        let first = descriptor.finalize().unwrap();
        assert_eq!(descriptor.finalize().unwrap(), first);
        descriptor.where_sql("\"Player\".\"Name\" = ?", vec![Value::from("Ann")]);
        assert_ne!(descriptor.finalize().unwrap(), first);
    }

    /// Records statements and answers every query with one canned row.
    struct CannedDb {
        row: Row,
        seen: Mutex<Vec<String>>,
    }

    impl CannedDb {
        fn new(value: Value) -> Self {
            Self {
                row: Row::new(vec!["Value".to_string()], vec![value]),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn last(&self) -> String {
            self.seen.lock().unwrap().last().cloned().unwrap_or_default()
        }
    }

    impl Database for CannedDb {
        fn query(&self, sql: &str, _params: &[Value]) -> Result<Vec<Row>> {
            self.seen.lock().unwrap().push(sql.to_string());
            Ok(vec![self.row.clone()])
        }

        fn execute(&self, sql: &str, _params: &[Value]) -> Result<u64> {
            self.seen.lock().unwrap().push(sql.to_string());
            Ok(0)
        }

        fn last_insert_id(&self, _table: &str) -> Result<i64> {
            Ok(0)
        }

        fn dialect(&self) -> Dialect {
            Dialect::Sqlite
        }
    }

    #[test]
    fn count_is_distinct_and_limit_adjusted() {
        let db = CannedDb::new(Value::BigInt(5));
        let mut descriptor = QueryDescriptor::new(catalog(), "Player").unwrap();
        assert_eq!(descriptor.count(&db).unwrap(), 5);
        assert_eq!(
            db.last(),
            "SELECT COUNT(DISTINCT \"Player\".\"ID\") AS \"Count\" FROM \"Player\""
        );
        descriptor.limit(Some(2), 1);
        assert_eq!(descriptor.count(&db).unwrap(), 2);
        descriptor.limit(Some(10), 4);
        assert_eq!(descriptor.count(&db).unwrap(), 1);
    }

    #[test]
    fn exists_wraps_and_drops_ordering() {
        let db = CannedDb::new(Value::BigInt(1));
        let mut descriptor = QueryDescriptor::new(catalog(), "Team").unwrap();
        descriptor.limit(Some(1), 0);
        assert!(descriptor.exists(&db).unwrap());
        let sql = db.last();
        assert!(sql.starts_with("SELECT CASE WHEN EXISTS(SELECT \"Team\""));
        assert!(!sql.contains("ORDER BY"));
        assert!(sql.ends_with("LIMIT 1) THEN 1 ELSE 0 END"));
    }

    #[test]
    fn aggregates_qualify_fields() {
        let db = CannedDb::new(Value::BigInt(9));
        let descriptor = QueryDescriptor::new(catalog(), "Captain").unwrap();
        assert_eq!(descriptor.max(&db, "Name").unwrap(), Some(Value::BigInt(9)));
        assert!(db.last().starts_with("SELECT MAX(\"Player\".\"Name\") AS \"Aggregate\""));
        assert!(matches!(
            descriptor.sum(&db, "Nope"),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn subtract_excludes_other_ids() {
        let catalog = catalog();
        let mut all = QueryDescriptor::new(Arc::clone(&catalog), "Player").unwrap();
        let mut named = QueryDescriptor::new(catalog, "Player").unwrap();
        named.where_sql("\"Player\".\"Name\" = ?", vec![Value::from("Ann")]);
        all.subtract(&named, "ID").unwrap();
        let (sql, params) = all.sql(Dialect::Postgres).unwrap();
        assert!(sql.contains(
            "WHERE (\"Player\".\"ID\" NOT IN (SELECT DISTINCT \"Player\".\"ID\" AS \"ID\" FROM \"Player\" WHERE (\"Player\".\"Name\" = ?)))"
        ));
        assert_eq!(params, vec![Value::from("Ann")]);
    }

    #[test]
    fn prefixes() {
        assert_eq!(relation_prefix::<&str>(&[]), "");
        assert_eq!(relation_prefix(&["Team", "Sponsors"]), "team_sponsors_");
    }
}
