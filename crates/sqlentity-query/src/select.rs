//! Plain SELECT builder.
//!
//! `SqlSelect` knows nothing about entity classes. It holds the select list,
//! joins, conditions, ordering and limit of one statement and renders them.
//! The query descriptor builds on top of it.

use crate::clause::{Limit, OrderBy};
use crate::expr::{Condition, quote_identifier};
use crate::join::Join;
use sqlentity_core::{Database, Dialect, OrderedMap, Result, Row, Value};

/// A SELECT statement under construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlSelect {
    /// Output alias to expression, in select order.
    select: OrderedMap<String>,
    from: String,
    joins: Vec<Join>,
    where_: Vec<Condition>,
    group_by: Vec<String>,
    having: Vec<Condition>,
    order_by: Vec<OrderBy>,
    limit: Limit,
    distinct: bool,
}

impl SqlSelect {
    /// Create a SELECT from a table.
    pub fn new(from_table: impl Into<String>) -> Self {
        Self {
            from: from_table.into(),
            ..Self::default()
        }
    }

    pub fn from_table(&self) -> &str {
        &self.from
    }

    /// Select `expr` as `alias`, replacing any expression already under
    /// that alias.
    pub fn select_field(&mut self, expr: impl Into<String>, alias: &str) -> &mut Self {
        self.select.insert(alias, expr.into());
        self
    }

    pub fn select(&self) -> &OrderedMap<String> {
        &self.select
    }

    pub fn set_select(&mut self, select: OrderedMap<String>) -> &mut Self {
        self.select = select;
        self
    }

    pub fn clear_select(&mut self) -> &mut Self {
        self.select.clear();
        self
    }

    /// Expression currently selected under `alias`.
    pub fn expression_for_field(&self, alias: &str) -> Option<&str> {
        self.select.get(alias).map(String::as_str)
    }

    /// Whether `expr` is selected under any alias.
    pub fn selects_expression(&self, expr: &str) -> bool {
        self.select.values().any(|selected| selected == expr)
    }

    /// Add a join. A join with the same alias is replaced in place.
    pub fn add_join(&mut self, join: Join) -> &mut Self {
        match self.joins.iter_mut().find(|j| j.alias == join.alias) {
            Some(existing) => *existing = join,
            None => self.joins.push(join),
        }
        self
    }

    pub fn is_joined_to(&self, alias: &str) -> bool {
        self.joins.iter().any(|j| j.alias == alias)
    }

    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    pub fn remove_join(&mut self, alias: &str) -> &mut Self {
        self.joins.retain(|j| j.alias != alias);
        self
    }

    /// AND a condition onto the WHERE clause. Empty conditions are ignored.
    pub fn add_where(&mut self, condition: Condition) -> &mut Self {
        if !condition.is_empty() {
            self.where_.push(condition);
        }
        self
    }

    pub fn where_conditions(&self) -> &[Condition] {
        &self.where_
    }

    pub fn add_group_by(&mut self, expr: impl Into<String>) -> &mut Self {
        self.group_by.push(expr.into());
        self
    }

    pub fn clear_group_by(&mut self) -> &mut Self {
        self.group_by.clear();
        self
    }

    pub fn add_having(&mut self, condition: Condition) -> &mut Self {
        if !condition.is_empty() {
            self.having.push(condition);
        }
        self
    }

    pub fn has_having(&self) -> bool {
        !self.having.is_empty()
    }

    pub fn order_by(&self) -> &[OrderBy] {
        &self.order_by
    }

    pub fn order_by_mut(&mut self) -> &mut Vec<OrderBy> {
        &mut self.order_by
    }

    pub fn add_order_by(&mut self, order: OrderBy) -> &mut Self {
        self.order_by.push(order);
        self
    }

    pub fn set_order_by(&mut self, order: Vec<OrderBy>) -> &mut Self {
        self.order_by = order;
        self
    }

    pub fn clear_order_by(&mut self) -> &mut Self {
        self.order_by.clear();
        self
    }

    pub fn set_limit(&mut self, limit: Limit) -> &mut Self {
        self.limit = limit;
        self
    }

    pub fn limit(&self) -> Limit {
        self.limit
    }

    pub fn set_distinct(&mut self, distinct: bool) -> &mut Self {
        self.distinct = distinct;
        self
    }

    pub fn is_distinct(&self) -> bool {
        self.distinct
    }

    /// Build the SQL query and parameters.
    ///
    /// Parameters are collected from joins, then WHERE, then HAVING, which
    /// is the order their markers appear in the text.
    pub fn build(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut sql = String::from("SELECT ");
        let mut params = Vec::new();

        if self.distinct {
            sql.push_str("DISTINCT ");
        }
        if self.select.is_empty() {
            sql.push('*');
        } else {
            let columns: Vec<String> = self
                .select
                .iter()
                .map(|(alias, expr)| format!("{} AS {}", expr, quote_identifier(alias)))
                .collect();
            sql.push_str(&columns.join(", "));
        }

        sql.push_str(" FROM ");
        sql.push_str(&quote_identifier(&self.from));

        let mut joins: Vec<&Join> = self.joins.iter().collect();
        joins.sort_by_key(|j| j.priority);
        for join in joins {
            sql.push_str(&join.build(&mut params));
        }

        if !self.where_.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&Condition::All(self.where_.clone()).build(&mut params));
        }

        if !self.group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&self.group_by.join(", "));
        }

        if !self.having.is_empty() {
            sql.push_str(" HAVING ");
            sql.push_str(&Condition::All(self.having.clone()).build(&mut params));
        }

        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            let terms: Vec<String> = self.order_by.iter().map(OrderBy::to_sql).collect();
            sql.push_str(&terms.join(", "));
        }

        sql.push_str(&dialect.limit_clause(self.limit.length, self.limit.offset));
        (sql, params)
    }

    /// A copy selecting only `COUNT(<column>)`, without ordering, grouping
    /// or limit.
    pub fn count_query(&self, column: &str) -> SqlSelect {
        let mut clone = self.clone();
        clone.select.clear();
        clone.select.insert("Count", format!("COUNT({})", column));
        clone.limit = Limit::default();
        clone.order_by.clear();
        clone.group_by.clear();
        clone.distinct = false;
        clone
    }

    /// A copy selecting only `expr` as `alias`.
    ///
    /// Ordering is kept only when a limit is set, since it can then change
    /// which rows take part.
    pub fn aggregate_query(&self, expr: &str, alias: &str) -> SqlSelect {
        let mut clone = self.clone();
        if !clone.limit.is_set() {
            clone.order_by.clear();
        }
        clone.select.clear();
        clone.select.insert(alias, expr.to_string());
        clone.distinct = false;
        clone
    }

    /// Execute and return all rows.
    pub fn fetch(&self, db: &dyn Database) -> Result<Vec<Row>> {
        let (sql, params) = self.build(db.dialect());
        tracing::trace!(sql = %sql, params = params.len(), "Executing select");
        let rows = db.query(&sql, &params)?;
        tracing::debug!(table = %self.from, rows = rows.len(), "Select returned");
        Ok(rows)
    }

    /// Execute and return the first column of the first row.
    pub fn fetch_value(&self, db: &dyn Database) -> Result<Option<Value>> {
        let (sql, params) = self.build(db.dialect());
        tracing::trace!(sql = %sql, "Executing scalar select");
        db.query_scalar(&sql, &params)
    }
}
