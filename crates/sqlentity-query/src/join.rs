//! JOIN clause types.

use crate::expr::quote_identifier;
use sqlentity_core::Value;

/// Types of SQL joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
}

impl JoinType {
    /// Get the SQL keyword for this join type.
    pub const fn as_str(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
        }
    }
}

/// A JOIN clause.
///
/// Joins are identified by their alias; a query holds at most one join per
/// alias. Lower priorities are rendered first.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub join_type: JoinType,
    /// Table reference as rendered: a quoted table name or a parenthesised
    /// subquery.
    pub table: String,
    pub alias: String,
    /// ON condition, canonical SQL.
    pub on: String,
    /// Values for `?` markers in `table` and `on`, in that order.
    pub params: Vec<Value>,
    pub priority: i32,
}

impl Join {
    /// Priority of joins that do not ask for one.
    pub const DEFAULT_PRIORITY: i32 = 20;

    fn new(join_type: JoinType, table: &str, on: impl Into<String>, alias: &str) -> Self {
        Self {
            join_type,
            table: quote_identifier(table),
            alias: alias.to_string(),
            on: on.into(),
            params: Vec::new(),
            priority: Self::DEFAULT_PRIORITY,
        }
    }

    /// Create a LEFT JOIN of a table under `alias`.
    pub fn left(table: &str, on: impl Into<String>, alias: &str) -> Self {
        Self::new(JoinType::Left, table, on, alias)
    }

    /// Create an INNER JOIN of a table under `alias`.
    pub fn inner(table: &str, on: impl Into<String>, alias: &str) -> Self {
        Self::new(JoinType::Inner, table, on, alias)
    }

    /// Join a subquery. `sql` is the bare SELECT without parentheses.
    pub fn subquery(
        join_type: JoinType,
        sql: &str,
        params: Vec<Value>,
        on: impl Into<String>,
        alias: &str,
    ) -> Self {
        Self {
            join_type,
            table: format!("({})", sql),
            alias: alias.to_string(),
            on: on.into(),
            params,
            priority: Self::DEFAULT_PRIORITY,
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Attach values for `?` markers in the ON condition.
    pub fn params(mut self, params: Vec<Value>) -> Self {
        self.params.extend(params);
        self
    }

    /// Generate SQL and collect parameters.
    pub fn build(&self, params: &mut Vec<Value>) -> String {
        params.extend(self.params.iter().cloned());
        let mut sql = format!(" {} {}", self.join_type.as_str(), self.table);
        if self.table != quote_identifier(&self.alias) {
            sql.push_str(" AS ");
            sql.push_str(&quote_identifier(&self.alias));
        }
        sql.push_str(" ON ");
        sql.push_str(&self.on);
        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_is_omitted_when_it_matches_the_table() {
        let join = Join::left("Captain", "\"Captain\".\"ID\" = \"Player\".\"ID\"", "Captain");
        let mut params = Vec::new();
        assert_eq!(
            join.build(&mut params),
            " LEFT JOIN \"Captain\" ON \"Captain\".\"ID\" = \"Player\".\"ID\""
        );
    }

    #[test]
    fn aliased_join_with_params() {
        let join = Join::inner("Team", "\"team_Team\".\"ID\" = \"Player\".\"TeamID\" AND \"team_Team\".\"Title\" = ?", "team_Team")
            .params(vec![Value::from("Reds")]);
        let mut params = Vec::new();
        let sql = join.build(&mut params);
        assert!(sql.starts_with(" INNER JOIN \"Team\" AS \"team_Team\" ON "));
        assert_eq!(params, vec![Value::from("Reds")]);
        assert_eq!(join.priority, Join::DEFAULT_PRIORITY);
    }

    #[test]
    fn subquery_join() {
        let join = Join::subquery(JoinType::Left, "SELECT 1 AS \"X\"", vec![], "1 = 1", "sub");
        let mut params = Vec::new();
        assert_eq!(
            join.build(&mut params),
            " LEFT JOIN (SELECT 1 AS \"X\") AS \"sub\" ON 1 = 1"
        );
    }
}
