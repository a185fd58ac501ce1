//! SQL fragments and boolean conditions.
//!
//! Everything here is canonical SQL: double-quoted identifiers and bare `?`
//! markers whose values travel alongside, in order.

use sqlentity_core::Value;

/// Quote an identifier. Embedded quotes are doubled.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `"table"."column"`
pub fn quote_column(table: &str, column: &str) -> String {
    format!("{}.{}", quote_identifier(table), quote_identifier(column))
}

/// Quote a string literal. Embedded single quotes are doubled.
pub fn quote_string(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// `?, ?, ?` for `count` markers.
pub fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

/// A piece of SQL together with the values for its `?` markers.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlFragment {
    pub sql: String,
    pub params: Vec<Value>,
}

impl SqlFragment {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// A fragment without parameters.
    pub fn raw(sql: impl Into<String>) -> Self {
        Self::new(sql, Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.sql.trim().is_empty()
    }
}

/// A WHERE/HAVING predicate tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Fragment(SqlFragment),
    /// Conjunction; every member must hold.
    All(Vec<Condition>),
    /// Disjunction; at least one member must hold.
    Any(Vec<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    pub fn sql(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Condition::Fragment(SqlFragment::new(sql, params))
    }

    pub fn raw(sql: impl Into<String>) -> Self {
        Condition::Fragment(SqlFragment::raw(sql))
    }

    pub fn all(members: Vec<Condition>) -> Self {
        Condition::All(members)
    }

    pub fn any(members: Vec<Condition>) -> Self {
        Condition::Any(members)
    }

    pub fn negate(self) -> Self {
        Condition::Not(Box::new(self))
    }

    /// Whether the condition constrains nothing at all.
    pub fn is_empty(&self) -> bool {
        match self {
            Condition::Fragment(fragment) => fragment.is_empty(),
            Condition::All(members) | Condition::Any(members) => {
                members.iter().all(Condition::is_empty)
            }
            Condition::Not(inner) => inner.is_empty(),
        }
    }

    /// Render to SQL, appending parameters in marker order.
    pub fn build(&self, params: &mut Vec<Value>) -> String {
        match self {
            Condition::Fragment(fragment) => {
                params.extend(fragment.params.iter().cloned());
                fragment.sql.clone()
            }
            Condition::All(members) => build_group(members, " AND ", "1 = 1", params),
            Condition::Any(members) => build_group(members, " OR ", "1 = 0", params),
            Condition::Not(inner) => format!("NOT ({})", inner.build(params)),
        }
    }
}

fn build_group(members: &[Condition], separator: &str, empty: &str, params: &mut Vec<Value>) -> String {
    let parts: Vec<String> = members
        .iter()
        .filter(|member| !member.is_empty())
        .map(|member| format!("({})", member.build(params)))
        .collect();
    if parts.is_empty() {
        empty.to_string()
    } else {
        parts.join(separator)
    }
}

impl From<SqlFragment> for Condition {
    fn from(fragment: SqlFragment) -> Self {
        Condition::Fragment(fragment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting() {
        assert_eq!(quote_column("Player", "Name"), "\"Player\".\"Name\"");
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
        assert_eq!(quote_string("O'Neil"), "'O''Neil'");
        assert_eq!(placeholders(3), "?, ?, ?");
        assert_eq!(placeholders(0), "");
    }

    #[test]
    fn nested_groups_collect_params_in_order() {
        let condition = Condition::all(vec![
            Condition::sql("\"A\" = ?", vec![Value::from(1)]),
            Condition::any(vec![
                Condition::sql("\"B\" = ?", vec![Value::from(2)]),
                Condition::sql("\"C\" IN (?, ?)", vec![Value::from(3), Value::from(4)]),
            ]),
        ]);
        let mut params = Vec::new();
        let sql = condition.build(&mut params);
        assert_eq!(
            sql,
            "(\"A\" = ?) AND ((\"B\" = ?) OR (\"C\" IN (?, ?)))"
        );
        assert_eq!(
            params,
            vec![Value::from(1), Value::from(2), Value::from(3), Value::from(4)]
        );
    }

    #[test]
    fn empty_members_are_skipped() {
        let condition = Condition::any(vec![Condition::raw(""), Condition::raw("\"X\" > 1")]);
        let mut params = Vec::new();
        assert_eq!(condition.build(&mut params), "(\"X\" > 1)");
        assert!(Condition::all(vec![]).is_empty());
        assert_eq!(Condition::raw("1").negate().build(&mut params), "NOT (1)");
    }
}
