//! The database boundary.
//!
//! The engine never talks to a driver directly. Everything it needs is
//! behind [`Database`]: run a query, run a statement, fetch the last
//! inserted id, and know which [`Dialect`] to render SQL for.
//!
//! SQL inside the engine is built in one canonical form: ANSI double-quoted
//! identifiers and bare `?` parameter markers. [`Dialect::render`] turns that
//! into what a particular server expects right before execution.

use crate::error::Result;
use crate::row::Row;
use crate::value::Value;

/// SQL dialect supported by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    /// PostgreSQL dialect (uses $1, $2 placeholders)
    #[default]
    Postgres,
    /// SQLite dialect (uses ?1, ?2 placeholders)
    Sqlite,
    /// MySQL dialect (uses ? placeholders and backtick identifiers)
    Mysql,
}

impl Dialect {
    /// Generate a placeholder for the given parameter index (1-based).
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${index}"),
            Dialect::Sqlite => format!("?{index}"),
            Dialect::Mysql => "?".to_string(),
        }
    }

    /// Quote an identifier in the canonical (double-quoted) form.
    ///
    /// Embedded quotes are doubled.
    pub fn quote_identifier(self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Quote a string literal. Embedded single quotes are doubled.
    pub fn quote_string(self, value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }

    /// Function producing a random ordering key.
    pub const fn random_function(self) -> &'static str {
        match self {
            Dialect::Postgres | Dialect::Sqlite => "RANDOM()",
            Dialect::Mysql => "RAND()",
        }
    }

    /// Render a LIMIT/OFFSET clause (with leading space), or nothing.
    pub fn limit_clause(self, limit: Option<u64>, offset: u64) -> String {
        match (limit, offset) {
            (None, 0) => String::new(),
            (Some(n), 0) => format!(" LIMIT {}", n),
            (Some(n), off) => format!(" LIMIT {} OFFSET {}", n, off),
            (None, off) => match self {
                Dialect::Postgres => format!(" OFFSET {}", off),
                Dialect::Sqlite => format!(" LIMIT -1 OFFSET {}", off),
                Dialect::Mysql => format!(" LIMIT 18446744073709551615 OFFSET {}", off),
            },
        }
    }

    /// Rewrite canonical SQL for this dialect.
    ///
    /// Bare `?` markers outside literals become numbered placeholders, and
    /// for MySQL double-quoted identifiers become backtick-quoted.
    pub fn render(self, sql: &str) -> String {
        let mut out = String::with_capacity(sql.len() + 16);
        let mut index = 0;
        let mut chars = sql.chars().peekable();
        let mut in_string = false;
        let mut in_ident = false;

        while let Some(c) = chars.next() {
            if in_string {
                out.push(c);
                if c == '\'' {
                    if chars.peek() == Some(&'\'') {
                        out.push('\'');
                        chars.next();
                    } else {
                        in_string = false;
                    }
                }
                continue;
            }
            if in_ident {
                if c == '"' {
                    if chars.peek() == Some(&'"') {
                        out.push('"');
                        chars.next();
                        continue;
                    }
                    in_ident = false;
                    out.push(if self == Dialect::Mysql { '`' } else { '"' });
                } else if c == '`' && self == Dialect::Mysql {
                    out.push_str("``");
                } else {
                    out.push(c);
                }
                continue;
            }
            match c {
                '\'' => {
                    in_string = true;
                    out.push(c);
                }
                '"' => {
                    in_ident = true;
                    out.push(if self == Dialect::Mysql { '`' } else { '"' });
                }
                '?' => {
                    index += 1;
                    out.push_str(&self.placeholder(index));
                }
                _ => out.push(c),
            }
        }
        out
    }
}

/// A blocking database handle.
///
/// Implementations receive canonical SQL (double-quoted identifiers, `?`
/// markers) and are expected to run it through [`Dialect::render`] for
/// their own dialect before handing it to the driver.
pub trait Database: Send + Sync {
    /// Run a query returning rows.
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Run a statement, returning the number of affected rows.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Id generated by the most recent insert into `table`.
    fn last_insert_id(&self, table: &str) -> Result<i64>;

    /// Dialect this database speaks.
    fn dialect(&self) -> Dialect;

    /// Run a query and return the first column of the first row.
    fn query_scalar(&self, sql: &str, params: &[Value]) -> Result<Option<Value>> {
        Ok(self
            .query(sql, params)?
            .into_iter()
            .next()
            .and_then(|row| row.get(0).cloned()))
    }
}
