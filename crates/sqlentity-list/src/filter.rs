//! Search filters.
//!
//! A filter key names a field, optionally through a relation chain, and an
//! optional filter with modifiers:
//!
//! ```text
//! Title                      exact match
//! Team.Title:StartsWith      relation chain + filter
//! Name:PartialMatch:nocase   case-insensitive
//! Budget:GreaterThan:not     negated
//! ```
//!
//! Filters render to SQL conditions for database-backed lists and match
//! values directly for preloaded lists.

use sqlentity_core::pattern::regex;
use sqlentity_core::{Error, Result, Value};
use sqlentity_query::{Condition, placeholders};
use std::cmp::Ordering;

const PATH_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*$";

/// Value side of a filter: one value, or a set matched with `IN`.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    One(Value),
    Many(Vec<Value>),
}

macro_rules! impl_filter_value_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for FilterValue {
                fn from(v: $ty) -> Self {
                    FilterValue::One(Value::from(v))
                }
            }
        )*
    };
}

impl_filter_value_from!(bool, i32, i64, u32, f64, String, &str, &String, Value);

impl<T: Into<Value>> From<Vec<T>> for FilterValue {
    fn from(values: Vec<T>) -> Self {
        FilterValue::Many(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for FilterValue {
    fn from(values: [T; N]) -> Self {
        FilterValue::Many(values.into_iter().map(Into::into).collect())
    }
}

impl FilterValue {
    fn values(&self) -> &[Value] {
        match self {
            FilterValue::One(value) => std::slice::from_ref(value),
            FilterValue::Many(values) => values,
        }
    }
}

/// How a filter compares the field with its value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SearchFilter {
    #[default]
    ExactMatch,
    PartialMatch,
    StartsWith,
    EndsWith,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
}

impl SearchFilter {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "ExactMatch" => SearchFilter::ExactMatch,
            "PartialMatch" => SearchFilter::PartialMatch,
            "StartsWith" => SearchFilter::StartsWith,
            "EndsWith" => SearchFilter::EndsWith,
            "GreaterThan" => SearchFilter::GreaterThan,
            "GreaterThanOrEqual" => SearchFilter::GreaterThanOrEqual,
            "LessThan" => SearchFilter::LessThan,
            "LessThanOrEqual" => SearchFilter::LessThanOrEqual,
            _ => return None,
        })
    }

    fn comparison(self) -> Option<(&'static str, &'static str)> {
        match self {
            SearchFilter::GreaterThan => Some((">", "<=")),
            SearchFilter::GreaterThanOrEqual => Some((">=", "<")),
            SearchFilter::LessThan => Some(("<", ">=")),
            SearchFilter::LessThanOrEqual => Some(("<=", ">")),
            _ => None,
        }
    }

    fn like_pattern(self, value: &str) -> String {
        match self {
            SearchFilter::StartsWith => format!("{}%", value),
            SearchFilter::EndsWith => format!("%{}", value),
            _ => format!("%{}%", value),
        }
    }
}

/// A parsed filter key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterKey {
    /// Relation chain leading to the field, empty for own fields.
    pub chain: Vec<String>,
    pub field: String,
    pub filter: SearchFilter,
    pub negate: bool,
    pub nocase: bool,
}

impl FilterKey {
    pub fn parse(key: &str) -> Result<Self> {
        let mut parts = key.split(':');
        let path = parts.next().unwrap_or_default().trim();
        if !regex(PATH_PATTERN)?.is_match(path) {
            return Err(Error::InvalidArgument(format!(
                "'{}' is not a valid filter field",
                key
            )));
        }
        let mut segments: Vec<String> = path.split('.').map(str::to_string).collect();
        let field = segments.pop().unwrap_or_default();

        let mut parsed = Self {
            chain: segments,
            field,
            filter: SearchFilter::default(),
            negate: false,
            nocase: false,
        };
        for (i, part) in parts.enumerate() {
            match part.to_ascii_lowercase().as_str() {
                "not" => parsed.negate = true,
                "nocase" => parsed.nocase = true,
                "case" => parsed.nocase = false,
                _ if i == 0 => {
                    parsed.filter = SearchFilter::parse(part).ok_or_else(|| {
                        Error::InvalidArgument(format!(
                            "unknown search filter '{}' in '{}'",
                            part, key
                        ))
                    })?;
                }
                _ => {
                    return Err(Error::InvalidArgument(format!(
                        "unknown filter modifier '{}' in '{}'",
                        part, key
                    )));
                }
            }
        }
        Ok(parsed)
    }

    /// Relation chain in dotted form.
    pub fn chain_path(&self) -> String {
        self.chain.join(".")
    }
}

/// A filter key with its value.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub key: FilterKey,
    pub value: FilterValue,
}

impl Filter {
    /// Parse `key` and check the value. An empty value set is rejected.
    pub fn new(key: &str, value: impl Into<FilterValue>) -> Result<Self> {
        let key = FilterKey::parse(key)?;
        let value = value.into();
        if value.values().is_empty() {
            return Err(Error::InvalidArgument(format!(
                "filter on '{}' was given an empty set of values",
                key.field
            )));
        }
        if key.filter != SearchFilter::ExactMatch && value.values().iter().any(Value::is_null) {
            return Err(Error::InvalidArgument(format!(
                "{:?} on '{}' cannot compare with NULL",
                key.filter, key.field
            )));
        }
        Ok(Self { key, value })
    }

    /// Condition selecting rows that match.
    pub fn condition(&self, column: &str) -> Condition {
        self.build(column, self.key.negate)
    }

    /// Condition selecting rows that do not match. Rows where the column is
    /// NULL count as not matching.
    pub fn exclude_condition(&self, column: &str) -> Condition {
        self.build(column, !self.key.negate)
    }

    fn build(&self, column: &str, negate: bool) -> Condition {
        let (column, marker) = if self.key.nocase {
            (format!("LOWER({})", column), "LOWER(?)")
        } else {
            (column.to_string(), "?")
        };

        match self.key.filter {
            SearchFilter::ExactMatch => exact_condition(&column, marker, self.value.values(), negate),
            SearchFilter::PartialMatch | SearchFilter::StartsWith | SearchFilter::EndsWith => {
                let members = self
                    .value
                    .values()
                    .iter()
                    .map(|value| {
                        let pattern = Value::from(self.key.filter.like_pattern(&value.to_string()));
                        if negate {
                            Condition::sql(
                                format!("{col} NOT LIKE {m} OR {col} IS NULL", col = column, m = marker),
                                vec![pattern],
                            )
                        } else {
                            Condition::sql(format!("{} LIKE {}", column, marker), vec![pattern])
                        }
                    })
                    .collect();
                group(members, negate)
            }
            filter => {
                let (op, inverse) = filter.comparison().unwrap_or(("=", "<>"));
                let members = self
                    .value
                    .values()
                    .iter()
                    .map(|value| {
                        if negate {
                            Condition::sql(
                                format!("{col} {} {m} OR {col} IS NULL", inverse, col = column, m = marker),
                                vec![value.clone()],
                            )
                        } else {
                            Condition::sql(format!("{} {} {}", column, op, marker), vec![value.clone()])
                        }
                    })
                    .collect();
                group(members, negate)
            }
        }
    }

    /// Whether a value held in memory passes the filter.
    pub fn matches(&self, actual: &Value) -> bool {
        let hit = self
            .value
            .values()
            .iter()
            .any(|expected| self.matches_one(actual, expected));
        hit != self.key.negate
    }

    fn matches_one(&self, actual: &Value, expected: &Value) -> bool {
        if actual.is_null() || expected.is_null() {
            return self.key.filter == SearchFilter::ExactMatch && actual.is_null() && expected.is_null();
        }
        let text = |value: &Value| {
            let s = value.to_string();
            if self.key.nocase { s.to_lowercase() } else { s }
        };
        match self.key.filter {
            SearchFilter::ExactMatch if self.key.nocase => text(actual) == text(expected),
            SearchFilter::ExactMatch => actual.loose_eq(expected),
            SearchFilter::PartialMatch => text(actual).contains(&text(expected)),
            SearchFilter::StartsWith => text(actual).starts_with(&text(expected)),
            SearchFilter::EndsWith => text(actual).ends_with(&text(expected)),
            SearchFilter::GreaterThan => actual.compare(expected) == Ordering::Greater,
            SearchFilter::GreaterThanOrEqual => actual.compare(expected) != Ordering::Less,
            SearchFilter::LessThan => actual.compare(expected) == Ordering::Less,
            SearchFilter::LessThanOrEqual => actual.compare(expected) != Ordering::Greater,
        }
    }
}

fn exact_condition(column: &str, marker: &str, values: &[Value], negate: bool) -> Condition {
    let non_null: Vec<Value> = values.iter().filter(|v| !v.is_null()).cloned().collect();
    let has_null = non_null.len() < values.len();

    let list = match non_null.len() {
        0 => None,
        1 => Some(if negate {
            format!("{} <> {}", column, marker)
        } else {
            format!("{} = {}", column, marker)
        }),
        n => {
            let markers = if marker == "?" {
                placeholders(n)
            } else {
                vec![marker; n].join(", ")
            };
            Some(if negate {
                format!("{} NOT IN ({})", column, markers)
            } else {
                format!("{} IN ({})", column, markers)
            })
        }
    };

    match (list, has_null, negate) {
        (None, _, false) => Condition::raw(format!("{} IS NULL", column)),
        (None, _, true) => Condition::raw(format!("{} IS NOT NULL", column)),
        (Some(sql), false, false) => Condition::sql(sql, non_null),
        (Some(sql), false, true) => Condition::sql(format!("{} OR {} IS NULL", sql, column), non_null),
        (Some(sql), true, false) => Condition::sql(format!("{} OR {} IS NULL", sql, column), non_null),
        (Some(sql), true, true) => {
            Condition::sql(format!("{} AND {} IS NOT NULL", sql, column), non_null)
        }
    }
}

/// Positive members are alternatives; negated members must all hold.
fn group(mut members: Vec<Condition>, negate: bool) -> Condition {
    if members.len() == 1 {
        return members.remove(0);
    }
    if negate {
        Condition::all(members)
    } else {
        Condition::any(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(condition: &Condition) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let sql = condition.build(&mut params);
        (sql, params)
    }

    #[test]
    fn parses_chain_filter_and_modifiers() {
        let key = FilterKey::parse("Team.Title:StartsWith:not:nocase").unwrap();
        assert_eq!(key.chain, vec!["Team".to_string()]);
        assert_eq!(key.field, "Title");
        assert_eq!(key.filter, SearchFilter::StartsWith);
        assert!(key.negate && key.nocase);
        assert_eq!(key.chain_path(), "Team");

        let plain = FilterKey::parse("Name").unwrap();
        assert!(plain.chain.is_empty());
        assert_eq!(plain.filter, SearchFilter::ExactMatch);
    }

    #[test]
    fn rejects_bad_keys_and_values() {
        assert!(matches!(FilterKey::parse("Name = 1"), Err(Error::InvalidArgument(_))));
        assert!(matches!(FilterKey::parse("Name:Fuzzy"), Err(Error::InvalidArgument(_))));
        assert!(matches!(FilterKey::parse("Name:not:Fuzzy"), Err(Error::InvalidArgument(_))));
        let empty: Vec<i64> = Vec::new();
        assert!(matches!(Filter::new("ID", empty), Err(Error::InvalidArgument(_))));
        assert!(matches!(
            Filter::new("Name:PartialMatch", Value::Null),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn exact_match_sql() {
        let filter = Filter::new("Name", "Ann").unwrap();
        assert_eq!(
            render(&filter.condition("\"Player\".\"Name\"")),
            ("\"Player\".\"Name\" = ?".to_string(), vec![Value::from("Ann")])
        );
        assert_eq!(
            render(&filter.exclude_condition("\"Player\".\"Name\"")).0,
            "\"Player\".\"Name\" <> ? OR \"Player\".\"Name\" IS NULL"
        );

        let set = Filter::new("ID", vec![1, 2]).unwrap();
        assert_eq!(
            render(&set.condition("\"Player\".\"ID\"")).0,
            "\"Player\".\"ID\" IN (?, ?)"
        );
        let null = Filter::new("Name", Value::Null).unwrap();
        assert_eq!(render(&null.condition("\"N\"")).0, "\"N\" IS NULL");
    }

    #[test]
    fn like_and_comparison_sql() {
        let starts = Filter::new("Name:StartsWith:nocase", "an").unwrap();
        assert_eq!(
            render(&starts.condition("\"Name\"")),
            ("LOWER(\"Name\") LIKE LOWER(?)".to_string(), vec![Value::from("an%")])
        );

        let any = Filter::new("Name:PartialMatch", ["a", "b"]).unwrap();
        assert_eq!(
            render(&any.condition("\"Name\"")).0,
            "(\"Name\" LIKE ?) OR (\"Name\" LIKE ?)"
        );

        let gt = Filter::new("Budget:GreaterThan", 10).unwrap();
        assert_eq!(render(&gt.condition("\"B\"")).0, "\"B\" > ?");
        assert_eq!(render(&gt.exclude_condition("\"B\"")).0, "\"B\" <= ? OR \"B\" IS NULL");
    }

    #[test]
    fn in_memory_matching() {
        let exact = Filter::new("ID", [1, 3]).unwrap();
        assert!(exact.matches(&Value::BigInt(3)));
        assert!(!exact.matches(&Value::BigInt(2)));

        let partial = Filter::new("Name:PartialMatch:nocase", "NN").unwrap();
        assert!(partial.matches(&Value::from("Anne")));

        let not = Filter::new("Name:ExactMatch:not", "Ann").unwrap();
        assert!(not.matches(&Value::from("Bo")));
        assert!(not.matches(&Value::Null));

        let le = Filter::new("Budget:LessThanOrEqual", 5).unwrap();
        assert!(le.matches(&Value::Double(5.0)));
        assert!(!le.matches(&Value::Null));
    }
}
