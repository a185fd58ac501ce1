//! Type encoding and decoding between sqlentity values and SQLite.
//!
//! SQLite has five storage classes: INTEGER, REAL, TEXT, BLOB and NULL.
//! Booleans are stored as 0/1, decimals and JSON as text.

use rusqlite::types::{ToSqlOutput, ValueRef};
use sqlentity_core::Value;

/// A borrowed parameter, bindable by rusqlite.
pub struct Param<'a>(pub &'a Value);

impl rusqlite::ToSql for Param<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self.0 {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Bool(b) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(i64::from(*b))),
            Value::Int(v) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(i64::from(*v))),
            Value::BigInt(v) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*v)),
            Value::Double(v) => ToSqlOutput::Owned(rusqlite::types::Value::Real(*v)),
            Value::Decimal(s) | Value::Text(s) => {
                ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes()))
            }
            Value::Bytes(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            Value::Json(j) => ToSqlOutput::Owned(rusqlite::types::Value::Text(j.to_string())),
        })
    }
}

/// Read one column of a result row.
///
/// Integers that fit in 32 bits come back as `Value::Int`.
pub fn read_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => match i32::try_from(v) {
            Ok(small) => Value::Int(small),
            Err(_) => Value::BigInt(v),
        },
        ValueRef::Real(v) => Value::Double(v),
        ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Bytes(bytes.to_vec()),
    }
}
