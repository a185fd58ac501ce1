//! Field storage types.
//!
//! Declarations name a storage type with a short string such as
//! `Varchar(100)`, `Decimal(9,2)` or `Money`. [`FieldType::parse`] turns
//! those into a `FieldType`; composite types know which physical columns
//! they expand into.

use crate::error::{Error, Result, SchemaErrorKind};
use crate::pattern::regex;
use serde::{Deserialize, Serialize};

/// Storage type of a declared field or a physical column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    /// Auto-incrementing primary key (`ID`)
    PrimaryKey,
    /// Type discriminator holding the concrete class name (`ClassName`)
    ClassName,
    Varchar(u32),
    Text,
    Int,
    BigInt,
    Boolean,
    Double,
    Decimal { precision: u8, scale: u8 },
    Date,
    Datetime,
    Enum(Vec<String>),
    /// `<Relation>ID` column derived from a one-to-one declaration
    ForeignKey,
    /// `<Relation>Class` column of a polymorphic one-to-one
    ForeignClass,
    /// `<Relation>Relation` column of a relation-aware polymorphic one-to-one
    ForeignRelation,
    /// Composite: `<Field>Amount` + `<Field>Currency`
    Money,
    /// Composite: `<Field>ID` + `<Field>Class` (+ `<Field>Relation`)
    PolymorphicForeignKey { relation_aware: bool },
}

const TYPE_PATTERN: &str = r"^\s*([A-Za-z][A-Za-z0-9]*)\s*(?:\((.*)\))?\s*$";

fn invalid(spec: &str, why: &str) -> Error {
    Error::schema(
        SchemaErrorKind::InvalidDeclaration,
        format!("invalid field type '{}': {}", spec, why),
    )
}

impl FieldType {
    /// Parse a declaration type string.
    pub fn parse(spec: &str) -> Result<Self> {
        let pattern = regex(TYPE_PATTERN)?;
        let caps = pattern
            .captures(spec)
            .ok_or_else(|| invalid(spec, "expected Name or Name(args)"))?;
        let name = caps.get(1).map_or("", |m| m.as_str());
        let args: Vec<&str> = caps
            .get(2)
            .map(|m| m.as_str().split(',').map(str::trim).filter(|a| !a.is_empty()).collect())
            .unwrap_or_default();

        let number = |i: usize, default: u32| -> Result<u32> {
            match args.get(i) {
                Some(raw) => raw
                    .parse::<u32>()
                    .map_err(|_| invalid(spec, "argument is not a number")),
                None => Ok(default),
            }
        };

        let parsed = match name.to_ascii_lowercase().as_str() {
            "varchar" => FieldType::Varchar(number(0, 255)?),
            "text" | "htmltext" => FieldType::Text,
            "int" | "integer" => FieldType::Int,
            "bigint" => FieldType::BigInt,
            "boolean" | "bool" => FieldType::Boolean,
            "double" | "float" => FieldType::Double,
            "decimal" => {
                let precision = u8::try_from(number(0, 9)?)
                    .map_err(|_| invalid(spec, "precision out of range"))?;
                let scale = u8::try_from(number(1, 2)?)
                    .map_err(|_| invalid(spec, "scale out of range"))?;
                FieldType::Decimal { precision, scale }
            }
            "date" => FieldType::Date,
            "datetime" => FieldType::Datetime,
            "enum" => {
                let values: Vec<String> = args
                    .iter()
                    .map(|v| v.trim_matches(|c| c == '\'' || c == '"').to_string())
                    .collect();
                if values.is_empty() {
                    return Err(invalid(spec, "enum needs at least one value"));
                }
                FieldType::Enum(values)
            }
            "money" => FieldType::Money,
            "foreignkey" => FieldType::ForeignKey,
            _ => return Err(invalid(spec, "unknown type")),
        };
        Ok(parsed)
    }

    /// Whether this type expands into several physical columns.
    pub fn is_composite(&self) -> bool {
        matches!(
            self,
            FieldType::Money | FieldType::PolymorphicForeignKey { .. }
        )
    }

    /// Physical columns of a composite field as (suffix, type) pairs.
    ///
    /// Column names are the field name followed by the suffix. Non-composite
    /// types return an empty list.
    pub fn composite_columns(&self) -> Vec<(&'static str, FieldType)> {
        match self {
            FieldType::Money => vec![
                (
                    "Amount",
                    FieldType::Decimal {
                        precision: 19,
                        scale: 4,
                    },
                ),
                ("Currency", FieldType::Varchar(3)),
            ],
            FieldType::PolymorphicForeignKey { relation_aware } => {
                let mut columns = vec![
                    ("ID", FieldType::ForeignKey),
                    ("Class", FieldType::ForeignClass),
                ];
                if *relation_aware {
                    columns.push(("Relation", FieldType::ForeignRelation));
                }
                columns
            }
            _ => Vec::new(),
        }
    }

    /// Generic SQL column type, used by table-creation tooling.
    pub fn sql_type(&self) -> String {
        match self {
            FieldType::PrimaryKey | FieldType::Int | FieldType::ForeignKey => "INTEGER".to_string(),
            FieldType::BigInt => "BIGINT".to_string(),
            FieldType::ClassName | FieldType::ForeignClass | FieldType::ForeignRelation => {
                "VARCHAR(255)".to_string()
            }
            FieldType::Varchar(len) => format!("VARCHAR({})", len),
            FieldType::Text => "TEXT".to_string(),
            FieldType::Boolean => "BOOLEAN".to_string(),
            FieldType::Double => "DOUBLE PRECISION".to_string(),
            FieldType::Decimal { precision, scale } => format!("DECIMAL({}, {})", precision, scale),
            FieldType::Date => "DATE".to_string(),
            FieldType::Datetime => "DATETIME".to_string(),
            FieldType::Enum(values) => {
                let longest = values.iter().map(String::len).max().unwrap_or(1);
                format!("VARCHAR({})", longest.max(1))
            }
            FieldType::Money | FieldType::PolymorphicForeignKey { .. } => String::new(),
        }
    }
}

/// A resolved field as returned by the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    /// Class whose table stores the field; set when the caller asked for it.
    pub class: Option<String>,
}

/// Options for [`SchemaCatalog::field_specs`](super::SchemaCatalog::field_specs).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldOptions {
    /// Only the class's own fields, not its ancestors'.
    pub uninherited: bool,
    /// Only physical columns: composite fields are left out, their
    /// expansions are kept.
    pub db_only: bool,
    /// Record the owning class on each spec.
    pub include_class_prefix: bool,
}

impl FieldOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn uninherited(mut self) -> Self {
        self.uninherited = true;
        self
    }

    pub fn db_only(mut self) -> Self {
        self.db_only = true;
        self
    }

    pub fn include_class_prefix(mut self) -> Self {
        self.include_class_prefix = true;
        self
    }
}
