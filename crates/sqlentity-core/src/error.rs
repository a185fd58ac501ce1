//! Error types for sqlentity operations.

use std::fmt;

/// The primary error type for all sqlentity operations.
#[derive(Debug)]
pub enum Error {
    /// Failures reported by the database boundary
    Query(QueryError),
    /// Value conversion errors
    Type(TypeError),
    /// Unresolvable class, table or field, or an invalid declaration
    Schema(SchemaError),
    /// A relation whose remote join key cannot be determined unambiguously
    RelationAmbiguity(RelationError),
    /// A malformed relation chain, or one that violates linear-only rules
    InvalidChain(ChainError),
    /// Bad filter, sort or limit arguments
    InvalidArgument(String),
    /// An invariant the engine relies on was violated
    Logic(String),
    /// Configuration errors
    Config(ConfigError),
    /// Serialization/deserialization errors
    Serde(String),
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, foreign key, etc.)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct SchemaError {
    pub kind: SchemaErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaErrorKind {
    /// Class is not part of any known ancestry
    UnknownClass,
    /// No class maps to the table
    UnknownTable,
    /// Field is not declared on the class or its ancestors
    UnknownField,
    /// Two classes in one ancestry declare the same column
    FieldCollision,
    /// Declaration is malformed (bad type string, cycle, missing target)
    InvalidDeclaration,
}

#[derive(Debug)]
pub struct RelationError {
    pub class: String,
    pub relation: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ChainError {
    pub chain: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Build a `SchemaError` of the given kind.
    pub fn schema(kind: SchemaErrorKind, message: impl Into<String>) -> Self {
        Error::Schema(SchemaError {
            kind,
            message: message.into(),
        })
    }

    /// Shorthand for an unknown class.
    pub fn unknown_class(class: &str) -> Self {
        Self::schema(
            SchemaErrorKind::UnknownClass,
            format!("class '{}' is not part of any known ancestry", class),
        )
    }

    /// Build an `InvalidChain` error for a relation chain.
    pub fn invalid_chain(chain: impl Into<String>, message: impl Into<String>) -> Self {
        Error::InvalidChain(ChainError {
            chain: chain.into(),
            message: message.into(),
        })
    }

    /// Build a `RelationAmbiguity` error.
    pub fn ambiguous(
        class: impl Into<String>,
        relation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::RelationAmbiguity(RelationError {
            class: class.into(),
            relation: relation.into(),
            message: message.into(),
        })
    }

    /// Build an error reported by a database driver.
    pub fn query(
        kind: QueryErrorKind,
        sql: Option<&str>,
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Error::Query(QueryError {
            kind,
            sql: sql.map(str::to_string),
            message: message.into(),
            source,
        })
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }

    /// Get the schema error kind, if this is a schema error.
    pub fn schema_kind(&self) -> Option<SchemaErrorKind> {
        match self {
            Error::Schema(e) => Some(e.kind),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Query(e) => write!(f, "Query error: {}", e.message),
            Error::Type(e) => {
                if let Some(col) = &e.column {
                    write!(
                        f,
                        "Type error in column '{}': expected {}, found {}",
                        col, e.expected, e.actual
                    )
                } else {
                    write!(f, "Type error: expected {}, found {}", e.expected, e.actual)
                }
            }
            Error::Schema(e) => write!(f, "Schema error: {}", e.message),
            Error::RelationAmbiguity(e) => write!(
                f,
                "Ambiguous relation '{}' on '{}': {}",
                e.relation, e.class, e.message
            ),
            Error::InvalidChain(e) => {
                write!(f, "Invalid relation chain '{}': {}", e.chain, e.message)
            }
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::Logic(msg) => write!(f, "Logic error: {}", msg),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Serde(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sql {
            Some(sql) => write!(f, "{} (in `{}`)", self.message, sql),
            None => write!(f, "{}", self.message),
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<SchemaError> for Error {
    fn from(err: SchemaError) -> Self {
        Error::Schema(err)
    }
}

impl From<ChainError> for Error {
    fn from(err: ChainError) -> Self {
        Error::InvalidChain(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err.to_string())
    }
}

/// Result type alias for sqlentity operations.
pub type Result<T> = std::result::Result<T, Error>;
