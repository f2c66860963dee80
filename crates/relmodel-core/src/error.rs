//! Error types for RelModel operations.

use std::fmt;

/// The primary error type for all RelModel operations.
#[derive(Debug)]
pub enum Error {
    /// Query execution errors raised by the row source
    Query(QueryError),
    /// Type conversion errors
    Type(TypeError),
    /// A lookup that required a row received none
    NotFound(NotFoundError),
    /// A relation name resolved to no relation descriptor
    InvalidRelation(InvalidRelationError),
    /// An attribute could not be encoded to its stored form
    Encoding(EncodingError),
    /// An eager-load path or relation declaration is incomplete
    MalformedPlan(MalformedPlanError),
    /// Registration/configuration errors (bad cast tags, duplicate entities)
    Config(ConfigError),
    /// Custom error with message
    Custom(String),
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

#[derive(Debug, Clone)]
pub struct NotFoundError {
    /// Entity type that was looked up
    pub entity: String,
    /// Key values that were requested, if the lookup was by key
    pub ids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct InvalidRelationError {
    pub entity: String,
    pub relation: String,
}

#[derive(Debug)]
pub struct EncodingError {
    /// Attribute whose value failed to encode
    pub attribute: String,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone)]
pub struct MalformedPlanError {
    pub message: String,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Shorthand for a missing-row failure on `entity`.
    pub fn not_found(entity: impl Into<String>, ids: Vec<String>) -> Self {
        Error::NotFound(NotFoundError {
            entity: entity.into(),
            ids,
        })
    }

    pub fn invalid_relation(entity: impl Into<String>, relation: impl Into<String>) -> Self {
        Error::InvalidRelation(InvalidRelationError {
            entity: entity.into(),
            relation: relation.into(),
        })
    }

    pub fn malformed_plan(message: impl Into<String>) -> Self {
        Error::MalformedPlan(MalformedPlanError {
            message: message.into(),
        })
    }

    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(ConfigError {
            message: message.into(),
            source: None,
        })
    }

    /// Is this a "must exist" lookup that came back empty?
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Is this a mistake in entity/relation declarations rather than a runtime condition?
    ///
    /// Programmer errors fail fast and are never worth retrying.
    pub fn is_programmer_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidRelation(_) | Error::MalformedPlan(_) | Error::Config(_)
        )
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
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
            Error::NotFound(e) => write!(f, "{}", e),
            Error::InvalidRelation(e) => write!(f, "{}", e),
            Error::Encoding(e) => write!(f, "{}", e),
            Error::MalformedPlan(e) => write!(f, "Malformed eager-load plan: {}", e.message),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Custom(msg) => write!(f, "{}", msg),
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
            Error::Encoding(e) => e
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
        write!(f, "{}", self.message)
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

impl fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ids.is_empty() {
            write!(f, "No query results for entity [{}]", self.entity)
        } else {
            write!(
                f,
                "No query results for entity [{}] {}",
                self.entity,
                self.ids.join(", ")
            )
        }
    }
}

impl fmt::Display for InvalidRelationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}::{} must return a relationship instance",
            self.entity, self.relation
        )
    }
}

impl fmt::Display for EncodingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Unable to encode attribute [{}]: {}",
            self.attribute, self.message
        )
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

impl From<NotFoundError> for Error {
    fn from(err: NotFoundError) -> Self {
        Error::NotFound(err)
    }
}

impl From<EncodingError> for Error {
    fn from(err: EncodingError) -> Self {
        Error::Encoding(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

/// Result type alias for RelModel operations.
pub type Result<T> = std::result::Result<T, Error>;
