//! Error types for repokit operations.

use std::fmt;

/// The primary error type for all repokit operations.
#[derive(Debug)]
pub enum Error {
    /// The entity type was never registered.
    UnknownEntityType(String),
    /// A predicate, sort key, projection, assignment or fetch hint named a
    /// field (or association) the entity does not declare.
    UnknownField {
        /// Entity type the lookup ran against
        entity: String,
        /// The offending name
        field: String,
    },
    /// The identity is already tracked by a different instance in this session.
    DuplicateIdentity {
        entity: String,
        identity: String,
    },
    /// A single-result API required a row and none matched.
    NotFound {
        entity: String,
        detail: String,
    },
    /// A single-result API matched more than one row.
    NonUniqueResult {
        entity: String,
        count: usize,
    },
    /// Transport-level failure reported by the store.
    Store(StoreError),
    /// A write or read would act on an instance made stale by a bulk mutation.
    StaleWriteConflict {
        entity: String,
        identity: String,
    },
    /// The instance does not belong to the live state of this session.
    Detached {
        entity: String,
        identity: String,
    },
    /// The association is already being resolved further up the call stack.
    ResolutionInProgress {
        entity: String,
        association: String,
    },
    /// The request itself is malformed (zero page size, bad assignment, ...).
    InvalidRequest(String),
    /// Type conversion errors
    Type(TypeError),
    /// Configuration errors
    Config(ConfigError),
    /// Custom error with message
    Custom(String),
}

/// Stable classification of [`Error`] values, used by tooling output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UnknownEntityType,
    UnknownField,
    DuplicateIdentity,
    NotFound,
    NonUniqueResult,
    StoreUnavailable,
    /// The store was reachable but refused the operation
    StoreRejected,
    StaleWriteConflict,
    Detached,
    ResolutionInProgress,
    InvalidRequest,
    Type,
    Config,
    Custom,
}

impl ErrorKind {
    /// Get the kind name as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnknownEntityType => "UnknownEntityType",
            ErrorKind::UnknownField => "UnknownField",
            ErrorKind::DuplicateIdentity => "DuplicateIdentity",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::NonUniqueResult => "NonUniqueResult",
            ErrorKind::StoreUnavailable => "StoreUnavailable",
            ErrorKind::StoreRejected => "StoreRejected",
            ErrorKind::StaleWriteConflict => "StaleWriteConflict",
            ErrorKind::Detached => "Detached",
            ErrorKind::ResolutionInProgress => "ResolutionInProgress",
            ErrorKind::InvalidRequest => "InvalidRequest",
            ErrorKind::Type => "Type",
            ErrorKind::Config => "Config",
            ErrorKind::Custom => "Custom",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// The store could not be reached
    Unavailable,
    /// The store gave up waiting (its own timeout policy)
    Timeout,
    /// A constraint in the store rejected the write
    Constraint,
    /// Transaction boundary misuse (commit without begin, ...)
    Transaction,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl StoreError {
    /// Create a store error without an underlying cause.
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Shorthand for an [`StoreErrorKind::Unavailable`] error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Unavailable, message)
    }
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnknownEntityType(_) => ErrorKind::UnknownEntityType,
            Error::UnknownField { .. } => ErrorKind::UnknownField,
            Error::DuplicateIdentity { .. } => ErrorKind::DuplicateIdentity,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::NonUniqueResult { .. } => ErrorKind::NonUniqueResult,
            Error::Store(e) => match e.kind {
                StoreErrorKind::Unavailable | StoreErrorKind::Timeout => ErrorKind::StoreUnavailable,
                StoreErrorKind::Constraint | StoreErrorKind::Transaction => ErrorKind::StoreRejected,
            },
            Error::StaleWriteConflict { .. } => ErrorKind::StaleWriteConflict,
            Error::Detached { .. } => ErrorKind::Detached,
            Error::ResolutionInProgress { .. } => ErrorKind::ResolutionInProgress,
            Error::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Error::Type(_) => ErrorKind::Type,
            Error::Config(_) => ErrorKind::Config,
            Error::Custom(_) => ErrorKind::Custom,
        }
    }

    /// Structural errors are programming mistakes in the request or schema,
    /// never transient.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Error::UnknownEntityType(_) | Error::UnknownField { .. } | Error::DuplicateIdentity { .. }
        )
    }

    /// Is this a store transport error?
    pub fn is_store_error(&self) -> bool {
        matches!(self, Error::Store(_))
    }

    /// Copy this error for reporting it again, e.g. a cached resolution
    /// failure. Underlying `source` chains are not carried over.
    pub fn replay(&self) -> Error {
        match self {
            Error::UnknownEntityType(name) => Error::UnknownEntityType(name.clone()),
            Error::UnknownField { entity, field } => Error::unknown_field(entity, field),
            Error::DuplicateIdentity { entity, identity } => Error::DuplicateIdentity {
                entity: entity.clone(),
                identity: identity.clone(),
            },
            Error::NotFound { entity, detail } => Error::NotFound {
                entity: entity.clone(),
                detail: detail.clone(),
            },
            Error::NonUniqueResult { entity, count } => Error::NonUniqueResult {
                entity: entity.clone(),
                count: *count,
            },
            Error::Store(e) => Error::Store(StoreError::new(e.kind, e.message.clone())),
            Error::StaleWriteConflict { entity, identity } => Error::StaleWriteConflict {
                entity: entity.clone(),
                identity: identity.clone(),
            },
            Error::Detached { entity, identity } => Error::Detached {
                entity: entity.clone(),
                identity: identity.clone(),
            },
            Error::ResolutionInProgress {
                entity,
                association,
            } => Error::ResolutionInProgress {
                entity: entity.clone(),
                association: association.clone(),
            },
            Error::InvalidRequest(msg) => Error::InvalidRequest(msg.clone()),
            Error::Type(e) => Error::Type(TypeError {
                expected: e.expected,
                actual: e.actual.clone(),
                column: e.column.clone(),
            }),
            Error::Config(e) => Error::Config(ConfigError {
                message: e.message.clone(),
                source: None,
            }),
            Error::Custom(msg) => Error::Custom(msg.clone()),
        }
    }

    pub fn unknown_field(entity: impl Into<String>, field: impl Into<String>) -> Self {
        Error::UnknownField {
            entity: entity.into(),
            field: field.into(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnknownEntityType(name) => write!(f, "Unknown entity type '{}'", name),
            Error::UnknownField { entity, field } => {
                write!(f, "Entity '{}' has no field '{}'", entity, field)
            }
            Error::DuplicateIdentity { entity, identity } => write!(
                f,
                "{} with identity {} is already tracked by another instance",
                entity, identity
            ),
            Error::NotFound { entity, detail } => write!(f, "No {} found: {}", entity, detail),
            Error::NonUniqueResult { entity, count } => write!(
                f,
                "Expected at most one {}, found {}",
                entity, count
            ),
            Error::Store(e) => write!(f, "Store error: {}", e),
            Error::StaleWriteConflict { entity, identity } => write!(
                f,
                "{} {} is stale after a bulk mutation; clear or refresh the session",
                entity, identity
            ),
            Error::Detached { entity, identity } => write!(
                f,
                "{} {} is detached from the session",
                entity, identity
            ),
            Error::ResolutionInProgress {
                entity,
                association,
            } => write!(
                f,
                "Association '{}.{}' is already being resolved",
                entity, association
            ),
            Error::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            Error::Type(e) => {
                if let Some(col) = &e.column {
                    write!(
                        f,
                        "Type error in field '{}': expected {}, found {}",
                        col, e.expected, e.actual
                    )
                } else {
                    write!(f, "Type error: expected {}, found {}", e.expected, e.actual)
                }
            }
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Store(e) => e
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

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for field '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        Error::Store(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(ConfigError {
            message: format!("invalid JSON: {}", err),
            source: Some(Box::new(err)),
        })
    }
}

/// Result type alias for repokit operations.
pub type Result<T> = std::result::Result<T, Error>;
