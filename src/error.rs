//! Error types for the schema vault.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Each error variant provides actionable messages so that the LLM-facing layer can
//! relay a remediation hint or self-correct a generated statement.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Unsupported dialect: {kind}")]
    UnsupportedDialect { kind: String },

    #[error("Ambiguous dialect for '{token}': could be {candidates}. Pass an explicit dialect override.")]
    AmbiguousDialect { token: String, candidates: String },

    #[error("Connection unreachable: {message}")]
    ConnectionUnreachable { message: String, hint: String },

    /// Per-node and non-fatal; recorded on the tree rather than raised by discovery.
    #[error("Introspection incomplete for {object}: {message}")]
    IntrospectionPartial { object: String, message: String },

    #[error("Statement rejected: keyword {keyword} is not allowed (near: {excerpt})")]
    ValidationRejected { keyword: String, excerpt: String },

    /// Soft failure: degrades to an `unknown` cost class.
    #[error("Cost estimation unavailable: {reason}")]
    CostEstimationUnavailable { reason: String },

    #[error("Migration {id} failed: {message}")]
    MigrationFailed { id: String, message: String },

    #[error("Failed to persist state to {path}: {message}")]
    StatePersistenceFailed { path: String, message: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Schema error: {message} (object: {object})")]
    Schema { message: String, object: String },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u64,
    },

    #[error("Connection not found: {connection_id}")]
    ConnectionNotFound { connection_id: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Invalid onboarding transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create an unsupported dialect error.
    pub fn unsupported_dialect(kind: impl Into<String>) -> Self {
        Self::UnsupportedDialect { kind: kind.into() }
    }

    /// Create an ambiguous dialect error listing the candidate kinds.
    pub fn ambiguous_dialect(token: impl Into<String>, candidates: &[impl ToString]) -> Self {
        Self::AmbiguousDialect {
            token: token.into(),
            candidates: candidates
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", "),
        }
    }

    /// Create an unreachable-connection error with a remediation hint.
    pub fn unreachable(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::ConnectionUnreachable {
            message: message.into(),
            hint: hint.into(),
        }
    }

    /// Create a per-node introspection failure.
    pub fn partial(object: impl Into<String>, message: impl Into<String>) -> Self {
        Self::IntrospectionPartial {
            object: object.into(),
            message: message.into(),
        }
    }

    /// Create a keyword rejection.
    pub fn rejected(keyword: impl Into<String>, excerpt: impl Into<String>) -> Self {
        Self::ValidationRejected {
            keyword: keyword.into(),
            excerpt: excerpt.into(),
        }
    }

    /// Create a cost estimation failure.
    pub fn cost_unavailable(reason: impl Into<String>) -> Self {
        Self::CostEstimationUnavailable {
            reason: reason.into(),
        }
    }

    /// Create a migration failure.
    pub fn migration_failed(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MigrationFailed {
            id: id.into(),
            message: message.into(),
        }
    }

    /// Create a state persistence failure.
    pub fn persistence(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StatePersistenceFailed {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create a schema error.
    pub fn schema(message: impl Into<String>, object: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
            object: object.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Create a connection not found error.
    pub fn connection_not_found(connection_id: impl Into<String>) -> Self {
        Self::ConnectionNotFound {
            connection_id: connection_id.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an invalid phase transition error.
    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::ConnectionUnreachable { hint, .. } => Some(hint),
            Self::Database { suggestion, .. } => Some(suggestion),
            Self::ValidationRejected { .. } => {
                Some("Rewrite the statement as a read-only query without the rejected keyword")
            }
            Self::AmbiguousDialect { .. } => Some("Pass ?dialect=<kind> or an explicit override"),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionUnreachable { .. } | Self::Timeout { .. }
        )
    }

    /// Errors that must abort the triggering operation instead of being collected.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::StatePersistenceFailed { .. })
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::invalid_input(format!(
                "Invalid connection configuration: {}",
                msg
            )),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::database(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => DbError::timeout("connection pool acquire", 30),
            sqlx::Error::PoolClosed => {
                DbError::unreachable("Connection pool is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => DbError::unreachable(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::unreachable(
                format!("TLS error: {}", tls_err),
                "Check TLS mode and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::unreachable(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::TypeNotFound { type_name } => DbError::schema(
                format!("Type not found: {}", type_name),
                type_name.to_string(),
            ),
            sqlx::Error::ColumnNotFound(col) => {
                DbError::schema(format!("Column not found: {}", col), col.to_string())
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::internal(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::AnyDriverError(err) => DbError::unreachable(
                format!("Driver error: {}", err),
                "Check database driver configuration",
            ),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for vault operations.
pub type DbResult<T> = Result<T, DbError>;
