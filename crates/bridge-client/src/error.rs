//! Error types for the metabridge client.

use std::fmt;

/// The kind of remote call an error belongs to.
///
/// Also selects the timeout class applied by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `POST /api/session`
    Authentication,
    /// Catalog reads under `/api/database` and `/api/table`
    Metadata,
    /// `POST /api/dataset`
    Query,
}

impl Operation {
    /// Human-readable label used in error messages and log fields.
    pub fn label(&self) -> &'static str {
        match self {
            Operation::Authentication => "authentication",
            Operation::Metadata => "metadata request",
            Operation::Query => "SQL query execution",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Errors that can occur when using the metabridge client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Credentials rejected, or the session endpoint answered without a token
    #[error("Authentication failed: {message}")]
    Authentication {
        /// What the server (or the response parser) reported
        message: String,
    },

    /// Timeout or I/O failure that survived every retry
    #[error("{operation} failed after {attempts} attempt(s): {source}")]
    TransientNetwork {
        /// Which call was being made
        operation: Operation,
        /// Number of attempts made, including the first
        attempts: u32,
        /// Transport error of the last attempt
        #[source]
        source: reqwest::Error,
    },

    /// The caller cancelled while the executor was between attempts
    #[error("{operation} cancelled after {attempts} attempt(s)")]
    Cancelled {
        /// Which call was being made
        operation: Operation,
        /// Number of attempts made before cancellation was observed
        attempts: u32,
    },

    /// Database, schema or table does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Catalog endpoint answered with an error status or an unreadable body
    #[error("Failed to load {what}: {message}")]
    MetadataLoad {
        /// Catalog dimension (databases, schemas, tables, columns)
        what: &'static str,
        /// Details
        message: String,
    },

    /// The dataset endpoint reported a query error or returned a malformed payload
    #[error("Query execution failed: {0}")]
    QueryExecution(String),

    /// Value accessor used while the cursor is not on a row
    #[error("No current row (cursor is before the first or after the last row)")]
    NoCurrentRow,

    /// Column index outside `1..=count`
    #[error("Invalid column index {index} (result has {count} columns)")]
    InvalidColumn {
        /// Requested 1-based index
        index: usize,
        /// Number of columns in the result
        count: usize,
    },

    /// No column with the requested name
    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    /// Typed accessor used on a value of another type
    #[error("Value in column {column} cannot be read as {expected}")]
    TypeMismatch {
        /// 1-based column index
        column: usize,
        /// Requested type
        expected: &'static str,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Returns true if the failure was a transport problem worth retrying later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::TransientNetwork { .. })
    }

    /// Returns the operation a network-level error belongs to.
    pub fn operation(&self) -> Option<Operation> {
        match self {
            ClientError::TransientNetwork { operation, .. }
            | ClientError::Cancelled { operation, .. } => Some(*operation),
            ClientError::Authentication { .. } => Some(Operation::Authentication),
            ClientError::MetadataLoad { .. } => Some(Operation::Metadata),
            ClientError::QueryExecution(_) => Some(Operation::Query),
            _ => None,
        }
    }

    /// Returns the number of attempts made, for errors raised by the executor.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            ClientError::TransientNetwork { attempts, .. }
            | ClientError::Cancelled { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    pub(crate) fn metadata(what: &'static str, message: impl Into<String>) -> Self {
        ClientError::MetadataLoad {
            what,
            message: message.into(),
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
