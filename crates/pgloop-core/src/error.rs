//! Error types for pgloop operations.
//!
//! The taxonomy follows the driver's delivery paths:
//!
//! - [`SetupError`]: surfaced synchronously at the call site, never enters
//!   a driver (bad conninfo, allocation failure, non-blocking-mode failure,
//!   failing to start a reset, unsupported parameter values)
//! - [`HandshakeError`]: terminal connect/reset failure, reported once via
//!   the operation's callback(s)
//! - [`QueryError`]: a failed send or an error-status result, reported via
//!   the query's completion callback
//! - [`Error::Busy`]: starting a second command while one is installed

use std::fmt;

use serde::{Deserialize, Serialize};

/// The primary error type for pgloop operations.
#[derive(Debug)]
pub enum Error {
    /// Synchronous call-site failures that never enter a driver
    Setup(SetupError),
    /// Terminal connect/reset handshake failure
    Handshake(HandshakeError),
    /// Failed send or error-status result for a command
    Query(QueryError),
    /// Type conversion failure when reading a result value
    Type(TypeError),
    /// A command is already installed on this connection
    Busy,
}

/// A failure surfaced synchronously at the call site.
#[derive(Debug)]
pub struct SetupError {
    pub message: String,
}

/// A terminal connection or reset handshake failure.
#[derive(Debug)]
pub struct HandshakeError {
    pub message: String,
}

/// A failure delivered through a query's completion callback.
#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    /// The client library's error message
    pub message: String,
    /// Structured server diagnostics; present for error-status results,
    /// absent for send failures
    pub fields: Option<ErrorFields>,
}

/// Where in the command lifecycle a query failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// The send primitive reported a non-success status; the command never
    /// reached the server
    Send,
    /// The server returned a bad-response, nonfatal-error, or fatal-error
    /// result
    Result,
}

/// Type conversion failure when reading a result value.
#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

/// Structured server diagnostics attached to error results and notices.
///
/// Mirrors the error fields the server reports alongside a failed result;
/// every field is optional because the server only sends what applies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorFields {
    pub severity: Option<String>,
    pub sqlstate: Option<String>,
    pub message_primary: Option<String>,
    pub message_detail: Option<String>,
    pub message_hint: Option<String>,
    pub statement_position: Option<String>,
    pub context: Option<String>,
    pub schema_name: Option<String>,
    pub table_name: Option<String>,
    pub column_name: Option<String>,
    pub datatype_name: Option<String>,
    pub constraint_name: Option<String>,
    pub source_file: Option<String>,
    pub source_line: Option<String>,
    pub source_function: Option<String>,
}

impl Error {
    /// Shorthand for a [`SetupError`].
    pub fn setup(message: impl Into<String>) -> Self {
        Error::Setup(SetupError {
            message: message.into(),
        })
    }

    /// Shorthand for a [`HandshakeError`].
    pub fn handshake(message: impl Into<String>) -> Self {
        Error::Handshake(HandshakeError {
            message: message.into(),
        })
    }

    /// Get the SQLSTATE code if this error carries server diagnostics.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.fields.as_ref().and_then(|f| f.sqlstate.as_deref()),
            _ => None,
        }
    }

    /// Did this error originate in the handshake path (connect or reset)?
    pub fn is_handshake_error(&self) -> bool {
        matches!(self, Error::Handshake(_))
    }
}

impl QueryError {
    /// Did the command fail before reaching the server?
    pub fn failed_to_send(&self) -> bool {
        self.kind == QueryErrorKind::Send
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Setup(e) => write!(f, "Setup error: {}", e.message),
            Error::Handshake(e) => write!(f, "Handshake failed: {}", e.message),
            Error::Query(e) => write!(f, "{}", e),
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Busy => write!(f, "operation already in progress"),
        }
    }
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind, self.sqlstate()) {
            (QueryErrorKind::Send, _) => write!(f, "Failed to send command: {}", self.message),
            (QueryErrorKind::Result, Some(code)) => {
                write!(f, "Query error (SQLSTATE {}): {}", code, self.message)
            }
            (QueryErrorKind::Result, None) => write!(f, "Query error: {}", self.message),
        }
    }
}

impl QueryError {
    /// Get the SQLSTATE code, if the server reported one.
    pub fn sqlstate(&self) -> Option<&str> {
        self.fields.as_ref().and_then(|f| f.sqlstate.as_deref())
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

impl std::error::Error for Error {}

impl From<SetupError> for Error {
    fn from(err: SetupError) -> Self {
        Error::Setup(err)
    }
}

impl From<HandshakeError> for Error {
    fn from(err: HandshakeError) -> Self {
        Error::Handshake(err)
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

/// Result type alias for pgloop operations.
pub type Result<T> = std::result::Result<T, Error>;
