//! Error taxonomy for the driver core.

use std::io;
use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// A single frame of a server backtrace: either a positional argument index
/// or the name of an optional argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BacktraceFrame {
    Index(usize),
    Key(String),
}

/// The offending term and backtrace attached to a server error response.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub term: Option<serde_json::Value>,
    pub backtrace: Vec<BacktraceFrame>,
}

/// The closed error taxonomy described in spec §6/§7.
///
/// Roughly mirrors `ReqlError` and its subtypes: driver-side failures carry a
/// message (and sometimes host/port), server-side failures carry the
/// offending term and backtrace for caret-annotated diagnostics.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error during network communication.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The query failed to compile on the server.
    #[error("compile error: {message}")]
    CompileError {
        message: String,
        context: ErrorContext,
    },

    /// The query compiled but failed at runtime for a reason rooted in the
    /// query's logic (e.g. a type error).
    #[error("query logic error: {message}")]
    QueryLogicError {
        message: String,
        context: ErrorContext,
    },

    /// A `QueryLogicError` specifically about a missing document/table/db.
    #[error("non-existence error: {message}")]
    NonExistenceError {
        message: String,
        context: ErrorContext,
    },

    /// The operation failed outright on the server (e.g. a write conflict).
    #[error("operation failed: {message}")]
    OpFailedError {
        message: String,
        context: ErrorContext,
    },

    /// The operation may or may not have succeeded; the server can't tell.
    #[error("operation indeterminate: {message}")]
    OpIndeterminateError {
        message: String,
        context: ErrorContext,
    },

    /// Raised by `r.error(..)` inside a query.
    #[error("user error: {message}")]
    UserError {
        message: String,
        context: ErrorContext,
    },

    /// An internal server error.
    #[error("internal error: {message}")]
    InternalError {
        message: String,
        context: ErrorContext,
    },

    /// The user lacks permission for the requested operation.
    #[error("permission error: {message}")]
    PermissionError {
        message: String,
        context: ErrorContext,
    },

    /// A server resource limit was exceeded.
    #[error("resource limit error: {message}")]
    ResourceLimitError {
        message: String,
        context: ErrorContext,
    },

    /// A catch-all driver-side failure (malformed wire data, closed
    /// connection, token overflow, etc).
    #[error("driver error: {message}")]
    DriverError { message: String },

    /// Authentication failed during the handshake.
    #[error("authentication error: {message}")]
    AuthError { message: String },

    /// `connect`, `run`, or `next` exceeded its deadline.
    #[error("operation timed out after {timeout:?}")]
    TimeoutError { timeout: std::time::Duration },

    /// A handshake method was called from a state that does not permit it.
    #[error("invalid handshake state: {state}")]
    InvalidHandshakeStateError { state: &'static str },

    /// `Cursor::next` was called after the cursor was already exhausted.
    #[error("cursor is empty")]
    ReqlCursorEmpty,
}

impl Error {
    pub fn driver(message: impl Into<String>) -> Self {
        Self::DriverError {
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::AuthError {
            message: message.into(),
        }
    }

    pub fn connection_closed() -> Self {
        Self::DriverError {
            message: "Connection is closed".to_string(),
        }
    }

    /// Construct the appropriate `Reql*Error` variant for a server error
    /// kind code (spec §6), attaching the offending term and backtrace.
    pub fn from_server(kind: u32, message: String, context: ErrorContext) -> Self {
        match kind {
            1_000_000 => Error::InternalError { message, context },
            2_000_000 => Error::ResourceLimitError { message, context },
            3_100_000 => Error::NonExistenceError { message, context },
            3_000_000 => Error::QueryLogicError { message, context },
            4_100_000 => Error::OpFailedError { message, context },
            4_200_000 => Error::OpIndeterminateError { message, context },
            5_000_000 => Error::UserError { message, context },
            6_000_000 => Error::PermissionError { message, context },
            _ => Error::QueryLogicError { message, context },
        }
    }

    /// The context (term + backtrace) attached to server-originated errors,
    /// if any.
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::CompileError { context, .. }
            | Error::QueryLogicError { context, .. }
            | Error::NonExistenceError { context, .. }
            | Error::OpFailedError { context, .. }
            | Error::OpIndeterminateError { context, .. }
            | Error::UserError { context, .. }
            | Error::InternalError { context, .. }
            | Error::PermissionError { context, .. }
            | Error::ResourceLimitError { context, .. } => Some(context),
            _ => None,
        }
    }
}
