//! Error taxonomy for the dispatch pipeline.
//!
//! # Design Decisions
//! - One enum for everything the request path can fail with; the processor
//!   turns any of them into a JSON `{"error":{"message"}}` response
//! - Status codes live on the error, so handlers can pick their own
//! - `ErrorKind` is a fieldless mirror used for matching and metric labels

use axum::http::StatusCode;
use thiserror::Error;

/// Errors produced while resolving, loading, invoking or answering a function.
#[derive(Debug, Clone, Error)]
pub enum FuncError {
    /// The request path is unsafe to map onto the filesystem.
    #[error("{0}")]
    IllegalInput(String),

    /// No handler file matched the request path.
    #[error("{0}")]
    NotFound(String),

    /// No configuration could be resolved for the handler.
    #[error("{0}")]
    ConfigMissing(String),

    /// The handler failed, or returned a failure.
    #[error("{message}")]
    Handler {
        message: String,
        status: Option<u16>,
    },

    /// Reading a streamed reply failed mid-way.
    #[error("Stream error: {0}")]
    Stream(String),

    /// Socket, body or encoder failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A start/close/error hook failed, or the lifecycle was misused.
    #[error("[{hook}] {message}")]
    Lifecycle { hook: &'static str, message: String },
}

/// Fieldless discriminant of [`FuncError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    IllegalInput,
    NotFound,
    ConfigMissing,
    Handler,
    Stream,
    Transport,
    Lifecycle,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::IllegalInput => "illegal_input",
            ErrorKind::NotFound => "not_found",
            ErrorKind::ConfigMissing => "config_missing",
            ErrorKind::Handler => "handler",
            ErrorKind::Stream => "stream",
            ErrorKind::Transport => "transport",
            ErrorKind::Lifecycle => "lifecycle",
        }
    }
}

impl FuncError {
    /// Shorthand for a handler failure with the default status.
    pub fn handler(message: impl Into<String>) -> Self {
        FuncError::Handler {
            message: message.into(),
            status: None,
        }
    }

    /// Handler failure that answers with a specific status code.
    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        FuncError::Handler {
            message: message.into(),
            status: Some(status),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FuncError::IllegalInput(_) => ErrorKind::IllegalInput,
            FuncError::NotFound(_) => ErrorKind::NotFound,
            FuncError::ConfigMissing(_) => ErrorKind::ConfigMissing,
            FuncError::Handler { .. } => ErrorKind::Handler,
            FuncError::Stream(_) => ErrorKind::Stream,
            FuncError::Transport(_) => ErrorKind::Transport,
            FuncError::Lifecycle { .. } => ErrorKind::Lifecycle,
        }
    }

    /// HTTP status a client sees for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            FuncError::IllegalInput(_) => StatusCode::BAD_REQUEST,
            FuncError::NotFound(_) => StatusCode::NOT_FOUND,
            FuncError::Handler {
                status: Some(code), ..
            } => StatusCode::from_u16(*code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message placed in the JSON error body.
    pub fn message(&self) -> String {
        match self {
            FuncError::IllegalInput(m)
            | FuncError::NotFound(m)
            | FuncError::ConfigMissing(m)
            | FuncError::Stream(m)
            | FuncError::Transport(m) => m.clone(),
            FuncError::Handler { message, .. } => message.clone(),
            FuncError::Lifecycle { message, .. } => message.clone(),
        }
    }
}

impl From<std::io::Error> for FuncError {
    fn from(e: std::io::Error) -> Self {
        FuncError::Transport(e.to_string())
    }
}
