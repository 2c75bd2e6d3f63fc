//! Authentication error types.

use std::fmt;

/// Classification of an [`AuthError`].
///
/// Hosts use this to decide between prompting the user again
/// ([`ErrorKind::InvalidCredentials`]) and reporting a generic failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing or invalid configuration.
    Config,
    /// The database connection could not be established.
    ConnectionFailed,
    /// The lookup query failed.
    QueryFailed,
    /// The user table does not have the expected columns.
    Schema,
    /// Unknown username or wrong password.
    InvalidCredentials,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Config => "config",
            Self::ConnectionFailed => "connection_failed",
            Self::QueryFailed => "query_failed",
            Self::Schema => "schema",
            Self::InvalidCredentials => "invalid_credentials",
        };
        f.write_str(s)
    }
}

/// Authentication error.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Configuration rejected while constructing an auth source.
    #[error("sqlauth:{auth_id}: {message}")]
    Config { auth_id: String, message: String },

    /// Connecting or initializing the session failed.
    #[error("sqlauth:{auth_id}: failed to connect to '{descriptor}': {message}")]
    ConnectionFailed {
        auth_id: String,
        descriptor: String,
        message: String,
    },

    /// Preparing, executing or fetching the lookup failed.
    #[error("sqlauth:{auth_id}: failed to {stage}: {message}")]
    QueryFailed {
        auth_id: String,
        stage: &'static str,
        message: String,
    },

    /// A matched row is missing a column needed for password verification.
    #[error("sqlauth:{auth_id}: missing field '{field}' on table {table} for password resolution")]
    Schema {
        auth_id: String,
        table: String,
        field: &'static str,
    },

    /// Unknown user or wrong password. The two cases are deliberately
    /// indistinguishable.
    #[error("wrong username or password")]
    InvalidCredentials,
}

impl AuthError {
    /// Create a configuration error for the given auth source.
    #[inline]
    pub fn config(auth_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            auth_id: auth_id.into(),
            message: message.into(),
        }
    }

    /// Create a query error from any driver error.
    #[inline]
    pub fn query<E: fmt::Display>(auth_id: &str, stage: &'static str, err: E) -> Self {
        Self::QueryFailed {
            auth_id: auth_id.to_string(),
            stage,
            message: err.to_string(),
        }
    }

    /// The classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config { .. } => ErrorKind::Config,
            Self::ConnectionFailed { .. } => ErrorKind::ConnectionFailed,
            Self::QueryFailed { .. } => ErrorKind::QueryFailed,
            Self::Schema { .. } => ErrorKind::Schema,
            Self::InvalidCredentials => ErrorKind::InvalidCredentials,
        }
    }

    /// Whether the user should be asked to re-enter their credentials.
    #[inline]
    pub fn is_invalid_credentials(&self) -> bool {
        matches!(self, Self::InvalidCredentials)
    }

    /// Whether this is an operational failure of a single login attempt
    /// (as opposed to bad credentials or bad configuration).
    #[inline]
    pub fn is_operational(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ConnectionFailed | ErrorKind::QueryFailed | ErrorKind::Schema
        )
    }
}
