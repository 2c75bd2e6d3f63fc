//! SQL auth source configuration.

use std::fmt;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::error::AuthError;
use crate::hash::{DEFAULT_ITERATIONS, EncoderOptions};

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default lookup timeout.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Default name of the column matched against the submitted username.
pub const DEFAULT_USERNAME_COLUMN: &str = "username";

/// Configuration for one SQL authentication source.
///
/// Built once when the source is constructed and never modified afterwards.
#[derive(Clone)]
pub struct SourceConfig {
    /// Connection descriptor.
    ///
    /// Examples:
    /// - `mysql://host/db` or `mysql:host=localhost;dbname=app`
    /// - `postgres://host/db` or `pgsql:host=localhost;dbname=app`
    /// - `sqlite:path/to/users.db`
    pub dsn: String,

    /// Username used to connect to the database.
    pub username: String,

    /// Password used to connect to the database.
    pub password: String,

    /// Table holding the users.
    pub table: String,

    /// Hash algorithm identifier, e.g. `sha512`.
    pub hash: String,

    /// Digest rounds applied by the password encoder.
    pub hash_iterations: u32,

    /// Whether stored hashes are base64 (`true`) or hex (`false`).
    pub hash_encode_as_base64: bool,

    /// Column compared with the submitted username.
    pub username_column: String,

    /// Require an exact, case-sensitive username match regardless of the
    /// database collation.
    pub case_sensitive_username: bool,

    /// Connection timeout.
    pub connect_timeout: Duration,

    /// Lookup timeout.
    pub query_timeout: Duration,
}

/// Accepted keys for each required field, preferred spelling first.
const DSN_KEYS: &[&str] = &["dsn", "connection-descriptor"];
const USERNAME_KEYS: &[&str] = &["username", "db-username"];
const PASSWORD_KEYS: &[&str] = &["password", "db-password"];
const TABLE_KEYS: &[&str] = &["table_user_name", "table-name"];
const HASH_KEYS: &[&str] = &["hash", "hash-algorithm"];

impl SourceConfig {
    /// Create a config with the required fields and defaults for the rest.
    pub fn new(
        dsn: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        table: impl Into<String>,
        hash: impl Into<String>,
    ) -> Self {
        Self {
            dsn: dsn.into(),
            username: username.into(),
            password: password.into(),
            table: table.into(),
            hash: hash.into(),
            hash_iterations: DEFAULT_ITERATIONS,
            hash_encode_as_base64: true,
            username_column: DEFAULT_USERNAME_COLUMN.to_string(),
            case_sensitive_username: false,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    /// Build from an untyped configuration record.
    ///
    /// Every required field must be present and a string; optional fields
    /// must have the right type when present. Errors name the offending
    /// field and `auth_id`.
    pub fn from_value(auth_id: &str, value: &Value) -> Result<Self, AuthError> {
        let obj = value.as_object().ok_or_else(|| {
            AuthError::config(
                auth_id,
                format!("configuration must be a map, got: {value}"),
            )
        })?;

        let mut config = Self::new(
            required_str(auth_id, obj, DSN_KEYS)?,
            required_str(auth_id, obj, USERNAME_KEYS)?,
            required_str(auth_id, obj, PASSWORD_KEYS)?,
            required_str(auth_id, obj, TABLE_KEYS)?,
            required_str(auth_id, obj, HASH_KEYS)?,
        );

        if let Some(v) = optional_u64(auth_id, obj, "hash_iterations")? {
            config.hash_iterations = u32::try_from(v).map_err(|_| {
                AuthError::config(auth_id, "parameter 'hash_iterations' is out of range")
            })?;
        }
        if let Some(v) = optional_bool(auth_id, obj, "hash_encode_as_base64")? {
            config.hash_encode_as_base64 = v;
        }
        if let Some(v) = optional_str(auth_id, obj, "username_column")? {
            config.username_column = v;
        }
        if let Some(v) = optional_bool(auth_id, obj, "case_sensitive_username")? {
            config.case_sensitive_username = v;
        }
        if let Some(v) = optional_u64(auth_id, obj, "connect_timeout_secs")? {
            config.connect_timeout = Duration::from_secs(v);
        }
        if let Some(v) = optional_u64(auth_id, obj, "query_timeout_secs")? {
            config.query_timeout = Duration::from_secs(v);
        }

        config.validate(auth_id)?;
        Ok(config)
    }

    /// Check the invariants that do not depend on the driver.
    ///
    /// Connection credentials may be empty (SQLite has none); the descriptor,
    /// table, username column and hash identifier may not.
    pub fn validate(&self, auth_id: &str) -> Result<(), AuthError> {
        let non_empty = [
            ("dsn", &self.dsn),
            ("table_user_name", &self.table),
            ("hash", &self.hash),
            ("username_column", &self.username_column),
        ];
        for (name, value) in non_empty {
            if value.trim().is_empty() {
                return Err(AuthError::config(
                    auth_id,
                    format!("parameter '{name}' must not be empty"),
                ));
            }
        }
        if self.connect_timeout.is_zero() {
            return Err(AuthError::config(
                auth_id,
                "parameter 'connect_timeout_secs' must be > 0",
            ));
        }
        if self.query_timeout.is_zero() {
            return Err(AuthError::config(
                auth_id,
                "parameter 'query_timeout_secs' must be > 0",
            ));
        }
        Ok(())
    }

    /// Options for the password encoder.
    pub fn encoder_options(&self) -> EncoderOptions {
        EncoderOptions {
            iterations: self.hash_iterations,
            encode_as_base64: self.hash_encode_as_base64,
        }
    }

    /// Builder: set digest rounds.
    pub fn hash_iterations(mut self, iterations: u32) -> Self {
        self.hash_iterations = iterations;
        self
    }

    /// Builder: choose base64 or hex stored hashes.
    pub fn hash_encode_as_base64(mut self, enabled: bool) -> Self {
        self.hash_encode_as_base64 = enabled;
        self
    }

    /// Builder: set the username column.
    pub fn username_column(mut self, column: impl Into<String>) -> Self {
        self.username_column = column.into();
        self
    }

    /// Builder: require exact username matches.
    pub fn case_sensitive_username(mut self, enabled: bool) -> Self {
        self.case_sensitive_username = enabled;
        self
    }

    /// Builder: set connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Builder: set query timeout.
    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn required_str(auth_id: &str, obj: &Map<String, Value>, keys: &[&str]) -> Result<String, AuthError> {
    let primary = keys[0];
    let found = keys.iter().find_map(|key| obj.get(*key).map(|v| (*key, v)));
    match found {
        None => Err(AuthError::config(
            auth_id,
            format!("missing required attribute '{primary}'"),
        )),
        Some((_, Value::String(s))) => Ok(s.clone()),
        Some((key, other)) => Err(AuthError::config(
            auth_id,
            format!(
                "expected parameter '{key}' to be a string, instead it was: {}",
                describe(other)
            ),
        )),
    }
}

fn optional_str(auth_id: &str, obj: &Map<String, Value>, key: &str) -> Result<Option<String>, AuthError> {
    match obj.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(AuthError::config(
            auth_id,
            format!(
                "expected parameter '{key}' to be a string, instead it was: {}",
                describe(other)
            ),
        )),
    }
}

fn optional_u64(auth_id: &str, obj: &Map<String, Value>, key: &str) -> Result<Option<u64>, AuthError> {
    match obj.get(key) {
        None => Ok(None),
        Some(v) => v.as_u64().map(Some).ok_or_else(|| {
            AuthError::config(
                auth_id,
                format!(
                    "expected parameter '{key}' to be a non-negative integer, instead it was: {}",
                    describe(v)
                ),
            )
        }),
    }
}

fn optional_bool(auth_id: &str, obj: &Map<String, Value>, key: &str) -> Result<Option<bool>, AuthError> {
    match obj.get(key) {
        None => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(other) => Err(AuthError::config(
            auth_id,
            format!(
                "expected parameter '{key}' to be a boolean, instead it was: {}",
                describe(other)
            ),
        )),
    }
}

// Debug implementation (don't leak credentials)
impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("dsn", &self.dsn)
            .field("username", &self.username)
            .field("table", &self.table)
            .field("hash", &self.hash)
            .field("hash_iterations", &self.hash_iterations)
            .field("username_column", &self.username_column)
            .field("case_sensitive_username", &self.case_sensitive_username)
            .finish_non_exhaustive()
    }
}
