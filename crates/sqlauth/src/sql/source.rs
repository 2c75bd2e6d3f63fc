//! SQL authentication source.

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, info};

use crate::attributes::{AttributeSet, aggregate};
use crate::error::{AuthError, ErrorKind};
use crate::traits::UserPassAuth;
use crate::verifier::CredentialVerifier;

use super::config::SourceConfig;
use super::connection::{Connection, ConnectionFactory, DriverFamily};
use super::queries::UserLookup;
use super::row::{ColumnValue, UserRow};

/// Column holding the stored password hash.
pub const PASSWORD_COLUMN: &str = "password";

/// Column holding the per-user salt.
pub const SALT_COLUMN: &str = "salt";

/// Steps of a single login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStage {
    Idle,
    Connecting,
    Querying,
    Verifying,
    Aggregating,
    Done,
    Failed(ErrorKind),
}

impl fmt::Display for LoginStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Querying => "querying",
            Self::Verifying => "verifying",
            Self::Aggregating => "aggregating",
            Self::Done => "done",
            Self::Failed(kind) => return write!(f, "failed({kind})"),
        };
        f.write_str(s)
    }
}

/// Authenticates users against a SQL table.
///
/// Every login opens its own connection and closes it before returning, so a
/// single instance can serve concurrent logins without locking.
///
/// # Example
///
/// ```ignore
/// use sqlauth::sql::{AuthSourceSql, SourceConfig};
/// use sqlauth::UserPassAuth;
///
/// let config = SourceConfig::new("mysql://db/idp", "idp", "secret", "users", "sha512");
/// let source = AuthSourceSql::new("example-sql", config)?;
///
/// let attributes = source.login("alice", "correct horse").await?;
/// ```
pub struct AuthSourceSql {
    auth_id: String,
    config: SourceConfig,
    factory: ConnectionFactory,
    lookup: UserLookup,
    verifier: CredentialVerifier,
}

impl AuthSourceSql {
    /// Create a source from a typed configuration.
    ///
    /// All configuration problems (empty fields, unquotable table name,
    /// unknown hash algorithm, bad descriptor) are reported here.
    pub fn new(auth_id: impl Into<String>, config: SourceConfig) -> Result<Self, AuthError> {
        let auth_id = auth_id.into();
        config.validate(&auth_id)?;

        let factory = ConnectionFactory::new(&auth_id, &config)?;
        let lookup = UserLookup::new(
            factory.family(),
            &config.table,
            &config.username_column,
            config.query_timeout,
        )
        .map_err(|e| AuthError::config(&auth_id, format!("parameter 'table_user_name': {e}")))?;
        let verifier = CredentialVerifier::for_algorithm(&config.hash, config.encoder_options())
            .map_err(|e| AuthError::config(&auth_id, format!("parameter 'hash': {e}")))?;

        debug!(
            auth_id = %auth_id,
            family = %factory.family(),
            table = %config.table,
            hash = %config.hash,
            "sql auth source configured"
        );

        Ok(Self {
            auth_id,
            config,
            factory,
            lookup,
            verifier,
        })
    }

    /// Create a source from an untyped configuration record.
    pub fn from_value(auth_id: impl Into<String>, value: &Value) -> Result<Self, AuthError> {
        let auth_id = auth_id.into();
        let config = SourceConfig::from_value(&auth_id, value)?;
        Self::new(auth_id, config)
    }

    /// Identifier of this source, used in errors and log events.
    pub fn auth_id(&self) -> &str {
        &self.auth_id
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    /// Driver family of the configured descriptor.
    pub fn database_type(&self) -> DriverFamily {
        self.factory.family()
    }

    /// The lookup statement sent for every login.
    pub fn lookup_sql(&self) -> &str {
        self.lookup.sql()
    }

    /// Connections currently held by in-flight logins.
    pub fn open_connections(&self) -> usize {
        self.factory.open_connections()
    }

    /// Run one login attempt.
    pub async fn login(&self, username: &str, password: &str) -> Result<AttributeSet, AuthError> {
        self.trace_stage(LoginStage::Idle);
        self.trace_stage(LoginStage::Connecting);
        let result = match self.factory.open(&self.auth_id).await {
            Ok(mut conn) => {
                let result = self.login_with(&mut conn, username, password).await;
                conn.close().await;
                result
            }
            Err(e) => Err(e),
        };

        if let Err(ref e) = result {
            self.trace_stage(LoginStage::Failed(e.kind()));
        }
        result
    }

    async fn login_with(
        &self,
        conn: &mut Connection,
        username: &str,
        password: &str,
    ) -> Result<AttributeSet, AuthError> {
        self.trace_stage(LoginStage::Querying);
        let mut rows = self.lookup.find_by_username(&self.auth_id, conn, username).await?;

        info!(auth_id = %self.auth_id, rows = rows.len(), "got rows from database");

        if self.config.case_sensitive_username {
            rows.retain(|row| self.username_matches_exactly(row, username));
        }

        let Some(first) = rows.first() else {
            error!(
                auth_id = %self.auth_id,
                "no rows in result set, probably wrong username/password"
            );
            return Err(AuthError::InvalidCredentials);
        };

        for row in &rows {
            self.check_schema(row)?;
        }

        self.trace_stage(LoginStage::Verifying);
        if !self.password_matches(first, password) {
            error!(
                auth_id = %self.auth_id,
                "password mismatch, probably wrong username/password"
            );
            return Err(AuthError::InvalidCredentials);
        }

        self.trace_stage(LoginStage::Aggregating);
        let attributes = aggregate(&rows);

        let names: Vec<&str> = attributes.names().collect();
        info!(auth_id = %self.auth_id, attributes = %names.join(","), "login succeeded");
        self.trace_stage(LoginStage::Done);

        Ok(attributes)
    }

    fn check_schema(&self, row: &UserRow) -> Result<(), AuthError> {
        for field in [PASSWORD_COLUMN, SALT_COLUMN] {
            if !row.contains(field) {
                return Err(AuthError::Schema {
                    auth_id: self.auth_id.clone(),
                    table: self.config.table.clone(),
                    field,
                });
            }
        }
        Ok(())
    }

    /// A null stored hash never matches; a null salt is an empty salt.
    fn password_matches(&self, row: &UserRow, password: &str) -> bool {
        let Some(stored) = row.get(PASSWORD_COLUMN).and_then(ColumnValue::to_text) else {
            return false;
        };
        let salt = row
            .get(SALT_COLUMN)
            .and_then(ColumnValue::to_text)
            .unwrap_or_default();
        self.verifier.verify(&stored, password, &salt)
    }

    fn username_matches_exactly(&self, row: &UserRow, username: &str) -> bool {
        row.get(&self.config.username_column)
            .and_then(ColumnValue::to_text)
            .is_some_and(|stored| stored == username)
    }

    #[inline]
    fn trace_stage(&self, stage: LoginStage) {
        debug!(auth_id = %self.auth_id, %stage, "login stage");
    }
}

#[async_trait]
impl UserPassAuth for AuthSourceSql {
    async fn login(&self, username: &str, password: &str) -> Result<AttributeSet, AuthError> {
        AuthSourceSql::login(self, username, password).await
    }
}

// Debug implementation (don't leak credentials)
impl fmt::Debug for AuthSourceSql {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSourceSql")
            .field("auth_id", &self.auth_id)
            .field("db_type", &self.factory.family())
            .field("table", &self.config.table)
            .field("hash", &self.config.hash)
            .finish_non_exhaustive()
    }
}
