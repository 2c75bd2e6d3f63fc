//! Per-login database connections.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use sqlx::mysql::MySqlConnection;
use sqlx::postgres::PgConnection;
use sqlx::sqlite::SqliteConnection;
use sqlx::{Connection as _, Executor as _};
use tracing::debug;
use url::Url;

use crate::error::AuthError;

use super::config::SourceConfig;

/// Driver family, detected from the leading scheme token of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverFamily {
    /// MySQL/MariaDB.
    MySql,
    /// PostgreSQL.
    PostgreSql,
    /// SQLite.
    Sqlite,
    /// Anything else. Has no driver, so opening it fails.
    Other,
}

impl DriverFamily {
    /// Detect the family from a descriptor, case-insensitively.
    pub fn from_descriptor(descriptor: &str) -> Self {
        let scheme = descriptor
            .split_once(':')
            .map_or(descriptor, |(scheme, _)| scheme)
            .trim()
            .to_ascii_lowercase();
        match scheme.as_str() {
            "mysql" | "mariadb" => Self::MySql,
            "pgsql" | "postgres" | "postgresql" => Self::PostgreSql,
            "sqlite" => Self::Sqlite,
            _ => Self::Other,
        }
    }

    /// Directive issued right after connecting, if any.
    pub fn session_directive(self) -> Option<&'static str> {
        match self {
            Self::MySql => Some("SET NAMES 'utf8'"),
            Self::PostgreSql => Some("SET NAMES 'UTF8'"),
            Self::Sqlite | Self::Other => None,
        }
    }

    /// Positional placeholder for the first bound parameter.
    pub fn placeholder(self) -> &'static str {
        match self {
            Self::PostgreSql => "$1",
            Self::MySql | Self::Sqlite | Self::Other => "?",
        }
    }

    fn url_scheme(self) -> Option<&'static str> {
        match self {
            Self::MySql => Some("mysql"),
            Self::PostgreSql => Some("postgres"),
            Self::Sqlite | Self::Other => None,
        }
    }
}

impl fmt::Display for DriverFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::MySql => "mysql",
            Self::PostgreSql => "postgresql",
            Self::Sqlite => "sqlite",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

/// Turn a descriptor plus credentials into a driver URL.
///
/// `driver:key=value;...` descriptors for MySQL and PostgreSQL are rewritten
/// into `scheme://host:port/dbname` URLs. Credentials are added to
/// MySQL/PostgreSQL URLs unless empty or already present.
pub fn connection_url(descriptor: &str, user: &str, pass: &str) -> Result<String, String> {
    let family = DriverFamily::from_descriptor(descriptor);
    let Some(scheme) = family.url_scheme() else {
        return Ok(descriptor.to_string());
    };
    let rest = descriptor
        .split_once(':')
        .map_or("", |(_, rest)| rest)
        .trim();

    let mut url = if rest.starts_with("//") {
        Url::parse(&format!("{scheme}:{rest}")).map_err(|e| format!("invalid descriptor: {e}"))?
    } else {
        key_value_url(scheme, rest)?
    };

    if !user.is_empty() && url.username().is_empty() {
        url.set_username(user)
            .map_err(|()| "descriptor cannot carry a username".to_string())?;
    }
    if !pass.is_empty() && url.password().is_none() {
        url.set_password(Some(pass))
            .map_err(|()| "descriptor cannot carry a password".to_string())?;
    }
    Ok(url.into())
}

fn key_value_url(scheme: &str, pairs: &str) -> Result<Url, String> {
    let mut host = "localhost".to_string();
    let mut port = None;
    let mut dbname = None;
    let mut user = None;
    let mut password = None;
    let mut params = Vec::new();

    for pair in pairs.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("invalid descriptor segment '{pair}'"))?;
        let value = value.trim();
        match key.trim().to_ascii_lowercase().as_str() {
            "host" => host = value.to_string(),
            "port" => {
                port = Some(
                    value
                        .parse::<u16>()
                        .map_err(|_| format!("invalid port '{value}'"))?,
                );
            }
            "dbname" => dbname = Some(value.to_string()),
            "user" => user = Some(value.to_string()),
            "password" => password = Some(value.to_string()),
            // utf8 is forced by the session directive
            "charset" => {}
            "unix_socket" => params.push(("socket", value.to_string())),
            "sslmode" => params.push(("sslmode", value.to_string())),
            "application_name" => params.push(("application_name", value.to_string())),
            other => return Err(format!("unsupported descriptor key '{other}'")),
        }
    }

    let mut url = Url::parse(&format!("{scheme}://{host}"))
        .map_err(|e| format!("invalid descriptor host '{host}': {e}"))?;
    url.set_port(port)
        .map_err(|()| "descriptor cannot carry a port".to_string())?;
    if let Some(db) = dbname {
        url.set_path(&format!("/{db}"));
    }
    if let Some(user) = user {
        url.set_username(&user)
            .map_err(|()| "descriptor cannot carry a username".to_string())?;
    }
    if let Some(password) = password {
        url.set_password(Some(&password))
            .map_err(|()| "descriptor cannot carry a password".to_string())?;
    }
    if !params.is_empty() {
        url.query_pairs_mut().extend_pairs(params);
    }
    Ok(url)
}

/// Decrements the open-connection gauge when dropped.
#[derive(Debug)]
struct OpenSlot(Arc<AtomicUsize>);

impl OpenSlot {
    fn acquire(gauge: &Arc<AtomicUsize>) -> Self {
        gauge.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(gauge))
    }
}

impl Drop for OpenSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Native driver connection for one family.
pub(crate) enum DriverConnection {
    MySql(MySqlConnection),
    Postgres(PgConnection),
    Sqlite(SqliteConnection),
}

impl DriverConnection {
    async fn connect(family: DriverFamily, url: &str) -> Result<Self, sqlx::Error> {
        match family {
            DriverFamily::MySql => MySqlConnection::connect(url).await.map(Self::MySql),
            DriverFamily::PostgreSql => PgConnection::connect(url).await.map(Self::Postgres),
            DriverFamily::Sqlite => SqliteConnection::connect(url).await.map(Self::Sqlite),
            DriverFamily::Other => Err(sqlx::Error::Configuration(
                "no database driver for this descriptor".into(),
            )),
        }
    }

    async fn execute(&mut self, sql: &'static str) -> Result<(), sqlx::Error> {
        match self {
            Self::MySql(conn) => conn.execute(sql).await.map(|_| ()),
            Self::Postgres(conn) => conn.execute(sql).await.map(|_| ()),
            Self::Sqlite(conn) => conn.execute(sql).await.map(|_| ()),
        }
    }

    async fn close(self) -> Result<(), sqlx::Error> {
        match self {
            Self::MySql(conn) => conn.close().await,
            Self::Postgres(conn) => conn.close().await,
            Self::Sqlite(conn) => conn.close().await,
        }
    }
}

/// A connection used for exactly one login.
///
/// Call [`close`](Self::close) when done; dropping it also releases the
/// socket and the gauge slot.
pub struct Connection {
    inner: DriverConnection,
    family: DriverFamily,
    _slot: OpenSlot,
}

impl Connection {
    /// Driver family of this connection.
    pub fn family(&self) -> DriverFamily {
        self.family
    }

    pub(crate) fn driver_mut(&mut self) -> &mut DriverConnection {
        &mut self.inner
    }

    /// Close the connection gracefully.
    pub async fn close(self) {
        let Self { inner, _slot, .. } = self;
        if let Err(e) = inner.close().await {
            debug!(error = %e, "error while closing connection");
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("family", &self.family)
            .finish_non_exhaustive()
    }
}

/// Opens fresh, initialized connections for one auth source.
pub struct ConnectionFactory {
    descriptor: String,
    url: String,
    family: DriverFamily,
    connect_timeout: Duration,
    open: Arc<AtomicUsize>,
}

impl ConnectionFactory {
    /// Prepare a factory from the source configuration.
    pub fn new(auth_id: &str, config: &SourceConfig) -> Result<Self, AuthError> {
        let url = connection_url(&config.dsn, &config.username, &config.password)
            .map_err(|e| AuthError::config(auth_id, format!("parameter 'dsn': {e}")))?;

        Ok(Self {
            descriptor: config.dsn.clone(),
            url,
            family: DriverFamily::from_descriptor(&config.dsn),
            connect_timeout: config.connect_timeout,
            open: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Driver family of the configured descriptor.
    pub fn family(&self) -> DriverFamily {
        self.family
    }

    /// Number of connections currently open through this factory.
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::Acquire)
    }

    /// Open a connection and apply the driver's session initialization.
    pub async fn open(&self, auth_id: &str) -> Result<Connection, AuthError> {
        let connect = DriverConnection::connect(self.family, &self.url);
        let inner = match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => return Err(self.connection_error(auth_id, e)),
            Err(_) => {
                return Err(self.connection_error(
                    auth_id,
                    format!("timed out after {:?}", self.connect_timeout),
                ));
            }
        };

        let mut conn = Connection {
            inner,
            family: self.family,
            _slot: OpenSlot::acquire(&self.open),
        };

        if let Some(directive) = self.family.session_directive() {
            let init = tokio::time::timeout(self.connect_timeout, conn.driver_mut().execute(directive)).await;
            let failure = match init {
                Ok(Ok(_)) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some(format!("session init timed out after {:?}", self.connect_timeout)),
            };
            if let Some(message) = failure {
                conn.close().await;
                return Err(self.connection_error(auth_id, message));
            }
        }

        debug!(auth_id, family = %self.family, "database connection opened");
        Ok(conn)
    }

    fn connection_error<E: fmt::Display>(&self, auth_id: &str, err: E) -> AuthError {
        AuthError::ConnectionFailed {
            auth_id: auth_id.to_string(),
            descriptor: self.descriptor.clone(),
            message: err.to_string(),
        }
    }
}

// Debug implementation (don't leak credentials)
impl fmt::Debug for ConnectionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionFactory")
            .field("descriptor", &self.descriptor)
            .field("family", &self.family)
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}
