//! User lookup query.

use std::time::Duration;

use crate::error::AuthError;

use super::connection::{Connection, DriverConnection, DriverFamily};
use super::row::UserRow;

/// Quote an identifier from trusted configuration for the given driver.
///
/// Dotted names are quoted per segment (`schema.table`). Quote characters
/// inside a segment are doubled.
pub fn quote_identifier(family: DriverFamily, name: &str) -> Result<String, String> {
    let quote = match family {
        DriverFamily::MySql => '`',
        DriverFamily::PostgreSql | DriverFamily::Sqlite | DriverFamily::Other => '"',
    };
    if name.contains('\0') {
        return Err(format!("identifier '{}' contains a NUL character", name.escape_default()));
    }

    let mut quoted = Vec::new();
    for segment in name.split('.') {
        let segment = segment.trim();
        if segment.is_empty() {
            return Err(format!("identifier '{name}' has an empty segment"));
        }
        let escaped = segment.replace(quote, &format!("{quote}{quote}"));
        quoted.push(format!("{quote}{escaped}{quote}"));
    }
    Ok(quoted.join("."))
}

/// Finds the rows of a user by username.
///
/// The statement is built once; the username is always a bound parameter.
#[derive(Debug, Clone)]
pub struct UserLookup {
    sql: String,
    timeout: Duration,
}

impl UserLookup {
    /// Build the lookup for `table`, matching on `username_column`.
    pub fn new(
        family: DriverFamily,
        table: &str,
        username_column: &str,
        timeout: Duration,
    ) -> Result<Self, String> {
        let sql = format!(
            "SELECT * FROM {} WHERE {} = {}",
            quote_identifier(family, table)?,
            quote_identifier(family, username_column)?,
            family.placeholder()
        );
        Ok(Self { sql, timeout })
    }

    /// The SQL text sent to the database.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Fetch every row whose username column equals `username`.
    ///
    /// An empty vector means no match. Statement failures are reported as
    /// the "execute query" stage, values that cannot be decoded as
    /// "fetch result set".
    pub async fn find_by_username(
        &self,
        auth_id: &str,
        conn: &mut Connection,
        username: &str,
    ) -> Result<Vec<UserRow>, AuthError> {
        match tokio::time::timeout(self.timeout, self.fetch(auth_id, conn, username)).await {
            Ok(result) => result,
            Err(_) => Err(AuthError::query(
                auth_id,
                "execute query",
                format!("timed out after {:?}", self.timeout),
            )),
        }
    }

    async fn fetch(
        &self,
        auth_id: &str,
        conn: &mut Connection,
        username: &str,
    ) -> Result<Vec<UserRow>, AuthError> {
        let executed = |e: sqlx::Error| AuthError::query(auth_id, "execute query", e);
        let decoded = |e: sqlx::Error| AuthError::query(auth_id, "fetch result set", e);
        let sql = self.sql.as_str();

        match conn.driver_mut() {
            DriverConnection::MySql(c) => {
                let rows = sqlx::query(sql).bind(username).fetch_all(c).await.map_err(executed)?;
                rows.iter()
                    .map(UserRow::from_mysql_row)
                    .collect::<Result<_, _>>()
                    .map_err(decoded)
            }
            DriverConnection::Postgres(c) => {
                let rows = sqlx::query(sql).bind(username).fetch_all(c).await.map_err(executed)?;
                rows.iter()
                    .map(UserRow::from_pg_row)
                    .collect::<Result<_, _>>()
                    .map_err(decoded)
            }
            DriverConnection::Sqlite(c) => {
                let rows = sqlx::query(sql).bind(username).fetch_all(c).await.map_err(executed)?;
                rows.iter()
                    .map(UserRow::from_sqlite_row)
                    .collect::<Result<_, _>>()
                    .map_err(decoded)
            }
        }
    }
}
