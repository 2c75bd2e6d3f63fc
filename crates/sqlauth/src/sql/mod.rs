//! SQL database authentication source.
//!
//! This module authenticates username/password pairs against a user table in
//! PostgreSQL, MySQL or SQLite, using the native SQLx driver of each. Column
//! values of any type are rendered as text attributes.
//!
//! # Example
//!
//! ```ignore
//! use sqlauth::sql::{AuthSourceSql, SourceConfig};
//!
//! let config = SourceConfig::new(
//!     "pgsql:host=localhost;dbname=idp",
//!     "idp",
//!     "secret",
//!     "users",
//!     "sha512",
//! );
//! let source = AuthSourceSql::new("example-sql", config)?;
//!
//! match source.login("alice", "correct horse").await {
//!     Ok(attributes) => println!("{:?}", attributes.get("email")),
//!     Err(e) if e.is_invalid_credentials() => println!("try again"),
//!     Err(e) => return Err(e.into()),
//! }
//! ```
//!
//! # Database Schema
//!
//! The table needs at least `username`, `password` and `salt` columns; every
//! other column becomes an attribute. Several rows for one username turn into
//! multi-valued attributes.
//!
//! ```sql
//! CREATE TABLE users (
//!     username VARCHAR(255) NOT NULL,
//!     password VARCHAR(255) NOT NULL,  -- base64 salted digest
//!     salt     VARCHAR(255),
//!     email    VARCHAR(255),
//!     role     VARCHAR(64)
//! );
//!
//! CREATE INDEX idx_users_username ON users(username);
//! ```

mod config;
mod connection;
mod queries;
mod row;
mod source;

#[cfg(test)]
mod tests;

pub use config::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_QUERY_TIMEOUT, DEFAULT_USERNAME_COLUMN, SourceConfig,
};
pub use connection::{Connection, ConnectionFactory, DriverFamily, connection_url};
pub use queries::{UserLookup, quote_identifier};
pub use row::{ColumnValue, UserRow};
pub use source::{AuthSourceSql, LoginStage, PASSWORD_COLUMN, SALT_COLUMN};
