//! Username/password authentication against a SQL table.
//!
//! This crate verifies a submitted username/password pair against a row in a
//! relational table and turns the matched row(s) into identity attributes.
//!
//! # Example
//!
//! ```no_run
//! use sqlauth::sql::{AuthSourceSql, SourceConfig};
//!
//! # async fn example() -> Result<(), sqlauth::AuthError> {
//! let config = SourceConfig::new("sqlite:users.db", "", "", "users", "sha512");
//! let source = AuthSourceSql::new("example-sql", config)?;
//!
//! match source.login("alice", "correct horse").await {
//!     Ok(attributes) => {
//!         for (name, values) in attributes.iter() {
//!             println!("{name}: {}", values.join(", "));
//!         }
//!     }
//!     Err(e) if e.is_invalid_credentials() => println!("wrong username or password"),
//!     Err(e) => return Err(e),
//! }
//! # Ok(())
//! # }
//! ```

mod attributes;
mod error;
mod traits;
mod verifier;

pub mod cli;
pub mod hash;
pub mod loader;
pub mod sql;

pub use attributes::{AttributeSet, aggregate};
pub use cli::AuthArgs;
pub use error::{AuthError, ErrorKind};
pub use hash::{DigestAlgorithm, MessageDigestEncoder, PasswordEncoder};
pub use loader::{LoadError, SourcesFile, load_sources};
pub use sql::{AuthSourceSql, SourceConfig};
pub use traits::UserPassAuth;
pub use verifier::CredentialVerifier;
