//! Configuration file loading.
//!
//! A sources file maps auth-source identifiers to their configuration records
//! and may carry a `logging` section for the CLI:
//!
//! ```toml
//! [logging]
//! level = "info"
//!
//! [sources.example-sql]
//! dsn = "mysql:host=localhost;dbname=idp"
//! username = "idp"
//! password = "secret"
//! table_user_name = "users"
//! hash = "sha512"
//! ```

use std::collections::BTreeMap;
use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AuthError;
use crate::sql::AuthSourceSql;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("toml: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("unsupported config format")]
    UnsupportedFormat,
    #[error("unknown auth source '{0}'")]
    UnknownSource(String),
    #[error(transparent)]
    Source(#[from] AuthError),
}

/// Contents of a sources file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourcesFile {
    /// Raw configuration records keyed by auth-source identifier.
    #[serde(default)]
    pub sources: BTreeMap<String, Value>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    /// Base level (trace/debug/info/warn/error).
    pub level: Option<String>,
    /// Output format: pretty, compact or json.
    pub format: Option<String>,
    /// stdout or stderr.
    pub output: Option<String>,
    /// Per-module level overrides.
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
}

impl SourcesFile {
    /// Construct the auth source registered under `auth_id`.
    pub fn build(&self, auth_id: &str) -> Result<AuthSourceSql, LoadError> {
        let value = self
            .sources
            .get(auth_id)
            .ok_or_else(|| LoadError::UnknownSource(auth_id.to_string()))?;
        Ok(AuthSourceSql::from_value(auth_id, value)?)
    }

    /// Construct every auth source, in identifier order.
    ///
    /// Returns one result per source so callers can report all problems.
    pub fn build_all(&self) -> Vec<(String, Result<AuthSourceSql, AuthError>)> {
        self.sources
            .iter()
            .map(|(id, value)| (id.clone(), AuthSourceSql::from_value(id.as_str(), value)))
            .collect()
    }
}

/// Load a sources file, choosing the format from the extension.
pub fn load_sources(path: impl AsRef<Path>) -> Result<SourcesFile, LoadError> {
    let path = path.as_ref();
    let data = fs::read_to_string(path)?;
    match path.extension().and_then(|s| s.to_str()).unwrap_or("") {
        "json" => Ok(serde_json::from_str(&data)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(&data)?),
        "toml" => Ok(toml::from_str(&data)?),
        _ => Err(LoadError::UnsupportedFormat),
    }
}
