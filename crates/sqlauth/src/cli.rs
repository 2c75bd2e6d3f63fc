//! CLI module for sqlauth.
//!
//! # Usage
//!
//! ```bash
//! # Compute a stored hash for a password
//! sqlauth hash -a sha512 -s 4f1b2c mypassword
//!
//! # Check that every configured source can be constructed
//! sqlauth check -c sources.toml
//!
//! # Try a login and print the resulting attributes
//! sqlauth login -c sources.toml -s example-sql -u alice -p mypassword
//! ```

use std::io;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tabled::{Table, Tabled};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::hash::{DEFAULT_ITERATIONS, EncoderOptions, encoder_for};
use crate::loader::{LoggingConfig, SourcesFile, load_sources};
use crate::AttributeSet;

/// sqlauth CLI arguments.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "sqlauth",
    version,
    about = "Username/password authentication against a SQL table"
)]
pub struct AuthArgs {
    /// Log level override (trace/debug/info/warn/error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: AuthCommands,
}

/// Output format for `login`.
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

/// CLI subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum AuthCommands {
    /// Show the stored hash for a password.
    Hash {
        /// Hash algorithm (md5, sha1, sha224, sha256, sha384, sha512).
        #[arg(short, long, default_value = "sha512")]
        algorithm: String,

        /// Salt merged into the password.
        #[arg(short, long, default_value = "")]
        salt: String,

        /// Digest rounds.
        #[arg(short, long, default_value_t = DEFAULT_ITERATIONS)]
        iterations: u32,

        /// Print hex instead of base64.
        #[arg(long)]
        hex: bool,

        /// Password to hash.
        password: String,
    },

    /// Construct every configured source and report configuration errors.
    Check {
        /// Sources file (toml/yaml/json).
        #[arg(short, long, env = "SQLAUTH_CONFIG", default_value = "sources.toml")]
        config: PathBuf,
    },

    /// Run one login and print the resulting attributes.
    Login {
        /// Sources file (toml/yaml/json).
        #[arg(short, long, env = "SQLAUTH_CONFIG", default_value = "sources.toml")]
        config: PathBuf,

        /// Auth source identifier.
        #[arg(short, long)]
        source: String,

        /// Username to authenticate.
        #[arg(short, long)]
        username: String,

        /// Password to authenticate with.
        #[arg(short, long, env = "SQLAUTH_PASSWORD", hide_env_values = true)]
        password: String,

        /// Output format.
        #[arg(short, long, value_enum, default_value_t)]
        format: OutputFormat,
    },
}

/// Attribute row for display.
#[derive(Tabled)]
struct AttributeDisplay {
    #[tabled(rename = "Attribute")]
    name: String,
    #[tabled(rename = "Values")]
    values: String,
}

/// Run the CLI with the given arguments.
pub async fn run(args: AuthArgs) -> Result<(), Box<dyn std::error::Error>> {
    match args.command {
        AuthCommands::Hash {
            algorithm,
            salt,
            iterations,
            hex,
            password,
        } => {
            let options = EncoderOptions {
                iterations,
                encode_as_base64: !hex,
            };
            let encoder = encoder_for(&algorithm, options)?;
            println!("{}", encoder.encode(&password, &salt)?);
            Ok(())
        }
        AuthCommands::Check { config } => {
            let file = load_sources(&config)?;
            init_tracing(&file.logging, args.log_level.as_deref());
            check_sources(&file)
        }
        AuthCommands::Login {
            config,
            source,
            username,
            password,
            format,
        } => {
            let file = load_sources(&config)?;
            init_tracing(&file.logging, args.log_level.as_deref());
            let source = file.build(&source)?;
            let attributes = source.login(&username, &password).await?;
            print_attributes(&attributes, format)
        }
    }
}

fn check_sources(file: &SourcesFile) -> Result<(), Box<dyn std::error::Error>> {
    if file.sources.is_empty() {
        return Err("no sources configured".into());
    }

    let mut failed = 0usize;
    for (id, result) in file.build_all() {
        match result {
            Ok(source) => println!("{id}: ok ({}, table {})", source.database_type(), source.config().table),
            Err(e) => {
                failed += 1;
                println!("{id}: {e}");
            }
        }
    }

    if failed > 0 {
        return Err(format!("{failed} source(s) failed to load").into());
    }
    Ok(())
}

fn print_attributes(
    attributes: &AttributeSet,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(attributes)?),
        OutputFormat::Table => {
            let rows: Vec<AttributeDisplay> = attributes
                .iter()
                .map(|(name, values)| AttributeDisplay {
                    name: name.to_string(),
                    values: values.join(", "),
                })
                .collect();
            println!("{}", Table::new(rows));
        }
    }
    Ok(())
}

fn init_tracing(config: &LoggingConfig, level_override: Option<&str>) {
    let base_level = level_override.or(config.level.as_deref()).unwrap_or("warn");
    let mut filter_str = base_level.to_string();

    for (module, level) in &config.filters {
        filter_str.push(',');
        filter_str.push_str(module);
        filter_str.push('=');
        filter_str.push_str(level);
    }

    let filter = EnvFilter::try_new(&filter_str).unwrap_or_else(|_| EnvFilter::new("warn"));

    let format = config.format.as_deref().unwrap_or("pretty");
    let output = config.output.as_deref().unwrap_or("stderr");

    // try_init: tracing may already be set up when run as a library
    let _ = match (format, output) {
        ("json", "stdout") => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(io::stdout))
            .try_init(),
        ("json", _) => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(io::stderr))
            .try_init(),
        ("compact", "stdout") => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact().with_writer(io::stdout))
            .try_init(),
        ("compact", _) => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact().with_writer(io::stderr))
            .try_init(),
        (_, "stdout") => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(io::stdout))
            .try_init(),
        _ => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(io::stderr))
            .try_init(),
    };
}
