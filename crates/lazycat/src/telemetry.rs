//! Tracing subscriber setup
//!
//! Libraries in this workspace only emit `tracing` events. Applications call
//! [`init_tracing`] once to route them to stderr.

use crate::settings::Settings;
use crate::{Error, Result};
use std::io;
use std::sync::OnceLock;
pub use tracing::Level;
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TracingFormat {
    /// Multi-line human-readable output
    Pretty,
    /// Single-line output
    #[default]
    Compact,
    /// One JSON object per event
    Json,
}

impl std::str::FromStr for TracingFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            _ => Err(Error::tracing(format!("unknown tracing format: {s}"))),
        }
    }
}

/// Tracing configuration
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Output format
    pub format: TracingFormat,
    /// Level for the workspace crates when no filter is given
    pub level: Level,
    /// Full `EnvFilter` directive, overriding `level`
    pub filter: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            format: TracingFormat::default(),
            level: Level::WARN,
            filter: None,
        }
    }
}

impl TracingConfig {
    /// Use `log_level` from settings: a bare level sets the level of the
    /// workspace crates, anything else is taken as a filter directive.
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        match settings.log_level.parse::<Level>() {
            Ok(level) => Self {
                level,
                ..Self::default()
            },
            Err(_) => Self {
                filter: Some(settings.log_level.clone()),
                ..Self::default()
            },
        }
    }

    fn directives(&self) -> String {
        if let Some(filter) = &self.filter {
            return filter.clone();
        }
        let level = self.level.as_str().to_lowercase();
        ["lazycat", "lazycat_cache", "lazycat_task_graph", "lazycat_array", "lazycat_catalog"]
            .iter()
            .map(|target| format!("{target}={level}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

static SESSION_ID: OnceLock<Uuid> = OnceLock::new();

/// Identifier of this process, attached to the startup event
pub fn session_id() -> Uuid {
    *SESSION_ID.get_or_init(Uuid::new_v4)
}

/// Install a global subscriber writing to stderr.
///
/// `RUST_LOG` takes precedence over the configured level unless an explicit
/// filter is set.
///
/// # Errors
///
/// Returns [`Error::Tracing`] for an invalid filter or if a global
/// subscriber is already installed.
pub fn init_tracing(config: &TracingConfig) -> Result<()> {
    let env_filter = if config.filter.is_some() {
        EnvFilter::try_new(config.directives())
    } else {
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(config.directives()))
    }
    .map_err(|e| Error::tracing(format!("invalid tracing filter: {e}")))?;

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = match config.format {
        TracingFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_writer(io::stderr)
                    .with_target(true)
                    .with_thread_names(true),
            )
            .try_init(),
        TracingFormat::Compact => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_writer(io::stderr)
                    .with_target(false),
            )
            .try_init(),
        TracingFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(io::stderr)
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .try_init(),
    };
    installed.map_err(|e| Error::tracing(e.to_string()))?;

    tracing::info!(
        session_id = %session_id(),
        version = env!("CARGO_PKG_VERSION"),
        format = ?config.format,
        "tracing initialized"
    );
    Ok(())
}
