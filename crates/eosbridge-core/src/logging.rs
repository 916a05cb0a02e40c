//! Tracing setup and SDK log forwarding.
//!
//! One subscriber carries both our own spans and the SDK's log stream:
//! [`forward_sdk_log`] is installed as the SDK log callback and re-emits
//! each message under the `eosbridge::sdk` target.
//!
//! Fields used across the crate:
//!
//! - `context`: runtime context handle (`ctx#<index>v<generation>`)
//! - `event`: outward event name
//! - `result`: SDK result code
//! - `category`: SDK log category

use crate::sdk::{LogMessage, SdkLogLevel};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::fmt::time::SystemTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry};

static INSTALLED: AtomicBool = AtomicBool::new(false);

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    /// One flattened JSON object per event.
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pretty => "pretty",
            Self::Json => "json",
        })
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("pretty") {
            Ok(Self::Pretty)
        } else if s.eq_ignore_ascii_case("json") {
            Ok(Self::Json)
        } else {
            Err(format!("unknown log format '{s}' (expected pretty or json)"))
        }
    }
}

/// `[logging]` section of the bridge configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive. `RUST_LOG` wins when set.
    pub level: String,
    pub format: LogFormat,
    /// Mirror every event to this file, without ANSI colors.
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
            file: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("logging already initialized")]
    AlreadyInitialized,

    #[error("cannot open log file {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid log filter '{directive}': {source}")]
    Filter {
        directive: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },

    #[error(transparent)]
    Install(#[from] tracing_subscriber::util::TryInitError),
}

/// Install the process-wide subscriber. Only the first call succeeds.
pub fn init_logging(config: &LogConfig) -> Result<(), LogError> {
    if INSTALLED.load(Ordering::Acquire) {
        return Err(LogError::AlreadyInitialized);
    }

    let mut layers: Vec<BoxedLayer> = vec![format_layer(config.format, io::stderr, true)
        .with_filter(build_filter(&config.level)?)
        .boxed()];
    if let Some(path) = &config.file {
        let file = open_log_file(path)?;
        layers.push(
            format_layer(config.format, file, false)
                .with_filter(build_filter(&config.level)?)
                .boxed(),
        );
    }

    if INSTALLED.swap(true, Ordering::AcqRel) {
        return Err(LogError::AlreadyInitialized);
    }
    if let Err(err) = tracing_subscriber::registry().with(layers).try_init() {
        INSTALLED.store(false, Ordering::Release);
        return Err(err.into());
    }

    tracing::info!(
        level = %config.level,
        format = %config.format,
        file = ?config.file,
        "logging initialized"
    );
    Ok(())
}

fn build_filter(level: &str) -> Result<EnvFilter, LogError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(level).map_err(|source| LogError::Filter {
        directive: level.to_string(),
        source,
    })
}

fn open_log_file(path: &Path) -> Result<File, LogError> {
    let wrap = |source| LogError::File {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(wrap)?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(wrap)
}

fn format_layer<W>(format: LogFormat, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> tracing_subscriber::fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_target(true);
    match format {
        LogFormat::Pretty => layer.with_ansi(ansi).boxed(),
        LogFormat::Json => layer
            .json()
            .with_timer(SystemTime)
            .with_current_span(true)
            .with_span_list(false)
            .flatten_event(true)
            .boxed(),
    }
}

/// SDK log callback: re-emit one message at the matching tracing level.
pub fn forward_sdk_log(message: &LogMessage) {
    let category = message.category.as_str();
    let text = message.message.as_str();
    match message.level {
        SdkLogLevel::Off => {}
        SdkLogLevel::Fatal | SdkLogLevel::Error => {
            tracing::error!(target: "eosbridge::sdk", category, "{text}");
        }
        SdkLogLevel::Warning => tracing::warn!(target: "eosbridge::sdk", category, "{text}"),
        SdkLogLevel::Info => tracing::info!(target: "eosbridge::sdk", category, "{text}"),
        SdkLogLevel::Verbose => tracing::debug!(target: "eosbridge::sdk", category, "{text}"),
        SdkLogLevel::VeryVerbose => {
            tracing::trace!(target: "eosbridge::sdk", category, "{text}");
        }
    }
}
