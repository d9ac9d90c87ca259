//! Logging setup for hookbuf
//!
//! Every hookbuf crate logs through `tracing`. Binaries install the
//! subscriber once at startup with [`HookbufSubscriberBuilder`].
//!
//! # Features
//!
//! - **Console output**: human-readable (default) or JSONL
//! - **File output**: JSONL files with daily/hourly rotation via tracing-appender
//! - **RUST_LOG override**: the environment filter wins over the configured level
//!
//! # Quick Start
//!
//! ```ignore
//! use hookbuf_logging::{HookbufSubscriberBuilder, LogConfig};
//!
//! // Keep the guard alive for the lifetime of the process when logging to files
//! let _guard = HookbufSubscriberBuilder::new()
//!     .with_config(LogConfig::development())
//!     .init();
//! ```

pub mod config;

pub use config::{ConsoleConfig, FileConfig, LogConfig, RotationStrategy};

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// Errors raised while installing the subscriber
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to create log directory {path}: {source}")]
    LogDir {
        path: String,
        source: std::io::Error,
    },

    #[error("a global subscriber is already installed: {0}")]
    AlreadyInstalled(String),
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Builder for configuring and initializing the hookbuf logging subscriber
pub struct HookbufSubscriberBuilder {
    config: LogConfig,
}

impl Default for HookbufSubscriberBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HookbufSubscriberBuilder {
    /// Create a new subscriber builder with default configuration
    pub fn new() -> Self {
        Self {
            config: LogConfig::default(),
        }
    }

    /// Use a specific configuration
    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the default log level
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.default_level = level.into();
        self
    }

    /// Enable or disable console output
    pub fn with_console(mut self, enabled: bool) -> Self {
        self.config.console.enabled = enabled;
        self
    }

    /// Configure file output
    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    /// Install the subscriber globally
    ///
    /// Returns the file writer guard when file output is configured; it
    /// must be kept alive for buffered lines to be flushed.
    pub fn try_init(self) -> Result<Option<WorkerGuard>, LoggingError> {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.config.default_level));

        let mut layers: Vec<BoxedLayer> = Vec::new();
        let mut guard = None;

        if self.config.console.enabled {
            layers.push(console_layer(&self.config.console));
        }

        if let Some(file_config) = &self.config.file {
            let (writer, file_guard) = file_writer(file_config)?;
            guard = Some(file_guard);
            layers.push(
                tracing_subscriber::fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(true)
                    .with_ansi(false)
                    .with_writer(writer)
                    .boxed(),
            );
        }

        tracing_subscriber::registry()
            .with(layers)
            .with(env_filter)
            .try_init()
            .map_err(|e| LoggingError::AlreadyInstalled(e.to_string()))?;

        Ok(guard)
    }

    /// Install the subscriber, ignoring failures
    ///
    /// Convenient for tests, where several may race to install one.
    pub fn init(self) -> Option<WorkerGuard> {
        self.try_init().ok().flatten()
    }
}

fn console_layer(config: &ConsoleConfig) -> BoxedLayer {
    if config.pretty {
        tracing_subscriber::fmt::layer()
            .with_ansi(config.ansi)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .boxed()
    }
}

/// Non-blocking writer for the configured log file
fn file_writer(config: &FileConfig) -> Result<(NonBlocking, WorkerGuard), LoggingError> {
    std::fs::create_dir_all(&config.directory).map_err(|source| LoggingError::LogDir {
        path: config.directory.display().to_string(),
        source,
    })?;

    let appender = match config.rotation {
        RotationStrategy::Never => {
            tracing_appender::rolling::never(&config.directory, format!("{}.log", config.prefix))
        }
        RotationStrategy::Daily => tracing_appender::rolling::daily(&config.directory, &config.prefix),
        RotationStrategy::Hourly => {
            tracing_appender::rolling::hourly(&config.directory, &config.prefix)
        }
    };
    Ok(tracing_appender::non_blocking(appender))
}
