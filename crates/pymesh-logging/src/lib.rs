//! Structured logging for Pymesh nodes
//!
//! - **JSONL output** for log aggregation (default)
//! - **Pretty console** output for development
//! - **Node context**: every span opened under a [`NodeContextGuard`] carries
//!   the node's mac, so logs from many simulated nodes stay separable
//! - **File rotation**: daily, hourly or none via `tracing-appender`
//!
//! # Quick Start
//!
//! ```ignore
//! use pymesh_logging::{LogConfig, PymeshSubscriberBuilder};
//!
//! // JSONL to stdout
//! let _guard = PymeshSubscriberBuilder::new().init()?;
//!
//! // Pretty output while developing
//! let _guard = PymeshSubscriberBuilder::new()
//!     .with_config(LogConfig::development())
//!     .init()?;
//! ```
//!
//! Keep the returned [`LogGuard`] alive; dropping it flushes file output.

pub mod config;
pub mod context;
pub mod layers;

pub use config::{ConsoleConfig, FileConfig, JsonlConfig, LogConfig, RotationStrategy};
pub use context::{NodeContextData, NodeContextGuard};
pub use layers::{NodeContextExtension, NodeContextLayer};

use thiserror::Error;
use tracing::Subscriber;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Errors from subscriber setup
#[derive(Debug, Error)]
pub enum LoggingError {
    /// Log file could not be opened
    #[error("Log file error: {0}")]
    File(#[from] InitError),

    /// Default level is not a valid filter directive
    #[error("Invalid filter: {0}")]
    Filter(#[from] ParseError),

    /// A global subscriber is already installed
    #[error("Subscriber already set: {0}")]
    AlreadySet(#[from] tracing::subscriber::SetGlobalDefaultError),
}

type Base = Layered<NodeContextLayer, Layered<EnvFilter, Registry>>;
type BoxedLayer = Box<dyn Layer<Base> + Send + Sync>;

/// Keeps background log writers alive
#[must_use = "dropping the guard stops file logging"]
pub struct LogGuard {
    _workers: Vec<WorkerGuard>,
}

/// Builder for the Pymesh tracing subscriber
///
/// Console output is JSONL unless the config asks for pretty output.
pub struct PymeshSubscriberBuilder {
    config: LogConfig,
}

impl PymeshSubscriberBuilder {
    pub fn new() -> Self {
        Self {
            config: LogConfig::default(),
        }
    }

    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the default filter directive
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.default_level = level.into();
        self
    }

    pub fn with_console(mut self, enabled: bool) -> Self {
        self.config.console.enabled = enabled;
        self
    }

    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    /// Build the subscriber without installing it
    pub fn build(self) -> Result<(impl Subscriber + Send + Sync + 'static, LogGuard), LoggingError> {
        let filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(&self.config.default_level)?,
        };

        let mut layers: Vec<BoxedLayer> = Vec::new();
        let mut workers = Vec::new();

        if self.config.console.enabled {
            if self.config.console.pretty {
                layers.push(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(self.config.console.ansi)
                        .with_target(true)
                        .boxed(),
                );
            } else {
                layers.push(jsonl_layer(&self.config.jsonl, std::io::stdout));
            }
        }

        if let Some(file) = &self.config.file {
            let (writer, guard) = file_writer(file)?;
            workers.push(guard);
            layers.push(jsonl_layer(&self.config.jsonl, writer));
        }

        let subscriber = Registry::default()
            .with(filter)
            .with(NodeContextLayer::new())
            .with(layers);
        Ok((subscriber, LogGuard { _workers: workers }))
    }

    /// Install the subscriber globally
    pub fn init(self) -> Result<LogGuard, LoggingError> {
        let (subscriber, guard) = self.build()?;
        tracing::subscriber::set_global_default(subscriber)?;
        Ok(guard)
    }
}

impl Default for PymeshSubscriberBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn jsonl_layer<W>(config: &JsonlConfig, writer: W) -> BoxedLayer
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(config.include_spans)
        .flatten_event(config.flatten_events)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_thread_ids(config.include_thread_info)
        .with_thread_names(config.include_thread_info)
        .with_writer(writer)
        .boxed()
}

fn file_writer(config: &FileConfig) -> Result<(NonBlocking, WorkerGuard), LoggingError> {
    let rotation = match config.rotation {
        RotationStrategy::Daily => Rotation::DAILY,
        RotationStrategy::Hourly => Rotation::HOURLY,
        RotationStrategy::Never => Rotation::NEVER,
    };
    let mut builder = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(config.prefix.clone())
        .filename_suffix("log");
    if let Some(max_files) = config.max_files {
        builder = builder.max_log_files(max_files);
    }
    let appender = builder.build(&config.directory)?;
    Ok(tracing_appender::non_blocking(appender))
}

/// Development logging; errors if a subscriber is already set
pub fn init_development() -> Result<LogGuard, LoggingError> {
    PymeshSubscriberBuilder::new()
        .with_config(LogConfig::development())
        .init()
}

/// Warnings-only logging for tests; safe to call more than once
pub fn init_testing() {
    let _ = PymeshSubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .init();
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_builder_defaults() {
        let builder = PymeshSubscriberBuilder::new();
        assert_eq!(builder.config.default_level, "info");
        assert!(!builder.config.console.pretty);
    }

    #[test]
    fn test_builder_overrides() {
        let builder = PymeshSubscriberBuilder::new()
            .with_config(LogConfig::development())
            .with_level("trace")
            .with_console(false);
        assert_eq!(builder.config.default_level, "trace");
        assert!(!builder.config.console.enabled);
    }

    #[test]
    fn test_file_output_is_jsonl() {
        let dir = TempDir::new().unwrap();
        let (subscriber, guard) = PymeshSubscriberBuilder::new()
            .with_console(false)
            .with_file_output(FileConfig {
                directory: dir.path().to_path_buf(),
                prefix: "node".to_string(),
                rotation: RotationStrategy::Never,
                max_files: None,
            })
            .build()
            .unwrap();

        tracing::subscriber::with_default(subscriber, || {
            let _ctx = NodeContextGuard::new(0x10);
            tracing::warn_span!("tick").in_scope(|| {
                tracing::warn!(probes = 2, "Leader round done");
            });
        });
        drop(guard);

        let contents = fs::read_to_string(dir.path().join("node.log")).unwrap();
        let line = contents.lines().next().unwrap();
        let json: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(json["message"], "Leader round done");
        assert_eq!(json["probes"], 2);
        assert_eq!(json["span"]["name"], "tick");
    }
}
