//! Logger construction and scoped logger handles.
//!
//! The `env_logger` backend is installed once by the binary. Components
//! never choose their own log target: the hub builds a root [`Logger`]
//! at startup and hands each component a scoped child, so every line
//! can be traced back to the plugin, connection or worker that wrote it.
//!
//! ```ignore
//! let log = Logger::root("nagome").scoped("plugin");
//! log::info!(target: log.target(), "plugin [{}] opened", name);
//! ```

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

/// A named log target handed to a component at construction.
#[derive(Debug, Clone)]
pub struct Logger {
    target: Arc<str>,
}

impl Logger {
    /// Root logger for one hub instance.
    pub fn root(name: &str) -> Self {
        Self {
            target: Arc::from(name),
        }
    }

    /// Child logger whose target is `<parent>::<scope>`.
    pub fn scoped(&self, scope: &str) -> Self {
        Self {
            target: Arc::from(format!("{}::{scope}", self.target)),
        }
    }

    /// Target string for the `log` macros.
    pub fn target(&self) -> &str {
        &self.target
    }
}

/// Where log output should go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogDestination {
    /// Write to `<save dir>/info.log`.
    File,
    /// Write to stderr.
    Stderr,
}

/// Install the `env_logger` backend.
///
/// Defaults to `info` unless `RUST_LOG` says otherwise. Stdout is never
/// used because the main plugin speaks over it.
///
/// # Errors
///
/// Returns an error if the log file cannot be created.
pub fn init(save_path: &Path, destination: LogDestination) -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format_timestamp_secs();

    match destination {
        LogDestination::Stderr => {
            builder.target(env_logger::Target::Stderr);
        }
        LogDestination::File => {
            let log_path = save_path.join(crate::constants::LOG_FILE_NAME);
            let log_file = std::fs::File::create(&log_path)
                .with_context(|| format!("could not open log file {}", log_path.display()))?;
            builder.target(env_logger::Target::Pipe(Box::new(log_file)));
        }
    }

    builder
        .try_init()
        .context("logger already initialized")?;
    Ok(())
}
