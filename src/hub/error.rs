//! Errors raised by hub command handlers.
//!
//! None of these stop the hub. The dispatcher logs them and, for the
//! user-facing ones, the handler has already emitted a notification.

use thiserror::Error;

use crate::nicolive::NicoError;
use crate::plugin::PluginError;

/// Failure of one hub operation.
#[derive(Debug, Error)]
pub enum HubError {
    /// Broadcast protocol failure.
    #[error(transparent)]
    Nico(#[from] NicoError),

    /// Plugin setup or I/O failure.
    #[error(transparent)]
    Plugin(#[from] PluginError),

    /// `Content` did not match the command's schema.
    #[error("JSON error in the content: {0}")]
    Json(#[from] serde_json::Error),

    /// No broadcast ID in the text given to `Broad.Connect`.
    #[error("no valid BroadID found in \"{0}\"")]
    InvalidBroadId(String),

    /// (Domain, Command) pair with no handler.
    #[error("invalid command: {domain} {command}")]
    UnknownCommand {
        /// Message domain.
        domain: String,
        /// Message command.
        command: String,
    },

    /// The command needs a live session and there is none.
    #[error("not connected to a broadcast")]
    NotConnected,

    /// Settings or account file could not be read or written.
    #[error("persistence failed: {0}")]
    Persistence(String),

    /// `Plug.Enable` or a reply named a plugin index that does not exist.
    #[error("no plugin with index {0}")]
    NoSuchPlugin(usize),

    /// A hub task panicked.
    #[error("hub task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Socket setup failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<anyhow::Error> for HubError {
    fn from(err: anyhow::Error) -> Self {
        Self::Persistence(format!("{err:#}"))
    }
}
