//! Error types for the broadcast protocol layer.

use thiserror::Error;

/// Classification of a [`NicoError`], used to pick a retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Transient network failure; eligible for retry.
    Network,
    /// The broadcast has ended. Terminal.
    ClosedBroadcast,
    /// Credentials were rejected. Terminal.
    IncorrectAccount,
    /// Malformed frame or response.
    Protocol,
    /// A comment could not be sent.
    SendComment,
    /// No such user record. An expected condition, not a fault.
    UserNotFound,
    /// A disconnect is already running on this connection.
    AlreadyDisconnecting,
    /// Anything else.
    Other,
}

/// Errors raised by the live connection and broadcast protocol.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NicoError {
    /// Transient network failure.
    #[error("network error: {0}")]
    Network(String),

    /// The broadcast is closed.
    #[error("broadcast closed: {0}")]
    ClosedBroadcast(String),

    /// The account was rejected by the site.
    #[error("incorrect account: {0}")]
    IncorrectAccount(String),

    /// Malformed frame or API response.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A comment could not be sent.
    #[error("send comment error: {0}")]
    SendComment(String),

    /// The user store has no record for this ID.
    #[error("user not found: {0}")]
    UserNotFound(String),

    /// `disconnect` was called while another disconnect was running.
    #[error("already disconnecting")]
    AlreadyDisconnecting,

    /// Uncategorized failure.
    #[error("{0}")]
    Other(String),
}

impl NicoError {
    /// Kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) => ErrorKind::Network,
            Self::ClosedBroadcast(_) => ErrorKind::ClosedBroadcast,
            Self::IncorrectAccount(_) => ErrorKind::IncorrectAccount,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::SendComment(_) => ErrorKind::SendComment,
            Self::UserNotFound(_) => ErrorKind::UserNotFound,
            Self::AlreadyDisconnecting => ErrorKind::AlreadyDisconnecting,
            Self::Other(_) => ErrorKind::Other,
        }
    }

    /// Whether a retry may succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Network
    }

    /// Whether the error must never be retried regardless of budget.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ClosedBroadcast | ErrorKind::IncorrectAccount
        )
    }

    /// Short title for user-facing notifications.
    pub fn title(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Network => "network error",
            ErrorKind::ClosedBroadcast => "broadcast closed",
            ErrorKind::IncorrectAccount => "incorrect account",
            ErrorKind::Protocol => "protocol error",
            ErrorKind::SendComment => "comment not sent",
            ErrorKind::UserNotFound => "user not found",
            ErrorKind::AlreadyDisconnecting => "already disconnecting",
            ErrorKind::Other => "error",
        }
    }

    /// Human-readable description for notifications.
    pub fn description(&self) -> String {
        match self {
            Self::Network(msg) => format!("Could not reach the server. ({msg})"),
            Self::ClosedBroadcast(_) => "The broadcast has already ended.".to_string(),
            Self::IncorrectAccount(_) => {
                "The account was rejected. Check the mail address and password, or log in again."
                    .to_string()
            }
            Self::Protocol(msg) => format!("Unexpected response from the server. ({msg})"),
            Self::SendComment(msg) => format!("The comment was not sent. ({msg})"),
            Self::UserNotFound(id) => format!("No user record for {id}."),
            Self::AlreadyDisconnecting => "The connection is already closing.".to_string(),
            Self::Other(msg) => msg.clone(),
        }
    }
}

impl From<reqwest::Error> for NicoError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            NicoError::Protocol(err.to_string())
        } else {
            NicoError::Network(err.to_string())
        }
    }
}

impl From<std::io::Error> for NicoError {
    fn from(err: std::io::Error) -> Self {
        NicoError::Network(err.to_string())
    }
}
