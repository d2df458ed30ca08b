//! Events emitted by the comment connection.

use super::comment::Comment;
use super::error::NicoError;

/// Event raised by the protocol layer.
#[derive(Debug, Clone, PartialEq)]
pub enum NicoEvent {
    /// The comment thread was opened.
    CommentOpen,
    /// The comment connection is gone.
    CommentClose,
    /// A comment arrived.
    CommentGot(Comment),
    /// The connection reported an error. Temporary errors keep the
    /// connection alive; permanent ones are followed by `CommentClose`.
    CommentErr(NicoError),
}

/// Receiver of protocol events.
///
/// Called synchronously from the connection's read loop: the loop does not
/// read the next frame until this returns.
pub trait EventReceiver: Send + Sync {
    /// Handle one event.
    fn proceed_nico_event(&self, event: NicoEvent);
}

/// Receiver that records every event.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingEventReceiver {
    events: std::sync::Mutex<Vec<NicoEvent>>,
}

#[cfg(test)]
impl RecordingEventReceiver {
    /// Snapshot of recorded events.
    pub(crate) fn events(&self) -> Vec<NicoEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
impl EventReceiver for RecordingEventReceiver {
    fn proceed_nico_event(&self, event: NicoEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
