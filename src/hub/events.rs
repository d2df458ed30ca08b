//! Protocol events to hub events.
//!
//! The comment connection calls [`HubEventReceiver::proceed_nico_event`]
//! from its read loop. The receiver never blocks: every event becomes a
//! `nagome` message pushed onto the hub's unbounded inbound channel and
//! fanned out by the router like any other event.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::config::SettingsSlot;
use crate::logging::Logger;
use crate::message::command::{event, query};
use crate::message::content::{NotificationType, UserRef};
use crate::message::{Domain, Message};
use crate::nicolive::{is_184_user_id, EventReceiver, NicoError, NicoEvent, UserStore};

/// [`EventReceiver`] feeding the hub's inbound channel.
pub struct HubEventReceiver {
    inbound: mpsc::UnboundedSender<Message>,
    users: Arc<dyn UserStore>,
    settings: watch::Receiver<SettingsSlot>,
    log: Logger,
}

impl std::fmt::Debug for HubEventReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubEventReceiver").finish_non_exhaustive()
    }
}

impl HubEventReceiver {
    pub(crate) fn new(
        inbound: mpsc::UnboundedSender<Message>,
        users: Arc<dyn UserStore>,
        settings: watch::Receiver<SettingsSlot>,
        log: Logger,
    ) -> Self {
        Self {
            inbound,
            users,
            settings,
            log,
        }
    }

    fn emit(&self, msg: Message) {
        if self.inbound.send(msg).is_err() {
            log::debug!(target: self.log.target(), "hub is shutting down; event dropped");
        }
    }

    /// Fill in the cached name, or ask the dispatcher to fetch it when
    /// name lookup is on.
    fn resolve_user_name(&self, user_id: &str) -> Option<String> {
        match self.users.fetch(user_id) {
            Ok(user) => Some(user.name),
            Err(NicoError::UserNotFound(_)) => {
                if self.settings.borrow().user_name_get && !is_184_user_id(user_id) {
                    let fetch = UserRef {
                        id: user_id.to_string(),
                    };
                    match Message::new(Domain::Query, query::USER_FETCH, &fetch) {
                        Ok(msg) => self.emit(msg),
                        Err(e) => log::warn!(target: self.log.target(), "could not queue user fetch: {e}"),
                    }
                }
                None
            }
            Err(e) => {
                log::warn!(target: self.log.target(), "user store lookup for {user_id} failed: {e}");
                None
            }
        }
    }
}

impl EventReceiver for HubEventReceiver {
    fn proceed_nico_event(&self, ev: NicoEvent) {
        match ev {
            NicoEvent::CommentOpen => {
                log::info!(target: self.log.target(), "comment thread opened");
            }
            NicoEvent::CommentClose => {
                log::info!(target: self.log.target(), "comment connection closed");
                self.emit(Message::empty(Domain::Nagome, event::BROAD_CLOSE));
            }
            NicoEvent::CommentGot(mut comment) => {
                if let Some(name) = self.resolve_user_name(&comment.user_id) {
                    comment.user_name = name;
                }
                match Message::new(Domain::Nagome, event::COMMENT_GOT, &comment) {
                    Ok(msg) => self.emit(msg),
                    Err(e) => log::warn!(target: self.log.target(), "could not encode comment: {e}"),
                }
            }
            NicoEvent::CommentErr(NicoError::UserNotFound(_)) => {}
            NicoEvent::CommentErr(err) => {
                log::warn!(target: self.log.target(), "comment connection error: {err}");
                self.emit(Message::notification(
                    NotificationType::Warn,
                    err.title(),
                    &err.description(),
                ));
            }
        }
    }
}
