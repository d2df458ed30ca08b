//! Broadcast commands: connect (with retry), disconnect, send comment and
//! antenna auto-follow.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;

use super::dispatch::Dispatcher;
use super::error::HubError;
use super::events::HubEventReceiver;
use super::state::LiveSession;
use crate::message::command::{event, query};
use crate::message::content::{AntennaGot, BroadConnect, BroadSendComment, NotificationType, SendCommentType};
use crate::message::{Domain, Message};
use crate::nicolive::{CommentConnection, NicoError, RetryDecision};

static BROAD_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(lv|co)\d+").expect("invalid broadcast ID regex"));

/// First broadcast ID in free text (a URL, a bare ID, …).
pub(crate) fn extract_broad_id(text: &str) -> Option<&str> {
    BROAD_ID.find(text).map(|m| m.as_str())
}

impl Dispatcher {
    pub(super) async fn broad_connect(&mut self, connect: BroadConnect) -> Result<(), HubError> {
        let Some(broad_id) = extract_broad_id(&connect.broad_id).map(str::to_string) else {
            self.notify(
                NotificationType::Warn,
                "invalid BroadID",
                "no valid BroadID found in the ID text",
            );
            return Err(HubError::InvalidBroadId(connect.broad_id));
        };

        let waku = match self.api.fetch_information(&broad_id, &self.state.account).await {
            Ok(waku) => waku,
            Err(err) => {
                log::warn!(target: self.log.target(), "failed to connect to {broad_id} (attempt {}): {err}", connect.retry_n + 1);
                return match self.retry.decide(connect.retry_n, &err) {
                    RetryDecision::Retry { next_retry_n, delay } => {
                        log::info!(target: self.log.target(), "retrying {broad_id} in {delay:?}");
                        self.requeue_connect(
                            BroadConnect {
                                broad_id: connect.broad_id,
                                retry_n: next_retry_n,
                            },
                            delay,
                        );
                        Ok(())
                    }
                    RetryDecision::GiveUp => {
                        if err.is_retryable() {
                            log::warn!(target: self.log.target(), "reached the retry limit for {broad_id}");
                        }
                        self.notify_nico_error(&err);
                        Err(err.into())
                    }
                };
            }
        };

        // At most one session: the old one is gone before the new one dials.
        self.disconnect_session().await;

        let events = Arc::new(HubEventReceiver::new(
            self.inbound.clone(),
            Arc::clone(&self.users),
            self.state.watch_settings(),
            self.log.scoped("events"),
        ));
        let comment = match CommentConnection::connect(
            waku,
            self.state.account.clone(),
            Arc::clone(&self.api),
            events,
            self.log.scoped(&broad_id),
        )
        .await
        {
            Ok(comment) => comment,
            Err(err) => {
                self.notify_nico_error(&err);
                return Err(err.into());
            }
        };

        let owner_token = if comment.waku().is_user_owner() {
            match self.api.publish_status(&broad_id, &self.state.account).await {
                Ok(token) => Some(token),
                Err(err) => {
                    log::warn!(target: self.log.target(), "no owner comment token for {broad_id}: {err}");
                    self.notify_nico_error(&err);
                    None
                }
            }
        } else {
            None
        };

        self.emit(event::BROAD_OPEN, comment.waku())?;
        self.state.session = Some(LiveSession {
            comment,
            owner_token,
        });
        log::info!(target: self.log.target(), "connected to {broad_id}");
        Ok(())
    }

    /// Put `Broad.Connect` back on the inbound channel after `delay`.
    fn requeue_connect(&self, connect: BroadConnect, delay: Duration) {
        let msg = match Message::new(Domain::Query, query::BROAD_CONNECT, &connect) {
            Ok(msg) => msg,
            Err(e) => {
                log::warn!(target: self.log.target(), "could not requeue connect: {e}");
                return;
            }
        };
        let inbound = self.inbound.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Closed means the hub is shutting down.
            let _ = inbound.send(msg);
        });
    }

    /// Tear down the live session, if any. Waits until the connection's
    /// read loop has exited.
    pub(super) async fn disconnect_session(&mut self) {
        let Some(session) = self.state.session.take() else {
            return;
        };
        let broad_id = session.waku().broad_id.clone();
        match session.comment.disconnect().await {
            Ok(()) => log::info!(target: self.log.target(), "disconnected from {broad_id}"),
            Err(NicoError::AlreadyDisconnecting) => {
                log::debug!(target: self.log.target(), "{broad_id} is already disconnecting");
            }
            Err(e) => log::warn!(target: self.log.target(), "disconnect from {broad_id} failed: {e}"),
        }
    }

    pub(super) async fn broad_send_comment(&mut self, send: BroadSendComment) -> Result<(), HubError> {
        let Some(session) = &self.state.session else {
            let err = NicoError::SendComment("not connected to live".to_string());
            self.notify_nico_error(&err);
            return Err(HubError::NotConnected);
        };

        let waku = session.waku();
        let as_owner = waku.is_user_owner()
            && match send.kind {
                SendCommentType::Auto => self.state.settings().owner_comment,
                SendCommentType::Owner => true,
                SendCommentType::Viewer => false,
            };

        let result = if as_owner {
            match session.owner_token.as_deref() {
                Some(token) => {
                    self.api
                        .comment_owner(&waku.broad_id, token, &send.text, &self.state.account)
                        .await
                }
                None => Err(NicoError::SendComment(
                    "no owner comment token; reconnect to the broadcast".to_string(),
                )),
            }
        } else {
            session.comment.send_comment(&send.text, send.iyayo).await
        };

        result.map_err(|err| {
            self.notify_nico_error(&err);
            HubError::from(err)
        })
    }

    pub(super) fn antenna_got(&self, got: AntennaGot) -> Result<(), HubError> {
        if !self.state.settings().auto_follow_next_waku {
            return Ok(());
        }
        let Some(session) = &self.state.session else {
            return Ok(());
        };
        if session.waku().stream.community_id != got.community_id {
            return Ok(());
        }

        log::info!(target: self.log.target(), "following to {}", got.broad_id);
        let connect = BroadConnect {
            broad_id: got.broad_id,
            retry_n: 0,
        };
        self.send_inbound(Message::new(Domain::Query, query::BROAD_CONNECT, &connect)?);
        Ok(())
    }
}
