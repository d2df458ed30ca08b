//! Hub state owned by the command dispatcher.
//!
//! Only the dispatcher task touches a [`HubState`]; every mutation happens
//! while executing one command, so commands see each other's effects in
//! inbound order without any locking.

use tokio::sync::watch;

use crate::config::{SettingsSlot, SettingsSlots};
use crate::nicolive::{Account, CommentConnection, LiveWaku};

/// The one live broadcast session.
#[derive(Debug)]
pub struct LiveSession {
    /// Comment connection for the broadcast.
    pub comment: CommentConnection,
    /// Owner-comment token when the account owns the broadcast.
    pub owner_token: Option<String>,
}

impl LiveSession {
    /// The broadcast.
    pub fn waku(&self) -> &LiveWaku {
        self.comment.waku()
    }
}

/// Account, settings and live session.
pub struct HubState {
    /// Credentials used for every protocol call.
    pub account: Account,
    /// Settings in effect.
    current: SettingsSlot,
    /// All saved settings slots.
    pub slots: SettingsSlots,
    /// Zero or one live session.
    pub session: Option<LiveSession>,
    settings_tx: watch::Sender<SettingsSlot>,
}

impl std::fmt::Debug for HubState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubState")
            .field("account", &self.account)
            .field("settings", &self.current.name)
            .field("session", &self.session.as_ref().map(|s| &s.waku().broad_id))
            .finish_non_exhaustive()
    }
}

impl HubState {
    /// State starting from slot 0 of `slots`.
    pub fn new(account: Account, slots: SettingsSlots) -> Self {
        let current = slots.initial();
        let (settings_tx, _) = watch::channel(current.clone());
        Self {
            account,
            current,
            slots,
            session: None,
            settings_tx,
        }
    }

    /// Settings in effect.
    pub fn settings(&self) -> &SettingsSlot {
        &self.current
    }

    /// Replace the settings in effect.
    pub fn set_settings(&mut self, settings: SettingsSlot) {
        self.current = settings;
        self.publish();
    }

    /// Edit the settings in effect.
    pub fn update_settings(&mut self, edit: impl FnOnce(&mut SettingsSlot)) {
        edit(&mut self.current);
        self.publish();
    }

    fn publish(&self) {
        self.settings_tx.send_replace(self.current.clone());
    }

    /// Live view of the settings for tasks outside the dispatcher.
    pub fn watch_settings(&self) -> watch::Receiver<SettingsSlot> {
        self.settings_tx.subscribe()
    }

    /// Slots to persist on exit, with the current settings folded into
    /// slot 0 when they ask for it.
    pub fn slots_to_save(&self) -> SettingsSlots {
        let mut slots = self.slots.clone();
        slots.apply_auto_save(&self.current);
        slots
    }
}
