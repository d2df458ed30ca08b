//! Command dispatcher.
//!
//! One task executes every `nagome_query`, `nagome_direct` and
//! `nagome_antenna` message, one at a time, in the order the router
//! received them. It owns the [`HubState`]; handlers borrow it mutably and
//! report back through the inbound channel (events, notifications) or by
//! writing a reply to the requesting plugin.
//!
//! Handler errors are logged here and never stop the loop. Handlers emit
//! their own user-facing notifications before returning an error.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::error::HubError;
use super::state::HubState;
use crate::config;
use crate::constants::{APP_NAME, APP_VERSION, MAIN_PLUGIN_NO};
use crate::logging::Logger;
use crate::message::command::directngm;
use crate::message::content::{AccountSet, AppVersion, NotificationType, PlugEnable, PlugList};
use crate::message::{AntennaCommand, Command, DirectCommand, Domain, Message, QueryCommand};
use crate::nicolive::{NicoApi, NicoError, RetryPolicy, UserFetcher, UserStore};
use crate::plugin::{PluginRegistry, PluginState};

/// Collaborators the dispatcher is built from.
pub(crate) struct DispatcherParts {
    pub(crate) state: HubState,
    pub(crate) registry: Arc<PluginRegistry>,
    pub(crate) inbound: mpsc::UnboundedSender<Message>,
    pub(crate) api: Arc<dyn NicoApi>,
    pub(crate) users: Arc<dyn UserStore>,
    pub(crate) retry: RetryPolicy,
    pub(crate) save_path: PathBuf,
    pub(crate) log: Logger,
}

/// Executes commands against the hub state.
pub(crate) struct Dispatcher {
    pub(super) state: HubState,
    pub(super) registry: Arc<PluginRegistry>,
    pub(super) inbound: mpsc::UnboundedSender<Message>,
    pub(super) api: Arc<dyn NicoApi>,
    pub(super) users: Arc<dyn UserStore>,
    pub(super) fetcher: UserFetcher,
    pub(super) retry: RetryPolicy,
    pub(super) save_path: PathBuf,
    pub(super) log: Logger,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub(crate) fn new(parts: DispatcherParts) -> Self {
        Self {
            fetcher: UserFetcher::new(Arc::clone(&parts.api)),
            state: parts.state,
            registry: parts.registry,
            inbound: parts.inbound,
            api: parts.api,
            users: parts.users,
            retry: parts.retry,
            save_path: parts.save_path,
            log: parts.log,
        }
    }

    /// Execute commands until `quit`, then tear down the live session and
    /// hand the state back.
    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Message>,
        quit: CancellationToken,
    ) -> HubState {
        loop {
            let msg = tokio::select! {
                biased;
                () = quit.cancelled() => break,
                msg = commands.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };
            self.handle(msg).await;
        }

        self.disconnect_session().await;
        log::debug!(target: self.log.target(), "dispatcher exited");
        self.state
    }

    /// Execute one command message, logging any failure.
    pub(crate) async fn handle(&mut self, msg: Message) {
        log::debug!(target: self.log.target(), "command {} {} from {:?}", msg.domain, msg.command, msg.source);
        let result = match Command::decode(&msg) {
            Ok(command) => self.execute(command, msg.source).await,
            Err(e) => Err(HubError::Json(e)),
        };
        if let Err(e) = result {
            log::warn!(target: self.log.target(), "{} {} failed: {e}", msg.domain, msg.command);
        }
    }

    async fn execute(&mut self, command: Command, source: Option<usize>) -> Result<(), HubError> {
        match command {
            Command::Query(query) => self.query(query, source).await,
            Command::Direct(direct) => self.direct(direct, source).await,
            Command::Antenna(AntennaCommand::Got(got)) => self.antenna_got(got),
            Command::Unknown { domain, command } => Err(HubError::UnknownCommand {
                domain: domain.to_string(),
                command,
            }),
        }
    }

    async fn query(&mut self, query: QueryCommand, source: Option<usize>) -> Result<(), HubError> {
        match query {
            QueryCommand::BroadConnect(connect) => self.broad_connect(connect).await,
            QueryCommand::BroadDisconnect => {
                self.disconnect_session().await;
                Ok(())
            }
            QueryCommand::BroadSendComment(comment) => self.broad_send_comment(comment).await,
            QueryCommand::AccountSet(set) => {
                self.account_set(set);
                Ok(())
            }
            QueryCommand::AccountLogin => self.account_login().await,
            QueryCommand::AccountLoad => self.account_load(),
            QueryCommand::AccountSave => self.account_save(),
            QueryCommand::LogPrint(print) => {
                let name = source
                    .and_then(|no| self.registry.get(no))
                    .map(|p| p.name().to_string())
                    .unwrap_or_default();
                log::info!(target: self.log.target(), "plug[{name}] {}", print.text);
                Ok(())
            }
            QueryCommand::SettingsSetCurrent(slot) => {
                self.state.set_settings(slot);
                self.apply_plugin_states().await;
                Ok(())
            }
            QueryCommand::SettingsSetAll(slots) => {
                self.state.slots = slots;
                Ok(())
            }
            QueryCommand::PlugEnable(enable) => self.plug_enable(enable).await,
            QueryCommand::UserSet(user) => self.user_set(user),
            QueryCommand::UserSetName(set) => self.user_set_name(set).await,
            QueryCommand::UserDelete(user) => self.user_delete(&user.id),
            QueryCommand::UserFetch(user) => self.user_fetch(&user.id).await,
        }
    }

    async fn direct(&mut self, direct: DirectCommand, source: Option<usize>) -> Result<(), HubError> {
        match direct {
            DirectCommand::No(_) => {
                log::debug!(target: self.log.target(), "ignoring Direct.No after handshake from {source:?}");
                Ok(())
            }
            DirectCommand::PlugList => {
                let list = PlugList {
                    plugins: self.registry.all().iter().map(|p| p.info()).collect(),
                };
                self.reply(source, directngm::PLUG_LIST, &list).await
            }
            DirectCommand::SettingsCurrent => {
                let current = self.state.settings().clone();
                self.reply(source, directngm::SETTINGS_CURRENT, &current).await
            }
            DirectCommand::SettingsAll => {
                let slots = self.state.slots.clone();
                self.reply(source, directngm::SETTINGS_ALL, &slots).await
            }
            DirectCommand::AppVersion => {
                let version = AppVersion {
                    name: APP_NAME.to_string(),
                    version: APP_VERSION.to_string(),
                };
                self.reply(source, directngm::APP_VERSION, &version).await
            }
            DirectCommand::UserGet(user) => self.user_get(&user.id, source).await,
        }
    }

    // ========================================================================
    // Outputs
    // ========================================================================

    /// Queue a `nagome` event for fan-out.
    pub(super) fn emit<T: Serialize>(&self, command: &str, content: &T) -> Result<(), HubError> {
        let msg = Message::new(Domain::Nagome, command, content)?;
        self.send_inbound(msg);
        Ok(())
    }

    /// Queue a `UI.Notification`.
    pub(super) fn notify(&self, kind: NotificationType, title: &str, description: &str) {
        self.send_inbound(Message::notification(kind, title, description));
    }

    /// Queue a warning notification describing a protocol error.
    pub(super) fn notify_nico_error(&self, err: &NicoError) {
        self.notify(NotificationType::Warn, err.title(), &err.description());
    }

    pub(super) fn send_inbound(&self, msg: Message) {
        if self.inbound.send(msg).is_err() {
            log::debug!(target: self.log.target(), "inbound channel closed; message dropped");
        }
    }

    /// Send a `nagome_directngm` reply to the plugin that asked.
    pub(super) async fn reply<T: Serialize>(
        &self,
        source: Option<usize>,
        command: &str,
        content: &T,
    ) -> Result<(), HubError> {
        let Some(no) = source else {
            log::debug!(target: self.log.target(), "{command} reply has no requesting plugin");
            return Ok(());
        };
        let plugin = self.registry.get(no).ok_or(HubError::NoSuchPlugin(no))?;
        let msg = Message::new(Domain::Directngm, command, content)?;
        plugin.write_message(&msg).await?;
        Ok(())
    }

    // ========================================================================
    // Account
    // ========================================================================

    fn account_set(&mut self, set: AccountSet) {
        let account = &mut self.state.account;
        if !set.mail.is_empty() {
            account.mail = set.mail;
        }
        if !set.pass.is_empty() {
            account.pass = set.pass;
        }
        if !set.usersession.is_empty() {
            account.usersession = set.usersession;
        }
    }

    async fn account_login(&mut self) -> Result<(), HubError> {
        let mut account = self.state.account.clone();
        match self.api.login(&mut account).await {
            Ok(()) => {
                self.state.account = account;
                log::info!(target: self.log.target(), "logged in");
                self.notify(NotificationType::Info, "login succeeded", "login succeeded");
                Ok(())
            }
            Err(e) => {
                self.notify(NotificationType::Warn, "login error", &e.description());
                Err(e.into())
            }
        }
    }

    fn account_load(&mut self) -> Result<(), HubError> {
        match config::load_account(&config::account_path(&self.save_path)) {
            Ok(account) => {
                self.state.account = account;
                Ok(())
            }
            Err(e) => {
                self.notify(NotificationType::Warn, "account load failed", &format!("{e:#}"));
                Err(e.into())
            }
        }
    }

    fn account_save(&self) -> Result<(), HubError> {
        config::save_account(&config::account_path(&self.save_path), &self.state.account).map_err(|e| {
            self.notify(NotificationType::Warn, "account save failed", &format!("{e:#}"));
            HubError::from(e)
        })
    }

    // ========================================================================
    // Plugins
    // ========================================================================

    /// Bring every running plugin in line with `plugin_disable`. The main
    /// plugin is left alone.
    async fn apply_plugin_states(&self) {
        for plugin in self.registry.all() {
            if plugin.no() == Some(MAIN_PLUGIN_NO) || plugin.state() == PluginState::Closed {
                continue;
            }
            let enabled = self.state.settings().plugin_enabled(plugin.name());
            if let Err(e) = plugin.set_state(enabled).await {
                log::debug!(target: self.log.target(), "could not update [{}]: {e}", plugin.name());
            }
        }
    }

    async fn plug_enable(&mut self, enable: PlugEnable) -> Result<(), HubError> {
        let plugin = self
            .registry
            .get(enable.no)
            .ok_or(HubError::NoSuchPlugin(enable.no))?;
        plugin.set_state(enable.enable).await?;
        let name = plugin.name().to_string();
        self.state.update_settings(|s| {
            s.plugin_disable.insert(name, !enable.enable);
        });
        Ok(())
    }
}
