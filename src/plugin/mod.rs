//! Plugin lifecycle.
//!
//! A [`Plugin`] is one external program talking newline-delimited JSON
//! [`Message`]s over a [`Transport`]. Its state machine:
//!
//! ```text
//!            open(enabled)            set_state
//! Closed ─────────────────► Enabled ◄──────────► Disabled
//! (fresh)                      │                     │
//!                              └──── stream end / close() ────► Closed (spent)
//! ```
//!
//! Closed is terminal: a spent plugin never reopens. The registry puts a
//! fresh `Plugin` with the same manifest and index in its slot when a TCP
//! plugin reconnects.
//!
//! While open, one pump task per plugin moves traffic in both directions
//! (see [`pump`]). Only Enabled plugins exchange messages; traffic to or
//! from a Disabled plugin is dropped.

pub mod manifest;
mod pump;
pub mod registry;
pub mod transport;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

pub use manifest::{PluginManifest, PluginMethod};
pub use registry::PluginRegistry;
pub use transport::{process_stdio, StdioTransport, Transport};

use crate::constants::PLUGIN_OUTBOUND_QUEUE_DEPTH;
use crate::logging::Logger;
use crate::message::content::PlugInfo;
use crate::message::{Domain, Message};

/// Lifecycle state of a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    /// Not running (never opened, or spent).
    Closed,
    /// Running and exchanging messages.
    Enabled,
    /// Running; traffic is dropped.
    Disabled,
}

/// Plugin setup and I/O errors.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The plugin has no index yet.
    #[error("plugin \"{0}\" is not registered")]
    NotRegistered(String),

    /// The manifest has no name.
    #[error("plugin has no name")]
    NoName,

    /// `open` was called on a plugin that was already opened.
    #[error("plugin \"{0}\" was already opened")]
    AlreadyOpened(String),

    /// The plugin is closed.
    #[error("plugin \"{0}\" is closed")]
    Closed(String),

    /// The plugin program could not be started.
    #[error("could not start plugin \"{name}\": {reason}")]
    Spawn {
        /// Plugin name.
        name: String,
        /// What went wrong.
        reason: String,
    },

    /// A TCP plugin did not identify itself correctly.
    #[error("plugin handshake failed: {0}")]
    Handshake(String),

    /// The manifest could not be read or is invalid.
    #[error("invalid plugin manifest: {0}")]
    Manifest(String),

    /// A message could not be serialized.
    #[error("could not encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Request sent to the pump to change state.
#[derive(Debug)]
struct StateRequest {
    enabled: bool,
    ack: oneshot::Sender<()>,
}

/// Channels into a running pump.
#[derive(Debug, Clone)]
struct PumpHandle {
    outbound: mpsc::Sender<Arc<str>>,
    state: mpsc::Sender<StateRequest>,
}

/// One external plugin.
pub struct Plugin {
    manifest: PluginManifest,
    subscriptions: HashSet<Domain>,
    no: OnceLock<usize>,
    state: Mutex<PluginState>,
    opened: AtomicBool,
    handle: Mutex<Option<PumpHandle>>,
    quit: CancellationToken,
    exited: CancellationToken,
    /// Next fan-out ticket to hand out.
    next_ticket: AtomicU64,
    /// Tickets below this value have been delivered.
    served: watch::Sender<u64>,
    log: Logger,
}

impl std::fmt::Debug for Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin")
            .field("name", &self.manifest.name)
            .field("no", &self.no.get())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Plugin {
    /// Unregistered, closed plugin for `manifest`.
    pub fn new(manifest: PluginManifest, log: &Logger) -> Self {
        let subscriptions = manifest
            .subscribe
            .iter()
            .map(|d| Domain::from(d.as_str()))
            .collect();
        let log = log.scoped(if manifest.name.is_empty() { "unnamed" } else { &manifest.name });
        Self {
            manifest,
            subscriptions,
            no: OnceLock::new(),
            state: Mutex::new(PluginState::Closed),
            opened: AtomicBool::new(false),
            handle: Mutex::new(None),
            quit: CancellationToken::new(),
            exited: CancellationToken::new(),
            next_ticket: AtomicU64::new(0),
            served: watch::channel(0).0,
            log,
        }
    }

    /// Bind the plugin to registry slot `no`. Later calls are ignored.
    pub(crate) fn assign_no(&self, no: usize) {
        if self.no.set(no).is_err() {
            log::warn!(target: self.log.target(), "index already assigned; keeping {:?}", self.no.get());
        }
    }

    /// Registry index, if registered.
    pub fn no(&self) -> Option<usize> {
        self.no.get().copied()
    }

    /// Plugin name.
    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    /// Manifest the plugin was created from.
    pub fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    /// Current state.
    pub fn state(&self) -> PluginState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(PluginState::Closed)
    }

    fn set_state_value(&self, state: PluginState) {
        if let Ok(mut s) = self.state.lock() {
            *s = state;
        }
    }

    /// Whether `open` was ever called successfully.
    pub(crate) fn was_opened(&self) -> bool {
        self.opened.load(Ordering::SeqCst)
    }

    /// Whether the plugin was opened and has since closed.
    pub fn is_spent(&self) -> bool {
        self.opened.load(Ordering::SeqCst) && self.state() == PluginState::Closed
    }

    /// Whether broadcast messages of `domain` go to this plugin.
    pub fn is_subscribed(&self, domain: &Domain) -> bool {
        self.subscriptions.contains(domain)
    }

    /// `Plug.List` entry for this plugin.
    pub fn info(&self) -> PlugInfo {
        PlugInfo {
            no: self.no().unwrap_or_default(),
            name: self.manifest.name.clone(),
            description: self.manifest.description.clone(),
            version: self.manifest.version.clone(),
            author: self.manifest.author.clone(),
            subscribe: self.manifest.subscribe.clone(),
            state: self.state(),
        }
    }

    /// Attach a transport and start the pump.
    ///
    /// Messages read from the plugin go to `inbound`, tagged with the
    /// plugin's index. If this is the main plugin, losing it cancels
    /// `hub_quit`.
    ///
    /// # Errors
    ///
    /// Rejects unregistered or unnamed plugins and plugins that were
    /// opened before. Returns [`PluginError::Closed`] once the plugin or
    /// the hub is shutting down.
    pub fn open(
        self: &Arc<Self>,
        transport: Transport,
        enabled: bool,
        inbound: mpsc::UnboundedSender<Message>,
        hub_quit: CancellationToken,
    ) -> Result<(), PluginError> {
        let Some(no) = self.no() else {
            return Err(PluginError::NotRegistered(self.manifest.name.clone()));
        };
        if self.manifest.name.is_empty() {
            return Err(PluginError::NoName);
        }
        if self.opened.swap(true, Ordering::SeqCst) {
            return Err(PluginError::AlreadyOpened(self.manifest.name.clone()));
        }
        if self.quit.is_cancelled() || hub_quit.is_cancelled() {
            self.exited.cancel();
            return Err(PluginError::Closed(self.manifest.name.clone()));
        }

        let (outbound_tx, outbound_rx) = mpsc::channel(PLUGIN_OUTBOUND_QUEUE_DEPTH);
        let (state_tx, state_rx) = mpsc::channel(1);
        if let Ok(mut handle) = self.handle.lock() {
            *handle = Some(PumpHandle {
                outbound: outbound_tx,
                state: state_tx,
            });
        }

        let initial = if enabled {
            PluginState::Enabled
        } else {
            PluginState::Disabled
        };
        self.set_state_value(initial);

        tokio::spawn(pump::run(pump::PumpContext {
            plugin: Arc::clone(self),
            no,
            transport,
            outbound: outbound_rx,
            state_requests: state_rx,
            inbound,
            hub_quit,
        }));

        log::info!(target: self.log.target(), "opened plugin [{}] as #{no}", self.manifest.name);
        Ok(())
    }

    fn pump_handle(&self) -> Option<PumpHandle> {
        self.handle.lock().ok().and_then(|h| h.clone())
    }

    /// Queue one serialized line (newline included) for the plugin.
    ///
    /// Blocks while the outbound queue is full. Lines for a plugin that is
    /// not Enabled are dropped and `Ok` is returned.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Closed`] if the plugin is closed or closes
    /// while waiting.
    pub async fn write_line(&self, line: Arc<str>) -> Result<(), PluginError> {
        match self.state() {
            PluginState::Enabled => {}
            PluginState::Disabled => return Ok(()),
            PluginState::Closed => return Err(PluginError::Closed(self.manifest.name.clone())),
        }
        let Some(handle) = self.pump_handle() else {
            return Err(PluginError::Closed(self.manifest.name.clone()));
        };

        tokio::select! {
            biased;
            () = self.quit.cancelled() => Err(PluginError::Closed(self.manifest.name.clone())),
            sent = handle.outbound.send(line) => {
                sent.map_err(|_| PluginError::Closed(self.manifest.name.clone()))
            }
        }
    }

    /// Reserve a place in this plugin's event order. Every ticket must be
    /// passed to [`Plugin::write_line_in_order`] exactly once.
    pub(crate) fn take_ticket(&self) -> u64 {
        self.next_ticket.fetch_add(1, Ordering::SeqCst)
    }

    /// [`Plugin::write_line`], but only after every earlier ticket has been
    /// written. Lets several router workers fan out concurrently while each
    /// plugin still sees events in the order they were dequeued.
    pub(crate) async fn write_line_in_order(
        &self,
        ticket: u64,
        line: Arc<str>,
    ) -> Result<(), PluginError> {
        let mut served = self.served.subscribe();
        let ready = tokio::select! {
            biased;
            () = self.quit.cancelled() => false,
            turn = served.wait_for(|&next| next == ticket) => turn.is_ok(),
        };
        if !ready {
            return Err(PluginError::Closed(self.manifest.name.clone()));
        }

        let result = self.write_line(line).await;
        self.served.send_modify(|next| *next += 1);
        result
    }

    /// Serialize and queue one message. See [`Plugin::write_line`].
    pub async fn write_message(&self, msg: &Message) -> Result<(), PluginError> {
        let line = msg.to_line()?;
        self.write_line(Arc::from(line)).await
    }

    /// Enable or disable the plugin. The plugin is told about the change.
    ///
    /// Returns once the pump has applied the change.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Closed`] if the plugin is not running.
    pub async fn set_state(&self, enabled: bool) -> Result<(), PluginError> {
        let closed = || PluginError::Closed(self.manifest.name.clone());
        if self.state() == PluginState::Closed {
            return Err(closed());
        }
        let handle = self.pump_handle().ok_or_else(closed)?;

        let (ack_tx, ack_rx) = oneshot::channel();
        let request = StateRequest {
            enabled,
            ack: ack_tx,
        };
        tokio::select! {
            biased;
            () = self.quit.cancelled() => return Err(closed()),
            sent = handle.state.send(request) => sent.map_err(|_| closed())?,
        }
        tokio::select! {
            biased;
            () = self.exited.cancelled() => Err(closed()),
            acked = ack_rx => acked.map_err(|_| closed()),
        }
    }

    /// Stop the pump without waiting for it. Writers blocked on this
    /// plugin fail with [`PluginError::Closed`] right away; await
    /// [`Plugin::close`] for the pump to be gone.
    pub fn interrupt(&self) {
        self.quit.cancel();
    }

    /// Stop the pump and wait for it to exit. Safe to call any number of
    /// times, from any number of tasks.
    pub async fn close(&self) {
        self.quit.cancel();
        if self.opened.load(Ordering::SeqCst) {
            self.exited.cancelled().await;
        } else {
            self.exited.cancel();
        }
        self.set_state_value(PluginState::Closed);
    }

    /// Resolves once the plugin has closed.
    pub async fn closed(&self) {
        self.exited.cancelled().await;
    }
}
