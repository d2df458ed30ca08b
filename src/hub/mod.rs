//! Hub - owns the plugins, the live session and the account.
//!
//! # Architecture
//!
//! ```text
//!   main plugin (stdio)   std plugins   tcp plugins ◄── listener
//!            │                 │             │
//!            └────── pumps ────┴─────────────┘
//!                       │  ▲
//!                inbound│  │outbound queues (depth 3)
//!                       ▼  │
//!                ┌─────────────────┐   commands   ┌────────────┐
//!                │ router workers  ├─────────────►│ dispatcher │──► HubState
//!                │   (5, fan-out)  │◄─────────────┤            │    (account,
//!                └─────────────────┘ events,      └─────┬──────┘     settings,
//!                       ▲            notifications      │            session)
//!                       │                               ▼
//!                       └──── comment events ◄── live connection
//! ```
//!
//! # Shutdown
//!
//! Losing the main plugin, a write failure to it, or [`HubHandle::quit`]
//! cancels the quit token. [`Hub::run`] then interrupts every plugin,
//! stops the listener and waits out pending TCP handshakes, joins the
//! dispatcher (which disconnects the live session), closes every plugin
//! and joins the router workers before returning the final [`HubState`].
//!
//! # Usage
//!
//! ```ignore
//! let hub = Hub::new(options).await?;
//! let state = hub.run(process_stdio()).await?;
//! ```

mod broad;
mod dispatch;
pub mod error;
mod events;
pub mod lifecycle;
pub mod state;
mod users;
mod workers;

pub use error::HubError;
pub use lifecycle::{discover_plugins, DiscoveredPlugin};
pub use state::{HubState, LiveSession};

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::SettingsSlots;
use crate::constants::ROUTER_WORKER_COUNT;
use crate::logging::Logger;
use crate::message::Message;
use crate::nicolive::{Account, NicoApi, RetryPolicy, UserStore};
use crate::plugin::{Plugin, PluginManifest, PluginRegistry, Transport};

use dispatch::{Dispatcher, DispatcherParts};
use lifecycle::Launcher;
use workers::RouterContext;

/// Everything a hub is built from.
pub struct HubOptions {
    /// Save directory (settings, account, plugins).
    pub save_path: PathBuf,
    /// Port for TCP plugins; `None` disables the listener. Port 0 binds
    /// any free port.
    pub tcp_port: Option<u16>,
    /// Initial account.
    pub account: Account,
    /// Settings slots; slot 0 becomes the current settings.
    pub settings: SettingsSlots,
    /// Broadcast site client.
    pub api: Arc<dyn NicoApi>,
    /// User record store.
    pub users: Arc<dyn UserStore>,
    /// Retry policy for `Broad.Connect`.
    pub retry: RetryPolicy,
    /// Root logger.
    pub log: Logger,
}

impl std::fmt::Debug for HubOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubOptions")
            .field("save_path", &self.save_path)
            .field("tcp_port", &self.tcp_port)
            .finish_non_exhaustive()
    }
}

/// Cloneable handle for stopping a running hub.
#[derive(Debug, Clone)]
pub struct HubHandle {
    quit: CancellationToken,
}

impl HubHandle {
    /// Ask the hub to shut down.
    pub fn quit(&self) {
        self.quit.cancel();
    }

    /// Resolves once shutdown has been requested.
    pub async fn quitting(&self) {
        self.quit.cancelled().await;
    }
}

/// The plugin hub.
pub struct Hub {
    state: HubState,
    registry: Arc<PluginRegistry>,
    main: Arc<Plugin>,
    plugin_dirs: HashMap<usize, PathBuf>,
    listener: Option<TcpListener>,
    inbound_tx: mpsc::UnboundedSender<Message>,
    inbound_rx: mpsc::UnboundedReceiver<Message>,
    api: Arc<dyn NicoApi>,
    users: Arc<dyn UserStore>,
    retry: RetryPolicy,
    save_path: PathBuf,
    quit: CancellationToken,
    plugin_log: Logger,
    log: Logger,
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("plugins", &self.registry.len())
            .field("tcp_addr", &self.tcp_addr())
            .finish_non_exhaustive()
    }
}

impl Hub {
    /// Register the main plugin and bind the TCP listener if asked to.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Io`] if the listener cannot be bound.
    pub async fn new(options: HubOptions) -> Result<Self, HubError> {
        let log = options.log;
        let plugin_log = log.scoped("plugin");
        let registry = Arc::new(PluginRegistry::new());
        let main = registry.register(Plugin::new(PluginManifest::main(), &plugin_log));

        let listener = match options.tcp_port {
            Some(port) => {
                let listener = TcpListener::bind(("127.0.0.1", port)).await?;
                log::info!(target: log.target(), "listening for plugins on {}", listener.local_addr()?);
                Some(listener)
            }
            None => None,
        };

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Ok(Self {
            state: HubState::new(options.account, options.settings),
            registry,
            main,
            plugin_dirs: HashMap::new(),
            listener,
            inbound_tx,
            inbound_rx,
            api: options.api,
            users: options.users,
            retry: options.retry,
            save_path: options.save_path,
            quit: CancellationToken::new(),
            plugin_log,
            log,
        })
    }

    /// Handle for stopping the hub from another task.
    pub fn handle(&self) -> HubHandle {
        HubHandle {
            quit: self.quit.clone(),
        }
    }

    /// Address of the plugin listener, if bound.
    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// The plugin registry.
    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// Register a plugin to be launched from `dir` when the hub runs.
    pub fn add_plugin(&mut self, manifest: PluginManifest, dir: PathBuf) -> Arc<Plugin> {
        let plugin = self.registry.register(Plugin::new(manifest, &self.plugin_log));
        if let Some(no) = plugin.no() {
            self.plugin_dirs.insert(no, dir);
        }
        plugin
    }

    /// Register every plugin found under the save directory.
    pub fn load_plugins(&mut self) {
        for found in discover_plugins(&self.save_path, &self.log) {
            let plugin = self.add_plugin(found.manifest, found.dir);
            log::info!(target: self.log.target(), "loaded plugin [{}] as #{:?}", plugin.name(), plugin.no());
        }
    }

    /// Run until shutdown with `main` as the main plugin's transport.
    /// Returns the final state for the caller to persist.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Task`] if the dispatcher panicked, in which case
    /// the state is lost.
    pub async fn run(self, main: Transport) -> Result<HubState, HubError> {
        let Self {
            state,
            registry,
            main: main_plugin,
            plugin_dirs,
            listener,
            inbound_tx,
            inbound_rx,
            api,
            users,
            retry,
            save_path,
            quit,
            plugin_log,
            log,
        } = self;

        if let Err(e) = main_plugin.open(main, true, inbound_tx.clone(), quit.clone()) {
            log::error!(target: log.target(), "could not open the main plugin: {e}");
            quit.cancel();
        }

        let launcher = Arc::new(Launcher::new(
            Arc::clone(&registry),
            inbound_tx.clone(),
            quit.clone(),
            state.watch_settings(),
            plugin_log,
            log.scoped("launcher"),
        ));
        let tcp_port = listener
            .as_ref()
            .and_then(|l| l.local_addr().ok())
            .map(|addr| addr.port());
        let listener_task = listener.map(|l| tokio::spawn(Arc::clone(&launcher).accept_loop(l)));

        for (no, dir) in &plugin_dirs {
            let Some(plugin) = registry.get(*no) else { continue };
            if let Err(e) = launcher.launch(&plugin, dir, tcp_port) {
                log::warn!(target: log.target(), "could not start plugin [{}]: {e}", plugin.name());
            }
        }

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let workers = workers::spawn_workers(
            &RouterContext {
                inbound: Arc::new(Mutex::new(inbound_rx)),
                commands: commands_tx,
                registry: Arc::clone(&registry),
                quit: quit.clone(),
                log: log.scoped("router"),
            },
            ROUTER_WORKER_COUNT,
        );

        let dispatcher = Dispatcher::new(DispatcherParts {
            state,
            registry: Arc::clone(&registry),
            inbound: inbound_tx,
            api,
            users,
            retry,
            save_path,
            log: log.scoped("dispatch"),
        });
        let dispatcher_task = tokio::spawn(dispatcher.run(commands_rx, quit.clone()));

        log::info!(target: log.target(), "hub running with {} plugins", registry.len());
        quit.cancelled().await;
        log::info!(target: log.target(), "shutting down");

        // Fail writes stuck on full plugin queues so the dispatcher and the
        // workers can finish.
        for plugin in registry.all() {
            plugin.interrupt();
        }
        if let Some(task) = listener_task {
            if let Err(e) = task.await {
                log::warn!(target: log.target(), "listener task failed: {e}");
            }
        }
        launcher.finish_handshakes().await;

        // The dispatcher disconnects the live session on its way out.
        let state = dispatcher_task.await;
        join_all(registry.all().iter().map(|p| p.close())).await;
        for result in join_all(workers).await {
            if let Err(e) = result {
                log::warn!(target: log.target(), "router worker failed: {e}");
            }
        }
        drop(launcher);

        log::info!(target: log.target(), "hub stopped");
        Ok(state?)
    }
}
