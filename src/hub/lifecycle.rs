//! Plugin discovery and transport acquisition.
//!
//! Plugins live in `<save dir>/plugin/<folder>/plugin.yml`. At startup
//! every compatible manifest is registered (after the main plugin, so
//! indexes start at 1) and launched:
//!
//! - `std`: the `exec` command is spawned in the plugin folder with piped
//!   stdio, and the pipes become the plugin's transport.
//! - `tcp`: the `exec` command (if any) is spawned with `{{port}}` and
//!   `{{no}}` filled in. The plugin then dials the hub's listener and
//!   identifies itself with `Direct.No` as its first line.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::SettingsSlot;
use crate::constants::{APP_VERSION, PLUGIN_DIR_NAME, PLUGIN_HANDSHAKE_TIMEOUT};
use crate::logging::Logger;
use crate::message::{Command as HubCommand, DirectCommand, Message};
use crate::plugin::{
    Plugin, PluginError, PluginManifest, PluginMethod, PluginRegistry, StdioTransport,
};

/// A manifest found on disk, with the folder it came from.
#[derive(Debug, Clone)]
pub struct DiscoveredPlugin {
    /// Plugin folder; the working directory of its process.
    pub dir: PathBuf,
    /// Parsed manifest.
    pub manifest: PluginManifest,
}

/// Read every compatible manifest under `<save_path>/plugin`, ordered by
/// folder name. Broken or incompatible plugins are skipped with a warning.
pub fn discover_plugins(save_path: &Path, log: &Logger) -> Vec<DiscoveredPlugin> {
    let root = save_path.join(PLUGIN_DIR_NAME);
    let entries = match std::fs::read_dir(&root) {
        Ok(entries) => entries,
        Err(e) => {
            log::info!(target: log.target(), "no plugins loaded from {}: {e}", root.display());
            return Vec::new();
        }
    };

    let hub_version = match semver::Version::parse(APP_VERSION) {
        Ok(v) => v,
        Err(e) => {
            log::error!(target: log.target(), "hub version {APP_VERSION} is not semver: {e}");
            return Vec::new();
        }
    };

    let mut dirs: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();

    let mut found = Vec::new();
    for dir in dirs {
        let manifest = match PluginManifest::load(&dir) {
            Ok(manifest) => manifest,
            Err(e) => {
                log::warn!(target: log.target(), "skipping {}: {e}", dir.display());
                continue;
            }
        };
        match manifest.is_compatible(&hub_version) {
            Ok(true) => {}
            Ok(false) => {
                log::warn!(
                    target: log.target(),
                    "skipping [{}]: needs nagome {}, this is {APP_VERSION}",
                    manifest.name,
                    manifest.nagomever
                );
                continue;
            }
            Err(e) => {
                log::warn!(target: log.target(), "skipping [{}]: {e}", manifest.name);
                continue;
            }
        }
        found.push(DiscoveredPlugin { dir, manifest });
    }
    found
}

/// Starts plugin processes and attaches their transports.
pub(crate) struct Launcher {
    pub(crate) registry: Arc<PluginRegistry>,
    pub(crate) inbound: mpsc::UnboundedSender<Message>,
    pub(crate) quit: CancellationToken,
    pub(crate) settings: watch::Receiver<SettingsSlot>,
    /// Parent logger for plugins created on reconnect.
    pub(crate) plugin_log: Logger,
    pub(crate) log: Logger,
    /// TCP plugin processes; killed when the launcher is dropped.
    children: Mutex<Vec<Child>>,
    /// Handshakes of accepted TCP connections.
    handshakes: TaskTracker,
}

impl std::fmt::Debug for Launcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Launcher").finish_non_exhaustive()
    }
}

impl Launcher {
    pub(crate) fn new(
        registry: Arc<PluginRegistry>,
        inbound: mpsc::UnboundedSender<Message>,
        quit: CancellationToken,
        settings: watch::Receiver<SettingsSlot>,
        plugin_log: Logger,
        log: Logger,
    ) -> Self {
        Self {
            registry,
            inbound,
            quit,
            settings,
            plugin_log,
            log,
            children: Mutex::new(Vec::new()),
            handshakes: TaskTracker::new(),
        }
    }

    fn enabled(&self, plugin: &Plugin) -> bool {
        self.settings.borrow().plugin_enabled(plugin.name())
    }

    /// Start `plugin` from its folder. `tcp_port` is the listener port, if
    /// the hub has one.
    pub(crate) fn launch(
        &self,
        plugin: &Arc<Plugin>,
        dir: &Path,
        tcp_port: Option<u16>,
    ) -> Result<(), PluginError> {
        let manifest = plugin.manifest();
        match manifest.method {
            PluginMethod::Std => {
                let mut child = spawn(plugin.name(), &manifest.exec, dir, true)?;
                let (Some(stdout), Some(stdin)) = (child.stdout.take(), child.stdin.take()) else {
                    return Err(PluginError::Spawn {
                        name: plugin.name().to_string(),
                        reason: "stdio pipes unavailable".to_string(),
                    });
                };
                let transport = StdioTransport::with_child(stdout, stdin, child).boxed();
                plugin.open(
                    transport,
                    self.enabled(plugin),
                    self.inbound.clone(),
                    self.quit.clone(),
                )
            }
            PluginMethod::Tcp => {
                let Some(port) = tcp_port else {
                    return Err(PluginError::Spawn {
                        name: plugin.name().to_string(),
                        reason: "TCP plugins need the hub's TCP listener".to_string(),
                    });
                };
                if manifest.exec.is_empty() {
                    log::info!(target: self.log.target(), "waiting for [{}] to connect", plugin.name());
                    return Ok(());
                }
                let no = plugin
                    .no()
                    .ok_or_else(|| PluginError::NotRegistered(plugin.name().to_string()))?;
                let argv = manifest.expand_exec(port, no);
                let child = spawn(plugin.name(), &argv, dir, false)?;
                if let Ok(mut children) = self.children.lock() {
                    children.push(child);
                }
                Ok(())
            }
        }
    }

    /// Accept TCP plugins until quit.
    pub(crate) async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            let accepted = tokio::select! {
                biased;
                () = self.quit.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, peer)) => {
                    log::debug!(target: self.log.target(), "plugin connection from {peer}");
                    let launcher = Arc::clone(&self);
                    self.handshakes.spawn(async move {
                        if let Err(e) = launcher.attach_tcp(stream).await {
                            log::warn!(target: launcher.log.target(), "rejected plugin connection from {peer}: {e}");
                        }
                    });
                }
                Err(e) => {
                    log::warn!(target: self.log.target(), "accept failed: {e}");
                }
            }
        }
        log::debug!(target: self.log.target(), "listener stopped");
    }

    /// Wait for every pending handshake to finish. Call after the quit
    /// token is cancelled; no new handshakes start once the accept loop
    /// has stopped.
    pub(crate) async fn finish_handshakes(&self) {
        self.handshakes.close();
        self.handshakes.wait().await;
    }

    /// Read the `Direct.No` handshake and open the plugin it names.
    async fn attach_tcp(&self, stream: TcpStream) -> Result<(), PluginError> {
        let mut reader = BufReader::new(stream);
        let mut first = String::new();
        let read = tokio::select! {
            biased;
            () = self.quit.cancelled() => {
                return Err(PluginError::Handshake("hub is shutting down".to_string()));
            }
            read = tokio::time::timeout(PLUGIN_HANDSHAKE_TIMEOUT, reader.read_line(&mut first)) => read,
        };
        let read = read
            .map_err(|_| PluginError::Handshake("timed out waiting for Direct.No".to_string()))?
            .map_err(|e| PluginError::Handshake(e.to_string()))?;
        if read == 0 {
            return Err(PluginError::Handshake("connection closed".to_string()));
        }

        let no = parse_handshake(&first)?;
        let plugin = self.registry.claim(no, &self.plugin_log).ok_or_else(|| {
            PluginError::Handshake(format!("plugin {no} does not exist or is already connected"))
        })?;
        if plugin.manifest().method != PluginMethod::Tcp {
            return Err(PluginError::Handshake(format!(
                "plugin {no} [{}] is not a TCP plugin",
                plugin.name()
            )));
        }

        // The BufReader keeps anything the plugin sent after the handshake.
        plugin.open(
            Box::new(reader),
            self.enabled(&plugin),
            self.inbound.clone(),
            self.quit.clone(),
        )
    }
}

/// Plugin index from a `Direct.No` line.
fn parse_handshake(line: &str) -> Result<usize, PluginError> {
    let msg: Message = serde_json::from_str(line.trim())
        .map_err(|e| PluginError::Handshake(format!("invalid message: {e}")))?;
    match HubCommand::decode(&msg) {
        Ok(HubCommand::Direct(DirectCommand::No(n))) => Ok(n.no),
        Ok(_) => Err(PluginError::Handshake(format!(
            "expected Direct.No first, got {} {}",
            msg.domain, msg.command
        ))),
        Err(e) => Err(PluginError::Handshake(e.to_string())),
    }
}

fn spawn(name: &str, argv: &[String], dir: &Path, piped: bool) -> Result<Child, PluginError> {
    let spawn_err = |reason: String| PluginError::Spawn {
        name: name.to_string(),
        reason,
    };
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| spawn_err("exec is empty".to_string()))?;

    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(dir)
        .stderr(Stdio::inherit())
        .kill_on_drop(true);
    if piped {
        command.stdin(Stdio::piped()).stdout(Stdio::piped());
    } else {
        command.stdin(Stdio::null()).stdout(Stdio::null());
    }
    command.spawn().map_err(|e| spawn_err(e.to_string()))
}
