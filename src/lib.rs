//! Nagome - headless hub between a live-broadcast comment server and
//! plugin processes.
//!
//! The hub keeps at most one live comment session, turns its traffic into
//! JSON-line messages and routes them to subscribed plugins. Plugins send
//! commands back (connect, comment, account and settings changes) which
//! the hub executes in arrival order.
//!
//! # Modules
//!
//! - [`hub`] - router workers, command dispatcher, plugin launch, shutdown
//! - [`plugin`] - plugin manifest, state machine, event pump, transports
//! - [`nicolive`] - comment socket and broadcast site protocol
//! - [`message`] - wire envelope, domains and typed payloads
//! - [`config`] - save directory, settings slots, account file
//! - [`logging`] - logger setup and scoped log targets

pub mod config;
pub mod constants;
pub mod hub;
pub mod logging;
pub mod message;
pub mod nicolive;
pub mod plugin;

// Re-export commonly used types
pub use hub::{Hub, HubHandle, HubOptions, HubState};
pub use message::{Domain, Message};
pub use plugin::{Plugin, PluginManifest, PluginRegistry, Transport};
