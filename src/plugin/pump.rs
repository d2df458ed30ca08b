//! Per-plugin event pump.
//!
//! One task per open plugin multiplexes four sources:
//!
//! ```text
//!              ┌──────────── quit ────────────┐
//!              │                              ▼
//! transport ─lines─► decode ─► inbound ──► (router)      exit:
//! outbound queue ──► BufWriter ──(50ms idle)──► flush      state = Closed
//! state requests ──► state + Plug.Enabled/Disabled notice  main lost → hub quit
//! ```
//!
//! A line that is not a valid message, or the end of the stream, closes the
//! plugin. Closing the main plugin (or failing to write to it) cancels the
//! hub's quit token instead of merely closing.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{Plugin, PluginState, StateRequest, Transport};
use crate::constants::{MAIN_PLUGIN_NO, PLUGIN_FINAL_FLUSH_TIMEOUT, PLUGIN_FLUSH_DELAY};
use crate::message::command::directngm;
use crate::message::content::NotificationType;
use crate::message::{Domain, Message};

/// Everything the pump task owns.
pub(super) struct PumpContext {
    pub(super) plugin: Arc<Plugin>,
    pub(super) no: usize,
    pub(super) transport: Transport,
    pub(super) outbound: mpsc::Receiver<Arc<str>>,
    pub(super) state_requests: mpsc::Receiver<StateRequest>,
    pub(super) inbound: mpsc::UnboundedSender<Message>,
    pub(super) hub_quit: CancellationToken,
}

/// Why the pump stopped.
#[derive(Debug)]
enum Exit {
    /// `close()` or hub shutdown.
    Quit,
    /// The plugin closed its end.
    Eof,
    /// The plugin sent something that is not a message.
    Invalid(serde_json::Error),
    /// Reading failed.
    ReadFailed(std::io::Error),
    /// Writing failed.
    WriteFailed(std::io::Error),
}

fn state_notice(state: PluginState) -> Option<Message> {
    match state {
        PluginState::Enabled => Some(Message::empty(Domain::Directngm, directngm::PLUG_ENABLED)),
        PluginState::Disabled => Some(Message::empty(Domain::Directngm, directngm::PLUG_DISABLED)),
        PluginState::Closed => None,
    }
}

pub(super) async fn run(ctx: PumpContext) {
    let PumpContext {
        plugin,
        no,
        transport,
        mut outbound,
        mut state_requests,
        inbound,
        hub_quit,
    } = ctx;
    let log = plugin.log.clone();
    let quit = plugin.quit.clone();
    let _exited = plugin.exited.clone().drop_guard();

    let (reader, writer) = tokio::io::split(transport);
    let mut lines = BufReader::new(reader).lines();
    let mut writer = BufWriter::new(writer);
    let mut flush_at: Option<Instant> = None;

    // Every write races the quit token so a plugin that stops reading
    // cannot hold the pump open.
    macro_rules! write_line {
        ($line:expr) => {{
            tokio::select! {
                biased;
                () = quit.cancelled() => Err(Exit::Quit),
                written = writer.write_all($line.as_bytes()) => match written {
                    Ok(()) => {
                        flush_at = Some(Instant::now() + PLUGIN_FLUSH_DELAY);
                        Ok(())
                    }
                    Err(e) => Err(Exit::WriteFailed(e)),
                },
            }
        }};
    }

    let mut exit = None;
    if let Some(line) = state_notice(plugin.state()).and_then(|m| m.to_line().ok()) {
        if let Err(stop) = write_line!(line) {
            exit = Some(stop);
        }
    }

    let exit = match exit {
        Some(exit) => exit,
        None => loop {
            tokio::select! {
                biased;

                () = quit.cancelled() => break Exit::Quit,

                Some(req) = state_requests.recv() => {
                    let target = if req.enabled { PluginState::Enabled } else { PluginState::Disabled };
                    let changed = {
                        let mut state = match plugin.state.lock() {
                            Ok(state) => state,
                            Err(poisoned) => poisoned.into_inner(),
                        };
                        let changed = *state != target;
                        *state = target;
                        changed
                    };
                    if changed {
                        log::info!(target: log.target(), "plugin [{}] is now {:?}", plugin.name(), target);
                        if let Some(line) = state_notice(target).and_then(|m| m.to_line().ok()) {
                            if let Err(stop) = write_line!(line) {
                                let _ = req.ack.send(());
                                break stop;
                            }
                        }
                    }
                    let _ = req.ack.send(());
                }

                Some(line) = outbound.recv() => {
                    if plugin.state() != PluginState::Enabled {
                        continue;
                    }
                    if let Err(stop) = write_line!(line) {
                        break stop;
                    }
                }

                () = tokio::time::sleep_until(flush_at.unwrap_or_else(Instant::now)), if flush_at.is_some() => {
                    flush_at = None;
                    tokio::select! {
                        biased;
                        () = quit.cancelled() => break Exit::Quit,
                        flushed = writer.flush() => if let Err(e) = flushed {
                            break Exit::WriteFailed(e);
                        },
                    }
                }

                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let msg = match serde_json::from_str::<Message>(&line) {
                            Ok(msg) => msg,
                            Err(e) => break Exit::Invalid(e),
                        };
                        if plugin.state() != PluginState::Enabled {
                            log::debug!(target: log.target(), "dropping message from disabled plugin [{}]", plugin.name());
                            continue;
                        }
                        log::debug!(target: log.target(), "plugin message [{}] : {} {}", plugin.name(), msg.domain, msg.command);
                        if inbound.send(msg.with_source(no)).is_err() {
                            break Exit::Quit;
                        }
                    }
                    Ok(None) => break Exit::Eof,
                    Err(e) => break Exit::ReadFailed(e),
                },
            }
        },
    };

    if !matches!(exit, Exit::WriteFailed(_)) {
        match tokio::time::timeout(PLUGIN_FINAL_FLUSH_TIMEOUT, writer.flush()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::debug!(target: log.target(), "final flush for [{}] failed: {e}", plugin.name()),
            Err(_) => log::debug!(target: log.target(), "final flush for [{}] timed out", plugin.name()),
        }
    }

    plugin.set_state_value(PluginState::Closed);
    // Unblock writers waiting on a full queue.
    quit.cancel();

    let is_main = no == MAIN_PLUGIN_NO;
    match &exit {
        Exit::Quit => {
            log::info!(target: log.target(), "plugin [{}] closed", plugin.name());
            return;
        }
        Exit::Eof => {
            log::info!(target: log.target(), "plugin [{}] disconnected", plugin.name());
        }
        Exit::Invalid(e) => {
            log::warn!(target: log.target(), "plugin [{}] sent an invalid message: {e}", plugin.name());
        }
        Exit::ReadFailed(e) => {
            log::warn!(target: log.target(), "reading from plugin [{}] failed: {e}", plugin.name());
        }
        Exit::WriteFailed(e) => {
            log::warn!(target: log.target(), "writing to plugin [{}] failed: {e}", plugin.name());
        }
    }

    if is_main {
        log::warn!(target: log.target(), "main plugin lost; shutting down");
        hub_quit.cancel();
        return;
    }

    let description = match &exit {
        Exit::WriteFailed(_) => format!("failed to write a message : {}", plugin.name()),
        _ => format!("plugin [{}] : connection disconnected", plugin.name()),
    };
    let notice = Message::notification(NotificationType::Info, "plugin disconnected", &description);
    // The router may already be gone during shutdown.
    let _ = inbound.send(notice);
}
