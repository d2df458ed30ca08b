//! Router workers.
//!
//! A fixed pool of workers drains the single inbound channel:
//!
//! ```text
//!                          ┌─► worker 0 ─┐
//! plugins ──► inbound ─────┼─► worker 1 ─┼──► subscribers' outbound queues
//! events  ──►  (lock)      └─► worker … ─┘
//!                 │
//!                 └── query / direct / antenna ──► dispatcher lane
//! ```
//!
//! Command messages are handed to the dispatcher while the worker still
//! holds the receiver, so the dispatcher sees them in inbound order.
//! For events the worker takes a delivery ticket from every subscribed,
//! Enabled plugin under the same lock, then writes after releasing it.
//! Writes to different plugins run concurrently; writes to one plugin are
//! released in ticket order, so each plugin sees events in inbound order
//! and a full queue only delays that plugin's copies.

use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::logging::Logger;
use crate::message::Message;
use crate::plugin::{Plugin, PluginError, PluginRegistry};

/// Inbound receiver shared by the workers.
pub(crate) type SharedInbound = Arc<Mutex<mpsc::UnboundedReceiver<Message>>>;

/// Everything a worker needs.
#[derive(Debug, Clone)]
pub(crate) struct RouterContext {
    pub(crate) inbound: SharedInbound,
    pub(crate) commands: mpsc::UnboundedSender<Message>,
    pub(crate) registry: Arc<PluginRegistry>,
    pub(crate) quit: CancellationToken,
    pub(crate) log: Logger,
}

/// Start `count` workers.
pub(crate) fn spawn_workers(ctx: &RouterContext, count: usize) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|id| {
            let ctx = RouterContext {
                log: ctx.log.scoped(&format!("worker{id}")),
                ..ctx.clone()
            };
            tokio::spawn(run_worker(ctx))
        })
        .collect()
}

async fn run_worker(ctx: RouterContext) {
    loop {
        let delivery = {
            let mut inbound = tokio::select! {
                biased;
                () = ctx.quit.cancelled() => break,
                guard = ctx.inbound.lock() => guard,
            };
            let next = tokio::select! {
                biased;
                () = ctx.quit.cancelled() => None,
                msg = inbound.recv() => msg,
            };
            let Some(msg) = next else { break };

            if msg.domain.is_command() {
                if ctx.commands.send(msg).is_err() {
                    break;
                }
                continue;
            }
            Delivery::prepare(&ctx.registry, &msg, &ctx.log)
        };

        if let Some(delivery) = delivery {
            delivery.send(&ctx.log).await;
        }
    }
    log::debug!(target: ctx.log.target(), "router worker exited");
}

/// One event, serialized, with a ticket for each recipient.
pub(crate) struct Delivery {
    line: Arc<str>,
    recipients: Vec<(Arc<Plugin>, u64)>,
}

impl Delivery {
    /// Serialize `msg` and reserve its place with every subscribed,
    /// Enabled plugin. `None` if nobody is listening or encoding fails.
    pub(crate) fn prepare(registry: &PluginRegistry, msg: &Message, log: &Logger) -> Option<Self> {
        let subscribers = registry.subscribers(&msg.domain);
        if subscribers.is_empty() {
            log::trace!(target: log.target(), "no subscribers for {} {}", msg.domain, msg.command);
            return None;
        }

        let line: Arc<str> = match msg.to_line() {
            Ok(line) => Arc::from(line),
            Err(e) => {
                log::warn!(target: log.target(), "could not encode {} {}: {e}", msg.domain, msg.command);
                return None;
            }
        };

        let recipients = subscribers
            .into_iter()
            .map(|plugin| {
                let ticket = plugin.take_ticket();
                (plugin, ticket)
            })
            .collect();
        Some(Self { line, recipients })
    }

    /// Write to every recipient concurrently.
    pub(crate) async fn send(self, log: &Logger) {
        let line = self.line;
        let writes = self.recipients.iter().map(|(plugin, ticket)| {
            let line = Arc::clone(&line);
            async move { (plugin, plugin.write_line_in_order(*ticket, line).await) }
        });
        for (plugin, result) in join_all(writes).await {
            match result {
                Ok(()) => {}
                Err(PluginError::Closed(_)) => {
                    log::debug!(target: log.target(), "plugin [{}] closed before delivery", plugin.name());
                }
                Err(e) => {
                    log::warn!(target: log.target(), "delivery to [{}] failed: {e}", plugin.name());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Domain;
    use crate::plugin::PluginManifest;
    use serde_json::json;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, BufReader};

    fn manifest(name: &str, subscribe: &[&str]) -> PluginManifest {
        PluginManifest {
            name: name.to_string(),
            subscribe: subscribe.iter().map(|s| s.to_string()).collect(),
            ..PluginManifest::default()
        }
    }

    #[tokio::test]
    async fn test_commands_go_to_dispatcher_in_order() {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (commands_tx, mut commands_rx) = mpsc::unbounded_channel();
        let ctx = RouterContext {
            inbound: Arc::new(Mutex::new(inbound_rx)),
            commands: commands_tx,
            registry: Arc::new(PluginRegistry::new()),
            quit: CancellationToken::new(),
            log: Logger::root("test"),
        };
        let workers = spawn_workers(&ctx, 5);

        for n in 0..50 {
            let msg = Message::new(Domain::Query, "Log.Print", &json!({"Text": n.to_string()})).unwrap();
            inbound_tx.send(msg).unwrap();
        }
        for n in 0..50 {
            let msg = tokio::time::timeout(Duration::from_secs(2), commands_rx.recv())
                .await
                .expect("Timed out waiting for command")
                .unwrap();
            assert_eq!(msg.content["Text"], n.to_string());
        }

        ctx.quit.cancel();
        for worker in workers {
            worker.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_fan_out_only_to_enabled_subscribers() {
        let log = Logger::root("test");
        let registry = PluginRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let quit = CancellationToken::new();

        let mut far_ends = Vec::new();
        for (name, subscribe, enabled) in [
            ("sub", vec!["nagome"], true),
            ("other", vec!["custom"], true),
            ("disabled", vec!["nagome"], false),
        ] {
            let plugin = registry.register(Plugin::new(manifest(name, &subscribe), &log));
            let (near, far) = tokio::io::duplex(4096);
            plugin.open(Box::new(near), enabled, tx.clone(), quit.clone()).unwrap();
            far_ends.push(BufReader::new(far).lines());
        }

        let event = Message::new(Domain::Nagome, "Comment.Got", &json!({"No": 7})).unwrap();
        Delivery::prepare(&registry, &event, &log).unwrap().send(&log).await;

        let mut received = Vec::new();
        for lines in &mut far_ends {
            let mut got = Vec::new();
            while let Ok(Ok(Some(line))) =
                tokio::time::timeout(Duration::from_millis(200), lines.next_line()).await
            {
                let msg: Message = serde_json::from_str(&line).unwrap();
                got.push(msg.command);
            }
            received.push(got);
        }
        assert_eq!(received[0], vec!["Plug.Enabled", "Comment.Got"]);
        assert_eq!(received[1], vec!["Plug.Enabled"]);
        assert_eq!(received[2], vec!["Plug.Disabled"]);

        for plugin in registry.all() {
            plugin.close().await;
        }
    }

    #[tokio::test]
    async fn test_events_keep_inbound_order_per_plugin() {
        let log = Logger::root("test");
        let registry = Arc::new(PluginRegistry::new());
        let (plugin_tx, _plugin_rx) = mpsc::unbounded_channel();
        let quit = CancellationToken::new();

        let plugin = registry.register(Plugin::new(manifest("viewer", &["nagome"]), &log));
        // Small pipe so writers pile up behind a full queue.
        let (near, far) = tokio::io::duplex(64);
        plugin.open(Box::new(near), true, plugin_tx, quit.clone()).unwrap();
        let mut lines = BufReader::new(far).lines();
        assert!(lines.next_line().await.unwrap().unwrap().contains("Plug.Enabled"));

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (commands_tx, _commands_rx) = mpsc::unbounded_channel();
        let ctx = RouterContext {
            inbound: Arc::new(Mutex::new(inbound_rx)),
            commands: commands_tx,
            registry: Arc::clone(&registry),
            quit: quit.clone(),
            log: log.clone(),
        };
        let workers = spawn_workers(&ctx, 5);

        for n in 0..200 {
            let msg = Message::new(Domain::Nagome, "Comment.Got", &json!({"No": n})).unwrap();
            inbound_tx.send(msg).unwrap();
        }
        for n in 0..200 {
            let line = tokio::time::timeout(Duration::from_secs(2), lines.next_line())
                .await
                .expect("Timed out waiting for event")
                .unwrap()
                .unwrap();
            let msg: Message = serde_json::from_str(&line).unwrap();
            assert_eq!(msg.content["No"], n);
        }

        quit.cancel();
        for worker in workers {
            worker.await.unwrap();
        }
        plugin.close().await;
    }
}
