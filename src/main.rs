//! Nagome CLI - runs the plugin hub with this process's stdio as the main
//! plugin.
//!
//! See the `nagome` library for the hub itself.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use mimalloc::MiMalloc;

use nagome::config;
use nagome::constants::{APP_VERSION, DEFAULT_TCP_PORT, RUNTIME_SHUTDOWN_TIMEOUT};
use nagome::hub::{Hub, HubOptions};
use nagome::logging::{self, LogDestination, Logger};
use nagome::nicolive::{Account, HttpNicoApi, MemoryUserStore, RetryPolicy};
use nagome::plugin::process_stdio;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "nagome")]
#[command(version = APP_VERSION)]
#[command(about = "Plugin hub for live-broadcast comments")]
struct Cli {
    /// Save directory (settings, account, plugins, log)
    #[arg(long)]
    save_path: Option<PathBuf>,

    /// Log to stderr instead of <save dir>/info.log
    #[arg(long)]
    debug_to_stderr: bool,

    /// Port TCP plugins dial to reach the hub
    #[arg(long, default_value_t = DEFAULT_TCP_PORT)]
    tcp_port: u16,

    /// Do not listen for TCP plugins
    #[arg(long)]
    no_tcp: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("could not start the async runtime")?;
    let result = runtime.block_on(run(cli));
    // Reading stdin parks a blocking thread that only returns on input, so
    // never wait for it once the hub has stopped.
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
    result
}

async fn run(cli: Cli) -> Result<()> {
    let save_path = config::save_dir(cli.save_path.as_deref())?;
    let destination = if cli.debug_to_stderr {
        LogDestination::Stderr
    } else {
        LogDestination::File
    };
    logging::init(&save_path, destination)?;
    let log = Logger::root("nagome");
    log::info!(target: log.target(), "nagome {APP_VERSION} starting in {}", save_path.display());

    let account_path = config::account_path(&save_path);
    let account = if account_path.exists() {
        config::load_account(&account_path)?
    } else {
        Account::default()
    };
    let settings = config::load_settings(&save_path)?;
    let api = HttpNicoApi::new().context("could not build the HTTP client")?;

    let mut hub = Hub::new(HubOptions {
        save_path: save_path.clone(),
        tcp_port: (!cli.no_tcp).then_some(cli.tcp_port),
        account,
        settings,
        api: Arc::new(api),
        users: Arc::new(MemoryUserStore::new()),
        retry: RetryPolicy::default(),
        log: log.clone(),
    })
    .await
    .context("could not start the hub")?;
    hub.load_plugins();

    let handle = hub.handle();
    let signal_log = log.scoped("signal");
    tokio::spawn(async move {
        tokio::select! {
            () = handle.quitting() => {}
            signal = tokio::signal::ctrl_c() => match signal {
                Ok(()) => {
                    log::info!(target: signal_log.target(), "interrupted; shutting down");
                    handle.quit();
                }
                Err(e) => log::warn!(target: signal_log.target(), "could not listen for Ctrl-C: {e}"),
            },
        }
    });

    let state = hub.run(process_stdio()).await?;

    config::save_account(&account_path, &state.account)?;
    config::save_settings(&save_path, &state.slots_to_save())?;
    log::info!(target: log.target(), "nagome stopped");
    Ok(())
}
