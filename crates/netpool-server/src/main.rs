//! netpool server binary: hosts one or more echo servers.
//!
//! Servers come from the `[[servers]]` tables of the `--config` file.  When
//! the file names none (or no file is given), a single server is built from
//! the command-line flags.
//!
//! # Usage
//!
//! ```text
//! netpool-server [OPTIONS]
//!
//! Options:
//!   --config <PATH>            TOML configuration file
//!   --address <URI>            tcp://, ssl:// or local:// address [default: tcp://127.0.0.1:7878]
//!   --name <NAME>              Registry name of the server [default: echo]
//!   --min-workers <N>          Workers kept alive while idle [default: 0]
//!   --max-workers <N>          Concurrent sessions [default: 10]
//!   --idle-timeout-ms <MS>     Idle time before a surplus worker retires [default: 15000]
//!   --max-pending <N>          Connections queued while all workers are busy [default: 0]
//!   --busy-message <TEXT>      Sent to connections refused for lack of capacity
//!   --tls-cert <PATH>          PEM certificate chain for ssl://
//!   --tls-key <PATH>           PEM private key for ssl://
//!   --interrupt-clients        Cancel running sessions on shutdown instead of waiting
//! ```
//!
//! Every flag can also be set through the `NETPOOL_*` environment variable
//! named in `--help`; command-line values take precedence.
//!
//! # Host loop
//!
//! ```text
//! main()
//!  ├─ start every server (worker threads + accept thread each)
//!  └─ loop
//!       ├─ every 1 s: ServerRegistry::reap_finished_workers()
//!       └─ Ctrl-C:    stop every server (blocking pool) and exit
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use netpool_core::StopMode;
use netpool_server::application::echo::EchoProtocol;
use netpool_server::application::registry::ServerRegistry;
use netpool_server::infrastructure::launch::start_server;
use netpool_server::infrastructure::storage::config::{
    load_config, AppConfig, ServerEntry, TlsEntry,
};
use netpool_server::infrastructure::transport::DEFAULT_HANDSHAKE_TIMEOUT;

/// How often retired worker threads are joined.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Threaded connection-pool echo server.
#[derive(Debug, Parser)]
#[command(
    name = "netpool-server",
    about = "Threaded connection-pool server with TCP, TLS and local-socket transports",
    version
)]
struct Cli {
    /// TOML configuration file.  Missing files are treated as empty.
    #[arg(long, env = "NETPOOL_CONFIG")]
    config: Option<PathBuf>,

    /// Address of the server built from flags.
    #[arg(long, default_value = "tcp://127.0.0.1:7878", env = "NETPOOL_ADDRESS")]
    address: String,

    /// Registry name of the server built from flags.
    #[arg(long, default_value = "echo", env = "NETPOOL_NAME")]
    name: String,

    #[arg(long, default_value_t = 0, env = "NETPOOL_MIN_WORKERS")]
    min_workers: u32,

    #[arg(long, default_value_t = 10, env = "NETPOOL_MAX_WORKERS")]
    max_workers: u32,

    #[arg(long, default_value_t = 15_000, env = "NETPOOL_IDLE_TIMEOUT_MS")]
    idle_timeout_ms: u64,

    #[arg(long, default_value_t = 0, env = "NETPOOL_MAX_PENDING")]
    max_pending: usize,

    #[arg(long, env = "NETPOOL_BUSY_MESSAGE")]
    busy_message: Option<String>,

    #[arg(long, env = "NETPOOL_TLS_CERT", requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    #[arg(long, env = "NETPOOL_TLS_KEY", requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    /// Cancel running sessions on shutdown instead of waiting for them.
    #[arg(long, env = "NETPOOL_INTERRUPT_CLIENTS")]
    interrupt_clients: bool,
}

impl Cli {
    /// The `[[servers]]` entry equivalent to the flags.
    fn server_entry(&self) -> ServerEntry {
        let tls = match (&self.tls_cert, &self.tls_key) {
            (Some(cert), Some(key)) => Some(TlsEntry {
                cert_path: cert.clone(),
                key_path: key.clone(),
                handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT.as_millis() as u64,
            }),
            _ => None,
        };
        ServerEntry {
            min_workers: self.min_workers,
            max_workers: self.max_workers,
            worker_idle_timeout_ms: self.idle_timeout_ms,
            max_pending_connections: self.max_pending,
            busy_message: self.busy_message.clone(),
            default: true,
            shutdown_mode: if self.interrupt_clients {
                StopMode::InterruptClients
            } else {
                StopMode::WaitClients
            },
            tls,
            ..ServerEntry::new(&self.name, &self.address)
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => AppConfig::default(),
    };
    if config.servers.is_empty() {
        config.servers.push(cli.server_entry());
    }

    // Initialise structured logging.  Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    config.validate().context("invalid configuration")?;
    info!("netpool server starting");

    let registry = Arc::new(ServerRegistry::new());
    for entry in &config.servers {
        let options = entry.options()?;
        let tls = entry.tls_settings()?;
        start_server(
            &registry,
            &entry.name,
            &entry.address,
            Arc::new(EchoProtocol),
            options,
            tls,
        )
        .with_context(|| format!("failed to start server '{}'", entry.name))?;
    }
    if let Some(default) = config.default_server() {
        registry.set_default_server(&default.name)?;
    }
    info!(servers = ?registry.names(), "all servers running; press Ctrl-C to stop");

    // ── Host loop ─────────────────────────────────────────────────────────────
    let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        tokio::select! {
            _ = sweep.tick() => {
                let reaped = registry.reap_finished_workers();
                if reaped > 0 {
                    debug!(reaped = reaped, "joined retired workers");
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                info!("shutdown requested");
                break;
            }
        }
    }

    // Stopping joins worker threads; keep that off the async workers.
    let entries = config.servers.clone();
    tokio::task::spawn_blocking(move || {
        for entry in entries {
            if let Some(server) = registry.remove_server(&entry.name) {
                server.stop(entry.shutdown_mode);
            }
        }
    })
    .await
    .context("shutdown task failed")?;

    info!("netpool server stopped");
    Ok(())
}
