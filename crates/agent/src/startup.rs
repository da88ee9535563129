use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use adapters::dictd::run_dict_server;
use adapters::http::{AppState, run_http_server};
use adapters::netlink::spawn_queue_readers;
use application::conntrack_dispatch::ConntrackDispatcher;
use application::netlogger_dispatch::NetloggerDispatcher;
use application::nfqueue_dispatch::PacketDispatcher;
use application::reaper::SessionReaper;
use domain::conntrack::table::ConntrackTable;
use domain::dict::store::Dictionary;
use domain::event::{ConntrackEvent, NetloggerEvent};
use domain::plugin::registry::SubscriptionRegistry;
use domain::session::table::SessionTable;
use infrastructure::config::DaemonConfig;
use infrastructure::constants::{
    CONNTRACK_CHANNEL_CAPACITY, GRACEFUL_SHUTDOWN_TIMEOUT, NETLOGGER_CHANNEL_CAPACITY,
};
use infrastructure::logging::init_logging;
use infrastructure::metrics::DaemonMetrics;
use plugins::example::ExamplePlugin;
use ports::secondary::metrics_port::MetricsPort;
use tokio::sync::mpsc;
use tracing::info;

use crate::cli::Cli;
use crate::shutdown::create_shutdown_token;

/// Run the daemon startup sequence and block until shutdown.
///
/// Construction order matters: dictionary first, then the tables, then
/// the dispatchers, then plugin registration, then the kernel-facing
/// readers, so nothing consumes a collaborator that does not exist yet.
pub async fn run(cli: &Cli) -> anyhow::Result<()> {
    // ── 1. Load config ──────────────────────────────────────────────
    let config = DaemonConfig::load(Path::new(&cli.config))?;

    // ── 2. Initialize logging ───────────────────────────────────────
    // CLI flags take precedence over config file
    let log_level = cli.log_level.unwrap_or(config.daemon.log_level);
    let log_format = cli.log_format.unwrap_or(config.daemon.log_format);
    init_logging(log_level, log_format);

    info!(
        config_path = %cli.config,
        log_level = log_level.as_str(),
        log_format = log_format.as_str(),
        version = env!("CARGO_PKG_VERSION"),
        "flowsentry starting"
    );

    // ── 3. Core state: dictionary, tables, registry, metrics ───────
    let dict = Arc::new(Dictionary::new());
    let sessions = Arc::new(SessionTable::new());
    let conntracks = Arc::new(ConntrackTable::new());
    let registry = Arc::new(SubscriptionRegistry::new());
    let metrics = Arc::new(DaemonMetrics::new());

    // ── 4. Plugins ──────────────────────────────────────────────────
    if config.plugins.example.enabled {
        ExamplePlugin::register(
            Arc::new(ExamplePlugin::new(
                config.plugins.example.release_after_packets,
            )),
            &registry,
        )?;
        info!(
            release_after_packets = config.plugins.example.release_after_packets,
            "example plugin registered"
        );
    }
    info!(
        nfqueue_subscribers = registry.nfqueue_count(),
        "subscription registry initialized"
    );

    // ── 5. Dispatchers ──────────────────────────────────────────────
    let dispatcher = Arc::new(PacketDispatcher::new(
        Arc::clone(&sessions),
        Arc::clone(&conntracks),
        Arc::clone(&dict),
        Arc::clone(&registry),
        Arc::clone(&metrics) as Arc<dyn MetricsPort>,
    ));
    dispatcher.set_bypass_all(cli.bypass);

    let cancel = create_shutdown_token();
    let mut tasks = Vec::new();

    // Ingress channels for the conntrack and NFLOG collectors. The
    // senders are the integration point for the netlink side; they stay
    // alive for the process lifetime.
    let (conntrack_tx, conntrack_rx) =
        mpsc::channel::<ConntrackEvent>(CONNTRACK_CHANNEL_CAPACITY);
    let (netlogger_tx, netlogger_rx) =
        mpsc::channel::<NetloggerEvent>(NETLOGGER_CHANNEL_CAPACITY);

    let conntrack_dispatcher = ConntrackDispatcher::new(
        Arc::clone(&sessions),
        Arc::clone(&conntracks),
        Arc::clone(&dict),
        Arc::clone(&registry),
        Arc::clone(&metrics) as Arc<dyn MetricsPort>,
    );
    tasks.push(tokio::spawn(
        conntrack_dispatcher.run(conntrack_rx, cancel.clone()),
    ));

    let netlogger_dispatcher = NetloggerDispatcher::new(
        Arc::clone(&registry),
        Arc::clone(&metrics) as Arc<dyn MetricsPort>,
    );
    tasks.push(tokio::spawn(
        netlogger_dispatcher.run(netlogger_rx, cancel.clone()),
    ));

    // ── 6. Reaper ───────────────────────────────────────────────────
    let reaper = SessionReaper::new(
        Arc::clone(&sessions),
        Arc::clone(&dict),
        Arc::clone(&metrics) as Arc<dyn MetricsPort>,
        config.session_idle_timeout(),
        config.reaper_interval(),
    );
    tasks.push(tokio::spawn(reaper.run(cancel.clone())));
    info!(
        idle_timeout_secs = config.session_idle_timeout().as_secs(),
        interval_secs = config.reaper_interval().as_secs(),
        "session reaper started"
    );

    // ── 7. Dictionary device ────────────────────────────────────────
    let dict_path = PathBuf::from(&config.daemon.dict_socket_path);
    {
        let dict = Arc::clone(&dict);
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(err) = run_dict_server(dict, dict_path, cancel).await {
                tracing::error!(%err, "dictionary device failed");
            }
        }));
    }

    // ── 8. Admin HTTP server ────────────────────────────────────────
    let state = Arc::new(AppState::new(
        Arc::clone(&metrics),
        Arc::clone(&dispatcher),
        Arc::clone(&sessions),
        Arc::clone(&conntracks),
        Arc::clone(&dict),
    ));
    let addr: SocketAddr =
        format!("{}:{}", config.daemon.bind_address, config.daemon.http_port).parse()?;
    {
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(err) = run_http_server(state, addr, cancel).await {
                tracing::error!(%err, "admin HTTP server failed");
            }
        }));
    }

    // ── 9. Queue readers ────────────────────────────────────────────
    let readers = spawn_queue_readers(
        Arc::clone(&dispatcher),
        config.daemon.queue_start,
        config.daemon.queue_end,
        tokio::runtime::Handle::current(),
    )?;
    info!(
        queue_start = config.daemon.queue_start,
        queue_end = config.daemon.queue_end,
        readers = readers.len(),
        "nfqueue readers started"
    );

    // ── 10. Wait for shutdown ───────────────────────────────────────
    cancel.cancelled().await;
    info!("shutdown signal received, draining");

    let drain = async {
        for task in tasks {
            let _ = task.await;
        }
    };
    if tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, drain)
        .await
        .is_err()
    {
        tracing::warn!("graceful shutdown timed out, exiting anyway");
    }

    // Reader threads are parked in blocking recv; they end with the
    // process.
    drop((conntrack_tx, netlogger_tx));

    info!("flowsentry stopped");
    Ok(())
}
