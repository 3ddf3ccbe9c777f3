//! Faucet service binary

use anyhow::{anyhow, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use futures::stream::{FuturesUnordered, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use trickle_common::format_duration;
use trickle_common::logging::init_logging;
use trickle_faucet::api::{router, AppState};
use trickle_faucet::database::{prune_receipts, spawn_pruner};
use trickle_faucet::{
    spawn_chain_worker, ChainRoute, ChainSender, Dispatcher, FaucetConfig, MemoryReceiptStore,
    NotificationSink, RateLimitStore, RpcChainClient, SledReceiptStore, WebhookNotifier,
};

/// Chat-triggered token faucet
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Chat ingress listen address
    #[arg(long, global = true)]
    server_addr: Option<String>,

    /// Receipt database path
    #[arg(long, global = true)]
    db_path: Option<String>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Commands {
    /// Run the faucet (default)
    Run,
    /// Remove expired funding receipts and exit
    Prune,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let mut config = FaucetConfig::from_env().context("invalid configuration")?;

    if let Some(addr) = args.server_addr {
        config.server_addr = addr;
    }
    if let Some(path) = args.db_path {
        config.db_path = Some(path);
    }
    if args.debug {
        config.logging.level = "debug".to_string();
    }

    init_logging(&config.logging)?;
    info!("Starting Trickle faucet v{}", env!("CARGO_PKG_VERSION"));

    let (store, sled_store) = open_store(&config)?;

    match args.command.unwrap_or(Commands::Run) {
        Commands::Prune => {
            let removed = prune_receipts(store.as_ref(), Utc::now(), config.funding_interval).await?;
            if let Some(sled_store) = sled_store {
                sled_store.flush().await?;
            }
            info!("Pruned {} expired receipts", removed);
            Ok(())
        }
        Commands::Run => run(Arc::new(config), store, sled_store).await,
    }
}

fn open_store(
    config: &FaucetConfig,
) -> anyhow::Result<(Arc<dyn RateLimitStore>, Option<SledReceiptStore>)> {
    match &config.db_path {
        Some(path) => {
            let store = SledReceiptStore::open(path)?;
            info!("Loaded {} funding receipts", store.len());
            Ok((Arc::new(store.clone()), Some(store)))
        }
        None => {
            info!("DB_PATH not set, funding receipts are kept in memory");
            Ok((Arc::new(MemoryReceiptStore::new()), None))
        }
    }
}

async fn run(
    config: Arc<FaucetConfig>,
    store: Arc<dyn RateLimitStore>,
    sled_store: Option<SledReceiptStore>,
) -> anyhow::Result<()> {
    info!("Configuration:");
    info!("  Chains: {}", config.prefixes().join(", "));
    info!("  Funding interval: {}", format_duration(config.funding_interval));
    info!(
        "  Batching: {} requests / {}",
        config.max_batch_size,
        format_duration(config.batch_interval)
    );
    info!("  Silent: {}, send DMs: {}", config.silent, config.send_dm);

    let shutdown = CancellationToken::new();
    let notifier: Arc<dyn NotificationSink> =
        Arc::new(WebhookNotifier::new(config.notifier_config())?);

    let mut routes = Vec::with_capacity(config.chains.len());
    let mut workers = FuturesUnordered::new();
    for chain_config in &config.chains {
        let client = RpcChainClient::connect(chain_config.clone(), &config.mnemonic)
            .await
            .with_context(|| format!("failed to initialise chain {}", chain_config.prefix))?;
        let chain: Arc<dyn ChainSender> = Arc::new(client);

        let (handle, tasks) = spawn_chain_worker(
            chain.clone(),
            notifier.clone(),
            config.worker_settings(),
            shutdown.clone(),
        );
        routes.push(ChainRoute { handle, chain });

        workers.push(watch(format!("{} batch", tasks.prefix), tasks.batch));
        workers.push(watch(format!("{} status", tasks.prefix), tasks.status));
    }

    let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel();
    let mut dispatcher = Dispatcher::new(
        config.clone(),
        routes,
        store.clone(),
        notifier,
        fatal_tx,
    )?;
    if let Some(bot_user_id) = &config.bot_user_id {
        dispatcher = dispatcher.with_bot_user(bot_user_id.clone());
    }

    let pruner = spawn_pruner(
        store,
        config.prune_interval,
        config.funding_interval,
        shutdown.clone(),
    );

    let state = Arc::new(AppState {
        dispatcher: Arc::new(dispatcher),
        bot_token: config.bot_token.clone(),
    });
    let addr: SocketAddr = config.server_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    let server_shutdown = shutdown.clone();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, router(state))
            .with_graceful_shutdown(server_shutdown.cancelled_owned())
            .await
    });

    let failure = tokio::select! {
        _ = shutdown_signal() => None,
        Some(err) = fatal_rx.recv() => Some(anyhow!("fatal error: {}", err)),
        Some((name, result)) = workers.next() => {
            Some(anyhow!("{} worker exited unexpectedly: {:?}", name, result))
        }
        result = &mut server => Some(anyhow!("chat ingress stopped: {:?}", result)),
    };

    if let Some(err) = &failure {
        error!("{}", err);
    }
    info!("Shutting down gracefully");
    shutdown.cancel();

    while let Some((name, result)) = workers.next().await {
        if let Err(e) = result {
            warn!("{} worker ended with {}", name, e);
        }
    }
    if !server.is_finished() {
        if let Err(e) = server.await {
            warn!("Chat ingress task ended with {}", e);
        }
    }
    let _ = pruner.await;

    if let Some(sled_store) = sled_store {
        sled_store.flush().await?;
    }

    match failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

async fn watch(name: String, task: JoinHandle<()>) -> (String, Result<(), JoinError>) {
    (name, task.await)
}

/// Graceful shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
