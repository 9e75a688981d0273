use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tabgate_page::ChromiumLauncher;
use tabgate_pool::AdmissionQueue;
use tracing::{error, info, warn};

use tabgate::bootstrap::{build_pool, build_registry};
use tabgate::config::Config;
use tabgate::logging::{self, LogBuffer};
use tabgate::preflight;
use tabgate::server::{build_router, GatewayState};

const DRAIN_GRACE: Duration = Duration::from_secs(30);

/// OpenAI-compatible chat gateway backed by browser tabs.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Data directory (configuration, browser profiles, temp artifacts)
    #[arg(long, value_name = "DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Log level (overrides LOG_LEVEL)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Bring up only the named worker with navigation handlers disabled so
    /// an operator can complete an interactive login, then wait for Ctrl-C
    #[arg(long, value_name = "WORKER")]
    login: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let logs = LogBuffer::new(cli.data_dir.join("temp").join("system.log"));
    let level = logging::resolve_level(cli.log_level.as_deref());
    logging::init(&level, Arc::clone(&logs));

    if let Err(err) = run(cli, logs).await {
        error!(%err, "tabgate exited with an error");
        let code = if err.downcast_ref::<PreflightFailure>().is_some() {
            preflight::EXIT_PREFLIGHT
        } else {
            1
        };
        std::process::exit(code);
    }
}

#[derive(Debug, thiserror::Error)]
#[error("preflight failed: {0}")]
struct PreflightFailure(String);

async fn run(cli: Cli, logs: Arc<LogBuffer>) -> Result<()> {
    // Assets first, then configuration.
    if let Err(err) = preflight::run(&cli.data_dir) {
        return Err(PreflightFailure(err.to_string()).into());
    }

    let config = Config::load(&cli.data_dir).await.context("loading config")?;
    if let Err(err) = preflight::check_configured_browser(&config) {
        return Err(PreflightFailure(err.to_string()).into());
    }

    config
        .validate(&cli.data_dir)
        .context("validating config")?;
    let config = Arc::new(config);

    let registry = build_registry(&config)?;
    let launcher = Arc::new(ChromiumLauncher);
    let pool = build_pool(&config, &registry, launcher, &cli.data_dir)?;

    if let Some(worker_name) = &cli.login {
        return login_mode(&pool, worker_name).await;
    }

    // Instances come up in configuration order; workers of one instance
    // share its browser and initialize sequentially.
    for instance in pool.instances() {
        instance
            .init_workers(false)
            .await
            .with_context(|| format!("initializing instance '{}'", instance.name()))?;
    }

    let queue = AdmissionQueue::new(Arc::clone(&pool), config.queue.queue_buffer);
    let dispatcher = queue.spawn_dispatcher();

    let state = GatewayState {
        config: Arc::clone(&config),
        registry,
        pool: Arc::clone(&pool),
        queue: Arc::clone(&queue),
        logs,
        data_dir: cli.data_dir.clone(),
        started_at: Instant::now(),
    };
    let router = build_router(state);

    let addr = ("0.0.0.0", config.server.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding port {}", config.server.port))?;
    info!(port = config.server.port, "tabgate listening");

    let shutdown_queue = Arc::clone(&queue);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown_queue.stop_accepting();
            info!("shutdown requested; draining in-flight tasks");
        })
        .await
        .context("serving")?;

    drain(&pool).await;
    queue.shutdown();
    let _ = dispatcher.await;
    pool.shutdown().await;
    info!("tabgate stopped");
    Ok(())
}

async fn login_mode(pool: &Arc<tabgate_pool::Pool>, worker_name: &str) -> Result<()> {
    let Some(worker) = pool
        .workers()
        .iter()
        .find(|w| w.name() == worker_name)
        .cloned()
    else {
        bail!("no worker named '{worker_name}' in configuration");
    };
    let Some(instance) = pool
        .instances()
        .iter()
        .find(|i| i.workers().iter().any(|w| w.name() == worker_name))
    else {
        bail!("no instance owns worker '{worker_name}'");
    };
    let browser = instance.browser().await?;
    worker.init(&browser, true).await?;
    info!(worker = %worker_name, "login mode ready; press Ctrl-C when finished");
    shutdown_signal().await;
    instance.shutdown().await;
    Ok(())
}

async fn drain(pool: &Arc<tabgate_pool::Pool>) {
    let deadline = Instant::now() + DRAIN_GRACE;
    while pool.in_flight() > 0 {
        if Instant::now() >= deadline {
            warn!(
                in_flight = pool.in_flight(),
                "drain grace period expired with tasks still running"
            );
            break;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(%err, "failed to listen for shutdown signal");
    }
}
