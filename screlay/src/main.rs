use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use screlay::auth::AccessGate;
use screlay::bot::{Bot, BotServices, TelegramTransport};
use screlay::config::{AppConfig, MAX_UPLOAD_BYTES};
use screlay::downloader::{RetrievalOrchestrator, TaskQueue, YtDlpEngine};
use screlay::logging::init_logging;
use screlay::panic_hook;
use screlay::quality::BitrateProbe;
use screlay::resolver::IdhsResolver;
use screlay::store::{DEFAULT_DEBOUNCE_WINDOW, DurableCounter, DurableSet};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env();
    config.validate()?;

    let log_dir = config.log_dir.to_string_lossy().into_owned();
    let (logging, _guard) = init_logging(&log_dir)?;
    panic_hook::install(&config.log_dir);

    let cancel = CancellationToken::new();
    logging.start_retention_cleanup(cancel.child_token());

    let users = DurableSet::load(config.authorized_users_path(), DEFAULT_DEBOUNCE_WINDOW).await;
    let downloads =
        DurableCounter::load(config.download_count_path(), DEFAULT_DEBOUNCE_WINDOW).await;
    info!(
        authorized = users.len(),
        capacity = config.max_authorized_users(),
        downloads = downloads.get(),
        "State loaded"
    );

    let engine = YtDlpEngine::new(config.ytdlp.clone());
    match engine.detect_version() {
        Some(version) => info!(version = %version, "Using yt-dlp"),
        None => warn!(
            binary = %config.ytdlp.binary_path,
            "Could not determine the yt-dlp version; downloads will likely fail"
        ),
    }

    let transport = Arc::new(
        TelegramTransport::new(config.bot_token.clone()).context("creating Telegram client")?,
    );
    let resolver = IdhsResolver::new(&config.idhs).context("creating link resolver")?;

    let bot = Bot::new(BotServices {
        transport,
        gate: Arc::new(AccessGate::new(config.passwords.clone(), users.clone())),
        downloads: downloads.clone(),
        queue: TaskQueue::new(config.queue.clone()),
        orchestrator: Arc::new(RetrievalOrchestrator::new(Arc::new(engine))),
        probe: Arc::new(BitrateProbe::new(config.quality.clone())),
        resolver: Arc::new(resolver),
        admin_ids: config.admin_ids.clone(),
        session: config.session.clone(),
        max_upload_bytes: MAX_UPLOAD_BYTES,
    });

    let bot_task = {
        let bot = bot.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { bot.run(cancel).await })
    };

    info!("screlay started");
    shutdown_signal().await;
    cancel.cancel();

    if let Err(e) = bot_task.await {
        error!(error = %e, "Bot task ended abnormally");
    }

    for (name, result) in [
        ("authorized users", users.flush().await),
        ("download count", downloads.flush().await),
    ] {
        if let Err(e) = result {
            error!(store = name, error = %e, "Failed to flush state on shutdown");
        }
    }

    info!("screlay stopped");
    Ok(())
}

/// Resolves on Ctrl+C or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
