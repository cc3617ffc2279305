use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fate_core::config::AppConfig;
use fate_core::models::ModelCatalog;
use fate_core::workflow::WorkflowTemplate;
use fate_pipeline::generator::ImageGenerator;
use fate_pipeline::inactivity::InactivityMonitor;
use fate_pipeline::queue::JobQueue;
use fate_worker::commands::CommandHandler;

/// Sender name used for stdin lines without a `nick: ` prefix.
const LOCAL_NICK: &str = "local";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "fate_worker=debug,fate_pipeline=debug,fate_comfyui=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // --- Configuration ---
    let config = AppConfig::from_env().context("Invalid configuration")?;
    let catalog = ModelCatalog::load(&config.model_config_path)
        .with_context(|| format!("Failed to load {}", config.model_config_path.display()))?;
    let workflow = WorkflowTemplate::load(&config.workflow_path)
        .with_context(|| format!("Failed to load {}", config.workflow_path.display()))?;
    tracing::info!(
        address = config.comfyui_address.as_deref().unwrap_or("<unset>"),
        models = catalog.len(),
        default_model = %config.default_model,
        trigger = %config.trigger_word,
        "Loaded worker configuration",
    );

    // --- Pipeline ---
    let generator = ImageGenerator::from_config(&config, catalog, workflow);
    let queue = JobQueue::new();
    let monitor = Arc::new(InactivityMonitor::start(
        queue.clone(),
        generator.backend(),
        config.inactivity_timeout,
    ));

    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();
    let handler = CommandHandler::new(
        config.trigger_word.clone(),
        generator,
        queue.clone(),
        monitor,
        reply_tx,
    );

    let printer = tokio::spawn(async move {
        while let Some(reply) = reply_rx.recv().await {
            println!("{reply}");
        }
    });

    // --- Input loop ---
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let interrupted = loop {
        tokio::select! {
            () = &mut shutdown => break true,
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break false;
                };
                let (nick, message) = split_sender(&line);
                handler.handle(nick, message).await;
            }
        }
    };

    // Let queued generations finish unless we were told to stop.
    if !interrupted {
        tracing::info!(pending = queue.len(), "Input closed, draining queue");
        loop {
            if queue.is_idle() {
                break;
            }
            tokio::select! {
                () = &mut shutdown => break,
                () = tokio::time::sleep(Duration::from_millis(200)) => {}
            }
        }
    }

    drop(handler);
    // Queued jobs may still hold reply senders after an interrupt.
    let _ = tokio::time::timeout(Duration::from_secs(1), printer).await;
    tracing::info!("Worker stopped");
    Ok(())
}

/// Split `nick: message`, falling back to [`LOCAL_NICK`].
fn split_sender(line: &str) -> (&str, &str) {
    match line.split_once(": ") {
        Some((nick, message)) if !nick.is_empty() && !nick.contains(char::is_whitespace) => {
            (nick, message)
        }
        _ => (LOCAL_NICK, line),
    }
}

/// Wait for a termination signal to initiate graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), shutting down");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }
}
