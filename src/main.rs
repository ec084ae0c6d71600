use clap::{Parser, Subcommand};
use monitor_core::Config;
use monitor_service::{notify_once, ThreadMonitor};
use telegram_notifier::TelegramNotifier;
use tieba_client::TiebaClient;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "tieba-monitor")]
#[command(about = "Watches a Tieba thread and forwards new floors to Telegram")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll the thread until interrupted, notifying on every new floor
    Watch,
    /// Fetch the latest floor once, send it, and exit
    Once,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            "tieba_monitor=debug,monitor_service=debug,tieba_client=debug,telegram_notifier=debug",
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().map_err(|e| {
        tracing::error!("Configuration error: {}", e);
        e
    })?;

    let client = TiebaClient::new(config.bduss.clone())?;
    let notifier = TelegramNotifier::new(&config.telegram_token, &config.telegram_chat_id)?;

    match cli.command.unwrap_or(Command::Watch) {
        Command::Watch => {
            tracing::info!("Starting tieba-monitor for thread {}", config.thread_id);

            let cancel = CancellationToken::new();
            let shutdown_cancel = cancel.clone();
            tokio::spawn(async move {
                let ctrl_c = tokio::signal::ctrl_c();
                #[cfg(unix)]
                {
                    let mut sigterm = tokio::signal::unix::signal(
                        tokio::signal::unix::SignalKind::terminate(),
                    )
                    .expect("failed to install SIGTERM handler");
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = sigterm.recv() => {}
                    }
                }
                #[cfg(not(unix))]
                {
                    let _ = ctrl_c.await;
                }
                tracing::info!("Shutdown signal received");
                shutdown_cancel.cancel();
            });

            let mut monitor = ThreadMonitor::new(client, notifier, &config);
            monitor.run(cancel).await;
        }
        Command::Once => {
            if !notify_once(&client, &notifier, config.thread_id).await? {
                tracing::warn!("Thread {} had no usable posts", config.thread_id);
            }
        }
    }

    Ok(())
}
