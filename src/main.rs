mod api;
mod dispatch;
mod gateway;
#[cfg(test)]
mod testing;

use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use wabridge_channels::{
    generate_qr_terminal, ConnectionSupervisor, MediaMaterializer, MessageClassifier,
    SessionStore, SupervisorConfig, SupervisorHandle, WhatsAppFactory,
};
use wabridge_core::{
    config::{self, Config},
    traits::CredentialStore,
};
use wabridge_memory::{ChatHistoryStore, DedupGuard};

#[derive(Parser)]
#[command(
    name = "wabridge",
    version,
    about = "WhatsApp Web session bridge with per-conversation history"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file.
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to WhatsApp and serve the HTTP API.
    Start,
    /// Show configuration, pairing state, and stored conversations.
    Status,
}

fn env_filter(cfg: &Config) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.bridge.log_level))
}

/// Stdout plus a non-blocking file writer. Keep the guard alive until exit.
fn init_logging(cfg: &Config) -> anyhow::Result<tracing_appender::non_blocking::WorkerGuard> {
    let log_dir = cfg.log_dir();
    std::fs::create_dir_all(&log_dir)?;
    let appender = tracing_appender::rolling::never(&log_dir, "wabridge.log");
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(env_filter(cfg))
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();
    Ok(guard)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load(&cli.config)?;

    match cli.command {
        Commands::Start => {
            let _log_guard = init_logging(&cfg)?;
            start(cfg).await?;
        }
        Commands::Status => {
            tracing_subscriber::fmt().with_env_filter(env_filter(&cfg)).init();
            status(&cli.config, &cfg).await?;
        }
    }
    Ok(())
}

async fn start(cfg: Config) -> anyhow::Result<()> {
    println!("{} - starting bridge...", cfg.bridge.name);

    // Session credentials and the protocol adapter.
    let store = SessionStore::open(&cfg.session_db_path()).await?;
    let credentials: Arc<dyn CredentialStore> = Arc::new(store.clone());
    let factory = Arc::new(WhatsAppFactory::new(store, &cfg.whatsapp.device_name));
    let (supervisor, messages, supervisor_task) =
        ConnectionSupervisor::spawn(factory, credentials, SupervisorConfig::from(&cfg.whatsapp));

    // Ingestion pipeline.
    let materializer = Arc::new(MediaMaterializer::from_config(&cfg)?);
    let history = Arc::new(ChatHistoryStore::from_config(&cfg)?);
    let dedup = Arc::new(DedupGuard::new(cfg.history.dedup_window()));
    let forward = Arc::new(dispatch::WebhookDispatcher::new(&cfg.webhooks)?);
    let gateway = Arc::new(gateway::Gateway::new(
        supervisor.clone(),
        MessageClassifier::new(materializer.clone()),
        history,
        dedup,
        forward,
    ));

    let qr_task = tokio::spawn(print_qr_codes(supervisor.clone()));
    let gateway_task = tokio::spawn(gateway.clone().run(messages));

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let state = api::ApiState::new(gateway, &cfg.api.api_key, materializer.dir().to_path_buf());
    let api_config = cfg.api.clone();
    let api_task = tokio::spawn(async move {
        api::serve(&api_config, state, async {
            let _ = stop_rx.await;
        })
        .await;
    });

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    let _ = stop_tx.send(());
    supervisor.shutdown().await;
    qr_task.abort();
    if let Err(e) = supervisor_task.await {
        warn!("supervisor task ended abnormally: {e}");
    }
    // The message stream closes with the supervisor, ending the gateway loop.
    if let Err(e) = gateway_task.await {
        warn!("gateway task ended abnormally: {e}");
    }
    if let Err(e) = api_task.await {
        warn!("API task ended abnormally: {e}");
    }
    info!("Shutdown complete");
    Ok(())
}

/// Render every new pairing challenge to the terminal.
async fn print_qr_codes(supervisor: SupervisorHandle) {
    let mut state = supervisor.subscribe();
    let mut last: Option<String> = None;
    loop {
        let qr = state.borrow_and_update().qr().map(str::to_string);
        if qr.is_some() && qr != last {
            if let Some(code) = qr.as_deref() {
                match generate_qr_terminal(code) {
                    Ok(rendered) => {
                        println!("\nScan with WhatsApp > Linked Devices > Link a Device:\n");
                        println!("{rendered}");
                    }
                    Err(e) => warn!("failed to render QR: {e}"),
                }
            }
        }
        last = qr;
        if state.changed().await.is_err() {
            break;
        }
    }
}

async fn status(config_path: &str, cfg: &Config) -> anyhow::Result<()> {
    println!("{} - status\n", cfg.bridge.name);
    println!("Config:      {config_path}");
    println!("Data dir:    {}", cfg.data_dir().display());
    println!("Media dir:   {}", cfg.media_dir().display());
    println!("History dir: {}", cfg.history_dir().display());
    println!("API:         {}:{}", cfg.api.host, cfg.api.port);
    println!(
        "Webhooks:    manual_reply={} ai_reply={}",
        cfg.webhooks.manual_reply.as_deref().unwrap_or("(unset)"),
        cfg.webhooks.ai_reply.as_deref().unwrap_or("(unset)")
    );
    println!();

    let db_path = cfg.session_db_path();
    let paired = if db_path.exists() {
        let store = SessionStore::open(&db_path).await?;
        store.exists().await?
    } else {
        false
    };
    println!(
        "  whatsapp: {}",
        if paired {
            "paired (credentials stored)"
        } else {
            "not paired"
        }
    );

    let history = ChatHistoryStore::from_config(cfg)?;
    let conversations = history.list_conversations().await?;
    println!("  conversations: {}", conversations.len());
    for summary in conversations.iter().take(20) {
        println!(
            "    {:<16} {:<20} {:>3} msgs {:>3} unread  {}",
            summary.number,
            summary.contact_name,
            summary.message_count,
            summary.unread_count,
            summary
                .last_timestamp
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default()
        );
    }
    Ok(())
}
