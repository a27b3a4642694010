use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use voicepilot::asr::UploadThenRecognize;
use voicepilot::{
    create_router, AppState, CloudClient, CloudSettings, Config, ConversationStore, Executor,
    Orchestrator, QiniuStorage, RecognitionStrategySelector, SecurityGate, SessionJanitor,
    StreamingRecognizer,
};

#[derive(Debug, Parser)]
#[command(name = "voicepilot", version, about = "Voice command assistant server")]
struct Args {
    /// Configuration file (extension optional)
    #[arg(long, default_value = "config/voicepilot")]
    config: String,

    /// Override the listening port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let mut cfg = Config::load(&args.config)?;
    if let Some(port) = args.port {
        cfg.server.port = port;
    }

    info!("VoicePilot v{}", env!("CARGO_PKG_VERSION"));
    info!("Cloud endpoint: {}", cfg.cloud.base_url);
    info!("Safe mode: {}", cfg.security.enable_safe_mode);

    for dir in [&cfg.server.static_audio_path, &cfg.server.temp_audio_path] {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    let cloud = Arc::new(
        CloudClient::new(CloudSettings::from_config(&cfg)).context("Failed to build HTTP client")?,
    );
    let storage = Arc::new(
        QiniuStorage::new(cfg.storage.clone(), cfg.request_timeout())
            .context("Failed to build storage client")?,
    );
    if !storage.has_credentials() {
        info!("Object storage credentials not set, recognition will use the streaming channel");
    }

    let recognizer = Arc::new(RecognitionStrategySelector::new(
        Arc::new(UploadThenRecognize::new(storage, cloud.clone())),
        Arc::new(StreamingRecognizer::new(cfg.streaming())),
    ));
    let orchestrator = Arc::new(Orchestrator::new(
        recognizer,
        cloud.clone(),
        Arc::new(SecurityGate::new(cfg.security.enable_safe_mode)),
        Arc::new(Executor::with_builtin(cloud.clone())),
        cloud,
    ));

    let conversations = Arc::new(
        ConversationStore::open(
            &cfg.session.storage_path,
            cfg.session.max_history,
            cfg.session_expiry(),
        )
        .await
        .context("Failed to open conversation store")?,
    );

    let shutdown = CancellationToken::new();
    let janitor = SessionJanitor::start(
        conversations.clone(),
        cfg.cleanup_interval(),
        shutdown.child_token(),
    );

    let state = AppState::new(
        orchestrator,
        conversations,
        &cfg.server.temp_audio_path,
        &cfg.server.static_audio_path,
        cfg.server.max_audio_size,
    );
    let app = create_router(state);

    let addr = format!("{}:{}", cfg.server.bind, cfg.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("HTTP server listening on {}", addr);

    let token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
            token.cancel();
        })
        .await
        .context("HTTP server failed")?;

    shutdown.cancel();
    janitor.stop().await;
    info!("Stopped");
    Ok(())
}
