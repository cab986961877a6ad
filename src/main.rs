use std::sync::Arc;

use anyhow::Context;
use graph_gullible::api::{AppState, router};
use graph_gullible::config::AppConfig;
use graph_gullible::conversation::{LlmResponseGenerator, ResponseGenerator};
use graph_gullible::llm::{LlmBackend, LlmConfig, create_provider};
use graph_gullible::scenario::ScenarioCatalog;
use graph_gullible::store::{Database, LibSqlBackend, PersistenceGateway};
use graph_gullible::study::StudyManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env().context("Failed to load configuration")?;

    eprintln!("📊 GraphGullible v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.model);
    eprintln!("   API: http://0.0.0.0:{}/api", config.port);
    eprintln!("   Database: {}\n", config.db_path.display());

    // ── LLM ──────────────────────────────────────────────────────────────
    let llm = create_provider(&LlmConfig {
        backend: LlmBackend::Gemini,
        api_key: config.api_key.clone(),
        model: config.model.clone(),
        base_url: config.gemini_base_url.clone(),
    })?;
    let generator: Arc<dyn ResponseGenerator> =
        Arc::new(LlmResponseGenerator::new(llm, config.generator.clone()));

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?,
    );
    let (gateway, _writer) = PersistenceGateway::spawn(db.clone());

    // ── Study + API ──────────────────────────────────────────────────────
    let catalog = Arc::new(ScenarioCatalog::builtin());
    let study = Arc::new(StudyManager::new(
        config.surveys.clone(),
        db.clone(),
        gateway.clone(),
    ));
    let state = AppState::new(catalog, generator, db, gateway.clone(), study);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;
    tracing::info!(port = config.port, "GraphGullible API started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown requested");
        })
        .await?;

    // Drain queued writes before exiting.
    gateway.flush().await;
    Ok(())
}
