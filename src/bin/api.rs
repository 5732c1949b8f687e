use finsight::{
    api::{start_server, ApiState},
    assistant::GeminiAssistant,
    auth::AuthService,
    config::ServerConfig,
    ledger::{seed, Ledger},
    state::{InMemoryStore, PostgresStore, Store},
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info")),
        )
        .init();

    let config = ServerConfig::from_env()?;

    if config.gemini_api_key.is_empty() {
        warn!("GEMINI_API_KEY not set; /api/chatbot will fail until it is configured");
    }

    info!("🚀 FinSight Budget Ledger - API Server");
    info!("📍 Port: {}", config.port);

    // Pick the store
    let store: Arc<dyn Store> = match config.database_url.as_deref() {
        Some(url) => {
            let store = PostgresStore::connect_lazy(url, config.database_max_connections)?;
            store.ensure_schema().await?;
            info!("Ledger backend: postgres");
            Arc::new(store)
        }
        None => {
            info!("Ledger backend: in-memory");
            Arc::new(InMemoryStore::new())
        }
    };

    // Create components
    let ledger = Arc::new(Ledger::new(store.clone()));
    let auth = Arc::new(AuthService::new(
        store,
        chrono::Duration::hours(config.session_ttl_hours),
    ));
    let assistant = Arc::new(GeminiAssistant::new(
        config.gemini_api_key.clone(),
        &config.gemini_model,
    )?);

    if config.seed_demo_data {
        let inserted = ledger.seed_if_empty(&seed::default_budgets()).await?;
        if inserted > 0 {
            info!(inserted, "Demo budgets seeded");
        }
    }

    info!("✅ Ledger initialized");
    info!("📡 Starting API server...");

    start_server(ApiState::new(ledger, auth, assistant), config.port).await?;

    Ok(())
}
