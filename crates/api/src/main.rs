use anyhow::{Context, Result};
use api::config::LoggingConfig;
use api::{AppConfig, AppState, CacheStore, DocumentAnalyzer, MemoryCache, Metrics, NoCache, OperationMode};
use compliance::RuleSet;
use query::OllamaAnswerModel;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));
    let registry = tracing_subscriber::registry().with(filter);
    if logging.json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("LEXGRAPH_CONFIG").ok())
        .map(PathBuf::from);
    let mode = std::env::var("LEXGRAPH_MODE")
        .ok()
        .map(|m| m.parse::<OperationMode>())
        .transpose()?;
    let config = AppConfig::load(config_path.as_deref(), mode)?;

    init_tracing(&config.logging);

    let rules = match &config.rules.path {
        Some(path) => RuleSet::from_file(path)
            .with_context(|| format!("Failed to load rules from {}", path.display()))?,
        None => RuleSet::builtin(),
    };
    tracing::info!(rules = rules.rules.len(), mode = ?config.mode, "Loaded rule set");

    let cache: Arc<dyn CacheStore> = if config.cache.enabled {
        Arc::new(MemoryCache::new(config.cache.max_entries))
    } else {
        Arc::new(NoCache)
    };
    let metrics = Metrics::new();

    let analyzer = DocumentAnalyzer::from_config(&config, rules, Arc::clone(&cache), Arc::clone(&metrics))?;
    let answer_model = OllamaAnswerModel::new(
        config.llm.base_url.clone(),
        config.llm.answer_model.clone(),
        Duration::from_secs(config.llm.request_timeout_secs),
    )?;

    let bind_addr = config.server.bind_addr.clone();
    let state = Arc::new(AppState::new(config, analyzer, Arc::new(answer_model), cache, metrics));
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {bind_addr}"))?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
