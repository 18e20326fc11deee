// Chatrun API server
// Decision: Backends are chosen by environment: Redis and PostgreSQL when configured,
//           in-memory otherwise so a single process runs with zero setup
// Decision: Without an LLM API key the server answers with the echo model

use std::sync::Arc;

use anyhow::{Context, Result};
use chatrun_control_plane::reclaim::spawn_reclaim_loop;
use chatrun_control_plane::{build_app, AppState, ServerConfig};
use chatrun_core::telemetry::{init_telemetry, TelemetryConfig};
use chatrun_core::{
    AgentConfig, ChatRunner, ChatWorkflow, EchoModel, InMemorySessionStore, LanguageModel,
    OpenAiCompatibleModel, OpenAiConfig, RegistryConfig, SessionRegistry, SessionStore,
    ToolRegistry,
};
use chatrun_durable::{InMemoryRunLedger, PostgresRunLedger, RunLedger, RunnerConfig, WorkflowRunner};
use sqlx::postgres::PgPoolOptions;

async fn session_store(config: &ServerConfig) -> Result<(Arc<dyn SessionStore>, &'static str)> {
    match config.redis_url.as_deref() {
        #[cfg(feature = "redis")]
        Some(url) => {
            let store = chatrun_core::RedisSessionStore::connect(url)
                .await
                .context("Failed to connect to Redis")?;
            tracing::info!("Using Redis session store");
            Ok((Arc::new(store), "redis"))
        }
        #[cfg(not(feature = "redis"))]
        Some(_) => anyhow::bail!("REDIS_URL is set but the redis feature is disabled"),
        None => {
            tracing::warn!("REDIS_URL not set, using in-memory session store (single process only)");
            Ok((Arc::new(InMemorySessionStore::new()), "memory"))
        }
    }
}

async fn run_ledger(config: &ServerConfig) -> Result<(Arc<dyn RunLedger>, &'static str)> {
    match config.database_url.as_deref() {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await
                .context("Failed to connect to database")?;
            let ledger = PostgresRunLedger::new(pool);
            ledger
                .migrate()
                .await
                .context("Failed to apply run ledger migrations")?;
            tracing::info!("Using PostgreSQL run ledger");
            Ok((Arc::new(ledger), "postgres"))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory run ledger (runs do not survive restarts)");
            Ok((Arc::new(InMemoryRunLedger::new()), "memory"))
        }
    }
}

fn language_model() -> Arc<dyn LanguageModel> {
    let config = OpenAiConfig::from_env();
    match OpenAiCompatibleModel::from_config(&config) {
        Some(model) => {
            tracing::info!(model = %model.name(), api_url = %model.api_url(), "Using OpenAI-compatible model");
            Arc::new(model)
        }
        None => {
            tracing::warn!("LLM_API_KEY not set, replies come from the echo model");
            Arc::new(EchoModel::default())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let mut telemetry_config = TelemetryConfig::from_env();
    if telemetry_config.service_name == "chatrun" {
        telemetry_config.service_name = "chatrun-control-plane".to_string();
    }
    if telemetry_config.log_filter.is_none() {
        telemetry_config.log_filter =
            Some("chatrun_control_plane=debug,chatrun_core=info,chatrun_durable=info,tower_http=debug".to_string());
    }
    init_telemetry(telemetry_config);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "chatrun-control-plane starting...");

    let config = ServerConfig::from_env();

    let (store, store_backend) = session_store(&config).await?;
    let registry = SessionRegistry::new(store, &RegistryConfig::from_env());
    tracing::info!(backend = store_backend, ?registry, "Session registry ready");

    let (ledger, ledger_backend) = run_ledger(&config).await?;
    let workflow_runner = WorkflowRunner::new(ledger, RunnerConfig::from_env());
    tracing::info!(worker_id = %workflow_runner.worker_id(), "Workflow runner ready");

    let workflow = ChatWorkflow::new(
        language_model(),
        ToolRegistry::with_defaults(),
        AgentConfig::from_env(),
    );
    let runner = ChatRunner::new(workflow_runner.clone(), workflow);

    let reclaim = spawn_reclaim_loop(workflow_runner, config.reclaim_interval());

    let state = AppState::new(registry, runner, config.stream_options())
        .with_ledger_backend(ledger_backend);
    let app = build_app(state, &config);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    tracing::info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    reclaim.abort();
    tracing::info!("chatrun-control-plane stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
