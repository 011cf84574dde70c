use anyhow::Context;
use kolbook::compile::spawn_rollup_scheduler;
use kolbook::{api, config::Config, db::init_db_with_timeout, Ledger, Repository, RollupCompiler};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    let config = Config::from_env().context("configuration error")?;
    let port = config.port;

    let pool = init_db_with_timeout(&config.database_path, config.db_timeout())
        .await
        .with_context(|| format!("failed to initialize database at {}", config.database_path))?;

    let repo = Arc::new(Repository::new(pool));
    let ledger = Arc::new(Ledger::new(repo.clone(), &config));
    let compiler = RollupCompiler::new(repo, config.db_timeout());

    let _scheduler = spawn_rollup_scheduler(
        compiler.clone(),
        Duration::from_secs(config.rollup_interval_secs),
    );

    let app = api::create_router(api::AppState::new(ledger, compiler));

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
