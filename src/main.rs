use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tiercomp::{api, config::Config, db::init_db, CompensationService, LoggingSink, Repository};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    let config = Config::from_env().context("Configuration error")?;
    let port = config.port;

    let pool = init_db(&config.database_path)
        .await
        .context("Failed to initialize database")?;
    let repo = Arc::new(Repository::new(pool));

    let service = Arc::new(CompensationService::new(
        repo,
        Arc::new(LoggingSink),
        config.plan.clone(),
    ));
    tracing::info!(
        manager_step = service.plan().manager_step(),
        cycle_amount = %service.plan().cycle_amount,
        max_cycles_per_day = service.plan().max_cycles_per_day,
        "Compensation plan loaded"
    );

    let app = api::create_router(api::AppState::new(service));

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
