use std::sync::Arc;

use port_adhoc_compta::db::{MemoryStore, SqlServerGateway, SqlServerRepository};
use port_adhoc_compta::{create_pool, router, AppConfig, AppState};
use tracing::info;
use tracing_subscriber::{fmt::time::ChronoLocal, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 2024-01-31 14:05:00 style timestamps, RUST_LOG overrides the filter
    tracing_subscriber::fmt()
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_target(true)
        .with_level(true)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("port_adhoc_compta=info,tower_http=info")),
        )
        .init();

    let config = AppConfig::load()?;
    info!("Starting server with config: {:?}", config);

    let state = if config.database.in_memory {
        info!("Using the in-memory store");
        AppState::in_memory(Arc::new(MemoryStore::new()), &config)
    } else {
        let pool = create_pool(&config.database).await?;
        info!(
            "Database pool created for {}:{}/{}",
            config.database.host, config.database.port, config.database.database
        );
        let repository = Arc::new(SqlServerRepository::new(pool.clone()));
        let gateway = Arc::new(SqlServerGateway::new(pool, config.procedures.clone()));
        AppState::new(repository.clone(), repository, gateway, &config)
    };

    let app = router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Server listening on {}", addr);
    info!("  GET  /admin/                    - administration index");
    info!("  *    /api/:slug/                - reference data REST API");
    info!("  *    /ecritures/recherche       - écritures search");
    info!("  POST /ecritures/import[/sage|/fichier] - écritures imports");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
