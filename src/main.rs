use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use headshot_backend::{
    app_config,
    build_router,
    db::{create_diesel_pool, mask_connection_string, DieselDatabaseConfig},
    migrations::{self, MigrationConfig},
    services::initialize_background_tasks,
    AppState, Providers,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables before the config is first touched
    dotenv::dotenv().ok();

    let config = app_config::AppConfig::from_env().context("Invalid configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.rust_log.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting headshot backend ({}) on {}",
        config.environment, config.server.bind_address
    );
    info!("Database URL: {}", mask_connection_string(&config.database.url));

    if migrations::should_run_migrations(&config) {
        migrations::run_all_migrations(MigrationConfig::from_app_config(&config))
            .await
            .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;
    } else {
        info!("Embedded migrations disabled");
    }

    let diesel_pool = create_diesel_pool(DieselDatabaseConfig::from_app_config(&config))
        .await
        .map_err(|e| {
            error!("Failed to initialize database pool: {}", e);
            anyhow::anyhow!("Database initialization failed: {}", e)
        })?;

    let providers = Providers::from_config(&config);
    let bind_address = config.server.bind_address.clone();
    let state = AppState::new(diesel_pool, config, providers)
        .context("Failed to initialize application state")?;

    state
        .storage
        .ensure_dirs()
        .await
        .context("Failed to create storage directories")?;

    let _tasks = initialize_background_tasks(state.clone());
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", bind_address))?;
    info!("Listening on {}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
