// Migration orchestrator for the headshot backend
// Embedded in the application binary so deploys need no diesel CLI

pub mod diesel;

use std::error::Error;
use tracing::{error, info};

/// Configuration for migration execution
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    pub database_url: String,
    pub environment: String,
}

impl MigrationConfig {
    pub fn from_app_config(config: &crate::app_config::AppConfig) -> Self {
        Self {
            database_url: config.database.url.clone(),
            environment: config.environment.to_string(),
        }
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self::from_app_config(crate::app_config::config())
    }
}

/// Run all pending schema migrations
pub async fn run_all_migrations(config: MigrationConfig) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!(
        "[MIGRATIONS] Starting migration process for environment: {}",
        config.environment
    );

    match diesel::run_migrations(&config.database_url).await {
        Ok(applied_count) if applied_count > 0 => {
            info!("[MIGRATIONS] ✓ Applied {} Diesel migrations", applied_count);
        },
        Ok(_) => {
            info!("[MIGRATIONS] ✓ Diesel migrations up to date");
        },
        Err(e) => {
            error!("[MIGRATIONS] ✗ Diesel migration failed: {}", e);
            return Err(format!("Diesel migration failed: {}", e).into());
        },
    }

    Ok(())
}

/// Check if migrations should run based on environment variables
pub fn should_run_migrations(config: &crate::app_config::AppConfig) -> bool {
    !config.disable_embedded_migrations
}
