// Background task scheduler
// Periodic maintenance: stale checkout sweep and expired session purge

use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::AppState;

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60 * 60);

pub struct BackgroundTaskManager {
    state: AppState,
    interval: Duration,
}

impl BackgroundTaskManager {
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            interval: MAINTENANCE_INTERVAL,
        }
    }

    /// Start all background tasks
    pub fn start_all_tasks(&self) -> Vec<JoinHandle<()>> {
        info!("Starting background maintenance tasks every {:?}", self.interval);
        vec![self.spawn_payment_sweep(), self.spawn_session_purge()]
    }

    fn spawn_payment_sweep(&self) -> JoinHandle<()> {
        let payments = self.state.payments.clone();
        let period = self.interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if let Err(e) = payments.expire_stale().await {
                    error!("Stale payment sweep failed: {}", e);
                }
            }
        })
    }

    fn spawn_session_purge(&self) -> JoinHandle<()> {
        let sessions = self.state.sessions.clone();
        let period = self.interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                match sessions.purge_expired().await {
                    Ok(0) => {},
                    Ok(purged) => info!("Purged {} expired sessions", purged),
                    Err(e) => error!("Session purge failed: {}", e),
                }
            }
        })
    }
}

/// Initialize background tasks (call this in main.rs)
pub fn initialize_background_tasks(state: AppState) -> Vec<JoinHandle<()>> {
    BackgroundTaskManager::new(state).start_all_tasks()
}
