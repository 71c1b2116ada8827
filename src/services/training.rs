// Training Service
// Submits LoRA training jobs and drives each job from `training` to a terminal state.
// Webhooks and the per-job poller both finalize through `finalize`, which only has
// side effects when its guarded update actually moved the row out of `training`.

use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::AsyncConnection;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::app_config::AppConfig;
use crate::config::TRAIN_COST;
use crate::db::DieselPool;
use crate::models::photo::UploadedPhoto;
use crate::models::token_transaction::TransactionType;
use crate::models::training_model::{NewTrainingModel, TerminalUpdate, TrainingModel};
use crate::models::user::User;
use crate::services::bundle_link::BundleLinkSigner;
use crate::services::email::EmailService;
use crate::services::ledger::{LedgerEntry, LedgerError, TokenLedger};
use crate::services::replicate::{
    error_text, training_input, InferenceProvider, TrainingOutput, TrainingRequest,
};
use crate::utils::ServiceError;

pub const CANCELED_MESSAGE: &str = "Training was canceled - tokens refunded";
pub const POLL_TIMEOUT_MESSAGE: &str =
    "Training status polling timed out after 1 hour - tokens refunded";

/// Number of trailing log lines inspected for a progress marker
const PROGRESS_WINDOW: usize = 20;

static PERCENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)%").unwrap());

/// Body of a provider training webhook
#[derive(Debug, Clone, Deserialize)]
pub struct TrainingWebhook {
    #[serde(default)]
    pub id: Option<String>,
    pub status: String,
    #[serde(default)]
    pub logs: Option<String>,
    #[serde(default)]
    pub webhook: Option<String>,
    #[serde(default)]
    pub output: Option<TrainingOutput>,
    #[serde(default)]
    pub error: Option<JsonValue>,
}

#[derive(Clone)]
pub struct TrainingSettings {
    pub public_base_url: String,
    pub owner: String,
    pub poll_interval: Duration,
    pub poll_max_attempts: u32,
    pub bundle_links: BundleLinkSigner,
}

impl TrainingSettings {
    pub fn from_app_config(config: &AppConfig, bundle_links: BundleLinkSigner) -> Self {
        Self {
            public_base_url: config.server.public_base_url.trim_end_matches('/').to_string(),
            owner: config.replicate.owner.clone(),
            poll_interval: Duration::from_secs(config.replicate.poll_interval_secs),
            poll_max_attempts: config.replicate.poll_max_attempts,
            bundle_links,
        }
    }

    pub fn webhook_url(&self, model_id: i32) -> String {
        format!(
            "{}/api/webhooks/training-complete?modelId={}",
            self.public_base_url, model_id
        )
    }

    /// Signed, expiring link to a zip of exactly `photo_ids`
    pub fn photo_zip_url(&self, user_id: i32, photo_ids: &[i32], now: i64) -> String {
        format!(
            "{}/api/photos/zip/{}?{}",
            self.public_base_url,
            user_id,
            self.bundle_links.query(user_id, photo_ids, now)
        )
    }
}

enum PollOutcome {
    Pending,
    Finished,
}

#[derive(Clone)]
pub struct TrainingService {
    pool: DieselPool,
    ledger: TokenLedger,
    provider: Arc<dyn InferenceProvider>,
    email: EmailService,
    settings: TrainingSettings,
}

impl TrainingService {
    pub fn new(
        pool: DieselPool,
        provider: Arc<dyn InferenceProvider>,
        email: EmailService,
        settings: TrainingSettings,
    ) -> Self {
        Self {
            ledger: TokenLedger::new(pool.clone()),
            pool,
            provider,
            email,
            settings,
        }
    }

    /// Start training a personal model from the caller's photos
    #[instrument(skip(self, photo_ids), fields(photos = photo_ids.len()))]
    pub async fn submit(
        &self,
        user_id: i32,
        photo_ids: &[i32],
    ) -> Result<TrainingModel, ServiceError> {
        if photo_ids.is_empty() {
            return Err(ServiceError::validation("At least one photo is required"));
        }

        let (user, selected) = {
            let mut conn = self.pool.get().await?;
            let owned = UploadedPhoto::find_owned(&mut conn, user_id, photo_ids).await?;
            if owned.is_empty() {
                return Err(ServiceError::validation("No valid photos selected"));
            }
            let user = User::find_by_id(&mut conn, user_id)
                .await?
                .ok_or_else(|| ServiceError::NotFound("User".to_string()))?;
            let selected: Vec<i32> = owned.iter().map(|p| p.id).collect();
            (user, selected)
        };

        self.ledger.check_balance(user_id, TRAIN_COST).await?;

        let destination = self
            .provider
            .get_or_create_model(&self.settings.owner, &user.username)
            .await?;

        // Model row and its charge commit together
        let model = {
            let mut conn = self.pool.get().await?;
            conn.transaction::<_, LedgerError, _>(|conn| {
                async move {
                    let model = TrainingModel::create(
                        conn,
                        NewTrainingModel::training(user_id, destination.name),
                    )
                    .await?;
                    TokenLedger::deduct_in(
                        conn,
                        user_id,
                        TRAIN_COST,
                        LedgerEntry::new(TransactionType::TrainModel)
                            .reference(model.id)
                            .metadata(json!({ "action": "train" })),
                    )
                    .await?;
                    Ok(model)
                }
                .scope_boxed()
            })
            .await?
        };

        let request = TrainingRequest {
            destination: format!("{}/{}", self.settings.owner, model.replicate_model_id),
            webhook: self.settings.webhook_url(model.id),
            webhook_events_filter: vec!["completed".to_string(), "logs".to_string()],
            input: training_input(&self.settings.photo_zip_url(
                user_id,
                &selected,
                chrono::Utc::now().timestamp(),
            )),
        };

        let job = match self.provider.create_training(request).await {
            Ok(job) => job,
            Err(err) => {
                error!("Failed to start training for model {}: {}", model.id, err);
                let update = TerminalUpdate::Failed {
                    error: failed_message(&err.to_string()),
                };
                if let Err(finalize_err) = self.finalize(model.id, update).await {
                    error!(
                        "Failed to finalize model {} after submission error: {}",
                        model.id, finalize_err
                    );
                }
                return Err(err.into());
            },
        };

        {
            let mut conn = self.pool.get().await?;
            TrainingModel::set_training_id(&mut conn, model.id, &job.id).await?;
        }

        info!("Training {} started for model {}", job.id, model.id);
        self.spawn_poller(model.id, job.id);

        Ok(model)
    }

    pub async fn list_models(&self, user_id: i32) -> Result<Vec<TrainingModel>, ServiceError> {
        let mut conn = self.pool.get().await?;
        Ok(TrainingModel::find_by_user(&mut conn, user_id).await?)
    }

    /// A model visible only to its owner
    pub async fn get_model(&self, user_id: i32, model_id: i32) -> Result<TrainingModel, ServiceError> {
        let mut conn = self.pool.get().await?;
        let model = TrainingModel::find_by_id(&mut conn, model_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Model".to_string()))?;

        if model.user_id != user_id {
            return Err(ServiceError::Forbidden);
        }
        Ok(model)
    }

    /// Apply a provider webhook to the model it names
    #[instrument(skip(self, payload), fields(status = %payload.status))]
    pub async fn handle_webhook(
        &self,
        model_id: i32,
        payload: TrainingWebhook,
    ) -> Result<(), ServiceError> {
        let model = {
            let mut conn = self.pool.get().await?;
            let model = TrainingModel::find_by_id(&mut conn, model_id)
                .await?
                .ok_or_else(|| ServiceError::NotFound("Model".to_string()))?;

            if let Some(progress) = payload.logs.as_deref().and_then(parse_progress) {
                TrainingModel::update_progress(&mut conn, model_id, progress).await?;
            }
            model
        };

        let update = match payload.status.as_str() {
            "succeeded" => {
                let training_id = model.replicate_training_id.clone().or(payload.id.clone());
                let version = match training_id {
                    Some(id) => match self.provider.get_training(&id).await {
                        Ok(job) => job.version(),
                        Err(e) => {
                            warn!("Could not fetch training {}: {}", id, e);
                            None
                        },
                    },
                    None => None,
                }
                .or_else(|| payload.output.and_then(|o| o.version));

                Some(TerminalUpdate::Completed {
                    version_id: version.as_deref().map(version_hash),
                })
            },
            other => terminal_update(other, payload.error, None),
        };

        if let Some(update) = update {
            self.finalize(model_id, update).await?;
        }

        Ok(())
    }

    /// Guarded move out of `training`. The refund commits with the status change and
    /// only when this call changed the row; returns whether it did.
    #[instrument(skip(self, update), fields(status = update.status().as_str()))]
    pub async fn finalize(&self, model_id: i32, update: TerminalUpdate) -> Result<bool, ServiceError> {
        let mut conn = self.pool.get().await?;
        let update_ref = &update;

        let owner = conn
            .transaction::<_, LedgerError, _>(|conn| {
                async move {
                    let Some(model) = TrainingModel::find_by_id(conn, model_id).await? else {
                        return Ok(None);
                    };

                    let changed = TrainingModel::finish_if_training(conn, model_id, update_ref).await?;
                    if changed != 1 {
                        return Ok(None);
                    }

                    if update_ref.refunds() {
                        TokenLedger::refund_in(
                            conn,
                            model.user_id,
                            TRAIN_COST,
                            Some(model_id),
                            update_ref.error().unwrap_or_default(),
                        )
                        .await?;
                    }

                    Ok(Some(model.user_id))
                }
                .scope_boxed()
            })
            .await?;

        let Some(user_id) = owner else {
            debug!("Model {} already finalized, nothing to do", model_id);
            return Ok(false);
        };

        info!("Model {} is now {}", model_id, update.status().as_str());

        if matches!(update, TerminalUpdate::Completed { .. }) {
            self.notify_completed(user_id, model_id).await;
        }

        Ok(true)
    }

    async fn notify_completed(&self, user_id: i32, model_id: i32) {
        let user = match self.pool.get().await {
            Ok(mut conn) => User::find_by_id(&mut conn, user_id).await.ok().flatten(),
            Err(e) => {
                warn!("No connection for completion email: {}", e);
                None
            },
        };

        let Some(user) = user else { return };
        let Some(email) = user.email.as_deref() else { return };

        if let Err(e) = self
            .email
            .send_training_complete(email, user.display_name.as_deref(), model_id)
            .await
        {
            error!("Failed to send completion email for model {}: {}", model_id, e);
        }
    }

    fn spawn_poller(&self, model_id: i32, training_id: String) {
        let service = self.clone();
        tokio::spawn(async move {
            service.poll_until_terminal(model_id, training_id).await;
        });
    }

    /// Backup path for missed webhooks. Gives up after the configured number of
    /// attempts and fails the job with a refund.
    pub async fn poll_until_terminal(&self, model_id: i32, training_id: String) {
        for attempt in 1..=self.settings.poll_max_attempts {
            tokio::time::sleep(self.settings.poll_interval).await;

            match self.poll_once(model_id, &training_id).await {
                Ok(PollOutcome::Finished) => return,
                Ok(PollOutcome::Pending) => {
                    debug!("Training {} still running (attempt {})", training_id, attempt)
                },
                Err(e) => warn!(
                    "Polling attempt {} for training {} failed: {}",
                    attempt, training_id, e
                ),
            }
        }

        warn!("Polling for training {} timed out", training_id);
        let update = TerminalUpdate::Failed {
            error: POLL_TIMEOUT_MESSAGE.to_string(),
        };
        if let Err(e) = self.finalize(model_id, update).await {
            error!("Failed to finalize timed out model {}: {}", model_id, e);
        }
    }

    async fn poll_once(&self, model_id: i32, training_id: &str) -> Result<PollOutcome, ServiceError> {
        {
            let mut conn = self.pool.get().await?;
            match TrainingModel::find_by_id(&mut conn, model_id).await? {
                Some(model) if !model.is_terminal() => {},
                _ => return Ok(PollOutcome::Finished),
            }
        }

        let job = self.provider.get_training(training_id).await?;

        if let Some(progress) = job.logs.as_deref().and_then(parse_progress) {
            let mut conn = self.pool.get().await?;
            TrainingModel::update_progress(&mut conn, model_id, progress).await?;
        }

        let version = job.version();
        match terminal_update(&job.status, job.error, version) {
            Some(update) => {
                self.finalize(model_id, update).await?;
                Ok(PollOutcome::Finished)
            },
            None => Ok(PollOutcome::Pending),
        }
    }
}

/// Terminal update for a provider status; None while the job is still running
pub fn terminal_update(
    status: &str,
    error: Option<JsonValue>,
    version: Option<String>,
) -> Option<TerminalUpdate> {
    match status {
        "succeeded" => Some(TerminalUpdate::Completed {
            version_id: version.as_deref().map(version_hash),
        }),
        "failed" => Some(TerminalUpdate::Failed {
            error: failed_message(&error_text(error)),
        }),
        "canceled" => Some(TerminalUpdate::Canceled {
            error: CANCELED_MESSAGE.to_string(),
        }),
        _ => None,
    }
}

pub fn failed_message(reason: &str) -> String {
    format!("Training failed: {} - tokens refunded", reason)
}

/// Version id without the `owner/model:` prefix
pub fn version_hash(version: &str) -> String {
    version.rsplit(':').next().unwrap_or(version).to_string()
}

/// Progress percentage from the tail of the trainer logs
pub fn parse_progress(logs: &str) -> Option<i32> {
    let lines: Vec<&str> = logs.lines().collect();
    let start = lines.len().saturating_sub(PROGRESS_WINDOW);

    lines[start..]
        .iter()
        .filter(|line| line.contains("flux_train_replicate"))
        .find_map(|line| PERCENT_RE.captures(line))
        .and_then(|caps| caps[1].parse::<i32>().ok())
        .map(|p| p.clamp(0, 100))
}

/// Model id from the request's `modelId` parameter, else from the `webhook` URL echoed back
pub fn webhook_model_id(query_model_id: Option<&str>, webhook: Option<&str>) -> Option<i32> {
    if let Some(id) = query_model_id.and_then(|s| s.parse().ok()) {
        return Some(id);
    }

    let url = url::Url::parse(webhook?).ok()?;
    let id = url
        .query_pairs()
        .find(|(key, _)| key == "modelId")
        .and_then(|(_, value)| value.parse().ok());
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_progress_reads_trainer_lines() {
        let logs = "loading\nflux_train_replicate:  42%|####      | 840/2000\n";
        assert_eq!(parse_progress(logs), Some(42));
    }

    #[test]
    fn test_parse_progress_ignores_other_lines() {
        let logs = "download 99%\nsomething else 50%";
        assert_eq!(parse_progress(logs), None);
    }

    #[test]
    fn test_parse_progress_only_looks_at_recent_lines() {
        let mut lines = vec!["flux_train_replicate: 10%".to_string()];
        lines.extend((0..25).map(|i| format!("step {}", i)));
        assert_eq!(parse_progress(&lines.join("\n")), None);

        lines.push("flux_train_replicate: 77%".to_string());
        assert_eq!(parse_progress(&lines.join("\n")), Some(77));
    }

    #[test]
    fn test_parse_progress_takes_first_match_in_window() {
        let logs = "flux_train_replicate: 30%\nflux_train_replicate: 31%";
        assert_eq!(parse_progress(logs), Some(30));
    }

    #[test]
    fn test_parse_progress_clamps() {
        assert_eq!(parse_progress("flux_train_replicate 250%"), Some(100));
    }

    #[test]
    fn test_terminal_update_mapping() {
        assert_eq!(
            terminal_update("failed", Some(json!("OOM")), None),
            Some(TerminalUpdate::Failed {
                error: "Training failed: OOM - tokens refunded".to_string()
            })
        );
        assert_eq!(
            terminal_update("failed", None, None),
            Some(TerminalUpdate::Failed {
                error: "Training failed: Unknown error - tokens refunded".to_string()
            })
        );
        assert_eq!(
            terminal_update("canceled", None, None),
            Some(TerminalUpdate::Canceled {
                error: CANCELED_MESSAGE.to_string()
            })
        );
        assert_eq!(
            terminal_update("succeeded", None, Some("duchovs/user_1:abc123".to_string())),
            Some(TerminalUpdate::Completed {
                version_id: Some("abc123".to_string())
            })
        );
        assert_eq!(terminal_update("processing", None, None), None);
        assert_eq!(terminal_update("starting", None, None), None);
    }

    #[test]
    fn test_version_hash() {
        assert_eq!(version_hash("owner/model:deadbeef"), "deadbeef");
        assert_eq!(version_hash("deadbeef"), "deadbeef");
    }

    #[test]
    fn test_webhook_model_id_resolution() {
        assert_eq!(webhook_model_id(Some("12"), None), Some(12));
        assert_eq!(
            webhook_model_id(
                None,
                Some("https://api.example.com/api/webhooks/training-complete?modelId=31")
            ),
            Some(31)
        );
        assert_eq!(
            webhook_model_id(
                Some("junk"),
                Some("https://api.example.com/api/webhooks/training-complete?modelId=5")
            ),
            Some(5)
        );
        assert_eq!(webhook_model_id(None, Some("not a url")), None);
        assert_eq!(webhook_model_id(None, None), None);
    }

    #[test]
    fn test_settings_urls() {
        let settings = TrainingSettings {
            public_base_url: "https://api.example.com".to_string(),
            owner: "duchovs".to_string(),
            poll_interval: Duration::from_secs(30),
            poll_max_attempts: 120,
            bundle_links: BundleLinkSigner::new("bundle-secret-for-tests-0123456789", 60),
        };
        assert_eq!(
            settings.webhook_url(9),
            "https://api.example.com/api/webhooks/training-complete?modelId=9"
        );

        let zip_url = settings.photo_zip_url(4, &[12, 11], 1_700_000_000);
        assert!(zip_url.starts_with(
            "https://api.example.com/api/photos/zip/4?photos=11,12&expires=1700000060&signature="
        ));
    }
}
