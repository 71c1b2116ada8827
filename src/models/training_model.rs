// Training Model Database Model
// One row per personalized model training job; rows are never deleted

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};

use crate::schema::models;

/// Lifecycle state of a training job
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    Training,
    Completed,
    Failed,
    Canceled,
}

impl ModelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelStatus::Training => "training",
            ModelStatus::Completed => "completed",
            ModelStatus::Failed => "failed",
            ModelStatus::Canceled => "canceled",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "training" => Some(ModelStatus::Training),
            "completed" => Some(ModelStatus::Completed),
            "failed" => Some(ModelStatus::Failed),
            "canceled" => Some(ModelStatus::Canceled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ModelStatus::Training)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = models)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[serde(rename_all = "camelCase")]
pub struct TrainingModel {
    pub id: i32,
    pub user_id: i32,
    pub replicate_model_id: String,
    pub replicate_version_id: Option<String>,
    pub replicate_training_id: Option<String>,
    pub status: String,
    pub progress: i32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = models)]
pub struct NewTrainingModel {
    pub user_id: i32,
    pub replicate_model_id: String,
    pub status: String,
    pub progress: i32,
}

impl NewTrainingModel {
    pub fn training(user_id: i32, replicate_model_id: String) -> Self {
        Self {
            user_id,
            replicate_model_id,
            status: ModelStatus::Training.as_str().to_string(),
            progress: 0,
        }
    }
}

/// Terminal state to apply through the guarded transition
#[derive(Debug, Clone, PartialEq)]
pub enum TerminalUpdate {
    Completed { version_id: Option<String> },
    Failed { error: String },
    Canceled { error: String },
}

impl TerminalUpdate {
    pub fn status(&self) -> ModelStatus {
        match self {
            TerminalUpdate::Completed { .. } => ModelStatus::Completed,
            TerminalUpdate::Failed { .. } => ModelStatus::Failed,
            TerminalUpdate::Canceled { .. } => ModelStatus::Canceled,
        }
    }

    /// Failed and canceled jobs return the training cost to the user
    pub fn refunds(&self) -> bool {
        !matches!(self, TerminalUpdate::Completed { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            TerminalUpdate::Completed { .. } => None,
            TerminalUpdate::Failed { error } | TerminalUpdate::Canceled { error } => Some(error),
        }
    }
}

impl TrainingModel {
    pub fn status(&self) -> Option<ModelStatus> {
        ModelStatus::from_string(&self.status)
    }

    pub fn is_terminal(&self) -> bool {
        self.status().map(|s| s.is_terminal()).unwrap_or(true)
    }

    /// Human readable state summary returned by the status endpoint
    pub fn status_message(&self) -> &str {
        match self.status() {
            Some(ModelStatus::Failed) => self.error.as_deref().unwrap_or("Training failed"),
            Some(ModelStatus::Training) => "Model is training...",
            Some(ModelStatus::Completed) => "Training completed successfully",
            Some(ModelStatus::Canceled) => self.error.as_deref().unwrap_or("Training was canceled"),
            None => "Unknown status",
        }
    }

    pub async fn create(
        conn: &mut AsyncPgConnection,
        new_model: NewTrainingModel,
    ) -> Result<Self, diesel::result::Error> {
        diesel::insert_into(models::table)
            .values(&new_model)
            .returning(TrainingModel::as_returning())
            .get_result(conn)
            .await
    }

    pub async fn find_by_id(
        conn: &mut AsyncPgConnection,
        model_id: i32,
    ) -> Result<Option<Self>, diesel::result::Error> {
        models::table
            .find(model_id)
            .select(TrainingModel::as_select())
            .first(conn)
            .await
            .optional()
    }

    /// Models owned by a user, newest first
    pub async fn find_by_user(
        conn: &mut AsyncPgConnection,
        user_id: i32,
    ) -> Result<Vec<Self>, diesel::result::Error> {
        models::table
            .filter(models::user_id.eq(user_id))
            .order(models::created_at.desc())
            .select(TrainingModel::as_select())
            .load(conn)
            .await
    }

    pub async fn set_training_id(
        conn: &mut AsyncPgConnection,
        model_id: i32,
        training_id: &str,
    ) -> Result<usize, diesel::result::Error> {
        diesel::update(models::table.find(model_id))
            .set(models::replicate_training_id.eq(training_id))
            .execute(conn)
            .await
    }

    /// Write progress only while the job is still training
    pub async fn update_progress(
        conn: &mut AsyncPgConnection,
        model_id: i32,
        progress: i32,
    ) -> Result<usize, diesel::result::Error> {
        diesel::update(
            models::table
                .filter(models::id.eq(model_id))
                .filter(models::status.eq(ModelStatus::Training.as_str())),
        )
        .set(models::progress.eq(progress.clamp(0, 100)))
        .execute(conn)
        .await
    }

    /// Compare-and-set move out of `training`. Returns the number of rows changed;
    /// zero means another writer already finalized the job.
    pub async fn finish_if_training(
        conn: &mut AsyncPgConnection,
        model_id: i32,
        update: &TerminalUpdate,
    ) -> Result<usize, diesel::result::Error> {
        let target = models::table
            .filter(models::id.eq(model_id))
            .filter(models::status.eq(ModelStatus::Training.as_str()));

        match update {
            TerminalUpdate::Completed { version_id } => {
                diesel::update(target)
                    .set((
                        models::status.eq(ModelStatus::Completed.as_str()),
                        models::replicate_version_id.eq(version_id.clone()),
                        models::progress.eq(100),
                        models::completed_at.eq(Some(Utc::now())),
                    ))
                    .execute(conn)
                    .await
            },
            TerminalUpdate::Failed { error } | TerminalUpdate::Canceled { error } => {
                diesel::update(target)
                    .set((
                        models::status.eq(update.status().as_str()),
                        models::error.eq(Some(error.as_str())),
                        models::completed_at.eq(Some(Utc::now())),
                    ))
                    .execute(conn)
                    .await
            },
        }
    }
}
