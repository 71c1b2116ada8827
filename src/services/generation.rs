// Generation Service
// Runs a completed personal model to produce one styled headshot for one token

use diesel_async::AsyncPgConnection;
use serde::Deserialize;
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use validator::Validate;

use crate::config::{build_prompt, Gender, GENERATE_COST};
use crate::db::DieselPool;
use crate::models::headshot::{Headshot, NewHeadshot};
use crate::models::token_transaction::TransactionType;
use crate::models::training_model::{ModelStatus, TrainingModel};
use crate::services::ledger::{Charge, LedgerEntry, LedgerError, TokenLedger};
use crate::services::replicate::{generation_input, InferenceProvider};
use crate::services::storage::FileStorage;
use crate::utils::ServiceError;

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GenerateHeadshotRequest {
    #[validate(range(min = 1))]
    pub model_id: i32,
    #[validate(length(min = 1, max = 64))]
    pub style: String,
    #[serde(default)]
    #[validate(length(max = 1000))]
    pub prompt: Option<String>,
    pub gender: Gender,
}

/// Failure inside a charged generation: either the debit itself or a later step
#[derive(Debug)]
enum GenerationError {
    Ledger(LedgerError),
    Step(String),
}

impl fmt::Display for GenerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationError::Ledger(e) => write!(f, "{}", e),
            GenerationError::Step(msg) => write!(f, "{}", msg),
        }
    }
}

impl From<LedgerError> for GenerationError {
    fn from(err: LedgerError) -> Self {
        GenerationError::Ledger(err)
    }
}

fn step<E: fmt::Display>(context: &'static str) -> impl Fn(E) -> GenerationError {
    move |e| GenerationError::Step(format!("{}: {}", context, e))
}

#[derive(Clone)]
pub struct GenerationService {
    pool: DieselPool,
    ledger: TokenLedger,
    provider: Arc<dyn InferenceProvider>,
    storage: FileStorage,
    owner: String,
}

impl GenerationService {
    pub fn new(
        pool: DieselPool,
        provider: Arc<dyn InferenceProvider>,
        storage: FileStorage,
        owner: String,
    ) -> Self {
        Self {
            ledger: TokenLedger::new(pool.clone()),
            pool,
            provider,
            storage,
            owner,
        }
    }

    #[instrument(skip(self, request), fields(model_id = request.model_id, style = %request.style))]
    pub async fn generate(
        &self,
        user_id: i32,
        request: GenerateHeadshotRequest,
    ) -> Result<Headshot, ServiceError> {
        let model = {
            let mut conn = self.pool.get().await?;
            TrainingModel::find_by_id(&mut conn, request.model_id)
                .await?
                .ok_or_else(|| ServiceError::NotFound("Model".to_string()))?
        };

        if model.user_id != user_id {
            return Err(ServiceError::Forbidden);
        }

        let version = match (model.status(), model.replicate_version_id.as_deref()) {
            (Some(ModelStatus::Completed), Some(version)) => version.to_string(),
            _ => {
                return Err(ServiceError::BadRequest(
                    "Model is not ready for generation".to_string(),
                ))
            },
        };

        self.ledger.check_balance(user_id, GENERATE_COST).await?;

        let charge = Charge {
            user_id,
            amount: GENERATE_COST,
            entry: LedgerEntry::new(TransactionType::GenerateHeadshot).metadata(json!({
                "style": request.style,
                "gender": request.gender.as_str(),
                "prompt": request.prompt,
            })),
        };

        let version_ref = format!("{}/{}:{}", self.owner, model.replicate_model_id, version);

        let result = self
            .ledger
            .with_charge(charge, || self.run(user_id, &model, &version_ref, &request))
            .await;

        match result {
            Ok(headshot) => {
                info!("Generated headshot {} for user {}", headshot.id, user_id);
                Ok(headshot)
            },
            Err(GenerationError::Ledger(e)) => Err(e.into()),
            Err(GenerationError::Step(reason)) => {
                error!("Headshot generation failed: {}", reason);
                Err(ServiceError::GenerationFailed)
            },
        }
    }

    async fn run(
        &self,
        user_id: i32,
        model: &TrainingModel,
        version_ref: &str,
        request: &GenerateHeadshotRequest,
    ) -> Result<Headshot, GenerationError> {
        let prompt = build_prompt(&request.style, request.gender, request.prompt.as_deref());

        let prediction = self
            .provider
            .run_prediction(version_ref, generation_input(&prompt))
            .await
            .map_err(step("Prediction failed"))?;

        let image_url = prediction
            .urls
            .first()
            .cloned()
            .ok_or_else(|| GenerationError::Step("Prediction returned no images".to_string()))?;

        // Provider URLs expire, so keep a local copy; fetched before any row exists
        let bytes = self
            .provider
            .download(&image_url)
            .await
            .map_err(step("Image download failed"))?;

        let mut conn = self.pool.get().await.map_err(step("Connection pool error"))?;

        let headshot = Headshot::create(
            &mut conn,
            NewHeadshot {
                user_id,
                model_id: model.id,
                style: request.style.clone(),
                image_url,
                replicate_prediction_id: prediction.id,
                prompt: Some(prompt),
                metadata: json!({ "gender": request.gender.as_str() }),
                favorite: false,
            },
        )
        .await
        .map_err(step("Failed to store headshot"))?;

        let path = match self.storage.save_generated(user_id, headshot.id, &bytes).await {
            Ok(path) => path,
            Err(e) => {
                self.discard(&mut conn, headshot.id, None).await;
                return Err(step("Failed to save image")(e));
            },
        };

        match Headshot::set_file_path(&mut conn, headshot.id, &path).await {
            Ok(headshot) => Ok(headshot),
            Err(e) => {
                self.discard(&mut conn, headshot.id, Some(&path)).await;
                Err(step("Failed to record image path")(e))
            },
        }
    }

    /// Remove a half-written headshot so a refunded generation leaves nothing behind
    async fn discard(&self, conn: &mut AsyncPgConnection, headshot_id: i32, path: Option<&str>) {
        if let Some(path) = path {
            if let Err(e) = self.storage.remove(path).await {
                warn!("Failed to remove image {}: {}", path, e);
            }
        }
        if let Err(e) = Headshot::delete(conn, headshot_id).await {
            error!("Failed to discard headshot {}: {}", headshot_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_deserializes_camel_case() {
        let request: GenerateHeadshotRequest = serde_json::from_str(
            r#"{"modelId":3,"style":"Casual","gender":"female","prompt":"red scarf"}"#,
        )
        .unwrap();

        assert_eq!(request.model_id, 3);
        assert_eq!(request.gender, Gender::Female);
        assert_eq!(request.prompt.as_deref(), Some("red scarf"));
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_request_rejects_unknown_gender() {
        let result = serde_json::from_str::<GenerateHeadshotRequest>(
            r#"{"modelId":3,"style":"Casual","gender":"other"}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_request_validation() {
        let request = GenerateHeadshotRequest {
            model_id: 0,
            style: String::new(),
            prompt: None,
            gender: Gender::Male,
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_generation_error_display() {
        let err = step::<&str>("Prediction failed")("timeout");
        assert_eq!(err.to_string(), "Prediction failed: timeout");
    }
}
