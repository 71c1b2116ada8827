// Replicate Inference Provider
// Model hosting, LoRA training jobs and predictions over the Replicate HTTP API

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::app_config::ReplicateConfig;

pub const TRAINER_OWNER: &str = "ostris";
pub const TRAINER_MODEL: &str = "flux-dev-lora-trainer";
pub const TRAINER_VERSION: &str =
    "c6e78d2501e8088876e99ef21e4460d0dc121af7a4b786b9a4c2d75c620e300d";
pub const MODEL_HARDWARE: &str = "gpu-a100-large";

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Provider returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("Prediction failed: {0}")]
    PredictionFailed(String),

    #[error("Timed out waiting for {0}")]
    Timeout(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Http(err.to_string())
    }
}

/// Destination model hosted by the provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderModel {
    pub owner: String,
    pub name: String,
}

/// Parameters for a new LoRA training job
#[derive(Debug, Clone, Serialize)]
pub struct TrainingRequest {
    pub destination: String,
    pub webhook: String,
    pub webhook_events_filter: Vec<String>,
    pub input: JsonValue,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TrainingOutput {
    pub version: Option<String>,
}

/// Training job as reported by the provider
#[derive(Debug, Clone, Deserialize)]
pub struct TrainingJob {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub logs: Option<String>,
    #[serde(default)]
    pub error: Option<JsonValue>,
    #[serde(default)]
    pub output: Option<TrainingOutput>,
}

impl TrainingJob {
    pub fn version(&self) -> Option<String> {
        self.output.as_ref().and_then(|o| o.version.clone())
    }
}

/// Completed prediction with its output URLs
#[derive(Debug, Clone)]
pub struct PredictionOutput {
    pub id: String,
    pub urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PredictionUrls {
    get: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PredictionResponse {
    id: String,
    status: String,
    #[serde(default)]
    output: Option<JsonValue>,
    #[serde(default)]
    error: Option<JsonValue>,
    urls: Option<PredictionUrls>,
}

/// Contract the training and generation flows depend on
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    /// Fetch the destination model, creating it (private) when it does not exist
    async fn get_or_create_model(&self, owner: &str, name: &str)
        -> Result<ProviderModel, ProviderError>;

    async fn create_training(&self, request: TrainingRequest) -> Result<TrainingJob, ProviderError>;

    async fn get_training(&self, training_id: &str) -> Result<TrainingJob, ProviderError>;

    /// Run `version_ref` (`owner/name:version`) to completion
    async fn run_prediction(
        &self,
        version_ref: &str,
        input: JsonValue,
    ) -> Result<PredictionOutput, ProviderError>;

    async fn download(&self, url: &str) -> Result<Vec<u8>, ProviderError>;
}

/// Fixed trainer input; `input_images` points at the user's photo zip
pub fn training_input(input_images: &str) -> JsonValue {
    json!({
        "steps": 2000,
        "lora_rank": 20,
        "optimizer": "adamw8bit",
        "batch_size": 1,
        "resolution": "512,768,1024",
        "autocaption": true,
        "input_images": input_images,
        "trigger_word": "TOK",
        "learning_rate": 0.0004,
        "wandb_project": "flux_train_replicate",
        "wandb_save_interval": 100,
        "caption_dropout_rate": 0.05,
        "cache_latents_to_disk": false,
        "wandb_sample_interval": 100,
        "gradient_checkpointing": false
    })
}

/// Fixed sampling input for one square PNG headshot
pub fn generation_input(prompt: &str) -> JsonValue {
    json!({
        "prompt": prompt,
        "model": "dev",
        "go_fast": false,
        "lora_scale": 1,
        "megapixels": "1",
        "num_outputs": 1,
        "aspect_ratio": "1:1",
        "output_format": "png",
        "guidance_scale": 3,
        "output_quality": 80,
        "prompt_strength": 0.8,
        "extra_lora_scale": 1,
        "num_inference_steps": 28
    })
}

/// Output of a prediction is either a single URL or a list of URLs
fn output_urls(output: Option<JsonValue>) -> Vec<String> {
    match output {
        Some(JsonValue::String(url)) => vec![url],
        Some(JsonValue::Array(items)) => items
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

/// Provider error field as text, "Unknown error" when absent
pub fn error_text(error: Option<JsonValue>) -> String {
    match error {
        Some(JsonValue::String(s)) => s,
        Some(JsonValue::Null) | None => "Unknown error".to_string(),
        Some(other) => other.to_string(),
    }
}

/// Replicate HTTP client
#[derive(Clone)]
pub struct ReplicateClient {
    client: Arc<Client>,
    api_url: String,
    api_token: String,
    poll_interval: Duration,
    max_polls: u32,
}

impl ReplicateClient {
    pub fn new(config: &ReplicateConfig) -> Self {
        Self {
            client: Arc::new(Client::new()),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            poll_interval: Duration::from_secs(2),
            max_polls: 150,
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(ProviderError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn get_prediction(&self, url: &str) -> Result<PredictionResponse, ProviderError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.api_token)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }
}

#[async_trait]
impl InferenceProvider for ReplicateClient {
    #[instrument(skip(self))]
    async fn get_or_create_model(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<ProviderModel, ProviderError> {
        let response = self
            .client
            .get(format!("{}/models/{}/{}", self.api_url, owner, name))
            .bearer_auth(&self.api_token)
            .send()
            .await?;

        if response.status() != StatusCode::NOT_FOUND {
            let model: ProviderModel = Self::check(response).await?.json().await?;
            debug!("Destination model {}/{} exists", model.owner, model.name);
            return Ok(model);
        }

        info!("Creating destination model {}/{}", owner, name);
        let response = self
            .client
            .post(format!("{}/models", self.api_url))
            .bearer_auth(&self.api_token)
            .json(&json!({
                "owner": owner,
                "name": name,
                "visibility": "private",
                "hardware": MODEL_HARDWARE
            }))
            .send()
            .await?;

        Ok(Self::check(response).await?.json().await?)
    }

    #[instrument(skip(self, request), fields(destination = %request.destination))]
    async fn create_training(&self, request: TrainingRequest) -> Result<TrainingJob, ProviderError> {
        let response = self
            .client
            .post(format!(
                "{}/models/{}/{}/versions/{}/trainings",
                self.api_url, TRAINER_OWNER, TRAINER_MODEL, TRAINER_VERSION
            ))
            .bearer_auth(&self.api_token)
            .json(&request)
            .send()
            .await?;

        let job: TrainingJob = Self::check(response).await?.json().await?;
        info!("Training {} created ({})", job.id, job.status);
        Ok(job)
    }

    async fn get_training(&self, training_id: &str) -> Result<TrainingJob, ProviderError> {
        let response = self
            .client
            .get(format!("{}/trainings/{}", self.api_url, training_id))
            .bearer_auth(&self.api_token)
            .send()
            .await?;

        Ok(Self::check(response).await?.json().await?)
    }

    #[instrument(skip(self, input))]
    async fn run_prediction(
        &self,
        version_ref: &str,
        input: JsonValue,
    ) -> Result<PredictionOutput, ProviderError> {
        let version = version_ref
            .rsplit_once(':')
            .map(|(_, v)| v)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                ProviderError::InvalidResponse(format!("Model reference has no version: {}", version_ref))
            })?;

        let response = self
            .client
            .post(format!("{}/predictions", self.api_url))
            .bearer_auth(&self.api_token)
            .header("Prefer", "wait")
            .json(&json!({ "version": version, "input": input }))
            .send()
            .await?;

        let mut prediction: PredictionResponse = Self::check(response).await?.json().await?;

        let mut polls = 0;
        loop {
            match prediction.status.as_str() {
                "succeeded" => {
                    let urls = output_urls(prediction.output.take());
                    if urls.is_empty() {
                        return Err(ProviderError::InvalidResponse(
                            "Prediction succeeded without output".to_string(),
                        ));
                    }
                    return Ok(PredictionOutput {
                        id: prediction.id,
                        urls,
                    });
                },
                "failed" | "canceled" => {
                    return Err(ProviderError::PredictionFailed(error_text(
                        prediction.error.take(),
                    )));
                },
                _ => {},
            }

            polls += 1;
            if polls > self.max_polls {
                warn!("Prediction {} still {} after {} polls", prediction.id, prediction.status, polls);
                return Err(ProviderError::Timeout(format!("prediction {}", prediction.id)));
            }

            let get_url = prediction
                .urls
                .as_ref()
                .and_then(|u| u.get.clone())
                .unwrap_or_else(|| format!("{}/predictions/{}", self.api_url, prediction.id));

            tokio::time::sleep(self.poll_interval).await;
            prediction = self.get_prediction(&get_url).await?;
        }
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, ProviderError> {
        let response = self.client.get(url).send().await?;
        let bytes = Self::check(response).await?.bytes().await?;
        Ok(bytes.to_vec())
    }
}
