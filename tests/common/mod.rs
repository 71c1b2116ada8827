// Common test utilities and helper structs
// Shared across all integration test files: app setup, fake providers, request helpers

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, HeaderMap, Request, Response, StatusCode},
    Router,
};
use diesel::prelude::*;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use headshot_backend::{
    app::{AppState, Providers},
    app_config::AppConfig,
    build_router,
    db::{create_diesel_pool, DieselDatabaseConfig, DieselPool},
    migrations::{run_all_migrations, MigrationConfig},
    models::{
        token_transaction::TransactionType,
        training_model::{NewTrainingModel, TerminalUpdate, TrainingModel},
        user::{NewUser, User},
    },
    services::{
        ledger::LedgerEntry,
        oauth::{OAuthError, OAuthProfile, OAuthProvider},
        replicate::{
            InferenceProvider, PredictionOutput, ProviderError, ProviderModel, TrainingJob,
            TrainingOutput, TrainingRequest,
        },
        stripe::{CheckoutRequest, CheckoutSession, PaymentProvider, StripeError},
    },
};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tower::util::ServiceExt;
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "whsec_integration_test_secret";
pub const PRICE_SMALL: &str = "price_test_small";
pub const TRAINED_VERSION: &str = "5e1b3c9d7a";

/// Helper struct for count queries
#[derive(QueryableByName)]
pub struct CountRow {
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    pub count: i64,
}

// =============================================================================
// FAKE PROVIDERS
// =============================================================================

/// In-process stand-in for the inference provider
#[derive(Default)]
pub struct MockInference {
    pub trainings: Mutex<Vec<TrainingRequest>>,
    pub predictions: Mutex<Vec<String>>,
    pub fail_training: Mutex<bool>,
    pub fail_prediction: Mutex<bool>,
    pub fail_download: Mutex<bool>,
    /// Status reported by `get_training`
    pub training_status: Mutex<String>,
}

impl MockInference {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            training_status: Mutex::new("processing".to_string()),
            ..Default::default()
        })
    }

    pub fn set_training_status(&self, status: &str) {
        *self.training_status.lock().unwrap() = status.to_string();
    }

    pub fn fail_predictions(&self) {
        *self.fail_prediction.lock().unwrap() = true;
    }

    pub fn fail_trainings(&self) {
        *self.fail_training.lock().unwrap() = true;
    }

    pub fn fail_downloads(&self) {
        *self.fail_download.lock().unwrap() = true;
    }
}

#[async_trait]
impl InferenceProvider for MockInference {
    async fn get_or_create_model(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<ProviderModel, ProviderError> {
        Ok(ProviderModel {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    async fn create_training(&self, request: TrainingRequest) -> Result<TrainingJob, ProviderError> {
        if *self.fail_training.lock().unwrap() {
            return Err(ProviderError::Api {
                status: 422,
                message: "destination does not exist".to_string(),
            });
        }
        self.trainings.lock().unwrap().push(request);
        Ok(TrainingJob {
            id: format!("trn_{}", Uuid::new_v4().simple()),
            status: "starting".to_string(),
            logs: None,
            error: None,
            output: None,
        })
    }

    async fn get_training(&self, training_id: &str) -> Result<TrainingJob, ProviderError> {
        let status = self.training_status.lock().unwrap().clone();
        let output = (status == "succeeded").then(|| TrainingOutput {
            version: Some(format!("test-owner/model:{}", TRAINED_VERSION)),
        });
        Ok(TrainingJob {
            id: training_id.to_string(),
            status,
            logs: Some("flux_train_replicate:  50%|#####     | 1000/2000".to_string()),
            error: None,
            output,
        })
    }

    async fn run_prediction(
        &self,
        version_ref: &str,
        _input: JsonValue,
    ) -> Result<PredictionOutput, ProviderError> {
        if *self.fail_prediction.lock().unwrap() {
            return Err(ProviderError::PredictionFailed("NSFW content detected".to_string()));
        }
        self.predictions.lock().unwrap().push(version_ref.to_string());
        Ok(PredictionOutput {
            id: format!("pred_{}", Uuid::new_v4().simple()),
            urls: vec!["https://replicate.delivery/test/out-0.png".to_string()],
        })
    }

    async fn download(&self, _url: &str) -> Result<Vec<u8>, ProviderError> {
        if *self.fail_download.lock().unwrap() {
            return Err(ProviderError::Api {
                status: 404,
                message: "delivery expired".to_string(),
            });
        }
        Ok(b"\x89PNG fake image bytes".to_vec())
    }
}

/// Checkout sessions with predictable ids
#[derive(Default)]
pub struct MockPayments {
    pub sessions: Mutex<Vec<CheckoutRequest>>,
}

#[async_trait]
impl PaymentProvider for MockPayments {
    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSession, StripeError> {
        let id = format!("cs_test_{}", Uuid::new_v4().simple());
        self.sessions.lock().unwrap().push(request);
        Ok(CheckoutSession {
            url: Some(format!("https://checkout.stripe.test/pay/{}", id)),
            id,
            amount_total: Some(1000),
            currency: Some("usd".to_string()),
        })
    }
}

/// Accepts any code and returns a profile derived from it
pub struct MockOAuth;

#[async_trait]
impl OAuthProvider for MockOAuth {
    fn authorization_url(&self, state: &str) -> Result<String, OAuthError> {
        Ok(format!("https://accounts.google.test/o/oauth2/auth?state={}", state))
    }

    fn callback_url(&self) -> &str {
        "http://localhost:5000/auth/google/callback"
    }

    async fn exchange_code(
        &self,
        code: &str,
        _redirect_uri: &str,
    ) -> Result<OAuthProfile, OAuthError> {
        if code == "bad-code" {
            return Err(OAuthError::Exchange("invalid_grant".to_string()));
        }
        Ok(OAuthProfile {
            id: format!("g{}", code),
            email: Some(format!("{}@example.com", code)),
            name: Some("Test User".to_string()),
            picture: None,
        })
    }
}

// =============================================================================
// TEST APP
// =============================================================================

/// Test application wrapper
pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    pub diesel_pool: DieselPool,
    pub inference: Arc<MockInference>,
    pub payments: Arc<MockPayments>,
    _storage_dir: TempDir,
}

fn set_test_env(storage_root: &std::path::Path) {
    dotenv::from_filename(".env.test").ok();

    let defaults = [
        ("JWT_SECRET", "integration-test-access-secret-0123456789"),
        ("REFRESH_TOKEN_SECRET", "integration-test-refresh-secret-0123456789"),
        ("STRIPE_SECRET_KEY", "sk_test_integration"),
        ("STRIPE_PRICE_30_TOKENS", "price_test_medium"),
        ("STRIPE_PRICE_70_TOKENS", "price_test_large"),
        ("REPLICATE_API_TOKEN", "r8_integration"),
        ("REPLICATE_OWNER", "test-owner"),
    ];
    for (key, value) in defaults {
        if std::env::var(key).is_err() {
            std::env::set_var(key, value);
        }
    }

    std::env::set_var("STRIPE_WEBHOOK_SECRET", WEBHOOK_SECRET);
    std::env::set_var("STRIPE_PRICE_10_TOKENS", PRICE_SMALL);
    std::env::set_var("RESEND_API_KEY", "");
    // Pollers must not wake up during a test
    std::env::set_var("TRAINING_POLL_INTERVAL_SECS", "3600");
    std::env::set_var("UPLOAD_DIR", storage_root.join("uploads"));
    std::env::set_var("GENERATED_DIR", storage_root.join("generated"));
}

/// Setup test application against DATABASE_URL; None when no database is reachable
pub async fn setup_test_app() -> Option<TestApp> {
    let storage_dir = tempfile::tempdir().unwrap();
    set_test_env(storage_dir.path());

    if std::env::var("DATABASE_URL").is_err() {
        eprintln!("DATABASE_URL not set, skipping database test");
        return None;
    }

    let config = AppConfig::from_env().unwrap();
    if AsyncPgConnection::establish(&config.database.url).await.is_err() {
        eprintln!("Database not reachable, skipping database test");
        return None;
    }

    run_all_migrations(MigrationConfig::from_app_config(&config))
        .await
        .unwrap();

    let mut db_config = DieselDatabaseConfig::from_app_config(&config);
    db_config.max_connections = 5;
    db_config.min_connections = 1;
    let diesel_pool = create_diesel_pool(db_config).await.unwrap();

    let inference = MockInference::new();
    let payments = Arc::new(MockPayments::default());
    let providers = Providers {
        inference: inference.clone(),
        payments: payments.clone(),
        oauth: Arc::new(MockOAuth),
    };

    let state = AppState::new(diesel_pool.clone(), config, providers).unwrap();
    state.storage.ensure_dirs().await.unwrap();
    let app = build_router(state.clone());

    Some(TestApp {
        app,
        state,
        diesel_pool,
        inference,
        payments,
        _storage_dir: storage_dir,
    })
}

impl TestApp {
    pub fn get(&self, uri: &str) -> TestRequest {
        TestRequest::new(self, "GET", uri)
    }

    pub fn post(&self, uri: &str) -> TestRequest {
        TestRequest::new(self, "POST", uri)
    }

    pub fn patch(&self, uri: &str) -> TestRequest {
        TestRequest::new(self, "PATCH", uri)
    }

    pub fn delete(&self, uri: &str) -> TestRequest {
        TestRequest::new(self, "DELETE", uri)
    }

    /// Create a user holding `tokens`, credited through the ledger so balances reconcile
    pub async fn create_user(&self, tokens: i32) -> User {
        let google_id = Uuid::new_v4().simple().to_string();
        let mut conn = self.diesel_pool.get().await.unwrap();
        let user = User::create(
            &mut conn,
            NewUser::from_google(
                &google_id,
                Some(format!("{}@example.com", &google_id[..8])),
                Some("Test User".to_string()),
                None,
            ),
        )
        .await
        .unwrap();
        drop(conn);

        if tokens > 0 {
            self.state
                .ledger
                .add(user.id, tokens, LedgerEntry::new(TransactionType::Purchase))
                .await
                .unwrap();
        }
        user
    }

    pub fn token_for(&self, user: &User) -> String {
        self.state
            .jwt_service
            .generate_access_token(user.id, user.email.as_deref().unwrap_or_default())
            .unwrap()
    }

    pub async fn balance(&self, user_id: i32) -> i32 {
        self.state.ledger.balance(user_id).await.unwrap()
    }

    /// Insert photo rows pointing at real files so the zip endpoint can read them
    pub async fn upload_photos(&self, user: &User, count: usize) -> Vec<i32> {
        use headshot_backend::models::photo::{NewUploadedPhoto, UploadedPhoto};

        let mut ids = Vec::with_capacity(count);
        let mut conn = self.diesel_pool.get().await.unwrap();
        for i in 0..count {
            let name = format!("face_{}.jpg", i);
            let stored = self
                .state
                .storage
                .save_upload(user.id, &name, b"jpeg bytes")
                .await
                .unwrap();
            let photo = UploadedPhoto::create(
                &mut conn,
                NewUploadedPhoto {
                    user_id: user.id,
                    filename: name,
                    file_size: stored.size as i32,
                    path: stored.path,
                },
            )
            .await
            .unwrap();
            ids.push(photo.id);
        }
        ids
    }

    /// A model that already finished training, ready for generation
    pub async fn completed_model(&self, user: &User) -> TrainingModel {
        let mut conn = self.diesel_pool.get().await.unwrap();
        let model = TrainingModel::create(
            &mut conn,
            NewTrainingModel::training(user.id, user.username.clone()),
        )
        .await
        .unwrap();
        TrainingModel::finish_if_training(
            &mut conn,
            model.id,
            &TerminalUpdate::Completed {
                version_id: Some(TRAINED_VERSION.to_string()),
            },
        )
        .await
        .unwrap();
        TrainingModel::find_by_id(&mut conn, model.id)
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn model(&self, model_id: i32) -> TrainingModel {
        let mut conn = self.diesel_pool.get().await.unwrap();
        TrainingModel::find_by_id(&mut conn, model_id)
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn count(&self, sql: &str, id: i32) -> i64 {
        let mut conn = self.diesel_pool.get().await.unwrap();
        diesel::sql_query(sql)
            .bind::<diesel::sql_types::Integer, _>(id)
            .get_result::<CountRow>(&mut conn)
            .await
            .unwrap()
            .count
    }
}

// =============================================================================
// REQUEST / RESPONSE HELPERS
// =============================================================================

/// Test request builder
pub struct TestRequest<'a> {
    app: &'a TestApp,
    method: &'static str,
    uri: String,
    headers: Vec<(String, String)>,
    body: Body,
}

impl<'a> TestRequest<'a> {
    fn new(app: &'a TestApp, method: &'static str, uri: &str) -> Self {
        Self {
            app,
            method,
            uri: uri.to_string(),
            headers: Vec::new(),
            body: Body::empty(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn bearer(self, token: &str) -> Self {
        self.header("authorization", &format!("Bearer {}", token))
    }

    /// Add JSON body to request
    pub fn json<T: Serialize>(mut self, body: &T) -> Self {
        self.body = Body::from(serde_json::to_vec(body).unwrap());
        self.header("content-type", "application/json")
    }

    pub fn raw(mut self, bytes: Vec<u8>) -> Self {
        self.body = Body::from(bytes);
        self
    }

    /// Multipart body with one `photos` part per file
    pub fn photos(mut self, files: &[(&str, &[u8])]) -> Self {
        let boundary = "headshot-test-boundary";
        let mut body = Vec::new();
        for (name, bytes) in files {
            body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
            body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"photos\"; filename=\"{}\"\r\n",
                    name
                )
                .as_bytes(),
            );
            body.extend_from_slice(b"Content-Type: image/jpeg\r\n\r\n");
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());

        self.body = Body::from(body);
        self.header(
            "content-type",
            &format!("multipart/form-data; boundary={}", boundary),
        )
    }

    /// Send the request
    pub async fn send(self) -> TestResponse {
        let mut builder = Request::builder().method(self.method).uri(&self.uri);
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let request = builder.body(self.body).unwrap();

        let response = self.app.app.clone().oneshot(request).await.unwrap();
        TestResponse { response }
    }
}

/// Test response wrapper
pub struct TestResponse {
    response: Response<Body>,
}

impl TestResponse {
    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.response.headers()
    }

    pub fn header(&self, name: header::HeaderName) -> Option<String> {
        self.response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    /// Every Set-Cookie value on the response
    pub fn cookies(&self) -> Vec<String> {
        self.response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect()
    }

    pub async fn bytes(self) -> Vec<u8> {
        axum::body::to_bytes(self.response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    /// Parse JSON response
    pub async fn json<T: serde::de::DeserializeOwned>(self) -> T {
        serde_json::from_slice(&self.bytes().await).unwrap()
    }
}
