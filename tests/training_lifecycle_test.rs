// Training lifecycle integration tests
// Submission charges, webhook/poller finalization and the exactly-once refund

use axum::http::{header, StatusCode};
use headshot_backend::{
    models::{
        token_transaction::{TokenTransaction, TransactionType},
        training_model::{ModelStatus, NewTrainingModel, TrainingModel},
    },
    services::{
        email::EmailService,
        ledger::LedgerEntry,
        training::{TrainingService, TrainingSettings, POLL_TIMEOUT_MESSAGE},
    },
};
use serde_json::{json, Value};
use serial_test::serial;
use std::time::Duration;

mod common;
use common::{setup_test_app, TestApp, TRAINED_VERSION};

async fn refund_count(app: &TestApp, user_id: i32) -> usize {
    let mut conn = app.diesel_pool.get().await.unwrap();
    TokenTransaction::find_by_user(&mut conn, user_id)
        .await
        .unwrap()
        .iter()
        .filter(|t| t.kind == TransactionType::Refund.as_str())
        .count()
}

async fn start_training(app: &TestApp, tokens: i32) -> (headshot_backend::models::User, i32) {
    let user = app.create_user(tokens).await;
    let photo_ids = app.upload_photos(&user, 3).await;

    let response = app
        .post("/api/models/train")
        .bearer(&app.token_for(&user))
        .json(&json!({ "photoIds": photo_ids }))
        .send()
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await;
    assert_eq!(body["status"], "training");
    assert_eq!(body["message"], "Model training started");
    (user, body["id"].as_i64().unwrap() as i32)
}

#[tokio::test]
#[serial]
async fn test_failed_training_refunds_once() {
    let Some(app) = setup_test_app().await else { return };
    let (user, model_id) = start_training(&app, 6).await;

    assert_eq!(app.balance(user.id).await, 0);
    assert_eq!(app.model(model_id).await.status, "training");

    {
        let trainings = app.inference.trainings.lock().unwrap();
        let request = trainings.last().unwrap();
        assert_eq!(request.destination, format!("test-owner/{}", user.username));
        assert!(request
            .webhook
            .ends_with(&format!("/api/webhooks/training-complete?modelId={}", model_id)));
        assert_eq!(request.webhook_events_filter, vec!["completed", "logs"]);
        assert!(request.input["input_images"]
            .as_str()
            .unwrap()
            .contains(&format!("/api/photos/zip/{}?photos=", user.id)));
    }

    let webhook = json!({ "id": "trn_1", "status": "failed", "error": "CUDA out of memory" });
    for _ in 0..2 {
        let response = app
            .post(&format!("/api/webhooks/training-complete?modelId={}", model_id))
            .json(&webhook)
            .send()
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = response.json().await;
        assert_eq!(body["message"], "Webhook processed successfully");
    }

    let model = app.model(model_id).await;
    assert_eq!(model.status(), Some(ModelStatus::Failed));
    assert_eq!(
        model.error.as_deref(),
        Some("Training failed: CUDA out of memory - tokens refunded")
    );
    assert!(model.completed_at.is_some());

    assert_eq!(app.balance(user.id).await, 6);
    assert_eq!(refund_count(&app, user.id).await, 1);
    assert!(app.state.ledger.reconcile(user.id).await.unwrap().consistent);
}

#[tokio::test]
#[serial]
async fn test_canceled_training_refunds() {
    let Some(app) = setup_test_app().await else { return };
    let (user, model_id) = start_training(&app, 6).await;

    let response = app
        .post(&format!("/api/webhooks/training-complete?modelId={}", model_id))
        .json(&json!({ "status": "canceled" }))
        .send()
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let model = app.model(model_id).await;
    assert_eq!(model.status(), Some(ModelStatus::Canceled));
    assert_eq!(model.error.as_deref(), Some("Training was canceled - tokens refunded"));
    assert_eq!(app.balance(user.id).await, 6);
}

#[tokio::test]
#[serial]
async fn test_succeeded_webhook_completes_model() {
    let Some(app) = setup_test_app().await else { return };
    let (user, model_id) = start_training(&app, 6).await;
    app.inference.set_training_status("succeeded");

    let response = app
        .post(&format!("/api/webhooks/training-complete?modelId={}", model_id))
        .json(&json!({ "status": "succeeded" }))
        .send()
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let model = app.model(model_id).await;
    assert_eq!(model.status(), Some(ModelStatus::Completed));
    assert_eq!(model.replicate_version_id.as_deref(), Some(TRAINED_VERSION));
    assert_eq!(model.progress, 100);

    // A late failure report cannot reopen a terminal model
    let response = app
        .post(&format!("/api/webhooks/training-complete?modelId={}", model_id))
        .json(&json!({ "status": "failed", "error": "late" }))
        .send()
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.model(model_id).await.status(), Some(ModelStatus::Completed));
    assert_eq!(app.balance(user.id).await, 0);
}

#[tokio::test]
#[serial]
async fn test_progress_logs_update_training_model() {
    let Some(app) = setup_test_app().await else { return };
    let (_user, model_id) = start_training(&app, 6).await;

    let response = app
        .post(&format!("/api/webhooks/training-complete?modelId={}", model_id))
        .json(&json!({
            "status": "processing",
            "logs": "preparing\nflux_train_replicate:  37%|###       | 740/2000"
        }))
        .send()
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let model = app.model(model_id).await;
    assert_eq!(model.status(), Some(ModelStatus::Training));
    assert_eq!(model.progress, 37);
}

#[tokio::test]
#[serial]
async fn test_webhook_model_id_falls_back_to_webhook_field() {
    let Some(app) = setup_test_app().await else { return };
    let (user, model_id) = start_training(&app, 6).await;

    let response = app
        .post("/api/webhooks/training-complete")
        .json(&json!({
            "status": "failed",
            "webhook": format!(
                "https://api.example.com/api/webhooks/training-complete?modelId={}",
                model_id
            )
        }))
        .send()
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let model = app.model(model_id).await;
    assert_eq!(
        model.error.as_deref(),
        Some("Training failed: Unknown error - tokens refunded")
    );
    assert_eq!(app.balance(user.id).await, 6);
}

#[tokio::test]
#[serial]
async fn test_webhook_rejects_missing_or_unknown_model() {
    let Some(app) = setup_test_app().await else { return };

    let response = app
        .post("/api/webhooks/training-complete")
        .json(&json!({ "status": "failed" }))
        .send()
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .post("/api/webhooks/training-complete?modelId=999999999")
        .json(&json!({ "status": "failed" }))
        .send()
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .post("/api/webhooks/training-complete?modelId=1")
        .header("content-type", "application/json")
        .raw(b"{not json".to_vec())
        .send()
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
#[serial]
async fn test_training_requires_six_tokens() {
    let Some(app) = setup_test_app().await else { return };
    let user = app.create_user(5).await;
    let photo_ids = app.upload_photos(&user, 3).await;

    let response = app
        .post("/api/models/train")
        .bearer(&app.token_for(&user))
        .json(&json!({ "photoIds": photo_ids }))
        .send()
        .await;

    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    let body: Value = response.json().await;
    assert_eq!(body["required"], 6);
    assert_eq!(body["current"], 5);

    assert_eq!(app.balance(user.id).await, 5);
    let models = app
        .count("SELECT COUNT(*) AS count FROM models WHERE user_id = $1", user.id)
        .await;
    assert_eq!(models, 0);
}

#[tokio::test]
#[serial]
async fn test_training_rejects_foreign_photos() {
    let Some(app) = setup_test_app().await else { return };
    let owner = app.create_user(0).await;
    let photo_ids = app.upload_photos(&owner, 2).await;
    let other = app.create_user(6).await;

    let response = app
        .post("/api/models/train")
        .bearer(&app.token_for(&other))
        .json(&json!({ "photoIds": photo_ids }))
        .send()
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.balance(other.id).await, 6);
}

#[tokio::test]
#[serial]
async fn test_submission_failure_refunds() {
    let Some(app) = setup_test_app().await else { return };
    app.inference.fail_trainings();
    let user = app.create_user(6).await;
    let photo_ids = app.upload_photos(&user, 3).await;

    let response = app
        .post("/api/models/train")
        .bearer(&app.token_for(&user))
        .json(&json!({ "photoIds": photo_ids }))
        .send()
        .await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let mut conn = app.diesel_pool.get().await.unwrap();
    let models = TrainingModel::find_by_user(&mut conn, user.id).await.unwrap();
    assert_eq!(models.len(), 1);
    assert_eq!(models[0].status(), Some(ModelStatus::Failed));
    drop(conn);

    assert_eq!(app.balance(user.id).await, 6);
    assert_eq!(refund_count(&app, user.id).await, 1);
}

#[tokio::test]
#[serial]
async fn test_model_status_endpoint() {
    let Some(app) = setup_test_app().await else { return };
    let (user, model_id) = start_training(&app, 6).await;

    let response = app
        .get(&format!("/api/models/{}", model_id))
        .bearer(&app.token_for(&user))
        .send()
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.header(header::CACHE_CONTROL).as_deref(),
        Some("no-cache, no-store, must-revalidate")
    );
    assert_eq!(response.header(header::PRAGMA).as_deref(), Some("no-cache"));
    assert_eq!(response.header(header::EXPIRES).as_deref(), Some("0"));

    let body: Value = response.json().await;
    assert_eq!(body["id"], model_id);
    assert_eq!(body["status"], "training");
    assert_eq!(body["message"], "Model is training...");

    let other = app.create_user(0).await;
    let response = app
        .get(&format!("/api/models/{}", model_id))
        .bearer(&app.token_for(&other))
        .send()
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .get("/api/models")
        .bearer(&app.token_for(&user))
        .send()
        .await;
    let models: Vec<Value> = response.json().await;
    assert_eq!(models.len(), 1);
}

fn fast_poller(app: &TestApp, attempts: u32) -> TrainingService {
    let config = &app.state.config;
    let mut settings = TrainingSettings::from_app_config(config, app.state.bundle_links.clone());
    settings.poll_interval = Duration::from_millis(10);
    settings.poll_max_attempts = attempts;

    TrainingService::new(
        app.diesel_pool.clone(),
        app.inference.clone(),
        EmailService::new(config.email.clone()).unwrap(),
        settings,
    )
}

async fn charged_model(app: &TestApp, user_id: i32) -> TrainingModel {
    let mut conn = app.diesel_pool.get().await.unwrap();
    let model = TrainingModel::create(
        &mut conn,
        NewTrainingModel::training(user_id, format!("poll-{}", user_id)),
    )
    .await
    .unwrap();
    drop(conn);

    app.state
        .ledger
        .deduct(
            user_id,
            6,
            LedgerEntry::new(TransactionType::TrainModel).reference(model.id),
        )
        .await
        .unwrap();
    model
}

#[tokio::test]
#[serial]
async fn test_poll_timeout_fails_and_refunds() {
    let Some(app) = setup_test_app().await else { return };
    let user = app.create_user(6).await;
    let model = charged_model(&app, user.id).await;
    app.inference.set_training_status("processing");

    fast_poller(&app, 2)
        .poll_until_terminal(model.id, "trn_slow".to_string())
        .await;

    let model = app.model(model.id).await;
    assert_eq!(model.status(), Some(ModelStatus::Failed));
    assert_eq!(model.error.as_deref(), Some(POLL_TIMEOUT_MESSAGE));
    assert_eq!(model.progress, 50);
    assert_eq!(app.balance(user.id).await, 6);
}

#[tokio::test]
#[serial]
async fn test_poller_and_webhook_race_refunds_once() {
    let Some(app) = setup_test_app().await else { return };
    let user = app.create_user(6).await;
    let model = charged_model(&app, user.id).await;
    app.inference.set_training_status("failed");

    let poller = fast_poller(&app, 3);
    let poll = poller.poll_until_terminal(model.id, "trn_race".to_string());
    let hook = app
        .post(&format!("/api/webhooks/training-complete?modelId={}", model.id))
        .json(&json!({ "status": "failed", "error": "boom" }))
        .send();
    let (_, response) = tokio::join!(poll, hook);
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(app.model(model.id).await.status(), Some(ModelStatus::Failed));
    assert_eq!(app.balance(user.id).await, 6);
    assert_eq!(refund_count(&app, user.id).await, 1);
}

#[tokio::test]
#[serial]
async fn test_poller_completes_succeeded_training() {
    let Some(app) = setup_test_app().await else { return };
    let user = app.create_user(6).await;
    let model = charged_model(&app, user.id).await;
    app.inference.set_training_status("succeeded");

    fast_poller(&app, 3)
        .poll_until_terminal(model.id, "trn_done".to_string())
        .await;

    let model = app.model(model.id).await;
    assert_eq!(model.status(), Some(ModelStatus::Completed));
    assert_eq!(model.replicate_version_id.as_deref(), Some(TRAINED_VERSION));
    assert_eq!(app.balance(user.id).await, 0);
}

#[tokio::test]
#[serial]
async fn test_trainer_link_serves_only_selected_photos() {
    let Some(app) = setup_test_app().await else { return };
    let user = app.create_user(6).await;
    let photo_ids = app.upload_photos(&user, 3).await;
    let other = app.create_user(0).await;
    let foreign = app.upload_photos(&other, 1).await;

    let response = app
        .post("/api/models/train")
        .bearer(&app.token_for(&user))
        .json(&json!({ "photoIds": [photo_ids[0], photo_ids[2], foreign[0]] }))
        .send()
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let input_images = {
        let trainings = app.inference.trainings.lock().unwrap();
        trainings.last().unwrap().input["input_images"]
            .as_str()
            .unwrap()
            .to_string()
    };
    let path = &input_images[input_images.find("/api/photos/zip/").unwrap()..];

    let response = app.get(path).send().await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.header(header::CONTENT_TYPE).as_deref(),
        Some("application/zip")
    );
    let archive = zip::ZipArchive::new(std::io::Cursor::new(response.bytes().await)).unwrap();
    assert_eq!(archive.len(), 2);

    // The same signature does not open another user's photos
    let retargeted = path.replacen(
        &format!("/api/photos/zip/{}?", user.id),
        &format!("/api/photos/zip/{}?", other.id),
        1,
    );
    let response = app.get(&retargeted).send().await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
