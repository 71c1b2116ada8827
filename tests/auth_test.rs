// Authentication integration tests
// Google sign-in through both the browser session flow and the mobile token flow

use axum::http::{header, StatusCode};
use serde_json::{json, Value};
use serial_test::serial;
use uuid::Uuid;

mod common;
use common::{setup_test_app, TestResponse};

/// `name=value` of the first Set-Cookie for `name`
fn cookie_pair(response: &TestResponse, name: &str) -> Option<String> {
    response
        .cookies()
        .into_iter()
        .filter_map(|c| c.split(';').next().map(str::to_string))
        .find(|pair| pair.starts_with(&format!("{}=", name)))
}

#[tokio::test]
#[serial]
async fn test_protected_routes_require_credentials() {
    let Some(app) = setup_test_app().await else { return };

    let response = app.get("/api/models").send().await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await;
    assert_eq!(body["error"], "Unauthorized. No valid session or token provided.");

    let response = app.get("/api/headshots").bearer("not-a-jwt").send().await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .get("/api/uploads")
        .header("cookie", "sid=unknown-session")
        .send()
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
#[serial]
async fn test_mobile_login_and_refresh() {
    let Some(app) = setup_test_app().await else { return };
    let code = Uuid::new_v4().simple().to_string();

    let response = app
        .post("/api/auth/mobile/google")
        .json(&json!({ "code": code, "redirectUri": "https://app.example.com/oauth" }))
        .send()
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await;
    let access = body["accessToken"].as_str().unwrap().to_string();
    let refresh = body["refreshToken"].as_str().unwrap().to_string();
    assert_eq!(body["user"]["googleId"], format!("g{}", code));
    assert_eq!(body["user"]["tokens"], 0);

    let response = app.get("/api/auth/user").bearer(&access).send().await;
    let me: Value = response.json().await;
    assert_eq!(me["isAuthenticated"], true);
    assert_eq!(me["user"]["id"], body["user"]["id"]);

    let response = app
        .post("/api/auth/refresh")
        .json(&json!({ "refreshToken": refresh }))
        .send()
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let renewed: Value = response.json().await;
    assert!(renewed["accessToken"].is_string());

    // Access tokens are not accepted as refresh tokens
    let response = app
        .post("/api/auth/refresh")
        .json(&json!({ "refreshToken": access }))
        .send()
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Logging in again reuses the account
    let response = app
        .post("/api/auth/mobile/google")
        .json(&json!({ "code": code, "redirectUri": "https://app.example.com/oauth" }))
        .send()
        .await;
    let again: Value = response.json().await;
    assert_eq!(again["user"]["id"], body["user"]["id"]);
}

#[tokio::test]
#[serial]
async fn test_mobile_login_with_rejected_code() {
    let Some(app) = setup_test_app().await else { return };

    let response = app
        .post("/api/auth/mobile/google")
        .json(&json!({ "code": "bad-code", "redirectUri": "https://app.example.com/oauth" }))
        .send()
        .await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
#[serial]
async fn test_browser_login_session_and_logout() {
    let Some(app) = setup_test_app().await else { return };

    let response = app.get("/auth/google").send().await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let location = response.header(header::LOCATION).unwrap();
    let state_cookie = cookie_pair(&response, "oauth_state").unwrap();
    let state = state_cookie.trim_start_matches("oauth_state=").to_string();
    assert!(location.ends_with(&format!("state={}", state)));

    let code = Uuid::new_v4().simple().to_string();
    let response = app
        .get(&format!("/auth/google/callback?code={}&state={}", code, state))
        .header("cookie", &state_cookie)
        .send()
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let location = response.header(header::LOCATION).unwrap();
    assert!(location.ends_with('/'));
    assert!(!location.contains("/login"));

    let session = cookie_pair(&response, "sid").unwrap();
    assert!(response.cookies().iter().any(|c| c.contains("HttpOnly")));

    let response = app.get("/api/auth/user").header("cookie", &session).send().await;
    let me: Value = response.json().await;
    assert_eq!(me["isAuthenticated"], true);
    assert_eq!(me["user"]["email"], format!("{}@example.com", code));

    let response = app.get("/api/models").header("cookie", &session).send().await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.get("/api/auth/logout").header("cookie", &session).send().await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await;
    assert_eq!(body["message"], "Logged out successfully");

    let response = app.get("/api/auth/user").header("cookie", &session).send().await;
    let me: Value = response.json().await;
    assert_eq!(me["isAuthenticated"], false);
    assert!(me["user"].is_null());
}

#[tokio::test]
#[serial]
async fn test_browser_callback_rejects_state_mismatch() {
    let Some(app) = setup_test_app().await else { return };

    let response = app
        .get("/auth/google/callback?code=abc&state=forged")
        .header("cookie", "oauth_state=expected")
        .send()
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(response.header(header::LOCATION).unwrap().ends_with("/login"));
    assert!(cookie_pair(&response, "sid").is_none());

    let response = app.get("/auth/google/callback?code=abc").send().await;
    assert!(response.header(header::LOCATION).unwrap().ends_with("/login"));
}
