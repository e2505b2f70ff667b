//! HTTP API Integration Tests
//!
//! Exercises the router with `tower::ServiceExt::oneshot`; no sockets.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use expensebot::llm::{ClassifierRequest, IntentClassifier};
use expensebot::server::{build_router, AppState, Claims};
use expensebot::{Config, ExpenseStore};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

const JWT_SECRET: &str = "test-jwt-secret";
const BOT_SECRET: &str = "test-bot-secret";

/// Always answers with the same classifier text
struct Fixed(&'static str);

#[async_trait]
impl IntentClassifier for Fixed {
    async fn classify(&self, _request: ClassifierRequest<'_>) -> anyhow::Result<String> {
        Ok(self.0.to_string())
    }
}

fn test_app(reply: &'static str) -> (Router, Arc<AppState>) {
    let config = Config {
        jwt_secret: Some(JWT_SECRET.to_string()),
        bot_api_secret: Some(BOT_SECRET.to_string()),
        ..Config::default()
    };
    let store = Arc::new(ExpenseStore::open_in_memory().unwrap());
    let state = Arc::new(AppState::new(&config, store, Arc::new(Fixed(reply))));
    (build_router(state.clone(), &config.cors_origins), state)
}

fn token(account: &str) -> String {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: account.to_string(),
        exp: now + 900,
        iat: now,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

fn request(method: Method, uri: &str, bearer: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(bearer) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", bearer));
    }
    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&json).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn body_json(response: axum::response::Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

#[tokio::test]
async fn test_health() {
    let (app, _) = test_app("");
    let response = app
        .oneshot(request(Method::GET, "/api/health", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_account_endpoints_require_token() {
    let (app, _) = test_app("");

    let missing = app
        .clone()
        .oneshot(request(Method::GET, "/api/expenses", None, None))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    let forged = app
        .oneshot(request(Method::GET, "/api/expenses", Some("not-a-jwt"), None))
        .await
        .unwrap();
    assert_eq!(forged.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(forged).await;
    assert_eq!(json["message"], "Invalid token");
}

#[tokio::test]
async fn test_create_list_and_fetch_receipt() {
    let (app, _) = test_app("");
    let bearer = token("acct-1");
    let receipt = json!({
        "filename": "receipt.png",
        "data_base64": STANDARD.encode(b"png bytes"),
    });

    let created = app
        .clone()
        .oneshot(request(
            Method::POST,
            "/api/expenses",
            Some(&bearer),
            Some(json!({
                "date": "2024-07-19",
                "merchant_name": "Joe's Diner",
                "amount": "25.30",
                "receipt": receipt,
            })),
        ))
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);
    let expense = body_json(created).await;
    let id = expense["id"].as_str().unwrap().to_string();
    assert_eq!(expense["merchant_name"], "Joe's Diner");

    let duplicate = app
        .clone()
        .oneshot(request(
            Method::POST,
            "/api/expenses",
            Some(&bearer),
            Some(json!({
                "date": "2024-07-20",
                "merchant_name": "Somewhere Else",
                "amount": "1.00",
                "receipt": receipt,
            })),
        ))
        .await
        .unwrap();
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);

    let listed = app
        .clone()
        .oneshot(request(
            Method::GET,
            "/api/expenses?from=2024-07-01&merchant=diner",
            Some(&bearer),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(listed.status(), StatusCode::OK);
    let listed = body_json(listed).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let file = app
        .clone()
        .oneshot(request(
            Method::GET,
            &format!("/api/expenses/{}/receipt", id),
            Some(&bearer),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(file.status(), StatusCode::OK);
    assert_eq!(file.headers()[header::CONTENT_TYPE], "image/png");
    assert_eq!(body_bytes(file).await, b"png bytes");

    // Other accounts can't see it
    let other = app
        .oneshot(request(
            Method::GET,
            &format!("/api/expenses/{}/receipt", id),
            Some(&token("acct-2")),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(other.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_create_rejects_bad_input() {
    let (app, _) = test_app("");
    let bearer = token("acct-1");

    let negative = app
        .clone()
        .oneshot(request(
            Method::POST,
            "/api/expenses",
            Some(&bearer),
            Some(json!({"date": "2024-07-19", "merchant_name": "Shop", "amount": "-3"})),
        ))
        .await
        .unwrap();
    assert_eq!(negative.status(), StatusCode::BAD_REQUEST);

    let unknown_category = app
        .oneshot(request(
            Method::POST,
            "/api/expenses",
            Some(&bearer),
            Some(json!({
                "date": "2024-07-19",
                "merchant_name": "Shop",
                "amount": "3",
                "business_purpose_id": "nope",
            })),
        ))
        .await
        .unwrap();
    assert_eq!(unknown_category.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_business_purposes_sorted() {
    let (app, state) = test_app("");
    state.store.insert_category("Advertising", "acct-1").unwrap();

    let response = app
        .oneshot(request(
            Method::GET,
            "/api/business-purposes",
            Some(&token("acct-1")),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let names: Vec<&str> = json
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["name"].as_str().unwrap())
        .collect();
    assert_eq!(names.first(), Some(&"Food"));
    assert_eq!(names.last(), Some(&"Advertising"));
}

#[tokio::test]
async fn test_export_download() {
    let (app, _) = test_app("");
    let bearer = token("acct-1");
    app.clone()
        .oneshot(request(
            Method::POST,
            "/api/expenses",
            Some(&bearer),
            Some(json!({"date": "2024-07-19", "merchant_name": "Joe's Diner", "amount": "25.30"})),
        ))
        .await
        .unwrap();

    let csv = app
        .clone()
        .oneshot(request(Method::GET, "/api/export?format=csv", Some(&bearer), None))
        .await
        .unwrap();
    assert_eq!(csv.status(), StatusCode::OK);
    assert_eq!(csv.headers()[header::CONTENT_TYPE], "text/csv");
    let disposition = csv.headers()[header::CONTENT_DISPOSITION].to_str().unwrap();
    assert!(disposition.starts_with("attachment; filename=\"expenses-"));
    let body = String::from_utf8(body_bytes(csv).await).unwrap();
    assert!(body.contains("Joe's Diner"));

    let pdf = app
        .clone()
        .oneshot(request(Method::GET, "/api/export?format=pdf", Some(&bearer), None))
        .await
        .unwrap();
    assert_eq!(pdf.status(), StatusCode::OK);
    assert!(body_bytes(pdf).await.starts_with(b"%PDF-1.4"));

    let docx = app
        .oneshot(request(Method::GET, "/api/export?format=docx", Some(&bearer), None))
        .await
        .unwrap();
    assert_eq!(docx.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_link_then_message_through_bot_endpoint() {
    let (app, state) = test_app(r#"{"action":"reply","text":"Hi there!"}"#);

    let unlinked = app
        .clone()
        .oneshot(request(
            Method::POST,
            "/api/bot/message",
            Some(BOT_SECRET),
            Some(json!({"sender_id": 77, "chat_id": 77, "text": "hello"})),
        ))
        .await
        .unwrap();
    assert_eq!(unlinked.status(), StatusCode::OK);
    assert!(body_json(unlinked).await["reply"]
        .as_str()
        .unwrap()
        .contains("/link"));

    let pending = state.links.issue_token(77, Some("sam")).unwrap();
    let linked = app
        .clone()
        .oneshot(request(
            Method::POST,
            "/api/link",
            Some(&token("acct-1")),
            Some(json!({"token": pending.token})),
        ))
        .await
        .unwrap();
    assert_eq!(linked.status(), StatusCode::OK);
    let link = body_json(linked).await;
    assert_eq!(link["account_id"], "acct-1");
    assert_eq!(link["channel_user_id"], 77);

    let reused = app
        .clone()
        .oneshot(request(
            Method::POST,
            "/api/link",
            Some(&token("acct-1")),
            Some(json!({"token": pending.token})),
        ))
        .await
        .unwrap();
    assert_eq!(reused.status(), StatusCode::BAD_REQUEST);

    let answered = app
        .oneshot(request(
            Method::POST,
            "/api/bot/message",
            Some(BOT_SECRET),
            Some(json!({"sender_id": 77, "chat_id": 77, "text": "hello"})),
        ))
        .await
        .unwrap();
    assert_eq!(body_json(answered).await["reply"], "Hi there!");
}

#[tokio::test]
async fn test_bot_endpoint_rejects_wrong_secret() {
    let (app, _) = test_app("");
    let response = app
        .oneshot(request(
            Method::POST,
            "/api/bot/message",
            Some("wrong"),
            Some(json!({"sender_id": 1, "chat_id": 1, "text": "hi"})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_assistant_grants() {
    let (app, state) = test_app("");
    state
        .store
        .register_group(-900, "acct-1", Some("Team"))
        .unwrap();
    let target = json!({"delegate_channel_id": 55, "group_chat_id": -900});

    let foreign = app
        .clone()
        .oneshot(request(
            Method::POST,
            "/api/assistants",
            Some(&token("acct-2")),
            Some(target.clone()),
        ))
        .await
        .unwrap();
    assert_eq!(foreign.status(), StatusCode::FORBIDDEN);

    let granted = app
        .clone()
        .oneshot(request(
            Method::POST,
            "/api/assistants",
            Some(&token("acct-1")),
            Some(target),
        ))
        .await
        .unwrap();
    assert_eq!(granted.status(), StatusCode::CREATED);

    let listed = app
        .clone()
        .oneshot(request(Method::GET, "/api/assistants", Some(&token("acct-1")), None))
        .await
        .unwrap();
    let listed = body_json(listed).await;
    assert_eq!(listed[0]["delegate_channel_id"], 55);
    assert_eq!(listed[0]["is_active"], true);

    let uri = "/api/assistants?delegate_channel_id=55&group_chat_id=-900";
    let revoked = app
        .clone()
        .oneshot(request(Method::DELETE, uri, Some(&token("acct-1")), None))
        .await
        .unwrap();
    assert_eq!(revoked.status(), StatusCode::NO_CONTENT);

    let again = app
        .oneshot(request(Method::DELETE, uri, Some(&token("acct-1")), None))
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::NOT_FOUND);
}
