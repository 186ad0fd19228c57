use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use bankcards::api::middleware::{
    auth::{HEADER_AUTH_ROLE, HEADER_AUTH_USER},
    state::AppState,
};
use bankcards::models::Role;
use bankcards::services::{card_codec::CardCodec, card_engine::CardEngine};
use bankcards::store::InMemoryStore;

const A: &str = "1111222233334444";
const B: &str = "5555666677778888";

async fn app() -> Router {
    let store = InMemoryStore::new();
    store.add_user("user1", Role::User).await;
    store.add_user("user2", Role::User).await;
    store.add_user("admin", Role::Admin).await;

    let store = Arc::new(store);
    let engine = CardEngine::new(
        store.clone(),
        store.clone(),
        CardCodec::new("api-test-key").unwrap(),
    );

    bankcards::api::router(AppState {
        engine: Arc::new(engine),
        cards: store,
    })
}

fn request(
    method: &str,
    uri: &str,
    user: Option<(&str, &str)>,
    body: Option<Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);

    if let Some((username, role)) = user {
        builder = builder
            .header(HEADER_AUTH_USER, username)
            .header(HEADER_AUTH_ROLE, role);
    }

    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

async fn create(app: &Router, owner: &str, number: &str, balance: &str) {
    let (status, body) = send(
        app,
        request(
            "POST",
            "/bank/cards",
            Some(("admin", "ADMIN")),
            Some(json!({
                "owner_username": owner,
                "number": number,
                "expiration_month": 12,
                "expiration_year": 2030,
                "balance": balance,
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
}

async fn balance_of(app: &Router, user: &str, number: &str) -> String {
    let (status, body) = send(
        app,
        request(
            "GET",
            &format!("/bank/cards/balance?number={number}"),
            Some((user, "USER")),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body["balance"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health() {
    let app = app().await;
    let (status, body) = send(&app, request("GET", "/health", None, None)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_create_returns_masked_view() {
    let app = app().await;
    let (status, body) = send(
        &app,
        request(
            "POST",
            "/bank/cards",
            Some(("admin", "ADMIN")),
            Some(json!({
                "owner_username": "user1",
                "number": A,
                "expiration_month": 1,
                "expiration_year": 2029,
            })),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["number"], "**** **** **** 4444");
    assert_eq!(body["status"], "ACTIVE");
    assert_eq!(body["owner_username"], "user1");
}

#[tokio::test]
async fn test_admin_routes_require_admin_role() {
    let app = app().await;
    create(&app, "user1", A, "10.00").await;

    let (status, _) = send(
        &app,
        request(
            "POST",
            &format!("/bank/cards/status?number={A}&status=blocked"),
            Some(("user1", "USER")),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &app,
        request("DELETE", &format!("/bank/cards/{A}"), None, None),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_balance_requires_ownership() {
    let app = app().await;
    create(&app, "user2", B, "50.00").await;

    let (status, body) = send(
        &app,
        request(
            "GET",
            &format!("/bank/cards/balance?number={B}"),
            Some(("user1", "USER")),
            None,
        ),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "incorrect_owner");
}

#[tokio::test]
async fn test_transfer_flow() {
    let app = app().await;
    create(&app, "user1", A, "100.00").await;
    create(&app, "user2", B, "50.00").await;

    let (status, _) = send(
        &app,
        request(
            "POST",
            "/bank/cards/transfer",
            Some(("user1", "USER")),
            Some(json!({ "from_card": A, "to_card": B, "amount": "40.00" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(balance_of(&app, "user1", A).await, "60.00");
    assert_eq!(balance_of(&app, "user2", B).await, "90.00");

    let (status, body) = send(
        &app,
        request(
            "POST",
            "/bank/cards/transfer",
            Some(("user1", "USER")),
            Some(json!({ "from_card": A, "to_card": B, "amount": "1000.00" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "insufficient_funds");
    assert_eq!(balance_of(&app, "user1", A).await, "60.00");
}

#[tokio::test]
async fn test_block_request_then_admin_status() {
    let app = app().await;
    create(&app, "user1", A, "0").await;

    let block = || {
        request(
            "POST",
            &format!("/bank/cards/block?number={A}"),
            Some(("user1", "USER")),
            None,
        )
    };

    let (status, _) = send(&app, block()).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, block()).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "wrong_status");

    let (status, body) = send(
        &app,
        request(
            "POST",
            &format!("/bank/cards/status?number={A}&status=unknown_value"),
            Some(("admin", "ADMIN")),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "wrong_status");

    let (status, _) = send(
        &app,
        request(
            "POST",
            &format!("/bank/cards/status?number={A}&status=active"),
            Some(("admin", "ADMIN")),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, block()).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_update_and_delete() {
    let app = app().await;
    create(&app, "user1", A, "10.00").await;

    let (status, body) = send(
        &app,
        request(
            "PUT",
            &format!("/bank/cards/{A}"),
            Some(("admin", "ADMIN")),
            Some(json!({ "owner_username": "user2", "status": "blocked" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["owner_username"], "user2");
    assert_eq!(body["status"], "BLOCKED");
    assert_eq!(body["expiration_month"], 12);

    let (status, _) = send(
        &app,
        request("DELETE", &format!("/bank/cards/{A}"), Some(("admin", "ADMIN")), None),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(
        &app,
        request("DELETE", &format!("/bank/cards/{A}"), Some(("admin", "ADMIN")), None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}
