//! Registration, login and the `/users/me` identity lookup, exercised
//! through the full router rather than unit-testing the handlers in
//! isolation.

mod support;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use sqlx::PgPool;
use tower::ServiceExt;

use support::build_app;

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[sqlx::test(migrator = "reelqueue_server::db::MIGRATOR")]
async fn register_then_login_then_me(pool: PgPool) {
    let app = build_app(pool, "fake_transcoder.sh").await;

    let register = json_request(
        "POST",
        "/users/",
        json!({"username": "alice", "password": "hunter2-password"}),
    );
    let response = app.router.clone().oneshot(register).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let token_req = json_request(
        "POST",
        "/token",
        json!({"username": "alice", "password": "hunter2-password"}),
    );
    let response = app.router.clone().oneshot(token_req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let token_json = json_body(response).await;
    let token = token_json["access_token"].as_str().unwrap().to_string();
    assert_eq!(token_json["token_type"], "bearer");

    let me_req = Request::builder()
        .method("GET")
        .uri("/users/me")
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(me_req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let me_json = json_body(response).await;
    assert_eq!(me_json["username"], "alice");
}

#[sqlx::test(migrator = "reelqueue_server::db::MIGRATOR")]
async fn duplicate_username_is_rejected(pool: PgPool) {
    let app = build_app(pool, "fake_transcoder.sh").await;
    let credentials = json!({"username": "bob", "password": "longenough-password"});

    let first = json_request("POST", "/users/", credentials.clone());
    assert_eq!(
        app.router.clone().oneshot(first).await.unwrap().status(),
        StatusCode::OK
    );

    let second = json_request("POST", "/users/", credentials);
    assert_eq!(
        app.router.clone().oneshot(second).await.unwrap().status(),
        StatusCode::BAD_REQUEST
    );
}

#[sqlx::test(migrator = "reelqueue_server::db::MIGRATOR")]
async fn short_password_is_rejected_at_registration(pool: PgPool) {
    let app = build_app(pool, "fake_transcoder.sh").await;
    let request = json_request("POST", "/users/", json!({"username": "dana", "password": "short"}));
    assert_eq!(
        app.router.clone().oneshot(request).await.unwrap().status(),
        StatusCode::BAD_REQUEST
    );
}

#[sqlx::test(migrator = "reelqueue_server::db::MIGRATOR")]
async fn wrong_password_is_unauthorized(pool: PgPool) {
    let app = build_app(pool, "fake_transcoder.sh").await;
    let register = json_request(
        "POST",
        "/users/",
        json!({"username": "carol", "password": "correct-password"}),
    );
    assert_eq!(
        app.router.clone().oneshot(register).await.unwrap().status(),
        StatusCode::OK
    );

    let bad_token = json_request(
        "POST",
        "/token",
        json!({"username": "carol", "password": "wrong-password"}),
    );
    assert_eq!(
        app.router.clone().oneshot(bad_token).await.unwrap().status(),
        StatusCode::UNAUTHORIZED
    );
}

#[sqlx::test(migrator = "reelqueue_server::db::MIGRATOR")]
async fn missing_bearer_token_is_rejected(pool: PgPool) {
    let app = build_app(pool, "fake_transcoder.sh").await;
    let request = Request::builder()
        .method("GET")
        .uri("/users/me")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
