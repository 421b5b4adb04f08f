//! Upload -> submit -> dispatch -> completion, and the cancel-while-queued
//! and transcoder-failure paths, all through the HTTP surface.

mod support;

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use sqlx::PgPool;
use tower::ServiceExt;

use support::{build_app, fake_mp4_bytes, spawn_dispatcher};

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn json_request(method: &str, uri: &str, token: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {token}"))
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn multipart_body(boundary: &str, filename: &str, bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n").as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: video/mp4\r\n\r\n");
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

async fn register_and_login(app: &support::TestApp, username: &str) -> String {
    let register = json_request(
        "POST",
        "/users/",
        "",
        json!({"username": username, "password": "a-fine-password"}),
    );
    let response = app.router.clone().oneshot(register).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let token_req = json_request(
        "POST",
        "/token",
        "",
        json!({"username": username, "password": "a-fine-password"}),
    );
    let response = app.router.clone().oneshot(token_req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    json_body(response).await["access_token"].as_str().unwrap().to_string()
}

async fn upload_clip(app: &support::TestApp, token: &str) -> uuid::Uuid {
    let boundary = "reelqueue-test-boundary";
    let body = multipart_body(boundary, "clip.mp4", &fake_mp4_bytes());

    let request = Request::builder()
        .method("POST")
        .uri("/api/upload")
        .header("authorization", format!("Bearer {token}"))
        .header(
            "content-type",
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let asset = json_body(response).await;
    uuid::Uuid::parse_str(asset["id"].as_str().unwrap()).unwrap()
}

fn process_request_body(asset_id: uuid::Uuid) -> Value {
    json!({
        "files": [asset_id],
        "container": "mp4",
        "startTime": 0.0,
        "endTime": 1.0,
        "totalDuration": 1.0,
        "videoCodec": "h264",
        "audioCodec": "aac",
        "videoBitrate": null,
        "audioBitrate": null,
        "resolution": null,
        "useHardwareAcceleration": false,
        "preset": "fast",
    })
}

async fn poll_until_terminal(app: &support::TestApp, token: &str, task_id: uuid::Uuid) -> Value {
    for _ in 0..100 {
        let request = Request::builder()
            .method("GET")
            .uri(format!("/api/task-status/{task_id}"))
            .header("authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        let response = app.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let task = json_body(response).await;
        if task["status"] == "completed" || task["status"] == "failed" {
            return task;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("task {task_id} never reached a terminal state");
}

#[sqlx::test(migrator = "reelqueue_server::db::MIGRATOR")]
async fn happy_path_upload_process_and_complete(pool: PgPool) {
    let app = build_app(pool, "fake_transcoder.sh").await;
    let _dispatcher = spawn_dispatcher(&app);

    let token = register_and_login(&app, "erin").await;
    let asset_id = upload_clip(&app, &token).await;

    let submit = json_request("POST", "/api/process", &token, process_request_body(asset_id));
    let response = app.router.clone().oneshot(submit).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let submit_json = json_body(response).await;
    let task_id = uuid::Uuid::parse_str(submit_json["task_ids"][0].as_str().unwrap()).unwrap();

    let task = poll_until_terminal(&app, &token, task_id).await;
    assert_eq!(task["status"], "completed");
    assert_eq!(task["progress"], 100);
    assert!(!task["result_asset_id"].is_null());

    let files = Request::builder()
        .method("GET")
        .uri("/api/files")
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(files).await.unwrap();
    let files_json = json_body(response).await;
    assert!(files_json.as_array().unwrap().len() >= 2, "source and produced asset should both be listed");
}

#[sqlx::test(migrator = "reelqueue_server::db::MIGRATOR")]
async fn transcoder_failure_surfaces_as_failed_task(pool: PgPool) {
    let app = build_app(pool, "failing_transcoder.sh").await;
    let _dispatcher = spawn_dispatcher(&app);

    let token = register_and_login(&app, "frank").await;
    let asset_id = upload_clip(&app, &token).await;

    let submit = json_request("POST", "/api/process", &token, process_request_body(asset_id));
    let response = app.router.clone().oneshot(submit).await.unwrap();
    let submit_json = json_body(response).await;
    let task_id = uuid::Uuid::parse_str(submit_json["task_ids"][0].as_str().unwrap()).unwrap();

    let task = poll_until_terminal(&app, &token, task_id).await;
    assert_eq!(task["status"], "failed");
    assert!(task["details"].as_str().unwrap().contains("forced failure"));
}

#[sqlx::test(migrator = "reelqueue_server::db::MIGRATOR")]
async fn cancelling_a_still_queued_task_removes_it(pool: PgPool) {
    // No dispatcher is spawned here: the task stays queued until we
    // cancel it, so the race with a background dispatch never happens.
    let app = build_app(pool, "fake_transcoder.sh").await;

    let token = register_and_login(&app, "gina").await;
    let asset_id = upload_clip(&app, &token).await;

    let submit = json_request("POST", "/api/process", &token, process_request_body(asset_id));
    let response = app.router.clone().oneshot(submit).await.unwrap();
    let submit_json = json_body(response).await;
    let task_id = uuid::Uuid::parse_str(submit_json["task_ids"][0].as_str().unwrap()).unwrap();

    let cancel = Request::builder()
        .method("DELETE")
        .uri(format!("/api/tasks/{task_id}"))
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(cancel).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let status_req = Request::builder()
        .method("GET")
        .uri(format!("/api/task-status/{task_id}"))
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(status_req).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[sqlx::test(migrator = "reelqueue_server::db::MIGRATOR")]
async fn submitting_someone_elses_asset_is_forbidden(pool: PgPool) {
    let app = build_app(pool, "fake_transcoder.sh").await;

    let owner_token = register_and_login(&app, "henry").await;
    let asset_id = upload_clip(&app, &owner_token).await;

    let intruder_token = register_and_login(&app, "ivy").await;
    let submit = json_request(
        "POST",
        "/api/process",
        &intruder_token,
        process_request_body(asset_id),
    );
    let response = app.router.clone().oneshot(submit).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
