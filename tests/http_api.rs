//! Router tests: drive the axum app in-process with a stub describer.

mod common;

use std::sync::Arc;

use attachment_inspector::{server, IntakeController, IntakeSettings, UploadLimits};
use axum::http::{header, StatusCode};
use axum::Router;
use tower::ServiceExt;

use common::*;

fn app_with(describer: StubDescriber, settings: IntakeSettings) -> (Router, IntakeController) {
    let controller = IntakeController::new(Arc::new(describer), settings);
    (server::router(controller.clone()), controller)
}

fn app(describer: StubDescriber) -> (Router, IntakeController) {
    app_with(describer, IntakeSettings::default())
}

#[tokio::test]
async fn index_serves_the_upload_page() {
    let (app, _) = app(StubDescriber(Some("unused")));

    let response = app.oneshot(get("/")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let html = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(html.contains("Attachment Inspector"));
    assert!(html.contains("/events"));
}

#[tokio::test]
async fn upload_runs_the_whole_pipeline() {
    let (app, controller) = app(StubDescriber(Some("A blue field.")));
    let png = png_bytes(5, 7);

    let response = app
        .clone()
        .oneshot(upload_request("sky.png", "image/png", &png))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let accepted = body_json(response).await;
    assert_eq!(accepted["generation"], 1);
    assert_eq!(accepted["error"], serde_json::Value::Null);

    settle(&controller).await;

    let state = body_json(app.clone().oneshot(get("/state")).await.unwrap()).await;
    assert_eq!(state["phase"], "ready");
    assert_eq!(state["file_details"]["name"], "sky.png");
    assert_eq!(state["file_details"]["type"], "image/png");
    assert_eq!(state["file_details"]["dimensions"], "5 x 7 px");
    assert_eq!(state["analysis"], "A blue field.");
    assert_eq!(state["is_processing"], false);
    assert!(state.get("preview").is_none());

    let preview = app.oneshot(get("/preview")).await.unwrap();
    assert_eq!(preview.status(), StatusCode::OK);
    assert_eq!(preview.headers()[header::CONTENT_TYPE], "image/png");
    assert_eq!(body_bytes(preview).await, png);
}

#[tokio::test]
async fn wrong_type_is_reported_in_the_upload_response() {
    let (app, _) = app(StubDescriber(Some("unused")));

    let response = app
        .oneshot(upload_request("notes.txt", "text/plain", b"hello"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let state = body_json(response).await;
    assert_eq!(state["phase"], "failed");
    assert_eq!(
        state["error"],
        "Invalid file type. Please upload a PNG, JPG, GIF, or WEBP image."
    );
    assert_eq!(state["file_details"], serde_json::Value::Null);
}

#[tokio::test]
async fn oversized_upload_is_too_large() {
    let settings = IntakeSettings {
        limits: UploadLimits::default().with_max_bytes(1024),
        ..IntakeSettings::default()
    };
    let (app, _) = app_with(StubDescriber(Some("unused")), settings);

    let response = app
        .oneshot(upload_request("big.png", "image/png", &vec![0u8; 4096]))
        .await
        .unwrap();

    let state = body_json(response).await;
    assert_eq!(state["phase"], "failed");
    assert_eq!(state["error"], "File is too large. Maximum size is 1.00 KB.");
}

#[tokio::test]
async fn upload_without_file_field_is_bad_request() {
    let (app, controller) = app(StubDescriber(Some("unused")));
    let body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"note\"\r\n\r\nhi\r\n--{BOUNDARY}--\r\n"
    );

    let response = app
        .oneshot(multipart_request(body.into_bytes()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "upload has no file field");
    assert_eq!(controller.snapshot().generation, 0);
}

#[tokio::test]
async fn analysis_failure_keeps_details_over_http() {
    let (app, controller) = app(StubDescriber(None));

    app.clone()
        .oneshot(upload_request("kept.png", "image/png", &png_bytes(3, 2)))
        .await
        .unwrap();
    settle(&controller).await;

    let state = body_json(app.clone().oneshot(get("/state")).await.unwrap()).await;
    assert_eq!(state["phase"], "ready_with_error");
    assert_eq!(state["file_details"]["dimensions"], "3 x 2 px");
    assert_eq!(state["analysis"], serde_json::Value::Null);
    assert!(state["error"]
        .as_str()
        .unwrap()
        .starts_with("Failed to analyze image."));

    let preview = app.oneshot(get("/preview")).await.unwrap();
    assert_eq!(preview.status(), StatusCode::OK);
}

#[tokio::test]
async fn reset_clears_state_and_preview() {
    let (app, controller) = app(StubDescriber(Some("something")));
    app.clone()
        .oneshot(upload_request("a.png", "image/png", &png_bytes(2, 2)))
        .await
        .unwrap();
    settle(&controller).await;

    let reset = body_json(app.clone().oneshot(post("/reset")).await.unwrap()).await;
    assert_eq!(reset["phase"], "idle");
    assert_eq!(reset["file_details"], serde_json::Value::Null);
    assert_eq!(reset["analysis"], serde_json::Value::Null);
    assert_eq!(reset["error"], serde_json::Value::Null);

    let preview = app.oneshot(get("/preview")).await.unwrap();
    assert_eq!(preview.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn events_stream_is_server_sent_events() {
    let (app, _) = app(StubDescriber(Some("unused")));

    let response = app.oneshot(get("/events")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));
}
