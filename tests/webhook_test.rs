//! Webhook endpoint tests against the in-process router.
//!
//! Run with: cargo test --test webhook_test

mod helpers;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;

use helpers::*;
use media_recognition::models::analysis::{AnalysisResult, AnalysisType, DetectedLabel};
use media_recognition::models::job::{JobStatus, NewAnalysisJob};
use media_recognition::models::media::MediaKind;
use media_recognition::services::media_store::MediaStore;
use media_recognition::services::queue::CompletionQueue;
use media_recognition::services::registry::JobRegistry;

const WEBHOOK: &str = "/webhooks/rekognition";

async fn register(app: &TestApp, job_id: &str, media_id: i64) {
    app.media.insert(media_id, "s3", "videos/cat.mp4", MediaKind::Video);
    app.registry
        .register(NewAnalysisJob {
            job_id: job_id.to_string(),
            client_token: format!("labels_{media_id}_abc123"),
            media_id,
            analysis_type: AnalysisType::Labels,
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_tampered_delivery_looks_like_unknown_route() {
    let app = TestApp::new();
    register(&app, "abc123", 42).await;

    let body = sign(completion_envelope("abc123", "SUCCEEDED", "StartLabelDetection"));
    let tampered = String::from_utf8(body)
        .unwrap()
        .replace("SUCCEEDED", "FAILED")
        .into_bytes();

    let (webhook_status, webhook_body) = app.post_raw(WEBHOOK, tampered).await;
    let (unknown_status, unknown_body) = app
        .send_raw(Request::post("/no/such/route").body(Body::empty()).unwrap())
        .await;

    assert_eq!(webhook_status, StatusCode::NOT_FOUND);
    assert_eq!(webhook_status, unknown_status);
    assert_eq!(webhook_body, unknown_body);
    assert_eq!(app.queue.depth().await.unwrap(), 0);
}

#[tokio::test]
async fn test_garbage_body_is_not_found() {
    let app = TestApp::new();

    let (status, body) = app.post_raw(WEBHOOK, b"not json at all".to_vec()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(serde_json::from_slice::<serde_json::Value>(&body).unwrap()["error"], "Not found");
}

#[tokio::test]
async fn test_untrusted_certificate_url_is_not_found() {
    let app = TestApp::new();
    register(&app, "abc123", 42).await;

    let mut envelope = completion_envelope("abc123", "SUCCEEDED", "StartLabelDetection");
    envelope.signing_cert_url = "https://attacker.example.com/cert.pem".to_string();

    let (status, _) = app.post_raw(WEBHOOK, sign(envelope)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(app.queue.depth().await.unwrap(), 0);
}

#[tokio::test]
async fn test_other_topic_is_not_found() {
    let app = TestApp::new();
    register(&app, "abc123", 42).await;

    let mut envelope = completion_envelope("abc123", "SUCCEEDED", "StartLabelDetection");
    envelope.topic_arn = "arn:aws:sns:us-east-1:999999999999:other".to_string();

    let (status, _) = app.post_raw(WEBHOOK, sign(envelope)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let app = TestApp::new();

    let body = sign(completion_envelope("never-submitted", "SUCCEEDED", "StartLabelDetection"));
    let (status, _) = app.post_raw(WEBHOOK, body).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(app.queue.depth().await.unwrap(), 0);
}

#[tokio::test]
async fn test_mismatched_api_is_not_found() {
    let app = TestApp::new();
    register(&app, "abc123", 42).await;

    let body = sign(completion_envelope("abc123", "SUCCEEDED", "StartFaceDetection"));
    let (status, _) = app.post_raw(WEBHOOK, body).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_valid_delivery_is_queued() {
    let app = TestApp::new();
    register(&app, "abc123", 42).await;

    let body = sign(completion_envelope("abc123", "SUCCEEDED", "StartLabelDetection"));
    let (status, _) = app.post_raw(WEBHOOK, body).await;

    assert_eq!(status, StatusCode::OK);
    let task = app.queue.dequeue().await.unwrap().unwrap();
    assert_eq!(task.job_id, "abc123");
    assert!(task.status.succeeded());
}

#[tokio::test]
async fn test_duplicate_delivery_fetches_once() {
    let app = TestApp::new();
    register(&app, "abc123", 42).await;
    app.provider.set_results(
        "abc123",
        json!({
            "JobStatus": "SUCCEEDED",
            "Labels": [{"Timestamp": 0, "Label": {"Name": "Cat", "Confidence": 98.2}}]
        }),
    );

    // SNS redelivers the identical signed message.
    let body = sign(completion_envelope("abc123", "SUCCEEDED", "StartLabelDetection"));
    let (first, _) = app.post_raw(WEBHOOK, body.clone()).await;
    assert_eq!(first, StatusCode::OK);
    assert_eq!(app.run_worker().await, 1);
    let after_first = app.media.get_media(42).await.unwrap().unwrap().analysis;

    let (second, _) = app.post_raw(WEBHOOK, body).await;
    assert_eq!(second, StatusCode::OK);
    assert_eq!(app.run_worker().await, 1);
    let after_second = app.media.get_media(42).await.unwrap().unwrap().analysis;

    assert_eq!(app.provider.fetch_calls(), 1);
    assert_eq!(after_first, after_second);
    assert_eq!(
        after_second.results[&AnalysisType::Labels],
        AnalysisResult::Labels(vec![DetectedLabel {
            name: "Cat".to_string(),
            confidence: 98.2,
            timestamp: Some(0),
            parents: vec![],
            instances: vec![],
        }])
    );
    assert_eq!(app.queue.in_flight(), 0);
}

#[tokio::test]
async fn test_concurrent_duplicate_deliveries_are_accepted() {
    let app = TestApp::new();
    register(&app, "abc123", 42).await;
    app.provider.set_results("abc123", json!({"JobStatus": "SUCCEEDED", "Labels": []}));

    let body = sign(completion_envelope("abc123", "SUCCEEDED", "StartLabelDetection"));
    let deliveries = (0..3).map(|_| app.post_raw(WEBHOOK, body.clone()));
    let statuses = futures::future::join_all(deliveries).await;

    assert!(statuses.iter().all(|(status, _)| *status == StatusCode::OK));
    assert_eq!(app.run_worker().await, 3);
    assert_eq!(app.provider.fetch_calls(), 1);
}

#[tokio::test]
async fn test_failed_job_is_marked_failed_without_fetch() {
    let app = TestApp::new();
    register(&app, "abc123", 42).await;

    let body = sign(completion_envelope("abc123", "FAILED", "StartLabelDetection"));
    let (status, _) = app.post_raw(WEBHOOK, body).await;
    assert_eq!(status, StatusCode::OK);
    app.run_worker().await;

    let job = app.registry.resolve("abc123").await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(app.provider.fetch_calls(), 0);
    let media = app.media.get_media(42).await.unwrap().unwrap();
    assert!(media.analysis.results.is_empty());
}

#[tokio::test]
async fn test_unsubscribe_confirmation_is_acknowledged() {
    let app = TestApp::new();

    let mut envelope = completion_envelope("abc123", "SUCCEEDED", "StartLabelDetection");
    envelope.kind = "UnsubscribeConfirmation".to_string();
    envelope.subscribe_url =
        Some("https://sns.us-east-1.amazonaws.com/?Action=ConfirmSubscription&Token=t".to_string());
    envelope.token = Some("t".to_string());

    let (status, _) = app.post_raw(WEBHOOK, sign(envelope)).await;
    assert_eq!(status, StatusCode::OK);
}
