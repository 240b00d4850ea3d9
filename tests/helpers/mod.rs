//! Shared fixtures for the in-process integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use base64::Engine;
use chrono::{SecondsFormat, Utc};
use http_body_util::BodyExt;
use ring::rand::SystemRandom;
use ring::signature::{RsaKeyPair, RSA_PKCS1_SHA256};
use serde_json::{json, Value};
use tower::ServiceExt;

use media_recognition::app_state::AppState;
use media_recognition::config::{parse_buckets, RecognitionConfig, WebhookConfig};
use media_recognition::db::memory::{MemoryJobRegistry, MemoryMediaStore};
use media_recognition::models::analysis::{AnalysisResult, AnalysisType};
use media_recognition::models::job::AppliedJob;
use media_recognition::models::media::{MediaRecord, MergeOutcome};
use media_recognition::models::notification::SnsEnvelope;
use media_recognition::routes;
use media_recognition::services::certificates::{CertificateError, CertificateSource};
use media_recognition::services::media_store::{MediaStore, StoreError};
use media_recognition::services::pipeline::AnalysisPipeline;
use media_recognition::services::provider::{
    DetectImageRequest, ProviderError, RecognitionProvider, StartAnalysisRequest,
};
use media_recognition::services::queue::MemoryCompletionQueue;
use media_recognition::services::submitter::AnalysisSubmitter;
use media_recognition::services::webhook::{string_to_sign, WebhookAuthenticator};
use media_recognition::services::worker::CompletionWorker;

pub const CERT_PEM: &[u8] = include_bytes!("../fixtures/sns_signing_cert.pem");
pub const KEY_PK8: &[u8] = include_bytes!("../fixtures/sns_signing_key.pk8");
pub const CERT_URL: &str = "https://sns.us-east-1.amazonaws.com/SimpleNotificationService-test.pem";
pub const TOPIC: &str = "arn:aws:sns:us-east-1:123456789012:rekognition";
pub const ROLE: &str = "arn:aws:iam::123456789012:role/rekognition";

/// Provider double that hands out fixed job ids and canned results.
#[derive(Default)]
pub struct FakeProvider {
    pub job_ids: Mutex<Vec<String>>,
    pub results: Mutex<HashMap<String, Value>>,
    pub detect_result: Mutex<Option<Value>>,
    pub started: Mutex<Vec<StartAnalysisRequest>>,
    pub fetch_failures: AtomicUsize,
    pub start_calls: AtomicUsize,
    pub fetch_calls: AtomicUsize,
    pub detect_calls: AtomicUsize,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Job id returned by the next `start_analysis` call.
    pub fn next_job_id(&self, job_id: &str) {
        self.job_ids.lock().unwrap().push(job_id.to_string());
    }

    pub fn set_results(&self, job_id: &str, results: Value) {
        self.results
            .lock()
            .unwrap()
            .insert(job_id.to_string(), results);
    }

    pub fn set_detect_result(&self, result: Value) {
        *self.detect_result.lock().unwrap() = Some(result);
    }

    /// Make the next `count` fetches fail with a server error.
    pub fn fail_fetches(&self, count: usize) {
        self.fetch_failures.store(count, Ordering::SeqCst);
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecognitionProvider for FakeProvider {
    async fn start_analysis(&self, request: &StartAnalysisRequest) -> Result<String, ProviderError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        self.started.lock().unwrap().push(request.clone());
        let mut job_ids = self.job_ids.lock().unwrap();
        if job_ids.is_empty() {
            return Err(ProviderError::InvalidResponse("no job id queued".into()));
        }
        Ok(job_ids.remove(0))
    }

    async fn fetch_results(
        &self,
        job_id: &str,
        _analysis_type: AnalysisType,
    ) -> Result<Value, ProviderError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.fetch_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fetch_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ProviderError::Api {
                status: 500,
                error_type: "InternalServerError".into(),
                message: "try again".into(),
            });
        }
        self.results
            .lock()
            .unwrap()
            .get(job_id)
            .cloned()
            .ok_or_else(|| ProviderError::InvalidResponse(format!("no results for {job_id}")))
    }

    async fn detect_image(&self, _request: &DetectImageRequest) -> Result<Value, ProviderError> {
        self.detect_calls.fetch_add(1, Ordering::SeqCst);
        self.detect_result
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ProviderError::InvalidResponse("no detect result".into()))
    }
}

/// Serves the fixture certificate for every URL.
pub struct StaticCertificateSource;

#[async_trait]
impl CertificateSource for StaticCertificateSource {
    async fn fetch(&self, _url: &url::Url) -> Result<Arc<Vec<u8>>, CertificateError> {
        Ok(Arc::new(CERT_PEM.to_vec()))
    }
}

pub fn recognition_config() -> RecognitionConfig {
    RecognitionConfig {
        disk: "s3".to_string(),
        buckets: parse_buckets("s3=media-test"),
        iam_arn: Some(ROLE.to_string()),
        sns_topic_arn: Some(TOPIC.to_string()),
        min_confidence: 50.0,
    }
}

/// Memory media store whose merges can be made to fail with a database error.
pub struct FlakyMediaStore {
    inner: Arc<MemoryMediaStore>,
    merge_failures: AtomicUsize,
}

impl FlakyMediaStore {
    pub fn new(inner: Arc<MemoryMediaStore>) -> Self {
        Self {
            inner,
            merge_failures: AtomicUsize::new(0),
        }
    }

    pub fn fail_merges(&self, count: usize) {
        self.merge_failures.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl MediaStore for FlakyMediaStore {
    async fn get_media(&self, media_id: i64) -> Result<Option<MediaRecord>, StoreError> {
        self.inner.get_media(media_id).await
    }

    async fn update_analysis_results(
        &self,
        media_id: i64,
        result: &AnalysisResult,
        applied: &AppliedJob,
    ) -> Result<MergeOutcome, StoreError> {
        let failing = self
            .merge_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner.update_analysis_results(media_id, result, applied).await
    }

    async fn update_job_id(
        &self,
        media_id: i64,
        job_id: &str,
        analysis_type: AnalysisType,
    ) -> Result<(), StoreError> {
        self.inner.update_job_id(media_id, job_id, analysis_type).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }
}

/// Everything an in-process test needs, backed by memory.
pub struct TestApp {
    pub router: Router,
    pub provider: Arc<FakeProvider>,
    pub registry: Arc<MemoryJobRegistry>,
    pub media: Arc<MemoryMediaStore>,
    pub store: Arc<FlakyMediaStore>,
    pub queue: Arc<MemoryCompletionQueue>,
    pub pipeline: Arc<AnalysisPipeline>,
    pub worker: CompletionWorker,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(recognition_config())
    }

    pub fn with_config(config: RecognitionConfig) -> Self {
        let provider = Arc::new(FakeProvider::new());
        let registry = Arc::new(MemoryJobRegistry::new());
        let media = Arc::new(MemoryMediaStore::new());
        let store = Arc::new(FlakyMediaStore::new(media.clone()));
        let queue = Arc::new(MemoryCompletionQueue::new());

        let pipeline = AnalysisPipeline::new(
            AnalysisSubmitter::new(config, provider.clone()),
            registry.clone(),
            store.clone(),
            provider.clone(),
            Duration::from_secs(5),
        );

        let authenticator = WebhookAuthenticator::new(
            WebhookConfig {
                expected_topic_arn: Some(TOPIC.to_string()),
                ..WebhookConfig::default()
            },
            Arc::new(StaticCertificateSource),
        );

        let state = AppState::new(pipeline, authenticator, queue.clone(), reqwest::Client::new());
        let pipeline = state.pipeline.clone();
        let worker = CompletionWorker::new(pipeline.clone(), queue.clone());

        Self {
            router: routes::router(state),
            provider,
            registry,
            media,
            store,
            queue,
            pipeline,
            worker,
        }
    }

    /// Drain the completion queue.
    pub async fn run_worker(&self) -> usize {
        let mut handled = 0;
        while self.worker.process_next().await.unwrap() {
            handled += 1;
        }
        handled
    }

    pub async fn post_json(&self, uri: &str, body: &Value) -> (StatusCode, Value) {
        self.send(
            Request::post(uri)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(body).unwrap()))
                .unwrap(),
        )
        .await
    }

    pub async fn post_raw(&self, uri: &str, body: Vec<u8>) -> (StatusCode, Vec<u8>) {
        self.send_raw(
            Request::post(uri)
                .header("content-type", "text/plain; charset=UTF-8")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let (status, bytes) = self.send_raw(request).await;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    pub async fn send_raw(&self, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, bytes.to_vec())
    }
}

/// SNS notification envelope carrying a Rekognition job completion.
pub fn completion_envelope(job_id: &str, status: &str, api: &str) -> SnsEnvelope {
    let message = json!({
        "JobId": job_id,
        "Status": status,
        "API": api,
        "Timestamp": Utc::now().timestamp_millis(),
        "Video": {"S3Bucket": "media-test", "S3ObjectName": "videos/cat.mp4"}
    });

    SnsEnvelope {
        kind: "Notification".to_string(),
        message_id: uuid::Uuid::new_v4().to_string(),
        topic_arn: TOPIC.to_string(),
        message: message.to_string(),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        signature_version: "2".to_string(),
        signature: String::new(),
        signing_cert_url: CERT_URL.to_string(),
        subject: None,
        subscribe_url: None,
        token: None,
    }
}

/// Sign `envelope` with the fixture key and serialize it as SNS would.
pub fn sign(mut envelope: SnsEnvelope) -> Vec<u8> {
    let key = RsaKeyPair::from_pkcs8(KEY_PK8).unwrap();
    let mut signature = vec![0u8; key.public().modulus_len()];
    key.sign(
        &RSA_PKCS1_SHA256,
        &SystemRandom::new(),
        string_to_sign(&envelope).unwrap().as_bytes(),
        &mut signature,
    )
    .unwrap();
    envelope.signature = base64::engine::general_purpose::STANDARD.encode(signature);

    let mut body = json!({
        "Type": envelope.kind,
        "MessageId": envelope.message_id,
        "TopicArn": envelope.topic_arn,
        "Message": envelope.message,
        "Timestamp": envelope.timestamp,
        "SignatureVersion": envelope.signature_version,
        "Signature": envelope.signature,
        "SigningCertURL": envelope.signing_cert_url,
    });
    if let Some(subject) = &envelope.subject {
        body["Subject"] = json!(subject);
    }
    if let Some(url) = &envelope.subscribe_url {
        body["SubscribeURL"] = json!(url);
    }
    if let Some(token) = &envelope.token {
        body["Token"] = json!(token);
    }
    serde_json::to_vec(&body).unwrap()
}
