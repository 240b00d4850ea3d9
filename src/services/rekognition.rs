//! AWS Rekognition client.
//!
//! Talks to the Rekognition JSON API directly over HTTPS, signing every
//! request with AWS Signature V4.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use crate::config::AppConfig;
use crate::models::analysis::AnalysisType;
use crate::services::provider::{
    DetectImageRequest, ProviderError, RecognitionProvider, StartAnalysisRequest, TypeOptions,
};

type HmacSha256 = Hmac<Sha256>;

const SERVICE: &str = "rekognition";
const TARGET_PREFIX: &str = "RekognitionService";
const PAGE_SIZE: u32 = 1000;
/// Upper bound on result pages fetched for one job.
const MAX_PAGES: usize = 100;

#[derive(Debug, Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

/// Client for the Rekognition video and image APIs.
pub struct RekognitionClient {
    http: Client,
    region: String,
    credentials: AwsCredentials,
    endpoint: url::Url,
}

impl RekognitionClient {
    pub fn new(
        region: &str,
        credentials: AwsCredentials,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let endpoint = format!("https://rekognition.{}.amazonaws.com/", region);
        let endpoint = url::Url::parse(&endpoint)
            .map_err(|e| ProviderError::InvalidResponse(format!("Invalid endpoint: {}", e)))?;
        let http = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            region: region.to_string(),
            credentials,
            endpoint,
        })
    }

    /// Build a client from the credentials and endpoint in `config`.
    pub fn from_config(config: &AppConfig) -> Result<Self, ProviderError> {
        let credentials = AwsCredentials {
            access_key_id: config.aws_access_key_id.clone(),
            secret_access_key: config.aws_secret_access_key.clone(),
            session_token: config.aws_session_token.clone().filter(|t| !t.is_empty()),
        };
        let client = Self::new(&config.aws_region, credentials, config.provider_timeout())?;

        match config.rekognition_endpoint.as_deref().filter(|e| !e.is_empty()) {
            Some(endpoint) => {
                let endpoint = url::Url::parse(endpoint).map_err(|e| {
                    ProviderError::InvalidResponse(format!("Invalid endpoint: {}", e))
                })?;
                Ok(client.with_endpoint(endpoint))
            }
            None => Ok(client),
        }
    }

    /// Point the client at a different endpoint (VPC endpoint, local emulator).
    pub fn with_endpoint(mut self, endpoint: url::Url) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Invoke one Rekognition action and return its JSON response.
    async fn call(&self, action: &str, body: &Value) -> Result<Value, ProviderError> {
        let payload = serde_json::to_vec(body)
            .map_err(|e| ProviderError::InvalidResponse(format!("Failed to serialize request: {}", e)))?;
        let payload_hash = hex::encode(Sha256::digest(&payload));
        let host = host_header(&self.endpoint);

        let signed = sign_request(
            &self.credentials,
            &self.region,
            &host,
            self.endpoint.path(),
            &payload_hash,
            Utc::now(),
        );

        let mut request = self
            .http
            .post(self.endpoint.clone())
            .header("Content-Type", "application/x-amz-json-1.1")
            .header("X-Amz-Target", format!("{}.{}", TARGET_PREFIX, action));
        for (name, value) in signed {
            request = request.header(name, value);
        }

        tracing::debug!(action, "Calling Rekognition");

        let response = request.body(payload).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let (error_type, message) = parse_error_body(&text);
            return Err(ProviderError::Api {
                status: status.as_u16(),
                error_type,
                message,
            });
        }

        serde_json::from_str(&text).map_err(|e| {
            ProviderError::InvalidResponse(format!("{} returned invalid JSON: {}", action, e))
        })
    }
}

#[async_trait]
impl RecognitionProvider for RekognitionClient {
    async fn start_analysis(&self, request: &StartAnalysisRequest) -> Result<String, ProviderError> {
        let action = request.options.analysis_type().start_action();
        let response = self.call(action, &start_body(request)).await?;

        response
            .get("JobId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ProviderError::InvalidResponse(format!("{} returned no JobId", action)))
    }

    async fn fetch_results(
        &self,
        job_id: &str,
        analysis_type: AnalysisType,
    ) -> Result<Value, ProviderError> {
        let action = analysis_type.get_action();
        collect_pages(
            job_id,
            analysis_type.video_result_key(),
            MAX_PAGES,
            |next_token| async move {
                self.call(action, &get_body(job_id, analysis_type, next_token.as_deref()))
                    .await
            },
        )
        .await
    }

    async fn detect_image(&self, request: &DetectImageRequest) -> Result<Value, ProviderError> {
        let action = request.options.analysis_type().detect_action();
        self.call(action, &detect_body(request)).await
    }
}

/// Fetch result pages until the provider stops returning a `NextToken` and
/// concatenate their `key` items into the first page.
///
/// Running out of pages with a token still outstanding is an error; a
/// truncated result must never be stored as the full one.
async fn collect_pages<F, Fut>(
    job_id: &str,
    key: &str,
    max_pages: usize,
    mut fetch_page: F,
) -> Result<Value, ProviderError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: std::future::Future<Output = Result<Value, ProviderError>>,
{
    let mut combined: Option<Value> = None;
    let mut next_token: Option<String> = None;

    for _ in 0..max_pages {
        let page = fetch_page(next_token.take()).await?;

        let status = page.get("JobStatus").and_then(Value::as_str).unwrap_or("");
        if status != "SUCCEEDED" {
            return Err(ProviderError::JobNotReady {
                job_id: job_id.to_string(),
                status: status.to_string(),
                message: page
                    .get("StatusMessage")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            });
        }

        next_token = page
            .get("NextToken")
            .and_then(Value::as_str)
            .map(str::to_string);
        combined = Some(match combined {
            None => page,
            Some(acc) => append_page(acc, page, key)?,
        });

        if next_token.is_none() {
            break;
        }
    }

    if next_token.is_some() {
        return Err(ProviderError::InvalidResponse(format!(
            "Results for job {} span more than {} pages",
            job_id, max_pages
        )));
    }

    let mut combined = combined
        .ok_or_else(|| ProviderError::InvalidResponse(format!("Job {} returned no pages", job_id)))?;
    if let Some(obj) = combined.as_object_mut() {
        obj.remove("NextToken");
    }
    Ok(combined)
}

/// Host header value, including a non-default port.
fn host_header(endpoint: &url::Url) -> String {
    let host = endpoint.host_str().unwrap_or_default();
    match endpoint.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

/// Append the result items of `page` to `acc`.
fn append_page(mut acc: Value, page: Value, key: &str) -> Result<Value, ProviderError> {
    let items = match page.get(key) {
        Some(Value::Array(items)) => items.clone(),
        None => Vec::new(),
        Some(_) => {
            return Err(ProviderError::InvalidResponse(format!(
                "'{}' is not a list",
                key
            )))
        }
    };

    let obj = acc
        .as_object_mut()
        .ok_or_else(|| ProviderError::InvalidResponse("Response is not an object".to_string()))?;
    match obj.entry(key).or_insert_with(|| Value::Array(Vec::new())) {
        Value::Array(existing) => existing.extend(items),
        _ => {
            return Err(ProviderError::InvalidResponse(format!(
                "'{}' is not a list",
                key
            )))
        }
    }
    Ok(acc)
}

fn start_body(request: &StartAnalysisRequest) -> Value {
    let mut body = Map::new();
    body.insert("Video".into(), json!({ "S3Object": request.source }));
    body.insert("ClientRequestToken".into(), json!(request.client_token));
    body.insert(
        "NotificationChannel".into(),
        json!({
            "SNSTopicArn": request.notification_channel.sns_topic_arn,
            "RoleArn": request.notification_channel.role_arn,
        }),
    );
    if let Some(tag) = &request.job_tag {
        body.insert("JobTag".into(), json!(tag));
    }

    match &request.options {
        TypeOptions::Labels { min_confidence, .. } | TypeOptions::Moderation { min_confidence } => {
            body.insert("MinConfidence".into(), json!(min_confidence));
        }
        TypeOptions::Faces { attributes } => {
            body.insert("FaceAttributes".into(), json!(attributes));
        }
        TypeOptions::TextDetection { filters } => {
            body.insert("Filters".into(), text_filters(filters));
        }
    }

    Value::Object(body)
}

fn detect_body(request: &DetectImageRequest) -> Value {
    let mut body = Map::new();
    body.insert("Image".into(), json!({ "S3Object": request.source }));

    match &request.options {
        TypeOptions::Labels {
            min_confidence,
            max_labels,
        } => {
            body.insert("MinConfidence".into(), json!(min_confidence));
            if let Some(max) = max_labels {
                body.insert("MaxLabels".into(), json!(max));
            }
        }
        TypeOptions::Moderation { min_confidence } => {
            body.insert("MinConfidence".into(), json!(min_confidence));
        }
        TypeOptions::Faces { attributes } => {
            body.insert("Attributes".into(), json!([attributes]));
        }
        TypeOptions::TextDetection { filters } => {
            body.insert("Filters".into(), text_filters(filters));
        }
    }

    Value::Object(body)
}

fn get_body(job_id: &str, analysis_type: AnalysisType, next_token: Option<&str>) -> Value {
    let mut body = json!({
        "JobId": job_id,
        "MaxResults": PAGE_SIZE,
    });
    // Text detection results are always in timestamp order
    if analysis_type != AnalysisType::TextDetection {
        body["SortBy"] = json!("TIMESTAMP");
    }
    if let Some(token) = next_token {
        body["NextToken"] = json!(token);
    }
    body
}

fn text_filters(filters: &crate::services::provider::TextFilters) -> Value {
    let mut word = Map::new();
    if let Some(c) = filters.min_confidence {
        word.insert("MinConfidence".into(), json!(c));
    }
    if let Some(h) = filters.min_bounding_box_height {
        word.insert("MinBoundingBoxHeight".into(), json!(h));
    }
    if let Some(w) = filters.min_bounding_box_width {
        word.insert("MinBoundingBoxWidth".into(), json!(w));
    }
    json!({ "WordFilter": word })
}

/// Extract the AWS error type and message from an error response body.
fn parse_error_body(text: &str) -> (String, String) {
    let Ok(body) = serde_json::from_str::<Value>(text) else {
        return ("Unknown".to_string(), text.to_string());
    };

    let error_type = body
        .get("__type")
        .and_then(Value::as_str)
        .map(|t| t.rsplit('#').next().unwrap_or(t).to_string())
        .unwrap_or_else(|| "Unknown".to_string());
    let message = body
        .get("message")
        .or_else(|| body.get("Message"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    (error_type, message)
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC key");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Sign a POST request with AWS Signature V4, returning the headers to add.
fn sign_request(
    credentials: &AwsCredentials,
    region: &str,
    host: &str,
    path: &str,
    payload_hash: &str,
    now: DateTime<Utc>,
) -> Vec<(String, String)> {
    let timestamp = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();

    let mut headers = vec![
        ("host".to_string(), host.to_string()),
        ("x-amz-content-sha256".to_string(), payload_hash.to_string()),
        ("x-amz-date".to_string(), timestamp.clone()),
    ];
    if let Some(token) = &credentials.session_token {
        headers.push(("x-amz-security-token".to_string(), token.clone()));
    }

    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{}:{}\n", name, value.trim()))
        .collect();
    let signed_headers = headers
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical_request = format!(
        "POST\n{}\n\n{}\n{}\n{}",
        path, canonical_headers, signed_headers, payload_hash
    );

    let credential_scope = format!("{}/{}/{}/aws4_request", date, region, SERVICE);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        timestamp,
        credential_scope,
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let k_date = hmac_sha256(
        format!("AWS4{}", credentials.secret_access_key).as_bytes(),
        date.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, SERVICE.as_bytes());
    let k_signing = hmac_sha256(&k_service, b"aws4_request");
    let signature = hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes()));

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
        credentials.access_key_id, credential_scope, signed_headers, signature
    );

    // reqwest sets Host itself
    let mut out: Vec<(String, String)> = headers.into_iter().filter(|(n, _)| n != "host").collect();
    out.push(("authorization".to_string(), authorization));
    out
}
