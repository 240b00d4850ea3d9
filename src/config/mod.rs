use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Prometheus scrape address of the worker process
    #[serde(default = "default_worker_metrics_addr")]
    pub worker_metrics_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for the completion queue
    pub redis_url: String,

    /// AWS region Rekognition runs in (e.g., "us-east-1")
    pub aws_region: String,

    pub aws_access_key_id: String,

    pub aws_secret_access_key: String,

    /// Session token for temporary credentials
    #[serde(default)]
    pub aws_session_token: Option<String>,

    /// Overrides the regional Rekognition endpoint (VPC endpoint, local emulator)
    #[serde(default)]
    pub rekognition_endpoint: Option<String>,

    /// Disk used when a submission does not name one
    #[serde(default = "default_disk")]
    pub rekognition_disk: String,

    /// Disk to bucket mapping, e.g. "s3=media-prod,archive=media-archive"
    #[serde(default)]
    pub rekognition_buckets: String,

    /// IAM role Rekognition assumes to publish to the SNS topic
    #[serde(default)]
    pub rekognition_iam_arn: Option<String>,

    /// SNS topic job completions are published to
    #[serde(default)]
    pub rekognition_sns_topic_arn: Option<String>,

    /// Default minimum confidence (0-100) for label, moderation and text analysis
    #[serde(default = "default_min_confidence")]
    pub rekognition_min_confidence: f64,

    /// Timeout for a single provider HTTP call
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,

    /// Notifications older than this are rejected
    #[serde(default = "default_webhook_max_age_secs")]
    pub webhook_max_age_secs: u64,

    /// Signing certificates must be served from a host ending with this suffix
    #[serde(default = "default_cert_host_suffix")]
    pub webhook_cert_host_suffix: String,

    /// Only accept notifications from the configured SNS topic
    #[serde(default = "default_true")]
    pub webhook_pin_topic: bool,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_worker_metrics_addr() -> String {
    "0.0.0.0:9100".to_string()
}

fn default_disk() -> String {
    "s3".to_string()
}

fn default_min_confidence() -> f64 {
    50.0
}

fn default_provider_timeout_secs() -> u64 {
    30
}

fn default_webhook_max_age_secs() -> u64 {
    3600
}

fn default_cert_host_suffix() -> String {
    ".amazonaws.com".to_string()
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Submission settings handed to the analysis submitter.
    pub fn recognition(&self) -> RecognitionConfig {
        RecognitionConfig {
            disk: self.rekognition_disk.clone(),
            buckets: parse_buckets(&self.rekognition_buckets),
            iam_arn: self.rekognition_iam_arn.clone().filter(|s| !s.is_empty()),
            sns_topic_arn: self.rekognition_sns_topic_arn.clone().filter(|s| !s.is_empty()),
            min_confidence: self.rekognition_min_confidence,
        }
    }

    /// Trust settings handed to the webhook authenticator.
    pub fn webhook(&self) -> WebhookConfig {
        let topic = if self.webhook_pin_topic {
            self.rekognition_sns_topic_arn.clone().filter(|s| !s.is_empty())
        } else {
            None
        };
        WebhookConfig {
            expected_topic_arn: topic,
            cert_host_suffix: self.webhook_cert_host_suffix.clone(),
            max_age: Duration::from_secs(self.webhook_max_age_secs),
            ..WebhookConfig::default()
        }
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }
}

/// Parse "disk=bucket" pairs separated by commas. Malformed pairs are skipped.
pub fn parse_buckets(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| {
            let (disk, bucket) = pair.split_once('=')?;
            let (disk, bucket) = (disk.trim(), bucket.trim());
            if disk.is_empty() || bucket.is_empty() {
                return None;
            }
            Some((disk.to_string(), bucket.to_string()))
        })
        .collect()
}

/// Everything the submitter needs to address the provider.
#[derive(Debug, Clone)]
pub struct RecognitionConfig {
    pub disk: String,
    pub buckets: HashMap<String, String>,
    pub iam_arn: Option<String>,
    pub sns_topic_arn: Option<String>,
    pub min_confidence: f64,
}

impl RecognitionConfig {
    /// Bucket backing `disk`, or the default disk when none is given.
    pub fn bucket_for(&self, disk: Option<&str>) -> Result<&str, ConfigurationError> {
        let disk = disk.unwrap_or(&self.disk);
        self.buckets
            .get(disk)
            .map(String::as_str)
            .ok_or_else(|| ConfigurationError::MissingBucket(disk.to_string()))
    }

    /// SNS topic and role Rekognition uses to report job completion.
    pub fn notification_channel(&self) -> Result<NotificationChannel, ConfigurationError> {
        let sns_topic_arn = self
            .sns_topic_arn
            .clone()
            .ok_or(ConfigurationError::MissingTopicArn)?;
        let role_arn = self.iam_arn.clone().ok_or(ConfigurationError::MissingRoleArn)?;
        Ok(NotificationChannel {
            sns_topic_arn,
            role_arn,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationChannel {
    pub sns_topic_arn: String,
    pub role_arn: String,
}

/// Trust parameters for inbound SNS notifications.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub expected_topic_arn: Option<String>,
    pub cert_host_suffix: String,
    /// Subject common name the signing certificate must carry.
    pub signer_common_name: String,
    pub max_age: Duration,
    pub max_clock_skew: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            expected_topic_arn: None,
            cert_host_suffix: default_cert_host_suffix(),
            signer_common_name: "sns.amazonaws.com".to_string(),
            max_age: Duration::from_secs(default_webhook_max_age_secs()),
            max_clock_skew: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("No bucket configured for disk '{0}'")]
    MissingBucket(String),

    #[error("No SNS topic ARN configured for Rekognition notifications")]
    MissingTopicArn,

    #[error("No IAM role ARN configured for Rekognition notifications")]
    MissingRoleArn,
}
