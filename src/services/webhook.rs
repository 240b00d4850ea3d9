//! Authentication of inbound SNS notifications.
//!
//! Every notification passes through [`WebhookAuthenticator::authenticate`]
//! before any of its fields reach business logic. Rejections carry a reason
//! for logging only; the HTTP layer answers all of them with the same
//! not-found response.

use std::sync::Arc;

use base64::Engine;
use chrono::{DateTime, Utc};
use ring::signature::{self, RsaParameters, RsaPublicKeyComponents};
use x509_parser::pem::parse_x509_pem;
use x509_parser::prelude::*;

use crate::config::WebhookConfig;
use crate::models::notification::{AuthenticatedNotification, SnsEnvelope};
use crate::services::certificates::CertificateSource;

const NOTIFICATION: &str = "Notification";
const SUBSCRIPTION_CONFIRMATION: &str = "SubscriptionConfirmation";
const UNSUBSCRIBE_CONFIRMATION: &str = "UnsubscribeConfirmation";

pub struct WebhookAuthenticator {
    config: WebhookConfig,
    certificates: Arc<dyn CertificateSource>,
}

impl WebhookAuthenticator {
    pub fn new(config: WebhookConfig, certificates: Arc<dyn CertificateSource>) -> Self {
        Self {
            config,
            certificates,
        }
    }

    pub async fn authenticate(&self, raw: &[u8]) -> Result<AuthenticatedNotification, AuthError> {
        self.authenticate_at(raw, Utc::now()).await
    }

    /// Authenticate `raw` as if received at `now`.
    pub async fn authenticate_at(
        &self,
        raw: &[u8],
        now: DateTime<Utc>,
    ) -> Result<AuthenticatedNotification, AuthError> {
        let envelope: SnsEnvelope =
            serde_json::from_slice(raw).map_err(|e| AuthError::Malformed(e.to_string()))?;

        let algorithm = signature_algorithm(&envelope.signature_version)?;
        let cert_url = self.check_sns_url(&envelope.signing_cert_url, true)?;

        if let Some(expected) = &self.config.expected_topic_arn {
            if &envelope.topic_arn != expected {
                return Err(AuthError::TopicMismatch(envelope.topic_arn));
            }
        }

        self.check_timestamp(&envelope.timestamp, now)?;

        let string_to_sign = string_to_sign(&envelope)?;
        let signature = base64::engine::general_purpose::STANDARD
            .decode(envelope.signature.trim())
            .map_err(|_| AuthError::Malformed("signature is not base64".to_string()))?;

        let pem = self
            .certificates
            .fetch(&cert_url)
            .await
            .map_err(|e| AuthError::CertificateFetch(e.to_string()))?;
        let key = self.signer_key(&pem, now)?;

        key.verify(algorithm, string_to_sign.as_bytes(), &signature)
            .map_err(|_| AuthError::SignatureMismatch)?;

        // Signature checked: the envelope can now be trusted
        match envelope.kind.as_str() {
            NOTIFICATION => Ok(AuthenticatedNotification::Notification {
                message_id: envelope.message_id,
                topic_arn: envelope.topic_arn,
                message: envelope.message,
            }),
            SUBSCRIPTION_CONFIRMATION => {
                let subscribe_url = envelope.subscribe_url.unwrap_or_default();
                self.check_sns_url(&subscribe_url, false)?;
                Ok(AuthenticatedNotification::SubscriptionConfirmation {
                    topic_arn: envelope.topic_arn,
                    subscribe_url,
                })
            }
            _ => Ok(AuthenticatedNotification::UnsubscribeConfirmation {
                topic_arn: envelope.topic_arn,
            }),
        }
    }

    /// Only `https://sns.<region><suffix>/...` URLs are trusted.
    fn check_sns_url(&self, raw: &str, certificate: bool) -> Result<url::Url, AuthError> {
        let untrusted = || AuthError::UntrustedUrl(raw.to_string());
        let url = url::Url::parse(raw).map_err(|_| untrusted())?;

        if url.scheme() != "https"
            || url.port().is_some()
            || !url.username().is_empty()
            || url.password().is_some()
        {
            return Err(untrusted());
        }

        let host = url.host_str().ok_or_else(untrusted)?;
        let region = host
            .strip_prefix("sns.")
            .and_then(|rest| rest.strip_suffix(self.config.cert_host_suffix.as_str()))
            .ok_or_else(untrusted)?;
        if region.is_empty()
            || !region
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(untrusted());
        }

        if certificate
            && (!url.path().ends_with(".pem") || url.query().is_some() || url.fragment().is_some())
        {
            return Err(untrusted());
        }
        Ok(url)
    }

    fn check_timestamp(&self, raw: &str, now: DateTime<Utc>) -> Result<(), AuthError> {
        let sent = DateTime::parse_from_rfc3339(raw)
            .map_err(|_| AuthError::Malformed(format!("timestamp '{}'", raw)))?
            .with_timezone(&Utc);

        let age = now.signed_duration_since(sent);
        let max_age = chrono::Duration::from_std(self.config.max_age)
            .map_err(|_| AuthError::Malformed("max age out of range".to_string()))?;
        let skew = chrono::Duration::from_std(self.config.max_clock_skew)
            .map_err(|_| AuthError::Malformed("clock skew out of range".to_string()))?;

        if age > max_age {
            return Err(AuthError::Expired(sent));
        }
        if -age > skew {
            return Err(AuthError::FromFuture(sent));
        }
        Ok(())
    }

    /// Parse the signing certificate and return its RSA public key.
    fn signer_key(
        &self,
        pem: &[u8],
        now: DateTime<Utc>,
    ) -> Result<RsaPublicKeyComponents<Vec<u8>>, AuthError> {
        let invalid = |reason: &str| AuthError::InvalidCertificate(reason.to_string());

        let (_, pem) = parse_x509_pem(pem).map_err(|_| invalid("not PEM"))?;
        let cert = pem.parse_x509().map_err(|_| invalid("not an X.509 certificate"))?;

        let at = ASN1Time::from_timestamp(now.timestamp()).map_err(|_| invalid("bad clock"))?;
        if !cert.validity().is_valid_at(at) {
            return Err(invalid("outside validity period"));
        }

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok());
        if common_name != Some(self.config.signer_common_name.as_str()) {
            return Err(invalid("unexpected subject"));
        }

        match cert.public_key().parsed() {
            Ok(x509_parser::public_key::PublicKey::RSA(rsa)) => Ok(RsaPublicKeyComponents {
                n: strip_leading_zeros(rsa.modulus).to_vec(),
                e: strip_leading_zeros(rsa.exponent).to_vec(),
            }),
            _ => Err(invalid("not an RSA key")),
        }
    }
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

fn signature_algorithm(version: &str) -> Result<&'static RsaParameters, AuthError> {
    match version {
        "1" => Ok(&signature::RSA_PKCS1_2048_8192_SHA1_FOR_LEGACY_USE_ONLY),
        "2" => Ok(&signature::RSA_PKCS1_2048_8192_SHA256),
        other => Err(AuthError::UnsupportedSignatureVersion(other.to_string())),
    }
}

/// Rebuild the exact byte sequence SNS signed for this envelope.
pub fn string_to_sign(envelope: &SnsEnvelope) -> Result<String, AuthError> {
    let mut fields: Vec<(&str, &str)> = vec![
        ("Message", envelope.message.as_str()),
        ("MessageId", envelope.message_id.as_str()),
    ];

    match envelope.kind.as_str() {
        NOTIFICATION => {
            if let Some(subject) = &envelope.subject {
                fields.push(("Subject", subject.as_str()));
            }
            fields.push(("Timestamp", envelope.timestamp.as_str()));
            fields.push(("TopicArn", envelope.topic_arn.as_str()));
        }
        SUBSCRIPTION_CONFIRMATION | UNSUBSCRIBE_CONFIRMATION => {
            let missing = |field: &str| AuthError::Malformed(format!("missing {}", field));
            let subscribe_url = envelope
                .subscribe_url
                .as_deref()
                .ok_or_else(|| missing("SubscribeURL"))?;
            let token = envelope.token.as_deref().ok_or_else(|| missing("Token"))?;
            fields.push(("SubscribeURL", subscribe_url));
            fields.push(("Timestamp", envelope.timestamp.as_str()));
            fields.push(("Token", token));
            fields.push(("TopicArn", envelope.topic_arn.as_str()));
        }
        other => return Err(AuthError::Malformed(format!("message type '{}'", other))),
    }
    fields.push(("Type", envelope.kind.as_str()));

    Ok(fields
        .into_iter()
        .map(|(key, value)| format!("{}\n{}\n", key, value))
        .collect())
}

/// Why a notification was rejected. Never shown to the sender.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Malformed notification: {0}")]
    Malformed(String),

    #[error("Unsupported signature version '{0}'")]
    UnsupportedSignatureVersion(String),

    #[error("Untrusted URL: {0}")]
    UntrustedUrl(String),

    #[error("Notification from unexpected topic {0}")]
    TopicMismatch(String),

    #[error("Notification sent at {0} is too old")]
    Expired(DateTime<Utc>),

    #[error("Notification timestamp {0} is in the future")]
    FromFuture(DateTime<Utc>),

    #[error("Could not fetch signing certificate: {0}")]
    CertificateFetch(String),

    #[error("Invalid signing certificate: {0}")]
    InvalidCertificate(String),

    #[error("Signature does not match")]
    SignatureMismatch,
}
