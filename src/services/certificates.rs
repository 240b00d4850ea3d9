use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::RwLock;

/// Source of PEM-encoded SNS signing certificates.
#[async_trait]
pub trait CertificateSource: Send + Sync {
    async fn fetch(&self, url: &url::Url) -> Result<Arc<Vec<u8>>, CertificateError>;
}

/// Downloads signing certificates over HTTPS and caches them per URL.
///
/// The certificate URL has already been checked against the SNS host
/// pattern, and TLS verification ties the download to that host.
pub struct HttpCertificateSource {
    http: Client,
    cache: RwLock<HashMap<String, Arc<Vec<u8>>>>,
}

/// Certificates are a few KB; cap the download well above that.
const MAX_CERT_BYTES: usize = 64 * 1024;

/// SNS rotates through a handful of signing certificates per region.
const MAX_CACHED_CERTS: usize = 32;

impl HttpCertificateSource {
    pub fn new(timeout: Duration) -> Result<Self, CertificateError> {
        let http = Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            http,
            cache: RwLock::new(HashMap::new()),
        })
    }

    async fn remember(&self, url: &url::Url, cert: Arc<Vec<u8>>) {
        let mut cache = self.cache.write().await;
        if cache.len() >= MAX_CACHED_CERTS && !cache.contains_key(url.as_str()) {
            cache.clear();
        }
        cache.insert(url.to_string(), cert);
    }
}

#[async_trait]
impl CertificateSource for HttpCertificateSource {
    async fn fetch(&self, url: &url::Url) -> Result<Arc<Vec<u8>>, CertificateError> {
        if let Some(cert) = self.cache.read().await.get(url.as_str()) {
            return Ok(cert.clone());
        }

        tracing::debug!(url = %url, "Fetching SNS signing certificate");

        let response = self.http.get(url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(CertificateError::Status(response.status().as_u16()));
        }
        let bytes = response.bytes().await?;
        if bytes.len() > MAX_CERT_BYTES {
            return Err(CertificateError::TooLarge(bytes.len()));
        }

        let cert = Arc::new(bytes.to_vec());
        self.remember(url, cert.clone()).await;
        Ok(cert)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CertificateError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Certificate download returned status {0}")]
    Status(u16),

    #[error("Certificate response too large ({0} bytes)")]
    TooLarge(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cache_stays_bounded() {
        let source = HttpCertificateSource::new(Duration::from_secs(1)).unwrap();
        let cert = Arc::new(b"pem".to_vec());

        for n in 0..(MAX_CACHED_CERTS * 3) {
            let url = url::Url::parse(&format!(
                "https://sns.us-east-1.amazonaws.com/SimpleNotificationService-{n}.pem"
            ))
            .unwrap();
            source.remember(&url, cert.clone()).await;
            assert!(source.cache.read().await.len() <= MAX_CACHED_CERTS);
        }

        let last = url::Url::parse(&format!(
            "https://sns.us-east-1.amazonaws.com/SimpleNotificationService-{}.pem",
            MAX_CACHED_CERTS * 3 - 1
        ))
        .unwrap();
        assert!(source.cache.read().await.contains_key(last.as_str()));
    }
}
