//! HTTP(S) reachability probe.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::debug;

/// Settings shared by every reachability request.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Per-request timeout, connect included.
    pub timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
        }
    }
}

/// Issues GET requests with or without certificate verification.
///
/// Two clients are built up front so the TLS setting is a per-request
/// choice without rebuilding connection pools.
#[derive(Debug, Clone)]
pub struct HttpsProber {
    verified: Client,
    insecure: Client,
}

impl HttpsProber {
    /// Build the prober.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn new(config: &ProbeConfig) -> Result<Self, reqwest::Error> {
        let verified = Client::builder().timeout(config.timeout).build()?;
        let insecure = Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(true)
            .build()?;
        Ok(Self { verified, insecure })
    }

    /// GET `url` and return the response status. The body is discarded.
    pub async fn get_status(&self, url: &str, skip_tls_verify: bool) -> Result<StatusCode, reqwest::Error> {
        let client = if skip_tls_verify {
            &self.insecure
        } else {
            &self.verified
        };
        let response = client.get(url).send().await?;
        let status = response.status();
        debug!(url, %status, skip_tls_verify, "Probe response");
        Ok(status)
    }
}
