/// Notifier that posts mails to an HTTP relay
///
/// The relay receives `{"to", "subject", "html"}` as JSON and answers 2xx on
/// acceptance. An optional API key goes out as a bearer token.

use super::{Notifier, NotifyError};
use async_trait::async_trait;
use reqwest::Url;
use serde::Serialize;
use std::time::Duration;

/// Default request timeout for the relay
pub const DEFAULT_RELAY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct RelayRequest<'a> {
    to: &'a str,
    subject: &'a str,
    html: &'a str,
}

/// Mail relay client
#[derive(Clone)]
pub struct HttpRelayNotifier {
    endpoint: Url,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpRelayNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRelayNotifier")
            .field("endpoint", &self.endpoint.as_str())
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl HttpRelayNotifier {
    pub fn new(endpoint: &str, api_key: Option<String>) -> Result<Self, NotifyError> {
        Self::with_timeout(endpoint, api_key, DEFAULT_RELAY_TIMEOUT)
    }

    pub fn with_timeout(
        endpoint: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, NotifyError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| NotifyError::Config(format!("invalid relay URL: {}", e)))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(NotifyError::Config(format!(
                "relay URL must be http or https, got {}",
                endpoint.scheme()
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            endpoint,
            api_key: api_key.filter(|key| !key.is_empty()),
            client,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl Notifier for HttpRelayNotifier {
    fn name(&self) -> &'static str {
        "http_relay"
    }

    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), NotifyError> {
        let mut request = self.client.post(self.endpoint.clone()).json(&RelayRequest {
            to,
            subject,
            html: html_body,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(NotifyError::Rejected { status, body });
        }

        Ok(())
    }
}
