//! HTTP transport for the docchat backend.
//!
//! Implements the [`Backend`] seam with `reqwest`: JSON and multipart
//! payloads, an optional per-call timeout, and normalization of every
//! transport-level problem (unreachable host, timeout, non-2xx status,
//! undecodable body) into the failure shape of the result envelope. Callers
//! never see a transport error as anything but a failed call.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use docchat_core::protocol::{Backend, Payload, RequestMessage};
use reqwest::multipart;
use tracing::{debug, instrument};

pub struct HttpBackend {
    base_url: String,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn try_send(
        &self,
        payload: Payload,
        endpoint: &str,
        timeout: Option<Duration>,
    ) -> Result<RequestMessage> {
        let mut request = self.client.post(self.url_for(endpoint));
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        request = match payload {
            // The embedding route takes no body but is still posted as a
            // form, matching what the backend expects.
            Payload::Empty => request.multipart(multipart::Form::new()),
            Payload::Json(value) => request.json(&value),
            Payload::File {
                field,
                file_name,
                bytes,
            } => {
                let part = multipart::Part::bytes(bytes).file_name(file_name);
                request.multipart(multipart::Form::new().part(field, part))
            }
        };

        let response = request
            .send()
            .await
            .with_context(|| format!("failed to reach {endpoint}"))?
            .error_for_status()
            .with_context(|| format!("{endpoint} answered with an error status"))?;
        response
            .json::<RequestMessage>()
            .await
            .with_context(|| format!("{endpoint} answered with a malformed envelope"))
    }

    /// Downloads the uploaded document from the backend-served static path
    /// derived from `tmp_file_path`. A plain `Result`, not an envelope: no
    /// session state hangs off this call.
    #[instrument(skip(self))]
    pub async fn fetch_document(&self, tmp_file_path: &str) -> Result<Bytes> {
        let url = self.url_for(tmp_file_path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("failed to fetch document from {url}"))?
            .error_for_status()
            .with_context(|| format!("document fetch from {url} was refused"))?;
        response
            .bytes()
            .await
            .context("failed to read document body")
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn send(
        &self,
        payload: Payload,
        endpoint: &str,
        timeout: Option<Duration>,
    ) -> RequestMessage {
        match self.try_send(payload, endpoint, timeout).await {
            Ok(envelope) => envelope,
            Err(err) => {
                debug!(endpoint, error = %format!("{err:#}"), "transport failure");
                RequestMessage::transport_failure(format!("{err:#}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docchat_core::protocol::endpoints;

    #[test]
    fn url_join_tolerates_stray_slashes() {
        let backend = HttpBackend::new("http://localhost:8000/");
        assert_eq!(
            backend.url_for(endpoints::UPLOAD),
            "http://localhost:8000/api/upload"
        );
        assert_eq!(
            backend.url_for("/files/Temp/report.pdf"),
            "http://localhost:8000/files/Temp/report.pdf"
        );
    }

    #[tokio::test]
    async fn unreachable_host_resolves_to_a_failure_envelope() {
        // Reserved TEST-NET address: nothing listens there.
        let backend = HttpBackend::new("http://192.0.2.1:9");
        let envelope = backend
            .send(
                Payload::Empty,
                endpoints::EMBEDDING,
                Some(Duration::from_millis(200)),
            )
            .await;
        assert!(!envelope.state);
        assert_eq!(envelope.message, "request failed");
        assert!(envelope.str_arg("error").is_some());
    }
}
