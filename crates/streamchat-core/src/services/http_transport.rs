use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tracing::{debug, info};

use super::transport::{
    CancelHandle, ChunkStream, CompletionRequest, CompletionTransport, TransportError,
    with_cancellation,
};

pub const DEFAULT_ENDPOINT: &str = "https://ds.leyen.me/stream";

/// Streams completions from an HTTP endpoint that answers a JSON POST with a
/// chunked plain-text body
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    idle_timeout: Option<Duration>,
}

impl HttpTransport {
    pub fn new(
        endpoint: impl Into<String>,
        idle_timeout: Option<Duration>,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            idle_timeout,
        })
    }

    /// Use a preconfigured client (proxies, TLS roots, default headers)
    pub fn with_client(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        idle_timeout: Option<Duration>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            idle_timeout,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl CompletionTransport for HttpTransport {
    fn open_stream(&self, request: CompletionRequest, cancel: CancelHandle) -> ChunkStream {
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        let idle_timeout = self.idle_timeout;

        let raw = async_stream::stream! {
            info!(
                endpoint = %endpoint,
                messages = request.messages.len(),
                "Opening completion stream"
            );

            let response = client
                .post(&endpoint)
                .header(CONTENT_TYPE, "application/json")
                .header(ACCEPT, "text/event-stream")
                .json(&request)
                .send()
                .await;

            let response = match response {
                Ok(response) => response,
                Err(e) => {
                    yield Err(TransportError::Request(e));
                    return;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                yield Err(TransportError::Status { status: status.as_u16(), body });
                return;
            }

            let mut body = response.bytes_stream();
            loop {
                let next = match idle_timeout {
                    Some(limit) => match tokio::time::timeout(limit, body.next()).await {
                        Ok(next) => next,
                        Err(_) => {
                            yield Err(TransportError::IdleTimeout(limit));
                            return;
                        }
                    },
                    None => body.next().await,
                };

                match next {
                    Some(Ok(bytes)) => {
                        if bytes.is_empty() {
                            continue;
                        }
                        debug!(len = bytes.len(), "Received chunk");
                        yield Ok(bytes.to_vec());
                    }
                    Some(Err(e)) => {
                        yield Err(TransportError::Network(e.to_string()));
                        return;
                    }
                    None => {
                        debug!("Response body complete");
                        return;
                    }
                }
            }
        };

        with_cancellation(Box::pin(raw), cancel)
    }
}
