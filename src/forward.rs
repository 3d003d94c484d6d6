use crate::config::AzureConfig;
use crate::error::{RelayError, Result};
use crate::logging::{LogLevel, SharedLogger};
use crate::payload::{filter_params, is_streaming, normalize_user, Payload};

use futures::stream::Stream;
use futures::StreamExt;
use serde_json::Value;
use std::pin::Pin;
use std::time::Duration;
use uuid::Uuid;

/// Raw upstream response lines, produced as they arrive. Dropping the stream
/// closes the upstream connection.
pub type LineStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Outcome of a successful forwarding call.
pub enum Forwarded {
    /// Buffered mode: the parsed upstream body.
    Completion(Value),
    /// Streaming mode: the upstream body, line by line.
    Lines(LineStream),
}

impl std::fmt::Debug for Forwarded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completion(value) => f.debug_tuple("Completion").field(value).finish(),
            Self::Lines(_) => f.write_str("Lines(..)"),
        }
    }
}

/// Build the shared HTTP client. Only connection setup is bounded here; the
/// per-call bound comes from [`AzureConfig::timeout_secs`].
pub fn build_client(connect_timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .build()
        .map_err(|e| RelayError::config(format!("Failed to build HTTP client: {e}")))
}

#[must_use]
pub fn chat_completions_url(config: &AzureConfig, deployment_id: &str) -> String {
    format!(
        "{}/openai/deployments/{}/chat/completions?api-version={}",
        config.endpoint.trim_end_matches('/'),
        deployment_id,
        config.api_version
    )
}

/// Sends one chat-completion call per [`Forwarder::forward`]. Holds no state
/// besides the HTTP client and the event log, so calls may run concurrently.
#[derive(Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    logger: SharedLogger,
}

impl Forwarder {
    #[must_use]
    pub fn new(client: reqwest::Client, logger: SharedLogger) -> Self {
        Self { client, logger }
    }

    /// Forward `payload` to `deployment_id`.
    ///
    /// The payload's `user` is normalized and its keys are projected onto the
    /// allow-list before sending. Every failure, including non-2xx statuses,
    /// comes back as a [`RelayError`].
    pub async fn forward(
        &self,
        deployment_id: &str,
        config: &AzureConfig,
        mut payload: Payload,
    ) -> Result<Forwarded> {
        let request_id = Uuid::new_v4().to_string();
        let url = chat_completions_url(config, deployment_id);

        normalize_user(&mut payload);
        let filtered = filter_params(payload);
        if !filtered.dropped.is_empty() {
            self.logger.log_with_context(
                LogLevel::Warn,
                "forward",
                format!("Dropped params: {}", filtered.dropped.join(", ")),
                serde_json::json!({ "request_id": request_id, "dropped": filtered.dropped }),
            );
        }

        let streaming = is_streaming(&filtered.body);
        self.logger.info(
            "forward",
            format!(
                "POST deployment={} streaming={} request_id={}",
                deployment_id, streaming, request_id
            ),
        );

        let request = self
            .client
            .post(&url)
            .header("api-key", &config.api_key)
            .header("Content-Type", "application/json")
            .json(&filtered.body);
        let timeout = Duration::from_secs(config.timeout_secs);

        let result = if streaming {
            self.send_streaming(request, timeout, &request_id).await
        } else {
            self.send_buffered(request, timeout).await
        };

        if let Err(ref e) = result {
            self.logger.log_with_context(
                LogLevel::Error,
                "forward",
                e.pipe_message(),
                serde_json::json!({
                    "request_id": request_id,
                    "kind": e.kind(),
                    "status": e.upstream_status(),
                }),
            );
        }

        result
    }

    async fn send_buffered(
        &self,
        request: reqwest::RequestBuilder,
        timeout: Duration,
    ) -> Result<Forwarded> {
        // reqwest's per-request timeout runs until the body is fully read.
        let response = request
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| map_reqwest_error(&e, timeout))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| map_reqwest_error(&e, timeout))?;

        self.logger.debug(
            "forward",
            format!("Response status={} body_len={}", status.as_u16(), body.len()),
        );

        if !status.is_success() {
            return Err(RelayError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        match serde_json::from_str(&body) {
            Ok(value) => Ok(Forwarded::Completion(value)),
            Err(e) => Err(RelayError::Decode {
                message: e.to_string(),
                body,
            }),
        }
    }

    async fn send_streaming(
        &self,
        request: reqwest::RequestBuilder,
        timeout: Duration,
        request_id: &str,
    ) -> Result<Forwarded> {
        // Only connection and response headers are bounded; the body may take
        // as long as the model keeps generating.
        let response = tokio::time::timeout(timeout, request.send())
            .await
            .map_err(|_| RelayError::Timeout {
                secs: timeout.as_secs(),
            })?
            .map_err(|e| map_reqwest_error(&e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = tokio::time::timeout(timeout, response.text())
                .await
                .ok()
                .and_then(std::result::Result::ok)
                .unwrap_or_default();
            return Err(RelayError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let lines = line_stream(response, self.logger.clone(), request_id.to_string());
        Ok(Forwarded::Lines(Box::pin(lines)))
    }
}

fn map_reqwest_error(e: &reqwest::Error, timeout: Duration) -> RelayError {
    if e.is_timeout() {
        RelayError::Timeout {
            secs: timeout.as_secs(),
        }
    } else {
        RelayError::transport(e.to_string())
    }
}

/// Split the upstream body into lines without interpreting them.
fn line_stream(
    response: reqwest::Response,
    logger: SharedLogger,
    request_id: String,
) -> impl Stream<Item = Result<String>> + Send + 'static {
    async_stream::stream! {
        let byte_stream = response.bytes_stream();
        tokio::pin!(byte_stream);

        let mut splitter = LineSplitter::default();
        let mut lines = 0usize;
        let mut failed = false;

        while let Some(chunk_result) = byte_stream.next().await {
            let chunk = match chunk_result {
                Ok(c) => c,
                Err(e) => {
                    logger.error("stream", format!("Byte stream error request_id={}: {}", request_id, e));
                    yield Err(RelayError::transport(format!("Stream interrupted: {e}")));
                    failed = true;
                    break;
                }
            };

            for line in splitter.feed(&chunk) {
                lines += 1;
                yield Ok(line);
            }
        }

        if !failed {
            if let Some(tail) = splitter.finish() {
                lines += 1;
                yield Ok(tail);
            }
            logger.debug("stream", format!("Stream completed request_id={} lines={}", request_id, lines));
        }
    }
}

/// Accumulates bytes across chunk boundaries and hands out complete lines.
/// Bytes already searched for a newline are not searched again.
#[derive(Debug, Default)]
struct LineSplitter {
    pending: Vec<u8>,
    scanned: usize,
}

impl LineSplitter {
    fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        let mut start = 0;
        let mut from = self.scanned;
        while let Some(offset) = self.pending[from..].iter().position(|b| *b == b'\n') {
            let end = from + offset + 1;
            lines.push(decode_line(&self.pending[start..end]));
            start = end;
            from = end;
        }

        self.pending.drain(..start);
        self.scanned = self.pending.len();
        lines
    }

    /// Trailing bytes with no terminating newline, if any.
    fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        self.scanned = 0;
        let tail = std::mem::take(&mut self.pending);
        Some(decode_line(&tail))
    }
}

fn decode_line(raw: &[u8]) -> String {
    let line = raw.strip_suffix(b"\n").unwrap_or(raw);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}
