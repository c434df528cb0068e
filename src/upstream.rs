use bytes::Bytes;
use futures_util::stream::{BoxStream, StreamExt};
use std::time::Duration;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;

use crate::constants::{
    MAX_UPSTREAM_LINE_BYTES, MODEL_CHECK_ERROR_BODY_BYTES, MODEL_CHECK_MAX_TOKENS,
    MODEL_CHECK_PROMPT, MODEL_CHECK_TIMEOUT_SECS,
};
use crate::specs::openai::{ChatCompletionRequest, ChatMessage};
use crate::types::{FinanceError, ModelReference, Result};

/// Raw upstream body bytes.
pub type ByteSource = BoxStream<'static, std::io::Result<Bytes>>;

/// Line-framed upstream body consumed by the relay.
pub type UpstreamLines = FramedRead<StreamReader<ByteSource, Bytes>, LinesCodec>;

/// Frames a byte stream into newline-delimited lines. Trailing `\r` is
/// stripped by the codec.
pub fn frame_lines(body: ByteSource) -> UpstreamLines {
    FramedRead::new(
        StreamReader::new(body),
        LinesCodec::new_with_max_length(MAX_UPSTREAM_LINE_BYTES),
    )
}

/// Shared client for OpenAI-compatible streaming endpoints.
#[derive(Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
}

impl UpstreamClient {
    /// `total_timeout` bounds the whole exchange, body included.
    pub fn new(total_timeout: Duration, connect_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(total_timeout)
            .connect_timeout(connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .build()?;
        Ok(Self { client })
    }

    /// Sends one streaming completion request. Fails before any streaming
    /// begins on transport errors or a non-success status.
    pub async fn open_stream(
        &self,
        model: &ModelReference,
        request: &ChatCompletionRequest,
    ) -> Result<UpstreamLines> {
        let url = model.completions_url();
        tracing::info!(
            model_id = model.id,
            model = %model.name,
            url = %url,
            messages = request.messages.len(),
            "Opening upstream stream"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(model.api_key.expose())
            .json(request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(model_id = model.id, error = %e, "Upstream request failed");
                FinanceError::Network(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = match response.text().await {
                Ok(text) => text,
                Err(e) => format!("(failed to read error body: {})", e),
            };
            tracing::error!(
                model_id = model.id,
                status = status.as_u16(),
                body = %body,
                "Upstream returned error status"
            );
            return Err(FinanceError::Upstream(status, body).into());
        }

        tracing::debug!(model_id = model.id, status = status.as_u16(), "Upstream stream opened");
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other))
            .boxed();
        Ok(frame_lines(body))
    }

    /// Sends a tiny non-streaming completion to confirm the model answers.
    /// Any non-success status becomes `Unavailable` with a bounded body.
    pub async fn check_model(&self, model: &ModelReference) -> Result<()> {
        let request = ChatCompletionRequest::single_shot(
            model.name.clone(),
            vec![ChatMessage::user(MODEL_CHECK_PROMPT)],
        )
        .with_max_tokens(MODEL_CHECK_MAX_TOKENS);

        let response = self
            .client
            .post(model.completions_url())
            .bearer_auth(model.api_key.expose())
            .timeout(Duration::from_secs(MODEL_CHECK_TIMEOUT_SECS))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(model_id = model.id, error = %e, "Model check could not connect");
                FinanceError::Network(e)
            })?;

        let status = response.status();
        if status.is_success() {
            tracing::info!(model_id = model.id, "Model check passed");
            return Ok(());
        }

        let body = match response.text().await {
            Ok(text) => truncate_body(text, MODEL_CHECK_ERROR_BODY_BYTES),
            Err(_) => String::new(),
        };
        let detail = if body.trim().is_empty() {
            status.to_string()
        } else {
            format!("{} {}", status.as_u16(), body)
        };
        tracing::warn!(model_id = model.id, status = status.as_u16(), "Model check failed");
        Err(FinanceError::Unavailable(detail).into())
    }
}

fn truncate_body(mut body: String, max: usize) -> String {
    if body.len() > max {
        let mut end = max;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}
