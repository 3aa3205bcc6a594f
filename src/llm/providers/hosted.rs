use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::ApiConfig;
use crate::errors::{StudioError, StudioResult};
use crate::llm::provider::{ChunkSink, GenerativeProvider};
use crate::llm::sse_parser::{self, StreamAccumulator};
use crate::llm::types::{
    GenerateContentRequest, GenerateContentResponse, ImageGenerationRequest,
    ImageGenerationResponse, Operation, VideoGenerationRequest,
};
use crate::retry::credentials::ApiKeySlot;

/// Client for the hosted generative REST API.
pub struct HostedProvider {
    id: String,
    api_base: String,
    auth_header: String,
    keys: ApiKeySlot,
    client: reqwest::Client,
}

impl HostedProvider {
    pub fn new(id: String, api: &ApiConfig, keys: ApiKeySlot) -> StudioResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(api.request_timeout_secs))
            .build()?;
        Ok(Self {
            id,
            api_base: api.api_base.trim_end_matches('/').to_string(),
            auth_header: api.auth_header.clone(),
            keys,
            client,
        })
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        format!("{}/models/{}:{}", self.api_base, model, method)
    }

    async fn post(&self, url: &str, body: &impl Serialize) -> StudioResult<reqwest::Response> {
        let body = serde_json::to_value(body)?;
        tracing::debug!(
            provider = %self.id,
            url = %url,
            body = %sanitize_for_log(&body),
            "sending request (base64 omitted)"
        );

        let mut req = self.client.post(url).json(&body);
        if let Some(key) = self.keys.get().await {
            req = req.header(self.auth_header.as_str(), key);
        }
        let response = req.send().await.map_err(transport_error)?;
        check_status(response).await
    }

    async fn post_json<T: DeserializeOwned>(&self, url: &str, body: &impl Serialize) -> StudioResult<T> {
        let response = self.post(url, body).await?;
        read_json(response).await
    }
}

#[async_trait]
impl GenerativeProvider for HostedProvider {
    fn name(&self) -> &str {
        &self.id
    }

    async fn generate_content(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> StudioResult<GenerateContentResponse> {
        let resp: GenerateContentResponse = self
            .post_json(&self.model_url(model, "generateContent"), request)
            .await?;
        tracing::info!(
            provider = %self.id,
            model = %model,
            text_len = resp.text().len(),
            "generation received"
        );
        Ok(resp)
    }

    async fn stream_content(
        &self,
        model: &str,
        request: &GenerateContentRequest,
        on_chunk: ChunkSink<'_>,
    ) -> StudioResult<GenerateContentResponse> {
        let url = format!("{}?alt=sse", self.model_url(model, "streamGenerateContent"));
        let response = self.post(&url, request).await?;

        let mut byte_stream = response.bytes_stream();
        // Raw bytes until a full line arrives; a multi-byte character can span two chunks.
        let mut line_buf: Vec<u8> = Vec::new();
        let mut acc = StreamAccumulator::default();

        while let Some(result) = byte_stream.next().await {
            let bytes = result.map_err(transport_error)?;
            line_buf.extend_from_slice(&bytes);

            while let Some(pos) = line_buf.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = line_buf.drain(..=pos).collect();
                forward_sse_line(&String::from_utf8_lossy(&line), on_chunk, &mut acc);
            }
        }

        // Final event without a trailing newline.
        if !line_buf.is_empty() {
            forward_sse_line(&String::from_utf8_lossy(&line_buf), on_chunk, &mut acc);
        }

        let resp = acc.finish();
        tracing::info!(
            provider = %self.id,
            model = %model,
            text_len = resp.text().len(),
            "stream complete"
        );
        Ok(resp)
    }

    async fn generate_images(
        &self,
        model: &str,
        request: &ImageGenerationRequest,
    ) -> StudioResult<ImageGenerationResponse> {
        let resp: ImageGenerationResponse = self.post_json(&self.model_url(model, "predict"), request).await?;
        tracing::info!(provider = %self.id, model = %model, images = resp.predictions.len(), "images received");
        Ok(resp)
    }

    async fn start_video(
        &self,
        model: &str,
        request: &VideoGenerationRequest,
    ) -> StudioResult<Operation> {
        let op: Operation = self
            .post_json(&self.model_url(model, "predictLongRunning"), request)
            .await?;
        tracing::info!(provider = %self.id, model = %model, operation = %op.name, "video operation started");
        Ok(op)
    }

    async fn get_operation(&self, name: &str) -> StudioResult<Operation> {
        let url = format!("{}/{}", self.api_base, name);
        let mut req = self.client.get(&url);
        if let Some(key) = self.keys.get().await {
            req = req.header(self.auth_header.as_str(), key);
        }
        let response = req.send().await.map_err(transport_error)?;
        let response = check_status(response).await?;
        read_json(response).await
    }
}

fn forward_sse_line(line: &str, on_chunk: ChunkSink<'_>, acc: &mut StreamAccumulator) {
    match sse_parser::parse_sse_line(line.trim()) {
        Ok(Some(fragment)) => {
            for chunk in sse_parser::chunks_from(&fragment) {
                on_chunk(&chunk);
            }
            acc.push(fragment);
        }
        Ok(None) => {}
        Err(e) => tracing::debug!("SSE parse skipped: {e}"),
    }
}

/// A body that cannot be read in full is a transport failure. A body that
/// is not valid JSON is not.
async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> StudioResult<T> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| StudioError::Provider(format!("fetch failed: {}", e.without_url())))?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Non-2xx responses become `Provider("{status}: {body}")` so the status code
/// is visible to retry classification.
async fn check_status(response: reqwest::Response) -> StudioResult<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let err_body = response.text().await.unwrap_or_default();
    Err(StudioError::Provider(format!("{}: {}", status, err_body)))
}

/// The URL is dropped from the message so its digits cannot trip status classification.
fn transport_error(e: reqwest::Error) -> StudioError {
    if e.is_connect() || e.is_timeout() || e.is_request() || e.is_body() {
        StudioError::Provider(format!("fetch failed: {}", e.without_url()))
    } else {
        StudioError::Http(e)
    }
}

/// Replaces inline base64 payloads so request logs stay readable.
fn sanitize_for_log(body: &serde_json::Value) -> String {
    fn scrub(v: &mut serde_json::Value) {
        match v {
            serde_json::Value::Object(map) => {
                for (k, val) in map.iter_mut() {
                    if (k == "data" || k == "bytesBase64Encoded") && val.is_string() {
                        *val = serde_json::Value::String("<omitted_base64>".into());
                    } else {
                        scrub(val);
                    }
                }
            }
            serde_json::Value::Array(items) => items.iter_mut().for_each(scrub),
            _ => {}
        }
    }
    let mut copy = body.clone();
    scrub(&mut copy);
    serde_json::to_string(&copy).unwrap_or_default()
}
