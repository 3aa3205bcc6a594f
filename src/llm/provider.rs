use async_trait::async_trait;

use crate::errors::StudioResult;
use crate::llm::types::{
    GenerateContentRequest, GenerateContentResponse, ImageGenerationRequest,
    ImageGenerationResponse, Operation, StreamChunk, VideoGenerationRequest,
};

/// Callback receiving streamed chunks as they arrive.
pub type ChunkSink<'a> = &'a (dyn Fn(&StreamChunk) + Send + Sync);

/// Hosted generative API. `StudioClient` talks to this trait only, so tests
/// can substitute a fake backend.
///
/// Errors must render the HTTP status (or "fetch failed" for transport
/// failures) in their message; retry classification depends on it.
#[async_trait]
pub trait GenerativeProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn generate_content(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> StudioResult<GenerateContentResponse>;

    /// Streams a generation, forwarding each chunk to `on_chunk` and returning
    /// the accumulated response.
    async fn stream_content(
        &self,
        model: &str,
        request: &GenerateContentRequest,
        on_chunk: ChunkSink<'_>,
    ) -> StudioResult<GenerateContentResponse>;

    async fn generate_images(
        &self,
        model: &str,
        request: &ImageGenerationRequest,
    ) -> StudioResult<ImageGenerationResponse>;

    /// Starts a long-running video generation.
    async fn start_video(
        &self,
        model: &str,
        request: &VideoGenerationRequest,
    ) -> StudioResult<Operation>;

    async fn get_operation(&self, name: &str) -> StudioResult<Operation>;
}
