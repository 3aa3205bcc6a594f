use std::sync::Arc;

use base64::Engine as _;

use crate::config::VideoConfig;
use crate::errors::{StudioError, StudioResult};
use crate::llm::provider::{ChunkSink, GenerativeProvider};
use crate::llm::registry::{Capability, ModelRegistry};
use crate::llm::reply::{parse_project_reply, ProjectReply};
use crate::llm::tools::{load_builtin_tools, search_tool};
use crate::llm::types::{
    Content, FunctionCall, GenerateContentRequest, GenerateContentResponse, GenerationConfig,
    ImageGenerationRequest, ImageParameters, ImagePrompt, InlineData, Part, SpeechConfig, Tool,
    VideoGenerationRequest, VideoImage, VideoInstance, VideoParameters,
};
use crate::retry::RetryOrchestrator;
use crate::store::tasks::NewTask;
use crate::store::types::{
    Attachment, ChatMessage, ChatSession, GroundingUrl, ProjectFile, Role, TaskPriority,
};
use crate::studio::prompts;

#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    /// Ground the answer with web search and return the source URLs.
    pub web_search: bool,
    /// Offer the built-in function declarations (`create_task`).
    pub tools: bool,
}

#[derive(Debug, Clone)]
pub struct ChatReply {
    pub message: ChatMessage,
    pub function_calls: Vec<FunctionCall>,
}

impl ChatReply {
    /// Tasks the model asked to create through `create_task` calls.
    pub fn requested_tasks(&self) -> Vec<NewTask> {
        self.function_calls
            .iter()
            .filter(|c| c.name == "create_task")
            .filter_map(|c| {
                let title = c.args["title"].as_str()?.trim();
                if title.is_empty() {
                    return None;
                }
                Some(NewTask {
                    title: title.to_string(),
                    description: c.args["description"].as_str().unwrap_or_default().to_string(),
                    priority: c.args["priority"]
                        .as_str()
                        .and_then(TaskPriority::parse)
                        .unwrap_or_default(),
                })
            })
            .collect()
    }
}

/// Generated image or audio, base64-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedMedia {
    pub mime_type: String,
    pub data: String,
}

impl GeneratedMedia {
    pub fn bytes(&self) -> StudioResult<Vec<u8>> {
        Ok(base64::engine::general_purpose::STANDARD.decode(&self.data)?)
    }
}

impl From<InlineData> for GeneratedMedia {
    fn from(d: InlineData) -> Self {
        Self {
            mime_type: d.mime_type,
            data: d.data,
        }
    }
}

/// Entry point for every hosted-API operation. Each call makes sure a key is
/// selected, then runs under the retry orchestrator.
#[derive(Clone)]
pub struct StudioClient {
    provider: Arc<dyn GenerativeProvider>,
    models: ModelRegistry,
    retry: RetryOrchestrator,
    video: VideoConfig,
}

impl StudioClient {
    pub fn new(
        provider: Arc<dyn GenerativeProvider>,
        models: ModelRegistry,
        retry: RetryOrchestrator,
        video: VideoConfig,
    ) -> Self {
        Self {
            provider,
            models,
            retry,
            video,
        }
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    fn chat_model<'a>(&'a self, session: &'a ChatSession) -> &'a str {
        if session.model.trim().is_empty() {
            self.models.model_for(Capability::Chat)
        } else {
            &session.model
        }
    }

    async fn generate(&self, model: &str, request: &GenerateContentRequest) -> StudioResult<GenerateContentResponse> {
        self.retry.ensure_key_selected().await;
        self.retry
            .run(|| self.provider.generate_content(model, request))
            .await
    }

    pub async fn send_chat(
        &self,
        session: &ChatSession,
        text: &str,
        attachment: Option<&Attachment>,
        options: &ChatOptions,
    ) -> StudioResult<ChatReply> {
        let model = self.chat_model(session);
        let request = build_chat_request(&session.messages, text, attachment, options)?;
        tracing::info!(provider = self.provider.name(), session_id = %session.id, model, history = session.messages.len(), "sending chat message");
        let resp = self.generate(model, &request).await?;
        Ok(chat_reply(&resp))
    }

    /// Like [`send_chat`](Self::send_chat), forwarding text as it streams in.
    /// A retried call streams again from the start.
    pub async fn stream_chat(
        &self,
        session: &ChatSession,
        text: &str,
        attachment: Option<&Attachment>,
        options: &ChatOptions,
        on_chunk: ChunkSink<'_>,
    ) -> StudioResult<ChatReply> {
        let model = self.chat_model(session);
        let request = build_chat_request(&session.messages, text, attachment, options)?;
        tracing::info!(provider = self.provider.name(), session_id = %session.id, model, "streaming chat message");
        self.retry.ensure_key_selected().await;
        let resp = self
            .retry
            .run(|| self.provider.stream_content(model, &request, on_chunk))
            .await?;
        Ok(chat_reply(&resp))
    }

    /// Generates or updates project files from a prompt.
    pub async fn generate_project(
        &self,
        prompt: &str,
        stack: &str,
        existing: &[ProjectFile],
    ) -> StudioResult<ProjectReply> {
        let model = self.models.model_for(Capability::Reasoning);
        let request = GenerateContentRequest {
            contents: vec![Content::user(vec![Part::text(prompts::project_user_prompt(prompt, existing))])],
            system_instruction: Some(Content::system(prompts::project_system_prompt(stack))),
            tools: Vec::new(),
            generation_config: Some(GenerationConfig {
                response_mime_type: Some("application/json".into()),
                ..Default::default()
            }),
        };
        let resp = self.generate(model, &request).await?;
        let reply = parse_project_reply(&resp.text());
        tracing::info!(stack, files = reply.files.len(), "project generation parsed");
        Ok(reply)
    }

    pub async fn generate_image(
        &self,
        prompt: &str,
        aspect_ratio: &str,
        count: u32,
    ) -> StudioResult<Vec<GeneratedMedia>> {
        let model = self.models.model_for(Capability::Image);
        let request = ImageGenerationRequest {
            instances: vec![ImagePrompt {
                prompt: prompt.to_string(),
            }],
            parameters: ImageParameters {
                sample_count: count.max(1),
                aspect_ratio: aspect_ratio.to_string(),
                output_mime_type: Some("image/png".into()),
            },
        };
        self.retry.ensure_key_selected().await;
        let resp = self
            .retry
            .run(|| self.provider.generate_images(model, &request))
            .await?;
        if resp.predictions.is_empty() {
            return Err(StudioError::Provider("no images returned".into()));
        }
        Ok(resp
            .predictions
            .into_iter()
            .map(|p| GeneratedMedia {
                mime_type: p.mime_type,
                data: p.bytes_base64_encoded,
            })
            .collect())
    }

    pub async fn edit_image(&self, image: &Attachment, prompt: &str) -> StudioResult<GeneratedMedia> {
        let model = self.models.model_for(Capability::ImageEdit);
        let request = GenerateContentRequest {
            contents: vec![Content::user(vec![
                Part::inline(image.mime_type.clone(), image.data.clone()),
                Part::text(prompt),
            ])],
            generation_config: Some(GenerationConfig {
                response_modalities: Some(vec!["IMAGE".into(), "TEXT".into()]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let resp = self.generate(model, &request).await?;
        resp.inline_data()
            .into_iter()
            .next()
            .map(GeneratedMedia::from)
            .ok_or_else(|| StudioError::Provider("no edited image returned".into()))
    }

    /// Starts a video generation and polls until it finishes. Returns the video URI.
    pub async fn generate_video(
        &self,
        prompt: &str,
        aspect_ratio: &str,
        image: Option<&Attachment>,
    ) -> StudioResult<String> {
        let model = self.models.model_for(Capability::Video);
        let request = VideoGenerationRequest {
            instances: vec![VideoInstance {
                prompt: prompt.to_string(),
                image: image.map(|a| VideoImage {
                    bytes_base64_encoded: a.data.clone(),
                    mime_type: a.mime_type.clone(),
                }),
            }],
            parameters: VideoParameters {
                aspect_ratio: aspect_ratio.to_string(),
                sample_count: 1,
            },
        };
        self.retry.ensure_key_selected().await;
        let mut op = self
            .retry
            .run(|| self.provider.start_video(model, &request))
            .await?;

        let mut polls = 0;
        while !op.done {
            if polls >= self.video.max_polls {
                return Err(StudioError::Video(format!(
                    "operation {} still running after {} polls",
                    op.name, polls
                )));
            }
            tokio::time::sleep(self.video.poll_interval()).await;
            polls += 1;
            let name = op.name.clone();
            op = self.retry.run(|| self.provider.get_operation(&name)).await?;
            tracing::debug!(operation = %op.name, polls, done = op.done, "video operation polled");
        }

        if let Some(err) = &op.error {
            return Err(StudioError::Video(err.to_string()));
        }
        let uri = op
            .video_uri()
            .ok_or_else(|| StudioError::Video("operation finished without a video".into()))?;
        tracing::info!(operation = %op.name, polls, "video ready");
        Ok(uri)
    }

    pub async fn synthesize_speech(&self, text: &str, voice: Option<&str>) -> StudioResult<GeneratedMedia> {
        let model = self.models.model_for(Capability::Speech);
        let voice = voice.unwrap_or_else(|| self.models.voice());
        let request = GenerateContentRequest {
            contents: vec![Content::user(vec![Part::text(text)])],
            generation_config: Some(GenerationConfig {
                response_modalities: Some(vec!["AUDIO".into()]),
                speech_config: Some(SpeechConfig::prebuilt(voice)),
                ..Default::default()
            }),
            ..Default::default()
        };
        let resp = self.generate(model, &request).await?;
        resp.inline_data()
            .into_iter()
            .next()
            .map(GeneratedMedia::from)
            .ok_or_else(|| StudioError::Provider("no audio returned".into()))
    }

    pub async fn transcribe(&self, audio: &Attachment) -> StudioResult<String> {
        let model = self.models.model_for(Capability::Transcription);
        let request = GenerateContentRequest {
            contents: vec![Content::user(vec![
                Part::inline(audio.mime_type.clone(), audio.data.clone()),
                Part::text(prompts::TRANSCRIBE_PROMPT),
            ])],
            ..Default::default()
        };
        let resp = self.generate(model, &request).await?;
        Ok(resp.text().trim().to_string())
    }
}

/// Builds a chat request from the stored history plus the new user turn.
/// Thinking placeholders and empty turns are left out.
pub fn build_chat_request(
    history: &[ChatMessage],
    text: &str,
    attachment: Option<&Attachment>,
    options: &ChatOptions,
) -> StudioResult<GenerateContentRequest> {
    let mut contents: Vec<Content> = history
        .iter()
        .filter(|m| !m.is_thinking.unwrap_or(false))
        .filter_map(|m| {
            let mut parts = Vec::new();
            if let Some(a) = &m.attachment {
                parts.push(Part::inline(a.mime_type.clone(), a.data.clone()));
            }
            if !m.text.trim().is_empty() {
                parts.push(Part::text(m.text.clone()));
            }
            if parts.is_empty() {
                return None;
            }
            let role = match m.role {
                Role::User => "user",
                Role::Model => "model",
            };
            Some(Content {
                role: Some(role.into()),
                parts,
            })
        })
        .collect();

    let mut parts = Vec::new();
    if let Some(a) = attachment {
        parts.push(Part::inline(a.mime_type.clone(), a.data.clone()));
    }
    parts.push(Part::text(text));
    contents.push(Content::user(parts));

    let mut tools = Vec::new();
    if options.web_search {
        tools.push(search_tool());
    }
    if options.tools {
        tools.push(Tool::FunctionDeclarations(load_builtin_tools()?));
    }

    Ok(GenerateContentRequest {
        contents,
        system_instruction: Some(Content::system(prompts::CHAT_SYSTEM_PROMPT)),
        tools,
        generation_config: None,
    })
}

fn chat_reply(resp: &GenerateContentResponse) -> ChatReply {
    let mut message = ChatMessage::model(resp.text());
    let sources = resp.grounding_sources();
    if !sources.is_empty() {
        message.grounding_urls = Some(
            sources
                .into_iter()
                .map(|w| GroundingUrl {
                    uri: w.uri,
                    title: w.title,
                })
                .collect(),
        );
    }
    ChatReply {
        message,
        function_calls: resp.function_calls(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio::time::Instant;

    use super::*;
    use crate::llm::types::{ImageGenerationResponse, ImagePrediction, Operation, StreamChunk, StreamChunkKind};
    use crate::retry::RetryPolicy;

    /// Replays scripted results and records every request.
    #[derive(Default)]
    struct FakeProvider {
        content: Mutex<VecDeque<StudioResult<GenerateContentResponse>>>,
        operations: Mutex<VecDeque<StudioResult<Operation>>>,
        images: Mutex<VecDeque<StudioResult<ImageGenerationResponse>>>,
        requests: Mutex<Vec<(String, serde_json::Value)>>,
    }

    impl FakeProvider {
        fn with_content(results: Vec<StudioResult<GenerateContentResponse>>) -> Arc<Self> {
            let fake = Self::default();
            *fake.content.lock() = results.into();
            Arc::new(fake)
        }

        fn record(&self, model: &str, body: serde_json::Value) {
            self.requests.lock().push((model.to_string(), body));
        }

        fn request_count(&self) -> usize {
            self.requests.lock().len()
        }
    }

    #[async_trait]
    impl GenerativeProvider for FakeProvider {
        fn name(&self) -> &str {
            "fake"
        }

        async fn generate_content(
            &self,
            model: &str,
            request: &GenerateContentRequest,
        ) -> StudioResult<GenerateContentResponse> {
            self.record(model, serde_json::to_value(request)?);
            self.content
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(StudioError::Provider("script exhausted".into())))
        }

        async fn stream_content(
            &self,
            model: &str,
            request: &GenerateContentRequest,
            on_chunk: ChunkSink<'_>,
        ) -> StudioResult<GenerateContentResponse> {
            let resp = self.generate_content(model, request).await?;
            on_chunk(&StreamChunk {
                kind: StreamChunkKind::Content,
                content: resp.text(),
            });
            Ok(resp)
        }

        async fn generate_images(
            &self,
            model: &str,
            request: &ImageGenerationRequest,
        ) -> StudioResult<ImageGenerationResponse> {
            self.record(model, serde_json::to_value(request)?);
            self.images
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(StudioError::Provider("script exhausted".into())))
        }

        async fn start_video(
            &self,
            model: &str,
            request: &VideoGenerationRequest,
        ) -> StudioResult<Operation> {
            self.record(model, serde_json::to_value(request)?);
            self.operations
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(StudioError::Provider("script exhausted".into())))
        }

        async fn get_operation(&self, name: &str) -> StudioResult<Operation> {
            self.record(name, serde_json::Value::Null);
            self.operations
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(StudioError::Provider("script exhausted".into())))
        }
    }

    fn text_response(text: &str) -> GenerateContentResponse {
        serde_json::from_value(serde_json::json!({
            "candidates": [{"content": {"role": "model", "parts": [{"text": text}]}}]
        }))
        .unwrap()
    }

    fn client(provider: Arc<FakeProvider>) -> StudioClient {
        StudioClient::new(
            provider,
            ModelRegistry::default(),
            RetryOrchestrator::new(RetryPolicy::default()),
            VideoConfig::default(),
        )
    }

    fn session_with_history() -> ChatSession {
        let mut session = ChatSession::new("");
        session.messages = vec![
            ChatMessage::user("hi"),
            ChatMessage {
                is_thinking: Some(true),
                ..ChatMessage::model("")
            },
            ChatMessage::model("hello!"),
        ];
        session
    }

    #[tokio::test]
    async fn chat_request_carries_history_and_tools() {
        let fake = FakeProvider::with_content(vec![Ok(text_response("Sure."))]);
        let studio = client(fake.clone());
        let audio = Attachment {
            name: "note.webm".into(),
            mime_type: "audio/webm".into(),
            data: "AAAA".into(),
        };
        let options = ChatOptions {
            web_search: true,
            tools: true,
        };

        let reply = studio
            .send_chat(&session_with_history(), "and now?", Some(&audio), &options)
            .await
            .unwrap();
        assert_eq!(reply.message.text, "Sure.");
        assert_eq!(reply.message.role, Role::Model);

        let requests = fake.requests.lock();
        let (model, body) = &requests[0];
        assert_eq!(model, "gemini-2.5-flash");
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[2]["parts"][0]["inlineData"]["mimeType"], "audio/webm");
        assert_eq!(contents[2]["parts"][1]["text"], "and now?");
        assert!(body["tools"][0].get("googleSearch").is_some());
        assert_eq!(body["tools"][1]["functionDeclarations"][0]["name"], "create_task");
    }

    #[tokio::test(start_paused = true)]
    async fn overloaded_chat_is_retried_once() {
        let fake = FakeProvider::with_content(vec![
            Err(StudioError::Provider("503 Service Unavailable: model overloaded".into())),
            Ok(text_response("recovered")),
        ]);
        let studio = client(fake.clone());
        let start = Instant::now();
        let reply = studio
            .send_chat(&ChatSession::new("chat-x"), "hello", None, &ChatOptions::default())
            .await
            .unwrap();
        assert_eq!(reply.message.text, "recovered");
        assert_eq!(fake.request_count(), 2);
        assert!(start.elapsed() >= std::time::Duration::from_millis(2000));
        assert_eq!(fake.requests.lock()[0].0, "chat-x");
    }

    #[tokio::test]
    async fn terminal_error_surfaces_verbatim() {
        let fake = FakeProvider::with_content(vec![Err(StudioError::Provider(
            "429 Too Many Requests: quota".into(),
        ))]);
        let studio = client(fake.clone());
        let err = studio
            .send_chat(&ChatSession::new("m"), "hello", None, &ChatOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Provider error: 429 Too Many Requests: quota");
        assert_eq!(fake.request_count(), 1);
    }

    #[tokio::test]
    async fn streamed_chat_forwards_chunks() {
        let fake = FakeProvider::with_content(vec![Ok(text_response("streamed"))]);
        let studio = client(fake);
        let seen = Mutex::new(String::new());
        let sink = |chunk: &StreamChunk| seen.lock().push_str(&chunk.content);
        let reply = studio
            .stream_chat(&ChatSession::new("m"), "go", None, &ChatOptions::default(), &sink)
            .await
            .unwrap();
        assert_eq!(reply.message.text, "streamed");
        assert_eq!(*seen.lock(), "streamed");
    }

    #[tokio::test]
    async fn function_calls_become_tasks() {
        let resp: GenerateContentResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{"content": {"role": "model", "parts": [
                {"text": "Added it."},
                {"functionCall": {"name": "create_task", "args": {"title": "Write tests", "priority": "high"}}},
                {"functionCall": {"name": "create_task", "args": {"title": "  "}}}
            ]}}]
        }))
        .unwrap();
        let studio = client(FakeProvider::with_content(vec![Ok(resp)]));
        let reply = studio
            .send_chat(&ChatSession::new("m"), "track tests", None, &ChatOptions { web_search: false, tools: true })
            .await
            .unwrap();
        let tasks = reply.requested_tasks();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "Write tests");
        assert_eq!(tasks[0].priority, TaskPriority::High);
    }

    #[tokio::test]
    async fn project_generation_uses_reasoning_model_and_repairs_reply() {
        let raw = "```json\n{\"explanation\":\"Counter app\",\"files\":[{\"path\":\"App.tsx\",\"content\":\"export default 1\"}]}\n```";
        let fake = FakeProvider::with_content(vec![Ok(text_response(raw))]);
        let studio = client(fake.clone());
        let reply = studio.generate_project("a counter", "react", &[]).await.unwrap();
        assert_eq!(reply.explanation, "Counter app");
        assert_eq!(reply.into_files()[0].path, "App.tsx");

        let requests = fake.requests.lock();
        assert_eq!(requests[0].0, "gemini-2.5-pro");
        assert_eq!(requests[0].1["generationConfig"]["responseMimeType"], "application/json");
    }

    #[tokio::test]
    async fn speech_returns_audio_payload() {
        let resp: GenerateContentResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{"content": {"parts": [{"inlineData": {"mimeType": "audio/pcm", "data": "AQID"}}]}}]
        }))
        .unwrap();
        let fake = FakeProvider::with_content(vec![Ok(resp)]);
        let studio = client(fake.clone());
        let audio = studio.synthesize_speech("hello", Some("Puck")).await.unwrap();
        assert_eq!(audio.mime_type, "audio/pcm");
        assert_eq!(audio.bytes().unwrap(), vec![1, 2, 3]);
        let body = &fake.requests.lock()[0].1;
        assert_eq!(
            body["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Puck"
        );
    }

    #[tokio::test]
    async fn transcription_trims_text() {
        let fake = FakeProvider::with_content(vec![Ok(text_response("  hello world \n"))]);
        let studio = client(fake);
        let audio = Attachment {
            name: "rec.webm".into(),
            mime_type: "audio/webm".into(),
            data: "AAAA".into(),
        };
        assert_eq!(studio.transcribe(&audio).await.unwrap(), "hello world");
    }

    #[tokio::test]
    async fn image_generation_maps_predictions() {
        let fake = Arc::new(FakeProvider::default());
        fake.images.lock().push_back(Ok(ImageGenerationResponse {
            predictions: vec![ImagePrediction {
                bytes_base64_encoded: "iVBO".into(),
                mime_type: "image/png".into(),
            }],
        }));
        fake.images.lock().push_back(Ok(ImageGenerationResponse::default()));
        let studio = client(fake.clone());

        let images = studio.generate_image("a fox", "16:9", 0).await.unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(fake.requests.lock()[0].1["parameters"]["sampleCount"], 1);

        let err = studio.generate_image("nothing", "1:1", 1).await.unwrap_err();
        assert!(matches!(err, StudioError::Provider(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn video_generation_polls_until_done() {
        let fake = Arc::new(FakeProvider::default());
        {
            let mut ops = fake.operations.lock();
            ops.push_back(Ok(Operation {
                name: "operations/v1".into(),
                ..Default::default()
            }));
            ops.push_back(Ok(Operation {
                name: "operations/v1".into(),
                ..Default::default()
            }));
            ops.push_back(Ok(serde_json::from_value(serde_json::json!({
                "name": "operations/v1",
                "done": true,
                "response": {"generateVideoResponse": {"generatedSamples": [{"video": {"uri": "https://v.example/clip"}}]}}
            }))
            .unwrap()));
        }
        let studio = client(fake.clone());
        let start = Instant::now();
        let uri = studio.generate_video("a sunrise", "16:9", None).await.unwrap();
        assert_eq!(uri, "https://v.example/clip");
        assert_eq!(fake.request_count(), 3);
        assert!(start.elapsed() >= std::time::Duration::from_millis(20_000));
    }

    #[tokio::test(start_paused = true)]
    async fn video_generation_gives_up_after_max_polls() {
        let fake = Arc::new(FakeProvider::default());
        for _ in 0..3 {
            fake.operations.lock().push_back(Ok(Operation {
                name: "operations/slow".into(),
                ..Default::default()
            }));
        }
        let studio = StudioClient::new(
            fake,
            ModelRegistry::default(),
            RetryOrchestrator::new(RetryPolicy::default()),
            VideoConfig {
                poll_interval_ms: 10,
                max_polls: 2,
            },
        );
        let err = studio.generate_video("slow", "9:16", None).await.unwrap_err();
        assert!(matches!(err, StudioError::Video(_)));
    }
}
