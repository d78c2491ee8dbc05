//! Client for the OpenAI-style inference endpoints.

use crate::auth::bearer;
use crate::chat::{ChatDelta, ChatProjector};
use crate::config::ClientConfig;
use crate::error::{RegoloError, Result};
use crate::models::{ModelCatalog, ModelCheck};
use crate::state::ConversationLine;
use crate::stream::{open_event_stream, ChunkShape, EventStream};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::AUTHORIZATION;
use reqwest::multipart::{Form, Part};
use reqwest::Response;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

pub const COMPLETIONS_PATH: &str = "/v1/completions";
pub const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";
pub const IMAGE_GENERATION_PATH: &str = "/v1/images/generations";
pub const EMBEDDINGS_PATH: &str = "/v1/embeddings";
pub const AUDIO_TRANSCRIPTION_PATH: &str = "/v1/audio/transcriptions";
pub const RERANK_PATH: &str = "/v1/rerank";

/// Result of a non-streaming call: the whole response body when full output
/// was requested, otherwise the endpoint's usual projection.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply<T> {
    Full(Value),
    Projected(T),
}

impl<T> Reply<T> {
    pub fn projected(self) -> Option<T> {
        match self {
            Self::Projected(value) => Some(value),
            Self::Full(_) => None,
        }
    }

    pub fn full(&self) -> Option<&Value> {
        match self {
            Self::Full(value) => Some(value),
            Self::Projected(_) => None,
        }
    }
}

/// Sampling parameters shared by text and chat completions. Unset values are
/// left out of the request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionOptions {
    #[serde(skip)]
    pub model: Option<String>,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip)]
    pub full_output: bool,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            model: None,
            max_tokens: 200,
            temperature: None,
            top_p: None,
            top_k: None,
            full_output: false,
        }
    }
}

pub type ChatOptions = CompletionOptions;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageOptions {
    #[serde(skip)]
    pub model: Option<String>,
    pub n: u32,
    pub quality: String,
    pub size: String,
    pub style: String,
    #[serde(skip)]
    pub full_output: bool,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            model: None,
            n: 1,
            quality: "standard".into(),
            size: "1024x1024".into(),
            style: "realistic".into(),
            full_output: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddingOptions {
    pub model: Option<String>,
    pub full_output: bool,
}

/// Text to embed: one string or a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EmbeddingInput {
    Single(String),
    Batch(Vec<String>),
}

impl From<&str> for EmbeddingInput {
    fn from(text: &str) -> Self {
        Self::Single(text.to_string())
    }
}

impl From<Vec<String>> for EmbeddingInput {
    fn from(texts: Vec<String>) -> Self {
        Self::Batch(texts)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RerankOptions {
    #[serde(skip)]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_n: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank_fields: Option<Vec<String>>,
    pub return_documents: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_chunks_per_doc: Option<u32>,
    #[serde(skip)]
    pub full_output: bool,
}

impl Default for RerankOptions {
    fn default() -> Self {
        Self {
            model: None,
            top_n: None,
            rank_fields: None,
            return_documents: true,
            max_chunks_per_doc: None,
            full_output: false,
        }
    }
}

/// Where the audio for a transcription comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl AudioSource {
    async fn into_part(self) -> Result<Part> {
        match self {
            Self::Path(path) => {
                let bytes = tokio::fs::read(&path)
                    .await
                    .map_err(|err| RegoloError::io(&path, err))?;
                let name = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "audio_file".to_string());
                Ok(Part::bytes(bytes).file_name(name))
            }
            Self::Bytes(bytes) => Ok(Part::bytes(bytes).file_name("audio_file")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChunkingStrategy {
    Named(String),
    Custom(Value),
}

impl ChunkingStrategy {
    fn form_value(&self) -> String {
        match self {
            Self::Named(name) => name.clone(),
            Self::Custom(value) => value.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionOptions {
    pub model: Option<String>,
    pub response_format: String,
    pub chunking_strategy: Option<ChunkingStrategy>,
    pub include: Vec<String>,
    pub language: Option<String>,
    pub prompt: Option<String>,
    pub temperature: Option<f32>,
    pub timestamp_granularities: Vec<String>,
    pub full_output: bool,
}

impl Default for TranscriptionOptions {
    fn default() -> Self {
        Self {
            model: None,
            response_format: "json".into(),
            chunking_strategy: None,
            include: Vec::new(),
            language: None,
            prompt: None,
            temperature: None,
            timestamp_granularities: Vec::new(),
            full_output: false,
        }
    }
}

#[derive(Serialize)]
struct CompletionPayload<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(flatten)]
    options: &'a CompletionOptions,
}

#[derive(Serialize)]
struct ChatPayload<'a> {
    model: &'a str,
    messages: &'a [ConversationLine],
    stream: bool,
    #[serde(flatten)]
    options: &'a ChatOptions,
}

#[derive(Serialize)]
struct ImagePayload<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(flatten)]
    options: &'a ImageOptions,
}

#[derive(Serialize)]
struct EmbeddingPayload<'a> {
    input: &'a EmbeddingInput,
    model: &'a str,
}

#[derive(Serialize)]
struct RerankPayload<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [Value],
    #[serde(flatten)]
    options: &'a RerankOptions,
}

#[derive(Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

/// Calls the inference API with a static API key.
#[derive(Clone)]
pub struct InferenceClient {
    config: ClientConfig,
    http: reqwest::Client,
    models: Arc<dyn ModelCheck>,
}

impl InferenceClient {
    /// Builds a client whose model checks go through a [`ModelCatalog`] on the
    /// same endpoint.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        let catalog = ModelCatalog::new(&config, http.clone());
        Ok(Self::with_model_check(config, http, Arc::new(catalog)))
    }

    pub fn with_model_check(
        config: ClientConfig,
        http: reqwest::Client,
        models: Arc<dyn ModelCheck>,
    ) -> Self {
        Self {
            config,
            http,
            models,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn catalog(&self) -> ModelCatalog {
        ModelCatalog::new(&self.config, self.http.clone())
    }

    pub fn model_check(&self) -> &dyn ModelCheck {
        self.models.as_ref()
    }

    pub async fn completions(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<Reply<String>> {
        let model = self
            .resolve_model(options.model.as_deref(), &self.config.chat_model)
            .await?;
        let payload = CompletionPayload {
            model: &model,
            prompt,
            stream: false,
            options,
        };
        let body = self.post_json(COMPLETIONS_PATH, &payload).await?;
        if options.full_output {
            return Ok(Reply::Full(body));
        }
        let text = ChunkShape::from(body)
            .first_choice()
            .and_then(|choice| choice.get("text"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| RegoloError::InvalidResponse("completion without text".into()))?;
        Ok(Reply::Projected(text))
    }

    /// Streams `choices[0].text` of every event.
    pub async fn completions_stream(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<EventStream<String>> {
        let model = self
            .resolve_model(options.model.as_deref(), &self.config.chat_model)
            .await?;
        let payload = CompletionPayload {
            model: &model,
            prompt,
            stream: true,
            options,
        };
        let response = self.send_json(COMPLETIONS_PATH, &payload).await?;
        open_event_stream(response, options.full_output, |shape: &ChunkShape| {
            shape
                .first_choice()
                .and_then(|choice| choice.get("text"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        })
        .await
    }

    /// Returns the `(role, content)` of the first choice's message.
    pub async fn chat_completions(
        &self,
        messages: &[ConversationLine],
        options: &ChatOptions,
    ) -> Result<Reply<ConversationLine>> {
        let body = self.chat_request(messages, options).await?;
        if options.full_output {
            return Ok(Reply::Full(body));
        }
        Ok(Reply::Projected(reply_message(&body)?))
    }

    pub(crate) async fn chat_request(
        &self,
        messages: &[ConversationLine],
        options: &ChatOptions,
    ) -> Result<Value> {
        let model = self
            .resolve_model(options.model.as_deref(), &self.config.chat_model)
            .await?;
        let payload = ChatPayload {
            model: &model,
            messages,
            stream: false,
            options,
        };
        self.post_json(CHAT_COMPLETIONS_PATH, &payload).await
    }

    /// Streams chat deltas classified as reasoning or answer text.
    pub async fn chat_completions_stream(
        &self,
        messages: &[ConversationLine],
        options: &ChatOptions,
    ) -> Result<EventStream<Option<ChatDelta>>> {
        let projector = ChatProjector::new();
        self.chat_stream_with(messages, options, move |shape: &ChunkShape| {
            projector.project(shape)
        })
        .await
    }

    pub(crate) async fn chat_stream_with<F, T>(
        &self,
        messages: &[ConversationLine],
        options: &ChatOptions,
        projection: F,
    ) -> Result<EventStream<T>>
    where
        F: FnMut(&ChunkShape) -> T + Send + 'static,
        T: Send + 'static,
    {
        let model = self
            .resolve_model(options.model.as_deref(), &self.config.chat_model)
            .await?;
        let payload = ChatPayload {
            model: &model,
            messages,
            stream: true,
            options,
        };
        let response = self.send_json(CHAT_COMPLETIONS_PATH, &payload).await?;
        open_event_stream(response, options.full_output, projection).await
    }

    /// Returns the decoded bytes of every generated image.
    pub async fn create_image(
        &self,
        prompt: &str,
        options: &ImageOptions,
    ) -> Result<Reply<Vec<Vec<u8>>>> {
        let model = self
            .resolve_model(
                options.model.as_deref(),
                &self.config.image_generation_model,
            )
            .await?;
        let payload = ImagePayload {
            model: &model,
            prompt,
            options,
        };
        let body = self.post_json(IMAGE_GENERATION_PATH, &payload).await?;
        if options.full_output {
            return Ok(Reply::Full(body));
        }
        let images = body
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| RegoloError::InvalidResponse("image response without data".into()))?;
        images
            .iter()
            .map(|image| {
                let encoded = image
                    .get("b64_json")
                    .and_then(Value::as_str)
                    .ok_or_else(|| RegoloError::InvalidResponse("image without b64_json".into()))?;
                STANDARD
                    .decode(encoded)
                    .map_err(|err| RegoloError::InvalidResponse(format!("bad image data: {err}")))
            })
            .collect::<Result<Vec<_>>>()
            .map(Reply::Projected)
    }

    /// Returns the `data` array of the embeddings response.
    pub async fn embeddings(
        &self,
        input: &EmbeddingInput,
        options: &EmbeddingOptions,
    ) -> Result<Reply<Value>> {
        let model = self
            .resolve_model(options.model.as_deref(), &self.config.embedder_model)
            .await?;
        let payload = EmbeddingPayload {
            input,
            model: &model,
        };
        let body = self.post_json(EMBEDDINGS_PATH, &payload).await?;
        if options.full_output {
            return Ok(Reply::Full(body));
        }
        Ok(Reply::Projected(
            body.get("data").cloned().unwrap_or(Value::Null),
        ))
    }

    /// Returns the ranked `results`, or an empty list when the server sent none.
    pub async fn rerank(
        &self,
        query: &str,
        documents: &[Value],
        options: &RerankOptions,
    ) -> Result<Reply<Vec<Value>>> {
        let model = self
            .resolve_model(options.model.as_deref(), &self.config.reranker_model)
            .await?;
        let payload = RerankPayload {
            model: &model,
            query,
            documents,
            options,
        };
        let body = self.post_json(RERANK_PATH, &payload).await?;
        if options.full_output {
            return Ok(Reply::Full(body));
        }
        let results = body
            .get("results")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(Reply::Projected(results))
    }

    pub async fn audio_transcription(
        &self,
        source: AudioSource,
        options: &TranscriptionOptions,
    ) -> Result<Reply<String>> {
        let response = self.send_transcription(source, options, false).await?;
        if !response.status().is_success() {
            return Err(RegoloError::from_response(response).await);
        }
        let body: Value = response.json().await?;
        if options.full_output {
            return Ok(Reply::Full(body));
        }
        Ok(Reply::Projected(
            body.get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        ))
    }

    /// Streams the `text` field of every transcription event.
    pub async fn audio_transcription_stream(
        &self,
        source: AudioSource,
        options: &TranscriptionOptions,
    ) -> Result<EventStream<String>> {
        let response = self.send_transcription(source, options, true).await?;
        open_event_stream(response, options.full_output, |shape: &ChunkShape| {
            shape
                .primary()
                .and_then(|event| event.get("text"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        })
        .await
    }

    async fn send_transcription(
        &self,
        source: AudioSource,
        options: &TranscriptionOptions,
        stream: bool,
    ) -> Result<Response> {
        let model = self
            .resolve_model(
                options.model.as_deref(),
                &self.config.audio_transcription_model,
            )
            .await?;
        let mut form = Form::new()
            .part("file", source.into_part().await?)
            .text("model", model)
            .text("response_format", options.response_format.clone())
            .text("stream", stream.to_string());
        if let Some(strategy) = &options.chunking_strategy {
            form = form.text("chunking_strategy", strategy.form_value());
        }
        for item in &options.include {
            form = form.text("include[]", item.clone());
        }
        if let Some(language) = &options.language {
            form = form.text("language", language.clone());
        }
        if let Some(prompt) = &options.prompt {
            form = form.text("prompt", prompt.clone());
        }
        if let Some(temperature) = options.temperature {
            form = form.text("temperature", temperature.to_string());
        }
        for granularity in &options.timestamp_granularities {
            form = form.text("timestamp_granularities[]", granularity.clone());
        }

        let url = self.url(AUDIO_TRANSCRIPTION_PATH);
        debug!(path = AUDIO_TRANSCRIPTION_PATH, stream, "sending transcription");
        Ok(self
            .http
            .post(&url)
            .header(AUTHORIZATION, self.authorization()?)
            .multipart(form)
            .send()
            .await?)
    }

    async fn resolve_model(
        &self,
        explicit: Option<&str>,
        fallback: &Option<String>,
    ) -> Result<String> {
        let model = explicit.or(fallback.as_deref()).unwrap_or_default();
        self.models.check_model(model).await
    }

    async fn post_json<P: Serialize + ?Sized>(&self, path: &str, payload: &P) -> Result<Value> {
        let response = self.send_json(path, payload).await?;
        if !response.status().is_success() {
            let err = RegoloError::from_response(response).await;
            debug!(path, error = %err, "inference request failed");
            return Err(err);
        }
        Ok(response.json().await?)
    }

    async fn send_json<P: Serialize + ?Sized>(&self, path: &str, payload: &P) -> Result<Response> {
        let authorization = self.authorization()?;
        let url = self.url(path);
        debug!(path, "sending inference request");
        Ok(self
            .http
            .post(&url)
            .header(AUTHORIZATION, authorization)
            .json(payload)
            .send()
            .await?)
    }

    fn authorization(&self) -> Result<String> {
        self.config
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .map(bearer)
            .ok_or(RegoloError::MissingApiKey)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }
}

pub(crate) fn reply_message(body: &Value) -> Result<ConversationLine> {
    let message = ChunkShape::from(body.clone())
        .first_choice()
        .and_then(|choice| choice.get("message"))
        .cloned()
        .ok_or_else(|| RegoloError::InvalidResponse("chat reply without message".into()))?;
    let message: ReplyMessage = serde_json::from_value(message)?;
    Ok(ConversationLine::new(
        message.role.unwrap_or_else(|| "assistant".to_string()),
        message.content.unwrap_or_default(),
    ))
}
