use crate::error::Result;
use crate::inference::{reply_message, ChatOptions, InferenceClient, Reply};
use crate::state::{Conversation, ConversationLine, StreamState, ASSISTANT_ROLE, USER_ROLE};
use crate::stream::{ChunkShape, DecodedEvent, EventStream};
use futures::stream::{self, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// Role attached to reasoning fragments.
pub const THINKING_ROLE: &str = "thinking";

/// Default token budget for session turns.
pub const SESSION_MAX_TOKENS: u32 = 2048;

/// One incremental piece of a streamed chat reply. Answer text carries an
/// empty role; reasoning carries [`THINKING_ROLE`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChatDelta {
    pub role: String,
    pub content: String,
}

impl ChatDelta {
    pub fn answer(content: impl Into<String>) -> Self {
        Self {
            role: String::new(),
            content: content.into(),
        }
    }

    pub fn thinking(content: impl Into<String>) -> Self {
        Self {
            role: THINKING_ROLE.to_string(),
            content: content.into(),
        }
    }

    pub fn is_thinking(&self) -> bool {
        self.role == THINKING_ROLE
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// Classifies chat stream events and remembers whether the stream is
/// currently inside a reasoning segment.
#[derive(Debug, Clone, Default)]
pub struct ChatProjector {
    state: Arc<Mutex<StreamState>>,
}

impl ChatProjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_reasoning(&self) -> bool {
        self.state.lock().in_reasoning
    }

    pub fn reset(&self) {
        *self.state.lock() = StreamState::default();
    }

    /// Extracts the delta of `choices[0]`. Answer text wins over reasoning
    /// when both are present; a delta with neither yields an empty answer
    /// fragment. Scalars yield `None`.
    pub fn project(&self, shape: &ChunkShape) -> Option<ChatDelta> {
        if !shape.is_structured() {
            return None;
        }
        let delta = shape
            .first_choice()
            .and_then(|choice| choice.get("delta"))
            .and_then(Value::as_object);
        let mut state = self.state.lock();
        if let Some(content) = delta.and_then(|d| non_empty(d, "content")) {
            state.in_reasoning = false;
            return Some(ChatDelta::answer(content));
        }
        if let Some(reasoning) = delta.and_then(|d| non_empty(d, "reasoning_content")) {
            state.in_reasoning = true;
            return Some(ChatDelta::thinking(reasoning));
        }
        Some(ChatDelta::default())
    }
}

fn non_empty<'a>(delta: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    delta
        .get(key)
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
}

/// A chat conversation bound to one model.
///
/// Streaming turns record only answer text in the history; reasoning is
/// passed through to the caller and then dropped.
pub struct ChatSession {
    client: InferenceClient,
    model: Option<String>,
    conversation: Arc<RwLock<Conversation>>,
    projector: ChatProjector,
}

impl ChatSession {
    pub fn new(client: InferenceClient) -> Self {
        Self::with_conversation(client, Conversation::new())
    }

    pub fn with_conversation(client: InferenceClient, conversation: Conversation) -> Self {
        let model = client.config().chat_model.clone();
        Self {
            client,
            model,
            conversation: Arc::new(RwLock::new(conversation)),
            projector: ChatProjector::new(),
        }
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn conversation(&self) -> Conversation {
        self.conversation.read().clone()
    }

    pub fn in_reasoning(&self) -> bool {
        self.projector.in_reasoning()
    }

    /// Default options for a session turn.
    pub fn options(&self) -> ChatOptions {
        ChatOptions {
            model: self.model.clone(),
            max_tokens: SESSION_MAX_TOKENS,
            ..ChatOptions::default()
        }
    }

    pub fn add_turn(&self, content: impl Into<String>, role: impl Into<String>) {
        self.conversation
            .write()
            .add_line(ConversationLine::new(role, content));
    }

    pub fn project_chat_event(&self, shape: &ChunkShape) -> Option<ChatDelta> {
        self.projector.project(shape)
    }

    /// Validates `model` and uses it for subsequent turns.
    pub async fn change_model(&mut self, model: &str) -> Result<()> {
        let checked = self.client.model_check().check_model(model).await?;
        debug!(model = %checked, "chat model changed");
        self.model = Some(checked);
        Ok(())
    }

    pub fn clear(&self) {
        self.conversation.write().clear();
        self.projector.reset();
    }

    /// Sends the conversation (plus `prompt` as a user turn, if given) and
    /// appends the reply to the history.
    pub async fn run_chat(
        &self,
        prompt: Option<&str>,
        options: ChatOptions,
    ) -> Result<Reply<ConversationLine>> {
        let (messages, options) = self.prepare(prompt, options);
        let body = self.client.chat_request(&messages, &options).await?;
        let line = reply_message(&body)?;
        self.conversation.write().add_line(line.clone());
        Ok(if options.full_output {
            Reply::Full(body)
        } else {
            Reply::Projected(line)
        })
    }

    /// Streams the reply. Once the stream is exhausted the concatenated answer
    /// text is appended as one assistant line; nothing is appended when the
    /// answer was empty or the stream failed.
    pub async fn run_chat_streaming(
        &self,
        prompt: Option<&str>,
        options: ChatOptions,
    ) -> Result<EventStream<Option<ChatDelta>>> {
        let (messages, options) = self.prepare(prompt, options);
        let projector = self.projector.clone();
        projector.reset();
        let events = self
            .client
            .chat_stream_with(&messages, &options, move |shape: &ChunkShape| {
                projector.project(shape)
            })
            .await?;
        Ok(record_history(
            events,
            self.projector.clone(),
            Arc::clone(&self.conversation),
        ))
    }

    fn prepare(
        &self,
        prompt: Option<&str>,
        mut options: ChatOptions,
    ) -> (Vec<ConversationLine>, ChatOptions) {
        if let Some(prompt) = prompt {
            self.add_turn(prompt, USER_ROLE);
        }
        if options.model.is_none() {
            options.model = self.model.clone();
        }
        (self.conversation.read().lines().to_vec(), options)
    }
}

struct HistoryState {
    events: EventStream<Option<ChatDelta>>,
    projector: ChatProjector,
    conversation: Arc<RwLock<Conversation>>,
    answer: String,
    failed: bool,
}

fn record_history(
    events: EventStream<Option<ChatDelta>>,
    projector: ChatProjector,
    conversation: Arc<RwLock<Conversation>>,
) -> EventStream<Option<ChatDelta>> {
    let state = HistoryState {
        events,
        projector,
        conversation,
        answer: String::new(),
        failed: false,
    };
    Box::pin(stream::unfold(state, |mut state| async move {
        if state.failed {
            return None;
        }
        match state.events.next().await {
            Some(Ok(event)) => {
                match &event {
                    DecodedEvent::Projected(delta) => state.accumulate(delta.as_ref()),
                    DecodedEvent::Raw(value) => {
                        let delta = state.projector.project(&ChunkShape::from(value.clone()));
                        state.accumulate(delta.as_ref());
                    }
                }
                Some((Ok(event), state))
            }
            Some(Err(err)) => {
                debug!(error = %err, "chat stream interrupted, history left unchanged");
                state.failed = true;
                Some((Err(err), state))
            }
            None => {
                if !state.answer.is_empty() {
                    let answer = std::mem::take(&mut state.answer);
                    state
                        .conversation
                        .write()
                        .add_line(ConversationLine::new(ASSISTANT_ROLE, answer));
                }
                None
            }
        }
    }))
}

impl HistoryState {
    fn accumulate(&mut self, delta: Option<&ChatDelta>) {
        if let Some(delta) = delta.filter(|delta| !delta.is_thinking()) {
            self.answer.push_str(&delta.content);
        }
    }
}
