use futures::StreamExt;
use regolo_core::inference::CHAT_COMPLETIONS_PATH;
use regolo_core::{
    ChatDelta, ChatOptions, ChatSession, ClientConfig, Conversation, ConversationLine,
    DecodedEvent, InferenceClient, RegoloError, Reply,
};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const REASONING_TRANSCRIPT: &str = concat!(
    "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":null,\"reasoning_content\":\"Let me\"}}]}\n",
    "data: {\"choices\":[{\"delta\":{\"reasoning_content\":\" think.\"}}]}\n",
    "\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n",
    "data: not-json\n",
    "data: [{\"choices\":[{\"delta\":{\"content\":\" world\"}}]}]\n",
    "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n",
    "data: [DONE]\n",
);

fn config(server: &MockServer, checks: bool) -> ClientConfig {
    ClientConfig {
        api_key: Some("k1".into()),
        base_url: server.uri(),
        chat_model: Some("Qwen3-8B".into()),
        enable_model_checks: checks,
        ..ClientConfig::default()
    }
}

fn session(server: &MockServer) -> ChatSession {
    ChatSession::new(InferenceClient::new(config(server, false)).expect("client"))
}

async fn mount_stream(server: &MockServer, transcript: &'static str) {
    Mock::given(method("POST"))
        .and(path(CHAT_COMPLETIONS_PATH))
        .and(header("authorization", "Bearer k1"))
        .and(body_string_contains("\"stream\":true"))
        .respond_with(ResponseTemplate::new(200).set_body_string(transcript))
        .mount(server)
        .await;
}

#[tokio::test]
async fn streamed_turn_yields_deltas_and_records_answer_only() {
    let server = MockServer::start().await;
    mount_stream(&server, REASONING_TRANSCRIPT).await;
    let session = session(&server);

    let events: Vec<_> = session
        .run_chat_streaming(Some("hi"), session.options())
        .await
        .expect("stream")
        .collect()
        .await;
    let deltas: Vec<ChatDelta> = events
        .into_iter()
        .map(|event| event.expect("event"))
        .filter_map(DecodedEvent::projected)
        .flatten()
        .collect();

    assert_eq!(
        deltas,
        vec![
            ChatDelta::thinking("Let me"),
            ChatDelta::thinking(" think."),
            ChatDelta::answer("Hello"),
            ChatDelta::answer(" world"),
            ChatDelta::default(),
        ]
    );
    assert_eq!(
        session.conversation().lines(),
        &[
            ConversationLine::new("user", "hi"),
            ConversationLine::new("assistant", "Hello world"),
        ]
    );
    assert!(!session.in_reasoning());
}

#[tokio::test]
async fn reasoning_only_turn_appends_no_assistant_line() {
    let server = MockServer::start().await;
    mount_stream(
        &server,
        "data: {\"choices\":[{\"delta\":{\"reasoning_content\":\"hmm\"}}]}\ndata: [DONE]\n",
    )
    .await;
    let session = session(&server);

    let _: Vec<_> = session
        .run_chat_streaming(Some("hi"), session.options())
        .await
        .expect("stream")
        .collect()
        .await;
    assert_eq!(
        session.conversation().lines(),
        &[ConversationLine::new("user", "hi")]
    );
    assert!(session.in_reasoning());
}

#[tokio::test]
async fn full_output_stream_still_records_history() {
    let server = MockServer::start().await;
    mount_stream(&server, REASONING_TRANSCRIPT).await;
    let session = session(&server);
    let options = ChatOptions {
        full_output: true,
        ..session.options()
    };

    let events: Vec<_> = session
        .run_chat_streaming(Some("hi"), options)
        .await
        .expect("stream")
        .collect()
        .await;
    assert_eq!(events.len(), 5);
    assert!(events
        .iter()
        .all(|event| matches!(event, Ok(DecodedEvent::Raw(_)))));
    assert_eq!(
        session.conversation().last(),
        Some(&ConversationLine::new("assistant", "Hello world"))
    );
}

#[tokio::test]
async fn history_is_sent_with_the_next_turn() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CHAT_COMPLETIONS_PATH))
        .and(body_string_contains("\"max_tokens\":2048"))
        .and(body_string_contains(
            "{\"role\":\"assistant\",\"content\":\"Ciao!\"},{\"role\":\"user\",\"content\":\"again\"}",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "Ancora ciao!"}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut earlier = Conversation::new();
    earlier.add_line(ConversationLine::new("user", "hi"));
    earlier.add_line(ConversationLine::new("assistant", "Ciao!"));
    let session = ChatSession::with_conversation(
        InferenceClient::new(config(&server, false)).expect("client"),
        earlier,
    );

    let reply = session
        .run_chat(Some("again"), session.options())
        .await
        .expect("chat");
    assert_eq!(
        reply,
        Reply::Projected(ConversationLine::new("assistant", "Ancora ciao!"))
    );
    assert_eq!(session.conversation().len(), 4);
}

#[tokio::test]
async fn change_model_is_validated_against_the_catalog() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"id": "Qwen3-8B"}, {"id": "gpt-oss-120b"}]
        })))
        .mount(&server)
        .await;
    let mut session = ChatSession::new(InferenceClient::new(config(&server, true)).expect("client"));

    session.change_model("gpt-oss-120b").await.expect("known model");
    assert_eq!(session.model(), Some("gpt-oss-120b"));

    let err = session.change_model("missing").await.unwrap_err();
    assert!(matches!(err, RegoloError::ModelNotFound { .. }));
    assert_eq!(session.model(), Some("gpt-oss-120b"));
}

#[tokio::test]
async fn conversation_survives_save_and_load() {
    let server = MockServer::start().await;
    mount_stream(&server, REASONING_TRANSCRIPT).await;
    let session = session(&server);
    let _: Vec<_> = session
        .run_chat_streaming(Some("hi"), session.options())
        .await
        .expect("stream")
        .collect()
        .await;

    let dir = TempDir::new().expect("temp dir");
    let file = dir.path().join("chat.json");
    session.conversation().save_to(&file).await.expect("save");
    let restored = Conversation::load_from(&file).await.expect("load");
    assert_eq!(restored, session.conversation());

    session.clear();
    assert!(session.conversation().is_empty());
}
