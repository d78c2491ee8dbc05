use anyhow::{ensure, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use futures::{stream, StreamExt};
use regolo_core::state::{ASSISTANT_ROLE, USER_ROLE};
use regolo_core::{
    decode_events, telemetry, ChatProjector, ChunkShape, Conversation, ConversationLine,
    DecodedEvent, RegoloError,
};
use tempfile::TempDir;
use tokio::runtime::Runtime;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Recorded chat stream, split mid-line the way a network read would.
const TRANSCRIPT: &[&[u8]] = &[
    b"data: {\"choices\":[{\"delta\":{\"reasoning_content\":\"The user",
    b" greets me.\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"Ciao\"}}]}\n",
    b"data: garbage\ndata: {\"choices\":[{\"delta\":{\"content\":\", come stai?\"}}]}\n",
    b"data: [DONE]\ndata: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n",
];

#[derive(Parser, Debug)]
#[command(name = "xtask", version, about = "Automation helpers for Regolo")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Decode a recorded chat stream offline and persist the resulting conversation.
    Smoke,
}

fn main() -> Result<()> {
    telemetry::init_tracing(EnvFilter::new("info"))?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Smoke => smoke_test(),
    }
}

fn smoke_test() -> Result<()> {
    let runtime = Runtime::new()?;
    let temp_dir = TempDir::new()?;

    runtime.block_on(async {
        let chunks = TRANSCRIPT
            .iter()
            .map(|chunk| Ok::<_, RegoloError>(Bytes::from_static(chunk)));
        let projector = ChatProjector::new();
        let mut events = decode_events(stream::iter(chunks), false, move |shape: &ChunkShape| {
            projector.project(shape)
        });

        let mut answer = String::new();
        let mut thinking = 0usize;
        while let Some(event) = events.next().await {
            if let DecodedEvent::Projected(Some(delta)) = event? {
                if delta.is_thinking() {
                    thinking += 1;
                } else {
                    answer.push_str(&delta.content);
                }
            }
        }
        ensure!(answer == "Ciao, come stai?", "unexpected answer text: {answer:?}");

        let mut conversation = Conversation::new();
        conversation.add_line(ConversationLine::new(USER_ROLE, "ciao"));
        conversation.add_line(ConversationLine::new(ASSISTANT_ROLE, answer));
        let file = temp_dir.path().join("conversation.json");
        conversation.save_to(&file).await?;
        let restored = Conversation::load_from(&file).await?;
        ensure!(restored == conversation, "conversation did not survive a reload");

        info!(
            "messages" = restored.len(),
            "thinking_fragments" = thinking,
            "smoke test conversation saved"
        );
        Ok::<(), anyhow::Error>(())
    })
}
