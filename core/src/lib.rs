pub mod auth;
pub mod chat;
pub mod config;
pub mod error;
pub mod inference;
pub mod management;
pub mod models;
pub mod requester;
pub mod state;
pub mod store;
pub mod stream;
pub mod telemetry;

pub use auth::{CredentialStore, Credentials};
pub use chat::{ChatDelta, ChatProjector, ChatSession, THINKING_ROLE};
pub use config::{ClientConfig, ConfigError, ManagementConfig, Settings};
pub use error::{RegoloError, Result};
pub use inference::{
    AudioSource, ChatOptions, CompletionOptions, EmbeddingInput, EmbeddingOptions, ImageOptions,
    InferenceClient, Reply, RerankOptions, TranscriptionOptions,
};
pub use management::{LoadModel, ManagementClient, RegisterModel, StatusQuery};
pub use models::{ModelCatalog, ModelCheck, ModelInfo, NoModelCheck};
pub use requester::AuthenticatedRequester;
pub use state::{Conversation, ConversationLine};
pub use stream::{decode_events, ChunkShape, DecodedEvent, EventStream, LineDecoder};
