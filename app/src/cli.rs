use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "regolo", version, about = "Command-line client for Regolo")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Log in to or out of the model-management API
    #[command(subcommand)]
    Auth(AuthCommand),
    /// Chat interactively with a model; type "/bye" to exit
    Chat(ChatArgs),
    /// Complete a text prompt
    Completions(CompletionsArgs),
    /// List the models available to an API key
    GetAvailableModels(AvailableModelsArgs),
    /// Embed one or more texts
    Embeddings(EmbeddingsArgs),
    /// Rank documents by relevance to a query
    Rerank(RerankArgs),
    /// Transcribe an audio file
    TranscribeAudio(TranscribeArgs),
    /// Generate images and save them to disk
    CreateImage(CreateImageArgs),
    /// Manage registered models
    #[command(subcommand)]
    Models(ModelsCommand),
    /// Manage GPU inference sessions
    #[command(subcommand)]
    Inference(InferenceCommand),
    /// Manage SSH keys
    #[command(subcommand)]
    Ssh(SshCommand),
}

/// Inference API credentials and endpoint. Falls back to configuration.
#[derive(Args, Debug, Clone, Default)]
pub struct ApiArgs {
    /// API key for the inference API
    #[arg(long = "api-key", env = "API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,
    /// Alternative inference base URL
    #[arg(long = "base-url")]
    pub base_url: Option<String>,
    /// Skip model name validation against the model list
    #[arg(long = "no-model-check")]
    pub no_model_check: bool,
}

#[derive(Subcommand, Debug)]
pub enum AuthCommand {
    /// Exchange username and password for tokens
    Login {
        #[arg(long)]
        username: Option<String>,
        #[arg(long, env = "REGOLO_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Forget the stored tokens
    Logout,
}

#[derive(Args, Debug)]
pub struct ChatArgs {
    #[command(flatten)]
    pub api: ApiArgs,
    /// Model to chat with; prompts for one when omitted
    #[arg(long)]
    pub model: Option<String>,
    /// Replace newlines in replies with spaces
    #[arg(long = "disable-newlines")]
    pub disable_newlines: bool,
    #[arg(long = "max-tokens", default_value_t = 2048)]
    pub max_tokens: u32,
    /// Save the conversation to this file on exit
    #[arg(long = "save-conversation")]
    pub save_conversation: Option<PathBuf>,
    /// Resume a conversation saved with --save-conversation
    #[arg(long = "load-conversation")]
    pub load_conversation: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct CompletionsArgs {
    #[command(flatten)]
    pub api: ApiArgs,
    #[arg(long)]
    pub model: Option<String>,
    #[arg(long)]
    pub prompt: String,
    #[arg(long = "max-tokens", default_value_t = 200)]
    pub max_tokens: u32,
    #[arg(long)]
    pub temperature: Option<f32>,
    #[arg(long)]
    pub stream: bool,
    /// Print the whole response body as JSON
    #[arg(long = "full-output")]
    pub full_output: bool,
}

#[derive(Args, Debug)]
pub struct AvailableModelsArgs {
    #[command(flatten)]
    pub api: ApiArgs,
    /// Include each model's mode
    #[arg(long = "model-info")]
    pub model_info: bool,
}

#[derive(Args, Debug)]
pub struct EmbeddingsArgs {
    #[command(flatten)]
    pub api: ApiArgs,
    #[arg(long)]
    pub model: Option<String>,
    /// Text to embed; repeat for a batch
    #[arg(long = "input", required = true)]
    pub inputs: Vec<String>,
    #[arg(long = "full-output")]
    pub full_output: bool,
}

#[derive(Args, Debug)]
pub struct RerankArgs {
    #[command(flatten)]
    pub api: ApiArgs,
    #[arg(long)]
    pub model: Option<String>,
    #[arg(long)]
    pub query: String,
    /// Document to rank; repeat for each document
    #[arg(long = "document", required = true)]
    pub documents: Vec<String>,
    #[arg(long = "top-n")]
    pub top_n: Option<u32>,
    #[arg(long = "full-output")]
    pub full_output: bool,
}

#[derive(Args, Debug)]
pub struct TranscribeArgs {
    #[command(flatten)]
    pub api: ApiArgs,
    #[arg(long)]
    pub model: Option<String>,
    #[arg(long = "file-path")]
    pub file_path: PathBuf,
    /// Write the transcription here instead of stdout
    #[arg(long = "save-path")]
    pub save_path: Option<PathBuf>,
    #[arg(long)]
    pub language: Option<String>,
    #[arg(long)]
    pub prompt: Option<String>,
    #[arg(long = "response-format", default_value = "json")]
    pub response_format: String,
    #[arg(long)]
    pub temperature: Option<f32>,
    /// Strategy name, or a JSON object
    #[arg(long = "chunking-strategy")]
    pub chunking_strategy: Option<String>,
    /// Extra response fields to include; repeatable
    #[arg(long)]
    pub include: Vec<String>,
    /// Timestamp granularity (word, segment); repeatable
    #[arg(long = "timestamp-granularities")]
    pub timestamp_granularities: Vec<String>,
    #[arg(long)]
    pub stream: bool,
    #[arg(long = "full-output")]
    pub full_output: bool,
}

#[derive(Args, Debug)]
pub struct CreateImageArgs {
    #[command(flatten)]
    pub api: ApiArgs,
    #[arg(long)]
    pub model: Option<String>,
    #[arg(long, default_value = "A generic image")]
    pub prompt: String,
    #[arg(long, default_value_t = 1)]
    pub n: u32,
    #[arg(long, default_value = "standard")]
    pub quality: String,
    #[arg(long, default_value = "1024x1024")]
    pub size: String,
    #[arg(long, default_value = "realistic")]
    pub style: String,
    /// Output directory (defaults to ./images)
    #[arg(long = "save-path")]
    pub save_path: Option<PathBuf>,
    #[arg(
        long = "output-file-format",
        default_value = "png",
        value_parser = ["png", "jpg", "jpeg", "webp", "bmp"]
    )]
    pub output_file_format: String,
}

#[derive(Subcommand, Debug)]
pub enum ModelsCommand {
    List,
    Details {
        model_name: String,
    },
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        provider: String,
        #[arg(long)]
        url: Option<String>,
        #[arg(long = "api-key")]
        api_key: Option<String>,
        #[arg(long)]
        force: bool,
    },
    Delete {
        model_name: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum InferenceCommand {
    /// List available GPUs
    Gpus,
    /// Show loaded models
    Status,
    /// Show usage for a month or time range
    UserStatus {
        #[arg(long)]
        month: Option<String>,
        #[arg(long = "time-range-start")]
        time_range_start: Option<String>,
        #[arg(long = "time-range-end")]
        time_range_end: Option<String>,
    },
    /// Load a model onto a GPU
    Load {
        model_name: String,
        #[arg(long)]
        gpu: String,
        #[arg(long)]
        force: bool,
        /// JSON object with vLLM settings
        #[arg(long = "vllm-config")]
        vllm_config: Option<String>,
    },
    /// Unload an inference session
    Unload { session_id: u64 },
}

#[derive(Subcommand, Debug)]
pub enum SshCommand {
    List,
    Add {
        #[arg(long)]
        title: String,
        /// Public key text, or a path to a public key file
        #[arg(long)]
        key: String,
    },
    Delete {
        key_id: String,
    },
}
