use crate::cli::*;
use crate::prompt::read_masked;
use crate::render::{pretty_json, unique_image_path, ChatRenderer};
use anyhow::{bail, Context, Result};
use futures::StreamExt;
use regolo_core::inference::ChunkingStrategy;
use regolo_core::{
    AudioSource, ConfigError, ChatOptions, ChatSession, ClientConfig, CompletionOptions, Conversation,
    DecodedEvent, EmbeddingInput, EmbeddingOptions, ImageOptions, InferenceClient, LoadModel,
    ManagementClient, RegisterModel, RegoloError, Reply, RerankOptions, Settings, StatusQuery,
    TranscriptionOptions,
};
use serde_json::{Map, Value};
use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::debug;

type InputLines = Lines<BufReader<Stdin>>;

/// Text shown to the user for a failed command.
pub fn describe(err: &anyhow::Error) -> String {
    match err.downcast_ref::<RegoloError>() {
        Some(regolo) => regolo.user_message(),
        None => format!("{err:#}"),
    }
}

fn settings_failure(err: ConfigError) -> anyhow::Error {
    anyhow::Error::new(RegoloError::from(err)).context("failed to load configuration")
}

pub async fn run(cli: Cli) -> Result<()> {
    let settings = Settings::load().map_err(settings_failure)?;
    match cli.command {
        Command::Auth(command) => auth(&settings, command).await,
        Command::Chat(args) => chat(&settings, args).await,
        Command::Completions(args) => completions(&settings, args).await,
        Command::GetAvailableModels(args) => available_models(&settings, args).await,
        Command::Embeddings(args) => embeddings(&settings, args).await,
        Command::Rerank(args) => rerank(&settings, args).await,
        Command::TranscribeAudio(args) => transcribe(&settings, args).await,
        Command::CreateImage(args) => create_image(&settings, args).await,
        Command::Models(command) => models(&settings, command).await,
        Command::Inference(command) => inference(&settings, command).await,
        Command::Ssh(command) => ssh(&settings, command).await,
    }
}

/// Applies per-command flags on top of the loaded configuration.
pub fn inference_config(settings: &Settings, api: &ApiArgs) -> Result<ClientConfig> {
    let mut config = settings.inference.clone();
    if let Some(key) = api.api_key.as_deref().filter(|key| !key.is_empty()) {
        config.api_key = Some(key.to_string());
    }
    if let Some(url) = &api.base_url {
        config = config.with_base_url(url)?;
    }
    if api.no_model_check {
        config.enable_model_checks = false;
    }
    Ok(config)
}

fn inference_client(settings: &Settings, api: &ApiArgs) -> Result<InferenceClient> {
    let config = inference_config(settings, api)?;
    if config.api_key.is_none() {
        bail!("an API key is required: pass --api-key or set API_KEY");
    }
    Ok(InferenceClient::new(config)?)
}

async fn management_client(settings: &Settings) -> Result<ManagementClient> {
    Ok(ManagementClient::connect(&settings.management).await?)
}

fn stdin_lines() -> InputLines {
    BufReader::new(tokio::io::stdin()).lines()
}

async fn prompt_line(lines: &mut InputLines, label: &str) -> Result<Option<String>> {
    print!("{label}");
    std::io::stdout().flush()?;
    Ok(lines.next_line().await?)
}

/// Masked when stdin is a terminal; piped input is read as a plain line.
async fn prompt_secret(lines: &mut InputLines, label: &str) -> Result<Option<String>> {
    if !std::io::stdin().is_terminal() {
        return prompt_line(lines, label).await;
    }
    let label = label.to_string();
    let secret = tokio::task::spawn_blocking(move || read_masked(&label))
        .await
        .context("password prompt was interrupted")??;
    Ok(secret)
}

async fn auth(settings: &Settings, command: AuthCommand) -> Result<()> {
    let client = management_client(settings).await?;
    match command {
        AuthCommand::Login { username, password } => {
            let mut lines = stdin_lines();
            let username = match username {
                Some(username) => username,
                None => prompt_line(&mut lines, "Username: ")
                    .await?
                    .context("no username given")?,
            };
            let password = match password {
                Some(password) => password,
                None => prompt_secret(&mut lines, "Password: ")
                    .await?
                    .context("no password given")?,
            };
            client.login(username.trim(), password.trim_end()).await?;
            println!("Login successful");
        }
        AuthCommand::Logout => {
            client.logout().await?;
            println!("Logged out");
        }
    }
    Ok(())
}

async fn chat(settings: &Settings, args: ChatArgs) -> Result<()> {
    let client = inference_client(settings, &args.api)?;
    let mut lines = stdin_lines();
    let model = match args.model.clone() {
        Some(model) => model,
        None => choose_chat_model(&client, &mut lines).await?,
    };

    let conversation = match &args.load_conversation {
        Some(path) => Conversation::load_from(path)
            .await
            .with_context(|| format!("failed to load conversation from {}", path.display()))?,
        None => Conversation::new(),
    };
    let mut session = ChatSession::with_conversation(client, conversation);
    session.change_model(&model).await?;

    println!("You can now chat with {model}, write \"/bye\" to exit\n");
    let mut renderer = ChatRenderer::new(args.disable_newlines);
    let mut stdout = std::io::stdout();

    while let Some(line) = prompt_line(&mut lines, "user: ").await? {
        let input = line.trim();
        if input == "/bye" {
            break;
        }
        if input.is_empty() {
            continue;
        }

        let options = ChatOptions {
            max_tokens: args.max_tokens,
            ..session.options()
        };
        let mut events = session.run_chat_streaming(Some(input), options).await?;
        renderer.reset();
        while let Some(event) = events.next().await {
            match event {
                Ok(DecodedEvent::Projected(Some(delta))) => {
                    write!(stdout, "{}", renderer.render(&delta))?;
                    stdout.flush()?;
                }
                Ok(_) => {}
                Err(err) => {
                    eprintln!("\n{}", err.user_message());
                    break;
                }
            }
        }
        writeln!(stdout, "\n")?;
    }

    if let Some(path) = &args.save_conversation {
        session.conversation().save_to(path).await?;
        println!("Conversation saved to {}", path.display());
    }
    Ok(())
}

async fn choose_chat_model(client: &InferenceClient, lines: &mut InputLines) -> Result<String> {
    let models: Vec<String> = client
        .catalog()
        .model_info()
        .await?
        .into_iter()
        .filter(|info| info.model_info.mode == "chat")
        .map(|info| info.model_name)
        .collect();
    if models.is_empty() {
        bail!("No models available with your API key.");
    }
    for (index, name) in models.iter().enumerate() {
        println!("{:>3}) {name}", index + 1);
    }
    loop {
        let Some(answer) = prompt_line(lines, "Select the model to use: ").await? else {
            bail!("no model selected");
        };
        let picked = answer
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|choice| choice.checked_sub(1))
            .and_then(|index| models.get(index));
        match picked {
            Some(name) => return Ok(name.clone()),
            None => println!("Enter a number between 1 and {}", models.len()),
        }
    }
}

async fn completions(settings: &Settings, args: CompletionsArgs) -> Result<()> {
    let client = inference_client(settings, &args.api)?;
    let options = CompletionOptions {
        model: args.model,
        max_tokens: args.max_tokens,
        temperature: args.temperature,
        full_output: args.full_output,
        ..CompletionOptions::default()
    };
    if args.stream {
        let mut events = client.completions_stream(&args.prompt, &options).await?;
        let mut stdout = std::io::stdout();
        while let Some(event) = events.next().await {
            match event? {
                DecodedEvent::Projected(text) => write!(stdout, "{text}")?,
                DecodedEvent::Raw(value) => writeln!(stdout, "{value}")?,
            }
            stdout.flush()?;
        }
        writeln!(stdout)?;
        return Ok(());
    }
    match client.completions(&args.prompt, &options).await? {
        Reply::Projected(text) => println!("{text}"),
        Reply::Full(body) => println!("{}", pretty_json(&body)),
    }
    Ok(())
}

async fn available_models(settings: &Settings, args: AvailableModelsArgs) -> Result<()> {
    let config = inference_config(settings, &args.api)?;
    let client = InferenceClient::new(config)?;
    if args.model_info {
        let info = client.catalog().model_info().await?;
        println!("{}", pretty_json(&serde_json::to_value(info)?));
    } else {
        for name in client.catalog().model_names().await? {
            println!("{name}");
        }
    }
    Ok(())
}

async fn embeddings(settings: &Settings, args: EmbeddingsArgs) -> Result<()> {
    let client = inference_client(settings, &args.api)?;
    let mut inputs = args.inputs;
    let input = if inputs.len() == 1 {
        EmbeddingInput::Single(inputs.remove(0))
    } else {
        EmbeddingInput::Batch(inputs)
    };
    let options = EmbeddingOptions {
        model: args.model,
        full_output: args.full_output,
    };
    print_reply(client.embeddings(&input, &options).await?);
    Ok(())
}

async fn rerank(settings: &Settings, args: RerankArgs) -> Result<()> {
    let client = inference_client(settings, &args.api)?;
    let documents: Vec<Value> = args.documents.into_iter().map(Value::String).collect();
    let options = RerankOptions {
        model: args.model,
        top_n: args.top_n,
        full_output: args.full_output,
        ..RerankOptions::default()
    };
    let reply = client.rerank(&args.query, &documents, &options).await?;
    print_reply(match reply {
        Reply::Projected(results) => Reply::Projected(Value::Array(results)),
        Reply::Full(body) => Reply::Full(body),
    });
    Ok(())
}

fn print_reply(reply: Reply<Value>) {
    match reply {
        Reply::Projected(value) | Reply::Full(value) => println!("{}", pretty_json(&value)),
    }
}

async fn transcribe(settings: &Settings, args: TranscribeArgs) -> Result<()> {
    let client = inference_client(settings, &args.api)?;
    let options = TranscriptionOptions {
        model: args.model,
        response_format: args.response_format,
        language: args.language,
        prompt: args.prompt,
        temperature: args.temperature,
        chunking_strategy: args.chunking_strategy.as_deref().map(parse_chunking_strategy),
        include: args.include,
        timestamp_granularities: args.timestamp_granularities,
        full_output: args.full_output,
    };
    let source = AudioSource::Path(args.file_path.clone());

    let text = if args.stream {
        let mut events = client.audio_transcription_stream(source, &options).await?;
        let mut collected = String::new();
        let mut stdout = std::io::stdout();
        while let Some(event) = events.next().await {
            let fragment = match event? {
                DecodedEvent::Projected(text) => text,
                DecodedEvent::Raw(value) => format!("{value}\n"),
            };
            if args.save_path.is_none() {
                write!(stdout, "{fragment}")?;
                stdout.flush()?;
            }
            collected.push_str(&fragment);
        }
        collected
    } else {
        match client.audio_transcription(source, &options).await? {
            Reply::Projected(text) => text,
            Reply::Full(body) => pretty_json(&body),
        }
    };

    match &args.save_path {
        Some(path) => {
            write_output(path, text.as_bytes()).await?;
            println!("Transcription saved to {}", path.display());
        }
        None if !args.stream => println!("{text}"),
        None => println!(),
    }
    Ok(())
}

async fn create_image(settings: &Settings, args: CreateImageArgs) -> Result<()> {
    let client = inference_client(settings, &args.api)?;
    let dir = match args.save_path {
        Some(dir) => dir,
        None => std::env::current_dir()?.join("images"),
    };
    tokio::fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("failed to create {}", dir.display()))?;

    let options = ImageOptions {
        model: args.model,
        n: args.n,
        quality: args.quality,
        size: args.size,
        style: args.style,
        full_output: false,
    };
    let images = client
        .create_image(&args.prompt, &options)
        .await?
        .projected()
        .unwrap_or_default();
    for image in images {
        let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S").to_string();
        let path = unique_image_path(&dir, &stamp, &args.output_file_format);
        write_output(&path, &image).await?;
        println!("Saved: {}", path.display());
    }
    Ok(())
}

async fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    tokio::fs::write(path, bytes)
        .await
        .with_context(|| format!("failed to write {}", path.display()))
}

async fn models(settings: &Settings, command: ModelsCommand) -> Result<()> {
    let client = management_client(settings).await?;
    let body = match command {
        ModelsCommand::List => client.models().await?,
        ModelsCommand::Details { model_name } => client.model(&model_name).await?,
        ModelsCommand::Register {
            name,
            provider,
            url,
            api_key,
            force,
        } => {
            let request = RegisterModel {
                name,
                provider,
                url,
                api_key,
                force,
            };
            client.register_model(&request).await?
        }
        ModelsCommand::Delete { model_name } => {
            client.delete_model(&model_name).await?;
            println!("Model {model_name} deleted");
            return Ok(());
        }
    };
    println!("{}", pretty_json(&body));
    Ok(())
}

async fn inference(settings: &Settings, command: InferenceCommand) -> Result<()> {
    let client = management_client(settings).await?;
    let body = match command {
        InferenceCommand::Gpus => client.gpus().await?,
        InferenceCommand::Status => client.loaded_models().await?,
        InferenceCommand::UserStatus {
            month,
            time_range_start,
            time_range_end,
        } => {
            let query = StatusQuery {
                month,
                time_range_start,
                time_range_end,
            };
            client.user_status(&query).await?
        }
        InferenceCommand::Load {
            model_name,
            gpu,
            force,
            vllm_config,
        } => {
            let request = LoadModel {
                model_name,
                gpu,
                force,
                vllm_config: vllm_config.as_deref().map(parse_vllm_config).transpose()?,
            };
            client.load_model(&request).await?
        }
        InferenceCommand::Unload { session_id } => client.unload_model(session_id).await?,
    };
    println!("{}", pretty_json(&body));
    Ok(())
}

pub fn parse_vllm_config(raw: &str) -> Result<Map<String, Value>> {
    serde_json::from_str(raw).context("--vllm-config must be a JSON object")
}

async fn ssh(settings: &Settings, command: SshCommand) -> Result<()> {
    let client = management_client(settings).await?;
    match command {
        SshCommand::List => println!("{}", pretty_json(&client.ssh_keys().await?)),
        SshCommand::Add { title, key } => {
            let key = resolve_key(&key).await?;
            let body = client.add_ssh_key(&title, &key).await?;
            println!("{}", pretty_json(&body));
        }
        SshCommand::Delete { key_id } => {
            client.delete_ssh_key(&key_id).await?;
            println!("SSH key {key_id} deleted");
        }
    }
    Ok(())
}

/// Reads the key from disk when `key` names an existing file.
async fn resolve_key(key: &str) -> Result<String> {
    let path = PathBuf::from(key);
    if tokio::fs::try_exists(&path).await.unwrap_or(false) {
        debug!(path = %path.display(), "reading public key from file");
        let contents = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        return Ok(contents.trim().to_string());
    }
    Ok(key.trim().to_string())
}

/// A JSON object becomes a custom strategy; anything else is a strategy name.
pub fn parse_chunking_strategy(raw: &str) -> ChunkingStrategy {
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Object(_)) => ChunkingStrategy::Custom(value),
        _ => ChunkingStrategy::Named(raw.to_string()),
    }
}
