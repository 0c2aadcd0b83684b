use clap::{Parser, Subcommand};
use colloquy_agent::{
    estimate_tool_definitions_tokens, ContextConfig, LlmBackend, MessageHistory, ModelConfig,
    StreamAccumulator, StreamingClient,
};
use colloquy_core::Message;
use colloquy_session::{load_messages, save_messages, SessionFormat};
use futures_util::StreamExt;
use serde::Deserialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const API_KEY_ENV: &str = "COLLOQUY_API_KEY";

#[derive(Parser)]
#[command(name = "colloquy", about = "Colloquy: conversation context engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "colloquy.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show message, round and token counts of a session file
    Stats {
        /// Session file (JSON or JSONL)
        session: PathBuf,
    },
    /// Summarize old history with the model
    Compact {
        /// Session file (JSON or JSONL)
        session: PathBuf,
        /// Summarize the first N rounds
        #[arg(long, conflicts_with = "messages")]
        rounds: Option<usize>,
        /// Summarize the first N messages
        #[arg(long)]
        messages: Option<usize>,
        /// Write the result here instead of back into the session file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Replace the content of large tool results with placeholders
    Prune {
        /// Session file (JSON or JSONL)
        session: PathBuf,
        /// Share of large tool results to prune, oldest first
        #[arg(short, long, default_value_t = 50)]
        percent: u32,
        /// Write the result here instead of back into the session file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Send a user message and append the model's reply
    Ask {
        /// Session file (JSON or JSONL); created if missing
        session: PathBuf,
        /// The user message
        prompt: String,
        /// Request a single JSON reply instead of an SSE stream
        #[arg(long)]
        no_stream: bool,
    },
}

#[derive(Debug, Deserialize)]
struct ColloquyConfig {
    #[serde(default = "default_model")]
    model: ModelConfig,
    #[serde(default)]
    context: ContextConfig,
}

impl Default for ColloquyConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            context: ContextConfig::default(),
        }
    }
}

fn default_model() -> ModelConfig {
    ModelConfig::new("gpt-4o-mini")
}

impl ColloquyConfig {
    fn parse(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// A non-empty key from the environment replaces the configured one.
    fn apply_api_key(&mut self, key: Option<String>) {
        if let Some(key) = key.filter(|k| !k.trim().is_empty()) {
            self.model.api_key = Some(key);
        }
    }
}

async fn load_config(path: &Path) -> anyhow::Result<ColloquyConfig> {
    let mut config = match tokio::fs::read_to_string(path).await {
        Ok(text) => ColloquyConfig::parse(&text).map_err(|e| {
            anyhow::anyhow!("Failed to parse config file '{}': {}", path.display(), e)
        })?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "No config file, using defaults");
            ColloquyConfig::default()
        }
        Err(e) => {
            return Err(anyhow::anyhow!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        }
    };
    config.apply_api_key(std::env::var(API_KEY_ENV).ok());
    Ok(config)
}

/// Messages of `path`, or an empty conversation when `allow_missing` and it does not exist.
async fn read_session(path: &Path, allow_missing: bool) -> anyhow::Result<Vec<Message>> {
    if allow_missing && !tokio::fs::try_exists(path).await? {
        return Ok(Vec::new());
    }
    load_messages(path).await.map_err(|e| {
        anyhow::anyhow!("Failed to load session '{}': {}", path.display(), e)
    })
}

async fn write_session(path: &Path, messages: &[Message]) -> anyhow::Result<()> {
    save_messages(path, messages, SessionFormat::from_path(path)).await?;
    info!(path = %path.display(), messages = messages.len(), "Session written");
    Ok(())
}

fn open_history(
    config: &ColloquyConfig,
    messages: Vec<Message>,
) -> anyhow::Result<(MessageHistory, Arc<StreamingClient>)> {
    let client = Arc::new(StreamingClient::new(config.model.clone())?);
    let backend: Arc<dyn LlmBackend> = client.clone();
    let mut history = MessageHistory::new(config.context.clone(), backend);
    history.set_messages(messages);
    history.set_tool_definitions_tokens(estimate_tool_definitions_tokens(
        &client.tool_definitions(),
    ));
    Ok((history, client))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config).await?;

    match cli.command {
        Commands::Stats { session } => {
            let (mut history, _) = open_history(&config, read_session(&session, false).await?)?;
            let tokens = history.estimate_context();
            let summaries = history.messages().iter().filter(|m| m.is_summary()).count();
            let threshold = config.context.auto_compact_threshold();
            println!("messages:   {}", history.message_count());
            println!("rounds:     {}", history.round_count());
            println!("summaries:  {summaries}");
            if config.context.auto_compact_enabled() {
                let due = if history.should_auto_compact() { "yes" } else { "no" };
                println!("tokens:     {tokens} (threshold {threshold}, compaction due: {due})");
            } else {
                println!("tokens:     {tokens} (auto-compaction disabled)");
            }
        }
        Commands::Compact {
            session,
            rounds,
            messages,
            output,
        } => {
            let (mut history, _) = open_history(&config, read_session(&session, false).await?)?;
            let report = match (rounds, messages) {
                (Some(n), _) => history.force_compact_rounds(n).await?,
                (None, Some(n)) => history.force_compact_messages(n).await?,
                (None, None) => history.compact_memory().await?,
            };
            if report.summarized {
                write_session(output.as_deref().unwrap_or(&session), history.messages()).await?;
                println!(
                    "Compacted {} -> {} messages, ~{} -> ~{} tokens",
                    report.messages_before,
                    report.messages_after,
                    report.tokens_before,
                    report.tokens_after
                );
            } else {
                println!("Nothing to compact.");
            }
        }
        Commands::Prune {
            session,
            percent,
            output,
        } => {
            let (mut history, _) = open_history(&config, read_session(&session, false).await?)?;
            let report = history.prune_tool_results_by_percentage(percent);
            if report.pruned_count > 0 {
                write_session(output.as_deref().unwrap_or(&session), history.messages()).await?;
            }
            println!(
                "Pruned {} tool result(s), saved {} bytes, {} small result(s) kept",
                report.pruned_count, report.saved_bytes, report.protected_count
            );
        }
        Commands::Ask {
            session,
            prompt,
            no_stream,
        } => {
            let (mut history, client) =
                open_history(&config, read_session(&session, true).await?)?;
            history.add_user_message(prompt);
            if history.should_auto_compact() {
                let report = history.compact_memory().await?;
                info!(
                    messages_after = report.messages_after,
                    tokens_after = report.tokens_after,
                    "Auto-compacted before sending"
                );
            }

            let mut stream = client.stream_request(history.messages(), !no_stream, true);
            let mut reply = StreamAccumulator::new();
            let mut stdout = std::io::stdout();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                if let Some(text) = chunk.content() {
                    write!(stdout, "{text}")?;
                    stdout.flush()?;
                }
                reply.push(&chunk);
            }
            writeln!(stdout)?;

            let message = reply.into_message();
            for call in message.tool_calls() {
                println!("[tool call] {}({})", call.function.name, call.function.arguments);
            }
            history.push(message);
            write_session(&session, history.messages()).await?;

            let stats = client.stats();
            info!(
                requests = stats.requests,
                errors = stats.errors,
                elapsed_ms = stats.last_elapsed_ms,
                "Request finished"
            );
        }
    }

    Ok(())
}
