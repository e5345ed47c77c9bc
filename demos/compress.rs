//! Compress a saved action history.
//!
//! Usage:
//!   OPENAI_API_KEY=sk-... cargo run --example compress -- history.json
//!   cargo run --example compress -- history.json --window 32000 --base-url http://localhost:8000
//!   ANTHROPIC_API_KEY=sk-... cargo run --example compress -- history.json --provider anthropic --model claude-3-5-haiku-latest
//!
//! The input file holds a JSON array of action records. The compressed
//! list is printed to stdout, token counts to stderr.

use std::path::PathBuf;
use std::sync::Arc;

use action_compressor::{
    ActionCompressor, ActionRecord, AnthropicProvider, CompressionEvent, CompressorConfig,
    InferenceProvider, OpenAiProvider,
};
use clap::Parser;

#[derive(Parser)]
#[command(name = "compress", about = "Compress an agent action history to fit a context window")]
struct Cli {
    /// JSON file with an array of action records
    input: PathBuf,

    /// Provider: "openai" or "anthropic"
    #[arg(long, default_value = "openai")]
    provider: String,

    /// Model used for summarization
    #[arg(long)]
    model: Option<String>,

    /// Context window of the model the history is for
    #[arg(long, default_value_t = 128_000)]
    window: usize,

    /// Agent's current reasoning, passed to every summarization call
    #[arg(long)]
    thinking: Option<String>,

    /// Current task description
    #[arg(long)]
    task: Option<String>,

    /// JSON config file (partial; missing keys use defaults)
    #[arg(long)]
    config: Option<PathBuf>,

    /// API base URL (defaults depend on provider)
    #[arg(long)]
    base_url: Option<String>,
}

fn build_provider(cli: &Cli) -> Arc<dyn InferenceProvider> {
    match cli.provider.as_str() {
        "anthropic" => {
            let api_key = std::env::var("ANTHROPIC_API_KEY").unwrap_or_else(|_| {
                eprintln!("error: ANTHROPIC_API_KEY not set");
                std::process::exit(1);
            });
            let mut p = AnthropicProvider::new(&api_key);
            if let Some(ref url) = cli.base_url {
                p = p.with_base_url(url);
            }
            Arc::new(p)
        }
        "openai" => {
            let base = cli
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".into());
            let mut p = OpenAiProvider::new(base);
            if let Ok(key) = std::env::var("OPENAI_API_KEY") {
                p = p.with_api_key(key);
            }
            Arc::new(p)
        }
        other => {
            eprintln!("error: unknown provider '{other}'. Use 'openai' or 'anthropic'.");
            std::process::exit(1);
        }
    }
}

fn fail(message: String) -> ! {
    eprintln!("error: {message}");
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match cli.config {
        Some(ref path) => CompressorConfig::from_json_file(path)
            .unwrap_or_else(|e| fail(format!("{}: {e}", path.display()))),
        None => CompressorConfig::default(),
    };
    if let Some(ref model) = cli.model {
        config = config.with_model(model);
    }

    let raw = std::fs::read_to_string(&cli.input)
        .unwrap_or_else(|e| fail(format!("{}: {e}", cli.input.display())));
    let actions: Vec<ActionRecord> = serde_json::from_str(&raw)
        .unwrap_or_else(|e| fail(format!("{}: {e}", cli.input.display())));

    let (tx, mut rx) = tokio::sync::mpsc::channel::<CompressionEvent>(64);
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                CompressionEvent::Skipped { tokens, limit } => {
                    eprintln!("fits: {tokens} tokens <= limit {limit}");
                }
                CompressionEvent::HistorySummarized { count, method, tokens } => {
                    eprintln!("summarized {count} actions ({method}, {tokens} tokens)");
                }
                CompressionEvent::FieldCompressed {
                    field,
                    original_tokens,
                    compressed_tokens,
                } => {
                    eprintln!("{field}: {original_tokens} -> {compressed_tokens} tokens");
                }
                CompressionEvent::Fallback { stage, reason } => {
                    eprintln!("fallback in {stage}: {reason}");
                }
                CompressionEvent::Finished {
                    pre_tokens,
                    post_tokens,
                } => {
                    eprintln!("done: {pre_tokens} -> {post_tokens} tokens");
                }
            }
        }
    });

    let compressor = ActionCompressor::new(build_provider(&cli), config)
        .unwrap_or_else(|e| fail(e.to_string()))
        .with_events(tx);

    let compressed = compressor
        .compress_if_needed(
            &actions,
            cli.window,
            cli.thinking.as_deref(),
            cli.task.as_deref(),
        )
        .await
        .unwrap_or_else(|e| fail(e.to_string()));

    drop(compressor);
    let _ = printer.await;

    match serde_json::to_string_pretty(&compressed) {
        Ok(json) => println!("{json}"),
        Err(e) => fail(e.to_string()),
    }
}
