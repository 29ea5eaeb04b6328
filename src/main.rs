//! Grounded Chat command-line front end
//!
//! ## Commands
//!
//! - `chat`: interactive conversation (`/pin`, `/history`, `/pinned`, `/quit`)
//! - `ask`: run one turn, optionally printing the internal trace
//! - `fetch`: resolve a URL or repository link without the pipeline
//! - `search`: resolve a free-text search without the pipeline
//! - `history`, `pinned`: browse the conversation memory

use std::future::Future;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use grounded_chat::services::pipeline::{Pipeline, PipelineError, PipelineTurn};
use grounded_chat::telemetry::init_tracing;
use grounded_chat::AppState;
use grounded_chat_core::{ContextStore, TurnRecord};
use grounded_chat_retrieval::{RepoRef, RetrievalRequest, RetrievalResult};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "grounded-chat")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Conversational agent with web and repository grounding", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Config file (default: ~/.grounded-chat/config.json)
    #[arg(long, global = true, env = "GROUNDED_CHAT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive conversation
    Chat,

    /// Run a single turn
    Ask {
        /// The message
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,

        /// Print the internal trace as JSON after the reply
        #[arg(long)]
        trace: bool,
    },

    /// Fetch a URL or repository link
    Fetch {
        url: String,
    },

    /// Search the web
    Search {
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
    },

    /// Show recent conversation turns
    History {
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show pinned insights
    Pinned,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.json, if cli.verbose { "debug" } else { "warn" });

    let state = AppState::initialize(cli.config.clone()).context("Failed to initialize")?;

    match cli.command {
        Commands::Chat => chat(&state).await,
        Commands::Ask { text, trace } => {
            let pipeline = state.pipeline().context("Failed to build pipeline")?;
            let input = text.join(" ");
            match run_cancellable(&pipeline, &input).await {
                Ok(turn) => {
                    println!("{}", turn.final_response);
                    if trace {
                        print_trace(&turn)?;
                    }
                    Ok(())
                }
                Err(PipelineError::Cancelled) => {
                    eprintln!("cancelled");
                    Ok(())
                }
            }
        }
        Commands::Fetch { url } => {
            let hosts = &state.config().retrieval.repository_hosts;
            let request = if RepoRef::parse(&url, hosts).is_some() {
                RetrievalRequest::repo_ref(url)
            } else {
                RetrievalRequest::url(url)
            };
            resolve_and_print(&state, request).await
        }
        Commands::Search { query } => {
            resolve_and_print(&state, RetrievalRequest::search(query.join(" "))).await
        }
        Commands::History { limit } => {
            let turns = state.database().recent_turns(limit).context("Failed to read history")?;
            print_records(&turns, "(no history)");
            Ok(())
        }
        Commands::Pinned => {
            let pinned = state.database().pinned_insights().context("Failed to read pinned insights")?;
            print_records(&pinned, "(none pinned)");
            Ok(())
        }
    }
}

/// Run one turn; Ctrl-C cancels it.
async fn run_cancellable(pipeline: &Pipeline, input: &str) -> Result<PipelineTurn, PipelineError> {
    let cancel = CancellationToken::new();
    let guard = cancel.clone();
    let watcher = tokio::spawn(async move {
        ctrl_c().await;
        guard.cancel();
    });
    let outcome = pipeline.run_turn(input, &cancel).await;
    watcher.abort();
    outcome
}

/// Next input line, or `None` at end of input or once `interrupt` resolves.
async fn next_input<R, F>(lines: &mut Lines<R>, interrupt: F) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
    F: Future<Output = ()>,
{
    tokio::select! {
        line = lines.next_line() => line.context("Failed to read input"),
        _ = interrupt => Ok(None),
    }
}

/// Resolves on Ctrl-C; never resolves if the handler can't be installed.
async fn ctrl_c() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn chat(state: &AppState) -> Result<()> {
    let pipeline = state.pipeline().context("Failed to build pipeline")?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("Grounded Chat. Commands: /pin, /history, /pinned, /quit");
    loop {
        print!("> ");
        std::io::stdout().flush().ok();
        // Ctrl-C at the prompt leaves; during a turn it only cancels the turn
        let Some(line) = next_input(&mut lines, ctrl_c()).await? else {
            println!();
            break;
        };
        let input = line.trim();
        match input {
            "" => continue,
            "/quit" | "/exit" => break,
            "/pin" => match state.database().pin_latest().context("Failed to pin")? {
                Some(id) => println!("pinned #{id}"),
                None => println!("nothing to pin yet"),
            },
            "/history" => {
                let turns = state
                    .database()
                    .recent_turns(state.config().pipeline.recent_turns)
                    .context("Failed to read history")?;
                print_records(&turns, "(no history)");
            }
            "/pinned" => {
                let pinned = state.database().pinned_insights().context("Failed to read pinned insights")?;
                print_records(&pinned, "(none pinned)");
            }
            _ => match run_cancellable(&pipeline, input).await {
                Ok(turn) => println!("{}\n", turn.final_response),
                Err(PipelineError::Cancelled) => println!("(cancelled)\n"),
            },
        }
    }
    Ok(())
}

async fn resolve_and_print(state: &AppState, request: RetrievalRequest) -> Result<()> {
    let request = request.with_max_result_bytes(state.config().retrieval.max_result_chars);
    let cancel = CancellationToken::new();
    let guard = cancel.clone();
    let watcher = tokio::spawn(async move {
        ctrl_c().await;
        guard.cancel();
    });
    let (result, log) = state.coordinator().resolve_traced(&request, &cancel).await;
    watcher.abort();

    print_result(&result);
    tracing::debug!(attempts = log.attempts.len(), total_ms = log.total_duration_ms, "resolve finished");
    Ok(())
}

fn print_result(result: &RetrievalResult) {
    if result.success {
        for (key, value) in &result.metadata {
            println!("{key}: {value}");
        }
        println!("\n{}", result.content);
    } else {
        eprintln!(
            "retrieval failed via {} ({}): {}",
            result.source_strategy,
            result
                .error_kind
                .map(|k| k.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            result.error_message.as_deref().unwrap_or("")
        );
    }
}

fn print_records(records: &[TurnRecord], empty: &str) {
    if records.is_empty() {
        println!("{empty}");
    }
    for record in records {
        let marker = if record.pinned { "*" } else { " " };
        println!("{marker} {}", record.context_line());
    }
}

fn print_trace(turn: &PipelineTurn) -> Result<()> {
    let json = serde_json::to_string_pretty(&turn.trace).context("Failed to serialize trace")?;
    println!("\n{json}");
    Ok(())
}
