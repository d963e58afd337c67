//! Trove CLI
//!
//! Command-line driver for the Trove client core: runs a publishing session
//! against a live control plane (with the mock reconstruction engine), or
//! joins a chat room over the realtime channel.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;
use trove_api::{ApiClient, ChatMessageResponse, MemoryTokenStore, RequestOptions,
    SendMessageRequest, TokenPair};
use trove_publish::{ListingDraft, MockEngine, PublishingOrchestrator, Stage};
use trove_realtime::{ChannelState, RealtimeChannel, RealtimeConfig};

/// Default control-plane base URL.
const DEFAULT_API_URL: &str = "http://127.0.0.1:8000/v1";

/// Default realtime base URL.
const DEFAULT_WS_URL: &str = "ws://127.0.0.1:8000/v1";

/// Trove - marketplace client core driver
#[derive(Parser, Debug)]
#[command(name = "trove")]
#[command(version, about, long_about = None)]
struct Args {
    /// Control-plane base URL, including the version prefix
    #[arg(long, default_value = DEFAULT_API_URL, global = true)]
    api_url: String,

    /// Access token for the session
    #[arg(long, global = true)]
    access_token: Option<String>,

    /// Refresh token for the session
    #[arg(long, global = true)]
    refresh_token: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a full publishing session with the mock reconstruction engine
    Publish {
        /// Listing title
        #[arg(long)]
        title: String,

        /// Asking price in cents
        #[arg(long)]
        price_cents: i64,

        /// Optional listing description
        #[arg(long)]
        description: Option<String>,

        /// Optional thumbnail image to upload alongside the model
        #[arg(long)]
        thumbnail: Option<PathBuf>,
    },
    /// Join a chat room over the realtime channel
    Chat {
        /// Room to join
        #[arg(value_name = "ROOM_ID")]
        room_id: String,

        /// Realtime base URL, including the version prefix
        #[arg(long, default_value = DEFAULT_WS_URL)]
        ws_url: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let store = match args.access_token.clone() {
        Some(access_token) => MemoryTokenStore::with_tokens(TokenPair {
            access_token,
            refresh_token: args.refresh_token.clone(),
        }),
        None => MemoryTokenStore::new(),
    };
    let api = Arc::new(ApiClient::new(args.api_url.clone(), Arc::new(store)));

    match args.command {
        Command::Publish {
            title,
            price_cents,
            description,
            thumbnail,
        } => {
            run_publish(
                api,
                ListingDraft {
                    title,
                    description,
                    price_cents,
                    thumbnail_path: thumbnail,
                },
            )
            .await
        }
        Command::Chat { room_id, ws_url } => {
            let token = args
                .access_token
                .ok_or_else(|| anyhow::anyhow!("chat requires --access-token"))?;
            run_chat(api, &ws_url, &room_id, &token).await
        }
    }
}

/// Drives one publishing session to a terminal state, printing stage
/// transitions and progress as they happen.
async fn run_publish(api: Arc<ApiClient>, listing: ListingDraft) -> anyhow::Result<()> {
    let orchestrator = Arc::new(PublishingOrchestrator::new(
        api,
        Arc::new(MockEngine::new()),
    ));
    orchestrator.set_listing(listing).await;

    // Print live session updates in the background.
    let mut updates = orchestrator.updates();
    let printer = tokio::spawn(async move {
        let mut last_stage = None;
        while let Ok(update) = updates.recv().await {
            if last_stage != Some(update.stage) {
                println!();
                println!("=== {} ===", update.stage.name());
                last_stage = Some(update.stage);
            }
            println!("  [{:>5.1}%] {}", update.progress * 100.0, update.status_text);
        }
    });

    println!("Starting publishing session...");
    let result = orchestrator.start().await;
    printer.abort();

    match result {
        Ok(()) => {
            let session = orchestrator.session().await;
            println!();
            println!("Listing published");
            if let Some(asset_id) = session.uploaded_asset_id {
                println!("  Asset: {asset_id}");
            }
            Ok(())
        }
        Err(err) => {
            let session = orchestrator.session().await;
            println!();
            println!("Session ended in {}: {err}", session.stage.name());
            if session.stage == (Stage::Uploading { errored: true }) && err.is_retryable() {
                println!("  The upload can be retried in place with the same session.");
            }
            Err(err.into())
        }
    }
}

/// Joins a chat room: prints incoming messages, sends stdin lines over the
/// socket, and falls back to REST when the channel is not connected.
async fn run_chat(
    api: Arc<ApiClient>,
    ws_url: &str,
    room_id: &str,
    token: &str,
) -> anyhow::Result<()> {
    let channel = RealtimeChannel::new(RealtimeConfig::new(ws_url));
    let mut messages = channel.subscribe();
    let mut state = channel.state();
    channel.connect(room_id, token);

    // Backfill history the socket will not replay.
    let history: trove_api::ChatMessageListResponse = api
        .get(
            &format!("/chat-rooms/{room_id}/messages"),
            RequestOptions::authed(),
        )
        .await?;
    for message in history.messages {
        print_message(&message.sender_id, &message.body);
    }

    println!("Joined room {room_id}. Type a message and press Enter; Ctrl+C to leave.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            Ok(()) = tokio::signal::ctrl_c() => {
                println!("Leaving room");
                channel.disconnect();
                return Ok(());
            }
            changed = state.changed() => {
                if changed.is_ok() {
                    let current = *state.borrow();
                    tracing::info!(state = ?current, "channel state changed");
                    if current == ChannelState::Disconnected {
                        println!("Realtime channel gave up; messages now go over REST only.");
                    }
                }
            }
            message = messages.recv() => {
                if let Ok(envelope) = message {
                    if envelope.kind == "message" {
                        print_message(
                            envelope.sender_id.as_deref().unwrap_or("?"),
                            &envelope.body,
                        );
                    }
                }
            }
            line = lines.next_line() => {
                let Ok(Some(line)) = line else { return Ok(()) };
                if line.trim().is_empty() {
                    continue;
                }
                if !channel.send(&line) {
                    // Socket down; persist through the REST endpoint instead.
                    let sent: ChatMessageResponse = api
                        .post(
                            &format!("/chat-rooms/{room_id}/messages"),
                            &SendMessageRequest { body: line },
                            RequestOptions::authed(),
                        )
                        .await?;
                    tracing::debug!(id = %sent.id, "message sent over REST fallback");
                }
            }
        }
    }
}

fn print_message(sender: &str, body: &str) {
    println!("  <{sender}> {body}");
}
