use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{load_settings, load_settings_from, ChatClient, SessionEvent, SyncEvent};
use shared::domain::ConversationId;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Logs in, opens a conversation and walks back through its history.
#[derive(Parser, Debug)]
struct Args {
    /// Overrides the configured API base URL.
    #[arg(long)]
    api_url: Option<String>,
    /// Settings file; defaults to `client.toml` in the working directory.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    username: String,
    /// Conversation to open; the first listed conversation when omitted.
    #[arg(long)]
    conversation: Option<String>,
    /// Number of history pages to load.
    #[arg(long, default_value_t = 1)]
    pages: u32,
    /// Text to send once history is loaded.
    #[arg(long)]
    send: Option<String>,
    /// Print messages as JSON lines.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => load_settings_from(path)?,
        None => load_settings(),
    };
    if let Some(api_url) = args.api_url {
        settings.api_url = api_url;
    }

    let client = ChatClient::connect(&settings).context("failed to build api client")?;

    let mut session_events = client.subscribe_session();
    tokio::spawn(async move {
        while let Ok(event) = session_events.recv().await {
            if event == SessionEvent::Expired {
                warn!("session expired; log in again");
            }
        }
    });
    let mut sync_events = client.messages().subscribe();
    tokio::spawn(async move {
        while let Ok(event) = sync_events.recv().await {
            if let SyncEvent::Failed { message } = event {
                warn!("sync failure: {message}");
            }
        }
    });

    let user_id = client.login(&args.username).await?;
    println!("Logged in as {user_id}");

    let conversations = client.conversations().fetch_conversations().await?;
    for conversation in &conversations {
        println!("{}\t{}", conversation.id, conversation.name);
    }
    let conversation_id = match args.conversation {
        Some(id) => ConversationId::from(id),
        None => conversations
            .first()
            .map(|c| c.id.clone())
            .context("no conversations available")?,
    };

    client.open_conversation(&conversation_id).await?;
    for _ in 1..args.pages {
        if !client.messages().cursor().await.has_more {
            break;
        }
        client.load_older().await?;
    }
    let snapshot = client.messages().snapshot().await;
    info!(
        conversation_id = %conversation_id,
        count = snapshot.messages.len(),
        has_more = snapshot.cursor.has_more,
        "history loaded"
    );

    for message in &snapshot.messages {
        if args.json {
            println!("{}", serde_json::to_string(message)?);
        } else {
            let author = message.author.as_ref().map_or("?", |a| a.as_str());
            println!("[{}] {author}: {}", message.id, message.content);
        }
    }

    if let Some(text) = args.send {
        let sent = client.send_text(&text).await?;
        println!("Sent {}", sent.id);
    }

    client.logout().await;
    Ok(())
}
