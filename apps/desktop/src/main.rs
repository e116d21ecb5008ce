use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    composer::AttachmentFile,
    config::{load_settings, load_settings_file},
    ChatEngine, EngineEvent,
};
use shared::domain::{ConversationId, UserId};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod local;

use local::{ConversationDump, LocalProtocol};

#[derive(Parser, Debug)]
struct Cli {
    /// Settings file; defaults to `client.toml` when present.
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the display list computed for a JSON conversation dump.
    Render { dump: PathBuf },
    /// Run a file through the upload pipeline against a local content store.
    Upload {
        file: PathBuf,
        #[arg(long)]
        message: Option<String>,
        #[arg(long)]
        encrypted: bool,
        #[arg(long, default_value = "!local:localhost")]
        conversation: String,
        #[arg(long, default_value = "@me:localhost")]
        user: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    let settings = match &cli.config {
        Some(path) => load_settings_file(path)?,
        None => load_settings()?,
    };

    match cli.command {
        Command::Render { dump } => {
            let raw = std::fs::read_to_string(&dump)
                .with_context(|| format!("failed to read {}", dump.display()))?;
            let dump: ConversationDump = serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse {}", dump.display()))?;
            let conversation = dump.summary.conversation_id.clone();

            let engine = ChatEngine::new(
                std::sync::Arc::new(LocalProtocol::from_dump(dump)),
                settings,
            );
            engine.open_conversation(&conversation).await?;
            engine.report_viewport_scrollable(&conversation, true).await?;
            let outcome = engine.request_older(&conversation).await?;
            info!(?outcome, "render: history loaded");

            let items = engine.display_items(&conversation).await?;
            println!("{}", serde_json::to_string_pretty(&items)?);
        }
        Command::Upload {
            file,
            message,
            encrypted,
            conversation,
            user,
        } => {
            let data = std::fs::read(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let name = file
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "upload".to_string());
            let conversation = ConversationId::new(conversation);
            let protocol = std::sync::Arc::new(LocalProtocol::empty(
                conversation.clone(),
                UserId::new(user),
                encrypted,
            ));

            let engine = ChatEngine::new(protocol.clone(), settings);
            engine.open_conversation(&conversation).await?;
            let mut events = engine.subscribe_events();
            let watcher = tokio::spawn(async move {
                while let Ok(event) = events.recv().await {
                    match event {
                        EngineEvent::UploadProgress { loaded, total, .. } => {
                            info!(loaded, total, "upload: progress");
                        }
                        EngineEvent::MessageSent { .. } => break,
                        other => info!(event = ?other, "engine event"),
                    }
                }
            });

            if let Some(message) = message {
                engine.set_message(&conversation, message).await;
            }
            engine
                .set_attachment(&conversation, AttachmentFile::new(name, data))
                .await;
            let report = engine.send(&conversation).await;
            watcher.abort();

            if let Some(upload) = &report.upload {
                info!(state = ?upload.final_state, visited = ?upload.visited, "upload: finished");
                if let Some(err) = &upload.error {
                    eprintln!("attachment not sent: {err}");
                }
            }
            for content in protocol.sent().await {
                println!("{}", serde_json::to_string_pretty(&content)?);
            }
        }
    }

    Ok(())
}
