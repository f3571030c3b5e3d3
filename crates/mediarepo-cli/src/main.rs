//! mediarepo: operator CLI for a media repository deployment.
//!
//! Reads the same environment as the server (DATABASE_URL, DATASTORES, ...).
//! Logs go to stderr; command output goes to stdout.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use mediarepo_cli::{human_size, init_tracing};
use mediarepo_core::Config;
use mediarepo_db::{setup_database, MediaStore, PgMediaStore};
use mediarepo_services::{
    AppState, Disposition, DownloadRequest, DownloadResponse, DownloadService, UploadRequest,
    UploadService,
};
use tokio::io::AsyncWriteExt;

#[derive(Parser)]
#[command(name = "mediarepo", about = "Media repository operator CLI")]
struct Cli {
    /// Server name media ids are allocated under
    #[arg(long, global = true, default_value = "localhost")]
    origin: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the configured datastores without touching them
    Datastores,
    /// Reserve a media id for a later (possibly delegated) upload
    Reserve {
        /// Uploading user id
        #[arg(long, default_value = "")]
        user: String,
        /// Room the media is intended for
        #[arg(long)]
        room: Option<String>,
    },
    /// Upload a local file
    Upload {
        /// Path to the file to upload
        file: PathBuf,
        #[arg(long, default_value = "")]
        user: String,
        /// Upload into a reserved id
        #[arg(long)]
        media_id: Option<String>,
        #[arg(long)]
        content_type: Option<String>,
        /// Room the media is being posted to
        #[arg(long)]
        room: Option<String>,
    },
    /// Finalize a delegated upload
    Complete { media_id: String },
    /// Record that a room uses existing media
    Reference { media_id: String, room: String },
    /// Download media, waiting for a pending upload if needed
    Download {
        media_id: String,
        /// Write to this file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// Maximum wait for a pending upload, in milliseconds
        #[arg(long)]
        wait_ms: Option<u64>,
        /// Print the redirect URL instead of downloading when one is available
        #[arg(long)]
        allow_redirect: bool,
    },
    /// Show a media record
    Stat { media_id: String },
}

async fn app_state(config: Config) -> anyhow::Result<Arc<AppState>> {
    let database_url = config
        .database_url
        .clone()
        .context("DATABASE_URL must be set")?;
    let pool = setup_database(&database_url).await?;
    let store: Arc<dyn MediaStore> = Arc::new(PgMediaStore::new(pool));
    Ok(Arc::new(AppState::new(config, store)))
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize output")?;
    println!("{}", out);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;

    if let Commands::Datastores = cli.command {
        for ds in &config.datastores {
            let marker = if ds.id == config.upload_datastore { " (uploads)" } else { "" };
            println!("{}\t{}{}", ds.id, ds.kind, marker);
        }
        return Ok(());
    }

    let state = app_state(config).await?;

    match cli.command {
        Commands::Datastores => {}
        Commands::Reserve { user, room } => {
            let reservation = UploadService::new(state)
                .create_reservation(&cli.origin, &user, room.as_deref())
                .await?;
            print_json(&serde_json::json!({
                "content_uri": reservation.content_uri,
                "media_id": reservation.media_id,
                "unused_expires_at": reservation.unused_expires_at.timestamp_millis(),
                "upload_url": reservation.upload_url,
            }))?;
        }
        Commands::Upload {
            file,
            user,
            media_id,
            content_type,
            room,
        } => {
            let handle = tokio::fs::File::open(&file)
                .await
                .with_context(|| format!("Failed to open {}", file.display()))?;
            let length = handle.metadata().await?.len() as i64;
            let request = UploadRequest {
                origin: cli.origin.clone(),
                media_id,
                user_id: user,
                filename: file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                content_type,
                declared_length: length,
                content_length_header: None,
                room_id: room,
            };
            let record = UploadService::new(state)
                .upload_media(request, Box::pin(handle))
                .await?;
            print_json(&serde_json::to_value(&record)?)?;
        }
        Commands::Complete { media_id } => {
            let record = UploadService::new(state)
                .upload_complete(&cli.origin, &media_id)
                .await?;
            print_json(&serde_json::to_value(&record)?)?;
        }
        Commands::Reference { media_id, room } => {
            UploadService::new(state)
                .add_media_reference(&cli.origin, &media_id, &room)
                .await?;
            tracing::info!(media_id = %media_id, room_id = %room, "Reference recorded");
        }
        Commands::Download {
            media_id,
            output,
            wait_ms,
            allow_redirect,
        } => {
            let request = DownloadRequest {
                origin: cli.origin.clone(),
                media_id,
                filename: None,
                allow_redirect,
                disposition: Disposition::Infer,
                max_stall: wait_ms.map(Duration::from_millis),
            };
            match DownloadService::new(state).resolve(request).await? {
                DownloadResponse::Redirect { url } => println!("{}", url),
                DownloadResponse::Stream(mut media) => {
                    tracing::info!(
                        content_type = %media.content_type,
                        size = %human_size(media.size_bytes),
                        "Downloading"
                    );
                    let mut sink: std::pin::Pin<Box<dyn tokio::io::AsyncWrite + Send>> = match &output {
                        Some(path) => Box::pin(tokio::fs::File::create(path).await?),
                        None => Box::pin(tokio::io::stdout()),
                    };
                    while let Some(chunk) = media.stream.next().await {
                        sink.write_all(&chunk?).await?;
                    }
                    sink.flush().await?;
                }
            }
        }
        Commands::Stat { media_id } => {
            let record = state
                .store
                .get(&cli.origin, &media_id)
                .await?
                .with_context(|| format!("No media mxc://{}/{}", cli.origin, media_id))?;
            let rooms = state.store.references(&cli.origin, &media_id).await?;
            let mut value = serde_json::to_value(&record)?;
            value["size"] = serde_json::Value::String(human_size(record.size_bytes));
            value["rooms"] = serde_json::json!(rooms);
            print_json(&value)?;
        }
    }

    Ok(())
}
