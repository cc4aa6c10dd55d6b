use anyhow::{Context, Result};
use clap::Parser;
use gallery_uploader::config::{self, Transport};
use gallery_uploader::queue::{follow_batch, QueueEvent, UploadQueue, UploadStatus};
use gallery_uploader::store::{ObjectStore, PresignedStore, R2Store};
use gallery_uploader::{FileCandidate, TempFilePreviews};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Upload wedding photos and videos to the gallery bucket
#[derive(Debug, Parser)]
#[command(name = "gallery-uploader", version)]
struct Cli {
    /// Read settings from this file instead of `.env`
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Image and video files to upload
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    if let Some(path) = &cli.env_file {
        dotenvy::from_path(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
    }
    let config = config::load().context("Invalid configuration")?;

    let previews = Arc::new(TempFilePreviews::new().context("Failed to create preview directory")?);

    match config.transport {
        Transport::Sdk => {
            let store = R2Store::new(&config.r2);
            run(UploadQueue::new(store, previews, config.queue), &cli.files).await
        }
        Transport::Presigned => {
            let store = PresignedStore::new(config.r2.clone())?;
            run(UploadQueue::new(store, previews, config.queue), &cli.files).await
        }
    }
}

async fn run<S: ObjectStore>(queue: UploadQueue<S>, paths: &[PathBuf]) -> Result<()> {
    let mut candidates = Vec::with_capacity(paths.len());
    for path in paths {
        let file = FileCandidate::from_path(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        candidates.push(file);
    }

    let added = queue.add_files(candidates);
    if added < paths.len() {
        log::info!(
            "{} of {} files skipped (not an image/video or a duplicate)",
            paths.len() - added,
            paths.len()
        );
    }

    let mut events = queue.subscribe();
    let printer = tokio::spawn(async move {
        follow_batch(&mut events, |event| match event {
            QueueEvent::Notice { message, .. } => println!("{}", message),
            other => log::debug!("{}", serde_json::to_string(other).unwrap_or_default()),
        })
        .await
    });

    let result = queue.upload_all().await;
    if result.total == 0 {
        // Nothing was eligible, so no batch events will arrive
        printer.abort();
    } else {
        let _ = printer.await;
    }

    for entry in queue.snapshot().iter() {
        if entry.status == UploadStatus::Error {
            eprintln!(
                "{}: {}",
                entry.file.name,
                entry.error.as_deref().unwrap_or("upload failed")
            );
        }
    }

    // Let completed entries leave the queue so their previews are released
    tokio::time::sleep(queue.config().completion_display_delay()).await;

    if result.succeeded < result.total {
        anyhow::bail!("{} of {} uploads failed", result.total - result.succeeded, result.total);
    }
    Ok(())
}
