//! Operator CLI for the piece stash.

mod config;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Args, Parser, Subcommand};
use piecestash_core::config::AppConfig;
use piecestash_core::{Piece, PieceHash};
use piecestash_storage::{ChunkedPieceStore, PieceHandle};
use piecestash_upload::{CancellationToken, StaticToken, UploadOutcome, UploadPipeline};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "piecestash")]
#[command(about = "Stage pieces locally and stream completed objects to remote storage")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(long, env = "PIECESTASH_CONFIG", default_value = "piecestash.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Piece staging commands
    Piece {
        #[command(subcommand)]
        command: PieceCommands,
    },
    /// Upload a local file to the remote endpoint
    Upload {
        /// File to upload
        path: PathBuf,

        /// Remote object name (defaults to the file name)
        #[arg(long)]
        name: Option<String>,

        /// Create a folder with this name and upload into it
        #[arg(long)]
        folder: Option<String>,
    },
}

#[derive(Args, Clone, Copy)]
struct PieceArgs {
    /// Piece hash (40 hex characters)
    hash: PieceHash,

    /// Declared piece length in bytes
    length: u64,
}

impl PieceArgs {
    fn piece(&self) -> Piece {
        Piece::new(self.hash, self.length)
    }
}

#[derive(Subcommand)]
enum PieceCommands {
    /// Store bytes at an offset as a new chunk
    Write {
        #[command(flatten)]
        piece: PieceArgs,

        /// Piece offset of the first byte
        #[arg(long, default_value_t = 0)]
        offset: u64,

        /// Read data from this file instead of stdin
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Read bytes from a piece to stdout
    Read {
        #[command(flatten)]
        piece: PieceArgs,

        #[arg(long, default_value_t = 0)]
        offset: u64,

        /// Number of bytes (defaults to the rest of the piece)
        #[arg(long)]
        len: Option<u64>,
    },
    /// Show completion state and stored chunks
    Status {
        #[command(flatten)]
        piece: PieceArgs,
    },
    /// Merge chunks into the completed instance
    Complete {
        #[command(flatten)]
        piece: PieceArgs,
    },
    /// Drop the completed instance
    Incomplete {
        #[command(flatten)]
        piece: PieceArgs,
    },
    /// Upload a completed piece to the remote endpoint
    Upload {
        #[command(flatten)]
        piece: PieceArgs,

        /// Remote object name (defaults to the piece hash)
        #[arg(long)]
        name: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = config::load(&cli.config)?;

    match cli.command {
        Commands::Piece { command } => handle_piece_command(command, &config).await,
        Commands::Upload { path, name, folder } => {
            handle_upload_command(&path, name, folder, &config).await
        }
    }
}

async fn open_pieces(config: &AppConfig) -> Result<ChunkedPieceStore> {
    let store = piecestash_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    store
        .health_check()
        .await
        .context("storage health check failed")?;
    Ok(ChunkedPieceStore::new(store))
}

fn build_pipeline(config: &AppConfig) -> Result<UploadPipeline> {
    let token = Arc::new(StaticToken::new(config.upload.access_token.clone()));
    UploadPipeline::new(config.upload.clone(), token).context("failed to build upload pipeline")
}

/// A token tripped by Ctrl-C.
fn interrupt_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trip = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling upload");
            trip.cancel();
        }
    });
    cancel
}

async fn handle_piece_command(command: PieceCommands, config: &AppConfig) -> Result<()> {
    let pieces = open_pieces(config).await?;

    match command {
        PieceCommands::Write {
            piece,
            offset,
            file,
        } => {
            let data = match file {
                Some(path) => tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("failed to read {}", path.display()))?,
                None => {
                    let mut buf = Vec::new();
                    tokio::io::stdin()
                        .read_to_end(&mut buf)
                        .await
                        .context("failed to read stdin")?;
                    buf
                }
            };
            let written = pieces
                .piece(piece.piece())
                .write(offset, Bytes::from(data))
                .await?;
            println!("Wrote {written} bytes at offset {offset}");
        }
        PieceCommands::Read { piece, offset, len } => {
            let handle = pieces.piece(piece.piece());
            let len = len.unwrap_or_else(|| piece.length.saturating_sub(offset));
            let data = handle.read_at(offset, len).await?;
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&data).await?;
            stdout.flush().await?;
            if (data.len() as u64) < len {
                tracing::info!(
                    requested = len,
                    returned = data.len(),
                    "Read stopped at end of available data"
                );
            }
        }
        PieceCommands::Status { piece } => print_status(&pieces.piece(piece.piece())).await?,
        PieceCommands::Complete { piece } => {
            pieces.piece(piece.piece()).mark_complete().await?;
            println!("Piece {} complete", piece.hash);
        }
        PieceCommands::Incomplete { piece } => {
            pieces.piece(piece.piece()).mark_incomplete().await?;
            println!("Piece {} marked incomplete", piece.hash);
        }
        PieceCommands::Upload { piece, name } => {
            let pipeline = build_pipeline(config)?;
            let name = name.unwrap_or_else(|| piece.hash.to_hex());
            let outcome = pipeline
                .upload_piece(&pieces.piece(piece.piece()), &name, interrupt_token())
                .await?;
            print_outcome(&outcome);
        }
    }

    Ok(())
}

async fn print_status(handle: &PieceHandle) -> Result<()> {
    let piece = handle.piece();
    let completion = handle.completion().await;
    println!("Piece:    {}", piece.hash);
    println!("Length:   {}", piece.length);
    println!(
        "Status:   {}",
        if completion.complete {
            "complete"
        } else {
            "incomplete"
        }
    );

    let chunks = handle.chunks().await?;
    if chunks.is_empty() {
        println!("Chunks:   none");
        return Ok(());
    }
    println!("Chunks:   {}", chunks.len());
    for chunk in chunks {
        println!(
            "  {:>12}  {:>10} bytes  (seq {})",
            chunk.name.offset, chunk.size, chunk.name.sequence
        );
    }
    Ok(())
}

async fn handle_upload_command(
    path: &std::path::Path,
    name: Option<String>,
    folder: Option<String>,
    config: &AppConfig,
) -> Result<()> {
    let name = match name {
        Some(name) => name,
        None => path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow::anyhow!("cannot derive an object name from {}", path.display()))?,
    };

    let mut upload_config = config.clone();
    if let Some(folder) = folder {
        let pipeline = build_pipeline(config)?;
        let id = pipeline
            .negotiator()
            .create_folder(&folder, config.upload.effective_parent())
            .await
            .context("failed to create folder")?;
        upload_config.upload.parent_container = id;
        upload_config.upload.team_drive = None;
    }

    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;
    let outcome = build_pipeline(&upload_config)?
        .upload(&name, file, interrupt_token())
        .await?;
    print_outcome(&outcome);
    Ok(())
}

fn print_outcome(outcome: &UploadOutcome) {
    println!("Uploaded {}", outcome.object_name);
    println!("  Type:   {}", outcome.mime_type);
    println!("  Bytes:  {}", outcome.total_length);
    println!("  Units:  {}", outcome.units);
}
