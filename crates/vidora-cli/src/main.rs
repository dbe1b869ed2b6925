//! Vidora CLI - Playback session tools
//!
//! Features:
//! - Resume URL encoding and decoding
//! - Continue-watching history inspection
//! - Content catalog listing
//! - Headless playback simulation against the session core

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod output;

/// Vidora CLI - Playback session toolkit
#[derive(Parser)]
#[command(name = "vidora")]
#[command(version)]
#[command(about = "Resume, history and playback simulation tools for Vidora", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json, table)
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Session configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding continue-watching data
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// User id whose history is used (guest when omitted)
    #[arg(short, long, global = true)]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Work with resume offsets in playable URLs
    Resume {
        #[command(subcommand)]
        action: ResumeAction,
    },

    /// Inspect the continue-watching list
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },

    /// List videos from the content API or a JSON file
    Catalog {
        #[command(subcommand)]
        action: CatalogAction,
    },

    /// Play a video against the simulated backend and record progress
    Simulate {
        /// Video identifier
        video_id: String,

        /// Playable source URL
        url: String,

        /// Video title stored with the progress record
        #[arg(short, long, default_value = "Untitled")]
        title: String,

        /// Thumbnail URL stored with the progress record
        #[arg(long, default_value = "")]
        thumbnail: String,

        /// Stream duration in seconds
        #[arg(short, long, default_value = "120")]
        duration: f64,

        /// Seconds to watch before closing (default: to the end)
        #[arg(short, long)]
        watch: Option<f64>,

        /// Playhead step per tick in seconds
        #[arg(long, default_value = "5")]
        step: f64,

        /// Behave like a native-HLS engine with unreliable end events
        #[arg(long)]
        native: bool,

        /// Select this quality tier once tiers are discovered
        #[arg(short, long)]
        quality: Option<usize>,
    },
}

#[derive(Subcommand)]
enum ResumeAction {
    /// Append a resume offset to a URL
    Encode {
        url: String,
        seconds: f64,
    },

    /// Read the resume offset from a URL
    Decode {
        url: String,
    },

    /// Remove all query parameters from a URL
    Strip {
        url: String,
    },
}

#[derive(Subcommand)]
enum HistoryAction {
    /// Show the continue-watching list, newest first
    List,

    /// Drop one video from the list
    Remove {
        video_id: String,
    },
}

#[derive(Subcommand)]
enum CatalogAction {
    /// List videos with their resume positions
    List {
        /// Content API base URL
        #[arg(long)]
        api: Option<String>,

        /// API token sent as `Authorization: Token <token>`
        #[arg(long, env = "VIDORA_TOKEN")]
        token: Option<String>,

        /// JSON file with an array of video records
        #[arg(long, conflicts_with = "api")]
        file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(level)
        .with_writer(std::io::stderr)
        .init();
    vidora_core::init();

    let ctx = commands::Context::new(
        &cli.format,
        cli.config.as_deref(),
        cli.data_dir,
        cli.user.as_deref(),
    )?;

    match cli.command {
        Commands::Resume { action } => match action {
            ResumeAction::Encode { url, seconds } => commands::resume_encode(&ctx, &url, seconds)?,
            ResumeAction::Decode { url } => commands::resume_decode(&ctx, &url)?,
            ResumeAction::Strip { url } => commands::resume_strip(&ctx, &url)?,
        },
        Commands::History { action } => match action {
            HistoryAction::List => commands::history_list(&ctx)?,
            HistoryAction::Remove { video_id } => commands::history_remove(&ctx, &video_id)?,
        },
        Commands::Catalog { action } => match action {
            CatalogAction::List { api, token, file } => {
                commands::catalog_list(&ctx, api.as_deref(), token, file).await?;
            }
        },
        Commands::Simulate {
            video_id,
            url,
            title,
            thumbnail,
            duration,
            watch,
            step,
            native,
            quality,
        } => {
            let plan = commands::SimulationPlan {
                selection: vidora_core::VideoSelection::new(video_id, title, thumbnail, url),
                duration,
                watch: watch.unwrap_or(duration),
                step,
                native,
                quality,
            };
            commands::simulate(&ctx, plan).await?;
        }
    }

    Ok(())
}
