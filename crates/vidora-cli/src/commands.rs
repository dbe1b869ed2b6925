//! CLI command implementations

use anyhow::{bail, Context as _};
use chrono::DateTime;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tabled::Tabled;
use tracing::debug;

use vidora_core::quality::change_message;
use vidora_core::simulated::{SimulatedBackend, SimulatedFactory, SimulatedQualityLevels};
use vidora_core::{
    format_timestamp, resume_url, ContainerId, ContentApi, FileStorage, FrameClock, MediaBackend,
    Namespace, PlaybackSession, ProgressRecord, ProgressStore, SessionConfig, StaticCatalog,
    VideoSelection,
};

use crate::output::{render_rows, render_value, OutputFormat};

/// Settings shared by every command
pub struct Context {
    pub format: OutputFormat,
    pub config: SessionConfig,
    pub namespace: Namespace,
    pub store: Arc<ProgressStore>,
}

impl Context {
    pub fn new(
        format: &str,
        config: Option<&Path>,
        data_dir: Option<PathBuf>,
        user: Option<&str>,
    ) -> anyhow::Result<Self> {
        let config = match config {
            Some(path) => SessionConfig::from_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => SessionConfig::default(),
        };
        let storage = match data_dir {
            Some(dir) => FileStorage::new(dir),
            None => FileStorage::default_location()?,
        };
        debug!(dir = %storage.dir().display(), "Using continue-watching storage");

        Ok(Self {
            format: OutputFormat::from(format),
            store: Arc::new(ProgressStore::new(Arc::new(storage), config.store.clone())),
            config,
            namespace: Namespace::for_user(user),
        })
    }
}

#[derive(Serialize, Tabled)]
struct HistoryRow {
    #[tabled(rename = "Video")]
    video_id: String,
    #[tabled(rename = "Title")]
    title: String,
    #[tabled(rename = "Position")]
    position: String,
    #[tabled(rename = "Watched")]
    watched: String,
    #[tabled(rename = "Last watched")]
    last_watched: String,
    #[tabled(rename = "Ended")]
    ended: bool,
}

impl From<&ProgressRecord> for HistoryRow {
    fn from(record: &ProgressRecord) -> Self {
        let last_watched = DateTime::from_timestamp_millis(record.last_watched_at_epoch_ms)
            .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        Self {
            video_id: record.video_id.clone(),
            title: record.title.clone(),
            position: format!(
                "{} / {}",
                format_timestamp(record.current_time_seconds),
                format_timestamp(record.duration_seconds)
            ),
            watched: format!("{:.0}%", record.fraction_watched() * 100.0),
            last_watched,
            ended: record.ended,
        }
    }
}

#[derive(Serialize, Tabled)]
struct CatalogRow {
    #[tabled(rename = "Id")]
    id: u64,
    #[tabled(rename = "Title")]
    title: String,
    #[tabled(rename = "Views")]
    views: u64,
    #[tabled(rename = "New")]
    new: bool,
    #[tabled(rename = "Resume")]
    resume: String,
    #[tabled(rename = "Source")]
    source: String,
}

/// Append a resume offset to a URL
pub fn resume_encode(ctx: &Context, url: &str, seconds: f64) -> anyhow::Result<()> {
    let encoded = resume_url::encode(url, seconds);
    let text = encoded.clone();
    println!(
        "{}",
        render_value(&json!({ "url": encoded }), || text, ctx.format)
    );
    Ok(())
}

/// Print the resume offset carried by a URL
pub fn resume_decode(ctx: &Context, url: &str) -> anyhow::Result<()> {
    let seconds = resume_url::decode(url);
    let timestamp = format_timestamp(seconds);
    let value = json!({ "seconds": seconds, "timestamp": timestamp });
    println!(
        "{}",
        render_value(&value, || format!("{} ({})", seconds, timestamp), ctx.format)
    );
    Ok(())
}

/// Print a URL without its query
pub fn resume_strip(ctx: &Context, url: &str) -> anyhow::Result<()> {
    let stripped = resume_url::strip_query(url);
    let text = stripped.clone();
    println!(
        "{}",
        render_value(&json!({ "url": stripped }), || text, ctx.format)
    );
    Ok(())
}

/// Show the continue-watching list
pub fn history_list(ctx: &Context) -> anyhow::Result<()> {
    let list = ctx.store.load(&ctx.namespace);
    if list.is_empty() && ctx.format != OutputFormat::Json {
        println!("Nothing to continue watching for {}", ctx.namespace);
        return Ok(());
    }

    let rows: Vec<HistoryRow> = list.iter().map(HistoryRow::from).collect();
    println!("{}", render_rows(&rows, ctx.format));
    Ok(())
}

/// Remove one video from the list
pub fn history_remove(ctx: &Context, video_id: &str) -> anyhow::Result<()> {
    let removed = ctx.store.remove(&ctx.namespace, video_id);
    let text = if removed {
        format!("Removed {} from {}", video_id, ctx.namespace)
    } else {
        format!("{} is not in the list for {}", video_id, ctx.namespace)
    };
    println!(
        "{}",
        render_value(&json!({ "video_id": video_id, "removed": removed }), || text, ctx.format)
    );
    Ok(())
}

/// List catalog videos with their resume positions
pub async fn catalog_list(
    ctx: &Context,
    api: Option<&str>,
    token: Option<String>,
    file: Option<PathBuf>,
) -> anyhow::Result<()> {
    let catalog: Box<dyn ContentApi> = match (api, file) {
        (_, Some(path)) => Box::new(
            StaticCatalog::from_file(&path)
                .with_context(|| format!("reading catalog {}", path.display()))?,
        ),
        (Some(api), None) => Box::new(vidora_core::HttpContentApi::new(api, token)?),
        (None, None) => bail!("pass --api <url> or --file <path>"),
    };

    let videos = catalog.fetch_videos().await?;
    let history = ctx.store.load(&ctx.namespace);
    let static_base = ctx.config.static_base_url.as_deref();
    let today = chrono::Utc::now().date_naive();

    let rows: Vec<CatalogRow> = videos
        .iter()
        .map(|video| CatalogRow {
            id: video.id,
            title: video.title.clone(),
            views: video.views,
            new: video.is_new(today),
            resume: history
                .get(&video.video_id())
                .and_then(|record| record.resume_seconds())
                .map(format_timestamp)
                .unwrap_or_else(|| "-".to_string()),
            source: video
                .playable_url(static_base)
                .unwrap_or_else(|e| format!("({})", e)),
        })
        .collect();

    println!("{}", render_rows(&rows, ctx.format));
    Ok(())
}

/// Parameters of a simulated viewing
pub struct SimulationPlan {
    pub selection: VideoSelection,
    pub duration: f64,
    /// Seconds to watch in this run
    pub watch: f64,
    pub step: f64,
    pub native: bool,
    pub quality: Option<usize>,
}

#[derive(Serialize)]
struct SimulationReport {
    video_id: String,
    source_url: String,
    started_at: f64,
    stopped_at: f64,
    quality: Option<String>,
    ended: bool,
    removed: bool,
}

/// Play a video against the simulated backend, recording progress in the store
pub async fn simulate(ctx: &Context, plan: SimulationPlan) -> anyhow::Result<()> {
    if !(plan.duration > 0.0 && plan.step > 0.0) {
        bail!("duration and step must be positive");
    }

    let mut player = ctx.config.player.clone();
    player.native_streaming_preferred |= plan.native;

    let levels = Arc::new(SimulatedQualityLevels::ready(
        SimulatedQualityLevels::standard_ladder(),
    ));
    let mut backend = SimulatedBackend::new()
        .with_quality_levels(levels)
        .with_auto_metadata(plan.duration);
    if player.native_streaming_preferred {
        backend = backend.with_unreliable_end();
    }
    let backend = Arc::new(backend);

    let container = ContainerId::new("video-player");
    let dom = Arc::new(FrameClock::new(player.frame_interval()));
    dom.mount(container.clone());

    let discovery_wait = player.discovery.first_attempt_delay(player.native_streaming_preferred)
        + player.discovery.retry_delay() * player.discovery.max_attempts;
    let config = SessionConfig {
        player,
        ..ctx.config.clone()
    };
    let session = PlaybackSession::new(
        config,
        ctx.namespace.clone(),
        ctx.store.clone(),
        Arc::new(SimulatedFactory::new(backend.clone())),
        dom,
    );

    let source_url = session.select(plan.selection.clone(), container).await?;
    let session = &session;
    wait_until(Duration::from_secs(1), || async move {
        !session
            .with_controller(|c| c.resume_pending())
            .await
            .unwrap_or(false)
    })
    .await;
    let started_at = backend.current_time();

    let mut quality = None;
    if let Some(index) = plan.quality {
        wait_until(discovery_wait, || async move { session.quality_menu().await.is_some() }).await;
        let tier = session.select_quality(index).await?;
        let label = tier.label();
        if ctx.format != OutputFormat::Json {
            println!("{}", change_message(&label));
        }
        quality = Some(label);
    }

    if let Some(Err(e)) = session.with_controller(|c| c.play()).await {
        return Err(e.into());
    }

    let target = (started_at + plan.watch).min(plan.duration);
    let bar = ProgressBar::new(plan.duration.ceil() as u64);
    bar.set_style(ProgressStyle::with_template(
        "{msg} [{bar:40.magenta/blue}] {pos}/{len}s",
    )?);
    bar.set_message(plan.selection.title.clone());
    bar.set_position(started_at as u64);

    while backend.current_time() < target && !backend.paused() {
        let step = plan.step.min(target - backend.current_time());
        backend.advance(step);
        bar.set_position(backend.current_time() as u64);
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    bar.finish_and_clear();

    backend.pause();
    let stopped_at = backend.current_time();
    tokio::task::yield_now().await;

    let outcome = session.close().await;
    let report = SimulationReport {
        video_id: plan.selection.video_id.clone(),
        source_url,
        started_at,
        stopped_at,
        quality,
        ended: outcome.as_ref().is_some_and(|o| o.ended),
        removed: outcome.as_ref().is_some_and(|o| o.removed),
    };

    println!(
        "{}",
        render_value(
            &report,
            || format!(
                "Played {} from {} to {} via {}{}",
                report.video_id,
                format_timestamp(report.started_at),
                format_timestamp(report.stopped_at),
                report.source_url,
                if report.removed {
                    " (finished, removed from continue watching)"
                } else {
                    ""
                }
            ),
            ctx.format,
        )
    );

    if ctx.format != OutputFormat::Json {
        history_list(ctx)?;
    }
    Ok(())
}

/// Poll `ready` every 20 ms until it holds or `limit` elapses
async fn wait_until<F, Fut>(limit: Duration, mut ready: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    while !ready().await {
        if tokio::time::Instant::now() >= deadline {
            debug!(limit_ms = limit.as_millis() as u64, "Gave up waiting");
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
