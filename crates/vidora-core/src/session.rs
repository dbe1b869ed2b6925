//! Playback Session - outer orchestrator
//!
//! Coordinates:
//! - Resume lookup in the continue-watching store
//! - One adaptive player controller per selected video
//! - Forwarding tracker samples into the store
//! - Dropping finished videos from the list on close

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::{
    backend::BackendFactory,
    catalog::VideoRecord,
    config::SessionConfig,
    controller::AdaptivePlayerController,
    dom::{ContainerId, DomHost},
    quality::QualityMenu,
    resume_url,
    store::ProgressStore,
    types::*,
    Result,
};

/// What the orchestrator needs to know about a selected video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSelection {
    pub video_id: String,
    pub title: String,
    pub thumbnail_url: String,
    pub source_url: String,
}

impl VideoSelection {
    pub fn new(
        video_id: impl Into<String>,
        title: impl Into<String>,
        thumbnail_url: impl Into<String>,
        source_url: impl Into<String>,
    ) -> Self {
        Self {
            video_id: video_id.into(),
            title: title.into(),
            thumbnail_url: thumbnail_url.into(),
            source_url: source_url.into(),
        }
    }

    /// Build from a content API record
    pub fn from_record(video: &VideoRecord, static_base: Option<&str>) -> Result<Self> {
        Ok(Self {
            video_id: video.video_id(),
            title: video.title.clone(),
            thumbnail_url: video.thumbnail_url(static_base),
            source_url: video.playable_url(static_base)?,
        })
    }

    fn record(&self, sample: &ProgressSample) -> ProgressRecord {
        ProgressRecord {
            video_id: self.video_id.clone(),
            current_time_seconds: sample.current_time,
            duration_seconds: sample.duration,
            title: self.title.clone(),
            thumbnail_url: self.thumbnail_url.clone(),
            source_url: self.source_url.clone(),
            last_watched_at_epoch_ms: Utc::now().timestamp_millis(),
            ended: sample.ended,
        }
    }
}

/// Stops store writes once a selection is closed
#[derive(Default)]
struct SinkGate {
    closed: Mutex<bool>,
}

impl SinkGate {
    fn close(&self) {
        *self.closed.lock().unwrap_or_else(|e| e.into_inner()) = true;
    }
}

struct ActivePlayback {
    selection: VideoSelection,
    resume_url: String,
    controller: AdaptivePlayerController,
    ended: Arc<AtomicBool>,
    gate: Arc<SinkGate>,
}

/// Outcome of closing the active video
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseOutcome {
    pub video_id: String,
    pub ended: bool,
    /// The record was dropped from continue-watching
    pub removed: bool,
}

/// Playback session for one user
pub struct PlaybackSession {
    config: SessionConfig,
    namespace: Namespace,
    store: Arc<ProgressStore>,
    factory: Arc<dyn BackendFactory>,
    dom: Arc<dyn DomHost>,
    active: RwLock<Option<ActivePlayback>>,
}

impl PlaybackSession {
    pub fn new(
        config: SessionConfig,
        namespace: Namespace,
        store: Arc<ProgressStore>,
        factory: Arc<dyn BackendFactory>,
        dom: Arc<dyn DomHost>,
    ) -> Self {
        Self {
            config,
            namespace,
            store,
            factory,
            dom,
            active: RwLock::new(None),
        }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn store(&self) -> &Arc<ProgressStore> {
        &self.store
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Continue-watching list for this session's user
    pub fn continue_watching(&self) -> ContinueWatchingList {
        self.store.load(&self.namespace)
    }

    /// Source URL carrying the saved resume offset, if the video is resumable
    pub fn resume_url_for(&self, video_id: &str) -> Option<String> {
        let record = self.store.get(&self.namespace, video_id)?;
        let seconds = record.resume_seconds()?;
        Some(resume_url::encode(&record.source_url, seconds))
    }

    /// Play `selection` in `container`, resuming from saved progress.
    ///
    /// Any previously selected video is closed first. Returns the source URL
    /// handed to the player, including the resume offset when there is one.
    #[instrument(skip(self, selection), fields(video_id = %selection.video_id))]
    pub async fn select(&self, selection: VideoSelection, container: ContainerId) -> Result<String> {
        self.close().await;

        let resume_seconds = self
            .store
            .get(&self.namespace, &selection.video_id)
            .and_then(|record| record.resume_seconds())
            .unwrap_or(0.0);
        let url = resume_url::encode(&selection.source_url, resume_seconds);

        let ended = Arc::new(AtomicBool::new(false));
        let gate = Arc::new(SinkGate::default());
        let sink = {
            let store = self.store.clone();
            let namespace = self.namespace.clone();
            let selection = selection.clone();
            let ended = ended.clone();
            let gate = gate.clone();
            move |sample: ProgressSample| {
                let closed = gate.closed.lock().unwrap_or_else(|e| e.into_inner());
                if *closed {
                    return;
                }
                ended.store(sample.ended, Ordering::SeqCst);
                store.save(&namespace, selection.record(&sample));
            }
        };

        let controller = AdaptivePlayerController::new(
            self.config.player.clone(),
            self.factory.clone(),
            self.dom.clone(),
            Arc::new(sink),
        );

        let started = async {
            controller.attach(container)?;
            controller.wait_ready().await?;
            controller.load(&PlaybackSource::from_resume_url(&url))
        };
        if let Err(err) = started.await {
            warn!(error = %err, code = err.error_code(), "Could not start playback");
            gate.close();
            controller.dispose();
            return Err(err);
        }

        info!(
            namespace = %self.namespace,
            resume_seconds,
            "Playback started"
        );

        *self.active.write().await = Some(ActivePlayback {
            selection,
            resume_url: url.clone(),
            controller,
            ended,
            gate,
        });
        Ok(url)
    }

    /// Close the active video. A video that reached its end is removed
    /// from continue-watching.
    #[instrument(skip(self))]
    pub async fn close(&self) -> Option<CloseOutcome> {
        let active = self.active.write().await.take()?;
        let video_id = active.selection.video_id.clone();

        active.controller.dispose();
        active.gate.close();

        let ended = active.ended.load(Ordering::SeqCst);
        let removed = ended && self.store.remove(&self.namespace, &video_id);
        debug!(video_id = %video_id, ended, removed, "Closed video");

        Some(CloseOutcome {
            video_id,
            ended,
            removed,
        })
    }

    /// Id of the video currently playing
    pub async fn active_video(&self) -> Option<VideoSelection> {
        self.active
            .read()
            .await
            .as_ref()
            .map(|active| active.selection.clone())
    }

    /// URL the active video was loaded from
    pub async fn active_url(&self) -> Option<String> {
        self.active
            .read()
            .await
            .as_ref()
            .map(|active| active.resume_url.clone())
    }

    /// Whether the active video has reached its end
    pub async fn is_ended(&self) -> bool {
        self.active
            .read()
            .await
            .as_ref()
            .is_some_and(|active| active.ended.load(Ordering::SeqCst))
    }

    pub async fn controller_state(&self) -> Option<ControllerState> {
        self.active
            .read()
            .await
            .as_ref()
            .map(|active| active.controller.state())
    }

    pub async fn quality_menu(&self) -> Option<QualityMenu> {
        let active = self.active.read().await;
        active.as_ref()?.controller.quality_menu().await
    }

    pub async fn select_quality(&self, index: usize) -> Result<QualityTier> {
        let active = self.active.read().await;
        match active.as_ref() {
            Some(active) => active.controller.select_quality(index).await,
            None => Err(crate::Error::NotReady {
                state: "no video selected".to_string(),
            }),
        }
    }

    /// Run `f` against the active controller
    pub async fn with_controller<T>(&self, f: impl FnOnce(&AdaptivePlayerController) -> T) -> Option<T> {
        let active = self.active.read().await;
        active.as_ref().map(|active| f(&active.controller))
    }
}
