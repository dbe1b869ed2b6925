//! Adaptive Player Controller
//!
//! Owns the media backend lifecycle:
//!
//! ```text
//! Uninitialized ──attach──▶ AwaitingDom ──container mounted──▶ Ready ──dispose──▶ Disposed
//!       ▲                        │
//!       └── timeout / backend ───┘
//!           construction error
//! ```
//!
//! Each `load` gets its own progress tracker, quality-tier registry and
//! event task. The resume seek is a one-shot applied by whichever of
//! ready / metadata-loaded / play observes loaded metadata first.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::backend::{BackendFactory, MediaBackend, MediaEvent};
use crate::config::{MediaSource, PlayerConfig};
use crate::dom::{wait_for_container, AttachOutcome, ContainerId, DomHost};
use crate::quality::{QualityMenu, QualityTierRegistry};
use crate::tracker::{ProgressSink, ProgressTracker};
use crate::types::{ControllerState, PlaybackSource, QualityTier, SessionId};
use crate::{Error, Result};

/// Notifications published by the controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ControllerEvent {
    StateChanged {
        from: ControllerState,
        to: ControllerState,
    },
    SourceLoaded {
        url: String,
        resume_seconds: f64,
    },
    ResumeApplied {
        seconds: f64,
    },
    Error {
        code: String,
        message: String,
        fatal: bool,
    },
}

/// Why the last attach attempt fell back to `Uninitialized`
#[derive(Debug, Clone)]
enum AttachFailure {
    Timeout { container: String, frames: u32 },
    Construction(String),
}

impl From<AttachFailure> for Error {
    fn from(failure: AttachFailure) -> Self {
        match failure {
            AttachFailure::Timeout { container, frames } => {
                Error::DomAttachTimeout { container, frames }
            }
            AttachFailure::Construction(message) => Error::BackendConstruction(message),
        }
    }
}

/// One-shot resume seek shared by every handler that may apply it
pub(crate) struct ResumeSeek {
    pending: Mutex<Option<f64>>,
}

impl ResumeSeek {
    pub(crate) fn new(seconds: f64) -> Self {
        let pending = (seconds.is_finite() && seconds > 0.0).then_some(seconds);
        Self {
            pending: Mutex::new(pending),
        }
    }

    /// Seek to the pending offset and clear it. Later calls are no-ops.
    pub(crate) fn apply(&self, backend: &dyn MediaBackend) -> Option<f64> {
        let seconds = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()?;
        backend.seek(seconds);
        Some(seconds)
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }
}

/// Per-load resources
struct LoadHandles {
    tracker: ProgressTracker,
    registry: Arc<QualityTierRegistry>,
    resume: Arc<ResumeSeek>,
    event_task: JoinHandle<()>,
    discovery_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl LoadHandles {
    fn teardown(self) {
        self.tracker.dispose();
        self.registry.dispose();
        self.event_task.abort();
        if let Some(task) = self
            .discovery_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.abort();
        }
    }
}

#[derive(Default)]
struct Resources {
    container: Option<ContainerId>,
    backend: Option<Arc<dyn MediaBackend>>,
    attach_task: Option<JoinHandle<()>>,
    load: Option<LoadHandles>,
    last_failure: Option<AttachFailure>,
}

struct Inner {
    id: SessionId,
    config: PlayerConfig,
    factory: Arc<dyn BackendFactory>,
    dom: Arc<dyn DomHost>,
    sink: Arc<dyn ProgressSink>,
    state_tx: watch::Sender<ControllerState>,
    events: broadcast::Sender<ControllerEvent>,
    resources: Mutex<Resources>,
}

impl Inner {
    fn resources(&self) -> MutexGuard<'_, Resources> {
        self.resources.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn state(&self) -> ControllerState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, new_state: ControllerState) -> Result<()> {
        let mut from = new_state;
        let mut rejected = None;
        self.state_tx.send_if_modified(|current| {
            if current.can_transition_to(new_state) {
                from = *current;
                *current = new_state;
                true
            } else {
                rejected = Some(*current);
                false
            }
        });

        if let Some(current) = rejected {
            return Err(Error::InvalidStateTransition {
                from: current.to_string(),
                to: new_state.to_string(),
            });
        }

        info!(session_id = %self.id, from = %from, to = %new_state, "Controller state transition");
        self.notify(ControllerEvent::StateChanged {
            from,
            to: new_state,
        });
        Ok(())
    }

    fn notify(&self, event: ControllerEvent) {
        let _ = self.events.send(event);
    }

    fn report_error(&self, err: &Error, fatal: bool) {
        self.notify(ControllerEvent::Error {
            code: err.error_code().to_string(),
            message: err.to_string(),
            fatal,
        });
    }

    /// Build the backend for a mounted container and enter `Ready`
    fn construct(&self, container: &ContainerId) -> Result<()> {
        let options = self.config.backend_options();
        debug!(
            container = %container,
            override_native = options.override_native,
            "Constructing media backend"
        );

        match self.factory.create(container, &options) {
            Ok(backend) => {
                self.resources().backend = Some(backend);
                self.set_state(ControllerState::Ready)
            }
            Err(err) => {
                error!(container = %container, error = %err, "Media backend construction failed");
                self.fail_attach(AttachFailure::Construction(err.to_string()));
                Err(err)
            }
        }
    }

    fn fail_attach(&self, failure: AttachFailure) {
        let err = Error::from(failure.clone());
        {
            let mut resources = self.resources();
            resources.last_failure = Some(failure);
            resources.container = None;
            resources.attach_task = None;
        }
        self.report_error(&err, !err.is_recoverable());
        if let Err(transition) = self.set_state(ControllerState::Uninitialized) {
            debug!(error = %transition, "Attach failure after controller left AwaitingDom");
        }
    }

    fn start_discovery(&self, registry: &Arc<QualityTierRegistry>, slot: &Arc<Mutex<Option<JoinHandle<()>>>>) {
        let mut slot = slot.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() || registry.is_disposed() {
            return;
        }
        let registry = registry.clone();
        *slot = Some(tokio::spawn(async move {
            registry.discover().await;
        }));
    }
}

/// Drives one media backend instance for a player container
pub struct AdaptivePlayerController {
    inner: Arc<Inner>,
}

impl AdaptivePlayerController {
    pub fn new(
        config: PlayerConfig,
        factory: Arc<dyn BackendFactory>,
        dom: Arc<dyn DomHost>,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ControllerState::Uninitialized);
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                id: SessionId::new(),
                config,
                factory,
                dom,
                sink,
                state_tx,
                events,
                resources: Mutex::new(Resources::default()),
            }),
        }
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    pub fn state(&self) -> ControllerState {
        self.inner.state()
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.inner.config
    }

    /// Subscribe to state changes
    pub fn subscribe_state(&self) -> watch::Receiver<ControllerState> {
        self.inner.state_tx.subscribe()
    }

    /// Subscribe to controller notifications
    pub fn subscribe_events(&self) -> broadcast::Receiver<ControllerEvent> {
        self.inner.events.subscribe()
    }

    /// Bind to `container`, constructing the backend once it is mounted.
    ///
    /// Returns as soon as polling has started. Construction errors for an
    /// already-mounted container are returned directly; later failures are
    /// published as events and observed by [`wait_ready`](Self::wait_ready).
    #[instrument(skip(self), fields(session_id = %self.inner.id))]
    pub fn attach(&self, container: ContainerId) -> Result<()> {
        self.inner.set_state(ControllerState::AwaitingDom)?;
        {
            let mut resources = self.inner.resources();
            resources.container = Some(container.clone());
            resources.last_failure = None;
        }

        if self.inner.dom.contains(&container) {
            return self.inner.construct(&container);
        }

        debug!(container = %container, "Container not mounted yet, polling per frame");
        let inner = self.inner.clone();
        let max_frames = self.inner.config.dom_attach_max_frames;
        let task = tokio::spawn(async move {
            match wait_for_container(inner.dom.as_ref(), &container, max_frames).await {
                AttachOutcome::Mounted { .. } => {
                    inner.resources().attach_task = None;
                    let _ = inner.construct(&container);
                }
                AttachOutcome::TimedOut { frames } => {
                    warn!(container = %container, frames, "Container never mounted");
                    inner.fail_attach(AttachFailure::Timeout {
                        container: container.0.clone(),
                        frames,
                    });
                }
            }
        });
        self.inner.resources().attach_task = Some(task);
        Ok(())
    }

    /// Wait until the controller is `Ready`
    pub async fn wait_ready(&self) -> Result<()> {
        let mut rx = self.inner.state_tx.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            match state {
                ControllerState::Ready => return Ok(()),
                ControllerState::Disposed => return Err(Error::Disposed),
                ControllerState::Uninitialized => {
                    return Err(match self.inner.resources().last_failure.clone() {
                        Some(failure) => failure.into(),
                        None => Error::NotReady {
                            state: state.to_string(),
                        },
                    });
                }
                ControllerState::AwaitingDom => {}
            }
            if rx.changed().await.is_err() {
                return Err(Error::Disposed);
            }
        }
    }

    /// Load a source into the ready backend.
    ///
    /// The backend receives the bare manifest URL; the resume offset is
    /// applied by seeking once metadata has loaded.
    #[instrument(skip(self), fields(session_id = %self.inner.id))]
    pub fn load(&self, source: &PlaybackSource) -> Result<()> {
        let state = self.inner.state();
        match state {
            ControllerState::Ready => {}
            ControllerState::Disposed => return Err(Error::Disposed),
            _ => {
                return Err(Error::NotReady {
                    state: state.to_string(),
                })
            }
        }

        let (backend, previous) = {
            let mut resources = self.inner.resources();
            let backend = resources.backend.clone().ok_or_else(|| Error::NotReady {
                state: state.to_string(),
            })?;
            (backend, resources.load.take())
        };
        if let Some(previous) = previous {
            debug!("Tearing down previous load");
            previous.teardown();
        }

        let config = &self.inner.config;
        let resume = Arc::new(ResumeSeek::new(source.resume_seconds));
        let registry = Arc::new(QualityTierRegistry::new(
            backend.clone(),
            config.discovery.clone(),
            config.native_streaming_preferred,
        ));
        let discovery_task = Arc::new(Mutex::new(None));

        let events = backend.subscribe();
        let tracker = ProgressTracker::start(backend.clone(), self.inner.sink.clone(), config);

        let manifest = MediaSource::hls(source.manifest_url());
        if let Err(err) = backend.load_source(&manifest) {
            error!(url = %manifest.url, error = %err, "Backend rejected source");
            tracker.dispose();
            registry.dispose();
            self.inner.report_error(&err, true);
            return Err(err);
        }

        info!(
            url = %manifest.url,
            resume_seconds = source.resume_seconds,
            native = config.native_streaming_preferred,
            "Source loaded"
        );
        self.inner.notify(ControllerEvent::SourceLoaded {
            url: manifest.url.clone(),
            resume_seconds: source.resume_seconds,
        });

        let event_task = tokio::spawn(run_load_events(
            self.inner.clone(),
            backend.clone(),
            registry.clone(),
            resume.clone(),
            discovery_task.clone(),
            events,
        ));

        self.inner.resources().load = Some(LoadHandles {
            tracker,
            registry,
            resume,
            event_task,
            discovery_task,
        });
        Ok(())
    }

    /// Tear everything down. Emits one final progress sample when there is
    /// a watched position that the terminal sample has not already covered.
    /// Calling it again is a no-op.
    #[instrument(skip(self), fields(session_id = %self.inner.id))]
    pub fn dispose(&self) {
        if self.inner.state() == ControllerState::Disposed {
            return;
        }

        let (attach_task, load, backend) = {
            let mut resources = self.inner.resources();
            (
                resources.attach_task.take(),
                resources.load.take(),
                resources.backend.take(),
            )
        };

        if let Some(task) = attach_task {
            task.abort();
        }
        if let Some(load) = load {
            if let Some(sample) = load.tracker.emit_final() {
                debug!(position = sample.current_time, "Final progress sample emitted");
            }
            load.teardown();
        }
        if let Some(backend) = backend {
            backend.dispose();
        }

        if let Err(err) = self.inner.set_state(ControllerState::Disposed) {
            warn!(error = %err, "Dispose raced another transition");
        }
    }

    /// The live backend, if constructed
    pub fn backend(&self) -> Option<Arc<dyn MediaBackend>> {
        self.inner.resources().backend.clone()
    }

    pub fn container(&self) -> Option<ContainerId> {
        self.inner.resources().container.clone()
    }

    /// Quality-tier registry for the current load
    pub fn quality(&self) -> Option<Arc<QualityTierRegistry>> {
        self.inner
            .resources()
            .load
            .as_ref()
            .map(|load| load.registry.clone())
    }

    /// Whether the current load still owes its resume seek
    pub fn resume_pending(&self) -> bool {
        self.inner
            .resources()
            .load
            .as_ref()
            .is_some_and(|load| load.resume.is_pending())
    }

    /// Whether the current load has produced its terminal sample
    pub fn ended(&self) -> bool {
        self.inner
            .resources()
            .load
            .as_ref()
            .is_some_and(|load| load.tracker.terminal_emitted())
    }

    /// Manually select a quality tier
    pub async fn select_quality(&self, index: usize) -> Result<QualityTier> {
        let registry = self.quality().ok_or(Error::NotReady {
            state: self.state().to_string(),
        })?;
        registry.select(index).await
    }

    /// Selection menu for the current load
    pub async fn quality_menu(&self) -> Option<QualityMenu> {
        self.quality()?.menu().await
    }

    pub fn play(&self) -> Result<()> {
        self.ready_backend()?.play();
        Ok(())
    }

    pub fn pause(&self) -> Result<()> {
        self.ready_backend()?.pause();
        Ok(())
    }

    pub fn seek(&self, seconds: f64) -> Result<()> {
        self.ready_backend()?.seek(seconds);
        Ok(())
    }

    fn ready_backend(&self) -> Result<Arc<dyn MediaBackend>> {
        self.backend().ok_or_else(|| Error::NotReady {
            state: self.state().to_string(),
        })
    }
}

impl Drop for AdaptivePlayerController {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// React to backend events for one load: resume seek, discovery, errors
async fn run_load_events(
    inner: Arc<Inner>,
    backend: Arc<dyn MediaBackend>,
    registry: Arc<QualityTierRegistry>,
    resume: Arc<ResumeSeek>,
    discovery_task: Arc<Mutex<Option<JoinHandle<()>>>>,
    mut events: broadcast::Receiver<MediaEvent>,
) {
    let apply_resume = |origin: &'static str| {
        if !backend.has_metadata() {
            return;
        }
        if let Some(seconds) = resume.apply(backend.as_ref()) {
            info!(seconds, origin, "Resume position applied");
            inner.notify(ControllerEvent::ResumeApplied { seconds });
        }
    };

    // Metadata may already be present if the backend loaded synchronously
    // before this task started.
    if backend.has_metadata() {
        apply_resume("load");
        inner.start_discovery(&registry, &discovery_task);
    }

    loop {
        match events.recv().await {
            Ok(MediaEvent::Ready) => apply_resume("ready"),
            Ok(MediaEvent::LoadedMetadata(_)) => {
                apply_resume("loadedmetadata");
                inner.start_discovery(&registry, &discovery_task);
            }
            Ok(MediaEvent::Play) => {
                apply_resume("play");
                if backend.has_metadata() {
                    inner.start_discovery(&registry, &discovery_task);
                }
            }
            Ok(MediaEvent::Error { code }) => {
                let err = Error::engine(format!("media error code {}", code));
                error!(code, "Playback engine error, abandoning load");
                registry.dispose();
                inner.report_error(&err, true);
                break;
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Controller lagged behind backend events");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::FrameClock;
    use crate::simulated::{SimulatedBackend, SimulatedFactory, SimulatedQualityLevels};
    use crate::types::ProgressSample;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Harness {
        controller: AdaptivePlayerController,
        backend: Arc<SimulatedBackend>,
        factory: Arc<SimulatedFactory>,
        dom: Arc<FrameClock>,
        samples: mpsc::UnboundedReceiver<ProgressSample>,
    }

    fn harness(config: PlayerConfig, backend: SimulatedBackend) -> Harness {
        let backend = Arc::new(backend);
        let factory = Arc::new(SimulatedFactory::new(backend.clone()));
        let dom = Arc::new(FrameClock::new(Duration::from_millis(16)));
        let (tx, samples) = mpsc::unbounded_channel();
        let sink = move |sample: ProgressSample| {
            let _ = tx.send(sample);
        };
        let controller =
            AdaptivePlayerController::new(config, factory.clone(), dom.clone(), Arc::new(sink));
        Harness {
            controller,
            backend,
            factory,
            dom,
            samples,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ProgressSample>) -> Vec<ProgressSample> {
        let mut out = Vec::new();
        while let Ok(sample) = rx.try_recv() {
            out.push(sample);
        }
        out
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_resume_seek_applies_once() {
        let resume = ResumeSeek::new(42.0);
        let backend = SimulatedBackend::new();
        assert_eq!(resume.apply(&backend), Some(42.0));
        assert_eq!(resume.apply(&backend), None);
        assert_eq!(backend.seek_log(), vec![42.0]);
        assert!(!ResumeSeek::new(0.0).is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_waits_for_container() {
        let h = harness(PlayerConfig::default(), SimulatedBackend::new());
        let container = ContainerId::new("player");

        h.controller.attach(container.clone()).unwrap();
        assert_eq!(h.controller.state(), ControllerState::AwaitingDom);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(h.controller.state(), ControllerState::AwaitingDom);
        assert_eq!(h.factory.created_count(), 0);

        h.dom.mount(container);
        h.controller.wait_ready().await.unwrap();
        assert_eq!(h.controller.state(), ControllerState::Ready);
        assert_eq!(h.factory.created_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_timeout_returns_to_uninitialized() {
        let config = PlayerConfig {
            dom_attach_max_frames: Some(10),
            ..Default::default()
        };
        let h = harness(config, SimulatedBackend::new());
        h.controller.attach(ContainerId::new("missing")).unwrap();

        let err = h.controller.wait_ready().await.unwrap_err();
        assert!(matches!(err, Error::DomAttachTimeout { frames: 10, .. }));
        assert_eq!(h.controller.state(), ControllerState::Uninitialized);
    }

    #[tokio::test]
    async fn test_construction_failure_stays_uninitialized() {
        let factory = Arc::new(SimulatedFactory::failing("no video element"));
        let dom = Arc::new(FrameClock::new(Duration::from_millis(16)));
        let container = ContainerId::new("player");
        dom.mount(container.clone());
        let sink = |_: ProgressSample| {};
        let controller =
            AdaptivePlayerController::new(PlayerConfig::default(), factory, dom, Arc::new(sink));

        let err = controller.attach(container).unwrap_err();
        assert!(matches!(err, Error::BackendConstruction(_)));
        assert_eq!(controller.state(), ControllerState::Uninitialized);
        assert!(matches!(
            controller.wait_ready().await,
            Err(Error::BackendConstruction(_))
        ));
    }

    #[tokio::test]
    async fn test_load_requires_ready() {
        let h = harness(PlayerConfig::default(), SimulatedBackend::new());
        let source = PlaybackSource::new("https://x.test/v.m3u8", 0.0);
        assert!(matches!(h.controller.load(&source), Err(Error::NotReady { .. })));
    }

    #[tokio::test]
    async fn test_load_strips_query_and_seeks_after_metadata() {
        let mut h = harness(PlayerConfig::default(), SimulatedBackend::new());
        let container = ContainerId::new("player");
        h.dom.mount(container.clone());
        h.controller.attach(container).unwrap();

        let source = PlaybackSource::from_resume_url("https://x.test/v.m3u8?startTime=42");
        h.controller.load(&source).unwrap();
        settle().await;

        assert_eq!(
            h.backend.source().map(|s| s.url),
            Some("https://x.test/v.m3u8".to_string())
        );
        assert!(h.backend.seek_log().is_empty());
        assert!(h.controller.resume_pending());

        h.backend.fire(MediaEvent::Ready);
        settle().await;
        assert!(h.backend.seek_log().is_empty());

        h.backend.load_metadata(600.0);
        h.backend.fire(MediaEvent::Ready);
        h.backend.play();
        settle().await;

        assert_eq!(h.backend.seek_log(), vec![42.0]);
        assert!(!h.controller.resume_pending());

        let samples = drain(&mut h.samples);
        assert!(samples.iter().any(|s| s.current_time == 42.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_software_engine_forces_override_and_discovers() {
        let levels = Arc::new(SimulatedQualityLevels::populated_after(
            1,
            SimulatedQualityLevels::standard_ladder(),
        ));
        let h = harness(
            PlayerConfig::default(),
            SimulatedBackend::new().with_quality_levels(levels.clone()),
        );
        let container = ContainerId::new("player");
        h.dom.mount(container.clone());
        h.controller.attach(container).unwrap();
        assert!(h.factory.last_options().unwrap().override_native);

        h.controller
            .load(&PlaybackSource::new("https://x.test/v.m3u8", 0.0))
            .unwrap();
        h.backend.load_metadata(120.0);
        h.backend.play();
        tokio::time::sleep(Duration::from_secs(2)).await;

        let menu = h.controller.quality_menu().await.unwrap();
        assert_eq!(menu.items.len(), 3);
        assert_eq!(menu.selected().map(|i| i.label.as_str()), Some("720p"));
        assert_eq!(levels.poll_count(), 2);

        h.controller.select_quality(0).await.unwrap();
        let enabled: Vec<bool> = levels.snapshot().iter().map(|t| t.enabled).collect();
        assert_eq!(enabled, vec![true, false, false]);
    }

    #[tokio::test]
    async fn test_native_engine_keeps_native_decoding() {
        let h = harness(PlayerConfig::native_hls(), SimulatedBackend::new());
        let container = ContainerId::new("player");
        h.dom.mount(container.clone());
        h.controller.attach(container).unwrap();

        let options = h.factory.last_options().unwrap();
        assert!(!options.override_native);
        assert!(options.native_audio_tracks);
        assert!(options.native_video_tracks);
    }

    #[tokio::test]
    async fn test_dispose_emits_final_sample_once() {
        let mut h = harness(PlayerConfig::default(), SimulatedBackend::new());
        let container = ContainerId::new("player");
        h.dom.mount(container.clone());
        h.controller.attach(container).unwrap();
        h.controller
            .load(&PlaybackSource::new("https://x.test/v.m3u8", 0.0))
            .unwrap();
        h.backend.load_metadata(300.0);
        h.backend.play();
        h.backend.advance(33.0);
        settle().await;
        drain(&mut h.samples);

        h.controller.dispose();
        let after_first = drain(&mut h.samples);
        assert_eq!(after_first.len(), 1);
        assert_eq!(after_first[0].current_time, 33.0);
        assert!(h.backend.is_disposed());
        assert_eq!(h.controller.state(), ControllerState::Disposed);

        h.controller.dispose();
        settle().await;
        assert!(drain(&mut h.samples).is_empty());
        assert!(matches!(
            h.controller.load(&PlaybackSource::new("https://x.test/v.m3u8", 0.0)),
            Err(Error::Disposed)
        ));
    }

    #[tokio::test]
    async fn test_dispose_after_end_does_not_regress_terminal() {
        let mut h = harness(PlayerConfig::default(), SimulatedBackend::new());
        let container = ContainerId::new("player");
        h.dom.mount(container.clone());
        h.controller.attach(container).unwrap();
        h.controller
            .load(&PlaybackSource::new("https://x.test/v.m3u8", 0.0))
            .unwrap();
        h.backend.load_metadata(30.0);
        h.backend.play();
        h.backend.advance(30.0);
        settle().await;
        assert!(h.controller.ended());
        drain(&mut h.samples);

        h.controller.dispose();
        assert!(drain(&mut h.samples).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_while_awaiting_dom_cancels_polling() {
        let h = harness(PlayerConfig::default(), SimulatedBackend::new());
        let container = ContainerId::new("player");
        h.controller.attach(container.clone()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        h.controller.dispose();
        h.dom.mount(container);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(h.controller.state(), ControllerState::Disposed);
        assert_eq!(h.factory.created_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_cancels_discovery_retries() {
        let levels = Arc::new(SimulatedQualityLevels::populated_after(100, vec![]));
        let h = harness(
            PlayerConfig::default(),
            SimulatedBackend::new().with_quality_levels(levels.clone()),
        );
        let container = ContainerId::new("player");
        h.dom.mount(container.clone());
        h.controller.attach(container).unwrap();
        h.controller
            .load(&PlaybackSource::new("https://x.test/v.m3u8", 0.0))
            .unwrap();
        h.backend.load_metadata(120.0);
        tokio::time::sleep(Duration::from_millis(1000)).await;
        let polls_at_dispose = levels.poll_count();
        assert_eq!(polls_at_dispose, 2);

        h.controller.dispose();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(levels.poll_count(), polls_at_dispose);
    }

    #[tokio::test]
    async fn test_engine_error_is_surfaced() {
        let h = harness(PlayerConfig::default(), SimulatedBackend::new());
        let container = ContainerId::new("player");
        h.dom.mount(container.clone());
        h.controller.attach(container).unwrap();
        let mut events = h.controller.subscribe_events();
        h.controller
            .load(&PlaybackSource::new("https://x.test/v.m3u8", 0.0))
            .unwrap();
        h.backend.fire(MediaEvent::Error { code: 3 });
        settle().await;

        let mut saw_fatal = false;
        while let Ok(event) = events.try_recv() {
            if let ControllerEvent::Error { code, fatal, .. } = event {
                assert_eq!(code, "PLAYBACK_ENGINE");
                saw_fatal = fatal;
            }
        }
        assert!(saw_fatal);
    }
}
