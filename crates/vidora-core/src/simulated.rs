//! Scriptable media backend
//!
//! A headless stand-in for the browser's video element and HLS plugin.
//! Used by the test suite and by the CLI's `simulate` command.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::debug;

use crate::backend::{BackendFactory, MediaBackend, MediaEvent, Playhead, QualityLevels, TierInfo};
use crate::config::{BackendOptions, MediaSource};
use crate::dom::ContainerId;
use crate::{Error, Result};

#[derive(Debug, Default)]
struct PlaybackState {
    current_time: f64,
    duration: f64,
    paused: bool,
    has_metadata: bool,
    disposed: bool,
    source: Option<MediaSource>,
    seeks: Vec<f64>,
}

impl PlaybackState {
    fn playhead(&self) -> Playhead {
        let duration = if self.has_metadata { self.duration } else { 0.0 };
        Playhead::new(self.current_time, duration)
    }
}

/// Simulated media element
pub struct SimulatedBackend {
    state: Mutex<PlaybackState>,
    events: broadcast::Sender<MediaEvent>,
    levels: Option<Arc<SimulatedQualityLevels>>,
    /// Fires `Ended` when playback reaches the end
    fires_ended: bool,
    /// Duration to report automatically after `load_source`
    auto_metadata: Option<f64>,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            state: Mutex::new(PlaybackState {
                paused: true,
                ..Default::default()
            }),
            events,
            levels: None,
            fires_ended: true,
            auto_metadata: None,
        }
    }

    /// Attach a tier-introspection collection
    pub fn with_quality_levels(mut self, levels: Arc<SimulatedQualityLevels>) -> Self {
        self.levels = Some(levels);
        self
    }

    /// Behave like an engine whose native end event never fires
    pub fn with_unreliable_end(mut self) -> Self {
        self.fires_ended = false;
        self
    }

    /// Emit `Ready` and `LoadedMetadata` with `duration` on every load
    pub fn with_auto_metadata(mut self, duration: f64) -> Self {
        self.auto_metadata = Some(duration);
        self
    }

    fn state(&self) -> MutexGuard<'_, PlaybackState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: MediaEvent) {
        if self.state().disposed {
            return;
        }
        let _ = self.events.send(event);
    }

    /// Emit an arbitrary event
    pub fn fire(&self, event: MediaEvent) {
        self.emit(event);
    }

    /// Report metadata for the current source
    pub fn load_metadata(&self, duration: f64) {
        let at = {
            let mut state = self.state();
            state.duration = duration;
            state.has_metadata = true;
            state.playhead()
        };
        self.emit(MediaEvent::LoadedMetadata(at));
    }

    /// Advance the playhead by `seconds` if playing
    pub fn advance(&self, seconds: f64) {
        let (at, reached_end) = {
            let mut state = self.state();
            if state.paused || state.disposed || !state.has_metadata {
                return;
            }
            state.current_time = (state.current_time + seconds).min(state.duration);
            let reached_end = state.current_time >= state.duration;
            if reached_end {
                state.paused = true;
            }
            (state.playhead(), reached_end)
        };

        self.emit(MediaEvent::TimeUpdate(at));
        if reached_end {
            self.emit(MediaEvent::Pause(at));
            if self.fires_ended {
                self.emit(MediaEvent::Ended);
            }
        }
    }

    /// Positions passed to `seek`, in call order
    pub fn seek_log(&self) -> Vec<f64> {
        self.state().seeks.clone()
    }

    pub fn source(&self) -> Option<MediaSource> {
        self.state().source.clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.state().disposed
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaBackend for SimulatedBackend {
    fn current_time(&self) -> f64 {
        self.state().current_time
    }

    fn duration(&self) -> f64 {
        let state = self.state();
        if state.has_metadata {
            state.duration
        } else {
            f64::NAN
        }
    }

    fn paused(&self) -> bool {
        self.state().paused
    }

    fn has_metadata(&self) -> bool {
        self.state().has_metadata
    }

    fn play(&self) {
        {
            let mut state = self.state();
            if state.disposed || !state.paused {
                return;
            }
            if state.has_metadata && state.current_time >= state.duration {
                state.current_time = 0.0;
            }
            state.paused = false;
        }
        self.emit(MediaEvent::Play);
    }

    fn pause(&self) {
        let at = {
            let mut state = self.state();
            if state.disposed || state.paused {
                return;
            }
            state.paused = true;
            state.playhead()
        };
        self.emit(MediaEvent::Pause(at));
    }

    fn seek(&self, seconds: f64) {
        let at = {
            let mut state = self.state();
            if state.disposed {
                return;
            }
            state.seeks.push(seconds);
            let upper = if state.has_metadata { state.duration } else { f64::INFINITY };
            state.current_time = seconds.clamp(0.0, upper);
            state.playhead()
        };
        self.emit(MediaEvent::Seeked(at));
    }

    fn load_source(&self, source: &MediaSource) -> Result<()> {
        {
            let mut state = self.state();
            if state.disposed {
                return Err(Error::Disposed);
            }
            debug!(url = %source.url, "Simulated backend loading source");
            state.source = Some(source.clone());
            state.current_time = 0.0;
            state.duration = 0.0;
            state.has_metadata = false;
            state.paused = true;
        }
        if let Some(duration) = self.auto_metadata {
            self.emit(MediaEvent::Ready);
            self.load_metadata(duration);
        }
        Ok(())
    }

    fn dispose(&self) {
        self.state().disposed = true;
    }

    fn subscribe(&self) -> broadcast::Receiver<MediaEvent> {
        self.events.subscribe()
    }

    fn quality_levels(&self) -> Option<Arc<dyn QualityLevels>> {
        self.levels
            .clone()
            .map(|levels| levels as Arc<dyn QualityLevels>)
    }
}

/// Simulated tier list that populates lazily
pub struct SimulatedQualityLevels {
    tiers: Mutex<Vec<TierInfo>>,
    /// Number of `len()` polls that observe the pending state
    pending_polls: usize,
    /// Pending state reports no length at all
    uninitialized_while_pending: bool,
    polls: AtomicUsize,
}

impl SimulatedQualityLevels {
    /// Tiers visible from the first poll
    pub fn ready(tiers: Vec<TierInfo>) -> Self {
        Self::populated_after(0, tiers)
    }

    /// Tiers appear on poll number `pending_polls + 1`
    pub fn populated_after(pending_polls: usize, tiers: Vec<TierInfo>) -> Self {
        Self {
            tiers: Mutex::new(tiers),
            pending_polls,
            uninitialized_while_pending: false,
            polls: AtomicUsize::new(0),
        }
    }

    /// Pending polls see an uninitialized collection instead of an empty one
    pub fn uninitialized_while_pending(mut self) -> Self {
        self.uninitialized_while_pending = true;
        self
    }

    /// A typical HLS ladder with the 720p rendition active
    pub fn standard_ladder() -> Vec<TierInfo> {
        vec![
            TierInfo { height: Some(360), bandwidth: Some(800_000), enabled: false },
            TierInfo { height: Some(720), bandwidth: Some(2_800_000), enabled: true },
            TierInfo { height: Some(1080), bandwidth: Some(5_000_000), enabled: false },
        ]
    }

    /// How many times the length has been read
    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> Vec<TierInfo> {
        self.tiers.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn visible(&self) -> bool {
        self.polls.load(Ordering::SeqCst) > self.pending_polls
    }
}

impl QualityLevels for SimulatedQualityLevels {
    fn len(&self) -> Option<usize> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        if self.visible() {
            Some(self.tiers.lock().unwrap_or_else(|e| e.into_inner()).len())
        } else if self.uninitialized_while_pending {
            None
        } else {
            Some(0)
        }
    }

    fn get(&self, index: usize) -> Option<TierInfo> {
        if !self.visible() {
            return None;
        }
        self.tiers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(index)
            .copied()
    }

    fn set_enabled(&self, index: usize, enabled: bool) {
        if let Some(tier) = self
            .tiers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(index)
        {
            tier.enabled = enabled;
        }
    }
}

/// Factory handing out one pre-built simulated backend
pub struct SimulatedFactory {
    backend: Arc<SimulatedBackend>,
    failure: Option<String>,
    created: AtomicUsize,
    last_options: Mutex<Option<BackendOptions>>,
}

impl SimulatedFactory {
    pub fn new(backend: Arc<SimulatedBackend>) -> Self {
        Self {
            backend,
            failure: None,
            created: AtomicUsize::new(0),
            last_options: Mutex::new(None),
        }
    }

    /// A factory whose construction always fails
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::new(Arc::new(SimulatedBackend::new()))
        }
    }

    pub fn backend(&self) -> Arc<SimulatedBackend> {
        self.backend.clone()
    }

    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn last_options(&self) -> Option<BackendOptions> {
        self.last_options
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl BackendFactory for SimulatedFactory {
    fn create(
        &self,
        container: &ContainerId,
        options: &BackendOptions,
    ) -> Result<Arc<dyn MediaBackend>> {
        if let Some(message) = &self.failure {
            return Err(Error::BackendConstruction(message.clone()));
        }
        debug!(container = %container, override_native = options.override_native, "Creating simulated backend");
        self.created.fetch_add(1, Ordering::SeqCst);
        *self.last_options.lock().unwrap_or_else(|e| e.into_inner()) = Some(options.clone());
        Ok(self.backend.clone() as Arc<dyn MediaBackend>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lazy_population() {
        let levels = SimulatedQualityLevels::populated_after(2, SimulatedQualityLevels::standard_ladder());
        assert_eq!(levels.len(), Some(0));
        assert_eq!(levels.len(), Some(0));
        assert_eq!(levels.len(), Some(3));
        assert_eq!(levels.poll_count(), 3);
    }

    #[test]
    fn test_uninitialized_pending_state() {
        let levels = SimulatedQualityLevels::populated_after(1, vec![])
            .uninitialized_while_pending();
        assert_eq!(levels.len(), None);
        assert_eq!(levels.len(), Some(0));
    }

    #[tokio::test]
    async fn test_playback_reaches_end() {
        let backend = SimulatedBackend::new();
        let mut rx = backend.subscribe();
        backend.load_source(&MediaSource::hls("https://x.test/a.m3u8")).unwrap();
        backend.load_metadata(10.0);
        backend.play();
        backend.advance(12.0);

        assert_eq!(backend.current_time(), 10.0);
        assert!(backend.paused());

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(event);
        }
        assert_eq!(
            seen,
            vec![
                MediaEvent::LoadedMetadata(Playhead::new(0.0, 10.0)),
                MediaEvent::Play,
                MediaEvent::TimeUpdate(Playhead::new(10.0, 10.0)),
                MediaEvent::Pause(Playhead::new(10.0, 10.0)),
                MediaEvent::Ended,
            ]
        );
    }

    #[test]
    fn test_failing_factory() {
        let factory = SimulatedFactory::failing("boom");
        let result = factory.create(&ContainerId::new("p"), &crate::PlayerConfig::default().backend_options());
        assert!(matches!(result, Err(Error::BackendConstruction(_))));
        assert_eq!(factory.created_count(), 0);
    }
}
