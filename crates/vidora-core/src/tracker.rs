//! Progress Tracker
//!
//! Samples `(current_time, duration)` from the backend on a fixed interval
//! while playing, and immediately on pause, seek and metadata load.
//!
//! End-of-stream detection has two paths. The backend's native `Ended`
//! event is authoritative where it is reliable. Engines that drop it get
//! a position heuristic: the stream counts as ended once the remaining
//! time falls below the configured threshold. Either path latches, so a
//! load produces at most one terminal sample.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::backend::{MediaBackend, MediaEvent, Playhead};
use crate::config::PlayerConfig;
use crate::types::ProgressSample;

/// Receiver of progress samples
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, sample: ProgressSample);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressSample) + Send + Sync,
{
    fn on_progress(&self, sample: ProgressSample) {
        self(sample)
    }
}

struct TrackerShared {
    backend: Arc<dyn MediaBackend>,
    sink: Arc<dyn ProgressSink>,
    unreliable_end_events: bool,
    end_threshold: f64,
    terminal_emitted: AtomicBool,
    disposed: AtomicBool,
}

impl TrackerShared {
    fn on_tick(&self) {
        if !self.backend.paused() {
            self.emit_sample(Playhead::of(self.backend.as_ref()));
        }
    }

    fn on_event(&self, event: MediaEvent) {
        match event {
            MediaEvent::Pause(at) | MediaEvent::LoadedMetadata(at) => {
                self.emit_sample(at);
            }
            MediaEvent::Seeked(at) => {
                self.rearm_if_rewound(at);
                self.emit_sample(at);
            }
            MediaEvent::Ended => {
                self.emit_terminal("native end event");
            }
            MediaEvent::TimeUpdate(at) if self.unreliable_end_events => {
                if at.duration > 0.0
                    && at.current_time > 0.0
                    && at.duration - at.current_time < self.end_threshold
                {
                    self.emit_terminal("position heuristic");
                }
            }
            _ => {}
        }
    }

    /// A seek away from the end after the terminal sample starts a new watch-through
    fn rearm_if_rewound(&self, at: Playhead) {
        if !self.terminal_emitted.load(Ordering::SeqCst) {
            return;
        }
        if at.duration - at.current_time >= self.end_threshold {
            debug!(position = at.current_time, "Seek back after end, re-arming end detection");
            self.terminal_emitted.store(false, Ordering::SeqCst);
        }
    }

    fn emit_sample(&self, at: Playhead) -> Option<ProgressSample> {
        if self.disposed.load(Ordering::SeqCst) {
            return None;
        }
        if self.terminal_emitted.load(Ordering::SeqCst) {
            debug!("Terminal sample already emitted, suppressing progress sample");
            return None;
        }
        let sample = ProgressSample::new(at.current_time, at.duration);
        self.deliver(sample);
        Some(sample)
    }

    fn emit_terminal(&self, path: &'static str) -> Option<ProgressSample> {
        if self.disposed.load(Ordering::SeqCst) {
            return None;
        }
        if self
            .terminal_emitted
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return None;
        }
        let duration = Playhead::of(self.backend.as_ref()).duration;
        let sample = ProgressSample::terminal(duration);
        info!(duration, path, "End of stream detected");
        self.deliver(sample);
        Some(sample)
    }

    fn deliver(&self, sample: ProgressSample) {
        self.sink.on_progress(sample);
    }
}

/// Progress sampling for one load
pub struct ProgressTracker {
    shared: Arc<TrackerShared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ProgressTracker {
    /// Subscribe to `backend` and start the sampling interval
    pub fn start(
        backend: Arc<dyn MediaBackend>,
        sink: Arc<dyn ProgressSink>,
        config: &PlayerConfig,
    ) -> Self {
        let events = backend.subscribe();
        let shared = Arc::new(TrackerShared {
            backend,
            sink,
            unreliable_end_events: config.native_streaming_preferred,
            end_threshold: config.end_threshold_secs,
            terminal_emitted: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        });

        let task = tokio::spawn(run(shared.clone(), events, config.progress_interval()));

        Self {
            shared,
            task: Mutex::new(Some(task)),
        }
    }

    /// Emit the last sample before teardown.
    ///
    /// Skipped when nothing was watched or the terminal sample already fired.
    pub fn emit_final(&self) -> Option<ProgressSample> {
        if self.terminal_emitted() {
            return None;
        }
        let at = Playhead::of(self.shared.backend.as_ref());
        if at.current_time > 0.0 {
            self.shared.emit_sample(at)
        } else {
            None
        }
    }

    pub fn terminal_emitted(&self) -> bool {
        self.shared.terminal_emitted.load(Ordering::SeqCst)
    }

    /// Stop the interval and event loop. Idempotent.
    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
        }
        debug!("Progress tracker disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::SeqCst)
    }
}

impl Drop for ProgressTracker {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn run(
    shared: Arc<TrackerShared>,
    mut events: broadcast::Receiver<MediaEvent>,
    period: Duration,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => shared.on_tick(),
            event = events.recv() => match event {
                Ok(event) => shared.on_event(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Progress tracker lagged behind backend events");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MediaSource;
    use crate::simulated::SimulatedBackend;
    use tokio::sync::mpsc;

    fn channel_sink() -> (Arc<dyn ProgressSink>, mpsc::UnboundedReceiver<ProgressSample>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = move |sample: ProgressSample| {
            let _ = tx.send(sample);
        };
        (Arc::new(sink), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ProgressSample>) -> Vec<ProgressSample> {
        let mut out = Vec::new();
        while let Ok(sample) = rx.try_recv() {
            out.push(sample);
        }
        out
    }

    /// Backend with a source loaded and no metadata yet
    fn loaded_backend(reliable_end: bool) -> Arc<SimulatedBackend> {
        let backend = SimulatedBackend::new();
        let backend = if reliable_end { backend } else { backend.with_unreliable_end() };
        backend
            .load_source(&MediaSource::hls("https://x.test/a.m3u8"))
            .unwrap();
        Arc::new(backend)
    }

    /// Let the tracker task drain its event queue
    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_samples_only_while_playing() {
        let backend = loaded_backend(true);
        let (sink, mut rx) = channel_sink();
        let tracker = ProgressTracker::start(backend.clone(), sink, &PlayerConfig::default());

        backend.load_metadata(600.0);
        settle().await;
        assert_eq!(drain(&mut rx).len(), 1);

        // paused: ticks produce nothing
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(drain(&mut rx).is_empty());

        backend.play();
        backend.advance(30.0);
        settle().await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        settle().await;
        let samples = drain(&mut rx);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].current_time, 30.0);
        assert!(!samples[0].ended);

        tracker.dispose();
    }

    #[tokio::test]
    async fn test_pause_and_seek_sample_immediately() {
        let backend = loaded_backend(true);
        let (sink, mut rx) = channel_sink();
        let _tracker = ProgressTracker::start(backend.clone(), sink, &PlayerConfig::default());

        backend.load_metadata(600.0);
        backend.play();
        backend.advance(12.0);
        backend.pause();
        backend.seek(100.0);
        settle().await;

        let times: Vec<f64> = drain(&mut rx).iter().map(|s| s.current_time).collect();
        assert_eq!(times, vec![0.0, 12.0, 100.0]);
    }

    #[tokio::test]
    async fn test_native_end_event_emits_single_terminal() {
        let backend = loaded_backend(true);
        let (sink, mut rx) = channel_sink();
        let tracker = ProgressTracker::start(backend.clone(), sink, &PlayerConfig::default());

        backend.load_metadata(60.0);
        backend.play();
        backend.advance(61.0);
        backend.fire(MediaEvent::Ended);
        settle().await;

        let samples = drain(&mut rx);
        let terminal: Vec<_> = samples.iter().filter(|s| s.ended).collect();
        assert_eq!(terminal.len(), 1);
        assert_eq!(terminal[0].current_time, 60.0);
        assert_eq!(terminal[0].duration, 60.0);
        assert!(tracker.terminal_emitted());
        assert!(samples.last().is_some_and(|s| s.ended));
    }

    #[tokio::test]
    async fn test_heuristic_end_on_unreliable_engine() {
        let backend = loaded_backend(false);
        let (sink, mut rx) = channel_sink();
        let tracker =
            ProgressTracker::start(backend.clone(), sink, &PlayerConfig::native_hls());

        backend.load_metadata(60.0);
        backend.play();
        backend.advance(59.7);
        backend.fire(MediaEvent::TimeUpdate(Playhead::new(59.7, 60.0)));
        backend.fire(MediaEvent::TimeUpdate(Playhead::new(59.8, 60.0)));
        settle().await;

        let terminal: Vec<_> = drain(&mut rx).into_iter().filter(|s| s.ended).collect();
        assert_eq!(terminal.len(), 1);
        assert!(tracker.terminal_emitted());
    }

    #[tokio::test]
    async fn test_queued_events_use_position_at_emission() {
        let backend = loaded_backend(false);
        let (sink, mut rx) = channel_sink();
        let tracker =
            ProgressTracker::start(backend.clone(), sink, &PlayerConfig::native_hls());

        // all of these are queued before the tracker task runs
        backend.load_metadata(60.0);
        backend.play();
        backend.advance(59.8);
        backend.seek(10.0);
        settle().await;

        let samples = drain(&mut rx);
        let times: Vec<(f64, bool)> = samples.iter().map(|s| (s.current_time, s.ended)).collect();
        assert_eq!(times, vec![(0.0, false), (60.0, true), (10.0, false)]);
        assert!(!tracker.terminal_emitted());
    }

    #[tokio::test]
    async fn test_heuristic_disabled_on_reliable_engine() {
        let backend = loaded_backend(true);
        let (sink, mut rx) = channel_sink();
        let tracker = ProgressTracker::start(backend.clone(), sink, &PlayerConfig::default());

        backend.load_metadata(60.0);
        backend.play();
        backend.advance(59.8);
        settle().await;

        assert!(drain(&mut rx).iter().all(|s| !s.ended));
        assert!(!tracker.terminal_emitted());
    }

    #[tokio::test]
    async fn test_seek_back_rearms_end_detection() {
        let backend = loaded_backend(true);
        let (sink, mut rx) = channel_sink();
        let tracker = ProgressTracker::start(backend.clone(), sink, &PlayerConfig::default());

        backend.load_metadata(60.0);
        backend.play();
        backend.advance(60.0);
        settle().await;
        assert!(tracker.terminal_emitted());
        drain(&mut rx);

        backend.seek(10.0);
        settle().await;
        assert!(!tracker.terminal_emitted());
        let samples = drain(&mut rx);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].current_time, 10.0);
    }

    #[tokio::test]
    async fn test_emit_final_and_dispose() {
        let backend = loaded_backend(true);
        let (sink, mut rx) = channel_sink();
        let tracker = ProgressTracker::start(backend.clone(), sink, &PlayerConfig::default());

        assert_eq!(tracker.emit_final(), None);

        backend.load_metadata(600.0);
        backend.play();
        backend.advance(42.0);
        settle().await;
        drain(&mut rx);

        let last = tracker.emit_final().unwrap();
        assert_eq!(last.current_time, 42.0);

        tracker.dispose();
        tracker.dispose();
        assert!(tracker.is_disposed());
        backend.pause();
        settle().await;
        assert_eq!(drain(&mut rx).len(), 1);
    }
}
