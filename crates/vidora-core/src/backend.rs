//! Media backend contract
//!
//! The HLS decoding engine is a black box. The core drives it through
//! [`MediaBackend`] and observes it through a broadcast stream of
//! [`MediaEvent`]s. Tier introspection is an optional extension exposed
//! via [`MediaBackend::quality_levels`].

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::config::{BackendOptions, MediaSource};
use crate::dom::ContainerId;
use crate::Result;

/// Playhead position captured when an event fired
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Playhead {
    pub current_time: f64,
    pub duration: f64,
}

impl Playhead {
    /// Non-finite or negative values are clamped to zero
    pub fn new(current_time: f64, duration: f64) -> Self {
        Self {
            current_time: crate::types::sanitize_seconds(current_time),
            duration: crate::types::sanitize_seconds(duration),
        }
    }

    /// Position of `backend` right now
    pub fn of(backend: &dyn MediaBackend) -> Self {
        Self::new(backend.current_time(), backend.duration())
    }
}

/// Events emitted by the media backend.
///
/// Position-bearing events carry the playhead as it was when the event
/// fired; subscribers may observe them later.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MediaEvent {
    /// Backend finished its own initialization
    Ready,
    /// Duration and dimensions known; seeking is meaningful from here on
    LoadedMetadata(Playhead),
    Play,
    Pause(Playhead),
    Seeked(Playhead),
    /// Native end-of-stream (unreliable on some engines)
    Ended,
    /// Position advanced
    TimeUpdate(Playhead),
    /// Fatal decode/network failure for the current load
    Error { code: u32 },
}

/// Raw tier metadata as reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierInfo {
    pub height: Option<u32>,
    pub bandwidth: Option<u64>,
    pub enabled: bool,
}

/// Tier-introspection extension: an indexable, length-bearing collection
/// with a writable `enabled` flag per tier.
pub trait QualityLevels: Send + Sync {
    /// Number of tiers, or `None` while the collection is uninitialized
    fn len(&self) -> Option<usize>;

    /// Tier at `index`
    fn get(&self, index: usize) -> Option<TierInfo>;

    /// Write the `enabled` flag of one tier
    fn set_enabled(&self, index: usize, enabled: bool);

    fn is_empty(&self) -> bool {
        self.len().map_or(true, |n| n == 0)
    }
}

/// Imperative surface of the media backend
pub trait MediaBackend: Send + Sync {
    /// Current playback position in seconds
    fn current_time(&self) -> f64;

    /// Stream duration in seconds (0 or NaN until metadata is loaded)
    fn duration(&self) -> f64;

    fn paused(&self) -> bool;

    /// Whether metadata for the current source has loaded
    fn has_metadata(&self) -> bool;

    fn play(&self);

    fn pause(&self);

    fn seek(&self, seconds: f64);

    /// Replace the current source
    fn load_source(&self, source: &MediaSource) -> Result<()>;

    /// Release the backend; further calls are no-ops
    fn dispose(&self);

    /// Subscribe to backend events
    fn subscribe(&self) -> broadcast::Receiver<MediaEvent>;

    /// Optional tier-introspection capability
    fn quality_levels(&self) -> Option<Arc<dyn QualityLevels>> {
        None
    }
}

/// Constructs media backends bound to a mounted container
pub trait BackendFactory: Send + Sync {
    fn create(
        &self,
        container: &ContainerId,
        options: &BackendOptions,
    ) -> Result<Arc<dyn MediaBackend>>;
}

impl<F> BackendFactory for F
where
    F: Fn(&ContainerId, &BackendOptions) -> Result<Arc<dyn MediaBackend>> + Send + Sync,
{
    fn create(
        &self,
        container: &ContainerId,
        options: &BackendOptions,
    ) -> Result<Arc<dyn MediaBackend>> {
        self(container, options)
    }
}
