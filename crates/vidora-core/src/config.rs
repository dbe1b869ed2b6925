//! Configuration for the playback session core

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::{Error, Result};

/// Quality-tier discovery retry policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Total polling attempts before giving up
    pub max_attempts: u32,
    /// Fixed delay between attempts (ms)
    pub retry_delay_ms: u64,
    /// Delay before the first attempt (ms)
    pub initial_delay_ms: u64,
    /// Delay before the first attempt on native-HLS engines (ms)
    pub native_initial_delay_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            retry_delay_ms: 800,
            initial_delay_ms: 0,
            native_initial_delay_ms: 1500,
        }
    }
}

impl DiscoveryConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Delay before the first attempt for the given engine preference
    pub fn first_attempt_delay(&self, native_streaming_preferred: bool) -> Duration {
        if native_streaming_preferred {
            Duration::from_millis(self.native_initial_delay_ms.max(self.initial_delay_ms))
        } else {
            Duration::from_millis(self.initial_delay_ms)
        }
    }
}

/// Player configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Engine decodes HLS natively and fires unreliable end events.
    /// Resolved once by the host; never sniffed by the core.
    pub native_streaming_preferred: bool,
    /// Periodic progress sampling interval (ms)
    pub progress_interval_ms: u64,
    /// Remaining time below which playback counts as ended (seconds)
    pub end_threshold_secs: f64,
    /// Cadence of DOM presence checks (ms)
    pub frame_interval_ms: u64,
    /// Maximum frames to wait for the container (`None` = wait forever)
    pub dom_attach_max_frames: Option<u32>,
    /// Quality-tier discovery policy
    pub discovery: DiscoveryConfig,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            native_streaming_preferred: false,
            progress_interval_ms: 5000,
            end_threshold_secs: 0.5,
            frame_interval_ms: 16,
            dom_attach_max_frames: Some(600),
            discovery: DiscoveryConfig::default(),
        }
    }
}

impl PlayerConfig {
    /// Config for engines that decode HLS natively
    pub fn native_hls() -> Self {
        Self {
            native_streaming_preferred: true,
            ..Default::default()
        }
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    /// Backend construction options derived from this config
    pub fn backend_options(&self) -> BackendOptions {
        let native = self.native_streaming_preferred;
        BackendOptions {
            autoplay: false,
            controls: true,
            responsive: true,
            fluid: true,
            override_native: !native,
            fast_quality_change: true,
            use_device_pixel_ratio: true,
            native_audio_tracks: native,
            native_video_tracks: native,
        }
    }

    /// Validate value ranges
    pub fn validate(&self) -> Result<()> {
        if self.progress_interval_ms == 0 {
            return Err(Error::InvalidConfig("progress_interval_ms must be > 0".into()));
        }
        if self.frame_interval_ms == 0 {
            return Err(Error::InvalidConfig("frame_interval_ms must be > 0".into()));
        }
        if !(self.end_threshold_secs.is_finite() && self.end_threshold_secs >= 0.0) {
            return Err(Error::InvalidConfig("end_threshold_secs must be >= 0".into()));
        }
        if self.discovery.max_attempts == 0 {
            return Err(Error::InvalidConfig("discovery.max_attempts must be > 0".into()));
        }
        Ok(())
    }
}

/// A source handed to the media backend's manifest loader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaSource {
    pub url: String,
    pub mime_type: String,
}

impl MediaSource {
    pub const HLS_MIME: &'static str = "application/x-mpegURL";

    pub fn hls(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            mime_type: Self::HLS_MIME.to_string(),
        }
    }
}

/// Options passed to the media backend factory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendOptions {
    pub autoplay: bool,
    pub controls: bool,
    pub responsive: bool,
    pub fluid: bool,
    /// Force software-managed adaptive streaming over the native decoder
    pub override_native: bool,
    pub fast_quality_change: bool,
    pub use_device_pixel_ratio: bool,
    pub native_audio_tracks: bool,
    pub native_video_tracks: bool,
}

/// Continue-watching store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum records kept per namespace
    pub capacity: usize,
    /// Storage key prefix
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            key_prefix: "continue-watching".to_string(),
        }
    }
}

/// Top-level configuration for a playback session host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub player: PlayerConfig,
    pub store: StoreConfig,
    /// Base URL that relative content paths are resolved against
    pub static_base_url: Option<String>,
}

impl SessionConfig {
    /// Load from a JSON file; absent fields take their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: SessionConfig = serde_json::from_str(&raw)?;
        config.player.validate()?;
        Ok(config)
    }
}
