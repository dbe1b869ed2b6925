//! Core types for Vidora

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::resume_url;

/// Unique identifier for a playback session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A playable source plus the offset to resume from.
///
/// The resume offset never travels to the media backend inside the URL;
/// the controller strips the query and seeks imperatively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSource {
    pub base_url: String,
    pub resume_seconds: f64,
}

impl PlaybackSource {
    pub fn new(base_url: impl Into<String>, resume_seconds: f64) -> Self {
        Self {
            base_url: base_url.into(),
            resume_seconds: sanitize_seconds(resume_seconds),
        }
    }

    /// Build a source from a URL that may carry a `startTime` parameter
    pub fn from_resume_url(url: &str) -> Self {
        Self::new(url, resume_url::decode(url))
    }

    /// The bare manifest URL handed to the backend
    pub fn manifest_url(&self) -> String {
        resume_url::strip_query(&self.base_url)
    }
}

/// A selectable bitrate/resolution rendition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityTier {
    pub index: usize,
    /// `None` marks the implicit "Auto" tier
    pub height: Option<u32>,
    pub bandwidth_bps: Option<u64>,
    pub enabled: bool,
}

impl QualityTier {
    pub fn is_auto(&self) -> bool {
        self.height.is_none()
    }

    /// Human-readable label for menus and notifications
    pub fn label(&self) -> String {
        match self.height {
            None | Some(0) => "Auto".to_string(),
            Some(h) if h >= 1080 => "1080p".to_string(),
            Some(h) if h >= 720 => "720p".to_string(),
            Some(h) if h >= 480 => "480p".to_string(),
            Some(h) => format!("{}p", h),
        }
    }
}

/// A single position sample emitted by the progress tracker
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressSample {
    pub current_time: f64,
    pub duration: f64,
    pub ended: bool,
}

impl ProgressSample {
    pub fn new(current_time: f64, duration: f64) -> Self {
        Self {
            current_time: sanitize_seconds(current_time),
            duration: sanitize_seconds(duration),
            ended: false,
        }
    }

    /// Terminal sample: the position is pinned to the end of the stream
    pub fn terminal(duration: f64) -> Self {
        let duration = sanitize_seconds(duration);
        Self {
            current_time: duration,
            duration,
            ended: true,
        }
    }
}

/// Persisted "continue watching" entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    pub video_id: String,
    pub current_time_seconds: f64,
    pub duration_seconds: f64,
    pub title: String,
    pub thumbnail_url: String,
    pub source_url: String,
    pub last_watched_at_epoch_ms: i64,
    pub ended: bool,
}

impl ProgressRecord {
    /// Enforce record invariants: non-negative times, finished videos resume from zero
    pub fn normalized(mut self) -> Self {
        self.current_time_seconds = sanitize_seconds(self.current_time_seconds);
        self.duration_seconds = sanitize_seconds(self.duration_seconds);
        if self.ended {
            self.current_time_seconds = 0.0;
        }
        self
    }

    /// Offset to resume from, if this record is worth resuming
    pub fn resume_seconds(&self) -> Option<f64> {
        if self.ended || self.current_time_seconds <= 0.0 {
            None
        } else {
            Some(self.current_time_seconds)
        }
    }

    /// Fraction watched in `0.0..=1.0`
    pub fn fraction_watched(&self) -> f64 {
        if self.ended {
            return 1.0;
        }
        if self.duration_seconds <= 0.0 {
            return 0.0;
        }
        (self.current_time_seconds / self.duration_seconds).clamp(0.0, 1.0)
    }
}

/// Ordered, de-duplicated list of progress records, newest first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContinueWatchingList(Vec<ProgressRecord>);

impl ContinueWatchingList {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Build from arbitrary records: sorts newest first and drops duplicate ids
    pub fn from_records(mut records: Vec<ProgressRecord>) -> Self {
        records.sort_by(|a, b| b.last_watched_at_epoch_ms.cmp(&a.last_watched_at_epoch_ms));
        let mut seen = std::collections::HashSet::new();
        records.retain(|r| seen.insert(r.video_id.clone()));
        Self(records)
    }

    /// Insert or replace a record, moving it to the front
    pub fn upsert(&mut self, record: ProgressRecord, capacity: usize) {
        self.0.retain(|r| r.video_id != record.video_id);
        self.0.insert(0, record);
        self.0.truncate(capacity);
    }

    /// Remove a record, returning whether anything was removed
    pub fn remove(&mut self, video_id: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|r| r.video_id != video_id);
        self.0.len() != before
    }

    pub fn get(&self, video_id: &str) -> Option<&ProgressRecord> {
        self.0.iter().find(|r| r.video_id == video_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ProgressRecord> {
        self.0.iter()
    }

    pub fn first(&self) -> Option<&ProgressRecord> {
        self.0.first()
    }

    pub fn into_vec(self) -> Vec<ProgressRecord> {
        self.0
    }
}

impl<'a> IntoIterator for &'a ContinueWatchingList {
    type Item = &'a ProgressRecord;
    type IntoIter = std::slice::Iter<'a, ProgressRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Per-user partition of the continue-watching storage
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Namespace {
    User(String),
    Guest,
}

impl Namespace {
    /// Namespace for an optional authenticated user id
    pub fn for_user(user_id: Option<&str>) -> Self {
        match user_id.map(str::trim) {
            Some(id) if !id.is_empty() => Namespace::User(id.to_string()),
            _ => Namespace::Guest,
        }
    }

    /// Storage key for this namespace
    pub fn storage_key(&self, prefix: &str) -> String {
        match self {
            Namespace::User(id) => format!("{}:user:{}", prefix, id),
            Namespace::Guest => format!("{}:guest", prefix),
        }
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Namespace::User(id) => write!(f, "user:{}", id),
            Namespace::Guest => write!(f, "guest"),
        }
    }
}

/// Adaptive player controller lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControllerState {
    /// No backend, nothing attached
    Uninitialized,
    /// Waiting for the container element to be mounted
    AwaitingDom,
    /// Backend constructed, sources may be loaded
    Ready,
    /// Torn down; terminal
    Disposed,
}

impl ControllerState {
    /// Check if transition to target state is valid
    pub fn can_transition_to(&self, target: ControllerState) -> bool {
        use ControllerState::*;
        matches!(
            (self, target),
            (Uninitialized, AwaitingDom) |
            (AwaitingDom, Ready) |
            (AwaitingDom, Uninitialized) |
            (Uninitialized, Disposed) |
            (AwaitingDom, Disposed) |
            (Ready, Disposed)
        )
    }
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControllerState::Uninitialized => write!(f, "uninitialized"),
            ControllerState::AwaitingDom => write!(f, "awaiting_dom"),
            ControllerState::Ready => write!(f, "ready"),
            ControllerState::Disposed => write!(f, "disposed"),
        }
    }
}

/// Format seconds as `m:ss`
pub fn format_timestamp(seconds: f64) -> String {
    let total = sanitize_seconds(seconds).floor() as u64;
    format!("{}:{:02}", total / 60, total % 60)
}

/// Clamp NaN, infinite and negative values to zero
pub(crate) fn sanitize_seconds(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}
