//! Vidora Core - Playback Session Library for Vidora
//!
//! This crate provides the playback session core of the Vidora video catalog:
//! - Adaptive player lifecycle bound to DOM readiness
//! - Quality-tier discovery with bounded retry, and manual selection
//! - Progress sampling with dual-path end-of-stream detection
//! - Per-user "continue watching" persistence
//! - Resume offsets carried in the playable URL
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Vidora Core                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐           │
//! │  │   Content    │  │    Resume    │  │   Progress   │           │
//! │  │     API      │  │   URL Codec  │  │    Store     │           │
//! │  └──────┬───────┘  └──────┬───────┘  └──────▲───────┘           │
//! │         │                 │                 │                   │
//! │         └─────────────────┼─────────────────┤                   │
//! │                           │                 │                   │
//! │                    ┌──────┴──────┐          │                   │
//! │                    │  Playback   │          │                   │
//! │                    │   Session   │          │                   │
//! │                    └──────┬──────┘          │                   │
//! │                           │                 │                   │
//! │  ┌──────────────┐  ┌──────┴──────┐  ┌───────┴──────┐            │
//! │  │ Quality-Tier │◀─┤   Player    ├─▶│   Progress   │            │
//! │  │   Registry   │  │ Controller  │  │   Tracker    │            │
//! │  └──────────────┘  └──────┬──────┘  └──────────────┘            │
//! │                           │                                     │
//! │                    ┌──────┴──────┐                              │
//! │                    │    Media    │                              │
//! │                    │   Backend   │                              │
//! │                    └─────────────┘                              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod types;
pub mod config;
pub mod resume_url;
pub mod backend;
pub mod dom;
pub mod quality;
pub mod tracker;
pub mod controller;
pub mod store;
pub mod catalog;
pub mod session;
pub mod simulated;

pub use error::{Error, Result};
pub use types::*;
pub use config::{BackendOptions, DiscoveryConfig, MediaSource, PlayerConfig, SessionConfig, StoreConfig};
pub use backend::{BackendFactory, MediaBackend, MediaEvent, Playhead, QualityLevels, TierInfo};
pub use dom::{ContainerId, DomHost, FrameClock};
pub use quality::{QualityEvent, QualityMenu, QualityMenuItem, QualityTierRegistry};
pub use tracker::{ProgressSink, ProgressTracker};
pub use controller::{AdaptivePlayerController, ControllerEvent};
pub use store::{FileStorage, MemoryStorage, ProgressStore, StorageBackend, StoreUpdate};
pub use catalog::{ContentApi, StaticCatalog, VideoRecord};
#[cfg(feature = "http")]
pub use catalog::HttpContentApi;
pub use session::{CloseOutcome, PlaybackSession, VideoSelection};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the playback library
pub fn init() {
    tracing::info!(version = VERSION, "Vidora Core initialized");
}
