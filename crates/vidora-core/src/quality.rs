//! Quality-Tier Registry
//!
//! Wraps the backend's tier-introspection extension. The tier list is
//! populated asynchronously after a stream loads, so discovery polls with
//! a bounded, fixed-delay retry. Selection takes manual control by
//! enabling exactly one tier.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::backend::{MediaBackend, QualityLevels};
use crate::config::DiscoveryConfig;
use crate::types::QualityTier;
use crate::{Error, Result};

/// Why no tier selection is offered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unavailable {
    /// The backend has no tier-introspection extension
    Unsupported,
    /// The tier list stayed empty through every attempt
    Exhausted { attempts: u32 },
}

/// Registry notifications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QualityEvent {
    Discovered {
        tiers: usize,
        active: Option<usize>,
    },
    Unavailable {
        reason: Unavailable,
    },
    Changed {
        index: usize,
        label: String,
        message: String,
    },
}

/// One entry of the selection menu
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityMenuItem {
    pub index: usize,
    pub label: String,
    pub selected: bool,
}

/// Selection menu model, active tier pre-selected
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityMenu {
    pub items: Vec<QualityMenuItem>,
}

impl QualityMenu {
    pub fn selected(&self) -> Option<&QualityMenuItem> {
        self.items.iter().find(|item| item.selected)
    }
}

/// Label for a tier: "Auto" without a height, otherwise a height bucket
pub fn label_for(tier: &QualityTier) -> String {
    tier.label()
}

/// Text of the "quality changed" notification
pub fn change_message(label: &str) -> String {
    format!("Changed video quality to {}", label)
}

#[derive(Debug, Default)]
struct RegistryState {
    tiers: Vec<QualityTier>,
    active: Option<usize>,
    manual: bool,
    attempts: u32,
}

/// Tier discovery and selection for one backend instance
pub struct QualityTierRegistry {
    backend: Arc<dyn MediaBackend>,
    config: DiscoveryConfig,
    native_streaming_preferred: bool,
    state: RwLock<RegistryState>,
    events: broadcast::Sender<QualityEvent>,
    disposed: AtomicBool,
}

impl QualityTierRegistry {
    pub fn new(
        backend: Arc<dyn MediaBackend>,
        config: DiscoveryConfig,
        native_streaming_preferred: bool,
    ) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            backend,
            config,
            native_streaming_preferred,
            state: RwLock::new(RegistryState::default()),
            events,
            disposed: AtomicBool::new(false),
        }
    }

    /// Subscribe to registry notifications
    pub fn subscribe(&self) -> broadcast::Receiver<QualityEvent> {
        self.events.subscribe()
    }

    /// Poll the backend until its tier list is non-empty.
    ///
    /// Returns an empty list immediately when the capability is absent, and
    /// after `max_attempts` polls when the list never fills.
    #[instrument(skip(self))]
    pub async fn discover(&self) -> Vec<QualityTier> {
        if self.is_disposed() {
            return Vec::new();
        }

        let Some(levels) = self.backend.quality_levels() else {
            warn!("Quality levels extension not available, tier selection disabled");
            self.notify(QualityEvent::Unavailable {
                reason: Unavailable::Unsupported,
            });
            return Vec::new();
        };

        let first_delay = self
            .config
            .first_attempt_delay(self.native_streaming_preferred);
        if !first_delay.is_zero() {
            tokio::time::sleep(first_delay).await;
        }

        let max_attempts = self.config.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            if self.is_disposed() {
                debug!(attempt, "Registry disposed, abandoning discovery");
                return Vec::new();
            }

            self.state.write().await.attempts = attempt;

            match levels.len() {
                None => debug!(attempt, max_attempts, "Quality levels not initialized yet"),
                Some(0) => debug!(attempt, max_attempts, "No quality levels found yet"),
                Some(count) => {
                    let tiers = snapshot(levels.as_ref(), count);
                    if !tiers.is_empty() {
                        return self.record_discovery(tiers, attempt).await;
                    }
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(self.config.retry_delay()).await;
            }
        }

        warn!(attempts = max_attempts, "No quality levels available after retries");
        self.notify(QualityEvent::Unavailable {
            reason: Unavailable::Exhausted {
                attempts: max_attempts,
            },
        });
        Vec::new()
    }

    async fn record_discovery(&self, tiers: Vec<QualityTier>, attempt: u32) -> Vec<QualityTier> {
        let active = tiers.iter().find(|t| t.enabled).map(|t| t.index);
        {
            let mut state = self.state.write().await;
            state.tiers = tiers.clone();
            if !state.manual {
                state.active = active;
            }
        }

        info!(tiers = tiers.len(), active = ?active, attempt, "Quality tiers discovered");
        self.notify(QualityEvent::Discovered {
            tiers: tiers.len(),
            active,
        });
        tiers
    }

    /// Enable exactly the tier at `index` and disable every other tier
    #[instrument(skip(self))]
    pub async fn select(&self, index: usize) -> Result<QualityTier> {
        if self.is_disposed() {
            return Err(Error::Disposed);
        }
        let levels = self.backend.quality_levels().ok_or(Error::TiersUnsupported)?;
        let count = levels.len().unwrap_or(0);
        if index >= count {
            return Err(Error::TierOutOfRange { index, count });
        }

        for i in 0..count {
            levels.set_enabled(i, i == index);
        }

        let tiers = snapshot(levels.as_ref(), count);
        let chosen = tiers
            .iter()
            .find(|t| t.index == index)
            .cloned()
            .ok_or(Error::TierOutOfRange { index, count })?;

        {
            let mut state = self.state.write().await;
            state.tiers = tiers;
            state.active = Some(index);
            state.manual = true;
        }

        let label = label_for(&chosen);
        info!(index, label = %label, "Quality tier selected");
        self.notify(QualityEvent::Changed {
            index,
            message: change_message(&label),
            label,
        });

        Ok(chosen)
    }

    /// Tiers as of the last discovery or selection
    pub async fn tiers(&self) -> Vec<QualityTier> {
        self.state.read().await.tiers.clone()
    }

    /// Index of the active tier (first enabled at discovery, or the manual choice)
    pub async fn active_index(&self) -> Option<usize> {
        self.state.read().await.active
    }

    /// Whether a manual selection has overridden adaptive switching
    pub async fn is_manual(&self) -> bool {
        self.state.read().await.manual
    }

    /// Polls made by the most recent discovery
    pub async fn attempts(&self) -> u32 {
        self.state.read().await.attempts
    }

    /// Selection menu, or `None` when no tiers are known
    pub async fn menu(&self) -> Option<QualityMenu> {
        let state = self.state.read().await;
        if state.tiers.is_empty() {
            return None;
        }
        let items = state
            .tiers
            .iter()
            .map(|tier| QualityMenuItem {
                index: tier.index,
                label: label_for(tier),
                selected: Some(tier.index) == state.active,
            })
            .collect();
        Some(QualityMenu { items })
    }

    /// Stop pending discovery; late retries observe this and no-op
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn notify(&self, event: QualityEvent) {
        let _ = self.events.send(event);
    }
}

fn snapshot(levels: &dyn QualityLevels, count: usize) -> Vec<QualityTier> {
    (0..count)
        .filter_map(|index| {
            levels.get(index).map(|info| QualityTier {
                index,
                height: info.height.filter(|h| *h > 0),
                bandwidth_bps: info.bandwidth,
                enabled: info.enabled,
            })
        })
        .collect()
}
