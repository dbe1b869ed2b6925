//! DOM readiness
//!
//! The rendering host may mount the player's container element after the
//! controller is asked to attach. [`wait_for_container`] checks once per
//! animation frame until the element is present.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Identifier of the container element the backend renders into
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(pub String);

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for ContainerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The rendering host's document
#[async_trait]
pub trait DomHost: Send + Sync {
    /// Whether the container is present in the document
    fn contains(&self, container: &ContainerId) -> bool;

    /// Resolve on the next animation frame
    async fn next_frame(&self);
}

/// Outcome of waiting for a container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    /// Mounted after this many frames (0 = already present)
    Mounted { frames: u32 },
    /// Frame budget exhausted
    TimedOut { frames: u32 },
}

/// Poll once per frame until `container` is present or the budget runs out
pub async fn wait_for_container(
    dom: &dyn DomHost,
    container: &ContainerId,
    max_frames: Option<u32>,
) -> AttachOutcome {
    let mut frames = 0u32;
    loop {
        if dom.contains(container) {
            debug!(container = %container, frames, "Container mounted");
            return AttachOutcome::Mounted { frames };
        }
        if max_frames.is_some_and(|max| frames >= max) {
            return AttachOutcome::TimedOut { frames };
        }
        dom.next_frame().await;
        frames = frames.saturating_add(1);
    }
}

/// A headless document driven by a fixed frame clock
pub struct FrameClock {
    interval: Duration,
    mounted: std::sync::RwLock<std::collections::HashSet<ContainerId>>,
}

impl FrameClock {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            mounted: std::sync::RwLock::new(std::collections::HashSet::new()),
        }
    }

    pub fn mount(&self, container: ContainerId) {
        self.mounted
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(container);
    }

    pub fn unmount(&self, container: &ContainerId) {
        self.mounted
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(container);
    }
}

#[async_trait]
impl DomHost for FrameClock {
    fn contains(&self, container: &ContainerId) -> bool {
        self.mounted
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(container)
    }

    async fn next_frame(&self) {
        tokio::time::sleep(self.interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_already_mounted() {
        let dom = FrameClock::new(Duration::from_millis(16));
        let id = ContainerId::new("player");
        dom.mount(id.clone());
        assert_eq!(
            wait_for_container(&dom, &id, Some(10)).await,
            AttachOutcome::Mounted { frames: 0 }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_mounted_after_some_frames() {
        let dom = Arc::new(FrameClock::new(Duration::from_millis(16)));
        let id = ContainerId::new("player");

        let mounter = {
            let dom = dom.clone();
            let id = id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                dom.mount(id);
            })
        };

        let outcome = wait_for_container(dom.as_ref(), &id, None).await;
        mounter.await.unwrap();
        match outcome {
            AttachOutcome::Mounted { frames } => assert!((6..=8).contains(&frames)),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_budget_exhausted() {
        let dom = FrameClock::new(Duration::from_millis(16));
        let id = ContainerId::new("never");
        assert_eq!(
            wait_for_container(&dom, &id, Some(5)).await,
            AttachOutcome::TimedOut { frames: 5 }
        );
    }
}
