//! Change notifications published after profile and definition writes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChangeNotification {
    #[serde(rename_all = "camelCase")]
    ProfileUpdated { profile_id: String },
    #[serde(rename_all = "camelCase")]
    SegmentUpdated { segment_id: String },
    #[serde(rename_all = "camelCase")]
    SegmentRemoved { segment_id: String },
    #[serde(rename_all = "camelCase")]
    ScoringUpdated { plan_id: String },
    #[serde(rename_all = "camelCase")]
    ScoringRemoved { plan_id: String },
}

/// Receives change notifications. Delivery is best effort.
#[async_trait]
pub trait ChangeNotifier: Send + Sync {
    async fn notify(&self, notification: ChangeNotification);
}

/// Discards everything.
pub struct NoopNotifier;

#[async_trait]
impl ChangeNotifier for NoopNotifier {
    async fn notify(&self, _notification: ChangeNotification) {}
}

/// Fans notifications out to any number of `tokio` broadcast receivers.
///
/// Slow receivers lag and lose the oldest messages rather than blocking writers.
#[derive(Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<ChangeNotification>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeNotification> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl ChangeNotifier for BroadcastNotifier {
    async fn notify(&self, notification: ChangeNotification) {
        // No receivers is not an error.
        if self.sender.send(notification).is_err() {
            trace!("change notification dropped, no subscribers");
        }
    }
}
