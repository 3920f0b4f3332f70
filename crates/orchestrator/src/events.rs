//! Typed publish/subscribe topics.
//!
//! Each topic wraps a [`tokio::sync::broadcast`] channel. Publishing never
//! blocks and never runs subscriber code, so the orchestrator may publish while
//! holding its own locks. Dropping (or calling
//! [`Subscription::unsubscribe`] on) a subscription detaches it.

use std::sync::Arc;

use domain::{
    AnalysisSnapshot, BranchClassification, PullRequestSnapshot, PullRequestSummary, StateChange,
};
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::issues::IssueList;

const DEFAULT_CAPACITY: usize = 64;

/// A named broadcast topic.
#[derive(Debug, Clone)]
pub struct Topic<T> {
    name: &'static str,
    sender: broadcast::Sender<T>,
}

impl<T: Clone + Send + 'static> Topic<T> {
    pub fn new(name: &'static str) -> Self {
        Self::with_capacity(name, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(name: &'static str, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { name, sender }
    }

    pub fn subscribe(&self) -> Subscription<T> {
        Subscription {
            topic: self.name,
            receiver: self.sender.subscribe(),
        }
    }

    /// Publishes an event to every current subscriber.
    pub fn publish(&self, event: T) {
        match self.sender.send(event) {
            Ok(receivers) => trace!(topic = self.name, receivers, "event published"),
            Err(_) => trace!(topic = self.name, "event published with no subscribers"),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// A live subscription to a [`Topic`].
#[derive(Debug)]
pub struct Subscription<T> {
    topic: &'static str,
    receiver: broadcast::Receiver<T>,
}

impl<T: Clone> Subscription<T> {
    /// Waits for the next event. Returns `None` once the topic is gone.
    ///
    /// A subscriber that falls behind skips the events it missed.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(topic = self.topic, skipped, "subscriber lagged; events skipped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Returns the next pending event without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(topic = self.topic, skipped, "subscriber lagged; events skipped");
                }
                Err(_) => return None,
            }
        }
    }

    /// Drains every pending event.
    pub fn drain(&mut self) -> Vec<T> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    pub fn unsubscribe(self) {
        debug!(topic = self.topic, "unsubscribed");
    }
}

// ---------------------------------------------------------------------------
// Orchestrator topics
// ---------------------------------------------------------------------------

/// Every topic the orchestrator publishes on.
#[derive(Debug, Clone)]
pub struct Topics {
    pub state: Topic<StateChange>,
    pub classification: Topic<Option<BranchClassification>>,
    pub repository_loaded: Topic<AnalysisSnapshot>,
    pub issues: Topic<IssueList>,
    pub active_pull_request: Topic<Option<PullRequestSnapshot>>,
    pub pull_requests: Topic<Arc<[PullRequestSummary]>>,
}

impl Topics {
    pub fn new() -> Self {
        Self {
            state: Topic::new("state"),
            classification: Topic::new("classification"),
            repository_loaded: Topic::new("repository_loaded"),
            issues: Topic::new("issues"),
            active_pull_request: Topic::new("active_pull_request"),
            pull_requests: Topic::new("pull_requests"),
        }
    }
}

impl Default for Topics {
    fn default() -> Self {
        Self::new()
    }
}
