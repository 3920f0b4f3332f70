//! Messages that timers and listeners send to the orchestrator's driver task.
//!
//! Timers and change listeners never call back into the orchestrator
//! directly; they only enqueue a [`Trigger`] tagged with the session that
//! installed them. The driver drops triggers whose session is no longer
//! current.

use std::time::Duration;

use domain::SessionId;
use tokio::sync::mpsc;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Trigger {
    /// HEAD wait elapsed or HEAD became readable.
    RetryResolution,
    /// First-analysis poll interval elapsed.
    PollAnalysis,
    /// Pull request re-lookup delay elapsed on an unknown branch.
    LookupPullRequest,
    /// Outdated-branch retry delay elapsed.
    RefreshAnalysis,
    /// Push debounce quiet period elapsed.
    PushSettled,
    /// Pull requests were still being analysed; fetch them again.
    RefreshPullRequests,
    /// The local repository reported a change.
    RepositoryChanged,
    /// The stored credentials changed.
    AuthChanged,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Envelope {
    /// `None` for triggers that are not bound to a repository.
    pub session: Option<SessionId>,
    pub trigger: Trigger,
}

#[derive(Debug, Clone)]
pub(crate) struct TriggerSender {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl TriggerSender {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Envelope>) -> Self {
        Self { tx }
    }

    pub(crate) fn send(&self, session: Option<SessionId>, trigger: Trigger) {
        if self.tx.send(Envelope { session, trigger }).is_err() {
            trace!(?trigger, "driver gone; trigger dropped");
        }
    }

    /// Returns a future that sends `trigger` for `session` after `delay`.
    pub(crate) fn after(
        &self,
        delay: Duration,
        session: SessionId,
        trigger: Trigger,
    ) -> impl std::future::Future<Output = ()> + Send + 'static {
        let sender = self.clone();
        async move {
            tokio::time::sleep(delay).await;
            sender.send(Some(session), trigger);
        }
    }
}
