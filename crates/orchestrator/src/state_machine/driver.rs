//! The driver task: receives triggers from timers and listeners and runs the
//! matching handler.

use std::sync::Weak;

use domain::{OrchestratorState, SessionId};
use tokio::sync::mpsc;
use tracing::{debug, debug_span, info, trace, Instrument};

use super::{RepositoryOrchestrator, Shared};
use crate::trigger::{Envelope, Trigger};

/// Handles triggers one at a time until the orchestrator is dropped.
pub(super) async fn drive(shared: Weak<Shared>, mut triggers: mpsc::UnboundedReceiver<Envelope>) {
    while let Some(envelope) = triggers.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        let orchestrator = RepositoryOrchestrator { shared };
        let span = debug_span!("trigger", trigger = ?envelope.trigger);
        orchestrator.dispatch(envelope).instrument(span).await;
    }
    debug!("orchestrator driver stopped");
}

impl RepositoryOrchestrator {
    async fn dispatch(&self, envelope: Envelope) {
        let Some(id) = envelope.session else {
            if envelope.trigger == Trigger::AuthChanged {
                self.on_auth_changed().await;
            }
            return;
        };
        if self.session_id() != Some(id) {
            trace!(session = %id, "ignoring trigger from closed session");
            return;
        }

        match envelope.trigger {
            Trigger::RetryResolution => self.retry_resolution(id).await,
            Trigger::PollAnalysis => self.poll_analysis(id).await,
            Trigger::LookupPullRequest => self.retry_pull_request_lookup(id).await,
            Trigger::RefreshAnalysis => self.refresh_analysis(id).await,
            Trigger::PushSettled => self.sync_after_push(id).await,
            Trigger::RefreshPullRequests => {
                if self.state().holds_analysis() {
                    self.refresh_pull_request_data(id).await;
                }
            }
            Trigger::RepositoryChanged => self.on_repository_changed(id).await,
            Trigger::AuthChanged => self.on_auth_changed().await,
        }
    }

    async fn retry_resolution(&self, id: SessionId) {
        let resolution = {
            let mut inner = self.shared.inner.lock();
            if inner.state != OrchestratorState::Initializing {
                return;
            }
            self.begin_resolution(&mut inner, id)
        };
        if let Some(resolution) = resolution {
            resolution.await;
        }
    }

    async fn on_auth_changed(&self) {
        if !self.shared.auth.has_token() {
            if self.state() != OrchestratorState::NeedsAuthentication {
                info!("authentication token removed");
                self.require_authentication();
            }
            return;
        }

        if self.state() != OrchestratorState::NeedsAuthentication {
            return;
        }
        info!("authentication token available; resolving");
        match self.session_id() {
            Some(id) => self.reresolve(id).await,
            None => self.open_first_available().await,
        }
    }
}
