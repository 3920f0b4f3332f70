//! Resolution of the current repository against the remote service: HEAD
//! wait, remote lookup, onboarding disambiguation, and the first-analysis
//! poll.

use std::sync::Arc;
use std::time::Duration;

use domain::{
    AnalysisSnapshot, FirstAnalysisStatus, JoinStatus, LocalRepository, Membership,
    Notification, OrchestratorState, Remote, RepositoryAnalysis, RepositoryIdentity,
    RetryPolicy, ServiceError, SessionId, resolve_remote_url,
};
use futures::StreamExt;
use tracing::{debug, info, info_span, warn, Instrument};

use super::RepositoryOrchestrator;
use crate::trigger::Trigger;

/// Outcome of looking up every remote of a repository.
#[derive(Debug)]
enum RemoteLookup {
    Found {
        identity: RepositoryIdentity,
        analysis: RepositoryAnalysis,
    },
    /// The service knows none of the remotes; the first resolvable one is
    /// used to ask why.
    NotFound { identity: RepositoryIdentity },
    Failed(ServiceError),
    /// No remote URL maps to a supported provider.
    Unresolvable,
}

impl RepositoryOrchestrator {
    /// Runs one resolution attempt for session `id`.
    pub(super) async fn resolve(&self, id: SessionId) {
        self.run_resolution(id)
            .instrument(info_span!("resolve", session = %id))
            .await;

        if let Some(session) = self.shared.inner.lock().session_mut(id) {
            session.resolving = None;
        }
    }

    async fn run_resolution(&self, id: SessionId) {
        if !self.shared.auth.has_token() {
            info!("no authentication token; resolution skipped");
            self.require_authentication();
            return;
        }

        let Some(repository) = self.repository(id) else {
            return;
        };
        self.transition(id, OrchestratorState::Initializing);

        let Some(head) = repository.head() else {
            self.await_head(id, &repository);
            return;
        };

        let remotes = repository.remotes();
        let recorded = self.with_session(id, |session| {
            session.head_wait.reset();
            session.remotes = remotes.clone();
            session.branch = head.branch.clone();
        });
        if recorded.is_none() {
            return;
        }

        if remotes.is_empty() {
            info!("repository has no remotes");
            self.transition(id, OrchestratorState::NoGitRepository);
            return;
        }

        match self.lookup_remotes(&remotes).await {
            RemoteLookup::Found { identity, analysis } => {
                if !self.bind_identity(id, &identity) {
                    return;
                }
                if analysis.last_analysed_commit.is_some() {
                    self.load(id, &identity, analysis).await;
                } else {
                    self.await_first_analysis(id, &identity).await;
                }
            }
            RemoteLookup::NotFound { identity } => {
                if !self.bind_identity(id, &identity) {
                    return;
                }
                match self.onboarding_state(&identity).await {
                    Ok(state) => {
                        info!(%identity, %state, "repository not found on the service");
                        self.transition(id, state);
                    }
                    Err(error) => self.degrade(id, &error, "organization lookup"),
                }
            }
            RemoteLookup::Failed(error) => self.degrade(id, &error, "repository lookup"),
            RemoteLookup::Unresolvable => {
                info!(remotes = remotes.len(), "no remote maps to a supported provider");
                self.transition(id, OrchestratorState::NoRepository);
            }
        }
    }

    fn repository(&self, id: SessionId) -> Option<Arc<dyn LocalRepository>> {
        let inner = self.shared.inner.lock();
        inner
            .session(id)
            .map(|session| Arc::clone(&session.repository))
    }

    // -----------------------------------------------------------------------
    // HEAD wait
    // -----------------------------------------------------------------------

    /// Waits for HEAD to become readable: whichever comes first of the retry
    /// delay and a change event with a readable HEAD triggers another
    /// resolution attempt. Settles into `NoGitRepository` once the attempts
    /// are used up.
    fn await_head(&self, id: SessionId, repository: &Arc<dyn LocalRepository>) {
        let delay = self.shared.config.head_wait_delay();
        let triggers = self.shared.triggers.clone();
        let watched = Arc::clone(repository);
        let mut changes = repository.changes();

        let attempt = async move {
            let head_ready = async {
                while changes.next().await.is_some() {
                    if watched.head().is_some() {
                        return;
                    }
                }
                std::future::pending::<()>().await;
            };
            tokio::select! {
                () = tokio::time::sleep(delay) => debug!(session = %id, "HEAD wait elapsed"),
                () = head_ready => debug!(session = %id, "HEAD became readable"),
            }
            triggers.send(Some(id), Trigger::RetryResolution);
        };

        let mut inner = self.shared.inner.lock();
        let Some(session) = inner.session_mut(id) else {
            return;
        };
        if session.head_wait.schedule(attempt) {
            debug!(attempt = session.head_wait.attempts(), "HEAD not readable yet; waiting");
        } else {
            warn!(
                attempts = session.head_wait.attempts(),
                "HEAD never became readable; giving up"
            );
            self.set_state(&mut inner, OrchestratorState::NoGitRepository);
        }
    }

    // -----------------------------------------------------------------------
    // Remote lookup and onboarding
    // -----------------------------------------------------------------------

    /// Looks up each remote in order and commits to the first one the
    /// service knows.
    async fn lookup_remotes(&self, remotes: &[Remote]) -> RemoteLookup {
        let mut not_found: Option<RepositoryIdentity> = None;
        let mut failure: Option<ServiceError> = None;

        for remote in remotes {
            let Some(identity) = remote.url().and_then(resolve_remote_url) else {
                debug!(remote = %remote.name, "remote does not map to a supported provider");
                continue;
            };

            match self
                .shared
                .service
                .get_repository_with_analysis(&identity, None)
                .await
            {
                Ok(analysis) => {
                    debug!(remote = %remote.name, %identity, "remote resolved");
                    return RemoteLookup::Found { identity, analysis };
                }
                Err(ServiceError::Unauthorized) => {
                    return RemoteLookup::Failed(ServiceError::Unauthorized);
                }
                Err(error) if error.is_not_found() => {
                    debug!(remote = %remote.name, %identity, "repository not found");
                    not_found.get_or_insert(identity);
                }
                Err(error) => {
                    warn!(remote = %remote.name, %identity, %error, "repository lookup failed");
                    failure.get_or_insert(error);
                }
            }
        }

        match (failure, not_found) {
            (Some(error), _) => RemoteLookup::Failed(error),
            (None, Some(identity)) => RemoteLookup::NotFound { identity },
            (None, None) => RemoteLookup::Unresolvable,
        }
    }

    /// Works out why the service does not know `identity`.
    async fn onboarding_state(
        &self,
        identity: &RepositoryIdentity,
    ) -> Result<OrchestratorState, ServiceError> {
        let service = &self.shared.service;
        let organization = match service
            .get_organization(identity.provider, &identity.organization)
            .await
        {
            Ok(organization) => organization,
            Err(error) if error.is_not_found() => {
                return Ok(OrchestratorState::NeedsToAddOrganization);
            }
            Err(error) => return Err(error),
        };

        if organization.membership == Membership::Member {
            return Ok(OrchestratorState::NeedsToAddRepository);
        }

        let status = service
            .get_join_status(identity.provider, &identity.organization)
            .await?;
        Ok(match status {
            JoinStatus::Pending => OrchestratorState::HasPendingJoinOrganization,
            JoinStatus::NotRequested => OrchestratorState::NeedsToJoinOrganization,
        })
    }

    /// Records the resolved identity and (re)acquires the CLI handle when it
    /// changed. Returns `false` if `id` is no longer current.
    fn bind_identity(&self, id: SessionId, identity: &RepositoryIdentity) -> bool {
        let mut inner = self.shared.inner.lock();
        let Some(session) = inner.session_mut(id) else {
            debug!(session = %id, "discarding resolution of closed session");
            return false;
        };
        if session.identity.as_ref() == Some(identity) {
            return true;
        }

        let mut registry = self.shared.cli.lock();
        if let Some(previous) = session.identity.take() {
            registry.evict(&previous);
        }
        session.cli = Some(registry.acquire(identity, session.repository.root()));
        session.identity = Some(identity.clone());
        info!(%identity, "repository identity resolved");
        true
    }

    // -----------------------------------------------------------------------
    // First analysis
    // -----------------------------------------------------------------------

    async fn await_first_analysis(&self, id: SessionId, identity: &RepositoryIdentity) {
        match self.shared.service.get_first_analysis_status(identity).await {
            Ok(FirstAnalysisStatus::NoActivity) => {
                info!(%identity, "no analysis activity for repository");
                self.transition(id, OrchestratorState::AnalysisFailed);
            }
            Ok(FirstAnalysisStatus::Blocked(blocker)) => {
                warn!(%identity, %blocker, "first analysis blocked");
                self.transition(id, OrchestratorState::AnalysisFailed);
            }
            Ok(FirstAnalysisStatus::InProgress | FirstAnalysisStatus::Completed) => {
                if self.transition(id, OrchestratorState::IsAnalyzing) {
                    self.schedule_analysis_poll(id);
                }
            }
            Err(error) => self.degrade(id, &error, "first analysis status"),
        }
    }

    /// Schedules the next first-analysis poll. Raises one notification when
    /// the attempts are used up.
    pub(super) fn schedule_analysis_poll(&self, id: SessionId) {
        self.schedule_analysis_poll_after(id, self.shared.config.analysis_poll_interval());
    }

    fn schedule_analysis_poll_after(&self, id: SessionId, delay: Duration) {
        let attempt = self
            .shared
            .triggers
            .after(delay, id, Trigger::PollAnalysis);
        let exhausted_for = {
            let mut inner = self.shared.inner.lock();
            let Some(session) = inner.session_mut(id) else {
                return;
            };
            if session.analysis_poll.schedule(attempt) {
                None
            } else {
                session.identity.clone()
            }
        };

        if let Some(identity) = exhausted_for {
            info!(%identity, "first analysis is taking longer than expected");
            self.shared
                .notifier
                .notify(Notification::AnalysisTakingLonger { identity });
        }
    }

    /// Starts a new poll episode if the previous one gave up.
    pub(super) fn restart_analysis_poll(&self, id: SessionId) {
        let restart = self
            .with_session(id, |session| {
                if session.analysis_poll.is_pending() {
                    false
                } else {
                    session.analysis_poll.reset();
                    true
                }
            })
            .unwrap_or(false);
        if restart {
            debug!(session = %id, "analysis poll restarted");
            self.schedule_analysis_poll(id);
        }
    }

    pub(super) async fn poll_analysis(&self, id: SessionId) {
        if self.state() != OrchestratorState::IsAnalyzing {
            return;
        }
        let Some(identity) = self.identity() else {
            return;
        };

        match self
            .shared
            .service
            .get_repository_with_analysis(&identity, None)
            .await
        {
            Ok(analysis) if analysis.last_analysed_commit.is_some() => {
                info!(%identity, "first analysis completed");
                self.load(id, &identity, analysis).await;
            }
            Ok(_) => self.schedule_analysis_poll(id),
            Err(error) if error.is_unauthorized() => self.require_authentication(),
            Err(error) => match error.retry_policy() {
                RetryPolicy::NonRetryable => self.degrade(id, &error, "analysis poll"),
                RetryPolicy::Retryable { after } => {
                    // A server-requested back-off longer than the poll
                    // interval postpones the next attempt.
                    let interval = self.shared.config.analysis_poll_interval();
                    let delay = after.map_or(interval, |after| after.max(interval));
                    warn!(%identity, %error, delay_secs = delay.as_secs(), "analysis poll failed");
                    self.schedule_analysis_poll_after(id, delay);
                }
            },
        }
    }

    // -----------------------------------------------------------------------
    // Loading
    // -----------------------------------------------------------------------

    /// Builds the analysis snapshot, enters `Loaded`, and classifies the
    /// checked-out branch.
    pub(super) async fn load(
        &self,
        id: SessionId,
        identity: &RepositoryIdentity,
        analysis: RepositoryAnalysis,
    ) {
        let service = &self.shared.service;
        let enabled_branches = match service.list_enabled_branches(identity).await {
            Ok(branches) => branches,
            Err(error) => {
                self.degrade(id, &error, "enabled branches");
                return;
            }
        };
        let expects_coverage = match service.get_coverage_summary(identity).await {
            Ok(summary) => summary.is_some_and(|summary| summary.has_reports()),
            Err(error) if error.is_unauthorized() => {
                self.require_authentication();
                return;
            }
            Err(error) => {
                debug!(%identity, %error, "coverage summary unavailable");
                false
            }
        };
        let snapshot = AnalysisSnapshot::new(analysis, enabled_branches, expects_coverage);

        {
            let mut inner = self.shared.inner.lock();
            if !matches!(
                inner.state,
                OrchestratorState::Initializing | OrchestratorState::IsAnalyzing
            ) {
                debug!(state = %inner.state, "discarding analysis loaded after state changed");
                return;
            }
            let Some(session) = inner.session_mut(id) else {
                return;
            };
            session.snapshot = Some(snapshot.clone());
            session.analysis_poll.reset();
            self.shared.pull_requests.bind(id);
            self.set_state(&mut inner, OrchestratorState::Loaded);
        }

        info!(
            %identity,
            branches = snapshot.enabled_branches.len(),
            expects_coverage = snapshot.expects_coverage,
            "repository loaded"
        );
        self.shared.topics.repository_loaded.publish(snapshot);
        self.classify_branch(id).await;
    }
}
