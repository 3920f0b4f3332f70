//! Branch classification, pull request matching, and re-synchronisation
//! after local changes.

use std::sync::Arc;

use domain::{
    AnalysisSnapshot, BranchClassification, BranchName, CommitSha, LocalRepository,
    OrchestratorState, PullRequestSummary, RepositoryAnalysis, RepositoryIdentity, SessionId,
};
use tracing::{debug, info};

use super::RepositoryOrchestrator;
use crate::issues::{IssueQuery, RefreshOutcome};
use crate::retry::ScheduledTask;
use crate::trigger::Trigger;

/// What classification needs from a `Loaded` session.
struct LoadedContext {
    repository: Arc<dyn LocalRepository>,
    identity: RepositoryIdentity,
    snapshot: AnalysisSnapshot,
}

impl RepositoryOrchestrator {
    fn loaded_context(&self, id: SessionId) -> Option<LoadedContext> {
        let inner = self.shared.inner.lock();
        if inner.state != OrchestratorState::Loaded {
            return None;
        }
        let session = inner.session(id)?;
        Some(LoadedContext {
            repository: Arc::clone(&session.repository),
            identity: session.identity.clone()?,
            snapshot: session.snapshot.clone()?,
        })
    }

    /// `true` while `id` is current, `Loaded`, and last classified `branch`.
    fn still_on(&self, id: SessionId, branch: &BranchName) -> bool {
        let inner = self.shared.inner.lock();
        inner.state == OrchestratorState::Loaded
            && inner
                .session(id)
                .is_some_and(|session| session.branch.as_ref() == Some(branch))
    }

    // -----------------------------------------------------------------------
    // Classification
    // -----------------------------------------------------------------------

    /// Classifies the checked-out branch against the loaded analysis.
    pub(super) async fn classify_branch(&self, id: SessionId) {
        let Some(context) = self.loaded_context(id) else {
            return;
        };
        let head = context.repository.head();
        let branch = head.as_ref().and_then(|head| head.branch.clone());
        let commit = head.as_ref().and_then(|head| head.commit.clone());
        if self
            .with_session(id, |session| session.branch = branch.clone())
            .is_none()
        {
            return;
        }

        let Some(branch) = branch else {
            debug!("HEAD is detached");
            self.shared.pull_requests.clear_active();
            self.set_classification(id, BranchClassification::OnUnknownBranch);
            return;
        };

        if !context.snapshot.is_enabled(&branch) {
            self.with_session(id, |session| session.outdated_retry.reset());
            self.match_pull_request(id, &context.identity, &branch).await;
            return;
        }

        self.with_session(id, |session| session.pull_request_lookup.reset());
        self.shared.pull_requests.clear_active();

        let mut snapshot = context.snapshot;
        if !snapshot.describes(&branch) {
            match self.fetch_branch_analysis(id, &context.identity, &branch).await {
                Some(updated) => snapshot = updated,
                None if self.still_on(id, &branch) => {}
                None => return,
            }
        }
        self.classify_enabled_branch(id, &branch, commit.as_ref(), &snapshot)
            .await;
    }

    async fn classify_enabled_branch(
        &self,
        id: SessionId,
        branch: &BranchName,
        commit: Option<&CommitSha>,
        snapshot: &AnalysisSnapshot,
    ) {
        if !self.still_on(id, branch) {
            return;
        }

        if commit.is_some_and(|commit| snapshot.is_analysed_at(commit)) {
            self.with_session(id, |session| session.outdated_retry.reset());
            self.set_classification(id, BranchClassification::OnAnalysedBranch);
            self.refresh_issues(id).await;
        } else {
            debug!(%branch, commit = ?commit, "HEAD not analysed yet");
            self.set_classification(id, BranchClassification::OnAnalysedBranchOutdated);
            self.schedule_outdated_retry(id);
        }
    }

    /// Fetches the analysis of `branch` and stores it in the session's
    /// snapshot. Returns `None` when the fetch failed or `id` went away.
    async fn fetch_branch_analysis(
        &self,
        id: SessionId,
        identity: &RepositoryIdentity,
        branch: &BranchName,
    ) -> Option<AnalysisSnapshot> {
        let analysis = match self
            .shared
            .service
            .get_repository_with_analysis(identity, Some(branch))
            .await
        {
            Ok(analysis) => analysis,
            Err(error) => {
                self.degrade(id, &error, "branch analysis");
                return None;
            }
        };

        let analysis = RepositoryAnalysis {
            branch: analysis.branch.or_else(|| Some(branch.clone())),
            ..analysis
        };
        let mut inner = self.shared.inner.lock();
        if inner.state != OrchestratorState::Loaded {
            return None;
        }
        let session = inner.session_mut(id)?;
        let updated = session.snapshot.as_ref()?.with_analysis(analysis);
        session.snapshot = Some(updated.clone());
        Some(updated)
    }

    fn schedule_outdated_retry(&self, id: SessionId) {
        let attempt = self.shared.triggers.after(
            self.shared.config.outdated_branch_retry_delay(),
            id,
            Trigger::RefreshAnalysis,
        );
        if self.with_session(id, |session| session.outdated_retry.schedule(attempt)) == Some(false) {
            debug!(session = %id, "outdated branch retries exhausted");
        }
    }

    /// Re-fetches the analysis of an outdated branch and classifies it again.
    pub(super) async fn refresh_analysis(&self, id: SessionId) {
        if self.classification() != Some(BranchClassification::OnAnalysedBranchOutdated) {
            return;
        }
        let Some(context) = self.loaded_context(id) else {
            return;
        };
        let Some(branch) = context.repository.head().and_then(|head| head.branch) else {
            return;
        };
        if !self.still_on(id, &branch) {
            return;
        }

        if let Some(snapshot) = self.fetch_branch_analysis(id, &context.identity, &branch).await {
            let commit = context.repository.head().and_then(|head| head.commit);
            self.classify_enabled_branch(id, &branch, commit.as_ref(), &snapshot)
                .await;
        }
    }

    async fn refresh_issues(&self, id: SessionId) {
        let Some((state, classification, identity, branch)) = self.issue_context(id) else {
            return;
        };
        let outcome = self
            .shared
            .issues
            .refresh(IssueQuery {
                state,
                classification,
                identity: &identity,
                branch: &branch,
            })
            .await;
        if let RefreshOutcome::Partial { error, .. } = outcome {
            if error.is_unauthorized() {
                self.require_authentication();
            }
        }
    }

    fn issue_context(
        &self,
        id: SessionId,
    ) -> Option<(
        OrchestratorState,
        Option<BranchClassification>,
        RepositoryIdentity,
        BranchName,
    )> {
        let inner = self.shared.inner.lock();
        let session = inner.session(id)?;
        Some((
            inner.state,
            inner.classification,
            session.identity.clone()?,
            session.branch.clone()?,
        ))
    }

    // -----------------------------------------------------------------------
    // Pull requests
    // -----------------------------------------------------------------------

    /// Looks for an open pull request from `branch`, scheduling bounded
    /// re-lookups when there is none yet.
    async fn match_pull_request(&self, id: SessionId, identity: &RepositoryIdentity, branch: &BranchName) {
        let known = match self.shared.pull_requests.get_or_fetch(identity, true).await {
            Ok(known) => known,
            Err(error) => {
                self.degrade(id, &error, "pull request listing");
                Arc::from(Vec::new())
            }
        };
        if !self.still_on(id, branch) {
            return;
        }

        let found = known
            .iter()
            .find(|pull_request| &pull_request.origin_branch == branch)
            .cloned();
        let Some(pull_request) = found else {
            self.shared.pull_requests.clear_active();
            self.set_classification(id, BranchClassification::OnUnknownBranch);
            let attempt = self.shared.triggers.after(
                self.shared.config.pull_request_lookup_delay(),
                id,
                Trigger::LookupPullRequest,
            );
            if self.with_session(id, |session| session.pull_request_lookup.schedule(attempt))
                == Some(false)
            {
                debug!(%branch, "no pull request for branch; lookups exhausted");
            }
            return;
        };

        self.with_session(id, |session| session.pull_request_lookup.reset());
        self.activate_pull_request(id, identity, branch, &pull_request)
            .await;
    }

    async fn activate_pull_request(
        &self,
        id: SessionId,
        identity: &RepositoryIdentity,
        branch: &BranchName,
        pull_request: &PullRequestSummary,
    ) {
        match self
            .shared
            .pull_requests
            .activate(identity, pull_request)
            .await
        {
            Ok(_) if self.still_on(id, branch) => {
                self.set_classification(id, BranchClassification::OnPullRequestBranch);
            }
            Ok(_) => {}
            Err(error) => {
                self.degrade(id, &error, "pull request analysis");
                self.set_classification(id, BranchClassification::OnUnknownBranch);
            }
        }
    }

    /// Re-runs the pull request lookup for an unknown branch.
    pub(super) async fn retry_pull_request_lookup(&self, id: SessionId) {
        if self.classification() != Some(BranchClassification::OnUnknownBranch) {
            return;
        }
        let Some(context) = self.loaded_context(id) else {
            return;
        };
        let Some(branch) = self.with_session(id, |session| session.branch.clone()).flatten() else {
            return;
        };
        self.match_pull_request(id, &context.identity, &branch).await;
    }

    /// Re-fetches the open pull requests and the active one.
    pub(super) async fn refresh_pull_request_data(&self, id: SessionId) {
        let Some((identity, branch)) = self
            .with_session(id, |session| (session.identity.clone(), session.branch.clone()))
        else {
            return;
        };
        let Some(identity) = identity else {
            return;
        };

        let pull_requests = &self.shared.pull_requests;
        if let Err(error) = pull_requests.get_or_fetch(&identity, true).await {
            self.degrade(id, &error, "pull request listing");
            return;
        }
        if let Err(error) = pull_requests.refresh_active(&identity).await {
            self.degrade(id, &error, "pull request analysis");
            return;
        }

        if self.classification() != Some(BranchClassification::OnUnknownBranch) {
            return;
        }
        let Some(branch) = branch else {
            return;
        };
        if let Some(pull_request) = pull_requests.find_for_branch(&branch) {
            self.with_session(id, |session| session.pull_request_lookup.reset());
            self.activate_pull_request(id, &identity, &branch, &pull_request)
                .await;
        }
    }

    // -----------------------------------------------------------------------
    // Local changes
    // -----------------------------------------------------------------------

    /// Reacts to a change event from the local repository.
    pub(super) async fn on_repository_changed(&self, id: SessionId) {
        let Some((repository, recorded_remotes, recorded_branch)) =
            self.with_session(id, |session| {
                (
                    Arc::clone(&session.repository),
                    session.remotes.clone(),
                    session.branch.clone(),
                )
            })
        else {
            return;
        };
        let state = self.state();

        let remotes = repository.remotes();
        if remotes != recorded_remotes
            && !matches!(
                state,
                OrchestratorState::Initializing | OrchestratorState::NeedsAuthentication
            )
        {
            info!(remotes = remotes.len(), "remotes changed; resolving again");
            self.reresolve(id).await;
            return;
        }

        if state != OrchestratorState::Loaded {
            return;
        }

        let head = repository.head();
        let branch = head.as_ref().and_then(|head| head.branch.clone());
        if branch != recorded_branch {
            info!(from = ?recorded_branch, to = ?branch, "branch changed");
            self.shared.issues.clear();
            self.shared.pull_requests.clear_active();
            self.with_session(id, |session| {
                session.pull_request_lookup.reset();
                session.outdated_retry.reset();
                session.push_debounce = None;
            });
            self.classify_branch(id).await;
            return;
        }

        let Some(head) = head else {
            return;
        };
        let classification = self.classification();
        let snapshot = self.snapshot();

        if classification == Some(BranchClassification::OnAnalysedBranch) {
            let analysed = match (&head.commit, &snapshot) {
                (Some(commit), Some(snapshot)) => snapshot.is_analysed_at(commit),
                _ => false,
            };
            if !analysed {
                debug!("new local commit on analysed branch");
                self.classify_branch(id).await;
                return;
            }
        }

        if !head.is_pushed() {
            return;
        }
        let outdated = classification == Some(BranchClassification::OnAnalysedBranchOutdated);
        let stale_pull_request = classification == Some(BranchClassification::OnPullRequestBranch)
            && self
                .shared
                .pull_requests
                .active()
                .is_some_and(|active| active.snapshot().is_behind(head.commit.as_ref()));

        if outdated || stale_pull_request {
            self.schedule_push_refresh(id);
        }
    }

    /// Restarts the quiet period after which pushed commits are synchronised.
    fn schedule_push_refresh(&self, id: SessionId) {
        let task = ScheduledTask::spawn(self.shared.triggers.after(
            self.shared.config.push_debounce(),
            id,
            Trigger::PushSettled,
        ));
        self.with_session(id, |session| {
            if session.push_debounce.replace(task).is_some() {
                debug!("push debounce restarted");
            }
        });
    }

    /// Runs once the push debounce elapses.
    pub(super) async fn sync_after_push(&self, id: SessionId) {
        self.with_session(id, |session| session.push_debounce = None);
        match self.classification() {
            Some(BranchClassification::OnAnalysedBranchOutdated) => {
                self.with_session(id, |session| session.outdated_retry.reset());
                self.refresh_analysis(id).await;
            }
            Some(BranchClassification::OnPullRequestBranch) => {
                self.refresh_pull_request_data(id).await;
            }
            _ => {}
        }
    }
}
