//! The repository state orchestrator.
//!
//! [`RepositoryOrchestrator`] owns the [`OrchestratorState`] of the current
//! local repository and everything bound to it: the change listener, the
//! retry loops, the issue cache, the pull request tracker, and the external
//! CLI handle.
//!
//! ## Sessions
//!
//! Opening a repository starts a *session*. All timers and listeners of a
//! session live in its [`Session`] value, so detaching the session cancels
//! them. Timers and listeners never call the orchestrator directly: they send a
//! trigger tagged with their session id to the driver task, which ignores
//! triggers from sessions that are no longer current.
//!
//! ## Locking
//!
//! State lives behind a `parking_lot` mutex that is never held across an
//! `.await`. Work that spans a remote call re-checks the session id (and the
//! transition graph) before committing its result.
//!
//! | Submodule | Contents |
//! |-----------|----------|
//! | `resolve` | HEAD wait, remote resolution, onboarding, first analysis |
//! | `branch` | Branch classification, pull request matching, push re-sync |
//! | `driver` | Trigger dispatch |

mod branch;
mod driver;
mod resolve;


use std::sync::{Arc, Weak};

use domain::{
    AnalysisSnapshot, AuthStore, BranchClassification, BranchName, CliWrapper,
    CliWrapperFactory, LocalRepository, LocalVcsProvider, Notification, Notifier,
    OrchestratorState, PullRequestSnapshot, PullRequestSummary, Remote, RemoteAnalysisService,
    RepositoryIdentity, ServiceError, SessionId, StateChange,
};
use futures::future::{BoxFuture, Shared as SharedFuture};
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::events::{Subscription, Topics};
use crate::issues::{IssueCache, IssueList};
use crate::pull_requests::PullRequestTracker;
use crate::registry::CliRegistry;
use crate::retry::{RetryHandle, RetryStatus, ScheduledTask};
use crate::trigger::{Trigger, TriggerSender};

/// External collaborators the orchestrator is wired to.
#[derive(Clone)]
pub struct Collaborators {
    pub vcs: Arc<dyn LocalVcsProvider>,
    pub service: Arc<dyn RemoteAnalysisService>,
    pub auth: Arc<dyn AuthStore>,
    pub notifier: Arc<dyn Notifier>,
    pub cli_factory: Arc<dyn CliWrapperFactory>,
}

/// Retry-loop and listener status of the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Diagnostics {
    pub session: Option<SessionId>,
    pub head_wait: RetryStatus,
    pub analysis_poll: RetryStatus,
    pub pull_request_lookup: RetryStatus,
    pub outdated_retry: RetryStatus,
    pub push_debounce_pending: bool,
    /// A change listener is installed on the local repository.
    pub listening: bool,
    pub resolving: bool,
}

type Resolution = SharedFuture<BoxFuture<'static, ()>>;

// ---------------------------------------------------------------------------
// Session and shared state
// ---------------------------------------------------------------------------

/// Everything bound to one open local repository.
struct Session {
    id: SessionId,
    repository: Arc<dyn LocalRepository>,
    identity: Option<RepositoryIdentity>,
    /// Remotes seen by the last resolution attempt.
    remotes: Vec<Remote>,
    snapshot: Option<AnalysisSnapshot>,
    /// Branch seen by the last classification.
    branch: Option<BranchName>,
    cli: Option<Arc<dyn CliWrapper>>,
    resolving: Option<Resolution>,
    head_wait: RetryHandle,
    analysis_poll: RetryHandle,
    pull_request_lookup: RetryHandle,
    outdated_retry: RetryHandle,
    push_debounce: Option<ScheduledTask>,
    listener: Option<ScheduledTask>,
}

impl Session {
    fn new(id: SessionId, repository: Arc<dyn LocalRepository>, config: &SyncConfig) -> Self {
        let remotes = repository.remotes();
        Self {
            id,
            repository,
            identity: None,
            remotes,
            snapshot: None,
            branch: None,
            cli: None,
            resolving: None,
            head_wait: RetryHandle::new("head_wait", config.head_wait_max_attempts),
            analysis_poll: RetryHandle::new("analysis_poll", config.analysis_poll_max_attempts),
            pull_request_lookup: RetryHandle::new(
                "pull_request_lookup",
                config.pull_request_lookup_max_attempts,
            ),
            outdated_retry: RetryHandle::new(
                "outdated_retry",
                config.outdated_branch_retry_max_attempts,
            ),
            push_debounce: None,
            listener: None,
        }
    }

    /// Cancels every timer and starts new retry episodes. The change listener
    /// stays installed.
    fn reset_timers(&mut self) {
        self.head_wait.reset();
        self.analysis_poll.reset();
        self.pull_request_lookup.reset();
        self.outdated_retry.reset();
        self.push_debounce = None;
    }
}

struct Inner {
    state: OrchestratorState,
    classification: Option<BranchClassification>,
    session: Option<Session>,
}

impl Inner {
    fn session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(|session| session.id)
    }

    fn is_current(&self, id: SessionId) -> bool {
        self.session_id() == Some(id)
    }

    fn session(&self, id: SessionId) -> Option<&Session> {
        self.session.as_ref().filter(|session| session.id == id)
    }

    fn session_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.session.as_mut().filter(|session| session.id == id)
    }
}

struct Shared {
    config: SyncConfig,
    vcs: Arc<dyn LocalVcsProvider>,
    service: Arc<dyn RemoteAnalysisService>,
    auth: Arc<dyn AuthStore>,
    notifier: Arc<dyn Notifier>,
    topics: Topics,
    issues: IssueCache,
    pull_requests: PullRequestTracker,
    cli: Mutex<CliRegistry>,
    triggers: TriggerSender,
    inner: Mutex<Inner>,
    /// Driver and auth listener; aborted when the orchestrator is dropped.
    background: Mutex<Vec<ScheduledTask>>,
}

// ---------------------------------------------------------------------------
// RepositoryOrchestrator
// ---------------------------------------------------------------------------

/// Keeps one local repository synchronised with its remote analysis.
///
/// Cheap to clone; every clone drives the same state. Must be created inside a
/// Tokio runtime.
#[derive(Clone)]
pub struct RepositoryOrchestrator {
    shared: Arc<Shared>,
}

impl RepositoryOrchestrator {
    pub fn new(config: SyncConfig, collaborators: Collaborators) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let triggers = TriggerSender::new(tx);
        let topics = Topics::new();

        let issues = IssueCache::new(
            Arc::clone(&collaborators.service),
            config.issue_cap,
            config.issue_page_size,
            topics.issues.clone(),
        );
        let pull_requests = PullRequestTracker::new(
            Arc::clone(&collaborators.service),
            topics.pull_requests.clone(),
            topics.active_pull_request.clone(),
            triggers.clone(),
            config.pull_request_refresh(),
            config.pull_request_page_limit,
        );

        let auth_changes = collaborators.auth.changes();
        let shared = Arc::new(Shared {
            config,
            vcs: collaborators.vcs,
            service: collaborators.service,
            auth: collaborators.auth,
            notifier: collaborators.notifier,
            topics,
            issues,
            pull_requests,
            cli: Mutex::new(CliRegistry::new(collaborators.cli_factory)),
            triggers: triggers.clone(),
            inner: Mutex::new(Inner {
                state: OrchestratorState::Initializing,
                classification: None,
                session: None,
            }),
            background: Mutex::new(Vec::new()),
        });

        let driver = ScheduledTask::spawn(driver::drive(Arc::downgrade(&shared), rx));
        let auth_listener = ScheduledTask::spawn(async move {
            let mut changes = auth_changes;
            while changes.next().await.is_some() {
                triggers.send(None, Trigger::AuthChanged);
            }
        });
        shared.background.lock().extend([driver, auth_listener]);

        Self { shared }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn state(&self) -> OrchestratorState {
        self.shared.inner.lock().state
    }

    pub fn classification(&self) -> Option<BranchClassification> {
        self.shared.inner.lock().classification
    }

    pub fn identity(&self) -> Option<RepositoryIdentity> {
        let inner = self.shared.inner.lock();
        inner.session.as_ref()?.identity.clone()
    }

    /// The analysis snapshot; `None` unless `Loaded` or `IsAnalyzing`.
    pub fn snapshot(&self) -> Option<AnalysisSnapshot> {
        let inner = self.shared.inner.lock();
        if !inner.state.holds_analysis() {
            return None;
        }
        inner.session.as_ref()?.snapshot.clone()
    }

    pub fn current_repository(&self) -> Option<Arc<dyn LocalRepository>> {
        let inner = self.shared.inner.lock();
        inner
            .session
            .as_ref()
            .map(|session| Arc::clone(&session.repository))
    }

    /// The CLI handle for the resolved repository identity.
    pub fn cli(&self) -> Option<Arc<dyn CliWrapper>> {
        let inner = self.shared.inner.lock();
        inner.session.as_ref()?.cli.clone()
    }

    pub fn issues(&self) -> IssueList {
        self.shared.issues.current()
    }

    /// The known pull requests; `None` unless `Loaded` or `IsAnalyzing`.
    pub fn pull_requests(&self) -> Option<Arc<[PullRequestSummary]>> {
        if !self.state().holds_analysis() {
            return None;
        }
        self.shared.pull_requests.known()
    }

    pub fn active_pull_request(&self) -> Option<PullRequestSnapshot> {
        if !self.state().holds_analysis() {
            return None;
        }
        self.shared
            .pull_requests
            .active()
            .map(|active| active.snapshot())
    }

    pub fn diagnostics(&self) -> Diagnostics {
        let inner = self.shared.inner.lock();
        let Some(session) = inner.session.as_ref() else {
            return Diagnostics::default();
        };
        Diagnostics {
            session: Some(session.id),
            head_wait: session.head_wait.status(),
            analysis_poll: session.analysis_poll.status(),
            pull_request_lookup: session.pull_request_lookup.status(),
            outdated_retry: session.outdated_retry.status(),
            push_debounce_pending: session
                .push_debounce
                .as_ref()
                .is_some_and(|task| !task.is_finished()),
            listening: session
                .listener
                .as_ref()
                .is_some_and(|task| !task.is_finished()),
            resolving: session.resolving.is_some(),
        }
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    pub fn subscribe_state(&self) -> Subscription<StateChange> {
        self.shared.topics.state.subscribe()
    }

    pub fn subscribe_classification(&self) -> Subscription<Option<BranchClassification>> {
        self.shared.topics.classification.subscribe()
    }

    /// Fires with the snapshot each time the repository enters `Loaded`.
    pub fn subscribe_repository_loaded(&self) -> Subscription<AnalysisSnapshot> {
        self.shared.topics.repository_loaded.subscribe()
    }

    pub fn subscribe_issues(&self) -> Subscription<IssueList> {
        self.shared.topics.issues.subscribe()
    }

    pub fn subscribe_active_pull_request(&self) -> Subscription<Option<PullRequestSnapshot>> {
        self.shared.topics.active_pull_request.subscribe()
    }

    pub fn subscribe_pull_requests(&self) -> Subscription<Arc<[PullRequestSummary]>> {
        self.shared.topics.pull_requests.subscribe()
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Makes `repository` the current repository and resolves it.
    ///
    /// Opening the repository that is already current does nothing, or joins
    /// the resolution still in flight. Opening another repository first tears
    /// down everything bound to the previous one.
    pub async fn open(&self, repository: Arc<dyn LocalRepository>) {
        let resolution = {
            let mut inner = self.shared.inner.lock();
            let reopening = inner
                .session
                .as_ref()
                .is_some_and(|session| session.repository.root() == repository.root());

            if reopening {
                match inner.session.as_ref().and_then(|s| s.resolving.clone()) {
                    Some(resolution) => resolution,
                    None => {
                        debug!(root = %repository.root().display(), "repository already open");
                        return;
                    }
                }
            } else {
                self.detach(&mut inner);
                let id = self.attach(&mut inner, repository);
                match self.begin_resolution(&mut inner, id) {
                    Some(resolution) => resolution,
                    None => return,
                }
            }
        };
        resolution.await;
    }

    /// Closes `repository` if it is the current one.
    pub fn close(&self, repository: &dyn LocalRepository) {
        let mut inner = self.shared.inner.lock();
        let is_current = inner
            .session
            .as_ref()
            .is_some_and(|session| session.repository.root() == repository.root());
        if !is_current {
            debug!(root = %repository.root().display(), "close ignored; repository is not current");
            return;
        }
        self.teardown(&mut inner);
    }

    /// Closes whatever repository is current.
    pub fn clear(&self) {
        let mut inner = self.shared.inner.lock();
        self.teardown(&mut inner);
    }

    /// Re-synchronises with the remote service.
    ///
    /// With analysis data available only pull request data is fetched again.
    /// `AnalysisFailed` is left as it is; `close` followed by `open` is the
    /// way out of it. Any other state re-runs resolution for the current
    /// repository, or opens the first available one when nothing is open.
    pub async fn refresh(&self) {
        let (state, session) = {
            let inner = self.shared.inner.lock();
            (inner.state, inner.session_id())
        };
        info!(%state, "refresh requested");

        match (state, session) {
            (OrchestratorState::AnalysisFailed, Some(_)) => {
                debug!("refresh ignored; first analysis failed");
            }
            (OrchestratorState::Loaded | OrchestratorState::IsAnalyzing, Some(id)) => {
                if state == OrchestratorState::IsAnalyzing {
                    self.restart_analysis_poll(id);
                }
                self.refresh_pull_request_data(id).await;
            }
            (_, Some(id)) => self.reresolve(id).await,
            (_, None) => self.open_first_available().await,
        }
    }

    /// Checks out the origin branch of `pull_request` unless it is already
    /// checked out. Returns `true` when a checkout happened.
    pub async fn checkout(&self, pull_request: &PullRequestSummary) -> bool {
        let Some(repository) = self.current_repository() else {
            debug!(number = %pull_request.number, "checkout ignored; no repository open");
            return false;
        };

        let on_branch = repository
            .head()
            .and_then(|head| head.branch)
            .is_some_and(|branch| branch == pull_request.origin_branch);
        if on_branch {
            debug!(branch = %pull_request.origin_branch, "branch already checked out");
            return false;
        }

        match repository.checkout(&pull_request.origin_branch).await {
            Ok(()) => {
                info!(branch = %pull_request.origin_branch, number = %pull_request.number, "checked out pull request branch");
                true
            }
            Err(error) => {
                warn!(branch = %pull_request.origin_branch, %error, "checkout failed");
                self.shared.notifier.notify(Notification::CheckoutFailed {
                    branch: pull_request.origin_branch.clone(),
                    reason: error.to_string(),
                });
                false
            }
        }
    }

    /// Adds the current repository to the service, then resolves it again.
    ///
    /// Only acts in `NeedsToAddRepository`.
    pub async fn add_repository(&self) -> bool {
        let Some((id, identity)) = self.onboarding_target(OrchestratorState::NeedsToAddRepository)
        else {
            return false;
        };

        match self.shared.service.add_repository(&identity).await {
            Ok(()) => {
                info!(%identity, "repository added");
                self.reresolve(id).await;
                true
            }
            Err(error) if error.is_unauthorized() => {
                self.require_authentication();
                false
            }
            Err(error) => {
                warn!(%identity, %error, "adding repository failed");
                self.shared.notifier.notify(Notification::AddRepositoryFailed {
                    identity,
                    reason: error.to_string(),
                });
                false
            }
        }
    }

    /// Asks to join the organization of the current repository, then
    /// resolves it again.
    ///
    /// Only acts in `NeedsToJoinOrganization`.
    pub async fn join_organization(&self) -> bool {
        let Some((id, identity)) =
            self.onboarding_target(OrchestratorState::NeedsToJoinOrganization)
        else {
            return false;
        };

        match self
            .shared
            .service
            .join_organization(identity.provider, &identity.organization)
            .await
        {
            Ok(()) => {
                info!(organization = %identity.organization, "join requested");
                self.reresolve(id).await;
                true
            }
            Err(error) if error.is_unauthorized() => {
                self.require_authentication();
                false
            }
            Err(error) => {
                warn!(organization = %identity.organization, %error, "join request failed");
                self.shared
                    .notifier
                    .notify(Notification::JoinOrganizationFailed {
                        provider: identity.provider,
                        organization: identity.organization,
                        reason: error.to_string(),
                    });
                false
            }
        }
    }

    /// Tears down the current repository and stops the background tasks.
    pub fn shutdown(&self) {
        self.clear();
        self.shared.background.lock().clear();
        info!("orchestrator shut down");
    }

    // -----------------------------------------------------------------------
    // Session lifecycle
    // -----------------------------------------------------------------------

    fn attach(&self, inner: &mut Inner, repository: Arc<dyn LocalRepository>) -> SessionId {
        let id = SessionId::new_random();
        info!(session = %id, root = %repository.root().display(), "repository opened");

        let mut session = Session::new(id, Arc::clone(&repository), &self.shared.config);
        let triggers = self.shared.triggers.clone();
        let mut changes = repository.changes();
        session.listener = Some(ScheduledTask::spawn(async move {
            while changes.next().await.is_some() {
                triggers.send(Some(id), Trigger::RepositoryChanged);
            }
        }));
        inner.session = Some(session);
        id
    }

    /// Detaches the current session, cancelling its timers and listener and
    /// discarding everything cached for it.
    fn detach(&self, inner: &mut Inner) {
        let Some(session) = inner.session.take() else {
            return;
        };
        info!(session = %session.id, root = %session.repository.root().display(), "repository closed");

        if let Some(identity) = &session.identity {
            self.shared.cli.lock().evict(identity);
        }
        self.shared.issues.clear();
        self.shared.pull_requests.clear();
        self.set_classification_locked(inner, None);
        drop(session);
    }

    fn teardown(&self, inner: &mut Inner) {
        self.detach(inner);
        let next = if self.shared.auth.has_token() {
            OrchestratorState::NoGitRepository
        } else {
            OrchestratorState::NeedsAuthentication
        };
        self.set_state(inner, next);
    }

    /// Returns the resolution in flight for `id`, starting one if needed.
    fn begin_resolution(&self, inner: &mut Inner, id: SessionId) -> Option<Resolution> {
        let session = inner.session_mut(id)?;
        if let Some(resolution) = &session.resolving {
            return Some(resolution.clone());
        }

        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let resolution = async move {
            if let Some(shared) = weak.upgrade() {
                RepositoryOrchestrator { shared }.resolve(id).await;
            }
        }
        .boxed()
        .shared();
        session.resolving = Some(resolution.clone());
        Some(resolution)
    }

    /// Cancels the timers of `id` and runs resolution again.
    async fn reresolve(&self, id: SessionId) {
        let resolution = {
            let mut inner = self.shared.inner.lock();
            let Some(session) = inner.session_mut(id) else {
                return;
            };
            session.reset_timers();
            self.begin_resolution(&mut inner, id)
        };
        if let Some(resolution) = resolution {
            resolution.await;
        }
    }

    async fn open_first_available(&self) {
        match self.shared.vcs.repositories().into_iter().next() {
            Some(repository) => self.open(repository).await,
            None => debug!("no local repository available"),
        }
    }

    fn onboarding_target(&self, expected: OrchestratorState) -> Option<(SessionId, RepositoryIdentity)> {
        let inner = self.shared.inner.lock();
        if inner.state != expected {
            debug!(state = %inner.state, %expected, "onboarding action ignored");
            return None;
        }
        let session = inner.session.as_ref()?;
        Some((session.id, session.identity.clone()?))
    }

    // -----------------------------------------------------------------------
    // State helpers
    // -----------------------------------------------------------------------

    /// Applies a transition, publishing exactly one change event.
    ///
    /// Transitions outside the state graph are ignored. Leaving the states
    /// that hold analysis data discards that data.
    fn set_state(&self, inner: &mut Inner, next: OrchestratorState) -> bool {
        let previous = inner.state;
        if previous == next {
            return false;
        }
        if !previous.can_transition_to(next) {
            debug!(from = %previous, to = %next, "ignoring transition outside the state graph");
            return false;
        }

        inner.state = next;
        if !next.holds_analysis() {
            if let Some(session) = inner.session.as_mut() {
                session.snapshot = None;
            }
            self.set_classification_locked(inner, None);
            self.shared.issues.clear();
            self.shared.pull_requests.clear();
        }

        info!(from = %previous, to = %next, "state changed");
        self.shared.topics.state.publish(StateChange {
            previous,
            current: next,
        });
        true
    }

    /// Transitions if `id` is still the current session.
    fn transition(&self, id: SessionId, next: OrchestratorState) -> bool {
        let mut inner = self.shared.inner.lock();
        if !inner.is_current(id) {
            debug!(session = %id, to = %next, "discarding transition for closed session");
            return false;
        }
        self.set_state(&mut inner, next)
    }

    fn set_classification_locked(
        &self,
        inner: &mut Inner,
        classification: Option<BranchClassification>,
    ) {
        if inner.classification == classification {
            return;
        }
        inner.classification = classification;
        match classification {
            Some(value) => info!(classification = %value, "branch classified"),
            None => debug!("branch classification cleared"),
        }
        self.shared.topics.classification.publish(classification);
    }

    /// Sets the classification if `id` is current and `Loaded`.
    fn set_classification(&self, id: SessionId, classification: BranchClassification) {
        let mut inner = self.shared.inner.lock();
        if !inner.is_current(id) || inner.state != OrchestratorState::Loaded {
            return;
        }
        self.set_classification_locked(&mut inner, Some(classification));
    }

    fn with_session<R>(&self, id: SessionId, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        let mut inner = self.shared.inner.lock();
        inner.session_mut(id).map(f)
    }

    fn session_id(&self) -> Option<SessionId> {
        self.shared.inner.lock().session_id()
    }

    /// Drops every timer and cached result and waits for credentials. The
    /// repository stays open so resolution can resume.
    fn require_authentication(&self) {
        let mut inner = self.shared.inner.lock();
        if let Some(session) = inner.session.as_mut() {
            session.reset_timers();
        }
        if self.set_state(&mut inner, OrchestratorState::NeedsAuthentication) {
            warn!("authentication required");
        }
    }

    /// Applies the failure semantics for a service error hit while working
    /// on `id`.
    ///
    /// Rejected credentials force `NeedsAuthentication`. Other failures keep
    /// a `Loaded` repository as it is and otherwise degrade to `NoRepository`.
    fn degrade(&self, id: SessionId, error: &ServiceError, operation: &'static str) {
        if error.is_unauthorized() {
            self.require_authentication();
            return;
        }

        let mut inner = self.shared.inner.lock();
        if !inner.is_current(id) {
            return;
        }
        if inner.state == OrchestratorState::Loaded {
            warn!(operation, %error, "remote call failed; keeping loaded state");
        } else {
            warn!(operation, %error, state = %inner.state, "remote call failed");
            self.set_state(&mut inner, OrchestratorState::NoRepository);
        }
    }
}

impl std::fmt::Debug for RepositoryOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("RepositoryOrchestrator")
            .field("state", &inner.state)
            .field("classification", &inner.classification)
            .field("session", &inner.session_id())
            .finish()
    }
}
