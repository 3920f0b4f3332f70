//! In-memory collaborators and fixtures for the orchestrator tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use domain::{
    AnalysedCommit, AuthStore, BranchName, CliWrapper, CliWrapperFactory, CommitSha,
    CoverageSummary, FirstAnalysisStatus, Head, IssueId, IssueRecord, IssueSeverity, JoinStatus,
    LocalRepository, LocalVcsProvider, Membership, Notification, Notifier, Organization,
    OrganizationName, Page, Provider, PullRequestAnalysis, PullRequestNumber,
    PullRequestSnapshot, PullRequestSummary, Remote, RemoteAnalysisService, RemoteName,
    RepositoryAnalysis, RepositoryIdentity, RepositoryName, ServiceError, VcsError,
};
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn identity(organization: &str, repository: &str) -> RepositoryIdentity {
    RepositoryIdentity::new(
        Provider::GitHub,
        OrganizationName::new(organization).unwrap(),
        RepositoryName::new(repository).unwrap(),
    )
}

pub fn branch(name: &str) -> BranchName {
    BranchName::new(name).unwrap()
}

pub fn sha(value: &str) -> CommitSha {
    CommitSha::new(value).unwrap()
}

pub fn head(branch_name: &str, commit: &str, ahead: u32) -> Head {
    Head {
        branch: Some(branch(branch_name)),
        commit: Some(sha(commit)),
        ahead: Some(ahead),
        behind: Some(0),
    }
}

pub fn remote(name: &str, url: &str) -> Remote {
    Remote {
        name: RemoteName::new(name).unwrap(),
        fetch_url: Some(url.to_string()),
        push_url: None,
    }
}

pub fn analysed(commit: &str) -> RepositoryAnalysis {
    RepositoryAnalysis {
        branch: None,
        last_analysed_commit: Some(AnalysedCommit {
            sha: sha(commit),
            analysed_at: None,
        }),
        grade: Some("A".into()),
        issues_count: Some(3),
    }
}

pub fn pull_request(number: u64, origin: &str) -> PullRequestSummary {
    PullRequestSummary {
        number: PullRequestNumber::new(number),
        title: format!("Pull request {number}"),
        origin_branch: branch(origin),
        target_branch: branch("main"),
        head_commit: Some(sha(&format!("pr{number}"))),
        is_analysing: false,
    }
}

pub fn issues(prefix: &str, count: usize) -> Vec<IssueRecord> {
    (0..count)
        .map(|index| IssueRecord {
            id: IssueId::new(format!("{prefix}-{index}")).unwrap(),
            file_path: format!("src/{prefix}.rs"),
            line: index as u32 + 1,
            message: "Unused variable".into(),
            severity: IssueSeverity::Warning,
            category: "code_style".into(),
            commit: sha("abc"),
        })
        .collect()
}

/// Lets spawned tasks and the driver run until they are idle.
pub async fn settle() {
    for _ in 0..5 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

// ---------------------------------------------------------------------------
// Local repository
// ---------------------------------------------------------------------------

pub struct MockRepository {
    root: PathBuf,
    head: Mutex<Option<Head>>,
    remotes: Mutex<Vec<Remote>>,
    changes: broadcast::Sender<()>,
    checkouts: Mutex<Vec<BranchName>>,
    fail_checkout: AtomicBool,
}

impl MockRepository {
    pub fn new(root: &str, head: Option<Head>, remotes: Vec<Remote>) -> Arc<Self> {
        let (changes, _) = broadcast::channel(16);
        Arc::new(Self {
            root: PathBuf::from(root),
            head: Mutex::new(head),
            remotes: Mutex::new(remotes),
            changes,
            checkouts: Mutex::new(Vec::new()),
            fail_checkout: AtomicBool::new(false),
        })
    }

    pub fn set_head(&self, head: Option<Head>) {
        *self.head.lock() = head;
        self.notify();
    }

    pub fn set_remotes(&self, remotes: Vec<Remote>) {
        *self.remotes.lock() = remotes;
        self.notify();
    }

    pub fn notify(&self) {
        let _ = self.changes.send(());
    }

    /// Change streams currently subscribed.
    pub fn listener_count(&self) -> usize {
        self.changes.receiver_count()
    }

    pub fn checkouts(&self) -> Vec<BranchName> {
        self.checkouts.lock().clone()
    }

    pub fn fail_checkouts(&self) {
        self.fail_checkout.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl LocalRepository for MockRepository {
    fn root(&self) -> &Path {
        &self.root
    }

    fn head(&self) -> Option<Head> {
        self.head.lock().clone()
    }

    fn remotes(&self) -> Vec<Remote> {
        self.remotes.lock().clone()
    }

    fn changes(&self) -> BoxStream<'static, ()> {
        let receiver = self.changes.subscribe();
        stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(()) => return Some(((), receiver)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }

    async fn checkout(&self, target: &BranchName) -> Result<(), VcsError> {
        self.checkouts.lock().push(target.clone());
        if self.fail_checkout.load(Ordering::SeqCst) {
            return Err(VcsError::CheckoutFailed {
                branch: target.clone(),
                message: "local changes would be overwritten".into(),
            });
        }
        let mut head = self.head.lock().clone().unwrap_or(Head {
            branch: None,
            commit: None,
            ahead: None,
            behind: None,
        });
        head.branch = Some(target.clone());
        self.set_head(Some(head));
        Ok(())
    }
}

pub struct MockProvider {
    pub repositories: Mutex<Vec<Arc<dyn LocalRepository>>>,
}

impl MockProvider {
    pub fn new(repositories: Vec<Arc<dyn LocalRepository>>) -> Arc<Self> {
        Arc::new(Self {
            repositories: Mutex::new(repositories),
        })
    }
}

impl LocalVcsProvider for MockProvider {
    fn repositories(&self) -> Vec<Arc<dyn LocalRepository>> {
        self.repositories.lock().clone()
    }
}

// ---------------------------------------------------------------------------
// Remote analysis service
// ---------------------------------------------------------------------------

/// Scripted service responses. Tests mutate the fields directly.
pub struct MockServiceState {
    /// Repositories keyed by identity; anything else is not found.
    pub repositories: HashMap<RepositoryIdentity, RepositoryAnalysis>,
    /// Branch-scoped analyses; fall back to `repositories`.
    pub branch_analyses: HashMap<BranchName, RepositoryAnalysis>,
    pub organizations: HashMap<OrganizationName, Membership>,
    pub join_status: JoinStatus,
    pub enabled_branches: Vec<BranchName>,
    pub coverage: Option<CoverageSummary>,
    pub first_analysis: FirstAnalysisStatus,
    pub pull_requests: Vec<PullRequestSummary>,
    pub pull_request_page_size: usize,
    pub pull_request_analysing: HashMap<u64, bool>,
    pub list_pull_requests_delay: Option<Duration>,
    pub issue_pages: Vec<Vec<IssueRecord>>,
    pub issue_failure_page: Option<usize>,
    pub issue_limits: Vec<usize>,
    /// Every call fails with this error when set.
    pub failure: Option<ServiceError>,
    pub add_repository_error: Option<ServiceError>,
}

impl Default for MockServiceState {
    fn default() -> Self {
        Self {
            repositories: HashMap::new(),
            branch_analyses: HashMap::new(),
            organizations: HashMap::new(),
            join_status: JoinStatus::NotRequested,
            enabled_branches: Vec::new(),
            coverage: None,
            first_analysis: FirstAnalysisStatus::InProgress,
            pull_requests: Vec::new(),
            pull_request_page_size: 50,
            pull_request_analysing: HashMap::new(),
            list_pull_requests_delay: None,
            issue_pages: Vec::new(),
            issue_failure_page: None,
            issue_limits: Vec::new(),
            failure: None,
            add_repository_error: None,
        }
    }
}

#[derive(Default)]
pub struct MockService {
    pub state: Mutex<MockServiceState>,
    calls: Mutex<Vec<String>>,
    in_flight: Mutex<HashMap<&'static str, usize>>,
    peak: Mutex<HashMap<&'static str, usize>>,
    total: AtomicUsize,
}

/// Tracks one in-flight call for `max_concurrent`.
struct InFlight<'a> {
    service: &'a MockService,
    name: &'static str,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(count) = self.service.in_flight.lock().get_mut(self.name) {
            *count -= 1;
        }
    }
}

impl MockService {
    fn record(&self, name: &'static str) -> Result<InFlight<'_>, ServiceError> {
        self.calls.lock().push(name.to_string());
        self.total.fetch_add(1, Ordering::SeqCst);
        let current = {
            let mut in_flight = self.in_flight.lock();
            let count = in_flight.entry(name).or_insert(0);
            *count += 1;
            *count
        };
        let mut peak = self.peak.lock();
        let max = peak.entry(name).or_insert(0);
        *max = (*max).max(current);
        drop(peak);

        let guard = InFlight {
            service: self,
            name,
        };
        match self.state.lock().failure.clone() {
            Some(error) => Err(error),
            None => Ok(guard),
        }
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls.lock().iter().filter(|call| *call == name).count()
    }

    pub fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    pub fn max_concurrent(&self, name: &'static str) -> usize {
        self.peak.lock().get(name).copied().unwrap_or(0)
    }

    pub fn set_pull_request_analysing(&self, number: u64, analysing: bool) {
        self.state
            .lock()
            .pull_request_analysing
            .insert(number, analysing);
    }

    /// Registers `identity` as analysed at `commit` with `enabled` branches.
    pub fn add_analysed(&self, identity: RepositoryIdentity, commit: &str, enabled: &[&str]) {
        let mut state = self.state.lock();
        state.repositories.insert(identity, analysed(commit));
        state.enabled_branches = enabled.iter().map(|name| branch(name)).collect();
    }
}

#[async_trait]
impl RemoteAnalysisService for MockService {
    async fn get_organization(
        &self,
        provider: Provider,
        organization: &OrganizationName,
    ) -> Result<Organization, ServiceError> {
        let _call = self.record("get_organization")?;
        let membership = self.state.lock().organizations.get(organization).copied();
        match membership {
            Some(membership) => Ok(Organization {
                provider,
                name: organization.clone(),
                membership,
            }),
            None => Err(ServiceError::not_found(organization.to_string())),
        }
    }

    async fn get_repository_with_analysis(
        &self,
        identity: &RepositoryIdentity,
        branch: Option<&BranchName>,
    ) -> Result<RepositoryAnalysis, ServiceError> {
        let name = if branch.is_some() {
            "get_branch_analysis"
        } else {
            "get_repository"
        };
        let _call = self.record(name)?;
        let state = self.state.lock();
        if let Some(analysis) = branch.and_then(|branch| state.branch_analyses.get(branch)) {
            return Ok(analysis.clone());
        }
        state
            .repositories
            .get(identity)
            .cloned()
            .ok_or_else(|| ServiceError::not_found(identity.to_string()))
    }

    async fn list_enabled_branches(
        &self,
        _identity: &RepositoryIdentity,
    ) -> Result<Vec<BranchName>, ServiceError> {
        let _call = self.record("list_enabled_branches")?;
        Ok(self.state.lock().enabled_branches.clone())
    }

    async fn get_coverage_summary(
        &self,
        _identity: &RepositoryIdentity,
    ) -> Result<Option<CoverageSummary>, ServiceError> {
        let _call = self.record("get_coverage_summary")?;
        Ok(self.state.lock().coverage.clone())
    }

    async fn list_pull_requests(
        &self,
        _identity: &RepositoryIdentity,
        cursor: Option<&str>,
    ) -> Result<Page<PullRequestSummary>, ServiceError> {
        let _call = self.record("list_pull_requests")?;
        let (page, delay) = {
            let state = self.state.lock();
            let start: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
            let end = (start + state.pull_request_page_size).min(state.pull_requests.len());
            let items = state.pull_requests[start.min(end)..end].to_vec();
            let cursor = (end < state.pull_requests.len()).then(|| end.to_string());
            (Page { items, cursor }, state.list_pull_requests_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(page)
    }

    async fn get_pull_request(
        &self,
        _identity: &RepositoryIdentity,
        number: PullRequestNumber,
    ) -> Result<PullRequestSnapshot, ServiceError> {
        let _call = self.record("get_pull_request")?;
        let state = self.state.lock();
        let summary = state
            .pull_requests
            .iter()
            .find(|pull_request| pull_request.number == number)
            .ok_or_else(|| ServiceError::not_found(number.to_string()))?;
        let is_analysing = state
            .pull_request_analysing
            .get(&number.as_u64())
            .copied()
            .unwrap_or(summary.is_analysing);
        Ok(PullRequestSnapshot {
            number,
            origin_branch: summary.origin_branch.clone(),
            target_branch: summary.target_branch.clone(),
            head_commit: summary.head_commit.clone(),
            analysis: PullRequestAnalysis {
                is_analysing,
                result: None,
            },
        })
    }

    async fn search_issues(
        &self,
        _identity: &RepositoryIdentity,
        _branch: &BranchName,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<Page<IssueRecord>, ServiceError> {
        let _call = self.record("search_issues")?;
        let mut state = self.state.lock();
        state.issue_limits.push(limit);
        let index: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
        if state.issue_failure_page == Some(index) {
            return Err(ServiceError::transient("issue search timed out"));
        }
        let items: Vec<IssueRecord> = state
            .issue_pages
            .get(index)
            .map(|page| page.iter().take(limit).cloned().collect())
            .unwrap_or_default();
        let cursor = (index + 1 < state.issue_pages.len()).then(|| (index + 1).to_string());
        Ok(Page { items, cursor })
    }

    async fn get_first_analysis_status(
        &self,
        _identity: &RepositoryIdentity,
    ) -> Result<FirstAnalysisStatus, ServiceError> {
        let _call = self.record("get_first_analysis_status")?;
        Ok(self.state.lock().first_analysis.clone())
    }

    async fn get_join_status(
        &self,
        _provider: Provider,
        _organization: &OrganizationName,
    ) -> Result<JoinStatus, ServiceError> {
        let _call = self.record("get_join_status")?;
        Ok(self.state.lock().join_status)
    }

    async fn add_repository(&self, identity: &RepositoryIdentity) -> Result<(), ServiceError> {
        let _call = self.record("add_repository")?;
        let mut state = self.state.lock();
        if let Some(error) = state.add_repository_error.clone() {
            return Err(error);
        }
        state
            .repositories
            .insert(identity.clone(), RepositoryAnalysis::default());
        Ok(())
    }

    async fn join_organization(
        &self,
        _provider: Provider,
        _organization: &OrganizationName,
    ) -> Result<(), ServiceError> {
        let _call = self.record("join_organization")?;
        self.state.lock().join_status = JoinStatus::Pending;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Auth, notifications, CLI
// ---------------------------------------------------------------------------

pub struct MockAuth {
    token: AtomicBool,
    changes: broadcast::Sender<()>,
}

impl MockAuth {
    pub fn new(has_token: bool) -> Arc<Self> {
        let (changes, _) = broadcast::channel(16);
        Arc::new(Self {
            token: AtomicBool::new(has_token),
            changes,
        })
    }

    pub fn set_token(&self, has_token: bool) {
        self.token.store(has_token, Ordering::SeqCst);
        let _ = self.changes.send(());
    }
}

impl AuthStore for MockAuth {
    fn has_token(&self) -> bool {
        self.token.load(Ordering::SeqCst)
    }

    fn changes(&self) -> BoxStream<'static, ()> {
        let receiver = self.changes.subscribe();
        stream::unfold(receiver, |mut receiver| async move {
            match receiver.recv().await {
                Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => Some(((), receiver)),
                Err(broadcast::error::RecvError::Closed) => None,
            }
        })
        .boxed()
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.notifications.lock().push(notification);
    }
}

pub struct MockCli {
    identity: RepositoryIdentity,
    shut_down: Arc<AtomicUsize>,
}

impl CliWrapper for MockCli {
    fn identity(&self) -> &RepositoryIdentity {
        &self.identity
    }

    fn shutdown(&self) {
        self.shut_down.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingCliFactory {
    created: AtomicUsize,
    shut_down: Arc<AtomicUsize>,
}

impl RecordingCliFactory {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn shut_down(&self) -> usize {
        self.shut_down.load(Ordering::SeqCst)
    }
}

impl CliWrapperFactory for RecordingCliFactory {
    fn create(&self, identity: &RepositoryIdentity, _root: &Path) -> Arc<dyn CliWrapper> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Arc::new(MockCli {
            identity: identity.clone(),
            shut_down: Arc::clone(&self.shut_down),
        })
    }
}
