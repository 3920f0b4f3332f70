//! A `RemoteAnalysisService` answered from a JSON fixture file.
//!
//! Lets `qsync status` and `qsync watch` exercise the orchestrator against a
//! recorded view of the service without network access.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use domain::{
    BranchName, CoverageSummary, FirstAnalysisStatus, IssueRecord, JoinStatus, Membership,
    Organization, OrganizationName, Page, Provider, PullRequestAnalysis, PullRequestNumber,
    PullRequestSnapshot, PullRequestSummary, RemoteAnalysisService, RepositoryAnalysis,
    RepositoryIdentity, ServiceError,
};
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Fixture {
    #[serde(default)]
    pub organizations: Vec<OrganizationFixture>,
    #[serde(default)]
    pub repositories: Vec<RepositoryFixture>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrganizationFixture {
    pub provider: Provider,
    pub name: OrganizationName,
    pub membership: Membership,
    #[serde(default = "not_requested")]
    pub join_status: JoinStatus,
}

fn not_requested() -> JoinStatus {
    JoinStatus::NotRequested
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepositoryFixture {
    pub identity: RepositoryIdentity,
    #[serde(default)]
    pub analysis: RepositoryAnalysis,
    /// Analyses of individual branches; others fall back to `analysis`.
    #[serde(default)]
    pub branches: HashMap<BranchName, RepositoryAnalysis>,
    #[serde(default)]
    pub enabled_branches: Vec<BranchName>,
    #[serde(default)]
    pub coverage: Option<CoverageSummary>,
    #[serde(default = "in_progress")]
    pub first_analysis: FirstAnalysisStatus,
    #[serde(default)]
    pub pull_requests: Vec<PullRequestSummary>,
    #[serde(default)]
    pub issues: Vec<IssueRecord>,
}

fn in_progress() -> FirstAnalysisStatus {
    FirstAnalysisStatus::InProgress
}

/// Serves a [`Fixture`]. Onboarding calls update the in-memory copy.
#[derive(Debug)]
pub struct FixtureService {
    fixture: Mutex<Fixture>,
}

impl FixtureService {
    pub fn new(fixture: Fixture) -> Self {
        Self {
            fixture: Mutex::new(fixture),
        }
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let fixture: Fixture = serde_json::from_str(json).context("invalid fixture JSON")?;
        Ok(Self::new(fixture))
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read fixture {}", path.display()))?;
        Self::from_json(&json)
    }

    fn with_repository<T>(
        &self,
        identity: &RepositoryIdentity,
        f: impl FnOnce(&RepositoryFixture) -> T,
    ) -> Result<T, ServiceError> {
        let fixture = self.fixture.lock();
        fixture
            .repositories
            .iter()
            .find(|repository| &repository.identity == identity)
            .map(f)
            .ok_or_else(|| ServiceError::not_found(identity.to_string()))
    }
}

#[async_trait]
impl RemoteAnalysisService for FixtureService {
    async fn get_organization(
        &self,
        provider: Provider,
        organization: &OrganizationName,
    ) -> Result<Organization, ServiceError> {
        let fixture = self.fixture.lock();
        fixture
            .organizations
            .iter()
            .find(|known| known.provider == provider && &known.name == organization)
            .map(|known| Organization {
                provider,
                name: known.name.clone(),
                membership: known.membership,
            })
            .ok_or_else(|| ServiceError::not_found(format!("{provider}/{organization}")))
    }

    async fn get_repository_with_analysis(
        &self,
        identity: &RepositoryIdentity,
        branch: Option<&BranchName>,
    ) -> Result<RepositoryAnalysis, ServiceError> {
        debug!(%identity, ?branch, "fixture repository lookup");
        self.with_repository(identity, |repository| {
            branch
                .and_then(|branch| repository.branches.get(branch))
                .unwrap_or(&repository.analysis)
                .clone()
        })
    }

    async fn list_enabled_branches(
        &self,
        identity: &RepositoryIdentity,
    ) -> Result<Vec<BranchName>, ServiceError> {
        self.with_repository(identity, |repository| repository.enabled_branches.clone())
    }

    async fn get_coverage_summary(
        &self,
        identity: &RepositoryIdentity,
    ) -> Result<Option<CoverageSummary>, ServiceError> {
        self.with_repository(identity, |repository| repository.coverage.clone())
    }

    async fn list_pull_requests(
        &self,
        identity: &RepositoryIdentity,
        _cursor: Option<&str>,
    ) -> Result<Page<PullRequestSummary>, ServiceError> {
        self.with_repository(identity, |repository| {
            Page::last(repository.pull_requests.clone())
        })
    }

    async fn get_pull_request(
        &self,
        identity: &RepositoryIdentity,
        number: PullRequestNumber,
    ) -> Result<PullRequestSnapshot, ServiceError> {
        self.with_repository(identity, |repository| {
            repository
                .pull_requests
                .iter()
                .find(|pull_request| pull_request.number == number)
                .map(|pull_request| PullRequestSnapshot {
                    number,
                    origin_branch: pull_request.origin_branch.clone(),
                    target_branch: pull_request.target_branch.clone(),
                    head_commit: pull_request.head_commit.clone(),
                    analysis: PullRequestAnalysis {
                        is_analysing: pull_request.is_analysing,
                        result: None,
                    },
                })
        })?
        .ok_or_else(|| ServiceError::not_found(format!("{identity}{number}")))
    }

    async fn search_issues(
        &self,
        identity: &RepositoryIdentity,
        _branch: &BranchName,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<Page<IssueRecord>, ServiceError> {
        let start: usize = cursor.and_then(|cursor| cursor.parse().ok()).unwrap_or(0);
        self.with_repository(identity, |repository| {
            let end = (start + limit).min(repository.issues.len());
            let items = repository.issues[start.min(end)..end].to_vec();
            let cursor = (end < repository.issues.len()).then(|| end.to_string());
            Page { items, cursor }
        })
    }

    async fn get_first_analysis_status(
        &self,
        identity: &RepositoryIdentity,
    ) -> Result<FirstAnalysisStatus, ServiceError> {
        self.with_repository(identity, |repository| repository.first_analysis.clone())
    }

    async fn get_join_status(
        &self,
        provider: Provider,
        organization: &OrganizationName,
    ) -> Result<JoinStatus, ServiceError> {
        let fixture = self.fixture.lock();
        Ok(fixture
            .organizations
            .iter()
            .find(|known| known.provider == provider && &known.name == organization)
            .map_or(JoinStatus::NotRequested, |known| known.join_status))
    }

    async fn add_repository(&self, identity: &RepositoryIdentity) -> Result<(), ServiceError> {
        let mut fixture = self.fixture.lock();
        if fixture
            .repositories
            .iter()
            .any(|repository| &repository.identity == identity)
        {
            return Ok(());
        }
        fixture.repositories.push(RepositoryFixture {
            identity: identity.clone(),
            analysis: RepositoryAnalysis::default(),
            branches: HashMap::new(),
            enabled_branches: Vec::new(),
            coverage: None,
            first_analysis: FirstAnalysisStatus::InProgress,
            pull_requests: Vec::new(),
            issues: Vec::new(),
        });
        Ok(())
    }

    async fn join_organization(
        &self,
        provider: Provider,
        organization: &OrganizationName,
    ) -> Result<(), ServiceError> {
        let mut fixture = self.fixture.lock();
        let known = fixture
            .organizations
            .iter_mut()
            .find(|known| known.provider == provider && &known.name == organization)
            .ok_or_else(|| ServiceError::not_found(format!("{provider}/{organization}")))?;
        known.join_status = JoinStatus::Pending;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use domain::RepositoryName;

    use super::*;

    const FIXTURE: &str = r#"{
        "organizations": [
            { "provider": "gh", "name": "acme", "membership": "not_member" }
        ],
        "repositories": [
            {
                "identity": { "provider": "gh", "organization": "acme", "repository": "widgets" },
                "analysis": { "last_analysed_commit": { "sha": "abc" }, "grade": "B" },
                "branches": {
                    "develop": { "branch": "develop", "last_analysed_commit": { "sha": "def" } }
                },
                "enabled_branches": ["main", "develop"],
                "pull_requests": [
                    { "number": 4, "origin_branch": "feature", "target_branch": "main" }
                ],
                "issues": [
                    {
                        "id": "i-1", "file_path": "src/lib.rs", "line": 3,
                        "message": "Unused import", "severity": "warning",
                        "category": "code_style", "commit": "abc"
                    },
                    {
                        "id": "i-2", "file_path": "src/lib.rs", "line": 9,
                        "message": "Shadowed binding", "severity": "info",
                        "category": "code_style", "commit": "abc"
                    }
                ]
            }
        ]
    }"#;

    fn widgets() -> RepositoryIdentity {
        RepositoryIdentity::new(
            Provider::GitHub,
            OrganizationName::new("acme").unwrap(),
            RepositoryName::new("widgets").unwrap(),
        )
    }

    #[tokio::test]
    async fn test_branch_analysis_falls_back_to_repository() {
        let service = FixtureService::from_json(FIXTURE).unwrap();
        let develop = BranchName::new("develop").unwrap();
        let main = BranchName::new("main").unwrap();

        let scoped = service
            .get_repository_with_analysis(&widgets(), Some(&develop))
            .await
            .unwrap();
        let fallback = service
            .get_repository_with_analysis(&widgets(), Some(&main))
            .await
            .unwrap();

        assert_eq!(scoped.last_analysed_commit.unwrap().sha.as_str(), "def");
        assert_eq!(fallback.last_analysed_commit.unwrap().sha.as_str(), "abc");
        assert_eq!(fallback.grade.as_deref(), Some("B"));
    }

    #[tokio::test]
    async fn test_unknown_repository_is_not_found() {
        let service = FixtureService::from_json(FIXTURE).unwrap();
        let other = RepositoryIdentity::new(
            Provider::GitLab,
            OrganizationName::new("acme").unwrap(),
            RepositoryName::new("widgets").unwrap(),
        );

        let error = service
            .get_repository_with_analysis(&other, None)
            .await
            .unwrap_err();

        assert!(error.is_not_found());
    }

    #[tokio::test]
    async fn test_issue_search_pages_by_limit() {
        let service = FixtureService::from_json(FIXTURE).unwrap();
        let main = BranchName::new("main").unwrap();

        let first = service
            .search_issues(&widgets(), &main, None, 1)
            .await
            .unwrap();
        let second = service
            .search_issues(&widgets(), &main, first.cursor.as_deref(), 1)
            .await
            .unwrap();

        assert_eq!(first.items[0].id.as_str(), "i-1");
        assert_eq!(second.items[0].id.as_str(), "i-2");
        assert_eq!(second.cursor, None);
    }

    #[tokio::test]
    async fn test_join_marks_request_pending() {
        let service = FixtureService::from_json(FIXTURE).unwrap();
        let acme = OrganizationName::new("acme").unwrap();
        assert_eq!(
            service.get_join_status(Provider::GitHub, &acme).await.unwrap(),
            JoinStatus::NotRequested
        );

        service
            .join_organization(Provider::GitHub, &acme)
            .await
            .unwrap();

        assert_eq!(
            service.get_join_status(Provider::GitHub, &acme).await.unwrap(),
            JoinStatus::Pending
        );
    }

    #[test]
    fn test_unknown_fields_rejected() {
        assert!(FixtureService::from_json(r#"{ "repos": [] }"#).is_err());
    }
}
