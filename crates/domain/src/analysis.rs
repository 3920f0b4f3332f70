//! Payloads returned by the remote analysis service.
//!
//! These are the typed shapes the orchestrator consumes; the wire format of
//! the service lives with whichever adapter talks to it.

use serde::{Deserialize, Serialize};

use crate::{
    BranchName, CommitSha, IssueId, OrganizationName, Provider, PullRequestNumber, Timestamp,
};

// ---------------------------------------------------------------------------
// Repository analysis
// ---------------------------------------------------------------------------

/// A commit the service has finished analysing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysedCommit {
    pub sha: CommitSha,
    #[serde(default)]
    pub analysed_at: Option<Timestamp>,
}

/// Repository record as returned by the "repository with analysis" lookup.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RepositoryAnalysis {
    /// Branch the analysis describes; `None` for the default branch.
    #[serde(default)]
    pub branch: Option<BranchName>,

    /// `None` until the first analysis has completed.
    #[serde(default)]
    pub last_analysed_commit: Option<AnalysedCommit>,

    #[serde(default)]
    pub grade: Option<String>,

    #[serde(default)]
    pub issues_count: Option<u64>,
}

/// Coverage-report summary for a repository.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CoverageSummary {
    #[serde(default)]
    pub coverage_percentage: Option<f64>,

    /// Number of coverage reports uploaded for recent commits.
    #[serde(default)]
    pub reports: u32,
}

impl CoverageSummary {
    pub fn has_reports(&self) -> bool {
        self.reports > 0
    }
}

/// The orchestrator's view of a loaded repository's analysis.
///
/// Replaced wholesale on every successful fetch; never partially mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSnapshot {
    /// Branch the analysis describes; `None` for the default branch.
    pub branch: Option<BranchName>,
    pub last_analysed_commit: Option<AnalysedCommit>,

    /// Branches the service analyses, in the order the service listed them.
    pub enabled_branches: Vec<BranchName>,

    /// Whether coverage reports are being uploaded for this repository.
    pub expects_coverage: bool,
    pub grade: Option<String>,
    pub issues_count: Option<u64>,
}

impl AnalysisSnapshot {
    /// Builds a snapshot, dropping duplicate branch names while keeping the
    /// first occurrence of each.
    pub fn new(
        analysis: RepositoryAnalysis,
        enabled_branches: Vec<BranchName>,
        expects_coverage: bool,
    ) -> Self {
        let mut ordered: Vec<BranchName> = Vec::with_capacity(enabled_branches.len());
        for branch in enabled_branches {
            if !ordered.contains(&branch) {
                ordered.push(branch);
            }
        }

        Self {
            branch: analysis.branch,
            last_analysed_commit: analysis.last_analysed_commit,
            enabled_branches: ordered,
            expects_coverage,
            grade: analysis.grade,
            issues_count: analysis.issues_count,
        }
    }

    /// Returns a copy describing `analysis` while keeping the branch list and
    /// coverage expectation of `self`.
    #[must_use]
    pub fn with_analysis(&self, analysis: RepositoryAnalysis) -> Self {
        Self::new(
            analysis,
            self.enabled_branches.clone(),
            self.expects_coverage,
        )
    }

    pub fn is_enabled(&self, branch: &BranchName) -> bool {
        self.enabled_branches.contains(branch)
    }

    /// Returns `true` when `commit` is the last commit the service analysed.
    pub fn is_analysed_at(&self, commit: &CommitSha) -> bool {
        self.last_analysed_commit
            .as_ref()
            .is_some_and(|analysed| &analysed.sha == commit)
    }

    /// Returns `true` when the snapshot describes `branch`.
    pub fn describes(&self, branch: &BranchName) -> bool {
        self.branch.as_ref() == Some(branch)
    }
}

// ---------------------------------------------------------------------------
// Pull requests
// ---------------------------------------------------------------------------

/// One entry of the open pull request listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequestSummary {
    pub number: PullRequestNumber,
    #[serde(default)]
    pub title: String,
    pub origin_branch: BranchName,
    pub target_branch: BranchName,
    #[serde(default)]
    pub head_commit: Option<CommitSha>,

    /// The service is still analysing the latest push to this pull request.
    #[serde(default)]
    pub is_analysing: bool,
}

/// Result of the service's analysis of a pull request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PullRequestAnalysis {
    #[serde(default)]
    pub is_analysing: bool,

    /// `None` until an analysis has completed.
    #[serde(default)]
    pub result: Option<AnalysisResult>,
}

/// Quality delta reported for an analysed pull request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(default)]
    pub new_issues: u32,
    #[serde(default)]
    pub fixed_issues: u32,
    #[serde(default)]
    pub delta_coverage: Option<f64>,
    #[serde(default)]
    pub passes_quality_gate: Option<bool>,
}

/// A single pull request together with its analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequestSnapshot {
    pub number: PullRequestNumber,
    pub origin_branch: BranchName,
    pub target_branch: BranchName,
    pub head_commit: Option<CommitSha>,
    pub analysis: PullRequestAnalysis,
}

impl PullRequestSnapshot {
    /// Returns `true` when the analysed head differs from `commit`.
    pub fn is_behind(&self, commit: Option<&CommitSha>) -> bool {
        self.head_commit.as_ref() != commit
    }
}

// ---------------------------------------------------------------------------
// Issues
// ---------------------------------------------------------------------------

/// Issue severity as reported by the analysis service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Error,
    Warning,
    Info,
}

/// One issue found by the analysis service on a branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueRecord {
    pub id: IssueId,
    /// Path relative to the repository root.
    pub file_path: String,
    pub line: u32,
    pub message: String,
    pub severity: IssueSeverity,
    pub category: String,
    pub commit: CommitSha,
}

// ---------------------------------------------------------------------------
// Organizations and onboarding
// ---------------------------------------------------------------------------

/// Whether the authenticated user belongs to an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Membership {
    Member,
    NotMember,
}

/// An organization known to the analysis service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub provider: Provider,
    pub name: OrganizationName,
    pub membership: Membership,
}

/// State of the authenticated user's request to join an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinStatus {
    Pending,
    NotRequested,
}

/// Why a first analysis cannot make progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisBlocker {
    /// None of the repository's languages are supported.
    UnsupportedLanguages,
    /// The repository has no analysable files.
    EmptyRepository,
    /// The service cannot clone the repository.
    MissingPermissions,
    Other(String),
}

impl std::fmt::Display for AnalysisBlocker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedLanguages => f.write_str("unsupported languages"),
            Self::EmptyRepository => f.write_str("empty repository"),
            Self::MissingPermissions => f.write_str("missing permissions"),
            Self::Other(reason) => f.write_str(reason),
        }
    }
}

/// Progress of a repository's first analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FirstAnalysisStatus {
    /// Nothing has been queued for this repository.
    NoActivity,
    InProgress,
    Completed,
    Blocked(AnalysisBlocker),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn branch(name: &str) -> BranchName {
        BranchName::new(name).unwrap()
    }

    fn analysed(sha: &str) -> RepositoryAnalysis {
        RepositoryAnalysis {
            last_analysed_commit: Some(AnalysedCommit {
                sha: CommitSha::new(sha).unwrap(),
                analysed_at: None,
            }),
            ..RepositoryAnalysis::default()
        }
    }

    #[test]
    fn test_snapshot_keeps_first_occurrence_of_each_branch() {
        let snapshot = AnalysisSnapshot::new(
            analysed("abc"),
            vec![branch("main"), branch("develop"), branch("main")],
            false,
        );
        assert_eq!(snapshot.enabled_branches, vec![branch("main"), branch("develop")]);
        assert!(snapshot.is_enabled(&branch("develop")));
        assert!(!snapshot.is_enabled(&branch("feature")));
    }

    #[test]
    fn test_snapshot_commit_comparison() {
        let snapshot = AnalysisSnapshot::new(analysed("abc"), vec![branch("main")], true);
        assert!(snapshot.is_analysed_at(&CommitSha::new("abc").unwrap()));
        assert!(!snapshot.is_analysed_at(&CommitSha::new("def").unwrap()));

        let unanalysed = AnalysisSnapshot::new(RepositoryAnalysis::default(), vec![], false);
        assert!(!unanalysed.is_analysed_at(&CommitSha::new("abc").unwrap()));
    }

    #[test]
    fn test_with_analysis_keeps_branch_list() {
        let snapshot = AnalysisSnapshot::new(analysed("abc"), vec![branch("main")], true);
        let mut update = analysed("def");
        update.branch = Some(branch("main"));

        let replaced = snapshot.with_analysis(update);
        assert!(replaced.describes(&branch("main")));
        assert!(replaced.expects_coverage);
        assert_eq!(replaced.enabled_branches, snapshot.enabled_branches);
        assert!(replaced.is_analysed_at(&CommitSha::new("def").unwrap()));
    }

    #[test]
    fn test_first_analysis_status_deserializes_blockers() {
        let status: FirstAnalysisStatus =
            serde_json::from_str(r#"{"blocked":"unsupported_languages"}"#).unwrap();
        assert_eq!(
            status,
            FirstAnalysisStatus::Blocked(AnalysisBlocker::UnsupportedLanguages)
        );

        let status: FirstAnalysisStatus = serde_json::from_str(r#""in_progress""#).unwrap();
        assert_eq!(status, FirstAnalysisStatus::InProgress);
    }

    #[test]
    fn test_pull_request_snapshot_is_behind() {
        let snapshot = PullRequestSnapshot {
            number: PullRequestNumber::new(3),
            origin_branch: branch("feature"),
            target_branch: branch("main"),
            head_commit: CommitSha::new("abc"),
            analysis: PullRequestAnalysis::default(),
        };
        assert!(!snapshot.is_behind(CommitSha::new("abc").as_ref()));
        assert!(snapshot.is_behind(CommitSha::new("def").as_ref()));
        assert!(snapshot.is_behind(None));
    }
}
