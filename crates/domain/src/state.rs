//! Orchestrator states, branch classification, and the transition graph.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// OrchestratorState
// ---------------------------------------------------------------------------

/// Overall state of the repository sync.
///
/// Exactly one value is current at any time; it is the single source of truth
/// for what user-facing surfaces show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    /// Entry state; also re-entered at the start of every resolution attempt.
    #[default]
    Initializing,
    /// No authentication token is available.
    NeedsAuthentication,
    /// No local repository is open, or it has no remotes or no readable HEAD.
    NoGitRepository,
    /// The organization exists but the user is not a member.
    NeedsToJoinOrganization,
    /// The user has asked to join the organization; approval is pending.
    HasPendingJoinOrganization,
    /// The organization is not known to the service.
    NeedsToAddOrganization,
    /// The user is a member but the repository has not been added.
    NeedsToAddRepository,
    /// The first analysis is running.
    IsAnalyzing,
    /// The first analysis cannot start or cannot finish.
    AnalysisFailed,
    /// Analysis results are available.
    Loaded,
    /// The repository could not be resolved against the service.
    NoRepository,
}

impl OrchestratorState {
    /// Every state, in declaration order.
    pub const ALL: [Self; 11] = [
        Self::Initializing,
        Self::NeedsAuthentication,
        Self::NoGitRepository,
        Self::NeedsToJoinOrganization,
        Self::HasPendingJoinOrganization,
        Self::NeedsToAddOrganization,
        Self::NeedsToAddRepository,
        Self::IsAnalyzing,
        Self::AnalysisFailed,
        Self::Loaded,
        Self::NoRepository,
    ];

    /// Value published to the host's UI context for this state.
    pub fn context_key(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::NeedsAuthentication => "needsAuthentication",
            Self::NoGitRepository => "noGitRepository",
            Self::NeedsToJoinOrganization => "needsToJoinOrganization",
            Self::HasPendingJoinOrganization => "hasPendingJoinOrganization",
            Self::NeedsToAddOrganization => "needsToAddOrganization",
            Self::NeedsToAddRepository => "needsToAddRepository",
            Self::IsAnalyzing => "isAnalyzing",
            Self::AnalysisFailed => "analysisFailed",
            Self::Loaded => "loaded",
            Self::NoRepository => "noRepository",
        }
    }

    /// States waiting on a user action against the service.
    pub fn is_onboarding(self) -> bool {
        matches!(
            self,
            Self::NeedsToJoinOrganization
                | Self::HasPendingJoinOrganization
                | Self::NeedsToAddOrganization
                | Self::NeedsToAddRepository
        )
    }

    /// States in which the analysis snapshot, pull request data, and issue
    /// list may be held.
    pub fn holds_analysis(self) -> bool {
        matches!(self, Self::Loaded | Self::IsAnalyzing)
    }

    /// Returns `true` if the orchestrator may move from `self` to `next`.
    ///
    /// Every state may fall back to `NeedsAuthentication` (token lost or
    /// rejected) or `NoGitRepository` (repository closed), and every
    /// non-initial state may restart resolution through `Initializing`.
    /// Resolution outcomes are only reachable from `Initializing`, except for
    /// the first analysis completing (`IsAnalyzing` to `Loaded`) and failures
    /// while polling it.
    pub fn can_transition_to(self, next: Self) -> bool {
        use OrchestratorState::*;

        if self == next {
            return false;
        }
        match next {
            NeedsAuthentication | NoGitRepository => true,
            Initializing => true,
            _ => match self {
                Initializing => true,
                IsAnalyzing => matches!(next, Loaded | AnalysisFailed | NoRepository),
                _ => false,
            },
        }
    }
}

impl std::fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.context_key())
    }
}

/// A state transition as published to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub previous: OrchestratorState,
    pub current: OrchestratorState,
}

// ---------------------------------------------------------------------------
// BranchClassification
// ---------------------------------------------------------------------------

/// How the checked-out branch relates to the remote analysis.
///
/// Only meaningful while the orchestrator is `Loaded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchClassification {
    /// An enabled branch whose HEAD is the last analysed commit.
    OnAnalysedBranch,
    /// An enabled branch whose HEAD has not been analysed yet.
    OnAnalysedBranchOutdated,
    /// Neither an enabled branch nor the origin of an open pull request.
    OnUnknownBranch,
    /// The origin branch of an open pull request.
    OnPullRequestBranch,
}

impl BranchClassification {
    pub fn context_key(self) -> &'static str {
        match self {
            Self::OnAnalysedBranch => "onAnalysedBranch",
            Self::OnAnalysedBranchOutdated => "onAnalysedBranchOutdated",
            Self::OnUnknownBranch => "onUnknownBranch",
            Self::OnPullRequestBranch => "onPullRequestBranch",
        }
    }
}

impl std::fmt::Display for BranchClassification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.context_key())
    }
}

#[cfg(test)]
mod tests {
    use super::OrchestratorState::*;
    use super::*;

    #[test]
    fn test_initializing_is_the_default() {
        assert_eq!(OrchestratorState::default(), Initializing);
    }

    #[test]
    fn test_no_self_transitions() {
        for state in OrchestratorState::ALL {
            assert!(!state.can_transition_to(state), "{state} -> {state}");
        }
    }

    #[test]
    fn test_resolution_outcomes_require_initializing() {
        assert!(Initializing.can_transition_to(Loaded));
        assert!(Initializing.can_transition_to(NeedsToAddRepository));
        assert!(!NoRepository.can_transition_to(Loaded));
        assert!(!NeedsToAddRepository.can_transition_to(IsAnalyzing));
        assert!(!Loaded.can_transition_to(IsAnalyzing));
    }

    #[test]
    fn test_first_analysis_completion_is_allowed() {
        assert!(IsAnalyzing.can_transition_to(Loaded));
        assert!(IsAnalyzing.can_transition_to(AnalysisFailed));
        assert!(!AnalysisFailed.can_transition_to(Loaded));
    }

    #[test]
    fn test_every_state_can_fall_back_to_authentication_and_teardown() {
        for state in OrchestratorState::ALL {
            if state != NeedsAuthentication {
                assert!(state.can_transition_to(NeedsAuthentication));
            }
            if state != NoGitRepository {
                assert!(state.can_transition_to(NoGitRepository));
            }
        }
    }

    #[test]
    fn test_only_loaded_and_analyzing_hold_analysis() {
        let holding: Vec<_> = OrchestratorState::ALL
            .into_iter()
            .filter(|state| state.holds_analysis())
            .collect();
        assert_eq!(holding, vec![IsAnalyzing, Loaded]);
    }

    #[test]
    fn test_context_keys_are_unique() {
        let mut keys: Vec<_> = OrchestratorState::ALL
            .iter()
            .map(|state| state.context_key())
            .collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), OrchestratorState::ALL.len());
    }
}
