//! Paginated fetch-and-cache of the issues on the active analysed branch.

use std::sync::Arc;

use domain::{
    BranchClassification, BranchName, IssueRecord, OrchestratorState, RemoteAnalysisService,
    RepositoryIdentity, ServiceError,
};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::events::Topic;

/// The cached issues of one branch.
#[derive(Debug, Clone, PartialEq)]
pub struct IssueList {
    pub branch: Option<BranchName>,
    pub issues: Arc<[IssueRecord]>,
    /// Hard cap the list was fetched with.
    pub cap: usize,
}

impl IssueList {
    fn empty(cap: usize) -> Self {
        Self {
            branch: None,
            issues: Arc::from(Vec::new()),
            cap,
        }
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    /// `true` when the list reached the cap, so more issues may exist
    /// remotely.
    pub fn is_possibly_truncated(&self) -> bool {
        self.issues.len() >= self.cap
    }
}

/// What the orchestrator knows when it asks for a refresh.
#[derive(Debug, Clone, Copy)]
pub struct IssueQuery<'a> {
    pub state: OrchestratorState,
    pub classification: Option<BranchClassification>,
    pub identity: &'a RepositoryIdentity,
    pub branch: &'a BranchName,
}

/// Result of [`IssueCache::refresh`].
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    /// Not `Loaded` on an analysed branch; nothing fetched.
    Skipped,
    /// A newer refresh or a clear started while this one was in flight.
    Superseded,
    Complete { count: usize },
    /// Pagination stopped early; the issues fetched so far were kept.
    Partial { count: usize, error: ServiceError },
}

#[derive(Debug)]
struct CacheState {
    list: IssueList,
    generation: u64,
}

/// Holds the issues of the current branch, bounded by a hard cap.
pub struct IssueCache {
    service: Arc<dyn RemoteAnalysisService>,
    cap: usize,
    page_size: usize,
    topic: Topic<IssueList>,
    state: Mutex<CacheState>,
}

impl IssueCache {
    pub(crate) fn new(
        service: Arc<dyn RemoteAnalysisService>,
        cap: usize,
        page_size: usize,
        topic: Topic<IssueList>,
    ) -> Self {
        Self {
            service,
            cap,
            page_size,
            topic,
            state: Mutex::new(CacheState {
                list: IssueList::empty(cap),
                generation: 0,
            }),
        }
    }

    pub fn current(&self) -> IssueList {
        self.state.lock().list.clone()
    }

    /// Re-fetches the issues of `query.branch`, replacing the cached list.
    ///
    /// Does nothing unless the orchestrator is `Loaded` on an analysed
    /// branch. Stops at the cap or when the cursor runs out; an error part-way
    /// keeps what was fetched before it.
    pub async fn refresh(&self, query: IssueQuery<'_>) -> RefreshOutcome {
        if query.state != OrchestratorState::Loaded
            || query.classification != Some(BranchClassification::OnAnalysedBranch)
        {
            debug!(
                state = %query.state,
                classification = ?query.classification,
                "issue refresh skipped"
            );
            return RefreshOutcome::Skipped;
        }

        let generation = {
            let mut state = self.state.lock();
            state.generation += 1;
            state.generation
        };

        let mut issues: Vec<IssueRecord> = Vec::new();
        let mut cursor: Option<String> = None;
        let mut failure = None;
        loop {
            let limit = self.page_size.min(self.cap - issues.len());
            let page = match self
                .service
                .search_issues(query.identity, query.branch, cursor.as_deref(), limit)
                .await
            {
                Ok(page) => page,
                Err(error) => {
                    warn!(
                        identity = %query.identity,
                        branch = %query.branch,
                        fetched = issues.len(),
                        %error,
                        "issue pagination interrupted; keeping partial results"
                    );
                    failure = Some(error);
                    break;
                }
            };

            let received = page.items.len();
            issues.extend(page.items);
            if issues.len() >= self.cap {
                issues.truncate(self.cap);
                break;
            }
            match page.cursor {
                Some(next) if received > 0 => cursor = Some(next),
                _ => break,
            }
        }

        let count = issues.len();
        let list = IssueList {
            branch: Some(query.branch.clone()),
            issues: Arc::from(issues),
            cap: self.cap,
        };

        {
            let mut state = self.state.lock();
            if state.generation != generation {
                debug!(branch = %query.branch, "discarding superseded issue list");
                return RefreshOutcome::Superseded;
            }
            state.list = list.clone();
        }

        if list.is_possibly_truncated() {
            info!(branch = %query.branch, cap = self.cap, "issue list reached the cap");
        }
        self.topic.publish(list);

        match failure {
            Some(error) => RefreshOutcome::Partial { count, error },
            None => RefreshOutcome::Complete { count },
        }
    }

    /// Empties the cache and notifies subscribers before returning.
    ///
    /// Any refresh in flight is discarded when it completes.
    pub fn clear(&self) {
        let list = {
            let mut state = self.state.lock();
            state.generation += 1;
            if state.list.branch.is_none() && state.list.is_empty() {
                return;
            }
            state.list = IssueList::empty(self.cap);
            state.list.clone()
        };
        self.topic.publish(list);
    }
}

impl std::fmt::Debug for IssueCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssueCache")
            .field("cap", &self.cap)
            .field("page_size", &self.page_size)
            .field("cached", &self.state.lock().list.len())
            .finish()
    }
}
