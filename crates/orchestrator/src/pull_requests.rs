//! Open pull request collection plus the single pull request that matches the
//! checked-out branch.

use std::sync::Arc;
use std::time::Duration;

use domain::{
    BranchName, PullRequestNumber, PullRequestSnapshot, PullRequestSummary,
    RemoteAnalysisService, RepositoryIdentity, ServiceError, SessionId,
};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::events::Topic;
use crate::retry::ScheduledTask;
use crate::trigger::{Trigger, TriggerSender};

/// The pull request whose origin branch is checked out.
///
/// Refreshing a pull request with the same number updates this value in place,
/// so holders of the `Arc` observe the new analysis.
#[derive(Debug)]
pub struct ActivePullRequest {
    number: PullRequestNumber,
    snapshot: Mutex<PullRequestSnapshot>,
}

impl ActivePullRequest {
    fn new(snapshot: PullRequestSnapshot) -> Self {
        Self {
            number: snapshot.number,
            snapshot: Mutex::new(snapshot),
        }
    }

    pub fn number(&self) -> PullRequestNumber {
        self.number
    }

    pub fn snapshot(&self) -> PullRequestSnapshot {
        self.snapshot.lock().clone()
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    /// `None` until the collection has been fetched.
    known: Option<Arc<[PullRequestSummary]>>,
    active: Option<Arc<ActivePullRequest>>,
    /// Bumped by `clear`; fetches that started before a clear are discarded.
    epoch: u64,
    session: Option<SessionId>,
    reschedule: Option<ScheduledTask>,
}

/// Tracks open pull requests for the current repository.
pub struct PullRequestTracker {
    service: Arc<dyn RemoteAnalysisService>,
    collection_topic: Topic<Arc<[PullRequestSummary]>>,
    active_topic: Topic<Option<PullRequestSnapshot>>,
    triggers: TriggerSender,
    refresh_delay: Duration,
    page_limit: u32,
    /// Serialises collection fetches so a later request always completes
    /// after an earlier one.
    fetch_gate: tokio::sync::Mutex<()>,
    state: Mutex<TrackerState>,
}

impl PullRequestTracker {
    pub(crate) fn new(
        service: Arc<dyn RemoteAnalysisService>,
        collection_topic: Topic<Arc<[PullRequestSummary]>>,
        active_topic: Topic<Option<PullRequestSnapshot>>,
        triggers: TriggerSender,
        refresh_delay: Duration,
        page_limit: u32,
    ) -> Self {
        Self {
            service,
            collection_topic,
            active_topic,
            triggers,
            refresh_delay,
            page_limit,
            fetch_gate: tokio::sync::Mutex::new(()),
            state: Mutex::new(TrackerState::default()),
        }
    }

    /// Binds follow-up collection refreshes to `session`.
    pub(crate) fn bind(&self, session: SessionId) {
        self.state.lock().session = Some(session);
    }

    pub fn known(&self) -> Option<Arc<[PullRequestSummary]>> {
        self.state.lock().known.clone()
    }

    pub fn active(&self) -> Option<Arc<ActivePullRequest>> {
        self.state.lock().active.clone()
    }

    /// The known pull request opened from `branch`, if any.
    pub fn find_for_branch(&self, branch: &BranchName) -> Option<PullRequestSummary> {
        let state = self.state.lock();
        state
            .known
            .as_ref()?
            .iter()
            .find(|pull_request| &pull_request.origin_branch == branch)
            .cloned()
    }

    /// Returns the open pull requests, fetching them when nothing is cached
    /// or `force` is set.
    ///
    /// While any pull request is still being analysed, another fetch is
    /// scheduled after the refresh delay.
    pub async fn get_or_fetch(
        &self,
        identity: &RepositoryIdentity,
        force: bool,
    ) -> Result<Arc<[PullRequestSummary]>, ServiceError> {
        if !force {
            if let Some(known) = self.known() {
                return Ok(known);
            }
        }

        let _gate = self.fetch_gate.lock().await;
        let epoch = self.state.lock().epoch;

        let mut collected = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..self.page_limit {
            let page = self
                .service
                .list_pull_requests(identity, cursor.as_deref())
                .await?;
            collected.extend(page.items);
            match page.cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        let collection: Arc<[PullRequestSummary]> = Arc::from(collected);

        {
            let mut state = self.state.lock();
            if state.epoch != epoch {
                debug!(%identity, "discarding pull requests fetched before clear");
                return Ok(collection);
            }
            state.known = Some(Arc::clone(&collection));
            state.reschedule = match state.session {
                Some(session) if collection.iter().any(|pr| pr.is_analysing) => {
                    debug!(%identity, "pull requests still analysing; refresh scheduled");
                    Some(ScheduledTask::spawn(self.triggers.after(
                        self.refresh_delay,
                        session,
                        Trigger::RefreshPullRequests,
                    )))
                }
                _ => None,
            };
        }

        debug!(%identity, count = collection.len(), "pull requests fetched");
        self.collection_topic.publish(Arc::clone(&collection));
        Ok(collection)
    }

    /// Makes `pull_request` the active one.
    ///
    /// When it already is, its analysis is refreshed in place and the same
    /// handle is returned; otherwise a new handle replaces the previous one.
    pub async fn activate(
        &self,
        identity: &RepositoryIdentity,
        pull_request: &PullRequestSummary,
    ) -> Result<Arc<ActivePullRequest>, ServiceError> {
        let (epoch, existing) = {
            let state = self.state.lock();
            (state.epoch, state.active.clone())
        };

        if let Some(active) = existing.filter(|active| active.number == pull_request.number) {
            self.refresh_active(identity).await?;
            return Ok(active);
        }

        let snapshot = self
            .service
            .get_pull_request(identity, pull_request.number)
            .await?;
        let active = Arc::new(ActivePullRequest::new(snapshot.clone()));

        {
            let mut state = self.state.lock();
            if state.epoch != epoch {
                debug!(number = %pull_request.number, "discarding pull request activated before clear");
                return Ok(active);
            }
            state.active = Some(Arc::clone(&active));
        }

        info!(
            number = %pull_request.number,
            branch = %pull_request.origin_branch,
            "pull request activated"
        );
        self.active_topic.publish(Some(snapshot));
        Ok(active)
    }

    /// Re-fetches the active pull request by number and updates it in place.
    pub async fn refresh_active(&self, identity: &RepositoryIdentity) -> Result<(), ServiceError> {
        let Some(active) = self.active() else {
            return Ok(());
        };

        let snapshot = self.service.get_pull_request(identity, active.number).await?;

        let still_active = self
            .state
            .lock()
            .active
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, &active));
        if !still_active {
            debug!(number = %active.number, "active pull request replaced during refresh");
            return Ok(());
        }

        *active.snapshot.lock() = snapshot.clone();
        debug!(number = %active.number, "active pull request refreshed");
        self.active_topic.publish(Some(snapshot));
        Ok(())
    }

    /// Drops the active pull request, keeping the collection.
    pub fn clear_active(&self) {
        let removed = self.state.lock().active.take();
        if let Some(active) = removed {
            debug!(number = %active.number, "active pull request cleared");
            self.active_topic.publish(None);
        }
    }

    /// Drops everything, including any scheduled collection refresh.
    pub fn clear(&self) {
        let (had_active, had_known) = {
            let mut state = self.state.lock();
            state.epoch += 1;
            state.session = None;
            state.reschedule = None;
            (state.active.take().is_some(), state.known.take().is_some())
        };
        if had_active {
            self.active_topic.publish(None);
        }
        if had_known {
            self.collection_topic.publish(Arc::from(Vec::new()));
        }
    }
}

impl std::fmt::Debug for PullRequestTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PullRequestTracker")
            .field("known", &state.known.as_ref().map(|known| known.len()))
            .field("active", &state.active.as_ref().map(|active| active.number))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::testing::{identity, pull_request, MockService};
    use crate::trigger::Envelope;

    struct Fixture {
        tracker: Arc<PullRequestTracker>,
        service: Arc<MockService>,
        triggers: mpsc::UnboundedReceiver<Envelope>,
        active_topic: Topic<Option<PullRequestSnapshot>>,
    }

    fn fixture() -> Fixture {
        let service = Arc::new(MockService::default());
        let (tx, triggers) = mpsc::unbounded_channel();
        let active_topic = Topic::new("active_pull_request");
        let tracker = Arc::new(PullRequestTracker::new(
            service.clone(),
            Topic::new("pull_requests"),
            active_topic.clone(),
            TriggerSender::new(tx),
            Duration::from_secs(120),
            10,
        ));
        Fixture {
            tracker,
            service,
            triggers,
            active_topic,
        }
    }

    #[tokio::test]
    async fn test_get_or_fetch_uses_cache_unless_forced() {
        let fx = fixture();
        fx.service.state.lock().pull_requests = vec![pull_request(1, "feature")];
        let identity = identity("acme", "widgets");

        fx.tracker.get_or_fetch(&identity, false).await.unwrap();
        fx.tracker.get_or_fetch(&identity, false).await.unwrap();
        assert_eq!(fx.service.count("list_pull_requests"), 1);

        fx.tracker.get_or_fetch(&identity, true).await.unwrap();
        assert_eq!(fx.service.count("list_pull_requests"), 2);
    }

    #[tokio::test]
    async fn test_get_or_fetch_follows_cursor_up_to_page_limit() {
        let fx = fixture();
        {
            let mut state = fx.service.state.lock();
            state.pull_requests = (1..=25).map(|n| pull_request(n, &format!("b{n}"))).collect();
            state.pull_request_page_size = 10;
        }
        let identity = identity("acme", "widgets");

        let known = fx.tracker.get_or_fetch(&identity, true).await.unwrap();

        assert_eq!(known.len(), 25);
        assert_eq!(fx.service.count("list_pull_requests"), 3);
    }

    #[tokio::test]
    async fn test_activate_same_number_refreshes_in_place() {
        let fx = fixture();
        fx.service.state.lock().pull_requests = vec![pull_request(7, "feature")];
        let identity = identity("acme", "widgets");
        let summary = pull_request(7, "feature");

        let first = fx.tracker.activate(&identity, &summary).await.unwrap();
        fx.service.set_pull_request_analysing(7, true);
        let second = fx.tracker.activate(&identity, &summary).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.snapshot().analysis.is_analysing);
        assert_eq!(fx.service.count("get_pull_request"), 2);
    }

    #[tokio::test]
    async fn test_activate_different_number_replaces_handle() {
        let fx = fixture();
        fx.service.state.lock().pull_requests =
            vec![pull_request(7, "feature"), pull_request(8, "other")];
        let identity = identity("acme", "widgets");
        let mut events = fx.active_topic.subscribe();

        let first = fx
            .tracker
            .activate(&identity, &pull_request(7, "feature"))
            .await
            .unwrap();
        let second = fx
            .tracker
            .activate(&identity, &pull_request(8, "other"))
            .await
            .unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(fx.tracker.active().map(|a| a.number()), Some(PullRequestNumber::new(8)));
        let published: Vec<_> = events
            .drain()
            .into_iter()
            .map(|event| event.map(|snapshot| snapshot.number.as_u64()))
            .collect();
        assert_eq!(published, vec![Some(7), Some(8)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_analysing_pull_requests_schedule_refresh() {
        let mut fx = fixture();
        let mut analysing = pull_request(3, "feature");
        analysing.is_analysing = true;
        fx.service.state.lock().pull_requests = vec![analysing];
        let session = SessionId::new_random();
        fx.tracker.bind(session);

        fx.tracker
            .get_or_fetch(&identity("acme", "widgets"), true)
            .await
            .unwrap();
        assert!(fx.triggers.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(121)).await;
        let envelope = fx.triggers.try_recv().expect("refresh trigger");
        assert_eq!(envelope.session, Some(session));
        assert_eq!(envelope.trigger, Trigger::RefreshPullRequests);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settled_pull_requests_cancel_pending_refresh() {
        let mut fx = fixture();
        let mut analysing = pull_request(3, "feature");
        analysing.is_analysing = true;
        fx.service.state.lock().pull_requests = vec![analysing];
        fx.tracker.bind(SessionId::new_random());
        let identity = identity("acme", "widgets");

        fx.tracker.get_or_fetch(&identity, true).await.unwrap();
        fx.service.state.lock().pull_requests = vec![pull_request(3, "feature")];
        fx.tracker.get_or_fetch(&identity, true).await.unwrap();

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert!(fx.triggers.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_fetches_complete_in_request_order() {
        let fx = fixture();
        {
            let mut state = fx.service.state.lock();
            state.pull_requests = vec![pull_request(1, "first")];
            state.list_pull_requests_delay = Some(Duration::from_secs(5));
        }
        let identity = identity("acme", "widgets");

        let earlier = {
            let tracker = Arc::clone(&fx.tracker);
            let identity = identity.clone();
            tokio::spawn(async move { tracker.get_or_fetch(&identity, true).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        {
            let mut state = fx.service.state.lock();
            state.pull_requests = vec![pull_request(2, "second")];
            state.list_pull_requests_delay = Some(Duration::from_secs(1));
        }
        let later = fx.tracker.get_or_fetch(&identity, true).await.unwrap();
        let earlier = earlier.await.unwrap().unwrap();

        assert_eq!(earlier[0].number, PullRequestNumber::new(1));
        assert_eq!(later[0].number, PullRequestNumber::new(2));
        let known = fx.tracker.known().unwrap();
        assert_eq!(known[0].number, PullRequestNumber::new(2));
        assert_eq!(fx.service.max_concurrent("list_pull_requests"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_discards_fetch_in_flight() {
        let fx = fixture();
        {
            let mut state = fx.service.state.lock();
            state.pull_requests = vec![pull_request(1, "feature")];
            state.list_pull_requests_delay = Some(Duration::from_secs(5));
        }
        let identity = identity("acme", "widgets");

        let pending = {
            let tracker = Arc::clone(&fx.tracker);
            tokio::spawn(async move { tracker.get_or_fetch(&identity, true).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        fx.tracker.clear();
        pending.await.unwrap().unwrap();

        assert!(fx.tracker.known().is_none());
    }

    #[tokio::test]
    async fn test_find_for_branch_uses_known_collection() {
        let fx = fixture();
        fx.service.state.lock().pull_requests =
            vec![pull_request(1, "feature"), pull_request(2, "fix")];
        let feature = BranchName::new("feature").unwrap();
        assert!(fx.tracker.find_for_branch(&feature).is_none());

        fx.tracker
            .get_or_fetch(&identity("acme", "widgets"), false)
            .await
            .unwrap();

        assert_eq!(
            fx.tracker.find_for_branch(&feature).map(|pr| pr.number),
            Some(PullRequestNumber::new(1))
        );
    }
}
