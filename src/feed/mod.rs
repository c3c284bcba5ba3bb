//! Feed controller: the thread list, its filters and pagination.
//!
//! Every fetch takes a ticket from a [`RequestSequencer`]; a result commits
//! only while its ticket is the latest and the controller is still mounted,
//! so a slow stale response can never overwrite a newer one.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::auth::Viewer;
use crate::error::FeedError;
use crate::interactions::{Interaction, ToggleOutcome};
use crate::models::*;
use crate::rate_limit::RateLimiterFacade;
use crate::store::{FeedFilter, Store};

pub mod compose;
pub mod kind;
pub mod pagination;
pub mod sequencer;

pub use compose::{PrayerDraft, ThreadDraft};
pub use pagination::VisibleCount;
pub use sequencer::{Debouncer, RequestSequencer, Ticket};

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub page_size: usize,
    pub max_visible: usize,
    pub fetch_timeout: Duration,
    pub search_debounce: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            page_size: 10,
            max_visible: 50,
            fetch_timeout: Duration::from_secs(10),
            search_debounce: Duration::from_millis(500),
        }
    }
}

impl FeedConfig {
    pub fn from_env() -> Self {
        fn ms_env(name: &str, default: Duration) -> Duration {
            std::env::var(name).ok().and_then(|v| v.parse().ok()).map(Duration::from_millis).unwrap_or(default)
        }
        let d = Self::default();
        Self {
            fetch_timeout: ms_env("FEED_FETCH_TIMEOUT_MS", d.fetch_timeout),
            search_debounce: ms_env("FEED_SEARCH_DEBOUNCE_MS", d.search_debounce),
            ..d
        }
    }
}

/// Snapshot of what the feed shows.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedState {
    pub items: Vec<FeedItem>,
    pub kind: ContentKind,
    pub category: Option<Category>,
    pub search: String,
    pub visible_count: usize,
    pub at_ceiling: bool,
    pub loading: bool,
    pub error: Option<FeedError>,
}

/// Whether a finished fetch reached displayed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commit {
    Applied,
    Discarded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    Loaded(Commit),
    /// Hard ceiling reached; nothing was fetched.
    Ceiling,
}

/// One realtime notification: a join row changed for `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RealtimeChange {
    pub kind: MembershipKind,
    pub target: Id,
}

struct Inner {
    items: Vec<FeedItem>,
    kind: ContentKind,
    category: Option<Category>,
    search: String,
    pages: VisibleCount,
    loading: bool,
    error: Option<FeedError>,
}

pub struct FeedController {
    store: Arc<dyn Store>,
    cfg: FeedConfig,
    limiter: Option<RateLimiterFacade>,
    inner: Mutex<Inner>,
    requests: RequestSequencer,
    search: Debouncer<String>,
    cancel: CancellationToken,
}

impl FeedController {
    pub fn new(store: Arc<dyn Store>, cfg: FeedConfig) -> Self {
        let inner = Inner {
            items: Vec::new(),
            kind: ContentKind::Thread,
            category: None,
            search: String::new(),
            pages: VisibleCount::new(cfg.page_size, cfg.max_visible),
            loading: false,
            error: None,
        };
        Self {
            search: Debouncer::new(cfg.search_debounce),
            store,
            cfg,
            limiter: None,
            inner: Mutex::new(inner),
            requests: RequestSequencer::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_rate_limiter(mut self, limiter: RateLimiterFacade) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn state(&self) -> FeedState {
        let inner = self.inner.lock().unwrap();
        FeedState {
            items: inner.items.clone(),
            kind: inner.kind,
            category: inner.category,
            search: inner.search.clone(),
            visible_count: inner.pages.get(),
            at_ceiling: inner.pages.at_ceiling(),
            loading: inner.loading,
            error: inner.error.clone(),
        }
    }

    /// Message shown in place of the sentinel once the ceiling is reached.
    pub fn ceiling_message(&self) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner.pages.at_ceiling().then(|| {
            format!(
                "Showing the {} most recent posts. Use the filters or search to find more.",
                inner.pages.max()
            )
        })
    }

    /// Token cancelled on unmount; hand children of it to long-running work.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    pub fn is_mounted(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Disables every pending commit. In-flight requests still finish, their results are dropped.
    pub fn unmount(&self) {
        self.cancel.cancel();
    }

    /// Fetch with the current filters and visible count.
    pub async fn refresh(&self) -> Result<Commit, FeedError> {
        let (kind, filter) = {
            let mut inner = self.inner.lock().unwrap();
            inner.loading = true;
            let search = inner.search.trim();
            let filter = FeedFilter {
                category: inner.category,
                search: (!search.is_empty()).then(|| search.to_string()),
                limit: inner.pages.get(),
            };
            (ContentKind::for_category(inner.category), filter)
        };
        let ticket = self.requests.issue();
        metrics::counter!("feed_fetch_total", "kind" => kind.as_str()).increment(1);

        let result = match tokio::time::timeout(self.cfg.fetch_timeout, kind.fetch(self.store.as_ref(), &filter)).await {
            Ok(Ok(items)) => Ok(items),
            Ok(Err(e)) => Err(FeedError::from(e)),
            Err(_) => {
                warn!(kind = kind.as_str(), timeout_ms = self.cfg.fetch_timeout.as_millis() as u64, "feed fetch timed out");
                metrics::counter!("feed_timeout_total").increment(1);
                Err(FeedError::Timeout)
            }
        };
        self.commit(ticket, kind, result)
    }

    fn commit(&self, ticket: Ticket, kind: ContentKind, result: Result<Vec<FeedItem>, FeedError>) -> Result<Commit, FeedError> {
        if self.cancel.is_cancelled() || !self.requests.is_latest(ticket) {
            debug!(?ticket, "discarding stale feed response");
            metrics::counter!("feed_stale_discarded_total").increment(1);
            return Ok(Commit::Discarded);
        }
        let mut inner = self.inner.lock().unwrap();
        inner.loading = false;
        match result {
            Ok(items) => {
                inner.items = items;
                inner.kind = kind;
                inner.error = None;
                Ok(Commit::Applied)
            }
            Err(e) => {
                inner.error = Some(e.clone());
                Err(e)
            }
        }
    }

    /// Switch category; pagination restarts at the first page.
    pub async fn set_category(&self, category: Option<Category>) -> Result<Commit, FeedError> {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.category = category;
            inner.pages.reset();
        }
        self.refresh().await
    }

    /// Feed one keystroke's worth of search input. Resolves to `None` when a
    /// later keystroke superseded this one within the debounce window.
    pub async fn search_input(&self, text: &str) -> Result<Option<Commit>, FeedError> {
        let generation = self.search.push(text.to_string());
        let Some(term) = self.search.settle(generation).await else {
            return Ok(None);
        };
        if self.cancel.is_cancelled() {
            return Ok(None);
        }
        {
            let mut inner = self.inner.lock().unwrap();
            inner.search = term;
            inner.pages.reset();
        }
        self.refresh().await.map(Some)
    }

    /// Scroll sentinel became visible.
    pub async fn load_more(&self) -> Result<PageOutcome, FeedError> {
        let grew = self.inner.lock().unwrap().pages.grow();
        if !grew {
            return Ok(PageOutcome::Ceiling);
        }
        self.refresh().await.map(PageOutcome::Loaded)
    }

    pub fn item(&self, id: Id) -> Option<FeedItem> {
        self.inner.lock().unwrap().items.iter().find(|i| i.id == id).cloned()
    }

    /// Patch one card's counters in place. False when the card isn't shown or the feed is unmounted.
    pub fn patch_counters(&self, id: Id, patch: impl FnOnce(&mut Counters)) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        let mut inner = self.inner.lock().unwrap();
        match inner.items.iter_mut().find(|i| i.id == id) {
            Some(item) => {
                patch(&mut item.counters);
                true
            }
            None => false,
        }
    }

    /// Reflect a finished toggle's freshly counted total on its card.
    pub fn apply_toggle(&self, id: Id, action: Interaction, outcome: &ToggleOutcome) -> bool {
        let Some(count) = outcome.count else { return false };
        self.patch_counters(id, |c| match action {
            Interaction::Pray => c.prayer_count = count,
            Interaction::Like => c.like_count = count,
            Interaction::Bookmark => {}
        })
    }

    /// Re-count every counter of one card, e.g. after a comment was posted.
    pub async fn refresh_counters(&self, id: Id) -> Result<bool, FeedError> {
        let Some(item) = self.item(id) else { return Ok(false) };
        let fresh = item.kind.counters(self.store.as_ref(), id).await?;
        Ok(self.patch_counters(id, |c| *c = fresh))
    }

    /// Realtime prayer-count patch for a single card.
    pub async fn apply_realtime(&self, change: RealtimeChange) -> Result<bool, FeedError> {
        if !matches!(change.kind, MembershipKind::ThreadPrayer | MembershipKind::PrayerAction) {
            return Ok(false);
        }
        if self.item(change.target).is_none() {
            return Ok(false);
        }
        let n = self
            .store
            .count(CountTarget::Memberships(change.kind, change.target))
            .await?;
        Ok(self.patch_counters(change.target, |c| c.prayer_count = n))
    }

    /// Consume a realtime subscription until it ends or the feed unmounts.
    pub async fn follow_realtime<S>(&self, changes: S)
    where
        S: Stream<Item = RealtimeChange> + Send,
    {
        let mut changes = std::pin::pin!(changes);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                next = changes.next() => match next {
                    Some(change) => {
                        if let Err(e) = self.apply_realtime(change).await {
                            warn!(error = %e, target = %change.target, "realtime counter patch failed");
                        }
                    }
                    None => break,
                },
            }
        }
    }

    pub async fn submit_thread(&self, viewer: Option<&Viewer>, draft: ThreadDraft) -> Result<Thread, FeedError> {
        let thread = compose::submit_thread(self.store.as_ref(), self.limiter.as_ref(), viewer, draft).await?;
        self.refresh_after_submit().await;
        Ok(thread)
    }

    pub async fn submit_prayer(&self, viewer: Option<&Viewer>, draft: PrayerDraft) -> Result<Prayer, FeedError> {
        let prayer = compose::submit_prayer(self.store.as_ref(), self.limiter.as_ref(), viewer, draft).await?;
        self.refresh_after_submit().await;
        Ok(prayer)
    }

    // the post already succeeded; a failed reload shows up in state.error
    async fn refresh_after_submit(&self) {
        if let Err(e) = self.refresh().await {
            debug!(error = %e, "feed refresh after submit failed");
        }
    }
}
