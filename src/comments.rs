//! Per-thread comment panels, loaded lazily on first expansion.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::Viewer;
use crate::error::FeedError;
use crate::feed::compose::validate_text;
use crate::feed::kind::{degraded, stitch_authors};
use crate::models::*;
use crate::rate_limit::RateLimiterFacade;
use crate::store::Store;

pub const MAX_COMMENT_CHARS: usize = 2000;

#[derive(Debug, Clone, PartialEq)]
pub struct CommentView {
    pub comment: Comment,
    pub author: Option<UserProfile>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PanelState {
    Collapsed,
    Loading,
    Loaded(Vec<CommentView>),
    Failed(FeedError),
}

#[derive(Default)]
enum Load {
    #[default]
    Idle,
    Loading,
    Loaded(Vec<CommentView>),
    Failed(FeedError),
}

#[derive(Default)]
struct Panel {
    open: bool,
    load: Load,
    // bumped per fetch; only the newest fetch for a panel may commit
    generation: u64,
}

pub struct CommentSection {
    store: Arc<dyn Store>,
    limiter: Option<RateLimiterFacade>,
    panels: Mutex<HashMap<Id, Panel>>,
    cancel: CancellationToken,
}

impl CommentSection {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store, limiter: None, panels: Mutex::new(HashMap::new()), cancel: CancellationToken::new() }
    }

    pub fn with_rate_limiter(mut self, limiter: RateLimiterFacade) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Tie the panels' lifetime to a parent, usually the feed's token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn unmount(&self) {
        self.cancel.cancel();
    }

    pub fn state(&self, thread_id: Id) -> PanelState {
        let panels = self.panels.lock().unwrap();
        match panels.get(&thread_id) {
            Some(p) if p.open => match &p.load {
                Load::Idle | Load::Loading => PanelState::Loading,
                Load::Loaded(list) => PanelState::Loaded(list.clone()),
                Load::Failed(e) => PanelState::Failed(e.clone()),
            },
            _ => PanelState::Collapsed,
        }
    }

    pub fn collapse(&self, thread_id: Id) {
        if let Some(p) = self.panels.lock().unwrap().get_mut(&thread_id) {
            p.open = false;
        }
    }

    /// Open the panel. The first expansion (or one after a failure) fetches;
    /// later ones reuse what was loaded.
    pub async fn expand(&self, thread_id: Id) -> PanelState {
        let fetch = {
            let mut panels = self.panels.lock().unwrap();
            let panel = panels.entry(thread_id).or_default();
            panel.open = true;
            matches!(panel.load, Load::Idle | Load::Failed(_))
        };
        if fetch {
            self.reload(thread_id).await;
        }
        self.state(thread_id)
    }

    async fn reload(&self, thread_id: Id) {
        let generation = {
            let mut panels = self.panels.lock().unwrap();
            let panel = panels.entry(thread_id).or_default();
            panel.generation += 1;
            panel.load = Load::Loading;
            panel.generation
        };
        let result = self.fetch(thread_id).await;
        if self.cancel.is_cancelled() {
            debug!(%thread_id, "comment panel unmounted; dropping result");
            return;
        }
        let mut panels = self.panels.lock().unwrap();
        let Some(panel) = panels.get_mut(&thread_id) else { return };
        if panel.generation != generation {
            return;
        }
        panel.load = match result {
            Ok(list) => Load::Loaded(list),
            Err(e) => {
                warn!(%thread_id, error = %e, "loading comments failed");
                Load::Failed(e)
            }
        };
    }

    async fn fetch(&self, thread_id: Id) -> Result<Vec<CommentView>, FeedError> {
        let store = self.store.as_ref();
        let rows: Vec<(Comment, Option<UserProfile>)> = match store.comments_with_authors(thread_id).await {
            Ok(rows) => rows.into_iter().map(|a| (a.row, a.author)).collect(),
            Err(e) if e.needs_fallback() => {
                degraded("comments", &e);
                let plain = store.comments(thread_id).await?;
                stitch_authors(store, plain).await
            }
            Err(e) => return Err(e.into()),
        };
        Ok(rows.into_iter().map(|(comment, author)| CommentView { comment, author }).collect())
    }

    /// Post a comment (or a flat reply when `parent_id` is set), then re-fetch
    /// the whole thread's comments.
    pub async fn post(
        &self,
        viewer: Option<&Viewer>,
        thread_id: Id,
        body: &str,
        parent_id: Option<Id>,
    ) -> Result<PanelState, FeedError> {
        let viewer = viewer.ok_or(FeedError::AuthRequired)?;
        let content = validate_text("Comment", body, MAX_COMMENT_CHARS)?;
        if self.limiter.as_ref().is_some_and(|rl| !rl.allow_comment(viewer.id)) {
            return Err(FeedError::RateLimited(String::new()));
        }
        self.store
            .create_comment(NewComment { thread_id, parent_id, user_id: viewer.id, content })
            .await?;
        info!(%thread_id, reply = parent_id.is_some(), "comment posted");

        self.panels.lock().unwrap().entry(thread_id).or_default().open = true;
        self.reload(thread_id).await;
        Ok(self.state(thread_id))
    }
}
