//! Per-viewer pray / like / bookmark membership and the toggles that change it.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use futures_util::future::try_join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::auth::Viewer;
use crate::error::FeedError;
use crate::models::*;
use crate::rate_limit::RateLimiterFacade;
use crate::store::{Store, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interaction {
    Pray,
    Like,
    Bookmark,
}

impl Interaction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interaction::Pray => "pray",
            Interaction::Like => "like",
            Interaction::Bookmark => "bookmark",
        }
    }
}

/// Button state for one (interaction, card) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleState {
    NotInteracted,
    Interacted,
    Interacting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub id: Id,
    pub kind: ContentKind,
}

impl Target {
    pub fn thread(id: Id) -> Self {
        Self { id, kind: ContentKind::Thread }
    }

    pub fn prayer(id: Id) -> Self {
        Self { id, kind: ContentKind::Prayer }
    }
}

impl From<&FeedItem> for Target {
    fn from(item: &FeedItem) -> Self {
        Self { id: item.id, kind: item.kind }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToggleOutcome {
    /// Membership after the toggle.
    pub active: bool,
    /// Freshly counted total; `None` for bookmarks or when the recount failed.
    pub count: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipSets {
    pub prayed: HashSet<Id>,
    pub liked: HashSet<Id>,
    pub bookmarked: HashSet<Id>,
}

impl MembershipSets {
    pub fn get(&self, action: Interaction) -> &HashSet<Id> {
        match action {
            Interaction::Pray => &self.prayed,
            Interaction::Like => &self.liked,
            Interaction::Bookmark => &self.bookmarked,
        }
    }

    fn get_mut(&mut self, action: Interaction) -> &mut HashSet<Id> {
        match action {
            Interaction::Pray => &mut self.prayed,
            Interaction::Like => &mut self.liked,
            Interaction::Bookmark => &mut self.bookmarked,
        }
    }
}

type InFlight = Mutex<HashSet<(Interaction, Id)>>;

// Releases the per-button in-flight slot however the toggle ends.
struct InFlightGuard<'a> {
    slots: &'a InFlight,
    key: (Interaction, Id),
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.slots.lock().unwrap().remove(&self.key);
    }
}

pub struct InteractionTracker {
    store: Arc<dyn Store>,
    limiter: Option<RateLimiterFacade>,
    viewer: Mutex<Option<Viewer>>,
    sets: Mutex<MembershipSets>,
    in_flight: InFlight,
}

impl InteractionTracker {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            limiter: None,
            viewer: Mutex::new(None),
            sets: Mutex::new(MembershipSets::default()),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_rate_limiter(mut self, limiter: RateLimiterFacade) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn viewer(&self) -> Option<Viewer> {
        self.viewer.lock().unwrap().clone()
    }

    fn viewer_id(&self) -> Option<Id> {
        self.viewer.lock().unwrap().as_ref().map(|v| v.id)
    }

    pub fn sets(&self) -> MembershipSets {
        self.sets.lock().unwrap().clone()
    }

    pub fn is_member(&self, action: Interaction, id: Id) -> bool {
        self.sets.lock().unwrap().get(action).contains(&id)
    }

    pub fn state(&self, action: Interaction, id: Id) -> ToggleState {
        if self.in_flight.lock().unwrap().contains(&(action, id)) {
            ToggleState::Interacting
        } else if self.is_member(action, id) {
            ToggleState::Interacted
        } else {
            ToggleState::NotInteracted
        }
    }

    /// Swap the viewer; membership sets are cleared and reloaded for the new one.
    pub async fn set_viewer(&self, viewer: Option<Viewer>) -> Result<(), FeedError> {
        *self.viewer.lock().unwrap() = viewer;
        *self.sets.lock().unwrap() = MembershipSets::default();
        self.reload().await
    }

    pub async fn reload(&self) -> Result<(), FeedError> {
        let Some(user) = self.viewer_id() else { return Ok(()) };
        let store = self.store.as_ref();
        let lists = try_join_all(MembershipKind::ALL.iter().map(|k| async move {
            store.membership_ids(*k, user).await.map(|ids| (*k, ids))
        }))
        .await?;

        let mut sets = MembershipSets::default();
        for (kind, ids) in lists {
            let bucket = match kind {
                MembershipKind::ThreadPrayer | MembershipKind::PrayerAction => &mut sets.prayed,
                MembershipKind::ThreadLike => &mut sets.liked,
                MembershipKind::Bookmark => &mut sets.bookmarked,
            };
            bucket.extend(ids);
        }
        // the viewer may have changed while we were reading
        if self.viewer_id() == Some(user) {
            *self.sets.lock().unwrap() = sets;
        }
        Ok(())
    }

    fn begin(&self, action: Interaction, id: Id) -> Result<InFlightGuard<'_>, FeedError> {
        let mut slots = self.in_flight.lock().unwrap();
        if !slots.insert((action, id)) {
            return Err(FeedError::InFlight);
        }
        Ok(InFlightGuard { slots: &self.in_flight, key: (action, id) })
    }

    /// Toggle `action` on `target` for the current viewer.
    ///
    /// Without a viewer nothing reaches the store and `AuthRequired` is
    /// returned. The local set changes only after the store call succeeds, so
    /// a failed toggle leaves the button as it was before the click.
    pub async fn toggle(&self, action: Interaction, target: Target) -> Result<ToggleOutcome, FeedError> {
        let Some(user) = self.viewer_id() else {
            debug!(action = action.as_str(), "toggle without viewer; prompting sign-in");
            return Err(FeedError::AuthRequired);
        };
        let membership = target.kind.membership(action).ok_or_else(|| {
            FeedError::Validation(format!("You can't {} a prayer request", action.as_str()))
        })?;
        let _slot = self.begin(action, target.id)?;
        if self.limiter.as_ref().is_some_and(|rl| !rl.allow_interaction(user)) {
            return Err(FeedError::RateLimited(String::new()));
        }

        let active = match self.mutate(action, membership, user, target.id).await {
            Ok(active) => active,
            Err(e) => {
                warn!(action = action.as_str(), target = %target.id, error = %e, "toggle failed");
                return Err(e);
            }
        };
        if self.viewer_id() == Some(user) {
            let mut sets = self.sets.lock().unwrap();
            let set = sets.get_mut(action);
            if active {
                set.insert(target.id);
            } else {
                set.remove(&target.id);
            }
        }
        metrics::counter!("interaction_toggle_total", "action" => action.as_str()).increment(1);

        let count = match target.kind.counter_target(action, target.id) {
            Some(t) => match self.store.count(t).await {
                Ok(n) => Some(n),
                Err(e) => {
                    warn!(target = %target.id, error = %e, "recount after toggle failed");
                    None
                }
            },
            None => None,
        };
        Ok(ToggleOutcome { active, count })
    }

    async fn mutate(&self, action: Interaction, membership: MembershipKind, user: Id, target: Id) -> Result<bool, FeedError> {
        match action {
            Interaction::Pray => match self.store.add_membership(membership, user, target).await {
                Ok(()) => Ok(true),
                Err(StoreError::Duplicate) if membership.is_unique() => {
                    debug!(%target, "already prayed for; treating as success");
                    Ok(true)
                }
                Err(e) => Err(e.into()),
            },
            Interaction::Like | Interaction::Bookmark => {
                if self.store.has_membership(membership, user, target).await? {
                    self.store.remove_membership(membership, user, target).await?;
                    Ok(false)
                } else {
                    self.store.add_membership(membership, user, target).await?;
                    Ok(true)
                }
            }
        }
    }
}
