//! Per-kind query, count and mutation strategy.

use std::collections::{BTreeSet, HashMap};

use futures_util::future::try_join_all;
use tracing::warn;

use crate::interactions::Interaction;
use crate::models::*;
use crate::store::{FeedFilter, Store, StoreError, StoreResult};

impl ContentKind {
    /// The dedicated prayer category reads the prayers table; everything else reads threads.
    pub fn for_category(category: Option<Category>) -> Self {
        match category {
            Some(Category::Prayers) => ContentKind::Prayer,
            _ => ContentKind::Thread,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Thread => "thread",
            ContentKind::Prayer => "prayer",
        }
    }

    /// Join table backing `action` for this kind, if the kind supports it.
    pub fn membership(&self, action: Interaction) -> Option<MembershipKind> {
        match (self, action) {
            (ContentKind::Thread, Interaction::Pray) => Some(MembershipKind::ThreadPrayer),
            (ContentKind::Prayer, Interaction::Pray) => Some(MembershipKind::PrayerAction),
            (ContentKind::Thread, Interaction::Like) => Some(MembershipKind::ThreadLike),
            (ContentKind::Thread, Interaction::Bookmark) => Some(MembershipKind::Bookmark),
            (ContentKind::Prayer, Interaction::Like | Interaction::Bookmark) => None,
        }
    }

    /// Exact-count target for the counter `action` drives. Bookmarks show no counter.
    pub fn counter_target(&self, action: Interaction, id: Id) -> Option<CountTarget> {
        match action {
            Interaction::Bookmark => None,
            _ => self.membership(action).map(|m| CountTarget::Memberships(m, id)),
        }
    }

    pub async fn counters(&self, store: &dyn Store, id: Id) -> StoreResult<Counters> {
        match self {
            ContentKind::Thread => {
                let (prayer_count, comment_count, like_count) = tokio::try_join!(
                    store.count(CountTarget::Memberships(MembershipKind::ThreadPrayer, id)),
                    store.count(CountTarget::Comments(id)),
                    store.count(CountTarget::Memberships(MembershipKind::ThreadLike, id)),
                )?;
                Ok(Counters { prayer_count, comment_count, like_count })
            }
            ContentKind::Prayer => {
                let prayer_count = store.count(CountTarget::Memberships(MembershipKind::PrayerAction, id)).await?;
                Ok(Counters { prayer_count, ..Counters::default() })
            }
        }
    }

    /// Newest-first cards for `filter`, falling back to unjoined reads when the
    /// author join trips row-level security.
    pub async fn fetch(&self, store: &dyn Store, filter: &FeedFilter) -> StoreResult<Vec<FeedItem>> {
        match self {
            ContentKind::Thread => {
                let rows: Vec<(Thread, Option<UserProfile>)> = match store.threads_with_authors(filter).await {
                    Ok(rows) => rows.into_iter().map(|a| (a.row, a.author)).collect(),
                    Err(e) if e.needs_fallback() => {
                        degraded("threads", &e);
                        let plain = store.threads(filter).await?;
                        stitch_authors(store, plain).await
                    }
                    Err(e) => return Err(e),
                };
                let counters = try_join_all(rows.iter().map(|(t, _)| self.counters(store, t.id))).await?;
                Ok(rows
                    .into_iter()
                    .zip(counters)
                    .map(|((t, author), c)| FeedItem::from_thread(t, author, c))
                    .collect())
            }
            ContentKind::Prayer => {
                let rows: Vec<(Prayer, Option<UserProfile>)> = match store.prayers_with_authors(filter).await {
                    Ok(rows) => rows.into_iter().map(|a| (a.row, a.author)).collect(),
                    Err(e) if e.needs_fallback() => {
                        degraded("prayers", &e);
                        let plain = store.prayers(filter).await?;
                        stitch_authors(store, plain).await
                    }
                    Err(e) => return Err(e),
                };
                let counters = try_join_all(rows.iter().map(|(p, _)| self.counters(store, p.id))).await?;
                Ok(rows
                    .into_iter()
                    .zip(counters)
                    .map(|((p, author), c)| FeedItem::from_prayer(p, author, c))
                    .collect())
            }
        }
    }
}

pub(crate) fn degraded(table: &'static str, cause: &StoreError) {
    warn!(table, error = %cause, "joined read failed; using unjoined fallback");
    metrics::counter!("feed_fallback_total", "table" => table).increment(1);
}

/// Second half of the degraded read: look up authors by id and attach them in
/// row order. Anonymous rows are never looked up.
pub(crate) async fn stitch_authors<T: HasAuthor>(store: &dyn Store, rows: Vec<T>) -> Vec<(T, Option<UserProfile>)> {
    let ids: Vec<Id> = rows
        .iter()
        .filter(|r| !r.is_anonymous())
        .filter_map(HasAuthor::author_id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let authors: HashMap<Id, UserProfile> = if ids.is_empty() {
        HashMap::new()
    } else {
        match store.users_by_ids(&ids).await {
            Ok(users) => users.into_iter().map(|u| (u.id, u)).collect(),
            Err(e) => {
                warn!(error = %e, "author lookup failed; showing rows without authors");
                HashMap::new()
            }
        }
    };

    rows.into_iter()
        .map(|r| {
            let author = if r.is_anonymous() {
                None
            } else {
                r.author_id().and_then(|id| authors.get(&id).cloned())
            };
            (r, author)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prayers_category_selects_prayer_table() {
        assert_eq!(ContentKind::for_category(Some(Category::Prayers)), ContentKind::Prayer);
        assert_eq!(ContentKind::for_category(Some(Category::Testimonies)), ContentKind::Thread);
        assert_eq!(ContentKind::for_category(None), ContentKind::Thread);
    }

    #[test]
    fn prayer_requests_only_support_praying() {
        let k = ContentKind::Prayer;
        assert_eq!(k.membership(Interaction::Pray), Some(MembershipKind::PrayerAction));
        assert_eq!(k.membership(Interaction::Like), None);
        assert_eq!(ContentKind::Thread.counter_target(Interaction::Bookmark, uuid::Uuid::nil()), None);
    }
}
