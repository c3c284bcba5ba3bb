//! Async seams over the hosted database.
//!
//! Every call is an independent autocommit statement; the store performs no
//! batching or local transactions. `rest::RestStore` speaks PostgREST,
//! `inmem::InMemStore` keeps rows in process for tests and local runs.

use async_trait::async_trait;

use crate::models::*;

pub mod rest;
#[cfg(feature = "inmem-store")]
pub mod inmem;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("connection unavailable: {0}")]
    Unavailable(String),
    #[error("policy recursion: {0}")]
    PolicyRecursion(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("duplicate")]
    Duplicate,
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("invalid: {0}")]
    Invalid(String),
    #[error("not found")]
    NotFound,
    #[error("store error: {0}")]
    Other(String),
}

impl StoreError {
    /// Failures of a joined read that the unjoined two-step read can recover from.
    pub fn needs_fallback(&self) -> bool {
        matches!(self, StoreError::PolicyRecursion(_) | StoreError::PermissionDenied(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Read parameters shared by thread and prayer listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedFilter {
    /// Ignored by prayer listings.
    pub category: Option<Category>,
    /// Case-insensitive substring over title and content.
    pub search: Option<String>,
    pub limit: usize,
}

impl FeedFilter {
    pub fn search_term(&self) -> Option<&str> {
        self.search.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

#[async_trait]
pub trait ThreadStore: Send + Sync {
    async fn threads_with_authors(&self, filter: &FeedFilter) -> StoreResult<Vec<Authored<Thread>>>;
    async fn threads(&self, filter: &FeedFilter) -> StoreResult<Vec<Thread>>;
    async fn create_thread(&self, new: NewThread) -> StoreResult<Thread>;
}

#[async_trait]
pub trait PrayerStore: Send + Sync {
    async fn prayers_with_authors(&self, filter: &FeedFilter) -> StoreResult<Vec<Authored<Prayer>>>;
    async fn prayers(&self, filter: &FeedFilter) -> StoreResult<Vec<Prayer>>;
    async fn create_prayer(&self, new: NewPrayer) -> StoreResult<Prayer>;
}

#[async_trait]
pub trait CommentStore: Send + Sync {
    /// Oldest first.
    async fn comments_with_authors(&self, thread_id: Id) -> StoreResult<Vec<Authored<Comment>>>;
    /// Oldest first.
    async fn comments(&self, thread_id: Id) -> StoreResult<Vec<Comment>>;
    async fn create_comment(&self, new: NewComment) -> StoreResult<()>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn users_by_ids(&self, ids: &[Id]) -> StoreResult<Vec<UserProfile>>;
    async fn notification_preferences(&self, user_id: Id) -> StoreResult<Option<NotificationPreferences>>;
    async fn save_notification_preferences(&self, prefs: NotificationPreferences) -> StoreResult<NotificationPreferences>;
}

#[async_trait]
pub trait MembershipStore: Send + Sync {
    async fn membership_ids(&self, kind: MembershipKind, user_id: Id) -> StoreResult<Vec<Id>>;
    async fn has_membership(&self, kind: MembershipKind, user_id: Id, target: Id) -> StoreResult<bool>;
    /// Unique joins report `StoreError::Duplicate` on a second insert.
    async fn add_membership(&self, kind: MembershipKind, user_id: Id, target: Id) -> StoreResult<()>;
    async fn remove_membership(&self, kind: MembershipKind, user_id: Id, target: Id) -> StoreResult<()>;
    async fn count(&self, target: CountTarget) -> StoreResult<u64>;
}

#[async_trait]
pub trait SiteStore: Send + Sync {
    async fn subscribe_newsletter(&self, signup: NewsletterSignup) -> StoreResult<()>;
    async fn save_contact_message(&self, msg: ContactMessage) -> StoreResult<()>;
    async fn file_report(&self, report: Report) -> StoreResult<()>;
    async fn create_order(&self, order: NewOrder) -> StoreResult<Order>;
    /// Idempotent on `stripe_payment_intent_id`.
    async fn record_payment(&self, record: PaymentRecord) -> StoreResult<()>;
}

pub trait Store: ThreadStore + PrayerStore + CommentStore + UserStore + MembershipStore + SiteStore {}

impl<T> Store for T where T: ThreadStore + PrayerStore + CommentStore + UserStore + MembershipStore + SiteStore {}
