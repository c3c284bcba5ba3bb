use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

// Supabase hands out UUID primary keys everywhere
pub type Id = Uuid;

/// Fixed, server-seeded list of discussion categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum Category {
    General,
    Prayers,
    Testimonies,
    #[serde(rename = "Bible Study")]
    BibleStudy,
    Encouragement,
    Questions,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::General,
        Category::Prayers,
        Category::Testimonies,
        Category::BibleStudy,
        Category::Encouragement,
        Category::Questions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::General => "General",
            Category::Prayers => "Prayers",
            Category::Testimonies => "Testimonies",
            Category::BibleStudy => "Bible Study",
            Category::Encouragement => "Encouragement",
            Category::Questions => "Questions",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown category '{s}'"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UserProfile {
    pub id: Id,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Thread {
    pub id: Id,
    pub user_id: Option<Id>,
    pub title: String,
    pub content: String,
    pub category: Category,
    #[serde(default)]
    pub is_anonymous: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewThread {
    pub user_id: Id,
    pub title: String,
    pub content: String,
    pub category: Category,
    pub is_anonymous: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Prayer {
    pub id: Id,
    pub user_id: Option<Id>,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub is_urgent: bool,
    #[serde(default)]
    pub is_anonymous: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewPrayer {
    pub user_id: Id,
    pub title: String,
    pub content: String,
    pub is_urgent: bool,
    pub is_anonymous: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Comment {
    pub id: Id,
    pub thread_id: Id,
    pub parent_id: Option<Id>, // flat replies, not rendered as a tree
    pub user_id: Id,
    pub content: String,
    #[serde(default)]
    pub is_edited: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewComment {
    pub thread_id: Id,
    pub parent_id: Option<Id>,
    pub user_id: Id,
    pub content: String,
}

/// A row read together with its embedded author (`author:users(...)`).
#[derive(Debug, Clone, Deserialize)]
pub struct Authored<T> {
    #[serde(flatten)]
    pub row: T,
    #[serde(default)]
    pub author: Option<UserProfile>,
}

/// Anything that may carry an author reference.
pub trait HasAuthor {
    fn author_id(&self) -> Option<Id>;
    fn is_anonymous(&self) -> bool {
        false
    }
}

impl HasAuthor for Thread {
    fn author_id(&self) -> Option<Id> {
        self.user_id
    }
    fn is_anonymous(&self) -> bool {
        self.is_anonymous
    }
}

impl HasAuthor for Prayer {
    fn author_id(&self) -> Option<Id> {
        self.user_id
    }
    fn is_anonymous(&self) -> bool {
        self.is_anonymous
    }
}

impl HasAuthor for Comment {
    fn author_id(&self) -> Option<Id> {
        Some(self.user_id)
    }
}

/// Which table a feed fetch targets. Resolved once per fetch from the category filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Thread,
    Prayer,
}

/// Point-in-time counter snapshot for one card.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Counters {
    pub prayer_count: u64,
    pub comment_count: u64,
    pub like_count: u64,
}

/// Denormalized card the feed renders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FeedItem {
    pub id: Id,
    pub kind: ContentKind,
    pub title: String,
    pub body: String,
    pub category: Category,
    pub is_anonymous: bool,
    pub is_urgent: bool,
    pub created_at: DateTime<Utc>,
    pub author: Option<UserProfile>,
    pub counters: Counters,
}

impl FeedItem {
    // Every read path goes through these two constructors, so anonymous rows
    // can never leak an author.
    pub fn from_thread(t: Thread, author: Option<UserProfile>, counters: Counters) -> Self {
        let author = if t.is_anonymous { None } else { author };
        Self {
            id: t.id,
            kind: ContentKind::Thread,
            title: t.title,
            body: t.content,
            category: t.category,
            is_anonymous: t.is_anonymous,
            is_urgent: false,
            created_at: t.created_at,
            author,
            counters,
        }
    }

    pub fn from_prayer(p: Prayer, author: Option<UserProfile>, counters: Counters) -> Self {
        let author = if p.is_anonymous { None } else { author };
        Self {
            id: p.id,
            kind: ContentKind::Prayer,
            title: p.title,
            body: p.content,
            category: Category::Prayers,
            is_anonymous: p.is_anonymous,
            is_urgent: p.is_urgent,
            created_at: p.created_at,
            author,
            counters,
        }
    }
}

/// Join tables whose rows are the only state of a membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MembershipKind {
    ThreadPrayer,
    PrayerAction,
    ThreadLike,
    Bookmark,
}

impl MembershipKind {
    pub const ALL: [MembershipKind; 4] = [
        MembershipKind::ThreadPrayer,
        MembershipKind::PrayerAction,
        MembershipKind::ThreadLike,
        MembershipKind::Bookmark,
    ];

    pub fn table(&self) -> &'static str {
        match self {
            MembershipKind::ThreadPrayer => "thread_prayers",
            MembershipKind::PrayerAction => "prayer_actions",
            MembershipKind::ThreadLike => "thread_likes",
            MembershipKind::Bookmark => "bookmarks",
        }
    }

    pub fn target_column(&self) -> &'static str {
        match self {
            MembershipKind::PrayerAction => "prayer_id",
            _ => "thread_id",
        }
    }

    /// `thread_prayers` is an append log; every other join is unique per (user, target).
    pub fn is_unique(&self) -> bool {
        !matches!(self, MembershipKind::ThreadPrayer)
    }
}

/// Exact-count query targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CountTarget {
    Memberships(MembershipKind, Id),
    Comments(Id),
}

// ---------------- site forms -------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewsletterSignup {
    pub email: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ContactMessage {
    pub name: String,
    pub email: String,
    pub subject: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ReportTarget {
    Thread,
    Comment,
    Prayer,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewReport {
    pub target_id: Id,
    pub target_kind: ReportTarget,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Report {
    pub reporter_id: Id,
    pub target_id: Id,
    pub target_kind: ReportTarget,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct NotificationPreferences {
    pub user_id: Id,
    #[serde(default = "default_true")]
    pub email_replies: bool,
    #[serde(default = "default_true")]
    pub email_prayers: bool,
    #[serde(default)]
    pub weekly_digest: bool,
}

fn default_true() -> bool {
    true
}

impl NotificationPreferences {
    pub fn defaults_for(user_id: Id) -> Self {
        Self { user_id, email_replies: true, email_prayers: true, weekly_digest: false }
    }
}

// ---------------- orders & payments ------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OrderItem {
    pub product_id: String,
    pub name: String,
    pub unit_amount: i64, // minor units
    pub quantity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewOrder {
    pub email: Option<String>,
    pub total_amount: i64,
    pub currency: String,
    pub stripe_payment_intent_id: String,
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Order {
    pub id: Id,
    pub email: Option<String>,
    pub total_amount: i64,
    pub currency: String,
    pub stripe_payment_intent_id: String,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PaymentKind {
    Donation,
    Order,
}

/// Outcome of a provider payment, keyed by the provider's payment intent id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PaymentRecord {
    pub stripe_payment_intent_id: String,
    pub kind: PaymentKind,
    pub amount: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub donor_name: Option<String>,
    pub donor_email: Option<String>,
}
