use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::*;

#[derive(Default)]
struct State {
    users: HashMap<Id, UserProfile>,
    threads: Vec<Thread>,
    prayers: Vec<Prayer>,
    comments: Vec<Comment>,
    memberships: Vec<(MembershipKind, Id, Id)>,
    newsletter: Vec<NewsletterSignup>,
    contact: Vec<ContactMessage>,
    reports: Vec<Report>,
    preferences: HashMap<Id, NotificationPreferences>,
    orders: Vec<(Order, Vec<OrderItem>)>,
    payments: HashMap<String, PaymentRecord>,
    last_ts: Option<DateTime<Utc>>,
}

/// Injected failures and latency, for exercising degraded paths.
#[derive(Default)]
struct Faults {
    joined_reads: Option<StoreError>,
    user_reads: Option<StoreError>,
    writes: Option<StoreError>,
    read_delays: VecDeque<Duration>,
    write_delays: VecDeque<Duration>,
}

/// Process-local store. Cloning shares the same rows.
#[derive(Clone, Default)]
pub struct InMemStore {
    state: Arc<RwLock<State>>,
    faults: Arc<RwLock<Faults>>,
    calls: Arc<RwLock<Vec<String>>>,
}

impl InMemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_user(&self, user: UserProfile) {
        self.state.write().unwrap().users.insert(user.id, user);
    }

    /// Make every joined (`*_with_authors`) read fail with `err`.
    pub fn fail_joined_reads(&self, err: Option<StoreError>) {
        self.faults.write().unwrap().joined_reads = err;
    }

    pub fn fail_user_reads(&self, err: Option<StoreError>) {
        self.faults.write().unwrap().user_reads = err;
    }

    pub fn fail_writes(&self, err: Option<StoreError>) {
        self.faults.write().unwrap().writes = err;
    }

    /// Queue a delay for the next thread/prayer/comment read; consumed in order.
    pub fn delay_next_read(&self, d: Duration) {
        self.faults.write().unwrap().read_delays.push_back(d);
    }

    /// Queue a delay for the next membership insert or delete.
    pub fn delay_next_write(&self, d: Duration) {
        self.faults.write().unwrap().write_delays.push_back(d);
    }

    /// Names of the operations issued so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.read().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.write().unwrap().clear();
    }

    pub fn payments(&self) -> Vec<PaymentRecord> {
        self.state.read().unwrap().payments.values().cloned().collect()
    }

    pub fn orders(&self) -> Vec<Order> {
        self.state.read().unwrap().orders.iter().map(|(o, _)| o.clone()).collect()
    }

    pub fn newsletter_subscribers(&self) -> Vec<NewsletterSignup> {
        self.state.read().unwrap().newsletter.clone()
    }

    pub fn contact_messages(&self) -> Vec<ContactMessage> {
        self.state.read().unwrap().contact.clone()
    }

    pub fn reports(&self) -> Vec<Report> {
        self.state.read().unwrap().reports.clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.write().unwrap().push(call.into());
    }

    async fn read_latency(&self) {
        let delay = self.faults.write().unwrap().read_delays.pop_front();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
    }

    async fn write_latency(&self) {
        let delay = self.faults.write().unwrap().write_delays.pop_front();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
    }

    fn joined_fault(&self) -> StoreResult<()> {
        match &self.faults.read().unwrap().joined_reads {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn write_fault(&self) -> StoreResult<()> {
        match &self.faults.read().unwrap().writes {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    // strictly increasing so newest-first ordering is deterministic
    fn next_ts(state: &mut State) -> DateTime<Utc> {
        let mut now = Utc::now();
        if let Some(last) = state.last_ts {
            if now <= last {
                now = last + chrono::Duration::microseconds(1);
            }
        }
        state.last_ts = Some(now);
        now
    }

    fn author_of(state: &State, id: Option<Id>) -> Option<UserProfile> {
        id.and_then(|id| state.users.get(&id).cloned())
    }

    fn matches(filter: &FeedFilter, title: &str, content: &str) -> bool {
        match filter.search_term() {
            Some(term) => {
                let term = term.to_lowercase();
                title.to_lowercase().contains(&term) || content.to_lowercase().contains(&term)
            }
            None => true,
        }
    }

    fn select_threads(&self, filter: &FeedFilter) -> Vec<Thread> {
        let s = self.state.read().unwrap();
        let mut v: Vec<_> = s
            .threads
            .iter()
            .filter(|t| filter.category.map_or(true, |c| t.category == c))
            .filter(|t| Self::matches(filter, &t.title, &t.content))
            .cloned()
            .collect();
        v.sort_by(|a, b| b.created_at.cmp(&a.created_at)); // newest first
        v.truncate(filter.limit);
        v
    }

    fn select_prayers(&self, filter: &FeedFilter) -> Vec<Prayer> {
        let s = self.state.read().unwrap();
        let mut v: Vec<_> = s
            .prayers
            .iter()
            .filter(|p| Self::matches(filter, &p.title, &p.content))
            .cloned()
            .collect();
        v.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        v.truncate(filter.limit);
        v
    }

    fn select_comments(&self, thread_id: Id) -> Vec<Comment> {
        let s = self.state.read().unwrap();
        let mut v: Vec<_> = s.comments.iter().filter(|c| c.thread_id == thread_id).cloned().collect();
        v.sort_by(|a, b| a.created_at.cmp(&b.created_at)); // ascending
        v
    }
}

#[async_trait]
impl ThreadStore for InMemStore {
    async fn threads_with_authors(&self, filter: &FeedFilter) -> StoreResult<Vec<Authored<Thread>>> {
        self.record("threads_with_authors");
        self.read_latency().await;
        self.joined_fault()?;
        let rows = self.select_threads(filter);
        let s = self.state.read().unwrap();
        Ok(rows
            .into_iter()
            .map(|t| {
                let author = Self::author_of(&s, t.user_id);
                Authored { row: t, author }
            })
            .collect())
    }

    async fn threads(&self, filter: &FeedFilter) -> StoreResult<Vec<Thread>> {
        self.record("threads");
        self.read_latency().await;
        Ok(self.select_threads(filter))
    }

    async fn create_thread(&self, new: NewThread) -> StoreResult<Thread> {
        self.record("create_thread");
        self.write_fault()?;
        let mut s = self.state.write().unwrap();
        let now = Self::next_ts(&mut s);
        let thread = Thread {
            id: Uuid::new_v4(),
            user_id: Some(new.user_id),
            title: new.title,
            content: new.content,
            category: new.category,
            is_anonymous: new.is_anonymous,
            created_at: now,
            updated_at: now,
        };
        s.threads.push(thread.clone());
        Ok(thread)
    }
}

#[async_trait]
impl PrayerStore for InMemStore {
    async fn prayers_with_authors(&self, filter: &FeedFilter) -> StoreResult<Vec<Authored<Prayer>>> {
        self.record("prayers_with_authors");
        self.read_latency().await;
        self.joined_fault()?;
        let rows = self.select_prayers(filter);
        let s = self.state.read().unwrap();
        Ok(rows
            .into_iter()
            .map(|p| {
                let author = Self::author_of(&s, p.user_id);
                Authored { row: p, author }
            })
            .collect())
    }

    async fn prayers(&self, filter: &FeedFilter) -> StoreResult<Vec<Prayer>> {
        self.record("prayers");
        self.read_latency().await;
        Ok(self.select_prayers(filter))
    }

    async fn create_prayer(&self, new: NewPrayer) -> StoreResult<Prayer> {
        self.record("create_prayer");
        self.write_fault()?;
        let mut s = self.state.write().unwrap();
        let now = Self::next_ts(&mut s);
        let prayer = Prayer {
            id: Uuid::new_v4(),
            user_id: Some(new.user_id),
            title: new.title,
            content: new.content,
            is_urgent: new.is_urgent,
            is_anonymous: new.is_anonymous,
            created_at: now,
        };
        s.prayers.push(prayer.clone());
        Ok(prayer)
    }
}

#[async_trait]
impl CommentStore for InMemStore {
    async fn comments_with_authors(&self, thread_id: Id) -> StoreResult<Vec<Authored<Comment>>> {
        self.record("comments_with_authors");
        self.read_latency().await;
        self.joined_fault()?;
        let rows = self.select_comments(thread_id);
        let s = self.state.read().unwrap();
        Ok(rows
            .into_iter()
            .map(|c| {
                let author = Self::author_of(&s, Some(c.user_id));
                Authored { row: c, author }
            })
            .collect())
    }

    async fn comments(&self, thread_id: Id) -> StoreResult<Vec<Comment>> {
        self.record("comments");
        self.read_latency().await;
        Ok(self.select_comments(thread_id))
    }

    async fn create_comment(&self, new: NewComment) -> StoreResult<()> {
        self.record("create_comment");
        self.write_fault()?;
        let mut s = self.state.write().unwrap();
        if !s.threads.iter().any(|t| t.id == new.thread_id) {
            return Err(StoreError::NotFound);
        }
        let now = Self::next_ts(&mut s);
        s.comments.push(Comment {
            id: Uuid::new_v4(),
            thread_id: new.thread_id,
            parent_id: new.parent_id,
            user_id: new.user_id,
            content: new.content,
            is_edited: false,
            created_at: now,
            updated_at: now,
        });
        Ok(())
    }
}

#[async_trait]
impl UserStore for InMemStore {
    async fn users_by_ids(&self, ids: &[Id]) -> StoreResult<Vec<UserProfile>> {
        self.record("users_by_ids");
        if let Some(e) = &self.faults.read().unwrap().user_reads {
            return Err(e.clone());
        }
        let s = self.state.read().unwrap();
        Ok(ids.iter().filter_map(|id| s.users.get(id).cloned()).collect())
    }

    async fn notification_preferences(&self, user_id: Id) -> StoreResult<Option<NotificationPreferences>> {
        self.record("notification_preferences");
        Ok(self.state.read().unwrap().preferences.get(&user_id).cloned())
    }

    async fn save_notification_preferences(&self, prefs: NotificationPreferences) -> StoreResult<NotificationPreferences> {
        self.record("save_notification_preferences");
        self.write_fault()?;
        self.state.write().unwrap().preferences.insert(prefs.user_id, prefs.clone());
        Ok(prefs)
    }
}

#[async_trait]
impl MembershipStore for InMemStore {
    async fn membership_ids(&self, kind: MembershipKind, user_id: Id) -> StoreResult<Vec<Id>> {
        self.record(format!("membership_ids:{}", kind.table()));
        let s = self.state.read().unwrap();
        Ok(s.memberships
            .iter()
            .filter(|(k, u, _)| *k == kind && *u == user_id)
            .map(|(_, _, t)| *t)
            .collect())
    }

    async fn has_membership(&self, kind: MembershipKind, user_id: Id, target: Id) -> StoreResult<bool> {
        self.record(format!("has_membership:{}", kind.table()));
        let s = self.state.read().unwrap();
        Ok(s.memberships.iter().any(|m| *m == (kind, user_id, target)))
    }

    async fn add_membership(&self, kind: MembershipKind, user_id: Id, target: Id) -> StoreResult<()> {
        self.record(format!("add_membership:{}", kind.table()));
        self.write_latency().await;
        self.write_fault()?;
        let mut s = self.state.write().unwrap();
        if kind.is_unique() && s.memberships.iter().any(|m| *m == (kind, user_id, target)) {
            return Err(StoreError::Duplicate);
        }
        s.memberships.push((kind, user_id, target));
        Ok(())
    }

    async fn remove_membership(&self, kind: MembershipKind, user_id: Id, target: Id) -> StoreResult<()> {
        self.record(format!("remove_membership:{}", kind.table()));
        self.write_latency().await;
        self.write_fault()?;
        let mut s = self.state.write().unwrap();
        s.memberships.retain(|m| *m != (kind, user_id, target));
        Ok(())
    }

    async fn count(&self, target: CountTarget) -> StoreResult<u64> {
        let s = self.state.read().unwrap();
        let n = match target {
            CountTarget::Memberships(kind, id) => {
                s.memberships.iter().filter(|(k, _, t)| *k == kind && *t == id).count()
            }
            CountTarget::Comments(id) => s.comments.iter().filter(|c| c.thread_id == id).count(),
        };
        Ok(n as u64)
    }
}

#[async_trait]
impl SiteStore for InMemStore {
    async fn subscribe_newsletter(&self, signup: NewsletterSignup) -> StoreResult<()> {
        self.record("subscribe_newsletter");
        self.write_fault()?;
        let mut s = self.state.write().unwrap();
        if s.newsletter.iter().any(|n| n.email.eq_ignore_ascii_case(&signup.email)) {
            return Err(StoreError::Duplicate);
        }
        s.newsletter.push(signup);
        Ok(())
    }

    async fn save_contact_message(&self, msg: ContactMessage) -> StoreResult<()> {
        self.record("save_contact_message");
        self.write_fault()?;
        self.state.write().unwrap().contact.push(msg);
        Ok(())
    }

    async fn file_report(&self, report: Report) -> StoreResult<()> {
        self.record("file_report");
        self.write_fault()?;
        self.state.write().unwrap().reports.push(report);
        Ok(())
    }

    async fn create_order(&self, order: NewOrder) -> StoreResult<Order> {
        self.record("create_order");
        self.write_fault()?;
        let mut s = self.state.write().unwrap();
        let now = Self::next_ts(&mut s);
        let rec = Order {
            id: Uuid::new_v4(),
            email: order.email,
            total_amount: order.total_amount,
            currency: order.currency,
            stripe_payment_intent_id: order.stripe_payment_intent_id,
            status: PaymentStatus::Pending,
            created_at: now,
        };
        s.orders.push((rec.clone(), order.items));
        Ok(rec)
    }

    async fn record_payment(&self, record: PaymentRecord) -> StoreResult<()> {
        self.record("record_payment");
        self.write_fault()?;
        let mut s = self.state.write().unwrap();
        if record.kind == PaymentKind::Order {
            for (order, _) in s.orders.iter_mut() {
                if order.stripe_payment_intent_id == record.stripe_payment_intent_id {
                    order.status = record.status;
                }
            }
        }
        s.payments.insert(record.stripe_payment_intent_id.clone(), record);
        Ok(())
    }
}
