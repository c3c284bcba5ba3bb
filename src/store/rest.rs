//! PostgREST-backed store (Supabase `/rest/v1`).

use async_trait::async_trait;
use reqwest::{header, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::*;

const AUTHOR_EMBED: &str = "author:users!user_id(id,full_name,avatar_url)";
const USER_COLUMNS: &str = "id,full_name,avatar_url";

type Params = Vec<(&'static str, String)>;

#[derive(Clone)]
pub struct RestStore {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    bearer: String,
}

impl RestStore {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let api_key = api_key.into();
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bearer: api_key.clone(),
            api_key,
        }
    }

    /// Same store, acting as the signed-in viewer (row-level security applies to them).
    pub fn with_access_token(&self, token: impl Into<String>) -> Self {
        Self { bearer: token.into(), ..self.clone() }
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}/rest/v1/{}", self.base_url, table))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.bearer)
    }

    async fn send(rb: RequestBuilder) -> StoreResult<Response> {
        let resp = rb.send().await.map_err(transport_error)?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        let err = classify(status, &body);
        debug!(%status, error = %err, "postgrest request failed");
        Err(err)
    }

    async fn select<T: DeserializeOwned>(&self, table: &str, params: &Params) -> StoreResult<Vec<T>> {
        let resp = Self::send(self.request(Method::GET, table).query(params)).await?;
        resp.json::<Vec<T>>().await.map_err(|e| StoreError::Other(format!("decode {table}: {e}")))
    }

    async fn insert<B: Serialize + ?Sized>(&self, table: &str, body: &B, params: &Params, prefer: &str) -> StoreResult<Response> {
        Self::send(
            self.request(Method::POST, table)
                .query(params)
                .header("Prefer", prefer)
                .json(body),
        )
        .await
    }

    async fn insert_returning<T: DeserializeOwned, B: Serialize + ?Sized>(&self, table: &str, body: &B) -> StoreResult<T> {
        let resp = self.insert(table, body, &Vec::new(), "return=representation").await?;
        let mut rows = resp
            .json::<Vec<T>>()
            .await
            .map_err(|e| StoreError::Other(format!("decode {table}: {e}")))?;
        if rows.is_empty() {
            return Err(StoreError::Other(format!("insert into {table} returned no row")));
        }
        Ok(rows.remove(0))
    }

    fn listing_params(select: String, filter: &FeedFilter, with_category: bool) -> Params {
        let mut params: Params = vec![
            ("select", select),
            ("order", "created_at.desc".into()),
            ("limit", filter.limit.to_string()),
        ];
        if with_category {
            if let Some(c) = filter.category {
                params.push(("category", format!("eq.{}", c.as_str())));
            }
        }
        if let Some(term) = filter.search_term() {
            let term = sanitize_search(term);
            if !term.is_empty() {
                params.push(("or", format!("(title.ilike.*{term}*,content.ilike.*{term}*)")));
            }
        }
        params
    }
}

/// Strips characters PostgREST treats as syntax inside `or=(...)` lists.
pub fn sanitize_search(term: &str) -> String {
    term.chars()
        .filter(|c| !matches!(c, ',' | '(' | ')' | '*' | '%' | '"' | '\\' | ':'))
        .collect::<String>()
        .trim()
        .to_string()
}

#[derive(Debug, Default, Deserialize)]
struct PostgrestError {
    code: Option<String>,
    message: Option<String>,
    details: Option<String>,
}

/// Maps a failed PostgREST response onto the store taxonomy.
pub fn classify(status: StatusCode, body: &str) -> StoreError {
    let parsed: PostgrestError = serde_json::from_str(body).unwrap_or_default();
    let code = parsed.code.unwrap_or_default();
    let message = parsed
        .message
        .or(parsed.details)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string());

    if code == "42P17" || message.to_lowercase().contains("infinite recursion") {
        return StoreError::PolicyRecursion(message);
    }
    if code == "42501" || status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return StoreError::PermissionDenied(message);
    }
    if code == "23505" || status == StatusCode::CONFLICT {
        return StoreError::Duplicate;
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return StoreError::RateLimited(message);
    }
    if code.starts_with("22") || code == "23502" || code == "23514" || status == StatusCode::BAD_REQUEST {
        return StoreError::Invalid(message);
    }
    if status == StatusCode::NOT_FOUND {
        return StoreError::NotFound;
    }
    if matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    ) {
        return StoreError::Unavailable(message);
    }
    StoreError::Other(format!("{status}: {message}"))
}

fn transport_error(e: reqwest::Error) -> StoreError {
    if e.is_connect() || e.is_timeout() {
        StoreError::Unavailable(e.to_string())
    } else {
        StoreError::Other(e.to_string())
    }
}

fn parse_total(content_range: &str) -> Option<u64> {
    // "0-9/42" or "*/42"
    content_range.rsplit('/').next()?.trim().parse().ok()
}

#[async_trait]
impl ThreadStore for RestStore {
    async fn threads_with_authors(&self, filter: &FeedFilter) -> StoreResult<Vec<Authored<Thread>>> {
        let params = Self::listing_params(format!("*,{AUTHOR_EMBED}"), filter, true);
        self.select("threads", &params).await
    }

    async fn threads(&self, filter: &FeedFilter) -> StoreResult<Vec<Thread>> {
        let params = Self::listing_params("*".into(), filter, true);
        self.select("threads", &params).await
    }

    async fn create_thread(&self, new: NewThread) -> StoreResult<Thread> {
        self.insert_returning("threads", &new).await
    }
}

#[async_trait]
impl PrayerStore for RestStore {
    async fn prayers_with_authors(&self, filter: &FeedFilter) -> StoreResult<Vec<Authored<Prayer>>> {
        let params = Self::listing_params(format!("*,{AUTHOR_EMBED}"), filter, false);
        self.select("prayers", &params).await
    }

    async fn prayers(&self, filter: &FeedFilter) -> StoreResult<Vec<Prayer>> {
        let params = Self::listing_params("*".into(), filter, false);
        self.select("prayers", &params).await
    }

    async fn create_prayer(&self, new: NewPrayer) -> StoreResult<Prayer> {
        self.insert_returning("prayers", &new).await
    }
}

#[async_trait]
impl CommentStore for RestStore {
    async fn comments_with_authors(&self, thread_id: Id) -> StoreResult<Vec<Authored<Comment>>> {
        let params: Params = vec![
            ("select", format!("*,{AUTHOR_EMBED}")),
            ("thread_id", format!("eq.{thread_id}")),
            ("order", "created_at.asc".into()),
        ];
        self.select("comments", &params).await
    }

    async fn comments(&self, thread_id: Id) -> StoreResult<Vec<Comment>> {
        let params: Params = vec![
            ("select", "*".into()),
            ("thread_id", format!("eq.{thread_id}")),
            ("order", "created_at.asc".into()),
        ];
        self.select("comments", &params).await
    }

    async fn create_comment(&self, new: NewComment) -> StoreResult<()> {
        self.insert("comments", &new, &Vec::new(), "return=minimal").await?;
        Ok(())
    }
}

#[async_trait]
impl UserStore for RestStore {
    async fn users_by_ids(&self, ids: &[Id]) -> StoreResult<Vec<UserProfile>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let list = ids.iter().map(Id::to_string).collect::<Vec<_>>().join(",");
        let params: Params = vec![("select", USER_COLUMNS.into()), ("id", format!("in.({list})"))];
        self.select("users", &params).await
    }

    async fn notification_preferences(&self, user_id: Id) -> StoreResult<Option<NotificationPreferences>> {
        let params: Params = vec![
            ("select", "*".into()),
            ("user_id", format!("eq.{user_id}")),
            ("limit", "1".into()),
        ];
        let rows: Vec<NotificationPreferences> = self.select("notification_preferences", &params).await?;
        Ok(rows.into_iter().next())
    }

    async fn save_notification_preferences(&self, prefs: NotificationPreferences) -> StoreResult<NotificationPreferences> {
        let params: Params = vec![("on_conflict", "user_id".into())];
        let resp = self
            .insert(
                "notification_preferences",
                &prefs,
                &params,
                "resolution=merge-duplicates,return=representation",
            )
            .await?;
        let rows = resp
            .json::<Vec<NotificationPreferences>>()
            .await
            .map_err(|e| StoreError::Other(e.to_string()))?;
        Ok(rows.into_iter().next().unwrap_or(prefs))
    }
}

#[async_trait]
impl MembershipStore for RestStore {
    async fn membership_ids(&self, kind: MembershipKind, user_id: Id) -> StoreResult<Vec<Id>> {
        let col = kind.target_column();
        let params: Params = vec![("select", col.into()), ("user_id", format!("eq.{user_id}"))];
        let rows: Vec<Value> = self.select(kind.table(), &params).await?;
        Ok(rows
            .iter()
            .filter_map(|r| r.get(col).and_then(Value::as_str).and_then(|s| s.parse().ok()))
            .collect())
    }

    async fn has_membership(&self, kind: MembershipKind, user_id: Id, target: Id) -> StoreResult<bool> {
        let params: Params = vec![
            ("select", "user_id".into()),
            ("user_id", format!("eq.{user_id}")),
            (kind.target_column(), format!("eq.{target}")),
            ("limit", "1".into()),
        ];
        let rows: Vec<Value> = self.select(kind.table(), &params).await?;
        Ok(!rows.is_empty())
    }

    async fn add_membership(&self, kind: MembershipKind, user_id: Id, target: Id) -> StoreResult<()> {
        let mut body = serde_json::Map::new();
        body.insert("user_id".into(), json!(user_id));
        body.insert(kind.target_column().into(), json!(target));
        self.insert(kind.table(), &Value::Object(body), &Vec::new(), "return=minimal").await?;
        Ok(())
    }

    async fn remove_membership(&self, kind: MembershipKind, user_id: Id, target: Id) -> StoreResult<()> {
        let params: Params = vec![
            ("user_id", format!("eq.{user_id}")),
            (kind.target_column(), format!("eq.{target}")),
        ];
        Self::send(self.request(Method::DELETE, kind.table()).query(&params)).await?;
        Ok(())
    }

    async fn count(&self, target: CountTarget) -> StoreResult<u64> {
        let (table, params): (&str, Params) = match target {
            CountTarget::Memberships(kind, id) => {
                (kind.table(), vec![("select", "*".into()), (kind.target_column(), format!("eq.{id}"))])
            }
            CountTarget::Comments(id) => ("comments", vec![("select", "*".into()), ("thread_id", format!("eq.{id}"))]),
        };
        let resp = Self::send(
            self.request(Method::HEAD, table)
                .query(&params)
                .header("Prefer", "count=exact"),
        )
        .await?;
        resp.headers()
            .get(header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_total)
            .ok_or_else(|| StoreError::Other(format!("no exact count for {table}")))
    }
}

#[async_trait]
impl SiteStore for RestStore {
    async fn subscribe_newsletter(&self, signup: NewsletterSignup) -> StoreResult<()> {
        self.insert("newsletter_subscribers", &signup, &Vec::new(), "return=minimal").await?;
        Ok(())
    }

    async fn save_contact_message(&self, msg: ContactMessage) -> StoreResult<()> {
        self.insert("contact_messages", &msg, &Vec::new(), "return=minimal").await?;
        Ok(())
    }

    async fn file_report(&self, report: Report) -> StoreResult<()> {
        self.insert("reports", &report, &Vec::new(), "return=minimal").await?;
        Ok(())
    }

    async fn create_order(&self, order: NewOrder) -> StoreResult<Order> {
        let row = json!({
            "email": order.email,
            "total_amount": order.total_amount,
            "currency": order.currency,
            "stripe_payment_intent_id": order.stripe_payment_intent_id,
            "status": PaymentStatus::Pending,
        });
        let created: Order = self.insert_returning("orders", &row).await?;
        let items: Vec<Value> = order
            .items
            .iter()
            .map(|i| {
                json!({
                    "order_id": created.id,
                    "product_id": i.product_id,
                    "name": i.name,
                    "unit_amount": i.unit_amount,
                    "quantity": i.quantity,
                })
            })
            .collect();
        if !items.is_empty() {
            self.insert("order_items", &items, &Vec::new(), "return=minimal").await?;
        }
        Ok(created)
    }

    async fn record_payment(&self, record: PaymentRecord) -> StoreResult<()> {
        match record.kind {
            PaymentKind::Donation => {
                let params: Params = vec![("on_conflict", "stripe_payment_intent_id".into())];
                let row = json!({
                    "stripe_payment_intent_id": record.stripe_payment_intent_id,
                    "amount": record.amount,
                    "currency": record.currency,
                    "status": record.status,
                    "donor_name": record.donor_name,
                    "donor_email": record.donor_email,
                });
                self.insert("donations", &row, &params, "resolution=merge-duplicates,return=minimal")
                    .await?;
            }
            PaymentKind::Order => {
                let params: Params = vec![(
                    "stripe_payment_intent_id",
                    format!("eq.{}", record.stripe_payment_intent_id),
                )];
                Self::send(
                    self.request(Method::PATCH, "orders")
                        .query(&params)
                        .json(&json!({ "status": record.status })),
                )
                .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_policy_recursion_by_code_and_message() {
        let body = r#"{"code":"42P17","message":"infinite recursion detected in policy for relation \"users\""}"#;
        assert!(matches!(classify(StatusCode::INTERNAL_SERVER_ERROR, body), StoreError::PolicyRecursion(_)));
        let body = r#"{"message":"infinite recursion detected"}"#;
        assert!(matches!(classify(StatusCode::BAD_REQUEST, body), StoreError::PolicyRecursion(_)));
    }

    #[test]
    fn classifies_common_statuses() {
        assert!(matches!(classify(StatusCode::FORBIDDEN, ""), StoreError::PermissionDenied(_)));
        assert_eq!(classify(StatusCode::CONFLICT, r#"{"code":"23505"}"#), StoreError::Duplicate);
        assert!(matches!(classify(StatusCode::TOO_MANY_REQUESTS, ""), StoreError::RateLimited(_)));
        assert!(matches!(classify(StatusCode::SERVICE_UNAVAILABLE, ""), StoreError::Unavailable(_)));
        assert!(matches!(classify(StatusCode::BAD_REQUEST, r#"{"code":"22P02"}"#), StoreError::Invalid(_)));
    }

    #[test]
    fn content_range_total() {
        assert_eq!(parse_total("0-9/42"), Some(42));
        assert_eq!(parse_total("*/0"), Some(0));
        assert_eq!(parse_total("*/*"), None);
    }

    #[test]
    fn search_sanitizer_drops_filter_syntax() {
        assert_eq!(sanitize_search(" heal(ing), *now* "), "healing now");
    }
}
