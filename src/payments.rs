//! Stripe payment intents and webhook verification.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, warn};
use utoipa::ToSchema;

use crate::models::*;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "Stripe-Signature";
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;
pub const DEFAULT_API_BASE: &str = "https://api.stripe.com";

/// Smallest donation Stripe will settle in USD, in cents.
pub const MIN_AMOUNT: i64 = 50;
pub const MAX_AMOUNT: i64 = 99_999_999;
pub const CURRENCIES: &[&str] = &["usd", "cad", "eur", "gbp"];

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PaymentError {
    #[error("invalid payment request: {0}")]
    Invalid(String),
    #[error("payments are not configured")]
    NotConfigured,
    #[error("payment provider rejected the request: {0}")]
    Provider(String),
    #[error("payment provider unavailable: {0}")]
    Unavailable(String),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum WebhookError {
    #[error("missing signature header")]
    MissingSignature,
    #[error("malformed signature header")]
    MalformedSignature,
    #[error("signature timestamp outside tolerance")]
    StaleTimestamp,
    #[error("signature mismatch")]
    BadSignature,
    #[error("invalid event payload: {0}")]
    InvalidPayload(String),
}

fn default_currency() -> String {
    "usd".into()
}

/// Body of `POST /payments/intent`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum IntentRequest {
    Donation {
        /// Minor units.
        amount: i64,
        #[serde(default = "default_currency")]
        currency: String,
        donor_name: Option<String>,
        donor_email: Option<String>,
    },
    Order {
        email: Option<String>,
        items: Vec<OrderItem>,
        #[serde(default = "default_currency")]
        currency: String,
    },
}

/// A validated request, ready for the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct IntentParams {
    pub kind: PaymentKind,
    pub amount: i64,
    pub currency: String,
    pub metadata: Vec<(String, String)>,
}

impl IntentRequest {
    pub fn kind(&self) -> PaymentKind {
        match self {
            IntentRequest::Donation { .. } => PaymentKind::Donation,
            IntentRequest::Order { .. } => PaymentKind::Order,
        }
    }

    /// Order totals are always computed here from the line items, never taken from the client.
    pub fn validate(&self) -> Result<IntentParams, PaymentError> {
        let (amount, currency, mut metadata) = match self {
            IntentRequest::Donation { amount, currency, donor_name, donor_email } => {
                let mut meta = Vec::new();
                if let Some(name) = donor_name.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
                    meta.push(("donor_name".to_string(), name.to_string()));
                }
                if let Some(email) = donor_email.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
                    check_email(email)?;
                    meta.push(("donor_email".to_string(), email.to_string()));
                }
                (*amount, currency, meta)
            }
            IntentRequest::Order { email, items, currency } => {
                if items.is_empty() {
                    return Err(PaymentError::Invalid("order has no items".into()));
                }
                let mut total: i64 = 0;
                for item in items {
                    if item.quantity == 0 || item.unit_amount <= 0 {
                        return Err(PaymentError::Invalid(format!("invalid line item {}", item.product_id)));
                    }
                    total = item
                        .unit_amount
                        .checked_mul(i64::from(item.quantity))
                        .and_then(|line| total.checked_add(line))
                        .ok_or_else(|| PaymentError::Invalid("order total overflows".into()))?;
                }
                let mut meta = Vec::new();
                if let Some(email) = email.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
                    check_email(email)?;
                    meta.push(("donor_email".to_string(), email.to_string()));
                }
                (total, currency, meta)
            }
        };
        if !(MIN_AMOUNT..=MAX_AMOUNT).contains(&amount) {
            return Err(PaymentError::Invalid(format!("amount must be between {MIN_AMOUNT} and {MAX_AMOUNT}")));
        }
        let currency = currency.trim().to_ascii_lowercase();
        if !CURRENCIES.contains(&currency.as_str()) {
            return Err(PaymentError::Invalid(format!("unsupported currency {currency}")));
        }
        let kind = self.kind();
        metadata.push(("kind".to_string(), kind_str(kind).to_string()));
        Ok(IntentParams { kind, amount, currency, metadata })
    }
}

fn kind_str(kind: PaymentKind) -> &'static str {
    match kind {
        PaymentKind::Donation => "donation",
        PaymentKind::Order => "order",
    }
}

pub(crate) fn check_email(email: &str) -> Result<(), PaymentError> {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(PaymentError::Invalid("invalid email address".into())),
    }
}

/// What the provider returns for a freshly created intent.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CreatedIntent {
    pub id: String,
    pub client_secret: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct IntentResponse {
    pub client_secret: String,
    pub payment_intent_id: String,
    pub amount: i64,
    pub currency: String,
    pub order_id: Option<Id>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_intent(&self, params: &IntentParams) -> Result<CreatedIntent, PaymentError>;
}

pub struct StripeGateway {
    http: reqwest::Client,
    api_base: String,
    secret_key: String,
}

#[derive(Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Deserialize)]
struct StripeErrorDetail {
    #[serde(default)]
    message: Option<String>,
}

impl StripeGateway {
    pub fn new(api_base: impl Into<String>, secret_key: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .unwrap_or_default();
        Self { http, api_base: api_base.into().trim_end_matches('/').to_string(), secret_key: secret_key.into() }
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_intent(&self, params: &IntentParams) -> Result<CreatedIntent, PaymentError> {
        let mut form: Vec<(String, String)> = vec![
            ("amount".into(), params.amount.to_string()),
            ("currency".into(), params.currency.clone()),
            ("automatic_payment_methods[enabled]".into(), "true".into()),
        ];
        if let Some((_, email)) = params.metadata.iter().find(|(k, _)| k == "donor_email") {
            form.push(("receipt_email".into(), email.clone()));
        }
        form.extend(params.metadata.iter().map(|(k, v)| (format!("metadata[{k}]"), v.clone())));

        let resp = self
            .http
            .post(format!("{}/v1/payment_intents", self.api_base))
            .bearer_auth(&self.secret_key)
            .form(&form)
            .send()
            .await
            .map_err(|e| PaymentError::Unavailable(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp
                .json::<StripeErrorBody>()
                .await
                .ok()
                .and_then(|b| b.error.message)
                .unwrap_or_else(|| status.to_string());
            warn!(%status, %message, "stripe rejected payment intent");
            return Err(if status.is_server_error() {
                PaymentError::Unavailable(message)
            } else {
                PaymentError::Provider(message)
            });
        }
        resp.json::<CreatedIntent>()
            .await
            .map_err(|e| PaymentError::Provider(format!("unexpected response: {e}")))
    }
}

fn mac_for(secret: &str, timestamp: i64, payload: &[u8]) -> Result<HmacSha256, WebhookError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| WebhookError::MalformedSignature)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Builds a `Stripe-Signature` header value for `payload`.
pub fn signature_header(payload: &[u8], secret: &str, timestamp: i64) -> Result<String, WebhookError> {
    let sig = mac_for(secret, timestamp, payload)?.finalize().into_bytes();
    Ok(format!("t={timestamp},v1={}", hex::encode(sig)))
}

/// Checks a `Stripe-Signature` header against the raw request body.
///
/// Any `v1` entry may match (Stripe sends several while a secret is rolled).
/// `now` is unix seconds.
pub fn verify_signature(payload: &[u8], header: &str, secret: &str, tolerance_secs: i64, now: i64) -> Result<(), WebhookError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else { continue };
        match key {
            "t" => timestamp = Some(value.parse::<i64>().map_err(|_| WebhookError::MalformedSignature)?),
            "v1" => {
                if let Ok(bytes) = hex::decode(value) {
                    signatures.push(bytes);
                }
            }
            _ => {}
        }
    }
    let timestamp = timestamp.ok_or(WebhookError::MalformedSignature)?;
    if signatures.is_empty() {
        return Err(WebhookError::MalformedSignature);
    }
    // abs_diff cannot overflow on extreme header timestamps
    if now.abs_diff(timestamp) > u64::try_from(tolerance_secs).unwrap_or(0) {
        return Err(WebhookError::StaleTimestamp);
    }
    let mac = mac_for(secret, timestamp, payload)?;
    if signatures.iter().any(|sig| mac.clone().verify_slice(sig).is_ok()) {
        Ok(())
    } else {
        Err(WebhookError::BadSignature)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct IntentObject {
    id: String,
    amount: i64,
    currency: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

impl WebhookEvent {
    pub fn parse(payload: &[u8]) -> Result<Self, WebhookError> {
        serde_json::from_slice(payload).map_err(|e| WebhookError::InvalidPayload(e.to_string()))
    }

    /// The payment outcome this event reports; `None` for events we don't act on.
    pub fn payment_record(&self) -> Result<Option<PaymentRecord>, WebhookError> {
        let status = match self.event_type.as_str() {
            "payment_intent.succeeded" => PaymentStatus::Succeeded,
            "payment_intent.payment_failed" => PaymentStatus::Failed,
            other => {
                debug!(event = %self.id, event_type = other, "ignoring webhook event");
                return Ok(None);
            }
        };
        let intent: IntentObject = serde_json::from_value(self.data.object.clone())
            .map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;
        let kind = match intent.metadata.get("kind").map(String::as_str) {
            Some("order") => PaymentKind::Order,
            _ => PaymentKind::Donation,
        };
        Ok(Some(PaymentRecord {
            stripe_payment_intent_id: intent.id,
            kind,
            amount: intent.amount,
            currency: intent.currency,
            status,
            donor_name: intent.metadata.get("donor_name").cloned(),
            donor_email: intent.metadata.get("donor_email").cloned(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";

    #[test]
    fn extreme_timestamps_are_stale_not_a_panic() {
        let now = 1_700_000_000;
        for t in [i64::MIN, i64::MAX] {
            let header = format!("t={t},v1=00");
            assert_eq!(verify_signature(b"{}", &header, SECRET, 300, now), Err(WebhookError::StaleTimestamp));
        }
    }

    #[test]
    fn signature_round_trip_and_tamper() {
        let body = br#"{"id":"evt_1"}"#;
        let header = signature_header(body, SECRET, 1_700_000_000).unwrap();
        assert_eq!(verify_signature(body, &header, SECRET, 300, 1_700_000_100), Ok(()));
        assert_eq!(
            verify_signature(br#"{"id":"evt_2"}"#, &header, SECRET, 300, 1_700_000_100),
            Err(WebhookError::BadSignature)
        );
        assert_eq!(verify_signature(body, &header, "other", 300, 1_700_000_100), Err(WebhookError::BadSignature));
    }

    #[test]
    fn old_timestamps_are_rejected() {
        let body = b"{}";
        let header = signature_header(body, SECRET, 1_700_000_000).unwrap();
        assert_eq!(verify_signature(body, &header, SECRET, 300, 1_700_000_301), Err(WebhookError::StaleTimestamp));
    }

    #[test]
    fn malformed_headers() {
        assert_eq!(verify_signature(b"{}", "v1=abcd", SECRET, 300, 0), Err(WebhookError::MalformedSignature));
        assert_eq!(verify_signature(b"{}", "t=5", SECRET, 300, 5), Err(WebhookError::MalformedSignature));
        assert_eq!(verify_signature(b"{}", "t=abc,v1=00", SECRET, 300, 5), Err(WebhookError::MalformedSignature));
    }

    #[test]
    fn any_v1_entry_may_match() {
        let body = b"{}";
        let good = signature_header(body, SECRET, 10).unwrap();
        let good_sig = good.split_once("v1=").unwrap().1;
        let header = format!("t=10,v1={},v1={good_sig}", "00".repeat(32));
        assert_eq!(verify_signature(body, &header, SECRET, 300, 10), Ok(()));
    }

    #[test]
    fn order_total_comes_from_items() {
        let req = IntentRequest::Order {
            email: Some("anna@example.org".into()),
            currency: "USD".into(),
            items: vec![
                OrderItem { product_id: "mug".into(), name: "Mug".into(), unit_amount: 1500, quantity: 2 },
                OrderItem { product_id: "cd".into(), name: "CD".into(), unit_amount: 1000, quantity: 1 },
            ],
        };
        let params = req.validate().unwrap();
        assert_eq!(params.amount, 4000);
        assert_eq!(params.currency, "usd");
        assert!(params.metadata.contains(&("kind".to_string(), "order".to_string())));
    }

    #[test]
    fn donation_bounds_and_currency() {
        let donation = |amount: i64, currency: &str| IntentRequest::Donation {
            amount,
            currency: currency.into(),
            donor_name: None,
            donor_email: None,
        };
        assert!(donation(2500, "usd").validate().is_ok());
        assert!(matches!(donation(10, "usd").validate(), Err(PaymentError::Invalid(_))));
        assert!(matches!(donation(2500, "xyz").validate(), Err(PaymentError::Invalid(_))));
    }

    #[test]
    fn succeeded_event_becomes_record() {
        let payload = serde_json::json!({
            "id": "evt_1",
            "type": "payment_intent.succeeded",
            "data": {"object": {
                "id": "pi_123", "amount": 2500, "currency": "usd",
                "metadata": {"kind": "donation", "donor_name": "Lydia", "donor_email": "lydia@example.org"}
            }}
        });
        let event = WebhookEvent::parse(payload.to_string().as_bytes()).unwrap();
        let record = event.payment_record().unwrap().unwrap();
        assert_eq!(record.stripe_payment_intent_id, "pi_123");
        assert_eq!(record.status, PaymentStatus::Succeeded);
        assert_eq!(record.kind, PaymentKind::Donation);
        assert_eq!(record.donor_name.as_deref(), Some("Lydia"));
    }

    #[test]
    fn unrelated_events_are_ignored() {
        let payload = br#"{"id":"evt_2","type":"charge.refunded","data":{"object":{}}}"#;
        let event = WebhookEvent::parse(payload).unwrap();
        assert_eq!(event.payment_record().unwrap(), None);
    }
}
