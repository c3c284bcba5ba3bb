use std::sync::Arc;

use actix_web::{web, HttpRequest, HttpResponse};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::Auth;
use crate::error::ApiError;
use crate::models::*;
use crate::payments::{self, IntentRequest, IntentResponse, PaymentGateway, WebhookEvent};
use crate::rate_limit::RateLimiterFacade;
use crate::store::{Store, StoreError};

const MAX_NAME_CHARS: usize = 120;
const MAX_SUBJECT_CHARS: usize = 200;
const MAX_MESSAGE_CHARS: usize = 5000;
const MAX_REASON_CHARS: usize = 1000;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(web::resource("/health").route(web::get().to(health)))
            .service(web::resource("/payments/intent").route(web::post().to(create_payment_intent)))
            .service(web::resource("/payments/webhook").route(web::post().to(payment_webhook)))
            .service(web::resource("/newsletter").route(web::post().to(subscribe_newsletter)))
            .service(web::resource("/contact").route(web::post().to(send_contact_message)))
            .service(web::resource("/reports").route(web::post().to(file_report)))
            .service(
                web::resource("/me/notifications")
                    .route(web::get().to(get_notification_preferences))
                    .route(web::put().to(update_notification_preferences)),
            ),
    );
    // scrape endpoint lives outside the versioned api
    cfg.route("/metrics", web::get().to(metrics));
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    /// `None` when no Stripe key is configured.
    pub payments: Option<Arc<dyn PaymentGateway>>,
    pub webhook_secret: Option<String>,
    pub limiter: RateLimiterFacade,
}

fn client_ip(req: &HttpRequest) -> String {
    req.connection_info().realip_remote_addr().unwrap_or("unknown").to_string()
}

fn required_text(field: &str, value: &str, max: usize) -> Result<String, ApiError> {
    let v = value.trim();
    if v.is_empty() {
        return Err(ApiError::BadRequest(format!("{field} is required")));
    }
    if v.chars().count() > max {
        return Err(ApiError::BadRequest(format!("{field} must be at most {max} characters")));
    }
    Ok(v.to_string())
}

fn valid_email(value: &str) -> Result<String, ApiError> {
    let email = required_text("email", value, 320)?.to_ascii_lowercase();
    payments::check_email(&email)?;
    Ok(email)
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

#[utoipa::path(
    get,
    path = "/api/v1/health",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse { status: "ok".into() })
}

/// Prometheus scrape; 503 when no recorder could be installed.
pub async fn metrics(handle: Option<web::Data<PrometheusHandle>>) -> Result<HttpResponse, ApiError> {
    let handle = handle.ok_or(ApiError::Unavailable)?;
    Ok(HttpResponse::Ok().content_type("text/plain; version=0.0.4").body(handle.render()))
}

#[utoipa::path(
    post,
    path = "/api/v1/payments/intent",
    request_body = IntentRequest,
    responses(
        (status = 201, description = "Payment intent created", body = IntentResponse),
        (status = 400, description = "Invalid amount, currency or items"),
        (status = 429, description = "Too many requests"),
        (status = 503, description = "Payments not configured or provider unavailable")
    )
)]
pub async fn create_payment_intent(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<IntentRequest>,
) -> Result<HttpResponse, ApiError> {
    let gateway = data.payments.as_ref().ok_or(ApiError::Unavailable)?;
    if !data.limiter.allow_form(&client_ip(&req)) {
        return Err(ApiError::TooManyRequests);
    }
    let request = payload.into_inner();
    let params = request.validate()?;
    let intent = gateway.create_intent(&params).await?;
    log::info!("payment intent {} created ({} {})", intent.id, params.amount, params.currency);

    let order_id = match request {
        IntentRequest::Order { email, items, .. } => {
            let order = data
                .store
                .create_order(NewOrder {
                    email,
                    total_amount: params.amount,
                    currency: params.currency.clone(),
                    stripe_payment_intent_id: intent.id.clone(),
                    items,
                })
                .await
                .map_err(|e| {
                    log::error!("order insert for intent {} failed: {e}", intent.id);
                    ApiError::from(e)
                })?;
            Some(order.id)
        }
        IntentRequest::Donation { .. } => None,
    };
    Ok(HttpResponse::Created().json(IntentResponse {
        client_secret: intent.client_secret,
        payment_intent_id: intent.id,
        amount: params.amount,
        currency: params.currency,
        order_id,
    }))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
}

#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    responses(
        (status = 200, description = "Event accepted", body = WebhookAck),
        (status = 400, description = "Missing or invalid signature"),
        (status = 503, description = "Webhook secret not configured")
    )
)]
pub async fn payment_webhook(
    req: HttpRequest,
    data: web::Data<AppState>,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    let Some(secret) = data.webhook_secret.as_deref() else {
        log::error!("webhook received but STRIPE_WEBHOOK_SECRET is not configured");
        return Err(ApiError::Unavailable);
    };
    let header = req
        .headers()
        .get(payments::SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or(payments::WebhookError::MissingSignature)?;
    let now = chrono::Utc::now().timestamp();
    if let Err(e) = payments::verify_signature(&body, header, secret, payments::SIGNATURE_TOLERANCE_SECS, now) {
        log::warn!("rejected webhook delivery: {e}");
        metrics::counter!("webhook_events_total", "outcome" => "rejected").increment(1);
        return Err(e.into());
    }

    let event = WebhookEvent::parse(&body)?;
    let Some(record) = event.payment_record()? else {
        metrics::counter!("webhook_events_total", "outcome" => "ignored").increment(1);
        return Ok(HttpResponse::Ok().json(WebhookAck { received: true }));
    };
    log::info!(
        "webhook {} ({}): intent {} is {:?}",
        event.id,
        event.event_type,
        record.stripe_payment_intent_id,
        record.status
    );
    data.store.record_payment(record).await.map_err(|e| {
        log::error!("recording payment for event {} failed: {e}", event.id);
        ApiError::from(e)
    })?;
    metrics::counter!("webhook_events_total", "outcome" => "recorded").increment(1);
    Ok(HttpResponse::Ok().json(WebhookAck { received: true }))
}

#[utoipa::path(
    post,
    path = "/api/v1/newsletter",
    request_body = NewsletterSignup,
    responses(
        (status = 200, description = "Subscribed (also when already subscribed)"),
        (status = 400, description = "Invalid email"),
        (status = 429, description = "Too many requests")
    )
)]
pub async fn subscribe_newsletter(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<NewsletterSignup>,
) -> Result<HttpResponse, ApiError> {
    if !data.limiter.allow_form(&client_ip(&req)) {
        return Err(ApiError::TooManyRequests);
    }
    let signup = payload.into_inner();
    let email = valid_email(&signup.email)?;
    let name = signup.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
    match data.store.subscribe_newsletter(NewsletterSignup { email, name }).await {
        Ok(()) | Err(StoreError::Duplicate) => {}
        Err(e) => return Err(e.into()),
    }
    Ok(HttpResponse::Ok().json(serde_json::json!({ "subscribed": true })))
}

#[utoipa::path(
    post,
    path = "/api/v1/contact",
    request_body = ContactMessage,
    responses(
        (status = 201, description = "Message stored"),
        (status = 400, description = "Missing or oversized fields"),
        (status = 429, description = "Too many requests")
    )
)]
pub async fn send_contact_message(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<ContactMessage>,
) -> Result<HttpResponse, ApiError> {
    if !data.limiter.allow_form(&client_ip(&req)) {
        return Err(ApiError::TooManyRequests);
    }
    let msg = payload.into_inner();
    let subject = match msg.subject.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => Some(required_text("subject", s, MAX_SUBJECT_CHARS)?),
        None => None,
    };
    let clean = ContactMessage {
        name: required_text("name", &msg.name, MAX_NAME_CHARS)?,
        email: valid_email(&msg.email)?,
        subject,
        message: required_text("message", &msg.message, MAX_MESSAGE_CHARS)?,
    };
    data.store.save_contact_message(clean).await?;
    Ok(HttpResponse::Created().finish())
}

#[utoipa::path(
    post,
    path = "/api/v1/reports",
    request_body = NewReport,
    responses(
        (status = 201, description = "Report filed"),
        (status = 400, description = "Missing reason"),
        (status = 401, description = "Sign-in required")
    )
)]
pub async fn file_report(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<NewReport>,
) -> Result<HttpResponse, ApiError> {
    let new = payload.into_inner();
    let reason = required_text("reason", &new.reason, MAX_REASON_CHARS)?;
    data.store
        .file_report(Report { reporter_id: auth.0.id, target_id: new.target_id, target_kind: new.target_kind, reason })
        .await?;
    log::info!("report filed on {:?} {}", new.target_kind, new.target_id);
    Ok(HttpResponse::Created().finish())
}

/// Body of `PUT /me/notifications`; the user comes from the access token.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PreferencesUpdate {
    pub email_replies: bool,
    pub email_prayers: bool,
    pub weekly_digest: bool,
}

#[utoipa::path(
    get,
    path = "/api/v1/me/notifications",
    responses(
        (status = 200, description = "Current preferences (defaults when never saved)", body = NotificationPreferences),
        (status = 401, description = "Sign-in required")
    )
)]
pub async fn get_notification_preferences(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let prefs = data
        .store
        .notification_preferences(auth.0.id)
        .await?
        .unwrap_or_else(|| NotificationPreferences::defaults_for(auth.0.id));
    Ok(HttpResponse::Ok().json(prefs))
}

#[utoipa::path(
    put,
    path = "/api/v1/me/notifications",
    request_body = PreferencesUpdate,
    responses(
        (status = 200, description = "Saved preferences", body = NotificationPreferences),
        (status = 401, description = "Sign-in required")
    )
)]
pub async fn update_notification_preferences(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<PreferencesUpdate>,
) -> Result<HttpResponse, ApiError> {
    let update = payload.into_inner();
    let saved = data
        .store
        .save_notification_preferences(NotificationPreferences {
            user_id: auth.0.id,
            email_replies: update.email_replies,
            email_prayers: update.email_prayers,
            weekly_digest: update.weekly_digest,
        })
        .await?;
    Ok(HttpResponse::Ok().json(saved))
}
