use crate::models::{
    ContactMessage, NewReport, NewsletterSignup, NotificationPreferences, OrderItem, PaymentKind, PaymentStatus,
    ReportTarget,
};
use crate::payments::{IntentRequest, IntentResponse};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::health,
        crate::routes::create_payment_intent,
        crate::routes::payment_webhook,
        crate::routes::subscribe_newsletter,
        crate::routes::send_contact_message,
        crate::routes::file_report,
        crate::routes::get_notification_preferences,
        crate::routes::update_notification_preferences,
    ),
    components(schemas(
        IntentRequest, IntentResponse, OrderItem, PaymentKind, PaymentStatus,
        NewsletterSignup, ContactMessage, NewReport, ReportTarget, NotificationPreferences,
        crate::routes::HealthResponse, crate::routes::WebhookAck, crate::routes::PreferencesUpdate
    )),
    tags(
        (name = "payments", description = "Donations and merchandise checkout"),
        (name = "site", description = "Newsletter, contact and reports"),
        (name = "account", description = "Per-user settings"),
    )
)]
pub struct ApiDoc;
