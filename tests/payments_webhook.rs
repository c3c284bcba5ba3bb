#![cfg(feature = "inmem-store")]

use std::sync::{Arc, Mutex};

use actix_web::{test, web, App};
use async_trait::async_trait;
use fellowship::models::*;
use fellowship::payments::{
    signature_header, CreatedIntent, IntentParams, PaymentError, PaymentGateway, StripeGateway, SIGNATURE_HEADER,
};
use fellowship::rate_limit::{InMemoryRateLimiter, RateLimitConfig, RateLimiterFacade};
use fellowship::routes::{config, AppState};
use fellowship::store::inmem::InMemStore;
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const WEBHOOK_SECRET: &str = "whsec_route_test";

#[derive(Default)]
struct RecordingGateway {
    seen: Mutex<Vec<IntentParams>>,
}

#[async_trait]
impl PaymentGateway for RecordingGateway {
    async fn create_intent(&self, params: &IntentParams) -> Result<CreatedIntent, PaymentError> {
        let mut seen = self.seen.lock().unwrap();
        seen.push(params.clone());
        Ok(CreatedIntent { id: format!("pi_{}", seen.len()), client_secret: format!("pi_{}_secret", seen.len()) })
    }
}

fn state(store: &InMemStore, gateway: Option<Arc<dyn PaymentGateway>>, secret: Option<&str>) -> AppState {
    AppState {
        store: Arc::new(store.clone()),
        payments: gateway,
        webhook_secret: secret.map(str::to_string),
        limiter: RateLimiterFacade::new(InMemoryRateLimiter::new(false), RateLimitConfig::default()),
    }
}

fn event(event_type: &str, intent: &str, kind: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": "evt_1",
        "type": event_type,
        "data": {"object": {
            "id": intent, "amount": 2500, "currency": "usd",
            "metadata": {"kind": kind, "donor_name": "Hannah"}
        }}
    }))
    .unwrap()
}

fn signed(body: &[u8]) -> String {
    signature_header(body, WEBHOOK_SECRET, chrono::Utc::now().timestamp()).unwrap()
}

#[actix_web::test]
async fn signed_success_event_records_donation_once() {
    let store = InMemStore::new();
    let app = test::init_service(
        App::new().app_data(web::Data::new(state(&store, None, Some(WEBHOOK_SECRET)))).configure(config),
    )
    .await;

    let body = event("payment_intent.succeeded", "pi_abc", "donation");
    for _ in 0..2 {
        let req = test::TestRequest::post()
            .uri("/api/v1/payments/webhook")
            .insert_header((SIGNATURE_HEADER, signed(&body)))
            .set_payload(body.clone())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
    }
    let payments = store.payments();
    assert_eq!(payments.len(), 1, "redelivery is idempotent");
    assert_eq!(payments[0].status, PaymentStatus::Succeeded);
    assert_eq!(payments[0].donor_name.as_deref(), Some("Hannah"));
}

#[actix_web::test]
async fn bad_or_missing_signature_is_rejected() {
    let store = InMemStore::new();
    let app = test::init_service(
        App::new().app_data(web::Data::new(state(&store, None, Some(WEBHOOK_SECRET)))).configure(config),
    )
    .await;
    let body = event("payment_intent.succeeded", "pi_abc", "donation");

    let forged = signature_header(&body, "whsec_other", chrono::Utc::now().timestamp()).unwrap();
    let req = test::TestRequest::post()
        .uri("/api/v1/payments/webhook")
        .insert_header((SIGNATURE_HEADER, forged))
        .set_payload(body.clone())
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);

    let req = test::TestRequest::post().uri("/api/v1/payments/webhook").set_payload(body).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);
    assert!(store.payments().is_empty());
}

#[actix_web::test]
async fn webhook_without_secret_is_unavailable() {
    let store = InMemStore::new();
    let app = test::init_service(App::new().app_data(web::Data::new(state(&store, None, None))).configure(config)).await;
    let body = event("payment_intent.succeeded", "pi_abc", "donation");
    let req = test::TestRequest::post()
        .uri("/api/v1/payments/webhook")
        .insert_header((SIGNATURE_HEADER, signed(&body)))
        .set_payload(body)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 503);
}

#[actix_web::test]
async fn unrelated_events_are_acknowledged_and_ignored() {
    let store = InMemStore::new();
    let app = test::init_service(
        App::new().app_data(web::Data::new(state(&store, None, Some(WEBHOOK_SECRET)))).configure(config),
    )
    .await;
    let body = event("customer.created", "cus_1", "donation");
    let req = test::TestRequest::post()
        .uri("/api/v1/payments/webhook")
        .insert_header((SIGNATURE_HEADER, signed(&body)))
        .set_payload(body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let v: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(v["received"], true);
    assert!(store.payments().is_empty());
}

#[actix_web::test]
async fn order_intent_totals_server_side_and_settles_on_webhook() {
    let store = InMemStore::new();
    let gateway = Arc::new(RecordingGateway::default());
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state(&store, Some(gateway.clone() as Arc<dyn PaymentGateway>), Some(WEBHOOK_SECRET))))
            .configure(config),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/v1/payments/intent")
        .set_json(json!({
            "kind": "order",
            "email": "buyer@example.org",
            "items": [
                {"product_id": "tee", "name": "Shirt", "unit_amount": 1500, "quantity": 2},
                {"product_id": "mug", "name": "Mug", "unit_amount": 1000, "quantity": 1}
            ]
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let v: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(v["amount"], 4000);
    assert_eq!(v["client_secret"], "pi_1_secret");
    assert!(v["order_id"].is_string());

    assert_eq!(gateway.seen.lock().unwrap()[0].amount, 4000);
    let orders = store.orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].status, PaymentStatus::Pending);

    let body = event("payment_intent.succeeded", "pi_1", "order");
    let req = test::TestRequest::post()
        .uri("/api/v1/payments/webhook")
        .insert_header((SIGNATURE_HEADER, signed(&body)))
        .set_payload(body)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);
    assert_eq!(store.orders()[0].status, PaymentStatus::Succeeded);
}

#[actix_web::test]
async fn intent_validation_and_missing_gateway() {
    let store = InMemStore::new();
    let gateway: Arc<dyn PaymentGateway> = Arc::new(RecordingGateway::default());
    let app = test::init_service(
        App::new().app_data(web::Data::new(state(&store, Some(gateway), None))).configure(config),
    )
    .await;
    let req = test::TestRequest::post()
        .uri("/api/v1/payments/intent")
        .set_json(json!({"kind": "donation", "amount": 10}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);

    let app = test::init_service(App::new().app_data(web::Data::new(state(&store, None, None))).configure(config)).await;
    let req = test::TestRequest::post()
        .uri("/api/v1/payments/intent")
        .set_json(json!({"kind": "donation", "amount": 2500}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 503);
}

#[tokio::test]
async fn stripe_gateway_posts_form_and_maps_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payment_intents"))
        .and(header("Authorization", "Bearer sk_test_123"))
        .and(body_string_contains("amount=2500"))
        .and(body_string_contains("receipt_email=hannah%40example.org"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "pi_live", "client_secret": "pi_live_secret_x", "object": "payment_intent"
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/payment_intents"))
        .respond_with(ResponseTemplate::new(402).set_body_json(json!({"error": {"message": "Your card was declined."}})))
        .mount(&server)
        .await;

    let gateway = StripeGateway::new(server.uri(), "sk_test_123");
    let params = IntentParams {
        kind: PaymentKind::Donation,
        amount: 2500,
        currency: "usd".into(),
        metadata: vec![("donor_email".into(), "hannah@example.org".into()), ("kind".into(), "donation".into())],
    };
    let created = gateway.create_intent(&params).await.unwrap();
    assert_eq!(created.id, "pi_live");

    let err = gateway.create_intent(&params).await.unwrap_err();
    assert_eq!(err, PaymentError::Provider("Your card was declined.".into()));
}

#[actix_web::test]
async fn out_of_range_signature_timestamp_is_rejected() {
    let store = InMemStore::new();
    let app = test::init_service(
        App::new().app_data(web::Data::new(state(&store, None, Some(WEBHOOK_SECRET)))).configure(config),
    )
    .await;
    let body = event("payment_intent.succeeded", "pi_abc", "donation");
    let req = test::TestRequest::post()
        .uri("/api/v1/payments/webhook")
        .insert_header((SIGNATURE_HEADER, format!("t={},v1=00", i64::MIN)))
        .set_payload(body)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);
    assert!(store.payments().is_empty());
}
