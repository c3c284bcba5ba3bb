#![cfg(feature = "inmem-store")]

use actix_web::{test, web, App};
use fellowship::auth::{issue_access_token, JwtSecret, Viewer, JWT_SECRET_VAR};
use fellowship::models::*;
use fellowship::rate_limit::{InMemoryRateLimiter, RateLimitConfig, RateLimiterFacade};
use fellowship::routes::{config, AppState};
use fellowship::store::inmem::InMemStore;
use fellowship::store::StoreError;
use metrics_exporter_prometheus::PrometheusBuilder;
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const SECRET: &str = "route-test-secret-at-least-32-bytes!";

fn setup_env() {
    std::env::set_var(JWT_SECRET_VAR, SECRET);
}

fn app_state(store: &InMemStore, limiter: RateLimiterFacade) -> web::Data<AppState> {
    web::Data::new(AppState { store: Arc::new(store.clone()), payments: None, webhook_secret: None, limiter })
}

fn unlimited() -> RateLimiterFacade {
    RateLimiterFacade::new(InMemoryRateLimiter::new(false), RateLimitConfig::default())
}

fn bearer(viewer: &Viewer) -> (&'static str, String) {
    let token = issue_access_token(viewer, SECRET, chrono::Duration::minutes(10)).unwrap();
    ("Authorization", format!("Bearer {token}"))
}

#[actix_web::test]
async fn health_reports_ok() {
    let store = InMemStore::new();
    let app = test::init_service(App::new().app_data(app_state(&store, unlimited())).configure(config)).await;
    let resp = test::call_service(&app, test::TestRequest::get().uri("/api/v1/health").to_request()).await;
    assert!(resp.status().is_success());
    let v: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(v["status"], "ok");
}

#[actix_web::test]
async fn newsletter_signup_is_idempotent_and_validated() {
    let store = InMemStore::new();
    let app = test::init_service(App::new().app_data(app_state(&store, unlimited())).configure(config)).await;

    for email in ["Grace@Example.org", "grace@example.org"] {
        let req = test::TestRequest::post()
            .uri("/api/v1/newsletter")
            .set_json(serde_json::json!({"email": email, "name": " Grace "}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 200);
    }
    let subs = store.newsletter_subscribers();
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].email, "grace@example.org");
    assert_eq!(subs[0].name.as_deref(), Some("Grace"));

    let req = test::TestRequest::post()
        .uri("/api/v1/newsletter")
        .set_json(serde_json::json!({"email": "not-an-email"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);
}

#[actix_web::test]
async fn newsletter_store_outage_surfaces() {
    let store = InMemStore::new();
    store.fail_writes(Some(StoreError::Unavailable("down".into())));
    let app = test::init_service(App::new().app_data(app_state(&store, unlimited())).configure(config)).await;
    let req = test::TestRequest::post()
        .uri("/api/v1/newsletter")
        .set_json(serde_json::json!({"email": "a@b.org"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 503);
}

#[actix_web::test]
async fn contact_form_requires_fields_and_is_rate_limited() {
    let store = InMemStore::new();
    let cfg = RateLimitConfig { form_limit: 2, form_window: Duration::from_secs(60), ..RateLimitConfig::default() };
    let limiter = RateLimiterFacade::new(InMemoryRateLimiter::new(true), cfg);
    let app = test::init_service(App::new().app_data(app_state(&store, limiter)).configure(config)).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/contact")
        .set_json(serde_json::json!({"name": "", "email": "eli@example.org", "message": "hello"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);

    let req = test::TestRequest::post()
        .uri("/api/v1/contact")
        .set_json(serde_json::json!({"name": "Eli", "email": "eli@example.org", "subject": "  ", "message": "Can I volunteer?"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 201);
    let stored = store.contact_messages();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].subject, None);

    let req = test::TestRequest::post()
        .uri("/api/v1/contact")
        .set_json(serde_json::json!({"name": "Eli", "email": "eli@example.org", "message": "again"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 429);
}

#[actix_web::test]
#[serial]
async fn reports_require_sign_in() {
    setup_env();
    let store = InMemStore::new();
    let app = test::init_service(App::new().app_data(app_state(&store, unlimited())).configure(config)).await;
    let body = serde_json::json!({"target_id": Uuid::new_v4(), "target_kind": "comment", "reason": "spam"});

    let req = test::TestRequest::post().uri("/api/v1/reports").set_json(&body).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);

    let req = test::TestRequest::post()
        .uri("/api/v1/reports")
        .insert_header(("Authorization", "Bearer not-a-token"))
        .set_json(&body)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);

    let viewer = Viewer::new(Uuid::new_v4());
    let req = test::TestRequest::post()
        .uri("/api/v1/reports")
        .insert_header(bearer(&viewer))
        .set_json(&body)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 201);
    let reports = store.reports();
    assert_eq!(reports[0].reporter_id, viewer.id);
    assert_eq!(reports[0].target_kind, ReportTarget::Comment);
}

#[actix_web::test]
#[serial]
async fn notification_preferences_default_then_save() {
    setup_env();
    let store = InMemStore::new();
    let app = test::init_service(App::new().app_data(app_state(&store, unlimited())).configure(config)).await;
    let viewer = Viewer::new(Uuid::new_v4());

    let req = test::TestRequest::get().uri("/api/v1/me/notifications").insert_header(bearer(&viewer)).to_request();
    let prefs: NotificationPreferences = test::call_and_read_body_json(&app, req).await;
    assert_eq!(prefs, NotificationPreferences::defaults_for(viewer.id));

    let req = test::TestRequest::put()
        .uri("/api/v1/me/notifications")
        .insert_header(bearer(&viewer))
        .set_json(serde_json::json!({"email_replies": false, "email_prayers": true, "weekly_digest": true}))
        .to_request();
    let saved: NotificationPreferences = test::call_and_read_body_json(&app, req).await;
    assert_eq!(saved.user_id, viewer.id);
    assert!(!saved.email_replies);

    let req = test::TestRequest::get().uri("/api/v1/me/notifications").insert_header(bearer(&viewer)).to_request();
    let again: NotificationPreferences = test::call_and_read_body_json(&app, req).await;
    assert_eq!(again, saved);

    let req = test::TestRequest::get().uri("/api/v1/me/notifications").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);
}

#[actix_web::test]
#[serial]
async fn configured_secret_is_used_without_env() {
    std::env::remove_var(JWT_SECRET_VAR);
    let store = InMemStore::new();
    let app = test::init_service(
        App::new()
            .app_data(app_state(&store, unlimited()))
            .app_data(web::Data::new(JwtSecret(SECRET.to_string())))
            .configure(config),
    )
    .await;
    let viewer = Viewer::new(Uuid::new_v4());

    let req = test::TestRequest::get().uri("/api/v1/me/notifications").insert_header(bearer(&viewer)).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);

    let other = issue_access_token(&viewer, "a-different-secret-of-enough-length!", chrono::Duration::minutes(10)).unwrap();
    let req = test::TestRequest::get()
        .uri("/api/v1/me/notifications")
        .insert_header(("Authorization", format!("Bearer {other}")))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);
}

#[actix_web::test]
async fn metrics_scrape_needs_a_recorder() {
    let store = InMemStore::new();
    let app = test::init_service(App::new().app_data(app_state(&store, unlimited())).configure(config)).await;
    let resp = test::call_service(&app, test::TestRequest::get().uri("/metrics").to_request()).await;
    assert_eq!(resp.status(), 503);

    let handle = PrometheusBuilder::new().build_recorder().handle();
    let app = test::init_service(
        App::new().app_data(app_state(&store, unlimited())).app_data(web::Data::new(handle)).configure(config),
    )
    .await;
    let resp = test::call_service(&app, test::TestRequest::get().uri("/metrics").to_request()).await;
    assert_eq!(resp.status(), 200);
}
