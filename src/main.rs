use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware::Compress, web, App, HttpServer};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tracing::{info, warn, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

use fellowship::auth::JwtSecret;
use fellowship::config::Settings;
use fellowship::openapi::ApiDoc;
use fellowship::payments::{PaymentGateway, StripeGateway};
use fellowship::rate_limit::{InMemoryRateLimiter, RateLimiterFacade};
use fellowship::routes::{config, AppState};
use fellowship::store::rest::RestStore;

static PROMETHEUS: OnceCell<PrometheusHandle> = OnceCell::new();

fn prometheus() -> Option<PrometheusHandle> {
    PROMETHEUS
        .get_or_try_init(|| PrometheusBuilder::new().install_recorder())
        .map_err(|e| warn!("prometheus recorder unavailable: {e}"))
        .ok()
        .cloned()
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load .env automatically only in debug builds; deployments set the environment themselves.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    let settings = match Settings::from_env() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{e}");
            eprintln!("Please copy .env.example to .env and configure it");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Bootstrapping fellowship server");
    for w in settings.warnings() {
        warn!("{w}");
    }
    info!("Supabase project: {}", settings.supabase_url);

    // Server-side writes (orders, payments, forms) use the service role when available.
    let api_key = settings.supabase_service_role_key.clone().unwrap_or_else(|| settings.supabase_anon_key.clone());
    let store = Arc::new(RestStore::new(&settings.supabase_url, &api_key));
    let payments: Option<Arc<dyn PaymentGateway>> = settings
        .stripe_secret_key
        .as_ref()
        .map(|key| Arc::new(StripeGateway::new(&settings.stripe_api_base, key)) as Arc<dyn PaymentGateway>);
    let limiter = RateLimiterFacade::new(InMemoryRateLimiter::new(settings.rate_limit_enabled), settings.rate_limits.clone());
    let state = AppState { store, payments, webhook_secret: settings.stripe_webhook_secret.clone(), limiter };

    let metrics_handle = prometheus();
    let openapi = ApiDoc::openapi();
    let frontend = settings.frontend_url.clone();
    let jwt_secret = web::Data::new(JwtSecret(settings.jwt_secret.clone()));

    let server = HttpServer::new(move || {
        let cors = {
            let mut c = Cors::default()
                .allowed_origin("http://localhost:5173")
                .allowed_origin("http://127.0.0.1:5173")
                .allow_any_header()
                .allowed_methods(["GET", "POST", "PUT", "OPTIONS"])
                .supports_credentials()
                .max_age(3600);
            if let Some(front) = &frontend {
                c = c.allowed_origin(front);
            }
            c
        };

        let mut app = App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(cors)
            .app_data(web::Data::new(state.clone()))
            .app_data(jwt_secret.clone())
            .configure(config)
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()));
        if let Some(handle) = &metrics_handle {
            app = app.app_data(web::Data::new(handle.clone()));
        }
        app
    })
    .bind(settings.bind_addr.as_str())?;

    info!("Listening on http://{}", settings.bind_addr);
    server.run().await
}
