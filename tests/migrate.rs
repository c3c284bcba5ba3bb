use fellowship::migrate::{Migration, MigrationTarget, Migrator, Outcome};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SERVICE_KEY: &str = "service-role-key";

fn target(server: &MockServer) -> MigrationTarget {
    MigrationTarget { database_url: None, supabase_url: Some(server.uri()), service_role_key: Some(SERVICE_KEY.into()) }
}

fn migration() -> Migration {
    Migration { name: "002_prayer_actions_unique".into(), sql: "create unique index if not exists x on t(a);".into() }
}

#[tokio::test]
async fn exec_sql_rpc_is_tried_first() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/exec_sql"))
        .and(header("apikey", SERVICE_KEY))
        .and(header("Authorization", format!("Bearer {SERVICE_KEY}").as_str()))
        .and(body_partial_json(serde_json::json!({"sql": migration().sql})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/functions/v1/run-migration"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let migrator = Migrator::new(target(&server)).unwrap();
    assert_eq!(migrator.apply(&migration()).await, Outcome::Rpc);
}

#[tokio::test]
async fn missing_rpc_falls_through_to_edge_function() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/exec_sql"))
        .respond_with(ResponseTemplate::new(404).set_body_string(r#"{"code":"PGRST202"}"#))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/functions/v1/run-migration"))
        .and(body_partial_json(serde_json::json!({"name": "002_prayer_actions_unique"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let migrator = Migrator::new(target(&server)).unwrap();
    assert_eq!(migrator.apply(&migration()).await, Outcome::EdgeFunction);
}

#[tokio::test]
async fn run_continues_past_manual_migrations() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let migrator = Migrator::new(target(&server)).unwrap();
    let second = Migration { name: "003_notification_preferences".into(), sql: "select 1;".into() };
    let results = migrator.run(&[migration(), second]).await;
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|(_, o)| *o == Outcome::Manual));
    assert_eq!(results[1].0.name, "003_notification_preferences");
}
