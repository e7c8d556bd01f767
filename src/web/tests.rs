use super::*;
use crate::config::Config;
use crate::lifecycle::Lifecycle;
use crate::registry::fake::FakeRegistrar;
use crate::registry::{Discovery, Registrar};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

fn create_test_context(discovery: Discovery, extra: &[(&str, &str)]) -> Arc<AppContext> {
    let mut pairs = vec![
        ("APP_NAME", "svc"),
        ("APP_ENV", "staging"),
        ("SERVICE_ADDRESS", "10.0.0.5"),
        ("SERVICE_PORT", "9090"),
        ("CONSUL_HTTP_TOKEN", "secret-token"),
    ];
    pairs.extend_from_slice(extra);
    let lifecycle = Lifecycle::new();

    Arc::new(AppContext {
        config: Arc::new(Config::from_pairs(&pairs).unwrap()),
        discovery,
        lifecycle: lifecycle.subscribe(),
    })
}

async fn get(ctx: Arc<AppContext>, uri: &str) -> (StatusCode, String) {
    let response = router(ctx)
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

async fn get_json(ctx: Arc<AppContext>, uri: &str) -> (StatusCode, Value) {
    let (status, body) = get(ctx, uri).await;
    (status, serde_json::from_str(&body).unwrap())
}

#[tokio::test]
async fn test_ping() {
    let (status, body) = get_json(create_test_context(Discovery::Disabled, &[]), "/ping").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "pong");
    assert_eq!(body["status"], "success");
    assert!(body["timestamp"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn test_health_without_consul() {
    let (status, body) = get_json(create_test_context(Discovery::Disabled, &[]), "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["dependencies"], serde_json::json!({}));
    assert_eq!(body["service"]["name"], "svc");
    assert_eq!(body["service"]["version"], "v1.0.0");
    assert_eq!(body["service"]["env"], "staging");
}

#[tokio::test]
async fn test_health_reports_unhealthy_consul_with_200() {
    let registrar = Arc::new(FakeRegistrar::new().unhealthy());
    let ctx = create_test_context(Discovery::Enabled(registrar), &[]);
    let (status, body) = get_json(ctx, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["dependencies"]["consul"]["status"], "unhealthy");
    assert_eq!(body["dependencies"]["consul"]["address"], "http://127.0.0.1:8500");
}

#[tokio::test]
async fn test_health_reports_healthy_consul() {
    let ctx = create_test_context(Discovery::Enabled(Arc::new(FakeRegistrar::new())), &[]);
    let (_, body) = get_json(ctx, "/health").await;

    assert_eq!(body["dependencies"]["consul"]["status"], "healthy");
}

#[tokio::test]
async fn test_health_reports_client_error() {
    let ctx = create_test_context(Discovery::Unavailable("bad token".to_string()), &[]);
    let (status, body) = get_json(ctx, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["dependencies"]["consul"]["status"], "unhealthy");
    assert_eq!(body["dependencies"]["consul"]["error"], "bad token");
    assert!(body["dependencies"]["consul"].get("address").is_none());
}

#[tokio::test]
async fn test_metrics() {
    let (status, body) = get(create_test_context(Discovery::Disabled, &[]), "/metrics").await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("# TYPE auth_service_info gauge"));
    assert!(body.contains(
        "auth_service_info{name=\"svc\",version=\"v1.0.0\",framework=\"axum\",language=\"rust\",environment=\"staging\"} 1"
    ));
    let uptime: i64 = body
        .lines()
        .find_map(|line| line.strip_prefix("service_uptime_seconds "))
        .unwrap()
        .parse()
        .unwrap();
    assert!(uptime > 1_600_000_000);
}

#[tokio::test]
async fn test_metrics_namespace() {
    let ctx = create_test_context(Discovery::Disabled, &[("CONSUL_METRICS_NAMESPACE", "billing")]);
    let (_, body) = get(ctx, "/metrics").await;

    assert!(body.contains("billing_info{name=\"svc\""));
}

#[tokio::test]
async fn test_stats() {
    let (status, body) = get_json(create_test_context(Discovery::Disabled, &[]), "/api/v1/stats").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service_name"], "svc");
    assert_eq!(body["environment"], "staging");
    assert_eq!(body["state"], "starting");
    assert!(body["git_hash"].is_string());
}

#[tokio::test]
async fn test_consul_info_hides_token() {
    let (status, body) = get(create_test_context(Discovery::Disabled, &[]), "/api/v1/consul/info").await;

    assert_eq!(status, StatusCode::OK);
    assert!(!body.contains("secret-token"));

    let info: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(info["address"], "http://127.0.0.1:8500");
    assert_eq!(info["enabled"], true);
    assert_eq!(info["service_id"], "svc-10.0.0.5-9090");
    assert_eq!(info["meta"]["lb_policy"], "weighted_round_robin");
}

#[tokio::test]
async fn test_consul_service_lookup() {
    let (status, body) =
        get_json(create_test_context(Discovery::Disabled, &[]), "/api/v1/consul/service").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], 503);

    let registrar = Arc::new(FakeRegistrar::new());
    let ctx = create_test_context(Discovery::Enabled(registrar.clone()), &[]);
    let (status, body) = get_json(ctx.clone(), "/api/v1/consul/service").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], 404);

    registrar.register().await.unwrap();
    let (status, body) = get_json(ctx, "/api/v1/consul/service").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["ID"], "fake-127.0.0.1-8080");
    assert_eq!(body["data"]["Port"], 8080);
}

#[tokio::test]
async fn test_cors_any_origin() {
    let response = router(create_test_context(Discovery::Disabled, &[]))
        .oneshot(
            Request::builder()
                .uri("/ping")
                .header("Origin", "https://app.example.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "*"
    );
}

#[tokio::test]
async fn test_cors_origin_list() {
    let ctx = create_test_context(
        Discovery::Disabled,
        &[("CORS_ALLOWED_ORIGINS", "https://a.example.com, https://b.example.com")],
    );
    let request = |origin: &str| {
        Request::builder()
            .uri("/ping")
            .header("Origin", origin)
            .body(Body::empty())
            .unwrap()
    };

    let allowed = router(ctx.clone())
        .oneshot(request("https://b.example.com"))
        .await
        .unwrap();
    assert_eq!(
        allowed.headers()["access-control-allow-origin"],
        "https://b.example.com"
    );
    assert_eq!(allowed.headers()["access-control-allow-credentials"], "true");

    let rejected = router(ctx).oneshot(request("https://evil.example.com")).await.unwrap();
    assert!(rejected.headers().get("access-control-allow-origin").is_none());
}
