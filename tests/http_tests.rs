//! Endpoint behaviour of the exporter's HTTP router.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use livetv_exporter::config::Config;
use livetv_exporter::handlers;
use livetv_exporter::metrics::ExporterTelemetry;
use livetv_exporter::registry::MetricsRegistry;
use livetv_exporter::snapshot::{Group, Snapshot, StreamMetrics};
use livetv_exporter::state::AppState;

struct Exporter {
    base: String,
    registry: Arc<MetricsRegistry>,
}

async fn spawn_exporter(config: Config) -> Exporter {
    let telemetry = Arc::new(ExporterTelemetry::new().unwrap());
    let registry = Arc::new(MetricsRegistry::new(Duration::from_secs(90)).unwrap());
    let app = handlers::router(AppState::new(Arc::clone(&registry), telemetry, config));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Exporter {
        base: format!("http://{addr}"),
        registry,
    }
}

fn config() -> Config {
    Config {
        api_key: Some("very-secret".into()),
        ..Config::default()
    }
}

fn snapshot(up: bool, streams: u64) -> Snapshot {
    let now = Utc::now();
    Snapshot {
        up,
        server: None,
        streams: Group::fresh(
            StreamMetrics {
                streams_active: streams,
                users_watching: streams,
                ..StreamMetrics::default()
            },
            now,
        ),
        channels: Group::default(),
        tuners: Group::default(),
        recordings: Group::default(),
        guide: Group::default(),
        history: Group::default(),
        completed_at: now,
        cycle_duration_seconds: 0.2,
    }
}

async fn get(url: String) -> (u16, String) {
    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let response = client.get(url).send().await.unwrap();
    let status = response.status().as_u16();
    (status, response.text().await.unwrap())
}

#[tokio::test]
async fn test_metrics_before_first_cycle() {
    let exporter = spawn_exporter(config()).await;

    let (status, body) = get(format!("{}/metrics", exporter.base)).await;
    assert_eq!(status, 200);
    assert!(body.contains("emby_up 0"));
    assert!(!body.contains("emby_livetv_streams_active"));
    // Self-telemetry is always present.
    assert!(body.contains("emby_exporter_refresh_duration_seconds"));
}

#[tokio::test]
async fn test_metrics_serve_published_snapshot() {
    let exporter = spawn_exporter(config()).await;
    exporter.registry.publish(snapshot(true, 3)).unwrap();

    let (status, body) = get(format!("{}/metrics", exporter.base)).await;
    assert_eq!(status, 200);
    assert!(body.contains("emby_up 1"));
    assert!(body.contains("emby_livetv_streams_active 3"));
    assert!(body.contains("emby_exporter_snapshot_stale 0"));
}

#[tokio::test]
async fn test_health_follows_registry_state() {
    let exporter = spawn_exporter(config()).await;

    let (status, body) = get(format!("{}/health", exporter.base)).await;
    assert_eq!(status, 503);
    assert!(body.contains("empty"));

    exporter.registry.publish(snapshot(true, 1)).unwrap();
    let (status, body) = get(format!("{}/health", exporter.base)).await;
    assert_eq!(status, 200);
    assert!(body.contains("ready"));

    // Degraded but recent is still healthy.
    exporter.registry.publish(snapshot(false, 1)).unwrap();
    let (status, body) = get(format!("{}/health", exporter.base)).await;
    assert_eq!(status, 200);
    assert!(body.contains("degraded"));
}

#[tokio::test]
async fn test_health_can_be_disabled() {
    let exporter = spawn_exporter(Config {
        enable_health: Some(false),
        ..config()
    })
    .await;

    let (status, _) = get(format!("{}/health", exporter.base)).await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn test_config_endpoint_redacts_api_key() {
    let exporter = spawn_exporter(config()).await;

    let (status, body) = get(format!("{}/config", exporter.base)).await;
    assert_eq!(status, 200);
    assert!(!body.contains("very-secret"));

    let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(parsed["api_key"], "********");
    assert_eq!(parsed["port"], 9119);
}

#[tokio::test]
async fn test_landing_page_lists_endpoints() {
    let exporter = spawn_exporter(config()).await;

    let (status, body) = get(format!("{}/", exporter.base)).await;
    assert_eq!(status, 200);
    assert!(body.contains("/metrics"));
    assert!(body.contains("/config"));
}
