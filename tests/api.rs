use node_stats::api::{router, AppState};
use node_stats::frame::NodeStatsFrame;
use node_stats::node::{Node, NodeResources};
use node_stats::tracker::{NodeStatsTracker, TrackerHandle};
use tokio_util::sync::CancellationToken;
use tower::util::ServiceExt;

fn app(tracker: TrackerHandle) -> axum::Router {
    let (updates, _updates_rx) = tokio::sync::broadcast::channel(8);
    router(AppState {
        tracker,
        updates,
        shutdown: CancellationToken::new(),
    })
}

fn tracker() -> TrackerHandle {
    let resources = NodeResources {
        cpu: Some(1000.0),
        memory: Some(4.0),
        gpu_memory: Some(2048.0),
    };
    TrackerHandle::new(NodeStatsTracker::new(Node::new("node-1", resources), 10))
}

fn frame(timestamp_ms: u64) -> NodeStatsFrame {
    NodeStatsFrame::from_json(&format!(
        r#"{{"Timestamp": {}, "CPUTicksConsumed": 500, "Memory": {{"Used": 2097152}}, "DeviceStats": []}}"#,
        timestamp_ms * 1_000_000
    ))
    .unwrap()
}

async fn get(app: axum::Router, uri: &str) -> (axum::http::StatusCode, serde_json::Value) {
    let response = app
        .oneshot(
            axum::http::Request::builder()
                .uri(uri)
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn health_ok() {
    let (status, json) = get(app(tracker()), "/api/health").await;
    assert_eq!(status, 200);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn node_reports_reserved_capacities() {
    let (status, json) = get(app(tracker()), "/api/node").await;
    assert_eq!(status, 200);
    assert_eq!(json["id"], "node-1");
    assert_eq!(json["url"], "/v1/client/stats?node_id=node-1");
    assert_eq!(json["buffer_size"], 10);
    assert_eq!(json["reserved"]["memory"].as_f64().unwrap(), 4.0);
    assert_eq!(json["reserved"]["gpu_memory"].as_f64().unwrap(), 2048.0);
}

#[tokio::test]
async fn series_initially_empty() {
    let (status, json) = get(app(tracker()), "/api/series").await;
    assert_eq!(status, 200);
    for name in ["cpu", "memory", "gpu_memory", "gpu_utilization", "gpu_temperature"] {
        assert_eq!(json[name].as_array().unwrap().len(), 0, "{name}");
    }
}

#[tokio::test]
async fn series_filters_by_since_ms() {
    let handle = tracker();
    handle.write().append(&frame(1000)).unwrap();
    handle.write().append(&frame(2000)).unwrap();

    let (status, json) = get(app(handle), "/api/series/memory?since_ms=1500").await;
    assert_eq!(status, 200);
    let arr = json.as_array().unwrap();
    assert_eq!(arr.len(), 1);
    assert_eq!(arr[0]["used"].as_f64().unwrap(), 2_097_152.0);
    assert_eq!(arr[0]["percent"].as_f64().unwrap(), 0.5);
}

#[tokio::test]
async fn unknown_series_is_not_found() {
    let (status, json) = get(app(tracker()), "/api/series/disk").await;
    assert_eq!(status, 404);
    assert!(json["error"].as_str().unwrap().contains("disk"));
}

#[tokio::test]
async fn latest_requires_data() {
    let handle = tracker();
    let (status, _) = get(app(handle.clone()), "/api/latest").await;
    assert_eq!(status, 404);

    handle.write().pause();
    let (status, json) = get(app(handle), "/api/latest").await;
    assert_eq!(status, 200);
    assert!(json["cpu"]["used"].is_null());
    assert!(json["gpu_memory"].is_null());
}

#[tokio::test]
async fn stream_is_event_stream() {
    let response = app(tracker())
        .oneshot(
            axum::http::Request::builder()
                .uri("/api/stream")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let ct = response
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    assert!(ct.starts_with("text/event-stream"));
}
