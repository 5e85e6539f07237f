// tests/telemetry_router.rs
//
// Telemetry router without opening sockets, via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health
// - GET /stats (JSON snapshot of the pipeline counters)
// - GET /metrics only when a Prometheus handle is present

use axum::body::{self, Body};
use http::{Request, StatusCode};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::Value as Json;
use std::sync::Arc;
use tower::ServiceExt as _; // for `oneshot`

use finnews_pipeline::metrics::router;
use finnews_pipeline::PipelineStats;

const BODY_LIMIT: usize = 1024 * 1024;

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build request")
}

async fn body_string(resp: axum::response::Response) -> String {
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.expect("read body");
    String::from_utf8(bytes.to_vec()).expect("utf8")
}

#[tokio::test]
async fn health_is_ok() {
    let app = router(None, Arc::new(PipelineStats::new()));
    let resp = app.oneshot(get("/health")).await.expect("oneshot /health");
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_string(resp).await, "ok");
}

#[tokio::test]
async fn stats_reports_live_counters() {
    let stats = Arc::new(PipelineStats::new());
    stats.record_discovered(3);
    stats.record_fetched();
    stats.record_fetched();
    stats.record_fetch_failed();
    stats.record_signal();
    stats.record_filtered();

    let app = router(None, stats);
    let resp = app.oneshot(get("/stats")).await.expect("oneshot /stats");
    assert_eq!(resp.status(), StatusCode::OK);

    let v: Json = serde_json::from_str(&body_string(resp).await).expect("json");
    assert_eq!(v["discovered"], 3);
    assert_eq!(v["fetched"], 2);
    assert_eq!(v["fetch_failed"], 1);
    assert_eq!(v["signals"], 1);
    assert_eq!(v["filtered"], 1);
    assert_eq!(v["validation_failed"], 0);
}

#[tokio::test]
async fn metrics_route_requires_a_handle() {
    let stats = Arc::new(PipelineStats::new());

    let without = router(None, stats.clone());
    let resp = without.oneshot(get("/metrics")).await.expect("oneshot /metrics");
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let handle = PrometheusBuilder::new().build_recorder().handle();
    let with = router(Some(handle), stats);
    let resp = with.oneshot(get("/metrics")).await.expect("oneshot /metrics");
    assert_eq!(resp.status(), StatusCode::OK);
}
