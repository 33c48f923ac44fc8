mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use bytewatt_bridge::Bridge;
use bytewatt_bridge::api::VendorApi;
use bytewatt_bridge::error::BridgeError;
use bytewatt_bridge::web::{AppState, build_router};
use common::{FakeVendorApi, test_config};
use http_body_util::BodyExt as _;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn setup() -> (Arc<FakeVendorApi>, Arc<Bridge>) {
    let api = Arc::new(FakeVendorApi::new());
    let bridge = Bridge::with_api(test_config(), api.clone() as Arc<dyn VendorApi>);
    (api, bridge)
}

fn router(bridge: &Arc<Bridge>) -> axum::Router {
    build_router(AppState {
        bridge: bridge.clone(),
    })
}

async fn send(bridge: &Arc<Bridge>, request: Request<Body>) -> (StatusCode, Value) {
    let response = router(bridge).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_is_ok_before_first_poll() {
    let (_api, bridge) = setup();
    let (status, body) = send(&bridge, get("/api/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn health_reports_503_when_failed() {
    let (api, bridge) = setup();
    for _ in 0..9 {
        api.queue_realtime(Err(BridgeError::network("connection refused")));
    }
    for _ in 0..3 {
        bridge.tick().await.unwrap_err();
    }
    let (status, body) = send(&bridge, get("/api/health")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "failed");
    assert_eq!(body["consecutive_failures"], 3);
}

#[tokio::test]
async fn status_and_metrics_serve_the_latest_snapshot() {
    let (_api, bridge) = setup();
    bridge.tick().await.unwrap();

    let (status, body) = send(&bridge, get("/api/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_polls"], 1);
    assert_eq!(body["health"]["status"], "healthy");

    let (status, body) = send(&bridge, get("/api/metrics")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["realtime"]["soc_percent"], 55.0);
    assert_eq!(body["statistics"]["solar_generation_kwh"], 2500.0);
}

#[tokio::test]
async fn settings_read_falls_back_to_the_vendor() {
    let (api, bridge) = setup();
    let (status, body) = send(&bridge, get("/api/settings")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["charge_start"], "14:00");
    assert_eq!(body["min_soc"], 10);
    assert_eq!(FakeVendorApi::count(&api.settings_reads), 1);

    // Served from the confirmed state afterwards
    send(&bridge, get("/api/settings")).await;
    assert_eq!(FakeVendorApi::count(&api.settings_reads), 1);
}

#[tokio::test]
async fn invalid_settings_return_400() {
    let (api, bridge) = setup();
    let (status, body) = send(
        &bridge,
        post_json("/api/settings", r#"{"discharge_end":"later"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "discharge_end");
    assert_eq!(FakeVendorApi::count(&api.logins), 0);

    let (status, _) = send(&bridge, post_json("/api/settings", r#"{"colour":"blue"}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn settings_post_applies_once() {
    let (api, bridge) = setup();
    let patch = r#"{"charge_start":"02:00","charge_cap":95}"#;

    let (status, body) = send(&bridge, post_json("/api/settings", patch)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "applied");
    assert_eq!(body["converged"], true);

    let (status, body) = send(&bridge, post_json("/api/settings", patch)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "unchanged");
    assert_eq!(FakeVendorApi::count(&api.update_calls), 1);
}

#[tokio::test]
async fn vendor_failure_returns_502() {
    let (api, bridge) = setup();
    api.fail_next_login(BridgeError::auth("bad credentials"));
    let (status, body) = send(
        &bridge,
        post_json("/api/settings", r#"{"min_soc":20}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["kind"], "auth");
}

#[tokio::test]
async fn reconnect_drops_the_session() {
    let (_api, bridge) = setup();
    bridge.tick().await.unwrap();
    assert!(bridge.session().current().await.is_some());

    let (status, body) = send(
        &bridge,
        Request::builder()
            .method("POST")
            .uri("/api/reconnect")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert!(bridge.session().current().await.is_none());
}

#[tokio::test]
async fn config_hides_the_password() {
    let (_api, bridge) = setup();
    let (status, body) = send(&bridge, get("/api/config")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["account"]["username"], "owner@example.com");
    assert!(body["account"].get("password").is_none());
}

#[tokio::test]
async fn events_stream_snapshots() {
    let (_api, bridge) = setup();
    let response = router(&bridge).oneshot(get("/api/events")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let ct = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");
    assert!(ct.contains("text/event-stream"));

    let ticking = bridge.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let _ = ticking.tick().await;
    });

    let mut body = response.into_body();
    let mut buf: Vec<u8> = Vec::new();
    let found = tokio::time::timeout(Duration::from_secs(2), async {
        while let Some(Ok(frame)) = body.frame().await {
            if let Some(data) = frame.data_ref() {
                buf.extend_from_slice(data);
                let text = String::from_utf8_lossy(&buf);
                if text.contains("event: snapshot") && text.contains("\"total_polls\":1") {
                    return true;
                }
            }
        }
        false
    })
    .await
    .unwrap_or(false);
    assert!(found, "no snapshot event with total_polls 1 received");
}
