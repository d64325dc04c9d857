//! Terminal caret messages, callback events and shutdown over HTTP.
//!
//! GREEN when:
//! - POST /v1/terminal queues the line under its message code and returns
//!   the polling client's reply verbatim; a malformed line is 400.
//! - /poll/callback + /poll/event produce one outbound POST to the
//!   registered URL; /poll/event answers without waiting on delivery.
//! - Beginning shutdown releases a blocked inbound request with 503 and
//!   refuses new ones.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use httpmock::prelude::*;
use mtb_broker::{Controller, ControllerSettings, HttpCallbackTransport};
use mtb_daemon::{routes, state};
use tower::ServiceExt;

fn make_state() -> Arc<state::AppState> {
    let controller = Controller::new(
        ControllerSettings::default(),
        Arc::new(HttpCallbackTransport::new(Duration::from_secs(2))),
    )
    .unwrap();
    Arc::new(state::AppState::new(
        Arc::new(controller),
        state::RouteSettings::default(),
    ))
}

async fn call(router: axum::Router, req: Request<axum::body::Body>) -> (StatusCode, bytes::Bytes) {
    let resp = router.oneshot(req).await.expect("oneshot failed");
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .expect("body collect failed")
        .to_bytes();
    (status, body)
}

fn post(uri: &str, body: &str) -> Request<axum::body::Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(axum::body::Body::from(body.to_string()))
        .unwrap()
}

async fn wait_pending(st: &state::AppState, n: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while st.controller.status().pending < n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("command never queued");
}

#[tokio::test]
async fn terminal_line_round_trips_under_its_code() {
    let st = make_state();
    let router = routes::build_router(Arc::clone(&st));

    let inbound = tokio::spawn(call(
        router.clone(),
        post("/v1/terminal", "ORDER^BUY^EURUSD^0.10^\r\n"),
    ));
    wait_pending(&st, 1).await;

    let (_, body) = call(router.clone(), post("/v1/poll/take", "")).await;
    let env: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(env["name"], "ORDER");
    assert_eq!(env["payload"], "ORDER^BUY^EURUSD^0.10^");

    let answer = serde_json::json!({ "command": env["id"], "response": "ORDER^OK^1001^" });
    call(router.clone(), post("/v1/poll/response", &answer.to_string())).await;

    let (status, body) = inbound.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"ORDER^OK^1001^");
}

#[tokio::test]
async fn terminal_keeps_trailing_blanks_of_last_field() {
    let st = make_state();
    let router = routes::build_router(Arc::clone(&st));

    let inbound = tokio::spawn(call(
        router.clone(),
        post("/v1/terminal", "COMMENT^SET^EURUSD^note \t\r\n"),
    ));
    wait_pending(&st, 1).await;

    let (_, body) = call(router.clone(), post("/v1/poll/take", "")).await;
    let env: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(env["payload"], "COMMENT^SET^EURUSD^note \t");

    let answer = serde_json::json!({ "command": env["id"], "response": "COMMENT^OK^" });
    call(router.clone(), post("/v1/poll/response", &answer.to_string())).await;
    let (status, _) = inbound.await.unwrap();
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn malformed_terminal_line_is_400() {
    let st = make_state();
    let router = routes::build_router(Arc::clone(&st));
    for bad in ["ORDER", "ORDER^BUY^^0.10^", "^BUY^EURUSD^"] {
        let (status, _) = call(router.clone(), post("/v1/terminal", bad)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{bad:?}");
    }
    assert_eq!(st.controller.status().pending, 0);
}

#[tokio::test]
async fn event_route_pushes_to_registered_callback() {
    let server = MockServer::start_async().await;
    let hook = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/hook")
                .body_contains("\"event\":\"tick\"");
            then.status(200);
        })
        .await;

    let st = make_state();
    let router = routes::build_router(Arc::clone(&st));

    let body = serde_json::json!({ "url": server.url("/hook"), "format": "json" });
    let (status, resp) = call(router.clone(), post("/v1/poll/callback", &body.to_string())).await;
    assert_eq!(status, StatusCode::OK);
    let resp: serde_json::Value = serde_json::from_slice(&resp).unwrap();
    assert_eq!(resp["registered"], true);
    assert_eq!(resp["format"], "json");

    let mut events = st.controller.subscribe();
    let (status, resp) = call(router.clone(), post("/v1/poll/event", "tick")).await;
    assert_eq!(status, StatusCode::OK);
    let resp: serde_json::Value = serde_json::from_slice(&resp).unwrap();
    assert_eq!(resp["dispatched"], true);

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let mtb_broker::BrokerEvent::EventDelivered { .. } = events.recv().await.unwrap() {
                break;
            }
        }
    })
    .await
    .expect("event never delivered");
    hook.assert_hits_async(1).await;

    // Empty URL unregisters; later events are dropped.
    let (_, resp) = call(router.clone(), post("/v1/poll/callback", r#"{"url":""}"#)).await;
    let resp: serde_json::Value = serde_json::from_slice(&resp).unwrap();
    assert_eq!(resp["registered"], false);
    let (_, resp) = call(router, post("/v1/poll/event", "tock")).await;
    let resp: serde_json::Value = serde_json::from_slice(&resp).unwrap();
    assert_eq!(resp["dispatched"], false);
}

#[tokio::test]
async fn bad_callback_url_is_400() {
    let router = routes::build_router(make_state());
    let (status, _) = call(
        router,
        post("/v1/poll/callback", r#"{"url":"ftp://host/hook","format":"json"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn shutdown_releases_blocked_request_with_503() {
    let st = make_state();
    let router = routes::build_router(Arc::clone(&st));

    let inbound = tokio::spawn(call(router.clone(), post("/v1/commands/order.buy", "x")));
    wait_pending(&st, 1).await;

    assert_eq!(st.begin_shutdown(), 1);

    let (status, body) = tokio::time::timeout(Duration::from_secs(2), inbound)
        .await
        .expect("request still blocked after shutdown")
        .unwrap();
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let err: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(err["kind"], "shutting_down");

    let (status, _) = call(router, post("/v1/commands/order.buy", "x")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}
