// appliance_flow.rs — End-to-end tests against a fake appliance.
//
// The fake speaks just enough of the management API to exercise the full
// five-step chain: it issues a token and cookies at login, hands out
// action ids for the time handshake and journal query, and serves a
// configured batch on journal fetch. Non-login steps reject requests
// that arrive without the session token or cookies, so the tests fail
// loudly if session threading regresses.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_stream::StreamExt;

use mailgw_audit::{Opts, Pacing, Service};

const TOKEN: &str = "test-token";

struct FakeAppliance {
    /// Items served by every journal fetch.
    items: Value,
    /// Step names in arrival order, for asserting the protocol sequence.
    seen: Mutex<Vec<String>>,
}

async fn handle(
    State(state): State<Arc<FakeAppliance>>,
    headers: axum::http::HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let action = params.get("action").map(String::as_str).unwrap_or("");
    let with_id = params.contains_key("action_id");

    // Every step after login must carry the token and the session cookie.
    if action != "userLogin" {
        if params.get("C2HToken").map(String::as_str) != Some(TOKEN) {
            return StatusCode::FORBIDDEN.into_response();
        }
        if !headers.contains_key(header::COOKIE) {
            return StatusCode::FORBIDDEN.into_response();
        }
    }

    let step = match (action, with_id) {
        ("userLogin", _) => "login",
        ("getCurrentTime", false) => "time_query",
        ("getCurrentTime", true) => "time_confirm",
        ("eventLoggerJournalQuery", false) => "journal_query",
        ("eventLoggerJournalQuery", true) => "journal_fetch",
        _ => return StatusCode::BAD_REQUEST.into_response(),
    };
    state.seen.lock().unwrap().push(step.to_string());

    let body = match step {
        "login" => json!({"action": "userLogin", "userType": 1, "C2HToken": TOKEN}),
        "time_query" => json!({"action": "getCurrentTime", "action_id": 2}),
        "time_confirm" => {
            json!({"action": "getCurrentTime", "data": {"tz": "UTC", "time": Utc::now().timestamp()}})
        }
        "journal_query" => json!({"action": "eventLoggerJournalQuery", "action_id": 3}),
        _ => json!({
            "action": "eventLoggerJournalQuery",
            "data": {
                "count": state.items.as_array().map(Vec::len).unwrap_or(0),
                "unlimitedResultsSize": state.items.as_array().map(Vec::len).unwrap_or(0),
                "time": Utc::now().timestamp(),
                "items": state.items.clone(),
            }
        }),
    };

    ([(header::SET_COOKIE, "sessionid=fake; Path=/")], Json(body)).into_response()
}

/// Start a fake appliance serving `items`, returning its URL and state.
async fn spawn_appliance(items: Value) -> (String, Arc<FakeAppliance>) {
    let state = Arc::new(FakeAppliance {
        items,
        seen: Mutex::new(Vec::new()),
    });
    let app = Router::new()
        .route("/", post(handle))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}/"), state)
}

/// A target that accepts connections but never answers within the client
/// timeout.
async fn spawn_stalled_target() -> String {
    async fn stall() -> Response {
        tokio::time::sleep(Duration::from_secs(30)).await;
        StatusCode::OK.into_response()
    }
    let app = Router::new().route("/", post(stall));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/")
}

fn opts(urls: Vec<String>) -> Opts {
    Opts {
        urls,
        user: "admin".to_string(),
        password: "secret".to_string(),
        timeout: Duration::from_millis(500),
        poll_interval: Duration::from_secs(1),
    }
}

#[tokio::test]
async fn stream_yields_fresh_record_and_suppresses_stale() {
    let now = Utc::now().timestamp();
    let two_days_ago = now - 2 * 24 * 3600;
    let items = json!([
        {"id": 222, "time": now, "type": "MailProcessing", "eventName": "ScanLogic"},
        {"id": 111, "time": two_days_ago, "type": "MailProcessing", "eventName": "ScanLogic"},
    ]);
    let (url, appliance) = spawn_appliance(items).await;

    let (service, mut stream) = Service::with_pacing(opts(vec![url]), Pacing::none()).unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(service.run(shutdown_rx));

    // Exactly the "now" item arrives.
    let record = timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("first record within one cycle")
        .expect("stream open");
    assert_eq!(record.id, 222);
    assert!(!record.fingerprint.is_empty());

    // The stale item is never emitted, and the second cycle re-serves the
    // same batch without re-emitting the deduplicated record.
    assert!(
        timeout(Duration::from_millis(1800), stream.next())
            .await
            .is_err(),
        "no further emission expected"
    );

    // The protocol ran in strict step order.
    let seen = appliance.seen.lock().unwrap().clone();
    assert_eq!(
        &seen[..5],
        &[
            "login".to_string(),
            "time_query".to_string(),
            "time_confirm".to_string(),
            "journal_query".to_string(),
            "journal_fetch".to_string(),
        ]
    );

    // Cancellation closes the stream within one poll interval.
    shutdown_tx.send(true).unwrap();
    let end = timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("closure within one interval");
    assert!(end.is_none(), "stream must close after shutdown");
    handle.await.unwrap();
}

#[tokio::test]
async fn stalled_target_does_not_block_other_targets() {
    let now = Utc::now().timestamp();
    let items = json!([
        {"id": 333, "time": now, "type": "MailProcessing", "eventName": "ScanLogic"},
    ]);
    let stalled = spawn_stalled_target().await;
    let (live, _appliance) = spawn_appliance(items).await;

    // The stalled target is listed first: its login times out at 500ms,
    // gets logged and skipped, and the live target still produces.
    let (service, mut stream) =
        Service::with_pacing(opts(vec![stalled, live]), Pacing::none()).unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(service.run(shutdown_rx));

    let record = timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("live target record despite stalled sibling")
        .expect("stream open");
    assert_eq!(record.id, 333);

    shutdown_tx.send(true).unwrap();
    assert!(timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("closure within one interval")
        .is_none());
    handle.await.unwrap();
}

#[tokio::test]
async fn shutdown_interrupts_a_blocked_send() {
    let now = Utc::now().timestamp();
    // Three fresh items against a capacity-one channel: with no consumer
    // reading, the second send blocks.
    let items = json!([
        {"id": 1, "time": now, "type": "MailProcessing", "eventName": "ScanLogic"},
        {"id": 2, "time": now, "type": "MailProcessing", "eventName": "ScanLogic"},
        {"id": 3, "time": now, "type": "MailProcessing", "eventName": "ScanLogic"},
    ]);
    let (url, _appliance) = spawn_appliance(items).await;

    let (service, mut stream) = Service::with_pacing(opts(vec![url]), Pacing::none()).unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(service.run(shutdown_rx));

    // Give the loop time to fill the channel and block on the next send,
    // then fire shutdown without consuming anything.
    tokio::time::sleep(Duration::from_millis(500)).await;
    shutdown_tx.send(true).unwrap();

    // The loop must notice shutdown and finish rather than deadlock.
    timeout(Duration::from_secs(2), handle)
        .await
        .expect("run loop exits after shutdown")
        .unwrap();

    // The already-buffered record drains, then the stream closes.
    let mut drained = 0;
    while let Some(record) = stream.next().await {
        assert!(record.id >= 1 && record.id <= 3);
        drained += 1;
    }
    assert!(drained <= 1, "at most the buffered record drains");
}
