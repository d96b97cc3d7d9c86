//! REST client and event stream against a local axum stand-in for the control service.
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, Query};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream;
use serde_json::{json, Value};

use hubwatch::actions::{Action, LifecycleVerb, Operation};
use hubwatch::stream::{CancelHandle, StreamChannel, StreamEvent, StreamSignal};
use hubwatch::{ApiError, ControlApi, HttpControlClient};

const TOKEN: &str = "secret";

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        == Some("Bearer secret")
}

fn denied() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"message": "Invalid token"})),
    )
        .into_response()
}

fn event_body(chunks: Vec<&'static str>, keep_open: bool) -> Response {
    let chunks = stream::iter(chunks.into_iter().map(Ok::<_, std::io::Error>));
    let body = if keep_open {
        Body::from_stream(futures::StreamExt::chain(chunks, stream::pending()))
    } else {
        Body::from_stream(chunks)
    };
    ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}

async fn deployment_stream(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return denied();
    }
    event_body(
        vec![
            ": hello\n\nevent: health\ndata: {\"healthy\":tr",
            "ue,\"timestamp\":1}\n\nevent: health\ndata: {broken\n\n",
            "event: appStatus\r\ndata: {\"appStatuses\":{\"web\":false,\"api\":null}}\r\n\r\n",
        ],
        false,
    )
}

async fn server_stream(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return denied();
    }
    event_body(
        vec!["event: serverHealth\ndata: {\"cpuUsage\":12.5,\"runningServices\":[{\"name\":\"nginx\",\"status\":\"active\"}]}\n\n"],
        true,
    )
}

async fn health(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return denied();
    }
    Json(json!({"healthy": true})).into_response()
}

async fn applications(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return denied();
    }
    Json(json!([
        {"name": "web", "application_url": "https://web.example.com", "build_type": "maven"},
        {"name": "batch"}
    ]))
    .into_response()
}

async fn app_health(Path(app): Path<String>) -> Response {
    Json(json!({"live": app == "web", "message": "probe"})).into_response()
}

async fn logs(Path(app): Path<String>, Query(q): Query<HashMap<String, String>>) -> Response {
    Json(json!({
        "applicationName": app,
        "success": true,
        "message": "",
        "data": {"logs": format!("{} lines", q.get("lines").map(String::as_str).unwrap_or("?"))}
    }))
    .into_response()
}

async fn deploy(Path(app): Path<String>, Json(body): Json<Value>) -> Response {
    assert_eq!(body, json!({}));
    if app == "broken" {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "message": "no artifact for broken"})),
        )
            .into_response();
    }
    Json(json!({"applicationName": app, "action": "deploy", "success": true, "message": "ok"}))
        .into_response()
}

async fn execute(Json(body): Json<Value>) -> Response {
    Json(json!({"success": true, "message": body["action"].clone()})).into_response()
}

async fn login(Json(body): Json<Value>) -> Response {
    if body["password"] == "hunter2" {
        Json(json!({"token": TOKEN, "type": "Bearer", "name": "Ops", "email": body["email"]}))
            .into_response()
    } else {
        denied()
    }
}

async fn spawn_server() -> SocketAddr {
    let app = Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/deployment/health", get(health))
        .route("/api/deployment/health/stream", get(deployment_stream))
        .route("/api/deployment/applications", get(applications))
        .route("/api/deployment/applications/:app/health", get(app_health))
        .route("/api/deployment/logs/:app", get(logs))
        .route("/api/deployment/deploy/:app", post(deploy))
        .route("/api/deployment/execute", post(execute))
        .route("/api/server/health/stream", get(server_stream));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn client(addr: SocketAddr) -> HttpControlClient {
    HttpControlClient::new(&format!("http://{addr}/api")).unwrap()
}

#[tokio::test]
async fn stream_decodes_split_events_and_skips_malformed() {
    let addr = spawn_server().await;
    let c = client(addr).with_token(TOKEN);
    let mut s = c
        .open_stream(StreamChannel::Deployment, CancelHandle::new())
        .await
        .unwrap();

    let mut seen = Vec::new();
    while let Some(sig) = tokio::time::timeout(Duration::from_secs(5), s.next())
        .await
        .expect("stream stalled")
    {
        match sig {
            StreamSignal::Event(ev) => seen.push(ev),
            StreamSignal::Closed => break,
            StreamSignal::Error(e) => panic!("unexpected error {e}"),
        }
    }
    assert_eq!(seen.len(), 2, "{seen:?}");
    assert!(matches!(&seen[0], StreamEvent::Health(h) if h.healthy));
    match &seen[1] {
        StreamEvent::AppStatus(p) => {
            assert_eq!(p.app_statuses.get("web"), Some(&Some(false)));
            assert_eq!(p.app_statuses.get("api"), Some(&None));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn cancelled_stream_goes_quiet() {
    let addr = spawn_server().await;
    let c = client(addr).with_token(TOKEN);
    let mut s = c
        .open_stream(StreamChannel::Server, CancelHandle::new())
        .await
        .unwrap();
    match s.next().await {
        Some(StreamSignal::Event(StreamEvent::ServerHealth(p))) => {
            assert_eq!(p.summary.cpu_usage, 12.5);
            assert_eq!(p.running_services[0].name, "nginx");
        }
        other => panic!("unexpected {other:?}"),
    }
    s.cancel();
    assert!(s.next().await.is_none());
}

#[tokio::test]
async fn rejected_token_surfaces_as_unauthenticated() {
    let addr = spawn_server().await;
    let c = client(addr).with_token("wrong");
    let err = c
        .open_stream(StreamChannel::Deployment, CancelHandle::new())
        .await
        .unwrap_err();
    assert!(err.is_unauthenticated());
    assert_eq!(err.user_message(), "Invalid token");
    assert!(c.health().await.unwrap_err().is_unauthenticated());
}

#[tokio::test]
async fn login_then_query() {
    let addr = spawn_server().await;
    let c = client(addr);
    assert!(!c.is_authenticated());
    assert!(c.login("ops@example.com", "nope").await.is_err());
    assert!(!c.is_authenticated());

    let auth = c.login("ops@example.com", "hunter2").await.unwrap();
    assert_eq!(auth.name.as_deref(), Some("Ops"));
    assert!(c.is_authenticated());
    assert!(c.health().await.unwrap().healthy);

    let apps = c.applications().await.unwrap();
    assert_eq!(apps.len(), 2);
    assert!(apps[0].has_live_check());
    assert!(c.app_live("web").await.unwrap());
    assert!(!c.app_live("batch").await.unwrap());

    c.logout();
    assert!(matches!(c.health().await, Err(ApiError::Unauthenticated)));
}

#[tokio::test]
async fn operations_hit_their_endpoints() {
    let addr = spawn_server().await;
    let c = client(addr).with_token(TOKEN);

    let r = c
        .perform(&Action::Lifecycle(LifecycleVerb::Deploy).operation("web"))
        .await
        .unwrap();
    assert!(r.success);
    assert_eq!(r.message, "ok");

    let r = c
        .perform(&Operation::Logs {
            app: "web".into(),
            lines: 50,
        })
        .await
        .unwrap();
    assert_eq!(hubwatch::actions::extract_logs(&r), "50 lines");

    let r = c
        .perform(&Action::parse("migrate").operation("web"))
        .await
        .unwrap();
    assert_eq!(r.message, "migrate");

    let err = c
        .perform(&Action::Lifecycle(LifecycleVerb::Deploy).operation("broken"))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Http { status: 400, .. }));
    assert_eq!(err.user_message(), "no artifact for broken");
}
