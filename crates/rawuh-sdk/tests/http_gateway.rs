use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use rawuh_sdk::{
    AttendanceStatus, ErrorKind, GatewayClient, GatewayConfig, SessionGateway, SessionId,
    SessionMode,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;

type Log = Arc<Mutex<Vec<String>>>;

fn record(log: &Log, line: String) {
    log.lock().unwrap().push(line);
}

async fn start_v1(State(log): State<Log>, Json(body): Json<Value>) -> Json<Value> {
    record(&log, format!("POST v1 start {body}"));
    Json(json!({
        "success": true,
        "data": {
            "session_id": "s-v1",
            "token": "QR-1",
            "expires_at": "2024-03-01T08:01:30Z",
            "week": body["week"],
        }
    }))
}

async fn start_v2(State(log): State<Log>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    record(&log, format!("POST v2 start {body}"));
    (
        StatusCode::CONFLICT,
        Json(json!({ "error": "Session already active for this class" })),
    )
}

async fn token(State(log): State<Log>, Path(id): Path<String>) -> Json<Value> {
    record(&log, format!("GET token {id}"));
    Json(json!({
        "success": true,
        "data": { "token": "QR-2", "expires_at": "2024-03-01T08:02:00Z" }
    }))
}

async fn close_v1(State(log): State<Log>, Path(id): Path<String>) -> Json<Value> {
    record(&log, format!("POST v1 close {id}"));
    Json(json!({ "success": true, "message": "Session closed" }))
}

async fn close_v2(State(log): State<Log>, Path(id): Path<String>) -> (StatusCode, &'static str) {
    record(&log, format!("POST v2 close {id}"));
    (StatusCode::BAD_GATEWAY, "<html>upstream down</html>")
}

async fn history(Path(class_id): Path<u64>) -> (StatusCode, Json<Value>) {
    if class_id == 500 {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "detail": "boom" })));
    }
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "data": [
                { "session_id": "a", "week": 2, "is_active": true, "created_at": "2024-03-08T08:00:00Z" },
                { "session_id": "b", "week": 1, "is_active": false, "total_students": 30, "present_count": 28 }
            ]
        })),
    )
}

async fn active() -> Json<Value> {
    Json(json!({ "success": true, "data": null }))
}

async fn roster(Path(id): Path<String>) -> Json<Value> {
    if id == "empty" {
        return Json(json!({ "success": true, "data": { "students": null } }));
    }
    Json(json!({
        "success": true,
        "data": {
            "students": [
                { "student_id": 42, "name": "Ayu", "nim": "2101", "status": "p", "recorded_at": "2024-03-01T08:05:00Z" },
                { "id": 43, "name": "Budi", "nim": "2102", "status": null, "recorded_at": null }
            ]
        }
    }))
}

async fn presence(
    State(log): State<Log>,
    Path((id, student)): Path<(String, u64)>,
    Json(body): Json<Value>,
) -> Json<Value> {
    record(&log, format!("PATCH {id}/{student} {body}"));
    if student == 99 {
        return Json(json!({ "success": false, "message": "Student is not enrolled" }));
    }
    Json(json!({ "success": true }))
}

async fn spawn_gateway() -> (GatewayClient, Log) {
    let log: Log = Arc::default();
    let router = Router::new()
        .route("/api/v1/session/start", post(start_v1))
        .route("/api/v2/session/start", post(start_v2))
        .route("/api/v1/session/:id/token", get(token))
        .route("/api/v1/session/:id/close", post(close_v1))
        .route("/api/v2/session/:id/close", post(close_v2))
        .route("/api/v2/sessions", get(active))
        .route("/api/v2/sessions/history/:class_id", get(history))
        .route("/api/v1/session/:id/students", get(roster))
        .route("/api/v1/session/:id/presence/:student", patch(presence))
        .with_state(log.clone());
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    let config = GatewayConfig::default().with_base_url(format!("http://{addr}/"));
    let client = GatewayClient::new(&config).expect("client");
    (client, log)
}

#[tokio::test]
async fn starts_token_session_and_refreshes_token() {
    let (client, log) = spawn_gateway().await;

    let started = client.start_token_session(7, 3).await.expect("start");
    assert_eq!(started.session_id.as_str(), "s-v1");
    assert_eq!(started.token, "QR-1");
    assert_eq!(started.week, 3);

    let grant = client.fetch_token(&started.session_id).await.expect("token");
    assert_eq!(grant.token, "QR-2");
    assert!(grant.expires_at > started.expires_at);

    let log = log.lock().unwrap().clone();
    assert_eq!(log[0], r#"POST v1 start {"class_id":7,"week":3}"#);
    assert_eq!(log[1], "GET token s-v1");
}

#[tokio::test]
async fn rejection_message_is_propagated_verbatim() {
    let (client, _log) = spawn_gateway().await;

    let err = client.start_tokenless_session(7, 3).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Rejected);
    assert_eq!(err.to_string(), "Session already active for this class");
}

#[tokio::test]
async fn error_bodies_without_message_fall_back() {
    let (client, _log) = spawn_gateway().await;

    let err = client
        .close_session(SessionMode::Tokenless, &SessionId::from("x"))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Request failed");

    let err = client.session_history(500).await.unwrap_err();
    assert_eq!(err.to_string(), "HTTP 500");
}

#[tokio::test]
async fn close_routes_by_mode() {
    let (client, log) = spawn_gateway().await;

    client
        .close_session(SessionMode::Token, &SessionId::from("s-v1"))
        .await
        .expect("close v1");
    let _ = client
        .close_session(SessionMode::Tokenless, &SessionId::from("s-v2"))
        .await;

    let log = log.lock().unwrap().clone();
    assert_eq!(log, vec!["POST v1 close s-v1", "POST v2 close s-v2"]);
}

#[tokio::test]
async fn lists_history_and_tolerates_null_data() {
    let (client, _log) = spawn_gateway().await;

    let history = client.session_history(7).await.expect("history");
    assert_eq!(history.len(), 2);
    assert!(history[0].is_open());
    assert!(!history[1].is_open());
    assert_eq!(history[1].present_count, Some(28));

    let active = client.active_sessions().await.expect("active");
    assert!(active.is_empty());
}

#[tokio::test]
async fn roster_unwraps_students_payload() {
    let (client, _log) = spawn_gateway().await;

    let roster = client
        .session_roster(&SessionId::from("s-v1"))
        .await
        .expect("roster");
    assert_eq!(roster.len(), 2);
    assert_eq!(roster[0].student_key(), Some(42));
    assert_eq!(roster[0].status, Some(AttendanceStatus::Present));
    assert_eq!(roster[1].student_key(), Some(43));
    assert_eq!(roster[1].status, None);

    let empty = client
        .session_roster(&SessionId::from("empty"))
        .await
        .expect("empty roster");
    assert!(empty.is_empty());
}

#[tokio::test]
async fn attendance_patch_sends_status_code() {
    let (client, log) = spawn_gateway().await;
    let session = SessionId::from("s-v1");

    client
        .update_attendance(&session, 42, AttendanceStatus::Absent)
        .await
        .expect("patch");
    let err = client
        .update_attendance(&session, 99, AttendanceStatus::Sick)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Student is not enrolled");

    let log = log.lock().unwrap().clone();
    assert_eq!(log[0], r#"PATCH s-v1/42 {"status":"a"}"#);
    assert_eq!(log[1], r#"PATCH s-v1/99 {"status":"s"}"#);
}

#[tokio::test]
async fn unreachable_gateway_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let config = GatewayConfig::default().with_base_url(format!("http://{addr}"));
    let client = GatewayClient::new(&config).expect("client");
    let err = client.active_sessions().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
}
