//! HTTP-level tests for the support chat API, run against the in-memory store.

use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::{
    multipart::{MultipartForm, Part},
    TestRequest, TestServer,
};
use motormatch_support::app::{router, AppState};
use serde_json::{json, Value};
use tempfile::TempDir;

fn test_server() -> (TestServer, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let state = Arc::new(AppState::in_memory(dir.path()));
    (TestServer::new(router(state)).unwrap(), dir)
}

fn header(request: TestRequest, name: &'static str, value: &str) -> TestRequest {
    request.add_header(
        HeaderName::from_static(name),
        HeaderValue::from_str(value).unwrap(),
    )
}

fn as_guest(request: TestRequest, token: &str) -> TestRequest {
    header(request, "x-guest-token", token)
}

fn as_agent(request: TestRequest, id: &str) -> TestRequest {
    let request = header(request, "x-user-id", id);
    header(request, "x-user-role", "agent")
}

#[tokio::test]
async fn guest_and_agent_conversation() {
    let (server, _dir) = test_server();

    let opened = as_guest(server.get("/api/chat"), "guest-abc").await;
    opened.assert_status_ok();
    let opened = opened.json::<Value>();
    let session_id = opened["session"]["id"].as_str().unwrap().to_string();
    assert_eq!(opened["session"]["status"], "Waiting");
    assert_eq!(opened["channel"], format!("session:{session_id}"));
    assert_eq!(opened["unreadPollSeconds"], 5);

    let sent = as_guest(server.post("/api/chat/messages"), "guest-abc")
        .json(&json!({ "text": "Hello" }))
        .await;
    sent.assert_status(StatusCode::CREATED);
    assert_eq!(sent.json::<Value>()["sessionId"], session_id.as_str());

    let queue = as_agent(server.get("/api/support/queue"), "agent-1")
        .await
        .json::<Value>();
    assert_eq!(queue["waiting"][0]["id"], session_id.as_str());

    let claimed = as_agent(
        server.post(&format!("/api/support/sessions/{session_id}/claim")),
        "agent-1",
    )
    .await;
    claimed.assert_status_ok();
    assert_eq!(claimed.json::<Value>()["status"], "Active");

    as_agent(
        server.post(&format!("/api/support/sessions/{session_id}/messages")),
        "agent-1",
    )
    .json(&json!({ "text": "Hi, how can I help?" }))
    .await
    .assert_status(StatusCode::CREATED);

    let unread = as_guest(server.get("/api/chat/unread-count"), "guest-abc").await;
    unread.assert_json(&json!({ "unreadCount": 1 }));

    let marked = as_guest(server.post("/api/chat/read"), "guest-abc").await;
    marked.assert_json(&json!({ "count": 1 }));
    as_guest(server.post("/api/chat/read"), "guest-abc")
        .await
        .assert_json(&json!({ "count": 0 }));
    as_guest(server.get("/api/chat/unread-count"), "guest-abc")
        .await
        .assert_json(&json!({ "unreadCount": 0 }));

    let history = as_guest(
        server.get(&format!("/api/chat/sessions/{session_id}/messages")),
        "guest-abc",
    )
    .await
    .json::<Vec<Value>>();
    let roles = history
        .iter()
        .map(|m| m["senderRole"].as_str().unwrap())
        .collect::<Vec<_>>();
    assert_eq!(roles, vec!["Customer", "System", "Agent"]);
}

#[tokio::test]
async fn second_claim_is_a_conflict() {
    let (server, _dir) = test_server();
    let opened = as_guest(server.get("/api/chat"), "guest-abc")
        .await
        .json::<Value>();
    let session_id = opened["session"]["id"].as_str().unwrap().to_string();
    let claim_path = format!("/api/support/sessions/{session_id}/claim");

    as_agent(server.post(&claim_path), "agent-1")
        .await
        .assert_status_ok();
    let lost = as_agent(server.post(&claim_path), "agent-2").await;
    lost.assert_status(StatusCode::CONFLICT);
    assert_eq!(lost.json::<Value>()["error"], "this conversation was already taken");
}

#[tokio::test]
async fn customers_cannot_use_the_support_desk() {
    let (server, _dir) = test_server();
    as_guest(server.get("/api/support/queue"), "guest-abc")
        .await
        .assert_status(StatusCode::FORBIDDEN);

    let opened = as_guest(server.get("/api/chat"), "guest-abc")
        .await
        .json::<Value>();
    let session_id = opened["session"]["id"].as_str().unwrap().to_string();
    as_guest(
        server.post(&format!("/api/support/sessions/{session_id}/claim")),
        "guest-abc",
    )
    .await
    .assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn agents_only_write_to_their_own_chats() {
    let (server, _dir) = test_server();
    let opened = as_guest(server.get("/api/chat"), "guest-abc")
        .await
        .json::<Value>();
    let session_id = opened["session"]["id"].as_str().unwrap().to_string();

    as_agent(
        server.post(&format!("/api/support/sessions/{session_id}/claim")),
        "agent-1",
    )
    .await
    .assert_status_ok();

    as_agent(
        server.post(&format!("/api/support/sessions/{session_id}/messages")),
        "agent-2",
    )
    .json(&json!({ "text": "hijack" }))
    .await
    .assert_status(StatusCode::FORBIDDEN);

    as_agent(
        server.get(&format!("/api/support/sessions/{session_id}")),
        "agent-2",
    )
    .await
    .assert_status(StatusCode::FORBIDDEN);

    as_agent(
        server.post(&format!("/api/support/sessions/{session_id}/close")),
        "agent-2",
    )
    .await
    .assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn closed_conversation_rejects_messages_and_reopens_fresh() {
    let (server, _dir) = test_server();
    let opened = as_guest(server.get("/api/chat"), "guest-abc")
        .await
        .json::<Value>();
    let session_id = opened["session"]["id"].as_str().unwrap().to_string();

    as_agent(
        server.post(&format!("/api/support/sessions/{session_id}/claim")),
        "agent-1",
    )
    .await
    .assert_status_ok();
    as_agent(
        server.post(&format!("/api/support/sessions/{session_id}/close")),
        "agent-1",
    )
    .await
    .assert_status_ok();

    as_agent(
        server.post(&format!("/api/support/sessions/{session_id}/messages")),
        "agent-1",
    )
    .json(&json!({ "text": "one more thing" }))
    .await
    .assert_status(StatusCode::CONFLICT);

    let reopened = as_guest(server.get("/api/chat"), "guest-abc")
        .await
        .json::<Value>();
    assert_ne!(reopened["session"]["id"], session_id.as_str());
    assert_eq!(reopened["session"]["status"], "Waiting");
}

#[tokio::test]
async fn attachment_upload_is_stored_and_served() {
    let (server, _dir) = test_server();
    let part = Part::bytes(b"%PDF-1.4 test".to_vec())
        .file_name("invoice.pdf")
        .mime_type("application/pdf");
    let form = MultipartForm::new().add_part("file", part);

    let uploaded = as_guest(server.post("/api/chat/attachments"), "guest-abc")
        .multipart(form)
        .await;
    uploaded.assert_status(StatusCode::CREATED);
    let body = uploaded.json::<Value>();
    assert_eq!(body["message"]["textContent"], "Sent attachment: invoice.pdf");
    assert_eq!(body["attachment"]["mediaKind"], "pdf");

    let path = body["attachment"]["storagePath"].as_str().unwrap().to_string();
    assert!(path.starts_with("/attachments/"));
    assert!(path.ends_with("_invoice.pdf"));

    let served = server.get(&path).await;
    served.assert_status_ok();
    assert_eq!(served.header("content-type"), "application/pdf");
    assert_eq!(&served.as_bytes()[..], b"%PDF-1.4 test");
}

#[tokio::test]
async fn executable_uploads_are_rejected() {
    let (server, _dir) = test_server();
    let part = Part::bytes(b"MZ".to_vec())
        .file_name("setup.exe")
        .mime_type("application/octet-stream");
    let form = MultipartForm::new().add_part("file", part);

    let rejected = as_guest(server.post("/api/chat/attachments"), "guest-abc")
        .multipart(form)
        .await;
    rejected.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(
        rejected.json::<Value>()["error"],
        "Invalid file type. Allowed: PDF, images, videos"
    );
}

#[tokio::test]
async fn requests_without_identity_are_unauthenticated() {
    let (server, _dir) = test_server();
    let response = server.get("/api/chat").await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(response.json::<Value>()["status"], 401);
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let (server, _dir) = test_server();
    as_agent(server.post("/api/support/sessions/missing/claim"), "agent-1")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_reports_ok() {
    let (server, _dir) = test_server();
    let response = server.get("/health").await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["ok"], true);
}
