//! End-to-end tests for the review flow.
//!
//! Providers are mocked with wiremock SSE responses; clients connect to
//! a real gateway bound to an ephemeral port. Redis is not involved:
//! jobs are handed straight to the dispatcher.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use reviewd::gateway::{self, ConnectionRegistry};
use reviewd::llm::{
    GeminiReviewer, OpenAiReviewer, ProviderKind, ReviewProvider, ReviewerSet,
    DEFAULT_GEMINI_MODEL, DEFAULT_OPENAI_MODEL,
};
use reviewd::scheduler::{dispatch_job, DispatchOutcome, Job};
use reviewd::LlmError;

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Builds an SSE body from data-line payloads.
fn sse_body(payloads: &[&str]) -> String {
    payloads
        .iter()
        .map(|payload| format!("data: {payload}\n\n"))
        .collect()
}

fn openai_chunk(text: &str) -> String {
    serde_json::json!({"choices": [{"delta": {"content": text}}]}).to_string()
}

fn gemini_chunk(text: &str) -> String {
    serde_json::json!({"candidates": [{"content": {"parts": [{"text": text}]}}]}).to_string()
}

/// SSE stream delivering `content` split across two chunks.
fn openai_stream_of(content: &str) -> String {
    let (head, tail) = content.split_at(content.len() / 2);
    sse_body(&[&openai_chunk(head), &openai_chunk(tail), "[DONE]"])
}

async fn mount_openai_review(server: &MockServer, file_marker: &str, review_json: &str) {
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains(file_marker))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(openai_stream_of(review_json), "text/event-stream"),
        )
        .mount(server)
        .await;
}

fn openai_reviewers(server: &MockServer) -> ReviewerSet {
    ReviewerSet::new().with_openai(Arc::new(OpenAiReviewer::with_custom_url(
        "test-key".to_string(),
        server.uri(),
        DEFAULT_OPENAI_MODEL.to_string(),
    )))
}

fn gemini_reviewers(server: &MockServer) -> ReviewerSet {
    ReviewerSet::new().with_gemini(Arc::new(GeminiReviewer::with_custom_url(
        "test-key".to_string(),
        server.uri(),
        DEFAULT_GEMINI_MODEL.to_string(),
    )))
}

/// Project with a.py at the root and c.py one directory down.
fn project_with_two_files() -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    std::fs::write(dir.path().join("a.py"), "print('a')\n").expect("write a.py");
    std::fs::create_dir(dir.path().join("b")).expect("create b/");
    std::fs::write(dir.path().join("b").join("c.py"), "print('c')\n").expect("write c.py");
    dir
}

async fn start_gateway() -> (Arc<ConnectionRegistry>, SocketAddr) {
    let registry = Arc::new(ConnectionRegistry::new());
    let (addr, _server) = gateway::bind("127.0.0.1:0", Arc::clone(&registry))
        .await
        .expect("gateway should bind");
    (registry, addr)
}

/// Connects a WebSocket client and returns it with its assigned id.
async fn connect_client(addr: SocketAddr) -> (WsClient, String) {
    let (mut ws, _) = connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("client should connect");

    let hello: serde_json::Value =
        serde_json::from_str(&next_text(&mut ws).await).expect("hello frame should be JSON");
    let id = hello["id"]
        .as_str()
        .expect("hello frame should carry an id")
        .to_string();

    (ws, id)
}

async fn next_text(ws: &mut WsClient) -> String {
    loop {
        let msg = tokio::time::timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed before the expected frame")
            .expect("websocket transport error");

        if let Message::Text(text) = msg {
            return text.to_string();
        }
    }
}

async fn next_json(ws: &mut WsClient) -> serde_json::Value {
    serde_json::from_str(&next_text(ws).await).expect("frame should be JSON")
}

#[tokio::test]
async fn openai_reviews_stream_in_corpus_order() {
    let server = MockServer::start().await;
    mount_openai_review(
        &server,
        "a.py",
        r#"{"message": "Use a logger instead of print", "code": "import logging"}"#,
    )
    .await;
    mount_openai_review(&server, "c.py", r#"{"message": "Clean"}"#).await;

    let project = project_with_two_files();
    let (registry, addr) = start_gateway().await;
    let (mut ws, id) = connect_client(addr).await;

    let job = Job::new(
        ProviderKind::OpenAi,
        project.path().display().to_string(),
        id,
    );
    let outcome = dispatch_job(&job, &registry, &openai_reviewers(&server)).await;

    match outcome {
        DispatchOutcome::Completed(outcome) => {
            assert_eq!(outcome.files_reviewed, 2);
            assert_eq!(outcome.files_failed, 0);
            assert!(!outcome.aborted);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    let first = next_json(&mut ws).await;
    assert!(first["filePath"].as_str().unwrap().ends_with("a.py"));
    assert_eq!(first["review"]["message"], "Use a logger instead of print");
    assert_eq!(first["review"]["code"], "import logging");

    let second = next_json(&mut ws).await;
    assert!(second["filePath"].as_str().unwrap().ends_with("c.py"));
    assert_eq!(second["review"]["message"], "Clean");
    assert!(second["review"].get("code").is_none());

    assert_eq!(next_text(&mut ws).await, "[DONE]");
}

#[tokio::test]
async fn gemini_reviews_stream_to_the_client() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!(
            "/models/{DEFAULT_GEMINI_MODEL}:streamGenerateContent"
        )))
        .and(query_param("alt", "sse"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            sse_body(&[
                &gemini_chunk(r#"{"message": "Handle"#),
                &gemini_chunk(r#" the error case"}"#),
            ]),
            "text/event-stream",
        ))
        .mount(&server)
        .await;

    let project = tempfile::tempdir().expect("tempdir should be created");
    std::fs::write(project.path().join("main.py"), "open('f')\n").expect("write main.py");

    let (registry, addr) = start_gateway().await;
    let (mut ws, id) = connect_client(addr).await;

    let job = Job::new(
        ProviderKind::Gemini,
        project.path().display().to_string(),
        id,
    );
    let outcome = dispatch_job(&job, &registry, &gemini_reviewers(&server)).await;

    match outcome {
        DispatchOutcome::Completed(outcome) => assert_eq!(outcome.files_reviewed, 1),
        other => panic!("unexpected outcome: {other:?}"),
    }

    let result = next_json(&mut ws).await;
    assert!(result["filePath"].as_str().unwrap().ends_with("main.py"));
    assert_eq!(result["review"]["message"], "Handle the error case");

    assert_eq!(next_text(&mut ws).await, "[DONE]");
}

#[tokio::test]
async fn provider_error_still_reviews_remaining_files() {
    let server = MockServer::start().await;
    // First request fails with a non-retryable status, the rest succeed.
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(serde_json::json!({"error": {"message": "content too large"}})),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(openai_stream_of(r#"{"message": "Clean"}"#), "text/event-stream"),
        )
        .mount(&server)
        .await;

    let project = project_with_two_files();
    let (registry, addr) = start_gateway().await;
    let (mut ws, id) = connect_client(addr).await;

    let job = Job::new(
        ProviderKind::OpenAi,
        project.path().display().to_string(),
        id,
    );
    let outcome = dispatch_job(&job, &registry, &openai_reviewers(&server)).await;

    match outcome {
        DispatchOutcome::Completed(outcome) => {
            assert_eq!(outcome.files_reviewed, 1);
            assert_eq!(outcome.files_failed, 1);
            assert!(!outcome.aborted);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    let first = next_json(&mut ws).await;
    assert!(first["filePath"].as_str().unwrap().ends_with("a.py"));
    let message = first["review"]["message"].as_str().unwrap();
    assert!(message.starts_with("Review failed"), "got: {message}");
    assert!(message.contains("content too large"), "got: {message}");

    let second = next_json(&mut ws).await;
    assert_eq!(second["review"]["message"], "Clean");

    assert_eq!(next_text(&mut ws).await, "[DONE]");
}

#[tokio::test]
async fn unparseable_output_is_passed_through_as_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            sse_body(&[&openai_chunk("Looks good to me."), "[DONE]"]),
            "text/event-stream",
        ))
        .mount(&server)
        .await;

    let project = tempfile::tempdir().expect("tempdir should be created");
    std::fs::write(project.path().join("ok.py"), "pass\n").expect("write ok.py");

    let (registry, addr) = start_gateway().await;
    let (mut ws, id) = connect_client(addr).await;

    let job = Job::new(
        ProviderKind::OpenAi,
        project.path().display().to_string(),
        id,
    );
    dispatch_job(&job, &registry, &openai_reviewers(&server)).await;

    let result = next_json(&mut ws).await;
    assert_eq!(result["review"]["message"], "Looks good to me.");
    assert!(result["review"].get("code").is_none());

    assert_eq!(next_text(&mut ws).await, "[DONE]");
}

#[tokio::test]
async fn empty_project_sends_only_the_terminator() {
    let server = MockServer::start().await;
    let project = tempfile::tempdir().expect("tempdir should be created");

    let (registry, addr) = start_gateway().await;
    let (mut ws, id) = connect_client(addr).await;

    let job = Job::new(
        ProviderKind::OpenAi,
        project.path().display().to_string(),
        id,
    );
    let outcome = dispatch_job(&job, &registry, &openai_reviewers(&server)).await;

    match outcome {
        DispatchOutcome::Completed(outcome) => {
            assert_eq!(outcome.files_reviewed, 0);
            assert!(!outcome.aborted);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    assert_eq!(next_text(&mut ws).await, "[DONE]");
    assert!(server
        .received_requests()
        .await
        .expect("request recording enabled")
        .is_empty());
}

#[tokio::test]
async fn missing_project_reports_failure_then_terminator() {
    let server = MockServer::start().await;
    let parent = tempfile::tempdir().expect("tempdir should be created");
    let missing = parent.path().join("missing");

    let (registry, addr) = start_gateway().await;
    let (mut ws, id) = connect_client(addr).await;

    let job = Job::new(ProviderKind::OpenAi, missing.display().to_string(), id);
    let outcome = dispatch_job(&job, &registry, &openai_reviewers(&server)).await;

    match outcome {
        DispatchOutcome::Completed(outcome) => assert!(outcome.aborted),
        other => panic!("unexpected outcome: {other:?}"),
    }

    let result = next_json(&mut ws).await;
    assert_eq!(result["filePath"], missing.display().to_string());
    let message = result["review"]["message"].as_str().unwrap();
    assert!(
        message.contains("Could not load project files"),
        "got: {message}"
    );

    assert_eq!(next_text(&mut ws).await, "[DONE]");
}

#[tokio::test]
async fn job_for_unknown_connection_is_dropped() {
    let server = MockServer::start().await;
    let registry = ConnectionRegistry::new();

    let job = Job::new(ProviderKind::OpenAi, "/srv/project", "gone");
    let outcome = dispatch_job(&job, &registry, &openai_reviewers(&server)).await;

    assert_eq!(outcome, DispatchOutcome::Undeliverable);
    assert!(server
        .received_requests()
        .await
        .expect("request recording enabled")
        .is_empty());
}

#[tokio::test]
async fn unconfigured_provider_gets_error_and_terminator() {
    let server = MockServer::start().await;
    let project = project_with_two_files();

    let (registry, addr) = start_gateway().await;
    let (mut ws, id) = connect_client(addr).await;

    // Only openai is configured; the job asks for gemini.
    let job = Job::new(
        ProviderKind::Gemini,
        project.path().display().to_string(),
        id,
    );
    let outcome = dispatch_job(&job, &registry, &openai_reviewers(&server)).await;

    match outcome {
        DispatchOutcome::Completed(outcome) => {
            assert!(outcome.aborted);
            assert_eq!(outcome.files_reviewed, 0);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    let result = next_json(&mut ws).await;
    let message = result["review"]["message"].as_str().unwrap();
    assert!(message.contains("gemini"), "got: {message}");

    assert_eq!(next_text(&mut ws).await, "[DONE]");
}

#[tokio::test]
async fn openai_adapter_accumulates_streamed_chunks() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            sse_body(&[
                &openai_chunk("Hel"),
                &openai_chunk("lo "),
                &openai_chunk("world!"),
                "[DONE]",
                &openai_chunk("IGNORED"),
            ]),
            "text/event-stream",
        ))
        .mount(&server)
        .await;

    let reviewer = OpenAiReviewer::with_custom_url(
        "test-key".to_string(),
        server.uri(),
        DEFAULT_OPENAI_MODEL.to_string(),
    );
    let raw = reviewer
        .review("a.py", "print('a')")
        .await
        .expect("review should succeed");

    assert_eq!(raw, "Hello world!");
}

#[tokio::test]
async fn gemini_adapter_accumulates_streamed_parts() {
    let server = MockServer::start().await;
    let multi_part =
        serde_json::json!({"candidates": [{"content": {"parts": [{"text": "Hel"}, {"text": "lo "}]}}]})
            .to_string();
    Mock::given(method("POST"))
        .and(path(format!(
            "/models/{DEFAULT_GEMINI_MODEL}:streamGenerateContent"
        )))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            sse_body(&[&multi_part, &gemini_chunk("Gemini")]),
            "text/event-stream",
        ))
        .mount(&server)
        .await;

    let reviewer = GeminiReviewer::with_custom_url(
        "test-key".to_string(),
        server.uri(),
        DEFAULT_GEMINI_MODEL.to_string(),
    );
    let raw = reviewer
        .review("a.py", "print('a')")
        .await
        .expect("review should succeed");

    assert_eq!(raw, "Hello Gemini");
}

#[tokio::test]
async fn openai_adapter_surfaces_api_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(serde_json::json!({"error": {"message": "bad request body"}})),
        )
        .mount(&server)
        .await;

    let reviewer = OpenAiReviewer::with_custom_url(
        "test-key".to_string(),
        server.uri(),
        DEFAULT_OPENAI_MODEL.to_string(),
    );
    let err = reviewer
        .review("a.py", "print('a')")
        .await
        .expect_err("400 should fail the review");

    match err {
        LlmError::ApiError { code, message } => {
            assert_eq!(code, 400);
            assert_eq!(message, "bad request body");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn gemini_adapter_surfaces_api_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!(
            "/models/{DEFAULT_GEMINI_MODEL}:streamGenerateContent"
        )))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": {"code": 400, "message": "API key not valid", "status": "INVALID_ARGUMENT"}
        })))
        .mount(&server)
        .await;

    let reviewer = GeminiReviewer::with_custom_url(
        "test-key".to_string(),
        server.uri(),
        DEFAULT_GEMINI_MODEL.to_string(),
    );
    let err = reviewer
        .review("a.py", "print('a')")
        .await
        .expect_err("400 should fail the review");

    match err {
        LlmError::ApiError { code, message } => {
            assert_eq!(code, 400);
            assert_eq!(message, "API key not valid");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}
