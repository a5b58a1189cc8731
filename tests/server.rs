//! HTTP shell tests: a real server on a free port, driven with reqwest.

mod common;

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};

use common::*;
use finrag::server::run_server_with_backends;
use finrag::session::{Backends, UPLOAD_PROMPT};

// ─── Helpers ────────────────────────────────────────────────────────

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

/// Start a server with fake backends and return its base URL.
async fn start_server() -> String {
    start_server_with(backends(Arc::new(RoutingModel::default()))).await
}

async fn start_server_with(backends: Backends) -> String {
    let port = find_free_port();
    let mut config = test_config();
    config.server.bind = format!("127.0.0.1:{port}");

    tokio::spawn(async move {
        if let Err(e) = run_server_with_backends(&config, backends).await {
            eprintln!("server exited: {e}");
        }
    });
    wait_for_server(port).await;
    format!("http://127.0.0.1:{port}")
}

async fn create_session(client: &reqwest::Client, base: &str) -> String {
    let resp = client.post(format!("{base}/sessions")).send().await.unwrap();
    assert_eq!(resp.status(), 201);
    let body: Value = resp.json().await.unwrap();
    body["id"].as_str().unwrap().to_string()
}

fn upload_body(docs: &[finrag::models::Document]) -> Value {
    let files: Vec<Value> = docs
        .iter()
        .map(|d| json!({ "name": d.name, "content_base64": STANDARD.encode(&d.bytes) }))
        .collect();
    json!({ "files": files })
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health() {
    let base = start_server().await;
    let body: Value = reqwest::get(format!("{base}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_upload_and_chat() {
    let base = start_server().await;
    let client = reqwest::Client::new();
    let id = create_session(&client, &base).await;

    let resp = client
        .put(format!("{base}/sessions/{id}/documents"))
        .json(&upload_body(&[annual_report()]))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "rebuilt");
    assert_eq!(body["session_key"], "annual.pdf");
    assert!(body["chunks"].as_u64().unwrap() >= 2);

    let resp = client
        .post(format!("{base}/sessions/{id}/chat"))
        .json(&json!({ "question": "What was the revenue in 2023?" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["outcome"], "finished");
    assert!(body["answer"].as_str().unwrap().contains("$10 million"));

    let body: Value = client
        .get(format!("{base}/sessions/{id}/history"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[1]["role"], "assistant");
}

#[tokio::test]
async fn test_chat_before_upload() {
    let base = start_server().await;
    let client = reqwest::Client::new();
    let id = create_session(&client, &base).await;

    let body: Value = client
        .post(format!("{base}/sessions/{id}/chat"))
        .json(&json!({ "question": "What was the revenue?" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["outcome"], "no_documents");
    assert_eq!(body["answer"], UPLOAD_PROMPT);
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let base = start_server().await;
    let client = reqwest::Client::new();
    let a = create_session(&client, &base).await;
    let b = create_session(&client, &base).await;

    client
        .put(format!("{base}/sessions/{a}/documents"))
        .json(&upload_body(&[annual_report()]))
        .send()
        .await
        .unwrap();

    let body: Value = client
        .post(format!("{base}/sessions/{b}/chat"))
        .json(&json!({ "question": "What was the revenue in 2023?" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["outcome"], "no_documents");
}

#[tokio::test]
async fn test_bad_upload_is_unprocessable() {
    let base = start_server().await;
    let client = reqwest::Client::new();
    let id = create_session(&client, &base).await;

    let broken = finrag::models::Document::new("scan.pdf", b"GIF89a".to_vec());
    let resp = client
        .put(format!("{base}/sessions/{id}/documents"))
        .json(&upload_body(&[broken]))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 422);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "load_error");
    assert!(body["error"]["message"].as_str().unwrap().contains("scan.pdf"));

    let resp = client
        .put(format!("{base}/sessions/{id}/documents"))
        .json(&json!({ "files": [{ "name": "a.pdf", "content_base64": "***" }] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_empty_question_is_rejected() {
    let base = start_server().await;
    let client = reqwest::Client::new();
    let id = create_session(&client, &base).await;

    let resp = client
        .post(format!("{base}/sessions/{id}/chat"))
        .json(&json!({ "question": "   " }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_unknown_and_deleted_sessions() {
    let base = start_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{base}/sessions/nope/history"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let id = create_session(&client, &base).await;
    let resp = client
        .delete(format!("{base}/sessions/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    let resp = client
        .delete(format!("{base}/sessions/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_clear_documents() {
    let base = start_server().await;
    let client = reqwest::Client::new();
    let id = create_session(&client, &base).await;

    client
        .put(format!("{base}/sessions/{id}/documents"))
        .json(&upload_body(&[annual_report()]))
        .send()
        .await
        .unwrap();
    let resp = client
        .delete(format!("{base}/sessions/{id}/documents"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    let body: Value = client
        .post(format!("{base}/sessions/{id}/chat"))
        .json(&json!({ "question": "What was the revenue?" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["outcome"], "no_documents");
}

#[tokio::test]
async fn test_embedding_outage_is_bad_gateway() {
    let base = start_server_with(Backends {
        embedder: Arc::new(RefusingEmbedder::new("revenue")),
        model: Arc::new(RoutingModel::default()),
    })
    .await;
    let client = reqwest::Client::new();
    let id = create_session(&client, &base).await;

    let resp = client
        .put(format!("{base}/sessions/{id}/documents"))
        .json(&upload_body(&[annual_report()]))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 502);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "embedding_error");
}

#[tokio::test]
async fn test_duplicate_or_piped_names_are_rejected() {
    let base = start_server().await;
    let client = reqwest::Client::new();
    let id = create_session(&client, &base).await;

    let resp = client
        .put(format!("{base}/sessions/{id}/documents"))
        .json(&upload_body(&[annual_report(), annual_report()]))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("duplicate document name"));

    let piped = finrag::models::Document::new("a|b.pdf", annual_report().bytes);
    let resp = client
        .put(format!("{base}/sessions/{id}/documents"))
        .json(&upload_body(&[piped]))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}
