// Shared helpers for integration tests: mock OpenAI endpoints and test configuration

#![allow(dead_code, reason = "not every test binary uses every helper")]

use context_qa::config::Config;
use serde_json::{Value, json};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub const DIMENSION: usize = 6;

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// Configuration pointing at `server` and storing vectors under `temp_dir`
pub fn test_config(server: &MockServer, temp_dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.base_dir = temp_dir.path().to_path_buf();
    config.openai.api_key = Some("sk-test".to_string());
    config.openai.base_url = format!("{}/v1", server.uri());
    config.openai.embedding_dimension = DIMENSION;
    config.openai.retry_attempts = 1;
    config.openai.timeout_secs = 5;
    config
}

/// Bag-of-words vector: every word bumps one bucket
pub fn word_vector(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0_f32; DIMENSION];
    for word in text.split_whitespace() {
        let word = word
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        let bucket = word.bytes().map(usize::from).sum::<usize>() % DIMENSION;
        vector[bucket] += 1.0;
    }
    // The zero vector has no direction; keep it distinguishable
    if vector.iter().all(|v| *v == 0.0) {
        vector[0] = 1.0;
    }
    vector
}

/// Embeddings endpoint answering with [`word_vector`] of the request input
struct WordVectorResponder;

impl Respond for WordVectorResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = match serde_json::from_slice(&request.body) {
            Ok(body) => body,
            Err(_) => return ResponseTemplate::new(400),
        };
        let input = body["input"].as_str().unwrap_or_default();

        ResponseTemplate::new(200).set_body_json(json!({
            "object": "list",
            "data": [{"object": "embedding", "index": 0, "embedding": word_vector(input)}],
            "model": body["model"],
        }))
    }
}

pub async fn mount_embeddings(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(WordVectorResponder)
        .mount(server)
        .await;
}

/// Server-sent event body streaming `parts` as content deltas
pub fn sse_body(parts: &[&str]) -> String {
    let mut body = String::new();
    body.push_str(&format!(
        "data: {}\n\n",
        json!({"choices": [{"index": 0, "delta": {"role": "assistant", "content": ""}}]})
    ));
    for part in parts {
        body.push_str(&format!(
            "data: {}\n\n",
            json!({"choices": [{"index": 0, "delta": {"content": part}}]})
        ));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

pub fn sse_response(parts: &[&str]) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(sse_body(parts), "text/event-stream")
}

/// Chat messages of every request the server received on the completions endpoint
pub async fn chat_requests(server: &MockServer) -> Vec<Vec<Value>> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|request| request.url.path() == "/v1/chat/completions")
        .filter_map(|request| serde_json::from_slice::<Value>(&request.body).ok())
        .map(|body| body["messages"].as_array().cloned().unwrap_or_default())
        .collect()
}
