#![allow(dead_code)]

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::Response;
use futures::StreamExt as _;
use futures::stream;
use ollama_client::{ClientConfig, OllamaClient, RetryPolicy};
use parking_lot::Mutex;
use serde_json::Value;

/// Canned answer for one request.
#[derive(Clone, Debug)]
pub enum Canned {
    /// Complete JSON body with a status.
    Json(StatusCode, Value),
    /// Raw text body with a status.
    Text(StatusCode, String),
    /// NDJSON body; the connection closes after the last line.
    Lines(Vec<String>),
    /// NDJSON body that stays open after the last line.
    LinesThenHang(Vec<String>),
}

impl Canned {
    pub fn ok(body: Value) -> Self {
        Canned::Json(StatusCode::OK, body)
    }

    pub fn lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Canned::Lines(lines.into_iter().map(Into::into).collect())
    }

    pub fn hanging<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Canned::LinesThenHang(lines.into_iter().map(Into::into).collect())
    }
}

/// Request as seen by the server.
#[derive(Clone, Debug)]
pub struct Recorded {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<Value>,
}

#[derive(Default)]
struct MockState {
    routes: Mutex<HashMap<String, Vec<Canned>>>,
    requests: Mutex<Vec<Recorded>>,
}

/// Local HTTP server answering from canned responses.
///
/// Responses for one path are served in order; the last one repeats.
#[derive(Clone)]
pub struct MockServer {
    pub base_url: String,
    state: Arc<MockState>,
}

impl MockServer {
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());
        let app = Router::new().fallback(handle).with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });
        Self {
            base_url: format!("http://{addr}"),
            state,
        }
    }

    pub fn on(&self, path: &str, replies: Vec<Canned>) -> &Self {
        self.state.routes.lock().insert(path.to_string(), replies);
        self
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.path == path)
            .collect()
    }

    /// Client pointed at this server without retry delays.
    pub fn client(&self) -> OllamaClient {
        self.client_with(ClientConfig::new(self.base_url.clone()).retry(RetryPolicy::none()))
    }

    pub fn client_with(&self, config: ClientConfig) -> OllamaClient {
        OllamaClient::new(config).expect("client")
    }
}

async fn handle(
    State(state): State<Arc<MockState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path().to_string();
    let parsed = serde_json::from_slice(&body).ok();
    state.requests.lock().push(Recorded {
        method,
        path: path.clone(),
        headers,
        body: parsed,
    });

    let canned = {
        let mut routes = state.routes.lock();
        match routes.get_mut(&path) {
            Some(replies) if replies.len() > 1 => Some(replies.remove(0)),
            Some(replies) => replies.first().cloned(),
            None => None,
        }
    };

    match canned {
        None => json_response(
            StatusCode::NOT_FOUND,
            &serde_json::json!({"error": format!("no route for {path}")}),
        ),
        Some(Canned::Json(status, value)) => json_response(status, &value),
        Some(Canned::Text(status, text)) => Response::builder()
            .status(status)
            .body(Body::from(text))
            .expect("response"),
        Some(Canned::Lines(lines)) => ndjson_response(Body::from_stream(line_chunks(lines))),
        Some(Canned::LinesThenHang(lines)) => ndjson_response(Body::from_stream(
            line_chunks(lines).chain(stream::pending()),
        )),
    }
}

fn line_chunks(lines: Vec<String>) -> impl futures::Stream<Item = Result<Bytes, Infallible>> {
    stream::iter(
        lines
            .into_iter()
            .map(|line| Ok(Bytes::from(format!("{line}\n")))),
    )
}

fn json_response(status: StatusCode, value: &Value) -> Response {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(value.to_string()))
        .expect("response")
}

fn ndjson_response(body: Body) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/x-ndjson")
        .body(body)
        .expect("response")
}

pub fn generate_chunk(text: &str, done: bool) -> String {
    serde_json::json!({"model": "llama3", "response": text, "done": done}).to_string()
}

pub fn chat_chunk(text: &str, done: bool) -> String {
    serde_json::json!({
        "model": "llama3",
        "message": {"role": "assistant", "content": text},
        "done": done
    })
    .to_string()
}
