use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::errors::OllamaError;
use crate::operation::{OperationKind, OperationRequest, StreamEvent, StreamingRequest};
use crate::registry::CancellationRegistry;
use crate::stream::{EventStream, StreamSettings, spawn_event_stream};
use crate::transport::{Transport, body_stream, error_from_response};
use crate::types::{
    ChatRequest, ChatResponse, CopyRequest, CreateRequest, DeleteRequest, EmbedRequest,
    EmbedResponse, GenerateRequest, GenerateResponse, ListModelsResponse, ProgressResponse,
    PullRequest, PushRequest, RunningModelsResponse, ShowRequest, ShowResponse, StatusResponse,
};

/// Result of a call whose mode follows the request's `stream` field.
pub enum Reply<T> {
    Single(T),
    Stream(EventStream<T>),
}

impl<T> Reply<T> {
    pub fn is_stream(&self) -> bool {
        matches!(self, Reply::Stream(_))
    }

    /// Single value, or the last event of a drained stream.
    pub async fn into_final(self) -> Result<Option<T>, OllamaError> {
        match self {
            Reply::Single(value) => Ok(Some(value)),
            Reply::Stream(stream) => Ok(stream.collect_events().await?.pop()),
        }
    }
}

pub(crate) struct ClientInner {
    transport: RwLock<Option<Arc<Transport>>>,
    registry: CancellationRegistry,
    settings: StreamSettings,
    base_url: String,
}

/// Async client for an Ollama server.
///
/// Cloning is cheap and every clone shares one connection pool and one
/// registry of open streams.
#[derive(Clone)]
pub struct OllamaClient {
    inner: Arc<ClientInner>,
}

impl OllamaClient {
    /// Builds a client after validating the configuration.
    pub fn new(config: ClientConfig) -> Result<Self, OllamaError> {
        let transport = Transport::new(&config)?;
        let base_url = transport.base_url().to_string();
        debug!(host = %base_url, "ollama client created");
        Ok(Self {
            inner: Arc::new(ClientInner {
                transport: RwLock::new(Some(Arc::new(transport))),
                registry: CancellationRegistry::new(),
                settings: StreamSettings::from(&config),
                base_url,
            }),
        })
    }

    /// Builds a client from `OLLAMA_HOST` and `OLLAMA_API_KEY`.
    pub fn from_env() -> Result<Self, OllamaError> {
        Self::new(ClientConfig::from_env())
    }

    /// Normalized server base URL.
    pub fn host(&self) -> &str {
        &self.inner.base_url
    }

    pub fn registry(&self) -> &CancellationRegistry {
        &self.inner.registry
    }

    fn transport(&self) -> Result<Arc<Transport>, OllamaError> {
        self.inner
            .transport
            .read()
            .clone()
            .ok_or_else(|| OllamaError::Config("client is closed".to_string()))
    }

    /// Performs one non-streaming call and decodes its body.
    ///
    /// Streaming-capable operations are sent with `"stream": false`.
    pub async fn request<R: OperationRequest>(&self, request: R) -> Result<R::Response, OllamaError> {
        request.validate()?;
        let op = R::KIND.descriptor();
        let mut body = request.into_body()?;
        if op.streams() {
            set_stream_flag(&mut body, false);
        }
        let text = self.send_single(R::KIND, Some(&body)).await?;
        R::parse_response(&text)
    }

    /// Opens a streaming call.
    ///
    /// The stream is registered before the connection is opened, so a bulk
    /// abort also interrupts streams that are still connecting.
    pub async fn request_stream<R>(&self, request: R) -> Result<EventStream<R::Response>, OllamaError>
    where
        R: StreamingRequest,
        R::Response: StreamEvent,
    {
        request.validate()?;
        let op = R::KIND.descriptor();
        let termination = op.termination.ok_or_else(|| {
            OllamaError::validation(format!("{} does not support streaming", op.kind))
        })?;
        let mut body = request.into_body()?;
        set_stream_flag(&mut body, true);

        // Registered before the transport is fetched: a concurrent `close`
        // either sees this stream in `cancel_all` or has already taken the
        // transport, which fails the call here.
        let registration = self.inner.registry.register();
        let transport = self.transport()?;
        let token = registration.token().clone();
        let response = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(OllamaError::Cancelled),
            response = transport.send(op, Some(&body), true) => response?,
        };
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        debug!(stream_id = %registration.id(), operation = %op.kind, "stream opened");
        Ok(spawn_event_stream(
            op.kind,
            termination,
            self.inner.registry.clone(),
            registration,
            body_stream(response),
            &self.inner.settings,
        ))
    }

    /// Streams when the request asks for it, otherwise returns one value.
    pub async fn dispatch<R>(&self, request: R) -> Result<Reply<R::Response>, OllamaError>
    where
        R: StreamingRequest,
        R::Response: StreamEvent,
    {
        if request.requested_stream().unwrap_or(false) {
            Ok(Reply::Stream(self.request_stream(request).await?))
        } else {
            Ok(Reply::Single(self.request(request).await?))
        }
    }

    async fn send_single(
        &self,
        kind: OperationKind,
        body: Option<&serde_json::Value>,
    ) -> Result<String, OllamaError> {
        let transport = self.transport()?;
        let response = transport.send(kind.descriptor(), body, false).await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        response
            .text()
            .await
            .map_err(|e| OllamaError::network(format!("failed to read {kind} response: {e}")))
    }

    pub async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse, OllamaError> {
        self.request(request).await
    }

    pub async fn generate_stream(
        &self,
        request: GenerateRequest,
    ) -> Result<EventStream<GenerateResponse>, OllamaError> {
        self.request_stream(request).await
    }

    pub async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, OllamaError> {
        self.request(request).await
    }

    pub async fn chat_stream(
        &self,
        request: ChatRequest,
    ) -> Result<EventStream<ChatResponse>, OllamaError> {
        self.request_stream(request).await
    }

    pub async fn embed(&self, request: EmbedRequest) -> Result<EmbedResponse, OllamaError> {
        self.request(request).await
    }

    pub async fn pull(&self, request: PullRequest) -> Result<ProgressResponse, OllamaError> {
        self.request(request).await
    }

    pub async fn pull_stream(
        &self,
        request: PullRequest,
    ) -> Result<EventStream<ProgressResponse>, OllamaError> {
        self.request_stream(request).await
    }

    pub async fn push(&self, request: PushRequest) -> Result<ProgressResponse, OllamaError> {
        self.request(request).await
    }

    pub async fn push_stream(
        &self,
        request: PushRequest,
    ) -> Result<EventStream<ProgressResponse>, OllamaError> {
        self.request_stream(request).await
    }

    pub async fn create(&self, request: CreateRequest) -> Result<ProgressResponse, OllamaError> {
        self.request(request).await
    }

    pub async fn create_stream(
        &self,
        request: CreateRequest,
    ) -> Result<EventStream<ProgressResponse>, OllamaError> {
        self.request_stream(request).await
    }

    pub async fn show(&self, request: ShowRequest) -> Result<ShowResponse, OllamaError> {
        self.request(request).await
    }

    pub async fn delete(&self, request: DeleteRequest) -> Result<StatusResponse, OllamaError> {
        self.request(request).await
    }

    pub async fn copy(&self, request: CopyRequest) -> Result<StatusResponse, OllamaError> {
        self.request(request).await
    }

    /// Lists locally available models.
    pub async fn list(&self) -> Result<ListModelsResponse, OllamaError> {
        let text = self.send_single(OperationKind::ListModels, None).await?;
        parse_body(OperationKind::ListModels, &text)
    }

    /// Lists models currently loaded in memory.
    pub async fn ps(&self) -> Result<RunningModelsResponse, OllamaError> {
        let text = self.send_single(OperationKind::ListRunning, None).await?;
        parse_body(OperationKind::ListRunning, &text)
    }

    /// Cancels every open stream of this client and returns how many were
    /// cancelled. Each cancelled stream yields `OllamaError::Cancelled` as its
    /// final item. New calls can be made afterwards.
    pub fn abort(&self) -> usize {
        self.inner.registry.cancel_all()
    }

    /// Number of streams currently open.
    pub fn active_streams(&self) -> usize {
        self.inner.registry.len()
    }

    /// Cancels all open streams and releases the connection pool. Later calls
    /// fail with a configuration error.
    pub fn close(&self) {
        let transport = self.inner.transport.write().take();
        let cancelled = self.inner.registry.cancel_all();
        if transport.is_some() {
            info!(host = %self.inner.base_url, cancelled, "ollama client closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.transport.read().is_none()
    }
}

fn set_stream_flag(body: &mut serde_json::Value, stream: bool) {
    if let Some(object) = body.as_object_mut() {
        object.insert("stream".to_string(), serde_json::Value::Bool(stream));
    }
}

fn parse_body<T: serde::de::DeserializeOwned>(
    kind: OperationKind,
    text: &str,
) -> Result<T, OllamaError> {
    serde_json::from_str(text)
        .map_err(|e| OllamaError::protocol(format!("invalid {kind} response body: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> OllamaClient {
        OllamaClient::new(ClientConfig::new("127.0.0.1:9")).expect("client")
    }

    #[test]
    fn stream_flag_is_overwritten() {
        let mut body = serde_json::json!({"model": "m", "stream": true});
        set_stream_flag(&mut body, false);
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn invalid_config_is_rejected_at_construction() {
        let result = OllamaClient::new(ClientConfig::new("ftp://example.com"));
        assert!(matches!(result, Err(OllamaError::Config(_))));
    }

    #[tokio::test]
    async fn validation_fails_before_any_network_activity() {
        let err = client()
            .generate(GenerateRequest::new("", "hi"))
            .await
            .expect_err("blank model");
        assert!(matches!(err, OllamaError::Validation(_)));
    }

    #[tokio::test]
    async fn closed_client_rejects_calls() {
        let client = client();
        client.close();
        assert!(client.is_closed());
        let err = client.list().await.expect_err("closed");
        assert!(matches!(err, OllamaError::Config(msg) if msg.contains("closed")));
    }

    #[tokio::test]
    async fn closed_client_rejects_streams_without_leaving_a_registration() {
        let client = client();
        client.close();
        let err = client
            .generate_stream(GenerateRequest::new("m", "hi"))
            .await
            .expect_err("closed");
        assert!(matches!(err, OllamaError::Config(msg) if msg.contains("closed")));
        assert_eq!(client.active_streams(), 0);
    }

    #[test]
    fn abort_without_streams_is_a_no_op() {
        let client = client();
        assert_eq!(client.abort(), 0);
        assert_eq!(client.active_streams(), 0);
    }
}
