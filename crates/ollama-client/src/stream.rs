//! Stream protocol engine.
//!
//! Every streaming call runs in its own task that owns the connection, decodes
//! records in arrival order, and hands typed events to the consumer through a
//! bounded channel. The task ends on the terminal event, end of input, a read
//! failure, or cancellation; in every case the connection is dropped and the
//! registry entry removed before the consumer observes the end.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::StreamExt as _;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::decoder::{ByteStream, Record, ndjson_records};
use crate::errors::OllamaError;
use crate::operation::{OperationKind, StreamEvent, Termination};
use crate::registry::{CancellationRegistry, Registration, StreamId};

/// Handle used to cancel one stream.
#[derive(Clone, Debug)]
pub struct AbortHandle {
    token: CancellationToken,
}

impl AbortHandle {
    /// Requests cancellation.
    ///
    /// The stream stops at its next decode boundary, closes its connection,
    /// and yields `OllamaError::Cancelled` as its last item.
    pub fn abort(&self) {
        self.token.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Per-stream knobs taken from the client configuration.
#[derive(Clone, Debug)]
pub(crate) struct StreamSettings {
    pub buffer_capacity: usize,
    pub max_consecutive_decode_failures: Option<u32>,
    pub idle_timeout: Option<Duration>,
    pub max_line_bytes: usize,
}

impl From<&ClientConfig> for StreamSettings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            buffer_capacity: config.stream_buffer_capacity.max(1),
            max_consecutive_decode_failures: config.max_consecutive_decode_failures,
            idle_timeout: config.stream_idle_timeout,
            max_line_bytes: config.max_line_bytes,
        }
    }
}

/// Lazy sequence of typed events from one streaming call.
///
/// Items arrive in wire order. The sequence ends after the terminal event or
/// when the server closes the body; failures and cancellation end it with one
/// `Err` item. Dropping the stream cancels its task and releases the
/// connection.
#[derive(Debug)]
pub struct EventStream<T> {
    id: StreamId,
    operation: OperationKind,
    rx: mpsc::Receiver<Result<T, OllamaError>>,
    token: CancellationToken,
    registry: CancellationRegistry,
}

impl<T> EventStream<T> {
    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn operation(&self) -> OperationKind {
        self.operation
    }

    /// Returns a handle that can cancel this stream from anywhere.
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            token: self.token.clone(),
        }
    }

    /// Waits for the next event. Returns `None` once the sequence has ended.
    pub async fn next_event(&mut self) -> Option<Result<T, OllamaError>> {
        self.rx.recv().await
    }

    /// Drains the stream, returning every event or the error that ended it.
    pub async fn collect_events(mut self) -> Result<Vec<T>, OllamaError> {
        let mut events = Vec::new();
        while let Some(item) = self.next_event().await {
            events.push(item?);
        }
        Ok(events)
    }
}

impl<T> futures::Stream for EventStream<T> {
    type Item = Result<T, OllamaError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl<T> Drop for EventStream<T> {
    fn drop(&mut self) {
        self.token.cancel();
        self.registry.unregister(self.id);
    }
}

enum Outcome {
    Terminal,
    EndOfInput,
    ConsumerGone,
    Cancelled,
    Failed(OllamaError),
}

/// Starts the task driving one open stream.
pub(crate) fn spawn_event_stream<T>(
    operation: OperationKind,
    termination: Termination,
    registry: CancellationRegistry,
    registration: Registration,
    bytes: ByteStream,
    settings: &StreamSettings,
) -> EventStream<T>
where
    T: DeserializeOwned + StreamEvent + Send + 'static,
{
    let (tx, rx) = mpsc::channel(settings.buffer_capacity.max(1));
    let id = registration.id();
    let token = registration.token().clone();
    tokio::spawn(drive_stream::<T>(
        operation,
        termination,
        registration,
        bytes,
        tx,
        settings.clone(),
    ));
    EventStream {
        id,
        operation,
        rx,
        token,
        registry,
    }
}

async fn drive_stream<T>(
    operation: OperationKind,
    termination: Termination,
    registration: Registration,
    bytes: ByteStream,
    tx: mpsc::Sender<Result<T, OllamaError>>,
    settings: StreamSettings,
) where
    T: DeserializeOwned + StreamEvent + Send + 'static,
{
    let stream_id = registration.id();
    let token = registration.token().clone();
    let mut records = Box::pin(ndjson_records(bytes, settings.max_line_bytes));
    let mut consecutive_failures = 0_u32;
    let mut yielded = 0_u64;

    let outcome = loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => break Outcome::Cancelled,
            next = next_record(&mut records, settings.idle_timeout) => next,
        };

        let value = match next {
            None => break Outcome::EndOfInput,
            Some(Err(err)) => break Outcome::Failed(err),
            Some(Ok(Record::Malformed { line, error })) => {
                warn!(%stream_id, %operation, %error, line = %truncate(&line), "skipping undecodable line");
                consecutive_failures += 1;
                if let Some(err) = check_failure_cap(consecutive_failures, &settings) {
                    break Outcome::Failed(err);
                }
                continue;
            }
            Some(Ok(Record::Value(value))) => value,
        };

        if let Some(message) = value.get("error").and_then(|e| e.as_str()) {
            break Outcome::Failed(OllamaError::response(message, None));
        }

        let event: T = match serde_json::from_value(value) {
            Ok(event) => event,
            Err(error) => {
                warn!(%stream_id, %operation, %error, "skipping record of unexpected shape");
                consecutive_failures += 1;
                if let Some(err) = check_failure_cap(consecutive_failures, &settings) {
                    break Outcome::Failed(err);
                }
                continue;
            }
        };
        consecutive_failures = 0;

        let terminal = termination.is_terminal(&event);
        let sent = tokio::select! {
            biased;
            _ = token.cancelled() => break Outcome::Cancelled,
            sent = tx.send(Ok(event)) => sent.is_ok(),
        };
        if !sent {
            break Outcome::ConsumerGone;
        }
        yielded += 1;
        if terminal {
            break Outcome::Terminal;
        }
    };

    drop(records);
    drop(registration);

    match outcome {
        Outcome::Terminal => debug!(%stream_id, %operation, yielded, "stream reached terminal event"),
        Outcome::EndOfInput => {
            debug!(%stream_id, %operation, yielded, "stream ended without terminal event")
        }
        Outcome::ConsumerGone => debug!(%stream_id, %operation, yielded, "stream consumer dropped"),
        Outcome::Cancelled => {
            debug!(%stream_id, %operation, yielded, "stream cancelled");
            let _ = tx.send(Err(OllamaError::Cancelled)).await;
        }
        Outcome::Failed(err) => {
            debug!(%stream_id, %operation, yielded, error = %err, "stream failed");
            let _ = tx.send(Err(err)).await;
        }
    }
}

async fn next_record<S>(
    records: &mut Pin<Box<S>>,
    idle_timeout: Option<Duration>,
) -> Option<Result<Record, OllamaError>>
where
    S: futures::Stream<Item = Result<Record, OllamaError>> + ?Sized,
{
    match idle_timeout {
        None => records.next().await,
        Some(limit) => match tokio::time::timeout(limit, records.next()).await {
            Ok(next) => next,
            Err(_) => Some(Err(OllamaError::network(format!(
                "no complete record received within {}ms",
                limit.as_millis()
            )))),
        },
    }
}

fn check_failure_cap(failures: u32, settings: &StreamSettings) -> Option<OllamaError> {
    match settings.max_consecutive_decode_failures {
        Some(limit) if failures >= limit => Some(OllamaError::protocol(format!(
            "stream produced {failures} consecutive undecodable records"
        ))),
        _ => None,
    }
}

fn truncate(line: &str) -> &str {
    match line.char_indices().nth(200) {
        Some((idx, _)) => &line[..idx],
        None => line,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bytes::Bytes;
    use futures::stream;

    use super::*;
    use crate::decoder::byte_stream_from;
    use crate::types::{ChatResponse, GenerateResponse, ProgressResponse};

    fn settings() -> StreamSettings {
        StreamSettings {
            buffer_capacity: 1,
            max_consecutive_decode_failures: Some(3),
            idle_timeout: None,
            max_line_bytes: 1024,
        }
    }

    fn lines(lines: &[&str]) -> ByteStream {
        let body: String = lines.iter().map(|l| format!("{l}\n")).collect();
        byte_stream_from(vec![Ok(Bytes::from(body))])
    }

    fn start<T>(
        registry: &CancellationRegistry,
        termination: Termination,
        bytes: ByteStream,
        settings: &StreamSettings,
    ) -> EventStream<T>
    where
        T: DeserializeOwned + StreamEvent + Send + 'static,
    {
        spawn_event_stream(
            OperationKind::Generate,
            termination,
            registry.clone(),
            registry.register(),
            bytes,
            settings,
        )
    }

    fn pending_body() -> ByteStream {
        Box::pin(stream::pending::<Result<Bytes, OllamaError>>())
    }

    fn gen_line(n: usize, done: bool) -> String {
        format!(r#"{{"model":"m","response":"{n}","done":{done}}}"#)
    }

    #[tokio::test]
    async fn yields_all_events_without_terminal_then_ends() {
        let registry = CancellationRegistry::new();
        let body: Vec<String> = (0..5).map(|n| gen_line(n, false)).collect();
        let refs: Vec<&str> = body.iter().map(String::as_str).collect();
        let events = start::<GenerateResponse>(&registry, Termination::DoneFlag, lines(&refs), &settings())
            .collect_events()
            .await
            .expect("events");
        let texts: Vec<_> = events.iter().map(|e| e.response.as_str()).collect();
        assert_eq!(texts, vec!["0", "1", "2", "3", "4"]);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn stops_at_terminal_event() {
        let registry = CancellationRegistry::new();
        let body = vec![gen_line(0, false), gen_line(1, true), gen_line(2, false), "garbage".into()];
        let refs: Vec<&str> = body.iter().map(String::as_str).collect();
        let events = start::<GenerateResponse>(&registry, Termination::DoneFlag, lines(&refs), &settings())
            .collect_events()
            .await
            .expect("events");
        assert_eq!(events.len(), 2);
        assert!(events[1].done);
    }

    #[tokio::test]
    async fn lines_after_terminal_are_never_read() {
        let registry = CancellationRegistry::new();
        let polled = Arc::new(AtomicUsize::new(0));
        let counter = polled.clone();
        let chunks = vec![gen_line(0, true), gen_line(1, false), gen_line(2, false)];
        let bytes: ByteStream = Box::pin(stream::iter(chunks).map(move |line| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Bytes::from(format!("{line}\n")))
        }));
        let events = start::<GenerateResponse>(&registry, Termination::DoneFlag, bytes, &settings())
            .collect_events()
            .await
            .expect("events");
        assert_eq!(events.len(), 1);
        assert_eq!(polled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped() {
        let registry = CancellationRegistry::new();
        let a = gen_line(0, false);
        let b = gen_line(1, false);
        let events = start::<GenerateResponse>(
            &registry,
            Termination::DoneFlag,
            lines(&[&a, "not-json", r#"{"unexpected":true}"#, &b]),
            &settings(),
        )
        .collect_events()
        .await
        .expect("events");
        let texts: Vec<_> = events.iter().map(|e| e.response.as_str()).collect();
        assert_eq!(texts, vec!["0", "1"]);
    }

    #[tokio::test]
    async fn too_many_consecutive_failures_end_the_stream() {
        let registry = CancellationRegistry::new();
        let a = gen_line(0, false);
        let mut stream = start::<GenerateResponse>(
            &registry,
            Termination::DoneFlag,
            lines(&[&a, "x", "y", "z", &a]),
            &settings(),
        );
        assert!(stream.next_event().await.expect("first").is_ok());
        let err = stream.next_event().await.expect("error").expect_err("cap");
        assert!(matches!(err, OllamaError::Protocol(_)));
        assert!(stream.next_event().await.is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn progress_stream_ends_on_success_status() {
        let registry = CancellationRegistry::new();
        let events = start::<ProgressResponse>(
            &registry,
            Termination::StatusSuccess,
            lines(&[
                r#"{"status":"pulling manifest"}"#,
                r#"{"status":"downloading","total":10,"completed":10}"#,
                r#"{"status":"success"}"#,
                r#"{"status":"extra"}"#,
            ]),
            &settings(),
        )
        .collect_events()
        .await
        .expect("events");
        let statuses: Vec<_> = events.iter().map(|e| e.status.as_str()).collect();
        assert_eq!(statuses, vec!["pulling manifest", "downloading", "success"]);
    }

    #[tokio::test]
    async fn chat_stream_yields_fragments_in_order() {
        let registry = CancellationRegistry::new();
        let events = start::<ChatResponse>(
            &registry,
            Termination::DoneFlag,
            lines(&[
                r#"{"model":"m","message":{"role":"assistant","content":"Hel"},"done":false}"#,
                r#"{"model":"m","message":{"role":"assistant","content":"lo"},"done":false}"#,
                r#"{"model":"m","message":{"role":"assistant","content":""},"done":true}"#,
            ]),
            &settings(),
        )
        .collect_events()
        .await
        .expect("events");
        let content: Vec<_> = events.iter().map(|e| e.message.content.as_str()).collect();
        assert_eq!(content, vec!["Hel", "lo", ""]);
        assert!(events[2].done);
    }

    #[tokio::test]
    async fn error_record_ends_stream_with_response_error() {
        let registry = CancellationRegistry::new();
        let a = gen_line(0, false);
        let mut stream = start::<GenerateResponse>(
            &registry,
            Termination::DoneFlag,
            lines(&[&a, r#"{"error":"model runner crashed"}"#]),
            &settings(),
        );
        assert!(stream.next_event().await.expect("event").is_ok());
        let err = stream.next_event().await.expect("error").expect_err("error record");
        assert_eq!(err, OllamaError::response("model runner crashed", None));
        assert!(stream.next_event().await.is_none());
    }

    #[tokio::test]
    async fn read_failure_surfaces_as_network_error() {
        let registry = CancellationRegistry::new();
        let bytes = byte_stream_from(vec![
            Ok(Bytes::from(format!("{}\n", gen_line(0, false)))),
            Err(OllamaError::network("connection reset")),
        ]);
        let mut stream = start::<GenerateResponse>(&registry, Termination::DoneFlag, bytes, &settings());
        assert!(stream.next_event().await.expect("event").is_ok());
        assert!(matches!(
            stream.next_event().await,
            Some(Err(OllamaError::Network(_)))
        ));
        assert!(stream.next_event().await.is_none());
    }

    #[tokio::test]
    async fn abort_ends_pending_stream_with_cancellation() {
        let registry = CancellationRegistry::new();
        let first = Bytes::from(format!("{}\n", gen_line(0, false)));
        let bytes: ByteStream = Box::pin(
            stream::iter(vec![Ok::<_, OllamaError>(first)])
                .chain(stream::pending::<Result<Bytes, OllamaError>>()),
        );
        let mut stream = start::<GenerateResponse>(&registry, Termination::DoneFlag, bytes, &settings());
        assert!(stream.next_event().await.expect("event").is_ok());

        stream.abort_handle().abort();
        assert_eq!(stream.next_event().await, Some(Err(OllamaError::Cancelled)));
        assert!(stream.next_event().await.is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn cancel_all_terminates_every_open_stream() {
        let registry = CancellationRegistry::new();
        let mut streams: Vec<EventStream<GenerateResponse>> = (0..4)
            .map(|_| {
                start(
                    &registry,
                    Termination::DoneFlag,
                    pending_body(),
                    &settings(),
                )
            })
            .collect();
        assert_eq!(registry.len(), 4);

        assert_eq!(registry.cancel_all(), 4);
        assert!(registry.is_empty());
        for stream in &mut streams {
            assert_eq!(stream.next_event().await, Some(Err(OllamaError::Cancelled)));
            assert!(stream.next_event().await.is_none());
        }
    }

    #[tokio::test]
    async fn dropping_the_stream_releases_its_registration() {
        let registry = CancellationRegistry::new();
        let stream: EventStream<GenerateResponse> = start(
            &registry,
            Termination::DoneFlag,
            pending_body(),
            &settings(),
        );
        let abort = stream.abort_handle();
        assert_eq!(registry.len(), 1);
        drop(stream);
        assert!(registry.is_empty());
        assert!(abort.is_aborted());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_fails_the_stream() {
        let registry = CancellationRegistry::new();
        let settings = StreamSettings {
            idle_timeout: Some(Duration::from_secs(5)),
            ..settings()
        };
        let mut stream: EventStream<GenerateResponse> = start(
            &registry,
            Termination::DoneFlag,
            pending_body(),
            &settings,
        );
        assert!(matches!(
            stream.next_event().await,
            Some(Err(OllamaError::Network(msg))) if msg.contains("no complete record")
        ));
    }
}
