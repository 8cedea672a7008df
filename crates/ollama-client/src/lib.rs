//! Async client for the Ollama HTTP API.
//!
//! Every call is described by a typed request (`GenerateRequest`,
//! `ChatRequest`, ...) that knows its operation. Streaming calls return an
//! [`EventStream`] that yields typed events lazily, stops at the operation's
//! terminal event, and can be cancelled one by one or all at once through
//! [`OllamaClient::abort`].
//!
//! # Streaming a chat
//!
//! ```no_run
//! use futures::StreamExt;
//! use ollama_client::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), OllamaError> {
//! let client = OllamaClient::from_env()?;
//! let request = ChatRequest::new("llama3.2", vec![ChatMessage::user("Why is the sky blue?")]);
//!
//! let mut stream = client.chat_stream(request).await?;
//! while let Some(event) = stream.next().await {
//!     print!("{}", event?.message.content);
//! }
//! # Ok(())
//! # }
//! ```

/// Client facade and typed operation methods.
pub mod client;
/// Client configuration and host normalization.
pub mod config;
mod decoder;
/// Public error type.
pub mod errors;
/// Image payload encoding.
pub mod image;
/// Operation table and the request traits behind it.
pub mod operation;
/// Common imports for typical usage.
pub mod prelude;
/// Registry of open streams used for bulk cancellation.
pub mod registry;
/// Retry policy for transient failures.
pub mod retry;
/// Stream engine and event stream handle.
pub mod stream;
mod transport;
/// Request and response types for every operation.
pub mod types;

pub use client::{OllamaClient, Reply};
pub use config::{
    ClientConfig, DEFAULT_HOST, DEFAULT_MAX_LINE_BYTES, DEFAULT_REQUEST_TIMEOUT, normalize_host,
};
pub use errors::OllamaError;
pub use image::{Image, ImageSource, encode_image};
pub use operation::{
    Method, Operation, OperationKind, OperationRequest, StreamEvent, StreamingRequest, Termination,
};
pub use registry::{CancellationRegistry, Registration, StreamId};
pub use retry::RetryPolicy;
pub use stream::{AbortHandle, EventStream};
pub use transport::user_agent;
