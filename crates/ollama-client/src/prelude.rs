//! Common imports for typical client usage.
pub use crate::types::{
    ChatMessage, ChatRequest, ChatResponse, EmbedRequest, EmbedResponse, GenerateRequest,
    GenerateResponse, ModelOptions, ProgressResponse, PullRequest, Role,
};
pub use crate::{AbortHandle, ClientConfig, EventStream, Image, OllamaClient, OllamaError, Reply};
