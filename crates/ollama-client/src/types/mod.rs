//! Request and response shapes for every operation.
//!
//! Only the fields the client needs to drive validation and stream
//! termination are mandatory; everything else is optional and skipped when
//! unset so the server applies its own defaults.

mod chat;
mod embed;
mod generate;
mod models;
mod progress;

pub use chat::{ChatMessage, ChatRequest, ChatResponse, Role, Tool, ToolCall, ToolCallFunction, ToolFunction};
pub use embed::{EmbedInput, EmbedRequest, EmbedResponse};
pub use generate::{GenerateRequest, GenerateResponse};
pub use models::{
    CopyRequest, DeleteRequest, ListModelsResponse, ModelDetails, ModelSummary, RunningModel,
    RunningModelsResponse, ShowRequest, ShowResponse, StatusResponse,
};
pub use progress::{CreateRequest, ProgressResponse, PullRequest, PushRequest};

use crate::errors::OllamaError;

/// Runtime and sampling options forwarded to the model.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ModelOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_ctx: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeat_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    /// Options not modelled above, passed through verbatim.
    #[serde(flatten, default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ModelOptions {
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn seed(mut self, seed: i64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn num_ctx(mut self, num_ctx: u32) -> Self {
        self.num_ctx = Some(num_ctx);
        self
    }

    /// Sets an option that has no dedicated field.
    pub fn set(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Requested output format: free JSON or a JSON schema.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum ResponseFormat {
    /// Serialized as the literal string `"json"`.
    Json(JsonFormat),
    Schema(serde_json::Value),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsonFormat {
    Json,
}

impl ResponseFormat {
    pub fn json() -> Self {
        ResponseFormat::Json(JsonFormat::Json)
    }
}

/// How long the server keeps the model loaded after the call.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum KeepAlive {
    /// Seconds; negative keeps the model loaded indefinitely.
    Seconds(i64),
    /// Duration string such as `"5m"`.
    Duration(String),
}

pub(crate) fn require_model(model: &str) -> Result<(), OllamaError> {
    if model.trim().is_empty() {
        return Err(OllamaError::validation("model must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_flatten_extra_fields() {
        let options = ModelOptions::default()
            .temperature(0.5)
            .set("mirostat", serde_json::json!(2));
        let value = serde_json::to_value(&options).expect("json");
        assert_eq!(value, serde_json::json!({"temperature": 0.5, "mirostat": 2}));
    }

    #[test]
    fn format_serializes_as_string_or_schema() {
        assert_eq!(
            serde_json::to_value(ResponseFormat::json()).expect("json"),
            serde_json::json!("json")
        );
        let schema = serde_json::json!({"type": "object"});
        assert_eq!(
            serde_json::to_value(ResponseFormat::Schema(schema.clone())).expect("json"),
            schema
        );
    }

    #[test]
    fn keep_alive_accepts_both_shapes() {
        assert_eq!(
            serde_json::to_value(KeepAlive::Duration("5m".into())).expect("json"),
            serde_json::json!("5m")
        );
        assert_eq!(
            serde_json::to_value(KeepAlive::Seconds(-1)).expect("json"),
            serde_json::json!(-1)
        );
    }

    #[test]
    fn blank_model_is_rejected() {
        assert!(require_model("llama3").is_ok());
        assert!(matches!(require_model("  "), Err(OllamaError::Validation(_))));
    }
}
