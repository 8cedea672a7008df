use crate::errors::OllamaError;
use crate::image::Image;
use crate::operation::{OperationKind, OperationRequest, StreamEvent, StreamingRequest};

use super::{KeepAlive, ModelOptions, ResponseFormat, require_model};

/// Body of `POST /api/generate`.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GenerateRequest {
    pub model: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Context returned by a previous generate call, for short conversational memory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Vec<i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<ResponseFormat>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<Image>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<ModelOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_alive: Option<KeepAlive>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub think: Option<bool>,
    /// Streaming mode for `OllamaClient::dispatch`; unset means a single
    /// response. The dedicated `generate`/`generate_stream` calls overwrite it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

impl GenerateRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into());
        self
    }

    pub fn context(mut self, context: Vec<i64>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn format(mut self, format: ResponseFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn image(mut self, image: Image) -> Self {
        self.images.push(image);
        self
    }

    pub fn options(mut self, options: ModelOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn keep_alive(mut self, keep_alive: KeepAlive) -> Self {
        self.keep_alive = Some(keep_alive);
        self
    }

    pub fn think(mut self, think: bool) -> Self {
        self.think = Some(think);
        self
    }

    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = Some(stream);
        self
    }
}

impl OperationRequest for GenerateRequest {
    type Response = GenerateResponse;
    const KIND: OperationKind = OperationKind::Generate;

    fn validate(&self) -> Result<(), OllamaError> {
        require_model(&self.model)
    }
}

impl StreamingRequest for GenerateRequest {
    fn requested_stream(&self) -> Option<bool> {
        self.stream
    }
}

/// One generate chunk, or the whole response when not streaming.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GenerateResponse {
    pub model: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Vec<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_eval_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_eval_duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_duration: Option<u64>,
}

impl StreamEvent for GenerateResponse {
    fn done_flag(&self) -> bool {
        self.done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_request_omits_unset_fields() {
        let value = serde_json::to_value(GenerateRequest::new("llama3", "Hi")).expect("json");
        assert_eq!(value, serde_json::json!({"model": "llama3", "prompt": "Hi"}));
    }

    #[test]
    fn chunk_without_model_is_rejected() {
        assert!(serde_json::from_str::<GenerateResponse>(r#"{"response":"x"}"#).is_err());
        let chunk: GenerateResponse =
            serde_json::from_str(r#"{"model":"llama3","response":"x","done":false}"#)
                .expect("chunk");
        assert!(!chunk.done_flag());
    }

    #[test]
    fn validation_requires_model() {
        assert!(GenerateRequest::new("", "Hi").validate().is_err());
        assert!(GenerateRequest::new("llama3", "").validate().is_ok());
    }
}
