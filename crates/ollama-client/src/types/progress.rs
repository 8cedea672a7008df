use std::collections::BTreeMap;

use crate::errors::OllamaError;
use crate::operation::{OperationKind, OperationRequest, StreamEvent, StreamingRequest};

use super::{ChatMessage, require_model};

/// Body of `POST /api/pull`.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PullRequest {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insecure: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

impl PullRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn insecure(mut self, insecure: bool) -> Self {
        self.insecure = Some(insecure);
        self
    }

    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = Some(stream);
        self
    }
}

impl OperationRequest for PullRequest {
    type Response = ProgressResponse;
    const KIND: OperationKind = OperationKind::Pull;

    fn validate(&self) -> Result<(), OllamaError> {
        require_model(&self.model)
    }
}

impl StreamingRequest for PullRequest {
    fn requested_stream(&self) -> Option<bool> {
        self.stream
    }
}

/// Body of `POST /api/push`.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PushRequest {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insecure: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

impl PushRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn insecure(mut self, insecure: bool) -> Self {
        self.insecure = Some(insecure);
        self
    }

    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = Some(stream);
        self
    }
}

impl OperationRequest for PushRequest {
    type Response = ProgressResponse;
    const KIND: OperationKind = OperationKind::Push;

    fn validate(&self) -> Result<(), OllamaError> {
        require_model(&self.model)
    }
}

impl StreamingRequest for PushRequest {
    fn requested_stream(&self) -> Option<bool> {
        self.stream
    }
}

/// Body of `POST /api/create`.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CreateRequest {
    pub model: String,
    /// Existing model to derive from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// File name to blob digest.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub files: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub adapters: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub license: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantize: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

impl CreateRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn from_model(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn file(mut self, name: impl Into<String>, digest: impl Into<String>) -> Self {
        self.files.insert(name.into(), digest.into());
        self
    }

    pub fn parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = Some(parameters);
        self
    }

    pub fn quantize(mut self, quantize: impl Into<String>) -> Self {
        self.quantize = Some(quantize.into());
        self
    }

    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = Some(stream);
        self
    }
}

impl OperationRequest for CreateRequest {
    type Response = ProgressResponse;
    const KIND: OperationKind = OperationKind::Create;

    fn validate(&self) -> Result<(), OllamaError> {
        require_model(&self.model)?;
        if let Some(from) = &self.from
            && from.trim().is_empty()
        {
            return Err(OllamaError::validation("create `from` must not be blank"));
        }
        Ok(())
    }
}

impl StreamingRequest for CreateRequest {
    fn requested_stream(&self) -> Option<bool> {
        self.stream
    }
}

/// Progress record of pull, push, and create.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ProgressResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<u64>,
}

impl ProgressResponse {
    /// Completed fraction in `0.0..=1.0`, when the record carries sizes.
    pub fn fraction(&self) -> Option<f64> {
        match (self.completed, self.total) {
            (Some(completed), Some(total)) if total > 0 => {
                Some((completed as f64 / total as f64).min(1.0))
            }
            _ => None,
        }
    }
}

impl StreamEvent for ProgressResponse {
    fn status(&self) -> Option<&str> {
        Some(&self.status)
    }
}
