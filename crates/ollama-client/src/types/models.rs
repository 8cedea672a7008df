use crate::errors::OllamaError;
use crate::operation::{OperationKind, OperationRequest};

use super::require_model;

/// Model family and format details shared by list, show, and ps.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ModelDetails {
    pub parent_model: String,
    pub format: String,
    pub family: String,
    pub families: Option<Vec<String>>,
    pub parameter_size: String,
    pub quantization_level: String,
}

/// Entry of `GET /api/tags`.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ModelSummary {
    pub name: String,
    pub model: String,
    pub modified_at: String,
    pub size: u64,
    pub digest: String,
    pub details: ModelDetails,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ListModelsResponse {
    #[serde(default)]
    pub models: Vec<ModelSummary>,
}

/// Entry of `GET /api/ps`.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RunningModel {
    pub name: String,
    pub model: String,
    pub size: u64,
    pub size_vram: u64,
    pub digest: String,
    pub details: ModelDetails,
    pub expires_at: String,
    pub context_length: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RunningModelsResponse {
    #[serde(default)]
    pub models: Vec<RunningModel>,
}

/// Body of `POST /api/show`.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ShowRequest {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbose: Option<bool>,
}

impl ShowRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            verbose: None,
        }
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = Some(verbose);
        self
    }
}

impl OperationRequest for ShowRequest {
    type Response = ShowResponse;
    const KIND: OperationKind = OperationKind::Show;

    fn validate(&self) -> Result<(), OllamaError> {
        require_model(&self.model)
    }
}

#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ShowResponse {
    pub modelfile: String,
    pub parameters: String,
    pub template: String,
    pub system: Option<String>,
    pub license: Option<String>,
    pub details: ModelDetails,
    pub model_info: Option<serde_json::Map<String, serde_json::Value>>,
    pub capabilities: Vec<String>,
    pub modified_at: Option<String>,
}

/// Body of `POST /api/delete`.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DeleteRequest {
    pub model: String,
}

impl DeleteRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }
}

impl OperationRequest for DeleteRequest {
    type Response = StatusResponse;
    const KIND: OperationKind = OperationKind::Delete;

    fn validate(&self) -> Result<(), OllamaError> {
        require_model(&self.model)
    }

    fn parse_response(_body: &str) -> Result<StatusResponse, OllamaError> {
        Ok(StatusResponse::success())
    }
}

/// Body of `POST /api/copy`.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CopyRequest {
    pub source: String,
    pub destination: String,
}

impl CopyRequest {
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }
}

impl OperationRequest for CopyRequest {
    type Response = StatusResponse;
    const KIND: OperationKind = OperationKind::Copy;

    fn validate(&self) -> Result<(), OllamaError> {
        if self.source.trim().is_empty() {
            return Err(OllamaError::validation("copy source must not be empty"));
        }
        if self.destination.trim().is_empty() {
            return Err(OllamaError::validation("copy destination must not be empty"));
        }
        Ok(())
    }

    fn parse_response(_body: &str) -> Result<StatusResponse, OllamaError> {
        Ok(StatusResponse::success())
    }
}

/// Outcome of calls whose success is signalled by the HTTP status alone.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    pub fn success() -> Self {
        Self {
            status: "success".to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_response_tolerates_missing_fields() {
        let list: ListModelsResponse = serde_json::from_str(
            r#"{"models":[{"name":"llama3:latest","size":42,"details":{"family":"llama"}}]}"#,
        )
        .expect("list");
        assert_eq!(list.models[0].name, "llama3:latest");
        assert_eq!(list.models[0].details.family, "llama");
        assert_eq!(list.models[0].digest, "");
    }

    #[test]
    fn copy_requires_both_names() {
        assert!(CopyRequest::new("a", "b").validate().is_ok());
        assert!(CopyRequest::new("", "b").validate().is_err());
        assert!(CopyRequest::new("a", " ").validate().is_err());
    }

    #[test]
    fn empty_bodies_become_success_status() {
        assert!(DeleteRequest::parse_response("").expect("status").is_success());
        assert!(CopyRequest::parse_response("").expect("status").is_success());
    }
}
