use crate::errors::OllamaError;
use crate::operation::{OperationKind, OperationRequest};

use super::{KeepAlive, ModelOptions, require_model};

/// Text to embed: one string or a batch.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum EmbedInput {
    Single(String),
    Batch(Vec<String>),
}

impl From<&str> for EmbedInput {
    fn from(value: &str) -> Self {
        EmbedInput::Single(value.to_string())
    }
}

impl From<String> for EmbedInput {
    fn from(value: String) -> Self {
        EmbedInput::Single(value)
    }
}

impl From<Vec<String>> for EmbedInput {
    fn from(value: Vec<String>) -> Self {
        EmbedInput::Batch(value)
    }
}

/// Embedding request accepting either a `prompt` or an `input`.
///
/// Both shapes are normalized into one canonical body before sending: `input`
/// always carries the batch, and `prompt` repeats it when there is exactly one
/// text. When both are given, `input` wins.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EmbedRequest {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<EmbedInput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncate: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<ModelOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_alive: Option<KeepAlive>,
}

impl EmbedRequest {
    pub fn new(model: impl Into<String>, input: impl Into<EmbedInput>) -> Self {
        Self {
            model: model.into(),
            input: Some(input.into()),
            ..Self::default()
        }
    }

    pub fn from_prompt(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: Some(prompt.into()),
            ..Self::default()
        }
    }

    pub fn truncate(mut self, truncate: bool) -> Self {
        self.truncate = Some(truncate);
        self
    }

    pub fn options(mut self, options: ModelOptions) -> Self {
        self.options = Some(options);
        self
    }

    fn texts(&self) -> Option<Vec<String>> {
        match (&self.input, &self.prompt) {
            (Some(EmbedInput::Single(text)), _) => Some(vec![text.clone()]),
            (Some(EmbedInput::Batch(texts)), _) => Some(texts.clone()),
            (None, Some(prompt)) => Some(vec![prompt.clone()]),
            (None, None) => None,
        }
    }
}

#[derive(serde::Serialize)]
struct CanonicalEmbedBody {
    model: String,
    input: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    truncate: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<ModelOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_alive: Option<KeepAlive>,
}

impl OperationRequest for EmbedRequest {
    type Response = EmbedResponse;
    const KIND: OperationKind = OperationKind::Embed;

    fn validate(&self) -> Result<(), OllamaError> {
        require_model(&self.model)?;
        match self.texts() {
            None => Err(OllamaError::validation(
                "embedding request needs a prompt or an input",
            )),
            Some(texts) if texts.is_empty() => Err(OllamaError::validation(
                "embedding input batch must not be empty",
            )),
            Some(_) => Ok(()),
        }
    }

    fn into_body(self) -> Result<serde_json::Value, OllamaError> {
        let input = self.texts().unwrap_or_default();
        let prompt = match input.as_slice() {
            [single] => Some(single.clone()),
            _ => None,
        };
        let body = CanonicalEmbedBody {
            model: self.model,
            input,
            prompt,
            truncate: self.truncate,
            options: self.options,
            keep_alive: self.keep_alive,
        };
        serde_json::to_value(body)
            .map_err(|e| OllamaError::protocol(format!("failed to encode request: {e}")))
    }

    fn parse_response(body: &str) -> Result<EmbedResponse, OllamaError> {
        let value: serde_json::Value = serde_json::from_str(body)
            .map_err(|e| OllamaError::protocol(format!("invalid embed response body: {e}")))?;
        EmbedResponse::from_value(&value)
    }
}

/// Embedding result in whichever shape the server returned.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum EmbedResponse {
    /// `{"embedding": [...]}`
    Single { embedding: Vec<f64> },
    /// `{"embeddings": [[...], ...]}`
    Batch { embeddings: Vec<Vec<f64>> },
}

type ShapeMatcher = fn(&serde_json::Value) -> Option<EmbedResponse>;

/// Tried in order; the first match wins.
const SHAPES: [ShapeMatcher; 2] = [match_batch, match_single];

fn match_batch(value: &serde_json::Value) -> Option<EmbedResponse> {
    let embeddings = serde_json::from_value(value.get("embeddings")?.clone()).ok()?;
    Some(EmbedResponse::Batch { embeddings })
}

fn match_single(value: &serde_json::Value) -> Option<EmbedResponse> {
    let embedding = serde_json::from_value(value.get("embedding")?.clone()).ok()?;
    Some(EmbedResponse::Single { embedding })
}

impl<'de> serde::Deserialize<'de> for EmbedResponse {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = <serde_json::Value as serde::Deserialize>::deserialize(deserializer)?;
        Self::from_value(&value).map_err(serde::de::Error::custom)
    }
}

impl EmbedResponse {
    pub fn from_value(value: &serde_json::Value) -> Result<Self, OllamaError> {
        SHAPES.iter().find_map(|matcher| matcher(value)).ok_or_else(|| {
            OllamaError::protocol("embed response has neither `embedding` nor `embeddings`")
        })
    }

    /// All vectors, one per input text.
    pub fn vectors(&self) -> Vec<&[f64]> {
        match self {
            EmbedResponse::Single { embedding } => vec![embedding.as_slice()],
            EmbedResponse::Batch { embeddings } => {
                embeddings.iter().map(Vec::as_slice).collect()
            }
        }
    }

    pub fn into_vectors(self) -> Vec<Vec<f64>> {
        match self {
            EmbedResponse::Single { embedding } => vec![embedding],
            EmbedResponse::Batch { embeddings } => embeddings,
        }
    }
}
