use std::fmt;

use crate::errors::OllamaError;

/// HTTP method used by an operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Delete,
}

impl Method {
    pub(crate) fn as_reqwest(self) -> reqwest::Method {
        match self {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        })
    }
}

/// Logical calls exposed by the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Generate,
    Chat,
    Embed,
    ListModels,
    Show,
    Pull,
    Push,
    Create,
    Delete,
    Copy,
    ListRunning,
}

/// Rule recognising the last event of a stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    /// The event's `done` flag is true.
    DoneFlag,
    /// The event's `status` equals `"success"`.
    StatusSuccess,
}

impl Termination {
    pub fn is_terminal<E: StreamEvent + ?Sized>(self, event: &E) -> bool {
        match self {
            Termination::DoneFlag => event.done_flag(),
            Termination::StatusSuccess => event.status() == Some("success"),
        }
    }
}

/// Fields a streamed response exposes for terminal detection.
pub trait StreamEvent {
    fn done_flag(&self) -> bool {
        false
    }

    fn status(&self) -> Option<&str> {
        None
    }
}

/// A typed request bound to one operation kind.
pub trait OperationRequest: serde::Serialize {
    type Response: serde::de::DeserializeOwned + Send + 'static;
    const KIND: OperationKind;

    /// Checks required fields before any network activity.
    fn validate(&self) -> Result<(), OllamaError>;

    /// JSON body sent to the server.
    fn into_body(self) -> Result<serde_json::Value, OllamaError>
    where
        Self: Sized,
    {
        serde_json::to_value(&self)
            .map_err(|e| OllamaError::protocol(format!("failed to encode request: {e}")))
    }

    /// Decodes a complete, successful response body.
    fn parse_response(body: &str) -> Result<Self::Response, OllamaError> {
        serde_json::from_str(body).map_err(|e| {
            OllamaError::protocol(format!("invalid {} response body: {e}", Self::KIND))
        })
    }
}

/// A request whose operation can stream its response.
pub trait StreamingRequest: OperationRequest {
    /// Mode asked for by the caller. `None` means a single response.
    fn requested_stream(&self) -> Option<bool>;
}

/// Static metadata describing one operation kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Operation {
    pub kind: OperationKind,
    pub method: Method,
    pub path: &'static str,
    /// Present only for operations that support streaming.
    pub termination: Option<Termination>,
}

impl Operation {
    pub fn streams(&self) -> bool {
        self.termination.is_some()
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}

const fn op(
    kind: OperationKind,
    method: Method,
    path: &'static str,
    termination: Option<Termination>,
) -> Operation {
    Operation {
        kind,
        method,
        path,
        termination,
    }
}

static GENERATE: Operation = op(
    OperationKind::Generate,
    Method::Post,
    "/api/generate",
    Some(Termination::DoneFlag),
);
static CHAT: Operation = op(
    OperationKind::Chat,
    Method::Post,
    "/api/chat",
    Some(Termination::DoneFlag),
);
static EMBED: Operation = op(OperationKind::Embed, Method::Post, "/api/embeddings", None);
static LIST_MODELS: Operation = op(OperationKind::ListModels, Method::Get, "/api/tags", None);
static SHOW: Operation = op(OperationKind::Show, Method::Post, "/api/show", None);
static PULL: Operation = op(
    OperationKind::Pull,
    Method::Post,
    "/api/pull",
    Some(Termination::StatusSuccess),
);
static PUSH: Operation = op(
    OperationKind::Push,
    Method::Post,
    "/api/push",
    Some(Termination::StatusSuccess),
);
static CREATE: Operation = op(
    OperationKind::Create,
    Method::Post,
    "/api/create",
    Some(Termination::StatusSuccess),
);
static DELETE: Operation = op(OperationKind::Delete, Method::Post, "/api/delete", None);
static COPY: Operation = op(OperationKind::Copy, Method::Post, "/api/copy", None);
static LIST_RUNNING: Operation = op(OperationKind::ListRunning, Method::Get, "/api/ps", None);

impl OperationKind {
    pub const ALL: [OperationKind; 11] = [
        OperationKind::Generate,
        OperationKind::Chat,
        OperationKind::Embed,
        OperationKind::ListModels,
        OperationKind::Show,
        OperationKind::Pull,
        OperationKind::Push,
        OperationKind::Create,
        OperationKind::Delete,
        OperationKind::Copy,
        OperationKind::ListRunning,
    ];

    pub fn descriptor(self) -> &'static Operation {
        match self {
            OperationKind::Generate => &GENERATE,
            OperationKind::Chat => &CHAT,
            OperationKind::Embed => &EMBED,
            OperationKind::ListModels => &LIST_MODELS,
            OperationKind::Show => &SHOW,
            OperationKind::Pull => &PULL,
            OperationKind::Push => &PUSH,
            OperationKind::Create => &CREATE,
            OperationKind::Delete => &DELETE,
            OperationKind::Copy => &COPY,
            OperationKind::ListRunning => &LIST_RUNNING,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            OperationKind::Generate => "generate",
            OperationKind::Chat => "chat",
            OperationKind::Embed => "embed",
            OperationKind::ListModels => "list",
            OperationKind::Show => "show",
            OperationKind::Pull => "pull",
            OperationKind::Push => "push",
            OperationKind::Create => "create",
            OperationKind::Delete => "delete",
            OperationKind::Copy => "copy",
            OperationKind::ListRunning => "ps",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
