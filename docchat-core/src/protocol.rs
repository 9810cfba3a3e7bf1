use std::fmt::Display;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The uniform envelope every backend call resolves to, success or failure.
///
/// `state=true` promises the fields the calling operation needs are present
/// in `addition_args`, but callers re-validate types defensively anyway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestMessage {
    #[serde(default)]
    pub source: String,
    pub state: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub addition_args: Map<String, Value>,
}

impl RequestMessage {
    /// Envelope synthesized when the transport itself fails. Callers never
    /// see the underlying error as anything but a failed call.
    pub fn transport_failure(cause: impl Display) -> Self {
        let mut addition_args = Map::new();
        addition_args.insert("error".into(), Value::String(cause.to_string()));
        Self {
            source: String::new(),
            state: false,
            message: "request failed".into(),
            addition_args,
        }
    }

    /// String-typed argument, or `None` when absent or mistyped.
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.addition_args.get(key).and_then(Value::as_str)
    }

    /// The backend-authored failure message, with a generic fallback so the
    /// user never sees an empty notice.
    pub fn failure_message(&self) -> String {
        if self.message.is_empty() {
            "request failed".to_string()
        } else {
            self.message.clone()
        }
    }
}

/// Request body shapes accepted by the backend endpoints.
#[derive(Debug, Clone)]
pub enum Payload {
    Empty,
    Json(Value),
    File {
        field: String,
        file_name: String,
        bytes: Vec<u8>,
    },
}

/// Transport seam. Implementations must resolve every call into an
/// envelope, normalizing transport errors with
/// [`RequestMessage::transport_failure`]; `send` never fails. A call with
/// no timeout is unbounded, and in-flight calls cannot be cancelled.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn send(
        &self,
        payload: Payload,
        endpoint: &str,
        timeout: Option<Duration>,
    ) -> RequestMessage;
}

pub mod endpoints {
    pub const UPLOAD: &str = "api/upload";
    pub const EMBEDDING: &str = "api/embedding";
    pub const CHAT: &str = "api/chat";
    // The backend route really is spelled this way.
    pub const SET_LANGUAGE: &str = "api/set_lanuage";
    pub const SET_MODELS: &str = "api/set_models";
}

/// Per-endpoint timeouts, matching the backend's documented contract.
/// `api/embedding` has none: indexing a large document may take minutes.
pub mod timeouts {
    use std::time::Duration;

    pub const UPLOAD: Duration = Duration::from_secs(1);
    pub const CHAT: Duration = Duration::from_secs(60);
    pub const SET_LANGUAGE: Duration = Duration::from_secs(1);
    pub const SET_MODELS: Duration = Duration::from_secs(3);
}
