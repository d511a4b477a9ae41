//! Error taxonomy for the pipeline.
//!
//! Retryability lives on the error itself so the unit-of-work runner can
//! decide without inspecting call sites: transient upstream failures and
//! schema-violating model output retry, upstream rejections do not.

use serde::{Deserialize, Serialize};

/// What went wrong inside a data-tool invocation.
///
/// The kinds are distinguished so the degraded-data path can tell the user
/// "I couldn't reach the timesheet system" rather than a generic shrug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// The model selected a tool that is not in the registry.
    ToolNotFound,
    /// The selected parameters failed schema validation.
    InvalidParameters,
    /// The timesheet backend refused or errored.
    UpstreamUnavailable,
    /// The timesheet backend did not answer in time.
    UpstreamTimeout,
}

/// Failure of a single delegated agent operation (model call or tool call).
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Network trouble or a 5xx from the model endpoint.
    #[error("transient upstream failure: {0}")]
    Transient(String),

    /// The model answered, but not in the shape the caller expects.
    /// Retried (the model usually self-corrects), never silently defaulted.
    #[error("model output did not match the expected schema: {0}")]
    MalformedOutput(String),

    /// A data-tool invocation failed, typed by kind.
    #[error("tool invocation failed ({kind:?}): {message}")]
    Tool { kind: ToolErrorKind, message: String },

    /// The upstream rejected the request outright (auth, bad model name).
    /// Retrying without intervention cannot help.
    #[error("upstream rejected the request: {0}")]
    Rejected(String),
}

impl AgentError {
    pub fn is_retryable(&self) -> bool {
        match self {
            AgentError::Transient(_) | AgentError::MalformedOutput(_) | AgentError::Tool { .. } => {
                true
            }
            AgentError::Rejected(_) => false,
        }
    }

    /// Tool failure kind, when this error carries one. Transient failures
    /// during retrieval count as the backend being unreachable.
    pub fn tool_kind(&self) -> ToolErrorKind {
        match self {
            AgentError::Tool { kind, .. } => *kind,
            AgentError::Transient(_) => ToolErrorKind::UpstreamUnavailable,
            AgentError::MalformedOutput(_) => ToolErrorKind::InvalidParameters,
            AgentError::Rejected(_) => ToolErrorKind::UpstreamUnavailable,
        }
    }
}

/// Failure of an outbound channel send.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// Provider hiccup; retried under the delivery policy.
    #[error("transient delivery failure: {0}")]
    Transient(String),

    /// Provider rejected the message (bad recipient, policy block).
    #[error("delivery rejected: {0}")]
    Rejected(String),
}

impl DeliveryError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliveryError::Transient(_))
    }
}

/// Common retryability view used by the unit-of-work runner.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for AgentError {
    fn is_retryable(&self) -> bool {
        AgentError::is_retryable(self)
    }
}

impl Retryable for DeliveryError {
    fn is_retryable(&self) -> bool {
        DeliveryError::is_retryable(self)
    }
}
