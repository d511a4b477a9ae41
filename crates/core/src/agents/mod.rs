//! # Tally Agents
//!
//! The four model-backed agents of the pipeline:
//!
//! - [`PlannerAgent`] - routing analysis, answer composition, refinement,
//!   graceful failure
//! - [`DataRetrievalAgent`] - tool selection against the capability
//!   registry and invocation of the timesheet backend
//! - [`FormattingAgent`] - channel-appropriate rewrite plus deterministic
//!   length enforcement
//! - [`QualityValidationAgent`] - scorecard construction and pass/fail
//!   judgment
//!
//! Each agent is stateless between calls: it holds its completion client,
//! prompt templates, and configuration, and everything request-specific is
//! passed in. Model output is parsed into a typed struct at every call
//! site; output that does not parse is a retryable failure, never a
//! silent default.

pub mod formatter;
pub mod planner;
pub mod prompts;
pub mod retrieval;
pub mod validator;

pub use formatter::FormattingAgent;
pub use planner::PlannerAgent;
pub use prompts::PromptSet;
pub use retrieval::DataRetrievalAgent;
pub use validator::QualityValidationAgent;

use serde::de::DeserializeOwned;

use crate::error::AgentError;

/// Parse a model reply into `T`.
///
/// Models wrap JSON in code fences or preamble text often enough that we
/// extract the outermost object before deserializing. Anything that still
/// fails is [`AgentError::MalformedOutput`].
pub(crate) fn parse_llm_json<T: DeserializeOwned>(raw: &str) -> Result<T, AgentError> {
    let start = raw
        .find('{')
        .ok_or_else(|| AgentError::MalformedOutput("no JSON object in model reply".into()))?;
    let end = raw
        .rfind('}')
        .ok_or_else(|| AgentError::MalformedOutput("unterminated JSON object in model reply".into()))?;
    if end < start {
        return Err(AgentError::MalformedOutput(
            "unterminated JSON object in model reply".into(),
        ));
    }
    serde_json::from_str(&raw[start..=end])
        .map_err(|e| AgentError::MalformedOutput(format!("{e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Probe {
        value: u32,
    }

    #[test]
    fn test_parses_bare_json() {
        let probe: Probe = parse_llm_json("{\"value\": 3}").unwrap();
        assert_eq!(probe, Probe { value: 3 });
    }

    #[test]
    fn test_parses_fenced_json() {
        let raw = "Here you go:\n```json\n{\"value\": 7}\n```\nanything else?";
        let probe: Probe = parse_llm_json(raw).unwrap();
        assert_eq!(probe, Probe { value: 7 });
    }

    #[test]
    fn test_rejects_prose() {
        let err = parse_llm_json::<Probe>("I could not decide.").unwrap_err();
        assert!(matches!(err, AgentError::MalformedOutput(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_rejects_wrong_shape() {
        let err = parse_llm_json::<Probe>("{\"other\": true}").unwrap_err();
        assert!(matches!(err, AgentError::MalformedOutput(_)));
    }
}
