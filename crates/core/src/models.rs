//! # Tally Models
//!
//! The conversation data model shared by the agents and the orchestrator.
//! Everything here is created fresh per inbound request and treated as
//! immutable once produced; a refinement yields a new [`ComposedAnswer`]
//! rather than mutating the old one.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ToolErrorKind;

/// Messaging channel a conversation arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Sms,
    Chat,
    Email,
}

impl Channel {
    /// Stable identifier used in logs and prompts.
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Sms => "sms",
            Channel::Chat => "chat",
            Channel::Email => "email",
        }
    }
}

/// Immutable record of one inbound message.
///
/// Created at intake and read-only from then on. `request_id` is the
/// idempotency key: the pipeline starts at most once per id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRequest {
    pub request_id: String,
    pub channel: Channel,
    pub sender_id: String,
    pub message_text: String,
    pub received_at: DateTime<Utc>,
    /// Opaque key-value context supplied by the intake gateway
    /// (display name, credentials reference, timezone, locale).
    #[serde(default)]
    pub user_context: HashMap<String, String>,
}

impl ConversationRequest {
    /// Display name for prompts, falling back to the sender id.
    pub fn display_name(&self) -> &str {
        self.user_context
            .get("name")
            .map(String::as_str)
            .unwrap_or(&self.sender_id)
    }

    /// IANA timezone name, if the gateway supplied one.
    pub fn timezone(&self) -> Option<&str> {
        self.user_context.get("timezone").map(String::as_str)
    }

    /// Reference handle for the user's timesheet credentials.
    ///
    /// The actual secret never passes through the pipeline; data tools
    /// resolve the reference on their side.
    pub fn credentials_ref(&self) -> &str {
        self.user_context
            .get("credentials_ref")
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// Outcome of the planner's analysis step: does this message need a
/// timesheet lookup, and if so what should the retrieval agent fetch?
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub needs_data: bool,
    /// Natural-language request handed to the retrieval agent.
    /// Always `Some` when `needs_data` is true.
    pub data_request: Option<String>,
}

/// What the retrieval step produced for the compose step.
///
/// Retrieval failures degrade to [`DataOutcome::Unavailable`] rather than
/// aborting the conversation; the planner composes around the gap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DataOutcome {
    /// No lookup was needed for this message.
    NotRequested,
    /// Raw tool result, passed to the planner unmodified.
    Retrieved(serde_json::Value),
    /// The lookup failed after retries.
    Unavailable(DataUnavailable),
}

/// Typed marker for a failed lookup, kept user-safe: `summary` is the
/// phrase the planner may weave into its answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataUnavailable {
    pub kind: ToolErrorKind,
    pub summary: String,
}

impl DataUnavailable {
    pub fn from_kind(kind: ToolErrorKind) -> Self {
        let summary = match kind {
            ToolErrorKind::ToolNotFound | ToolErrorKind::InvalidParameters => {
                "I didn't understand which timesheet records to look up".to_string()
            }
            ToolErrorKind::UpstreamUnavailable | ToolErrorKind::UpstreamTimeout => {
                "I couldn't reach the timesheet system".to_string()
            }
        };
        Self { kind, summary }
    }
}

/// Which pass produced a [`ComposedAnswer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerSource {
    Initial,
    Refinement,
    GracefulFailure,
}

/// Plain answer text from the planner, before any channel formatting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposedAnswer {
    pub text: String,
    pub source: AnswerSource,
}

/// Minimum criterion description length. Shorter descriptions are vacuous
/// ("looks ok") and rejected at construction.
pub const MIN_CRITERION_DESCRIPTION_LEN: usize = 10;

/// Upper bound on criteria per scorecard.
pub const MAX_SCORECARD_CRITERIA: usize = 6;

/// One pass/fail check applied to a candidate answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScorecardCriterion {
    pub id: String,
    pub description: String,
    pub expected_behavior: String,
}

/// Scorecard construction failure.
#[derive(Debug, thiserror::Error)]
pub enum InvalidScorecard {
    #[error("a scorecard needs at least one criterion")]
    Empty,
    #[error("criterion '{0}' has a vacuous description")]
    VacuousDescription(String),
    #[error("criterion id is empty")]
    EmptyId,
}

/// Ordered set of criteria used to judge an answer. Built once per request
/// and reused unchanged across the refinement attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scorecard {
    criteria: Vec<ScorecardCriterion>,
}

impl Scorecard {
    /// Validates the invariants: at least one criterion, non-empty ids,
    /// and descriptions longer than [`MIN_CRITERION_DESCRIPTION_LEN`].
    /// Criteria beyond [`MAX_SCORECARD_CRITERIA`] are dropped.
    pub fn new(mut criteria: Vec<ScorecardCriterion>) -> Result<Self, InvalidScorecard> {
        if criteria.is_empty() {
            return Err(InvalidScorecard::Empty);
        }
        criteria.truncate(MAX_SCORECARD_CRITERIA);
        for criterion in &criteria {
            if criterion.id.trim().is_empty() {
                return Err(InvalidScorecard::EmptyId);
            }
            if criterion.description.chars().count() <= MIN_CRITERION_DESCRIPTION_LEN {
                return Err(InvalidScorecard::VacuousDescription(criterion.id.clone()));
            }
        }
        Ok(Self { criteria })
    }

    pub fn criteria(&self) -> &[ScorecardCriterion] {
        &self.criteria
    }
}

/// One segment of a response that exceeded the channel's single-message
/// limit. Parts are delivered strictly in `sequence_index` order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePart {
    pub sequence_index: usize,
    pub text: String,
}

/// Channel-ready response produced by the formatting agent. Regenerated,
/// never mutated, when the answer is refined.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormattedResponse {
    pub content: String,
    pub is_split: bool,
    pub parts: Vec<MessagePart>,
    pub channel: Channel,
}

impl FormattedResponse {
    /// Message texts to send, in delivery order.
    pub fn outgoing_texts(&self) -> Vec<&str> {
        if self.is_split {
            self.parts.iter().map(|p| p.text.as_str()).collect()
        } else {
            vec![self.content.as_str()]
        }
    }
}

/// Verdict from the quality validation agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub passed: bool,
    /// Ids of the criteria that failed.
    pub failed_criteria: Vec<String>,
    /// Aggregated reasons, handed verbatim to the planner's refine step.
    pub feedback: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn criterion(id: &str, description: &str) -> ScorecardCriterion {
        ScorecardCriterion {
            id: id.to_string(),
            description: description.to_string(),
            expected_behavior: "the answer satisfies the check".to_string(),
        }
    }

    #[test]
    fn test_scorecard_rejects_empty() {
        assert!(matches!(
            Scorecard::new(Vec::new()),
            Err(InvalidScorecard::Empty)
        ));
    }

    #[test]
    fn test_scorecard_rejects_vacuous_description() {
        let result = Scorecard::new(vec![criterion("C1", "short")]);
        assert!(matches!(
            result,
            Err(InvalidScorecard::VacuousDescription(_))
        ));
    }

    #[test]
    fn test_scorecard_caps_criteria() {
        let criteria: Vec<_> = (0..10)
            .map(|i| criterion(&format!("C{i}"), "answers the question that was asked"))
            .collect();
        let scorecard = Scorecard::new(criteria).unwrap();
        assert_eq!(scorecard.criteria().len(), MAX_SCORECARD_CRITERIA);
    }

    #[test]
    fn test_display_name_falls_back_to_sender() {
        let request = ConversationRequest {
            request_id: "r-1".to_string(),
            channel: Channel::Sms,
            sender_id: "+15550100".to_string(),
            message_text: "Check my timesheet".to_string(),
            received_at: Utc::now(),
            user_context: HashMap::new(),
        };
        assert_eq!(request.display_name(), "+15550100");
    }

    #[test]
    fn test_outgoing_texts_unsplit() {
        let response = FormattedResponse {
            content: "hello".to_string(),
            is_split: false,
            parts: Vec::new(),
            channel: Channel::Chat,
        };
        assert_eq!(response.outgoing_texts(), vec!["hello"]);
    }

    #[test]
    fn test_channel_serde_roundtrip() {
        let json = serde_json::to_string(&Channel::Sms).unwrap();
        assert_eq!(json, "\"sms\"");
        let back: Channel = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Channel::Sms);
    }
}
